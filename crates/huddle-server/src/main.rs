use anyhow::{Context, Result};
use huddle_server::{Config, HuddleServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Huddle relay...");

    // Load configuration; `huddle-server [host] [port]` overrides the file
    let mut config = Config::load()?;
    let mut args = std::env::args().skip(1);
    if let Some(host) = args.next() {
        config.bind_host = host;
    }
    if let Some(port) = args.next() {
        config.base_port = port
            .parse()
            .with_context(|| format!("invalid port {:?}", port))?;
    }

    let server = HuddleServer::bind(config).await?;
    server.run().await?;

    Ok(())
}
