//! Relay server
//!
//! Binds the control listener and both media sockets, then runs every
//! worker until shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::control::{Coordinator, handle_connection, spawn_membership_notifier};
use crate::error::Result;
use crate::media::{AudioMixer, VideoRelay, spawn_eviction_watch};
use crate::registry::SessionRegistry;
use crate::state::{ServerState, SessionInfo};
use crate::stats::RelayStats;

pub struct HuddleServer {
    config: Config,
    state: ServerState,
    listener: TcpListener,
    control_addr: SocketAddr,
    video_addr: SocketAddr,
    audio_addr: SocketAddr,
    video: Arc<VideoRelay>,
    mixer: Arc<AudioMixer>,
    stats: Arc<RelayStats>,
}

impl HuddleServer {
    /// Bind all sockets; nothing runs until [`HuddleServer::run_until`]
    pub async fn bind(config: Config) -> Result<Self> {
        config.validate()?;
        let format = config.audio_format()?;
        let tick_interval = config.tick_interval()?;

        let listener = TcpListener::bind(config.control_addr()?).await?;
        let video_socket = Arc::new(UdpSocket::bind(config.video_addr()?).await?);
        let audio_socket = Arc::new(UdpSocket::bind(config.audio_addr()?).await?);

        let control_addr = listener.local_addr()?;
        let video_addr = video_socket.local_addr()?;
        let audio_addr = audio_socket.local_addr()?;

        let registry = Arc::new(SessionRegistry::new(config.max_endpoints));
        let coordinator = Arc::new(Coordinator::new(registry, config.liveness_timeout()));
        let stats = Arc::new(RelayStats::new());

        let video = Arc::new(VideoRelay::new(
            coordinator.clone(),
            video_socket,
            config.outbound_queue_capacity,
            stats.clone(),
        ));
        let mixer = Arc::new(AudioMixer::new(
            coordinator.clone(),
            audio_socket,
            format,
            config.outbound_queue_capacity,
            stats.clone(),
        ));

        let session = SessionInfo {
            video_port: video_addr.port(),
            audio_port: audio_addr.port(),
            audio: format,
            tick_interval,
        };

        Ok(Self {
            config,
            state: ServerState::new(coordinator, session),
            listener,
            control_addr,
            video_addr,
            audio_addr,
            video,
            mixer,
            stats,
        })
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn video_addr(&self) -> SocketAddr {
        self.video_addr
    }

    pub fn audio_addr(&self) -> SocketAddr {
        self.audio_addr
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.state.coordinator
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Run until ctrl-c
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run every worker until `shutdown` completes
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            "Huddle relay listening: control {}, video {}, audio {}",
            self.control_addr,
            self.video_addr,
            self.audio_addr
        );

        let coordinator = self.state.coordinator.clone();
        let mut workers: Vec<JoinHandle<()>> = vec![
            tokio::spawn(self.video.clone().run()),
            tokio::spawn(self.mixer.clone().run_ingress()),
            tokio::spawn(self.mixer.clone().run_ticker(self.state.session.tick_interval)),
            coordinator.spawn_sweeper(self.config.liveness_check_interval()),
            spawn_membership_notifier(coordinator.clone(), self.state.connections.clone()),
            spawn_eviction_watch(
                coordinator.subscribe(),
                vec![self.video.outbound().clone(), self.mixer.outbound().clone()],
                coordinator.registry().clone(),
            ),
        ];
        if let Some(period) = self.config.stats_interval() {
            workers.push(spawn_stats_logger(self.stats.clone(), period));
        }

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop() => result,
        };

        for worker in workers {
            worker.abort();
        }

        tracing::info!("Huddle relay stopped");
        result
    }

    async fn accept_loop(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!("New control connection from {}", peer);
                    tokio::spawn(handle_connection(stream, peer, self.state.clone()));
                }
                Err(e) => {
                    tracing::error!("Failed to accept control connection: {}", e);
                }
            }
        }
    }
}

fn spawn_stats_logger(stats: Arc<RelayStats>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let snap = stats.snapshot();
            tracing::info!(
                "Relay stats: video {} in / {} out, audio {} in, {} ticks / {} mixes, {} dropped \
                 (unresolved {}, unknown {}, malformed {}, bad audio {}, fan-out {})",
                snap.video_received,
                snap.video_forwarded,
                snap.audio_received,
                snap.mix_ticks,
                snap.mixes_sent,
                snap.total_dropped(),
                snap.unresolved_sender,
                snap.unknown_identity,
                snap.malformed_packet,
                snap.malformed_audio_frame,
                snap.dropped_fanout
            );
        }
    })
}
