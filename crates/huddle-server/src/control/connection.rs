use std::net::SocketAddr;
use std::time::Duration;

use chrono::Utc;
use huddle_protocol::{ClientMessage, FrameError, ServerMessage};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::codec::{read_message, write_message};
use super::coordinator::EvictReason;
use crate::registry::Identity;
use crate::state::ServerState;

/// How long queued replies may take to flush after the connection ends
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Serve one control connection until it leaves, fails or is evicted
pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: ServerState) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }

    let (mut reader, mut writer) = stream.into_split();
    let connection_id = Uuid::new_v4();

    // Create channel for outbound messages
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let close = state.connections.add_connection(connection_id, tx.clone()).await;

    // Forward queued messages to the socket; an eviction notice is the last
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let last = matches!(message, ServerMessage::Evicted { .. });
            if let Err(e) = write_message(&mut writer, &message).await {
                tracing::debug!("Control write to {} failed: {}", peer, e);
                break;
            }
            if last {
                break;
            }
        }
    });

    let identity = match register(&mut reader, peer, connection_id, &tx, &state).await {
        Some(identity) => identity,
        None => {
            finish(&state, connection_id, tx, send_task).await;
            return;
        }
    };

    tracing::info!("{} registered from {}", identity, peer);

    // Handle incoming messages
    loop {
        let message = tokio::select! {
            result = read_message::<_, ClientMessage>(&mut reader) => result,
            _ = close.notified() => {
                tracing::debug!("Closing control connection of {}", identity);
                break;
            }
        };

        if let Ok(Some(_)) = &message {
            state.coordinator.registry().touch(&identity).await;
        }

        match message {
            Ok(Some(ClientMessage::Leave)) => {
                state.coordinator.evict(&identity, EvictReason::Left).await;
                break;
            }
            Ok(Some(message)) => handle_client_message(&state, &identity, &tx, message).await,
            Ok(None) => break,
            // The frame was consumed whole, so the stream is still aligned
            Err(FrameError::Json(e)) => {
                tracing::warn!("Invalid message from {}: {}", identity, e);
                let _ = tx.send(ServerMessage::Error {
                    message: "Invalid message format".to_string(),
                });
            }
            Err(e) => {
                tracing::warn!("Control connection error for {}: {}", identity, e);
                break;
            }
        }
    }

    finish(&state, connection_id, tx, send_task).await;

    // No-op when the endpoint already left or was evicted
    state
        .coordinator
        .evict(&identity, EvictReason::Disconnected)
        .await;

    tracing::info!("{} disconnected", identity);
}

/// Expect `register` as the first message and admit the endpoint
async fn register(
    reader: &mut OwnedReadHalf,
    peer: SocketAddr,
    connection_id: Uuid,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    state: &ServerState,
) -> Option<Identity> {
    let reject = |message: String| {
        let _ = tx.send(ServerMessage::Error { message });
    };

    let requested = match read_message::<_, ClientMessage>(reader).await {
        Ok(Some(ClientMessage::Register { identity })) => identity,
        Ok(Some(_)) => {
            reject("First message must be register".to_string());
            return None;
        }
        Ok(None) => {
            tracing::debug!("{} closed before registering", peer);
            return None;
        }
        Err(e) => {
            tracing::warn!("Invalid registration from {}: {}", peer, e);
            reject("Invalid message format".to_string());
            return None;
        }
    };

    let handle = match state.coordinator.admit(&requested, peer).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::info!("Registration of {:?} from {} rejected: {}", requested, peer, e);
            reject(e.to_string());
            return None;
        }
    };

    state
        .connections
        .register(connection_id, handle.identity.clone())
        .await;

    let _ = tx.send(state.session.registered(&handle.identity));

    // The membership broadcast for this admission may have gone out before
    // the connection was registered, so send the current list directly
    let (version, members) = state.coordinator.registry().members().await;
    let _ = tx.send(ServerMessage::MemberList { version, members });

    Some(handle.identity)
}

async fn handle_client_message(
    state: &ServerState,
    identity: &Identity,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    message: ClientMessage,
) {
    match message {
        ClientMessage::Register { .. } => {
            let _ = tx.send(ServerMessage::Error {
                message: "Already registered".to_string(),
            });
        }
        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
        ClientMessage::Chat { text } => {
            state
                .connections
                .broadcast(&ServerMessage::Chat {
                    from: identity.to_string(),
                    text,
                    timestamp: Utc::now(),
                })
                .await;
        }
        // Handled by the connection loop
        ClientMessage::Leave => {}
    }
}

/// Unregister the connection and let queued replies reach the peer
async fn finish(
    state: &ServerState,
    connection_id: Uuid,
    tx: mpsc::UnboundedSender<ServerMessage>,
    mut send_task: tokio::task::JoinHandle<()>,
) {
    state.connections.remove_connection(connection_id).await;
    drop(tx);

    if tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }
}
