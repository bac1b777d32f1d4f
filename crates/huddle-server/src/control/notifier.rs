//! Membership notifications for control connections

use std::sync::Arc;

use huddle_protocol::ServerMessage;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::connections::ConnectionManager;
use super::coordinator::{Coordinator, EvictReason, MembershipEvent};

/// Turn membership events into member lists and system notices
pub fn spawn_membership_notifier(
    coordinator: Arc<Coordinator>,
    connections: Arc<ConnectionManager>,
) -> JoinHandle<()> {
    let mut events = coordinator.subscribe();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => notify(&coordinator, &connections, event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Membership notifier lagged by {} events", skipped);
                    broadcast_member_list(&coordinator, &connections).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn notify(coordinator: &Coordinator, connections: &ConnectionManager, event: MembershipEvent) {
    match event {
        MembershipEvent::Admitted { identity } => {
            connections
                .broadcast(&ServerMessage::System {
                    text: format!("{} joined the session", identity),
                })
                .await;
            broadcast_member_list(coordinator, connections).await;
        }
        MembershipEvent::Activated { identity, stream, .. } => {
            tracing::debug!("{} is now active ({})", identity, stream);
            broadcast_member_list(coordinator, connections).await;
        }
        MembershipEvent::Rebound { identity, stream, addr } => {
            tracing::debug!("{} moved its {} stream to {}", identity, stream, addr);
        }
        MembershipEvent::Draining { identity, reason } => {
            if reason == EvictReason::LivenessTimeout {
                let evicted = ServerMessage::Evicted {
                    reason: reason.to_string(),
                };
                connections.disconnect(&identity, evicted).await;
            }

            connections
                .broadcast(&ServerMessage::System {
                    text: format!("{} left the session", identity),
                })
                .await;
            broadcast_member_list(coordinator, connections).await;
        }
        MembershipEvent::Removed { identity } => {
            tracing::debug!("{} removed", identity);
        }
    }
}

async fn broadcast_member_list(coordinator: &Coordinator, connections: &ConnectionManager) {
    let (version, members) = coordinator.registry().members().await;
    connections
        .broadcast(&ServerMessage::MemberList { version, members })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MediaStream, SessionRegistry};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_join_and_leave_notices() {
        let coordinator = Arc::new(Coordinator::new(
            Arc::new(SessionRegistry::new(8)),
            Duration::from_secs(10),
        ));
        let connections = Arc::new(ConnectionManager::new());
        let notifier = spawn_membership_notifier(coordinator.clone(), connections.clone());

        // An observer connection registered as alice
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        connections.add_connection(id, tx).await;
        coordinator.admit("alice", addr(4000)).await.unwrap();
        connections.register(id, Arc::from("alice")).await;

        coordinator.admit("bob", addr(5000)).await.unwrap();

        // Alice's own admission may or may not have reached her, skip to bob's
        let mut message = next(&mut rx).await;
        while message
            != (ServerMessage::System {
                text: "bob joined the session".into(),
            })
        {
            message = next(&mut rx).await;
        }
        match next(&mut rx).await {
            ServerMessage::MemberList { members, .. } => assert_eq!(members.len(), 2),
            other => panic!("unexpected {:?}", other),
        }

        coordinator
            .evict("bob", EvictReason::Left)
            .await;
        assert_eq!(
            next(&mut rx).await,
            ServerMessage::System {
                text: "bob left the session".into()
            }
        );
        match next(&mut rx).await {
            ServerMessage::MemberList { members, .. } => {
                assert_eq!(members.len(), 1);
                assert_eq!(members[0].identity, "alice");
            }
            other => panic!("unexpected {:?}", other),
        }

        notifier.abort();
    }

    #[tokio::test]
    async fn test_liveness_eviction_disconnects() {
        let coordinator = Arc::new(Coordinator::new(
            Arc::new(SessionRegistry::new(8)),
            Duration::from_millis(20),
        ));
        let connections = Arc::new(ConnectionManager::new());
        let notifier = spawn_membership_notifier(coordinator.clone(), connections.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let close = connections.add_connection(id, tx).await;
        coordinator.admit("carol", addr(6000)).await.unwrap();
        coordinator
            .bind_media("carol", MediaStream::Audio, addr(6002))
            .await
            .unwrap();
        connections.register(id, Arc::from("carol")).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        coordinator.sweep().await;

        let mut message = next(&mut rx).await;
        while !matches!(message, ServerMessage::Evicted { .. }) {
            message = next(&mut rx).await;
        }
        assert_eq!(
            message,
            ServerMessage::Evicted {
                reason: "liveness timeout".into()
            }
        );
        tokio::time::timeout(Duration::from_secs(1), close.notified())
            .await
            .unwrap();

        notifier.abort();
    }
}
