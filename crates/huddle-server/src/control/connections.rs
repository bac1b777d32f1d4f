use huddle_protocol::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock, mpsc};
use uuid::Uuid;

use crate::registry::Identity;

struct ConnectionEntry {
    sender: mpsc::UnboundedSender<ServerMessage>,
    /// Set once the connection has registered
    identity: Option<Identity>,
    /// Signalled to make the connection task hang up
    close: Arc<Notify>,
}

/// Registry of open control connections and their outbound channels
pub struct ConnectionManager {
    /// Map from connection ID to connection entry
    connections: RwLock<HashMap<Uuid, ConnectionEntry>>,
    /// Map from registered identity to its connection ID
    identities: RwLock<HashMap<Identity, Uuid>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            identities: RwLock::new(HashMap::new()),
        }
    }

    /// Track a freshly accepted connection; returns its hang-up signal
    pub async fn add_connection(
        &self,
        connection_id: Uuid,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Arc<Notify> {
        let close = Arc::new(Notify::new());
        self.connections.write().await.insert(
            connection_id,
            ConnectionEntry {
                sender,
                identity: None,
                close: close.clone(),
            },
        );

        tracing::debug!("Control connection {} opened", connection_id);
        close
    }

    /// Associate a connection with the identity it registered
    pub async fn register(&self, connection_id: Uuid, identity: Identity) {
        if let Some(entry) = self.connections.write().await.get_mut(&connection_id) {
            entry.identity = Some(identity.clone());
        }
        self.identities.write().await.insert(identity, connection_id);
    }

    /// Forget a connection; returns the identity it had registered
    pub async fn remove_connection(&self, connection_id: Uuid) -> Option<Identity> {
        let entry = self.connections.write().await.remove(&connection_id)?;

        if let Some(identity) = &entry.identity {
            let mut identities = self.identities.write().await;
            // A newer connection may have registered the same identity since
            if identities.get(identity) == Some(&connection_id) {
                identities.remove(identity);
            }
        }

        tracing::debug!("Control connection {} closed", connection_id);
        entry.identity
    }

    /// Send to every registered connection
    pub async fn broadcast(&self, message: &ServerMessage) {
        let connections = self.connections.read().await;

        for (conn_id, entry) in connections.iter() {
            if entry.identity.is_none() {
                continue;
            }
            if let Err(e) = entry.sender.send(message.clone()) {
                tracing::debug!("Failed to send message to {}: {}", conn_id, e);
            }
        }
    }

    /// Send a final message to an identity and close its connection
    pub async fn disconnect(&self, identity: &str, farewell: ServerMessage) -> bool {
        let Some(connection_id) = self.identities.read().await.get(identity).copied() else {
            return false;
        };

        let connections = self.connections.read().await;
        let Some(entry) = connections.get(&connection_id) else {
            return false;
        };

        let _ = entry.sender.send(farewell);
        entry.close.notify_one();
        true
    }

    pub async fn is_registered(&self, identity: &str) -> bool {
        self.identities.read().await.contains_key(identity)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
