//! Session registry implementation
//!
//! The single shared mutable structure of the relay. All mutations go through
//! the control-plane coordinator; the media path only ever calls
//! [`SessionRegistry::snapshot`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use huddle_protocol::MemberInfo;
use tokio::sync::RwLock;

use super::endpoint::{
    Endpoint, EndpointHandle, EndpointState, Identity, MediaStream, is_valid_identity,
};
use super::error::RegistryError;
use super::snapshot::Snapshot;

/// Result of a successful media bind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// First bind; the endpoint moved Pending -> Active
    Activated,
    /// The stream was bound to a different address before (NAT remap)
    Rebound,
    /// Already bound to this address
    Unchanged,
}

struct RegistryState {
    endpoints: HashMap<Identity, Endpoint>,
    next_order: u64,
    version: u64,
    snapshot: Arc<Snapshot>,
}

impl RegistryState {
    /// Bump the version and rebuild the published snapshot
    fn publish(&mut self) {
        self.version += 1;
        self.snapshot = Arc::new(Snapshot::build(self.version, self.endpoints.values()));
    }
}

/// Authoritative endpoint table with versioned snapshots
///
/// Thread-safe via `RwLock`. The lock is only held to clone the current
/// snapshot `Arc` or to apply a single mutation, never across I/O.
pub struct SessionRegistry {
    state: RwLock<RegistryState>,
    max_endpoints: usize,
}

impl SessionRegistry {
    pub fn new(max_endpoints: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                endpoints: HashMap::new(),
                next_order: 0,
                version: 0,
                snapshot: Arc::new(Snapshot::default()),
            }),
            max_endpoints,
        }
    }

    /// Current membership view
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.state.read().await.snapshot.clone()
    }

    /// Current registry version
    pub async fn version(&self) -> u64 {
        self.state.read().await.version
    }

    /// Number of endpoints holding a slot (Pending, Active or Draining)
    pub async fn len(&self) -> usize {
        self.state.read().await.endpoints.len()
    }

    /// Lifecycle state of an identity; absent identities are `Removed`
    pub async fn state_of(&self, identity: &str) -> EndpointState {
        self.state
            .read()
            .await
            .endpoints
            .get(identity)
            .map(|e| e.state)
            .unwrap_or(EndpointState::Removed)
    }

    /// Pending and Active endpoints in admission order, with the version
    pub async fn members(&self) -> (u64, Vec<MemberInfo>) {
        let state = self.state.read().await;
        let mut live: Vec<&Endpoint> = state.endpoints.values().filter(|e| e.is_live()).collect();
        live.sort_by_key(|e| e.order);

        let members = live
            .into_iter()
            .map(|e| MemberInfo {
                identity: e.identity.to_string(),
                state: e.state.into(),
                joined_at: e.joined_at,
            })
            .collect();

        (state.version, members)
    }

    /// Live endpoints with no media activity for longer than `timeout`
    pub async fn stale(&self, timeout: Duration) -> Vec<Identity> {
        self.state
            .read()
            .await
            .endpoints
            .values()
            .filter(|e| e.is_live() && e.liveness.idle_for() > timeout)
            .map(|e| e.identity.clone())
            .collect()
    }

    /// Record activity for a live endpoint seen outside the media path
    pub async fn touch(&self, identity: &str) -> bool {
        match self.state.read().await.endpoints.get(identity) {
            Some(endpoint) if endpoint.is_live() => {
                endpoint.liveness.touch();
                true
            }
            _ => false,
        }
    }

    /// Create a Pending endpoint
    pub(crate) async fn admit(
        &self,
        identity: &str,
        control_addr: SocketAddr,
    ) -> Result<EndpointHandle, RegistryError> {
        if !is_valid_identity(identity) {
            return Err(RegistryError::InvalidIdentity(identity.to_string()));
        }

        let mut state = self.state.write().await;

        if state.endpoints.contains_key(identity) {
            return Err(RegistryError::DuplicateIdentity(identity.to_string()));
        }
        if state.endpoints.len() >= self.max_endpoints {
            return Err(RegistryError::RegistryFull(self.max_endpoints));
        }

        let identity: Identity = Arc::from(identity);
        let order = state.next_order;
        state.next_order += 1;

        let endpoint = Endpoint::new(identity.clone(), control_addr, order);
        let handle = EndpointHandle {
            identity: identity.clone(),
            control_addr,
            joined_at: endpoint.joined_at,
        };
        state.endpoints.insert(identity.clone(), endpoint);
        state.publish();

        tracing::info!(
            "Endpoint {} admitted from {} (version {})",
            identity,
            control_addr,
            state.version
        );

        Ok(handle)
    }

    /// Bind a media source address to an endpoint
    pub(crate) async fn bind_media(
        &self,
        identity: &str,
        stream: MediaStream,
        addr: SocketAddr,
    ) -> Result<BindOutcome, RegistryError> {
        let mut state = self.state.write().await;

        let endpoint = state
            .endpoints
            .get(identity)
            .filter(|e| e.is_live())
            .ok_or_else(|| RegistryError::UnknownIdentity(identity.to_string()))?;

        if endpoint.control_addr.ip() != addr.ip() {
            return Err(RegistryError::AddressMismatch {
                identity: identity.to_string(),
                addr,
            });
        }
        if endpoint.media_addr(stream) == Some(addr) {
            return Ok(BindOutcome::Unchanged);
        }

        let taken = state
            .endpoints
            .values()
            .any(|e| e.is_live() && &*e.identity != identity && e.media_addr(stream) == Some(addr));
        if taken {
            return Err(RegistryError::AddressInUse(addr));
        }

        let endpoint = state
            .endpoints
            .get_mut(identity)
            .ok_or_else(|| RegistryError::UnknownIdentity(identity.to_string()))?;

        let previous = endpoint.media_addr_mut(stream).replace(addr);
        endpoint.liveness.touch();
        let outcome = if endpoint.state == EndpointState::Pending {
            endpoint.state = EndpointState::Active;
            BindOutcome::Activated
        } else if previous.is_some() {
            BindOutcome::Rebound
        } else {
            // Active via the other stream, first bind of this one
            BindOutcome::Activated
        };

        state.publish();

        tracing::info!(
            "Endpoint {} bound {} to {} ({:?}, version {})",
            identity,
            stream,
            addr,
            outcome,
            state.version
        );

        Ok(outcome)
    }

    /// Move an endpoint to Draining and publish a snapshot without it
    ///
    /// Returns the previous state, or `None` if the identity was absent or
    /// already draining.
    pub(crate) async fn evict(&self, identity: &str) -> Option<EndpointState> {
        let mut state = self.state.write().await;

        let endpoint = state.endpoints.get_mut(identity).filter(|e| e.is_live())?;
        let previous = endpoint.state;
        endpoint.state = EndpointState::Draining;
        state.publish();

        tracing::info!(
            "Endpoint {} draining (was {:?}, version {})",
            identity,
            previous,
            state.version
        );

        Some(previous)
    }

    /// Release draining endpoints that no live snapshot references anymore
    pub(crate) async fn reap(&self) -> Vec<Identity> {
        let mut state = self.state.write().await;

        let released: Vec<Identity> = state
            .endpoints
            .values()
            .filter(|e| e.state == EndpointState::Draining && Arc::strong_count(&e.liveness) == 1)
            .map(|e| e.identity.clone())
            .collect();

        if released.is_empty() {
            return released;
        }

        for identity in &released {
            if let Some(mut endpoint) = state.endpoints.remove(identity) {
                endpoint.state = EndpointState::Removed;
                tracing::debug!("Endpoint {} removed, slot released", endpoint.identity);
            }
        }
        state.publish();

        released
    }
}
