//! Control-plane coordinator
//!
//! Owns every registry mutation and tells observers about them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::registry::{
    BindOutcome, EndpointHandle, Identity, MediaStream, RegistryError, SessionRegistry,
};

/// Buffered membership events per observer before it lags
const EVENT_CAPACITY: usize = 256;

/// Why an endpoint was evicted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// Explicit `leave` on the control connection
    Left,
    /// Control connection closed or failed
    Disconnected,
    /// No media or control activity within the liveness timeout
    LivenessTimeout,
}

impl std::fmt::Display for EvictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictReason::Left => write!(f, "left the session"),
            EvictReason::Disconnected => write!(f, "connection lost"),
            EvictReason::LivenessTimeout => write!(f, "liveness timeout"),
        }
    }
}

/// Membership delta published after the registry change has committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Admitted {
        identity: Identity,
    },
    Activated {
        identity: Identity,
        stream: MediaStream,
        addr: SocketAddr,
    },
    Rebound {
        identity: Identity,
        stream: MediaStream,
        addr: SocketAddr,
    },
    Draining {
        identity: Identity,
        reason: EvictReason,
    },
    Removed {
        identity: Identity,
    },
}

/// Result of one liveness and housekeeping pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: Vec<Identity>,
    pub removed: Vec<Identity>,
}

pub struct Coordinator {
    registry: Arc<SessionRegistry>,
    events: broadcast::Sender<MembershipEvent>,
    liveness_timeout: Duration,
}

impl Coordinator {
    pub fn new(registry: Arc<SessionRegistry>, liveness_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            events,
            liveness_timeout,
        }
    }

    /// Read access for the media components
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: MembershipEvent) {
        // No receivers is fine: nobody is observing yet
        let _ = self.events.send(event);
    }

    pub async fn admit(
        &self,
        identity: &str,
        control_addr: SocketAddr,
    ) -> Result<EndpointHandle, RegistryError> {
        let handle = self.registry.admit(identity, control_addr).await?;
        self.publish(MembershipEvent::Admitted {
            identity: handle.identity.clone(),
        });
        Ok(handle)
    }

    /// Bind a media address seen on `stream` to `identity`
    pub async fn bind_media(
        &self,
        identity: &str,
        stream: MediaStream,
        addr: SocketAddr,
    ) -> Result<BindOutcome, RegistryError> {
        let outcome = self.registry.bind_media(identity, stream, addr).await?;

        let identity: Identity = Arc::from(identity);
        match outcome {
            BindOutcome::Activated => self.publish(MembershipEvent::Activated {
                identity,
                stream,
                addr,
            }),
            BindOutcome::Rebound => self.publish(MembershipEvent::Rebound {
                identity,
                stream,
                addr,
            }),
            BindOutcome::Unchanged => {}
        }

        Ok(outcome)
    }

    /// Evict an endpoint; returns false when it was not live
    pub async fn evict(&self, identity: &str, reason: EvictReason) -> bool {
        match self.registry.evict(identity).await {
            Some(_) => {
                tracing::info!("Evicted {} ({})", identity, reason);
                self.publish(MembershipEvent::Draining {
                    identity: Arc::from(identity),
                    reason,
                });
                true
            }
            None => false,
        }
    }

    /// Evict idle endpoints, then release drained ones
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for identity in self.registry.stale(self.liveness_timeout).await {
            if self.evict(&identity, EvictReason::LivenessTimeout).await {
                report.evicted.push(identity);
            }
        }

        report.removed = self.registry.reap().await;
        for identity in &report.removed {
            self.publish(MembershipEvent::Removed {
                identity: identity.clone(),
            });
        }

        report
    }

    /// Run [`Coordinator::sweep`] every `period`
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let report = coordinator.sweep().await;
                if !report.evicted.is_empty() || !report.removed.is_empty() {
                    tracing::debug!(
                        "Liveness sweep: {} evicted, {} removed",
                        report.evicted.len(),
                        report.removed.len()
                    );
                }
            }
        })
    }
}
