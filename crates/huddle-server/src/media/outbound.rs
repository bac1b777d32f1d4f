//! Per-destination outbound queues
//!
//! Each destination gets a private bounded queue drained by its own writer
//! task, so one slow receiver never stalls the ingress loop or the other
//! destinations.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::control::MembershipEvent;
use crate::registry::{Identity, MediaStream, Member, SessionRegistry};
use crate::stats::{DropReason, RelayStats};

struct Queue {
    addr: SocketAddr,
    tx: mpsc::Sender<Bytes>,
    writer: JoinHandle<()>,
}

impl Drop for Queue {
    fn drop(&mut self) {
        // Discards whatever is still buffered
        self.writer.abort();
    }
}

/// Outbound queues for one media stream
pub struct OutboundQueues {
    stream: MediaStream,
    socket: Arc<UdpSocket>,
    capacity: usize,
    queues: RwLock<HashMap<Identity, Queue>>,
    registry: Arc<SessionRegistry>,
    stats: Arc<RelayStats>,
}

impl OutboundQueues {
    pub fn new(
        stream: MediaStream,
        socket: Arc<UdpSocket>,
        capacity: usize,
        registry: Arc<SessionRegistry>,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            stream,
            socket,
            capacity,
            queues: RwLock::new(HashMap::new()),
            registry,
            stats,
        }
    }

    /// Queue `datagram` for `member`; false when it was dropped
    pub async fn send(&self, member: &Member, datagram: Bytes) -> bool {
        let Some(addr) = member.media_addr(self.stream) else {
            return false;
        };

        {
            let queues = self.queues.read().await;
            if let Some(queue) = queues.get(&member.identity) {
                if queue.addr == addr && !queue.tx.is_closed() {
                    return self.enqueue(&member.identity, &queue.tx, datagram);
                }
            }
        }

        // First datagram for this destination, or its address moved. The
        // registry is checked under the write lock, so a queue closed for an
        // eviction is never reopened by a fan-out holding an older snapshot.
        let mut queues = self.queues.write().await;
        let snapshot = self.registry.snapshot().await;
        let current = snapshot
            .get(&member.identity)
            .filter(|current| current.admission() == member.admission())
            .and_then(|current| current.media_addr(self.stream));
        let Some(addr) = current else {
            tracing::debug!(
                "Not opening {} queue for {}: no longer a member",
                self.stream,
                member.identity
            );
            return false;
        };
        drop(snapshot);

        let reusable = queues
            .get(&member.identity)
            .is_some_and(|queue| queue.addr == addr && !queue.tx.is_closed());
        if !reusable {
            queues.insert(member.identity.clone(), self.open(&member.identity, addr));
        }

        match queues.get(&member.identity) {
            Some(queue) => self.enqueue(&member.identity, &queue.tx, datagram),
            None => false,
        }
    }

    fn enqueue(&self, identity: &Identity, tx: &mpsc::Sender<Bytes>, datagram: Bytes) -> bool {
        match tx.try_send(datagram) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Outbound {} queue for {} full, dropping", self.stream, identity);
                self.stats.record_drop(DropReason::DroppedFanout);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn open(&self, identity: &Identity, addr: SocketAddr) -> Queue {
        let (tx, mut rx) = mpsc::channel::<Bytes>(self.capacity);
        let socket = self.socket.clone();
        let stream = self.stream;
        let identity = identity.clone();

        tracing::debug!("Opening {} queue for {} at {}", stream, identity, addr);

        let writer = tokio::spawn(async move {
            while let Some(datagram) = rx.recv().await {
                if let Err(e) = socket.send_to(&datagram, addr).await {
                    tracing::warn!("Failed to send {} to {} ({}): {}", stream, identity, addr, e);
                }
            }
        });

        Queue { addr, tx, writer }
    }

    /// Drop the queue for `identity` together with anything still buffered
    pub async fn close(&self, identity: &str) -> bool {
        let removed = self.queues.write().await.remove(identity);
        if removed.is_some() {
            tracing::debug!("Closed {} queue for {}", self.stream, identity);
        }
        removed.is_some()
    }

    /// Keep only queues whose identity passes `keep`
    pub async fn retain(&self, keep: impl Fn(&str) -> bool) {
        self.queues.write().await.retain(|identity, _| keep(&**identity));
    }

    pub async fn len(&self) -> usize {
        self.queues.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queues.read().await.is_empty()
    }
}

/// Close queues of evicted endpoints as soon as they start draining, and
/// again once they are removed
pub fn spawn_eviction_watch(
    mut events: broadcast::Receiver<MembershipEvent>,
    pools: Vec<Arc<OutboundQueues>>,
    registry: Arc<SessionRegistry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(MembershipEvent::Draining { identity, .. })
                | Ok(MembershipEvent::Removed { identity }) => {
                    for pool in &pools {
                        pool.close(&identity).await;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Eviction watch lagged by {} events, resyncing", skipped);
                    let snapshot = registry.snapshot().await;
                    for pool in &pools {
                        pool.retain(|identity| snapshot.contains(identity)).await;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{Coordinator, EvictReason};
    use std::time::Duration;

    async fn member(registry: &SessionRegistry, identity: &str, addr: SocketAddr) -> Member {
        registry.admit(identity, addr).await.unwrap();
        registry
            .bind_media(identity, MediaStream::Video, addr)
            .await
            .unwrap();
        registry.snapshot().await.get(identity).unwrap().clone()
    }

    async fn pool(
        stream: MediaStream,
        capacity: usize,
        registry: Arc<SessionRegistry>,
        stats: Arc<RelayStats>,
    ) -> OutboundQueues {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        OutboundQueues::new(stream, socket, capacity, registry, stats)
    }

    async fn wait_for_len(pool: &OutboundQueues, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while pool.len().await != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_datagrams_reach_destination_in_order() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let registry = Arc::new(SessionRegistry::new(4));
        let pool = pool(MediaStream::Video, 16, registry.clone(), Arc::new(RelayStats::new())).await;

        let bob = member(&registry, "bob", receiver.local_addr().unwrap()).await;

        for i in 0..5u8 {
            assert!(pool.send(&bob, Bytes::from(vec![i])).await);
        }

        let mut buf = [0u8; 16];
        for i in 0..5u8 {
            let (n, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&buf[..n], &[i]);
        }
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_full_queue_counts_drop() {
        let registry = Arc::new(SessionRegistry::new(4));
        let stats = Arc::new(RelayStats::new());
        let pool = pool(MediaStream::Video, 1, registry.clone(), stats.clone()).await;

        let bob = member(&registry, "bob", "127.0.0.1:40999".parse().unwrap()).await;

        // The writer task has not run yet on the current-thread runtime,
        // so the second datagram finds the single slot occupied
        assert!(pool.send(&bob, Bytes::from_static(b"one")).await);
        assert!(!pool.send(&bob, Bytes::from_static(b"two")).await);
        assert_eq!(stats.snapshot().dropped_fanout, 1);
    }

    #[tokio::test]
    async fn test_member_without_stream_address_is_skipped() {
        let registry = Arc::new(SessionRegistry::new(4));
        let pool = pool(MediaStream::Audio, 4, registry.clone(), Arc::new(RelayStats::new())).await;

        let video_only = member(&registry, "carol", "127.0.0.1:41000".parse().unwrap()).await;

        assert!(!pool.send(&video_only, Bytes::from_static(b"x")).await);
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_drops_queue() {
        let registry = Arc::new(SessionRegistry::new(4));
        let pool = pool(MediaStream::Video, 4, registry.clone(), Arc::new(RelayStats::new())).await;

        let bob = member(&registry, "bob", "127.0.0.1:41001".parse().unwrap()).await;
        pool.send(&bob, Bytes::from_static(b"x")).await;

        assert!(pool.close("bob").await);
        assert!(!pool.close("bob").await);
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_stale_member_does_not_reopen_queue() {
        let registry = Arc::new(SessionRegistry::new(4));
        let coordinator = Arc::new(Coordinator::new(registry.clone(), Duration::from_secs(10)));
        let pool = Arc::new(
            pool(MediaStream::Video, 4, registry.clone(), Arc::new(RelayStats::new())).await,
        );
        let watch = spawn_eviction_watch(coordinator.subscribe(), vec![pool.clone()], registry.clone());

        let addr: SocketAddr = "127.0.0.1:41002".parse().unwrap();
        coordinator.admit("bob", addr).await.unwrap();
        coordinator
            .bind_media("bob", MediaStream::Video, addr)
            .await
            .unwrap();
        // Held the way an in-flight fan-out holds its snapshot member
        let bob = registry.snapshot().await.get("bob").unwrap().clone();
        assert!(pool.send(&bob, Bytes::from_static(b"live")).await);
        assert_eq!(pool.len().await, 1);

        coordinator.evict("bob", EvictReason::Left).await;
        wait_for_len(&pool, 0).await;

        // The one late send after eviction is refused instead of reopening
        assert!(!pool.send(&bob, Bytes::from_static(b"late")).await);
        assert_eq!(pool.len().await, 0);

        drop(bob);
        let report = coordinator.sweep().await;
        assert_eq!(report.removed.len(), 1);
        assert_eq!(pool.len().await, 0);

        watch.abort();
    }

    #[tokio::test]
    async fn test_removed_event_closes_queue() {
        let registry = Arc::new(SessionRegistry::new(4));
        let pool = Arc::new(
            pool(MediaStream::Video, 4, registry.clone(), Arc::new(RelayStats::new())).await,
        );
        let (events, rx) = broadcast::channel(8);
        let watch = spawn_eviction_watch(rx, vec![pool.clone()], registry.clone());

        let bob = member(&registry, "bob", "127.0.0.1:41003".parse().unwrap()).await;
        assert!(pool.send(&bob, Bytes::from_static(b"x")).await);

        events
            .send(MembershipEvent::Removed {
                identity: bob.identity.clone(),
            })
            .unwrap();
        wait_for_len(&pool, 0).await;

        watch.abort();
    }

    #[tokio::test]
    async fn test_readmitted_identity_gets_fresh_queue() {
        let registry = Arc::new(SessionRegistry::new(4));
        let pool = pool(MediaStream::Video, 4, registry.clone(), Arc::new(RelayStats::new())).await;

        let addr: SocketAddr = "127.0.0.1:41004".parse().unwrap();
        let stale = member(&registry, "bob", addr).await;
        registry.evict("bob").await;
        // Still referenced by the stale member
        assert!(registry.reap().await.is_empty());

        assert!(!pool.send(&stale, Bytes::from_static(b"x")).await);
        assert!(pool.is_empty().await);
        drop(stale);
        assert_eq!(registry.reap().await.len(), 1);

        let bob = member(&registry, "bob", addr).await;
        assert!(pool.send(&bob, Bytes::from_static(b"y")).await);
        assert_eq!(pool.len().await, 1);
    }
}
