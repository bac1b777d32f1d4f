//! Video relay: forward every unit to every other Active member unchanged

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use huddle_protocol::MediaPacket;
use tokio::net::UdpSocket;

use super::ingress::{RECV_BUFFER_LEN, resolve_sender};
use super::outbound::OutboundQueues;
use crate::control::Coordinator;
use crate::registry::MediaStream;
use crate::stats::{DropReason, RelayStats};

pub struct VideoRelay {
    coordinator: Arc<Coordinator>,
    socket: Arc<UdpSocket>,
    outbound: Arc<OutboundQueues>,
    stats: Arc<RelayStats>,
}

impl VideoRelay {
    pub fn new(
        coordinator: Arc<Coordinator>,
        socket: Arc<UdpSocket>,
        queue_capacity: usize,
        stats: Arc<RelayStats>,
    ) -> Self {
        let outbound = Arc::new(OutboundQueues::new(
            MediaStream::Video,
            socket.clone(),
            queue_capacity,
            coordinator.registry().clone(),
            stats.clone(),
        ));
        Self {
            coordinator,
            socket,
            outbound,
            stats,
        }
    }

    pub fn outbound(&self) -> &Arc<OutboundQueues> {
        &self.outbound
    }

    /// Route one inbound datagram; returns how many destinations it was queued for
    pub async fn handle_datagram(&self, from: SocketAddr, datagram: Bytes) -> Result<usize, DropReason> {
        self.stats.record_video_received();

        let unit = match MediaPacket::decode(&datagram) {
            Ok(MediaPacket::Video(unit)) => unit,
            Ok(other) => {
                tracing::debug!("Dropping {} datagram from {} on the video port", other.kind(), from);
                return Err(DropReason::MalformedPacket);
            }
            Err(e) => {
                tracing::debug!("Malformed video datagram from {}: {}", from, e);
                return Err(DropReason::MalformedPacket);
            }
        };

        let resolved =
            resolve_sender(&self.coordinator, MediaStream::Video, from, &unit.sender).await?;

        // The snapshot stays alive until every destination has been queued
        let mut queued = 0;
        for member in resolved.snapshot.members() {
            if member.identity == resolved.sender || member.video_addr.is_none() {
                continue;
            }
            if self.outbound.send(member, datagram.clone()).await {
                queued += 1;
            }
        }

        self.stats.record_video_forwarded(queued as u64);
        Ok(queued)
    }

    /// Ingress loop; runs until the socket fails
    pub async fn run(self: Arc<Self>) {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];

        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    // ICMP port-unreachable surfaces here on some platforms
                    tracing::debug!("Video socket receive error: {}", e);
                    continue;
                }
            };

            let datagram = Bytes::copy_from_slice(&buf[..len]);
            if let Err(reason) = self.handle_datagram(from, datagram).await {
                self.stats.record_drop(reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;
    use huddle_protocol::VideoUnit;
    use std::time::Duration;

    struct Peer {
        socket: UdpSocket,
    }

    impl Peer {
        async fn new() -> Self {
            Self {
                socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            }
        }

        fn addr(&self) -> SocketAddr {
            self.socket.local_addr().unwrap()
        }

        async fn recv(&self) -> Option<Bytes> {
            let mut buf = vec![0u8; 2048];
            match tokio::time::timeout(Duration::from_millis(300), self.socket.recv_from(&mut buf)).await {
                Ok(Ok((n, _))) => Some(Bytes::copy_from_slice(&buf[..n])),
                _ => None,
            }
        }
    }

    fn unit(sender: &str, sequence: u32) -> Bytes {
        MediaPacket::Video(VideoUnit {
            sender: sender.to_string(),
            sequence,
            fragment_index: 0,
            fragment_count: 1,
            payload: Bytes::from(vec![sequence as u8; 8]),
        })
        .encode()
        .unwrap()
    }

    async fn relay() -> VideoRelay {
        let registry = Arc::new(SessionRegistry::new(8));
        let coordinator = Arc::new(Coordinator::new(registry, Duration::from_secs(10)));
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        VideoRelay::new(coordinator, socket, 16, Arc::new(RelayStats::new()))
    }

    #[tokio::test]
    async fn test_forward_to_everyone_but_sender() {
        let relay = relay().await;
        let (a, b, c) = (Peer::new().await, Peer::new().await, Peer::new().await);

        for (name, peer) in [("alice", &a), ("bob", &b), ("carol", &c)] {
            relay.coordinator.admit(name, peer.addr()).await.unwrap();
            relay
                .coordinator
                .bind_media(name, MediaStream::Video, peer.addr())
                .await
                .unwrap();
        }

        let datagram = unit("alice", 1);
        let queued = relay.handle_datagram(a.addr(), datagram.clone()).await.unwrap();
        assert_eq!(queued, 2);

        assert_eq!(b.recv().await.unwrap(), datagram);
        assert_eq!(c.recv().await.unwrap(), datagram);
        assert!(a.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_first_unit_activates_sender() {
        let relay = relay().await;
        let (a, b) = (Peer::new().await, Peer::new().await);
        relay.coordinator.admit("alice", a.addr()).await.unwrap();
        relay.coordinator.admit("bob", b.addr()).await.unwrap();

        // Bob has not sent anything yet, so nobody receives alice's unit
        assert_eq!(relay.handle_datagram(a.addr(), unit("alice", 1)).await.unwrap(), 0);

        relay.handle_datagram(b.addr(), unit("bob", 1)).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), unit("bob", 1));
    }

    #[tokio::test]
    async fn test_rejects_wrong_kind_and_garbage() {
        let relay = relay().await;
        let from: SocketAddr = "127.0.0.1:40123".parse().unwrap();

        let garbage = Bytes::from_static(b"\x00\x01\x02");
        assert_eq!(
            relay.handle_datagram(from, garbage).await,
            Err(DropReason::MalformedPacket)
        );

        let audio = MediaPacket::Audio(huddle_protocol::AudioFrame {
            sender: "alice".into(),
            sequence: 0,
            capture_timestamp_us: 0,
            samples: Bytes::from_static(&[0, 0]),
        })
        .encode()
        .unwrap();
        assert_eq!(
            relay.handle_datagram(from, audio).await,
            Err(DropReason::MalformedPacket)
        );
    }

    #[tokio::test]
    async fn test_unadmitted_sender_dropped() {
        let relay = relay().await;
        let from: SocketAddr = "127.0.0.1:40124".parse().unwrap();
        assert_eq!(
            relay.handle_datagram(from, unit("ghost", 1)).await,
            Err(DropReason::UnknownIdentity)
        );
    }

    #[tokio::test]
    async fn test_per_sender_order_preserved() {
        let relay = relay().await;
        let (a, b) = (Peer::new().await, Peer::new().await);
        for (name, peer) in [("alice", &a), ("bob", &b)] {
            relay.coordinator.admit(name, peer.addr()).await.unwrap();
            relay
                .coordinator
                .bind_media(name, MediaStream::Video, peer.addr())
                .await
                .unwrap();
        }

        for seq in 0..10 {
            relay.handle_datagram(a.addr(), unit("alice", seq)).await.unwrap();
        }
        for seq in 0..10 {
            assert_eq!(b.recv().await.unwrap(), unit("alice", seq));
        }
    }

    #[tokio::test]
    async fn test_evicted_member_stops_receiving() {
        let relay = relay().await;
        let (a, b) = (Peer::new().await, Peer::new().await);
        for (name, peer) in [("alice", &a), ("bob", &b)] {
            relay.coordinator.admit(name, peer.addr()).await.unwrap();
            relay
                .coordinator
                .bind_media(name, MediaStream::Video, peer.addr())
                .await
                .unwrap();
        }

        relay
            .coordinator
            .evict("bob", crate::control::EvictReason::Left)
            .await;

        assert_eq!(relay.handle_datagram(a.addr(), unit("alice", 1)).await.unwrap(), 0);
        assert!(b.recv().await.is_none());

        // Bob's stale address no longer resolves to anyone
        assert!(relay.handle_datagram(b.addr(), unit("bob", 2)).await.is_err());
    }
}
