//! Immutable, versioned membership views handed to the media path

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use super::endpoint::{Endpoint, EndpointState, Identity, Liveness, MediaStream};

/// An Active endpoint as seen by one snapshot
#[derive(Debug, Clone)]
pub struct Member {
    pub identity: Identity,
    pub video_addr: Option<SocketAddr>,
    pub audio_addr: Option<SocketAddr>,
    admission: u64,
    liveness: Arc<Liveness>,
}

impl Member {
    pub fn media_addr(&self, stream: MediaStream) -> Option<SocketAddr> {
        match stream {
            MediaStream::Video => self.video_addr,
            MediaStream::Audio => self.audio_addr,
        }
    }

    /// Admission number, unique per admitted endpoint
    ///
    /// Tells a re-admitted identity apart from the endpoint it replaced.
    pub fn admission(&self) -> u64 {
        self.admission
    }

    /// Record a received media datagram for liveness
    pub fn touch(&self) {
        self.liveness.touch();
    }
}

/// Membership at one registry version
///
/// Media components take one snapshot per outbound batch and route only to
/// its members, so a batch never mixes two membership versions.
#[derive(Debug, Default)]
pub struct Snapshot {
    version: u64,
    members: Vec<Member>,
    video_index: HashMap<SocketAddr, usize>,
    audio_index: HashMap<SocketAddr, usize>,
}

impl Snapshot {
    pub(super) fn build<'a>(version: u64, endpoints: impl Iterator<Item = &'a Endpoint>) -> Self {
        let mut active: Vec<&Endpoint> = endpoints
            .filter(|e| e.state == EndpointState::Active)
            .collect();
        active.sort_by_key(|e| e.order);

        let mut snapshot = Snapshot {
            version,
            members: Vec::with_capacity(active.len()),
            video_index: HashMap::new(),
            audio_index: HashMap::new(),
        };

        for (idx, endpoint) in active.into_iter().enumerate() {
            if let Some(addr) = endpoint.video_addr {
                snapshot.video_index.insert(addr, idx);
            }
            if let Some(addr) = endpoint.audio_addr {
                snapshot.audio_index.insert(addr, idx);
            }
            snapshot.members.push(Member {
                identity: endpoint.identity.clone(),
                video_addr: endpoint.video_addr,
                audio_addr: endpoint.audio_addr,
                admission: endpoint.order,
                liveness: endpoint.liveness.clone(),
            });
        }

        snapshot
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Active members in admission order
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Find the member whose bound address for `stream` is `addr`
    pub fn resolve(&self, stream: MediaStream, addr: SocketAddr) -> Option<&Member> {
        let index = match stream {
            MediaStream::Video => &self.video_index,
            MediaStream::Audio => &self.audio_index,
        };
        index.get(&addr).map(|&idx| &self.members[idx])
    }

    pub fn get(&self, identity: &str) -> Option<&Member> {
        self.members.iter().find(|m| &*m.identity == identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.get(identity).is_some()
    }

    /// Whether the endpoint admitted as `admission` is still a member
    pub fn holds(&self, identity: &str, admission: u64) -> bool {
        self.get(identity).is_some_and(|m| m.admission == admission)
    }
}
