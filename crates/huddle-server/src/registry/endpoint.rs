//! Endpoint state stored in the registry

use chrono::{DateTime, Utc};
use huddle_protocol::MemberState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Identity of an endpoint, cheap to clone into snapshots and events
pub type Identity = Arc<str>;

/// Shortest accepted identity
pub const MIN_IDENTITY_LEN: usize = 3;

/// Longest accepted identity
pub const MAX_IDENTITY_LEN: usize = 20;

/// Lifecycle state of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Admitted on the control channel, no media bound yet
    Pending,
    /// At least one media stream bound; visible in snapshots
    Active,
    /// Evicted; invisible to media, slot still held until housekeeping
    Draining,
    /// Terminal; slot released
    Removed,
}

impl From<EndpointState> for MemberState {
    fn from(state: EndpointState) -> Self {
        match state {
            EndpointState::Pending => MemberState::Pending,
            EndpointState::Active => MemberState::Active,
            EndpointState::Draining => MemberState::Draining,
            EndpointState::Removed => MemberState::Removed,
        }
    }
}

/// The two media streams an endpoint can bind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaStream {
    Video,
    Audio,
}

impl std::fmt::Display for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaStream::Video => write!(f, "video"),
            MediaStream::Audio => write!(f, "audio"),
        }
    }
}

/// Last-seen tracking shared between an endpoint and the snapshots that list it
///
/// Media ingress updates it without taking the registry lock. The registry
/// also uses the strong count of this `Arc` to know when no snapshot still
/// references a draining endpoint.
#[derive(Debug)]
pub struct Liveness {
    origin: Instant,
    last_seen_ms: AtomicU64,
}

impl Liveness {
    pub(crate) fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    /// Record activity now
    pub fn touch(&self) {
        let ms = self.origin.elapsed().as_millis() as u64;
        self.last_seen_ms.fetch_max(ms, Ordering::Relaxed);
    }

    /// Time since the last recorded activity (or since admission)
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

/// Entry for a single endpoint in the registry
#[derive(Debug)]
pub struct Endpoint {
    pub identity: Identity,
    pub control_addr: SocketAddr,
    pub video_addr: Option<SocketAddr>,
    pub audio_addr: Option<SocketAddr>,
    pub state: EndpointState,
    pub joined_at: DateTime<Utc>,
    /// Admission order, used to keep snapshots stably ordered
    pub(crate) order: u64,
    pub(crate) liveness: Arc<Liveness>,
}

impl Endpoint {
    pub(crate) fn new(identity: Identity, control_addr: SocketAddr, order: u64) -> Self {
        Self {
            identity,
            control_addr,
            video_addr: None,
            audio_addr: None,
            state: EndpointState::Pending,
            joined_at: Utc::now(),
            order,
            liveness: Arc::new(Liveness::new()),
        }
    }

    pub fn media_addr(&self, stream: MediaStream) -> Option<SocketAddr> {
        match stream {
            MediaStream::Video => self.video_addr,
            MediaStream::Audio => self.audio_addr,
        }
    }

    pub(crate) fn media_addr_mut(&mut self, stream: MediaStream) -> &mut Option<SocketAddr> {
        match stream {
            MediaStream::Video => &mut self.video_addr,
            MediaStream::Audio => &mut self.audio_addr,
        }
    }

    /// Whether the endpoint still counts as a session member
    pub fn is_live(&self) -> bool {
        matches!(self.state, EndpointState::Pending | EndpointState::Active)
    }
}

/// Returned to the control plane on successful admission
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    pub identity: Identity,
    pub control_addr: SocketAddr,
    pub joined_at: DateTime<Utc>,
}

/// Check an identity against the naming rules
pub fn is_valid_identity(identity: &str) -> bool {
    (MIN_IDENTITY_LEN..=MAX_IDENTITY_LEN).contains(&identity.len())
        && identity
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
