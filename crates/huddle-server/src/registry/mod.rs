//! Session registry
//!
//! Authoritative mapping of endpoint identity to addresses and lifecycle
//! state. The control-plane coordinator is the only writer; the video relay
//! and audio mixer read immutable [`Snapshot`]s.
//!
//! ```text
//!                 Arc<SessionRegistry>
//!          ┌──────────────────────────────┐
//!          │ endpoints: HashMap<Identity, │
//!          │   Endpoint { state, addrs }> │
//!          │ snapshot: Arc<Snapshot>      │
//!          └──────┬───────────────┬───────┘
//!        write    │               │  snapshot() (Arc clone)
//!   ┌─────────────┘               └────────────┐
//!   ▼                                          ▼
//! [Coordinator]                     [VideoRelay] [AudioMixer]
//! admit / bind / evict / reap        resolve + fan-out per batch
//! ```
//!
//! A draining endpoint keeps its slot until every snapshot that listed it has
//! been dropped, so an in-flight fan-out finishes at most once against it.

pub mod endpoint;
pub mod error;
pub mod snapshot;
pub mod store;

pub use endpoint::{EndpointHandle, EndpointState, Identity, MediaStream};
pub use error::RegistryError;
pub use snapshot::{Member, Snapshot};
pub use store::{BindOutcome, SessionRegistry};
