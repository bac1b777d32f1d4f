//! Control plane
//!
//! The coordinator is the only writer of the session registry. Control
//! connections speak length-prefixed JSON over TCP; membership changes fan
//! out to them through the notifier.

pub mod codec;
pub mod connection;
pub mod connections;
pub mod coordinator;
pub mod notifier;

pub use connection::handle_connection;
pub use connections::ConnectionManager;
pub use coordinator::{Coordinator, EvictReason, MembershipEvent, SweepReport};
pub use notifier::spawn_membership_notifier;
