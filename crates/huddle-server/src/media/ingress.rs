//! Sender resolution shared by the video and audio ingress loops

use std::net::SocketAddr;
use std::sync::Arc;

use crate::control::Coordinator;
use crate::registry::{Identity, MediaStream, RegistryError, Snapshot};
use crate::stats::DropReason;

/// Largest datagram either ingress loop accepts
pub const RECV_BUFFER_LEN: usize = huddle_protocol::media::MAX_DATAGRAM_LEN;

/// A datagram attributed to an Active member
pub struct Resolved {
    /// Snapshot the sender was found in; fan-out routes to its members only
    pub snapshot: Arc<Snapshot>,
    pub sender: Identity,
    /// Admission number of the sender in that snapshot
    pub admission: u64,
}

/// Attribute a datagram from `from` that claims to come from `claimed`
///
/// Looks the address up in the current snapshot first. An unknown address
/// asks the coordinator to bind it, which also activates a Pending endpoint.
/// Updates the sender's last-seen on success.
pub async fn resolve_sender(
    coordinator: &Coordinator,
    stream: MediaStream,
    from: SocketAddr,
    claimed: &str,
) -> Result<Resolved, DropReason> {
    let registry = coordinator.registry();

    let snapshot = registry.snapshot().await;
    if let Some(member) = snapshot.resolve(stream, from) {
        if &*member.identity != claimed {
            tracing::debug!(
                "{} datagram from {} claims {} but is bound to {}",
                stream,
                from,
                claimed,
                member.identity
            );
            return Err(DropReason::UnresolvedSender);
        }
        member.touch();
        let sender = member.identity.clone();
        let admission = member.admission();
        return Ok(Resolved {
            snapshot,
            sender,
            admission,
        });
    }
    drop(snapshot);

    match coordinator.bind_media(claimed, stream, from).await {
        Ok(_) => {}
        Err(RegistryError::UnknownIdentity(_)) => {
            tracing::debug!("{} datagram from {} for unknown identity {}", stream, from, claimed);
            return Err(DropReason::UnknownIdentity);
        }
        Err(e) => {
            tracing::debug!("Rejected {} bind from {}: {}", stream, from, e);
            return Err(DropReason::UnresolvedSender);
        }
    }

    // The bind published a new snapshot; an eviction may already have
    // superseded it, in which case the datagram is dropped
    let snapshot = registry.snapshot().await;
    let (sender, admission) = match snapshot.resolve(stream, from) {
        Some(member) if &*member.identity == claimed => {
            member.touch();
            (member.identity.clone(), member.admission())
        }
        _ => return Err(DropReason::UnresolvedSender),
    };

    Ok(Resolved {
        snapshot,
        sender,
        admission,
    })
}
