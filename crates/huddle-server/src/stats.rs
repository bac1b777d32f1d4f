//! Relay counters
//!
//! Per-packet failures never stop the relay; they are counted here and
//! reported periodically.

use std::sync::atomic::{AtomicU64, Ordering};

/// Why an inbound or outbound datagram was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Source address is not bound to the claimed sender
    UnresolvedSender,
    /// Media arrived for an identity that was never admitted
    UnknownIdentity,
    /// Undecodable header or wrong media kind for the port
    MalformedPacket,
    /// Audio block of the wrong size
    MalformedAudioFrame,
    /// Destination queue was full
    DroppedFanout,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DropReason::UnresolvedSender => "unresolved sender",
            DropReason::UnknownIdentity => "unknown identity",
            DropReason::MalformedPacket => "malformed packet",
            DropReason::MalformedAudioFrame => "malformed audio frame",
            DropReason::DroppedFanout => "fan-out queue full",
        };
        f.write_str(s)
    }
}

/// Server-wide counters, updated lock-free from every worker
#[derive(Debug, Default)]
pub struct RelayStats {
    video_received: AtomicU64,
    video_forwarded: AtomicU64,
    audio_received: AtomicU64,
    mix_ticks: AtomicU64,
    mixes_sent: AtomicU64,
    unresolved_sender: AtomicU64,
    unknown_identity: AtomicU64,
    malformed_packet: AtomicU64,
    malformed_audio_frame: AtomicU64,
    dropped_fanout: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub video_received: u64,
    pub video_forwarded: u64,
    pub audio_received: u64,
    pub mix_ticks: u64,
    pub mixes_sent: u64,
    pub unresolved_sender: u64,
    pub unknown_identity: u64,
    pub malformed_packet: u64,
    pub malformed_audio_frame: u64,
    pub dropped_fanout: u64,
}

impl StatsSnapshot {
    pub fn total_dropped(&self) -> u64 {
        self.unresolved_sender
            + self.unknown_identity
            + self.malformed_packet
            + self.malformed_audio_frame
            + self.dropped_fanout
    }
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::UnresolvedSender => &self.unresolved_sender,
            DropReason::UnknownIdentity => &self.unknown_identity,
            DropReason::MalformedPacket => &self.malformed_packet,
            DropReason::MalformedAudioFrame => &self.malformed_audio_frame,
            DropReason::DroppedFanout => &self.dropped_fanout,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_video_received(&self) {
        self.video_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_video_forwarded(&self, destinations: u64) {
        self.video_forwarded.fetch_add(destinations, Ordering::Relaxed);
    }

    pub fn record_audio_received(&self) {
        self.audio_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mix_tick(&self, listeners: u64) {
        self.mix_ticks.fetch_add(1, Ordering::Relaxed);
        self.mixes_sent.fetch_add(listeners, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            video_received: self.video_received.load(Ordering::Relaxed),
            video_forwarded: self.video_forwarded.load(Ordering::Relaxed),
            audio_received: self.audio_received.load(Ordering::Relaxed),
            mix_ticks: self.mix_ticks.load(Ordering::Relaxed),
            mixes_sent: self.mixes_sent.load(Ordering::Relaxed),
            unresolved_sender: self.unresolved_sender.load(Ordering::Relaxed),
            unknown_identity: self.unknown_identity.load(Ordering::Relaxed),
            malformed_packet: self.malformed_packet.load(Ordering::Relaxed),
            malformed_audio_frame: self.malformed_audio_frame.load(Ordering::Relaxed),
            dropped_fanout: self.dropped_fanout.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stats_are_zero() {
        let stats = RelayStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_drops_are_counted_by_reason() {
        let stats = RelayStats::new();
        stats.record_drop(DropReason::DroppedFanout);
        stats.record_drop(DropReason::DroppedFanout);
        stats.record_drop(DropReason::MalformedAudioFrame);

        let snap = stats.snapshot();
        assert_eq!(snap.dropped_fanout, 2);
        assert_eq!(snap.malformed_audio_frame, 1);
        assert_eq!(snap.unresolved_sender, 0);
        assert_eq!(snap.total_dropped(), 3);
    }

    #[test]
    fn test_mix_tick_counts_listeners() {
        let stats = RelayStats::new();
        stats.record_mix_tick(3);
        stats.record_mix_tick(2);

        let snap = stats.snapshot();
        assert_eq!(snap.mix_ticks, 2);
        assert_eq!(snap.mixes_sent, 5);
    }
}
