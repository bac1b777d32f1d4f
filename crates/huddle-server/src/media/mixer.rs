//! Audio mixer
//!
//! Ingress keeps only the most recent block per sender. Every tick the slots
//! are swapped out and each listener gets the clipped sum of everybody else.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use huddle_media::{AudioFormat, encode_block, mix_excluding};
use huddle_protocol::{MediaPacket, MixedAudio};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use super::ingress::{RECV_BUFFER_LEN, resolve_sender};
use super::outbound::OutboundQueues;
use crate::control::Coordinator;
use crate::registry::{Identity, MediaStream};
use crate::stats::{DropReason, RelayStats};

/// What one mixing tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u32,
    /// Active senders whose block went into this tick
    pub contributors: usize,
    /// Listeners a mixed block was queued for
    pub listeners: usize,
}

/// Latest unconsumed block of one sender
struct Slot {
    /// Admission number of the endpoint that sent it
    admission: u64,
    samples: Vec<i16>,
}

pub struct AudioMixer {
    coordinator: Arc<Coordinator>,
    socket: Arc<UdpSocket>,
    outbound: Arc<OutboundQueues>,
    stats: Arc<RelayStats>,
    format: AudioFormat,
    slots: Mutex<HashMap<Identity, Slot>>,
    next_tick: AtomicU32,
}

impl AudioMixer {
    pub fn new(
        coordinator: Arc<Coordinator>,
        socket: Arc<UdpSocket>,
        format: AudioFormat,
        queue_capacity: usize,
        stats: Arc<RelayStats>,
    ) -> Self {
        let outbound = Arc::new(OutboundQueues::new(
            MediaStream::Audio,
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
            format,
            slots: Mutex::new(HashMap::new()),
            next_tick: AtomicU32::new(0),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn outbound(&self) -> &Arc<OutboundQueues> {
        &self.outbound
    }

    /// Store one inbound block as its sender's latest
    pub async fn ingest(&self, from: SocketAddr, datagram: Bytes) -> Result<(), DropReason> {
        self.stats.record_audio_received();

        let frame = match MediaPacket::decode(&datagram) {
            Ok(MediaPacket::Audio(frame)) => frame,
            Ok(other) => {
                tracing::debug!("Dropping {} datagram from {} on the audio port", other.kind(), from);
                return Err(DropReason::MalformedPacket);
            }
            Err(e) => {
                tracing::debug!("Malformed audio datagram from {}: {}", from, e);
                return Err(DropReason::MalformedPacket);
            }
        };

        let resolved =
            resolve_sender(&self.coordinator, MediaStream::Audio, from, &frame.sender).await?;

        let samples = match self.format.decode_block(&frame.samples) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!("Bad audio block from {} (seq {}): {}", resolved.sender, frame.sequence, e);
                return Err(DropReason::MalformedAudioFrame);
            }
        };

        // Supersedes any block not yet consumed by a tick
        self.slots.lock().await.insert(
            resolved.sender,
            Slot {
                admission: resolved.admission,
                samples,
            },
        );
        Ok(())
    }

    /// Mix and send one block to every Active listener with an audio address
    pub async fn tick(&self) -> TickReport {
        let pending = std::mem::take(&mut *self.slots.lock().await);
        let snapshot = self.coordinator.registry().snapshot().await;

        // Blocks from endpoints that left since ingest are discarded, even
        // when the identity has been admitted again in the meantime
        let contributions: Vec<(Identity, Vec<i16>)> = pending
            .into_iter()
            .filter(|(sender, slot)| snapshot.holds(sender, slot.admission))
            .map(|(sender, slot)| (sender, slot.samples))
            .collect();

        let tick = self.next_tick.fetch_add(1, Ordering::Relaxed);
        let timestamp_us = Utc::now().timestamp_micros().max(0) as u64;
        let len = self.format.samples_per_block();
        // Nobody spoke: every listener gets the same silent block
        let silent = contributions
            .is_empty()
            .then(|| Bytes::from(encode_block(&self.format.silence())));

        let mut listeners = 0;
        for listener in snapshot.members() {
            if listener.audio_addr.is_none() {
                continue;
            }

            let samples = match &silent {
                Some(block) => block.clone(),
                None => Bytes::from(encode_block(&mix_excluding(
                    &listener.identity,
                    &contributions,
                    len,
                ))),
            };
            let packet = MediaPacket::Mixed(MixedAudio {
                tick,
                timestamp_us,
                samples,
            });

            let datagram = match packet.encode() {
                Ok(datagram) => datagram,
                Err(e) => {
                    tracing::error!("Failed to encode mix for {}: {}", listener.identity, e);
                    continue;
                }
            };

            if self.outbound.send(listener, datagram).await {
                listeners += 1;
            }
        }

        self.stats.record_mix_tick(listeners as u64);

        TickReport {
            tick,
            contributors: contributions.len(),
            listeners,
        }
    }

    /// Ingress loop; runs until cancelled
    pub async fn run_ingress(self: Arc<Self>) {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];

        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    tracing::debug!("Audio socket receive error: {}", e);
                    continue;
                }
            };

            let datagram = Bytes::copy_from_slice(&buf[..len]);
            if let Err(reason) = self.ingest(from, datagram).await {
                self.stats.record_drop(reason);
            }
        }
    }

    /// Mixing clock; runs until cancelled
    pub async fn run_ticker(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        // A late tick is skipped rather than bursting silent mixes
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!("Mixing every {:?} ({} samples per block)", period, self.format.samples_per_block());

        loop {
            interval.tick().await;
            let report = self.tick().await;
            tracing::trace!(
                "Tick {}: {} contributors, {} listeners",
                report.tick,
                report.contributors,
                report.listeners
            );
        }
    }
}
