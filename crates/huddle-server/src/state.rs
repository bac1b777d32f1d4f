use crate::control::{ConnectionManager, Coordinator};
use chrono::Utc;
use huddle_media::AudioFormat;
use huddle_protocol::{AudioFormatInfo, ServerMessage};
use std::sync::Arc;
use std::time::Duration;

/// Session parameters announced to every endpoint at registration
#[derive(Debug, Clone, Copy)]
pub struct SessionInfo {
    pub video_port: u16,
    pub audio_port: u16,
    pub audio: AudioFormat,
    pub tick_interval: Duration,
}

impl SessionInfo {
    pub fn registered(&self, identity: &str) -> ServerMessage {
        ServerMessage::Registered {
            identity: identity.to_string(),
            server_time: Utc::now(),
            video_port: self.video_port,
            audio_port: self.audio_port,
            audio: AudioFormatInfo {
                sample_rate: self.audio.sample_rate,
                channels: self.audio.channels,
                block_samples: self.audio.block_samples,
            },
            tick_interval_us: self.tick_interval.as_micros() as u64,
        }
    }
}

/// State shared by every control connection
#[derive(Clone)]
pub struct ServerState {
    pub coordinator: Arc<Coordinator>,
    pub connections: Arc<ConnectionManager>,
    pub session: SessionInfo,
}

impl ServerState {
    pub fn new(coordinator: Arc<Coordinator>, session: SessionInfo) -> Self {
        Self {
            coordinator,
            connections: Arc::new(ConnectionManager::new()),
            session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_reports_tick_in_micros() {
        let audio = AudioFormat::default();
        let session = SessionInfo {
            video_port: 5001,
            audio_port: 5002,
            audio,
            tick_interval: audio.block_duration(),
        };

        match session.registered("alice") {
            ServerMessage::Registered {
                identity,
                tick_interval_us,
                audio,
                ..
            } => {
                assert_eq!(identity, "alice");
                // 1024 samples at 44.1 kHz is 23.219 ms
                assert_eq!(tick_interval_us, 23_219);
                assert_eq!(audio.block_samples, 1024);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
