use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AudioFormatInfo, MemberInfo};

/// Messages sent from an endpoint to the coordinator over the control channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Announce identity and ask to join the session
    Register { identity: String },

    /// Leave the session; the server closes the connection afterwards
    Leave,

    /// Ping to keep the control connection alive
    Ping,

    /// Chat text relayed to every member
    Chat { text: String },
}

/// Messages sent from the coordinator to an endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration accepted
    Registered {
        identity: String,
        server_time: DateTime<Utc>,
        video_port: u16,
        audio_port: u16,
        audio: AudioFormatInfo,
        /// Mixing period in microseconds
        tick_interval_us: u64,
    },

    /// Request rejected or protocol violation
    Error { message: String },

    /// Pong response to ping
    Pong,

    /// Current session membership
    MemberList {
        version: u64,
        members: Vec<MemberInfo>,
    },

    /// Server-generated notice ("alice joined the session")
    System { text: String },

    /// Chat text from a member
    Chat {
        from: String,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// The endpoint was removed by the server
    Evicted { reason: String },
}
