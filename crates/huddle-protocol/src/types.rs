use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One session member as reported to control connections
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberInfo {
    pub identity: String,
    pub state: MemberState,
    pub joined_at: DateTime<Utc>,
}

/// Lifecycle state of a member visible on the control plane
///
/// `Removed` never appears in a member list; it is only carried in
/// notifications about an endpoint that just left.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemberState {
    Pending,
    Active,
    Draining,
    Removed,
}

impl std::fmt::Display for MemberState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MemberState::Pending => "pending",
            MemberState::Active => "active",
            MemberState::Draining => "draining",
            MemberState::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// PCM parameters agreed out-of-band, announced at registration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioFormatInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_samples: u32,
}
