//! Wire definitions shared by the Huddle relay and its endpoints
//!
//! - [`media`]: UDP datagram framing for video, audio and mixed audio
//! - [`control`]: JSON messages exchanged on the reliable control channel
//! - [`frame`]: length-prefix framing of control messages

pub mod control;
pub mod frame;
pub mod media;
pub mod types;

pub use control::{ClientMessage, ServerMessage};
pub use frame::FrameError;
pub use media::{AudioFrame, MediaKind, MediaPacket, MixedAudio, VideoUnit, WireError};
pub use types::{AudioFormatInfo, MemberInfo, MemberState};
