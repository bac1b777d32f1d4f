//! Media plane: the video relay and the audio mixer
//!
//! Both only read the registry through snapshots. Unknown source addresses
//! are handed to the coordinator for binding.

pub mod ingress;
pub mod mixer;
pub mod outbound;
pub mod video;

pub use mixer::{AudioMixer, TickReport};
pub use outbound::{OutboundQueues, spawn_eviction_watch};
pub use video::VideoRelay;
