//! Audio processing for the Huddle relay
//!
//! This crate provides:
//! - PCM block formats agreed between endpoints and the relay
//! - The clip-mixing kernel used to build per-listener mixes

pub mod audio;
pub mod mix;

pub use audio::*;
pub use mix::{mix_clipped, mix_excluding};
