//! Huddle relay server library
//!
//! This module exposes the relay components for testing and embedding.

pub mod config;
pub mod control;
pub mod error;
pub mod media;
pub mod registry;
pub mod server;
pub mod state;
pub mod stats;

pub use config::Config;
pub use error::{Result, ServerError};
pub use server::HuddleServer;
