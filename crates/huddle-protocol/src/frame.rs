//! Control channel framing
//!
//! Every control message is a JSON document prefixed with its length as a
//! 4-byte big-endian unsigned integer.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Size of the length prefix
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest accepted frame body (10 MiB)
pub const MAX_CONTROL_FRAME_LEN: usize = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Declared frame length {0} exceeds the control frame limit")]
    TooLarge(usize),

    #[error("Connection closed mid-frame")]
    Truncated,

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialize a message into a complete length-prefixed frame
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, FrameError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_CONTROL_FRAME_LEN {
        return Err(FrameError::TooLarge(body.len()));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Validate a decoded length prefix
pub fn body_len(header: [u8; FRAME_HEADER_LEN]) -> Result<usize, FrameError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_CONTROL_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    Ok(len)
}

/// Parse a frame body
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, FrameError> {
    Ok(serde_json::from_slice(body)?)
}
