use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default sample rate (44.1kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Default channel count (mono)
pub const DEFAULT_CHANNELS: u16 = 1;

/// Default block size in frames (samples per channel)
pub const DEFAULT_BLOCK_SAMPLES: u32 = 1024;

/// Signed 16-bit PCM
pub const BYTES_PER_SAMPLE: usize = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Invalid audio format: {0}")]
    InvalidFormat(String),

    #[error("Sample block is {actual} bytes, expected {expected}")]
    BlockSize { expected: usize, actual: usize },
}

/// PCM parameters shared by every endpoint in a session
///
/// Samples are signed 16-bit little-endian, interleaved when there is more
/// than one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_samples: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            block_samples: DEFAULT_BLOCK_SAMPLES,
        }
    }
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, block_samples: u32) -> Result<Self, MediaError> {
        let format = Self {
            sample_rate,
            channels,
            block_samples,
        };
        format.validate()?;
        Ok(format)
    }

    pub fn validate(&self) -> Result<(), MediaError> {
        if self.sample_rate == 0 {
            return Err(MediaError::InvalidFormat("sample rate must be non-zero".into()));
        }
        if self.channels == 0 {
            return Err(MediaError::InvalidFormat("channel count must be non-zero".into()));
        }
        if self.block_samples == 0 {
            return Err(MediaError::InvalidFormat("block size must be non-zero".into()));
        }
        if self.block_bytes() > u16::MAX as usize {
            return Err(MediaError::InvalidFormat(format!(
                "block of {} bytes does not fit in one datagram",
                self.block_bytes()
            )));
        }
        Ok(())
    }

    /// Number of i16 values in one block (all channels)
    pub fn samples_per_block(&self) -> usize {
        self.block_samples as usize * self.channels as usize
    }

    /// Size of one encoded block in bytes
    pub fn block_bytes(&self) -> usize {
        self.samples_per_block() * BYTES_PER_SAMPLE
    }

    /// Playback duration of one block; this is the natural mixing interval
    pub fn block_duration(&self) -> Duration {
        let nanos = self.block_samples as u64 * 1_000_000_000 / self.sample_rate as u64;
        Duration::from_nanos(nanos)
    }

    /// A block of digital silence
    pub fn silence(&self) -> Vec<i16> {
        vec![0; self.samples_per_block()]
    }

    /// Decode a little-endian PCM block, rejecting anything but the exact size
    pub fn decode_block(&self, bytes: &[u8]) -> Result<Vec<i16>, MediaError> {
        if bytes.len() != self.block_bytes() {
            return Err(MediaError::BlockSize {
                expected: self.block_bytes(),
                actual: bytes.len(),
            });
        }

        Ok(bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }
}

/// Encode PCM samples as little-endian bytes
pub fn encode_block(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format() {
        let format = AudioFormat::default();
        assert_eq!(format.samples_per_block(), 1024);
        assert_eq!(format.block_bytes(), 2048);
        // 1024 / 44100 s
        assert_eq!(format.block_duration(), Duration::from_nanos(23_219_954));
    }

    #[test]
    fn test_stereo_block_size() {
        let format = AudioFormat::new(48_000, 2, 960).unwrap();
        assert_eq!(format.samples_per_block(), 1920);
        assert_eq!(format.block_bytes(), 3840);
        assert_eq!(format.block_duration(), Duration::from_millis(20));
    }

    #[test]
    fn test_invalid_formats() {
        assert!(AudioFormat::new(0, 1, 1024).is_err());
        assert!(AudioFormat::new(44_100, 0, 1024).is_err());
        assert!(AudioFormat::new(44_100, 1, 0).is_err());
        // 2 channels * 20000 frames * 2 bytes overflows a datagram payload
        assert!(AudioFormat::new(44_100, 2, 20_000).is_err());
    }

    #[test]
    fn test_decode_block() {
        let format = AudioFormat::new(8_000, 1, 3).unwrap();
        let bytes = encode_block(&[1, -1, i16::MAX]);
        assert_eq!(bytes, vec![1, 0, 0xFF, 0xFF, 0xFF, 0x7F]);
        assert_eq!(format.decode_block(&bytes).unwrap(), vec![1, -1, i16::MAX]);
    }

    #[test]
    fn test_decode_wrong_size() {
        let format = AudioFormat::new(8_000, 1, 3).unwrap();
        assert_eq!(
            format.decode_block(&[0; 5]),
            Err(MediaError::BlockSize {
                expected: 6,
                actual: 5
            })
        );
    }
}
