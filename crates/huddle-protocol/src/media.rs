//! Media datagram framing
//!
//! Every UDP datagram starts with a small self-describing header so the relay
//! can route it without looking at codec payload. All integers are big-endian.
//!
//! ```text
//! u8  magic (0x48)
//! u8  kind  (1 = video, 2 = audio, 3 = mixed audio)
//!
//! video / audio:
//!   u8  sender id length, sender id (UTF-8)
//!   u32 sequence
//!   video: u16 fragment index, u16 fragment count
//!   audio: u64 capture timestamp (microseconds)
//! mixed audio:
//!   u32 tick sequence
//!   u64 tick timestamp (microseconds)
//!
//! u16 payload length, payload
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// First byte of every media datagram
pub const MAGIC: u8 = 0x48;

/// Longest sender id that fits in a media header
pub const MAX_SENDER_ID_LEN: usize = 32;

/// Largest payload expressible by the 16-bit length field
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Receive buffer size large enough for any UDP datagram
pub const MAX_DATAGRAM_LEN: usize = 65_536;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Datagram truncated: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("Bad magic byte {0:#04x}")]
    BadMagic(u8),

    #[error("Unknown media kind {0}")]
    UnknownKind(u8),

    #[error("Sender id must be 1 to 32 bytes of UTF-8")]
    InvalidSenderId,

    #[error("Payload of {0} bytes does not fit in a datagram")]
    PayloadTooLarge(usize),

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

/// Media stream a datagram belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
    Mixed,
}

impl MediaKind {
    fn to_byte(self) -> u8 {
        match self {
            MediaKind::Video => 1,
            MediaKind::Audio => 2,
            MediaKind::Mixed => 3,
        }
    }

    fn from_byte(b: u8) -> Result<Self, WireError> {
        match b {
            1 => Ok(MediaKind::Video),
            2 => Ok(MediaKind::Audio),
            3 => Ok(MediaKind::Mixed),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Mixed => write!(f, "mixed"),
        }
    }
}

/// One fragment of an encoded video frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoUnit {
    pub sender: String,
    pub sequence: u32,
    pub fragment_index: u16,
    pub fragment_count: u16,
    pub payload: Bytes,
}

/// One block of PCM audio captured by an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub sender: String,
    pub sequence: u32,
    pub capture_timestamp_us: u64,
    pub samples: Bytes,
}

/// One mixed block sent by the server to a listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixedAudio {
    pub tick: u32,
    pub timestamp_us: u64,
    pub samples: Bytes,
}

/// A decoded media datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaPacket {
    Video(VideoUnit),
    Audio(AudioFrame),
    Mixed(MixedAudio),
}

impl MediaPacket {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaPacket::Video(_) => MediaKind::Video,
            MediaPacket::Audio(_) => MediaKind::Audio,
            MediaPacket::Mixed(_) => MediaKind::Mixed,
        }
    }

    /// Sender identity carried in the header (mixed audio has none)
    pub fn sender(&self) -> Option<&str> {
        match self {
            MediaPacket::Video(v) => Some(&v.sender),
            MediaPacket::Audio(a) => Some(&a.sender),
            MediaPacket::Mixed(_) => None,
        }
    }

    /// Encode into a single datagram
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let payload = match self {
            MediaPacket::Video(v) => &v.payload,
            MediaPacket::Audio(a) => &a.samples,
            MediaPacket::Mixed(m) => &m.samples,
        };
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(WireError::PayloadTooLarge(payload.len()));
        }

        let mut buf = BytesMut::with_capacity(2 + 1 + MAX_SENDER_ID_LEN + 14 + 2 + payload.len());
        buf.put_u8(MAGIC);
        buf.put_u8(self.kind().to_byte());

        match self {
            MediaPacket::Video(v) => {
                put_sender(&mut buf, &v.sender)?;
                buf.put_u32(v.sequence);
                buf.put_u16(v.fragment_index);
                buf.put_u16(v.fragment_count);
            }
            MediaPacket::Audio(a) => {
                put_sender(&mut buf, &a.sender)?;
                buf.put_u32(a.sequence);
                buf.put_u64(a.capture_timestamp_us);
            }
            MediaPacket::Mixed(m) => {
                buf.put_u32(m.tick);
                buf.put_u64(m.timestamp_us);
            }
        }

        buf.put_u16(payload.len() as u16);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// Decode a datagram; the payload is a zero-copy slice of `datagram`
    pub fn decode(datagram: &Bytes) -> Result<Self, WireError> {
        let mut cur = &datagram[..];

        need(cur, 2)?;
        let magic = cur.get_u8();
        if magic != MAGIC {
            return Err(WireError::BadMagic(magic));
        }
        let kind = MediaKind::from_byte(cur.get_u8())?;

        let packet = match kind {
            MediaKind::Video => {
                let sender = take_sender(&mut cur)?;
                need(cur, 8)?;
                let sequence = cur.get_u32();
                let fragment_index = cur.get_u16();
                let fragment_count = cur.get_u16();
                let payload = take_payload(datagram, &mut cur)?;
                MediaPacket::Video(VideoUnit {
                    sender,
                    sequence,
                    fragment_index,
                    fragment_count,
                    payload,
                })
            }
            MediaKind::Audio => {
                let sender = take_sender(&mut cur)?;
                need(cur, 12)?;
                let sequence = cur.get_u32();
                let capture_timestamp_us = cur.get_u64();
                let samples = take_payload(datagram, &mut cur)?;
                MediaPacket::Audio(AudioFrame {
                    sender,
                    sequence,
                    capture_timestamp_us,
                    samples,
                })
            }
            MediaKind::Mixed => {
                need(cur, 12)?;
                let tick = cur.get_u32();
                let timestamp_us = cur.get_u64();
                let samples = take_payload(datagram, &mut cur)?;
                MediaPacket::Mixed(MixedAudio {
                    tick,
                    timestamp_us,
                    samples,
                })
            }
        };

        Ok(packet)
    }
}

fn need(cur: &[u8], n: usize) -> Result<(), WireError> {
    if cur.len() < n {
        return Err(WireError::Truncated {
            needed: n - cur.len(),
        });
    }
    Ok(())
}

fn put_sender(buf: &mut BytesMut, sender: &str) -> Result<(), WireError> {
    if sender.is_empty() || sender.len() > MAX_SENDER_ID_LEN {
        return Err(WireError::InvalidSenderId);
    }
    buf.put_u8(sender.len() as u8);
    buf.put_slice(sender.as_bytes());
    Ok(())
}

fn take_sender(cur: &mut &[u8]) -> Result<String, WireError> {
    need(cur, 1)?;
    let len = cur.get_u8() as usize;
    if len == 0 || len > MAX_SENDER_ID_LEN {
        return Err(WireError::InvalidSenderId);
    }
    need(cur, len)?;
    let sender = std::str::from_utf8(&cur[..len])
        .map_err(|_| WireError::InvalidSenderId)?
        .to_string();
    cur.advance(len);
    Ok(sender)
}

fn take_payload(datagram: &Bytes, cur: &mut &[u8]) -> Result<Bytes, WireError> {
    need(cur, 2)?;
    let len = cur.get_u16() as usize;
    need(cur, len)?;
    if cur.len() > len {
        return Err(WireError::TrailingBytes(cur.len() - len));
    }
    let start = datagram.len() - cur.len();
    cur.advance(len);
    Ok(datagram.slice(start..start + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(sender: &str, sequence: u32, payload: &'static [u8]) -> MediaPacket {
        MediaPacket::Video(VideoUnit {
            sender: sender.to_string(),
            sequence,
            fragment_index: 1,
            fragment_count: 3,
            payload: Bytes::from_static(payload),
        })
    }

    #[test]
    fn test_video_header_layout() {
        let bytes = video("ann", 7, &[0xAA, 0xBB]).encode().unwrap();

        assert_eq!(bytes[0], MAGIC);
        assert_eq!(bytes[1], 1);
        assert_eq!(bytes[2], 3);
        assert_eq!(&bytes[3..6], b"ann");
        assert_eq!(&bytes[6..10], &7u32.to_be_bytes());
        assert_eq!(&bytes[10..12], &1u16.to_be_bytes());
        assert_eq!(&bytes[12..14], &3u16.to_be_bytes());
        assert_eq!(&bytes[14..16], &2u16.to_be_bytes());
        assert_eq!(&bytes[16..], &[0xAA, 0xBB]);

        assert_eq!(MediaPacket::decode(&bytes).unwrap(), video("ann", 7, &[0xAA, 0xBB]));
    }

    #[test]
    fn test_audio_carries_capture_timestamp() {
        let frame = MediaPacket::Audio(AudioFrame {
            sender: "bob".to_string(),
            sequence: u32::MAX,
            capture_timestamp_us: 1_700_000_000_000_000,
            samples: Bytes::from_static(&[1, 0, 2, 0]),
        });
        let decoded = MediaPacket::decode(&frame.encode().unwrap()).unwrap();

        match decoded {
            MediaPacket::Audio(a) => {
                assert_eq!(a.sequence, u32::MAX);
                assert_eq!(a.capture_timestamp_us, 1_700_000_000_000_000);
                assert_eq!(&a.samples[..], &[1, 0, 2, 0]);
            }
            other => panic!("expected audio, got {:?}", other),
        }
    }

    #[test]
    fn test_mixed_has_no_sender() {
        let mixed = MediaPacket::Mixed(MixedAudio {
            tick: 42,
            timestamp_us: 5,
            samples: Bytes::new(),
        });
        let decoded = MediaPacket::decode(&mixed.encode().unwrap()).unwrap();
        assert_eq!(decoded.kind(), MediaKind::Mixed);
        assert_eq!(decoded.sender(), None);
    }

    #[test]
    fn test_truncated_datagrams() {
        let bytes = video("ann", 1, &[1, 2, 3, 4]).encode().unwrap();
        for cut in 0..bytes.len() {
            let short = bytes.slice(..cut);
            assert!(
                matches!(MediaPacket::decode(&short), Err(WireError::Truncated { .. })),
                "cut at {} should be truncated",
                cut
            );
        }
    }

    #[test]
    fn test_rejects_bad_headers() {
        assert_eq!(
            MediaPacket::decode(&Bytes::from_static(&[0x00, 1])),
            Err(WireError::BadMagic(0x00))
        );
        assert_eq!(
            MediaPacket::decode(&Bytes::from_static(&[MAGIC, 9])),
            Err(WireError::UnknownKind(9))
        );
        assert_eq!(
            MediaPacket::decode(&Bytes::from_static(&[MAGIC, 1, 0])),
            Err(WireError::InvalidSenderId)
        );
        assert_eq!(
            MediaPacket::decode(&Bytes::from_static(&[MAGIC, 2, 2, 0xFF, 0xFE])),
            Err(WireError::InvalidSenderId)
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut raw = video("ann", 1, &[9]).encode().unwrap().to_vec();
        raw.push(0);
        assert_eq!(
            MediaPacket::decode(&Bytes::from(raw)),
            Err(WireError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_encode_validates_sender() {
        assert_eq!(video("", 0, &[]).encode(), Err(WireError::InvalidSenderId));
        let long = "x".repeat(MAX_SENDER_ID_LEN + 1);
        assert_eq!(video(&long, 0, &[]).encode(), Err(WireError::InvalidSenderId));
    }
}
