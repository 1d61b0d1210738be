use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: type code (2) + length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// The fixed-size prefix of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Registered type code of the payload.
    pub code: u16,
    /// Exact byte length of the payload that follows.
    pub length: u32,
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────────┬───────────┬─────────────────┐
/// │ Type      │ Length    │ Payload         │
/// │ (2B LE)   │ (4B LE)   │ (Length bytes)  │
/// └───────────┴───────────┴─────────────────┘
/// ```
pub fn encode_frame(code: u16, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u16_le(code);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode the 6-byte frame header.
pub fn decode_header(header: &[u8; HEADER_SIZE]) -> FrameHeader {
    FrameHeader {
        code: u16::from_le_bytes([header[0], header[1]]),
        length: u32::from_le_bytes([header[2], header[3], header[4], header[5]]),
    }
}

/// Configuration for frame I/O.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
