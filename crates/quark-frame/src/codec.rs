use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::flags::Flags;

/// Frame header: magic (2) + version (1) + flags (1) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes: "GS" (0x47 0x53).
pub const MAGIC: [u8; 2] = [0x47, 0x53];

/// Envelope format version written by this codec.
pub const VERSION: u8 = 1;

/// Largest payload the 32-bit length field can describe.
pub const MAX_PAYLOAD: usize = u32::MAX as usize;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Transforms applied to the payload.
    pub flags: Flags,
    /// The payload, still compressed/encrypted as indicated by `flags`.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(flags: Flags, payload: impl Into<Bytes>) -> Self {
        Self {
            flags,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode this frame into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(self.wire_size());
        encode_frame(self.flags, &self.payload, &mut dst)?;
        Ok(dst.freeze())
    }
}

/// Result of [`decode_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A well-formed envelope.
    Frame(Frame),
    /// Bytes that are not an envelope, returned unmodified.
    Raw(Bytes),
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬─────────┬────────┬───────────┬──────────────────┐
/// │ Magic (2B) │ Version │ Flags  │ Length    │ Payload          │
/// │ 0x47 0x53  │ (1B)    │ (1B)   │ (4B BE)   │ (Length bytes)   │
/// │ "GS"       │         │        │           │                  │
/// └────────────┴─────────┴────────┴───────────┴──────────────────┘
/// ```
pub fn encode_frame(flags: Flags, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = payload_len(payload.len())?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u8(VERSION);
    dst.put_u8(flags.bits());
    dst.put_u32(len);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a complete message.
///
/// Anything that is not exactly one envelope (bad magic, unknown version,
/// short header, or a length field that disagrees with the input size) is
/// returned as [`Decoded::Raw`] for the caller to classify.
pub fn decode_frame(src: impl Into<Bytes>) -> Decoded {
    let src: Bytes = src.into();

    if src.len() < HEADER_SIZE || src[0..2] != MAGIC || src[2] != VERSION {
        return Decoded::Raw(src);
    }

    let flags = Flags::from_bits(src[3]);
    let payload_len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;

    if HEADER_SIZE.checked_add(payload_len) != Some(src.len()) {
        return Decoded::Raw(src);
    }

    Decoded::Frame(Frame {
        flags,
        payload: src.slice(HEADER_SIZE..),
    })
}

/// Cheap classification of unframed data as JSON.
///
/// True iff the first non-whitespace byte is `{` or `[` and the last
/// non-whitespace byte closes it. Parsing remains the source of truth.
pub fn is_likely_json(data: &[u8]) -> bool {
    let trimmed = data.trim_ascii();
    match (trimmed.first(), trimmed.last()) {
        (Some(b'{'), Some(b'}')) | (Some(b'['), Some(b']')) => true,
        _ => false,
    }
}

/// Text variant of [`is_likely_json`].
pub fn is_likely_json_str(text: &str) -> bool {
    is_likely_json(text.as_bytes())
}

fn payload_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| FrameError::FrameTooLarge {
        size: len,
        max: MAX_PAYLOAD,
    })
}
