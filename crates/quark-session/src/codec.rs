use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use quark_frame::{
    compress, decode_frame, decompress_limited, encode_frame, is_gzip, is_likely_json, Decoded,
    Flags, FrameError,
};
use quark_security::SecurityContext;
use quark_transport::WireMessage;
use serde_json::Value;
use tracing::trace;

use crate::error::{Result, SessionError};

/// Turns JSON text into wire messages and back, applying compression and
/// encryption as configured.
///
/// Send order is compress then encrypt; receive order is decrypt then
/// decompress. Each transform runs at most once and the frame flags record
/// exactly which ones ran.
#[derive(Debug, Clone)]
pub struct WireCodec {
    security: Arc<SecurityContext>,
    compress: bool,
    max_message_size: usize,
}

/// Default bound on a decoded inbound message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

impl WireCodec {
    pub fn new(security: Arc<SecurityContext>, compress: bool) -> Self {
        Self {
            security,
            compress,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Bound the decoded size of inbound messages, after decryption and
    /// inflation.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// True when outbound payloads are compressed.
    pub fn compresses(&self) -> bool {
        self.compress
    }

    /// Encode `json`. With neither transform requested the text goes out
    /// unframed.
    pub fn pack(&self, json: String, encrypt: bool) -> Result<WireMessage> {
        if !self.compress && !encrypt {
            return Ok(WireMessage::Text(json));
        }

        let mut flags = Flags::NONE;
        let mut payload = json.into_bytes();
        if self.compress {
            payload = compress(&payload)?;
            flags |= Flags::COMPRESSED;
        }
        if encrypt {
            payload = self.security.encrypt(&payload)?;
            flags |= Flags::ENCRYPTED;
        }

        let mut dst = BytesMut::new();
        encode_frame(flags, &payload, &mut dst)?;
        trace!(?flags, len = dst.len(), "packed frame");
        Ok(WireMessage::Binary(dst.freeze()))
    }

    /// Decode an inbound message into JSON.
    pub fn unpack(&self, message: WireMessage) -> Result<Value> {
        self.unpack_within(message, self.max_message_size)
    }

    /// Decode an inbound message whose JSON text may not exceed `max` bytes.
    ///
    /// The bound also applies while inflating. Over-size input is
    /// [`SessionError::PayloadTooLarge`].
    pub fn unpack_within(&self, message: WireMessage, max: usize) -> Result<Value> {
        let max = max.min(self.max_message_size);
        let json = match message {
            WireMessage::Text(text) => text.into_bytes(),
            WireMessage::Binary(bytes) => self.unpack_binary(bytes, max)?,
            WireMessage::Ping => {
                return Err(SessionError::FrameDecode(
                    "unexpected keep-alive message".to_string(),
                ))
            }
        };
        if json.len() > max {
            return Err(SessionError::PayloadTooLarge { max });
        }
        parse_json(&json)
    }

    fn unpack_binary(&self, bytes: Bytes, max: usize) -> Result<Vec<u8>> {
        match decode_frame(bytes) {
            Decoded::Frame(frame) => {
                trace!(flags = ?frame.flags, len = frame.payload.len(), "unpacking frame");
                let mut payload = frame.payload.to_vec();
                if frame.flags.is_encrypted() {
                    payload = self.security.decrypt(&payload)?;
                }
                if frame.flags.is_compressed() {
                    payload = inflate(&payload, max)?;
                }
                Ok(payload)
            }
            // Unframed gzip is what older servers send.
            Decoded::Raw(raw) if is_gzip(&raw) => inflate(&raw, max),
            Decoded::Raw(raw) if is_likely_json(&raw) => Ok(raw.to_vec()),
            Decoded::Raw(raw) => Err(SessionError::FrameDecode(format!(
                "unrecognized {}-byte binary payload",
                raw.len()
            ))),
        }
    }
}

fn inflate(bytes: &[u8], max: usize) -> Result<Vec<u8>> {
    decompress_limited(bytes, max).map_err(|e| match e {
        FrameError::InflateLimit { max } => SessionError::PayloadTooLarge { max },
        other => SessionError::FrameDecode(other.to_string()),
    })
}

fn parse_json(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| SessionError::FrameDecode(e.to_string()))
}
