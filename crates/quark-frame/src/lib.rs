//! Binary envelope framing for quark RPC payloads.
//!
//! Every framed message carries an 8-byte header:
//! - A 2-byte magic number ("GS")
//! - A 1-byte format version
//! - A 1-byte flag set (compressed, encrypted, bootstrap)
//! - A 4-byte big-endian payload length
//!
//! Input that does not match this layout exactly is handed back untouched
//! as [`Decoded::Raw`], so plain JSON text can share the same channel.

pub mod codec;
pub mod compress;
pub mod error;
pub mod flags;

pub use codec::{
    decode_frame, encode_frame, is_likely_json, is_likely_json_str, Decoded, Frame, HEADER_SIZE,
    MAGIC, MAX_PAYLOAD, VERSION,
};
pub use compress::{compress, decompress, decompress_limited, is_gzip, GZIP_MAGIC};
pub use error::{FrameError, Result};
pub use flags::Flags;
