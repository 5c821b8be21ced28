//! gzip payload compression.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::codec::MAX_PAYLOAD;
use crate::error::{FrameError, Result};

/// Leading bytes of a gzip member using deflate.
pub const GZIP_MAGIC: [u8; 3] = [0x1F, 0x8B, 0x08];

/// Returns true if `data` starts with the gzip/deflate signature.
pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// Compress `data` into a single gzip member.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let buf = Vec::with_capacity(data.len() / 2 + 32);
    let mut encoder = GzEncoder::new(buf, Compression::default());
    encoder.write_all(data).map_err(FrameError::Compression)?;
    let out = encoder.finish().map_err(FrameError::Compression)?;
    tracing::trace!(input = data.len(), output = out.len(), "gzip compressed");
    Ok(out)
}

/// Inflate a gzip member.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    decompress_limited(data, MAX_PAYLOAD)
}

/// Inflate a gzip member, failing once the output passes `max` bytes.
///
/// Reading stops at `max + 1` bytes, so a hostile member never costs more
/// than that much memory.
pub fn decompress_limited(data: &[u8], max: usize) -> Result<Vec<u8>> {
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
    let mut decoder = GzDecoder::new(data).take(limit);
    let mut out = Vec::with_capacity(data.len().saturating_mul(2).min(max));
    decoder
        .read_to_end(&mut out)
        .map_err(FrameError::Compression)?;
    if out.len() > max {
        return Err(FrameError::InflateLimit { max });
    }
    tracing::trace!(input = data.len(), output = out.len(), "gzip inflated");
    Ok(out)
}
