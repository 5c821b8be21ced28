use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;

use crate::error::{Result, SecurityError};

/// Decode key or signature text sent by the server.
///
/// Even-length text made only of hex digits is read as hex, anything else
/// as standard base64 (padding optional). Whitespace is ignored so that
/// flattened PEM bodies decode too.
pub fn decode_material(field: &'static str, text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(SecurityError::InvalidMaterial {
            field,
            reason: "empty".to_string(),
        });
    }

    if compact.len() % 2 == 0 && compact.bytes().all(|b| b.is_ascii_hexdigit()) {
        return hex::decode(&compact).map_err(|e| SecurityError::InvalidMaterial {
            field,
            reason: e.to_string(),
        });
    }

    STANDARD
        .decode(&compact)
        .or_else(|_| STANDARD_NO_PAD.decode(&compact))
        .map_err(|e| SecurityError::InvalidMaterial {
            field,
            reason: e.to_string(),
        })
}
