use crate::context::SecurityState;

/// Errors raised by the security context.
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    /// The algorithm or key format is not supported here.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A cryptographic operation failed.
    #[error("crypto operation failed: {0}")]
    Crypto(String),

    /// Server-provided material could not be decoded.
    #[error("invalid {field}: {reason}")]
    InvalidMaterial { field: &'static str, reason: String },

    /// The server signature does not match the challenge.
    #[error("signature invalid")]
    SignatureInvalid,

    /// The operation is not allowed in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SecurityState,
    },

    /// Encrypt/decrypt requested before the context became active.
    #[error("security context is not active")]
    NotActive,

    /// Ciphertext too short to carry an IV.
    #[error("ciphertext too short ({len} bytes, need at least {min})")]
    InvalidCiphertext { len: usize, min: usize },
}

pub type Result<T> = std::result::Result<T, SecurityError>;
