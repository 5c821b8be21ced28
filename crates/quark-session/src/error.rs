use std::time::Duration;

use crate::envelope::RemoteError;
use crate::session::SessionState;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Stub invoked with an undeclared argument count. No call was sent.
    #[error("{path} takes {expected:?} argument(s), got {got}")]
    ArityMismatch {
        path: String,
        expected: Vec<usize>,
        got: usize,
    },

    /// No method is published at the dotted path.
    #[error("no method at {0}")]
    UnknownMethod(String),

    /// Security context failure (signature, key import, cipher).
    #[error("security error: {0}")]
    Security(#[from] quark_security::SecurityError),

    /// The call asked for encryption but the session cannot provide it.
    #[error("encryption unavailable for {path}")]
    EncryptionUnavailable { path: String },

    /// The call did not complete within its deadline.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] quark_transport::TransportError),

    /// Frame-level error while encoding.
    #[error("frame error: {0}")]
    Frame(#[from] quark_frame::FrameError),

    /// Inbound bytes could not be turned into a JSON message.
    #[error("frame decode error: {0}")]
    FrameDecode(String),

    /// A decoded inbound message would exceed the configured size.
    #[error("inbound payload exceeds {max} bytes")]
    PayloadTooLarge { max: usize },

    /// The server reported a failure.
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// API document or tree error.
    #[error("schema error: {0}")]
    Schema(#[from] quark_schema::SchemaError),

    /// Invalid session configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The bootstrap exchange did not produce a usable API.
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    /// The operation is not allowed in the current session state.
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SessionError {
    pub(crate) fn stopped() -> Self {
        SessionError::Transport(quark_transport::TransportError::Shutdown)
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
