//! Client engine for quark RPC.
//!
//! quark calls server-published methods over HTTP or WebSocket. The server
//! describes its API in a bootstrap document; the client verifies the
//! document's signature, derives a shared AES key over ECDH and exposes each
//! method as a callable stub.
//!
//! # Crate Structure
//!
//! - [`frame`]: `GS` binary envelope and gzip helpers
//! - [`transport`]: HTTP, WebSocket and in-memory transports
//! - [`schema`]: API document types and validation
//! - [`security`]: ECDH/ECDSA handshake and AES-CTR cipher
//! - [`session`]: Correlation queue, API generator and session engine (behind `session` feature)

/// Re-export frame types.
pub mod frame {
    pub use quark_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use quark_transport::*;
}

/// Re-export schema types.
pub mod schema {
    pub use quark_schema::*;
}

/// Re-export security types.
pub mod security {
    pub use quark_security::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use quark_session::*;
}

#[cfg(feature = "session")]
pub use quark_session::{Session, SessionConfig, SessionError, SessionEvent};
