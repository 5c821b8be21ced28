//! Transport bindings for quark RPC.
//!
//! Two shapes of channel are supported:
//! - request/response ([`RequestTransport`]): one HTTP exchange per call
//! - duplex ([`DuplexTransport`]): a persistent bidirectional link, such as a
//!   WebSocket
//!
//! The session layer only depends on the traits. Concrete bindings live
//! behind the `http` and `ws` features, and [`memory`] provides an
//! in-process duplex pair for tests and embedding.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "ws")]
pub mod ws;

pub use error::{Result, TransportError};
pub use memory::{MemoryDuplex, MemoryPeer};
pub use traits::{
    DuplexLink, DuplexTransport, Inbound, RequestTransport, WireMessage, WireResponse,
    CONTENT_TYPE_JSON, CONTENT_TYPE_OCTET_STREAM, CONTENT_TYPE_QUARK,
};

#[cfg(feature = "http")]
pub use http::{HttpConfig, HttpTransport};

#[cfg(feature = "ws")]
pub use ws::{WsTransport, DEFAULT_SUBPROTOCOL};
