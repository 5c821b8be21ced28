//! Client session engine for quark RPC.
//!
//! A [`Session`] fetches the server's API document, verifies its security
//! material, builds a tree of callable [`MethodStub`]s and drives the
//! transport that carries calls and responses.
//!
//! ```no_run
//! # async fn demo() -> quark_session::Result<()> {
//! use quark_session::{Session, SessionConfig};
//! use serde_json::json;
//!
//! let session = Session::new(SessionConfig::new(
//!     "wss://example.com/socket",
//!     "wss://example.com/socket",
//! ))?;
//! session.init().await?;
//! let reply = session
//!     .api()
//!     .call("io.greenscreens.Demo.hello", vec![json!("John Doe")])
//!     .await?;
//! println!("{}", reply["data"]);
//! session.stop();
//! # Ok(())
//! # }
//! ```

mod bootstrap;
pub mod codec;
pub mod config;
mod driver;
pub mod envelope;
pub mod error;
pub mod event;
pub mod generator;
pub mod queue;
pub mod request;
pub mod session;

pub use codec::WireCodec;
pub use config::{ChannelKind, Endpoints, SessionConfig};
pub use envelope::{classify, data_envelope, settle_response, ChannelType, Inbound, RemoteError};
pub use error::{Result, SessionError};
pub use event::SessionEvent;
pub use generator::{ApiGenerator, ApiHandle, ApiNode, ApiTree, MethodStub, OutboundCall};
pub use queue::{CorrelationQueue, PendingCall, QueueStats, Resolution};
pub use request::{CallRequest, TransactionId};
pub use session::{Session, SessionBuilder, SessionState};
