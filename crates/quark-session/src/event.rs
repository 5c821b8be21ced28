use serde_json::Value;

use crate::envelope::RemoteError;

/// Out-of-band traffic that no call is waiting for.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A response, push or API message with no live call to settle.
    Unmatched(Value),
    /// An `err` message that could not be attributed to a call.
    ServerError(RemoteError),
    /// An inbound message that could not be decoded.
    DecodeError(String),
    /// The duplex link went away. `None` when the session closed it.
    TransportClosed(Option<String>),
}
