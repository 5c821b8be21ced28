/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint URL cannot be used by this transport.
    #[error("invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// Failed to establish a connection to the endpoint.
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// The request was sent but the exchange failed.
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// The server answered with a non-success HTTP status.
    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },

    /// An I/O error occurred on an established link.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link was closed by either side.
    #[error("connection closed")]
    Closed,

    /// The owning session was stopped.
    #[error("session stopped")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
