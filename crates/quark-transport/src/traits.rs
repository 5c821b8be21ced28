use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, TransportError};

/// Content type for framed binary bodies.
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";

/// Alternate content type some servers use for framed binary bodies.
pub const CONTENT_TYPE_QUARK: &str = "application/x-quark";

/// Content type for plain JSON text bodies.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// A binary body, usually a framed envelope.
    Binary(Bytes),
    /// A text body, usually plain JSON.
    Text(String),
    /// Keep-alive probe. Duplex only; carries no payload.
    Ping,
}

impl WireMessage {
    /// Raw bytes of the message body. Empty for [`WireMessage::Ping`].
    pub fn into_bytes(self) -> Bytes {
        match self {
            WireMessage::Binary(bytes) => bytes,
            WireMessage::Text(text) => Bytes::from(text),
            WireMessage::Ping => Bytes::new(),
        }
    }

    /// Content type matching this body when sent over HTTP.
    pub fn content_type(&self) -> &'static str {
        match self {
            WireMessage::Text(_) => CONTENT_TYPE_JSON,
            WireMessage::Binary(_) | WireMessage::Ping => CONTENT_TYPE_OCTET_STREAM,
        }
    }
}

/// A completed request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireResponse {
    /// HTTP status code.
    pub status: u16,
    /// Value of the `content-type` header, if any.
    pub content_type: Option<String>,
    /// Response body.
    pub body: Bytes,
}

impl WireResponse {
    /// A `200 OK` JSON response.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            content_type: Some(CONTENT_TYPE_JSON.to_string()),
            body: body.into(),
        }
    }

    /// A `200 OK` binary response.
    pub fn binary(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            content_type: Some(CONTENT_TYPE_OCTET_STREAM.to_string()),
            body: body.into(),
        }
    }

    /// True when the content type announces a framed binary body.
    pub fn is_binary(&self) -> bool {
        self.content_type.as_deref().is_some_and(|ct| {
            let mime = ct.split(';').next().unwrap_or_default().trim();
            mime.eq_ignore_ascii_case(CONTENT_TYPE_OCTET_STREAM)
                || mime.eq_ignore_ascii_case(CONTENT_TYPE_QUARK)
        })
    }

    /// Convert the body into a [`WireMessage`] according to its content type.
    pub fn into_message(self) -> WireMessage {
        if self.is_binary() {
            return WireMessage::Binary(self.body);
        }
        match String::from_utf8(self.body.to_vec()) {
            Ok(text) => WireMessage::Text(text),
            Err(_) => WireMessage::Binary(self.body),
        }
    }
}

/// Request/response channel, one exchange per call.
#[async_trait]
pub trait RequestTransport: Send + Sync + fmt::Debug {
    /// `GET url` with the given extra headers.
    async fn fetch(&self, url: &Url, headers: &[(&str, String)]) -> Result<WireResponse>;

    /// `POST url` with `body` and the given extra headers.
    async fn post(
        &self,
        url: &Url,
        body: WireMessage,
        headers: &[(&str, String)],
    ) -> Result<WireResponse>;
}

/// Items delivered by a duplex link. An `Err` is followed by the end of the
/// stream.
pub type Inbound = Result<WireMessage>;

/// An open duplex link.
///
/// Dropping `sender` or cancelling `cancel` closes the link. `receiver`
/// yields `None` once the link is gone.
#[derive(Debug)]
pub struct DuplexLink {
    /// Outbound messages, written in submission order.
    pub sender: mpsc::Sender<WireMessage>,
    /// Inbound messages.
    pub receiver: mpsc::Receiver<Inbound>,
    /// Cancels the link's background tasks.
    pub cancel: CancellationToken,
}

impl DuplexLink {
    /// Queue a message for sending.
    pub async fn send(&self, message: WireMessage) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Close the link.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Persistent bidirectional channel.
#[async_trait]
pub trait DuplexTransport: Send + Sync + fmt::Debug {
    /// Open a link to `url`.
    async fn open(&self, url: &Url) -> Result<DuplexLink>;
}
