//! WebSocket duplex binding on `tokio-tungstenite`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, TransportError};
use crate::traits::{DuplexLink, DuplexTransport, Inbound, WireMessage};

const LINK_CAPACITY: usize = 256;

/// Subprotocol quark servers negotiate on the service socket.
pub const DEFAULT_SUBPROTOCOL: &str = "ws4is";

/// WebSocket client transport.
///
/// Offers [`DEFAULT_SUBPROTOCOL`] in `Sec-WebSocket-Protocol` unless told
/// otherwise. When a subprotocol is offered the server must select it.
#[derive(Debug, Clone)]
pub struct WsTransport {
    connect_timeout: Duration,
    subprotocol: Option<String>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            subprotocol: Some(DEFAULT_SUBPROTOCOL.to_string()),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Offer `protocol` instead of the default.
    pub fn with_subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocol = Some(protocol.into());
        self
    }

    /// Connect without offering any subprotocol.
    pub fn without_subprotocol(mut self) -> Self {
        self.subprotocol = None;
        self
    }

    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    fn client_request(&self, url: &Url) -> Result<Request> {
        let invalid = |reason: String| TransportError::InvalidEndpoint {
            url: url.to_string(),
            reason,
        };
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| invalid(e.to_string()))?;
        if let Some(protocol) = &self.subprotocol {
            let value = HeaderValue::from_str(protocol)
                .map_err(|_| invalid(format!("invalid subprotocol '{protocol}'")))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }
        Ok(request)
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DuplexTransport for WsTransport {
    async fn open(&self, url: &Url) -> Result<DuplexLink> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidEndpoint {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}' for WebSocket", url.scheme()),
            });
        }

        let request = self.client_request(url)?;
        let connect = connect_async(request);
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| TransportError::Connect {
                url: url.to_string(),
                reason: format!("timed out after {:?}", self.connect_timeout),
            })?
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        info!(url = %redact_query(url), "websocket connected");

        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<WireMessage>(LINK_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<Inbound>(LINK_CAPACITY);
        let cancel = CancellationToken::new();

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    message = out_rx.recv() => {
                        let Some(message) = message else { break };
                        if let Err(e) = sink.send(to_ws_message(message)).await {
                            warn!(error = %e, "websocket send failed");
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
            writer_cancel.cancel();
            debug!("websocket writer stopped");
        });

        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Binary(data))) => {
                            if in_tx.send(Ok(WireMessage::Binary(data))).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Text(text))) => {
                            let text = text.as_str().to_owned();
                            if in_tx.send(Ok(WireMessage::Text(text))).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "websocket closed by server");
                            break;
                        }
                        // Ping/pong are answered by tungstenite.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = in_tx
                                .send(Err(TransportError::Io(std::io::Error::other(e))))
                                .await;
                            break;
                        }
                        None => break,
                    }
                }
            }
            reader_cancel.cancel();
            debug!("websocket reader stopped");
        });

        Ok(DuplexLink {
            sender: out_tx,
            receiver: in_rx,
            cancel,
        })
    }
}

fn to_ws_message(message: WireMessage) -> Message {
    match message {
        WireMessage::Binary(data) => Message::Binary(data),
        WireMessage::Text(text) => Message::text(text),
        WireMessage::Ping => Message::Ping(Bytes::new()),
    }
}

// The query string carries the client public key and nonce.
fn redact_query(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn http_urls_are_rejected() {
        let transport = WsTransport::new();
        let url = Url::parse("https://localhost/quark").unwrap();
        let err = transport.open(&url).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidEndpoint { .. }));
    }

    #[test]
    fn messages_map_to_websocket_frames() {
        assert!(matches!(
            to_ws_message(WireMessage::Text("{}".into())),
            Message::Text(_)
        ));
        assert!(matches!(
            to_ws_message(WireMessage::Binary(Bytes::from_static(b"GS"))),
            Message::Binary(_)
        ));
        assert!(matches!(to_ws_message(WireMessage::Ping), Message::Ping(_)));
    }

    #[test]
    fn default_request_offers_ws4is() {
        let url = Url::parse("wss://host/quark?q=1").unwrap();
        let request = WsTransport::new().client_request(&url).unwrap();
        assert_eq!(
            request.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(),
            "ws4is"
        );
        assert_eq!(request.uri().query(), Some("q=1"));
    }

    #[test]
    fn subprotocol_is_configurable() {
        let url = Url::parse("ws://host/quark").unwrap();

        let custom = WsTransport::new().with_subprotocol("quark.v2");
        assert_eq!(
            custom.client_request(&url).unwrap().headers()[SEC_WEBSOCKET_PROTOCOL],
            "quark.v2"
        );

        let none = WsTransport::new().without_subprotocol();
        assert!(none.subprotocol().is_none());
        assert!(!none
            .client_request(&url)
            .unwrap()
            .headers()
            .contains_key(SEC_WEBSOCKET_PROTOCOL));

        let bad = WsTransport::new().with_subprotocol("bad\nvalue");
        assert!(matches!(
            bad.client_request(&url),
            Err(TransportError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn query_is_hidden_from_logs() {
        let url = Url::parse("wss://host/quark?q=1&c=0&k=04ab").unwrap();
        assert_eq!(redact_query(&url), "wss://host/quark");
    }
}
