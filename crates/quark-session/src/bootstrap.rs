//! Fetching the API document.
//!
//! Over request/response the document is a `GET` on the api endpoint with
//! `x-time` (the nonce) and `x-public-key` headers. Over a duplex link it is
//! the first `api` message after opening
//! `service?q=<nonce>&c=<0|1>&k=<public key>`.

use std::time::Duration;

use quark_schema::{ApiDocument, DocumentParser};
use quark_transport::{DuplexLink, DuplexTransport, RequestTransport, TransportError, WireMessage};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::driver::Shared;
use crate::envelope::{classify, Inbound};
use crate::error::{Result, SessionError};
use crate::event::SessionEvent;

pub(crate) const HEADER_TIME: &str = "x-time";
pub(crate) const HEADER_PUBLIC_KEY: &str = "x-public-key";

/// `GET` the document from a request/response endpoint.
pub(crate) async fn fetch_document(
    transport: &dyn RequestTransport,
    url: &Url,
    nonce: &str,
    public_key: &str,
    shared: &Shared,
    parser: &DocumentParser,
) -> Result<ApiDocument> {
    let headers = [
        (HEADER_TIME, nonce.to_string()),
        (HEADER_PUBLIC_KEY, public_key.to_string()),
    ];
    let response = transport.fetch(url, &headers).await?;
    debug!(
        status = response.status,
        len = response.body.len(),
        "api response received"
    );

    let max = parser.config().max_document_size;
    let value = shared.codec.unpack_within(response.into_message(), max)?;
    let document = match classify(value) {
        Inbound::Api(document) | Inbound::Other(document) => document,
        Inbound::Data(records) => Value::Array(records),
        Inbound::Err { error, .. } => return Err(SessionError::Remote(error)),
    };
    Ok(parser.parse_value(document)?)
}

/// Service URL with the duplex handshake parameters appended.
pub(crate) fn handshake_url(service: &Url, nonce: &str, compress: bool, public_key: &str) -> Url {
    let mut url = service.clone();
    url.query_pairs_mut()
        .append_pair("q", nonce)
        .append_pair("c", if compress { "1" } else { "0" })
        .append_pair("k", public_key);
    url
}

/// Open the duplex link to `url`.
pub(crate) async fn open_link(
    transport: &dyn DuplexTransport,
    url: &Url,
    timeout: Duration,
) -> Result<DuplexLink> {
    match tokio::time::timeout(timeout, transport.open(url)).await {
        Ok(link) => Ok(link?),
        Err(_) => Err(SessionError::Timeout(timeout)),
    }
}

/// Wait on a fresh link for the `api` message.
///
/// Other traffic that arrives first is reported as events.
pub(crate) async fn await_document(
    link: &mut DuplexLink,
    timeout: Duration,
    shared: &Shared,
    parser: &DocumentParser,
) -> Result<ApiDocument> {
    match tokio::time::timeout(timeout, next_document(link, shared, parser)).await {
        Ok(document) => {
            if document.is_ok() {
                info!("api document received over duplex link");
            }
            document
        }
        Err(_) => Err(SessionError::Bootstrap(format!(
            "no api message within {timeout:?}"
        ))),
    }
}

async fn next_document(
    link: &mut DuplexLink,
    shared: &Shared,
    parser: &DocumentParser,
) -> Result<ApiDocument> {
    loop {
        let message = match link.receiver.recv().await {
            Some(Ok(WireMessage::Ping)) => continue,
            Some(Ok(message)) => message,
            Some(Err(err)) => return Err(SessionError::Transport(err)),
            None => return Err(SessionError::Transport(TransportError::Closed)),
        };

        let max = parser.config().max_document_size;
        let value = match shared.codec.unpack_within(message, max) {
            Ok(value) => value,
            Err(err @ SessionError::PayloadTooLarge { .. }) => return Err(err),
            Err(err) => {
                warn!(error = %err, "undecodable message during handshake");
                shared.emit(SessionEvent::DecodeError(err.to_string()));
                continue;
            }
        };
        match classify(value) {
            Inbound::Api(document) => return Ok(parser.parse_value(document)?),
            Inbound::Err { error, .. } => return Err(SessionError::Remote(error)),
            Inbound::Data(records) => {
                for record in records {
                    shared.emit(SessionEvent::Unmatched(record));
                }
            }
            Inbound::Other(value) => shared.emit(SessionEvent::Unmatched(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use quark_security::SecurityContext;
    use quark_transport::{MemoryDuplex, WireResponse};
    use serde_json::json;
    use tokio::sync::broadcast;

    use super::*;
    use crate::codec::WireCodec;
    use crate::queue::CorrelationQueue;

    fn shared() -> Shared {
        let security = Arc::new(SecurityContext::new());
        Shared {
            codec: WireCodec::new(Arc::clone(&security), false),
            security,
            queue: Arc::new(CorrelationQueue::new()),
            events: broadcast::channel(8).0,
            require_encryption: false,
        }
    }

    #[derive(Debug)]
    struct Fixed {
        body: &'static str,
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl RequestTransport for Fixed {
        async fn fetch(
            &self,
            _url: &Url,
            headers: &[(&str, String)],
        ) -> quark_transport::Result<WireResponse> {
            let mut seen = self.seen.lock();
            for (name, value) in headers {
                seen.push((name.to_string(), value.clone()));
            }
            Ok(WireResponse::json(Bytes::from_static(self.body.as_bytes())))
        }

        async fn post(
            &self,
            _url: &Url,
            _body: WireMessage,
            _headers: &[(&str, String)],
        ) -> quark_transport::Result<WireResponse> {
            Err(TransportError::Closed)
        }
    }

    const DOC: &str = r#"{"api":[{"namespace":"io.greenscreens","action":"Demo","methods":[{"name":"hello","len":1}]}]}"#;

    #[tokio::test]
    async fn http_document_with_headers() {
        let transport = Fixed {
            body: DOC,
            seen: Mutex::new(Vec::new()),
        };
        let url = Url::parse("http://localhost/api").unwrap();
        let parser = DocumentParser::new().unwrap();

        let document = fetch_document(&transport, &url, "1700", "04ab", &shared(), &parser)
            .await
            .unwrap();
        assert_eq!(document.api[0].action, "Demo");
        assert_eq!(
            *transport.seen.lock(),
            vec![
                ("x-time".to_string(), "1700".to_string()),
                ("x-public-key".to_string(), "04ab".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn http_err_fails_bootstrap() {
        let transport = Fixed {
            body: r#"{"cmd":"err","result":{"msg":"no api"}}"#,
            seen: Mutex::new(Vec::new()),
        };
        let url = Url::parse("http://localhost/api").unwrap();
        let parser = DocumentParser::new().unwrap();
        let err = fetch_document(&transport, &url, "1", "04", &shared(), &parser)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Remote(remote) if remote.message == "no api"));
    }

    #[test]
    fn handshake_query() {
        let service = Url::parse("wss://host/socket").unwrap();
        let url = handshake_url(&service, "1700", true, "04ff");
        assert_eq!(url.query(), Some("q=1700&c=1&k=04ff"));
    }

    #[tokio::test]
    async fn duplex_document_after_noise() {
        let transport = MemoryDuplex::new();
        let url = Url::parse("ws://localhost/socket").unwrap();
        let mut link = open_link(&transport, &url, Duration::from_secs(1))
            .await
            .unwrap();
        let peer = transport.accept().await.unwrap();

        let shared = shared();
        let mut events = shared.events.subscribe();
        peer.send(WireMessage::Text(r#"{"hello":1}"#.into()))
            .await
            .unwrap();
        let api = json!({"cmd": "api", "data": serde_json::from_str::<Value>(DOC).unwrap()});
        peer.send(WireMessage::Text(api.to_string())).await.unwrap();

        let parser = DocumentParser::new().unwrap();
        let document = await_document(&mut link, Duration::from_secs(1), &shared, &parser)
            .await
            .unwrap();
        assert_eq!(document.method_count(), 1);
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Unmatched(value) if value["hello"] == 1
        ));
    }

    #[tokio::test]
    async fn document_size_limit_applies_to_both_paths() {
        let parser = DocumentParser::with_config(
            quark_schema::ParseConfig::default().with_max_document_size(64),
        )
        .unwrap();

        let transport = Fixed {
            body: DOC,
            seen: Mutex::new(Vec::new()),
        };
        let url = Url::parse("http://localhost/api").unwrap();
        let err = fetch_document(&transport, &url, "1", "04", &shared(), &parser)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::PayloadTooLarge { max: 64 }));

        let duplex = MemoryDuplex::new();
        let url = Url::parse("ws://localhost/socket").unwrap();
        let mut link = duplex.open(&url).await.unwrap();
        let peer = duplex.accept().await.unwrap();
        let api = json!({"cmd": "api", "data": serde_json::from_str::<Value>(DOC).unwrap()});
        let packed = quark_frame::compress(api.to_string().as_bytes()).unwrap();
        peer.send(WireMessage::Binary(Bytes::from(packed)))
            .await
            .unwrap();

        let err = await_document(&mut link, Duration::from_secs(1), &shared(), &parser)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::PayloadTooLarge { max: 64 }));
    }

    #[tokio::test(start_paused = true)]
    async fn duplex_handshake_times_out() {
        let transport = MemoryDuplex::new();
        let url = Url::parse("ws://localhost/socket").unwrap();
        let mut link = transport.open(&url).await.unwrap();
        let _peer = transport.accept().await.unwrap();

        let parser = DocumentParser::new().unwrap();
        let err = await_document(&mut link, Duration::from_secs(2), &shared(), &parser)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Bootstrap(_)));
    }
}
