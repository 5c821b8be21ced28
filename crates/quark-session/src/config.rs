use std::time::Duration;

use quark_schema::ParseConfig;
use url::Url;

use crate::codec::DEFAULT_MAX_MESSAGE_SIZE;
use crate::error::{Result, SessionError};

/// How an endpoint is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// `http` / `https`: one exchange per call.
    RequestResponse,
    /// `ws` / `wss`: persistent link.
    Duplex,
}

impl ChannelKind {
    /// Classify a URL by scheme.
    pub fn of(url: &Url) -> Option<Self> {
        match url.scheme() {
            "http" | "https" => Some(ChannelKind::RequestResponse),
            "ws" | "wss" => Some(ChannelKind::Duplex),
            _ => None,
        }
    }
}

/// Validated endpoint pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api: Url,
    pub api_kind: ChannelKind,
    pub service: Url,
    pub service_kind: ChannelKind,
}

/// Configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Where the API document is fetched from.
    pub api_url: String,
    /// Where calls are sent.
    pub service_url: String,
    /// Default per-call deadline. Async methods never time out.
    pub call_timeout: Duration,
    /// Deadline for the duplex `api` message after connecting.
    pub handshake_timeout: Duration,
    /// Duplex keep-alive period. Zero disables pings.
    pub ping_interval: Duration,
    /// gzip outbound payloads.
    pub compress: bool,
    /// Fail calls that request encryption when the context is not active,
    /// instead of sending them in clear.
    pub require_encryption: bool,
    /// API document parsing behavior. Its `max_document_size` bounds the
    /// decoded bootstrap message.
    pub parse: ParseConfig,
    /// Bound on any decoded inbound message, after decryption and inflation.
    pub max_message_size: usize,
    /// Buffered out-of-band events per subscriber.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            service_url: String::new(),
            call_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            compress: true,
            require_encryption: false,
            parse: ParseConfig::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            event_capacity: 64,
        }
    }
}

impl SessionConfig {
    /// Config with both endpoints set and defaults elsewhere.
    pub fn new(api_url: impl Into<String>, service_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            service_url: service_url.into(),
            ..Self::default()
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_require_encryption(mut self, require: bool) -> Self {
        self.require_encryption = require;
        self
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn with_parse_config(mut self, parse: ParseConfig) -> Self {
        self.parse = parse;
        self
    }

    /// Check endpoints and return them parsed.
    ///
    /// When the API endpoint is duplex, it must be the service endpoint:
    /// the document arrives as the first message on the call link.
    pub fn validate(&self) -> Result<Endpoints> {
        let (api, api_kind) = parse_endpoint("api", &self.api_url)?;
        let (service, service_kind) = parse_endpoint("service", &self.service_url)?;

        if api_kind == ChannelKind::Duplex && api != service {
            return Err(SessionError::Config(format!(
                "duplex api endpoint {api} must equal the service endpoint {service}"
            )));
        }
        if self.max_message_size == 0 {
            return Err(SessionError::Config(
                "max message size must be at least 1".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(SessionError::Config(
                "event capacity must be at least 1".to_string(),
            ));
        }

        Ok(Endpoints {
            api,
            api_kind,
            service,
            service_kind,
        })
    }
}

fn parse_endpoint(name: &str, raw: &str) -> Result<(Url, ChannelKind)> {
    if raw.trim().is_empty() {
        return Err(SessionError::Config(format!("{name} url is not set")));
    }
    let url = Url::parse(raw.trim())
        .map_err(|e| SessionError::Config(format!("{name} url '{raw}' is invalid: {e}")))?;
    let kind = ChannelKind::of(&url).ok_or_else(|| {
        SessionError::Config(format!(
            "{name} url scheme '{}' is not one of http, https, ws, wss",
            url.scheme()
        ))
    })?;
    Ok((url, kind))
}
