//! HTTP/S request/response binding on `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;
use url::Url;

use crate::error::{Result, TransportError};
use crate::traits::{RequestTransport, WireMessage, WireResponse};

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Upper bound for one complete exchange.
    pub request_timeout: Duration,
    /// Timeout for establishing the TCP/TLS connection.
    pub connect_timeout: Duration,
    /// Value of the `user-agent` header.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("quark-rs/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Request/response transport over HTTP/S.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(&HttpConfig::default())
    }

    /// Build a transport with explicit configuration.
    pub fn with_config(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Connect {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn execute(&self, url: &Url, request: reqwest::RequestBuilder) -> Result<WireResponse> {
        let response = request.send().await.map_err(|e| request_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| request_error(url, &e))?;

        debug!(
            %url,
            status = status.as_u16(),
            content_type = content_type.as_deref().unwrap_or(""),
            len = body.len(),
            "http response"
        );

        Ok(WireResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

#[async_trait]
impl RequestTransport for HttpTransport {
    async fn fetch(&self, url: &Url, headers: &[(&str, String)]) -> Result<WireResponse> {
        check_scheme(url)?;
        let mut request = self.client.get(url.clone());
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        self.execute(url, request).await
    }

    async fn post(
        &self,
        url: &Url,
        body: WireMessage,
        headers: &[(&str, String)],
    ) -> Result<WireResponse> {
        check_scheme(url)?;
        let mut request = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, body.content_type());
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        self.execute(url, request.body(body.into_bytes())).await
    }
}

fn check_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(TransportError::InvalidEndpoint {
            url: url.to_string(),
            reason: format!("unsupported scheme '{other}' for HTTP transport"),
        }),
    }
}

fn request_error(url: &Url, error: &reqwest::Error) -> TransportError {
    if error.is_connect() {
        TransportError::Connect {
            url: url.to_string(),
            reason: error.to_string(),
        }
    } else {
        TransportError::Request {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}
