use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use quark_schema::{ApiDocument, DocumentParser};
use quark_security::{timestamp_nonce, SecurityContext, SecurityMaterial, SecurityState};
use quark_transport::{DuplexTransport, HttpTransport, RequestTransport, WsTransport};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bootstrap::{await_document, fetch_document, handshake_url, open_link};
use crate::codec::WireCodec;
use crate::config::{ChannelKind, Endpoints, SessionConfig};
use crate::driver::{run_duplex, run_http, Shared};
use crate::error::{Result, SessionError};
use crate::event::SessionEvent;
use crate::generator::{ApiGenerator, ApiHandle, ApiTree, OutboundCall};
use crate::queue::CorrelationQueue;

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Constructed,
    Bootstrapping,
    Active,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Constructed => "constructed",
            SessionState::Bootstrapping => "bootstrapping",
            SessionState::Active => "active",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What an active session owns besides its shared state.
struct Running {
    generator: ApiGenerator,
    cancel: CancellationToken,
}

impl Running {
    fn shutdown(self) {
        self.cancel.cancel();
        self.generator.unbind();
        self.generator.detach();
    }
}

struct SessionInner {
    id: String,
    config: SessionConfig,
    endpoints: Endpoints,
    request: Arc<dyn RequestTransport>,
    duplex: Arc<dyn DuplexTransport>,
    tree: ApiTree,
    state: Mutex<SessionState>,
    security: Arc<SecurityContext>,
    queue: Arc<CorrelationQueue>,
    events: broadcast::Sender<SessionEvent>,
    running: Mutex<Option<Running>>,
}

impl SessionInner {
    fn shared(&self) -> Shared {
        Shared {
            codec: WireCodec::new(Arc::clone(&self.security), self.config.compress)
                .with_max_message_size(self.config.max_message_size),
            security: Arc::clone(&self.security),
            queue: Arc::clone(&self.queue),
            events: self.events.clone(),
            require_encryption: self.config.require_encryption,
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.queue.close_and_reject_all(SessionError::stopped);
        if let Some(running) = self.running.get_mut().take() {
            running.shutdown();
        }
    }
}

/// One client session: bootstrap, generated API, transport drivers.
///
/// Cloning shares the session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Session with the default HTTP and WebSocket transports.
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    /// Random per-session id, sent as `sid` with every call.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    pub fn security_state(&self) -> SecurityState {
        self.inner.security.state()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.inner.endpoints
    }

    /// Call surface. Empty until [`Session::init`] succeeds.
    pub fn api(&self) -> ApiHandle {
        ApiHandle::new(self.inner.tree.clone())
    }

    /// Out-of-band events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Bootstrap the session and start its transport driver.
    ///
    /// On any error the session ends up [`SessionState::Stopped`] with
    /// nothing left running.
    pub async fn init(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != SessionState::Constructed {
                return Err(SessionError::InvalidState {
                    operation: "initialize",
                    state: *state,
                });
            }
            *state = SessionState::Bootstrapping;
        }
        info!(
            session_id = %self.inner.id,
            api = %self.inner.endpoints.api,
            service = %self.inner.endpoints.service,
            "bootstrapping session"
        );

        let running = match self.bootstrap().await {
            Ok(running) => running,
            Err(err) => {
                warn!(session_id = %self.inner.id, error = %err, "bootstrap failed");
                self.stop();
                return Err(err);
            }
        };

        let mut state = self.inner.state.lock();
        if *state != SessionState::Bootstrapping {
            // stop() ran while bootstrapping.
            drop(state);
            running.shutdown();
            self.inner.security.destroy();
            return Err(SessionError::stopped());
        }
        *self.inner.running.lock() = Some(running);
        *state = SessionState::Active;
        drop(state);

        info!(
            session_id = %self.inner.id,
            methods = self.inner.tree.methods().len(),
            encrypted = self.inner.security.is_active(),
            "session active"
        );
        Ok(())
    }

    /// Reject pending calls, stop the driver, remove this session's stubs
    /// and drop key material. Idempotent.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), SessionState::Stopped);
        if previous == SessionState::Stopped {
            return;
        }

        // Closing first means no stub can queue a call the driver will drop.
        let rejected = self.inner.queue.close_and_reject_all(SessionError::stopped);
        if let Some(running) = self.inner.running.lock().take() {
            running.shutdown();
        }
        self.inner.security.destroy();
        info!(session_id = %self.inner.id, rejected, "session stopped");
    }

    async fn bootstrap(&self) -> Result<Running> {
        let inner = &self.inner;
        let (generator, calls) = ApiGenerator::new(
            inner.tree.clone(),
            inner.id.clone(),
            Arc::clone(&inner.queue),
            inner.config.call_timeout,
        );
        let running = Running {
            generator,
            cancel: CancellationToken::new(),
        };

        match self.start(&running, calls).await {
            Ok(()) => Ok(running),
            Err(err) => {
                running.shutdown();
                Err(err)
            }
        }
    }

    async fn start(
        &self,
        running: &Running,
        calls: mpsc::UnboundedReceiver<OutboundCall>,
    ) -> Result<()> {
        let inner = &self.inner;
        let config = &inner.config;
        let endpoints = &inner.endpoints;
        let parser = DocumentParser::with_config(config.parse)?;
        let shared = inner.shared();

        let public_key = inner.security.generate_local_key_pair()?;
        let nonce = timestamp_nonce();
        let duplex_url = handshake_url(&endpoints.service, &nonce, config.compress, &public_key);

        let link = match endpoints.api_kind {
            ChannelKind::RequestResponse => {
                let document = fetch_document(
                    inner.request.as_ref(),
                    &endpoints.api,
                    &nonce,
                    &public_key,
                    &shared,
                    &parser,
                )
                .await?;
                self.register(&running.generator, &document, &nonce)?;

                if endpoints.service_kind == ChannelKind::Duplex {
                    let link =
                        open_link(inner.duplex.as_ref(), &duplex_url, config.handshake_timeout)
                            .await?;
                    Some(link)
                } else {
                    None
                }
            }
            ChannelKind::Duplex => {
                let mut link =
                    open_link(inner.duplex.as_ref(), &duplex_url, config.handshake_timeout).await?;
                let registered =
                    match await_document(&mut link, config.handshake_timeout, &shared, &parser)
                        .await
                    {
                        Ok(document) => self.register(&running.generator, &document, &nonce),
                        Err(err) => Err(err),
                    };
                if let Err(err) = registered {
                    link.close();
                    return Err(err);
                }
                Some(link)
            }
        };

        match link {
            Some(link) => {
                debug!(session_id = %inner.id, "starting duplex driver");
                tokio::spawn(run_duplex(
                    shared,
                    link,
                    calls,
                    config.ping_interval,
                    running.cancel.clone(),
                ));
            }
            None => {
                debug!(session_id = %inner.id, "starting http driver");
                tokio::spawn(run_http(
                    shared,
                    Arc::clone(&inner.request),
                    endpoints.service.clone(),
                    calls,
                    running.cancel.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Verify security material, if any, then build the stubs.
    fn register(&self, generator: &ApiGenerator, document: &ApiDocument, nonce: &str) -> Result<()> {
        if document.has_security_material() {
            let (Some(key_enc), Some(key_ver), Some(signature)) =
                (&document.key_enc, &document.key_ver, &document.signature)
            else {
                return Err(SessionError::Bootstrap(
                    "signature sent without keyEnc and keyVer".to_string(),
                ));
            };
            let material = SecurityMaterial::new(key_enc, key_ver, signature);
            self.inner
                .security
                .init_from_server_material(&material, nonce)?;
        }

        generator.build(&document.api)?;
        if !generator.is_built() {
            return Err(SessionError::Bootstrap(
                "api document declares no methods".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("endpoints", &self.inner.endpoints)
            .field("security", &self.inner.security.state())
            .finish()
    }
}

/// Builder for sessions with custom transports or a shared tree.
pub struct SessionBuilder {
    config: SessionConfig,
    request: Option<Arc<dyn RequestTransport>>,
    duplex: Option<Arc<dyn DuplexTransport>>,
    tree: Option<ApiTree>,
}

impl SessionBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            request: None,
            duplex: None,
            tree: None,
        }
    }

    pub fn request_transport(mut self, transport: Arc<dyn RequestTransport>) -> Self {
        self.request = Some(transport);
        self
    }

    pub fn duplex_transport(mut self, transport: Arc<dyn DuplexTransport>) -> Self {
        self.duplex = Some(transport);
        self
    }

    /// Publish stubs into `tree` instead of a private one.
    pub fn tree(mut self, tree: ApiTree) -> Self {
        self.tree = Some(tree);
        self
    }

    /// Validate the configuration and create the session.
    pub fn build(self) -> Result<Session> {
        let endpoints = self.config.validate()?;
        let request = match self.request {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };
        let duplex = match self.duplex {
            Some(transport) => transport,
            None => Arc::new(WsTransport::new().with_connect_timeout(self.config.handshake_timeout)),
        };
        let (events, _) = broadcast::channel(self.config.event_capacity);

        let inner = SessionInner {
            id: format!("{:016x}", rand::random::<u64>()),
            endpoints,
            request,
            duplex,
            tree: self.tree.unwrap_or_default(),
            state: Mutex::new(SessionState::Constructed),
            security: Arc::new(SecurityContext::new()),
            queue: Arc::new(CorrelationQueue::new()),
            events,
            running: Mutex::new(None),
            config: self.config,
        };
        debug!(session_id = %inner.id, "session created");
        Ok(Session {
            inner: Arc::new(inner),
        })
    }
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("config", &self.config)
            .field("request", &self.request)
            .field("duplex", &self.duplex)
            .finish()
    }
}
