//! Transport drivers: move [`OutboundCall`]s onto the wire and route what
//! comes back to the [`CorrelationQueue`] or the event channel.

use std::sync::Arc;
use std::time::Duration;

use quark_security::SecurityContext;
use quark_transport::{DuplexLink, RequestTransport, TransportError, WireMessage};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::codec::WireCodec;
use crate::envelope::{classify, data_envelope, ChannelType, Inbound};
use crate::error::{Result, SessionError};
use crate::event::SessionEvent;
use crate::generator::OutboundCall;
use crate::queue::{CorrelationQueue, Resolution};
use crate::request::{CallRequest, TransactionId};

/// State every driver needs.
#[derive(Debug, Clone)]
pub(crate) struct Shared {
    pub codec: WireCodec,
    pub security: Arc<SecurityContext>,
    pub queue: Arc<CorrelationQueue>,
    pub events: broadcast::Sender<SessionEvent>,
    pub require_encryption: bool,
}

impl Shared {
    /// Serialize and frame one request.
    ///
    /// Encrypts only when the request asks for it, has arguments, and the
    /// security context is active.
    pub fn prepare(&self, request: &CallRequest, channel: ChannelType) -> Result<WireMessage> {
        let encrypt = request.wants_encryption() && self.security.is_active();
        if request.wants_encryption() && !encrypt && self.require_encryption {
            return Err(SessionError::EncryptionUnavailable {
                path: request.path(),
            });
        }
        let json = data_envelope(request, channel)?;
        self.codec.pack(json, encrypt)
    }

    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Route one decoded inbound message.
    pub fn dispatch(&self, value: Value) {
        match classify(value) {
            Inbound::Data(records) => {
                for record in records {
                    self.route_record(record);
                }
            }
            Inbound::Err {
                tid: Some(tid),
                error,
            } => {
                if !self.queue.reject(tid, SessionError::Remote(error.clone())) {
                    warn!(%tid, error = %error, "server error for unknown call");
                    self.emit(SessionEvent::ServerError(error));
                }
            }
            Inbound::Err { tid: None, error } => {
                warn!(error = %error, "server error");
                self.emit(SessionEvent::ServerError(error));
            }
            Inbound::Api(document) => {
                debug!("server pushed an api document");
                self.emit(SessionEvent::Unmatched(document));
            }
            Inbound::Other(value) => {
                warn!("unrecognized inbound message");
                self.emit(SessionEvent::Unmatched(value));
            }
        }
    }

    fn route_record(&self, record: Value) {
        let Some(tid) = record.get("tid").and_then(TransactionId::from_value) else {
            warn!("response record without tid");
            self.emit(SessionEvent::Unmatched(record));
            return;
        };
        if let Resolution::Unmatched(record) = self.queue.resolve(tid, record) {
            warn!(%tid, "late or unknown response");
            self.emit(SessionEvent::Unmatched(record));
        }
    }
}

/// Drive a duplex link until the session cancels or the link goes away.
pub(crate) async fn run_duplex(
    shared: Shared,
    mut link: DuplexLink,
    mut calls: mpsc::UnboundedReceiver<OutboundCall>,
    ping_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ping = (!ping_interval.is_zero())
        .then(|| interval_at(Instant::now() + ping_interval, ping_interval));

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break None,
            call = calls.recv() => {
                let Some(OutboundCall { request }) = call else {
                    break None;
                };
                let tid = request.tid;
                match shared.prepare(&request, ChannelType::Ws) {
                    Ok(message) => {
                        trace!(%tid, "sending call");
                        if let Err(err) = link.send(message).await {
                            shared.queue.reject(tid, err.into());
                            break Some(TransportError::Closed.to_string());
                        }
                    }
                    Err(err) => {
                        debug!(%tid, error = %err, "call not sent");
                        shared.queue.reject(tid, err);
                    }
                }
            }
            inbound = link.receiver.recv() => match inbound {
                Some(Ok(WireMessage::Ping)) => {}
                Some(Ok(message)) => match shared.codec.unpack(message) {
                    Ok(value) => shared.dispatch(value),
                    Err(err) => {
                        warn!(error = %err, "dropping undecodable message");
                        shared.emit(SessionEvent::DecodeError(err.to_string()));
                    }
                },
                Some(Err(err)) => break Some(err.to_string()),
                None => break Some(TransportError::Closed.to_string()),
            },
            _ = next_ping(&mut ping) => {
                if link.send(WireMessage::Ping).await.is_err() {
                    break Some(TransportError::Closed.to_string());
                }
            }
        }
    };

    link.close();
    calls.close();
    if let Some(reason) = &reason {
        warn!(%reason, "duplex link lost");
        // Calls queued but never written are in the queue too.
        shared
            .queue
            .close_and_reject_all(|| SessionError::Transport(TransportError::Closed));
    } else {
        debug!("duplex driver stopped");
    }
    shared.emit(SessionEvent::TransportClosed(reason));
}

async fn next_ping(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Send each call as its own request/response exchange.
pub(crate) async fn run_http(
    shared: Shared,
    transport: Arc<dyn RequestTransport>,
    url: Url,
    mut calls: mpsc::UnboundedReceiver<OutboundCall>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            call = calls.recv() => {
                let Some(call) = call else { break };
                tokio::spawn(exchange(
                    shared.clone(),
                    Arc::clone(&transport),
                    url.clone(),
                    call.request,
                    cancel.clone(),
                ));
            }
        }
    }
    debug!("http driver stopped");
}

async fn exchange(
    shared: Shared,
    transport: Arc<dyn RequestTransport>,
    url: Url,
    request: CallRequest,
    cancel: CancellationToken,
) {
    let tid = request.tid;
    let roundtrip = async {
        let message = shared.prepare(&request, ChannelType::Http)?;
        let response = transport.post(&url, message, &[]).await?;
        shared.codec.unpack(response.into_message())
    };

    let outcome = tokio::select! {
        _ = cancel.cancelled() => return,
        outcome = roundtrip => outcome,
    };
    match outcome {
        Ok(value) => settle_exchange(&shared, tid, value),
        Err(err) => {
            debug!(%tid, error = %err, "exchange failed");
            shared.queue.reject(tid, err);
        }
    }
}

/// Settle the call that made the exchange from its response body.
///
/// A record with a matching tid, or without a tid, answers the call. Records
/// naming other tids are routed like duplex traffic.
fn settle_exchange(shared: &Shared, tid: TransactionId, value: Value) {
    match classify(value) {
        Inbound::Data(records) => {
            let mut answered = false;
            for record in records {
                let record_tid = record.get("tid").and_then(TransactionId::from_value);
                if !answered && record_tid.is_none_or(|found| found == tid) {
                    shared.queue.resolve(tid, record);
                    answered = true;
                } else {
                    shared.route_record(record);
                }
            }
            if !answered {
                shared.queue.reject(
                    tid,
                    SessionError::FrameDecode(format!("response carried no record for {tid}")),
                );
            }
        }
        Inbound::Err { error, .. } => {
            shared.queue.reject(tid, SessionError::Remote(error));
        }
        Inbound::Api(_) | Inbound::Other(_) => {
            shared.queue.reject(
                tid,
                SessionError::FrameDecode(format!("unexpected response to {tid}")),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn shared(require_encryption: bool) -> (Shared, broadcast::Receiver<SessionEvent>) {
        let security = Arc::new(SecurityContext::new());
        let (events, rx) = broadcast::channel(16);
        let shared = Shared {
            codec: WireCodec::new(Arc::clone(&security), false),
            security,
            queue: Arc::new(CorrelationQueue::new()),
            events,
            require_encryption,
        };
        (shared, rx)
    }

    fn request(tid: TransactionId) -> CallRequest {
        CallRequest {
            tid,
            sid: "s".into(),
            namespace: "io.greenscreens".into(),
            action: "Demo".into(),
            method: "hello".into(),
            e: true,
            data: vec![json!("John Doe")],
            ts: 0,
        }
    }

    #[test]
    fn inactive_context_sends_in_clear() {
        let (shared, _) = shared(false);
        let message = shared
            .prepare(&request(TransactionId(1)), ChannelType::Ws)
            .unwrap();
        let WireMessage::Text(text) = message else {
            panic!("expected text");
        };
        assert!(text.contains("John Doe"));
    }

    #[test]
    fn required_encryption_is_enforced() {
        let (shared, _) = shared(true);
        let err = shared
            .prepare(&request(TransactionId(1)), ChannelType::Ws)
            .unwrap_err();
        assert!(matches!(err, SessionError::EncryptionUnavailable { .. }));

        let mut no_args = request(TransactionId(2));
        no_args.data.clear();
        assert!(shared.prepare(&no_args, ChannelType::Ws).is_ok());
    }

    #[tokio::test]
    async fn dispatch_resolves_and_reports_unmatched() {
        let (shared, mut events) = shared(false);
        let (tid, pending) = shared.queue.enqueue(Duration::ZERO).unwrap();

        shared.dispatch(json!({
            "cmd": "data",
            "data": [
                {"tid": tid.to_string(), "result": {"success": true}},
                {"tid": "999", "result": {"success": true}}
            ]
        }));
        assert!(pending.wait().await.is_ok());
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Unmatched(record) if record["tid"] == "999"
        ));
    }

    #[tokio::test]
    async fn err_rejects_call_or_becomes_event() {
        let (shared, mut events) = shared(false);
        let (tid, pending) = shared.queue.enqueue(Duration::ZERO).unwrap();

        shared.dispatch(json!({"cmd": "err", "tid": tid.0, "result": {"msg": "denied"}}));
        assert!(matches!(
            pending.wait().await,
            Err(SessionError::Remote(error)) if error.message == "denied"
        ));

        shared.dispatch(json!({"cmd": "err", "result": {"msg": "broadcast"}}));
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::ServerError(error) if error.message == "broadcast"
        ));
    }

    #[tokio::test]
    async fn exchange_answers_originating_call() {
        let (shared, _) = shared(false);
        let (tid, pending) = shared.queue.enqueue(Duration::ZERO).unwrap();
        settle_exchange(&shared, tid, json!({"result": {"success": true, "data": 1}}));
        assert_eq!(pending.wait().await.unwrap()["result"]["data"], 1);

        let (tid, pending) = shared.queue.enqueue(Duration::ZERO).unwrap();
        settle_exchange(&shared, tid, json!({"cmd": "err", "result": {"msg": "bad"}}));
        assert!(matches!(pending.wait().await, Err(SessionError::Remote(_))));

        let (tid, pending) = shared.queue.enqueue(Duration::ZERO).unwrap();
        settle_exchange(&shared, tid, json!([{"tid": "12345"}]));
        assert!(matches!(
            pending.wait().await,
            Err(SessionError::FrameDecode(_))
        ));
    }
}
