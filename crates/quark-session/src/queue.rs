//! Correlation of outbound calls with inbound responses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Result, SessionError};
use crate::request::TransactionId;

/// Counters are reset once this many calls were sent and all of them settled.
const GC_THRESHOLD: u64 = 50;

type Completion = oneshot::Sender<Result<Value>>;

struct Slot {
    tx: Completion,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct QueueState {
    pending: HashMap<TransactionId, Slot>,
    sent: u64,
    settled: u64,
    /// Set once by [`CorrelationQueue::close_and_reject_all`]; builds the
    /// error for every later `enqueue`.
    closed: Option<fn() -> SessionError>,
}

impl QueueState {
    fn take(&mut self, tid: TransactionId) -> Option<Completion> {
        let slot = self.pending.remove(&tid)?;
        if let Some(timer) = slot.timer {
            timer.abort();
        }
        self.settled += 1;
        if self.sent > GC_THRESHOLD && self.settled >= self.sent {
            trace!(sent = self.sent, "resetting correlation counters");
            self.sent = 0;
            self.settled = 0;
            self.pending = HashMap::new();
        }
        Some(slot.tx)
    }
}

/// Outcome of [`CorrelationQueue::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A live call took the response.
    Matched,
    /// No live call for the tid; the response is handed back.
    Unmatched(Value),
}

/// Snapshot of queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub sent: u64,
    pub settled: u64,
}

/// Pending calls keyed by transaction id.
///
/// Every slot settles exactly once: by a response, a rejection, its timer,
/// or teardown. Whatever arrives later for the same tid is unmatched.
pub struct CorrelationQueue {
    next_tid: AtomicU64,
    state: Arc<Mutex<QueueState>>,
}

impl CorrelationQueue {
    pub fn new() -> Self {
        Self {
            next_tid: AtomicU64::new(1),
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    /// Register a call and return its id with the future that settles it.
    ///
    /// A zero `timeout` means the call never times out. Must be called from
    /// within a Tokio runtime when `timeout` is non-zero. Fails once the
    /// queue is closed.
    pub fn enqueue(&self, timeout: Duration) -> Result<(TransactionId, PendingCall)> {
        let (tx, rx) = oneshot::channel();

        let mut state = self.state.lock();
        if let Some(error) = state.closed {
            return Err(error());
        }
        let tid = TransactionId(self.next_tid.fetch_add(1, Ordering::Relaxed));
        // The timer cannot take the slot before the lock is released, so the
        // slot is always in the map when it fires.
        let timer = (!timeout.is_zero()).then(|| {
            let weak = Arc::downgrade(&self.state);
            tokio::spawn(expire(weak, tid, timeout))
        });
        state.sent += 1;
        state.pending.insert(tid, Slot { tx, timer });
        drop(state);

        trace!(%tid, ?timeout, "call enqueued");
        Ok((tid, PendingCall { tid, rx }))
    }

    /// Complete the call `tid` with `response`.
    pub fn resolve(&self, tid: TransactionId, response: Value) -> Resolution {
        let slot = self.state.lock().take(tid);
        match slot {
            Some(tx) => {
                // The caller may have stopped waiting; the slot is freed either way.
                let _ = tx.send(Ok(response));
                Resolution::Matched
            }
            None => {
                debug!(%tid, "response has no pending call");
                Resolution::Unmatched(response)
            }
        }
    }

    /// Fail the call `tid`. Returns false when no such call was pending.
    pub fn reject(&self, tid: TransactionId, error: SessionError) -> bool {
        let slot = self.state.lock().take(tid);
        match slot {
            Some(tx) => {
                let _ = tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail every pending call, each with a fresh error from `error`.
    ///
    /// Returns the number of calls rejected.
    pub fn reject_all(&self, error: impl Fn() -> SessionError) -> usize {
        let drained = self.drain(None);
        Self::fail(drained, error)
    }

    /// Close the queue and fail every pending call.
    ///
    /// Closing and draining happen under one lock: a call is either drained
    /// here or refused by `enqueue` with `error()`. The first close wins.
    pub fn close_and_reject_all(&self, error: fn() -> SessionError) -> usize {
        let drained = self.drain(Some(error));
        Self::fail(drained, error)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }

    fn drain(&self, close: Option<fn() -> SessionError>) -> Vec<Slot> {
        let mut state = self.state.lock();
        if state.closed.is_none() {
            state.closed = close;
        }
        let drained = state.pending.drain().map(|(_, slot)| slot).collect();
        state.sent = 0;
        state.settled = 0;
        drained
    }

    fn fail(drained: Vec<Slot>, error: impl Fn() -> SessionError) -> usize {
        let count = drained.len();
        for slot in drained {
            if let Some(timer) = slot.timer {
                timer.abort();
            }
            let _ = slot.tx.send(Err(error()));
        }
        if count > 0 {
            debug!(count, "rejected all pending calls");
        }
        count
    }

    /// True if `tid` is still waiting.
    pub fn is_pending(&self, tid: TransactionId) -> bool {
        self.state.lock().pending.contains_key(&tid)
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            pending: state.pending.len(),
            sent: state.sent,
            settled: state.settled,
        }
    }
}

impl Default for CorrelationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CorrelationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationQueue")
            .field("next_tid", &self.next_tid.load(Ordering::Relaxed))
            .field("stats", &self.stats())
            .finish()
    }
}

async fn expire(state: Weak<Mutex<QueueState>>, tid: TransactionId, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let Some(state) = state.upgrade() else {
        return;
    };
    let slot = state.lock().take(tid);
    if let Some(tx) = slot {
        debug!(%tid, ?timeout, "call timed out");
        let _ = tx.send(Err(SessionError::Timeout(timeout)));
    }
}

/// Future side of a pending call.
#[derive(Debug)]
pub struct PendingCall {
    tid: TransactionId,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingCall {
    pub fn tid(&self) -> TransactionId {
        self.tid
    }

    /// Wait for the call to settle.
    pub async fn wait(self) -> Result<Value> {
        self.rx.await.unwrap_or_else(|_| Err(SessionError::stopped()))
    }
}
