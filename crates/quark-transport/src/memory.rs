//! In-process duplex transport.
//!
//! [`MemoryDuplex::open`] hands the client a regular [`DuplexLink`] and
//! queues the matching server half as a [`MemoryPeer`], which the owner
//! picks up with [`MemoryDuplex::accept`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::{Result, TransportError};
use crate::traits::{DuplexLink, DuplexTransport, Inbound, WireMessage};

const LINK_CAPACITY: usize = 64;

/// Duplex transport whose peers live in the same process.
#[derive(Debug, Clone)]
pub struct MemoryDuplex {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    accept_rx: Arc<Mutex<mpsc::UnboundedReceiver<MemoryPeer>>>,
}

impl MemoryDuplex {
    pub fn new() -> Self {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        Self {
            accept_tx,
            accept_rx: Arc::new(Mutex::new(accept_rx)),
        }
    }

    /// Wait for the next link opened through this transport.
    pub async fn accept(&self) -> Option<MemoryPeer> {
        self.accept_rx.lock().await.recv().await
    }
}

impl Default for MemoryDuplex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DuplexTransport for MemoryDuplex {
    async fn open(&self, url: &Url) -> Result<DuplexLink> {
        let (client_tx, server_rx) = mpsc::channel(LINK_CAPACITY);
        let (server_tx, client_rx) = mpsc::channel(LINK_CAPACITY);
        let cancel = CancellationToken::new();

        let peer = MemoryPeer {
            url: url.clone(),
            incoming: server_rx,
            outgoing: server_tx,
            cancel: cancel.clone(),
        };
        self.accept_tx.send(peer).map_err(|_| TransportError::Connect {
            url: url.to_string(),
            reason: "memory transport dropped".to_string(),
        })?;

        debug!(%url, "memory link opened");
        Ok(DuplexLink {
            sender: client_tx,
            receiver: client_rx,
            cancel,
        })
    }
}

/// Server half of a memory link.
#[derive(Debug)]
pub struct MemoryPeer {
    url: Url,
    incoming: mpsc::Receiver<WireMessage>,
    outgoing: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
}

impl MemoryPeer {
    /// URL the client opened, query string included.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Next message from the client, skipping keep-alive pings.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        loop {
            match self.recv_raw().await? {
                WireMessage::Ping => continue,
                message => return Some(message),
            }
        }
    }

    /// Next message from the client, pings included.
    pub async fn recv_raw(&mut self) -> Option<WireMessage> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            message = self.incoming.recv() => message,
        }
    }

    /// Deliver a message to the client.
    pub async fn send(&self, message: WireMessage) -> Result<()> {
        self.outgoing
            .send(Ok(message))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Deliver a transport failure to the client.
    pub async fn fail(&self, error: TransportError) -> Result<()> {
        self.outgoing
            .send(Err(error))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// True once the client cancelled the link.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Close the link from the server side.
    pub fn close(self) {
        self.cancel.cancel();
    }
}
