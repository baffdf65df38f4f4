//! In-memory loopback transport for tests and single-process simulations.
//!
//! A [`MemoryHub`] plays the role of the network: every endpoint opened on
//! it gets a synthetic address and an inbox. Sends to unknown addresses are
//! silently dropped, which models the lossy fire-and-forget contract and
//! lets tests "crash" a node by disconnecting it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use aquaring_messages::WireMessage;
use aquaring_types::PeerAddress;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Transport, TransportError};

type Inbox = mpsc::UnboundedSender<(WireMessage, PeerAddress)>;

/// An in-process network. Cheap to clone; all clones share the same
/// address space.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    inboxes: Mutex<HashMap<PeerAddress, Inbox>>,
    next_port: AtomicU16,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new endpoint with a fresh synthetic address.
    pub fn open(&self) -> MemoryTransport {
        let port = 1 + self.inner.next_port.fetch_add(1, Ordering::Relaxed);
        let local = PeerAddress::new(([127, 0, 0, 1], port).into());
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .inboxes
            .lock()
            .expect("hub lock poisoned")
            .insert(local, tx);
        MemoryTransport {
            hub: self.clone(),
            local,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Drop an endpoint's inbox. Subsequent sends to it vanish, which is
    /// how tests simulate a silently crashed node.
    pub fn disconnect(&self, addr: PeerAddress) {
        self.inner
            .inboxes
            .lock()
            .expect("hub lock poisoned")
            .remove(&addr);
    }

    fn deliver(&self, to: PeerAddress, from: PeerAddress, msg: WireMessage) {
        let inboxes = self.inner.inboxes.lock().expect("hub lock poisoned");
        if let Some(tx) = inboxes.get(&to) {
            let _ = tx.send((msg, from));
        }
    }
}

/// One endpoint on a [`MemoryHub`].
pub struct MemoryTransport {
    hub: MemoryHub,
    local: PeerAddress,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(WireMessage, PeerAddress)>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_addr(&self) -> PeerAddress {
        self.local
    }

    async fn send(&self, to: PeerAddress, msg: WireMessage) -> Result<(), TransportError> {
        self.hub.deliver(to, self.local, msg);
        Ok(())
    }

    async fn recv(&self) -> Result<(WireMessage, PeerAddress), TransportError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.hub.disconnect(self.local);
    }
}
