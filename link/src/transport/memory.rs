//! In-process transport for tests and embedding.

use super::{Transport, TransportEvent};
use crate::error::{LabLinkError, Result};
use crate::event_handlers::DisconnectReason;
use crate::models::{ClientMessage, PushMode, ServerMessage};
use crate::path::Path;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Transport that records every outbound message and lets the owner play
/// the server side by injecting events.
///
/// Clones share the same state, so a test can keep one handle while the
/// client owns another.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    connected: AtomicBool,
    closed: AtomicBool,
    sent: Mutex<Vec<ClientMessage>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryTransport {
    /// Create a disconnected transport and the receiver its events go to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            inner: Arc::new(MemoryInner {
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
                events,
            }),
        };
        (transport, rx)
    }

    /// Simulate a successful (re)connection.
    pub fn connect(&self) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        self.emit(TransportEvent::Connecting);
        self.inner.connected.store(true, Ordering::SeqCst);
        self.emit(TransportEvent::Connected);
    }

    /// Simulate the connection dropping.
    pub fn disconnect(&self, reason: impl Into<String>) {
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            self.emit(TransportEvent::Disconnected(DisconnectReason::new(reason)));
        }
    }

    /// Inject a replace-mode push at `path`.
    pub fn push(&self, path: Path, value: Value) {
        self.deliver(ServerMessage::Push {
            path,
            value,
            mode: PushMode::Replace,
        });
    }

    /// Inject any server message.
    pub fn deliver(&self, message: ServerMessage) {
        self.emit(TransportEvent::Message(message));
    }

    /// Every message sent so far.
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.inner.sent.lock().clone()
    }

    /// Drain the recorded messages.
    pub fn take_sent(&self) -> Vec<ClientMessage> {
        std::mem::take(&mut *self.inner.sent.lock())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn emit(&self, event: TransportEvent) {
        // A dropped receiver means the client is gone.
        let _ = self.inner.events.send(event);
    }
}

impl Transport for MemoryTransport {
    fn send(&self, message: ClientMessage) -> Result<()> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(LabLinkError::NotConnected(format!(
                "memory transport cannot send {}",
                message.kind()
            )));
        }
        self.inner.sent.lock().push(message);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disconnect("Client closed");
    }

    fn transport_type(&self) -> &'static str {
        "memory"
    }
}
