//! In-process broadcast hub
//!
//! [`MemoryHub`] plays the server side of the realtime channel without a
//! socket. Frames travel as JSON text, the same encoding the WebSocket
//! transport uses, so decoding and unknown-event handling are exercised end
//! to end. The hub can refuse connections or drop every live connection,
//! which is what reconnect and degradation tests need.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::transport::{ChannelTransport, ClientMessage, ServerMessage, TransportConnection};
use crate::activity::AttendanceUpdate;
use crate::error::{AttendanceError, AttendanceResult};

#[derive(Debug, Default)]
struct HubInner {
    peers: Mutex<Vec<mpsc::UnboundedSender<String>>>,
    received: Mutex<Vec<ClientMessage>>,
    refusals: AtomicU32,
    offline: AtomicBool,
    connect_attempts: AtomicUsize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport handle for a [`super::RealtimeChannel`]
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport { hub: self.clone() }
    }

    /// Push a count change to every live connection, returning how many got it
    pub fn broadcast(&self, update: AttendanceUpdate) -> usize {
        match serde_json::to_string(&ServerMessage::AttendanceChanged(update)) {
            Ok(text) => self.send_raw(&text),
            Err(_) => 0,
        }
    }

    /// Push an arbitrary text frame, malformed or not
    pub fn send_raw(&self, text: &str) -> usize {
        let mut peers = self.inner.peers.lock();
        peers.retain(|peer| peer.send(text.to_string()).is_ok());
        peers.len()
    }

    /// Close every live connection from the server side
    pub fn drop_connections(&self) {
        self.inner.peers.lock().clear();
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_connections(&self, count: u32) {
        self.inner.refusals.store(count, Ordering::SeqCst);
    }

    /// Refuse every connection attempt until set back online
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
        if offline {
            self.drop_connections();
        }
    }

    pub fn connection_count(&self) -> usize {
        let mut peers = self.inner.peers.lock();
        peers.retain(|peer| !peer.is_closed());
        peers.len()
    }

    /// Every frame clients have sent, in arrival order
    pub fn received(&self) -> Vec<ClientMessage> {
        self.inner.received.lock().clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    fn accept(&self) -> AttendanceResult<MemoryConnection> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(AttendanceError::network_error("hub offline"));
        }
        let refused = self
            .inner
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(AttendanceError::network_error("connection refused"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.peers.lock().push(tx);
        Ok(MemoryConnection {
            hub: self.clone(),
            rx,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
}

#[async_trait]
impl ChannelTransport for MemoryTransport {
    async fn connect(&self) -> AttendanceResult<Box<dyn TransportConnection>> {
        let connection = self.hub.accept()?;
        Ok(Box::new(connection))
    }
}

struct MemoryConnection {
    hub: MemoryHub,
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl TransportConnection for MemoryConnection {
    async fn send(&mut self, message: &ClientMessage) -> AttendanceResult<()> {
        let text = message.encode()?;
        let decoded: ClientMessage = serde_json::from_str(&text)?;
        trace!(frame = %text, "Hub received frame");
        self.hub.inner.received.lock().push(decoded);
        Ok(())
    }

    async fn recv(&mut self) -> Option<AttendanceResult<ServerMessage>> {
        let text = self.rx.recv().await?;
        Some(ServerMessage::decode(&text))
    }
}
