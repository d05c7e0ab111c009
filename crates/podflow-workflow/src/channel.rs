//! Duplex event channel seam and the in-process bus behind it.
//!
//! Components never hold handler closures that touch their own state. A
//! component subscribes through an [`Inbox`]: the registered handler only
//! forwards the frame into a typed queue, and the owner applies queued frames
//! on its own turn with `pump()`.

use podflow_core::SocketFrame;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("socket not connected")]
    NotConnected,
    #[error("socket writer closed")]
    Closed,
    #[error("payload encode failed: {0}")]
    Encode(String),
}

pub trait EventChannel: Send + Sync {
    fn emit(&self, event: &str, payload: Value) -> Result<(), ChannelError>;
    fn on(&self, event: &str, handler: EventHandler) -> ListenerId;
    fn off(&self, event: &str, id: ListenerId);
    fn is_connected(&self) -> bool;
}

#[derive(Default)]
struct BusInner {
    next_listener: u64,
    handlers: HashMap<String, Vec<(ListenerId, EventHandler)>>,
    connected: bool,
    outbound: Option<mpsc::UnboundedSender<SocketFrame>>,
    emitted: Vec<SocketFrame>,
}

/// Clonable in-process [`EventChannel`].
///
/// Outbound frames go to the writer queue given to [`LocalEventBus::with_outbound`];
/// a bus built with [`LocalEventBus::new`] keeps them for [`LocalEventBus::take_emitted`].
/// Inbound frames enter through [`LocalEventBus::deliver`].
#[derive(Clone, Default)]
pub struct LocalEventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outbound(outbound: mpsc::UnboundedSender<SocketFrame>) -> Self {
        let bus = Self::default();
        bus.lock().outbound = Some(outbound);
        bus
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    /// Runs every handler registered for `event`. Returns how many ran.
    pub fn deliver(&self, event: &str, payload: &Value) -> usize {
        let handlers = {
            let inner = self.lock();
            inner
                .handlers
                .get(event)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|(_, handler)| handler.clone())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };
        if handlers.is_empty() {
            debug!(event = "bus_unhandled_event", name = event);
        }
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    pub fn deliver_frame(&self, frame: &SocketFrame) -> usize {
        self.deliver(&frame.event, &frame.payload)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.lock().handlers.get(event).map(Vec::len).unwrap_or(0)
    }

    pub fn take_emitted(&self) -> Vec<SocketFrame> {
        std::mem::take(&mut self.lock().emitted)
    }
}

impl EventChannel for LocalEventBus {
    fn emit(&self, event: &str, payload: Value) -> Result<(), ChannelError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if !inner.connected {
            return Err(ChannelError::NotConnected);
        }
        let frame = SocketFrame::new(event, payload);
        match &inner.outbound {
            Some(outbound) => outbound.send(frame).map_err(|_| ChannelError::Closed),
            None => {
                inner.emitted.push(frame);
                Ok(())
            }
        }
    }

    fn on(&self, event: &str, handler: EventHandler) -> ListenerId {
        let mut inner = self.lock();
        inner.next_listener += 1;
        let id = ListenerId(inner.next_listener);
        inner
            .handlers
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn off(&self, event: &str, id: ListenerId) {
        let mut inner = self.lock();
        if let Some(entries) = inner.handlers.get_mut(event) {
            entries.retain(|(existing, _)| *existing != id);
            if entries.is_empty() {
                inner.handlers.remove(event);
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }
}

/// Queue of inbound frames for one component, with idempotent registration.
pub struct Inbox {
    tx: mpsc::UnboundedSender<SocketFrame>,
    rx: mpsc::UnboundedReceiver<SocketFrame>,
    listeners: Vec<(String, ListenerId)>,
    listening: bool,
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Inbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            listeners: Vec::new(),
            listening: false,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Registers one forwarding handler per event. A second call while
    /// listening is a no-op and returns `false`.
    pub fn subscribe(&mut self, channel: &dyn EventChannel, events: &[&str]) -> bool {
        if self.listening {
            return false;
        }
        for event in events {
            let tx = self.tx.clone();
            let name = event.to_string();
            let handler: EventHandler = Arc::new(move |payload: &Value| {
                let _ = tx.send(SocketFrame::new(name.clone(), payload.clone()));
            });
            let id = channel.on(event, handler);
            self.listeners.push((event.to_string(), id));
        }
        self.listening = true;
        true
    }

    /// Removes every handler and discards frames that were queued but not yet
    /// applied, so nothing reaches torn-down state.
    pub fn unsubscribe(&mut self, channel: &dyn EventChannel) -> bool {
        if !self.listening {
            return false;
        }
        for (event, id) in self.listeners.drain(..) {
            channel.off(&event, id);
        }
        while self.rx.try_recv().is_ok() {}
        self.listening = false;
        true
    }

    pub fn try_next(&mut self) -> Option<SocketFrame> {
        self.rx.try_recv().ok()
    }
}
