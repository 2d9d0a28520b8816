use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::message::Message;

/// What the bus tells its listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Connected,
    Disconnected,
    Received(Message),
    Failed(String),
}

impl BusEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            BusEvent::Connected => "connected",
            BusEvent::Disconnected => "disconnected",
            BusEvent::Received(_) => "received",
            BusEvent::Failed(_) => "failed",
        }
    }
}

/// Handle returned by [`MessageBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&BusEvent) + Send + Sync>;

pub struct MessageBus {
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
    cleared: AtomicBool,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            cleared: AtomicBool::new(false),
        }
    }

    /// Register a listener. Listeners run synchronously on the dispatching
    /// task, in registration order.
    ///
    /// Subscribing to a cleared bus is accepted but the listener never runs.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if self.is_cleared() {
            tracing::debug!("ignoring subscription on a cleared message bus");
            return id;
        }
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` if the listener was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Parse one raw inbound frame and deliver it.
    ///
    /// A frame that does not decode is reported as [`BusEvent::Failed`] and is
    /// never delivered as [`BusEvent::Received`].
    pub fn dispatch_message(&self, raw: &str) {
        if self.is_cleared() {
            return;
        }
        match Message::from_json(raw) {
            Ok(message) => {
                tracing::trace!(kind = message.kind(), id = %message.id, "dispatching message");
                self.publish(BusEvent::Received(message));
            }
            Err(e) => {
                tracing::warn!("dropping malformed frame ({} bytes): {e}", raw.len());
                self.publish(BusEvent::Failed(format!("Failed to parse message: {e}")));
            }
        }
    }

    pub fn dispatch_connect(&self) {
        self.publish(BusEvent::Connected);
    }

    pub fn dispatch_disconnect(&self) {
        self.publish(BusEvent::Disconnected);
    }

    pub fn dispatch_error(&self, reason: impl Into<String>) {
        self.publish(BusEvent::Failed(reason.into()));
    }

    /// Detach every listener. Idempotent; afterwards all dispatches are no-ops,
    /// including the rest of a dispatch that is running when this is called.
    pub fn clear(&self) {
        if self.cleared.swap(true, Ordering::SeqCst) {
            return;
        }
        let detached = {
            let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *listeners)
        };
        tracing::debug!("message bus cleared, {} listener(s) detached", detached.len());
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::SeqCst)
    }

    fn publish(&self, event: BusEvent) {
        if self.is_cleared() {
            tracing::trace!(event = event.name(), "bus cleared, event swallowed");
            return;
        }

        // Snapshot so listeners may subscribe, unsubscribe or clear re-entrantly.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            if self.is_cleared() {
                break;
            }
            if panic::catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::error!(event = event.name(), "message bus listener panicked");
            }
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
