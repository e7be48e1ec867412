//! Process-local change bus, optionally mirrored across instances

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::broadcast::BroadcastTransport;
use super::types::BusMessage;

/// Callback invoked with `(event_name, payload)`
pub type BusHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Publish/subscribe fan-out for change notifications.
///
/// - **Local delivery**: synchronous, in registration order, to the handlers
///   registered when `publish` starts.
/// - **Transport**: optional. Publishes are posted to it and messages from
///   other instances are delivered to local handlers asynchronously. A bus
///   never re-delivers its own publish.
///
/// Cheap to clone; clones share handlers and transport.
#[derive(Clone)]
pub struct ChangeBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    origin: Uuid,
    handlers: Mutex<Handlers>,
    transport: Option<Arc<dyn BroadcastTransport>>,
    bridge: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct Handlers {
    next_id: u64,
    entries: Vec<(u64, BusHandler)>,
}

impl ChangeBus {
    /// Create a local-only bus (no cross-instance mirroring).
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a bus mirrored over `transport`.
    ///
    /// Call [`ChangeBus::start_bridge`] to receive other instances' publishes.
    pub fn with_transport(transport: Arc<dyn BroadcastTransport>) -> Self {
        Self::build(Some(transport))
    }

    fn build(transport: Option<Arc<dyn BroadcastTransport>>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                origin: Uuid::new_v4(),
                handlers: Mutex::new(Handlers::default()),
                transport,
                bridge: Mutex::new(None),
            }),
        }
    }

    /// Identity stamped on every message this bus posts.
    pub fn origin(&self) -> Uuid {
        self.inner.origin
    }

    /// Whether cross-instance mirroring is configured.
    pub fn has_transport(&self) -> bool {
        self.inner.transport.is_some()
    }

    /// Number of registered handlers
    pub fn subscriber_count(&self) -> usize {
        self.inner.handlers.lock().entries.len()
    }

    /// Register a handler. It stays registered until the returned
    /// subscription is dropped or unsubscribed.
    pub fn subscribe<F>(&self, handler: F) -> BusSubscription
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let mut handlers = self.inner.handlers.lock();
        let id = handlers.next_id;
        handlers.next_id += 1;
        handlers.entries.push((id, Arc::new(handler)));
        BusSubscription {
            bus: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    /// Publish to local handlers, then post to the transport if any.
    pub fn publish(&self, name: &str, payload: Value) {
        let delivered = self.inner.deliver(name, &payload);
        debug!(name = %name, handlers = delivered, "Bus event published");

        if let Some(transport) = &self.inner.transport {
            transport.post(&BusMessage {
                name: name.to_string(),
                payload,
                origin: self.inner.origin,
            });
        }
    }

    /// Start the transport→local bridge.
    ///
    /// Messages from other instances are delivered to local handlers;
    /// messages carrying this bus's own origin are skipped since their local
    /// delivery already happened in `publish`. If the transport cannot be
    /// listened on, mirroring is disabled with a warning and local delivery
    /// keeps working. No-op without a transport or when already started.
    pub fn start_bridge(&self) {
        let Some(transport) = self.inner.transport.clone() else {
            return;
        };
        let mut bridge = self.inner.bridge.lock();
        if bridge.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let origin = self.inner.origin;

        *bridge = Some(tokio::spawn(async move {
            let mut inbound = match transport.listen().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Cross-instance bus mirroring disabled: {}", e);
                    return;
                }
            };
            info!(origin = %origin, "Bus bridge started");

            use futures::StreamExt;
            while let Some(message) = inbound.next().await {
                if message.origin == origin {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let delivered = inner.deliver(&message.name, &message.payload);
                debug!(
                    name = %message.name,
                    from = %message.origin,
                    handlers = delivered,
                    "Bus bridge: delivered remote event"
                );
            }
            debug!(origin = %origin, "Bus bridge stopped");
        }));
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusInner {
    /// Run every currently registered handler. The registry is snapshotted
    /// first, so handlers may subscribe or unsubscribe while being called.
    fn deliver(&self, name: &str, payload: &Value) -> usize {
        let snapshot: Vec<BusHandler> = self
            .handlers
            .lock()
            .entries
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in &snapshot {
            handler(name, payload);
        }
        snapshot.len()
    }

    fn remove(&self, id: u64) {
        self.handlers.lock().entries.retain(|(entry, _)| *entry != id);
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        if let Some(handle) = self.bridge.get_mut().take() {
            handle.abort();
        }
    }
}

/// Registration handle returned by [`ChangeBus::subscribe`]
#[must_use = "dropping the subscription unsubscribes the handler"]
pub struct BusSubscription {
    bus: Weak<BusInner>,
    id: Option<u64>,
}

impl BusSubscription {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let (Some(id), Some(bus)) = (self.id.take(), self.bus.upgrade()) {
            bus.remove(id);
        }
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        self.release();
    }
}
