//! Server push client: one shared, self-healing connection per process
//!
//! The connection is reference counted by subscriptions. It starts with the
//! first [`PushClient::subscribe_to_changes`] call, survives any churn as
//! long as one subscription is alive, and is torn down when the last one is
//! released. Connection failures are logged and retried after a fixed delay,
//! forever; callers never see them.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::types::PushMessage;

/// Delay between reconnection attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1500);

/// Frame bodies received on an established connection. The stream ends when
/// the connection drops; an `Err` item also ends the session.
pub type FrameStream = BoxStream<'static, anyhow::Result<String>>;

/// Something that can open a push session.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Connect and subscribe; yields frame bodies until the session ends.
    async fn connect(&self) -> anyhow::Result<FrameStream>;
}

/// Callback invoked for every received frame
pub type PushHandler = Arc<dyn Fn(&PushMessage) + Send + Sync>;

/// Shared push client. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct PushClient {
    inner: Arc<PushInner>,
}

struct PushInner {
    transport: Arc<dyn PushTransport>,
    reconnect_delay: Duration,
    listeners: Arc<Listeners>,
    connection: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, PushHandler)>>,
    connected: AtomicBool,
    sessions: AtomicU64,
}

impl Listeners {
    fn dispatch(&self, message: &PushMessage) -> usize {
        let snapshot: Vec<PushHandler> = self
            .entries
            .lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in &snapshot {
            handler(message);
        }
        snapshot.len()
    }
}

impl PushClient {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self::with_reconnect_delay(transport, DEFAULT_RECONNECT_DELAY)
    }

    pub fn with_reconnect_delay(transport: Arc<dyn PushTransport>, reconnect_delay: Duration) -> Self {
        Self {
            inner: Arc::new(PushInner {
                transport,
                reconnect_delay,
                listeners: Arc::new(Listeners::default()),
                connection: Mutex::new(None),
            }),
        }
    }

    /// Register a handler; starts the connection if it is not running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe_to_changes<F>(&self, handler: F) -> PushSubscription
    where
        F: Fn(&PushMessage) + Send + Sync + 'static,
    {
        let id = self.inner.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        // Registration and the start decision share the connection lock with
        // `release`, so a concurrent last release cannot abort a fresh task.
        let mut connection = self.inner.connection.lock();
        self.inner
            .listeners
            .entries
            .lock()
            .push((id, Arc::new(handler)));
        self.inner.ensure_running(&mut connection);
        drop(connection);

        PushSubscription {
            client: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.entries.lock().len()
    }

    /// Whether the connection task is running (connected or retrying)
    pub fn is_active(&self) -> bool {
        self.inner
            .connection
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Whether a session is currently established
    pub fn is_connected(&self) -> bool {
        self.inner.listeners.connected.load(Ordering::Acquire)
    }

    /// Number of sessions established so far (reconnects included)
    pub fn session_count(&self) -> u64 {
        self.inner.listeners.sessions.load(Ordering::Acquire)
    }
}

impl PushInner {
    /// Start the connection task unless one is running. Caller holds the
    /// connection lock.
    fn ensure_running(&self, connection: &mut Option<JoinHandle<()>>) {
        if connection.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        debug!("Starting push connection task");
        *connection = Some(tokio::spawn(run_connection(
            self.transport.clone(),
            self.listeners.clone(),
            self.reconnect_delay,
        )));
    }

    fn release(&self, id: u64) {
        let mut connection = self.connection.lock();
        let remaining = {
            let mut entries = self.listeners.entries.lock();
            entries.retain(|(entry, _)| *entry != id);
            entries.len()
        };
        if remaining == 0 {
            if let Some(handle) = connection.take() {
                info!("Last push subscriber gone, closing connection");
                handle.abort();
            }
            self.listeners.connected.store(false, Ordering::Release);
        }
    }
}

impl Drop for PushInner {
    fn drop(&mut self) {
        if let Some(handle) = self.connection.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run_connection(
    transport: Arc<dyn PushTransport>,
    listeners: Arc<Listeners>,
    reconnect_delay: Duration,
) {
    loop {
        match transport.connect().await {
            Ok(mut frames) => {
                listeners.connected.store(true, Ordering::Release);
                let session = listeners.sessions.fetch_add(1, Ordering::AcqRel) + 1;
                info!(session, "Push channel connected");

                while let Some(frame) = frames.next().await {
                    match frame {
                        Ok(body) => {
                            let message = PushMessage::parse(&body);
                            let delivered = listeners.dispatch(&message);
                            debug!(
                                structured = message.as_change().is_some(),
                                handlers = delivered,
                                "Push frame dispatched"
                            );
                        }
                        Err(e) => {
                            warn!(session, "Push channel error: {}", e);
                            break;
                        }
                    }
                }

                listeners.connected.store(false, Ordering::Release);
                warn!(session, "Push channel disconnected");
            }
            Err(e) => {
                warn!("Push channel connect failed: {}", e);
            }
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

/// Registration handle returned by [`PushClient::subscribe_to_changes`]
#[must_use = "dropping the subscription unsubscribes the handler"]
pub struct PushSubscription {
    client: Weak<PushInner>,
    id: Option<u64>,
}

impl PushSubscription {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let (Some(id), Some(client)) = (self.id.take(), self.client.upgrade()) {
            client.release(id);
        }
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.release();
    }
}
