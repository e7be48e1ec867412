//! Cross-instance transports for the change bus
//!
//! A transport carries [`BusMessage`]s between every bus attached to the same
//! named channel. Delivery is best-effort: posting never blocks and never
//! fails loudly.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

use super::types::BusMessage;

/// Default in-process channel capacity
const DEFAULT_CAPACITY: usize = 256;

/// A shared channel between bus instances.
///
/// Every attached listener receives every posted message, including the
/// poster's own; filtering by origin is the bus's job.
#[async_trait]
pub trait BroadcastTransport: Send + Sync {
    /// Fire-and-forget publish
    fn post(&self, message: &BusMessage);

    /// Stream of messages posted by anyone on the channel
    async fn listen(&self) -> anyhow::Result<BoxStream<'static, BusMessage>>;
}

/// In-process broadcast channel.
///
/// Clones share the channel, so several [`super::ChangeBus`] instances built
/// on clones of one `MemoryBroadcast` behave like windows of one application.
#[derive(Debug, Clone)]
pub struct MemoryBroadcast {
    sender: broadcast::Sender<BusMessage>,
}

impl MemoryBroadcast {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Number of attached listeners
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryBroadcast {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl BroadcastTransport for MemoryBroadcast {
    fn post(&self, message: &BusMessage) {
        // No listeners is fine: nobody else is attached yet.
        if let Ok(n) = self.sender.send(message.clone()) {
            debug!(name = %message.name, listeners = n, "BusMessage posted");
        }
    }

    async fn listen(&self) -> anyhow::Result<BoxStream<'static, BusMessage>> {
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(|item| async move {
            match item {
                Ok(message) => Some(message),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Broadcast listener lagged, messages dropped");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use uuid::Uuid;

    fn message(name: &str) -> BusMessage {
        BusMessage {
            name: name.into(),
            payload: Value::Null,
            origin: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_post_without_listener_no_panic() {
        let channel = MemoryBroadcast::default();
        channel.post(&message("product:changed"));
        assert_eq!(channel.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_clones_share_channel() {
        let channel = MemoryBroadcast::default();
        let other = channel.clone();
        let mut stream = channel.listen().await.unwrap();

        other.post(&message("person:deleted"));

        let received = stream.next().await.unwrap();
        assert_eq!(received.name, "person:deleted");
    }
}
