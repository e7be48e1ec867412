//! NATS-backed broadcast transport for cross-instance change sync
//!
//! Every console instance attached to the same NATS server and channel name
//! sees the others' bus publishes. Publishing is fire-and-forget: errors are
//! logged but never block the caller.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, warn};

use super::broadcast::BroadcastTransport;
use super::types::BusMessage;

/// Broadcast transport publishing bus messages on `{prefix}.bus.{channel}`.
#[derive(Clone)]
pub struct NatsBroadcast {
    client: async_nats::Client,
    subject: String,
}

impl NatsBroadcast {
    /// Create a transport for `channel` under `subject_prefix` (e.g. "inventory").
    pub fn new(client: async_nats::Client, subject_prefix: &str, channel: &str) -> Self {
        Self {
            client,
            subject: bus_subject(subject_prefix, channel),
        }
    }
}

/// Build the bus subject. NATS tokens cannot contain spaces or dots, so the
/// channel name is sanitized.
fn bus_subject(prefix: &str, channel: &str) -> String {
    let channel: String = channel
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.bus.{}", prefix.trim_end_matches('.'), channel)
}

#[async_trait]
impl BroadcastTransport for NatsBroadcast {
    fn post(&self, message: &BusMessage) {
        let client = self.client.clone();
        let subject = self.subject.clone();
        let message = message.clone();

        tokio::spawn(async move {
            match serde_json::to_vec(&message) {
                Ok(payload) => {
                    if let Err(e) = client.publish(subject.clone(), payload.into()).await {
                        warn!(
                            subject = %subject,
                            name = %message.name,
                            "Failed to publish bus message to NATS: {}",
                            e
                        );
                    } else {
                        debug!(subject = %subject, name = %message.name, "Bus message published to NATS");
                    }
                }
                Err(e) => {
                    warn!(name = %message.name, "Failed to serialize bus message for NATS: {}", e);
                }
            }
        });
    }

    async fn listen(&self) -> anyhow::Result<BoxStream<'static, BusMessage>> {
        let subscriber = self
            .client
            .subscribe(self.subject.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to subscribe to NATS {}: {}", self.subject, e))?;
        debug!(subject = %self.subject, "Subscribed to NATS bus subject");

        let stream = subscriber.filter_map(|msg| async move {
            match serde_json::from_slice::<BusMessage>(&msg.payload) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!("Dropping undecodable bus message from NATS: {}", e);
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Connect to a NATS server.
///
/// Returns a connected `async_nats::Client` ready for publishing and subscribing.
pub async fn connect_nats(url: &str) -> anyhow::Result<async_nats::Client> {
    let client = async_nats::connect(url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to NATS at {}: {}", url, e))?;
    tracing::info!("Connected to NATS at {}", url);
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_subject() {
        assert_eq!(bus_subject("inventory", "inventory-console"), "inventory.bus.inventory-console");
    }

    #[test]
    fn test_bus_subject_sanitizes_channel() {
        assert_eq!(bus_subject("inventory.", "IS lab1.409914"), "inventory.bus.IS_lab1_409914");
    }

    #[tokio::test]
    async fn test_connect_unreachable_server_errors() {
        let result = connect_nats("nats://127.0.0.1:1").await;
        assert!(result.is_err());
    }
}
