// Outbound message boundary
//
// Persisting an outbound message is the engine's whole contract; the bridge
// that talks to the messaging provider picks messages up from here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Announces a newly persisted outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub channel_config_id: Uuid,
    pub tenant_id: Uuid,
    pub recipient_address: String,
}

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("failed to encode outbound event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to publish outbound event: {0}")]
    Publish(String),
}

#[async_trait]
pub trait MessageOutbox: Send + Sync {
    async fn publish(&self, event: &OutboundMessage) -> Result<(), OutboxError>;
}

/// Publishes through Postgres `NOTIFY` for the delivery bridge's `LISTEN`.
#[derive(Clone)]
pub struct PgNotifyOutbox {
    db_pool: PgPool,
    channel: String,
}

impl PgNotifyOutbox {
    pub fn new(db_pool: PgPool, channel: &str) -> Self {
        Self {
            db_pool,
            channel: channel.to_string(),
        }
    }
}

#[async_trait]
impl MessageOutbox for PgNotifyOutbox {
    async fn publish(&self, event: &OutboundMessage) -> Result<(), OutboxError> {
        let payload = serde_json::to_string(event)?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(payload)
            .execute(&self.db_pool)
            .await
            .map_err(|e| OutboxError::Publish(e.to_string()))?;

        Ok(())
    }
}

/// In-process fan-out to any number of subscribers.
#[derive(Clone)]
pub struct BroadcastOutbox {
    sender: broadcast::Sender<OutboundMessage>,
}

impl BroadcastOutbox {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl MessageOutbox for BroadcastOutbox {
    async fn publish(&self, event: &OutboundMessage) -> Result<(), OutboxError> {
        // No subscribers is fine: the message row is already durable.
        if self.sender.send(event.clone()).is_err() {
            tracing::debug!(message_id = %event.message_id, "No outbox subscribers");
        }
        Ok(())
    }
}
