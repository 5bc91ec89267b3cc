// Conversation Resolver - get-or-create of the thread a recipient is messaged in

use ekklesia_shared::Conversation;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::store::{AutomationStore, StoreError};

#[derive(Clone)]
pub struct ConversationResolver {
    store: Arc<dyn AutomationStore>,
}

impl ConversationResolver {
    pub fn new(store: Arc<dyn AutomationStore>) -> Self {
        Self { store }
    }

    /// Returns the conversation for `(channel_config_id, recipient_address)`,
    /// creating an active one named `display_name` if none exists.
    ///
    /// Creation goes through the store's atomic insert-or-get, so callers
    /// racing on the same recipient all end up with the same conversation.
    pub async fn resolve(
        &self,
        channel_config_id: Uuid,
        recipient_address: &str,
        display_name: Option<&str>,
    ) -> Result<Conversation, StoreError> {
        if let Some(existing) = self
            .store
            .find_conversation(channel_config_id, recipient_address)
            .await?
        {
            return Ok(existing);
        }

        let conversation = self
            .store
            .insert_conversation_or_get(
                channel_config_id,
                recipient_address,
                display_name.map(str::to_string),
            )
            .await?;

        debug!(
            conversation_id = %conversation.id,
            channel_config_id = %channel_config_id,
            "Resolved conversation for new recipient"
        );

        Ok(conversation)
    }
}
