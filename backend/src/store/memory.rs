// In-process automation store
//
// Holds every table behind one async mutex, so get-or-create and duplicate
// checks are serialized the same way the Postgres constraints serialize them.

use async_trait::async_trait;
use chrono::Utc;
use ekklesia_shared::{
    Automation, ChannelConfig, Conversation, ConversationStatus, Message, NewMessage, Person, PersonTag,
};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AutomationStore, StoreError};
use crate::automations::RunReport;

#[derive(Debug, Default)]
struct Tables {
    automations: HashMap<Uuid, Automation>,
    persons: HashMap<Uuid, Person>,
    channel_configs: HashMap<Uuid, ChannelConfig>,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    person_tags: Vec<PersonTag>,
    runs: Vec<RunReport>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_automation(&self, automation: Automation) {
        self.tables.lock().await.automations.insert(automation.id, automation);
    }

    pub async fn insert_person(&self, person: Person) {
        self.tables.lock().await.persons.insert(person.id, person);
    }

    /// Replaces any channel already configured for the tenant.
    pub async fn insert_channel_config(&self, config: ChannelConfig) {
        self.tables.lock().await.channel_configs.insert(config.tenant_id, config);
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.tables.lock().await.conversations.clone()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.tables.lock().await.messages.clone()
    }

    pub async fn person_tags(&self) -> Vec<PersonTag> {
        self.tables.lock().await.person_tags.clone()
    }

    pub async fn runs(&self) -> Vec<RunReport> {
        self.tables.lock().await.runs.clone()
    }
}

#[async_trait]
impl AutomationStore for MemoryStore {
    async fn fetch_automation(&self, id: Uuid) -> Result<Option<Automation>, StoreError> {
        Ok(self.tables.lock().await.automations.get(&id).cloned())
    }

    async fn fetch_person(&self, id: Uuid) -> Result<Option<Person>, StoreError> {
        Ok(self.tables.lock().await.persons.get(&id).cloned())
    }

    async fn fetch_channel_config(&self, tenant_id: Uuid) -> Result<Option<ChannelConfig>, StoreError> {
        Ok(self.tables.lock().await.channel_configs.get(&tenant_id).cloned())
    }

    async fn find_conversation(
        &self,
        channel_config_id: Uuid,
        recipient_address: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .conversations
            .iter()
            .find(|c| c.channel_config_id == channel_config_id && c.recipient_address == recipient_address)
            .cloned())
    }

    async fn insert_conversation_or_get(
        &self,
        channel_config_id: Uuid,
        recipient_address: &str,
        contact_name: Option<String>,
    ) -> Result<Conversation, StoreError> {
        let mut tables = self.tables.lock().await;

        if let Some(existing) = tables
            .conversations
            .iter()
            .find(|c| c.channel_config_id == channel_config_id && c.recipient_address == recipient_address)
        {
            return Ok(existing.clone());
        }

        let conversation = Conversation {
            id: Uuid::new_v4(),
            channel_config_id,
            recipient_address: recipient_address.to_string(),
            contact_name,
            status: ConversationStatus::Active,
            created_at: Utc::now(),
        };
        tables.conversations.push(conversation.clone());

        Ok(conversation)
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut tables = self.tables.lock().await;

        if !tables.conversations.iter().any(|c| c.id == message.conversation_id) {
            return Err(StoreError::Database(format!(
                "conversation {} does not exist",
                message.conversation_id
            )));
        }

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            direction: message.direction,
            content: message.content,
            message_type: message.message_type,
            is_ai_generated: message.is_ai_generated,
            created_at: Utc::now(),
        };
        tables.messages.push(message.clone());

        Ok(message)
    }

    async fn insert_person_tag(&self, person_id: Uuid, tag_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;

        if tables
            .person_tags
            .iter()
            .any(|t| t.person_id == person_id && t.tag_id == tag_id)
        {
            return Err(StoreError::UniqueViolation("person_tags_pkey".to_string()));
        }

        tables.person_tags.push(PersonTag {
            person_id,
            tag_id: tag_id.to_string(),
            created_at: Utc::now(),
        });

        Ok(())
    }

    async fn record_run(&self, report: &RunReport) -> Result<(), StoreError> {
        self.tables.lock().await.runs.push(report.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
