// Postgres implementation of the automation store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ekklesia_shared::{Action, Automation, ChannelConfig, Conversation, Message, NewMessage, Person, Trigger};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{AutomationStore, StoreError};
use crate::automations::RunReport;

#[derive(Debug, FromRow)]
struct AutomationRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    trigger_config: serde_json::Value,
    actions: serde_json::Value,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<AutomationRow> for Automation {
    type Error = StoreError;

    fn try_from(row: AutomationRow) -> Result<Self, Self::Error> {
        let trigger: Trigger = serde_json::from_value(row.trigger_config)?;
        let actions: Vec<Action> = serde_json::from_value(row.actions)?;

        Ok(Automation {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            trigger,
            actions,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgAutomationStore {
    db_pool: PgPool,
}

impl PgAutomationStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl AutomationStore for PgAutomationStore {
    async fn fetch_automation(&self, id: Uuid) -> Result<Option<Automation>, StoreError> {
        let row = sqlx::query_as::<_, AutomationRow>(
            r#"
            SELECT id, tenant_id, name, trigger_config, actions, is_active, created_at, updated_at
            FROM automations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await?;

        row.map(Automation::try_from).transpose()
    }

    async fn fetch_person(&self, id: Uuid) -> Result<Option<Person>, StoreError> {
        let person = sqlx::query_as::<_, Person>(
            "SELECT id, tenant_id, name, phone FROM persons WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(person)
    }

    async fn fetch_channel_config(&self, tenant_id: Uuid) -> Result<Option<ChannelConfig>, StoreError> {
        let config = sqlx::query_as::<_, ChannelConfig>(
            r#"
            SELECT id, tenant_id, provider, instance_name, created_at
            FROM channel_configs
            WHERE tenant_id = $1 AND is_active = true
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(config)
    }

    async fn find_conversation(
        &self,
        channel_config_id: Uuid,
        recipient_address: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT id, channel_config_id, recipient_address, contact_name, status, created_at
            FROM conversations
            WHERE channel_config_id = $1 AND recipient_address = $2
            "#,
        )
        .bind(channel_config_id)
        .bind(recipient_address)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(conversation)
    }

    async fn insert_conversation_or_get(
        &self,
        channel_config_id: Uuid,
        recipient_address: &str,
        contact_name: Option<String>,
    ) -> Result<Conversation, StoreError> {
        // The no-op update makes RETURNING yield the existing row on conflict,
        // keeping its original contact_name.
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (id, channel_config_id, recipient_address, contact_name, status, created_at)
            VALUES ($1, $2, $3, $4, 'active', NOW())
            ON CONFLICT (channel_config_id, recipient_address)
            DO UPDATE SET recipient_address = EXCLUDED.recipient_address
            RETURNING id, channel_config_id, recipient_address, contact_name, status, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(channel_config_id)
        .bind(recipient_address)
        .bind(contact_name)
        .fetch_one(&self.db_pool)
        .await?;

        Ok(conversation)
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (id, conversation_id, direction, content, message_type, is_ai_generated)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, conversation_id, direction, content, message_type, is_ai_generated, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message.conversation_id)
        .bind(message.direction)
        .bind(&message.content)
        .bind(message.message_type)
        .bind(message.is_ai_generated)
        .fetch_one(&self.db_pool)
        .await?;

        Ok(message)
    }

    async fn insert_person_tag(&self, person_id: Uuid, tag_id: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO person_tags (person_id, tag_id, created_at) VALUES ($1, $2, NOW())")
            .bind(person_id)
            .bind(tag_id)
            .execute(&self.db_pool)
            .await?;

        Ok(())
    }

    async fn record_run(&self, report: &RunReport) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO automation_runs
            (id, automation_id, person_id, status, abort_reason, entries, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(report.run_id)
        .bind(report.automation_id)
        .bind(report.person_id)
        .bind(report.status.as_str())
        .bind(report.status.abort_reason().map(|reason| reason.as_str()))
        .bind(serde_json::to_value(&report.entries)?)
        .bind(report.started_at)
        .bind(report.finished_at)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.db_pool).await?;
        Ok(())
    }
}
