//! Persistence seam for the automation engine.
//!
//! The engine reads automations, people and channel configuration, and writes
//! conversations, messages, person tags and run history. Everything goes
//! through [`AutomationStore`] so the runner can be driven against Postgres in
//! production and an in-process store in tests.

use async_trait::async_trait;
use ekklesia_shared::{Automation, ChannelConfig, Conversation, Message, NewMessage, Person};
use thiserror::Error;
use uuid::Uuid;

use crate::automations::RunReport;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgAutomationStore;

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("stored record is malformed: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                return Self::UniqueViolation(constraint);
            }
        }
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AutomationStore: Send + Sync {
    async fn fetch_automation(&self, id: Uuid) -> Result<Option<Automation>, StoreError>;

    async fn fetch_person(&self, id: Uuid) -> Result<Option<Person>, StoreError>;

    /// The messaging channel the tenant sends through, if one is set up.
    async fn fetch_channel_config(&self, tenant_id: Uuid) -> Result<Option<ChannelConfig>, StoreError>;

    async fn find_conversation(
        &self,
        channel_config_id: Uuid,
        recipient_address: &str,
    ) -> Result<Option<Conversation>, StoreError>;

    /// Insert a conversation for the key, or return the one already holding it.
    ///
    /// Must be atomic with respect to concurrent callers using the same key:
    /// every caller gets the same row and exactly one row exists afterwards.
    async fn insert_conversation_or_get(
        &self,
        channel_config_id: Uuid,
        recipient_address: &str,
        contact_name: Option<String>,
    ) -> Result<Conversation, StoreError>;

    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Plain insert. A second insert of the same pair fails with
    /// [`StoreError::UniqueViolation`].
    async fn insert_person_tag(&self, person_id: Uuid, tag_id: &str) -> Result<(), StoreError>;

    async fn record_run(&self, report: &RunReport) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
