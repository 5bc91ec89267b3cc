// Action Executors - the contract every action kind implements, and the
// registry the runner dispatches through

use async_trait::async_trait;
use ekklesia_shared::{Action, ChannelConfig, Person};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::actions::{AddTagExecutor, SendMessageExecutor};
use super::outbox::MessageOutbox;
use crate::store::{AutomationStore, StoreError};

/// What the runner knows about the tenant's messaging channel for this run.
#[derive(Debug, Clone)]
pub enum ChannelState {
    Configured(ChannelConfig),
    NotConfigured,
    /// The lookup itself failed; message actions fail with a storage error.
    Unavailable(String),
}

/// Tenant-scoped context handed to every executor.
///
/// Loaded once when a run starts, so every action in the run sees the same
/// channel configuration.
#[derive(Debug, Clone)]
pub struct TenantChannelContext {
    pub tenant_id: Uuid,
    pub channel: ChannelState,
}

impl TenantChannelContext {
    pub fn configured(tenant_id: Uuid, channel: ChannelConfig) -> Self {
        Self {
            tenant_id,
            channel: ChannelState::Configured(channel),
        }
    }

    pub fn not_configured(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            channel: ChannelState::NotConfigured,
        }
    }
}

/// Effect produced by a successful action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum ActionOutcome {
    MessageQueued { conversation_id: Uuid, message_id: Uuid },
    TagApplied { tag_id: String },
    TagAlreadyApplied { tag_id: String },
}

/// Failure of a single action. Never fatal to the run.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("tenant has no messaging channel configured")]
    NoChannelConfigured,
    #[error("person has no phone number to send to")]
    MissingRecipientAddress,
    #[error("tag action has no tag_id")]
    MissingTagReference,
    #[error("unrecognized action type '{0}'")]
    UnrecognizedActionType(String),
    #[error("action configuration is invalid: {0}")]
    InvalidActionConfig(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ActionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoChannelConfigured => "no_channel_configured",
            Self::MissingRecipientAddress => "missing_recipient_address",
            Self::MissingTagReference => "missing_tag_reference",
            Self::UnrecognizedActionType(_) => "unrecognized_action_type",
            Self::InvalidActionConfig(_) => "invalid_action_config",
            Self::Storage(_) => "storage_error",
        }
    }
}

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// The action `type` this executor handles.
    fn kind(&self) -> &'static str;

    async fn execute(
        &self,
        action: &Action,
        person: &Person,
        context: &TenantChannelContext,
    ) -> Result<ActionOutcome, ActionError>;
}

/// Executors keyed by action type.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<&'static str, Arc<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send-message and add-tag, backed by the given store and outbox.
    pub fn standard(store: Arc<dyn AutomationStore>, outbox: Arc<dyn MessageOutbox>) -> Self {
        Self::new()
            .register(Arc::new(SendMessageExecutor::new(store.clone(), outbox)))
            .register(Arc::new(AddTagExecutor::new(store)))
    }

    /// Adds an executor, replacing any earlier one for the same kind.
    pub fn register(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executors.insert(executor.kind(), executor);
        self
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn ActionExecutor>> {
        self.executors.get(kind)
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.executors.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry").field("kinds", &self.kinds()).finish()
    }
}
