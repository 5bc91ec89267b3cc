// Built-in action executors: send a templated message, attach a tag

use async_trait::async_trait;
use ekklesia_shared::{Action, NewMessage, Person, ADD_TAG, SEND_MESSAGE};
use std::sync::Arc;
use tracing::{info, warn};

use super::conversation::ConversationResolver;
use super::executor::{ActionError, ActionExecutor, ActionOutcome, ChannelState, TenantChannelContext};
use super::outbox::{MessageOutbox, OutboundMessage};
use super::template::TemplateRenderer;
use crate::store::{AutomationStore, StoreError};

/// Appends a rendered outbound message to the recipient's conversation.
pub struct SendMessageExecutor {
    store: Arc<dyn AutomationStore>,
    resolver: ConversationResolver,
    renderer: TemplateRenderer,
    outbox: Arc<dyn MessageOutbox>,
}

impl SendMessageExecutor {
    pub fn new(store: Arc<dyn AutomationStore>, outbox: Arc<dyn MessageOutbox>) -> Self {
        Self {
            resolver: ConversationResolver::new(store.clone()),
            store,
            renderer: TemplateRenderer::standard(),
            outbox,
        }
    }

    pub fn with_renderer(mut self, renderer: TemplateRenderer) -> Self {
        self.renderer = renderer;
        self
    }
}

#[async_trait]
impl ActionExecutor for SendMessageExecutor {
    fn kind(&self) -> &'static str {
        SEND_MESSAGE
    }

    async fn execute(
        &self,
        action: &Action,
        person: &Person,
        context: &TenantChannelContext,
    ) -> Result<ActionOutcome, ActionError> {
        let Action::SendMessage(config) = action else {
            return Err(ActionError::UnrecognizedActionType(action.kind().to_string()));
        };

        let channel = match &context.channel {
            ChannelState::Configured(channel) => channel,
            ChannelState::NotConfigured => return Err(ActionError::NoChannelConfigured),
            ChannelState::Unavailable(reason) => {
                return Err(ActionError::Storage(StoreError::Database(reason.clone())));
            }
        };

        let recipient = person
            .recipient_address()
            .ok_or(ActionError::MissingRecipientAddress)?;

        let content = self.renderer.render(&config.message_template, person);
        let conversation = self
            .resolver
            .resolve(channel.id, recipient, person.name.as_deref())
            .await?;

        let message = self
            .store
            .append_message(NewMessage::automated_text(conversation.id, content))
            .await?;

        info!(
            message_id = %message.id,
            conversation_id = %conversation.id,
            "Queued automation message"
        );

        let event = OutboundMessage {
            message_id: message.id,
            conversation_id: conversation.id,
            channel_config_id: channel.id,
            tenant_id: context.tenant_id,
            recipient_address: recipient.to_string(),
        };
        if let Err(e) = self.outbox.publish(&event).await {
            warn!(message_id = %message.id, "Message stored but outbox publish failed: {}", e);
        }

        Ok(ActionOutcome::MessageQueued {
            conversation_id: conversation.id,
            message_id: message.id,
        })
    }
}

/// Links the person to a tag. Re-applying a tag is not an error.
pub struct AddTagExecutor {
    store: Arc<dyn AutomationStore>,
}

impl AddTagExecutor {
    pub fn new(store: Arc<dyn AutomationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ActionExecutor for AddTagExecutor {
    fn kind(&self) -> &'static str {
        ADD_TAG
    }

    async fn execute(
        &self,
        action: &Action,
        person: &Person,
        _context: &TenantChannelContext,
    ) -> Result<ActionOutcome, ActionError> {
        let Action::AddTag(config) = action else {
            return Err(ActionError::UnrecognizedActionType(action.kind().to_string()));
        };

        let tag_id = config
            .tag_id
            .as_deref()
            .map(str::trim)
            .filter(|tag_id| !tag_id.is_empty())
            .ok_or(ActionError::MissingTagReference)?;

        match self.store.insert_person_tag(person.id, tag_id).await {
            Ok(()) => Ok(ActionOutcome::TagApplied {
                tag_id: tag_id.to_string(),
            }),
            Err(StoreError::UniqueViolation(_)) => Ok(ActionOutcome::TagAlreadyApplied {
                tag_id: tag_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
