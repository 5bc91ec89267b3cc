// Automation Execution Engine
//
// Runs a tenant's automation for one person: each configured action executes
// in order, paced apart, with failures recorded per action instead of
// aborting the run.

pub mod actions;
pub mod conversation;
pub mod executor;
pub mod outbox;
pub mod runner;
pub mod template;

pub use actions::{AddTagExecutor, SendMessageExecutor};
pub use conversation::ConversationResolver;
pub use executor::{ActionError, ActionExecutor, ActionOutcome, ChannelState, ExecutorRegistry, TenantChannelContext};
pub use outbox::{BroadcastOutbox, MessageOutbox, OutboundMessage, OutboxError, PgNotifyOutbox};
pub use runner::{
    AbortReason, ActionReport, ActionStatus, AutomationRunner, RunError, RunReport, RunStatus, RunnerSettings,
};
pub use template::TemplateRenderer;
