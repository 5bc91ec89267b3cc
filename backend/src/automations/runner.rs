// Automation Runner - ordered, paced execution of one automation for one person

use chrono::{DateTime, Utc};
use ekklesia_shared::{Action, Person};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::executor::{ActionError, ActionOutcome, ChannelState, ExecutorRegistry, TenantChannelContext};
use crate::store::{AutomationStore, StoreError};

pub const DEFAULT_PACING: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Delay between consecutive actions of a run.
    pub pacing: Duration,
    /// Upper bound on a run's wall time, checked between actions.
    pub run_timeout: Option<Duration>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            pacing: DEFAULT_PACING,
            run_timeout: None,
        }
    }
}

/// Errors that stop a run before any action is attempted.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("failed to load automation run: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    TimedOut,
    Cancelled,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// The automation is switched off; nothing ran.
    SkippedInactive,
    Aborted { reason: AbortReason },
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::SkippedInactive => "skipped_inactive",
            Self::Aborted { .. } => "aborted",
        }
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            Self::Aborted { reason } => Some(*reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionStatus {
    Succeeded { outcome: ActionOutcome },
    Failed { code: String, message: String },
    Skipped { reason: String },
    NotAttempted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    pub index: usize,
    pub action_type: String,
    #[serde(flatten)]
    pub status: ActionStatus,
    pub executed_at: Option<DateTime<Utc>>,
    /// Milliseconds since the run started when the action began.
    pub offset_ms: u64,
}

impl ActionReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, ActionStatus::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub automation_id: Uuid,
    pub person_id: Uuid,
    pub status: RunStatus,
    pub entries: Vec<ActionReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    fn start(automation_id: Uuid, person_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            automation_id,
            person_id,
            status: RunStatus::Completed,
            entries: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    fn finish(mut self, status: RunStatus) -> Self {
        self.status = status;
        self.finished_at = Utc::now();
        self
    }

    pub fn failed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.status, ActionStatus::Failed { .. }))
            .count()
    }
}

pub struct AutomationRunner {
    store: Arc<dyn AutomationStore>,
    executors: ExecutorRegistry,
    settings: RunnerSettings,
}

impl AutomationRunner {
    pub fn new(store: Arc<dyn AutomationStore>, executors: ExecutorRegistry, settings: RunnerSettings) -> Self {
        Self {
            store,
            executors,
            settings,
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn executor_kinds(&self) -> Vec<&'static str> {
        self.executors.kinds()
    }

    /// Run without an external cancellation source.
    pub async fn run(&self, automation_id: Uuid, person_id: Uuid) -> Result<RunReport, RunError> {
        self.run_with_cancellation(automation_id, person_id, &CancellationToken::new())
            .await
    }

    /// Executes every action of the automation for the person, in order.
    ///
    /// Per-action failures are recorded in the report and the run moves on.
    /// A missing automation or person, or a storage failure loading them, is
    /// the only error returned. Cancellation and the run timeout are observed
    /// between actions, never in the middle of one.
    #[instrument(skip_all, fields(automation_id = %automation_id, person_id = %person_id))]
    pub async fn run_with_cancellation(
        &self,
        automation_id: Uuid,
        person_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<RunReport, RunError> {
        let started = Instant::now();

        // Snapshot: edits made while the run is paced do not reach it.
        let automation = self
            .store
            .fetch_automation(automation_id)
            .await?
            .ok_or(RunError::NotFound {
                entity: "automation",
                id: automation_id,
            })?;
        let person = self
            .store
            .fetch_person(person_id)
            .await?
            .ok_or(RunError::NotFound {
                entity: "person",
                id: person_id,
            })?;

        let mut report = RunReport::start(automation_id, person_id);

        if !automation.is_active {
            info!("Automation '{}' is inactive, skipping", automation.name);
            return Ok(report.finish(RunStatus::SkippedInactive));
        }

        let context = self.load_context(automation.tenant_id).await;
        let deadline = self.settings.run_timeout.map(|timeout| started + timeout);

        info!(
            "Running automation '{}' ({} actions)",
            automation.name,
            automation.actions.len()
        );

        let mut status = RunStatus::Completed;
        for (index, action) in automation.actions.iter().enumerate() {
            if index > 0 {
                if let Err(reason) = self.pace(deadline, cancel).await {
                    warn!(index, "Automation run aborted: {}", reason.as_str());
                    status = RunStatus::Aborted { reason };
                    report.entries.extend(
                        automation.actions[index..]
                            .iter()
                            .enumerate()
                            .map(|(offset, action)| ActionReport {
                                index: index + offset,
                                action_type: action.kind().to_string(),
                                status: ActionStatus::NotAttempted,
                                executed_at: None,
                                offset_ms: elapsed_ms(started),
                            }),
                    );
                    break;
                }
            }

            let offset_ms = elapsed_ms(started);
            let executed_at = Utc::now();
            let action_status = self.execute_action(index, action, &person, &context).await;

            report.entries.push(ActionReport {
                index,
                action_type: action.kind().to_string(),
                status: action_status,
                executed_at: Some(executed_at),
                offset_ms,
            });
        }

        let report = report.finish(status);

        info!(
            "Automation '{}' finished: {} ({} of {} actions failed)",
            automation.name,
            report.status.as_str(),
            report.failed_count(),
            report.entries.len()
        );

        if let Err(e) = self.store.record_run(&report).await {
            error!(run_id = %report.run_id, "Failed to record automation run: {}", e);
        }

        Ok(report)
    }

    async fn load_context(&self, tenant_id: Uuid) -> TenantChannelContext {
        let channel = match self.store.fetch_channel_config(tenant_id).await {
            Ok(Some(config)) => ChannelState::Configured(config),
            Ok(None) => ChannelState::NotConfigured,
            Err(e) => {
                warn!(tenant_id = %tenant_id, "Channel configuration lookup failed: {}", e);
                ChannelState::Unavailable(e.to_string())
            }
        };

        TenantChannelContext { tenant_id, channel }
    }

    /// Waits out the pacing interval, unless the run is cancelled or the
    /// next action would start past the deadline.
    async fn pace(&self, deadline: Option<Instant>, cancel: &CancellationToken) -> Result<(), AbortReason> {
        let wake_at = Instant::now() + self.settings.pacing;

        if deadline.is_some_and(|deadline| wake_at > deadline) {
            return Err(AbortReason::TimedOut);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AbortReason::Cancelled),
            _ = tokio::time::sleep_until(wake_at) => Ok(()),
        }
    }

    async fn execute_action(
        &self,
        index: usize,
        action: &Action,
        person: &Person,
        context: &TenantChannelContext,
    ) -> ActionStatus {
        if let Action::Invalid { reason, .. } = action {
            let err = ActionError::InvalidActionConfig(reason.clone());
            warn!(index, action_type = action.kind(), "Action failed: {}", err);
            return ActionStatus::Failed {
                code: err.code().to_string(),
                message: err.to_string(),
            };
        }

        let Some(executor) = self.executors.get(action.kind()) else {
            let err = ActionError::UnrecognizedActionType(action.kind().to_string());
            warn!(index, "Skipping action: {}", err);
            return ActionStatus::Skipped {
                reason: err.to_string(),
            };
        };

        let result = AssertUnwindSafe(executor.execute(action, person, context))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(outcome)) => ActionStatus::Succeeded { outcome },
            Ok(Err(err @ ActionError::UnrecognizedActionType(_))) => {
                warn!(index, "Skipping action: {}", err);
                ActionStatus::Skipped {
                    reason: err.to_string(),
                }
            }
            Ok(Err(err)) => {
                warn!(index, action_type = action.kind(), "Action failed: {}", err);
                ActionStatus::Failed {
                    code: err.code().to_string(),
                    message: err.to_string(),
                }
            }
            Err(_) => {
                error!(index, action_type = action.kind(), "Action executor panicked");
                ActionStatus::Failed {
                    code: "executor_panicked".to_string(),
                    message: "action executor panicked".to_string(),
                }
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
