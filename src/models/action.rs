//! Queued action model and lifecycle rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Priority assigned when the caller does not supply one. Lower runs first.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Lifecycle status for a queued action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Waiting for its `scheduled_at` and a dispatcher claim.
    Pending,
    /// Claimed by a dispatcher; executor in flight.
    Running,
    /// Draft produced and held for a human decision.
    AwaitingValidation,
    /// Executed (and approved, where required).
    Success,
    /// Terminal failure: retries exhausted or draft rejected.
    Failed,
    /// Cancelled while pending.
    Cancelled,
}

impl ActionStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Running,
        Self::AwaitingValidation,
        Self::Success,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled)
                | (
                    Self::Running,
                    Self::Success | Self::Failed | Self::Pending | Self::AwaitingValidation
                )
                | (Self::AwaitingValidation, Self::Running | Self::Failed)
        )
    }
}

/// A unit of deferred outbound work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct QueuedAction {
    /// Unique, insertion-ordered identifier.
    pub id: i64,
    /// Catalog name of the executor to run.
    pub action_type: String,
    /// Current lifecycle status.
    pub status: ActionStatus,
    /// Lower is more urgent.
    pub priority: i32,
    /// Not eligible for execution before this instant.
    pub scheduled_at: DateTime<Utc>,
    /// Sending account.
    pub account_id: i64,
    /// Target prospect; absent for account-level tasks.
    pub prospect_id: Option<i64>,
    /// Executor-specific input document.
    pub payload: Value,
    /// Executor output, set on success.
    pub result: Option<Value>,
    /// Last failure message, set on terminal failure.
    pub error: Option<String>,
    /// Failures recorded so far.
    pub retry_count: u32,
    /// Failures allowed before the action is terminally failed.
    pub max_retries: u32,
    /// Dispatcher instance holding the current claim.
    pub claimed_by: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set when claimed for execution.
    pub started_at: Option<DateTime<Utc>>,
    /// Set on reaching a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueuedAction {
    /// Whether the action can run at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ActionStatus::Pending && self.scheduled_at <= now
    }
}

/// Caller-supplied fields for a new queued action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct NewAction {
    /// Catalog action type.
    pub action_type: String,
    /// Sending account.
    pub account_id: i64,
    /// Target prospect.
    pub prospect_id: Option<i64>,
    /// Executor input document.
    pub payload: Value,
    /// Defaults to [`DEFAULT_PRIORITY`].
    pub priority: Option<i32>,
    /// Defaults to now.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Defaults to the configured retry budget.
    pub max_retries: Option<u32>,
}

impl NewAction {
    /// Construct a request with default priority, schedule, and retry budget.
    #[must_use]
    pub fn new(
        action_type: impl Into<String>,
        account_id: i64,
        prospect_id: Option<i64>,
        payload: Value,
    ) -> Self {
        Self {
            action_type: action_type.into(),
            account_id,
            prospect_id,
            payload,
            priority: None,
            scheduled_at: None,
            max_retries: None,
        }
    }

    /// Override the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Defer execution until `at`.
    #[must_use]
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Override the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}
