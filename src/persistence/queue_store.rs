//! Durable queue of outbound actions.
//!
//! Every status change is a conditional `UPDATE … WHERE status = ?` so
//! concurrent dispatchers resolve contention per row: whichever update
//! affects the row wins, the others observe `AlreadyClaimed`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::ActionCatalog;
use crate::config::RetryConfig;
use crate::models::action::{ActionStatus, NewAction, QueuedAction, DEFAULT_PRIORITY};
use crate::models::validation::ValidationRecord;
use crate::{AppError, Result};

use super::db::{fmt_ts, parse_opt_ts, parse_ts, to_u32, Database};
use super::prospect_repo::ProspectRepo;
use super::validation_repo::upsert_awaiting;

/// Result of recording an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Returned to `pending` for another attempt.
    Retrying {
        /// Failures recorded so far.
        retry_count: u32,
        /// Earliest time of the next attempt.
        next_attempt_at: DateTime<Utc>,
    },
    /// Retry budget exhausted; the action is terminally `failed`.
    Exhausted {
        /// Failures recorded, equal to `max_retries`.
        retry_count: u32,
    },
}

/// Repository wrapper around `SQLite` for queued action records.
#[derive(Clone)]
pub struct QueueStore {
    db: Arc<Database>,
    catalog: Arc<ActionCatalog>,
    prospects: ProspectRepo,
    retry: RetryConfig,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
pub(crate) struct ActionRow {
    id: i64,
    action_type: String,
    status: String,
    priority: i64,
    scheduled_at: String,
    account_id: i64,
    prospect_id: Option<i64>,
    payload: String,
    result: Option<String>,
    error: Option<String>,
    retry_count: i64,
    max_retries: i64,
    claimed_by: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl ActionRow {
    /// Convert a database row into the domain model.
    pub(crate) fn into_action(self) -> Result<QueuedAction> {
        let priority = i32::try_from(self.priority)
            .map_err(|_| AppError::Db(format!("invalid priority: {}", self.priority)))?;
        let payload: Value = serde_json::from_str(&self.payload)?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()?;

        Ok(QueuedAction {
            id: self.id,
            action_type: self.action_type,
            status: parse_action_status(&self.status)?,
            priority,
            scheduled_at: parse_ts("scheduled_at", &self.scheduled_at)?,
            account_id: self.account_id,
            prospect_id: self.prospect_id,
            payload,
            result,
            error: self.error,
            retry_count: to_u32("retry_count", self.retry_count)?,
            max_retries: to_u32("max_retries", self.max_retries)?,
            claimed_by: self.claimed_by,
            created_at: parse_ts("created_at", &self.created_at)?,
            started_at: parse_opt_ts("started_at", self.started_at.as_deref())?,
            completed_at: parse_opt_ts("completed_at", self.completed_at.as_deref())?,
        })
    }
}

pub(crate) fn parse_action_status(s: &str) -> Result<ActionStatus> {
    match s {
        "pending" => Ok(ActionStatus::Pending),
        "running" => Ok(ActionStatus::Running),
        "awaiting_validation" => Ok(ActionStatus::AwaitingValidation),
        "success" => Ok(ActionStatus::Success),
        "failed" => Ok(ActionStatus::Failed),
        "cancelled" => Ok(ActionStatus::Cancelled),
        other => Err(AppError::Db(format!("invalid action status: {other}"))),
    }
}

/// Canonical stored name of an action status.
#[must_use]
pub fn action_status_str(s: ActionStatus) -> &'static str {
    match s {
        ActionStatus::Pending => "pending",
        ActionStatus::Running => "running",
        ActionStatus::AwaitingValidation => "awaiting_validation",
        ActionStatus::Success => "success",
        ActionStatus::Failed => "failed",
        ActionStatus::Cancelled => "cancelled",
    }
}

/// Delay before retry number `retry_count + 1`: `base * 2^retry_count`, capped.
#[must_use]
pub fn backoff_delay(retry: &RetryConfig, retry_count: u32) -> Duration {
    let factor = 1_u64.checked_shl(retry_count).unwrap_or(u64::MAX);
    let secs = retry
        .base_backoff_seconds
        .saturating_mul(factor)
        .min(retry.max_backoff_seconds);
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

impl QueueStore {
    /// Create a new store instance.
    #[must_use]
    pub fn new(db: Arc<Database>, catalog: Arc<ActionCatalog>, retry: RetryConfig) -> Self {
        let prospects = ProspectRepo::new(Arc::clone(&db));
        Self {
            db,
            catalog,
            prospects,
            retry,
        }
    }

    /// The catalog this store validates against.
    #[must_use]
    pub fn catalog(&self) -> &Arc<ActionCatalog> {
        &self.catalog
    }

    /// Validate and insert a new `pending` action, returning its id.
    ///
    /// The insert is conditional on the prospect still being open, so a
    /// concurrent closure cannot slip an action past the check.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownActionType` or `AppError::InvalidPayload` if
    /// the catalog rejects the request, `AppError::NotFound` if the prospect
    /// does not exist, and `AppError::ProspectClosed` if it is closed.
    pub async fn enqueue(&self, new: &NewAction) -> Result<i64> {
        self.catalog.validate(new)?;

        if let Some(prospect_id) = new.prospect_id {
            let prospect = self.prospects.require(prospect_id).await?;
            if prospect.is_closed() {
                return Err(AppError::ProspectClosed(format!(
                    "prospect {prospect_id} is closed"
                )));
            }
        }

        let now = Utc::now();
        let scheduled_at = new.scheduled_at.unwrap_or(now);
        let priority = new.priority.unwrap_or(DEFAULT_PRIORITY);
        let max_retries = new.max_retries.unwrap_or(self.retry.default_max_retries);
        let payload = serde_json::to_string(&new.payload)?;

        let result = sqlx::query(
            "INSERT INTO queued_action (action_type, status, priority, scheduled_at,
             account_id, prospect_id, payload, retry_count, max_retries, created_at)
             SELECT ?1, 'pending', ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8
             WHERE ?5 IS NULL OR NOT EXISTS (
                 SELECT 1 FROM prospect
                 WHERE id = ?5 AND (closed_at IS NOT NULL OR status = 'closed')
             )",
        )
        .bind(&new.action_type)
        .bind(priority)
        .bind(fmt_ts(scheduled_at))
        .bind(new.account_id)
        .bind(new.prospect_id)
        .bind(&payload)
        .bind(i64::from(max_retries))
        .bind(fmt_ts(now))
        .execute(self.db.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::ProspectClosed(format!(
                "prospect {} closed during enqueue",
                new.prospect_id.unwrap_or_default()
            )));
        }

        let id = result.last_insert_rowid();
        info!(
            action_id = id,
            action_type = %new.action_type,
            priority,
            scheduled_at = %scheduled_at,
            "action enqueued"
        );
        Ok(id)
    }

    /// Retrieve an action by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<QueuedAction>> {
        let row: Option<ActionRow> = sqlx::query_as("SELECT * FROM queued_action WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(ActionRow::into_action).transpose()
    }

    /// Retrieve an action, failing when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the action does not exist.
    pub async fn require(&self, id: i64) -> Result<QueuedAction> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("action {id} not found")))
    }

    /// Pending actions due at `now`, most urgent first.
    ///
    /// Ordered by priority, then `scheduled_at`, then id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn fetch_due(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<QueuedAction>> {
        let rows: Vec<ActionRow> = sqlx::query_as(
            "SELECT * FROM queued_action
             WHERE status = 'pending' AND scheduled_at <= ?1
             ORDER BY priority ASC, scheduled_at ASC, id ASC
             LIMIT ?2",
        )
        .bind(fmt_ts(now))
        .bind(i64::from(limit))
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(ActionRow::into_action).collect()
    }

    /// Atomically claim a `pending` action for execution.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyClaimed` if the action is no longer pending
    /// and `AppError::NotFound` if it does not exist.
    pub async fn mark_running(&self, id: i64, worker: &str) -> Result<QueuedAction> {
        self.claim(id, ActionStatus::Pending, worker).await
    }

    /// Atomically claim an approved action that is awaiting validation for delivery.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyClaimed` if another reviewer already decided.
    pub async fn claim_for_delivery(&self, id: i64, worker: &str) -> Result<QueuedAction> {
        self.claim(id, ActionStatus::AwaitingValidation, worker).await
    }

    async fn claim(&self, id: i64, from: ActionStatus, worker: &str) -> Result<QueuedAction> {
        let row: Option<ActionRow> = sqlx::query_as(
            "UPDATE queued_action
             SET status = 'running', started_at = ?1, claimed_by = ?2
             WHERE id = ?3 AND status = ?4
             RETURNING *",
        )
        .bind(fmt_ts(Utc::now()))
        .bind(worker)
        .bind(id)
        .bind(action_status_str(from))
        .fetch_optional(self.db.as_ref())
        .await?;

        match row {
            Some(row) => {
                debug!(action_id = id, worker, "action claimed");
                row.into_action()
            }
            None => Err(self.contention_error(id, from).await),
        }
    }

    /// Record a successful execution.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the action is not `running`.
    pub async fn mark_success(&self, id: i64, result: &Value) -> Result<()> {
        let outcome = sqlx::query(
            "UPDATE queued_action
             SET status = 'success', result = ?1, error = NULL, completed_at = ?2
             WHERE id = ?3 AND status = 'running'",
        )
        .bind(serde_json::to_string(result)?)
        .bind(fmt_ts(Utc::now()))
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        if outcome.rows_affected() == 0 {
            return Err(self.contention_error(id, ActionStatus::Running).await);
        }
        info!(action_id = id, "action succeeded");
        Ok(())
    }

    /// Record an execution failure and apply the retry policy.
    ///
    /// While `retry_count + 1 < max_retries` the action returns to `pending`
    /// with `scheduled_at` pushed back by exponential backoff. Otherwise it
    /// becomes terminally `failed`. `retry_count` counts every failure.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the action is not `running`.
    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<FailureOutcome> {
        let current = self.require(id).await?;
        if current.status != ActionStatus::Running {
            return Err(invalid_transition(&current, ActionStatus::Failed));
        }

        let now = Utc::now();
        let retry_count = current.retry_count.saturating_add(1);

        let (query, outcome) = if retry_count < current.max_retries {
            let next_attempt_at = now + backoff_delay(&self.retry, current.retry_count);
            let query = sqlx::query(
                "UPDATE queued_action
                 SET status = 'pending', retry_count = ?1, scheduled_at = ?2, error = ?3,
                     started_at = NULL, claimed_by = NULL
                 WHERE id = ?4 AND status = 'running'",
            )
            .bind(i64::from(retry_count))
            .bind(fmt_ts(next_attempt_at))
            .bind(error)
            .bind(id);
            (
                query,
                FailureOutcome::Retrying {
                    retry_count,
                    next_attempt_at,
                },
            )
        } else {
            let query = sqlx::query(
                "UPDATE queued_action
                 SET status = 'failed', retry_count = ?1, error = ?2, completed_at = ?3
                 WHERE id = ?4 AND status = 'running'",
            )
            .bind(i64::from(retry_count))
            .bind(error)
            .bind(fmt_ts(now))
            .bind(id);
            (query, FailureOutcome::Exhausted { retry_count })
        };

        if query.execute(self.db.as_ref()).await?.rows_affected() == 0 {
            return Err(self.contention_error(id, ActionStatus::Running).await);
        }

        match outcome {
            FailureOutcome::Retrying {
                retry_count,
                next_attempt_at,
            } => warn!(
                action_id = id,
                retry_count,
                max_retries = current.max_retries,
                next_attempt_at = %next_attempt_at,
                error,
                "action failed, retry scheduled"
            ),
            FailureOutcome::Exhausted { retry_count } => warn!(
                action_id = id,
                retry_count,
                error,
                "action failed permanently"
            ),
        }
        Ok(outcome)
    }

    /// Park a `running` action and store its draft for a human decision.
    ///
    /// The status change and the record write commit together; when the
    /// action is no longer `running` nothing is written.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the action is not `running`.
    pub async fn hold_for_validation(&self, record: &ValidationRecord) -> Result<()> {
        let id = record.action_id;
        let mut tx = self.db.begin().await?;

        let outcome = sqlx::query(
            "UPDATE queued_action SET status = 'awaiting_validation', claimed_by = NULL
             WHERE id = ?1 AND status = 'running'",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if outcome.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.contention_error(id, ActionStatus::Running).await);
        }

        upsert_awaiting(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Terminally fail a held action after rejection. Never retried.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyClaimed` if the action is no longer held.
    pub async fn mark_rejected(&self, id: i64, error: &str) -> Result<()> {
        let outcome = sqlx::query(
            "UPDATE queued_action SET status = 'failed', error = ?1, completed_at = ?2
             WHERE id = ?3 AND status = 'awaiting_validation'",
        )
        .bind(error)
        .bind(fmt_ts(Utc::now()))
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        if outcome.rows_affected() == 0 {
            return Err(self
                .contention_error(id, ActionStatus::AwaitingValidation)
                .await);
        }
        Ok(())
    }

    /// Cancel a `pending` action.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the action is not `pending`
    /// and `AppError::NotFound` if it does not exist.
    pub async fn cancel(&self, id: i64) -> Result<()> {
        let outcome = sqlx::query(
            "UPDATE queued_action SET status = 'cancelled', completed_at = ?1
             WHERE id = ?2 AND status = 'pending'",
        )
        .bind(fmt_ts(Utc::now()))
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        if outcome.rows_affected() == 0 {
            let current = self.require(id).await?;
            return Err(invalid_transition(&current, ActionStatus::Cancelled));
        }
        info!(action_id = id, "action cancelled");
        Ok(())
    }

    /// Cancel every `pending` action addressed to a prospect.
    ///
    /// Running and held actions are left alone.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn cancel_pending_for_prospect(&self, prospect_id: i64) -> Result<u64> {
        let outcome = sqlx::query(
            "UPDATE queued_action SET status = 'cancelled', completed_at = ?1
             WHERE prospect_id = ?2 AND status = 'pending'",
        )
        .bind(fmt_ts(Utc::now()))
        .bind(prospect_id)
        .execute(self.db.as_ref())
        .await?;

        Ok(outcome.rows_affected())
    }

    /// Move a `pending` action's `scheduled_at` without consuming a retry.
    ///
    /// Returns `false` if the action was no longer pending.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn defer(&self, id: i64, until: DateTime<Utc>) -> Result<bool> {
        let outcome = sqlx::query(
            "UPDATE queued_action SET scheduled_at = ?1 WHERE id = ?2 AND status = 'pending'",
        )
        .bind(fmt_ts(until))
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(outcome.rows_affected() == 1)
    }

    /// Return actions left `running` by a crashed process to `pending`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let outcome = sqlx::query(
            "UPDATE queued_action SET status = 'pending', started_at = NULL, claimed_by = NULL
             WHERE status = 'running'",
        )
        .execute(self.db.as_ref())
        .await?;

        let recovered = outcome.rows_affected();
        if recovered > 0 {
            warn!(recovered, "interrupted actions returned to pending");
        }
        Ok(recovered)
    }

    /// Successful completions of exactly `action_type` in `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_successes_by_type(
        &self,
        action_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queued_action
             WHERE status = 'success' AND action_type = ?1
               AND completed_at >= ?2 AND completed_at < ?3",
        )
        .bind(action_type)
        .bind(fmt_ts(start))
        .bind(fmt_ts(end))
        .fetch_one(self.db.as_ref())
        .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Successful completions of any type starting with `prefix` in `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_successes_by_prefix(
        &self,
        prefix: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        // substr instead of LIKE: `_` is a LIKE wildcard and common in type names.
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queued_action
             WHERE status = 'success' AND substr(action_type, 1, length(?1)) = ?1
               AND completed_at >= ?2 AND completed_at < ?3",
        )
        .bind(prefix)
        .bind(fmt_ts(start))
        .bind(fmt_ts(end))
        .fetch_one(self.db.as_ref())
        .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Number of actions in each status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_by_status(&self) -> Result<HashMap<ActionStatus, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM queued_action GROUP BY status")
                .fetch_all(self.db.as_ref())
                .await?;

        let mut counts: HashMap<ActionStatus, u64> =
            ActionStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for (status, count) in rows {
            counts.insert(
                parse_action_status(&status)?,
                u64::try_from(count).unwrap_or_default(),
            );
        }
        Ok(counts)
    }

    /// Actions addressed to a prospect, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_prospect(&self, prospect_id: i64) -> Result<Vec<QueuedAction>> {
        let rows: Vec<ActionRow> =
            sqlx::query_as("SELECT * FROM queued_action WHERE prospect_id = ?1 ORDER BY id")
                .bind(prospect_id)
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(ActionRow::into_action).collect()
    }

    /// Translate a failed conditional update into the right error kind.
    async fn contention_error(&self, id: i64, expected: ActionStatus) -> AppError {
        match self.get_by_id(id).await {
            Ok(None) => AppError::NotFound(format!("action {id} not found")),
            Ok(Some(current)) if expected == ActionStatus::Pending
                || expected == ActionStatus::AwaitingValidation =>
            {
                AppError::AlreadyClaimed(format!(
                    "action {id} is {}, expected {}",
                    action_status_str(current.status),
                    action_status_str(expected)
                ))
            }
            Ok(Some(current)) => AppError::InvalidTransition(format!(
                "action {id} is {}, expected {}",
                action_status_str(current.status),
                action_status_str(expected)
            )),
            Err(err) => err,
        }
    }
}

fn invalid_transition(current: &QueuedAction, next: ActionStatus) -> AppError {
    AppError::InvalidTransition(format!(
        "action {} cannot move from {} to {}",
        current.id,
        action_status_str(current.status),
        action_status_str(next)
    ))
}
