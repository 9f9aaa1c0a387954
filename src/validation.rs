//! Human-in-the-loop validation gate.
//!
//! Drafts of validation-required types are parked in `awaiting_validation`.
//! Approval and rejection both start with a conditional update of the
//! queued action, so two reviewers deciding at once cannot both win and a
//! draft is delivered at most once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, info_span, warn, Instrument};

use crate::executor::{bounded, Draft};
use crate::models::action::QueuedAction;
use crate::models::validation::{RejectionCategory, ValidationRecord};
use crate::persistence::db::Database;
use crate::persistence::prospect_repo::ProspectRepo;
use crate::persistence::queue_store::{FailureOutcome, QueueStore};
use crate::persistence::validation_repo::{ListOrder, ValidationRepo};
use crate::{AppError, Result};

/// Reason prefix written to prospects closed by repeated rejections.
pub const CLOSED_BY_REJECTIONS: &str = "too_many_rejections";

/// Result of approving a held draft.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApprovalOutcome {
    /// Draft delivered and the action marked `success`.
    Delivered {
        /// Executor result stored on the action.
        result: Value,
    },
    /// Delivery failed; the retry policy was applied.
    DeliveryFailed {
        /// Failure message.
        error: String,
        /// Whether the action will be retried.
        retrying: bool,
    },
}

/// Result of rejecting a held draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectOutcome {
    /// Prospect rejection count after this rejection.
    pub rejection_count: Option<u32>,
    /// Whether this rejection closed the prospect.
    pub prospect_closed: bool,
    /// Pending actions cancelled by the closure.
    pub cancelled: u64,
}

/// Owns validation records and the prospect rejection/closure fields.
#[derive(Clone)]
pub struct ValidationGate {
    store: QueueStore,
    records: ValidationRepo,
    prospects: ProspectRepo,
    rejection_threshold: u32,
    executor_timeout: Duration,
    reviewer_worker: String,
}

impl ValidationGate {
    /// Create a gate over the shared store.
    #[must_use]
    pub fn new(
        db: Arc<Database>,
        store: QueueStore,
        rejection_threshold: u32,
        executor_timeout: Duration,
    ) -> Self {
        Self {
            store,
            records: ValidationRepo::new(Arc::clone(&db)),
            prospects: ProspectRepo::new(db),
            rejection_threshold,
            executor_timeout,
            reviewer_worker: format!("review-{}", uuid::Uuid::new_v4()),
        }
    }

    /// Park a `running` action with its draft until a human decides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the action is not `running`.
    pub async fn hold(&self, action: &QueuedAction, draft: &Draft) -> Result<()> {
        self.store
            .hold_for_validation(&ValidationRecord::awaiting(
                action.id,
                draft.content.clone(),
            ))
            .await?;
        info!(
            action_id = action.id,
            action_type = %action.action_type,
            "draft held for validation"
        );
        Ok(())
    }

    /// Approve a held draft and deliver it.
    ///
    /// `modified_content` replaces the draft when non-empty. Delivery
    /// failures go through the normal retry policy; a retried action is
    /// drafted and held again on its next attempt.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyClaimed` if the action was already decided,
    /// `AppError::NotFound` if it does not exist, and `AppError::Db` on
    /// persistence failures.
    pub async fn approve(
        &self,
        action_id: i64,
        reviewer: &str,
        feedback: Option<&str>,
        modified_content: Option<&str>,
    ) -> Result<ApprovalOutcome> {
        let record = self
            .records
            .get_by_action_id(action_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("no validation record for action {action_id}"))
            })?;

        let action = self
            .store
            .claim_for_delivery(action_id, &self.reviewer_worker)
            .await?;

        let final_content = modified_content.filter(|c| !c.trim().is_empty());
        if !self
            .records
            .approve(action_id, reviewer, feedback, final_content, Utc::now())
            .await?
        {
            warn!(action_id, "validation record was not awaiting at approval");
        }

        let draft = Draft {
            content: final_content.unwrap_or(&record.draft).to_owned(),
        };
        info!(action_id, reviewer, edited = final_content.is_some(), "draft approved");

        let spec = self.store.catalog().require(&action.action_type)?;
        let delivered = bounded(
            "deliver",
            self.executor_timeout,
            spec.executor.deliver(&action, &draft),
        )
        .instrument(info_span!("deliver", action_id))
        .await;

        match delivered {
            Ok(result) => {
                self.store.mark_success(action_id, &result).await?;
                Ok(ApprovalOutcome::Delivered { result })
            }
            Err(err) => {
                let error = err.to_string();
                let failure = self.store.mark_failed(action_id, &error).await?;
                Ok(ApprovalOutcome::DeliveryFailed {
                    error,
                    retrying: matches!(failure, FailureOutcome::Retrying { .. }),
                })
            }
        }
    }

    /// Reject a held draft. Terminal: the action is failed and never retried.
    ///
    /// Increments the prospect's rejection count; reaching the configured
    /// threshold closes the prospect and cancels its other pending actions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidPayload` for an empty reason,
    /// `AppError::AlreadyClaimed` if the action was already decided, and
    /// `AppError::NotFound` if it does not exist.
    pub async fn reject(
        &self,
        action_id: i64,
        reviewer: &str,
        reason: &str,
        category: RejectionCategory,
    ) -> Result<RejectOutcome> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::InvalidPayload(
                "rejection reason is required".into(),
            ));
        }

        let error = AppError::ValidationRejected(format!("{category}: {reason}")).to_string();
        self.store.mark_rejected(action_id, &error).await?;

        let now = Utc::now();
        if !self
            .records
            .reject(action_id, reviewer, reason, Some(category), now)
            .await?
        {
            warn!(action_id, "validation record was not awaiting at rejection");
        }

        let action = self.store.require(action_id).await?;
        let mut outcome = RejectOutcome {
            rejection_count: None,
            prospect_closed: false,
            cancelled: 0,
        };

        if let Some(prospect_id) = action.prospect_id {
            let count = self.prospects.record_rejection(prospect_id, now).await?;
            outcome.rejection_count = Some(count);

            if count >= self.rejection_threshold {
                let summary = format!("{CLOSED_BY_REJECTIONS}: {count} rejections, last: {reason}");
                if self.prospects.close(prospect_id, &summary, now).await? {
                    outcome.prospect_closed = true;
                    outcome.cancelled = self.store.cancel_pending_for_prospect(prospect_id).await?;
                    warn!(
                        prospect_id,
                        rejection_count = count,
                        cancelled = outcome.cancelled,
                        "prospect closed after repeated rejections"
                    );
                }
            }
        }

        info!(action_id, reviewer, %category, "draft rejected");
        Ok(outcome)
    }

    /// Held drafts awaiting a decision.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_pending(
        &self,
        action_type: Option<&str>,
        order: ListOrder,
        limit: u32,
    ) -> Result<Vec<(QueuedAction, ValidationRecord)>> {
        self.records.list_pending(action_type, order, limit).await
    }

    /// Validation record for an action, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn record(&self, action_id: i64) -> Result<Option<ValidationRecord>> {
        self.records.get_by_action_id(action_id).await
    }
}
