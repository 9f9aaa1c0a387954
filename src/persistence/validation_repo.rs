//! Validation record repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::models::action::QueuedAction;
use crate::models::validation::{RejectionCategory, ValidationRecord, ValidationStatus};
use crate::{AppError, Result};

use super::db::{fmt_ts, parse_opt_ts, parse_ts, Database};
use super::queue_store::ActionRow;

/// Sort order for the pending-validation listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListOrder {
    /// Oldest held draft first.
    #[default]
    OldestFirst,
    /// Newest held draft first.
    NewestFirst,
}

/// Repository wrapper around `SQLite` for validation records.
#[derive(Clone)]
pub struct ValidationRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ValidationRow {
    action_id: i64,
    status: String,
    draft: String,
    final_content: Option<String>,
    validated_by: Option<String>,
    validated_at: Option<String>,
    feedback: Option<String>,
    rejection_reason: Option<String>,
    rejection_category: Option<String>,
    created_at: String,
}

impl ValidationRow {
    /// Convert a database row into the domain model.
    fn into_record(self) -> Result<ValidationRecord> {
        let rejection_category = self
            .rejection_category
            .as_deref()
            .map(|c| {
                c.parse::<RejectionCategory>()
                    .map_err(|_| AppError::Db(format!("invalid rejection_category: {c}")))
            })
            .transpose()?;

        Ok(ValidationRecord {
            action_id: self.action_id,
            status: parse_validation_status(&self.status)?,
            draft: self.draft,
            final_content: self.final_content,
            validated_by: self.validated_by,
            validated_at: parse_opt_ts("validated_at", self.validated_at.as_deref())?,
            feedback: self.feedback,
            rejection_reason: self.rejection_reason,
            rejection_category,
            created_at: parse_ts("created_at", &self.created_at)?,
        })
    }
}

fn parse_validation_status(s: &str) -> Result<ValidationStatus> {
    match s {
        "awaiting_validation" => Ok(ValidationStatus::AwaitingValidation),
        "approved" => Ok(ValidationStatus::Approved),
        "rejected" => Ok(ValidationStatus::Rejected),
        other => Err(AppError::Db(format!("invalid validation status: {other}"))),
    }
}

/// Store a freshly held draft on `conn`.
///
/// A retried action is held again under the same key, so an existing
/// record is reset to `awaiting_validation` with the new draft.
pub(crate) async fn upsert_awaiting(
    conn: &mut SqliteConnection,
    record: &ValidationRecord,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO validation_record (action_id, status, draft, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(action_id) DO UPDATE SET
             status = excluded.status, draft = excluded.draft,
             final_content = NULL, validated_by = NULL, validated_at = NULL,
             feedback = NULL, rejection_reason = NULL, rejection_category = NULL,
             created_at = excluded.created_at",
    )
    .bind(record.action_id)
    .bind(validation_status_str(ValidationStatus::AwaitingValidation))
    .bind(&record.draft)
    .bind(fmt_ts(record.created_at))
    .execute(conn)
    .await?;

    Ok(())
}

fn validation_status_str(s: ValidationStatus) -> &'static str {
    match s {
        ValidationStatus::AwaitingValidation => "awaiting_validation",
        ValidationStatus::Approved => "approved",
        ValidationStatus::Rejected => "rejected",
    }
}

impl ValidationRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Retrieve the record for an action.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_action_id(&self, action_id: i64) -> Result<Option<ValidationRecord>> {
        let row: Option<ValidationRow> =
            sqlx::query_as("SELECT * FROM validation_record WHERE action_id = ?1")
                .bind(action_id)
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(ValidationRow::into_record).transpose()
    }

    /// Record an approval. Returns `false` if the record was not awaiting.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn approve(
        &self,
        action_id: i64,
        reviewer: &str,
        feedback: Option<&str>,
        final_content: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let outcome = sqlx::query(
            "UPDATE validation_record
             SET status = 'approved', validated_by = ?1, validated_at = ?2,
                 feedback = ?3, final_content = ?4
             WHERE action_id = ?5 AND status = 'awaiting_validation'",
        )
        .bind(reviewer)
        .bind(fmt_ts(at))
        .bind(feedback)
        .bind(final_content)
        .bind(action_id)
        .execute(self.db.as_ref())
        .await?;

        Ok(outcome.rows_affected() == 1)
    }

    /// Record a rejection. Returns `false` if the record was not awaiting.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn reject(
        &self,
        action_id: i64,
        reviewer: &str,
        reason: &str,
        category: Option<RejectionCategory>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let outcome = sqlx::query(
            "UPDATE validation_record
             SET status = 'rejected', validated_by = ?1, validated_at = ?2,
                 rejection_reason = ?3, rejection_category = ?4
             WHERE action_id = ?5 AND status = 'awaiting_validation'",
        )
        .bind(reviewer)
        .bind(fmt_ts(at))
        .bind(reason)
        .bind(category.map(RejectionCategory::as_str))
        .bind(action_id)
        .execute(self.db.as_ref())
        .await?;

        Ok(outcome.rows_affected() == 1)
    }

    /// Held actions with their records, optionally filtered by action type.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a query fails.
    pub async fn list_pending(
        &self,
        action_type: Option<&str>,
        order: ListOrder,
        limit: u32,
    ) -> Result<Vec<(QueuedAction, ValidationRecord)>> {
        let sql = match order {
            ListOrder::OldestFirst => {
                "SELECT v.* FROM validation_record v
                 JOIN queued_action a ON a.id = v.action_id
                 WHERE v.status = 'awaiting_validation' AND a.status = 'awaiting_validation'
                   AND (?1 IS NULL OR a.action_type = ?1)
                 ORDER BY v.created_at ASC, v.action_id ASC LIMIT ?2"
            }
            ListOrder::NewestFirst => {
                "SELECT v.* FROM validation_record v
                 JOIN queued_action a ON a.id = v.action_id
                 WHERE v.status = 'awaiting_validation' AND a.status = 'awaiting_validation'
                   AND (?1 IS NULL OR a.action_type = ?1)
                 ORDER BY v.created_at DESC, v.action_id DESC LIMIT ?2"
            }
        };

        let rows: Vec<ValidationRow> = sqlx::query_as(sql)
            .bind(action_type)
            .bind(i64::from(limit))
            .fetch_all(self.db.as_ref())
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let record = row.into_record()?;
            let action: ActionRow = sqlx::query_as("SELECT * FROM queued_action WHERE id = ?1")
                .bind(record.action_id)
                .fetch_one(self.db.as_ref())
                .await?;
            items.push((action.into_action()?, record));
        }
        Ok(items)
    }
}
