//! Prospect repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::prospect::{Prospect, ProspectStatus};
use crate::{AppError, Result};

use super::db::{fmt_ts, parse_opt_ts, parse_ts, to_u32, Database};

/// Repository wrapper around `SQLite` for prospect records.
#[derive(Clone)]
pub struct ProspectRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ProspectRow {
    id: i64,
    account_id: i64,
    first_name: String,
    last_name: String,
    company: Option<String>,
    job_title: Option<String>,
    status: String,
    rejection_count: i64,
    last_rejection_at: Option<String>,
    closed_reason: Option<String>,
    closed_at: Option<String>,
    created_at: String,
}

impl ProspectRow {
    /// Convert a database row into the domain model.
    fn into_prospect(self) -> Result<Prospect> {
        Ok(Prospect {
            id: self.id,
            account_id: self.account_id,
            first_name: self.first_name,
            last_name: self.last_name,
            company: self.company,
            job_title: self.job_title,
            status: parse_prospect_status(&self.status)?,
            rejection_count: to_u32("rejection_count", self.rejection_count)?,
            last_rejection_at: parse_opt_ts("last_rejection_at", self.last_rejection_at.as_deref())?,
            closed_reason: self.closed_reason,
            closed_at: parse_opt_ts("closed_at", self.closed_at.as_deref())?,
            created_at: parse_ts("created_at", &self.created_at)?,
        })
    }
}

fn parse_prospect_status(s: &str) -> Result<ProspectStatus> {
    match s {
        "active" => Ok(ProspectStatus::Active),
        "closed" => Ok(ProspectStatus::Closed),
        other => Err(AppError::Db(format!("invalid prospect status: {other}"))),
    }
}

fn prospect_status_str(s: ProspectStatus) -> &'static str {
    match s {
        ProspectStatus::Active => "active",
        ProspectStatus::Closed => "closed",
    }
}

impl ProspectRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a prospect and return it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, prospect: &Prospect) -> Result<Prospect> {
        let id = sqlx::query(
            "INSERT INTO prospect (account_id, first_name, last_name, company, job_title,
             status, rejection_count, last_rejection_at, closed_reason, closed_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(prospect.account_id)
        .bind(&prospect.first_name)
        .bind(&prospect.last_name)
        .bind(&prospect.company)
        .bind(&prospect.job_title)
        .bind(prospect_status_str(prospect.status))
        .bind(i64::from(prospect.rejection_count))
        .bind(prospect.last_rejection_at.map(fmt_ts))
        .bind(&prospect.closed_reason)
        .bind(prospect.closed_at.map(fmt_ts))
        .bind(fmt_ts(prospect.created_at))
        .execute(self.db.as_ref())
        .await?
        .last_insert_rowid();

        let mut created = prospect.clone();
        created.id = id;
        Ok(created)
    }

    /// Retrieve a prospect by identifier.
    ///
    /// Returns `Ok(None)` if the prospect does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Prospect>> {
        let row: Option<ProspectRow> = sqlx::query_as("SELECT * FROM prospect WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(ProspectRow::into_prospect).transpose()
    }

    /// Retrieve a prospect, failing when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the prospect does not exist.
    pub async fn require(&self, id: i64) -> Result<Prospect> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("prospect {id} not found")))
    }

    /// Increment the rejection counter and return the new count.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the prospect does not exist.
    pub async fn record_rejection(&self, id: i64, at: DateTime<Utc>) -> Result<u32> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE prospect SET rejection_count = rejection_count + 1, last_rejection_at = ?1
             WHERE id = ?2 RETURNING rejection_count",
        )
        .bind(fmt_ts(at))
        .bind(id)
        .fetch_optional(self.db.as_ref())
        .await?;

        let count = count.ok_or_else(|| AppError::NotFound(format!("prospect {id} not found")))?;
        to_u32("rejection_count", count)
    }

    /// Close a prospect. Returns `false` if it was already closed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn close(&self, id: i64, reason: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE prospect SET status = 'closed', closed_reason = ?1, closed_at = ?2
             WHERE id = ?3 AND closed_at IS NULL",
        )
        .bind(reason)
        .bind(fmt_ts(at))
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
