//! Sent message repository; the unique external id is the dedup key.

use std::sync::Arc;

use crate::models::message::SentMessage;
use crate::Result;

use super::db::{fmt_ts, parse_ts, Database};

/// Outcome of recording a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// First record for this external message id.
    New,
    /// A record with the same external message id already exists.
    Duplicate,
}

/// Repository wrapper around `SQLite` for sent message records.
#[derive(Clone)]
pub struct MessageRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    action_id: i64,
    account_id: i64,
    prospect_id: Option<i64>,
    external_message_id: Option<String>,
    content: String,
    sent_at: String,
}

impl MessageRow {
    fn into_message(self) -> Result<SentMessage> {
        Ok(SentMessage {
            id: self.id,
            action_id: self.action_id,
            account_id: self.account_id,
            prospect_id: self.prospect_id,
            external_message_id: self.external_message_id,
            content: self.content,
            sent_at: parse_ts("sent_at", &self.sent_at)?,
        })
    }
}

impl MessageRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a delivery unless its external message id is already known.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn record(&self, message: &SentMessage) -> Result<Recorded> {
        let result = sqlx::query(
            "INSERT INTO sent_message (id, action_id, account_id, prospect_id,
             external_message_id, content, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(external_message_id) DO NOTHING",
        )
        .bind(&message.id)
        .bind(message.action_id)
        .bind(message.account_id)
        .bind(message.prospect_id)
        .bind(&message.external_message_id)
        .bind(&message.content)
        .bind(fmt_ts(message.sent_at))
        .execute(self.db.as_ref())
        .await?;

        Ok(if result.rows_affected() == 0 {
            Recorded::Duplicate
        } else {
            Recorded::New
        })
    }

    /// Look up a delivery by provider id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_external_id(&self, external_id: &str) -> Result<Option<SentMessage>> {
        let row: Option<MessageRow> =
            sqlx::query_as("SELECT * FROM sent_message WHERE external_message_id = ?1")
                .bind(external_id)
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(MessageRow::into_message).transpose()
    }

    /// All deliveries produced by one action, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_action(&self, action_id: i64) -> Result<Vec<SentMessage>> {
        let rows: Vec<MessageRow> =
            sqlx::query_as("SELECT * FROM sent_message WHERE action_id = ?1 ORDER BY sent_at")
                .bind(action_id)
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Total stored deliveries.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sent_message")
            .fetch_one(self.db.as_ref())
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}
