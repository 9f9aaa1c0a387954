//! Retention service for time-based data purge.
//!
//! Runs as a background task deleting validation records first, then
//! terminal actions (`success`, `failed`, `cancelled`) completed more than
//! `retention_days` ago. Sent messages are kept: they are the dedup ledger.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::db::{fmt_ts, Database};
use crate::Result;

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the retention purge background task.
///
/// The task runs hourly until `cancel` fires.
#[must_use]
pub fn spawn_retention_task(
    db: Arc<Database>,
    retention_days: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = purge(&db, retention_days).await {
                        error!(?err, "retention purge failed");
                    }
                }
            }
        }
    })
}

/// Delete terminal actions older than `retention_days`. Returns the number purged.
///
/// # Errors
///
/// Returns `AppError::Db` if a delete fails.
pub async fn purge(db: &Database, retention_days: u32) -> Result<u64> {
    let cutoff = fmt_ts(Utc::now() - chrono::Duration::days(i64::from(retention_days)));
    let mut tx = db.begin().await?;

    sqlx::query(
        "DELETE FROM validation_record WHERE action_id IN (
             SELECT id FROM queued_action
             WHERE status IN ('success','failed','cancelled') AND completed_at < ?1
         )",
    )
    .bind(&cutoff)
    .execute(&mut *tx)
    .await?;

    let purged = sqlx::query(
        "DELETE FROM queued_action
         WHERE status IN ('success','failed','cancelled') AND completed_at < ?1",
    )
    .bind(&cutoff)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;

    info!(retention_days, purged, "retention purge completed");
    Ok(purged)
}
