//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` and are safe to
//! re-run on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS queued_action (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    action_type     TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('pending','running','awaiting_validation','success','failed','cancelled')),
    priority        INTEGER NOT NULL DEFAULT 5,
    scheduled_at    TEXT NOT NULL,
    account_id      INTEGER NOT NULL,
    prospect_id     INTEGER,
    payload         TEXT NOT NULL,
    result          TEXT,
    error           TEXT,
    retry_count     INTEGER NOT NULL DEFAULT 0,
    max_retries     INTEGER NOT NULL DEFAULT 3,
    claimed_by      TEXT,
    created_at      TEXT NOT NULL,
    started_at      TEXT,
    completed_at    TEXT,
    CHECK(status != 'running' OR (started_at IS NOT NULL AND completed_at IS NULL))
);

CREATE TABLE IF NOT EXISTS validation_record (
    action_id           INTEGER PRIMARY KEY NOT NULL,
    status              TEXT NOT NULL CHECK(status IN ('awaiting_validation','approved','rejected')),
    draft               TEXT NOT NULL,
    final_content       TEXT,
    validated_by        TEXT,
    validated_at        TEXT,
    feedback            TEXT,
    rejection_reason    TEXT,
    rejection_category  TEXT CHECK(rejection_category IS NULL OR rejection_category IN ('tone','timing','content','irrelevant','other')),
    created_at          TEXT NOT NULL,
    CHECK(status != 'rejected' OR rejection_reason IS NOT NULL)
);

CREATE TABLE IF NOT EXISTS prospect (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id          INTEGER NOT NULL,
    first_name          TEXT NOT NULL,
    last_name           TEXT NOT NULL,
    company             TEXT,
    job_title           TEXT,
    status              TEXT NOT NULL CHECK(status IN ('active','closed')),
    rejection_count     INTEGER NOT NULL DEFAULT 0,
    last_rejection_at   TEXT,
    closed_reason       TEXT,
    closed_at           TEXT,
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sent_message (
    id                  TEXT PRIMARY KEY NOT NULL,
    action_id           INTEGER NOT NULL,
    account_id          INTEGER NOT NULL,
    prospect_id         INTEGER,
    external_message_id TEXT UNIQUE,
    content             TEXT NOT NULL,
    sent_at             TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_action_due ON queued_action(status, priority, scheduled_at, id);
CREATE INDEX IF NOT EXISTS idx_action_prospect ON queued_action(prospect_id, status);
CREATE INDEX IF NOT EXISTS idx_action_completed ON queued_action(status, completed_at);
CREATE INDEX IF NOT EXISTS idx_validation_status ON validation_record(status, created_at);
CREATE INDEX IF NOT EXISTS idx_message_action ON sent_message(action_id);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
