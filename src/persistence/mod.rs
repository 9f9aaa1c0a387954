//! Persistence layer modules.

pub mod db;
pub mod message_repo;
pub mod prospect_repo;
pub mod queue_store;
pub mod retention;
pub mod schema;
pub mod validation_repo;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
