//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Payload does not match the catalog schema for its action type.
    InvalidPayload(String),
    /// Target prospect is closed; no further actions may be enqueued.
    ProspectClosed(String),
    /// Action is no longer `pending`; another dispatcher claimed it first.
    AlreadyClaimed(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Requested lifecycle transition is not permitted from the current state.
    InvalidTransition(String),
    /// Action type is not registered in the catalog.
    UnknownActionType(String),
    /// Executor failed (composition, transport, or timeout). Retryable.
    Executor(String),
    /// Outbound transport failure.
    Transport(String),
    /// Content generation failure.
    Composition(String),
    /// A reviewer rejected the drafted action.
    ValidationRejected(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether the dispatcher should feed this error into the retry/backoff path.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Executor(_) | Self::Transport(_) | Self::Composition(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::InvalidPayload(msg) => write!(f, "invalid payload: {msg}"),
            Self::ProspectClosed(msg) => write!(f, "prospect closed: {msg}"),
            Self::AlreadyClaimed(msg) => write!(f, "already claimed: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            Self::UnknownActionType(msg) => write!(f, "unknown action type: {msg}"),
            Self::Executor(msg) => write!(f, "executor: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Composition(msg) => write!(f, "composition: {msg}"),
            Self::ValidationRejected(msg) => write!(f, "validation rejected: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Db(format!("json: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
