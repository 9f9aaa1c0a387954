//! Executor abstraction and the collaborators executors depend on.
//!
//! Execution is split in two phases so that validation-gated actions can
//! be reviewed before anything leaves the system:
//!
//! 1. [`Executor::prepare`] drafts the outbound content.
//! 2. [`Executor::deliver`] sends a (possibly reviewer-edited) draft.
//!
//! The dispatcher loop, the immediate-execution path, and the approval
//! path all go through these two calls, so send logic lives in one place.

pub mod http_transport;
pub mod outbound;
pub mod template;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::action::QueuedAction;
use crate::models::prospect::ProspectContext;
use crate::{AppError, Result};

/// Boxed future returned by the object-safe async traits in this module.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Content produced by [`Executor::prepare`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Draft {
    /// Text to deliver.
    pub content: String,
}

/// Per-action-type execution capability registered in the catalog.
pub trait Executor: Send + Sync {
    /// Produce the content the action would send.
    ///
    /// # Errors
    ///
    /// Returns a retryable error if composition fails.
    fn prepare<'a>(&'a self, action: &'a QueuedAction) -> BoxFuture<'a, Result<Draft>>;

    /// Send `draft` and return a normalized result document.
    ///
    /// # Errors
    ///
    /// Returns a retryable error if the transport fails.
    fn deliver<'a>(
        &'a self,
        action: &'a QueuedAction,
        draft: &'a Draft,
    ) -> BoxFuture<'a, Result<Value>>;
}

/// External content-generation collaborator.
pub trait ContentGenerator: Send + Sync {
    /// Compose message text for `action_type` addressed to `prospect`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Composition` on failure.
    fn compose<'a>(
        &'a self,
        action_type: &'a str,
        prospect: &'a ProspectContext,
    ) -> BoxFuture<'a, Result<String>>;
}

/// Transport's answer to a send request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendReceipt {
    /// Provider-assigned message id.
    pub external_message_id: Option<String>,
    /// Whether the provider accepted the message.
    pub success: bool,
    /// Provider recognized the message as already sent.
    #[serde(default)]
    pub duplicate: bool,
    /// Provider error description when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
}

impl SendReceipt {
    /// Accepted message with a provider id.
    #[must_use]
    pub fn accepted(external_message_id: impl Into<String>) -> Self {
        Self {
            external_message_id: Some(external_message_id.into()),
            success: true,
            duplicate: false,
            error: None,
        }
    }
}

/// External outbound transport collaborator.
pub trait Transport: Send + Sync {
    /// Send `content` from `account_id` to `prospect_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the provider cannot be reached.
    fn send<'a>(
        &'a self,
        account_id: i64,
        prospect_id: Option<i64>,
        content: &'a str,
    ) -> BoxFuture<'a, Result<SendReceipt>>;
}

/// Await one executor phase, folding every failure into a retryable one.
///
/// An elapsed deadline and any error kind the phase returns (a storage
/// error inside an executor, say) become `AppError::Executor`, so the
/// caller always routes the action through the retry path instead of
/// leaving it `running`.
///
/// # Errors
///
/// Returns a retryable error when the phase fails or times out.
pub async fn bounded<T>(
    phase: &str,
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) if err.is_retryable() => Err(err),
        Ok(Err(err)) => Err(AppError::Executor(format!("{phase} failed: {err}"))),
        Err(_) => Err(AppError::Executor(format!(
            "{phase} timed out after {}s",
            timeout.as_secs()
        ))),
    }
}
