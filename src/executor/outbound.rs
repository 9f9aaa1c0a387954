//! Shared executor for every outbound message type.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::models::action::QueuedAction;
use crate::models::message::SentMessage;
use crate::models::prospect::ProspectContext;
use crate::persistence::message_repo::{MessageRepo, Recorded};
use crate::persistence::prospect_repo::ProspectRepo;
use crate::{AppError, Result};

use super::{BoxFuture, ContentGenerator, Draft, Executor, Transport};

/// Where an action type gets its message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    /// Always composed by the content generator.
    Compose,
    /// Taken verbatim from a payload string field.
    Payload(&'static str),
    /// Payload field when present and non-empty, composed otherwise.
    PayloadOrCompose(&'static str),
}

/// Composes (or reads) content, sends it, and records the delivery.
pub struct OutboundExecutor {
    source: ContentSource,
    composer: Arc<dyn ContentGenerator>,
    transport: Arc<dyn Transport>,
    prospects: ProspectRepo,
    messages: MessageRepo,
}

impl OutboundExecutor {
    /// Construct an executor for one content source.
    #[must_use]
    pub fn new(
        source: ContentSource,
        composer: Arc<dyn ContentGenerator>,
        transport: Arc<dyn Transport>,
        prospects: ProspectRepo,
        messages: MessageRepo,
    ) -> Self {
        Self {
            source,
            composer,
            transport,
            prospects,
            messages,
        }
    }

    async fn prospect_context(&self, action: &QueuedAction) -> Result<ProspectContext> {
        match action.prospect_id {
            Some(id) => {
                let prospect = self
                    .prospects
                    .get_by_id(id)
                    .await?
                    .ok_or_else(|| AppError::Executor(format!("prospect {id} not found")))?;
                Ok(ProspectContext::from(&prospect))
            }
            None => Ok(ProspectContext::default()),
        }
    }

    async fn compose(&self, action: &QueuedAction) -> Result<String> {
        let context = self.prospect_context(action).await?;
        self.composer.compose(&action.action_type, &context).await
    }

    async fn draft(&self, action: &QueuedAction) -> Result<Draft> {
        let content = match self.source {
            ContentSource::Compose => self.compose(action).await?,
            ContentSource::Payload(field) => payload_text(&action.payload, field)
                .ok_or_else(|| {
                    AppError::Executor(format!("payload field '{field}' missing or empty"))
                })?
                .to_owned(),
            ContentSource::PayloadOrCompose(field) => match payload_text(&action.payload, field) {
                Some(text) => text.to_owned(),
                None => self.compose(action).await?,
            },
        };

        if content.trim().is_empty() {
            return Err(AppError::Composition(format!(
                "empty content for {}",
                action.action_type
            )));
        }
        debug!(action_id = action.id, len = content.len(), "draft prepared");
        Ok(Draft { content })
    }

    async fn send(&self, action: &QueuedAction, draft: &Draft) -> Result<Value> {
        let receipt = self
            .transport
            .send(action.account_id, action.prospect_id, &draft.content)
            .await?;

        if !receipt.success {
            return Err(AppError::Executor(format!(
                "transport rejected message: {}",
                receipt.error.as_deref().unwrap_or("unknown error")
            )));
        }

        let duplicate = if receipt.duplicate {
            true
        } else {
            let message = SentMessage::new(
                action.id,
                action.account_id,
                action.prospect_id,
                receipt.external_message_id.clone(),
                draft.content.clone(),
            );
            self.messages.record(&message).await? == Recorded::Duplicate
        };

        info!(
            action_id = action.id,
            external_message_id = ?receipt.external_message_id,
            duplicate,
            "message delivered"
        );

        Ok(json!({
            "external_message_id": receipt.external_message_id,
            "duplicate": duplicate,
            "content": draft.content,
        }))
    }
}

fn payload_text<'v>(payload: &'v Value, field: &str) -> Option<&'v str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

impl Executor for OutboundExecutor {
    fn prepare<'a>(&'a self, action: &'a QueuedAction) -> BoxFuture<'a, Result<Draft>> {
        Box::pin(self.draft(action))
    }

    fn deliver<'a>(
        &'a self,
        action: &'a QueuedAction,
        draft: &'a Draft,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(self.send(action, draft))
    }
}
