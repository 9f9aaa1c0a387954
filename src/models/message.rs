//! Delivered message record used for deduplication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message accepted by the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SentMessage {
    /// Unique record identifier.
    pub id: String,
    /// Queued action that produced the message.
    pub action_id: i64,
    /// Sending account.
    pub account_id: i64,
    /// Recipient prospect.
    pub prospect_id: Option<i64>,
    /// Provider-assigned id; unique when present.
    pub external_message_id: Option<String>,
    /// Delivered text.
    pub content: String,
    /// Delivery timestamp.
    pub sent_at: DateTime<Utc>,
}

impl SentMessage {
    /// Construct a new record for a delivery.
    #[must_use]
    pub fn new(
        action_id: i64,
        account_id: i64,
        prospect_id: Option<i64>,
        external_message_id: Option<String>,
        content: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action_id,
            account_id,
            prospect_id,
            external_message_id,
            content,
            sent_at: Utc::now(),
        }
    }
}
