//! Validation record model for human review of drafted actions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppError;

/// Review state of a drafted action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Awaiting a reviewer decision.
    AwaitingValidation,
    /// Reviewer accepted the draft.
    Approved,
    /// Reviewer rejected the draft.
    Rejected,
}

/// Reviewer's classification of a rejection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCategory {
    /// Wrong tone for the prospect.
    Tone,
    /// Bad moment to send.
    Timing,
    /// Factually or stylistically wrong content.
    Content,
    /// Prospect or message not relevant.
    Irrelevant,
    /// Anything else.
    Other,
}

impl RejectionCategory {
    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tone => "tone",
            Self::Timing => "timing",
            Self::Content => "content",
            Self::Irrelevant => "irrelevant",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for RejectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RejectionCategory {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tone" => Ok(Self::Tone),
            "timing" => Ok(Self::Timing),
            "content" => Ok(Self::Content),
            "irrelevant" => Ok(Self::Irrelevant),
            "other" => Ok(Self::Other),
            other => Err(AppError::InvalidPayload(format!(
                "unknown rejection category: {other}"
            ))),
        }
    }
}

/// Decision record keyed 1:1 to a queued action that requires validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ValidationRecord {
    /// Owning queued action.
    pub action_id: i64,
    /// Current review state.
    pub status: ValidationStatus,
    /// Content drafted by the executor.
    pub draft: String,
    /// Content actually approved for delivery, if edited by the reviewer.
    pub final_content: Option<String>,
    /// Reviewer identity; absent while awaiting.
    pub validated_by: Option<String>,
    /// Decision timestamp.
    pub validated_at: Option<DateTime<Utc>>,
    /// Optional reviewer note on approval.
    pub feedback: Option<String>,
    /// Required on rejection.
    pub rejection_reason: Option<String>,
    /// Optional classification of the rejection.
    pub rejection_category: Option<RejectionCategory>,
    /// When the draft was first held.
    pub created_at: DateTime<Utc>,
}

impl ValidationRecord {
    /// Construct a new record awaiting review.
    #[must_use]
    pub fn awaiting(action_id: i64, draft: String) -> Self {
        Self {
            action_id,
            status: ValidationStatus::AwaitingValidation,
            draft,
            final_content: None,
            validated_by: None,
            validated_at: None,
            feedback: None,
            rejection_reason: None,
            rejection_category: None,
            created_at: Utc::now(),
        }
    }

    /// Content that delivery should send.
    #[must_use]
    pub fn content_to_send(&self) -> &str {
        self.final_content.as_deref().unwrap_or(&self.draft)
    }
}
