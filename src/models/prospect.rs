//! Prospect model as seen by the queue core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outreach status of a prospect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProspectStatus {
    /// Eligible for outreach.
    Active,
    /// Closed; no new actions may be enqueued.
    Closed,
}

/// Target of outbound messaging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Prospect {
    /// Unique record identifier.
    pub id: i64,
    /// Account that owns the relationship.
    pub account_id: i64,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Current employer.
    pub company: Option<String>,
    /// Current role.
    pub job_title: Option<String>,
    /// Outreach status.
    pub status: ProspectStatus,
    /// Rejected drafts addressed to this prospect.
    pub rejection_count: u32,
    /// Timestamp of the latest rejection.
    pub last_rejection_at: Option<DateTime<Utc>>,
    /// Why the prospect was closed.
    pub closed_reason: Option<String>,
    /// When the prospect was closed.
    pub closed_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Prospect {
    /// Construct a new active prospect. The id is assigned on insert.
    #[must_use]
    pub fn new(account_id: i64, first_name: String, last_name: String) -> Self {
        Self {
            id: 0,
            account_id,
            first_name,
            last_name,
            company: None,
            job_title: None,
            status: ProspectStatus::Active,
            rejection_count: 0,
            last_rejection_at: None,
            closed_reason: None,
            closed_at: None,
            created_at: Utc::now(),
        }
    }

    /// Whether new actions are refused for this prospect.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some() || self.status == ProspectStatus::Closed
    }
}

/// Read-only view handed to content generators.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProspectContext {
    /// Prospect identifier, absent for account-level actions.
    pub prospect_id: Option<i64>,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Current employer.
    pub company: Option<String>,
    /// Current role.
    pub job_title: Option<String>,
}

impl From<&Prospect> for ProspectContext {
    fn from(prospect: &Prospect) -> Self {
        Self {
            prospect_id: Some(prospect.id),
            first_name: prospect.first_name.clone(),
            last_name: prospect.last_name.clone(),
            company: prospect.company.clone(),
            job_title: prospect.job_title.clone(),
        }
    }
}
