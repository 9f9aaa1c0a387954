//! Queue status snapshot for operators.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::config::GlobalConfig;
use crate::persistence::queue_store::{action_status_str, QueueStore};
use crate::quota::{QuotaGate, QuotaStatus};
use crate::Result;

/// Aggregate counts plus today's quota usage.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    /// Local calendar day the quotas refer to.
    pub date: NaiveDate,
    /// Number of actions per status, every status present.
    pub counts: BTreeMap<&'static str, u64>,
    /// Usage per quota bucket.
    pub quotas: Vec<QuotaStatus>,
}

impl StatusReport {
    /// Build a report for the local day containing `now`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a query fails.
    pub async fn collect(
        store: &QueueStore,
        quota: &QuotaGate,
        config: &GlobalConfig,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let date = config.local_date(now);
        let counts = store
            .count_by_status()
            .await?
            .into_iter()
            .map(|(status, count)| (action_status_str(status), count))
            .collect();
        let quotas = quota.report(store.catalog().types(), date).await?;

        Ok(Self {
            date,
            counts,
            quotas,
        })
    }
}
