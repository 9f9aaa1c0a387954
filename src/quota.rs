//! Daily quota gate.
//!
//! Usage is never cached: each check counts today's `success` rows, so a
//! restart cannot lose or double count. The gate is a soft cap. Concurrent
//! dispatchers may overshoot by the number of actions in flight.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{GlobalConfig, QuotaConfig};
use crate::persistence::queue_store::QueueStore;
use crate::Result;

/// Quota usage for one bucket on one local day.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QuotaStatus {
    /// Configured prefix, or the bare action type for unconfigured types.
    pub bucket: String,
    /// Effective limit for the day (after jitter).
    pub limit: u64,
    /// Successful completions counted against the bucket.
    pub current: u64,
    /// `limit - current`, floored at zero.
    pub remaining: u64,
    /// Whether the bucket is exhausted.
    pub exceeded: bool,
}

/// Bucket an action type is counted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// Bucket name.
    pub name: String,
    /// Configured daily limit before jitter.
    pub limit: u32,
    /// Whether `name` is a configured prefix (versus a bare type).
    pub prefix: bool,
}

/// Answers "may this type run today?" from persisted completions.
#[derive(Clone)]
pub struct QuotaGate {
    store: QueueStore,
    config: QuotaConfig,
    utc_offset_seconds: i32,
}

impl QuotaGate {
    /// Create a gate over `store` using the quota section of `config`.
    #[must_use]
    pub fn new(store: QueueStore, config: &GlobalConfig) -> Self {
        Self {
            store,
            config: config.quota.clone(),
            utc_offset_seconds: config.local_offset().local_minus_utc(),
        }
    }

    /// Bucket for `action_type`: the longest configured prefix it starts with,
    /// else the type itself under the default limit.
    #[must_use]
    pub fn bucket_for(&self, action_type: &str) -> Bucket {
        self.config
            .limits
            .iter()
            .filter(|(prefix, _)| action_type.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or_else(
                || Bucket {
                    name: action_type.to_owned(),
                    limit: self.config.default_daily_limit,
                    prefix: false,
                },
                |(prefix, limit)| Bucket {
                    name: prefix.clone(),
                    limit: *limit,
                    prefix: true,
                },
            )
    }

    /// Effective limit of `bucket` on `date`.
    #[must_use]
    pub fn effective_limit(&self, bucket: &Bucket, date: NaiveDate) -> u64 {
        if self.config.jitter {
            jittered_limit(bucket.limit, &bucket.name, date)
        } else {
            u64::from(bucket.limit)
        }
    }

    /// Usage of the bucket `action_type` belongs to on local `date`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the count query fails.
    pub async fn status(&self, action_type: &str, date: NaiveDate) -> Result<QuotaStatus> {
        let bucket = self.bucket_for(action_type);
        self.bucket_status(&bucket, date).await
    }

    async fn bucket_status(&self, bucket: &Bucket, date: NaiveDate) -> Result<QuotaStatus> {
        let (start, end) = self.day_bounds(date);
        let current = if bucket.prefix {
            self.store
                .count_successes_by_prefix(&bucket.name, start, end)
                .await?
        } else {
            self.store
                .count_successes_by_type(&bucket.name, start, end)
                .await?
        };
        let limit = self.effective_limit(bucket, date);

        Ok(QuotaStatus {
            bucket: bucket.name.clone(),
            limit,
            current,
            remaining: limit.saturating_sub(current),
            exceeded: current >= limit,
        })
    }

    /// Whether `action_type` is still under its limit on local `date`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the count query fails.
    pub async fn may_run(&self, action_type: &str, date: NaiveDate) -> Result<bool> {
        let status = self.status(action_type, date).await?;
        debug!(
            action_type,
            bucket = %status.bucket,
            current = status.current,
            limit = status.limit,
            "quota checked"
        );
        Ok(!status.exceeded)
    }

    /// Usage of every configured bucket plus every listed type without one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a count query fails.
    pub async fn report<'a>(
        &self,
        types: impl IntoIterator<Item = &'a str>,
        date: NaiveDate,
    ) -> Result<Vec<QuotaStatus>> {
        let mut buckets: Vec<Bucket> = self
            .config
            .limits
            .iter()
            .map(|(prefix, limit)| Bucket {
                name: prefix.clone(),
                limit: *limit,
                prefix: true,
            })
            .collect();
        for action_type in types {
            let bucket = self.bucket_for(action_type);
            if !bucket.prefix {
                buckets.push(bucket);
            }
        }
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        buckets.dedup_by(|a, b| a.name == b.name);

        let mut statuses = Vec::with_capacity(buckets.len());
        for bucket in &buckets {
            statuses.push(self.bucket_status(bucket, date).await?);
        }
        Ok(statuses)
    }

    /// UTC instant at which local `date` begins.
    #[must_use]
    pub fn day_start(&self, date: NaiveDate) -> DateTime<Utc> {
        let local_midnight = date.and_time(NaiveTime::MIN);
        Utc.from_utc_datetime(
            &(local_midnight - Duration::seconds(i64::from(self.utc_offset_seconds))),
        )
    }

    /// UTC instant at which the local day after `date` begins.
    #[must_use]
    pub fn next_day_start(&self, date: NaiveDate) -> DateTime<Utc> {
        self.day_start(date) + Duration::days(1)
    }

    fn day_bounds(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.day_start(date), self.next_day_start(date))
    }
}

/// Limit scaled to 90–99 %, fixed for one bucket for one day.
///
/// A limit of zero stays zero; any other limit is at least one.
#[must_use]
pub fn jittered_limit(limit: u32, bucket: &str, date: NaiveDate) -> u64 {
    if limit == 0 {
        return 0;
    }
    let digest = Sha256::digest(format!("{date}-{bucket}").as_bytes());
    let mut seed = [0_u8; 8];
    seed.copy_from_slice(&digest[..8]);
    let percent = 90 + u64::from_be_bytes(seed) % 10;
    (u64::from(limit) * percent / 100).max(1)
}
