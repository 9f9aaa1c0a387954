//! Dispatcher control loop and the immediate-execution path.
//!
//! Both paths funnel through [`Dispatcher::execute`], so an action is
//! drafted, gated, delivered, and finalized the same way whether it was
//! picked up by the loop or run at creation time by its trigger.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::executor::bounded;
use crate::models::action::QueuedAction;
use crate::persistence::queue_store::{FailureOutcome, QueueStore};
use crate::quota::QuotaGate;
use crate::validation::ValidationGate;
use crate::{AppError, Result};

/// What happened to one action handed to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatched {
    /// Delivered and marked `success`.
    Succeeded,
    /// Drafted and held for validation.
    Held,
    /// Failed; returned to `pending` with backoff.
    Retrying,
    /// Failed with the retry budget exhausted.
    Failed,
    /// Daily quota reached; left `pending`.
    QuotaSkipped,
    /// Another dispatcher claimed the action first.
    LostClaim,
}

/// Tally of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Due actions fetched.
    pub fetched: usize,
    /// Delivered and finalized.
    pub succeeded: usize,
    /// Held for validation.
    pub held: usize,
    /// Failed and rescheduled.
    pub retried: usize,
    /// Failed terminally.
    pub failed: usize,
    /// Skipped by the quota gate.
    pub skipped_quota: usize,
    /// Claimed by a concurrent dispatcher.
    pub lost_claims: usize,
    /// Actions whose bookkeeping hit a storage error.
    pub errors: usize,
}

impl DispatchReport {
    fn tally(&mut self, outcome: Dispatched) {
        match outcome {
            Dispatched::Succeeded => self.succeeded += 1,
            Dispatched::Held => self.held += 1,
            Dispatched::Retrying => self.retried += 1,
            Dispatched::Failed => self.failed += 1,
            Dispatched::QuotaSkipped => self.skipped_quota += 1,
            Dispatched::LostClaim => self.lost_claims += 1,
        }
    }
}

/// Pulls due actions, gates them, and runs their executors.
pub struct Dispatcher {
    store: QueueStore,
    quota: QuotaGate,
    validation: ValidationGate,
    config: Arc<GlobalConfig>,
    worker_id: String,
}

impl Dispatcher {
    /// Create a dispatcher with a fresh worker identity.
    #[must_use]
    pub fn new(
        store: QueueStore,
        quota: QuotaGate,
        validation: ValidationGate,
        config: Arc<GlobalConfig>,
    ) -> Self {
        Self {
            store,
            quota,
            validation,
            config,
            worker_id: format!("dispatcher-{}", uuid::Uuid::new_v4()),
        }
    }

    /// Identity written to `claimed_by` by this dispatcher.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run one pass over the actions due now.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the due actions cannot be fetched.
    pub async fn run_once(&self) -> Result<DispatchReport> {
        self.run_at(Utc::now()).await
    }

    /// Run one pass over the actions due at `now`.
    ///
    /// Per-action storage errors are logged and counted; the pass continues.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the due actions cannot be fetched.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<DispatchReport> {
        let span = info_span!("dispatch_pass", worker = %self.worker_id);
        async {
            let due = self
                .store
                .fetch_due(self.config.dispatcher.batch_size, now)
                .await?;
            let mut report = DispatchReport {
                fetched: due.len(),
                ..DispatchReport::default()
            };

            for action in &due {
                match self.dispatch(action, now).await {
                    Ok(outcome) => report.tally(outcome),
                    Err(err) => {
                        error!(action_id = action.id, %err, "dispatch bookkeeping failed");
                        report.errors += 1;
                    }
                }
            }

            info!(
                fetched = report.fetched,
                succeeded = report.succeeded,
                held = report.held,
                retried = report.retried,
                failed = report.failed,
                skipped_quota = report.skipped_quota,
                lost_claims = report.lost_claims,
                "dispatch pass complete"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, action: &QueuedAction, now: DateTime<Utc>) -> Result<Dispatched> {
        let today = self.config.local_date(now);
        if !self.quota.may_run(&action.action_type, today).await? {
            if self.config.dispatcher.defer_on_quota {
                let until = self.quota.next_day_start(today);
                self.store.defer(action.id, until).await?;
                debug!(action_id = action.id, until = %until, "quota reached, deferred");
            } else {
                debug!(action_id = action.id, "quota reached, skipped");
            }
            return Ok(Dispatched::QuotaSkipped);
        }

        let claimed = match self.store.mark_running(action.id, &self.worker_id).await {
            Ok(claimed) => claimed,
            Err(AppError::AlreadyClaimed(msg)) => {
                debug!(action_id = action.id, %msg, "claim lost");
                return Ok(Dispatched::LostClaim);
            }
            Err(err) => return Err(err),
        };

        self.execute(&claimed).await
    }

    /// Run a single action now, outside the loop.
    ///
    /// Used by triggers that must send at creation time. The action must be
    /// `pending`; its `scheduled_at` is not consulted. When the quota is
    /// reached the action is left queued for the loop.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown ids and
    /// `AppError::AlreadyClaimed` if the action is not `pending`.
    pub async fn execute_now(&self, action_id: i64) -> Result<Dispatched> {
        let action = self.store.require(action_id).await?;
        let today = self.config.local_date(Utc::now());
        if !self.quota.may_run(&action.action_type, today).await? {
            info!(action_id, "quota reached, left queued");
            return Ok(Dispatched::QuotaSkipped);
        }

        let claimed = self.store.mark_running(action_id, &self.worker_id).await?;
        self.execute(&claimed).await
    }

    /// Draft, then hold or deliver, then finalize a claimed action.
    async fn execute(&self, action: &QueuedAction) -> Result<Dispatched> {
        let span = info_span!(
            "execute",
            action_id = action.id,
            action_type = %action.action_type
        );
        async {
            match self.attempt(action).await {
                Ok(outcome) => Ok(outcome),
                Err(err) if is_execution_failure(&err) => {
                    let failure = self.store.mark_failed(action.id, &err.to_string()).await?;
                    Ok(match failure {
                        FailureOutcome::Retrying { .. } => Dispatched::Retrying,
                        FailureOutcome::Exhausted { .. } => Dispatched::Failed,
                    })
                }
                Err(err) => Err(err),
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self, action: &QueuedAction) -> Result<Dispatched> {
        let timeout = self.config.executor_timeout();
        let spec = self.store.catalog().require(&action.action_type)?;

        let draft = bounded("prepare", timeout, spec.executor.prepare(action)).await?;
        if spec.requires_validation {
            self.validation.hold(action, &draft).await?;
            return Ok(Dispatched::Held);
        }

        let result = bounded("deliver", timeout, spec.executor.deliver(action, &draft)).await?;
        self.store.mark_success(action.id, &result).await?;
        Ok(Dispatched::Succeeded)
    }

    /// Spawn the polling loop. It runs until `cancel` fires.
    ///
    /// Outside the configured active hours the loop sleeps until the
    /// window opens.
    #[must_use]
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(
            async move {
                let interval = self.config.poll_interval();
                loop {
                    let wait = if let Some(delay) = next_active_delay(Utc::now(), &self.config) {
                        info!(sleep_seconds = delay.as_secs(), "outside active hours");
                        delay
                    } else {
                        if let Err(err) = self.run_once().await {
                            error!(%err, "dispatch pass failed");
                        }
                        interval
                    };

                    tokio::select! {
                        () = cancel.cancelled() => {
                            info!("dispatcher shutting down");
                            break;
                        }
                        () = tokio::time::sleep(wait) => {}
                    }
                }
            }
            .instrument(info_span!("dispatcher")),
        )
    }
}

/// Errors that consume a retry. Unknown types count too: the catalog may
/// have changed since enqueue and the action must not stay `running`.
fn is_execution_failure(err: &AppError) -> bool {
    err.is_retryable() || matches!(err, AppError::UnknownActionType(_))
}

/// Time until the active-hours window next opens, or `None` when `now`
/// falls inside it (or no window is configured).
#[must_use]
pub fn next_active_delay(now: DateTime<Utc>, config: &GlobalConfig) -> Option<Duration> {
    let (Some(start), Some(end)) = (
        config.dispatcher.active_hours_start,
        config.dispatcher.active_hours_end,
    ) else {
        return None;
    };

    let local = now.with_timezone(&config.local_offset()).naive_local();
    let hour = local.hour();
    if (start..end).contains(&hour) {
        return None;
    }

    let midnight = local.date().and_time(chrono::NaiveTime::MIN);
    let mut opening = midnight + chrono::Duration::hours(i64::from(start));
    if hour >= end {
        opening += chrono::Duration::days(1);
    }
    (opening - local).to_std().ok()
}

/// Start/stop lifecycle for the dispatcher loop.
///
/// Running state is the presence of a live loop, not a shared flag.
pub struct Workflow {
    dispatcher: Arc<Dispatcher>,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Workflow {
    /// Wrap a dispatcher; the loop is not started.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            running: Mutex::new(None),
        }
    }

    /// Start the loop. Returns `false` if it was already running.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return false;
        }
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&self.dispatcher).spawn(cancel.clone());
        *running = Some((cancel, handle));
        info!("workflow started");
        true
    }

    /// Stop the loop and wait for the in-flight pass to finish.
    /// Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let Some((cancel, handle)) = self.running.lock().await.take() else {
            return false;
        };
        cancel.cancel();
        if let Err(err) = handle.await {
            warn!(%err, "dispatcher task ended abnormally");
        }
        info!("workflow stopped");
        true
    }

    /// Whether the loop is running.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}
