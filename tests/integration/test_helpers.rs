//! Shared test helpers for queue-level integration tests.
//!
//! Provides in-memory service construction, fake collaborators
//! (`RecordingTransport`, `StaticComposer`, `FailingExecutor`), and
//! prospect fixtures so individual test modules can focus on behaviour.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use outreach_queue::app::Services;
use outreach_queue::catalog::{ActionCatalog, ActionSpec};
use outreach_queue::config::GlobalConfig;
use outreach_queue::executor::{
    BoxFuture, ContentGenerator, Draft, Executor, SendReceipt, Transport,
};
use outreach_queue::models::action::QueuedAction;
use outreach_queue::models::prospect::{Prospect, ProspectContext};
use outreach_queue::persistence::db;
use outreach_queue::persistence::prospect_repo::ProspectRepo;
use outreach_queue::{AppError, Result};
use serde_json::{json, Value};

/// Build a `GlobalConfig` from TOML, defaults for everything not given.
pub fn test_config(toml: &str) -> GlobalConfig {
    GlobalConfig::from_toml_str(toml).expect("valid test config")
}

/// One call observed by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCall {
    pub account_id: i64,
    pub prospect_id: Option<i64>,
    pub content: String,
}

/// How [`RecordingTransport`] answers.
#[derive(Debug, Clone)]
pub enum TransportMode {
    /// Fresh id per call: `ext-1`, `ext-2`, …
    Sequential,
    /// Same id every time.
    FixedId(String),
    /// Provider flags every send as a duplicate.
    ReportDuplicate,
    /// Provider is unreachable.
    Unreachable,
}

/// Transport fake that records every send.
pub struct RecordingTransport {
    mode: TransportMode,
    calls: Mutex<Vec<SentCall>>,
}

impl RecordingTransport {
    pub fn new(mode: TransportMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<SentCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Transport for RecordingTransport {
    fn send<'a>(
        &'a self,
        account_id: i64,
        prospect_id: Option<i64>,
        content: &'a str,
    ) -> BoxFuture<'a, Result<SendReceipt>> {
        Box::pin(async move {
            if matches!(self.mode, TransportMode::Unreachable) {
                return Err(AppError::Transport("connection refused".into()));
            }

            let sequence = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(SentCall {
                    account_id,
                    prospect_id,
                    content: content.to_owned(),
                });
                calls.len()
            };

            Ok(match &self.mode {
                TransportMode::Sequential => SendReceipt::accepted(format!("ext-{sequence}")),
                TransportMode::FixedId(id) => SendReceipt::accepted(id.clone()),
                TransportMode::ReportDuplicate => SendReceipt {
                    duplicate: true,
                    ..SendReceipt::accepted("ext-dup")
                },
                TransportMode::Unreachable => unreachable!(),
            })
        })
    }
}

/// Composer fake: `"Hello {first_name}, re {action_type}"`.
pub struct StaticComposer;

impl ContentGenerator for StaticComposer {
    fn compose<'a>(
        &'a self,
        action_type: &'a str,
        prospect: &'a ProspectContext,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { Ok(format!("Hello {}, re {action_type}", prospect.first_name)) })
    }
}

/// Executor whose `prepare` always fails, counting attempts.
#[derive(Default)]
pub struct FailingExecutor {
    pub attempts: AtomicUsize,
}

impl FailingExecutor {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Executor for FailingExecutor {
    fn prepare<'a>(&'a self, _action: &'a QueuedAction) -> BoxFuture<'a, Result<Draft>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Executor("provider exploded".into()))
        })
    }

    fn deliver<'a>(
        &'a self,
        _action: &'a QueuedAction,
        _draft: &'a Draft,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async { Err(AppError::Executor("unreachable".into())) })
    }
}

/// Executor whose `prepare` hits a storage error.
pub struct StorageErrorExecutor;

impl Executor for StorageErrorExecutor {
    fn prepare<'a>(&'a self, _action: &'a QueuedAction) -> BoxFuture<'a, Result<Draft>> {
        Box::pin(async { Err(AppError::Db("database is locked".into())) })
    }

    fn deliver<'a>(
        &'a self,
        _action: &'a QueuedAction,
        _draft: &'a Draft,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async { Ok(json!({})) })
    }
}

/// Executor whose `prepare` never finishes in time.
pub struct SlowExecutor(pub Duration);

impl Executor for SlowExecutor {
    fn prepare<'a>(&'a self, _action: &'a QueuedAction) -> BoxFuture<'a, Result<Draft>> {
        Box::pin(async move {
            tokio::time::sleep(self.0).await;
            Ok(Draft {
                content: "late".into(),
            })
        })
    }

    fn deliver<'a>(
        &'a self,
        _action: &'a QueuedAction,
        _draft: &'a Draft,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async { Ok(json!({})) })
    }
}

/// Services over the default outbound catalog with fake collaborators.
pub async fn outbound_services(
    config: GlobalConfig,
    transport: Arc<RecordingTransport>,
) -> Services {
    let db = Arc::new(db::connect_memory().await.expect("db"));
    Services::outbound(Arc::new(config), db, Arc::new(StaticComposer), transport)
}

/// Services over a catalog with a single account-level type.
pub async fn single_type_services(
    config: GlobalConfig,
    action_type: &str,
    executor: Arc<dyn Executor>,
) -> Services {
    let db = Arc::new(db::connect_memory().await.expect("db"));
    let mut catalog = ActionCatalog::new();
    catalog.register(ActionSpec::new(action_type, executor).account_level());
    Services::new(Arc::new(config), db, catalog)
}

/// Insert an active prospect and return its id.
pub async fn add_prospect(services: &Services, first_name: &str) -> i64 {
    ProspectRepo::new(Arc::clone(&services.db))
        .create(&Prospect::new(1, first_name.into(), "Tester".into()))
        .await
        .expect("create prospect")
        .id
}
