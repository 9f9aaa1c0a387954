//! Wiring of the queue core shared by the server, the CLI, and tests.

use std::sync::Arc;

use chrono::Utc;

use crate::catalog::ActionCatalog;
use crate::config::GlobalConfig;
use crate::dispatcher::Dispatcher;
use crate::executor::http_transport::{HttpTransport, UnconfiguredTransport};
use crate::executor::template::TemplateComposer;
use crate::executor::{ContentGenerator, Transport};
use crate::persistence::db::Database;
use crate::persistence::queue_store::QueueStore;
use crate::quota::QuotaGate;
use crate::status::StatusReport;
use crate::validation::ValidationGate;
use crate::Result;

/// Every component of the core, built over one database.
#[derive(Clone)]
pub struct Services {
    /// Effective configuration.
    pub config: Arc<GlobalConfig>,
    /// Shared connection pool.
    pub db: Arc<Database>,
    /// Queue store (enqueue, lookups, cancellation).
    pub store: QueueStore,
    /// Daily quota gate.
    pub quota: QuotaGate,
    /// Validation gate (listing, approve, reject).
    pub validation: ValidationGate,
    /// Dispatcher for loop passes and immediate execution.
    pub dispatcher: Arc<Dispatcher>,
}

impl Services {
    /// Build the core around an explicit catalog.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, db: Arc<Database>, catalog: ActionCatalog) -> Self {
        let store = QueueStore::new(Arc::clone(&db), Arc::new(catalog), config.retry.clone());
        let quota = QuotaGate::new(store.clone(), &config);
        let validation = ValidationGate::new(
            Arc::clone(&db),
            store.clone(),
            config.validation.rejection_threshold,
            config.executor_timeout(),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            quota.clone(),
            validation.clone(),
            Arc::clone(&config),
        ));

        Self {
            config,
            db,
            store,
            quota,
            validation,
            dispatcher,
        }
    }

    /// Build the core with the default outbound catalog.
    #[must_use]
    pub fn outbound(
        config: Arc<GlobalConfig>,
        db: Arc<Database>,
        composer: Arc<dyn ContentGenerator>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let catalog =
            ActionCatalog::outbound(composer, transport, Arc::clone(&db), &config.validation);
        Self::new(config, db, catalog)
    }

    /// Build the core with the collaborators named in configuration:
    /// configured templates and the HTTP transport.
    ///
    /// Without a `[transport]` section, deliveries fail with a transport
    /// error; everything else still works.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be built.
    pub fn from_config(config: Arc<GlobalConfig>, db: Arc<Database>) -> Result<Self> {
        let composer: Arc<dyn ContentGenerator> =
            Arc::new(TemplateComposer::new(config.templates.clone()));
        let transport: Arc<dyn Transport> = match config.transport {
            Some(ref transport) => Arc::new(HttpTransport::new(
                transport,
                config.transport_api_key.clone(),
            )?),
            None => Arc::new(UnconfiguredTransport),
        };
        Ok(Self::outbound(config, db, composer, transport))
    }

    /// Status snapshot for the current local day.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a query fails.
    pub async fn status(&self) -> Result<StatusReport> {
        StatusReport::collect(&self.store, &self.quota, &self.config, Utc::now()).await
    }
}
