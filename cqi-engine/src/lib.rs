//! cqi-engine library interface
//!
//! Clinical quality indicator computation: template binding, per-site query
//! routing, result normalization, batch execution, aggregate validation and
//! recurring jobs. The `cqi-engine` binary is a thin CLI over `Engine`.

pub mod batch;
pub mod db;
pub mod executor;
pub mod indicators;
pub mod normalizer;
pub mod scheduler;
pub mod sites;
pub mod validation;

use chrono::{DateTime, Utc};
use cqi_common::config::Config;
use cqi_common::events::EventBus;
use cqi_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::batch::BatchExecutor;
use crate::db::SqliteStatusStore;
use crate::executor::IndicatorExecutor;
use crate::indicators::{FileTemplateSource, ParameterSet, TemplateRegistry};
use crate::scheduler::{JobRunner, Scheduler};
use crate::sites::SiteRouter;
use crate::validation::ValidationEngine;

/// Fully wired engine components
#[derive(Clone)]
pub struct Engine {
    /// Aggregate store pool
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub registry: Arc<TemplateRegistry>,
    pub router: Arc<SiteRouter>,
    pub executor: Arc<IndicatorExecutor>,
    pub batch: Arc<BatchExecutor>,
    pub validation: Arc<ValidationEngine>,
    pub scheduler: Arc<Scheduler>,
    /// `[parameters]` defaults applied beneath per-invocation values
    pub base_params: ParameterSet,
    pub startup_time: DateTime<Utc>,
}

/// Component settings `Engine::assemble` needs beyond its collaborators
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub query_timeout: Duration,
    pub event_capacity: usize,
    pub base_params: ParameterSet,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            query_timeout: executor::DEFAULT_QUERY_TIMEOUT,
            event_capacity: 100,
            base_params: ParameterSet::new(),
        }
    }
}

impl Engine {
    /// Open the aggregate store, load templates and wire every component
    pub async fn from_config(config: &Config) -> Result<Self> {
        let db = cqi_common::db::init_database(&config.database_path).await?;
        info!("Aggregate store: {}", config.database_path.display());

        let registry = TemplateRegistry::load(&FileTemplateSource::new(&config.templates_dir))?;
        let router = SiteRouter::from_config(config);
        info!(
            "Templates: {} ({} registered), sites: {}",
            config.templates_dir.display(),
            registry.len(),
            config.sites.len()
        );

        let options = EngineOptions {
            query_timeout: config.query_timeout(),
            event_capacity: config.event_capacity,
            base_params: ParameterSet::from_toml_table(&config.parameters)?,
        };
        Ok(Self::assemble(db, registry, router, options))
    }

    /// Wire components around an initialized pool, registry and router
    pub fn assemble(
        db: SqlitePool,
        registry: TemplateRegistry,
        router: SiteRouter,
        options: EngineOptions,
    ) -> Self {
        let registry = Arc::new(registry);
        let router = Arc::new(router);
        let event_bus = EventBus::new(options.event_capacity);

        let executor = Arc::new(
            IndicatorExecutor::new(Arc::clone(&registry), Arc::clone(&router))
                .with_query_timeout(options.query_timeout),
        );
        let batch = Arc::new(BatchExecutor::new(
            Arc::clone(&executor),
            Arc::new(SqliteStatusStore::new(db.clone())),
        ));
        let validation = Arc::new(ValidationEngine::new(db.clone(), registry.ids()));
        let runner = Arc::new(JobRunner::new(
            db.clone(),
            Arc::clone(&batch),
            Arc::clone(&validation),
            router.clone(),
            event_bus.clone(),
            options.base_params.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(db.clone(), runner, event_bus.clone()));

        Self {
            db,
            event_bus,
            registry,
            router,
            executor,
            batch,
            validation,
            scheduler,
            base_params: options.base_params,
            startup_time: Utc::now(),
        }
    }

    /// Configured defaults overlaid with `overrides`
    pub fn params_with(&self, overrides: &ParameterSet) -> ParameterSet {
        self.base_params.merged_with(overrides)
    }
}
