//! Batch executor
//!
//! Runs every active registered indicator for one site, sequentially in
//! registration order. One indicator failing never stops the batch: the
//! failure is recorded as a zero-metric placeholder result.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cqi_common::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::executor::IndicatorExecutor;
use crate::indicators::ParameterSet;
use crate::normalizer::CanonicalResult;

/// Source of indicator active flags
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Indicator id → active; ids absent from the map are active
    async fn load_statuses(&self) -> Result<HashMap<String, bool>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Error,
    Skipped,
}

/// What happened to one indicator in a batch
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorOutcome {
    pub indicator_id: String,
    pub status: OutcomeStatus,
    pub row_count: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one `execute_all`
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub site_id: String,
    pub results: Vec<CanonicalResult>,
    pub outcomes: Vec<IndicatorOutcome>,
    pub success_count: usize,
    pub error_count: usize,
    pub skipped_count: usize,
    pub total_indicators: usize,
    pub elapsed_ms: u64,
    pub average_time_per_indicator: f64,
    pub timestamp: DateTime<Utc>,
}

pub struct BatchExecutor {
    executor: Arc<IndicatorExecutor>,
    status_store: Arc<dyn StatusStore>,
    status_cache: RwLock<HashMap<String, bool>>,
}

impl BatchExecutor {
    pub fn new(executor: Arc<IndicatorExecutor>, status_store: Arc<dyn StatusStore>) -> Self {
        Self {
            executor,
            status_store,
            status_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn executor(&self) -> &Arc<IndicatorExecutor> {
        &self.executor
    }

    /// Replace the status cache from the store
    ///
    /// On failure the previous cache stays in place.
    pub async fn refresh_status_cache(&self) {
        match self.status_store.load_statuses().await {
            Ok(statuses) => {
                *self.status_cache.write().await = statuses;
            }
            Err(e) => {
                warn!("Indicator status refresh failed, keeping previous cache: {}", e);
            }
        }
    }

    /// Run every active indicator for `site_id`
    ///
    /// Fails only when the site is not registered; per-indicator errors are
    /// recorded in the report.
    pub async fn execute_all(&self, site_id: &str, params: &ParameterSet) -> Result<BatchReport> {
        if !self.executor.router().is_registered(site_id) {
            return Err(Error::UnknownSite(site_id.to_string()));
        }

        let started = Instant::now();
        self.refresh_status_cache().await;
        let statuses = self.status_cache.read().await.clone();

        let registry = Arc::clone(self.executor.registry());
        let mut results = Vec::new();
        let mut outcomes = Vec::with_capacity(registry.len());
        let (mut success_count, mut error_count, mut skipped_count) = (0usize, 0usize, 0usize);

        for definition in registry.definitions() {
            let id = definition.id.as_str();
            if !statuses.get(id).copied().unwrap_or(true) {
                debug!(site_id, indicator_id = id, "Skipping inactive indicator");
                skipped_count += 1;
                outcomes.push(IndicatorOutcome {
                    indicator_id: id.to_string(),
                    status: OutcomeStatus::Skipped,
                    row_count: 0,
                    elapsed_ms: 0,
                    error: None,
                });
                continue;
            }

            let indicator_started = Instant::now();
            match self.executor.execute(site_id, id, params).await {
                Ok(execution) => {
                    success_count += 1;
                    outcomes.push(IndicatorOutcome {
                        indicator_id: id.to_string(),
                        status: OutcomeStatus::Success,
                        row_count: execution.rows.len(),
                        elapsed_ms: execution.elapsed_ms,
                        error: None,
                    });
                    results.extend(execution.rows);
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(site_id, indicator_id = id, "Indicator failed: {}", message);
                    error_count += 1;
                    outcomes.push(IndicatorOutcome {
                        indicator_id: id.to_string(),
                        status: OutcomeStatus::Error,
                        row_count: 0,
                        elapsed_ms: indicator_started.elapsed().as_millis() as u64,
                        error: Some(message.clone()),
                    });
                    results.push(CanonicalResult::placeholder(
                        &definition.display_name,
                        id,
                        message,
                    ));
                }
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let active_count = success_count + error_count;
        let average_time_per_indicator = elapsed_ms as f64 / active_count.max(1) as f64;

        info!(
            site_id,
            success_count, error_count, skipped_count, elapsed_ms, "Batch execution complete"
        );

        Ok(BatchReport {
            site_id: site_id.to_string(),
            results,
            outcomes,
            success_count,
            error_count,
            skipped_count,
            total_indicators: registry.len(),
            elapsed_ms,
            average_time_per_indicator,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{MemoryTemplateSource, TemplateRegistry};
    use crate::sites::{RouterOptions, SiteRouter};
    use cqi_common::config::SiteConfig;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedStatuses {
        statuses: HashMap<String, bool>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl StatusStore for FixedStatuses {
        async fn load_statuses(&self) -> Result<HashMap<String, bool>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Internal("store offline".to_string()));
            }
            Ok(self.statuses.clone())
        }
    }

    fn batch(statuses: HashMap<String, bool>) -> (BatchExecutor, Arc<FixedStatuses>) {
        let source = MemoryTemplateSource::new()
            .with_template("1_percentage_died", "SELECT 'Died' AS Indicator, 5 AS TOTAL, 1 AS Deaths")
            .with_template("2_percentage_lost_to_followup", "SELECT * FROM no_such_table")
            .with_template("3_reengaged_within_28", "SELECT 'Re' AS Indicator, 2 AS Numerator");
        let registry = Arc::new(TemplateRegistry::load(&source).unwrap());
        let router = Arc::new(SiteRouter::new(
            vec![SiteConfig {
                id: "1705".to_string(),
                display_name: String::new(),
                url: "sqlite::memory:".to_string(),
            }],
            RouterOptions::default(),
        ));
        let executor = Arc::new(IndicatorExecutor::new(registry, router));
        let store = Arc::new(FixedStatuses {
            statuses,
            fail: AtomicBool::new(false),
        });
        (BatchExecutor::new(executor, store.clone()), store)
    }

    #[tokio::test]
    async fn test_counts_add_up_with_failure_and_skip() {
        let mut statuses = HashMap::new();
        statuses.insert("3_reengaged_within_28".to_string(), false);
        let (batch, _) = batch(statuses);

        let report = batch.execute_all("1705", &ParameterSet::new()).await.unwrap();
        assert_eq!(report.success_count, 1);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.skipped_count, 1);
        assert_eq!(
            report.success_count + report.error_count + report.skipped_count,
            report.total_indicators
        );

        // Placeholder keeps the catalog display name
        let failed = report
            .results
            .iter()
            .find(|r| r.indicator_id == "2_percentage_lost_to_followup")
            .unwrap();
        assert!(failed.error.as_deref().unwrap().contains("no_such_table"));
        assert_eq!(failed.total, 0);
        assert!(!failed.indicator.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_site_rejected_up_front() {
        let (batch, _) = batch(HashMap::new());
        let err = batch.execute_all("9999", &ParameterSet::new()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownSite(_)));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_cache() {
        let mut statuses = HashMap::new();
        statuses.insert("1_percentage_died".to_string(), false);
        let (batch, store) = batch(statuses);

        batch.refresh_status_cache().await;
        store.fail.store(true, Ordering::SeqCst);

        let report = batch.execute_all("1705", &ParameterSet::new()).await.unwrap();
        assert_eq!(report.skipped_count, 1);
        assert_eq!(report.outcomes[0].status, OutcomeStatus::Skipped);
    }
}
