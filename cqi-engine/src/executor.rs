//! Indicator executor
//!
//! Bind → route → query → normalize for one indicator at one site. Errors
//! propagate unchanged; nothing here retries.

use chrono::{DateTime, Utc};
use cqi_common::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::indicators::binder::unresolved_placeholders;
use crate::indicators::{ParameterSet, TemplateRegistry};
use crate::normalizer::{normalize, CanonicalResult};
use crate::sites::{RawRow, SiteRouter};

/// Default per-query bound
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Normalized rows of one indicator execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub indicator_id: String,
    pub site_id: String,
    pub rows: Vec<CanonicalResult>,
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Driver rows of one indicator execution, before normalization
#[derive(Debug, Clone, Serialize)]
pub struct RawExecutionResult {
    pub indicator_id: String,
    pub site_id: String,
    pub rows: Vec<RawRow>,
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
}

pub struct IndicatorExecutor {
    registry: Arc<TemplateRegistry>,
    router: Arc<SiteRouter>,
    query_timeout: Duration,
}

impl IndicatorExecutor {
    pub fn new(registry: Arc<TemplateRegistry>, router: Arc<SiteRouter>) -> Self {
        Self {
            registry,
            router,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<SiteRouter> {
        &self.router
    }

    /// Execute and normalize; every row is stamped with `indicator_id`
    pub async fn execute(
        &self,
        site_id: &str,
        indicator_id: &str,
        params: &ParameterSet,
    ) -> Result<ExecutionResult> {
        let raw = self.execute_raw(site_id, indicator_id, params).await?;
        let rows = raw
            .rows
            .iter()
            .map(|row| {
                let mut result = normalize(row);
                result.indicator_id = raw.indicator_id.clone();
                result
            })
            .collect();

        Ok(ExecutionResult {
            indicator_id: raw.indicator_id,
            site_id: raw.site_id,
            rows,
            elapsed_ms: raw.elapsed_ms,
            timestamp: raw.timestamp,
        })
    }

    /// Execute without normalization
    pub async fn execute_raw(
        &self,
        site_id: &str,
        indicator_id: &str,
        params: &ParameterSet,
    ) -> Result<RawExecutionResult> {
        let started = Instant::now();

        let query = self.registry.bind(indicator_id, params)?;
        let unresolved = unresolved_placeholders(&query);
        if !unresolved.is_empty() {
            debug!(
                site_id,
                indicator_id,
                ?unresolved,
                "Query has unresolved placeholders"
            );
        }

        let handle = self.router.connection_for(site_id).await?;

        let fetched = tokio::time::timeout(self.query_timeout, handle.fetch_rows(&query)).await;
        let rows = match fetched {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                return Err(Error::QueryExecution {
                    site_id: site_id.to_string(),
                    indicator_id: indicator_id.to_string(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(Error::QueryTimeout {
                    site_id: site_id.to_string(),
                    indicator_id: indicator_id.to_string(),
                    timeout_ms: self.query_timeout.as_millis() as u64,
                })
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            site_id,
            indicator_id,
            row_count = rows.len(),
            elapsed_ms,
            backend = handle.backend(),
            "Indicator query complete"
        );

        Ok(RawExecutionResult {
            indicator_id: indicator_id.to_string(),
            site_id: site_id.to_string(),
            rows,
            elapsed_ms,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::MemoryTemplateSource;
    use crate::sites::RouterOptions;
    use cqi_common::config::SiteConfig;

    fn executor(source: MemoryTemplateSource) -> IndicatorExecutor {
        let registry = Arc::new(TemplateRegistry::load(&source).unwrap());
        let router = Arc::new(SiteRouter::new(
            vec![SiteConfig {
                id: "1705".to_string(),
                display_name: String::new(),
                url: "sqlite::memory:".to_string(),
            }],
            RouterOptions::default(),
        ));
        IndicatorExecutor::new(registry, router)
    }

    #[tokio::test]
    async fn test_execute_normalizes_and_stamps_id() {
        let exec = executor(MemoryTemplateSource::new().with_template(
            "1_percentage_died",
            "SELECT 'Died' AS Indicator, 10 AS TOTAL, {dead} AS Deaths",
        ));
        let params = ParameterSet::new().with("dead", 3);
        let result = exec.execute("1705", "1_percentage_died", &params).await.unwrap();

        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].deaths, 3);
        assert_eq!(result.rows[0].indicator_id, "1_percentage_died");
    }

    #[tokio::test]
    async fn test_unknown_template_and_site() {
        let exec = executor(MemoryTemplateSource::new().with_template("1_percentage_died", "SELECT 1"));

        let err = exec
            .execute("1705", "99_missing", &ParameterSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound(_)));

        let err = exec
            .execute("0000", "1_percentage_died", &ParameterSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSite(_)));
    }

    #[tokio::test]
    async fn test_driver_error_message_preserved() {
        let exec = executor(
            MemoryTemplateSource::new().with_template("1_percentage_died", "SELECT * FROM missing_table"),
        );
        let err = exec
            .execute("1705", "1_percentage_died", &ParameterSet::new())
            .await
            .unwrap_err();
        match err {
            Error::QueryExecution { message, .. } => assert!(message.contains("missing_table")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unresolved_placeholder_fails_at_execution() {
        let exec = executor(
            MemoryTemplateSource::new().with_template("1_percentage_died", "SELECT {not_supplied} AS Deaths"),
        );
        let err = exec
            .execute("1705", "1_percentage_died", &ParameterSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueryExecution { .. }));
    }
}
