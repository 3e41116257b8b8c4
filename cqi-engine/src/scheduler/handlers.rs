//! Job handlers
//!
//! One handler per job type. Handlers take the firing time explicitly and
//! never touch job bookkeeping; the scheduler records the outcome.

use chrono::{DateTime, Utc};
use cqi_common::config::ALL_SITES;
use cqi_common::db::{JobConfig, JobType};
use cqi_common::events::{CqiEvent, EventBus};
use cqi_common::time::{months_before, Period, PeriodType};
use cqi_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::batch::BatchExecutor;
use crate::db::{aggregates, jobs};
use crate::indicators::ParameterSet;
use crate::normalizer::CanonicalResult;
use crate::sites::SiteRegistry;
use crate::validation::{is_auto_fixable, ValidationEngine, AUTO_FIXABLE};

/// Months of aggregates kept by cleanup unless overridden
pub const DEFAULT_RETAIN_MONTHS: u32 = 24;

pub const REPORT_NOT_IMPLEMENTED: &str = "report generation is not implemented";

fn default_retain_months() -> u32 {
    DEFAULT_RETAIN_MONTHS
}

/// Handler parameters parsed from `JobConfig::params`
///
/// Keys the handlers don't recognize become query parameter overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobParams {
    #[serde(default)]
    pub period_type: PeriodType,
    #[serde(default)]
    pub auto_fix: bool,
    #[serde(default)]
    pub send_report: bool,
    #[serde(default = "default_retain_months")]
    pub retain_months: u32,
    #[serde(default)]
    pub clear_error_logs: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobParams {
    pub fn from_job(job: &JobConfig) -> Result<Self> {
        let params = if job.params.is_null() {
            serde_json::json!({})
        } else {
            job.params.clone()
        };
        serde_json::from_value(params).map_err(|e| {
            Error::InvalidInput(format!("Invalid params for job {}: {}", job.job_name, e))
        })
    }
}

/// What a handler did, for logs and CLI output
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub message: String,
    pub details: serde_json::Value,
}

impl JobOutcome {
    fn new(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            message: message.into(),
            details,
        }
    }
}

pub struct JobRunner {
    pool: SqlitePool,
    batch: Arc<BatchExecutor>,
    validation: Arc<ValidationEngine>,
    sites: Arc<dyn SiteRegistry>,
    events: EventBus,
    /// Configured `[parameters]` defaults
    base_params: ParameterSet,
}

impl JobRunner {
    pub fn new(
        pool: SqlitePool,
        batch: Arc<BatchExecutor>,
        validation: Arc<ValidationEngine>,
        sites: Arc<dyn SiteRegistry>,
        events: EventBus,
        base_params: ParameterSet,
    ) -> Self {
        Self {
            pool,
            batch,
            validation,
            sites,
            events,
            base_params,
        }
    }

    /// Dispatch on job type
    pub async fn run(&self, job: &JobConfig, now: DateTime<Utc>) -> Result<JobOutcome> {
        let params = JobParams::from_job(job)?;
        match job.job_type {
            JobType::DataUpdate => self.data_update(job, &params, now).await,
            JobType::Validation => self.validate(job, &params, now).await,
            JobType::Cleanup => self.cleanup(&params, now).await,
            JobType::Report => self.report(job).await,
        }
    }

    /// Sites a job visits: its own site, or every registered site plus `all`
    fn target_sites(&self, job: &JobConfig) -> Vec<String> {
        match job.site_id.as_deref() {
            Some(site) if site != ALL_SITES => vec![site.to_string()],
            _ => {
                let mut sites: Vec<String> =
                    self.sites.list_sites().into_iter().map(|s| s.id).collect();
                sites.push(ALL_SITES.to_string());
                sites
            }
        }
    }

    fn query_params(&self, period: &Period, params: &JobParams) -> ParameterSet {
        let mut set = self.base_params.clone();
        set.merge(&ParameterSet::for_period(period));
        set.merge(&ParameterSet::from_json_object(&params.extra));
        set
    }

    async fn data_update(
        &self,
        job: &JobConfig,
        params: &JobParams,
        now: DateTime<Utc>,
    ) -> Result<JobOutcome> {
        let period = params.period_type.range_at(now.date_naive());
        let query_params = self.query_params(&period, params);

        let mut per_site: Vec<Vec<CanonicalResult>> = Vec::new();
        let mut failures: Vec<String> = Vec::new();
        let mut stored = 0usize;

        for site in self.target_sites(job) {
            if aggregates::is_all_sites(&site) {
                let merged = aggregates::merge_site_results(&per_site);
                stored += aggregates::replace_results(&self.pool, &site, &period, &merged).await?;
                continue;
            }

            match self.batch.execute_all(&site, &query_params).await {
                Ok(report) => {
                    self.events.emit_lossy(CqiEvent::BatchCompleted {
                        site_id: site.clone(),
                        success_count: report.success_count,
                        error_count: report.error_count,
                        skipped_count: report.skipped_count,
                        elapsed_ms: report.elapsed_ms,
                        timestamp: Utc::now(),
                    });
                    stored +=
                        aggregates::replace_results(&self.pool, &site, &period, &report.results)
                            .await?;
                    per_site.push(report.results);
                }
                Err(e) => {
                    warn!(site_id = %site, "Batch failed: {}", e);
                    failures.push(format!("{}: {}", site, e));
                }
            }
        }

        let fixes = if params.auto_fix {
            self.validation.auto_fix(&AUTO_FIXABLE, &period, None).await?
        } else {
            Vec::new()
        };

        if !failures.is_empty() {
            return Err(Error::Internal(format!(
                "data update failed for {} site(s): {}",
                failures.len(),
                failures.join("; ")
            )));
        }

        Ok(JobOutcome::new(
            format!("stored {} aggregate rows for {}", stored, period),
            serde_json::json!({
                "period_start": period.start_str(),
                "period_end": period.end_str(),
                "rows_stored": stored,
                "fixes": fixes,
            }),
        ))
    }

    async fn validate(
        &self,
        job: &JobConfig,
        params: &JobParams,
        now: DateTime<Utc>,
    ) -> Result<JobOutcome> {
        let period = params.period_type.range_at(now.date_naive());
        let mut summaries = Vec::new();
        let mut failures: Vec<String> = Vec::new();

        for site in self.target_sites(job) {
            match self.validate_site(&site, &period, params).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    warn!(site_id = %site, "Validation failed: {}", e);
                    failures.push(format!("{}: {}", site, e));
                }
            }
        }

        if !failures.is_empty() {
            return Err(Error::Internal(format!(
                "validation failed for {} site(s): {}",
                failures.len(),
                failures.join("; ")
            )));
        }

        Ok(JobOutcome::new(
            format!("validated {} site(s) for {}", summaries.len(), period),
            serde_json::Value::Array(summaries),
        ))
    }

    async fn validate_site(
        &self,
        site: &str,
        period: &Period,
        params: &JobParams,
    ) -> Result<serde_json::Value> {
        let report = self.validation.run_all(period, Some(site)).await?;

        let mut fixes = Vec::new();
        if report.has_failed_errors() && params.auto_fix {
            let fixable: Vec<String> = report
                .failed_rule_ids()
                .into_iter()
                .filter(|id| is_auto_fixable(id))
                .collect();
            if !fixable.is_empty() {
                fixes = self
                    .validation
                    .auto_fix(&fixable, period, Some(site))
                    .await?;
            }
        }

        if params.send_report {
            self.events.emit_lossy(CqiEvent::ValidationReport {
                site_id: site.to_string(),
                period_start: report.period_start.clone(),
                period_end: report.period_end.clone(),
                overall_status: report.overall_status.to_string(),
                quality_score: report.summary.quality_score,
                grade: report.summary.grade.clone(),
                failed_rules: report.failed_rule_ids(),
                timestamp: Utc::now(),
            });
        }

        Ok(serde_json::json!({
            "site_id": site,
            "overall_status": report.overall_status,
            "quality_score": report.summary.quality_score,
            "grade": report.summary.grade,
            "fixes": fixes,
        }))
    }

    async fn cleanup(&self, params: &JobParams, now: DateTime<Utc>) -> Result<JobOutcome> {
        let cutoff = months_before(now, params.retain_months);
        let deleted = aggregates::delete_older_than(&self.pool, cutoff).await?;
        let cleared = if params.clear_error_logs {
            jobs::clear_stale_errors(&self.pool).await?
        } else {
            0
        };

        info!(deleted, cleared, cutoff = %cutoff, "Cleanup complete");
        Ok(JobOutcome::new(
            format!("deleted {} aggregate rows older than {}", deleted, cutoff),
            serde_json::json!({"rows_deleted": deleted, "errors_cleared": cleared}),
        ))
    }

    async fn report(&self, job: &JobConfig) -> Result<JobOutcome> {
        warn!(job_name = %job.job_name, "Report job fired: {}", REPORT_NOT_IMPLEMENTED);
        Ok(JobOutcome::new(
            REPORT_NOT_IMPLEMENTED,
            serde_json::json!({"implemented": false}),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_defaults_and_extras() {
        let job = JobConfig::new(
            "j",
            JobType::DataUpdate,
            "0 2 * * *",
            serde_json::json!({"auto_fix": true, "dead_code": 1066}),
        );
        let params = JobParams::from_job(&job).unwrap();
        assert!(params.auto_fix);
        assert_eq!(params.period_type, PeriodType::CurrentQuarter);
        assert_eq!(params.retain_months, DEFAULT_RETAIN_MONTHS);
        assert_eq!(params.extra["dead_code"], 1066);
    }

    #[test]
    fn test_bad_period_type_rejected() {
        let job = JobConfig::new(
            "j",
            JobType::DataUpdate,
            "0 2 * * *",
            serde_json::json!({"period_type": "fortnight"}),
        );
        assert!(matches!(
            JobParams::from_job(&job).unwrap_err(),
            Error::InvalidInput(_)
        ));
    }
}
