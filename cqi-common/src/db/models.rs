//! Persisted models shared between the engine and its callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Active/inactive flag for one indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorStatus {
    pub indicator_id: String,
    pub is_active: bool,
    pub description: String,
}

/// Kind of work a scheduled job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    DataUpdate,
    Validation,
    Cleanup,
    Report,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::DataUpdate => "data_update",
            JobType::Validation => "validation",
            JobType::Cleanup => "cleanup",
            JobType::Report => "report",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "data_update" => Ok(JobType::DataUpdate),
            "validation" => Ok(JobType::Validation),
            "cleanup" => Ok(JobType::Cleanup),
            "report" => Ok(JobType::Report),
            other => Err(Error::InvalidInput(format!("Unknown job type: {}", other))),
        }
    }
}

/// Outcome recorded in `job_configs.last_status`
///
/// A job with no recorded status is idle and has never run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Success,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "error" => Ok(JobStatus::Error),
            other => Err(Error::InvalidInput(format!("Unknown job status: {}", other))),
        }
    }
}

/// Scheduled job definition plus last-run bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub job_name: String,
    pub job_type: JobType,
    /// Cron expression, evaluated in UTC
    pub schedule: String,
    /// Handler parameters (JSON object)
    pub params: serde_json::Value,
    /// Restrict the job to one site; None = every registered site plus "all"
    pub site_id: Option<String>,
    pub is_active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<JobStatus>,
    pub last_error: Option<String>,
    pub run_count: i64,
}

impl JobConfig {
    /// New, never-run job definition
    pub fn new(
        job_name: impl Into<String>,
        job_type: JobType,
        schedule: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            job_type,
            schedule: schedule.into(),
            params,
            site_id: None,
            is_active: true,
            last_run: None,
            last_status: None,
            last_error: None,
            run_count: 0,
        }
    }

    pub fn with_site(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = Some(site_id.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_round_trips_through_str() {
        for job_type in [
            JobType::DataUpdate,
            JobType::Validation,
            JobType::Cleanup,
            JobType::Report,
        ] {
            assert_eq!(job_type.as_str().parse::<JobType>().unwrap(), job_type);
        }
        assert!("backup".parse::<JobType>().is_err());
    }

    #[test]
    fn test_job_config_builder() {
        let config = JobConfig::new(
            "site_refresh",
            JobType::DataUpdate,
            "0 2 * * *",
            serde_json::json!({"period_type": "current_month"}),
        )
        .with_site("1705")
        .inactive();

        assert_eq!(config.site_id.as_deref(), Some("1705"));
        assert!(!config.is_active);
        assert_eq!(config.run_count, 0);
        assert!(config.last_status.is_none());
    }
}
