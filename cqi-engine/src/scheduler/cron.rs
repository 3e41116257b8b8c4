//! Cron expressions and the default job catalog

use cqi_common::db::{JobConfig, JobType};
use cqi_common::{Error, Result};
use serde_json::json;

/// Accept 5-field (minute-first) or 6/7-field (seconds-first) expressions;
/// 5-field input gets a `0` seconds field prepended.
pub fn normalize_cron(expression: &str) -> Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        n => Err(Error::InvalidInput(format!(
            "Cron expression '{}' has {} fields, expected 5, 6 or 7",
            expression, n
        ))),
    }
}

/// Jobs seeded into an empty job-config table
pub fn default_jobs() -> Vec<JobConfig> {
    vec![
        JobConfig::new(
            "nightly_indicator_refresh",
            JobType::DataUpdate,
            "0 2 * * *",
            json!({"period_type": "current_quarter", "auto_fix": true}),
        ),
        JobConfig::new(
            "daily_validation",
            JobType::Validation,
            "0 6 * * *",
            json!({"auto_fix": false, "send_report": true}),
        ),
        JobConfig::new(
            "monthly_cleanup",
            JobType::Cleanup,
            "0 3 1 * *",
            json!({"retain_months": 24, "clear_error_logs": true}),
        ),
        JobConfig::new("weekly_report", JobType::Report, "0 8 * * 1", json!({})).inactive(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_cron() {
        assert_eq!(normalize_cron("0 2 * * *").unwrap(), "0 0 2 * * *");
        assert_eq!(normalize_cron("  0 8 * * 1 ").unwrap(), "0 0 8 * * 1");
        assert_eq!(normalize_cron("30 0 2 * * *").unwrap(), "30 0 2 * * *");
        assert!(normalize_cron("* * *").is_err());
    }

    #[test]
    fn test_default_catalog() {
        let jobs = default_jobs();
        assert_eq!(jobs.len(), 4);
        assert!(jobs.iter().all(|j| normalize_cron(&j.schedule).is_ok()));

        let report = jobs.iter().find(|j| j.job_type == JobType::Report).unwrap();
        assert!(!report.is_active);
        assert_eq!(jobs.iter().filter(|j| j.is_active).count(), 3);
    }
}
