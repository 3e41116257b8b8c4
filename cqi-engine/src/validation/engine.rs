//! Validation engine
//!
//! Runs the rule catalog against persisted aggregates for one period and an
//! optional site. A rule whose own check cannot execute is recorded as an
//! `ERROR` finding; the run continues with the next rule.

use chrono::{DateTime, Utc};
use cqi_common::time::Period;
use cqi_common::{Error, Result};
use serde::{Serialize, Serializer};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

use super::autofix::{apply_fixes, check_allowed, AppliedFix};
use super::recommendations::{build_recommendations, Recommendation};
use super::rules::{catalog, find_rule, RuleCategory, RuleCheck, Severity, ValidationRule};
use super::score::{compute_score, QualityScore};
use crate::db::status::list_statuses;
use crate::sites::rows::decode_row;
use crate::sites::row_to_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FindingStatus {
    Pass,
    Fail,
    Error,
}

/// Outcome of one rule
#[derive(Debug, Clone, Serialize)]
pub struct ValidationFinding {
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub category: RuleCategory,
    pub status: FindingStatus,
    pub issue_count: usize,
    pub issues: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OverallStatus {
    Critical,
    Warning,
    Info,
    Healthy,
}

impl OverallStatus {
    /// Worst severity among failed findings
    pub fn from_findings(findings: &[ValidationFinding]) -> Self {
        let failed = |severity: Severity| {
            findings
                .iter()
                .any(|f| f.status == FindingStatus::Fail && f.severity == severity)
        };
        if failed(Severity::Error) {
            OverallStatus::Critical
        } else if failed(Severity::Warning) {
            OverallStatus::Warning
        } else if failed(Severity::Info) {
            OverallStatus::Info
        } else {
            OverallStatus::Healthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Critical => "CRITICAL",
            OverallStatus::Warning => "WARNING",
            OverallStatus::Info => "INFO",
            OverallStatus::Healthy => "HEALTHY",
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationSummary {
    pub total_rules: usize,
    pub passed_rules: usize,
    pub failed_rules: usize,
    pub errored_rules: usize,
    pub error_issues: usize,
    pub warning_issues: usize,
    pub info_issues: usize,
    pub quality_score: f64,
    pub grade: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub period_start: String,
    pub period_end: String,
    pub site_id: Option<String>,
    pub overall_status: OverallStatus,
    pub summary: ValidationSummary,
    /// Catalog order; serialized as an object keyed by rule id
    #[serde(serialize_with = "findings_by_rule_id")]
    pub findings: Vec<ValidationFinding>,
    pub recommendations: Vec<Recommendation>,
    pub timestamp: DateTime<Utc>,
}

fn findings_by_rule_id<S: Serializer>(
    findings: &[ValidationFinding],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(findings.iter().map(|f| (f.rule_id.as_str(), f)))
}

impl ValidationReport {
    pub fn finding(&self, rule_id: &str) -> Option<&ValidationFinding> {
        self.findings.iter().find(|f| f.rule_id == rule_id)
    }

    /// Ids of failed rules, catalog order
    pub fn failed_rule_ids(&self) -> Vec<String> {
        self.findings
            .iter()
            .filter(|f| f.status == FindingStatus::Fail)
            .map(|f| f.rule_id.clone())
            .collect()
    }

    pub fn has_failed_errors(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.status == FindingStatus::Fail && f.severity == Severity::Error)
    }
}

/// Row of the `validation_runs` log
#[derive(Debug, Clone, Serialize)]
pub struct ValidationRunRecord {
    pub id: i64,
    pub period_start: String,
    pub period_end: String,
    pub site_code: Option<String>,
    pub overall_status: String,
    pub quality_score: f64,
    pub grade: String,
    pub passed_rules: i64,
    pub failed_rules: i64,
    pub created_at: String,
}

pub struct ValidationEngine {
    pool: SqlitePool,
    /// Registered indicator ids, checked by `missing_indicators`
    expected_indicators: Vec<String>,
}

impl ValidationEngine {
    pub fn new(pool: SqlitePool, expected_indicators: Vec<String>) -> Self {
        Self {
            pool,
            expected_indicators,
        }
    }

    /// Run every rule, score the result and append it to the run log
    ///
    /// A run log write failure is logged; the report is still returned.
    pub async fn run_all(&self, period: &Period, site_id: Option<&str>) -> Result<ValidationReport> {
        let findings = self.evaluate(period, site_id).await;
        let score = compute_score(&findings);
        let overall_status = OverallStatus::from_findings(&findings);

        let count_status =
            |status: FindingStatus| findings.iter().filter(|f| f.status == status).count();
        let info_issues: usize = findings
            .iter()
            .filter(|f| f.status == FindingStatus::Fail && f.severity == Severity::Info)
            .map(|f| f.issue_count)
            .sum();

        let summary = ValidationSummary {
            total_rules: findings.len(),
            passed_rules: score.passed_rules,
            failed_rules: count_status(FindingStatus::Fail),
            errored_rules: count_status(FindingStatus::Error),
            error_issues: score.error_issues,
            warning_issues: score.warning_issues,
            info_issues,
            quality_score: score.score,
            grade: score.grade.clone(),
        };
        let recommendations = build_recommendations(&findings);

        if let Err(e) = self
            .record_run(period, site_id, overall_status, &summary)
            .await
        {
            warn!(period = %period, "Failed to record validation run: {}", e);
        }

        info!(
            period = %period,
            site_id = site_id.unwrap_or("*"),
            overall_status = %overall_status,
            quality_score = summary.quality_score,
            grade = %summary.grade,
            "Validation run complete"
        );

        Ok(ValidationReport {
            period_start: period.start_str(),
            period_end: period.end_str(),
            site_id: site_id.map(str::to_string),
            overall_status,
            summary,
            findings,
            recommendations,
            timestamp: Utc::now(),
        })
    }

    /// Run one rule by id
    pub async fn run_single(
        &self,
        rule_id: &str,
        period: &Period,
        site_id: Option<&str>,
    ) -> Result<ValidationFinding> {
        let rule = find_rule(rule_id)
            .ok_or_else(|| Error::NotFound(format!("Validation rule not found: {}", rule_id)))?;
        Ok(self.run_rule(rule, period, site_id).await)
    }

    /// Score without recording a run
    pub async fn get_score(&self, period: &Period, site_id: Option<&str>) -> Result<QualityScore> {
        let findings = self.evaluate(period, site_id).await;
        Ok(compute_score(&findings))
    }

    /// Repair rows failing the given rules
    ///
    /// Any id outside the allow-list rejects the whole request before an
    /// update is issued.
    pub async fn auto_fix<S: AsRef<str>>(
        &self,
        rule_ids: &[S],
        period: &Period,
        site_id: Option<&str>,
    ) -> Result<Vec<AppliedFix>> {
        check_allowed(rule_ids)?;
        apply_fixes(&self.pool, rule_ids, period, site_id).await
    }

    /// Latest `limit` entries of the run log, newest first
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<ValidationRunRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, period_start, period_end, site_code, overall_status, quality_score,
                   grade, passed_rules, failed_rules, CAST(created_at AS TEXT) AS created_at
            FROM validation_runs
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ValidationRunRecord {
                id: row.get("id"),
                period_start: row.get("period_start"),
                period_end: row.get("period_end"),
                site_code: row.get("site_code"),
                overall_status: row.get("overall_status"),
                quality_score: row.get("quality_score"),
                grade: row.get("grade"),
                passed_rules: row.get("passed_rules"),
                failed_rules: row.get("failed_rules"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn evaluate(&self, period: &Period, site_id: Option<&str>) -> Vec<ValidationFinding> {
        let mut findings = Vec::with_capacity(catalog().len());
        for rule in catalog() {
            findings.push(self.run_rule(rule, period, site_id).await);
        }
        findings
    }

    async fn run_rule(
        &self,
        rule: &ValidationRule,
        period: &Period,
        site_id: Option<&str>,
    ) -> ValidationFinding {
        let checked = match rule.check {
            RuleCheck::Query(_) => self.query_issues(rule, period, site_id).await,
            RuleCheck::MissingIndicators => self.missing_indicators(period, site_id).await,
        };

        let (status, issues, error) = match checked {
            Ok(issues) if issues.is_empty() => (FindingStatus::Pass, issues, None),
            Ok(issues) => (FindingStatus::Fail, issues, None),
            Err(e) => {
                let e = Error::ValidationRule {
                    rule_id: rule.id.to_string(),
                    message: e.to_string(),
                };
                warn!("{}", e);
                (FindingStatus::Error, Vec::new(), Some(e.to_string()))
            }
        };

        debug!(
            rule_id = rule.id,
            status = ?status,
            issue_count = issues.len(),
            "Validation rule evaluated"
        );

        ValidationFinding {
            rule_id: rule.id.to_string(),
            rule_name: rule.name.to_string(),
            severity: rule.severity,
            category: rule.category,
            status,
            issue_count: issues.len(),
            issues,
            error,
        }
    }

    async fn query_issues(
        &self,
        rule: &ValidationRule,
        period: &Period,
        site_id: Option<&str>,
    ) -> Result<Vec<serde_json::Value>> {
        let sql = rule
            .scoped_query()
            .ok_or_else(|| Error::Internal(format!("Rule {} has no query", rule.id)))?;

        let rows = sqlx::query(&sql)
            .bind(period.start_str())
            .bind(period.end_str())
            .bind(site_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row_to_json(&decode_row(row))).collect())
    }

    async fn missing_indicators(
        &self,
        period: &Period,
        site_id: Option<&str>,
    ) -> Result<Vec<serde_json::Value>> {
        let present: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT indicator_id FROM indicator_aggregates
            WHERE period_start = ?1 AND period_end = ?2 AND (?3 IS NULL OR site_code = ?3)
            "#,
        )
        .bind(period.start_str())
        .bind(period.end_str())
        .bind(site_id)
        .fetch_all(&self.pool)
        .await?;
        let present: HashSet<String> = present.into_iter().collect();

        let inactive: HashSet<String> = list_statuses(&self.pool)
            .await?
            .into_iter()
            .filter(|s| !s.is_active)
            .map(|s| s.indicator_id)
            .collect();

        Ok(self
            .expected_indicators
            .iter()
            .filter(|id| !inactive.contains(*id) && !present.contains(*id))
            .map(|id| serde_json::json!({ "indicator_id": id }))
            .collect())
    }

    async fn record_run(
        &self,
        period: &Period,
        site_id: Option<&str>,
        overall_status: OverallStatus,
        summary: &ValidationSummary,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO validation_runs (
                period_start, period_end, site_code, overall_status,
                quality_score, grade, passed_rules, failed_rules
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(period.start_str())
        .bind(period.end_str())
        .bind(site_id)
        .bind(overall_status.as_str())
        .bind(summary.quality_score)
        .bind(&summary.grade)
        .bind(summary.passed_rules as i64)
        .bind(summary.failed_rules as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(severity: Severity, status: FindingStatus) -> ValidationFinding {
        ValidationFinding {
            rule_id: "r".to_string(),
            rule_name: "r".to_string(),
            severity,
            category: RuleCategory::Integrity,
            status,
            issue_count: 0,
            issues: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn test_overall_status_takes_worst_failure() {
        let fail = FindingStatus::Fail;
        assert_eq!(
            OverallStatus::from_findings(&[finding(Severity::Info, fail), finding(Severity::Error, fail)]),
            OverallStatus::Critical
        );
        assert_eq!(
            OverallStatus::from_findings(&[finding(Severity::Info, fail), finding(Severity::Warning, fail)]),
            OverallStatus::Warning
        );
        assert_eq!(
            OverallStatus::from_findings(&[
                finding(Severity::Info, fail),
                finding(Severity::Error, FindingStatus::Pass)
            ]),
            OverallStatus::Info
        );
        // A rule that could not run is not a data failure
        assert_eq!(
            OverallStatus::from_findings(&[finding(Severity::Error, FindingStatus::Error)]),
            OverallStatus::Healthy
        );
    }

    #[test]
    fn test_report_findings_keyed_by_rule_id_in_catalog_order() {
        let mut first = finding(Severity::Error, FindingStatus::Fail);
        first.rule_id = "percentage_calculation_accuracy".to_string();
        let mut second = finding(Severity::Warning, FindingStatus::Pass);
        second.rule_id = "duplicate_records".to_string();

        let report = ValidationReport {
            period_start: "2025-01-01".to_string(),
            period_end: "2025-03-31".to_string(),
            site_id: None,
            overall_status: OverallStatus::Critical,
            summary: ValidationSummary {
                total_rules: 2,
                passed_rules: 1,
                failed_rules: 1,
                errored_rules: 0,
                error_issues: 0,
                warning_issues: 0,
                info_issues: 0,
                quality_score: 50.0,
                grade: "F".to_string(),
            },
            findings: vec![first, second],
            recommendations: Vec::new(),
            timestamp: Utc::now(),
        };

        let text = serde_json::to_string(&report).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            json["findings"]["percentage_calculation_accuracy"]["status"],
            "FAIL"
        );
        assert_eq!(json["findings"]["duplicate_records"]["status"], "PASS");
        assert!(
            text.find("\"percentage_calculation_accuracy\":").unwrap()
                < text.find("\"duplicate_records\":").unwrap()
        );
    }

    #[test]
    fn test_status_serializes_uppercase() {
        assert_eq!(serde_json::to_value(OverallStatus::Critical).unwrap(), "CRITICAL");
        assert_eq!(serde_json::to_value(FindingStatus::Pass).unwrap(), "PASS");
    }
}
