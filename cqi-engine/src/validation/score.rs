//! Data quality score and letter grade

use serde::Serialize;

use super::engine::{FindingStatus, ValidationFinding};
use super::rules::Severity;
use crate::normalizer::round2;

const MAX_ERROR_PENALTY: f64 = 30.0;
const MAX_WARNING_PENALTY: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityScore {
    pub score: f64,
    pub grade: String,
    pub passed_rules: usize,
    pub total_rules: usize,
    pub error_issues: usize,
    pub warning_issues: usize,
}

/// Score findings: pass rate minus capped per-issue penalties, in `[0, 100]`
pub fn compute_score(findings: &[ValidationFinding]) -> QualityScore {
    let total_rules = findings.len();
    let passed_rules = findings
        .iter()
        .filter(|f| f.status == FindingStatus::Pass)
        .count();

    let issues_of = |severity: Severity| -> usize {
        findings
            .iter()
            .filter(|f| f.status == FindingStatus::Fail && f.severity == severity)
            .map(|f| f.issue_count)
            .sum()
    };
    let error_issues = issues_of(Severity::Error);
    let warning_issues = issues_of(Severity::Warning);

    let base = if total_rules == 0 {
        100.0
    } else {
        100.0 * passed_rules as f64 / total_rules as f64
    };
    let penalty = (5.0 * error_issues as f64).min(MAX_ERROR_PENALTY)
        + (2.0 * warning_issues as f64).min(MAX_WARNING_PENALTY);
    let score = round2((base - penalty).clamp(0.0, 100.0));

    QualityScore {
        score,
        grade: grade_for(score).to_string(),
        passed_rules,
        total_rules,
        error_issues,
        warning_issues,
    }
}

pub fn grade_for(score: f64) -> &'static str {
    match score {
        s if s >= 95.0 => "A+",
        s if s >= 90.0 => "A",
        s if s >= 85.0 => "B+",
        s if s >= 80.0 => "B",
        s if s >= 75.0 => "C+",
        s if s >= 70.0 => "C",
        s if s >= 60.0 => "D",
        _ => "F",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::rules::RuleCategory;

    fn finding(status: FindingStatus, severity: Severity, issues: usize) -> ValidationFinding {
        ValidationFinding {
            rule_id: "r".to_string(),
            rule_name: "r".to_string(),
            severity,
            category: RuleCategory::Calculation,
            status,
            issue_count: issues,
            issues: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn test_grade_boundaries() {
        assert_eq!(grade_for(100.0), "A+");
        assert_eq!(grade_for(95.0), "A+");
        assert_eq!(grade_for(94.99), "A");
        assert_eq!(grade_for(85.0), "B+");
        assert_eq!(grade_for(80.0), "B");
        assert_eq!(grade_for(75.0), "C+");
        assert_eq!(grade_for(70.0), "C");
        assert_eq!(grade_for(60.0), "D");
        assert_eq!(grade_for(59.99), "F");
    }

    #[test]
    fn test_all_pass_is_perfect() {
        let findings = vec![finding(FindingStatus::Pass, Severity::Error, 0); 10];
        let score = compute_score(&findings);
        assert_eq!(score.score, 100.0);
        assert_eq!(score.grade, "A+");
    }

    #[test]
    fn test_penalties_are_capped() {
        let mut findings = vec![finding(FindingStatus::Pass, Severity::Error, 0); 8];
        findings.push(finding(FindingStatus::Fail, Severity::Error, 1000));
        findings.push(finding(FindingStatus::Fail, Severity::Warning, 1000));
        // base 80, minus 30 and 20
        assert_eq!(compute_score(&findings).score, 30.0);
    }

    #[test]
    fn test_score_never_negative() {
        let findings = vec![finding(FindingStatus::Fail, Severity::Error, 50); 10];
        let score = compute_score(&findings);
        assert_eq!(score.score, 0.0);
        assert_eq!(score.grade, "F");
    }

    #[test]
    fn test_errored_rules_do_not_pass_or_penalize() {
        let mut findings = vec![finding(FindingStatus::Pass, Severity::Error, 0); 9];
        findings.push(finding(FindingStatus::Error, Severity::Error, 0));
        let score = compute_score(&findings);
        assert_eq!(score.passed_rules, 9);
        assert_eq!(score.score, 90.0);
    }
}
