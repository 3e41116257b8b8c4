//! Remediation recommendations derived from failed findings

use serde::Serialize;

use super::engine::{FindingStatus, ValidationFinding};
use super::rules::{catalog_position, RuleCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    fn for_category(category: RuleCategory) -> Self {
        match category {
            RuleCategory::Calculation | RuleCategory::Consistency => Priority::High,
            RuleCategory::Integrity | RuleCategory::Completeness => Priority::Medium,
            RuleCategory::Freshness => Priority::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub category: RuleCategory,
    pub priority: Priority,
    pub rule_ids: Vec<String>,
    pub message: String,
}

fn message_for(category: RuleCategory) -> &'static str {
    match category {
        RuleCategory::Calculation => {
            "Recalculate percentages from numerator and denominator; run auto-fix for percentage_calculation_accuracy"
        }
        RuleCategory::Consistency => {
            "Review indicator queries for inconsistent numerators, denominators and demographic totals"
        }
        RuleCategory::Integrity => {
            "Inspect source data for negative counts and re-run the batch to remove duplicate rows"
        }
        RuleCategory::Completeness => {
            "Re-run the batch for indicators without results and check their templates"
        }
        RuleCategory::Freshness => "Investigate recorded execution errors at the affected sites",
    }
}

/// One recommendation per failed category, high priority first, then catalog order
pub fn build_recommendations(findings: &[ValidationFinding]) -> Vec<Recommendation> {
    let mut by_category: Vec<(usize, Recommendation)> = Vec::new();

    for finding in findings.iter().filter(|f| f.status == FindingStatus::Fail) {
        let position = catalog_position(&finding.rule_id);
        match by_category
            .iter_mut()
            .find(|(_, r)| r.category == finding.category)
        {
            Some((first, existing)) => {
                *first = (*first).min(position);
                existing.rule_ids.push(finding.rule_id.clone());
            }
            None => by_category.push((
                position,
                Recommendation {
                    category: finding.category,
                    priority: Priority::for_category(finding.category),
                    rule_ids: vec![finding.rule_id.clone()],
                    message: message_for(finding.category).to_string(),
                },
            )),
        }
    }

    by_category.sort_by_key(|(position, r)| (r.priority, *position));
    by_category.into_iter().map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::rules::Severity;

    fn failed(rule_id: &str, category: RuleCategory) -> ValidationFinding {
        ValidationFinding {
            rule_id: rule_id.to_string(),
            rule_name: rule_id.to_string(),
            severity: Severity::Warning,
            category,
            status: FindingStatus::Fail,
            issue_count: 1,
            issues: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn test_one_per_category_ordered_by_priority() {
        let findings = vec![
            failed("execution_errors_recorded", RuleCategory::Freshness),
            failed("duplicate_records", RuleCategory::Integrity),
            failed("percentage_out_of_range", RuleCategory::Calculation),
            failed("percentage_calculation_accuracy", RuleCategory::Calculation),
            failed("numerator_exceeds_denominator", RuleCategory::Consistency),
        ];
        let recs = build_recommendations(&findings);

        let categories: Vec<_> = recs.iter().map(|r| r.category).collect();
        assert_eq!(
            categories,
            vec![
                RuleCategory::Calculation,
                RuleCategory::Consistency,
                RuleCategory::Integrity,
                RuleCategory::Freshness,
            ]
        );
        assert_eq!(recs[0].rule_ids.len(), 2);
        assert_eq!(recs[3].priority, Priority::Low);
    }

    #[test]
    fn test_passing_findings_produce_nothing() {
        let mut finding = failed("negative_values", RuleCategory::Integrity);
        finding.status = FindingStatus::Pass;
        assert!(build_recommendations(&[finding]).is_empty());
    }
}
