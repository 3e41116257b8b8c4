//! Validation rule catalog
//!
//! Query rules select offending `indicator_aggregates` rows; `{scope}` is
//! replaced by the period/site filter and binds `?1` period start, `?2`
//! period end, `?3` site code (NULL for every site).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Filter substituted for `{scope}` in rule queries
pub const SCOPE_CLAUSE: &str =
    "period_start = ?1 AND period_end = ?2 AND (?3 IS NULL OR site_code = ?3)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleCategory {
    Calculation,
    Consistency,
    Integrity,
    Completeness,
    Freshness,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::Calculation => "calculation",
            RuleCategory::Consistency => "consistency",
            RuleCategory::Integrity => "integrity",
            RuleCategory::Completeness => "completeness",
            RuleCategory::Freshness => "freshness",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCheck {
    /// SQL returning one row per issue
    Query(&'static str),
    /// Active registered indicators with no row in scope
    MissingIndicators,
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationRule {
    pub id: &'static str,
    pub name: &'static str,
    pub severity: Severity,
    pub category: RuleCategory,
    pub check: RuleCheck,
}

impl ValidationRule {
    /// Query text with the scope filter substituted
    pub fn scoped_query(&self) -> Option<String> {
        match self.check {
            RuleCheck::Query(sql) => Some(sql.replace("{scope}", SCOPE_CLAUSE)),
            RuleCheck::MissingIndicators => None,
        }
    }
}

pub const PERCENTAGE_CALCULATION_ACCURACY: &str = "percentage_calculation_accuracy";
pub const DEMOGRAPHIC_TOTALS_CONSISTENCY: &str = "demographic_totals_consistency";

static RULES: [ValidationRule; 10] = [
    ValidationRule {
        id: PERCENTAGE_CALCULATION_ACCURACY,
        name: "Percentage matches numerator/denominator",
        severity: Severity::Error,
        category: RuleCategory::Calculation,
        check: RuleCheck::Query(
            r#"
            SELECT id, site_code, indicator_id, numerator, denominator, percentage,
                   ROUND(numerator * 100.0 / denominator, 2) AS expected_percentage
            FROM indicator_aggregates
            WHERE {scope}
              AND denominator > 0
              AND ABS(percentage - ROUND(numerator * 100.0 / denominator, 2)) > 0.01
            ORDER BY id
            "#,
        ),
    },
    ValidationRule {
        id: "numerator_exceeds_denominator",
        name: "Numerator does not exceed denominator",
        severity: Severity::Error,
        category: RuleCategory::Consistency,
        check: RuleCheck::Query(
            r#"
            SELECT id, site_code, indicator_id, numerator, denominator
            FROM indicator_aggregates
            WHERE {scope} AND numerator > denominator
            ORDER BY id
            "#,
        ),
    },
    ValidationRule {
        id: "negative_values",
        name: "No negative counts",
        severity: Severity::Error,
        category: RuleCategory::Integrity,
        check: RuleCheck::Query(
            r#"
            SELECT id, site_code, indicator_id, total, numerator, denominator,
                   male_0_14, female_0_14, male_over_14, female_over_14,
                   children_total, adults_total
            FROM indicator_aggregates
            WHERE {scope}
              AND (total < 0 OR numerator < 0 OR denominator < 0
                   OR male_0_14 < 0 OR female_0_14 < 0
                   OR male_over_14 < 0 OR female_over_14 < 0
                   OR children_total < 0 OR adults_total < 0)
            ORDER BY id
            "#,
        ),
    },
    ValidationRule {
        id: DEMOGRAPHIC_TOTALS_CONSISTENCY,
        name: "Children/adults totals match sex breakdown",
        severity: Severity::Error,
        category: RuleCategory::Consistency,
        check: RuleCheck::Query(
            r#"
            SELECT id, site_code, indicator_id,
                   male_0_14, female_0_14, children_total,
                   male_over_14, female_over_14, adults_total
            FROM indicator_aggregates
            WHERE {scope}
              AND (children_total != male_0_14 + female_0_14
                   OR adults_total != male_over_14 + female_over_14)
            ORDER BY id
            "#,
        ),
    },
    ValidationRule {
        id: "zero_denominator_with_numerator",
        name: "No numerator over a zero denominator",
        severity: Severity::Error,
        category: RuleCategory::Calculation,
        check: RuleCheck::Query(
            r#"
            SELECT id, site_code, indicator_id, numerator, denominator
            FROM indicator_aggregates
            WHERE {scope} AND denominator = 0 AND numerator > 0
            ORDER BY id
            "#,
        ),
    },
    ValidationRule {
        id: "percentage_out_of_range",
        name: "Percentage within 0-100",
        severity: Severity::Warning,
        category: RuleCategory::Calculation,
        check: RuleCheck::Query(
            r#"
            SELECT id, site_code, indicator_id, percentage
            FROM indicator_aggregates
            WHERE {scope} AND (percentage < 0 OR percentage > 100)
            ORDER BY id
            "#,
        ),
    },
    ValidationRule {
        id: "demographic_breakdown_matches_denominator",
        name: "Demographic breakdown sums to denominator",
        severity: Severity::Warning,
        category: RuleCategory::Consistency,
        check: RuleCheck::Query(
            r#"
            SELECT id, site_code, indicator_id, denominator, children_total, adults_total
            FROM indicator_aggregates
            WHERE {scope}
              AND (male_0_14 + female_0_14 + male_over_14 + female_over_14) > 0
              AND children_total + adults_total != denominator
            ORDER BY id
            "#,
        ),
    },
    ValidationRule {
        id: "duplicate_records",
        name: "One row per site, indicator and period",
        severity: Severity::Warning,
        category: RuleCategory::Integrity,
        check: RuleCheck::Query(
            r#"
            SELECT site_code, indicator_id, period_start, period_end, COUNT(*) AS row_count
            FROM indicator_aggregates
            WHERE {scope}
            GROUP BY site_code, indicator_id, period_start, period_end
            HAVING COUNT(*) > 1
            ORDER BY site_code, indicator_id
            "#,
        ),
    },
    ValidationRule {
        id: "missing_indicators",
        name: "Every active indicator has results",
        severity: Severity::Warning,
        category: RuleCategory::Completeness,
        check: RuleCheck::MissingIndicators,
    },
    ValidationRule {
        id: "execution_errors_recorded",
        name: "No recorded execution errors",
        severity: Severity::Info,
        category: RuleCategory::Freshness,
        check: RuleCheck::Query(
            r#"
            SELECT id, site_code, indicator_id, error
            FROM indicator_aggregates
            WHERE {scope} AND error IS NOT NULL
            ORDER BY id
            "#,
        ),
    },
];

/// Every rule, in catalog order
pub fn catalog() -> &'static [ValidationRule] {
    &RULES
}

pub fn find_rule(rule_id: &str) -> Option<&'static ValidationRule> {
    RULES.iter().find(|rule| rule.id == rule_id)
}

/// Catalog position, used to order recommendations
pub fn catalog_position(rule_id: &str) -> usize {
    RULES
        .iter()
        .position(|rule| rule.id == rule_id)
        .unwrap_or(RULES.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_has_ten_unique_rules() {
        let ids: HashSet<_> = catalog().iter().map(|r| r.id).collect();
        assert_eq!(catalog().len(), 10);
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn test_scope_substituted() {
        let rule = find_rule("numerator_exceeds_denominator").unwrap();
        let sql = rule.scoped_query().unwrap();
        assert!(!sql.contains("{scope}"));
        assert!(sql.contains("?3 IS NULL"));
        assert!(find_rule("missing_indicators").unwrap().scoped_query().is_none());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error < Severity::Warning);
        assert!(Severity::Warning < Severity::Info);
        assert_eq!(catalog_position(PERCENTAGE_CALCULATION_ACCURACY), 0);
        assert_eq!(catalog_position("nope"), 10);
    }
}
