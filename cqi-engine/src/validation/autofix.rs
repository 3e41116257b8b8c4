//! Corrective updates for rules that can be repaired from the row itself

use cqi_common::time::{to_db_timestamp, Period};
use cqi_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use super::rules::{DEMOGRAPHIC_TOTALS_CONSISTENCY, PERCENTAGE_CALCULATION_ACCURACY, SCOPE_CLAUSE};

/// Rules `auto_fix` accepts
pub const AUTO_FIXABLE: [&str; 2] = [PERCENTAGE_CALCULATION_ACCURACY, DEMOGRAPHIC_TOTALS_CONSISTENCY];

pub fn is_auto_fixable(rule_id: &str) -> bool {
    AUTO_FIXABLE.iter().any(|id| *id == rule_id)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedFix {
    pub rule_id: String,
    pub rows_updated: u64,
}

/// Reject the request unless every id is fixable
pub fn check_allowed<S: AsRef<str>>(rule_ids: &[S]) -> Result<()> {
    match rule_ids.iter().find(|id| !is_auto_fixable(id.as_ref())) {
        Some(rejected) => Err(Error::AutoFixRejected(rejected.as_ref().to_string())),
        None => Ok(()),
    }
}

fn fix_statement(rule_id: &str) -> Option<&'static str> {
    match rule_id {
        PERCENTAGE_CALCULATION_ACCURACY => Some(
            r#"
            UPDATE indicator_aggregates
            SET percentage = ROUND(numerator * 100.0 / denominator, 2), updated_at = ?4
            WHERE {scope}
              AND denominator > 0
              AND ABS(percentage - ROUND(numerator * 100.0 / denominator, 2)) > 0.01
            "#,
        ),
        DEMOGRAPHIC_TOTALS_CONSISTENCY => Some(
            r#"
            UPDATE indicator_aggregates
            SET children_total = male_0_14 + female_0_14,
                adults_total = male_over_14 + female_over_14,
                updated_at = ?4
            WHERE {scope}
              AND (children_total != male_0_14 + female_0_14
                   OR adults_total != male_over_14 + female_over_14)
            "#,
        ),
        _ => None,
    }
}

/// Apply fixes for `rule_ids` (already checked against the allow-list)
pub async fn apply_fixes<S: AsRef<str>>(
    pool: &SqlitePool,
    rule_ids: &[S],
    period: &Period,
    site_code: Option<&str>,
) -> Result<Vec<AppliedFix>> {
    check_allowed(rule_ids)?;

    let now = to_db_timestamp(chrono::Utc::now());
    let mut applied = Vec::with_capacity(rule_ids.len());

    for rule_id in rule_ids {
        let rule_id = rule_id.as_ref();
        let statement = fix_statement(rule_id)
            .ok_or_else(|| Error::AutoFixRejected(rule_id.to_string()))?
            .replace("{scope}", SCOPE_CLAUSE);

        let result = sqlx::query(&statement)
            .bind(period.start_str())
            .bind(period.end_str())
            .bind(site_code)
            .bind(&now)
            .execute(pool)
            .await?;

        info!(
            rule_id,
            rows_updated = result.rows_affected(),
            period = %period,
            site_code = site_code.unwrap_or("*"),
            "Applied auto-fix"
        );
        applied.push(AppliedFix {
            rule_id: rule_id.to_string(),
            rows_updated: result.rows_affected(),
        });
    }

    Ok(applied)
}
