//! Indicator aggregate persistence
//!
//! Rows are keyed by site code, indicator id and reporting period. Writing a
//! batch replaces whatever that batch previously stored for the same key.

use chrono::{DateTime, Utc};
use cqi_common::config::ALL_SITES;
use cqi_common::time::{to_db_timestamp, Period};
use cqi_common::{Error, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::normalizer::CanonicalResult;

/// One persisted aggregate row
#[derive(Debug, Clone, Serialize)]
pub struct AggregateRow {
    pub id: i64,
    pub site_code: String,
    pub indicator_id: String,
    pub indicator_name: String,
    pub period_start: String,
    pub period_end: String,
    pub total: i64,
    pub numerator: i64,
    pub denominator: i64,
    pub percentage: f64,
    pub male_0_14: i64,
    pub female_0_14: i64,
    pub male_over_14: i64,
    pub female_over_14: i64,
    pub children_total: i64,
    pub adults_total: i64,
    pub error: Option<String>,
    pub created_at: String,
}

impl AggregateRow {
    fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            site_code: row.get("site_code"),
            indicator_id: row.get("indicator_id"),
            indicator_name: row.get("indicator_name"),
            period_start: row.get("period_start"),
            period_end: row.get("period_end"),
            total: row.get("total"),
            numerator: row.get("numerator"),
            denominator: row.get("denominator"),
            percentage: row.get("percentage"),
            male_0_14: row.get("male_0_14"),
            female_0_14: row.get("female_0_14"),
            male_over_14: row.get("male_over_14"),
            female_over_14: row.get("female_over_14"),
            children_total: row.get("children_total"),
            adults_total: row.get("adults_total"),
            error: row.get("error"),
            created_at: row.get("created_at"),
        }
    }
}

/// Store `results` for `site_code` and `period`
///
/// For every indicator present in `results`, existing rows for the same
/// site/period are deleted first. Delete and insert share one transaction.
/// Returns the number of rows inserted.
pub async fn replace_results(
    pool: &SqlitePool,
    site_code: &str,
    period: &Period,
    results: &[CanonicalResult],
) -> Result<usize> {
    let period_start = period.start_str();
    let period_end = period.end_str();
    let now = to_db_timestamp(Utc::now());

    let indicator_ids: BTreeSet<&str> = results.iter().map(indicator_key).collect();

    let mut tx = pool.begin().await?;

    for indicator_id in &indicator_ids {
        sqlx::query(
            r#"
            DELETE FROM indicator_aggregates
            WHERE site_code = ? AND indicator_id = ? AND period_start = ? AND period_end = ?
            "#,
        )
        .bind(site_code)
        .bind(*indicator_id)
        .bind(&period_start)
        .bind(&period_end)
        .execute(&mut *tx)
        .await?;
    }

    for result in results {
        let payload = serde_json::to_string(result)
            .map_err(|e| Error::Internal(format!("Failed to serialize result: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO indicator_aggregates (
                site_code, indicator_id, indicator_name, period_start, period_end,
                total, numerator, denominator, percentage,
                male_0_14, female_0_14, male_over_14, female_over_14,
                children_total, adults_total, error, payload, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(site_code)
        .bind(indicator_key(result))
        .bind(&result.indicator)
        .bind(&period_start)
        .bind(&period_end)
        .bind(result.total)
        .bind(result.numerator)
        .bind(result.denominator)
        .bind(result.percentage)
        .bind(result.male_0_14)
        .bind(result.female_0_14)
        .bind(result.male_over_14)
        .bind(result.female_over_14)
        .bind(result.children_total)
        .bind(result.adults_total)
        .bind(&result.error)
        .bind(&payload)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    debug!(
        site_code,
        period = %period,
        indicators = indicator_ids.len(),
        rows = results.len(),
        "Stored indicator aggregates"
    );
    Ok(results.len())
}

fn indicator_key(result: &CanonicalResult) -> &str {
    if result.indicator_id.is_empty() {
        &result.indicator
    } else {
        &result.indicator_id
    }
}

/// Sum per-site results into one result per indicator (the `all` pseudo-site)
///
/// Indicators keep first-seen order. Error placeholders contribute zeros; the
/// merged result only carries an error when no site succeeded for it.
pub fn merge_site_results(per_site: &[Vec<CanonicalResult>]) -> Vec<CanonicalResult> {
    let mut merged: Vec<CanonicalResult> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut succeeded: Vec<bool> = Vec::new();

    for result in per_site.iter().flatten() {
        let key = indicator_key(result).to_string();
        let slot = match index.get(&key) {
            Some(&slot) => slot,
            None => {
                let mut seed = CanonicalResult {
                    indicator: result.indicator.clone(),
                    indicator_id: result.indicator_id.clone(),
                    error: result.error.clone(),
                    ..CanonicalResult::default()
                };
                seed.derive_totals();
                index.insert(key, merged.len());
                merged.push(seed);
                succeeded.push(false);
                merged.len() - 1
            }
        };

        if !result.is_error() {
            merged[slot].accumulate(result);
            succeeded[slot] = true;
        }
    }

    for (result, ok) in merged.iter_mut().zip(succeeded) {
        if ok {
            result.error = None;
        }
        result.recompute_percentage();
    }
    merged
}

/// Persisted rows for a period, optionally restricted to one site
pub async fn fetch_results(
    pool: &SqlitePool,
    period: &Period,
    site_code: Option<&str>,
) -> Result<Vec<AggregateRow>> {
    let rows = sqlx::query(
        r#"
        SELECT id, site_code, indicator_id, indicator_name, period_start, period_end,
               total, numerator, denominator, percentage,
               male_0_14, female_0_14, male_over_14, female_over_14,
               children_total, adults_total, error, CAST(created_at AS TEXT) AS created_at
        FROM indicator_aggregates
        WHERE period_start = ?1 AND period_end = ?2 AND (?3 IS NULL OR site_code = ?3)
        ORDER BY site_code, id
        "#,
    )
    .bind(period.start_str())
    .bind(period.end_str())
    .bind(site_code)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(AggregateRow::from_row).collect())
}

/// Delete rows created before `cutoff`; returns the number removed
pub async fn delete_older_than(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM indicator_aggregates WHERE created_at < ?")
        .bind(to_db_timestamp(cutoff))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Whether `site_code` is the synthetic all-sites aggregate
pub fn is_all_sites(site_code: &str) -> bool {
    site_code == ALL_SITES
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        cqi_common::db::init_schema(&pool).await.unwrap();
        pool
    }

    fn period() -> Period {
        Period::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
        )
    }

    fn result(id: &str, numerator: i64, denominator: i64) -> CanonicalResult {
        let mut r = CanonicalResult {
            indicator: format!("{} name", id),
            indicator_id: id.to_string(),
            numerator,
            denominator,
            male_0_14: 1,
            ..Default::default()
        };
        r.recompute_percentage();
        r.derive_totals();
        r
    }

    #[tokio::test]
    async fn test_replace_results_replaces_same_key() {
        let pool = pool().await;
        replace_results(&pool, "1705", &period(), &[result("a", 1, 4), result("b", 2, 4)])
            .await
            .unwrap();
        replace_results(&pool, "1705", &period(), &[result("a", 3, 4)])
            .await
            .unwrap();

        let rows = fetch_results(&pool, &period(), Some("1705")).await.unwrap();
        assert_eq!(rows.len(), 2);
        let a = rows.iter().find(|r| r.indicator_id == "a").unwrap();
        assert_eq!(a.numerator, 3);
        assert_eq!(a.percentage, 75.0);
        assert_eq!(a.children_total, 1);
    }

    #[tokio::test]
    async fn test_fetch_without_site_returns_every_site() {
        let pool = pool().await;
        replace_results(&pool, "1705", &period(), &[result("a", 1, 4)]).await.unwrap();
        replace_results(&pool, "0201", &period(), &[result("a", 1, 4)]).await.unwrap();

        assert_eq!(fetch_results(&pool, &period(), None).await.unwrap().len(), 2);
        assert_eq!(fetch_results(&pool, &period(), Some("0201")).await.unwrap().len(), 1);
    }

    #[test]
    fn test_merge_sums_and_recomputes_percentage() {
        let merged = merge_site_results(&[
            vec![result("a", 10, 40), result("b", 1, 1)],
            vec![result("a", 5, 20)],
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].indicator_id, "a");
        assert_eq!(merged[0].numerator, 15);
        assert_eq!(merged[0].denominator, 60);
        assert_eq!(merged[0].percentage, 25.0);
        assert_eq!(merged[0].children_total, 2);
    }

    #[test]
    fn test_merge_error_only_when_no_site_succeeded() {
        let failed = CanonicalResult::placeholder("a name", "a", "timeout");
        let merged = merge_site_results(&[vec![failed.clone()], vec![result("a", 1, 2)]]);
        assert!(merged[0].error.is_none());
        assert_eq!(merged[0].numerator, 1);

        let merged = merge_site_results(&[vec![failed.clone()], vec![failed]]);
        assert_eq!(merged[0].error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_all_sites_code() {
        assert!(is_all_sites("all"));
        assert!(!is_all_sites("1705"));
    }
}
