//! Validation engine over a populated aggregate store

mod helpers;

use cqi_common::time::Period;
use cqi_common::Error;
use cqi_engine::db::aggregates;
use cqi_engine::normalizer::CanonicalResult;
use cqi_engine::validation::{FindingStatus, OverallStatus};
use helpers::{create_test_engine, PERCENTAGE_DIED, SITE_ID};

const PERCENTAGE_RULE: &str = "percentage_calculation_accuracy";

fn q1() -> Period {
    Period::parse("2025-01-01", "2025-03-31").unwrap()
}

/// 25 of 100 with a stored percentage of 30
fn miscalculated() -> CanonicalResult {
    let mut result = CanonicalResult {
        indicator: "1. Percentage of ART patients who died".to_string(),
        indicator_id: "1_percentage_died".to_string(),
        total: 100,
        numerator: 25,
        denominator: 100,
        percentage: 30.0,
        male_0_14: 10,
        female_0_14: 15,
        male_over_14: 35,
        female_over_14: 40,
        ..CanonicalResult::default()
    };
    result.derive_totals();
    result
}

#[tokio::test]
async fn test_wrong_percentage_detected_and_fixed() {
    let (_dir, engine) = create_test_engine(&[("1_percentage_died", PERCENTAGE_DIED)])
        .await
        .unwrap();
    aggregates::replace_results(&engine.db, SITE_ID, &q1(), &[miscalculated()])
        .await
        .unwrap();

    let report = engine.validation.run_all(&q1(), Some(SITE_ID)).await.unwrap();
    let finding = report.finding(PERCENTAGE_RULE).unwrap();
    assert_eq!(finding.status, FindingStatus::Fail);
    assert_eq!(finding.issue_count, 1);
    assert_eq!(report.overall_status, OverallStatus::Critical);
    assert_eq!(report.failed_rule_ids(), vec![PERCENTAGE_RULE.to_string()]);
    assert!(!report.recommendations.is_empty());

    let fixes = engine
        .validation
        .auto_fix(&[PERCENTAGE_RULE], &q1(), Some(SITE_ID))
        .await
        .unwrap();
    assert_eq!(fixes.len(), 1);
    assert_eq!(fixes[0].rows_updated, 1);

    let rows = aggregates::fetch_results(&engine.db, &q1(), Some(SITE_ID))
        .await
        .unwrap();
    assert_eq!(rows[0].percentage, 25.0);

    let rerun = engine.validation.run_all(&q1(), Some(SITE_ID)).await.unwrap();
    assert_eq!(rerun.finding(PERCENTAGE_RULE).unwrap().status, FindingStatus::Pass);
    assert_eq!(rerun.overall_status, OverallStatus::Healthy);
    assert!(rerun.summary.quality_score > report.summary.quality_score);
}

#[tokio::test]
async fn test_auto_fix_rejects_whole_request() {
    let (_dir, engine) = create_test_engine(&[("1_percentage_died", PERCENTAGE_DIED)])
        .await
        .unwrap();
    aggregates::replace_results(&engine.db, SITE_ID, &q1(), &[miscalculated()])
        .await
        .unwrap();

    let err = engine
        .validation
        .auto_fix(&[PERCENTAGE_RULE, "negative_values"], &q1(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AutoFixRejected(ref id) if id == "negative_values"));

    // Nothing was updated
    let rows = aggregates::fetch_results(&engine.db, &q1(), None).await.unwrap();
    assert_eq!(rows[0].percentage, 30.0);
}

#[tokio::test]
async fn test_site_scope_isolates_findings() {
    let (_dir, engine) = create_test_engine(&[("1_percentage_died", PERCENTAGE_DIED)])
        .await
        .unwrap();
    let mut clean = miscalculated();
    clean.recompute_percentage();
    aggregates::replace_results(&engine.db, SITE_ID, &q1(), &[clean])
        .await
        .unwrap();
    aggregates::replace_results(&engine.db, "0201", &q1(), &[miscalculated()])
        .await
        .unwrap();

    let scoped = engine.validation.run_all(&q1(), Some(SITE_ID)).await.unwrap();
    assert_eq!(scoped.finding(PERCENTAGE_RULE).unwrap().status, FindingStatus::Pass);

    let everything = engine.validation.run_all(&q1(), None).await.unwrap();
    assert_eq!(everything.finding(PERCENTAGE_RULE).unwrap().status, FindingStatus::Fail);
}

#[tokio::test]
async fn test_score_bounded_and_not_logged() {
    let (_dir, engine) = create_test_engine(&[("1_percentage_died", PERCENTAGE_DIED)])
        .await
        .unwrap();

    let mut broken = miscalculated();
    broken.numerator = 150;
    broken.male_0_14 = -3;
    aggregates::replace_results(&engine.db, SITE_ID, &q1(), &[broken])
        .await
        .unwrap();

    let score = engine.validation.get_score(&q1(), None).await.unwrap();
    assert!((0.0..=100.0).contains(&score.score));
    assert!(score.passed_rules < score.total_rules);
    assert!(engine.validation.recent_runs(10).await.unwrap().is_empty());

    engine.validation.run_all(&q1(), None).await.unwrap();
    assert_eq!(engine.validation.recent_runs(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_indicator_reported() {
    let (_dir, engine) = create_test_engine(&[("1_percentage_died", PERCENTAGE_DIED)])
        .await
        .unwrap();

    let finding = engine
        .validation
        .run_single("missing_indicators", &q1(), Some(SITE_ID))
        .await
        .unwrap();
    assert_eq!(finding.status, FindingStatus::Fail);
    assert_eq!(finding.issues[0]["indicator_id"], "1_percentage_died");

    let err = engine
        .validation
        .run_single("no_such_rule", &q1(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_report_returned_when_run_log_unwritable() {
    let (_dir, engine) = create_test_engine(&[("1_percentage_died", PERCENTAGE_DIED)])
        .await
        .unwrap();
    aggregates::replace_results(&engine.db, SITE_ID, &q1(), &[miscalculated()])
        .await
        .unwrap();
    sqlx::query("DROP TABLE validation_runs")
        .execute(&engine.db)
        .await
        .unwrap();

    let report = engine.validation.run_all(&q1(), Some(SITE_ID)).await.unwrap();
    assert_eq!(report.overall_status, OverallStatus::Critical);
    assert_eq!(report.finding(PERCENTAGE_RULE).unwrap().status, FindingStatus::Fail);
}

#[tokio::test]
async fn test_demographic_totals_fixed_in_store() {
    let (_dir, engine) = create_test_engine(&[("1_percentage_died", PERCENTAGE_DIED)])
        .await
        .unwrap();
    let mut stale = miscalculated();
    stale.recompute_percentage();
    stale.children_total = 99;
    stale.adults_total = 1;
    aggregates::replace_results(&engine.db, SITE_ID, &q1(), &[stale])
        .await
        .unwrap();

    let report = engine.validation.run_all(&q1(), Some(SITE_ID)).await.unwrap();
    assert_eq!(
        report.finding("demographic_totals_consistency").unwrap().status,
        FindingStatus::Fail
    );

    let fixes = engine
        .validation
        .auto_fix(&["demographic_totals_consistency"], &q1(), Some(SITE_ID))
        .await
        .unwrap();
    assert_eq!(fixes[0].rows_updated, 1);

    let rows = aggregates::fetch_results(&engine.db, &q1(), Some(SITE_ID))
        .await
        .unwrap();
    assert_eq!(rows[0].children_total, 25);
    assert_eq!(rows[0].adults_total, 75);

    let rerun = engine.validation.run_all(&q1(), Some(SITE_ID)).await.unwrap();
    assert_eq!(rerun.overall_status, OverallStatus::Healthy);
}

#[tokio::test]
async fn test_rule_that_cannot_run_is_an_error_finding() {
    let (_dir, engine) = create_test_engine(&[("1_percentage_died", PERCENTAGE_DIED)])
        .await
        .unwrap();
    aggregates::replace_results(&engine.db, SITE_ID, &q1(), &[miscalculated()])
        .await
        .unwrap();
    sqlx::query("ALTER TABLE indicator_aggregates DROP COLUMN error")
        .execute(&engine.db)
        .await
        .unwrap();

    let report = engine.validation.run_all(&q1(), Some(SITE_ID)).await.unwrap();

    let broken = report.finding("execution_errors_recorded").unwrap();
    assert_eq!(broken.status, FindingStatus::Error);
    assert!(broken.error.is_some());

    // The rest of the catalog still ran
    assert_eq!(report.findings.len(), 10);
    assert_eq!(report.summary.errored_rules, 1);
    assert_eq!(report.finding(PERCENTAGE_RULE).unwrap().status, FindingStatus::Fail);
    assert_eq!(report.overall_status, OverallStatus::Critical);
    assert!((0.0..=100.0).contains(&report.summary.quality_score));
}
