//! Aggregate store initialization
//!
//! The aggregate store holds everything the engine persists: indicator
//! active/inactive status, computed indicator aggregates, scheduled job
//! configuration and the validation run log. All table creation is idempotent,
//! so `init_database` is safe to call on every start.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the aggregate store and ensure the schema exists
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new aggregate store: {}", db_path.display());
    } else {
        info!("Opened existing aggregate store: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // Scheduled jobs write while validation reads
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create all aggregate store tables (idempotent)
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_indicator_status_table(pool).await?;
    create_indicator_aggregates_table(pool).await?;
    create_job_configs_table(pool).await?;
    create_validation_runs_table(pool).await?;
    Ok(())
}

/// Per-indicator active flag; rows appear on first status write
pub async fn create_indicator_status_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indicator_status (
            indicator_id TEXT PRIMARY KEY,
            is_active INTEGER NOT NULL DEFAULT 1,
            description TEXT NOT NULL DEFAULT '',
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Computed indicator results, one row per site/indicator/period result row
pub async fn create_indicator_aggregates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indicator_aggregates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            site_code TEXT NOT NULL,
            indicator_id TEXT NOT NULL,
            indicator_name TEXT NOT NULL DEFAULT '',
            period_start TEXT NOT NULL,
            period_end TEXT NOT NULL,
            total INTEGER NOT NULL DEFAULT 0,
            numerator INTEGER NOT NULL DEFAULT 0,
            denominator INTEGER NOT NULL DEFAULT 0,
            percentage REAL NOT NULL DEFAULT 0,
            male_0_14 INTEGER NOT NULL DEFAULT 0,
            female_0_14 INTEGER NOT NULL DEFAULT 0,
            male_over_14 INTEGER NOT NULL DEFAULT 0,
            female_over_14 INTEGER NOT NULL DEFAULT 0,
            children_total INTEGER NOT NULL DEFAULT 0,
            adults_total INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            payload TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_aggregates_scope
        ON indicator_aggregates (period_start, period_end, site_code, indicator_id)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_aggregates_created_at ON indicator_aggregates (created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Scheduled job definitions and their last-run bookkeeping
pub async fn create_job_configs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_configs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_name TEXT NOT NULL UNIQUE,
            job_type TEXT NOT NULL,
            schedule TEXT NOT NULL,
            params TEXT NOT NULL DEFAULT '{}',
            site_id TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            last_run TIMESTAMP,
            last_status TEXT,
            last_error TEXT,
            run_count INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One row per full validation run
pub async fn create_validation_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS validation_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            period_start TEXT NOT NULL,
            period_end TEXT NOT NULL,
            site_code TEXT,
            overall_status TEXT NOT NULL,
            quality_score REAL NOT NULL,
            grade TEXT NOT NULL,
            passed_rules INTEGER NOT NULL,
            failed_rules INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
