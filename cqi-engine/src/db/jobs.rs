//! Job configuration database operations
//!
//! `job_configs` holds one row per scheduled job. Rows are seeded from the
//! default catalog when the table is empty and mutated on every firing; they
//! are never deleted here.

use chrono::{DateTime, Utc};
use cqi_common::db::{JobConfig, JobStatus};
use cqi_common::time::{from_db_timestamp, to_db_timestamp};
use cqi_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

const SELECT_JOBS: &str = r#"
    SELECT job_name, job_type, schedule, params, site_id, is_active,
           CAST(last_run AS TEXT) AS last_run, last_status, last_error, run_count
    FROM job_configs
"#;

fn job_from_row(row: &SqliteRow) -> Result<JobConfig> {
    let job_type: String = row.get("job_type");
    let params: String = row.get("params");
    let last_run: Option<String> = row.get("last_run");
    let last_status: Option<String> = row.get("last_status");

    Ok(JobConfig {
        job_name: row.get("job_name"),
        job_type: job_type.parse()?,
        schedule: row.get("schedule"),
        params: serde_json::from_str(&params)
            .map_err(|e| Error::Internal(format!("Invalid job params JSON: {}", e)))?,
        site_id: row.get("site_id"),
        is_active: row.get::<i64, _>("is_active") != 0,
        last_run: last_run.as_deref().and_then(from_db_timestamp),
        last_status: last_status.as_deref().map(str::parse).transpose()?,
        last_error: row.get("last_error"),
        run_count: row.get("run_count"),
    })
}

/// Every job, by name
pub async fn list_jobs(pool: &SqlitePool) -> Result<Vec<JobConfig>> {
    let rows = sqlx::query(&format!("{} ORDER BY job_name", SELECT_JOBS))
        .fetch_all(pool)
        .await?;
    rows.iter().map(job_from_row).collect()
}

/// Active jobs, by name
pub async fn list_active_jobs(pool: &SqlitePool) -> Result<Vec<JobConfig>> {
    let rows = sqlx::query(&format!("{} WHERE is_active = 1 ORDER BY job_name", SELECT_JOBS))
        .fetch_all(pool)
        .await?;
    rows.iter().map(job_from_row).collect()
}

pub async fn get_job(pool: &SqlitePool, job_name: &str) -> Result<Option<JobConfig>> {
    let row = sqlx::query(&format!("{} WHERE job_name = ?", SELECT_JOBS))
        .bind(job_name)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Insert or update a job definition
///
/// Run bookkeeping (`last_run`, `last_status`, `last_error`, `run_count`) of an
/// existing row is preserved.
pub async fn upsert_job(pool: &SqlitePool, job: &JobConfig) -> Result<()> {
    let params = serde_json::to_string(&job.params)
        .map_err(|e| Error::Internal(format!("Failed to serialize job params: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO job_configs (job_name, job_type, schedule, params, site_id, is_active)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(job_name) DO UPDATE SET
            job_type = excluded.job_type,
            schedule = excluded.schedule,
            params = excluded.params,
            site_id = excluded.site_id,
            is_active = excluded.is_active,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(&job.job_name)
    .bind(job.job_type.as_str())
    .bind(&job.schedule)
    .bind(&params)
    .bind(&job.site_id)
    .bind(job.is_active)
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert `defaults` when the table holds no jobs; returns the number seeded
pub async fn seed_if_empty(pool: &SqlitePool, defaults: &[JobConfig]) -> Result<usize> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_configs")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(0);
    }

    for job in defaults {
        upsert_job(pool, job).await?;
    }
    info!("Seeded {} default job configurations", defaults.len());
    Ok(defaults.len())
}

pub async fn set_active(pool: &SqlitePool, job_name: &str, is_active: bool) -> Result<()> {
    let result = sqlx::query(
        "UPDATE job_configs SET is_active = ?, updated_at = CURRENT_TIMESTAMP WHERE job_name = ?",
    )
    .bind(is_active)
    .bind(job_name)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Job not found: {}", job_name)));
    }
    Ok(())
}

/// Record that a firing began
pub async fn mark_running(pool: &SqlitePool, job_name: &str, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE job_configs
        SET last_status = ?, last_run = ?, updated_at = CURRENT_TIMESTAMP
        WHERE job_name = ?
        "#,
    )
    .bind(JobStatus::Running.as_str())
    .bind(to_db_timestamp(now))
    .bind(job_name)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record how a firing ended and count it
pub async fn record_outcome(
    pool: &SqlitePool,
    job_name: &str,
    status: JobStatus,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE job_configs
        SET last_status = ?, last_error = ?, run_count = run_count + 1,
            updated_at = CURRENT_TIMESTAMP
        WHERE job_name = ?
        "#,
    )
    .bind(status.as_str())
    .bind(error)
    .bind(job_name)
    .execute(pool)
    .await?;
    Ok(())
}

/// Clear `last_error` on jobs whose last status is not `error`
pub async fn clear_stale_errors(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE job_configs
        SET last_error = NULL, updated_at = CURRENT_TIMESTAMP
        WHERE last_error IS NOT NULL AND (last_status IS NULL OR last_status != 'error')
        "#,
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
