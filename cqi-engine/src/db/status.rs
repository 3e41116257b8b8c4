//! Indicator status operations
//!
//! A missing row means the indicator is active.

use async_trait::async_trait;
use cqi_common::db::IndicatorStatus;
use cqi_common::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::batch::StatusStore;

/// Create or update the status row for `indicator_id`
pub async fn set_status(
    pool: &SqlitePool,
    indicator_id: &str,
    is_active: bool,
    description: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO indicator_status (indicator_id, is_active, description, updated_at)
        VALUES (?, ?, COALESCE(?, ''), CURRENT_TIMESTAMP)
        ON CONFLICT(indicator_id) DO UPDATE SET
            is_active = excluded.is_active,
            description = COALESCE(?, indicator_status.description),
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(indicator_id)
    .bind(is_active)
    .bind(description)
    .bind(description)
    .execute(pool)
    .await?;

    Ok(())
}

/// All persisted status rows, by indicator id
pub async fn list_statuses(pool: &SqlitePool) -> Result<Vec<IndicatorStatus>> {
    let rows = sqlx::query(
        "SELECT indicator_id, is_active, description FROM indicator_status ORDER BY indicator_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| IndicatorStatus {
            indicator_id: row.get("indicator_id"),
            is_active: row.get::<i64, _>("is_active") != 0,
            description: row.get("description"),
        })
        .collect())
}

/// Whether `indicator_id` is active (true when never written)
pub async fn is_active(pool: &SqlitePool, indicator_id: &str) -> Result<bool> {
    let active: Option<i64> =
        sqlx::query_scalar("SELECT is_active FROM indicator_status WHERE indicator_id = ?")
            .bind(indicator_id)
            .fetch_optional(pool)
            .await?;
    Ok(active.map(|v| v != 0).unwrap_or(true))
}

/// Status store backed by the aggregate store's `indicator_status` table
#[derive(Clone)]
pub struct SqliteStatusStore {
    pool: SqlitePool,
}

impl SqliteStatusStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn load_statuses(&self) -> Result<HashMap<String, bool>> {
        Ok(list_statuses(&self.pool)
            .await?
            .into_iter()
            .map(|s| (s.indicator_id, s.is_active))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[tokio::test]
    async fn test_absent_status_defaults_to_active() {
        let pool = pool().await;
        assert!(is_active(&pool, "1_percentage_died").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_status_upserts_and_keeps_description() {
        let pool = pool().await;
        set_status(&pool, "1_percentage_died", false, Some("paused for review"))
            .await
            .unwrap();
        assert!(!is_active(&pool, "1_percentage_died").await.unwrap());

        set_status(&pool, "1_percentage_died", true, None).await.unwrap();
        let statuses = list_statuses(&pool).await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].is_active);
        assert_eq!(statuses[0].description, "paused for review");
    }

    #[tokio::test]
    async fn test_store_loads_map() {
        let pool = pool().await;
        set_status(&pool, "a", false, None).await.unwrap();
        set_status(&pool, "b", true, None).await.unwrap();

        let map = SqliteStatusStore::new(pool).load_statuses().await.unwrap();
        assert_eq!(map.get("a"), Some(&false));
        assert_eq!(map.get("b"), Some(&true));
    }
}
