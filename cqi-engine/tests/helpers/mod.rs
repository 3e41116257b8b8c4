//! Test Helper Utilities
//!
//! Shared fixtures for cqi-engine integration tests: a temporary site
//! database, an on-disk template directory and an in-memory aggregate store.

#![allow(dead_code)]

use anyhow::Result;
use chrono::Utc;
use cqi_common::config::SiteConfig;
use cqi_common::time::{Period, PeriodType};
use cqi_engine::indicators::{FileTemplateSource, TemplateRegistry};
use cqi_engine::sites::{RouterOptions, SiteRouter};
use cqi_engine::{Engine, EngineOptions};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const SITE_ID: &str = "1705";

/// Mortality indicator over the `patients` table
pub const PERCENTAGE_DIED: &str = r#"
SELECT '1. Percentage of ART patients who died' AS Indicator,
       COUNT(*) AS TOTAL,
       SUM(died) AS Deaths,
       SUM(died) AS Numerator,
       COUNT(*) AS Denominator,
       ROUND(SUM(died) * 100.0 / COUNT(*), 2) AS Percentage,
       SUM(CASE WHEN sex = 'M' AND age < 15 THEN 1 ELSE 0 END) AS Male_0_14,
       SUM(CASE WHEN sex = 'F' AND age < 15 THEN 1 ELSE 0 END) AS Female_0_14,
       SUM(CASE WHEN sex = 'M' AND age >= 15 THEN 1 ELSE 0 END) AS Male_over_14,
       SUM(CASE WHEN sex = 'F' AND age >= 15 THEN 1 ELSE 0 END) AS Female_over_14
FROM patients
WHERE visit_date BETWEEN {startDate} AND {endDate}
"#;

/// Create a site database with four patients visiting today
///
/// Two of the four died: one boy and one adult man.
pub async fn create_site_db(dir: &Path, site_id: &str) -> Result<SiteConfig> {
    let db_path = dir.join(format!("site_{}.db", site_id));
    let url = format!("sqlite:{}?mode=rwc", db_path.display());
    let pool = SqlitePool::connect(&url).await?;

    sqlx::query(
        "CREATE TABLE patients (id INTEGER PRIMARY KEY, sex TEXT, age INTEGER, died INTEGER, visit_date TEXT)",
    )
    .execute(&pool)
    .await?;

    let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
    for (sex, age, died) in [("M", 10, 1), ("F", 30, 0), ("M", 40, 1), ("F", 12, 0)] {
        sqlx::query("INSERT INTO patients (sex, age, died, visit_date) VALUES (?, ?, ?, ?)")
            .bind(sex)
            .bind(age)
            .bind(died)
            .bind(&today)
            .execute(&pool)
            .await?;
    }
    pool.close().await;

    Ok(SiteConfig {
        id: site_id.to_string(),
        display_name: format!("Site {}", site_id),
        url,
    })
}

/// Write `<id>.sql` files into `dir/templates`
pub fn write_templates(dir: &Path, templates: &[(&str, &str)]) -> Result<PathBuf> {
    let templates_dir = dir.join("templates");
    std::fs::create_dir_all(&templates_dir)?;
    for (id, text) in templates {
        std::fs::write(templates_dir.join(format!("{}.sql", id)), text)?;
    }
    Ok(templates_dir)
}

/// In-memory aggregate store with every table created
pub async fn create_store() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    cqi_common::db::init_schema(&pool).await?;
    Ok(pool)
}

/// Engine over one site database and the given templates
///
/// The TempDir must outlive the engine.
pub async fn create_test_engine(templates: &[(&str, &str)]) -> Result<(TempDir, Engine)> {
    let temp_dir = TempDir::new()?;
    let site = create_site_db(temp_dir.path(), SITE_ID).await?;
    let templates_dir = write_templates(temp_dir.path(), templates)?;

    let registry = TemplateRegistry::load(&FileTemplateSource::new(templates_dir))?;
    let router = SiteRouter::new(vec![site], RouterOptions::default());
    let store = create_store().await?;

    let engine = Engine::assemble(store, registry, router, EngineOptions::default());
    Ok((temp_dir, engine))
}

/// Period the scheduled jobs compute for today
pub fn current_quarter() -> Period {
    PeriodType::CurrentQuarter.range_at(Utc::now().date_naive())
}
