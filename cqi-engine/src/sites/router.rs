//! Site connection router
//!
//! Maps a site code to a pooled connection to that site's database. Pools are
//! established on first use and cached for the process lifetime; nothing here
//! closes them.

use cqi_common::config::{Config, SiteConfig};
use cqi_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{error, info};

use super::rows::{decode_row, RawRow};

/// Registered site as exposed to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteInfo {
    pub id: String,
    pub display_name: String,
}

/// Supplies the set of sites scheduled jobs iterate over
pub trait SiteRegistry: Send + Sync {
    /// Registered sites in configuration order
    fn list_sites(&self) -> Vec<SiteInfo>;
}

/// Live, pooled handle to one site database
#[derive(Clone, Debug)]
pub enum SiteHandle {
    Sqlite(SqlitePool),
    MySql(MySqlPool),
}

impl SiteHandle {
    /// Run (possibly multi-statement) query text and decode every returned row
    pub async fn fetch_rows(&self, sql: &str) -> std::result::Result<Vec<RawRow>, sqlx::Error> {
        match self {
            SiteHandle::Sqlite(pool) => {
                let rows = sqlx::raw_sql(sql).fetch_all(pool).await?;
                Ok(rows.iter().map(decode_row).collect())
            }
            SiteHandle::MySql(pool) => {
                let rows = sqlx::raw_sql(sql).fetch_all(pool).await?;
                Ok(rows.iter().map(decode_row).collect())
            }
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            SiteHandle::Sqlite(_) => "sqlite",
            SiteHandle::MySql(_) => "mysql",
        }
    }
}

/// Pool sizing for site connections
#[derive(Debug, Clone, Copy)]
pub struct RouterOptions {
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

struct SiteSlot {
    config: SiteConfig,
    handle: OnceCell<SiteHandle>,
}

/// Site code → lazily established connection pool
pub struct SiteRouter {
    /// Configuration order
    order: Vec<String>,
    slots: HashMap<String, Arc<SiteSlot>>,
    options: RouterOptions,
}

impl SiteRouter {
    pub fn new(sites: Vec<SiteConfig>, options: RouterOptions) -> Self {
        let mut order = Vec::with_capacity(sites.len());
        let mut slots = HashMap::with_capacity(sites.len());
        for site in sites {
            order.push(site.id.clone());
            slots.insert(
                site.id.clone(),
                Arc::new(SiteSlot {
                    config: site,
                    handle: OnceCell::new(),
                }),
            );
        }
        Self {
            order,
            slots,
            options,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.sites.clone(),
            RouterOptions {
                max_connections: config.max_site_connections,
                connect_timeout: config.connect_timeout(),
            },
        )
    }

    pub fn is_registered(&self, site_id: &str) -> bool {
        self.slots.contains_key(site_id)
    }

    /// Connection for `site_id`, connecting on first access
    ///
    /// A failed connect is not cached; the next call tries again.
    pub async fn connection_for(&self, site_id: &str) -> Result<SiteHandle> {
        let slot = self
            .slots
            .get(site_id)
            .ok_or_else(|| Error::UnknownSite(site_id.to_string()))?;

        let handle = slot
            .handle
            .get_or_try_init(|| connect(&slot.config, self.options))
            .await?;
        Ok(handle.clone())
    }

    /// Number of sites with an established pool
    pub fn connected_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.handle.initialized())
            .count()
    }
}

impl SiteRegistry for SiteRouter {
    fn list_sites(&self) -> Vec<SiteInfo> {
        self.order
            .iter()
            .filter_map(|id| self.slots.get(id))
            .map(|slot| SiteInfo {
                id: slot.config.id.clone(),
                display_name: slot.config.display_name().to_string(),
            })
            .collect()
    }
}

async fn connect(site: &SiteConfig, options: RouterOptions) -> Result<SiteHandle> {
    let url = site.url.as_str();
    let connection_error = |e: sqlx::Error| {
        error!(site_id = %site.id, "Site connection failed: {}", e);
        Error::SiteConnection {
            site_id: site.id.clone(),
            message: e.to_string(),
        }
    };

    let handle = if url.starts_with("sqlite:") {
        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.connect_timeout)
            .connect(url)
            .await
            .map_err(connection_error)?;
        SiteHandle::Sqlite(pool)
    } else if url.starts_with("mysql:") || url.starts_with("mariadb:") {
        let pool = MySqlPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.connect_timeout)
            .connect(url)
            .await
            .map_err(connection_error)?;
        SiteHandle::MySql(pool)
    } else {
        return Err(Error::SiteConnection {
            site_id: site.id.clone(),
            message: format!("unsupported database url scheme: {}", url),
        });
    };

    info!(site_id = %site.id, backend = handle.backend(), "Connected to site database");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(id: &str, url: &str) -> SiteConfig {
        SiteConfig {
            id: id.to_string(),
            display_name: String::new(),
            url: url.to_string(),
        }
    }

    #[tokio::test]
    async fn test_unknown_site_rejected() {
        let router = SiteRouter::new(vec![site("1705", "sqlite::memory:")], RouterOptions::default());
        let err = router.connection_for("9999").await.unwrap_err();
        assert!(matches!(err, Error::UnknownSite(id) if id == "9999"));
    }

    #[tokio::test]
    async fn test_connection_is_lazy_and_cached() {
        let router = SiteRouter::new(
            vec![site("1705", "sqlite::memory:"), site("0201", "sqlite::memory:")],
            RouterOptions::default(),
        );
        assert_eq!(router.connected_count(), 0);

        let first = router.connection_for("1705").await.unwrap();
        let second = router.connection_for("1705").await.unwrap();
        assert_eq!(router.connected_count(), 1);

        // Same underlying pool
        match (first, second) {
            (SiteHandle::Sqlite(a), SiteHandle::Sqlite(b)) => {
                assert_eq!(a.size(), b.size());
            }
            _ => panic!("expected sqlite handles"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_pool() {
        let router = Arc::new(SiteRouter::new(
            vec![site("1705", "sqlite::memory:")],
            RouterOptions::default(),
        ));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let router = Arc::clone(&router);
            tasks.push(tokio::spawn(async move {
                router.connection_for("1705").await.map(|_| ())
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(router.connected_count(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_connection_error() {
        let router = SiteRouter::new(vec![site("1705", "postgres://x")], RouterOptions::default());
        let err = router.connection_for("1705").await.unwrap_err();
        assert!(matches!(err, Error::SiteConnection { .. }));
        // Failure is not cached as a connection
        assert_eq!(router.connected_count(), 0);
    }

    #[test]
    fn test_list_sites_keeps_config_order() {
        let router = SiteRouter::new(
            vec![site("1705", "sqlite::memory:"), site("0201", "sqlite::memory:")],
            RouterOptions::default(),
        );
        let ids: Vec<_> = router.list_sites().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["1705".to_string(), "0201".to_string()]);
        assert_eq!(router.list_sites()[0].display_name, "1705");
    }

    #[tokio::test]
    async fn test_fetch_rows_runs_multiple_statements() {
        let router = SiteRouter::new(vec![site("1705", "sqlite::memory:")], RouterOptions::default());
        let handle = router.connection_for("1705").await.unwrap();
        let rows = handle
            .fetch_rows("SELECT 1 AS a; SELECT 2 AS a;")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }
}
