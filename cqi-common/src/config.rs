//! Configuration loading and resolution
//!
//! Config file resolution follows a fixed priority order:
//! 1. Command-line argument (highest priority)
//! 2. `CQI_CONFIG` environment variable
//! 3. `~/.config/cqi/config.toml`, then `/etc/cqi/config.toml`
//! 4. Compiled defaults (fallback)
//!
//! A missing auto-discovered file is not fatal: a warning is logged and the
//! compiled defaults apply. An explicitly named file that is missing or
//! malformed is a configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "CQI_CONFIG";

/// Environment variable overriding the aggregate database path
pub const DATABASE_ENV_VAR: &str = "CQI_DATABASE_PATH";

/// Site code reserved for cross-site aggregates
pub const ALL_SITES: &str = "all";

/// One per-site database registered with the router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Site code (e.g. "1705")
    pub id: String,
    /// Human readable name; defaults to the site code
    #[serde(default)]
    pub display_name: String,
    /// Connection URL (`sqlite://...` or `mysql://...`)
    pub url: String,
}

impl SiteConfig {
    pub fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }
}

/// Logging section of the TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Raw TOML configuration file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub database_path: Option<PathBuf>,
    pub templates_dir: Option<PathBuf>,
    pub query_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub max_site_connections: Option<u32>,
    pub event_capacity: Option<usize>,
    pub logging: LoggingConfig,
    pub sites: Vec<SiteConfig>,
    /// Default query parameters (status codes, clinical thresholds)
    pub parameters: toml::Table,
}

impl TomlConfig {
    /// Parse TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Read and parse a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }
}

/// Compiled fallback values
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub data_folder: PathBuf,
    pub query_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_site_connections: u32,
    pub event_capacity: usize,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let data_folder = dirs::data_local_dir()
            .map(|d| d.join("cqi"))
            .unwrap_or_else(|| PathBuf::from("./cqi_data"));

        Self {
            data_folder,
            query_timeout_ms: 120_000,
            connect_timeout_ms: 10_000,
            max_site_connections: 5,
            event_capacity: 100,
        }
    }
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// File the values were read from (None = compiled defaults)
    pub source: Option<PathBuf>,
    pub database_path: PathBuf,
    pub templates_dir: PathBuf,
    pub query_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_site_connections: u32,
    pub event_capacity: usize,
    pub log_level: String,
    pub sites: Vec<SiteConfig>,
    pub parameters: toml::Table,
}

impl Config {
    /// Merge a parsed file with compiled defaults and validate the site list
    pub fn from_toml(toml: TomlConfig, source: Option<PathBuf>) -> Result<Self> {
        let defaults = CompiledDefaults::for_current_platform();
        validate_sites(&toml.sites)?;

        let database_path = std::env::var(DATABASE_ENV_VAR)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or(toml.database_path)
            .unwrap_or_else(|| defaults.data_folder.join("cqi.db"));

        let templates_dir = toml
            .templates_dir
            .unwrap_or_else(|| defaults.data_folder.join("templates"));

        Ok(Self {
            source,
            database_path,
            templates_dir,
            query_timeout_ms: toml.query_timeout_ms.unwrap_or(defaults.query_timeout_ms),
            connect_timeout_ms: toml.connect_timeout_ms.unwrap_or(defaults.connect_timeout_ms),
            max_site_connections: toml
                .max_site_connections
                .unwrap_or(defaults.max_site_connections)
                .max(1),
            event_capacity: toml.event_capacity.unwrap_or(defaults.event_capacity).max(1),
            log_level: toml.logging.level,
            sites: toml.sites,
            parameters: toml.parameters,
        })
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn validate_sites(sites: &[SiteConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for site in sites {
        if site.id.trim().is_empty() {
            return Err(Error::Config("Site entry with empty id".to_string()));
        }
        if site.id == ALL_SITES {
            return Err(Error::Config(format!(
                "Site id '{}' is reserved for cross-site aggregates",
                ALL_SITES
            )));
        }
        if site.url.trim().is_empty() {
            return Err(Error::Config(format!("Site '{}' has no url", site.id)));
        }
        if !seen.insert(site.id.as_str()) {
            return Err(Error::Config(format!("Duplicate site id: {}", site.id)));
        }
    }
    Ok(())
}

/// Resolves which config file to load
pub struct ConfigResolver {
    cli_arg: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new(cli_arg: Option<PathBuf>) -> Self {
        Self { cli_arg }
    }

    /// Resolve and load the configuration
    pub fn resolve(&self) -> Result<Config> {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            return load_explicit(path);
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                return load_explicit(Path::new(&path));
            }
        }

        // Priority 3: Well-known locations
        for candidate in default_config_locations() {
            if candidate.exists() {
                info!("Loading configuration from {}", candidate.display());
                let toml = TomlConfig::load(&candidate)?;
                return Config::from_toml(toml, Some(candidate));
            }
        }

        // Priority 4: Compiled defaults
        warn!("No configuration file found; using compiled defaults");
        Config::from_toml(TomlConfig::default(), None)
    }
}

fn load_explicit(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }
    info!("Loading configuration from {}", path.display());
    let toml = TomlConfig::load(path)?;
    Config::from_toml(toml, Some(path.to_path_buf()))
}

fn default_config_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join("cqi").join("config.toml"));
    }
    if cfg!(unix) {
        locations.push(PathBuf::from("/etc/cqi/config.toml"));
    }
    locations
}
