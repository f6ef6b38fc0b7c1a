//! Server configuration.
//!
//! Loaded once from a TOML file at startup. Every error surfaced here is
//! fatal: the process refuses to serve with a config it cannot fully
//! validate, including group patterns that do not compile and driver names
//! the server does not recognize.

use crate::scanner::{DriverRules, GroupRule};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Drivers the server knows how to catalog. Configuring any other driver
/// name is a startup error.
pub const KNOWN_DRIVERS: &[&str] = &["qemu"];

/// Error type for config operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    #[error("driver {driver}, group {group}: invalid pattern: {source}")]
    Pattern {
        driver: String,
        group: String,
        source: regex::Error,
    },
}

/// Result type for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Optional pid file, written at startup and removed on clean shutdown.
    #[serde(default)]
    pub pidfile: Option<PathBuf>,

    pub net: NetConfig,

    #[serde(default)]
    pub log: LogConfig,

    pub store: StoreConfig,

    /// Per-driver classification rules, keyed by driver name.
    #[serde(default)]
    pub driver: BTreeMap<String, DriverConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetConfig {
    /// Listen address, e.g. "127.0.0.1:8080".
    pub listen: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Minimum severity: debug, info, warn, or error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file, written in addition to stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Root of the image tree to scan.
    pub root: PathBuf,

    /// Seconds between rescans.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Catalog database path; in-memory when absent.
    #[serde(default)]
    pub database: Option<PathBuf>,
}

fn default_scan_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DriverConfig {
    /// Category names valid as the second path segment for this driver.
    #[serde(default)]
    pub categories: Vec<String>,

    /// Ordered group rules; the first matching pattern labels the image.
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub pattern: String,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Interval between rescans.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.store.scan_interval_secs)
    }

    /// Compile the `[driver.*]` sections into the scanner's rule set.
    ///
    /// Rejects unrecognized driver names and patterns that fail to compile.
    pub fn driver_rules(&self) -> Result<HashMap<String, DriverRules>> {
        let mut rules = HashMap::with_capacity(self.driver.len());

        for (name, cfg) in &self.driver {
            if !KNOWN_DRIVERS.contains(&name.as_str()) {
                return Err(ConfigError::UnknownDriver(name.clone()));
            }

            let categories: HashSet<String> = cfg.categories.iter().cloned().collect();

            let mut groups = Vec::with_capacity(cfg.groups.len());
            for group in &cfg.groups {
                let pattern =
                    Regex::new(&group.pattern).map_err(|source| ConfigError::Pattern {
                        driver: name.clone(),
                        group: group.name.clone(),
                        source,
                    })?;
                groups.push(GroupRule::new(&group.name, pattern));
            }

            rules.insert(name.clone(), DriverRules::new(name, categories, groups));
        }

        Ok(rules)
    }
}
