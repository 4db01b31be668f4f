//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (VIEWQUERY_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [view]
//! sql_template_delimiter = "$"
//!
//! [fetch]
//! workers = 7
//! timeout_ms = 30000
//!
//! [cache]
//! enabled = true
//! max_entries = 1000
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! VIEWQUERY_FETCH__TIMEOUT_MS=5000
//! VIEWQUERY_CACHE__ENABLED=false
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub view: ViewConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// View template settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    /// Single character surrounding variable names in view SQL
    #[serde(default = "default_delimiter")]
    pub sql_template_delimiter: String,

    /// Maximum view SQL size in bytes. 0 = no limit.
    #[serde(default = "default_max_sql_bytes")]
    pub max_sql_bytes: usize,
}

/// External auth-value fetch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Concurrent fetches per resolution call
    #[serde(default = "default_fetch_workers")]
    pub workers: usize,

    /// Whole-batch deadline in milliseconds. 0 = no timeout.
    #[serde(default = "default_fetch_timeout_ms")]
    pub timeout_ms: u64,
}

/// Result cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// When false, requests asking for caching go straight to the source
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Capacity of the in-process cache store
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_delimiter() -> String {
    "$".to_string()
}
fn default_max_sql_bytes() -> usize {
    1_048_576 // 1 MB
}
fn default_fetch_workers() -> usize {
    crate::fetcher::DEFAULT_FETCH_WORKERS
}
fn default_fetch_timeout_ms() -> u64 {
    30_000
}
fn default_true() -> bool {
    true
}
fn default_cache_max_entries() -> usize {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. config.toml (base configuration)
    /// 2. config.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (VIEWQUERY_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("VIEWQUERY_").split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("VIEWQUERY_").split("__"))
            .extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            view: ViewConfig::default(),
            fetch: FetchConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        ViewConfig {
            sql_template_delimiter: default_delimiter(),
            max_sql_bytes: default_max_sql_bytes(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            workers: default_fetch_workers(),
            timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            max_entries: default_cache_max_entries(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
