//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (`RULESENGINE_*` prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [http]
//! default_timeout_ms = 30000
//! default_max_retries = 3
//!
//! [resolution]
//! max_concurrency = 8
//! cache_bucket_width_ms = 300000
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! RULESENGINE_HTTP__DEFAULT_TIMEOUT_MS=10000
//! RULESENGINE_RESOLUTION__MAX_CONCURRENCY=16
//! ```

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Top-level configuration for an embedding application wiring up the
/// engine core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Defaults applied to a [`crate::field::DataServiceConfig`] that doesn't
/// specify its own timeout/retry values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

/// Tunables for the Field Resolution Engine (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Upper bound on concurrently in-flight data-service fetches.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Width of a cache time bucket, in milliseconds.
    #[serde(default = "default_cache_bucket_width_ms")]
    pub cache_bucket_width_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_concurrency() -> usize {
    8
}
fn default_cache_bucket_width_ms() -> u64 {
    300_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Merges in order:
    /// 1. `config.toml` (base configuration)
    /// 2. `config.local.toml` (local overrides, git-ignored)
    /// 3. Environment variables (`RULESENGINE_*` prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("RULESENGINE_").split("__"))
            .extract()
    }

    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RULESENGINE_").split("__"))
            .extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config { http: HttpConfig::default(), resolution: ResolutionConfig::default(), logging: LoggingConfig::default() }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig { default_timeout_ms: default_timeout_ms(), default_max_retries: default_max_retries() }
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        ResolutionConfig {
            max_concurrency: default_max_concurrency(),
            cache_bucket_width_ms: default_cache_bucket_width_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: default_log_level(), format: default_log_format() }
    }
}
