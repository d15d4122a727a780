//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - `rac.toml` (base configuration)
//! - `rac.local.toml` (git-ignored local overrides)
//! - Environment variables (`RAC_*` prefix, `__` for nesting)
//!
//! ## Example
//!
//! ```toml
//! # rac.toml
//! [native]
//! auto_install = false
//! cache_dir = "/var/cache/rac"
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! RAC_NATIVE__AUTO_INSTALL=false
//! RAC_LOGGING__LEVEL=trace
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub native: NativeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Native backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeConfig {
    /// Build cache root; defaults to `<user-cache>/rac`.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Explicit cargo binary, overriding discovery.
    #[serde(default)]
    pub cargo: Option<PathBuf>,

    /// Bootstrap the toolchain via rustup when cargo is missing.
    #[serde(default = "default_true")]
    pub auto_install: bool,

    /// Reuse prebuilt binaries from the content-addressed cache.
    #[serde(default = "default_true")]
    pub cache: bool,
}

impl Default for NativeConfig {
    fn default() -> Self {
        NativeConfig {
            cache_dir: None,
            cargo: None,
            auto_install: true,
            cache: true,
        }
    }
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

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_true() -> bool {
    true
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
    /// 1. `rac.toml` (base configuration)
    /// 2. `rac.local.toml` (local overrides, git-ignored)
    /// 3. Environment variables (`RAC_*` prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("rac.toml"))
            .merge(Toml::file("rac.local.toml"))
            .merge(Env::prefixed("RAC_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RAC_").split("__"))
            .extract()
    }
}
