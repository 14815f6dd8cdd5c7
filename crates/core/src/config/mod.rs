//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (CAPSYNC_*)
//! 2. TOML config file (if CAPSYNC_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (CAPSYNC_*)
/// 2. TOML config file (if CAPSYNC_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite response cache.
    ///
    /// Set via CAPSYNC_CACHE_DB_PATH environment variable.
    #[serde(default = "default_cache_db_path")]
    pub cache_db_path: PathBuf,

    /// Path to the SQLite capture queue. Kept apart from the cache so a
    /// cache wipe can never touch queued mutations.
    ///
    /// Set via CAPSYNC_QUEUE_DB_PATH environment variable.
    #[serde(default = "default_queue_db_path")]
    pub queue_db_path: PathBuf,

    /// Origin the page talks to; relative URLs resolve against it.
    ///
    /// Set via CAPSYNC_ORIGIN environment variable.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Current cache generation. Other generations are purged on activation.
    ///
    /// Set via CAPSYNC_CACHE_VERSION environment variable.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via CAPSYNC_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-attempt network timeout in milliseconds.
    ///
    /// Set via CAPSYNC_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum response body bytes accepted per request.
    ///
    /// Set via CAPSYNC_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Delivery attempts before a queue entry is marked failed.
    ///
    /// Set via CAPSYNC_MAX_RETRIES environment variable.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Reactivation tag registered when a capture is queued.
    ///
    /// Set via CAPSYNC_SYNC_TAG environment variable.
    #[serde(default = "default_sync_tag")]
    pub sync_tag: String,

    /// Path prefixes served network-first.
    #[serde(default = "default_api_prefixes")]
    pub api_prefixes: Vec<String>,

    /// Path prefixes whose mutating requests are queued when offline.
    #[serde(default = "default_capture_prefixes")]
    pub capture_prefixes: Vec<String>,

    /// File extensions served cache-first.
    #[serde(default = "default_static_extensions")]
    pub static_extensions: Vec<String>,

    /// App shell assets pre-cached on install.
    #[serde(default = "default_shell_assets")]
    pub shell_assets: Vec<String>,

    /// Document returned for navigations that fail while offline.
    #[serde(default = "default_shell_url")]
    pub shell_url: String,

    /// Path probed to detect connectivity while idle.
    #[serde(default = "default_probe_path")]
    pub probe_path: String,

    /// Probe interval in milliseconds; 0 disables probing.
    ///
    /// Set via CAPSYNC_PROBE_INTERVAL_MS environment variable.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Bounded capacity of the worker inbox.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

fn default_cache_db_path() -> PathBuf {
    PathBuf::from("./capsync-cache.sqlite")
}

fn default_queue_db_path() -> PathBuf {
    PathBuf::from("./capsync-queue.sqlite")
}

fn default_origin() -> String {
    "http://localhost:8000".into()
}

fn default_cache_version() -> String {
    "v1".into()
}

fn default_user_agent() -> String {
    "capsync/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_max_retries() -> u32 {
    5
}

fn default_sync_tag() -> String {
    "sync-captures".into()
}

fn default_api_prefixes() -> Vec<String> {
    vec!["/api/".into()]
}

fn default_capture_prefixes() -> Vec<String> {
    ["/api/capture", "/api/notes", "/api/ideas", "/api/tasks"].iter().map(|s| s.to_string()).collect()
}

fn default_static_extensions() -> Vec<String> {
    ["js", "css", "png", "jpg", "jpeg", "svg", "ico", "gif", "webp", "woff", "woff2", "ttf", "webmanifest"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_shell_assets() -> Vec<String> {
    ["/", "/index.html", "/manifest.json", "/static/css/main.css", "/static/js/main.js", "/favicon.ico"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_shell_url() -> String {
    "/index.html".into()
}

fn default_probe_path() -> String {
    "/api/health".into()
}

fn default_probe_interval_ms() -> u64 {
    30_000
}

fn default_inbox_capacity() -> usize {
    256
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_db_path: default_cache_db_path(),
            queue_db_path: default_queue_db_path(),
            origin: default_origin(),
            cache_version: default_cache_version(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            max_retries: default_max_retries(),
            sync_tag: default_sync_tag(),
            api_prefixes: default_api_prefixes(),
            capture_prefixes: default_capture_prefixes(),
            static_extensions: default_static_extensions(),
            shell_assets: default_shell_assets(),
            shell_url: default_shell_url(),
            probe_path: default_probe_path(),
            probe_interval_ms: default_probe_interval_ms(),
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl AppConfig {
    /// Per-attempt timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Probe interval, or `None` when probing is disabled.
    pub fn probe_interval(&self) -> Option<Duration> {
        (self.probe_interval_ms > 0).then(|| Duration::from_millis(self.probe_interval_ms))
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `CAPSYNC_`
    /// 2. TOML file from `CAPSYNC_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("CAPSYNC_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("CAPSYNC_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
