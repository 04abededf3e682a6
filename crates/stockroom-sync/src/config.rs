//! # Engine Configuration
//!
//! Configuration management for the offline engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STOCKROOM_UPSTREAM_URL=https://api.shop.example                    │
//! │     STOCKROOM_BIND_ADDR=127.0.0.1:8787                                 │
//! │     STOCKROOM_DB_PATH=/var/lib/stockroom/stockroom.db                  │
//! │     STOCKROOM_CACHE_VERSION=v2                                         │
//! │     STOCKROOM_NAMESPACE=stockroom                                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/engine/engine.toml (Linux)                               │
//! │     ~/Library/Application Support/com.stockroom.engine/engine.toml     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [app]
//! namespace = "stockroom"
//! version = "v2"
//! upstream_url = "http://localhost:3000"
//! shell = ["/", "/offline.html", "/static/js/bundle.js"]
//!
//! [cache]
//! stock_ttl_secs = 300
//!
//! [cache.images]
//! max_entries = 200
//! max_age_secs = 2592000
//!
//! [sync]
//! drain_on_start = true
//! notify_on_complete = true
//!
//! [server]
//! bind_addr = "127.0.0.1:8787"
//!
//! [database]
//! path = "/var/lib/stockroom/stockroom.db"
//! ```

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use stockroom_core::{CacheKind, CacheNames, DEFAULT_CACHE_VERSION, DEFAULT_NAMESPACE, STOCK_TTL_SECS};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// App Settings
// =============================================================================

/// What the engine serves and where it forwards to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Prefix of every cache name. Caches outside it are never touched.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Cache version. Bumping it makes activation drop older caches.
    #[serde(default = "default_version")]
    pub version: String,

    /// Origin the intercepted requests are forwarded to.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,

    /// App-shell seed set precached at install.
    #[serde(default = "default_shell")]
    pub shell: Vec<String>,

    /// Document served to navigations when both network and cache fail.
    #[serde(default = "default_offline_page")]
    pub offline_page: String,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_version() -> String {
    DEFAULT_CACHE_VERSION.to_string()
}

fn default_upstream_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_shell() -> Vec<String> {
    [
        "/",
        "/offline.html",
        "/static/js/bundle.js",
        "/static/css/main.css",
        "/manifest.json",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_offline_page() -> String {
    "/offline.html".to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            namespace: default_namespace(),
            version: default_version(),
            upstream_url: default_upstream_url(),
            shell: default_shell(),
            offline_page: default_offline_page(),
        }
    }
}

// =============================================================================
// Cache Settings
// =============================================================================

/// Eviction limits of one cache store. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,
}

impl CacheLimits {
    pub const fn new(max_entries: Option<usize>, max_age_secs: Option<u64>) -> Self {
        CacheLimits {
            max_entries,
            max_age_secs,
        }
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }
}

const DAY: u64 = 86_400;

fn default_static_limits() -> CacheLimits {
    CacheLimits::new(None, None)
}

fn default_dynamic_limits() -> CacheLimits {
    CacheLimits::new(Some(50), Some(DAY))
}

fn default_assets_limits() -> CacheLimits {
    CacheLimits::new(Some(100), Some(30 * DAY))
}

fn default_images_limits() -> CacheLimits {
    CacheLimits::new(Some(200), Some(30 * DAY))
}

fn default_api_limits() -> CacheLimits {
    CacheLimits::new(Some(100), Some(DAY))
}

fn default_stock_ttl() -> u64 {
    STOCK_TTL_SECS
}

/// Limits for every cache store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_static_limits", rename = "static")]
    pub static_shell: CacheLimits,

    #[serde(default = "default_dynamic_limits")]
    pub dynamic: CacheLimits,

    #[serde(default = "default_assets_limits")]
    pub assets: CacheLimits,

    #[serde(default = "default_images_limits")]
    pub images: CacheLimits,

    #[serde(default = "default_api_limits")]
    pub api: CacheLimits,

    /// TTL override for stock/inventory API responses.
    #[serde(default = "default_stock_ttl")]
    pub stock_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            static_shell: default_static_limits(),
            dynamic: default_dynamic_limits(),
            assets: default_assets_limits(),
            images: default_images_limits(),
            api: default_api_limits(),
            stock_ttl_secs: default_stock_ttl(),
        }
    }
}

impl CacheSettings {
    /// Limits of one cache kind.
    pub fn limits(&self, kind: CacheKind) -> CacheLimits {
        match kind {
            CacheKind::Static => self.static_shell,
            CacheKind::Dynamic => self.dynamic,
            CacheKind::Assets => self.assets,
            CacheKind::Images => self.images,
            CacheKind::Api => self.api,
        }
    }

    pub fn stock_ttl(&self) -> Duration {
        Duration::from_secs(self.stock_ttl_secs)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Queue replay behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Drain every queue once the engine is active.
    #[serde(default = "default_true")]
    pub drain_on_start: bool,

    /// Show a `sync_completed` notification after a queue empties.
    #[serde(default = "default_true")]
    pub notify_on_complete: bool,

    /// Re-drain blocked queues with backoff while online.
    #[serde(default = "default_true")]
    pub retry_blocked: bool,

    /// Initial backoff before re-draining a blocked queue (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff between re-drains (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Timeout of one upstream request (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Endpoint offline sales are replayed against.
    #[serde(default = "default_sales_endpoint")]
    pub sales_endpoint: String,
}

fn default_true() -> bool {
    true
}

fn default_initial_backoff() -> u64 {
    1_000
}

fn default_max_backoff() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    30
}

fn default_sales_endpoint() -> String {
    "/api/sales".to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            drain_on_start: true,
            notify_on_complete: true,
            retry_blocked: true,
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            request_timeout_secs: default_request_timeout(),
            sales_endpoint: default_sales_endpoint(),
        }
    }
}

// =============================================================================
// Server & Database Settings
// =============================================================================

/// HTTP surface of the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
        }
    }
}

/// SQLite location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub app: AppSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl EngineConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.app.namespace.trim().is_empty() {
            return Err(SyncError::InvalidConfig("app.namespace must not be empty".into()));
        }
        if self.app.version.trim().is_empty() {
            return Err(SyncError::InvalidConfig("app.version must not be empty".into()));
        }

        let upstream = url::Url::parse(&self.app.upstream_url)?;
        if !matches!(upstream.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "Upstream URL must start with http:// or https://, got: {}",
                self.app.upstream_url
            )));
        }

        if let Some(bad) = self.app.shell.iter().find(|p| !p.starts_with('/')) {
            return Err(SyncError::InvalidConfig(format!(
                "Shell entries must be absolute paths, got: {bad}"
            )));
        }

        for kind in CacheKind::ALL {
            if self.cache.limits(kind).max_entries == Some(0) {
                return Err(SyncError::InvalidConfig(format!(
                    "cache.{kind}.max_entries must be greater than 0"
                )));
            }
        }

        if !self.sync.sales_endpoint.starts_with('/') {
            return Err(SyncError::InvalidConfig(
                "sync.sales_endpoint must be an absolute path".into(),
            ));
        }

        self.bind_addr()?;
        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("STOCKROOM_UPSTREAM_URL") {
            debug!(url = %url, "Overriding upstream URL from environment");
            self.app.upstream_url = url;
        }

        if let Ok(addr) = std::env::var("STOCKROOM_BIND_ADDR") {
            debug!(addr = %addr, "Overriding bind address from environment");
            self.server.bind_addr = addr;
        }

        if let Ok(path) = std::env::var("STOCKROOM_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }

        if let Ok(version) = std::env::var("STOCKROOM_CACHE_VERSION") {
            debug!(version = %version, "Overriding cache version from environment");
            self.app.version = version;
        }

        if let Ok(namespace) = std::env::var("STOCKROOM_NAMESPACE") {
            self.app.namespace = namespace;
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "stockroom", "engine")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Versioned cache names for this configuration.
    pub fn cache_names(&self) -> CacheNames {
        CacheNames::new(&self.app.namespace, &self.app.version)
    }

    /// Parsed bind address.
    pub fn bind_addr(&self) -> SyncResult<SocketAddr> {
        self.server
            .bind_addr
            .parse()
            .map_err(|e| SyncError::InvalidConfig(format!("server.bind_addr: {e}")))
    }

    /// Database file, falling back to the platform data directory.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.data_dir().join("stockroom.db")))
            .unwrap_or_else(|| PathBuf::from("stockroom.db"))
    }

    pub fn upstream_url(&self) -> &str {
        &self.app.upstream_url
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.request_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.sync.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.sync.max_backoff_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.app.namespace, "stockroom");
        assert_eq!(config.app.shell.len(), 7);
        assert_eq!(config.cache.images.max_entries, Some(200));
        assert_eq!(config.cache.static_shell, CacheLimits::default());
        assert_eq!(config.cache.stock_ttl_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.app.upstream_url = "ftp://files.example".to_string();
        assert!(config.validate().is_err());

        config.app.upstream_url = "https://api.example".to_string();
        config.cache.api.max_entries = Some(0);
        assert!(config.validate().is_err());

        config.cache.api.max_entries = Some(10);
        config.server.bind_addr = "not an address".to_string();
        assert!(config.validate().is_err());

        config.server.bind_addr = "0.0.0.0:9000".to_string();
        config.app.shell.push("relative.js".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [app]
            version = "v9"

            [cache.images]
            max_entries = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.app.version, "v9");
        assert_eq!(config.app.namespace, "stockroom");
        assert_eq!(config.cache.images.max_entries, Some(10));
        assert_eq!(config.cache.images.max_age_secs, None);
        assert_eq!(config.cache.dynamic.max_entries, Some(50));
        assert_eq!(config.cache_names().name(CacheKind::Images), "stockroom-images-v9");
    }

    #[test]
    fn test_toml_serialization() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[app]"));
        assert!(toml_str.contains("[cache.dynamic]"));
    }
}
