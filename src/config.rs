//! Configuration management for pricecrawl using the prefer crate.
//!
//! A config file (discovered by prefer, or passed with `--config`) fills a
//! [`Config`] of optional values. Those are applied over [`Settings`]
//! defaults, then environment variables override both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::browser::SessionConfig;
use crate::crawler::ManagerOptions;

/// Default database filename inside the data directory.
pub const DEFAULT_DATABASE_FILENAME: &str = "pricecrawl.db";

/// `database_url` value selecting the in-process store.
pub const MEMORY_DATABASE: &str = "memory";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {format} config: {reason}")]
    Parse {
        format: &'static str,
        reason: String,
    },
}

/// Resolved application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database URL; `None` means `sqlite:<data_dir>/pricecrawl.db`.
    pub database_url: Option<String>,
    /// Redis URL for a shared cache. In-process cache when unset.
    pub redis_url: Option<String>,
    /// Default interval for scheduled price updates, in minutes.
    pub crawler_interval_minutes: u32,
    /// Navigation timeout for one page load.
    pub crawler_timeout: Duration,
    pub max_concurrent_crawls: usize,
    /// Lifetime of cached product data.
    pub cache_ttl: Duration,
    pub rate_limit_window: Duration,
    /// Requests per window for routes without their own limit.
    pub rate_limit_max: u32,
    /// Bearer tokens accepted by the HTTP API. Empty disables auth.
    pub api_tokens: Vec<String>,
    /// IANA time zone the scheduler evaluates cron expressions in.
    pub scheduler_timezone: String,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    /// DevTools endpoint of an already running browser.
    pub remote_browser_url: Option<String>,
    /// Collapse concurrent fetches of one URL behind a cache lock.
    pub dedup_lock: bool,
}

impl Default for Settings {
    fn default() -> Self {
        // Falls back: local data dir -> home dir -> current dir
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pricecrawl");

        Self {
            data_dir,
            database_url: None,
            redis_url: None,
            crawler_interval_minutes: 60,
            crawler_timeout: Duration::from_millis(30_000),
            max_concurrent_crawls: 5,
            cache_ttl: Duration::from_secs(3600),
            rate_limit_window: Duration::from_millis(60_000),
            rate_limit_max: 100,
            api_tokens: Vec::new(),
            scheduler_timezone: "Asia/Shanghai".to_string(),
            headless: true,
            chrome_path: None,
            remote_browser_url: None,
            dedup_lock: true,
        }
    }
}

impl Settings {
    /// Get the database URL, constructing from the data dir if not explicitly set.
    pub fn database_url(&self) -> String {
        match self.database_url {
            Some(ref url) => url.clone(),
            None => format!(
                "sqlite:{}",
                self.data_dir.join(DEFAULT_DATABASE_FILENAME).display()
            ),
        }
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url.as_deref() == Some(MEMORY_DATABASE)
    }

    /// Browser session settings.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            headless: self.headless,
            navigation_timeout: self.crawler_timeout,
            chrome_path: self.chrome_path.as_ref().map(|p| p.display().to_string()),
            remote_url: self.remote_browser_url.clone(),
            ..SessionConfig::default()
        }
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            product_ttl: self.cache_ttl,
            max_concurrent_crawls: self.max_concurrent_crawls,
            dedup_lock: self.dedup_lock,
            ..ManagerOptions::default()
        }
    }

    /// Apply environment overrides. Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CRAWLER_INTERVAL").and_then(|v| parse_env("CRAWLER_INTERVAL", &v)) {
            self.crawler_interval_minutes = v;
        }
        if let Some(ms) = get("CRAWLER_TIMEOUT").and_then(|v| parse_env::<u64>("CRAWLER_TIMEOUT", &v))
        {
            self.crawler_timeout = Duration::from_millis(ms);
        }
        if let Some(v) =
            get("MAX_CONCURRENT_CRAWLS").and_then(|v| parse_env("MAX_CONCURRENT_CRAWLS", &v))
        {
            self.max_concurrent_crawls = v;
        }
        if let Some(url) = get("REDIS_URL") {
            debug!("Using REDIS_URL from environment");
            self.redis_url = Some(url);
        }
        if let Some(url) = get("DATABASE_URL") {
            debug!("Using DATABASE_URL from environment: {}", url);
            self.database_url = Some(url);
        }
        if let Some(secs) = get("CACHE_TTL").and_then(|v| parse_env::<u64>("CACHE_TTL", &v)) {
            self.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) =
            get("RATE_LIMIT_WINDOW").and_then(|v| parse_env::<u64>("RATE_LIMIT_WINDOW", &v))
        {
            self.rate_limit_window = Duration::from_millis(ms);
        }
        if let Some(v) = get("RATE_LIMIT_MAX").and_then(|v| parse_env("RATE_LIMIT_MAX", &v)) {
            self.rate_limit_max = v;
        }
        if let Some(tokens) = get("API_TOKENS") {
            self.api_tokens = split_tokens(&tokens);
        }
        if let Some(tz) = get("SCHEDULER_TIMEZONE") {
            self.scheduler_timezone = tz;
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", key, value);
            None
        }
    }
}

fn split_tokens(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    /// Minutes between scheduled price updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crawler_interval: Option<u32>,
    /// Navigation timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crawler_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_crawls: Option<usize>,
    /// Product cache lifetime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<u64>,
    /// Rate limit window in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_window: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_max: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_tokens: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_browser_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_lock: Option<bool>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers pricecrawl config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("pricecrawl").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        warn!("{}", e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            // No config file found
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                format: "TOML",
                reason: e.to_string(),
            })?,
            "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
                format: "YAML",
                reason: e.to_string(),
            })?,
            _ => serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
                format: "JSON",
                reason: e.to_string(),
            })?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory of the config file, for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Expand `~` and resolve relative paths against `base_dir`.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref url) = self.database_url {
            settings.database_url = Some(url.clone());
        }
        if let Some(ref url) = self.redis_url {
            settings.redis_url = Some(url.clone());
        }
        if let Some(interval) = self.crawler_interval {
            settings.crawler_interval_minutes = interval;
        }
        if let Some(ms) = self.crawler_timeout {
            settings.crawler_timeout = Duration::from_millis(ms);
        }
        if let Some(max) = self.max_concurrent_crawls {
            settings.max_concurrent_crawls = max;
        }
        if let Some(secs) = self.cache_ttl {
            settings.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = self.rate_limit_window {
            settings.rate_limit_window = Duration::from_millis(ms);
        }
        if let Some(max) = self.rate_limit_max {
            settings.rate_limit_max = max;
        }
        if !self.api_tokens.is_empty() {
            settings.api_tokens = self.api_tokens.clone();
        }
        if let Some(ref tz) = self.scheduler_timezone {
            settings.scheduler_timezone = tz.clone();
        }
        if let Some(headless) = self.headless {
            settings.headless = headless;
        }
        if let Some(ref path) = self.chrome_path {
            settings.chrome_path = Some(self.resolve_path(path, base_dir));
        }
        if let Some(ref url) = self.remote_browser_url {
            settings.remote_browser_url = Some(url.clone());
        }
        if let Some(dedup) = self.dedup_lock {
            settings.dedup_lock = dedup;
        }
    }
}

/// Load settings: explicit config path or prefer discovery, then env overrides.
pub async fn load_settings(config_path: Option<&Path>) -> anyhow::Result<(Settings, Config)> {
    let config = match config_path {
        Some(path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };
    if let Some(ref path) = config.source_path {
        debug!("Loaded config from {}", path.display());
    }

    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings, &base_dir);
    settings.apply_env_overrides();

    Ok((settings, config))
}
