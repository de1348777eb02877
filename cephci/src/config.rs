//! Configuration management for the cephci harness
//!
//! Settings are loaded from:
//! 1. Environment variables (highest priority)
//! 2. Configuration file (TOML format)
//! 3. Default values (lowest priority)
//!
//! Cluster layouts and provider credentials are YAML and live in
//! [`crate::layout`].

use crate::destroyer::DestroyerConfig;
use crate::health::HealthChecker;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Main configuration struct for the harness
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Lifecycle timing
    pub timeouts: TimeoutConfig,
}

/// Lifecycle timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-node destroy budget
    pub teardown_secs: u64,
    /// How long to wait for placement groups to settle
    pub health_secs: u64,
    /// Wait between destroy attempts on a not-ready resource
    pub retry_interval_ms: u64,
    /// Wait before deleting each volume
    pub volume_settle_secs: u64,
    /// Wait between status polls
    pub health_poll_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            teardown_secs: 300,
            health_secs: 300,
            retry_interval_ms: 1000,
            volume_settle_secs: 10,
            health_poll_ms: 1000,
        }
    }
}

impl TimeoutConfig {
    pub fn teardown(&self) -> Duration {
        Duration::from_secs(self.teardown_secs)
    }

    pub fn health(&self) -> Duration {
        Duration::from_secs(self.health_secs)
    }

    pub fn destroyer_config(&self) -> DestroyerConfig {
        DestroyerConfig {
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            volume_settle: Duration::from_secs(self.volume_settle_secs),
        }
    }

    pub fn health_checker(&self) -> HealthChecker {
        HealthChecker::new(Duration::from_millis(self.health_poll_ms))
    }
}

impl HarnessConfig {
    /// Load configuration from environment variables and optional config file.
    ///
    /// An unreadable or malformed file is logged and replaced by defaults;
    /// use [`HarnessConfig::try_load`] to treat it as an error instead.
    pub fn load() -> Self {
        let path = Self::find_config_file();
        match Self::load_layered(path.as_deref(), |key| std::env::var(key).ok()) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = ?path, "Ignoring config file, using defaults: {}", e);
                let mut config = Self::default();
                config.apply_env_overrides();
                config
            }
        }
    }

    /// Like [`HarnessConfig::load`], but a broken config file is an error
    pub fn try_load() -> Result<Self, ConfigError> {
        Self::load_layered(Self::find_config_file().as_deref(), |key| {
            std::env::var(key).ok()
        })
    }

    /// Defaults, then `path` if given, then overrides fetched through `lookup`
    pub fn load_layered<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(lookup);
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("CEPHCI_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("/etc/cephci/config.toml")),
            Some(PathBuf::from("./cephci.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `CEPHCI_*` overrides fetched through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str| lookup(key).and_then(|v| v.parse::<u64>().ok());

        // Logging
        if let Some(level) = lookup("CEPHCI_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(path) = lookup("CEPHCI_LOG_PATH") {
            self.logging.file_path = Some(path);
        }
        if let Some(json) = lookup("CEPHCI_LOG_JSON") {
            self.logging.json_format = json.parse().unwrap_or(false);
        }

        // Timeouts
        if let Some(secs) = number("CEPHCI_TEARDOWN_TIMEOUT") {
            self.timeouts.teardown_secs = secs;
        }
        if let Some(secs) = number("CEPHCI_HEALTH_TIMEOUT") {
            self.timeouts.health_secs = secs;
        }
        if let Some(ms) = number("CEPHCI_RETRY_INTERVAL_MS") {
            self.timeouts.retry_interval_ms = ms;
        }
        if let Some(secs) = number("CEPHCI_VOLUME_SETTLE") {
            self.timeouts.volume_settle_secs = secs;
        }
        if let Some(ms) = number("CEPHCI_HEALTH_POLL_MS") {
            self.timeouts.health_poll_ms = ms;
        }
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeouts.teardown_secs == 0 {
            return Err(ConfigError::Validation("Teardown timeout cannot be 0".to_string()));
        }
        if self.timeouts.health_secs == 0 {
            return Err(ConfigError::Validation("Health timeout cannot be 0".to_string()));
        }
        if self.timeouts.retry_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "Retry interval cannot be 0, destroy retries would spin".to_string(),
            ));
        }
        if self.timeouts.health_poll_ms == 0 {
            return Err(ConfigError::Validation("Health poll interval cannot be 0".to_string()));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Failed to read configuration file
    FileRead(PathBuf, String),
    /// Failed to parse configuration
    Parse(String),
    /// Configuration validation failed
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, err) => {
                write!(f, "Failed to read config file {:?}: {}", path, err)
            }
            ConfigError::Parse(err) => write!(f, "Failed to parse config: {}", err),
            ConfigError::Validation(err) => write!(f, "Config validation failed: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for cephci_common::Error {
    fn from(err: ConfigError) -> Self {
        cephci_common::Error::InvalidConfig(err.to_string())
    }
}
