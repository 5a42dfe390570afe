//! Provider Configuration
//!
//! Settings the host supplies alongside the startup options: reload
//! timeout, log filter, platform capability hints and the options map
//! itself. Loaded from TOML or JSON.

use crate::options::StartupOptions;
use crate::platform::{PlatformCapabilities, PlatformVersion, StaticCapabilities};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Provider configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Upper bound on one engine reload (seconds)
    #[serde(default = "default_reload_timeout_secs")]
    pub reload_timeout_secs: u64,
    /// Log filter (`RUST_LOG` syntax)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Capability answer used when no platform version is given
    #[serde(default = "default_true")]
    pub per_app_routing_supported: bool,
    /// Platform version (`major.minor`); overrides `per_app_routing_supported`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    /// Simulated engine reload latency (milliseconds)
    #[serde(default)]
    pub engine_reload_delay_ms: u64,
    /// Options passed to the session at start
    #[serde(default)]
    pub startup_options: StartupOptions,
}

fn default_reload_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            reload_timeout_secs: default_reload_timeout_secs(),
            log_level: default_log_level(),
            per_app_routing_supported: true,
            platform_version: None,
            engine_reload_delay_ms: 0,
            startup_options: StartupOptions::default(),
        }
    }
}

impl ProviderConfig {
    /// Load from a `.toml` or `.json` file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => ConfigFormat::Toml,
            Some("json") => ConfigFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_str_with(&content, format)
    }

    /// Load from a string in the given format
    pub fn from_str_with(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let config: Self = match format {
            ConfigFormat::Toml => {
                toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            ConfigFormat::Json => {
                serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reload_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        if let Some(version) = &self.platform_version {
            version
                .parse::<PlatformVersion>()
                .map_err(|_| ConfigError::InvalidVersion(version.clone()))?;
        }
        Ok(())
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_secs(self.reload_timeout_secs)
    }

    pub fn engine_reload_delay(&self) -> Duration {
        Duration::from_millis(self.engine_reload_delay_ms)
    }

    /// Capability probe described by this config
    pub fn capabilities(&self) -> Result<Arc<dyn PlatformCapabilities>, ConfigError> {
        match &self.platform_version {
            Some(version) => {
                let version: PlatformVersion = version
                    .parse()
                    .map_err(|_| ConfigError::InvalidVersion(version.clone()))?;
                Ok(Arc::new(version))
            }
            None => Ok(Arc::new(StaticCapabilities::new(self.per_app_routing_supported))),
        }
    }

    /// Export as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// Configuration format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported config format")]
    UnsupportedFormat,

    #[error("Reload timeout must be at least one second")]
    InvalidTimeout,

    #[error("Invalid platform version: {0:?}")]
    InvalidVersion(String),
}
