// src/config/mod.rs - Bot configuration file with defaults and environment overrides

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::admission::{RateLimit, ScopeKind};
use crate::automation::AutomationSettings;
use crate::error::ConfigError;
use crate::scheduler::SchedulerSettings;

pub const DEFAULT_CONFIG_PATH: &str = "config/modbot.yaml";

/// Longest an automation command may be allowed to run, one hour
pub const MAX_COMMAND_TIMEOUT_SECONDS: f64 = 3_600.0;

/// Where durable records live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    /// Nothing survives a restart; for dry runs
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionSettings {
    pub sweep_interval_seconds: u64,
    /// Buckets idle this long are evicted (never sooner than their own window)
    pub bucket_ttl_seconds: u64,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 300,
            bucket_ttl_seconds: 3600,
        }
    }
}

impl AdmissionSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }

    pub fn bucket_ttl(&self) -> Duration {
        Duration::from_secs(self.bucket_ttl_seconds)
    }
}

/// Top-level bot configuration (`modbot.yaml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfiguration {
    pub version: String,
    pub command_prefix: String,
    pub storage: StorageSettings,
    pub admission: AdmissionSettings,
    pub scheduler: SchedulerSettings,
    pub automation: AutomationSettings,
    /// Rate limits per command name
    pub rate_limits: BTreeMap<String, Vec<RateLimit>>,
}

impl Default for BotConfiguration {
    fn default() -> Self {
        let mut rate_limits = BTreeMap::new();
        rate_limits.insert(
            "tempban".to_string(),
            vec![RateLimit { scope: ScopeKind::Community, capacity: 10, window_seconds: 60.0 }],
        );
        rate_limits.insert(
            "temprole".to_string(),
            vec![RateLimit { scope: ScopeKind::Channel, capacity: 5, window_seconds: 30.0 }],
        );
        rate_limits.insert(
            "pending".to_string(),
            vec![
                RateLimit { scope: ScopeKind::Channel, capacity: 2, window_seconds: 30.0 },
                RateLimit { scope: ScopeKind::Member, capacity: 1, window_seconds: 10.0 },
            ],
        );
        rate_limits.insert(
            "say".to_string(),
            vec![RateLimit { scope: ScopeKind::Channel, capacity: 5, window_seconds: 30.0 }],
        );

        Self {
            version: "1.0".to_string(),
            command_prefix: "!".to_string(),
            storage: StorageSettings::default(),
            admission: AdmissionSettings::default(),
            scheduler: SchedulerSettings::default(),
            automation: AutomationSettings::default(),
            rate_limits,
        }
    }
}

impl BotConfiguration {
    /// Config path from `MODBOT_CONFIG`, falling back to the default location
    pub fn path_from_env() -> PathBuf {
        std::env::var("MODBOT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration, writing a default file first if none exists
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("Bot config file not found, creating default: {}", path.display());
            Self::create_default(path).await?;
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read bot config: {}", path.display()))?;

        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse bot config: {}", path.display()))?;

        info!(
            "Loaded bot configuration from {} ({} rate-limited commands)",
            path.display(),
            config.rate_limits.len()
        );
        Ok(config)
    }

    async fn create_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let yaml_content = serde_yaml::to_string(&Self::default()).context("Failed to serialize default bot config")?;
        fs::write(path, yaml_content)
            .await
            .with_context(|| format!("Failed to write default bot config: {}", path.display()))?;

        info!("Created default bot configuration: {}", path.display());
        Ok(())
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_prefix.is_empty() || self.command_prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!(
                "command prefix '{}' must be non-empty and contain no whitespace",
                self.command_prefix
            )));
        }

        let timeout = self.automation.command_timeout_seconds;
        if !timeout.is_finite() || timeout <= 0.0 || timeout > MAX_COMMAND_TIMEOUT_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "automation command timeout must be between 0 and {} seconds",
                MAX_COMMAND_TIMEOUT_SECONDS
            )));
        }

        if self.scheduler.max_unapply_attempts == Some(0) {
            return Err(ConfigError::Invalid("max_unapply_attempts must be at least 1 when set".to_string()));
        }

        for (command, limits) in &self.rate_limits {
            for limit in limits {
                limit
                    .validate()
                    .map_err(|e| ConfigError::Invalid(format!("rate limit for '{}': {}", command, e)))?;
            }
        }

        Ok(())
    }

    /// Apply `MODBOT_DATA_DIR` and `MODBOT_COMMAND_PREFIX` from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(data_dir) = lookup("MODBOT_DATA_DIR").filter(|v| !v.trim().is_empty()) {
            info!("Using data directory from MODBOT_DATA_DIR: {}", data_dir);
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Some(prefix) = lookup("MODBOT_COMMAND_PREFIX") {
            self.command_prefix = prefix.trim().to_string();
        }

        self.validate()
    }
}
