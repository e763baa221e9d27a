/*!
 * Configuration types for Tripwire
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tripwire_core_breaker::{GuardConfig, LockConfig};

use crate::error::{Result, TripwireError};

/// Top-level configuration for a guard registry
///
/// Every section is optional:
///
/// ```toml
/// [defaults]
/// failure_threshold = 5
/// recovery_timeout = "60s"
///
/// [guards.payments]
/// failure_threshold = 2
///
/// [coordinator]
/// backend = "redb"
/// path = "guards.redb"
/// acquire_timeout = "5s"
///
/// [logging]
/// level = "debug"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Settings for guards without an override
    pub defaults: GuardConfig,

    /// Per-name overrides, each a complete guard config
    pub guards: BTreeMap<String, GuardConfig>,

    pub coordinator: CoordinatorSettings,

    pub logging: LoggingConfig,
}

impl RegistryConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RegistryConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| TripwireError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.backend == CoordinatorBackend::Redb && self.coordinator.path.is_none() {
            return Err(TripwireError::Config(
                "coordinator backend 'redb' requires a path".to_string(),
            ));
        }
        if self.logging.json && self.logging.log_file.is_none() {
            return Err(TripwireError::Config(
                "JSON logging requires a log_file".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective config for `name`: its override if present, else the defaults
    pub fn guard_config(&self, name: &str) -> GuardConfig {
        self.guards
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }
}

/// Where coordinated guards keep their shared state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorBackend {
    /// Guards are process-local, nothing is shared
    #[default]
    None,

    /// In-process map, shared by all guards of one registry
    Memory,

    /// redb database file, survives restarts
    Redb,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    pub backend: CoordinatorBackend,

    /// Database file for the redb backend
    pub path: Option<PathBuf>,

    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Option<std::time::Duration>,

    #[serde(with = "humantime_serde")]
    pub lease_ttl: Option<std::time::Duration>,
}

impl CoordinatorSettings {
    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            acquire_timeout: self.acquire_timeout,
            lease_ttl: self.lease_ttl,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,

    /// Write JSON lines instead of compact text (file output only)
    pub json: bool,

    /// Log to this file instead of stdout
    pub log_file: Option<PathBuf>,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}
