//! Configuration resolution for the provisioning agent.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Settings file (JSON, optional)
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by the binary)
//!
//! The resolved [`AgentConfig`] is immutable for the duration of a run and is
//! handed by reference to every collaborator.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub paths: PathConfig,
    pub connectivity: ConnectivityConfig,
    pub database: DatabaseConfig,
    pub issuance: IssuanceConfig,
    pub runtime: RuntimeConfig,
    /// Hardware identifier used to pick this device's row. Detected when unset.
    pub device_identifier: Option<String>,
}

/// Filesystem locations touched by a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub database_path: PathBuf,
    pub runtime_root: PathBuf,
    pub status_file: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("/var/lib/edgeprov/devices.db"),
            runtime_root: PathBuf::from("/greengrass/v2"),
            status_file: PathBuf::from("/var/run/edgeprov/status.json"),
        }
    }
}

/// Reachability probing of cloud endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Every endpoint must answer for the check to pass.
    pub endpoints: Vec<String>,
    pub attempts: u32,
    pub attempt_timeout_secs: u64,
    /// Linear backoff step: attempt `n` waits `n * backoff_secs` before retrying.
    pub backoff_secs: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "https://iot.us-east-1.amazonaws.com".to_string(),
                "https://s3.amazonaws.com".to_string(),
            ],
            attempts: 3,
            attempt_timeout_secs: 5,
            backoff_secs: 1,
        }
    }
}

impl ConnectivityConfig {
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub const fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

/// Device database access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl DatabaseConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Certificate issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuanceConfig {
    pub timeout_secs: u64,
    /// Organization name placed in locally issued certificates.
    pub organization: String,
    /// Lifetime of a locally issued device certificate.
    pub validity_days: u32,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            organization: "edgeprov".to_string(),
            validity_days: 365,
        }
    }
}

impl IssuanceConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Values rendered into the runtime configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Nucleus version used when the device record does not pin one.
    pub default_version: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_version: "2.9.0".to_string(),
        }
    }
}

impl AgentConfig {
    /// Validate the configuration. Returns an error on invalid values.
    pub fn validate(&self) -> Result<()> {
        if self.connectivity.endpoints.is_empty() {
            return Err(Error::Config("at least one connectivity endpoint is required".into()));
        }
        for endpoint in &self.connectivity.endpoints {
            if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
                return Err(Error::Config(format!(
                    "endpoint must be an http(s) URL: {endpoint}"
                )));
            }
        }
        if self.connectivity.attempts == 0 {
            return Err(Error::Config("connectivity attempts must be at least 1".into()));
        }
        if self.connectivity.attempt_timeout_secs == 0
            || self.database.timeout_secs == 0
            || self.issuance.timeout_secs == 0
        {
            return Err(Error::Config("timeouts must be non-zero".into()));
        }
        if self.issuance.validity_days == 0 {
            return Err(Error::Config("certificate validity must be at least one day".into()));
        }
        if self.paths.runtime_root.as_os_str().is_empty() {
            return Err(Error::Config("runtime root must not be empty".into()));
        }
        Ok(())
    }
}

/// Load configuration: defaults, then the optional settings file, then
/// `EDGEPROV_*` environment overrides.
pub fn load_config(settings_file: Option<&Path>) -> Result<AgentConfig> {
    let mut config = match settings_file {
        Some(path) => load_config_file(path)?,
        None => AgentConfig::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn load_config_file(path: &Path) -> Result<AgentConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply environment overrides using `lookup` to read variables.
pub fn apply_env_overrides(config: &mut AgentConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("EDGEPROV_ENDPOINTS") {
        let endpoints: Vec<String> = val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if !endpoints.is_empty() {
            config.connectivity.endpoints = endpoints;
        }
    }
    if let Some(n) = lookup("EDGEPROV_CONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
        config.connectivity.attempts = n;
    }
    if let Some(n) = lookup("EDGEPROV_CONNECT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.connectivity.attempt_timeout_secs = n;
    }
    if let Some(n) = lookup("EDGEPROV_CONNECT_BACKOFF_SECS").and_then(|v| v.parse().ok()) {
        config.connectivity.backoff_secs = n;
    }
    if let Some(n) = lookup("EDGEPROV_DB_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.database.timeout_secs = n;
    }
    if let Some(n) = lookup("EDGEPROV_ISSUANCE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.issuance.timeout_secs = n;
    }
    if let Some(val) = lookup("EDGEPROV_DEVICE_ID").filter(|v| !v.is_empty()) {
        config.device_identifier = Some(val);
    }
}
