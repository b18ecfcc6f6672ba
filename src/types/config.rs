//! Configuration structures.
//!
//! Configuration is loaded from a JSON file; every section falls back to its
//! defaults when omitted.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::{Error, InterfaceName, Result};

/// Placeholder in `daemon.args` replaced by the upstream interface name.
pub const UPSTREAM_PLACEHOLDER: &str = "{upstream}";

/// Global coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Translation interface settings.
    #[serde(default)]
    pub clat: ClatConfig,

    /// Translation daemon control.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Event queue settings.
    #[serde(default)]
    pub service: ServiceConfig,
}

impl Config {
    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.clat.interface()?;
        if self.daemon.program.trim().is_empty() {
            return Err(Error::config("daemon.program cannot be empty"));
        }
        if self.daemon.call_timeout.is_zero() {
            return Err(Error::config("daemon.call_timeout must be non-zero"));
        }
        if self.service.queue_capacity == 0 {
            return Err(Error::config("service.queue_capacity must be non-zero"));
        }
        Ok(())
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Translation interface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClatConfig {
    /// Name the daemon gives the translation interface.
    pub interface_name: String,
}

impl ClatConfig {
    /// Validated translation interface name.
    pub fn interface(&self) -> Result<InterfaceName> {
        InterfaceName::from_string(self.interface_name.clone())
            .map_err(|e| Error::config(format!("clat.interface_name: {}", e)))
    }
}

impl Default for ClatConfig {
    fn default() -> Self {
        Self {
            interface_name: "clat".to_string(),
        }
    }
}

/// Translation daemon control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Daemon executable.
    pub program: String,

    /// Arguments; `{upstream}` is substituted with the upstream interface.
    pub args: Vec<String>,

    /// Upper bound on every external call made while handling one event.
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
}

impl DaemonConfig {
    /// Arguments with the upstream placeholder expanded.
    pub fn args_for(&self, upstream: &InterfaceName) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(UPSTREAM_PLACEHOLDER, upstream.as_str()))
            .collect()
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            program: "clatd".to_string(),
            args: vec!["-i".to_string(), UPSTREAM_PLACEHOLDER.to_string()],
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Event queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Bounded capacity of the single lifecycle event queue.
    pub queue_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}
