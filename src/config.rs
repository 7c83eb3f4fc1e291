//! Configuration management for Slidegate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{Result, SlidegateError};
use crate::guard::RateLimitPolicy;
use crate::ratelimit::{DEFAULT_KEY_PREFIX, DEFAULT_TTL_GRACE_SECS};

/// Main configuration for Slidegate.
///
/// ```yaml
/// limiter:
///   key_prefix: rate_limit
///   ttl_grace_secs: 60
/// policies:
///   login:
///     max_requests: 5
///     window_seconds: 60
///     identifier: ip
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlidegateConfig {
    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Logging configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Named admission policies
    #[serde(default)]
    pub policies: HashMap<String, RateLimitPolicy>,
}

/// Limiter and store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Namespace prefix for window keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Seconds a window set outlives its window
    #[serde(default = "default_ttl_grace")]
    pub ttl_grace_secs: u64,

    /// How often the in-memory store sweeps expired keys (0 disables)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            ttl_grace_secs: default_ttl_grace(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_ttl_grace() -> u64 {
    DEFAULT_TTL_GRACE_SECS
}

fn default_sweep_interval() -> u64 {
    30
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl SlidegateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SlidegateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| SlidegateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject policies the limiter cannot evaluate.
    pub fn validate(&self) -> Result<()> {
        for (name, policy) in &self.policies {
            if policy.max_requests == 0 {
                return Err(SlidegateError::Config(format!(
                    "policy '{}': max_requests must be greater than zero",
                    name
                )));
            }
            if policy.window_seconds == 0 {
                return Err(SlidegateError::Config(format!(
                    "policy '{}': window_seconds must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Look up a named policy.
    pub fn policy(&self, name: &str) -> Result<&RateLimitPolicy> {
        self.policies
            .get(name)
            .ok_or_else(|| SlidegateError::Config(format!("unknown policy '{}'", name)))
    }
}
