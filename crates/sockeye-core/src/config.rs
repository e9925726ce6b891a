//! Application settings and TOML configuration parsing.
//!
//! Configuration is values only: the poll cadence, grace period, enabled
//! rule set, explainer settings, and log sizing. Invalid configuration is
//! fatal at startup -- [`Config::validate`] must pass before the poller is
//! spawned.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::heuristics::rules::BUILTIN_RULE_NAMES;

/// Top-level Sockeye configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Polling interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How many consecutive missed sightings a tracked connection survives
    /// before it is declared vanished.
    #[serde(default = "default_grace_cycles")]
    pub grace_cycles: u32,

    /// Capacity of the in-memory lifecycle event ring.
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,

    /// Fallback log filter used when `SOCKEYE_LOG` is not set.
    #[serde(default)]
    pub log_level: Option<String>,

    /// Heuristic rule selection.
    #[serde(default)]
    pub rules: RulesConfig,

    /// Optional natural-language explainer.
    #[serde(default)]
    pub explainer: ExplainerConfig,
}

/// Which built-in heuristic rules are active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Rule names to enable; evaluation order is fixed regardless of the
    /// order given here.
    #[serde(default = "default_enabled_rules")]
    pub enabled: Vec<String>,
}

/// Settings for the best-effort explainer backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainerConfig {
    #[serde(default)]
    pub enabled: bool,
    /// HTTP endpoint of the explainer backend.
    #[serde(default)]
    pub endpoint: String,
    /// Hard deadline for one explanation; the rule-based rationale stands
    /// when the deadline passes.
    #[serde(default = "default_explainer_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum concurrently outstanding explanation requests.
    #[serde(default = "default_explainer_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_grace_cycles() -> u32 {
    1
}

fn default_event_log_capacity() -> usize {
    512
}

fn default_enabled_rules() -> Vec<String> {
    BUILTIN_RULE_NAMES.iter().map(|s| s.to_string()).collect()
}

fn default_explainer_timeout_ms() -> u64 {
    1500
}

fn default_explainer_max_in_flight() -> usize {
    4
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            grace_cycles: default_grace_cycles(),
            event_log_capacity: default_event_log_capacity(),
            log_level: None,
            rules: RulesConfig::default(),
            explainer: ExplainerConfig::default(),
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_rules(),
        }
    }
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            timeout_ms: default_explainer_timeout_ms(),
            max_in_flight: default_explainer_max_in_flight(),
        }
    }
}

/// A configuration value that cannot be run with.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("poll_interval_ms must be positive")]
    NonPositivePollInterval,
    #[error("event_log_capacity must be positive")]
    ZeroEventLogCapacity,
    #[error("unknown heuristic rule '{0}'")]
    UnknownRule(String),
    #[error("explainer.timeout_ms must be positive when the explainer is enabled")]
    ZeroExplainerTimeout,
    #[error("explainer.endpoint must be set when the explainer is enabled")]
    MissingExplainerEndpoint,
    #[error("explainer.max_in_flight must be positive when the explainer is enabled")]
    ZeroExplainerInFlight,
}

impl Config {
    /// Load configuration from a TOML file at the given path.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate the configuration. Must be called before the poller starts;
    /// failures here are fatal at startup only.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::NonPositivePollInterval);
        }
        if self.event_log_capacity == 0 {
            return Err(ConfigError::ZeroEventLogCapacity);
        }
        for name in &self.rules.enabled {
            if !BUILTIN_RULE_NAMES.contains(&name.as_str()) {
                return Err(ConfigError::UnknownRule(name.clone()));
            }
        }
        if self.explainer.enabled {
            if self.explainer.timeout_ms == 0 {
                return Err(ConfigError::ZeroExplainerTimeout);
            }
            if self.explainer.endpoint.is_empty() {
                return Err(ConfigError::MissingExplainerEndpoint);
            }
            if self.explainer.max_in_flight == 0 {
                return Err(ConfigError::ZeroExplainerInFlight);
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn explainer_timeout(&self) -> Duration {
        Duration::from_millis(self.explainer.timeout_ms)
    }
}
