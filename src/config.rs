//! Service configuration loaded from TOML

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RateLimitError, Result};
use crate::policy::{KeyStrategy, PolicyName, PolicySet, RateLimitPolicy};
use crate::rate_limit::{CleanupSettings, DEFAULT_CLEANUP_INTERVAL, DEFAULT_MAX_AGE_MS};

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";
pub const DEFAULT_MAX_LOG_FILES: usize = 5;
/// Upper bound for any configured window or max age
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Take the client address from `X-Forwarded-For`
    #[serde(default)]
    pub trust_proxy: bool,
    /// Track each policy under its own key prefix
    #[serde(default = "default_true")]
    pub namespace_keys: bool,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub policies: PoliciesConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            trust_proxy: false,
            namespace_keys: true,
            cleanup: CleanupConfig::default(),
            logging: LoggingConfig::default(),
            policies: PoliciesConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CleanupConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Enables daily rolling log files in this directory
    pub directory: Option<PathBuf>,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            max_files: default_max_files(),
        }
    }
}

/// `[policies.<name>]` tables; omitted policies keep their reference quota.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct PoliciesConfig {
    pub general: Option<PolicyConfig>,
    pub posting: Option<PolicyConfig>,
    pub messaging: Option<PolicyConfig>,
    pub auth: Option<PolicyConfig>,
    pub search: Option<PolicyConfig>,
}

impl PoliciesConfig {
    pub fn get(&self, name: PolicyName) -> Option<&PolicyConfig> {
        match name {
            PolicyName::General => self.general.as_ref(),
            PolicyName::Posting => self.posting.as_ref(),
            PolicyName::Messaging => self.messaging.as_ref(),
            PolicyName::Auth => self.auth.as_ref(),
            PolicyName::Search => self.search.as_ref(),
        }
    }
}

/// Per-policy override; unset fields keep the reference value.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PolicyConfig {
    pub window_secs: Option<u64>,
    pub max: Option<u32>,
    pub key: Option<KeyStrategy>,
    pub message: Option<String>,
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    DEFAULT_CLEANUP_INTERVAL.as_secs()
}

fn default_max_age_secs() -> u64 {
    (DEFAULT_MAX_AGE_MS / 1000) as u64
}

fn default_max_files() -> usize {
    DEFAULT_MAX_LOG_FILES
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

impl ServiceConfig {
    /// Builds the policy table, applying overrides over the reference quotas
    pub fn policy_set(&self) -> PolicySet {
        PolicySet::new(
            PolicyName::ALL
                .iter()
                .map(|&name| {
                    let mut policy = RateLimitPolicy::default_for(name);
                    if let Some(o) = self.policies.get(name) {
                        if let Some(secs) = o.window_secs {
                            policy.window_ms = secs_to_ms(secs);
                        }
                        if let Some(max) = o.max {
                            policy.max = max;
                        }
                        if let Some(key) = o.key {
                            policy.key = key;
                        }
                        if let Some(message) = &o.message {
                            policy.message = message.clone();
                        }
                    }
                    policy
                })
                .collect(),
        )
    }

    pub fn cleanup_settings(&self) -> CleanupSettings {
        CleanupSettings {
            interval: Duration::from_secs(self.cleanup.interval_secs),
            max_age_ms: secs_to_ms(self.cleanup.max_age_secs),
        }
    }

    /// Rejects quotas the limiter cannot honor.
    pub fn validate(&self) -> Result<()> {
        for name in PolicyName::ALL {
            let window_secs = self.policies.get(name).and_then(|o| o.window_secs);
            if window_secs.is_some_and(|secs| secs > MAX_DURATION_SECS) {
                return Err(RateLimitError::Config(format!(
                    "policy '{}' window exceeds {}s",
                    name, MAX_DURATION_SECS
                )));
            }
        }
        if self.cleanup.max_age_secs > MAX_DURATION_SECS {
            return Err(RateLimitError::Config(format!(
                "cleanup.max_age_secs exceeds {}s",
                MAX_DURATION_SECS
            )));
        }

        let policies = self.policy_set();
        for policy in policies.iter() {
            if policy.max == 0 {
                return Err(RateLimitError::Config(format!(
                    "policy '{}' must allow at least one request",
                    policy.name
                )));
            }
            if policy.window_ms <= 0 {
                return Err(RateLimitError::Config(format!(
                    "policy '{}' needs a positive window",
                    policy.name
                )));
            }
        }

        if self.cleanup.interval_secs == 0 {
            return Err(RateLimitError::Config(
                "cleanup.interval_secs must be positive".to_string(),
            ));
        }

        // cleanup must never drop timestamps a window still counts
        let max_age_ms = self.cleanup_settings().max_age_ms;
        let longest = policies.max_window_ms();
        if max_age_ms < longest {
            return Err(RateLimitError::Config(format!(
                "cleanup.max_age_secs ({}s) is shorter than the longest policy window ({}s)",
                self.cleanup.max_age_secs,
                longest / 1000
            )));
        }

        Ok(())
    }
}

/// Parse and validate a TOML configuration string
pub fn parse_config(contents: &str) -> Result<ServiceConfig> {
    let config: ServiceConfig = toml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

/// Load the configuration file, falling back to defaults if it is absent
pub fn load_config(path: impl AsRef<Path>) -> Result<ServiceConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(ServiceConfig::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| {
        RateLimitError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
    })?;
    parse_config(&contents)
}
