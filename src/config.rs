//! # Configuration
//!
//! Router and backoff settings loaded from environment variables.

use crate::backoff::{ClassScope, ConfigError, DelayPolicy};
use crate::constants::{
    DEFAULT_BACKOFF_BASE_DELAY_MS, DEFAULT_BACKOFF_FREE_ERRORS,
    DEFAULT_BACKOFF_JANITOR_INTERVAL_SECS, DEFAULT_BACKOFF_MAX_DELAY_MS,
    DEFAULT_BACKOFF_MAX_EXPONENT, DEFAULT_BACKOFF_RESET_WINDOW_MS, DEFAULT_METRICS_PORT,
};
use std::time::Duration;
use tracing::warn;

/// Backoff configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay of the first penalised error in a window (milliseconds)
    pub base_delay_ms: u64,
    /// Cap on the doubling exponent
    pub max_exponent: u32,
    /// Cap on any single delay (milliseconds)
    pub max_delay_ms: u64,
    /// Idle time after which a class's history is forgotten (milliseconds)
    pub reset_window_ms: u64,
    /// Errors per window delivered without delay (0 or 1)
    pub free_errors: u32,
    /// Whether classes are tracked per namespace or globally per violation kind
    pub class_scope: ClassScope,
    /// How often idle classes are purged from memory (seconds, 0 disables)
    pub janitor_interval_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BACKOFF_BASE_DELAY_MS,
            max_exponent: DEFAULT_BACKOFF_MAX_EXPONENT,
            max_delay_ms: DEFAULT_BACKOFF_MAX_DELAY_MS,
            reset_window_ms: DEFAULT_BACKOFF_RESET_WINDOW_MS,
            free_errors: DEFAULT_BACKOFF_FREE_ERRORS,
            class_scope: ClassScope::Namespace,
            janitor_interval_secs: DEFAULT_BACKOFF_JANITOR_INTERVAL_SECS,
        }
    }
}

impl BackoffConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let class_scope = std::env::var("BACKOFF_CLASS_SCOPE")
            .ok()
            .and_then(|v| match v.parse::<ClassScope>() {
                Ok(scope) => Some(scope),
                Err(e) => {
                    warn!("Ignoring BACKOFF_CLASS_SCOPE: {}", e);
                    None
                }
            })
            .unwrap_or_default();

        Self {
            base_delay_ms: env_var_or_default(
                "BACKOFF_BASE_DELAY_MS",
                DEFAULT_BACKOFF_BASE_DELAY_MS,
            ),
            max_exponent: env_var_or_default("BACKOFF_MAX_EXPONENT", DEFAULT_BACKOFF_MAX_EXPONENT),
            max_delay_ms: env_var_or_default("BACKOFF_MAX_DELAY_MS", DEFAULT_BACKOFF_MAX_DELAY_MS),
            reset_window_ms: env_var_or_default(
                "BACKOFF_RESET_WINDOW_MS",
                DEFAULT_BACKOFF_RESET_WINDOW_MS,
            ),
            free_errors: env_var_or_default("BACKOFF_FREE_ERRORS", DEFAULT_BACKOFF_FREE_ERRORS),
            class_scope,
            janitor_interval_secs: env_var_or_default(
                "BACKOFF_JANITOR_INTERVAL_SECS",
                DEFAULT_BACKOFF_JANITOR_INTERVAL_SECS,
            ),
        }
    }

    /// Delay policy described by this configuration
    #[must_use]
    pub fn delay_policy(&self) -> DelayPolicy {
        DelayPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_exponent: self.max_exponent,
            max_delay: Duration::from_millis(self.max_delay_ms),
            free_errors: self.free_errors,
        }
    }

    /// Get reset window duration
    #[must_use]
    pub fn reset_window_duration(&self) -> Duration {
        Duration::from_millis(self.reset_window_ms)
    }

    /// Get janitor interval, `None` when purging is disabled
    #[must_use]
    pub fn janitor_interval_duration(&self) -> Option<Duration> {
        (self.janitor_interval_secs > 0).then(|| Duration::from_secs(self.janitor_interval_secs))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reset_window_ms == 0 {
            return Err(ConfigError::ZeroResetWindow);
        }
        self.delay_policy().validate()
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Read `LOG_FORMAT` on its own, so tracing can start before the rest of
    /// the configuration is parsed and its warnings are visible
    pub fn from_env() -> Self {
        Self::from_name(&env_var_or_default_str("LOG_FORMAT", "text"))
    }

    /// `json` (any case) selects JSON, anything else falls back to text
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Router process configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// HTTP port for the router, metrics and probes
    pub port: u16,
    pub log_format: LogFormat,
    pub backoff: BackoffConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_METRICS_PORT,
            log_format: LogFormat::Text,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            log_format: LogFormat::from_env(),
            backoff: BackoffConfig::from_env(),
        }
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_scenario() {
        let config = BackoffConfig::default();
        let policy = config.delay_policy();
        assert_eq!(policy.base_delay, Duration::from_millis(10));
        assert_eq!(policy.max_exponent, 6);
        assert_eq!(policy.max_delay, Duration::from_millis(640));
        assert_eq!(config.reset_window_duration(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_reset_window_rejected() {
        let config = BackoffConfig {
            reset_window_ms: 0,
            ..BackoffConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroResetWindow));
    }

    #[test]
    fn test_free_errors_above_one_rejected() {
        let config = BackoffConfig {
            free_errors: 2,
            ..BackoffConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::TooManyFreeErrors(2)));
    }

    #[test]
    fn test_log_format_names() {
        assert_eq!(LogFormat::from_name("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_name("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_name("text"), LogFormat::Text);
        assert_eq!(LogFormat::from_name("yaml"), LogFormat::Text);
    }

    #[test]
    fn test_janitor_can_be_disabled() {
        let config = BackoffConfig {
            janitor_interval_secs: 0,
            ..BackoffConfig::default()
        };
        assert_eq!(config.janitor_interval_duration(), None);
        assert_eq!(
            BackoffConfig::default().janitor_interval_duration(),
            Some(Duration::from_secs(30))
        );
    }
}
