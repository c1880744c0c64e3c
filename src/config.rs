//! Configuration management for Sluice.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, SluiceError};
use crate::ratelimit::WindowConfig;

/// Requests admitted per window when nothing else is configured.
const DEFAULT_MAX_REQUESTS: u32 = 10;
/// Window length when nothing else is configured.
const DEFAULT_WINDOW_MS: u64 = 1000;

/// Prefix of environment variables overriding file configuration,
/// e.g. `SLUICE__RATE_LIMIT__MAX_RPS=5`.
pub const ENV_PREFIX: &str = "SLUICE";

/// Main configuration for Sluice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SluiceConfig {
    /// Rate limit configuration
    #[serde(default)]
    pub rate_limit: RateLimitOptions,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Settings of the `sluice` drill binary
    #[serde(default)]
    pub drill: DrillConfig,
}

/// Possibly partial rate limit settings.
///
/// `max_rps` takes precedence: when it is set, `max_requests` and
/// `per_milliseconds` are ignored and a one second window is used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitOptions {
    /// Requests admitted per window
    #[serde(default, alias = "maxRequests", alias = "maxrequests")]
    pub max_requests: Option<u32>,

    /// Window length in milliseconds
    #[serde(default, alias = "perMilliseconds", alias = "permilliseconds")]
    pub per_milliseconds: Option<u64>,

    /// Requests admitted per second
    #[serde(default, alias = "maxRPS", alias = "maxrps")]
    pub max_rps: Option<u32>,
}

impl RateLimitOptions {
    /// Options admitting `max_requests` per `window_ms` milliseconds.
    pub fn per_window(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests: Some(max_requests),
            per_milliseconds: Some(window_ms),
            max_rps: None,
        }
    }

    /// Options admitting `max_rps` requests per second.
    pub fn per_second(max_rps: u32) -> Self {
        Self {
            max_rps: Some(max_rps),
            ..Self::default()
        }
    }

    /// Build a window from these options, filling unset fields from
    /// `current`.
    pub fn resolve(&self, current: Option<WindowConfig>) -> Result<WindowConfig> {
        if let Some(max_rps) = self.max_rps {
            return WindowConfig::per_second(max_rps);
        }

        let max_requests = self
            .max_requests
            .or(current.map(|window| window.max_requests()))
            .ok_or_else(|| SluiceError::Config("max_requests is not configured".to_string()))?;
        let length = self
            .per_milliseconds
            .map(Duration::from_millis)
            .or(current.map(|window| window.length()))
            .ok_or_else(|| {
                SluiceError::Config("per_milliseconds is not configured".to_string())
            })?;

        WindowConfig::new(max_requests, length)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
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

/// Settings of the drill binary, which pushes simulated requests through a
/// throttled client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrillConfig {
    /// Number of simulated requests
    #[serde(default = "default_requests")]
    pub requests: usize,

    /// Upper bound of the simulated transport latency in milliseconds
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
}

impl Default for DrillConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            latency_ms: default_latency_ms(),
        }
    }
}

fn default_requests() -> usize {
    10
}

fn default_latency_ms() -> u64 {
    50
}

impl SluiceConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| SluiceError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from an optional file, then apply `SLUICE__*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| SluiceError::Config(e.to_string()))
    }

    /// The admission window described by this configuration.
    ///
    /// Unset rate limit fields fall back to 10 requests per second.
    pub fn window(&self) -> Result<WindowConfig> {
        let fallback = WindowConfig::per_millis(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_MS)?;
        self.rate_limit.resolve(Some(fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SluiceConfig::default();
        assert_eq!(config.rate_limit, RateLimitOptions::default());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert_eq!(config.drill.requests, 10);
        assert_eq!(
            config.window().unwrap(),
            WindowConfig::per_millis(10, 1000).unwrap()
        );
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
rate_limit:
  max_requests: 2
  per_milliseconds: 500
logging:
  level: debug
  json: true
"#;
        let config = SluiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.rate_limit, RateLimitOptions::per_window(2, 500));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.drill.latency_ms, 50);
        assert_eq!(config.window().unwrap().rate(), 4.0);
    }

    #[test]
    fn test_from_yaml_accepts_camel_case_options() {
        let yaml = r#"
rate_limit:
  maxRequests: 3
  perMilliseconds: 2000
"#;
        let config = SluiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.rate_limit, RateLimitOptions::per_window(3, 2000));
    }

    #[test]
    fn test_from_yaml_rejects_unknown_option() {
        let yaml = r#"
rate_limit:
  max_request: 3
"#;
        assert!(matches!(
            SluiceConfig::from_yaml(yaml),
            Err(SluiceError::Config(_))
        ));
    }

    #[test]
    fn test_rate_takes_precedence() {
        let options = RateLimitOptions {
            max_requests: Some(50),
            per_milliseconds: Some(10_000),
            max_rps: Some(4),
        };
        assert_eq!(
            options.resolve(None).unwrap(),
            WindowConfig::per_second(4).unwrap()
        );
    }

    #[test]
    fn test_partial_options_need_a_base() {
        let options = RateLimitOptions {
            max_requests: Some(5),
            ..Default::default()
        };
        assert!(matches!(options.resolve(None), Err(SluiceError::Config(_))));

        let base = WindowConfig::per_millis(1, 250).unwrap();
        assert_eq!(
            options.resolve(Some(base)).unwrap(),
            WindowConfig::per_millis(5, 250).unwrap()
        );
    }

    #[test]
    fn test_zero_values_are_rejected() {
        assert!(RateLimitOptions::per_second(0).resolve(None).is_err());
        assert!(RateLimitOptions::per_window(0, 1000).resolve(None).is_err());
        assert!(RateLimitOptions::per_window(1, 0).resolve(None).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("sluice-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "rate_limit:\n  max_rps: 7\ndrill:\n  requests: 3\n").unwrap();

        let config = SluiceConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.rate_limit, RateLimitOptions::per_second(7));
        assert_eq!(config.drill.requests, 3);
        assert_eq!(config.window().unwrap().rate(), 7.0);
    }

    #[test]
    fn test_load_accepts_camel_case_options() {
        let path = std::env::temp_dir().join(format!("sluice-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "rate_limit:\n  maxRequests: 3\n  perMilliseconds: 2000\n").unwrap();

        let config = SluiceConfig::load(Some(&path));
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.rate_limit, RateLimitOptions::per_window(3, 2000));
        assert_eq!(config.window().unwrap().rate(), 1.5);
    }

    #[test]
    fn test_load_accepts_camel_case_rate() {
        let path = std::env::temp_dir().join(format!("sluice-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "rate_limit:\n  maxRPS: 6\n").unwrap();

        let config = SluiceConfig::load(Some(&path));
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.unwrap().rate_limit, RateLimitOptions::per_second(6));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let path = std::env::temp_dir().join("sluice-does-not-exist.yaml");
        assert!(matches!(
            SluiceConfig::load(Some(&path)),
            Err(SluiceError::Config(_))
        ));
    }
}
