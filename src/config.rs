//! Configuration for the logger.
//!
//! [`LoggerOptions`] is what `SumoLogger::config` accepts: the endpoint, the
//! flush interval, routing metadata and callback hooks. [`Config`] loads the
//! same settings, plus transport and queue tuning, from environment
//! variables for the binary and for hosts that prefer env-driven setup.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::hooks::{ErrorHookRegistry, PanicHookRegistry};

/// Default HTTP request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum flush interval to ensure reasonable data freshness
pub const MAX_INTERVAL_MS: u64 = 3_600_000;

/// Zero-argument delivery callback.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Options accepted by `SumoLogger::config`.
#[derive(Clone, Default)]
pub struct LoggerOptions {
    /// Collection endpoint URL (required)
    pub endpoint: Option<String>,

    /// Flush interval; zero flushes after every log call
    pub interval: Duration,

    /// Session to adopt instead of the persisted or generated one
    pub session_key: Option<String>,

    /// Registry to capture uncaught errors from
    pub send_errors: Option<Arc<dyn ErrorHookRegistry>>,

    /// Value of the `X-Sumo-Name` header
    pub source_name: Option<String>,

    /// Value of the `X-Sumo-Category` header
    pub source_category: Option<String>,

    /// Value of the `X-Sumo-Host` header
    pub host_name: Option<String>,

    /// Called after a batch is delivered and removed from the queue
    pub success_cb: Option<Callback>,

    /// Called when a batch could not be delivered
    pub error_cb: Option<Callback>,
}

impl LoggerOptions {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn session_key(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    pub fn send_errors(mut self, registry: Arc<dyn ErrorHookRegistry>) -> Self {
        self.send_errors = Some(registry);
        self
    }

    pub fn source_name(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = Some(source_name.into());
        self
    }

    pub fn source_category(mut self, source_category: impl Into<String>) -> Self {
        self.source_category = Some(source_category.into());
        self
    }

    pub fn host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

    pub fn on_success(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.success_cb = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.error_cb = Some(Arc::new(callback));
        self
    }

    /// The flush interval, if it does not exceed [`MAX_INTERVAL_MS`].
    pub fn validated_interval(&self) -> Result<Duration, ConfigError> {
        if self.interval > Duration::from_millis(MAX_INTERVAL_MS) {
            return Err(ConfigError::interval_too_long(self.interval));
        }
        Ok(self.interval)
    }

    /// The endpoint, if present and non-empty.
    pub fn validated_endpoint(&self) -> Result<&str, ConfigError> {
        match self.endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => Ok(endpoint),
            _ => Err(ConfigError::missing_endpoint()),
        }
    }
}

impl std::fmt::Debug for LoggerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerOptions")
            .field("endpoint", &self.endpoint)
            .field("interval", &self.interval)
            .field("session_key", &self.session_key)
            .field("send_errors", &self.send_errors.is_some())
            .field("source_name", &self.source_name)
            .field("source_category", &self.source_category)
            .field("host_name", &self.host_name)
            .field("success_cb", &self.success_cb.is_some())
            .field("error_cb", &self.error_cb.is_some())
            .finish()
    }
}

/// Settings for the HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// HTTP request timeout duration
    pub request_timeout: Duration,

    /// Retries within a single delivery attempt
    pub max_retries: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_retries: 0,
        }
    }
}

/// Error type for configuration failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl ConfigError {
    pub fn missing_endpoint() -> Self {
        Self {
            message: "an endpoint is required".to_string(),
            env_var: None,
        }
    }

    pub fn interval_too_long(interval: Duration) -> Self {
        Self {
            message: format!(
                "interval {:?} exceeds maximum ({}ms)",
                interval, MAX_INTERVAL_MS
            ),
            env_var: None,
        }
    }

    fn invalid(env_var: &str, message: String) -> Self {
        Self {
            message,
            env_var: Some(env_var.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Environment-driven configuration.
///
/// - `SUMO_LOGGER_ENDPOINT`: collection endpoint URL
/// - `SUMO_LOGGER_INTERVAL_MS`: flush interval, 0 flushes per log call (default: 0)
/// - `SUMO_LOGGER_SESSION_KEY`: explicit session token
/// - `SUMO_LOGGER_SOURCE_NAME`, `SUMO_LOGGER_SOURCE_CATEGORY`, `SUMO_LOGGER_HOST_NAME`: routing headers
/// - `SUMO_LOGGER_SEND_ERRORS`: capture panics as log entries (default: false)
/// - `SUMO_LOGGER_MAX_QUEUE`: cap on queued entries (default: unbounded)
/// - `SUMO_LOGGER_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 30)
/// - `SUMO_LOGGER_MAX_RETRIES`: retries per delivery attempt (default: 0)
/// - `SUMO_LOGGER_SESSION_FILE`: file persisting the session token
/// - `SUMO_LOGGER_ORIGIN`: location stamped on entries (default: the executable)
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub endpoint: Option<String>,
    pub interval: Duration,
    pub session_key: Option<String>,
    pub source_name: Option<String>,
    pub source_category: Option<String>,
    pub host_name: Option<String>,
    pub send_errors: bool,
    pub max_queue_entries: Option<usize>,
    pub session_file: Option<PathBuf>,
    pub origin: Option<String>,
    pub transport: TransportConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A missing endpoint is not an error here; `SumoLogger::config` reports
    /// it when the options are applied.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` naming the variable when a numeric or boolean
    /// value cannot be parsed or is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let interval_ms = parse_u64("SUMO_LOGGER_INTERVAL_MS")?.unwrap_or(0);
        if interval_ms > MAX_INTERVAL_MS {
            return Err(ConfigError::invalid(
                "SUMO_LOGGER_INTERVAL_MS",
                format!(
                    "interval {} exceeds maximum ({}ms)",
                    interval_ms, MAX_INTERVAL_MS
                ),
            ));
        }

        let max_queue_entries = match parse_u64("SUMO_LOGGER_MAX_QUEUE")? {
            Some(0) => {
                return Err(ConfigError::invalid(
                    "SUMO_LOGGER_MAX_QUEUE",
                    "queue cap must be greater than 0".to_string(),
                ))
            }
            Some(max) => Some(max as usize),
            None => None,
        };

        let request_timeout_secs =
            parse_u64("SUMO_LOGGER_REQUEST_TIMEOUT_SECS")?.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "SUMO_LOGGER_REQUEST_TIMEOUT_SECS",
                "request timeout must be greater than 0".to_string(),
            ));
        }

        let max_retries = match parse_u64("SUMO_LOGGER_MAX_RETRIES")? {
            Some(n) => u32::try_from(n).map_err(|_| {
                ConfigError::invalid("SUMO_LOGGER_MAX_RETRIES", format!("'{}' is too large", n))
            })?,
            None => 0,
        };

        Ok(Self {
            endpoint: non_empty_var("SUMO_LOGGER_ENDPOINT"),
            interval: Duration::from_millis(interval_ms),
            session_key: non_empty_var("SUMO_LOGGER_SESSION_KEY"),
            source_name: non_empty_var("SUMO_LOGGER_SOURCE_NAME"),
            source_category: non_empty_var("SUMO_LOGGER_SOURCE_CATEGORY"),
            host_name: non_empty_var("SUMO_LOGGER_HOST_NAME"),
            send_errors: parse_bool("SUMO_LOGGER_SEND_ERRORS")?.unwrap_or(false),
            max_queue_entries,
            session_file: non_empty_var("SUMO_LOGGER_SESSION_FILE").map(PathBuf::from),
            origin: non_empty_var("SUMO_LOGGER_ORIGIN"),
            transport: TransportConfig {
                request_timeout: Duration::from_secs(request_timeout_secs),
                max_retries,
            },
        })
    }

    /// Options for `SumoLogger::config`. Uncaught-error capture, when enabled,
    /// chains onto the process panic hook.
    pub fn logger_options(&self) -> LoggerOptions {
        LoggerOptions {
            endpoint: self.endpoint.clone(),
            interval: self.interval,
            session_key: self.session_key.clone(),
            send_errors: self
                .send_errors
                .then(|| Arc::new(PanicHookRegistry) as Arc<dyn ErrorHookRegistry>),
            source_name: self.source_name.clone(),
            source_category: self.source_category.clone(),
            host_name: self.host_name.clone(),
            success_cb: None,
            error_cb: None,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_u64(name: &str) -> Result<Option<u64>, ConfigError> {
    match non_empty_var(name) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::invalid(name, format!("'{}' is not a valid number", value))),
        None => Ok(None),
    }
}

fn parse_bool(name: &str) -> Result<Option<bool>, ConfigError> {
    match non_empty_var(name) {
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::invalid(
                name,
                format!("'{}' is not a valid boolean", value),
            )),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_VARS: &[&str] = &[
        "SUMO_LOGGER_ENDPOINT",
        "SUMO_LOGGER_INTERVAL_MS",
        "SUMO_LOGGER_SESSION_KEY",
        "SUMO_LOGGER_SOURCE_NAME",
        "SUMO_LOGGER_SOURCE_CATEGORY",
        "SUMO_LOGGER_HOST_NAME",
        "SUMO_LOGGER_SEND_ERRORS",
        "SUMO_LOGGER_MAX_QUEUE",
        "SUMO_LOGGER_REQUEST_TIMEOUT_SECS",
        "SUMO_LOGGER_MAX_RETRIES",
        "SUMO_LOGGER_SESSION_FILE",
        "SUMO_LOGGER_ORIGIN",
    ];

    // Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        original: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let original = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                original,
            }
        }

        fn remove(key: &str) -> Self {
            let original = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                original,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.original {
                Some(val) => env::set_var(&self.key, val),
                None => env::remove_var(&self.key),
            }
        }
    }

    fn clean_env() -> Vec<EnvGuard> {
        ALL_VARS.iter().map(|v| EnvGuard::remove(v)).collect()
    }

    #[test]
    fn test_options_builder() {
        let options = LoggerOptions::new("https://collector.example.com/receiver/v1/http/abc")
            .interval(Duration::from_millis(500))
            .source_name("web")
            .source_category("prod/web")
            .host_name("host-1")
            .session_key("s-1")
            .on_success(|| {})
            .on_error(|| {});

        assert_eq!(options.interval, Duration::from_millis(500));
        assert_eq!(options.source_name.as_deref(), Some("web"));
        assert!(options.success_cb.is_some());
        assert!(options.error_cb.is_some());
        assert!(options.send_errors.is_none());
        assert_eq!(
            options.validated_endpoint(),
            Ok("https://collector.example.com/receiver/v1/http/abc")
        );
    }

    #[test]
    fn test_missing_endpoint_is_rejected() {
        assert_eq!(
            LoggerOptions::default().validated_endpoint(),
            Err(ConfigError::missing_endpoint())
        );
        assert_eq!(
            LoggerOptions::new("  ").validated_endpoint(),
            Err(ConfigError::missing_endpoint())
        );
    }

    #[test]
    fn test_interval_is_capped() {
        let at_cap = LoggerOptions::new("https://x/collect")
            .interval(Duration::from_millis(MAX_INTERVAL_MS));
        assert_eq!(
            at_cap.validated_interval(),
            Ok(Duration::from_millis(MAX_INTERVAL_MS))
        );

        let too_long = LoggerOptions::new("https://x/collect").interval(Duration::MAX);
        let err = too_long.validated_interval().unwrap_err();
        assert!(err.message.contains("exceeds maximum"));
        assert!(err.env_var.is_none());
    }

    #[test]
    fn test_options_debug_hides_callbacks() {
        let options = LoggerOptions::new("https://x/collect").on_success(|| {});
        let debug = format!("{:?}", options);
        assert!(debug.contains("success_cb: true"));
        assert!(debug.contains("error_cb: false"));
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        let _guards = clean_env();

        let config = Config::from_env().expect("Should load with defaults");
        assert!(config.endpoint.is_none());
        assert_eq!(config.interval, Duration::ZERO);
        assert!(!config.send_errors);
        assert!(config.max_queue_entries.is_none());
        assert_eq!(config.transport, TransportConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_custom_values() {
        let _guards = clean_env();
        let _g1 = EnvGuard::set("SUMO_LOGGER_ENDPOINT", "https://collector.example.com/r/abc");
        let _g2 = EnvGuard::set("SUMO_LOGGER_INTERVAL_MS", "2000");
        let _g3 = EnvGuard::set("SUMO_LOGGER_SOURCE_CATEGORY", "prod/web");
        let _g4 = EnvGuard::set("SUMO_LOGGER_SEND_ERRORS", "true");
        let _g5 = EnvGuard::set("SUMO_LOGGER_MAX_QUEUE", "500");
        let _g6 = EnvGuard::set("SUMO_LOGGER_MAX_RETRIES", "2");
        let _g7 = EnvGuard::set("SUMO_LOGGER_HOST_NAME", "   ");

        let config = Config::from_env().expect("Should load custom values");
        assert_eq!(config.endpoint.as_deref(), Some("https://collector.example.com/r/abc"));
        assert_eq!(config.interval, Duration::from_secs(2));
        assert_eq!(config.source_category.as_deref(), Some("prod/web"));
        assert!(config.host_name.is_none());
        assert!(config.send_errors);
        assert_eq!(config.max_queue_entries, Some(500));
        assert_eq!(config.transport.max_retries, 2);

        let options = config.logger_options();
        assert!(options.send_errors.is_some());
        assert_eq!(options.interval, Duration::from_secs(2));
    }

    #[test]
    #[serial]
    fn test_invalid_interval() {
        let _guards = clean_env();
        let _guard = EnvGuard::set("SUMO_LOGGER_INTERVAL_MS", "soon");

        let err = Config::from_env().unwrap_err();
        assert!(err.message.contains("not a valid number"));
        assert_eq!(err.env_var.as_deref(), Some("SUMO_LOGGER_INTERVAL_MS"));
    }

    #[test]
    #[serial]
    fn test_interval_exceeds_max() {
        let _guards = clean_env();
        let _guard = EnvGuard::set("SUMO_LOGGER_INTERVAL_MS", "99999999");

        let err = Config::from_env().unwrap_err();
        assert!(err.message.contains("exceeds maximum"));
    }

    #[test]
    #[serial]
    fn test_zero_queue_cap() {
        let _guards = clean_env();
        let _guard = EnvGuard::set("SUMO_LOGGER_MAX_QUEUE", "0");

        let err = Config::from_env().unwrap_err();
        assert!(err.message.contains("greater than 0"));
    }

    #[test]
    #[serial]
    fn test_invalid_bool() {
        let _guards = clean_env();
        let _guard = EnvGuard::set("SUMO_LOGGER_SEND_ERRORS", "maybe");

        let err = Config::from_env().unwrap_err();
        assert!(err.message.contains("not a valid boolean"));
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError {
            message: "test error".to_string(),
            env_var: Some("TEST_VAR".to_string()),
        };
        assert_eq!(
            format!("{}", error),
            "Configuration error for TEST_VAR: test error"
        );
        assert_eq!(
            format!("{}", ConfigError::missing_endpoint()),
            "Configuration error: an endpoint is required"
        );
    }
}
