//! Configuration management for AlertWatch

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Environment variable prefix, e.g. `ALERTWATCH__ENGINE__TICK_INTERVAL=30s`
pub const ENV_PREFIX: &str = "ALERTWATCH";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Evaluation engine configuration
    pub engine: EngineConfig,

    /// Notification delivery configuration
    pub notifications: NotificationConfig,

    /// HTTP server configuration
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// Later sources override earlier ones. The file format is picked from the
    /// extension (toml, json, yaml).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// Evaluation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Period of the evaluation loop
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Upper bound for a single metric store call
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
    /// Number of resolved alerts retained in history
    pub history_capacity: usize,
    /// Whether the tick loop runs as soon as the engine is spawned
    pub start_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            query_timeout: Duration::from_secs(5),
            history_capacity: 10_000,
            start_enabled: true,
        }
    }
}

/// Notification delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Upper bound for a single transport send
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
    /// PagerDuty Events v2 endpoint
    pub pagerduty_events_url: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(10),
            pagerduty_events_url: "https://events.pagerduty.com/v2/enqueue".to_string(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// HTTP API port
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.tick_interval, Duration::from_secs(60));
        assert_eq!(config.engine.history_capacity, 10_000);
        assert_eq!(config.notifications.send_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[engine]
tick_interval = "15s"
history_capacity = 50

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.engine.tick_interval, Duration::from_secs(15));
        assert_eq!(config.engine.history_capacity, 50);
        assert_eq!(config.engine.query_timeout, Duration::from_secs(5));
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.server.http_port, 8080);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/alertwatch.toml")));
        assert!(result.is_err());
    }
}
