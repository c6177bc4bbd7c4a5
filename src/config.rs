//! Configuration management for the tracker
//!
//! TOML file support, environment variable overrides and defaults.
//!
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:8080"
//! log_level = "info"
//!
//! [redis]
//! url = "redis://:secret@127.0.0.1:6379/0"
//! max_idle = 128
//!
//! [tracking]
//! namespace = "tracklist"
//! default_metric = "active"
//! ```

use crate::error::{Error, Result};
use crate::keys::{validate_metric_name, Keyspace, DEFAULT_METRIC, DEFAULT_NAMESPACE};
use crate::redis::util::sanitize_url;
use crate::redis::RedisConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ApplicationConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerSection,

    /// Redis connection settings
    #[serde(default)]
    pub redis: RedisSection,

    /// Key layout settings
    #[serde(default)]
    pub tracking: TrackingSection,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerSection {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Log level (error, warn, info, debug, trace) or an EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// CORS allowed origins (empty = any origin)
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

/// Redis connection configuration
#[derive(Clone, Deserialize, Serialize, PartialEq)]
pub struct RedisSection {
    /// Connection string, `redis://:password@host:port/db`
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Idle connections kept for reuse
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,

    /// Connections handed out at once
    #[serde(default = "default_max_active")]
    pub max_active: usize,

    /// Seconds an idle connection may sit before it is closed
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Seconds allowed for dialing, AUTH and SELECT
    #[serde(default = "default_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// Seconds allowed per command or transaction
    #[serde(default = "default_timeout_secs")]
    pub command_timeout_secs: u64,
}

/// Key layout configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TrackingSection {
    /// Namespace prefixed to every key
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Metric used by retention requests that carry no `name`
    #[serde(default = "default_metric")]
    pub default_metric: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_redis_url() -> String {
    RedisConfig::default().url
}
fn default_max_idle() -> usize {
    RedisConfig::default().max_idle
}
fn default_max_active() -> usize {
    RedisConfig::default().max_active
}
fn default_idle_timeout_secs() -> u64 {
    RedisConfig::default().idle_timeout.as_secs()
}
fn default_timeout_secs() -> u64 {
    5
}
fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}
fn default_metric() -> String {
    DEFAULT_METRIC.to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_level: default_log_level(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl Default for RedisSection {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            max_idle: default_max_idle(),
            max_active: default_max_active(),
            idle_timeout_secs: default_idle_timeout_secs(),
            connection_timeout_secs: default_timeout_secs(),
            command_timeout_secs: default_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for RedisSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSection")
            .field("url", &sanitize_url(&self.url))
            .field("max_idle", &self.max_idle)
            .field("max_active", &self.max_active)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .finish()
    }
}

impl Default for TrackingSection {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            default_metric: default_metric(),
        }
    }
}

impl From<&RedisSection> for RedisConfig {
    fn from(section: &RedisSection) -> Self {
        RedisConfig::with_url(section.url.clone())
            .max_idle(section.max_idle)
            .max_active(section.max_active)
            .idle_timeout(Duration::from_secs(section.idle_timeout_secs))
            .connection_timeout(Duration::from_secs(section.connection_timeout_secs))
            .command_timeout(Duration::from_secs(section.command_timeout_secs))
    }
}

impl ApplicationConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::ConfigError(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Load a TOML file, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// `TRACKLIST_LISTEN_ADDR`, `TRACKLIST_REDIS_URL`, `TRACKLIST_NAMESPACE`
    /// and `RUST_LOG`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("TRACKLIST_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Ok(url) = std::env::var("TRACKLIST_REDIS_URL") {
            self.redis.url = url;
        }
        if let Ok(namespace) = std::env::var("TRACKLIST_NAMESPACE") {
            self.tracking.namespace = namespace;
        }
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            if !log_level.trim().is_empty() {
                self.server.log_level = log_level;
            }
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::ConfigError(format!(
                "Invalid listen address '{}'",
                self.server.listen_addr
            )));
        }
        self.redis_config().validate()?;
        self.keyspace()?;
        validate_metric_name(&self.tracking.default_metric)
            .map_err(|e| Error::ConfigError(format!("tracking.default_metric: {}", e)))?;
        Ok(())
    }

    /// Pool configuration derived from the `redis` section
    pub fn redis_config(&self) -> RedisConfig {
        RedisConfig::from(&self.redis)
    }

    /// Keyspace derived from the `tracking` section
    pub fn keyspace(&self) -> Result<Keyspace> {
        Keyspace::new(self.tracking.namespace.clone())
            .map_err(|e| Error::ConfigError(format!("tracking.namespace: {}", e)))
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents).map_err(|e| {
            Error::ConfigError(format!(
                "Failed to write config file {}: {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ApplicationConfig::default();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.redis.max_idle, 128);
        assert_eq!(config.redis.idle_timeout_secs, 60);
        assert_eq!(config.tracking.namespace, "tracklist");
        assert_eq!(config.tracking.default_metric, "active");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[redis]\nurl = \"redis://:pw@cache:6380/3\"\nmax_idle = 8\n\n[tracking]\nnamespace = \"staging\""
        )
        .unwrap();

        let config = ApplicationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.redis.url, "redis://:pw@cache:6380/3");
        assert_eq!(config.redis.max_idle, 8);
        assert_eq!(config.redis.max_active, 64);
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.keyspace().unwrap().namespace(), "staging");
        assert_eq!(config.tracking.default_metric, DEFAULT_METRIC);

        let redis = config.redis_config();
        assert_eq!(redis.max_idle, 8);
        assert_eq!(redis.command_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracklist.toml");

        let mut config = ApplicationConfig::default();
        config.server.cors_allowed_origins = vec!["https://example.com".to_string()];
        config.save_to_file(&path).unwrap();

        assert_eq!(ApplicationConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_files() {
        assert!(matches!(
            ApplicationConfig::from_file("/nonexistent/tracklist.toml"),
            Err(Error::ConfigError(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[redis\nurl = 1").unwrap();
        assert!(ApplicationConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = ApplicationConfig::default();
        config.redis.url = "redis://localhost:6379/zero".to_string();
        assert!(config.validate().is_err());

        let mut config = ApplicationConfig::default();
        config.tracking.namespace = "bad:ns".to_string();
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));

        let mut config = ApplicationConfig::default();
        config.tracking.default_metric = "page-views".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
        assert!(err.to_string().contains("default_metric"));

        let mut config = ApplicationConfig::default();
        config.server.listen_addr = "localhost".to_string();
        assert!(config.validate().is_err());

        let mut config = ApplicationConfig::default();
        config.redis.max_active = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let mut config = ApplicationConfig::default();
        config.redis.url = "redis://:hunter2@localhost:6379/0".to_string();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("TRACKLIST_NAMESPACE", "envns");
        let mut config = ApplicationConfig::default();
        config.apply_env_overrides().unwrap();
        std::env::remove_var("TRACKLIST_NAMESPACE");
        assert_eq!(config.tracking.namespace, "envns");
    }
}
