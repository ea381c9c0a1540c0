//! Application configuration.
//!
//! Configuration is a TOML document deserialized into [`AppConfig`], overlaid with
//! secrets from the environment and validated section by section.
//!
//! ```no_run
//! use relaykit_core::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Reads RELAYKIT_CONFIG (defaults to config/relaykit.toml) and CONFIG_ENV
//! let config = AppConfig::from_env()?;
//! println!("namespace: {}", config.app.namespace);
//! # Ok(())
//! # }
//! ```

use crate::policy::{PolicyOverrides, ResiliencyConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration error
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Environment variable not set
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),
    /// Invalid environment value
    #[error("Invalid environment: {0}")]
    InvalidEnvironment(String),
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
    /// Failed to read or parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
    /// A job was registered without a matching configuration entry
    #[error("Job configuration not found: {0}")]
    MissingJob(String),
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development environment (local)
    #[default]
    Development,
    /// Staging environment (pre-production)
    Staging,
    /// Production environment
    Production,
}

impl Environment {
    /// Check if this is production environment
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if this is development environment
    #[must_use]
    pub const fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "prod" | "production" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidEnvironment(s.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Staging => write!(f, "staging"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Application identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppInfo {
    /// Prefix for queue and cache keys
    pub namespace: String,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            namespace: "relaykit".to_string(),
        }
    }
}

/// A topic reachable through a stream connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Logical name used by code and job parameters
    pub name: String,
    /// Physical topic on the brokers
    pub value: String,
    /// Consumer group for subscriptions
    pub group_name: String,
}

/// A named connection to the primary stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConnectionConfig {
    /// Connection name
    pub name: String,
    /// Comma-separated bootstrap servers
    pub brokers: String,
    /// Topics served by this connection
    #[serde(default)]
    pub topics: Vec<TopicConfig>,
}

/// A topic the consumer subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerTopicConfig {
    /// Logical topic name
    pub name: String,
    /// Connection serving the topic
    pub connection: String,
    /// Whether the DB drain may process a batch for this topic concurrently
    #[serde(default)]
    pub parallel: bool,
}

/// Message relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Persist audit rows for delivered/received messages
    pub save_to_db: bool,
    /// Batch size for the consumer drains
    pub message_to_process: usize,
    /// Producer acknowledgement timeout in milliseconds
    pub producer_send_timeout_ms: u64,
    /// Stream connections
    pub connections: Vec<StreamConnectionConfig>,
    /// Topics the consumer subscribes to
    pub consumer_topics: Vec<ConsumerTopicConfig>,
    /// Logical topic names redirected straight to the durable queue
    pub redirect_to_queue: Vec<String>,
}

impl MessagingConfig {
    /// Validate messaging configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.message_to_process == 0 {
            return Err(ConfigError::ValidationError(
                "message_to_process must be > 0".to_string(),
            ));
        }
        if self.producer_send_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "producer_send_timeout_ms must be > 0".to_string(),
            ));
        }
        for topic in &self.consumer_topics {
            if self.topic(&topic.connection, &topic.name).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "consumer topic '{}' is not declared on connection '{}'",
                    topic.name, topic.connection
                )));
            }
        }
        Ok(())
    }

    /// Get producer timeout as Duration
    #[must_use]
    pub const fn producer_send_timeout(&self) -> Duration {
        Duration::from_millis(self.producer_send_timeout_ms)
    }

    /// Look up a topic by connection and logical name.
    #[must_use]
    pub fn topic(&self, connection: &str, name: &str) -> Option<&TopicConfig> {
        self.connections
            .iter()
            .find(|c| c.name == connection)
            .and_then(|c| c.topics.iter().find(|t| t.name == name))
    }

    /// Connection that serves the physical topic `value`.
    #[must_use]
    pub fn connection_for(&self, value: &str) -> Option<&StreamConnectionConfig> {
        self.connections
            .iter()
            .find(|c| c.topics.iter().any(|t| t.value.eq_ignore_ascii_case(value)))
    }

    /// Consumer entry for a logical topic name.
    #[must_use]
    pub fn consumer_topic(&self, name: &str) -> Option<&ConsumerTopicConfig> {
        self.consumer_topics.iter().find(|t| t.name == name)
    }

    /// Whether a logical topic is redirected straight to the durable queue.
    #[must_use]
    pub fn is_redirected(&self, name: &str) -> bool {
        self.redirect_to_queue.iter().any(|t| t == name)
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            save_to_db: false,
            message_to_process: 25,
            producer_send_timeout_ms: 5000,
            connections: Vec::new(),
            consumer_topics: Vec::new(),
            redirect_to_queue: Vec::new(),
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL (overridden by `REDIS_URL`)
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL (from environment variable for security)
    #[serde(skip)]
    pub url: Option<String>,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
}

impl DatabaseConfig {
    /// Validate database configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be > 0".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Get connect timeout as Duration
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            connect_timeout_secs: 10,
        }
    }
}

/// Retention windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLifetimeConfig {
    /// Days relay rows are kept before the retention job deletes them
    pub changelog_days: u32,
}

impl Default for DataLifetimeConfig {
    fn default() -> Self {
        Self { changelog_days: 14 }
    }
}

/// A scheduled job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job name, matched against registered jobs
    pub name: String,
    /// Cron expression with seconds (`sec min hour day month weekday`)
    pub schedule: String,
    /// Whether the job is scheduled at all
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// One job instance is created per parameter
    #[serde(default)]
    pub parameters: Vec<String>,
}

const fn enabled_by_default() -> bool {
    true
}

/// Scheduled jobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundJobsConfig {
    /// Job entries
    pub jobs: Vec<JobConfig>,
}

impl BackgroundJobsConfig {
    /// Find the entry for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingJob`] when no entry exists.
    pub fn job(&self, name: &str) -> Result<&JobConfig, ConfigError> {
        self.jobs
            .iter()
            .find(|job| job.name == name)
            .ok_or_else(|| ConfigError::MissingJob(name.to_string()))
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines
    pub json_logs: bool,
    /// Enable the Prometheus exporter
    pub metrics_enabled: bool,
    /// Metrics listen address
    pub metrics_addr: String,
}

impl ObservabilityConfig {
    /// Validate observability configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "invalid log_level: {}. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }
        if self.metrics_enabled && self.metrics_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "invalid metrics_addr: {}",
                self.metrics_addr
            )));
        }
        Ok(())
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Full application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment environment
    pub environment: Environment,
    /// Application identity
    pub app: AppInfo,
    /// Global policy defaults
    pub resiliency: ResiliencyConfig,
    /// Per-request-type overrides keyed by request name
    pub overrides: BTreeMap<String, PolicyOverrides>,
    /// Requests slower than this are logged as warnings
    pub request_performance_threshold_ms: u64,
    /// Message relay
    pub messaging: MessagingConfig,
    /// Redis
    pub redis: RedisConfig,
    /// Database
    pub database: DatabaseConfig,
    /// Retention
    pub data_lifetime: DataLifetimeConfig,
    /// Scheduled jobs
    pub background_jobs: BackgroundJobsConfig,
    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            app: AppInfo::default(),
            resiliency: ResiliencyConfig::default(),
            overrides: BTreeMap::new(),
            request_performance_threshold_ms: 500,
            messaging: MessagingConfig::default(),
            redis: RedisConfig::default(),
            database: DatabaseConfig::default(),
            data_lifetime: DataLifetimeConfig::default(),
            background_jobs: BackgroundJobsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment
    ///
    /// Reads the file named by `RELAYKIT_CONFIG` (defaults to
    /// `config/relaykit.toml`).
    ///
    /// # Errors
    ///
    /// Returns error if configuration cannot be loaded or is invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        let path =
            std::env::var("RELAYKIT_CONFIG").unwrap_or_else(|_| "config/relaykit.toml".to_string());
        Self::load(path)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or validated
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
        let mut config = Self::parse(&raw)?;

        if let Ok(env_str) = std::env::var("CONFIG_ENV") {
            config.environment = env_str.parse()?;
        }

        config.load_secrets()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without touching the environment
    ///
    /// # Errors
    ///
    /// Returns error if the document is not valid TOML for this schema
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load secrets from environment variables
    ///
    /// # Errors
    ///
    /// Returns error if required secrets are missing
    fn load_secrets(&mut self) -> Result<(), ConfigError> {
        // Database URL (required outside development)
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = Some(url);
        } else if !self.environment.is_development() {
            return Err(ConfigError::EnvVarNotSet("DATABASE_URL".to_string()));
        }

        if let Ok(url) = std::env::var("REDIS_URL") {
            self.redis.url = url;
        }

        Ok(())
    }

    /// Validate entire configuration
    ///
    /// # Errors
    ///
    /// Returns error if any configuration section is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.namespace.is_empty() {
            return Err(ConfigError::ValidationError(
                "app.namespace cannot be empty".to_string(),
            ));
        }
        self.resiliency.validate()?;
        for overrides in self.overrides.values() {
            overrides.validate()?;
        }
        self.messaging.validate()?;
        self.database.validate()?;
        self.observability.validate()?;
        Ok(())
    }

    /// Slow-request threshold as Duration
    #[must_use]
    pub const fn request_performance_threshold(&self) -> Duration {
        Duration::from_millis(self.request_performance_threshold_ms)
    }
}
