//! Configuration module for the appointment creator.
//!
//! Loads configuration from TOML files with environment variable substitution.
//!
//! # Example
//!
//! ```toml
//! [redis]
//! url = "${REDIS_URL}"
//!
//! [worker]
//! consumer_group = "appointment_creators"
//! stream = "appointments:events"
//! handle_timeout_ms = 10000
//!
//! [storage]
//! key_prefix = "appointments"
//! ```

use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "APPOINTMENT_CREATOR_CONFIG";

/// Config file used when [`CONFIG_PATH_ENV`] is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/appointment-creator.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Redis configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

/// Worker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Stream the worker consumes
    #[serde(default = "default_stream")]
    pub stream: String,

    /// Entries read per XREADGROUP call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long a read blocks waiting for entries
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,

    /// Deadline for handling a single message
    #[serde(default = "default_handle_timeout_ms")]
    pub handle_timeout_ms: u64,

    /// Pending entries idle for longer than this are reclaimed
    #[serde(default = "default_pending_idle_ms")]
    pub pending_idle_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: None,
            consumer_group: default_consumer_group(),
            stream: default_stream(),
            batch_size: default_batch_size(),
            block_ms: default_block_ms(),
            handle_timeout_ms: default_handle_timeout_ms(),
            pending_idle_ms: default_pending_idle_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn handle_timeout(&self) -> Duration {
        Duration::from_millis(self.handle_timeout_ms)
    }
}

fn default_consumer_group() -> String {
    crate::DEFAULT_CONSUMER_GROUP.to_string()
}

fn default_stream() -> String {
    crate::EVENT_STREAM_NAME.to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_block_ms() -> u64 {
    2000
}

fn default_handle_timeout_ms() -> u64 {
    10000
}

fn default_pending_idle_ms() -> u64 {
    30000
}

/// Storage configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_key_prefix() -> String {
    crate::repository::redis::DEFAULT_KEY_PREFIX.to_string()
}

impl AppConfig {
    /// Load configuration from the default path or `APPOINTMENT_CREATOR_CONFIG`.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    ///
    /// A missing file yields the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text, substituting `${VAR}` references.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content);

        debug!("Parsing TOML configuration");
        let config: AppConfig = toml::from_str(&content)?;

        config.validate()?;

        info!(
            stream = %config.worker.stream,
            consumer_group = %config.worker.consumer_group,
            key_prefix = %config.storage.key_prefix,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Apply `REDIS_URL`, `APPOINTMENT_WORKER_NAME` and `APPOINTMENT_CONSUMER_GROUP`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("REDIS_URL") {
            self.redis.url = url;
        }
        if let Ok(name) = env::var("APPOINTMENT_WORKER_NAME") {
            self.worker.name = Some(name);
        }
        if let Ok(group) = env::var("APPOINTMENT_CONSUMER_GROUP") {
            self.worker.consumer_group = group;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis.url.contains("${") {
            warn!(
                url = %self.redis.url,
                "Redis URL contains unsubstituted environment variable"
            );
        } else if !self.redis.url.starts_with("redis://")
            && !self.redis.url.starts_with("rediss://")
        {
            return Err(ConfigError::ValidationError(
                "Redis URL must start with redis:// or rediss://".to_string(),
            ));
        }

        if self.worker.stream.is_empty() {
            return Err(ConfigError::ValidationError(
                "worker.stream must not be empty".to_string(),
            ));
        }

        if self.worker.consumer_group.is_empty() {
            return Err(ConfigError::ValidationError(
                "worker.consumer_group must not be empty".to_string(),
            ));
        }

        if self.worker.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "worker.batch_size must be at least 1".to_string(),
            ));
        }

        if self.worker.handle_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "worker.handle_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.storage.key_prefix.is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.key_prefix must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid")
    })
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    env_var_pattern()
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                    caps[0].to_string()
                }
            }
        })
        .to_string()
}
