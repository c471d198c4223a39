use std::path::PathBuf;

use serde::Deserialize;

use crate::domain::rate_limit::{RateLimitPolicy, RateLimitStrategy};
use crate::domain::DomainError;
use crate::infrastructure::storage::{
    PostgresConfig, RedisStoreConfig, StorageType, StoreConfig,
};

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub storage: StorageSettings,
    pub keys: KeysConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// memory | redb | redis | postgres
    pub backend: String,
    pub redb_path: PathBuf,
    pub redis: RedisSettings,
    pub postgres: PostgresSettings,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            redb_path: PathBuf::from("data/api_keys.redb"),
            redis: RedisSettings::default(),
            postgres: PostgresSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub url: String,
    pub key_prefix: String,
    /// sliding_log (default) or fixed_window
    pub rate_limit_mode: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        let defaults = RedisStoreConfig::default();
        Self {
            url: defaults.url,
            key_prefix: defaults.key_prefix,
            rate_limit_mode: "sliding_log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        let defaults = PostgresConfig::default();
        Self {
            url: defaults.url,
            max_connections: defaults.max_connections,
            min_connections: defaults.min_connections,
            connect_timeout_secs: defaults.connect_timeout_secs,
            idle_timeout_secs: defaults.idle_timeout_secs,
        }
    }
}

/// Key generation and default throttling
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Prefix prepended to generated secrets
    pub prefix: String,
    /// Random bytes per secret
    pub key_bytes: usize,
    pub default_rate_limit: RateLimitPolicy,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            key_bytes: 12,
            default_rate_limit: RateLimitPolicy::default(),
        }
    }
}

impl StorageSettings {
    /// Resolve the configured backend into a store configuration
    pub fn store_config(&self) -> Result<StoreConfig, DomainError> {
        let storage_type = StorageType::from_str(&self.backend).ok_or_else(|| {
            DomainError::configuration(format!("Unknown storage backend '{}'", self.backend))
        })?;

        let config = match storage_type {
            StorageType::InMemory => StoreConfig::in_memory(),
            StorageType::Redb => StoreConfig::redb(&self.redb_path),
            StorageType::Redis => {
                let strategy = RateLimitStrategy::from_str(&self.redis.rate_limit_mode)
                    .ok_or_else(|| {
                        DomainError::configuration(format!(
                            "Unknown rate limit mode '{}'",
                            self.redis.rate_limit_mode
                        ))
                    })?;

                StoreConfig::redis(
                    RedisStoreConfig::new(&self.redis.url)
                        .with_key_prefix(&self.redis.key_prefix)
                        .with_rate_limit_strategy(strategy),
                )
            }
            StorageType::Postgres => StoreConfig::postgres(
                PostgresConfig::new(&self.postgres.url)
                    .with_max_connections(self.postgres.max_connections)
                    .with_min_connections(self.postgres.min_connections)
                    .with_connect_timeout(self.postgres.connect_timeout_secs)
                    .with_idle_timeout(self.postgres.idle_timeout_secs),
            ),
        };

        Ok(config)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
