//! Store factory for runtime backend selection

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::domain::api_key::ApiKeyStore;
use crate::domain::DomainError;

use super::in_memory::InMemoryApiKeyStore;
use super::postgres::{PostgresApiKeyStore, PostgresConfig};
use super::redb::RedbApiKeyStore;
use super::redis::{RedisApiKeyStore, RedisStoreConfig};

/// Supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// In-memory store (tests, single process)
    InMemory,
    /// Embedded durable key-value store
    Redb,
    /// Remote cache with atomic counters
    Redis,
    /// Relational store
    Postgres,
}

impl StorageType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "inmemory" | "in-memory" | "in_memory" => Some(Self::InMemory),
            "redb" | "embedded" | "local" => Some(Self::Redb),
            "redis" => Some(Self::Redis),
            "postgres" | "postgresql" | "pg" => Some(Self::Postgres),
            _ => None,
        }
    }
}

/// Backend configuration
#[derive(Debug, Clone)]
pub enum StoreConfig {
    InMemory,
    Redb { path: PathBuf },
    Redis(RedisStoreConfig),
    Postgres(PostgresConfig),
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::InMemory
    }

    pub fn redb(path: impl Into<PathBuf>) -> Self {
        Self::Redb { path: path.into() }
    }

    pub fn redis(config: RedisStoreConfig) -> Self {
        Self::Redis(config)
    }

    pub fn postgres(config: PostgresConfig) -> Self {
        Self::Postgres(config)
    }

    /// Creates a PostgreSQL configuration from a URL
    pub fn postgres_url(url: impl Into<String>) -> Self {
        Self::Postgres(PostgresConfig::new(url))
    }

    pub fn storage_type(&self) -> StorageType {
        match self {
            Self::InMemory => StorageType::InMemory,
            Self::Redb { .. } => StorageType::Redb,
            Self::Redis(_) => StorageType::Redis,
            Self::Postgres(_) => StorageType::Postgres,
        }
    }
}

/// Factory for creating API key stores
#[derive(Debug)]
pub struct StoreFactory;

impl StoreFactory {
    /// Open the configured backend, preparing its schema where it has one
    pub async fn create(config: &StoreConfig) -> Result<Arc<dyn ApiKeyStore>, DomainError> {
        info!(backend = ?config.storage_type(), "Opening API key store");

        match config {
            StoreConfig::InMemory => Ok(Arc::new(InMemoryApiKeyStore::new())),
            StoreConfig::Redb { path } => Ok(Arc::new(RedbApiKeyStore::open(path)?)),
            StoreConfig::Redis(redis_config) => {
                Ok(Arc::new(RedisApiKeyStore::connect(redis_config.clone()).await?))
            }
            StoreConfig::Postgres(pg_config) => {
                let store = PostgresApiKeyStore::connect(pg_config).await?;
                store.ensure_schema().await?;
                Ok(Arc::new(store))
            }
        }
    }
}
