//! PMP Key Manager
//!
//! API key lifecycle management with pluggable storage:
//! - Key issuance, ownership-scoped access and validation
//! - Sliding-window rate limiting per key
//! - In-memory, redb, Redis and PostgreSQL stores

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
pub use domain::{
    ApiKey, ApiKeyId, ApiKeyStore, ApiKeyUpdate, DomainError, NewApiKey, RateLimitPolicy,
    RateLimitStrategy, SanitizedApiKey,
};
pub use infrastructure::api_key::{ApiKeyManager, AuthOutcome, ListedApiKey};
pub use infrastructure::storage::{StoreConfig, StoreFactory};
