//! Storage adapters for API keys and their rate-limit state

mod factory;
mod in_memory;
mod postgres;
mod redb;
mod redis;

pub use factory::{StorageType, StoreConfig, StoreFactory};
pub use in_memory::InMemoryApiKeyStore;
pub use postgres::{PostgresApiKeyStore, PostgresConfig};
pub use redb::RedbApiKeyStore;
pub use redis::{RedisApiKeyStore, RedisKeyspace, RedisStoreConfig};
