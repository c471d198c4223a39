//! API key storage adapter trait

use async_trait::async_trait;
use std::fmt::Debug;

use super::entity::{ApiKey, ApiKeyId, ApiKeyUpdate};
use crate::domain::rate_limit::RateLimitPolicy;
use crate::domain::DomainError;

/// Persistence and rate-limit state for API keys
///
/// Every implementation keeps three indices over the same record set:
/// id → record, secret → id, owner → ids. After `save_key` or `update_key`
/// returns, all three reflect the new state. After `delete_key` returns
/// `true`, all three are purged together with the key's rate-limit state.
///
/// Lookups return `None` or an empty list when nothing matches; only
/// backend faults are errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApiKeyStore: Send + Sync + Debug {
    /// Persist a new key. Fails with `Conflict` on a duplicate id or secret.
    async fn save_key(&self, api_key: ApiKey) -> Result<ApiKey, DomainError>;

    async fn get_key_by_id(&self, id: &ApiKeyId) -> Result<Option<ApiKey>, DomainError>;

    /// Look up a key by its secret value
    async fn get_key_by_value(&self, secret: &str) -> Result<Option<ApiKey>, DomainError>;

    async fn get_keys_by_owner(&self, owner_id: &str) -> Result<Vec<ApiKey>, DomainError>;

    /// Apply a partial update and return the stored result, or `None` if the
    /// key does not exist. A changed `secret` or `owner_id` retires the old
    /// index entries.
    async fn update_key(
        &self,
        id: &ApiKeyId,
        update: ApiKeyUpdate,
    ) -> Result<Option<ApiKey>, DomainError>;

    /// Remove a key, its index entries and its rate-limit state
    async fn delete_key(&self, id: &ApiKeyId) -> Result<bool, DomainError>;

    /// Record a request against the key's window if the policy admits it
    async fn check_rate_limit(
        &self,
        id: &ApiKeyId,
        policy: &RateLimitPolicy,
    ) -> Result<bool, DomainError>;
}
