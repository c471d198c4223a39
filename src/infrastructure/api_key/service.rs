//! API Key lifecycle manager
//!
//! Issues, lists, updates, validates and retires keys on top of an injected
//! [`ApiKeyStore`]. Ownership gates every mutation and owner-scoped read;
//! a mismatch looks exactly like a missing key.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::KeysConfig;
use crate::domain::api_key::{
    validate_name, validate_owner_id, validate_secret, ApiKey, ApiKeyId, ApiKeyStore,
    ApiKeyUpdate, NewApiKey, SanitizedApiKey,
};
use crate::domain::rate_limit::RateLimitPolicy;
use crate::domain::DomainError;

use super::generator::SecretGenerator;

/// A listed key, with or without its secret
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ListedApiKey {
    Full(ApiKey),
    Sanitized(SanitizedApiKey),
}

impl ListedApiKey {
    pub fn id(&self) -> &ApiKeyId {
        match self {
            Self::Full(key) => key.id(),
            Self::Sanitized(key) => &key.id,
        }
    }

    /// The secret, present only on listings that asked for it
    pub fn secret(&self) -> Option<&str> {
        match self {
            Self::Full(key) => Some(key.secret()),
            Self::Sanitized(_) => None,
        }
    }
}

/// Result of authenticating a presented secret
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    /// Unknown, inactive or expired secret
    Unauthenticated,
    /// Valid secret whose rate window is exhausted
    RateLimited { key_id: ApiKeyId },
    Authenticated(SanitizedApiKey),
}

/// API key manager over a pluggable store
#[derive(Debug)]
pub struct ApiKeyManager<S: ApiKeyStore + ?Sized = dyn ApiKeyStore> {
    store: Arc<S>,
    generator: SecretGenerator,
    default_rate_limit: RateLimitPolicy,
}

impl<S: ApiKeyStore + ?Sized> Clone for ApiKeyManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            generator: self.generator.clone(),
            default_rate_limit: self.default_rate_limit,
        }
    }
}

impl<S: ApiKeyStore + ?Sized> ApiKeyManager<S> {
    /// Create a manager with no secret prefix, 12-byte secrets and the
    /// default rate limit
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            generator: SecretGenerator::default(),
            default_rate_limit: RateLimitPolicy::default(),
        }
    }

    /// Create a manager from key settings
    pub fn from_settings(store: Arc<S>, settings: &KeysConfig) -> Result<Self, DomainError> {
        Self::new(store)
            .with_prefix(&settings.prefix)
            .with_key_bytes(settings.key_bytes)?
            .with_default_rate_limit(settings.default_rate_limit)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.generator = self.generator.with_prefix(prefix);
        self
    }

    pub fn with_key_bytes(mut self, key_bytes: usize) -> Result<Self, DomainError> {
        self.generator = self.generator.with_key_bytes(key_bytes)?;
        Ok(self)
    }

    pub fn with_default_rate_limit(mut self, policy: RateLimitPolicy) -> Result<Self, DomainError> {
        policy.validate()?;
        self.default_rate_limit = policy;
        Ok(self)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn default_rate_limit(&self) -> &RateLimitPolicy {
        &self.default_rate_limit
    }

    /// Issue a new key. The returned record is the only one that carries the
    /// secret.
    pub async fn create_key(&self, new_key: NewApiKey) -> Result<ApiKey, DomainError> {
        validate_owner_id(&new_key.owner_id)?;
        validate_name(&new_key.name)?;
        if let Some(policy) = &new_key.rate_limit {
            policy.validate()?;
        }

        let mut api_key = ApiKey::new(
            ApiKeyId::generate(),
            self.generator.generate(),
            new_key.owner_id,
            new_key.name,
        );
        api_key.permissions = new_key.permissions.unwrap_or_default();
        api_key.rate_limit = new_key.rate_limit;
        api_key.expires_at = new_key.expires_at;
        api_key.metadata = new_key.metadata.unwrap_or_default();

        let created = self.store.save_key(api_key).await?;

        info!(
            key_id = %created.id(),
            owner_id = %created.owner_id(),
            "API key created"
        );

        Ok(created)
    }

    /// List an owner's keys without secrets
    pub async fn list_keys(&self, owner_id: &str) -> Result<Vec<SanitizedApiKey>, DomainError> {
        validate_owner_id(owner_id)?;

        let keys = self.store.get_keys_by_owner(owner_id).await?;
        Ok(keys.into_iter().map(SanitizedApiKey::from).collect())
    }

    /// List an owner's keys, including secrets when `include_secret` is set
    pub async fn list_keys_with_secrets(
        &self,
        owner_id: &str,
        include_secret: bool,
    ) -> Result<Vec<ListedApiKey>, DomainError> {
        validate_owner_id(owner_id)?;

        let keys = self.store.get_keys_by_owner(owner_id).await?;
        let listed = keys
            .into_iter()
            .map(|key| {
                if include_secret {
                    ListedApiKey::Full(key)
                } else {
                    ListedApiKey::Sanitized(key.into())
                }
            })
            .collect();

        Ok(listed)
    }

    /// Fetch a key, scoped to `owner_id` when given
    pub async fn get_key_by_id(
        &self,
        id: &str,
        owner_id: Option<&str>,
    ) -> Result<Option<SanitizedApiKey>, DomainError> {
        let id = ApiKeyId::new(id)?;

        Ok(self
            .store
            .get_key_by_id(&id)
            .await?
            .filter(|key| owner_id.is_none_or(|owner| key.is_owned_by(owner)))
            .map(SanitizedApiKey::from))
    }

    /// Apply an owner's update. Only name, active flag, permissions, expiry,
    /// metadata and rate limit are applied.
    pub async fn update_key(
        &self,
        id: &str,
        owner_id: &str,
        update: ApiKeyUpdate,
    ) -> Result<Option<SanitizedApiKey>, DomainError> {
        let id = ApiKeyId::new(id)?;
        validate_owner_id(owner_id)?;

        let update = update.mutable_fields();
        if let Some(name) = &update.name {
            validate_name(name)?;
        }
        if let Some(Some(policy)) = &update.rate_limit {
            policy.validate()?;
        }

        if self.owned_key(&id, owner_id).await?.is_none() {
            return Ok(None);
        }

        let updated = self.store.update_key(&id, update).await?;

        if updated.is_some() {
            info!(key_id = %id, owner_id = %owner_id, "API key updated");
        }

        Ok(updated.map(SanitizedApiKey::from))
    }

    /// Delete an owner's key. `false` when absent or owned by someone else.
    pub async fn delete_key(&self, id: &str, owner_id: &str) -> Result<bool, DomainError> {
        let id = ApiKeyId::new(id)?;
        validate_owner_id(owner_id)?;

        if self.owned_key(&id, owner_id).await?.is_none() {
            return Ok(false);
        }

        let deleted = self.store.delete_key(&id).await?;

        if deleted {
            info!(key_id = %id, owner_id = %owner_id, "API key deleted");
        }

        Ok(deleted)
    }

    /// Resolve a presented secret to a usable key and stamp its last use
    ///
    /// Returns `None` for unknown, inactive or expired keys. A failed stamp is
    /// logged and the pre-stamp record is returned.
    pub async fn validate_key(&self, secret: &str) -> Result<Option<SanitizedApiKey>, DomainError> {
        validate_secret(secret)?;

        let Some(api_key) = self.store.get_key_by_value(secret).await? else {
            debug!("API key not found");
            return Ok(None);
        };

        let now = Utc::now();
        if !api_key.is_usable_at(now) {
            debug!(
                key_id = %api_key.id(),
                status = ?api_key.status_at(now),
                "API key is not usable"
            );
            return Ok(None);
        }

        match self
            .store
            .update_key(api_key.id(), ApiKeyUpdate::touch(now))
            .await
        {
            Ok(Some(stamped)) => Ok(Some(stamped.sanitize())),
            Ok(None) => {
                debug!(key_id = %api_key.id(), "API key removed while stamping last use");
                Ok(Some(api_key.sanitize()))
            }
            Err(e) => {
                warn!(key_id = %api_key.id(), "Failed to record API key usage: {}", e);
                Ok(Some(api_key.sanitize()))
            }
        }
    }

    /// Record a request against the key's window, using `policy` or the
    /// manager default
    pub async fn check_rate_limit(
        &self,
        id: &str,
        policy: Option<&RateLimitPolicy>,
    ) -> Result<bool, DomainError> {
        let id = ApiKeyId::new(id)?;
        let policy = policy.unwrap_or(&self.default_rate_limit);
        policy.validate()?;

        let admitted = self.store.check_rate_limit(&id, policy).await?;

        if !admitted {
            debug!(key_id = %id, "Rate limit exceeded");
        }

        Ok(admitted)
    }

    /// Validate a presented secret and charge its rate window
    ///
    /// The key's own rate limit takes precedence over the manager default.
    pub async fn authenticate(&self, secret: &str) -> Result<AuthOutcome, DomainError> {
        if secret.trim().is_empty() {
            return Ok(AuthOutcome::Unauthenticated);
        }

        let Some(api_key) = self.validate_key(secret).await? else {
            return Ok(AuthOutcome::Unauthenticated);
        };

        let policy = api_key.rate_limit.unwrap_or(self.default_rate_limit);

        if !self.store.check_rate_limit(&api_key.id, &policy).await? {
            debug!(key_id = %api_key.id, "Rate limit exceeded");
            return Ok(AuthOutcome::RateLimited {
                key_id: api_key.id,
            });
        }

        Ok(AuthOutcome::Authenticated(api_key))
    }

    async fn owned_key(&self, id: &ApiKeyId, owner_id: &str) -> Result<Option<ApiKey>, DomainError> {
        let key = self.store.get_key_by_id(id).await?;

        match key {
            Some(key) if key.is_owned_by(owner_id) => Ok(Some(key)),
            Some(_) => {
                debug!(key_id = %id, "API key owner mismatch");
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    use super::*;
    use crate::domain::api_key::{Attributes, MockApiKeyStore};
    use crate::domain::rate_limit::MAX_WINDOW_MS;
    use crate::infrastructure::storage::InMemoryApiKeyStore;

    fn create_manager() -> ApiKeyManager<InMemoryApiKeyStore> {
        ApiKeyManager::new(Arc::new(InMemoryApiKeyStore::new()))
    }

    fn attributes(value: serde_json::Value) -> Attributes {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_create_key() {
        let manager = create_manager().with_prefix("pk_test_");

        let key = manager
            .create_key(
                NewApiKey::new("m1", "Primary")
                    .with_permissions(attributes(json!({"read": true})))
                    .with_metadata(attributes(json!({"env": "dev"}))),
            )
            .await
            .unwrap();

        assert!(key.secret().starts_with("pk_test_"));
        assert_eq!(key.secret().len(), "pk_test_".len() + 24);
        assert_eq!(key.owner_id(), "m1");
        assert_eq!(key.name(), "Primary");
        assert!(key.is_active());
        assert!(key.last_used_at().is_none());
        assert_eq!(key.permissions()["read"], json!(true));
        assert_eq!(key.metadata()["env"], json!("dev"));
        assert!(uuid::Uuid::parse_str(key.id().as_str()).is_ok());
    }

    #[tokio::test]
    async fn test_create_key_requires_owner_and_name() {
        let manager = create_manager();

        let err = manager.create_key(NewApiKey::new("", "Key")).await.unwrap_err();
        assert!(err.is_validation());

        let err = manager.create_key(NewApiKey::new("m1", "  ")).await.unwrap_err();
        assert!(err.is_validation());

        assert!(manager.list_keys("m1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ids_and_secrets_unique() {
        let manager = create_manager();
        let mut ids = HashSet::new();
        let mut secrets = HashSet::new();

        for i in 0..50 {
            let key = manager
                .create_key(NewApiKey::new("m1", format!("Key {}", i)))
                .await
                .unwrap();
            ids.insert(key.id().clone());
            secrets.insert(key.secret().to_string());
        }

        assert_eq!(ids.len(), 50);
        assert_eq!(secrets.len(), 50);
    }

    #[tokio::test]
    async fn test_list_keys() {
        let manager = create_manager();
        let first = manager.create_key(NewApiKey::new("m1", "First")).await.unwrap();
        manager.create_key(NewApiKey::new("m1", "Second")).await.unwrap();
        manager.create_key(NewApiKey::new("m2", "Other")).await.unwrap();

        let listed = manager.list_keys("m1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|k| k.owner_id == "m1"));

        let with_secrets = manager.list_keys_with_secrets("m1", true).await.unwrap();
        let listed_first = with_secrets.iter().find(|k| k.id() == first.id()).unwrap();
        assert_eq!(listed_first.secret(), Some(first.secret()));

        let without = manager.list_keys_with_secrets("m1", false).await.unwrap();
        assert!(without.iter().all(|k| k.secret().is_none()));

        assert!(manager.list_keys("").await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_sanitized_output_has_no_secret() {
        let manager = create_manager();
        let key = manager.create_key(NewApiKey::new("m1", "Key")).await.unwrap();

        let fetched = manager
            .get_key_by_id(key.id().as_str(), None)
            .await
            .unwrap()
            .unwrap();
        let listed = manager.list_keys("m1").await.unwrap();
        let validated = manager.validate_key(key.secret()).await.unwrap().unwrap();

        for value in [
            serde_json::to_value(&fetched).unwrap(),
            serde_json::to_value(&listed[0]).unwrap(),
            serde_json::to_value(&validated).unwrap(),
        ] {
            assert!(value.get("secret").is_none());
            assert!(!value.to_string().contains(key.secret()));
        }
    }

    #[tokio::test]
    async fn test_get_key_by_id_ownership() {
        let manager = create_manager();
        let key = manager.create_key(NewApiKey::new("m1", "Key")).await.unwrap();
        let id = key.id().as_str();

        assert!(manager.get_key_by_id(id, Some("m1")).await.unwrap().is_some());
        assert!(manager.get_key_by_id(id, Some("m2")).await.unwrap().is_none());
        assert!(manager.get_key_by_id(id, None).await.unwrap().is_some());
        assert!(manager.get_key_by_id("missing", None).await.unwrap().is_none());
        assert!(manager.get_key_by_id("", None).await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_update_key_ownership() {
        let manager = create_manager();
        let key = manager.create_key(NewApiKey::new("m1", "Key")).await.unwrap();
        let id = key.id().as_str();

        let denied = manager
            .update_key(id, "m2", ApiKeyUpdate::new().with_name("Stolen"))
            .await
            .unwrap();
        assert!(denied.is_none());

        let missing = manager
            .update_key("missing", "m1", ApiKeyUpdate::new().with_name("X"))
            .await
            .unwrap();
        assert!(missing.is_none());

        let stored = manager.get_key_by_id(id, None).await.unwrap().unwrap();
        assert_eq!(stored.name, "Key");
    }

    #[tokio::test]
    async fn test_update_key_immutable_fields() {
        let manager = create_manager();
        let key = manager.create_key(NewApiKey::new("m1", "Key")).await.unwrap();

        let mut update = ApiKeyUpdate::new()
            .with_name("Renamed")
            .with_active(false)
            .with_rate_limit(Some(RateLimitPolicy::new(1000, 5)))
            .with_secret("pk_hijacked")
            .with_owner_id("m2");
        update.id = Some("other-id".to_string());
        update.created_at = Some(Utc::now() + ChronoDuration::days(1));

        let updated = manager
            .update_key(key.id().as_str(), "m1", update)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.name, "Renamed");
        assert!(!updated.is_active);
        assert_eq!(updated.rate_limit, Some(RateLimitPolicy::new(1000, 5)));
        assert_eq!(&updated.id, key.id());
        assert_eq!(updated.owner_id, "m1");
        assert_eq!(updated.created_at, key.created_at());

        let stored = manager.store().get_key_by_id(key.id()).await.unwrap().unwrap();
        assert_eq!(stored.secret(), key.secret());
        assert!(manager.store().get_key_by_value("pk_hijacked").await.unwrap().is_none());
        assert!(manager.list_keys("m2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_key_rejects_empty_name() {
        let manager = create_manager();
        let key = manager.create_key(NewApiKey::new("m1", "Key")).await.unwrap();

        let err = manager
            .update_key(key.id().as_str(), "m1", ApiKeyUpdate::new().with_name(""))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_delete_key_idempotent() {
        let manager = create_manager();
        let key = manager.create_key(NewApiKey::new("m1", "Key")).await.unwrap();
        let id = key.id().as_str();

        assert!(!manager.delete_key(id, "m2").await.unwrap());
        assert!(manager.delete_key(id, "m1").await.unwrap());
        assert!(!manager.delete_key(id, "m1").await.unwrap());
        assert!(manager.validate_key(key.secret()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validate_key_stamps_last_used() {
        let manager = create_manager();
        let key = manager.create_key(NewApiKey::new("m1", "Key")).await.unwrap();

        let validated = manager.validate_key(key.secret()).await.unwrap().unwrap();
        assert_eq!(&validated.id, key.id());
        assert!(validated.last_used_at.is_some());

        let stored = manager.store().get_key_by_id(key.id()).await.unwrap().unwrap();
        assert!(stored.last_used_at().is_some());
    }

    #[tokio::test]
    async fn test_validate_key_gating() {
        let manager = create_manager();

        let inactive = manager.create_key(NewApiKey::new("m1", "Off")).await.unwrap();
        manager
            .update_key(inactive.id().as_str(), "m1", ApiKeyUpdate::new().with_active(false))
            .await
            .unwrap();

        let expired = manager
            .create_key(
                NewApiKey::new("m1", "Old").with_expiration(Utc::now() - ChronoDuration::seconds(1)),
            )
            .await
            .unwrap();
        manager
            .update_key(expired.id().as_str(), "m1", ApiKeyUpdate::new().with_active(true))
            .await
            .unwrap();

        let future = manager
            .create_key(
                NewApiKey::new("m1", "Future").with_expiration(Utc::now() + ChronoDuration::hours(1)),
            )
            .await
            .unwrap();

        assert!(manager.validate_key(inactive.secret()).await.unwrap().is_none());
        assert!(manager.validate_key(expired.secret()).await.unwrap().is_none());
        assert!(manager.validate_key(future.secret()).await.unwrap().is_some());
        assert!(manager.validate_key("unknown").await.unwrap().is_none());
        assert!(manager.validate_key("").await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_validate_key_tolerates_stamp_failure() {
        let key = ApiKey::new(ApiKeyId::generate(), "pk_secret", "m1", "Key");
        let stored = key.clone();

        let mut store = MockApiKeyStore::new();
        store
            .expect_get_key_by_value()
            .returning(move |_| Ok(Some(stored.clone())));
        store
            .expect_update_key()
            .times(1)
            .returning(|_, _| Err(DomainError::storage("connection reset")));

        let manager = ApiKeyManager::new(Arc::new(store));
        let validated = manager.validate_key("pk_secret").await.unwrap().unwrap();

        assert_eq!(validated, key.sanitize());
    }

    #[tokio::test]
    async fn test_storage_errors_propagate() {
        let mut store = MockApiKeyStore::new();
        store
            .expect_get_key_by_value()
            .returning(|_| Err(DomainError::cache("timeout")));
        store
            .expect_save_key()
            .returning(|_| Err(DomainError::storage("disk full")));

        let manager = ApiKeyManager::new(Arc::new(store));

        let err = manager.validate_key("pk_secret").await.unwrap_err();
        assert!(matches!(err, DomainError::Cache { .. }));

        let err = manager.create_key(NewApiKey::new("m1", "Key")).await.unwrap_err();
        assert!(matches!(err, DomainError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_check_rate_limit_window() {
        let manager = create_manager();
        let key = manager.create_key(NewApiKey::new("m1", "Key")).await.unwrap();
        let id = key.id().as_str();
        let policy = RateLimitPolicy::new(1000, 1);

        assert!(manager.check_rate_limit(id, Some(&policy)).await.unwrap());
        assert!(!manager.check_rate_limit(id, Some(&policy)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(manager.check_rate_limit(id, Some(&policy)).await.unwrap());
    }

    #[tokio::test]
    async fn test_check_rate_limit_default_policy() {
        let manager = create_manager()
            .with_default_rate_limit(RateLimitPolicy::new(60_000, 2))
            .unwrap();
        let key = manager.create_key(NewApiKey::new("m1", "Key")).await.unwrap();
        let id = key.id().as_str();

        assert!(manager.check_rate_limit(id, None).await.unwrap());
        assert!(manager.check_rate_limit(id, None).await.unwrap());
        assert!(!manager.check_rate_limit(id, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_oversized_window_is_rejected() {
        let manager = create_manager();
        let key = manager.create_key(NewApiKey::new("m1", "Key")).await.unwrap();
        let id = key.id().as_str();

        let huge = RateLimitPolicy::new(u64::MAX, 1);
        let err = manager.check_rate_limit(id, Some(&huge)).await.unwrap_err();
        assert!(err.is_validation());

        let err = manager
            .create_key(NewApiKey::new("m1", "Key").with_rate_limit(huge))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        assert!(create_manager().with_default_rate_limit(huge).is_err());

        let widest = RateLimitPolicy::new(MAX_WINDOW_MS, 1);
        assert!(manager.check_rate_limit(id, Some(&widest)).await.unwrap());
        assert!(!manager.check_rate_limit(id, Some(&widest)).await.unwrap());
    }

    #[tokio::test]
    async fn test_authenticate() {
        let manager = create_manager()
            .with_default_rate_limit(RateLimitPolicy::new(60_000, 100))
            .unwrap();
        let key = manager
            .create_key(NewApiKey::new("m1", "Key").with_rate_limit(RateLimitPolicy::new(60_000, 1)))
            .await
            .unwrap();

        match manager.authenticate(key.secret()).await.unwrap() {
            AuthOutcome::Authenticated(authenticated) => assert_eq!(&authenticated.id, key.id()),
            other => panic!("unexpected outcome: {:?}", other),
        }

        assert_eq!(
            manager.authenticate(key.secret()).await.unwrap(),
            AuthOutcome::RateLimited {
                key_id: key.id().clone()
            }
        );
        assert_eq!(
            manager.authenticate("nope").await.unwrap(),
            AuthOutcome::Unauthenticated
        );
        assert_eq!(
            manager.authenticate("").await.unwrap(),
            AuthOutcome::Unauthenticated
        );
    }

    #[tokio::test]
    async fn test_from_settings() {
        let settings = KeysConfig {
            prefix: "pk_live_".to_string(),
            key_bytes: 16,
            default_rate_limit: RateLimitPolicy::new(1000, 3),
        };

        let manager =
            ApiKeyManager::from_settings(Arc::new(InMemoryApiKeyStore::new()), &settings).unwrap();
        let key = manager.create_key(NewApiKey::new("m1", "Key")).await.unwrap();

        assert!(key.secret().starts_with("pk_live_"));
        assert_eq!(key.secret().len(), "pk_live_".len() + 32);
        assert_eq!(manager.default_rate_limit(), &RateLimitPolicy::new(1000, 3));

        let invalid = KeysConfig {
            key_bytes: 1,
            ..settings
        };
        assert!(
            ApiKeyManager::from_settings(Arc::new(InMemoryApiKeyStore::new()), &invalid)
                .unwrap_err()
                .is_validation()
        );
    }

    #[tokio::test]
    async fn test_dyn_store() {
        let store: Arc<dyn ApiKeyStore> = Arc::new(InMemoryApiKeyStore::new());
        let manager: ApiKeyManager = ApiKeyManager::new(store);

        let key = manager.create_key(NewApiKey::new("m1", "Key")).await.unwrap();
        assert!(manager.validate_key(key.secret()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lifecycle_scenario() {
        let manager = create_manager();

        let key = manager.create_key(NewApiKey::new("m1", "Key")).await.unwrap();

        let listed = manager.list_keys("m1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(&listed[0].id, key.id());

        let validated = manager.validate_key(key.secret()).await.unwrap().unwrap();
        assert_eq!(&validated.id, key.id());

        assert!(manager.delete_key(key.id().as_str(), "m1").await.unwrap());
        assert!(manager
            .get_key_by_id(key.id().as_str(), None)
            .await
            .unwrap()
            .is_none());
    }
}
