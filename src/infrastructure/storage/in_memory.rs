//! In-memory API key store

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::domain::api_key::{ApiKey, ApiKeyId, ApiKeyStore, ApiKeyUpdate};
use crate::domain::rate_limit::{now_millis, RateLimitPolicy, SlidingWindowLog};
use crate::domain::DomainError;

#[derive(Debug, Default)]
struct Indices {
    keys: HashMap<String, ApiKey>,
    by_secret: HashMap<String, String>,
    by_owner: HashMap<String, HashSet<String>>,
}

impl Indices {
    fn unlink_owner(&mut self, owner_id: &str, id: &str) {
        if let Some(ids) = self.by_owner.get_mut(owner_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_owner.remove(owner_id);
            }
        }
    }
}

/// How often idle rate-limit logs are swept
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct RateState {
    logs: HashMap<String, SlidingWindowLog>,
    last_sweep_ms: i64,
}

impl RateState {
    /// Drop every log whose entries have all left their window
    fn maybe_sweep(&mut self, now_ms: i64, interval: Duration) {
        let interval_ms = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
        if now_ms.saturating_sub(self.last_sweep_ms) < interval_ms {
            return;
        }

        self.logs.retain(|_, log| !log.is_idle_at(now_ms));
        self.last_sweep_ms = now_ms;
    }
}

/// Process-local store with strict consistency
///
/// All three indices live behind one lock, so every mutation is observed
/// atomically. Rate-limit logs sit behind a separate mutex; a check holds it
/// for the whole read-prune-append so concurrent checks cannot both admit
/// past the ceiling. Idle logs are swept every `cleanup_interval`. Data is
/// lost when the process exits.
#[derive(Debug)]
pub struct InMemoryApiKeyStore {
    indices: RwLock<Indices>,
    rate_state: Mutex<RateState>,
    cleanup_interval: Duration,
}

impl Default for InMemoryApiKeyStore {
    fn default() -> Self {
        Self {
            indices: RwLock::default(),
            rate_state: Mutex::default(),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl InMemoryApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Number of keys that currently hold rate-limit state
    pub async fn tracked_rate_limits(&self) -> usize {
        self.rate_state.lock().await.logs.len()
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryApiKeyStore {
    async fn save_key(&self, api_key: ApiKey) -> Result<ApiKey, DomainError> {
        let mut indices = self.indices.write().await;
        let id = api_key.id().as_str().to_string();

        if indices.keys.contains_key(&id) {
            return Err(DomainError::conflict(format!(
                "API key with ID '{}' already exists",
                id
            )));
        }

        if indices.by_secret.contains_key(api_key.secret()) {
            return Err(DomainError::conflict("API key secret already in use"));
        }

        indices
            .by_secret
            .insert(api_key.secret().to_string(), id.clone());
        indices
            .by_owner
            .entry(api_key.owner_id().to_string())
            .or_default()
            .insert(id.clone());
        indices.keys.insert(id, api_key.clone());

        Ok(api_key)
    }

    async fn get_key_by_id(&self, id: &ApiKeyId) -> Result<Option<ApiKey>, DomainError> {
        let indices = self.indices.read().await;
        Ok(indices.keys.get(id.as_str()).cloned())
    }

    async fn get_key_by_value(&self, secret: &str) -> Result<Option<ApiKey>, DomainError> {
        let indices = self.indices.read().await;

        Ok(indices
            .by_secret
            .get(secret)
            .and_then(|id| indices.keys.get(id))
            .cloned())
    }

    async fn get_keys_by_owner(&self, owner_id: &str) -> Result<Vec<ApiKey>, DomainError> {
        let indices = self.indices.read().await;

        let mut keys: Vec<ApiKey> = indices
            .by_owner
            .get(owner_id)
            .map(|ids| ids.iter().filter_map(|id| indices.keys.get(id)).cloned().collect())
            .unwrap_or_default();

        keys.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().as_str().cmp(b.id().as_str()))
        });

        Ok(keys)
    }

    async fn update_key(
        &self,
        id: &ApiKeyId,
        update: ApiKeyUpdate,
    ) -> Result<Option<ApiKey>, DomainError> {
        let mut indices = self.indices.write().await;

        let Some(existing) = indices.keys.get(id.as_str()).cloned() else {
            return Ok(None);
        };

        let mut updated = existing.clone();
        updated.apply(&update);

        if updated.secret() != existing.secret() {
            if indices.by_secret.contains_key(updated.secret()) {
                return Err(DomainError::conflict("API key secret already in use"));
            }
            indices.by_secret.remove(existing.secret());
            indices
                .by_secret
                .insert(updated.secret().to_string(), id.as_str().to_string());
        }

        if updated.owner_id() != existing.owner_id() {
            indices.unlink_owner(existing.owner_id(), id.as_str());
            indices
                .by_owner
                .entry(updated.owner_id().to_string())
                .or_default()
                .insert(id.as_str().to_string());
        }

        indices
            .keys
            .insert(id.as_str().to_string(), updated.clone());

        Ok(Some(updated))
    }

    async fn delete_key(&self, id: &ApiKeyId) -> Result<bool, DomainError> {
        let mut indices = self.indices.write().await;

        let Some(key) = indices.keys.remove(id.as_str()) else {
            return Ok(false);
        };

        indices.by_secret.remove(key.secret());
        indices.unlink_owner(key.owner_id(), id.as_str());

        // Purged while the index lock is still held so no check can observe
        // a deleted key with live rate state
        self.rate_state.lock().await.logs.remove(id.as_str());

        Ok(true)
    }

    async fn check_rate_limit(
        &self,
        id: &ApiKeyId,
        policy: &RateLimitPolicy,
    ) -> Result<bool, DomainError> {
        let now = now_millis();
        let mut rate_state = self.rate_state.lock().await;
        rate_state.maybe_sweep(now, self.cleanup_interval);

        let log = rate_state.logs.entry(id.as_str().to_string()).or_default();

        Ok(log.try_admit(now, policy))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn create_test_key(owner: &str, secret: &str) -> ApiKey {
        ApiKey::new(ApiKeyId::generate(), secret, owner, format!("Key {}", secret))
    }

    #[tokio::test]
    async fn test_save_and_lookup_all_indices() {
        let store = InMemoryApiKeyStore::new();
        let key = create_test_key("m1", "pk_one");

        store.save_key(key.clone()).await.unwrap();

        let by_id = store.get_key_by_id(key.id()).await.unwrap();
        assert_eq!(by_id.as_ref().map(|k| k.id()), Some(key.id()));

        let by_value = store.get_key_by_value("pk_one").await.unwrap();
        assert_eq!(by_value.map(|k| k.id().clone()), Some(key.id().clone()));

        let by_owner = store.get_keys_by_owner("m1").await.unwrap();
        assert_eq!(by_owner.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_lookups_return_empty() {
        let store = InMemoryApiKeyStore::new();

        assert!(store.get_key_by_id(&ApiKeyId::generate()).await.unwrap().is_none());
        assert!(store.get_key_by_value("nope").await.unwrap().is_none());
        assert!(store.get_keys_by_owner("nobody").await.unwrap().is_empty());
        assert!(store
            .update_key(&ApiKeyId::generate(), ApiKeyUpdate::new().with_name("x"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_and_secret_conflict() {
        let store = InMemoryApiKeyStore::new();
        let key = create_test_key("m1", "pk_dup");
        store.save_key(key.clone()).await.unwrap();

        let same_id = ApiKey::new(key.id().clone(), "pk_other", "m1", "Other");
        assert!(matches!(
            store.save_key(same_id).await,
            Err(DomainError::Conflict { .. })
        ));

        let same_secret = create_test_key("m2", "pk_dup");
        assert!(matches!(
            store.save_key(same_secret).await,
            Err(DomainError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_secret_retires_old_mapping() {
        let store = InMemoryApiKeyStore::new();
        let key = create_test_key("m1", "pk_old");
        store.save_key(key.clone()).await.unwrap();

        let updated = store
            .update_key(key.id(), ApiKeyUpdate::new().with_secret("pk_new"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.secret(), "pk_new");
        assert!(store.get_key_by_value("pk_old").await.unwrap().is_none());
        assert!(store.get_key_by_value("pk_new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_secret_conflict_leaves_state_intact() {
        let store = InMemoryApiKeyStore::new();
        let a = create_test_key("m1", "pk_a");
        let b = create_test_key("m1", "pk_b");
        store.save_key(a.clone()).await.unwrap();
        store.save_key(b.clone()).await.unwrap();

        let result = store
            .update_key(a.id(), ApiKeyUpdate::new().with_secret("pk_b"))
            .await;
        assert!(result.is_err());

        let still_b = store.get_key_by_value("pk_b").await.unwrap().unwrap();
        assert_eq!(still_b.id(), b.id());
        assert!(store.get_key_by_value("pk_a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_owner_moves_membership() {
        let store = InMemoryApiKeyStore::new();
        let key = create_test_key("m1", "pk_move");
        store.save_key(key.clone()).await.unwrap();

        store
            .update_key(key.id(), ApiKeyUpdate::new().with_owner_id("m2"))
            .await
            .unwrap();

        assert!(store.get_keys_by_owner("m1").await.unwrap().is_empty());
        let owned = store.get_keys_by_owner("m2").await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].owner_id(), "m2");
    }

    #[tokio::test]
    async fn test_delete_purges_everything() {
        let store = InMemoryApiKeyStore::new();
        let key = create_test_key("m1", "pk_gone");
        store.save_key(key.clone()).await.unwrap();
        store
            .check_rate_limit(key.id(), &RateLimitPolicy::new(60_000, 5))
            .await
            .unwrap();
        assert_eq!(store.tracked_rate_limits().await, 1);

        assert!(store.delete_key(key.id()).await.unwrap());
        assert!(!store.delete_key(key.id()).await.unwrap());

        assert!(store.get_key_by_id(key.id()).await.unwrap().is_none());
        assert!(store.get_key_by_value("pk_gone").await.unwrap().is_none());
        assert!(store.get_keys_by_owner("m1").await.unwrap().is_empty());
        assert_eq!(store.tracked_rate_limits().await, 0);
    }

    #[tokio::test]
    async fn test_owner_listing_order() {
        let store = InMemoryApiKeyStore::new();
        let first = create_test_key("m1", "pk_1");
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = create_test_key("m1", "pk_2");

        store.save_key(second.clone()).await.unwrap();
        store.save_key(first.clone()).await.unwrap();
        store.save_key(create_test_key("m2", "pk_3")).await.unwrap();

        let keys = store.get_keys_by_owner("m1").await.unwrap();
        let ids: Vec<_> = keys.iter().map(|k| k.id().clone()).collect();
        assert_eq!(ids, vec![first.id().clone(), second.id().clone()]);
    }

    #[tokio::test]
    async fn test_rate_window() {
        let store = InMemoryApiKeyStore::new();
        let id = ApiKeyId::generate();
        let policy = RateLimitPolicy::new(1000, 1);

        assert!(store.check_rate_limit(&id, &policy).await.unwrap());
        assert!(!store.check_rate_limit(&id, &policy).await.unwrap());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(store.check_rate_limit(&id, &policy).await.unwrap());
    }

    #[tokio::test]
    async fn test_rate_state_is_per_key() {
        let store = InMemoryApiKeyStore::new();
        let policy = RateLimitPolicy::new(60_000, 1);
        let a = ApiKeyId::generate();
        let b = ApiKeyId::generate();

        assert!(store.check_rate_limit(&a, &policy).await.unwrap());
        assert!(store.check_rate_limit(&b, &policy).await.unwrap());
        assert!(!store.check_rate_limit(&a, &policy).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_checks_never_exceed_ceiling() {
        let store = Arc::new(InMemoryApiKeyStore::new());
        let id = ApiKeyId::generate();
        let policy = RateLimitPolicy::new(60_000, 5);

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move { store.check_rate_limit(&id, &policy).await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn test_idle_logs_are_swept() {
        let store = InMemoryApiKeyStore::new().with_cleanup_interval(Duration::ZERO);
        let policy = RateLimitPolicy::new(1, 1);

        for _ in 0..500 {
            assert!(store
                .check_rate_limit(&ApiKeyId::generate(), &policy)
                .await
                .unwrap());
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .check_rate_limit(&ApiKeyId::generate(), &policy)
            .await
            .unwrap();

        assert_eq!(store.tracked_rate_limits().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_logs() {
        let store = InMemoryApiKeyStore::new().with_cleanup_interval(Duration::ZERO);
        let id = ApiKeyId::generate();
        let policy = RateLimitPolicy::new(60_000, 1);

        assert!(store.check_rate_limit(&id, &policy).await.unwrap());
        store
            .check_rate_limit(&ApiKeyId::generate(), &RateLimitPolicy::new(1, 1))
            .await
            .unwrap();

        assert_eq!(store.tracked_rate_limits().await, 2);
        assert!(!store.check_rate_limit(&id, &policy).await.unwrap());
    }
}
