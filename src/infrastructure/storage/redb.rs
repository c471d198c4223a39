//! redb-backed API key store

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
};

use crate::domain::api_key::{ApiKey, ApiKeyId, ApiKeyStore, ApiKeyUpdate};
use crate::domain::rate_limit::{now_millis, RateLimitPolicy, SlidingWindowLog};
use crate::domain::DomainError;

use super::in_memory::DEFAULT_CLEANUP_INTERVAL;

/// Key: api key id, Value: JSON-encoded `ApiKey`
const KEYS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("api_keys");
/// Key: secret, Value: api key id
const SECRETS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("api_key_secrets");
/// Key: owner id, Values: api key ids
const OWNERS_TABLE: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("api_key_owners");
/// Key: api key id, Value: JSON-encoded `SlidingWindowLog`
const RATE_LIMITS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("api_key_rate_limits");

fn storage_error<E: std::fmt::Display>(action: &'static str) -> impl FnOnce(E) -> DomainError {
    move |e| DomainError::storage(format!("Failed to {}: {}", action, e))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, DomainError> {
    serde_json::to_vec(value).map_err(storage_error("serialize record"))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, DomainError> {
    serde_json::from_slice(bytes).map_err(storage_error("deserialize record"))
}

/// Durable single-host store backed by an embedded redb database
///
/// Each operation runs in one redb transaction, so the record, its secret
/// and owner index entries, and rate-limit state change together. redb
/// admits a single writer at a time, which serializes concurrent rate checks.
/// The file is locked by one process; it is not shared across hosts.
/// Idle rate-limit logs are swept inside a rate check at most once per
/// `cleanup_interval`.
#[derive(Clone)]
pub struct RedbApiKeyStore {
    db: Arc<Database>,
    path: PathBuf,
    cleanup_interval: Duration,
    last_sweep_ms: Arc<AtomicI64>,
}

impl fmt::Debug for RedbApiKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbApiKeyStore")
            .field("path", &self.path)
            .field("db", &"<Database>")
            .field("cleanup_interval", &self.cleanup_interval)
            .finish()
    }
}

impl RedbApiKeyStore {
    /// Create or open a store at `path`, creating parent directories and
    /// tables as needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DomainError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(storage_error("create data directory"))?;
        }

        let db = Database::create(&path).map_err(storage_error("open redb database"))?;

        let write_txn = db
            .begin_write()
            .map_err(storage_error("begin write transaction"))?;
        {
            write_txn
                .open_table(KEYS_TABLE)
                .map_err(storage_error("open keys table"))?;
            write_txn
                .open_table(SECRETS_TABLE)
                .map_err(storage_error("open secrets table"))?;
            write_txn
                .open_multimap_table(OWNERS_TABLE)
                .map_err(storage_error("open owners table"))?;
            write_txn
                .open_table(RATE_LIMITS_TABLE)
                .map_err(storage_error("open rate limits table"))?;
        }
        write_txn.commit().map_err(storage_error("commit transaction"))?;

        Ok(Self {
            db: Arc::new(db),
            path,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            last_sweep_ms: Arc::new(AtomicI64::new(0)),
        })
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of keys that currently hold rate-limit state
    pub async fn tracked_rate_limits(&self) -> Result<usize, DomainError> {
        self.run_blocking(|db| {
            let read_txn = db
                .begin_read()
                .map_err(storage_error("begin read transaction"))?;
            let rate_limits = read_txn
                .open_table(RATE_LIMITS_TABLE)
                .map_err(storage_error("open rate limits table"))?;

            Ok(rate_limits
                .iter()
                .map_err(storage_error("scan rate limit state"))?
                .count())
        })
        .await
    }

    /// Claim the next sweep if `cleanup_interval` has elapsed since the last
    fn claim_sweep(&self, now_ms: i64) -> bool {
        let interval_ms = i64::try_from(self.cleanup_interval.as_millis()).unwrap_or(i64::MAX);
        let last = self.last_sweep_ms.load(Ordering::Acquire);

        now_ms.saturating_sub(last) >= interval_ms
            && self
                .last_sweep_ms
                .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T, DomainError>
    where
        F: FnOnce(&Database) -> Result<T, DomainError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| DomainError::internal(format!("redb task failed: {}", e)))?
    }
}

fn read_by_id(db: &Database, id: &str) -> Result<Option<ApiKey>, DomainError> {
    let read_txn = db
        .begin_read()
        .map_err(storage_error("begin read transaction"))?;
    let keys = read_txn
        .open_table(KEYS_TABLE)
        .map_err(storage_error("open keys table"))?;

    match keys.get(id).map_err(storage_error("read key"))? {
        Some(bytes) => Ok(Some(decode(bytes.value())?)),
        None => Ok(None),
    }
}

#[async_trait]
impl ApiKeyStore for RedbApiKeyStore {
    async fn save_key(&self, api_key: ApiKey) -> Result<ApiKey, DomainError> {
        self.run_blocking(move |db| {
            let id = api_key.id().as_str();
            let bytes = encode(&api_key)?;

            let write_txn = db
                .begin_write()
                .map_err(storage_error("begin write transaction"))?;
            {
                let mut keys = write_txn
                    .open_table(KEYS_TABLE)
                    .map_err(storage_error("open keys table"))?;
                let mut secrets = write_txn
                    .open_table(SECRETS_TABLE)
                    .map_err(storage_error("open secrets table"))?;
                let mut owners = write_txn
                    .open_multimap_table(OWNERS_TABLE)
                    .map_err(storage_error("open owners table"))?;

                if keys.get(id).map_err(storage_error("read key"))?.is_some() {
                    return Err(DomainError::conflict(format!(
                        "API key with ID '{}' already exists",
                        id
                    )));
                }

                if secrets
                    .get(api_key.secret())
                    .map_err(storage_error("read secret index"))?
                    .is_some()
                {
                    return Err(DomainError::conflict("API key secret already in use"));
                }

                keys.insert(id, bytes.as_slice())
                    .map_err(storage_error("insert key"))?;
                secrets
                    .insert(api_key.secret(), id)
                    .map_err(storage_error("insert secret index"))?;
                owners
                    .insert(api_key.owner_id(), id)
                    .map_err(storage_error("insert owner index"))?;
            }
            write_txn.commit().map_err(storage_error("commit transaction"))?;

            Ok(api_key)
        })
        .await
    }

    async fn get_key_by_id(&self, id: &ApiKeyId) -> Result<Option<ApiKey>, DomainError> {
        let id = id.as_str().to_string();
        self.run_blocking(move |db| read_by_id(db, &id)).await
    }

    async fn get_key_by_value(&self, secret: &str) -> Result<Option<ApiKey>, DomainError> {
        let secret = secret.to_string();

        self.run_blocking(move |db| {
            let read_txn = db
                .begin_read()
                .map_err(storage_error("begin read transaction"))?;
            let secrets = read_txn
                .open_table(SECRETS_TABLE)
                .map_err(storage_error("open secrets table"))?;
            let keys = read_txn
                .open_table(KEYS_TABLE)
                .map_err(storage_error("open keys table"))?;

            let id = match secrets
                .get(secret.as_str())
                .map_err(storage_error("read secret index"))?
            {
                Some(id) => id.value().to_string(),
                None => return Ok(None),
            };

            match keys.get(id.as_str()).map_err(storage_error("read key"))? {
                Some(bytes) => Ok(Some(decode(bytes.value())?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn get_keys_by_owner(&self, owner_id: &str) -> Result<Vec<ApiKey>, DomainError> {
        let owner_id = owner_id.to_string();

        self.run_blocking(move |db| {
            let read_txn = db
                .begin_read()
                .map_err(storage_error("begin read transaction"))?;
            let owners = read_txn
                .open_multimap_table(OWNERS_TABLE)
                .map_err(storage_error("open owners table"))?;
            let keys = read_txn
                .open_table(KEYS_TABLE)
                .map_err(storage_error("open keys table"))?;

            let mut result = Vec::new();
            let ids = owners
                .get(owner_id.as_str())
                .map_err(storage_error("read owner index"))?;

            for item in ids {
                let id = item.map_err(storage_error("iterate owner index"))?;
                if let Some(bytes) = keys.get(id.value()).map_err(storage_error("read key"))? {
                    result.push(decode::<ApiKey>(bytes.value())?);
                }
            }

            result.sort_by(|a, b| {
                a.created_at()
                    .cmp(&b.created_at())
                    .then_with(|| a.id().as_str().cmp(b.id().as_str()))
            });

            Ok(result)
        })
        .await
    }

    async fn update_key(
        &self,
        id: &ApiKeyId,
        update: ApiKeyUpdate,
    ) -> Result<Option<ApiKey>, DomainError> {
        let id = id.as_str().to_string();

        self.run_blocking(move |db| {
            let write_txn = db
                .begin_write()
                .map_err(storage_error("begin write transaction"))?;
            let updated = {
                let mut keys = write_txn
                    .open_table(KEYS_TABLE)
                    .map_err(storage_error("open keys table"))?;
                let mut secrets = write_txn
                    .open_table(SECRETS_TABLE)
                    .map_err(storage_error("open secrets table"))?;
                let mut owners = write_txn
                    .open_multimap_table(OWNERS_TABLE)
                    .map_err(storage_error("open owners table"))?;

                let existing: ApiKey = match keys
                    .get(id.as_str())
                    .map_err(storage_error("read key"))?
                {
                    Some(bytes) => decode(bytes.value())?,
                    None => return Ok(None),
                };

                let mut updated = existing.clone();
                updated.apply(&update);

                if updated.secret() != existing.secret() {
                    if secrets
                        .get(updated.secret())
                        .map_err(storage_error("read secret index"))?
                        .is_some()
                    {
                        return Err(DomainError::conflict("API key secret already in use"));
                    }
                    secrets
                        .remove(existing.secret())
                        .map_err(storage_error("remove secret index"))?;
                    secrets
                        .insert(updated.secret(), id.as_str())
                        .map_err(storage_error("insert secret index"))?;
                }

                if updated.owner_id() != existing.owner_id() {
                    owners
                        .remove(existing.owner_id(), id.as_str())
                        .map_err(storage_error("remove owner index"))?;
                    owners
                        .insert(updated.owner_id(), id.as_str())
                        .map_err(storage_error("insert owner index"))?;
                }

                let bytes = encode(&updated)?;
                keys.insert(id.as_str(), bytes.as_slice())
                    .map_err(storage_error("update key"))?;

                updated
            };
            write_txn.commit().map_err(storage_error("commit transaction"))?;

            Ok(Some(updated))
        })
        .await
    }

    async fn delete_key(&self, id: &ApiKeyId) -> Result<bool, DomainError> {
        let id = id.as_str().to_string();

        self.run_blocking(move |db| {
            let write_txn = db
                .begin_write()
                .map_err(storage_error("begin write transaction"))?;
            {
                let mut keys = write_txn
                    .open_table(KEYS_TABLE)
                    .map_err(storage_error("open keys table"))?;
                let mut secrets = write_txn
                    .open_table(SECRETS_TABLE)
                    .map_err(storage_error("open secrets table"))?;
                let mut owners = write_txn
                    .open_multimap_table(OWNERS_TABLE)
                    .map_err(storage_error("open owners table"))?;
                let mut rate_limits = write_txn
                    .open_table(RATE_LIMITS_TABLE)
                    .map_err(storage_error("open rate limits table"))?;

                let removed: ApiKey = match keys
                    .remove(id.as_str())
                    .map_err(storage_error("remove key"))?
                {
                    Some(bytes) => decode(bytes.value())?,
                    None => return Ok(false),
                };

                secrets
                    .remove(removed.secret())
                    .map_err(storage_error("remove secret index"))?;
                owners
                    .remove(removed.owner_id(), id.as_str())
                    .map_err(storage_error("remove owner index"))?;
                rate_limits
                    .remove(id.as_str())
                    .map_err(storage_error("remove rate limit state"))?;
            }
            write_txn.commit().map_err(storage_error("commit transaction"))?;

            Ok(true)
        })
        .await
    }

    async fn check_rate_limit(
        &self,
        id: &ApiKeyId,
        policy: &RateLimitPolicy,
    ) -> Result<bool, DomainError> {
        let id = id.as_str().to_string();
        let policy = *policy;
        let now = now_millis();
        let sweep = self.claim_sweep(now);

        self.run_blocking(move |db| {
            let write_txn = db
                .begin_write()
                .map_err(storage_error("begin write transaction"))?;
            let admitted = {
                let mut rate_limits = write_txn
                    .open_table(RATE_LIMITS_TABLE)
                    .map_err(storage_error("open rate limits table"))?;

                if sweep {
                    let mut idle = Vec::new();
                    for entry in rate_limits
                        .iter()
                        .map_err(storage_error("scan rate limit state"))?
                    {
                        let (key, value) = entry.map_err(storage_error("read rate limit state"))?;
                        let log: SlidingWindowLog = decode(value.value())?;
                        if log.is_idle_at(now) {
                            idle.push(key.value().to_string());
                        }
                    }

                    for key in &idle {
                        rate_limits
                            .remove(key.as_str())
                            .map_err(storage_error("remove rate limit state"))?;
                    }
                }

                let mut log: SlidingWindowLog = match rate_limits
                    .get(id.as_str())
                    .map_err(storage_error("read rate limit state"))?
                {
                    Some(bytes) => decode(bytes.value())?,
                    None => SlidingWindowLog::new(),
                };

                let admitted = log.try_admit(now, &policy);
                let bytes = encode(&log)?;
                rate_limits
                    .insert(id.as_str(), bytes.as_slice())
                    .map_err(storage_error("write rate limit state"))?;

                admitted
            };
            write_txn.commit().map_err(storage_error("commit transaction"))?;

            Ok(admitted)
        })
        .await
    }
}
