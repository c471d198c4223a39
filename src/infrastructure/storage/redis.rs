//! Redis-backed API key store

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::{debug, warn};

use crate::domain::api_key::{ApiKey, ApiKeyId, ApiKeyStore, ApiKeyUpdate};
use crate::domain::rate_limit::{now_millis, FixedWindow, RateLimitPolicy, RateLimitStrategy};
use crate::domain::DomainError;

/// Attempts at an optimistic update before giving up with `Conflict`
const MAX_UPDATE_ATTEMPTS: usize = 3;

// KEYS: record, secret, owner set. ARGV: record json, id
const SAVE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then return -1 end
if redis.call('EXISTS', KEYS[2]) == 1 then return -2 end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('SET', KEYS[2], ARGV[2])
redis.call('SADD', KEYS[3], ARGV[2])
return 1
"#;

// KEYS: record, old secret, new secret, old owner set, new owner set.
// ARGV: expected record json, new record json, id
const UPDATE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then return 0 end
if current ~= ARGV[1] then return -3 end
if KEYS[2] ~= KEYS[3] then
  if redis.call('EXISTS', KEYS[3]) == 1 then return -2 end
  redis.call('DEL', KEYS[2])
  redis.call('SET', KEYS[3], ARGV[3])
end
if KEYS[4] ~= KEYS[5] then
  redis.call('SREM', KEYS[4], ARGV[3])
  redis.call('SADD', KEYS[5], ARGV[3])
end
redis.call('SET', KEYS[1], ARGV[2])
return 1
"#;

// KEYS: record, secret, owner set, sliding log. ARGV: expected record json, id
const DELETE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then return 0 end
if current ~= ARGV[1] then return -3 end
redis.call('DEL', KEYS[1], KEYS[2], KEYS[4])
redis.call('SREM', KEYS[3], ARGV[2])
return 1
"#;

// KEYS: sliding log. ARGV: now ms, window ms, max requests, unique member
const SLIDING_LOG_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
if redis.call('ZCARD', KEYS[1]) < tonumber(ARGV[3]) then
  redis.call('ZADD', KEYS[1], now, ARGV[4])
  redis.call('PEXPIRE', KEYS[1], window)
  return 1
end
return 0
"#;

/// Configuration for the Redis store
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub url: String,
    /// Namespace prepended to every key
    pub key_prefix: String,
    /// Window algorithm for rate checks
    pub rate_limit_strategy: RateLimitStrategy,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "pmp:apikeys".to_string(),
            rate_limit_strategy: RateLimitStrategy::SlidingLog,
        }
    }
}

impl RedisStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_rate_limit_strategy(mut self, strategy: RateLimitStrategy) -> Self {
        self.rate_limit_strategy = strategy;
        self
    }
}

/// Key layout for one namespace
///
/// Record, secret, owner and rate-limit keys live under distinct segments so
/// they never collide with each other or across credentials. Sliding logs and
/// fixed-window buckets sit under their own `log` and `bucket` segments, and
/// bucket keys carry the id's byte length so one id can never be a prefix of
/// another's buckets.
#[derive(Debug, Clone)]
pub struct RedisKeyspace {
    namespace: String,
}

impl RedisKeyspace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn record(&self, id: &str) -> String {
        format!("{}:key:{}", self.namespace, id)
    }

    pub fn secret(&self, secret: &str) -> String {
        format!("{}:secret:{}", self.namespace, secret)
    }

    pub fn owner(&self, owner_id: &str) -> String {
        format!("{}:owner:{}", self.namespace, owner_id)
    }

    pub fn sliding_log(&self, id: &str) -> String {
        format!("{}:ratelimit:log:{}", self.namespace, id)
    }

    pub fn bucket(&self, id: &str, window_ms: u64, index: i64) -> String {
        format!(
            "{}:ratelimit:bucket:{}:{}:{}:{}",
            self.namespace,
            id.len(),
            id,
            window_ms,
            index
        )
    }

    /// Glob matching every fixed-window bucket of one key
    pub fn bucket_pattern(&self, id: &str) -> String {
        format!(
            "{}:ratelimit:bucket:{}:{}:*",
            escape_glob(&self.namespace),
            id.len(),
            escape_glob(id)
        )
    }
}

/// Escape the metacharacters of a Redis `MATCH` glob
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Redis store with atomic scripts per operation
///
/// Saves, updates and deletes run as Lua scripts so the record and its
/// secret and owner entries change together. Updates compare the stored
/// record before writing and retry on concurrent modification. Rate checks
/// run server-side: the sliding log as a sorted-set script, the fixed
/// window as an atomic `SET NX PX` + `INCR` pipeline, so no in-process
/// locking is needed.
///
/// Consistency: strict against a single primary. When reads are served by
/// replicas, the store is only eventually consistent: a `save_key` followed
/// by a lookup on another node may not observe the write yet.
///
/// Fixed-window bucket counters are removed by a `SCAN` after the record is
/// deleted rather than inside the delete script.
#[derive(Clone)]
pub struct RedisApiKeyStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
    keyspace: RedisKeyspace,
}

impl fmt::Debug for RedisApiKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisApiKeyStore")
            .field("config", &self.config)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

fn cache_error<E: fmt::Display>(action: &'static str) -> impl FnOnce(E) -> DomainError {
    move |e| DomainError::cache(format!("Failed to {}: {}", action, e))
}

/// Result code of the update and delete scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptOutcome {
    Applied,
    Missing,
    SecretTaken,
    Stale,
}

impl From<i64> for ScriptOutcome {
    fn from(code: i64) -> Self {
        match code {
            1 => Self::Applied,
            0 => Self::Missing,
            -2 => Self::SecretTaken,
            _ => Self::Stale,
        }
    }
}

/// Run a compare-and-set step up to `MAX_UPDATE_ATTEMPTS` times
///
/// A step returns `Ok(None)` when it lost the race to a concurrent writer.
/// Exhausting every attempt is a `Conflict`.
async fn retry_stale<T, F, Fut>(id: &ApiKeyId, mut step: F) -> Result<T, DomainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, DomainError>>,
{
    for attempt in 1..=MAX_UPDATE_ATTEMPTS {
        if let Some(settled) = step().await? {
            return Ok(settled);
        }
        debug!(key_id = %id, attempt, "Concurrent API key write, retrying");
    }

    Err(DomainError::conflict(format!(
        "API key '{}' was modified concurrently",
        id
    )))
}

fn decode(json: &str) -> Result<ApiKey, DomainError> {
    serde_json::from_str(json).map_err(cache_error("deserialize API key"))
}

fn encode(api_key: &ApiKey) -> Result<String, DomainError> {
    serde_json::to_string(api_key).map_err(cache_error("serialize API key"))
}

impl RedisApiKeyStore {
    /// Connect to Redis
    pub async fn connect(config: RedisStoreConfig) -> Result<Self, DomainError> {
        let client = Client::open(config.url.as_str()).map_err(cache_error("create Redis client"))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(cache_error("connect to Redis"))?;

        if config.rate_limit_strategy == RateLimitStrategy::FixedWindow {
            warn!(
                "Redis store uses fixed-window rate limiting; bursts of up to twice the limit \
                 are possible across window boundaries"
            );
        }

        Ok(Self {
            connection,
            keyspace: RedisKeyspace::new(config.key_prefix.clone()),
            config,
        })
    }

    pub fn keyspace(&self) -> &RedisKeyspace {
        &self.keyspace
    }

    async fn get_raw(&self, id: &str) -> Result<Option<String>, DomainError> {
        let mut conn = self.connection.clone();

        conn.get(self.keyspace.record(id))
            .await
            .map_err(cache_error("read API key"))
    }

    async fn delete_buckets(&self, id: &str) -> Result<usize, DomainError> {
        let mut conn = self.connection.clone();
        let pattern = self.keyspace.bucket_pattern(id);
        let mut cursor = 0u64;
        let mut total_deleted = 0usize;

        loop {
            let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(cache_error("scan rate limit buckets"))?;

            if !keys.is_empty() {
                let deleted: usize = conn
                    .del(&keys)
                    .await
                    .map_err(cache_error("delete rate limit buckets"))?;
                total_deleted += deleted;
            }

            cursor = new_cursor;

            if cursor == 0 {
                break;
            }
        }

        Ok(total_deleted)
    }

    async fn check_sliding_log(
        &self,
        id: &str,
        policy: &RateLimitPolicy,
    ) -> Result<bool, DomainError> {
        let mut conn = self.connection.clone();
        let now = now_millis();
        let member = format!("{}-{}", now, uuid::Uuid::new_v4());

        let admitted: i64 = Script::new(SLIDING_LOG_SCRIPT)
            .key(self.keyspace.sliding_log(id))
            .arg(now)
            .arg(policy.window_ms)
            .arg(policy.max_requests)
            .arg(member)
            .invoke_async(&mut conn)
            .await
            .map_err(cache_error("check rate limit"))?;

        Ok(admitted == 1)
    }

    async fn check_fixed_window(
        &self,
        id: &str,
        policy: &RateLimitPolicy,
    ) -> Result<bool, DomainError> {
        let mut conn = self.connection.clone();
        let index = FixedWindow::bucket_index(now_millis(), policy.window_ms);
        let key = self.keyspace.bucket(id, policy.window_ms, index);
        let ttl_ms = FixedWindow::bucket_ttl(policy).as_millis() as u64;

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(&key)
            .arg(0)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .ignore()
            .incr(&key, 1)
            .query_async(&mut conn)
            .await
            .map_err(cache_error("check rate limit"))?;

        Ok(FixedWindow::admits(count.saturating_sub(1), policy))
    }
}

#[async_trait]
impl ApiKeyStore for RedisApiKeyStore {
    async fn save_key(&self, api_key: ApiKey) -> Result<ApiKey, DomainError> {
        let mut conn = self.connection.clone();
        let id = api_key.id().as_str();

        let result: i64 = Script::new(SAVE_SCRIPT)
            .key(self.keyspace.record(id))
            .key(self.keyspace.secret(api_key.secret()))
            .key(self.keyspace.owner(api_key.owner_id()))
            .arg(encode(&api_key)?)
            .arg(id)
            .invoke_async(&mut conn)
            .await
            .map_err(cache_error("save API key"))?;

        match result {
            1 => Ok(api_key),
            -1 => Err(DomainError::conflict(format!(
                "API key with ID '{}' already exists",
                id
            ))),
            _ => Err(DomainError::conflict("API key secret already in use")),
        }
    }

    async fn get_key_by_id(&self, id: &ApiKeyId) -> Result<Option<ApiKey>, DomainError> {
        self.get_raw(id.as_str())
            .await?
            .map(|json| decode(&json))
            .transpose()
    }

    async fn get_key_by_value(&self, secret: &str) -> Result<Option<ApiKey>, DomainError> {
        let mut conn = self.connection.clone();

        let id: Option<String> = conn
            .get(self.keyspace.secret(secret))
            .await
            .map_err(cache_error("read secret index"))?;

        match id {
            Some(id) => self
                .get_raw(&id)
                .await?
                .map(|json| decode(&json))
                .transpose(),
            None => Ok(None),
        }
    }

    async fn get_keys_by_owner(&self, owner_id: &str) -> Result<Vec<ApiKey>, DomainError> {
        let mut conn = self.connection.clone();

        let ids: Vec<String> = conn
            .smembers(self.keyspace.owner(owner_id))
            .await
            .map_err(cache_error("read owner index"))?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let record_keys: Vec<String> = ids.iter().map(|id| self.keyspace.record(id)).collect();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&record_keys)
            .query_async(&mut conn)
            .await
            .map_err(cache_error("read API keys"))?;

        let mut keys = values
            .into_iter()
            .flatten()
            .map(|json| decode(&json))
            .collect::<Result<Vec<_>, _>>()?;

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
        let update = &update;

        retry_stale(id, move || async move {
            let Some(current_json) = self.get_raw(id.as_str()).await? else {
                return Ok(Some(None));
            };

            let existing = decode(&current_json)?;
            let mut updated = existing.clone();
            updated.apply(update);

            let mut conn = self.connection.clone();
            let result: i64 = Script::new(UPDATE_SCRIPT)
                .key(self.keyspace.record(id.as_str()))
                .key(self.keyspace.secret(existing.secret()))
                .key(self.keyspace.secret(updated.secret()))
                .key(self.keyspace.owner(existing.owner_id()))
                .key(self.keyspace.owner(updated.owner_id()))
                .arg(&current_json)
                .arg(encode(&updated)?)
                .arg(id.as_str())
                .invoke_async(&mut conn)
                .await
                .map_err(cache_error("update API key"))?;

            match ScriptOutcome::from(result) {
                ScriptOutcome::Applied => Ok(Some(Some(updated))),
                ScriptOutcome::Missing => Ok(Some(None)),
                ScriptOutcome::SecretTaken => {
                    Err(DomainError::conflict("API key secret already in use"))
                }
                ScriptOutcome::Stale => Ok(None),
            }
        })
        .await
    }

    async fn delete_key(&self, id: &ApiKeyId) -> Result<bool, DomainError> {
        let deleted = retry_stale(id, move || async move {
            let Some(current_json) = self.get_raw(id.as_str()).await? else {
                return Ok(Some(false));
            };

            let existing = decode(&current_json)?;
            let mut conn = self.connection.clone();
            let result: i64 = Script::new(DELETE_SCRIPT)
                .key(self.keyspace.record(id.as_str()))
                .key(self.keyspace.secret(existing.secret()))
                .key(self.keyspace.owner(existing.owner_id()))
                .key(self.keyspace.sliding_log(id.as_str()))
                .arg(&current_json)
                .arg(id.as_str())
                .invoke_async(&mut conn)
                .await
                .map_err(cache_error("delete API key"))?;

            match ScriptOutcome::from(result) {
                ScriptOutcome::Applied => Ok(Some(true)),
                ScriptOutcome::Stale => Ok(None),
                _ => Ok(Some(false)),
            }
        })
        .await?;

        if !deleted {
            return Ok(false);
        }

        // The record is gone; leftover buckets expire after one window
        if let Err(e) = self.delete_buckets(id.as_str()).await {
            warn!(key_id = %id, error = %e, "Failed to purge rate limit buckets");
        }

        Ok(true)
    }

    async fn check_rate_limit(
        &self,
        id: &ApiKeyId,
        policy: &RateLimitPolicy,
    ) -> Result<bool, DomainError> {
        match self.config.rate_limit_strategy {
            RateLimitStrategy::SlidingLog => self.check_sliding_log(id.as_str(), policy).await,
            RateLimitStrategy::FixedWindow => self.check_fixed_window(id.as_str(), policy).await,
        }
    }
}
