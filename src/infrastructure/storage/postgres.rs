//! PostgreSQL API key store with connection pooling

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::debug;

use crate::domain::api_key::{ApiKey, ApiKeyId, ApiKeyStore, ApiKeyUpdate};
use crate::domain::rate_limit::{now_millis, RateLimitPolicy};
use crate::domain::DomainError;

const KEYS_TABLE: &str = "api_keys";
const RATE_EVENTS_TABLE: &str = "api_key_rate_events";

const SELECT_COLUMNS: &str = "id, secret, owner_id, name, permissions, rate_limit, is_active, \
                              created_at, last_used_at, expires_at, metadata";

/// PostgreSQL store configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/pmp_key_manager".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn with_idle_timeout(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }
}

/// Relational API key store
///
/// Keys live in one row each with a unique constraint on `secret` and an
/// index on `owner_id`. Rate-limit events live in a separate table keyed by
/// key id; a check serializes on a per-key transaction-scoped advisory lock
/// so concurrent callers never over-admit.
pub struct PostgresApiKeyStore {
    pool: PgPool,
}

impl Debug for PostgresApiKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresApiKeyStore")
            .field("table_name", &KEYS_TABLE)
            .finish()
    }
}

fn storage_error<E: std::fmt::Display>(action: &'static str) -> impl FnOnce(E) -> DomainError {
    move |e| DomainError::storage(format!("Failed to {}: {}", action, e))
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db_error| db_error.is_unique_violation())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, DomainError> {
    serde_json::to_value(value).map_err(storage_error("serialize API key"))
}

fn from_row(row: &PgRow) -> Result<ApiKey, DomainError> {
    let id: String = row.get("id");
    let permissions: serde_json::Value = row.get("permissions");
    let rate_limit: Option<serde_json::Value> = row.get("rate_limit");
    let metadata: serde_json::Value = row.get("metadata");

    Ok(ApiKey {
        id: ApiKeyId::new(id).map_err(storage_error("read API key id"))?,
        secret: row.get("secret"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        permissions: serde_json::from_value(permissions)
            .map_err(storage_error("deserialize permissions"))?,
        rate_limit: rate_limit
            .map(serde_json::from_value)
            .transpose()
            .map_err(storage_error("deserialize rate limit"))?,
        is_active: row.get("is_active"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        last_used_at: row.get("last_used_at"),
        expires_at: row.get("expires_at"),
        metadata: serde_json::from_value(metadata)
            .map_err(storage_error("deserialize metadata"))?,
    })
}

impl PostgresApiKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a new store with connection pooling
    pub async fn connect(config: &PostgresConfig) -> Result<Self, DomainError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(storage_error("connect to PostgreSQL"))?;

        Ok(Self::new(pool))
    }

    /// Returns a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Ensures the key and rate-event tables exist
    pub async fn ensure_schema(&self) -> Result<(), DomainError> {
        let statements = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    secret TEXT NOT NULL UNIQUE,
                    owner_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    permissions JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    rate_limit JSONB,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    created_at TIMESTAMPTZ NOT NULL,
                    last_used_at TIMESTAMPTZ,
                    expires_at TIMESTAMPTZ,
                    metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb
                )
                "#,
                KEYS_TABLE
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_owner_id ON {0} (owner_id)",
                KEYS_TABLE
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    key_id TEXT NOT NULL,
                    requested_at_ms BIGINT NOT NULL
                )
                "#,
                RATE_EVENTS_TABLE
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_key_time ON {0} (key_id, requested_at_ms)",
                RATE_EVENTS_TABLE
            ),
        ];

        for statement in &statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_error("create schema"))?;
        }

        debug!("PostgreSQL API key schema ready");
        Ok(())
    }

    async fn fetch_for_update(
        tx: &mut Transaction<'_, Postgres>,
        id: &ApiKeyId,
    ) -> Result<Option<ApiKey>, DomainError> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = $1 FOR UPDATE",
            SELECT_COLUMNS, KEYS_TABLE
        );

        sqlx::query(&query)
            .bind(id.as_str())
            .fetch_optional(&mut **tx)
            .await
            .map_err(storage_error("read API key"))?
            .map(|row| from_row(&row))
            .transpose()
    }
}

#[async_trait]
impl ApiKeyStore for PostgresApiKeyStore {
    async fn save_key(&self, api_key: ApiKey) -> Result<ApiKey, DomainError> {
        let query = format!(
            r#"
            INSERT INTO {} (id, secret, owner_id, name, permissions, rate_limit, is_active,
                            created_at, last_used_at, expires_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
            KEYS_TABLE
        );

        let rate_limit = api_key.rate_limit.as_ref().map(to_json).transpose()?;

        sqlx::query(&query)
            .bind(api_key.id.as_str())
            .bind(&api_key.secret)
            .bind(&api_key.owner_id)
            .bind(&api_key.name)
            .bind(to_json(&api_key.permissions)?)
            .bind(rate_limit)
            .bind(api_key.is_active)
            .bind(api_key.created_at)
            .bind(api_key.last_used_at)
            .bind(api_key.expires_at)
            .bind(to_json(&api_key.metadata)?)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DomainError::conflict(format!(
                        "API key with ID '{}' or its secret already exists",
                        api_key.id
                    ))
                } else {
                    DomainError::storage(format!("Failed to save API key: {}", e))
                }
            })?;

        Ok(api_key)
    }

    async fn get_key_by_id(&self, id: &ApiKeyId) -> Result<Option<ApiKey>, DomainError> {
        let query = format!("SELECT {} FROM {} WHERE id = $1", SELECT_COLUMNS, KEYS_TABLE);

        sqlx::query(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error("read API key"))?
            .map(|row| from_row(&row))
            .transpose()
    }

    async fn get_key_by_value(&self, secret: &str) -> Result<Option<ApiKey>, DomainError> {
        let query = format!(
            "SELECT {} FROM {} WHERE secret = $1",
            SELECT_COLUMNS, KEYS_TABLE
        );

        sqlx::query(&query)
            .bind(secret)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error("read API key"))?
            .map(|row| from_row(&row))
            .transpose()
    }

    async fn get_keys_by_owner(&self, owner_id: &str) -> Result<Vec<ApiKey>, DomainError> {
        let query = format!(
            "SELECT {} FROM {} WHERE owner_id = $1 ORDER BY created_at, id",
            SELECT_COLUMNS, KEYS_TABLE
        );

        let rows = sqlx::query(&query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error("list API keys"))?;

        rows.iter().map(from_row).collect()
    }

    async fn update_key(
        &self,
        id: &ApiKeyId,
        update: ApiKeyUpdate,
    ) -> Result<Option<ApiKey>, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage_error("begin transaction"))?;

        let Some(mut api_key) = Self::fetch_for_update(&mut tx, id).await? else {
            return Ok(None);
        };
        api_key.apply(&update);

        let query = format!(
            r#"
            UPDATE {}
            SET secret = $2, owner_id = $3, name = $4, permissions = $5, rate_limit = $6,
                is_active = $7, last_used_at = $8, expires_at = $9, metadata = $10
            WHERE id = $1
            "#,
            KEYS_TABLE
        );

        let rate_limit = api_key.rate_limit.as_ref().map(to_json).transpose()?;

        sqlx::query(&query)
            .bind(id.as_str())
            .bind(&api_key.secret)
            .bind(&api_key.owner_id)
            .bind(&api_key.name)
            .bind(to_json(&api_key.permissions)?)
            .bind(rate_limit)
            .bind(api_key.is_active)
            .bind(api_key.last_used_at)
            .bind(api_key.expires_at)
            .bind(to_json(&api_key.metadata)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DomainError::conflict("API key secret already in use")
                } else {
                    DomainError::storage(format!("Failed to update API key: {}", e))
                }
            })?;

        tx.commit()
            .await
            .map_err(storage_error("commit transaction"))?;

        Ok(Some(api_key))
    }

    async fn delete_key(&self, id: &ApiKeyId) -> Result<bool, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage_error("begin transaction"))?;

        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", KEYS_TABLE))
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage_error("delete API key"))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(&format!("DELETE FROM {} WHERE key_id = $1", RATE_EVENTS_TABLE))
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage_error("delete rate limit state"))?;

        tx.commit()
            .await
            .map_err(storage_error("commit transaction"))?;

        Ok(true)
    }

    async fn check_rate_limit(
        &self,
        id: &ApiKeyId,
        policy: &RateLimitPolicy,
    ) -> Result<bool, DomainError> {
        let now = now_millis();
        let cutoff = now.saturating_sub(policy.window_millis());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage_error("begin transaction"))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage_error("lock rate limit state"))?;

        sqlx::query(&format!(
            "DELETE FROM {} WHERE key_id = $1 AND requested_at_ms <= $2",
            RATE_EVENTS_TABLE
        ))
        .bind(id.as_str())
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(storage_error("prune rate limit state"))?;

        let count: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) AS count FROM {} WHERE key_id = $1",
            RATE_EVENTS_TABLE
        ))
        .bind(id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_error("count rate limit events"))?
        .get("count");

        let admitted = count < policy.max_requests as i64;

        if admitted {
            sqlx::query(&format!(
                "INSERT INTO {} (key_id, requested_at_ms) VALUES ($1, $2)",
                RATE_EVENTS_TABLE
            ))
            .bind(id.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(storage_error("record rate limit event"))?;
        }

        tx.commit()
            .await
            .map_err(storage_error("commit transaction"))?;

        Ok(admitted)
    }
}
