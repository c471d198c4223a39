//! API Key entity and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::validation::{validate_api_key_id, ApiKeyValidationError};
use crate::domain::rate_limit::RateLimitPolicy;

/// Opaque attribute bag (permissions, metadata). Never interpreted here.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// API Key identifier, a random UUID assigned at creation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApiKeyId(String);

impl ApiKeyId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Result<Self, ApiKeyValidationError> {
        let id = id.into();
        validate_api_key_id(&id)?;
        Ok(Self(id))
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ApiKeyId {
    type Error = ApiKeyValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ApiKeyId> for String {
    fn from(id: ApiKeyId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ApiKeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derived lifecycle state of a key at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    Active,
    Suspended,
    /// Past its expiry; toggling `is_active` cannot revive it
    Expired,
}

/// Persisted API key record, including the bearer secret
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub(crate) id: ApiKeyId,
    pub(crate) secret: String,
    pub(crate) owner_id: String,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) permissions: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) rate_limit: Option<RateLimitPolicy>,
    pub(crate) is_active: bool,
    pub(crate) created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) last_used_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) metadata: Attributes,
}

impl ApiKey {
    /// Create a new active key
    pub fn new(
        id: ApiKeyId,
        secret: impl Into<String>,
        owner_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            secret: secret.into(),
            owner_id: owner_id.into(),
            name: name.into(),
            permissions: Attributes::new(),
            rate_limit: None,
            is_active: true,
            created_at: Utc::now(),
            last_used_at: None,
            expires_at: None,
            metadata: Attributes::new(),
        }
    }

    pub fn with_permissions(mut self, permissions: Attributes) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitPolicy) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_metadata(mut self, metadata: Attributes) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    // Getters

    pub fn id(&self) -> &ApiKeyId {
        &self.id
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn permissions(&self) -> &Attributes {
        &self.permissions
    }

    pub fn rate_limit(&self) -> Option<&RateLimitPolicy> {
        self.rate_limit.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used_at(&self) -> Option<DateTime<Utc>> {
        self.last_used_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn metadata(&self) -> &Attributes {
        &self.metadata
    }

    // Status checks

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }

    /// Expired when `expires_at` lies strictly before `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }

    /// Whether the key passes validation at `now`
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired_at(now)
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> ApiKeyStatus {
        if self.is_expired_at(now) {
            ApiKeyStatus::Expired
        } else if self.is_active {
            ApiKeyStatus::Active
        } else {
            ApiKeyStatus::Suspended
        }
    }

    /// Apply a partial update. `id` and `created_at` are never changed;
    /// callers needing `secret`/`owner_id` immutability must strip them first
    /// (see [`ApiKeyUpdate::mutable_fields`]).
    pub fn apply(&mut self, update: &ApiKeyUpdate) {
        if let Some(secret) = &update.secret {
            self.secret = secret.clone();
        }
        if let Some(owner_id) = &update.owner_id {
            self.owner_id = owner_id.clone();
        }
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(permissions) = &update.permissions {
            self.permissions = permissions.clone();
        }
        if let Some(rate_limit) = update.rate_limit {
            self.rate_limit = rate_limit;
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
        if let Some(expires_at) = update.expires_at {
            self.expires_at = expires_at;
        }
        if let Some(metadata) = &update.metadata {
            self.metadata = metadata.clone();
        }
        if let Some(last_used_at) = update.last_used_at {
            self.last_used_at = Some(last_used_at);
        }
    }

    /// Strip the secret for display or transport
    pub fn sanitize(&self) -> SanitizedApiKey {
        SanitizedApiKey::from(self)
    }
}

/// API key without its secret. Returned by every read path except creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizedApiKey {
    pub id: ApiKeyId,
    pub owner_id: String,
    pub name: String,
    pub permissions: Attributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitPolicy>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Attributes,
}

impl From<&ApiKey> for SanitizedApiKey {
    fn from(key: &ApiKey) -> Self {
        Self {
            id: key.id.clone(),
            owner_id: key.owner_id.clone(),
            name: key.name.clone(),
            permissions: key.permissions.clone(),
            rate_limit: key.rate_limit,
            is_active: key.is_active,
            created_at: key.created_at,
            last_used_at: key.last_used_at,
            expires_at: key.expires_at,
            metadata: key.metadata.clone(),
        }
    }
}

impl From<ApiKey> for SanitizedApiKey {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            owner_id: key.owner_id,
            name: key.name,
            permissions: key.permissions,
            rate_limit: key.rate_limit,
            is_active: key.is_active,
            created_at: key.created_at,
            last_used_at: key.last_used_at,
            expires_at: key.expires_at,
            metadata: key.metadata,
        }
    }
}

/// Input for issuing a new key
#[derive(Debug, Clone, Default)]
pub struct NewApiKey {
    pub owner_id: String,
    pub name: String,
    pub permissions: Option<Attributes>,
    pub rate_limit: Option<RateLimitPolicy>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Option<Attributes>,
}

impl NewApiKey {
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_permissions(mut self, permissions: Attributes) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitPolicy) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_metadata(mut self, metadata: Attributes) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Partial update of an API key
///
/// `None` leaves a field untouched. For nullable fields the inner `Option`
/// distinguishes "set" from "clear".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiKeyUpdate {
    pub id: Option<String>,
    pub secret: Option<String>,
    pub owner_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub permissions: Option<Attributes>,
    pub rate_limit: Option<Option<RateLimitPolicy>>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub metadata: Option<Attributes>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update that only stamps `last_used_at`
    pub fn touch(at: DateTime<Utc>) -> Self {
        Self {
            last_used_at: Some(at),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }

    pub fn with_permissions(mut self, permissions: Attributes) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: Option<RateLimitPolicy>) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_expiration(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_metadata(mut self, metadata: Attributes) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Keep only the fields a key owner may change: name, active flag,
    /// permissions, expiry, metadata and rate limit
    pub fn mutable_fields(self) -> Self {
        Self {
            name: self.name,
            is_active: self.is_active,
            permissions: self.permissions,
            rate_limit: self.rate_limit,
            expires_at: self.expires_at,
            metadata: self.metadata,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
