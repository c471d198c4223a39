//! API Key domain
//!
//! Key records, their sanitized view, partial updates and the storage
//! adapter contract.

mod entity;
mod repository;
mod validation;

pub use entity::{
    ApiKey, ApiKeyId, ApiKeyStatus, ApiKeyUpdate, Attributes, NewApiKey, SanitizedApiKey,
};
#[cfg(test)]
pub use repository::MockApiKeyStore;
pub use repository::ApiKeyStore;
pub use validation::{
    validate_api_key_id, validate_key_bytes, validate_name, validate_owner_id, validate_secret,
    ApiKeyValidationError,
};
