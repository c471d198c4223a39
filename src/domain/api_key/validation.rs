//! API Key input validation

use thiserror::Error;

/// Caller-input errors for API key operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApiKeyValidationError {
    #[error("Owner ID cannot be empty")]
    EmptyOwnerId,

    #[error("API key name cannot be empty")]
    EmptyName,

    #[error("API key ID cannot be empty")]
    EmptyId,

    #[error("API key secret cannot be empty")]
    EmptySecret,

    #[error("Key length must be between {min} and {max} bytes, got {actual}")]
    InvalidKeyLength { min: usize, max: usize, actual: usize },

    #[error("Rate limit window and request ceiling must be greater than zero")]
    InvalidRateLimit,
}

pub(crate) const MIN_KEY_BYTES: usize = 8;
pub(crate) const MAX_KEY_BYTES: usize = 64;

/// Validate an owner ID
pub fn validate_owner_id(owner_id: &str) -> Result<(), ApiKeyValidationError> {
    if owner_id.trim().is_empty() {
        return Err(ApiKeyValidationError::EmptyOwnerId);
    }

    Ok(())
}

/// Validate a display name
pub fn validate_name(name: &str) -> Result<(), ApiKeyValidationError> {
    if name.trim().is_empty() {
        return Err(ApiKeyValidationError::EmptyName);
    }

    Ok(())
}

/// Validate an API key ID argument
pub fn validate_api_key_id(id: &str) -> Result<(), ApiKeyValidationError> {
    if id.is_empty() {
        return Err(ApiKeyValidationError::EmptyId);
    }

    Ok(())
}

/// Validate a presented secret value
pub fn validate_secret(secret: &str) -> Result<(), ApiKeyValidationError> {
    if secret.is_empty() {
        return Err(ApiKeyValidationError::EmptySecret);
    }

    Ok(())
}

/// Validate the number of random bytes used for secret generation
pub fn validate_key_bytes(bytes: usize) -> Result<(), ApiKeyValidationError> {
    if !(MIN_KEY_BYTES..=MAX_KEY_BYTES).contains(&bytes) {
        return Err(ApiKeyValidationError::InvalidKeyLength {
            min: MIN_KEY_BYTES,
            max: MAX_KEY_BYTES,
            actual: bytes,
        });
    }

    Ok(())
}
