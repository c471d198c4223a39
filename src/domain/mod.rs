//! Domain layer - Core business logic and entities

pub mod api_key;
pub mod error;
pub mod rate_limit;

pub use api_key::{
    ApiKey, ApiKeyId, ApiKeyStatus, ApiKeyStore, ApiKeyUpdate, ApiKeyValidationError, Attributes,
    NewApiKey, SanitizedApiKey,
};
pub use error::DomainError;
pub use rate_limit::{FixedWindow, RateLimitPolicy, RateLimitStrategy, SlidingWindowLog};
