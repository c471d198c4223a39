//! API Key infrastructure
//!
//! Secret generation and the lifecycle manager.

mod generator;
mod service;

pub use generator::{SecretGenerator, DEFAULT_KEY_BYTES};
pub use service::{ApiKeyManager, AuthOutcome, ListedApiKey};
