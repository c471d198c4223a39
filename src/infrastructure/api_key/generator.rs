//! API Key secret generation
//!
//! Secrets are uniformly random bytes, hex-encoded, behind an optional
//! configured prefix.

use rand::RngCore;

use crate::domain::api_key::{validate_key_bytes, ApiKeyValidationError};

/// Default number of random bytes in a secret
pub const DEFAULT_KEY_BYTES: usize = 12;

/// Generator for bearer secrets
#[derive(Debug, Clone)]
pub struct SecretGenerator {
    /// Prefix for all generated secrets (e.g., "pk_live_")
    prefix: String,
    /// Number of random bytes to generate
    key_bytes: usize,
}

impl SecretGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            key_bytes: DEFAULT_KEY_BYTES,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the number of random bytes
    pub fn with_key_bytes(mut self, bytes: usize) -> Result<Self, ApiKeyValidationError> {
        validate_key_bytes(bytes)?;
        self.key_bytes = bytes;
        Ok(self)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key_bytes(&self) -> usize {
        self.key_bytes
    }

    /// Generate a new secret
    pub fn generate(&self) -> String {
        let mut random_bytes = vec![0u8; self.key_bytes];
        rand::thread_rng().fill_bytes(&mut random_bytes);

        format!("{}{}", self.prefix, hex::encode(random_bytes))
    }

    /// Length of every secret this generator produces
    pub fn secret_len(&self) -> usize {
        self.prefix.len() + self.key_bytes * 2
    }
}

impl Default for SecretGenerator {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_default_length() {
        let generator = SecretGenerator::default();
        let secret = generator.generate();

        assert_eq!(secret.len(), 24);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_prefix() {
        let generator = SecretGenerator::new("pk_live_");
        let secret = generator.generate();

        assert!(secret.starts_with("pk_live_"));
        assert_eq!(secret.len(), generator.secret_len());
        assert!(secret["pk_live_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_custom_key_bytes() {
        let generator = SecretGenerator::new("").with_key_bytes(32).unwrap();
        assert_eq!(generator.generate().len(), 64);
        assert!(SecretGenerator::new("").with_key_bytes(2).is_err());
    }

    #[test]
    fn test_uniqueness() {
        let generator = SecretGenerator::new("pk_");
        let secrets: HashSet<String> = (0..1000).map(|_| generator.generate()).collect();
        assert_eq!(secrets.len(), 1000);
    }
}
