//! Rate limit policy types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::api_key::ApiKeyValidationError;

/// Longest accepted window; timestamps are signed epoch milliseconds
pub const MAX_WINDOW_MS: u64 = i64::MAX as u64;

/// Request ceiling over a trailing time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Maximum admitted requests within one window
    pub max_requests: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 100,
        }
    }
}

impl RateLimitPolicy {
    pub fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms,
            max_requests,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Window length as signed milliseconds, clamped to `MAX_WINDOW_MS`
    pub fn window_millis(&self) -> i64 {
        clamp_window(self.window_ms)
    }

    pub fn validate(&self) -> Result<(), ApiKeyValidationError> {
        if self.window_ms == 0 || self.window_ms > MAX_WINDOW_MS || self.max_requests == 0 {
            return Err(ApiKeyValidationError::InvalidRateLimit);
        }

        Ok(())
    }
}

pub(crate) fn clamp_window(window_ms: u64) -> i64 {
    i64::try_from(window_ms).unwrap_or(i64::MAX)
}

/// Window algorithm used by a storage adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Exact trailing-window log of admitted timestamps
    #[default]
    SlidingLog,
    /// Time-aligned counters with expiry; may admit up to twice the ceiling
    /// across a bucket boundary
    FixedWindow,
}

impl RateLimitStrategy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sliding" | "sliding_log" | "sliding-log" | "log" => Some(Self::SlidingLog),
            "fixed" | "fixed_window" | "fixed-window" | "bucket" => Some(Self::FixedWindow),
            _ => None,
        }
    }
}
