//! Fixed bucket rate limiting
//!
//! Requests are counted per `floor(now / window)` bucket and the counter
//! expires after one window. Two adjacent buckets can together admit up to
//! `2 * max_requests` requests inside a span shorter than one window, so this
//! is only an approximation of the sliding log.

use std::time::Duration;

use super::policy::clamp_window;
use super::RateLimitPolicy;

/// Bucket arithmetic for fixed-window counters
#[derive(Debug, Clone, Copy)]
pub struct FixedWindow;

impl FixedWindow {
    /// Index of the bucket containing `now_ms`
    pub fn bucket_index(now_ms: i64, window_ms: u64) -> i64 {
        now_ms.div_euclid(clamp_window(window_ms).max(1))
    }

    /// Whether a request is admitted given the counter value before it was
    /// incremented
    pub fn admits(pre_increment: u64, policy: &RateLimitPolicy) -> bool {
        pre_increment < policy.max_requests as u64
    }

    /// Lifetime of a bucket counter
    pub fn bucket_ttl(policy: &RateLimitPolicy) -> Duration {
        policy.window()
    }
}
