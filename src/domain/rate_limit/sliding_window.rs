//! Sliding log rate limiting

use serde::{Deserialize, Serialize};

use super::policy::clamp_window;
use super::RateLimitPolicy;

/// Admitted request timestamps (epoch milliseconds) for one credential
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowLog {
    timestamps: Vec<i64>,
    /// Instant at which the newest entry leaves the window of the policy
    /// that admitted it
    #[serde(default)]
    idle_after_ms: i64,
}

impl SlidingWindowLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop entries that fell out of the trailing window ending at `now_ms`
    pub fn prune(&mut self, now_ms: i64, window_ms: u64) {
        let cutoff = now_ms.saturating_sub(clamp_window(window_ms));
        self.timestamps.retain(|&t| t > cutoff);
    }

    /// Admit a request at `now_ms` if fewer than `max_requests` were admitted
    /// in the trailing window. The timestamp is recorded only on admission.
    pub fn try_admit(&mut self, now_ms: i64, policy: &RateLimitPolicy) -> bool {
        self.prune(now_ms, policy.window_ms);

        if self.timestamps.len() >= policy.max_requests as usize {
            return false;
        }

        self.timestamps.push(now_ms);
        self.idle_after_ms = now_ms.saturating_add(policy.window_millis());
        true
    }

    /// Whether every entry has aged out, so the log can be dropped without
    /// changing any future admission under the same policy
    pub fn is_idle_at(&self, now_ms: i64) -> bool {
        now_ms >= self.idle_after_ms
    }

    /// Number of admitted requests still tracked
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Oldest tracked timestamp, if any
    pub fn oldest(&self) -> Option<i64> {
        self.timestamps.iter().min().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_admitted() {
        let mut log = SlidingWindowLog::new();
        assert!(log.try_admit(1_000, &RateLimitPolicy::new(1000, 1)));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_window_behavior() {
        let policy = RateLimitPolicy::new(1000, 1);
        let mut log = SlidingWindowLog::new();

        assert!(log.try_admit(10_000, &policy));
        assert!(!log.try_admit(10_001, &policy));
        assert!(!log.try_admit(10_999, &policy));
        // Entry at 10_000 is exactly one window old at 11_000
        assert!(log.try_admit(11_000, &policy));
    }

    #[test]
    fn test_rejection_not_recorded() {
        let policy = RateLimitPolicy::new(1000, 2);
        let mut log = SlidingWindowLog::new();

        assert!(log.try_admit(0, &policy));
        assert!(log.try_admit(100, &policy));
        assert!(!log.try_admit(200, &policy));
        assert!(!log.try_admit(300, &policy));
        assert_eq!(log.len(), 2);

        // Only the first admission has expired
        assert!(log.try_admit(1_050, &policy));
        assert!(!log.try_admit(1_060, &policy));
        assert!(log.try_admit(1_100, &policy));
    }

    #[test]
    fn test_no_boundary_burst() {
        let policy = RateLimitPolicy::new(1000, 3);
        let mut log = SlidingWindowLog::new();

        for t in [900, 950, 999] {
            assert!(log.try_admit(t, &policy));
        }

        // A new aligned second starts at 1000 but the trailing window is full
        assert!(!log.try_admit(1_000, &policy));
        assert!(!log.try_admit(1_500, &policy));
        assert!(log.try_admit(1_900, &policy));
    }

    #[test]
    fn test_prune_and_oldest() {
        let mut log = SlidingWindowLog::new();
        let policy = RateLimitPolicy::new(100, 10);
        log.try_admit(0, &policy);
        log.try_admit(50, &policy);
        assert_eq!(log.oldest(), Some(0));

        log.prune(160, 100);
        assert!(log.is_empty());
        assert_eq!(log.oldest(), None);
    }

    #[test]
    fn test_idle_after_window() {
        let policy = RateLimitPolicy::new(1000, 5);
        let mut log = SlidingWindowLog::new();
        assert!(log.is_idle_at(0));

        log.try_admit(10_000, &policy);
        log.try_admit(10_400, &policy);
        assert!(!log.is_idle_at(10_500));
        assert!(!log.is_idle_at(11_399));
        assert!(log.is_idle_at(11_400));

        // A rejection leaves the deadline untouched
        let strict = RateLimitPolicy::new(1000, 1);
        assert!(!log.try_admit(11_000, &strict));
        assert!(log.is_idle_at(11_400));
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut log = SlidingWindowLog::new();
        log.try_admit(42, &RateLimitPolicy::new(1000, 5));

        let json = serde_json::to_string(&log).unwrap();
        assert_eq!(json, r#"{"timestamps":[42],"idle_after_ms":1042}"#);

        let back: SlidingWindowLog = serde_json::from_str(&json).unwrap();
        assert_eq!(back, log);
    }
}
