//! Rate limiting domain
//!
//! Policies and window algorithms evaluated against per-key state owned by
//! a storage adapter. The sliding log is authoritative; the fixed window is
//! a cheaper approximation for stores with atomic increment-with-expiry.

mod fixed_window;
mod policy;
mod sliding_window;

pub use fixed_window::FixedWindow;
pub use policy::{RateLimitPolicy, RateLimitStrategy, MAX_WINDOW_MS};
pub use sliding_window::SlidingWindowLog;

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
