//! Rate limiter trait for abstracting limiter implementations.

use async_trait::async_trait;

/// The operations a host needs from a rate limiter.
///
/// Implemented by [`SlidingWindowLimiter`](super::SlidingWindowLimiter);
/// the [`RateLimitGuard`](crate::guard::RateLimitGuard) works against any
/// implementation.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Decide whether one more request from `identifier` is admitted.
    async fn is_allowed(&self, identifier: &str, max_requests: u32, window_seconds: u32) -> bool;

    /// Requests still available to `identifier` in the current window.
    async fn remaining_requests(
        &self,
        identifier: &str,
        max_requests: u32,
        window_seconds: u32,
    ) -> u32;

    /// Unix second at which the oldest counted request leaves the window.
    async fn reset_time(&self, identifier: &str, window_seconds: u32) -> i64;

    /// Current unix second, as seen by this limiter.
    fn now_secs(&self) -> i64;
}
