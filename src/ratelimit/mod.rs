//! Sliding-window rate limiting.

mod backend;
mod clock;
mod key;
mod limiter;

pub use backend::RateLimiterBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{WindowKey, DEFAULT_KEY_PREFIX};
pub use limiter::{SlidingWindowLimiter, DEFAULT_TTL_GRACE_SECS};
