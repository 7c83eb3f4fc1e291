//! Host-side admission guard.
//!
//! Everything a host needs around the limiter: deriving an identifier from
//! the request, applying a named policy, and turning a rejection into a
//! 429 payload with rate-limit headers.

mod identity;
mod service;

pub use identity::{IdentifierStrategy, RequestIdentity, ANONYMOUS, UNKNOWN_ADDRESS};
pub use service::{
    ExceededBody, GuardDecision, RateLimitExceeded, RateLimitGuard, RateLimitHeaders,
    RateLimitPolicy, TOO_MANY_REQUESTS,
};
