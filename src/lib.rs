//! Slidegate - Sliding-Window Rate Limiting
//!
//! This crate implements a per-identifier sliding-window rate limiter on top
//! of a shared counter store. Window state lives entirely in the store, so
//! any number of processes sharing one store enforce one limit together.

pub mod config;
pub mod error;
pub mod guard;
pub mod ratelimit;
pub mod store;
pub mod telemetry;

pub use config::SlidegateConfig;
pub use error::{Result, SlidegateError, StoreError};
pub use guard::{GuardDecision, RateLimitGuard, RateLimitPolicy, RequestIdentity};
pub use ratelimit::{RateLimiterBackend, SlidingWindowLimiter};
pub use store::{CounterStore, MemoryStore};
