//! Sliding-window rate limiter over a shared counter store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::backend::RateLimiterBackend;
use super::clock::{Clock, SystemClock};
use super::key::{WindowKey, DEFAULT_KEY_PREFIX};
use crate::config::LimiterConfig;
use crate::store::{CounterStore, StepReply, StoreResult, Transaction, TransactionOutcome};

/// Extra lifetime given to a window set beyond its logical window.
pub const DEFAULT_TTL_GRACE_SECS: u64 = 60;

/// Per-identifier sliding-window admission gate.
///
/// Every accepted request is recorded as one member of a score-ordered set
/// keyed by `rate_limit:<identifier>`, scored with its unix second. A
/// request is admitted when fewer than `max_requests` members fall inside
/// `[now - window_seconds, now]`.
///
/// The limiter keeps no state of its own. All coordination between
/// concurrent callers is delegated to the store: admission runs as one
/// store transaction, and only when that transaction cannot run does the
/// limiter fall back to a non-atomic sequence of single operations.
///
/// Store failures never reach the caller. A call that cannot reach the
/// store at all fails open.
pub struct SlidingWindowLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    key_prefix: String,
    ttl_grace: Duration,
}

impl std::fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("key_prefix", &self.key_prefix)
            .field("ttl_grace", &self.ttl_grace)
            .finish()
    }
}

impl SlidingWindowLimiter {
    /// Create a limiter on the system clock with default settings.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            ttl_grace: Duration::from_secs(DEFAULT_TTL_GRACE_SECS),
        }
    }

    /// Create a limiter from loaded configuration.
    pub fn from_config(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        config: &LimiterConfig,
    ) -> Self {
        Self::with_clock(store, clock)
            .with_key_prefix(&config.key_prefix)
            .with_ttl_grace(Duration::from_secs(config.ttl_grace_secs))
    }

    /// Use a different key namespace.
    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }

    /// Change how long a window set outlives its window.
    pub fn with_ttl_grace(mut self, grace: Duration) -> Self {
        self.ttl_grace = grace;
        self
    }

    /// The store key used for `identifier`.
    pub fn window_key(&self, identifier: &str) -> WindowKey {
        WindowKey::with_prefix(&self.key_prefix, identifier)
    }

    /// Get the underlying store.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Decide whether one more request from `identifier` is admitted.
    ///
    /// Callers must pass a non-empty identifier and positive limits; none
    /// of these are checked here.
    ///
    /// On the transactional path the new entry is recorded before the
    /// decision and is kept even when the request is rejected, so rejected
    /// requests keep occupying the window. The fallback path records only
    /// admitted requests. The two paths intentionally disagree.
    pub async fn is_allowed(&self, identifier: &str, max_requests: u32, window_seconds: u32) -> bool {
        let key = self.window_key(identifier).to_store_key();
        let now = self.clock.now_secs();
        let ttl = self.ttl(window_seconds);

        trace!(
            key = %key,
            max_requests = max_requests,
            window_seconds = window_seconds,
            "Checking sliding window"
        );

        let mut transaction = Transaction::new();
        transaction.remove_range_by_score(&key, i64::MIN, prune_bound(now, window_seconds));
        let count_step = transaction.count(&key);
        transaction.add_member(&key, &new_member(), now);
        transaction.set_expiration(&key, ttl);

        let outcome = match self.store.execute_transaction(transaction).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(key = %key, error = %e, "Window transaction failed");
                TransactionOutcome::Aborted
            }
        };

        match outcome {
            TransactionOutcome::Committed(replies) => match replies.get(count_step) {
                Some(StepReply::Count(current)) => {
                    let allowed = *current < u64::from(max_requests);
                    if !allowed {
                        debug!(
                            key = %key,
                            count = *current,
                            limit = max_requests,
                            "Sliding window limit exceeded"
                        );
                    }
                    allowed
                }
                other => {
                    warn!(key = %key, reply = ?other, "Window transaction returned no count");
                    true
                }
            },
            TransactionOutcome::Aborted => {
                warn!(key = %key, "Window transaction aborted, using non-atomic fallback");
                match self.fallback_is_allowed(&key, max_requests, window_seconds).await {
                    Ok(allowed) => allowed,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Fallback window check failed, admitting");
                        true
                    }
                }
            }
        }
    }

    /// Requests still available to `identifier` in the current window.
    ///
    /// Prunes the window first. The TTL is refreshed only when the window
    /// still holds entries, so an absent key is never recreated.
    pub async fn remaining_requests(
        &self,
        identifier: &str,
        max_requests: u32,
        window_seconds: u32,
    ) -> u32 {
        let key = self.window_key(identifier).to_store_key();
        match self.count_window(&key, window_seconds).await {
            Ok(current) => {
                let remaining = u64::from(max_requests).saturating_sub(current) as u32;
                trace!(key = %key, current = current, remaining = remaining, "Remaining requests");
                remaining
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Could not read window, reporting full quota");
                max_requests
            }
        }
    }

    /// Unix second at which the oldest recorded request leaves the window.
    ///
    /// Reads the oldest entry without pruning first, so an entry that has
    /// already left the window but not yet been pruned is still reported.
    /// An empty window resets now.
    pub async fn reset_time(&self, identifier: &str, window_seconds: u32) -> i64 {
        let key = self.window_key(identifier).to_store_key();
        let now = self.clock.now_secs();

        let oldest = match self.store.range_by_score_ascending(&key, 1).await {
            Ok(members) => members.into_iter().next(),
            Err(e) => {
                warn!(key = %key, error = %e, "Could not read oldest window entry");
                return now;
            }
        };

        match oldest {
            Some((_, score)) => {
                if let Err(e) = self.store.set_expiration(&key, self.ttl(window_seconds)).await {
                    warn!(key = %key, error = %e, "Could not refresh window expiration");
                }
                score + i64::from(window_seconds)
            }
            None => now,
        }
    }

    /// Prune, count and conditionally add as separate store calls.
    ///
    /// Concurrent fallback calls can all read the same count and all admit.
    async fn fallback_is_allowed(
        &self,
        key: &str,
        max_requests: u32,
        window_seconds: u32,
    ) -> StoreResult<bool> {
        let now = self.clock.now_secs();
        self.store
            .remove_range_by_score(key, i64::MIN, prune_bound(now, window_seconds))
            .await?;
        let current = self.store.count(key).await?;

        if current < u64::from(max_requests) {
            self.store.add_member(key, &new_member(), now).await?;
            self.store.set_expiration(key, self.ttl(window_seconds)).await?;
            return Ok(true);
        }

        debug!(
            key = %key,
            count = current,
            limit = max_requests,
            "Sliding window limit exceeded (fallback)"
        );
        Ok(false)
    }

    async fn count_window(&self, key: &str, window_seconds: u32) -> StoreResult<u64> {
        let now = self.clock.now_secs();
        self.store
            .remove_range_by_score(key, i64::MIN, prune_bound(now, window_seconds))
            .await?;
        let current = self.store.count(key).await?;
        if current > 0 {
            self.store.set_expiration(key, self.ttl(window_seconds)).await?;
        }
        Ok(current)
    }

    fn ttl(&self, window_seconds: u32) -> Duration {
        Duration::from_secs(u64::from(window_seconds)) + self.ttl_grace
    }
}

#[async_trait]
impl RateLimiterBackend for SlidingWindowLimiter {
    async fn is_allowed(&self, identifier: &str, max_requests: u32, window_seconds: u32) -> bool {
        SlidingWindowLimiter::is_allowed(self, identifier, max_requests, window_seconds).await
    }

    async fn remaining_requests(
        &self,
        identifier: &str,
        max_requests: u32,
        window_seconds: u32,
    ) -> u32 {
        SlidingWindowLimiter::remaining_requests(self, identifier, max_requests, window_seconds)
            .await
    }

    async fn reset_time(&self, identifier: &str, window_seconds: u32) -> i64 {
        SlidingWindowLimiter::reset_time(self, identifier, window_seconds).await
    }

    fn now_secs(&self) -> i64 {
        self.clock.now_secs()
    }
}

/// Highest score that is pruned: everything strictly before `now - window`.
fn prune_bound(now: i64, window_seconds: u32) -> i64 {
    now.saturating_sub(i64::from(window_seconds)).saturating_sub(1)
}

fn new_member() -> String {
    Uuid::new_v4().to_string()
}
