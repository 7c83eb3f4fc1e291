//! Admission guard mapping limiter results to host responses.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::identity::{IdentifierStrategy, RequestIdentity};
use crate::error::{Result, SlidegateError};
use crate::ratelimit::RateLimiterBackend;

/// HTTP status for a rejected request.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// An admission policy applied at one call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Requests admitted per window
    pub max_requests: u32,
    /// Window length in seconds
    pub window_seconds: u32,
    /// How the rate-limited subject is derived
    #[serde(default)]
    pub identifier: IdentifierStrategy,
}

impl RateLimitPolicy {
    /// A policy keyed by client address.
    pub fn per_ip(max_requests: u32, window_seconds: u32) -> Self {
        Self {
            max_requests,
            window_seconds,
            identifier: IdentifierStrategy::Ip,
        }
    }

    pub fn with_identifier(mut self, identifier: IdentifierStrategy) -> Self {
        self.identifier = identifier;
        self
    }
}

/// Quota headers attached to an admitted response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: u32,
    pub remaining: u32,
    /// Unix second at which a slot frees up
    pub reset: i64,
}

impl RateLimitHeaders {
    /// Header name/value pairs in emission order.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset.to_string()),
        ]
    }
}

/// A rejected request, ready to be rendered as a 429 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitExceeded {
    pub limit: u32,
    pub window_seconds: u32,
    pub remaining_requests: u32,
    pub reset_time: i64,
    /// Seconds the client should wait, never less than one
    pub retry_after: i64,
}

/// JSON body of a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceededBody {
    pub error: String,
    pub message: String,
    pub remaining_requests: u32,
    pub reset_time: i64,
    pub retry_after: i64,
}

impl RateLimitExceeded {
    pub fn status(&self) -> u16 {
        TOO_MANY_REQUESTS
    }

    pub fn body(&self) -> ExceededBody {
        ExceededBody {
            error: "Rate limit exceeded".to_string(),
            message: format!(
                "Too many requests. Limit: {} requests per {} seconds.",
                self.limit, self.window_seconds
            ),
            remaining_requests: self.remaining_requests,
            reset_time: self.reset_time,
            retry_after: self.retry_after,
        }
    }

    /// The body serialized as JSON.
    pub fn to_json(&self) -> String {
        // A struct of strings and integers always serializes.
        serde_json::to_string(&self.body()).unwrap_or_default()
    }

    /// Quota headers plus `Retry-After`.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = RateLimitHeaders {
            limit: self.limit,
            remaining: self.remaining_requests,
            reset: self.reset_time,
        }
        .to_pairs();
        headers.push(("Retry-After", self.retry_after.to_string()));
        headers
    }
}

/// Outcome of a guarded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Proceed, attaching the quota headers
    Allowed(RateLimitHeaders),
    /// Reject with a 429
    Limited(RateLimitExceeded),
    /// No identifier could be derived; proceed without rate limiting
    Bypass,
}

impl GuardDecision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, GuardDecision::Limited(_))
    }
}

/// Host-side admission gate.
///
/// Derives the identifier from the request, consults the limiter and maps
/// the result to the headers or the 429 payload the host should emit.
pub struct RateLimitGuard<R: RateLimiterBackend> {
    /// The rate limiter instance
    limiter: Arc<R>,
    /// Named policies
    policies: HashMap<String, RateLimitPolicy>,
}

impl<R: RateLimiterBackend> RateLimitGuard<R> {
    /// Create a guard with no named policies.
    pub fn new(limiter: Arc<R>) -> Self {
        Self {
            limiter,
            policies: HashMap::new(),
        }
    }

    /// Create a guard that also resolves named policies.
    pub fn with_policies(limiter: Arc<R>, policies: HashMap<String, RateLimitPolicy>) -> Self {
        Self { limiter, policies }
    }

    /// Get the limiter.
    pub fn limiter(&self) -> &Arc<R> {
        &self.limiter
    }

    /// Check the named policy `name` for this request.
    pub async fn check_named(&self, name: &str, identity: &RequestIdentity) -> Result<GuardDecision> {
        let policy = *self
            .policies
            .get(name)
            .ok_or_else(|| SlidegateError::Config(format!("unknown policy '{}'", name)))?;
        Ok(self.check(&policy, identity).await)
    }

    /// Check `policy` for this request.
    #[instrument(
        skip(self, identity),
        fields(
            max_requests = policy.max_requests,
            window_seconds = policy.window_seconds,
            strategy = ?policy.identifier
        )
    )]
    pub async fn check(&self, policy: &RateLimitPolicy, identity: &RequestIdentity) -> GuardDecision {
        let identifier = policy.identifier.resolve(identity);
        if identifier.is_empty() {
            debug!("No identifier for request, skipping rate limiting");
            return GuardDecision::Bypass;
        }

        let allowed = self
            .limiter
            .is_allowed(&identifier, policy.max_requests, policy.window_seconds)
            .await;
        let remaining = self
            .limiter
            .remaining_requests(&identifier, policy.max_requests, policy.window_seconds)
            .await;
        let reset_time = self
            .limiter
            .reset_time(&identifier, policy.window_seconds)
            .await;

        if allowed {
            debug!(identifier = %identifier, remaining = remaining, "Request admitted");
            return GuardDecision::Allowed(RateLimitHeaders {
                limit: policy.max_requests,
                remaining,
                reset: reset_time,
            });
        }

        let retry_after = (reset_time - self.limiter.now_secs()).max(1);
        info!(
            identifier = %identifier,
            reset_time = reset_time,
            retry_after = retry_after,
            "Request rate limited"
        );

        GuardDecision::Limited(RateLimitExceeded {
            limit: policy.max_requests,
            window_seconds: policy.window_seconds,
            remaining_requests: remaining,
            reset_time,
            retry_after,
        })
    }
}
