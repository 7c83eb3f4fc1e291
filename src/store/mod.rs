//! Shared counter store abstraction.
//!
//! The limiter keeps one score-ordered set per identifier. Any key/value
//! store that offers sorted, score-addressable, TTL-expirable sets (Redis
//! sorted sets being the canonical one) can back it by implementing
//! [`CounterStore`].

mod memory;

pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Minimal operation set the limiter needs from its shared store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Delete members whose score lies in `[min_score, max_score]`.
    ///
    /// Returns the number of members removed.
    async fn remove_range_by_score(&self, key: &str, min_score: i64, max_score: i64)
        -> StoreResult<u64>;

    /// Number of members currently in the set.
    async fn count(&self, key: &str) -> StoreResult<u64>;

    /// Insert a member, or move an existing member to `score`.
    ///
    /// Returns `true` if the member was new.
    async fn add_member(&self, key: &str, member: &str, score: i64) -> StoreResult<bool>;

    /// Set or refresh the time-to-live of the whole key.
    ///
    /// Returns `false` if the key does not exist.
    async fn set_expiration(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Fetch up to `limit` members in ascending score order.
    async fn range_by_score_ascending(&self, key: &str, limit: usize)
        -> StoreResult<Vec<(String, i64)>>;

    /// Apply every step of `transaction` atomically.
    async fn execute_transaction(&self, transaction: Transaction)
        -> StoreResult<TransactionOutcome>;
}

/// A single queued operation inside a [`Transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    RemoveRangeByScore {
        key: String,
        min_score: i64,
        max_score: i64,
    },
    Count {
        key: String,
    },
    AddMember {
        key: String,
        member: String,
        score: i64,
    },
    SetExpiration {
        key: String,
        ttl: Duration,
    },
}

/// Reply to one [`Step`] of a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepReply {
    /// Members removed by `RemoveRangeByScore`
    Removed(u64),
    /// Set size reported by `Count`
    Count(u64),
    /// Whether `AddMember` inserted a new member
    Added(bool),
    /// Whether `SetExpiration` found the key
    Expiration(bool),
}

/// An ordered batch of steps applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    steps: Vec<Step>,
}

impl Transaction {
    /// Create an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a range removal. Returns the step index.
    pub fn remove_range_by_score(&mut self, key: &str, min_score: i64, max_score: i64) -> usize {
        self.push(Step::RemoveRangeByScore {
            key: key.to_string(),
            min_score,
            max_score,
        })
    }

    /// Queue a count. Returns the step index.
    pub fn count(&mut self, key: &str) -> usize {
        self.push(Step::Count {
            key: key.to_string(),
        })
    }

    /// Queue a member insertion. Returns the step index.
    pub fn add_member(&mut self, key: &str, member: &str, score: i64) -> usize {
        self.push(Step::AddMember {
            key: key.to_string(),
            member: member.to_string(),
            score,
        })
    }

    /// Queue a TTL refresh. Returns the step index.
    pub fn set_expiration(&mut self, key: &str, ttl: Duration) -> usize {
        self.push(Step::SetExpiration {
            key: key.to_string(),
            ttl,
        })
    }

    /// The queued steps, in order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Consume the transaction, yielding its steps.
    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn push(&mut self, step: Step) -> usize {
        self.steps.push(step);
        self.steps.len() - 1
    }
}

/// Result of [`CounterStore::execute_transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Every step was applied; one reply per step, in queue order.
    Committed(Vec<StepReply>),
    /// Nothing was applied.
    Aborted,
}

impl TransactionOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionOutcome::Committed(_))
    }

    /// The reply for the step queued at `index`, if committed.
    pub fn reply(&self, index: usize) -> Option<StepReply> {
        match self {
            TransactionOutcome::Committed(replies) => replies.get(index).copied(),
            TransactionOutcome::Aborted => None,
        }
    }
}
