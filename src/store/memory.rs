//! In-process counter store.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{CounterStore, Step, StepReply, StoreResult, Transaction, TransactionOutcome};
use crate::config::LimiterConfig;
use crate::ratelimit::{Clock, SystemClock};

/// One score-ordered set plus its expiry deadline.
#[derive(Debug, Default)]
struct ScoredSet {
    /// member -> score
    members: HashMap<String, i64>,
    /// Unix second at which the key disappears
    expires_at: Option<i64>,
}

impl ScoredSet {
    fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(deadline) if now >= deadline)
    }
}

/// A [`CounterStore`] held in process memory.
///
/// Behaves like a Redis sorted-set keyspace: keys expire once their TTL
/// passes, and a key whose last member is removed disappears. Expired keys
/// are dropped lazily on access, or in bulk by [`MemoryStore::purge_expired`].
///
/// Transactions hold an exclusive gate for their whole duration, so no
/// single operation can observe a half-applied transaction.
pub struct MemoryStore {
    sets: DashMap<String, ScoredSet>,
    gate: RwLock<()>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys", &self.sets.len())
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store whose TTLs are evaluated against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            sets: DashMap::new(),
            gate: RwLock::new(()),
            clock,
        }
    }

    /// Create a shared store and start its sweeper when
    /// `sweep_interval_secs` is non-zero. Must run inside a tokio runtime.
    pub fn start(clock: Arc<dyn Clock>, config: &LimiterConfig) -> (Arc<Self>, Option<JoinHandle<()>>) {
        let store = Arc::new(Self::with_clock(clock));
        let sweeper = (config.sweep_interval_secs > 0)
            .then(|| store.spawn_sweeper(Duration::from_secs(config.sweep_interval_secs)));
        (store, sweeper)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_secs();
        self.sets.iter().filter(|set| !set.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seconds until `key` expires, or `None` if it is absent or has no TTL.
    pub fn time_to_live(&self, key: &str) -> Option<i64> {
        let now = self.clock.now_secs();
        let set = self.sets.get(key)?;
        if set.is_expired(now) {
            return None;
        }
        let deadline = set.expires_at?;
        Some(deadline - now)
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let _gate = self.gate.read();
        let now = self.clock.now_secs();
        let mut purged = 0;
        self.sets.retain(|_, set| {
            let keep = !set.is_expired(now);
            if !keep {
                purged += 1;
            }
            keep
        });
        if purged > 0 {
            debug!(purged = purged, "Purged expired window sets");
        }
        purged
    }

    /// Run [`MemoryStore::purge_expired`] every `interval` on the tokio runtime.
    ///
    /// The task ends on its own once the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.upgrade() {
                    Some(store) => {
                        store.purge_expired();
                    }
                    None => break,
                }
            }
            trace!("Memory store sweeper stopped");
        })
    }

    fn evict_if_expired(&self, key: &str, now: i64) {
        self.sets.remove_if(key, |_, set| set.is_expired(now));
    }

    fn remove_range_unguarded(&self, key: &str, min_score: i64, max_score: i64) -> u64 {
        let now = self.clock.now_secs();
        self.evict_if_expired(key, now);

        let (removed, now_empty) = match self.sets.get_mut(key) {
            Some(mut set) => {
                let before = set.members.len();
                set.members
                    .retain(|_, score| *score < min_score || *score > max_score);
                ((before - set.members.len()) as u64, set.members.is_empty())
            }
            None => (0, false),
        };

        if now_empty {
            self.sets.remove_if(key, |_, set| set.members.is_empty());
        }
        removed
    }

    fn count_unguarded(&self, key: &str) -> u64 {
        let now = self.clock.now_secs();
        self.evict_if_expired(key, now);
        self.sets
            .get(key)
            .map(|set| set.members.len() as u64)
            .unwrap_or(0)
    }

    fn add_member_unguarded(&self, key: &str, member: &str, score: i64) -> bool {
        let now = self.clock.now_secs();
        self.evict_if_expired(key, now);
        let mut set = self.sets.entry(key.to_string()).or_default();
        set.members.insert(member.to_string(), score).is_none()
    }

    fn set_expiration_unguarded(&self, key: &str, ttl: Duration) -> bool {
        let now = self.clock.now_secs();
        self.evict_if_expired(key, now);
        match self.sets.get_mut(key) {
            Some(mut set) => {
                set.expires_at = Some(now + ttl.as_secs() as i64);
                true
            }
            None => false,
        }
    }

    fn range_ascending_unguarded(&self, key: &str, limit: usize) -> Vec<(String, i64)> {
        let now = self.clock.now_secs();
        self.evict_if_expired(key, now);
        let mut members: Vec<(String, i64)> = match self.sets.get(key) {
            Some(set) => set
                .members
                .iter()
                .map(|(member, score)| (member.clone(), *score))
                .collect(),
            None => return Vec::new(),
        };
        // Equal scores fall back to lexicographic member order, as in Redis.
        members.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members.truncate(limit);
        members
    }

    fn apply_step(&self, step: Step) -> StepReply {
        match step {
            Step::RemoveRangeByScore {
                key,
                min_score,
                max_score,
            } => StepReply::Removed(self.remove_range_unguarded(&key, min_score, max_score)),
            Step::Count { key } => StepReply::Count(self.count_unguarded(&key)),
            Step::AddMember { key, member, score } => {
                StepReply::Added(self.add_member_unguarded(&key, &member, score))
            }
            Step::SetExpiration { key, ttl } => {
                StepReply::Expiration(self.set_expiration_unguarded(&key, ttl))
            }
        }
    }

    fn execute_unguarded(&self, transaction: Transaction) -> TransactionOutcome {
        let _gate = self.gate.write();
        let replies = transaction
            .into_steps()
            .into_iter()
            .map(|step| self.apply_step(step))
            .collect();
        TransactionOutcome::Committed(replies)
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn remove_range_by_score(
        &self,
        key: &str,
        min_score: i64,
        max_score: i64,
    ) -> StoreResult<u64> {
        let _gate = self.gate.read();
        Ok(self.remove_range_unguarded(key, min_score, max_score))
    }

    async fn count(&self, key: &str) -> StoreResult<u64> {
        let _gate = self.gate.read();
        Ok(self.count_unguarded(key))
    }

    async fn add_member(&self, key: &str, member: &str, score: i64) -> StoreResult<bool> {
        let _gate = self.gate.read();
        Ok(self.add_member_unguarded(key, member, score))
    }

    async fn set_expiration(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let _gate = self.gate.read();
        Ok(self.set_expiration_unguarded(key, ttl))
    }

    async fn range_by_score_ascending(
        &self,
        key: &str,
        limit: usize,
    ) -> StoreResult<Vec<(String, i64)>> {
        let _gate = self.gate.read();
        Ok(self.range_ascending_unguarded(key, limit))
    }

    async fn execute_transaction(&self, transaction: Transaction) -> StoreResult<TransactionOutcome> {
        trace!(steps = transaction.len(), "Executing transaction");
        Ok(self.execute_unguarded(transaction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;

    fn store_at(start: i64) -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(start));
        let store = MemoryStore::with_clock(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_add_and_count() {
        let (_clock, store) = store_at(1_000);

        assert!(store.add_member("k", "a", 1_000).await.unwrap());
        assert!(store.add_member("k", "b", 1_001).await.unwrap());
        assert_eq!(store.count("k").await.unwrap(), 2);
        assert_eq!(store.count("other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_member_updates_score() {
        let (_clock, store) = store_at(1_000);

        assert!(store.add_member("k", "a", 10).await.unwrap());
        assert!(!store.add_member("k", "a", 20).await.unwrap());

        assert_eq!(store.count("k").await.unwrap(), 1);
        let oldest = store.range_by_score_ascending("k", 1).await.unwrap();
        assert_eq!(oldest, vec![("a".to_string(), 20)]);
    }

    #[tokio::test]
    async fn test_remove_range_is_inclusive() {
        let (_clock, store) = store_at(1_000);
        for (member, score) in [("a", 10), ("b", 20), ("c", 30), ("d", 40)] {
            store.add_member("k", member, score).await.unwrap();
        }

        let removed = store.remove_range_by_score("k", 20, 30).await.unwrap();
        assert_eq!(removed, 2);

        let left = store.range_by_score_ascending("k", 10).await.unwrap();
        assert_eq!(left, vec![("a".to_string(), 10), ("d".to_string(), 40)]);
    }

    #[tokio::test]
    async fn test_emptied_set_disappears() {
        let (_clock, store) = store_at(1_000);
        store.add_member("k", "a", 10).await.unwrap();
        assert_eq!(store.len(), 1);

        store.remove_range_by_score("k", i64::MIN, 10).await.unwrap();

        assert!(store.is_empty());
        assert!(!store
            .set_expiration("k", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_range_ascending_orders_by_score_then_member() {
        let (_clock, store) = store_at(1_000);
        store.add_member("k", "z", 5).await.unwrap();
        store.add_member("k", "b", 7).await.unwrap();
        store.add_member("k", "a", 7).await.unwrap();

        let all = store.range_by_score_ascending("k", 10).await.unwrap();
        assert_eq!(
            all,
            vec![
                ("z".to_string(), 5),
                ("a".to_string(), 7),
                ("b".to_string(), 7),
            ]
        );

        let first = store.range_by_score_ascending("k", 1).await.unwrap();
        assert_eq!(first, vec![("z".to_string(), 5)]);
    }

    #[tokio::test]
    async fn test_key_expires_after_ttl() {
        let (clock, store) = store_at(1_000);
        store.add_member("k", "a", 1_000).await.unwrap();
        assert!(store
            .set_expiration("k", Duration::from_secs(120))
            .await
            .unwrap());
        assert_eq!(store.time_to_live("k"), Some(120));

        clock.advance(119);
        assert_eq!(store.count("k").await.unwrap(), 1);
        assert_eq!(store.time_to_live("k"), Some(1));

        clock.advance(1);
        assert_eq!(store.count("k").await.unwrap(), 0);
        assert_eq!(store.time_to_live("k"), None);
    }

    #[tokio::test]
    async fn test_expired_key_starts_fresh_on_add() {
        let (clock, store) = store_at(1_000);
        store.add_member("k", "old", 1_000).await.unwrap();
        store
            .set_expiration("k", Duration::from_secs(10))
            .await
            .unwrap();

        clock.advance(10);
        store.add_member("k", "new", 1_010).await.unwrap();

        assert_eq!(store.count("k").await.unwrap(), 1);
        assert_eq!(store.time_to_live("k"), None);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (clock, store) = store_at(1_000);
        store.add_member("short", "a", 1_000).await.unwrap();
        store
            .set_expiration("short", Duration::from_secs(5))
            .await
            .unwrap();
        store.add_member("long", "a", 1_000).await.unwrap();
        store
            .set_expiration("long", Duration::from_secs(500))
            .await
            .unwrap();
        store.add_member("forever", "a", 1_000).await.unwrap();

        clock.advance(6);

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.purge_expired(), 0);
    }

    #[tokio::test]
    async fn test_transaction_replies_in_order() {
        let (_clock, store) = store_at(1_000);
        store.add_member("k", "stale", 900).await.unwrap();
        store.add_member("k", "fresh", 990).await.unwrap();

        let mut tx = Transaction::new();
        tx.remove_range_by_score("k", i64::MIN, 939);
        tx.count("k");
        tx.add_member("k", "now", 1_000);
        tx.set_expiration("k", Duration::from_secs(120));

        let outcome = store.execute_transaction(tx).await.unwrap();
        assert_eq!(
            outcome,
            TransactionOutcome::Committed(vec![
                StepReply::Removed(1),
                StepReply::Count(1),
                StepReply::Added(true),
                StepReply::Expiration(true),
            ])
        );
        assert_eq!(store.count("k").await.unwrap(), 2);
        assert_eq!(store.time_to_live("k"), Some(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_and_stops_with_store() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        store.add_member("k", "a", 1_000).await.unwrap();
        store
            .set_expiration("k", Duration::from_secs(1))
            .await
            .unwrap();

        let handle = store.spawn_sweeper(Duration::from_secs(30));
        clock.advance(2);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.sets.len(), 0);

        drop(store);
        tokio::time::sleep(Duration::from_secs(31)).await;
        handle.await.unwrap();
    }

    #[test]
    fn test_transaction_completes_without_suspending() {
        let (_clock, store) = store_at(1_000);
        let mut tx = Transaction::new();
        tx.add_member("k", "a", 1_000);
        tx.count("k");

        let mut pending = tokio_test::task::spawn(store.execute_transaction(tx));
        let outcome = tokio_test::assert_ready!(pending.poll()).unwrap();

        assert_eq!(outcome.reply(1), Some(StepReply::Count(1)));
    }

    #[tokio::test]
    async fn test_start_respects_sweep_interval() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000));

        let disabled = LimiterConfig {
            sweep_interval_secs: 0,
            ..Default::default()
        };
        let (_store, sweeper) = MemoryStore::start(clock.clone(), &disabled);
        assert!(sweeper.is_none());

        let (_store, sweeper) = MemoryStore::start(clock, &LimiterConfig::default());
        let sweeper = sweeper.expect("sweeper should be running");
        sweeper.abort();
    }
}
