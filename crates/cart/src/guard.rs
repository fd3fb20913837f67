//! Busy marks and per-row locks.
//!
//! [`BusyGuard`] is advisory: it records which rows have a mutation in flight
//! so a UI can disable their controls. It never rejects or queues a call, so
//! two overlapping mutations on the same row both proceed. Marks form a set,
//! so the first of two overlapping calls to finish clears the shared mark.
//!
//! [`RowLocks`] is the opt-in alternative that queues overlapping mutations on
//! the same row behind an async mutex.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use hearthwood_core::ItemId;

/// What a mutation targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BusyKey {
    /// Operations without a single row (add, clear, migration).
    Global,
    /// A specific row.
    Item(ItemId),
}

impl From<&ItemId> for BusyKey {
    fn from(id: &ItemId) -> Self {
        Self::Item(id.clone())
    }
}

impl std::fmt::Display for BusyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Item(id) => write!(f, "item:{id}"),
        }
    }
}

/// Set of targets with a mutation in flight.
#[derive(Debug, Default)]
pub struct BusyGuard {
    busy: Mutex<HashSet<BusyKey>>,
}

impl BusyGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_busy(&self, key: BusyKey) {
        self.lock().insert(key);
    }

    pub fn clear_busy(&self, key: &BusyKey) {
        self.lock().remove(key);
    }

    #[must_use]
    pub fn is_busy(&self, key: &BusyKey) -> bool {
        self.lock().contains(key)
    }

    /// Whether any target is busy.
    #[must_use]
    pub fn any_busy(&self) -> bool {
        !self.lock().is_empty()
    }

    /// Mark `key` busy until the returned mark is dropped.
    #[must_use = "the busy mark is cleared as soon as it is dropped"]
    pub fn mark(&self, key: BusyKey) -> BusyMark<'_> {
        self.mark_busy(key.clone());
        BusyMark { guard: self, key }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<BusyKey>> {
        self.busy.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears its busy mark on drop, on success and failure paths alike.
#[derive(Debug)]
pub struct BusyMark<'a> {
    guard: &'a BusyGuard,
    key: BusyKey,
}

impl Drop for BusyMark<'_> {
    fn drop(&mut self) {
        self.guard.clear_busy(&self.key);
    }
}

/// Per-target async mutexes that serialize overlapping mutations.
#[derive(Debug, Default)]
pub struct RowLocks {
    rows: Mutex<HashMap<BusyKey, Arc<AsyncMutex<()>>>>,
}

impl RowLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &BusyKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop locks nobody holds or waits on.
            rows.retain(|_, lock| Arc::strong_count(lock) > 1);
            rows.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_mark_and_clear() {
        let guard = BusyGuard::new();
        let key = BusyKey::Item(ItemId::new("line-1"));
        assert!(!guard.is_busy(&key));

        guard.mark_busy(key.clone());
        assert!(guard.is_busy(&key));
        assert!(!guard.is_busy(&BusyKey::Global));

        guard.clear_busy(&key);
        assert!(!guard.is_busy(&key));
        assert!(!guard.any_busy());
    }

    #[test]
    fn test_busy_mark_clears_on_drop() {
        let guard = BusyGuard::new();
        {
            let _mark = guard.mark(BusyKey::Global);
            assert!(guard.is_busy(&BusyKey::Global));
        }
        assert!(!guard.is_busy(&BusyKey::Global));
    }

    #[test]
    fn test_overlapping_marks_share_one_entry() {
        let guard = BusyGuard::new();
        let key = BusyKey::Item(ItemId::new("line-1"));
        let first = guard.mark(key.clone());
        let second = guard.mark(key.clone());
        drop(first);
        // Advisory only: the first completion clears the mark for both.
        assert!(!guard.is_busy(&key));
        drop(second);
        assert!(!guard.is_busy(&key));
    }

    #[tokio::test]
    async fn test_row_locks_serialize_same_key() {
        let locks = Arc::new(RowLocks::new());
        let key = BusyKey::Item(ItemId::new("line-1"));

        let held = locks.acquire(&key).await;
        let waiter = {
            let locks = locks.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&key).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_row_locks_do_not_block_other_keys() {
        let locks = RowLocks::new();
        let _a = locks.acquire(&BusyKey::Item(ItemId::new("a"))).await;
        let _b = locks.acquire(&BusyKey::Item(ItemId::new("b"))).await;
    }
}
