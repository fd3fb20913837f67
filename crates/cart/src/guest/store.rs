//! Typed guest collection with TTL envelopes and row dedupe.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::TimeDelta;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use hearthwood_core::ItemId;

use super::backend::GuestBackend;
use super::envelope::GuestRecord;
use crate::clock::Clock;
use crate::error::StorageError;
use crate::row::{SyncedRow, position};

/// One guest collection (cart or wishlist) stored under its own key.
///
/// Every write rewrites the whole collection in a fresh envelope, which also
/// pushes its expiry forward. Reads and read-modify-write cycles hold the
/// store's lock, so overlapping calls on one store never lose a write.
pub struct GuestStore<T> {
    backend: Arc<dyn GuestBackend>,
    key: &'static str,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    lock: Mutex<()>,
    _rows: PhantomData<fn() -> T>,
}

impl<T: SyncedRow> GuestStore<T> {
    /// Create a store for the collection under `key`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn GuestBackend>,
        key: &'static str,
        clock: Arc<dyn Clock>,
        ttl: TimeDelta,
    ) -> Self {
        Self {
            backend,
            key,
            clock,
            ttl,
            lock: Mutex::new(()),
            _rows: PhantomData,
        }
    }

    /// Read every row.
    ///
    /// An expired or unreadable envelope is deleted and treated as empty.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read or the expired
    /// envelope cannot be deleted.
    pub async fn get(&self) -> Result<Vec<T>, StorageError> {
        let _held = self.lock.lock().await;
        self.load().await
    }

    /// Add a row, merging it into an existing row for the same logical item.
    ///
    /// Returns the row as stored (the merged row when deduplicated).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the collection cannot be read or written.
    pub async fn put(&self, row: T) -> Result<T, StorageError> {
        self.upsert(row, self.ttl).await
    }

    /// Like [`put`](Self::put) but with an explicit lifetime for the rewritten
    /// envelope. A negative `ttl` writes an already-expired envelope.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the collection cannot be read or written.
    pub async fn put_with_ttl(&self, row: T, ttl: TimeDelta) -> Result<T, StorageError> {
        self.upsert(row, ttl).await
    }

    /// Apply `f` to the row with `id`.
    ///
    /// Returns the updated row, or `None` if no such row exists.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the collection cannot be read or written.
    pub async fn update<F>(&self, id: &ItemId, f: F) -> Result<Option<T>, StorageError>
    where
        F: FnOnce(&mut T) + Send,
    {
        let now = self.clock.now();
        self.edit(|rows| {
            let row = rows.iter_mut().find(|r| r.id() == id)?;
            f(row);
            row.touch(now);
            Some(row.clone())
        })
        .await
    }

    /// Remove the row with `id`, returning it if it existed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the collection cannot be read or written.
    pub async fn remove(&self, id: &ItemId) -> Result<Option<T>, StorageError> {
        self.edit(|rows| {
            let index = position(rows, id)?;
            Some(rows.remove(index))
        })
        .await
    }

    /// Run `f` over the whole collection as one read-modify-write.
    ///
    /// The collection is written back only when `f` returns `Some`; an empty
    /// result deletes it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the collection cannot be read or written.
    pub async fn edit<F, R>(&self, f: F) -> Result<Option<R>, StorageError>
    where
        F: FnOnce(&mut Vec<T>) -> Option<R> + Send,
        R: Send,
    {
        let _held = self.lock.lock().await;
        let mut rows = self.load().await?;
        let Some(result) = f(&mut rows) else {
            return Ok(None);
        };
        self.store(&rows, self.ttl).await?;
        Ok(Some(result))
    }

    /// Delete the collection.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend delete fails.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let _held = self.lock.lock().await;
        self.backend.delete(self.key).await
    }

    /// Overwrite the collection with `rows` (deleting it when empty).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the collection cannot be written.
    pub async fn replace_all(&self, rows: &[T]) -> Result<(), StorageError> {
        let _held = self.lock.lock().await;
        self.store(rows, self.ttl).await
    }

    async fn upsert(&self, row: T, ttl: TimeDelta) -> Result<T, StorageError> {
        let _held = self.lock.lock().await;
        let now = self.clock.now();
        let mut rows = self.load().await?;

        let stored = if let Some(existing) = rows.iter_mut().find(|r| r.same_row(&row)) {
            existing.absorb(row);
            existing.touch(now);
            existing.clone()
        } else {
            let mut row = row;
            row.touch(now);
            rows.push(row.clone());
            row
        };

        self.store(&rows, ttl).await?;
        Ok(stored)
    }

    /// Read without taking the lock; callers hold it.
    async fn load(&self) -> Result<Vec<T>, StorageError> {
        let Some(raw) = self.backend.read(self.key).await? else {
            return Ok(Vec::new());
        };

        let record: GuestRecord<Vec<T>> = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(key = self.key, error = %e, "Discarding unreadable guest record");
                self.backend.delete(self.key).await?;
                return Ok(Vec::new());
            }
        };

        if record.is_expired(self.clock.now()) {
            debug!(key = self.key, expires_at = %record.expires_at, "Evicting expired guest record");
            self.backend.delete(self.key).await?;
            return Ok(Vec::new());
        }

        Ok(record.data)
    }

    /// Write without taking the lock; callers hold it.
    async fn store(&self, rows: &[T], ttl: TimeDelta) -> Result<(), StorageError> {
        if rows.is_empty() {
            return self.backend.delete(self.key).await;
        }
        let record = GuestRecord::new(rows, self.clock.now(), ttl);
        let raw = serde_json::to_string(&record)?;
        self.backend.write(self.key, &raw).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::guest::{DEFAULT_TTL_DAYS, MemoryBackend, keys};
    use crate::testing::ManualClock;
    use hearthwood_core::{CartItem, NewCartItem, NewWishlistItem, WishlistItem};

    fn cart_store(clock: Arc<ManualClock>) -> (Arc<MemoryBackend>, GuestStore<CartItem>) {
        let backend = Arc::new(MemoryBackend::new());
        let store = GuestStore::new(
            backend.clone(),
            keys::CART,
            clock,
            TimeDelta::days(DEFAULT_TTL_DAYS),
        );
        (backend, store)
    }

    fn cart_row(variant: &str, color: Option<&str>, qty: u32, now: DateTime<Utc>) -> CartItem {
        let mut new = NewCartItem::new(variant, qty, Decimal::from(10));
        new.color = color.map(String::from);
        CartItem::from_new(ItemId::generate_guest(), &new, now)
    }

    #[tokio::test]
    async fn test_put_merges_same_variant_and_color() {
        let clock = Arc::new(ManualClock::epoch());
        let (_, store) = cart_store(clock.clone());

        let first = store
            .put(cart_row("sku-a", Some("oak"), 2, clock.now()))
            .await
            .unwrap();
        clock.advance(TimeDelta::minutes(5));
        let merged = store
            .put(cart_row("sku-a", Some("oak"), 3, clock.now()))
            .await
            .unwrap();

        let rows = store.get().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantity, 5);
        assert_eq!(merged.id, first.id);
        assert_eq!(rows[0].updated_at, clock.now());
    }

    #[tokio::test]
    async fn test_put_keeps_distinct_colors_apart() {
        let clock = Arc::new(ManualClock::epoch());
        let (_, store) = cart_store(clock.clone());

        store.put(cart_row("sku-a", Some("oak"), 1, clock.now())).await.unwrap();
        store.put(cart_row("sku-a", Some("ash"), 1, clock.now())).await.unwrap();
        store.put(cart_row("sku-a", None, 1, clock.now())).await.unwrap();

        assert_eq!(store.get().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_wishlist_merges_on_variant_only() {
        let clock = Arc::new(ManualClock::epoch());
        let backend = Arc::new(MemoryBackend::new());
        let store: GuestStore<WishlistItem> = GuestStore::new(
            backend,
            keys::WISHLIST,
            clock.clone(),
            TimeDelta::days(DEFAULT_TTL_DAYS),
        );

        let mut new = NewWishlistItem::new("sku-lamp", Decimal::from(40));
        new.color = Some("brass".to_string());
        store
            .put(WishlistItem::from_new(ItemId::generate_guest(), &new, clock.now()))
            .await
            .unwrap();
        new.color = Some("black".to_string());
        store
            .put(WishlistItem::from_new(ItemId::generate_guest(), &new, clock.now()))
            .await
            .unwrap();

        let rows = store.get().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].color.as_deref(), Some("black"));
    }

    #[tokio::test]
    async fn test_expired_record_is_evicted_on_read() {
        let clock = Arc::new(ManualClock::epoch());
        let (backend, store) = cart_store(clock.clone());

        store
            .put_with_ttl(cart_row("sku-a", None, 1, clock.now()), TimeDelta::days(-1))
            .await
            .unwrap();
        assert!(backend.read(keys::CART).await.unwrap().is_some());

        assert!(store.get().await.unwrap().is_empty());
        assert!(backend.read(keys::CART).await.unwrap().is_none());
        assert!(store.get().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_expires_after_ttl() {
        let clock = Arc::new(ManualClock::epoch());
        let (_, store) = cart_store(clock.clone());

        store.put(cart_row("sku-a", None, 1, clock.now())).await.unwrap();
        clock.advance(TimeDelta::days(29));
        assert_eq!(store.get().await.unwrap().len(), 1);
        clock.advance(TimeDelta::days(1));
        assert!(store.get().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_record_is_discarded() {
        let clock = Arc::new(ManualClock::epoch());
        let (backend, store) = cart_store(clock);

        backend.write(keys::CART, "not json").await.unwrap();
        assert!(store.get().await.unwrap().is_empty());
        assert!(backend.read(keys::CART).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let clock = Arc::new(ManualClock::epoch());
        let (_, store) = cart_store(clock.clone());

        let row = store.put(cart_row("sku-a", None, 1, clock.now())).await.unwrap();
        let updated = store
            .update(&row.id, |r| r.quantity = 7)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.quantity, 7);

        assert!(store.update(&ItemId::new("missing"), |_| {}).await.unwrap().is_none());
        assert!(store.remove(&ItemId::new("missing")).await.unwrap().is_none());

        let removed = store.remove(&row.id).await.unwrap().unwrap();
        assert_eq!(removed.quantity, 7);
        assert!(store.get().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_all_with_empty_clears() {
        let clock = Arc::new(ManualClock::epoch());
        let (backend, store) = cart_store(clock.clone());

        store.put(cart_row("sku-a", None, 1, clock.now())).await.unwrap();
        store.replace_all(&[]).await.unwrap();
        assert!(backend.read(keys::CART).await.unwrap().is_none());
    }

    /// Yields inside every call so overlapping store operations interleave.
    #[derive(Default)]
    struct YieldingBackend {
        inner: MemoryBackend,
    }

    #[async_trait::async_trait]
    impl GuestBackend for YieldingBackend {
        async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
            let value = self.inner.read(key).await;
            tokio::task::yield_now().await;
            value
        }

        async fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
            tokio::task::yield_now().await;
            self.inner.write(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            tokio::task::yield_now().await;
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_puts_keep_both_rows() {
        let clock = Arc::new(ManualClock::epoch());
        let store: GuestStore<CartItem> = GuestStore::new(
            Arc::new(YieldingBackend::default()),
            keys::CART,
            clock.clone(),
            TimeDelta::days(DEFAULT_TTL_DAYS),
        );

        let (a, b) = tokio::join!(
            store.put(cart_row("sku-a", None, 1, clock.now())),
            store.put(cart_row("sku-b", None, 1, clock.now()))
        );
        a.unwrap();
        b.unwrap();

        let rows = store.get().await.unwrap();
        assert_eq!(rows.len(), 2);
        let first = rows
            .iter()
            .find(|row| row.variant_id.as_str() == "sku-a")
            .unwrap()
            .id
            .clone();

        let (removed, updated) = tokio::join!(
            store.remove(&first),
            store.put(cart_row("sku-b", None, 2, clock.now()))
        );
        assert!(removed.unwrap().is_some());
        assert_eq!(updated.unwrap().quantity, 3);

        let rows = store.get().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].variant_id.as_str(), "sku-b");
        assert_eq!(rows[0].quantity, 3);
    }

    #[tokio::test]
    async fn test_edit_returning_none_leaves_collection_untouched() {
        let clock = Arc::new(ManualClock::epoch());
        let (backend, store) = cart_store(clock.clone());
        store.put(cart_row("sku-a", None, 1, clock.now())).await.unwrap();
        let before = backend.read(keys::CART).await.unwrap();

        clock.advance(TimeDelta::minutes(1));
        let result: Option<()> = store
            .edit(|rows| {
                rows.clear();
                None
            })
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(backend.read(keys::CART).await.unwrap(), before);
    }
}
