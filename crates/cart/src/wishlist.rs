//! The wishlist engine.
//!
//! Same shape as the cart: guest rows in the durable store, optimistic
//! mutations against the remote API once signed in, one batch migration at
//! login. Wishlist rows carry no quantity and are keyed on `variant_id` alone.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, instrument, warn};

use hearthwood_core::{ItemId, NewWishlistItem, VariantId, WishlistItem};

use crate::clock::{Clock, SystemClock};
use crate::config::CartSyncConfig;
use crate::error::CartError;
use crate::gateway::{GatewayError, WishlistGateway};
use crate::guard::{BusyGuard, BusyKey, RowLocks};
use crate::guest::{GuestBackend, GuestStore, keys};
use crate::migration::{MigrationOutcome, MigrationPolicy, settle};
use crate::mutation::{OptimisticCommand, OptimisticMutator, Reconcile, SyncedList};
use crate::row::{SyncedRow, position, reinsert, restore, restore_all};
use crate::session::SessionOracle;
use crate::state::Mode;
use crate::telemetry;

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Default)]
struct WishlistState {
    items: Vec<WishlistItem>,
    last_synced_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// Owned, comparable view of the wishlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WishlistSnapshot {
    pub mode: Mode,
    pub items: Vec<WishlistItem>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// In-memory wishlist aggregate.
#[derive(Debug, Default)]
pub struct WishlistStore {
    state: Mutex<WishlistState>,
}

impl WishlistStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WishlistState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn replace_items(&self, items: Vec<WishlistItem>) {
        self.lock().items = items;
    }

    /// Replace the rows with the server's and stamp the sync time.
    pub fn reconcile_with(&self, items: Vec<WishlistItem>, synced_at: DateTime<Utc>) {
        let mut state = self.lock();
        state.items = items;
        state.last_synced_at = Some(synced_at);
        state.error = None;
    }

    pub fn reset(&self) {
        *self.lock() = WishlistState::default();
    }

    #[must_use]
    pub fn items(&self) -> Vec<WishlistItem> {
        self.lock().items.clone()
    }

    /// Id of the row holding `variant_id`, if any.
    #[must_use]
    pub fn find(&self, variant_id: &VariantId) -> Option<ItemId> {
        self.lock()
            .items
            .iter()
            .find(|item| item.variant_id == *variant_id)
            .map(|item| item.id.clone())
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    #[must_use]
    pub fn snapshot(&self, mode: Mode) -> WishlistSnapshot {
        let state = self.lock();
        WishlistSnapshot {
            mode,
            items: state.items.clone(),
            last_synced_at: state.last_synced_at,
            error: state.error.clone(),
        }
    }
}

impl SyncedList for WishlistStore {
    type Item = WishlistItem;

    fn mutate<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut Vec<WishlistItem>) -> R,
    {
        f(&mut self.lock().items)
    }

    fn set_error(&self, message: String) {
        self.lock().error = Some(message);
    }

    fn clear_error(&self) {
        self.lock().error = None;
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Re-fetches the remote wishlist into a [`WishlistStore`].
pub struct WishlistReconciler {
    gateway: Arc<dyn WishlistGateway>,
    store: Arc<WishlistStore>,
    clock: Arc<dyn Clock>,
}

impl WishlistReconciler {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn WishlistGateway>,
        store: Arc<WishlistStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            store,
            clock,
        }
    }
}

#[async_trait]
impl Reconcile for WishlistReconciler {
    #[instrument(skip(self))]
    async fn reconcile(&self) -> Result<(), CartError> {
        match self.gateway.fetch_wishlist().await {
            Ok(lines) => {
                let items: Vec<WishlistItem> = lines.into_iter().map(WishlistItem::from).collect();
                debug!(lines = items.len(), "Wishlist reconciled");
                self.store.reconcile_with(items, self.clock.now());
                Ok(())
            }
            Err(e) => {
                let err = CartError::from(e);
                error!(error = %err, "Failed to fetch wishlist");
                self.store.set_error(err.user_message());
                telemetry::capture_error(&err);
                Err(err)
            }
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Undo information for a wishlist add.
#[derive(Debug)]
pub enum AddWishlistUndo {
    Inserted(ItemId),
    Refreshed(WishlistItem),
}

/// Save a variant.
#[derive(Debug, Clone)]
pub struct AddWishlistItem {
    pub item: NewWishlistItem,
    pub pending_id: ItemId,
}

#[async_trait]
impl OptimisticCommand for AddWishlistItem {
    type Item = WishlistItem;
    type Gateway = dyn WishlistGateway;
    type Undo = AddWishlistUndo;

    fn name(&self) -> &'static str {
        "add_wishlist_item"
    }

    fn target(&self) -> BusyKey {
        BusyKey::Global
    }

    fn apply_local(
        &self,
        items: &mut Vec<WishlistItem>,
        now: DateTime<Utc>,
    ) -> Result<AddWishlistUndo, CartError> {
        let row = WishlistItem::from_new(self.pending_id.clone(), &self.item, now);
        if let Some(existing) = items.iter_mut().find(|r| r.same_row(&row)) {
            let previous = existing.clone();
            existing.absorb(row);
            existing.touch(now);
            return Ok(AddWishlistUndo::Refreshed(previous));
        }
        items.push(row);
        Ok(AddWishlistUndo::Inserted(self.pending_id.clone()))
    }

    async fn confirm_remote(&self, gateway: &Self::Gateway) -> Result<(), GatewayError> {
        gateway.add_item(&self.item).await
    }

    fn compensate(&self, items: &mut Vec<WishlistItem>, undo: AddWishlistUndo) {
        match undo {
            AddWishlistUndo::Inserted(id) => items.retain(|row| row.id != id),
            AddWishlistUndo::Refreshed(previous) => restore(items, previous),
        }
    }
}

/// Drop a saved variant.
#[derive(Debug, Clone)]
pub struct RemoveWishlistItem {
    pub id: ItemId,
}

#[async_trait]
impl OptimisticCommand for RemoveWishlistItem {
    type Item = WishlistItem;
    type Gateway = dyn WishlistGateway;
    type Undo = (usize, WishlistItem);

    fn name(&self) -> &'static str {
        "remove_wishlist_item"
    }

    fn target(&self) -> BusyKey {
        BusyKey::from(&self.id)
    }

    fn apply_local(
        &self,
        items: &mut Vec<WishlistItem>,
        _now: DateTime<Utc>,
    ) -> Result<(usize, WishlistItem), CartError> {
        let index =
            position(items, &self.id).ok_or_else(|| CartError::ItemNotFound(self.id.clone()))?;
        Ok((index, items.remove(index)))
    }

    async fn confirm_remote(&self, gateway: &Self::Gateway) -> Result<(), GatewayError> {
        gateway.remove_item(&self.id).await
    }

    fn compensate(&self, items: &mut Vec<WishlistItem>, (index, row): (usize, WishlistItem)) {
        reinsert(items, index, row);
    }
}

/// Drop every saved variant.
#[derive(Debug, Clone, Copy)]
pub struct ClearWishlist;

#[async_trait]
impl OptimisticCommand for ClearWishlist {
    type Item = WishlistItem;
    type Gateway = dyn WishlistGateway;
    type Undo = Vec<WishlistItem>;

    fn name(&self) -> &'static str {
        "clear_wishlist"
    }

    fn target(&self) -> BusyKey {
        BusyKey::Global
    }

    fn apply_local(
        &self,
        items: &mut Vec<WishlistItem>,
        _now: DateTime<Utc>,
    ) -> Result<Vec<WishlistItem>, CartError> {
        Ok(std::mem::take(items))
    }

    async fn confirm_remote(&self, gateway: &Self::Gateway) -> Result<(), GatewayError> {
        gateway.clear_wishlist().await
    }

    fn compensate(&self, items: &mut Vec<WishlistItem>, previous: Vec<WishlistItem>) {
        restore_all(items, previous);
    }
}

// =============================================================================
// Strategies
// =============================================================================

#[async_trait]
trait WishlistStrategy: Send + Sync {
    fn mode(&self) -> Mode;
    async fn load(&self) -> Result<(), CartError>;
    async fn add(&self, item: NewWishlistItem) -> Result<(), CartError>;
    async fn remove(&self, id: &ItemId) -> Result<(), CartError>;
    async fn clear(&self) -> Result<(), CartError>;
}

struct RemoteWishlist {
    mutator: OptimisticMutator<WishlistStore, dyn WishlistGateway>,
    reconciler: Arc<WishlistReconciler>,
}

#[async_trait]
impl WishlistStrategy for RemoteWishlist {
    fn mode(&self) -> Mode {
        Mode::Authenticated
    }

    async fn load(&self) -> Result<(), CartError> {
        self.reconciler.reconcile().await
    }

    async fn add(&self, item: NewWishlistItem) -> Result<(), CartError> {
        self.mutator
            .perform(AddWishlistItem {
                item,
                pending_id: ItemId::generate_pending(),
            })
            .await
    }

    async fn remove(&self, id: &ItemId) -> Result<(), CartError> {
        self.mutator
            .perform(RemoveWishlistItem { id: id.clone() })
            .await
    }

    async fn clear(&self) -> Result<(), CartError> {
        self.mutator.perform(ClearWishlist).await
    }
}

struct GuestWishlist {
    guest: Arc<GuestStore<WishlistItem>>,
    store: Arc<WishlistStore>,
    guard: Arc<BusyGuard>,
    clock: Arc<dyn Clock>,
}

impl GuestWishlist {
    async fn reload(&self) -> Result<(), CartError> {
        let rows = self.guest.get().await?;
        self.store.replace_items(rows);
        Ok(())
    }

    async fn guarded<F>(&self, name: &'static str, key: BusyKey, op: F) -> Result<(), CartError>
    where
        F: Future<Output = Result<(), CartError>> + Send,
    {
        let _busy = self.guard.mark(key);
        self.store.clear_error();
        telemetry::add_breadcrumb("wishlist", name, Some(&[("mode", "guest")]));

        let result = match op.await {
            Ok(()) => self.reload().await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            self.store.set_error(e.user_message());
            telemetry::capture_error(e);
        }
        result
    }
}

#[async_trait]
impl WishlistStrategy for GuestWishlist {
    fn mode(&self) -> Mode {
        Mode::Guest
    }

    async fn load(&self) -> Result<(), CartError> {
        let result = self.reload().await;
        if let Err(e) = &result {
            self.store.set_error(e.user_message());
        }
        result
    }

    async fn add(&self, item: NewWishlistItem) -> Result<(), CartError> {
        self.guarded("add_wishlist_item", BusyKey::Global, async {
            let row = WishlistItem::from_new(ItemId::generate_guest(), &item, self.clock.now());
            self.guest.put(row).await?;
            Ok::<(), CartError>(())
        })
        .await
    }

    async fn remove(&self, id: &ItemId) -> Result<(), CartError> {
        self.guarded("remove_wishlist_item", BusyKey::from(id), async {
            self.guest
                .remove(id)
                .await?
                .ok_or_else(|| CartError::ItemNotFound(id.clone()))?;
            Ok::<(), CartError>(())
        })
        .await
    }

    async fn clear(&self) -> Result<(), CartError> {
        self.guarded("clear_wishlist", BusyKey::Global, async {
            self.guest.clear().await?;
            Ok::<(), CartError>(())
        })
        .await
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Dual-mode wishlist state container.
#[derive(Clone)]
pub struct WishlistEngine {
    inner: Arc<WishlistInner>,
}

struct WishlistInner {
    session: Arc<dyn SessionOracle>,
    gateway: Arc<dyn WishlistGateway>,
    store: Arc<WishlistStore>,
    guard: Arc<BusyGuard>,
    guest_store: Arc<GuestStore<WishlistItem>>,
    reconciler: Arc<WishlistReconciler>,
    remote: RemoteWishlist,
    guest: GuestWishlist,
    policy: MigrationPolicy,
    migrated: AsyncMutex<bool>,
}

impl WishlistEngine {
    #[must_use]
    pub fn new(
        session: Arc<dyn SessionOracle>,
        gateway: Arc<dyn WishlistGateway>,
        backend: Arc<dyn GuestBackend>,
        config: &CartSyncConfig,
    ) -> Self {
        Self::with_clock(session, gateway, backend, config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        session: Arc<dyn SessionOracle>,
        gateway: Arc<dyn WishlistGateway>,
        backend: Arc<dyn GuestBackend>,
        config: &CartSyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(WishlistStore::new());
        let guard = Arc::new(BusyGuard::new());
        let guest_store = Arc::new(GuestStore::new(
            backend,
            keys::WISHLIST,
            clock.clone(),
            config.guest_ttl,
        ));
        let reconciler = Arc::new(WishlistReconciler::new(
            gateway.clone(),
            store.clone(),
            clock.clone(),
        ));
        let mutator = OptimisticMutator::new(
            store.clone(),
            gateway.clone(),
            reconciler.clone(),
            guard.clone(),
            config
                .serialize_row_mutations
                .then(|| Arc::new(RowLocks::new())),
            clock.clone(),
            "wishlist",
        );

        Self {
            inner: Arc::new(WishlistInner {
                session,
                gateway,
                remote: RemoteWishlist {
                    mutator,
                    reconciler: reconciler.clone(),
                },
                guest: GuestWishlist {
                    guest: guest_store.clone(),
                    store: store.clone(),
                    guard: guard.clone(),
                    clock,
                },
                store,
                guard,
                guest_store,
                reconciler,
                policy: config.migration_policy,
                migrated: AsyncMutex::new(false),
            }),
        }
    }

    fn strategy(&self) -> &dyn WishlistStrategy {
        if self.inner.session.is_authenticated() {
            &self.inner.remote
        } else {
            &self.inner.guest
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.strategy().mode()
    }

    /// Populate the wishlist from the current source of truth.
    ///
    /// # Errors
    ///
    /// Returns the storage or gateway error; existing state is kept.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<(), CartError> {
        self.strategy().load().await
    }

    /// Save a variant. Saving it again refreshes the stored price and options.
    ///
    /// # Errors
    ///
    /// Returns the storage or gateway error; the wishlist is restored on
    /// failure.
    #[instrument(skip(self, item), fields(variant_id = %item.variant_id))]
    pub async fn add(&self, item: NewWishlistItem) -> Result<(), CartError> {
        self.strategy().add(item).await
    }

    /// Drop a saved row.
    ///
    /// # Errors
    ///
    /// Returns `CartError::ItemNotFound` for an unknown row, otherwise the
    /// storage or gateway error.
    #[instrument(skip(self, id), fields(item_id = %id))]
    pub async fn remove(&self, id: &ItemId) -> Result<(), CartError> {
        self.strategy().remove(id).await
    }

    /// Drop every saved row.
    ///
    /// # Errors
    ///
    /// Returns the storage or gateway error.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<(), CartError> {
        self.strategy().clear().await
    }

    /// Whether `variant_id` is saved.
    #[must_use]
    pub fn contains(&self, variant_id: &VariantId) -> bool {
        self.inner.store.find(variant_id).is_some()
    }

    /// Save the variant if absent, drop it if present.
    ///
    /// Returns whether the variant is saved afterwards.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying add or remove.
    pub async fn toggle(&self, item: NewWishlistItem) -> Result<bool, CartError> {
        match self.inner.store.find(&item.variant_id) {
            Some(id) => {
                self.remove(&id).await?;
                Ok(false)
            }
            None => {
                self.add(item).await?;
                Ok(true)
            }
        }
    }

    /// Replace the wishlist with the remote one.
    ///
    /// # Errors
    ///
    /// Returns the classified gateway error; state is untouched on failure.
    pub async fn reconcile(&self) -> Result<(), CartError> {
        self.inner.reconciler.reconcile().await
    }

    /// Upload the guest wishlist in one batch, then reconcile.
    ///
    /// If the migrated rows cannot be removed from the guest store the
    /// migration still succeeds, with `guest_cleared` unset in the outcome and
    /// the failure recorded as the wishlist's error.
    ///
    /// # Errors
    ///
    /// Returns the storage or gateway error; guest rows are kept on failure.
    #[instrument(skip(self), fields(policy = ?self.inner.policy))]
    pub async fn migrate_on_login(&self) -> Result<MigrationOutcome, CartError> {
        let inner = &self.inner;
        let _busy = inner.guard.mark(BusyKey::Global);

        let rows = inner.guest_store.get().await?;
        if rows.is_empty() {
            if let Err(e) = inner.reconciler.reconcile().await {
                warn!(error = %e, "Wishlist reconcile after login failed");
            }
            return Ok(MigrationOutcome::default());
        }

        let report = match inner.gateway.merge_batch(&rows).await {
            Ok(report) => report,
            Err(e) => {
                let err = CartError::from(e);
                error!(rows = rows.len(), error = %err, "Guest wishlist migration failed, guest rows kept");
                inner.store.set_error(err.user_message());
                telemetry::capture_error(&err);
                return Err(err);
            }
        };

        let (mut outcome, retained) = settle(inner.policy, rows, &report);
        let cleanup = inner.guest_store.replace_all(&retained).await;
        outcome.guest_cleared = cleanup.is_ok();
        info!(submitted = outcome.submitted, accepted = outcome.accepted, "Guest wishlist migrated");

        if let Err(e) = inner.reconciler.reconcile().await {
            warn!(error = %e, "Wishlist reconcile after migration failed");
        }

        if let Err(e) = cleanup {
            let err = CartError::from(e);
            error!(error = %err, "Failed to remove migrated rows from the guest wishlist");
            inner.store.set_error(err.user_message());
            telemetry::capture_error(&err);
        }
        Ok(outcome)
    }

    /// Migrate the guest wishlist unless already done for this sign-in.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Auth` if the session is not authenticated, or the
    /// migration error.
    pub async fn handle_login(&self) -> Result<Option<MigrationOutcome>, CartError> {
        let mut migrated = self.inner.migrated.lock().await;
        if !self.inner.session.is_authenticated() {
            return Err(CartError::Auth(GatewayError::MissingCredential));
        }
        if *migrated {
            return Ok(None);
        }
        let outcome = self.migrate_on_login().await?;
        *migrated = true;
        Ok(Some(outcome))
    }

    /// Drop the remote wishlist and show the guest one.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Storage` if the guest store cannot be read.
    pub async fn handle_logout(&self) -> Result<(), CartError> {
        let mut migrated = self.inner.migrated.lock().await;
        *migrated = false;
        self.inner.store.reset();
        self.inner.guest.load().await
    }

    #[must_use]
    pub fn snapshot(&self) -> WishlistSnapshot {
        self.inner.store.snapshot(self.mode())
    }

    #[must_use]
    pub fn items(&self) -> Vec<WishlistItem> {
        self.inner.store.items()
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.inner.store.error()
    }

    #[must_use]
    pub fn is_busy(&self, id: &ItemId) -> bool {
        self.inner.guard.is_busy(&BusyKey::from(id))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use secrecy::SecretString;

    use super::*;
    use crate::guest::MemoryBackend;
    use crate::session::StaticSession;
    use crate::testing::{Failure, GatewayOp, InMemoryWishlistGateway, ManualClock};

    fn fixture() -> (Arc<StaticSession>, Arc<InMemoryWishlistGateway>, WishlistEngine) {
        let clock = Arc::new(ManualClock::epoch());
        let session = Arc::new(StaticSession::anonymous());
        let gateway = Arc::new(InMemoryWishlistGateway::new(clock.clone()));
        let engine = WishlistEngine::with_clock(
            session.clone(),
            gateway.clone(),
            Arc::new(MemoryBackend::new()),
            &CartSyncConfig::default(),
            clock,
        );
        (session, gateway, engine)
    }

    fn lamp(price: i64) -> NewWishlistItem {
        NewWishlistItem::new("sku-lamp", Decimal::from(price))
    }

    #[tokio::test]
    async fn test_guest_add_dedupes_on_variant() {
        let (_, _, engine) = fixture();
        engine.add(lamp(40)).await.unwrap();
        engine.add(lamp(35)).await.unwrap();

        let items = engine.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].unit_price, Decimal::from(35));
        assert!(engine.contains(&VariantId::new("sku-lamp")));
    }

    #[tokio::test]
    async fn test_toggle() {
        let (_, _, engine) = fixture();
        assert!(engine.toggle(lamp(40)).await.unwrap());
        assert!(!engine.toggle(lamp(40)).await.unwrap());
        assert!(engine.items().is_empty());
    }

    #[tokio::test]
    async fn test_authenticated_remove_rolls_back_on_failure() {
        let (session, gateway, engine) = fixture();
        session.login(SecretString::from("cust_token"));
        gateway.seed(lamp(40));
        engine.load().await.unwrap();
        let before = engine.items();

        gateway.fail(GatewayOp::RemoveItem, Failure::Unavailable);
        let err = engine.remove(&before[0].id).await.unwrap_err();

        assert!(matches!(err, CartError::Gateway(_)));
        assert_eq!(engine.items(), before);
        assert!(!engine.is_busy(&before[0].id));
        assert!(engine.error().is_some());
    }

    #[tokio::test]
    async fn test_login_migrates_once() {
        let (session, gateway, engine) = fixture();
        engine.add(lamp(40)).await.unwrap();
        session.login(SecretString::from("cust_token"));

        let outcome = engine.handle_login().await.unwrap().unwrap();
        assert_eq!(outcome.accepted, 1);
        assert!(engine.handle_login().await.unwrap().is_none());
        assert_eq!(gateway.calls(GatewayOp::MergeBatch), 1);
        assert_eq!(engine.items()[0].id, ItemId::new("wish-1"));
        assert_eq!(engine.mode(), Mode::Authenticated);
    }

    #[tokio::test]
    async fn test_failed_migration_keeps_guest_rows_and_retries() {
        let (session, gateway, engine) = fixture();
        engine.add(lamp(40)).await.unwrap();
        session.login(SecretString::from("cust_token"));

        gateway.fail(GatewayOp::MergeBatch, Failure::Unavailable);
        assert!(engine.handle_login().await.is_err());

        gateway.recover(GatewayOp::MergeBatch);
        let outcome = engine.handle_login().await.unwrap().unwrap();
        assert_eq!(outcome.submitted, 1);
        assert_eq!(gateway.lines().len(), 1);
    }
}
