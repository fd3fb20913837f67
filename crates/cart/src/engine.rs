//! The cart engine.
//!
//! [`CartEngine`] is cheaply cloneable (all state behind one `Arc`) and is the
//! only type UI code needs. Every public operation resolves the mode from the
//! session oracle exactly once, then dispatches to the matching strategy.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument};

use hearthwood_core::{CartItem, CartTotals, Discount, ItemId, NewCartItem};

use crate::clock::{Clock, SystemClock};
use crate::config::CartSyncConfig;
use crate::error::CartError;
use crate::gateway::{CartGateway, GatewayError};
use crate::guard::{BusyGuard, BusyKey, RowLocks};
use crate::guest::{GuestBackend, GuestStore, keys};
use crate::migration::{MigrationCoordinator, MigrationOutcome};
use crate::mutation::OptimisticMutator;
use crate::reconcile::Reconciler;
use crate::session::SessionOracle;
use crate::state::{CartSnapshot, CartStore, Mode};
use crate::strategy::{AuthenticatedStrategy, CartStrategy, GuestStrategy};

/// Dual-mode cart state container.
#[derive(Clone)]
pub struct CartEngine {
    inner: Arc<Inner>,
}

struct Inner {
    session: Arc<dyn SessionOracle>,
    store: Arc<CartStore>,
    guard: Arc<BusyGuard>,
    authenticated: AuthenticatedStrategy,
    guest: GuestStrategy,
    reconciler: Arc<Reconciler>,
    migration: MigrationCoordinator,
    /// Whether the current sign-in has been migrated.
    migrated: AsyncMutex<bool>,
}

impl CartEngine {
    /// Create an engine using the system clock.
    #[must_use]
    pub fn new(
        session: Arc<dyn SessionOracle>,
        gateway: Arc<dyn CartGateway>,
        backend: Arc<dyn GuestBackend>,
        config: &CartSyncConfig,
    ) -> Self {
        Self::with_clock(session, gateway, backend, config, Arc::new(SystemClock))
    }

    /// Create an engine with an explicit time source.
    #[must_use]
    pub fn with_clock(
        session: Arc<dyn SessionOracle>,
        gateway: Arc<dyn CartGateway>,
        backend: Arc<dyn GuestBackend>,
        config: &CartSyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(CartStore::new());
        let guard = Arc::new(BusyGuard::new());
        let guest_store = Arc::new(GuestStore::new(
            backend,
            keys::CART,
            clock.clone(),
            config.guest_ttl,
        ));
        let reconciler = Arc::new(Reconciler::new(gateway.clone(), store.clone(), clock.clone()));
        let locks = config
            .serialize_row_mutations
            .then(|| Arc::new(RowLocks::new()));

        let mutator = OptimisticMutator::new(
            store.clone(),
            gateway.clone(),
            reconciler.clone(),
            guard.clone(),
            locks,
            clock.clone(),
            "cart",
        );
        let migration = MigrationCoordinator::new(
            gateway,
            guest_store.clone(),
            store.clone(),
            reconciler.clone(),
            guard.clone(),
            config.migration_policy,
        );

        Self {
            inner: Arc::new(Inner {
                session,
                authenticated: AuthenticatedStrategy::new(mutator, reconciler.clone()),
                guest: GuestStrategy::new(guest_store, store.clone(), guard.clone(), clock),
                store,
                guard,
                reconciler,
                migration,
                migrated: AsyncMutex::new(false),
            }),
        }
    }

    /// Current mode, as reported by the session oracle.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.strategy().mode()
    }

    fn strategy(&self) -> &dyn CartStrategy {
        if self.inner.session.is_authenticated() {
            &self.inner.authenticated
        } else {
            &self.inner.guest
        }
    }

    /// Populate the cart from the current source of truth.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Storage` for guests or the classified gateway error
    /// for signed-in customers. Existing state is kept on failure.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<(), CartError> {
        self.strategy().load().await
    }

    /// Add units of a variant.
    ///
    /// Adding a variant already in the cart with the same color increases that
    /// row's quantity.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` for a zero quantity, otherwise the
    /// strategy's error.
    #[instrument(skip(self, item), fields(variant_id = %item.variant_id, quantity = item.quantity))]
    pub async fn add_item(&self, item: NewCartItem) -> Result<(), CartError> {
        if item.quantity == 0 {
            return Err(CartError::Validation(
                "Quantity must be at least 1".to_string(),
            ));
        }
        self.strategy().add_item(item).await
    }

    /// Set a row's quantity.
    ///
    /// Zero or below removes the row.
    ///
    /// # Errors
    ///
    /// Returns `CartError::ItemNotFound` for an unknown row,
    /// `CartError::Validation` for an out-of-range quantity, otherwise the
    /// strategy's error.
    #[instrument(skip(self, id), fields(item_id = %id))]
    pub async fn update_quantity(&self, id: &ItemId, quantity: i64) -> Result<(), CartError> {
        if quantity <= 0 {
            return self.remove_item(id).await;
        }
        let quantity = u32::try_from(quantity)
            .map_err(|_| CartError::Validation(format!("Quantity {quantity} is too large")))?;
        self.strategy().update_quantity(id, quantity).await
    }

    /// Turn assembly on or off for a row.
    ///
    /// # Errors
    ///
    /// Returns `CartError::ItemNotFound` for an unknown row, otherwise the
    /// strategy's error.
    #[instrument(skip(self, id), fields(item_id = %id))]
    pub async fn set_assembly(&self, id: &ItemId, assembly_required: bool) -> Result<(), CartError> {
        self.strategy().set_assembly(id, assembly_required).await
    }

    /// Change a row's display color.
    ///
    /// # Errors
    ///
    /// Returns `CartError::ItemNotFound` for an unknown row, otherwise the
    /// strategy's error.
    #[instrument(skip(self, id), fields(item_id = %id))]
    pub async fn update_color(&self, id: &ItemId, color: Option<String>) -> Result<(), CartError> {
        self.strategy().update_color(id, color).await
    }

    /// Delete a row.
    ///
    /// # Errors
    ///
    /// Returns `CartError::ItemNotFound` for an unknown row, otherwise the
    /// strategy's error.
    #[instrument(skip(self, id), fields(item_id = %id))]
    pub async fn remove_item(&self, id: &ItemId) -> Result<(), CartError> {
        self.strategy().remove_item(id).await
    }

    /// Delete every row.
    ///
    /// # Errors
    ///
    /// Returns the strategy's error; the cart is restored on failure.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<(), CartError> {
        self.strategy().clear().await
    }

    /// Replace the aggregate with the remote cart.
    ///
    /// # Errors
    ///
    /// Returns the classified gateway error; state is untouched on failure.
    pub async fn reconcile(&self) -> Result<(), CartError> {
        self.inner.reconciler.reconcile().await
    }

    /// Upload the guest cart to the customer's account.
    ///
    /// Prefer [`handle_login`](Self::handle_login), which runs this at most once
    /// per sign-in.
    ///
    /// # Errors
    ///
    /// Returns the migration error; guest rows are kept on failure.
    pub async fn migrate_on_login(&self) -> Result<MigrationOutcome, CartError> {
        self.inner.migration.migrate_on_login().await
    }

    /// React to a sign-in.
    ///
    /// Runs the guest cart migration unless it already ran for this sign-in,
    /// in which case `None` is returned. A failed migration leaves the sign-in
    /// pending so the next call retries it. Check
    /// [`MigrationOutcome::guest_cleared`]: when it is `false` the rows are on
    /// the server but a copy is still in the guest store.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Auth` if the session is not authenticated, or the
    /// migration error.
    #[instrument(skip(self))]
    pub async fn handle_login(&self) -> Result<Option<MigrationOutcome>, CartError> {
        let mut migrated = self.inner.migrated.lock().await;
        if !self.inner.session.is_authenticated() {
            return Err(CartError::Auth(GatewayError::MissingCredential));
        }
        if *migrated {
            return Ok(None);
        }

        let outcome = self.inner.migration.migrate_on_login().await?;
        *migrated = true;
        info!(
            accepted = outcome.accepted,
            retained = outcome.retained,
            guest_cleared = outcome.guest_cleared,
            "Login transition complete"
        );
        Ok(Some(outcome))
    }

    /// React to a sign-out: drop the remote cart and show the guest cart.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Storage` if the guest store cannot be read.
    #[instrument(skip(self))]
    pub async fn handle_logout(&self) -> Result<(), CartError> {
        let mut migrated = self.inner.migrated.lock().await;
        *migrated = false;
        self.inner.store.reset();
        self.inner.guest.load().await
    }

    /// Set the externally validated discount.
    pub fn apply_discount(&self, discount: Discount) {
        self.inner.store.set_discount(Some(discount));
    }

    pub fn clear_discount(&self) {
        self.inner.store.set_discount(None);
    }

    /// Owned view of the cart.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        self.inner.store.snapshot(self.mode())
    }

    #[must_use]
    pub fn items(&self) -> Vec<CartItem> {
        self.inner.store.items()
    }

    #[must_use]
    pub fn totals(&self) -> CartTotals {
        self.inner.store.totals()
    }

    /// Last recorded user-facing error.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.inner.store.error()
    }

    /// Whether a mutation on `id` is in flight.
    #[must_use]
    pub fn is_busy(&self, id: &ItemId) -> bool {
        self.inner.guard.is_busy(&BusyKey::from(id))
    }

    /// The busy marks, including the global one used by add and clear.
    #[must_use]
    pub fn guard(&self) -> &BusyGuard {
        &self.inner.guard
    }
}
