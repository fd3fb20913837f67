//! Guest and authenticated cart strategies.
//!
//! The engine resolves the mode once at the top of each public call and hands
//! the operation to one of these. Both expose the same interface, so no
//! operation carries its own mode branching.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use hearthwood_core::{CartItem, ItemId, NewCartItem};

use crate::clock::Clock;
use crate::error::CartError;
use crate::gateway::CartGateway;
use crate::guard::{BusyGuard, BusyKey};
use crate::guest::GuestStore;
use crate::mutation::{
    AddItem, ClearCart, OptimisticMutator, RemoveItem, SetAssembly, SyncedList, UpdateColor,
    UpdateQuantity,
};
use crate::reconcile::Reconciler;
use crate::row::{SyncedRow, position};
use crate::state::{CartStore, Mode};
use crate::telemetry;

/// Cart operations against one source of truth.
#[async_trait]
pub trait CartStrategy: Send + Sync {
    fn mode(&self) -> Mode;

    /// Populate the aggregate from the source of truth.
    async fn load(&self) -> Result<(), CartError>;

    async fn add_item(&self, item: NewCartItem) -> Result<(), CartError>;

    /// Set a row's quantity; `quantity` is at least 1.
    async fn update_quantity(&self, id: &ItemId, quantity: u32) -> Result<(), CartError>;

    async fn set_assembly(&self, id: &ItemId, assembly_required: bool) -> Result<(), CartError>;

    async fn update_color(&self, id: &ItemId, color: Option<String>) -> Result<(), CartError>;

    async fn remove_item(&self, id: &ItemId) -> Result<(), CartError>;

    async fn clear(&self) -> Result<(), CartError>;
}

// =============================================================================
// Authenticated
// =============================================================================

/// Optimistic mutations against the remote cart API.
pub struct AuthenticatedStrategy {
    mutator: OptimisticMutator<CartStore, dyn CartGateway>,
    reconciler: Arc<Reconciler>,
}

impl AuthenticatedStrategy {
    #[must_use]
    pub const fn new(
        mutator: OptimisticMutator<CartStore, dyn CartGateway>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            mutator,
            reconciler,
        }
    }
}

#[async_trait]
impl CartStrategy for AuthenticatedStrategy {
    fn mode(&self) -> Mode {
        Mode::Authenticated
    }

    async fn load(&self) -> Result<(), CartError> {
        self.reconciler.reconcile().await
    }

    async fn add_item(&self, item: NewCartItem) -> Result<(), CartError> {
        self.mutator.perform(AddItem::new(item)).await
    }

    async fn update_quantity(&self, id: &ItemId, quantity: u32) -> Result<(), CartError> {
        self.mutator
            .perform(UpdateQuantity {
                id: id.clone(),
                quantity,
            })
            .await
    }

    async fn set_assembly(&self, id: &ItemId, assembly_required: bool) -> Result<(), CartError> {
        self.mutator
            .perform(SetAssembly {
                id: id.clone(),
                assembly_required,
            })
            .await
    }

    async fn update_color(&self, id: &ItemId, color: Option<String>) -> Result<(), CartError> {
        self.mutator
            .perform(UpdateColor {
                id: id.clone(),
                color,
            })
            .await
    }

    async fn remove_item(&self, id: &ItemId) -> Result<(), CartError> {
        self.mutator.perform(RemoveItem { id: id.clone() }).await
    }

    async fn clear(&self) -> Result<(), CartError> {
        self.mutator.perform(ClearCart).await
    }
}

// =============================================================================
// Guest
// =============================================================================

/// Direct writes to the durable guest store; no network calls.
///
/// Each write is followed by a reload of the aggregate from the store, so the
/// aggregate always mirrors what was persisted.
pub struct GuestStrategy {
    guest: Arc<GuestStore<CartItem>>,
    store: Arc<CartStore>,
    guard: Arc<BusyGuard>,
    clock: Arc<dyn Clock>,
}

impl GuestStrategy {
    #[must_use]
    pub fn new(
        guest: Arc<GuestStore<CartItem>>,
        store: Arc<CartStore>,
        guard: Arc<BusyGuard>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            guest,
            store,
            guard,
            clock,
        }
    }

    async fn reload(&self) -> Result<(), CartError> {
        let rows = self.guest.get().await?;
        debug!(rows = rows.len(), "Guest cart loaded");
        self.store.replace_items(rows);
        Ok(())
    }

    /// Run a guest write with `key` marked busy, then reload.
    async fn guarded<F>(&self, name: &'static str, key: BusyKey, op: F) -> Result<(), CartError>
    where
        F: Future<Output = Result<(), CartError>> + Send,
    {
        let _busy = self.guard.mark(key.clone());
        self.store.clear_error();
        let target = key.to_string();
        telemetry::add_breadcrumb("cart", name, Some(&[("target", target.as_str()), ("mode", "guest")]));

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

fn not_found(id: &ItemId) -> CartError {
    CartError::ItemNotFound(id.clone())
}

#[async_trait]
impl CartStrategy for GuestStrategy {
    fn mode(&self) -> Mode {
        Mode::Guest
    }

    async fn load(&self) -> Result<(), CartError> {
        let result = self.reload().await;
        if let Err(e) = &result {
            self.store.set_error(e.user_message());
            telemetry::capture_error(e);
        }
        result
    }

    async fn add_item(&self, item: NewCartItem) -> Result<(), CartError> {
        self.guarded("add_item", BusyKey::Global, async {
            let row = CartItem::from_new(ItemId::generate_guest(), &item, self.clock.now());
            self.guest.put(row).await?;
            Ok::<(), CartError>(())
        })
        .await
    }

    async fn update_quantity(&self, id: &ItemId, quantity: u32) -> Result<(), CartError> {
        self.guarded("update_quantity", BusyKey::from(id), async {
            self.guest
                .update(id, |row| row.quantity = quantity)
                .await?
                .ok_or_else(|| not_found(id))?;
            Ok::<(), CartError>(())
        })
        .await
    }

    async fn set_assembly(&self, id: &ItemId, assembly_required: bool) -> Result<(), CartError> {
        self.guarded("set_assembly", BusyKey::from(id), async {
            self.guest
                .update(id, |row| row.assembly_required = assembly_required)
                .await?
                .ok_or_else(|| not_found(id))?;
            Ok::<(), CartError>(())
        })
        .await
    }

    /// Re-keys the row on `(variant_id, color)`; if another row already has the
    /// new color, the two are merged.
    async fn update_color(&self, id: &ItemId, color: Option<String>) -> Result<(), CartError> {
        self.guarded("update_color", BusyKey::from(id), async {
            let now = self.clock.now();
            self.guest
                .edit(|rows| {
                    let index = position(rows, id)?;
                    let mut row = rows.remove(index);
                    row.color = color;
                    row.touch(now);

                    if let Some(existing) = rows.iter_mut().find(|r| r.same_row(&row)) {
                        existing.absorb(row);
                        existing.touch(now);
                    } else {
                        rows.insert(index, row);
                    }
                    Some(())
                })
                .await?
                .ok_or_else(|| not_found(id))?;
            Ok::<(), CartError>(())
        })
        .await
    }

    async fn remove_item(&self, id: &ItemId) -> Result<(), CartError> {
        self.guarded("remove_item", BusyKey::from(id), async {
            self.guest.remove(id).await?.ok_or_else(|| not_found(id))?;
            Ok::<(), CartError>(())
        })
        .await
    }

    async fn clear(&self) -> Result<(), CartError> {
        self.guarded("clear_cart", BusyKey::Global, async {
            self.guest.clear().await?;
            Ok::<(), CartError>(())
        })
        .await
    }
}
