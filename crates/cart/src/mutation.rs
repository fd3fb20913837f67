//! Optimistic mutations.
//!
//! Each authenticated mutation is a command with three phases:
//!
//! 1. `apply_local` - change the in-memory rows immediately and return what is
//!    needed to undo that change
//! 2. `confirm_remote` - perform the authoritative call on the gateway
//! 3. `compensate` - on failure, undo exactly the local change from phase 1
//!
//! [`OptimisticMutator::perform`] drives the phases, marks the target busy for
//! the duration, and re-fetches server state after a confirmed write. After a
//! call settles the rows reflect either the pre-mutation state or the server's
//! state, never a local change the server rejected.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use hearthwood_core::{CartItem, ItemId, NewCartItem};

use crate::clock::Clock;
use crate::error::CartError;
use crate::gateway::{CartGateway, GatewayError};
use crate::guard::{BusyGuard, BusyKey, RowLocks};
use crate::row::{position, reinsert, restore, restore_all};
use crate::telemetry;

/// An item list that optimistic commands operate on.
pub trait SyncedList: Send + Sync {
    type Item;

    /// Run `f` against the rows. Derived state is refreshed afterwards.
    fn mutate<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut Vec<Self::Item>) -> R;

    /// Record a user-facing error message.
    fn set_error(&self, message: String);

    fn clear_error(&self);
}

/// Re-fetches authoritative state after a confirmed write.
#[async_trait]
pub trait Reconcile: Send + Sync {
    async fn reconcile(&self) -> Result<(), CartError>;
}

/// A mutation expressed as apply / confirm / compensate.
#[async_trait]
pub trait OptimisticCommand: Send + Sync {
    type Item: Send;
    type Gateway: ?Sized + Send + Sync;
    /// What `compensate` needs to reverse `apply_local`.
    type Undo: Send;

    /// Short name for logs and breadcrumbs.
    fn name(&self) -> &'static str;

    /// Row (or global flag) marked busy while the command runs.
    fn target(&self) -> BusyKey;

    /// Apply the change locally.
    ///
    /// Must leave `items` untouched when returning an error.
    ///
    /// # Errors
    ///
    /// Returns `CartError::ItemNotFound` if the target row is absent.
    fn apply_local(
        &self,
        items: &mut Vec<Self::Item>,
        now: DateTime<Utc>,
    ) -> Result<Self::Undo, CartError>;

    /// Perform the authoritative remote call.
    async fn confirm_remote(&self, gateway: &Self::Gateway) -> Result<(), GatewayError>;

    /// Reverse `apply_local`.
    fn compensate(&self, items: &mut Vec<Self::Item>, undo: Self::Undo);
}

/// Drives optimistic commands against one list and one gateway.
pub struct OptimisticMutator<L, G: ?Sized> {
    list: Arc<L>,
    gateway: Arc<G>,
    reconciler: Arc<dyn Reconcile>,
    guard: Arc<BusyGuard>,
    locks: Option<Arc<RowLocks>>,
    clock: Arc<dyn Clock>,
    category: &'static str,
}

impl<L, G> OptimisticMutator<L, G>
where
    L: SyncedList,
    G: ?Sized + Send + Sync,
{
    /// Create a mutator.
    ///
    /// When `locks` is given, overlapping commands on the same target are
    /// queued; otherwise they interleave and only the busy marks record them.
    #[must_use]
    pub fn new(
        list: Arc<L>,
        gateway: Arc<G>,
        reconciler: Arc<dyn Reconcile>,
        guard: Arc<BusyGuard>,
        locks: Option<Arc<RowLocks>>,
        clock: Arc<dyn Clock>,
        category: &'static str,
    ) -> Self {
        Self {
            list,
            gateway,
            reconciler,
            guard,
            locks,
            clock,
            category,
        }
    }

    /// Run `command`.
    ///
    /// On success the reconciler re-fetches server state; a failure of that
    /// follow-up fetch is recorded in the list's error but does not fail the
    /// call, because the write itself was confirmed.
    ///
    /// # Errors
    ///
    /// Returns the local validation error (nothing applied, no network call) or
    /// the classified gateway error after compensation.
    pub async fn perform<C>(&self, command: C) -> Result<(), CartError>
    where
        C: OptimisticCommand<Item = L::Item, Gateway = G>,
    {
        let key = command.target();
        let _row_lock = match &self.locks {
            Some(locks) => Some(locks.acquire(&key).await),
            None => None,
        };
        let _busy = self.guard.mark(key.clone());
        self.list.clear_error();

        let now = self.clock.now();
        let undo = self.list.mutate(|items| command.apply_local(items, now))?;
        let target = key.to_string();
        telemetry::add_breadcrumb(self.category, command.name(), Some(&[("target", target.as_str())]));

        match command.confirm_remote(self.gateway.as_ref()).await {
            Ok(()) => {
                debug!(command = command.name(), target = %key, "Remote mutation confirmed");
                if let Err(e) = self.reconciler.reconcile().await {
                    warn!(command = command.name(), error = %e, "Reconcile after confirmed mutation failed");
                }
                Ok(())
            }
            Err(e) => {
                let err = CartError::from(e);
                warn!(command = command.name(), target = %key, error = %err, "Remote mutation failed, compensating");
                self.list.mutate(|items| command.compensate(items, undo));
                self.list.set_error(err.user_message());
                telemetry::capture_error(&err);
                Err(err)
            }
        }
    }
}

// =============================================================================
// Cart Commands
// =============================================================================

/// Undo information for an add.
#[derive(Debug)]
pub enum AddUndo {
    /// A new provisional row was inserted.
    Inserted(ItemId),
    /// An existing row absorbed the units; this is its previous value.
    Merged(CartItem),
}

/// Add units of a variant.
#[derive(Debug, Clone)]
pub struct AddItem {
    pub item: NewCartItem,
    /// Provisional id for a newly inserted row, replaced at reconcile.
    pub pending_id: ItemId,
}

impl AddItem {
    #[must_use]
    pub fn new(item: NewCartItem) -> Self {
        Self {
            item,
            pending_id: ItemId::generate_pending(),
        }
    }
}

#[async_trait]
impl OptimisticCommand for AddItem {
    type Item = CartItem;
    type Gateway = dyn CartGateway;
    type Undo = AddUndo;

    fn name(&self) -> &'static str {
        "add_item"
    }

    fn target(&self) -> BusyKey {
        BusyKey::Global
    }

    fn apply_local(&self, items: &mut Vec<CartItem>, now: DateTime<Utc>) -> Result<AddUndo, CartError> {
        let existing = items
            .iter_mut()
            .find(|row| row.matches(&self.item.variant_id, self.item.color.as_deref()));

        if let Some(row) = existing {
            let previous = row.clone();
            row.quantity = row.quantity.saturating_add(self.item.quantity);
            row.updated_at = now;
            return Ok(AddUndo::Merged(previous));
        }

        items.push(CartItem::from_new(self.pending_id.clone(), &self.item, now));
        Ok(AddUndo::Inserted(self.pending_id.clone()))
    }

    async fn confirm_remote(&self, gateway: &Self::Gateway) -> Result<(), GatewayError> {
        gateway.add_item(&self.item).await
    }

    fn compensate(&self, items: &mut Vec<CartItem>, undo: AddUndo) {
        match undo {
            AddUndo::Inserted(id) => items.retain(|row| row.id != id),
            AddUndo::Merged(previous) => restore(items, previous),
        }
    }
}

/// Look up a row for an in-place update, returning its previous value.
fn edit_row<'a>(
    items: &'a mut [CartItem],
    id: &ItemId,
) -> Result<(&'a mut CartItem, CartItem), CartError> {
    let row = items
        .iter_mut()
        .find(|row| row.id == *id)
        .ok_or_else(|| CartError::ItemNotFound(id.clone()))?;
    let previous = row.clone();
    Ok((row, previous))
}

/// Set a row's quantity (always at least 1; zero is routed to removal).
#[derive(Debug, Clone)]
pub struct UpdateQuantity {
    pub id: ItemId,
    pub quantity: u32,
}

#[async_trait]
impl OptimisticCommand for UpdateQuantity {
    type Item = CartItem;
    type Gateway = dyn CartGateway;
    type Undo = CartItem;

    fn name(&self) -> &'static str {
        "update_quantity"
    }

    fn target(&self) -> BusyKey {
        BusyKey::from(&self.id)
    }

    fn apply_local(&self, items: &mut Vec<CartItem>, now: DateTime<Utc>) -> Result<CartItem, CartError> {
        let (row, previous) = edit_row(items, &self.id)?;
        row.quantity = self.quantity;
        row.updated_at = now;
        Ok(previous)
    }

    async fn confirm_remote(&self, gateway: &Self::Gateway) -> Result<(), GatewayError> {
        gateway.update_quantity(&self.id, self.quantity).await
    }

    fn compensate(&self, items: &mut Vec<CartItem>, previous: CartItem) {
        restore(items, previous);
    }
}

/// Toggle assembly on a row.
#[derive(Debug, Clone)]
pub struct SetAssembly {
    pub id: ItemId,
    pub assembly_required: bool,
}

#[async_trait]
impl OptimisticCommand for SetAssembly {
    type Item = CartItem;
    type Gateway = dyn CartGateway;
    type Undo = CartItem;

    fn name(&self) -> &'static str {
        "set_assembly"
    }

    fn target(&self) -> BusyKey {
        BusyKey::from(&self.id)
    }

    fn apply_local(&self, items: &mut Vec<CartItem>, now: DateTime<Utc>) -> Result<CartItem, CartError> {
        let (row, previous) = edit_row(items, &self.id)?;
        row.assembly_required = self.assembly_required;
        row.updated_at = now;
        Ok(previous)
    }

    async fn confirm_remote(&self, gateway: &Self::Gateway) -> Result<(), GatewayError> {
        gateway.update_flag(&self.id, self.assembly_required).await
    }

    fn compensate(&self, items: &mut Vec<CartItem>, previous: CartItem) {
        restore(items, previous);
    }
}

/// Change a row's display color.
#[derive(Debug, Clone)]
pub struct UpdateColor {
    pub id: ItemId,
    pub color: Option<String>,
}

#[async_trait]
impl OptimisticCommand for UpdateColor {
    type Item = CartItem;
    type Gateway = dyn CartGateway;
    type Undo = CartItem;

    fn name(&self) -> &'static str {
        "update_color"
    }

    fn target(&self) -> BusyKey {
        BusyKey::from(&self.id)
    }

    fn apply_local(&self, items: &mut Vec<CartItem>, now: DateTime<Utc>) -> Result<CartItem, CartError> {
        let (row, previous) = edit_row(items, &self.id)?;
        row.color.clone_from(&self.color);
        row.updated_at = now;
        Ok(previous)
    }

    async fn confirm_remote(&self, gateway: &Self::Gateway) -> Result<(), GatewayError> {
        gateway.update_color(&self.id, self.color.as_deref()).await
    }

    fn compensate(&self, items: &mut Vec<CartItem>, previous: CartItem) {
        restore(items, previous);
    }
}

/// Delete a row.
#[derive(Debug, Clone)]
pub struct RemoveItem {
    pub id: ItemId,
}

#[async_trait]
impl OptimisticCommand for RemoveItem {
    type Item = CartItem;
    type Gateway = dyn CartGateway;
    type Undo = (usize, CartItem);

    fn name(&self) -> &'static str {
        "remove_item"
    }

    fn target(&self) -> BusyKey {
        BusyKey::from(&self.id)
    }

    fn apply_local(&self, items: &mut Vec<CartItem>, _now: DateTime<Utc>) -> Result<(usize, CartItem), CartError> {
        let index = position(items, &self.id).ok_or_else(|| CartError::ItemNotFound(self.id.clone()))?;
        Ok((index, items.remove(index)))
    }

    async fn confirm_remote(&self, gateway: &Self::Gateway) -> Result<(), GatewayError> {
        gateway.remove_item(&self.id).await
    }

    fn compensate(&self, items: &mut Vec<CartItem>, (index, row): (usize, CartItem)) {
        reinsert(items, index, row);
    }
}

/// Delete every row.
#[derive(Debug, Clone, Copy)]
pub struct ClearCart;

#[async_trait]
impl OptimisticCommand for ClearCart {
    type Item = CartItem;
    type Gateway = dyn CartGateway;
    type Undo = Vec<CartItem>;

    fn name(&self) -> &'static str {
        "clear_cart"
    }

    fn target(&self) -> BusyKey {
        BusyKey::Global
    }

    fn apply_local(&self, items: &mut Vec<CartItem>, _now: DateTime<Utc>) -> Result<Vec<CartItem>, CartError> {
        Ok(std::mem::take(items))
    }

    async fn confirm_remote(&self, gateway: &Self::Gateway) -> Result<(), GatewayError> {
        gateway.clear_cart().await
    }

    fn compensate(&self, items: &mut Vec<CartItem>, previous: Vec<CartItem>) {
        restore_all(items, previous);
    }
}
