//! Row behavior shared by cart and wishlist collections.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use hearthwood_core::{CartItem, ItemId, WishlistItem};

/// A row that can live in the guest store and in an engine's item list.
pub trait SyncedRow: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Row id.
    fn id(&self) -> &ItemId;

    /// Whether `other` denotes the same logical row for guest dedupe.
    fn same_row(&self, other: &Self) -> bool;

    /// Fold a repeated add of the same logical row into this one.
    fn absorb(&mut self, other: Self);

    /// Refresh `updated_at`.
    fn touch(&mut self, now: DateTime<Utc>);
}

impl SyncedRow for CartItem {
    fn id(&self) -> &ItemId {
        &self.id
    }

    /// Cart rows are keyed on `(variant_id, color)`.
    fn same_row(&self, other: &Self) -> bool {
        self.matches(&other.variant_id, other.color.as_deref())
    }

    fn absorb(&mut self, other: Self) {
        self.quantity = self.quantity.saturating_add(other.quantity);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

impl SyncedRow for WishlistItem {
    fn id(&self) -> &ItemId {
        &self.id
    }

    /// Wishlist rows are keyed on `variant_id` alone.
    fn same_row(&self, other: &Self) -> bool {
        self.variant_id == other.variant_id
    }

    fn absorb(&mut self, other: Self) {
        self.unit_price = other.unit_price;
        if other.color.is_some() {
            self.color = other.color;
        }
        if other.size.is_some() {
            self.size = other.size;
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// Position of the row with `id`.
pub(crate) fn position<T: SyncedRow>(items: &[T], id: &ItemId) -> Option<usize> {
    items.iter().position(|item| item.id() == id)
}

/// Put `row` back in place of the row with the same id, if it is still present.
pub(crate) fn restore<T: SyncedRow>(items: &mut [T], row: T) {
    if let Some(slot) = items.iter_mut().find(|item| item.id() == row.id()) {
        *slot = row;
    }
}

/// Put a removed `row` back at `index` unless it has reappeared meanwhile.
pub(crate) fn reinsert<T: SyncedRow>(items: &mut Vec<T>, index: usize, row: T) {
    if position(items, row.id()).is_none() {
        let index = index.min(items.len());
        items.insert(index, row);
    }
}

/// Restore a cleared list, keeping rows added after the clear was applied.
pub(crate) fn restore_all<T: SyncedRow>(items: &mut Vec<T>, previous: Vec<T>) {
    let added: Vec<T> = items
        .drain(..)
        .filter(|item| position(&previous, item.id()).is_none())
        .collect();
    *items = previous;
    items.extend(added);
}
