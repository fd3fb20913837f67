//! In-memory cart aggregate.
//!
//! The aggregate is the single shared mutable resource of the engine. All
//! access goes through short synchronous critical sections; no lock is ever
//! held across an `await`. Totals are recomputed on every change to the item
//! list, so they can never drift from the rows they describe.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use hearthwood_core::{CartItem, CartTotals, Discount, calculate_totals, grand_total};

use crate::mutation::SyncedList;

/// Which source of truth the aggregate currently mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Durable guest store.
    Guest,
    /// Remote cart API.
    Authenticated,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Guest => f.write_str("guest"),
            Self::Authenticated => f.write_str("authenticated"),
        }
    }
}

#[derive(Debug, Default)]
struct CartState {
    items: Vec<CartItem>,
    totals: CartTotals,
    discount: Option<Discount>,
    last_synced_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// Owned, comparable view of the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartSnapshot {
    pub mode: Mode,
    pub items: Vec<CartItem>,
    pub totals: CartTotals,
    pub discount: Option<Discount>,
    /// `cart_total` less the discount, clamped at zero.
    pub grand_total: Decimal,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// The cart aggregate.
#[derive(Debug, Default)]
pub struct CartStore {
    state: Mutex<CartState>,
}

impl CartStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CartState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the item list (guest reloads).
    pub fn replace_items(&self, items: Vec<CartItem>) {
        let mut state = self.lock();
        state.totals = calculate_totals(&items);
        state.items = items;
    }

    /// Replace the item list with the server's and stamp the sync time.
    ///
    /// A discount reported by the server replaces the local one; when the
    /// server reports none, an externally applied discount is kept.
    pub fn reconcile_with(
        &self,
        items: Vec<CartItem>,
        discount: Option<Discount>,
        synced_at: DateTime<Utc>,
    ) {
        let mut state = self.lock();
        state.totals = calculate_totals(&items);
        state.items = items;
        if discount.is_some() {
            state.discount = discount;
        }
        state.last_synced_at = Some(synced_at);
        state.error = None;
    }

    /// Drop everything (logout).
    pub fn reset(&self) {
        *self.lock() = CartState::default();
    }

    #[must_use]
    pub fn items(&self) -> Vec<CartItem> {
        self.lock().items.clone()
    }

    #[must_use]
    pub fn totals(&self) -> CartTotals {
        self.lock().totals
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn set_discount(&self, discount: Option<Discount>) {
        self.lock().discount = discount;
    }

    /// Snapshot the aggregate as seen in `mode`.
    #[must_use]
    pub fn snapshot(&self, mode: Mode) -> CartSnapshot {
        let state = self.lock();
        CartSnapshot {
            mode,
            items: state.items.clone(),
            totals: state.totals,
            discount: state.discount.clone(),
            grand_total: grand_total(&state.totals, state.discount.as_ref()),
            last_synced_at: state.last_synced_at,
            error: state.error.clone(),
        }
    }
}

impl SyncedList for CartStore {
    type Item = CartItem;

    fn mutate<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut Vec<CartItem>) -> R,
    {
        let mut state = self.lock();
        let result = f(&mut state.items);
        state.totals = calculate_totals(&state.items);
        result
    }

    fn set_error(&self, message: String) {
        self.lock().error = Some(message);
    }

    fn clear_error(&self) {
        self.lock().error = None;
    }
}
