//! Core types for Hearthwood.
//!
//! This module provides type-safe wrappers for cart domain concepts.

pub mod id;
pub mod item;
pub mod money;
pub mod totals;

pub use id::*;
pub use item::{CartItem, NewCartItem, NewWishlistItem, WishlistItem};
pub use money::{CurrencyCode, format_amount};
pub use totals::{CartTotals, Discount, calculate_totals, grand_total};
