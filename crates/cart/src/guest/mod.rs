//! Durable guest store.
//!
//! Persists an anonymous customer's cart and wishlist across restarts. Every
//! value is wrapped in a [`GuestRecord`] envelope with an expiration instant;
//! reads evict expired envelopes lazily (there is no background sweep).
//!
//! - [`GuestBackend`] - raw key/value persistence (memory or files)
//! - [`GuestStore`] - typed, per-collection access with row dedupe

mod backend;
mod envelope;
mod store;

pub use backend::{FileBackend, GuestBackend, MemoryBackend};
pub use envelope::{DEFAULT_TTL_DAYS, GuestRecord};
pub use store::GuestStore;

/// Storage keys for each guest collection.
pub mod keys {
    /// Key for the guest cart.
    pub const CART: &str = "guest_cart";

    /// Key for the guest wishlist.
    pub const WISHLIST: &str = "guest_wishlist";
}
