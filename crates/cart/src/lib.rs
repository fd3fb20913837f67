//! Hearthwood cart synchronization engine.
//!
//! A dual-mode state container for the cart and wishlist. Guests keep their
//! rows in a durable local store with per-record expiration; signed-in
//! customers mutate optimistically against the remote cart API and converge
//! on the server's state after every round trip. At login, guest rows are
//! uploaded in a single batch and the local copy is discarded.
//!
//! # Architecture
//!
//! - [`CartEngine`] / [`WishlistEngine`] resolve the mode once per call and
//!   dispatch to a guest or authenticated strategy
//! - [`guest`] - TTL-enveloped local persistence with row dedupe
//! - [`gateway`] - remote cart contract and its HTTP implementation
//! - [`mutation`] - optimistic apply / confirm / compensate commands
//! - [`reconcile`] and [`migration`] - convergence with the server of record
//! - [`guard`] - advisory busy marks and optional per-row locks
//!
//! # Example
//!
//! ```rust,ignore
//! use hearthwood_cart::{CartEngine, CartSyncConfig, StaticSession};
//! use hearthwood_cart::gateway::HttpCartGateway;
//! use hearthwood_cart::guest::FileBackend;
//!
//! let config = CartSyncConfig::from_env()?;
//! let session = Arc::new(StaticSession::anonymous());
//! let gateway = Arc::new(HttpCartGateway::new(base_url, session.clone()));
//! let backend = Arc::new(FileBackend::new(&config.guest_dir));
//!
//! let cart = CartEngine::new(session, gateway, backend, &config);
//! cart.load().await?;
//! cart.add_item(NewCartItem::new("sku-oak-table", 1, price)).await?;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod guest;
pub mod migration;
pub mod mutation;
pub mod reconcile;
pub mod row;
pub mod session;
pub mod state;
pub mod strategy;
pub mod telemetry;
pub mod wishlist;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use config::{CartSyncConfig, ConfigError};
pub use engine::CartEngine;
pub use error::{CartError, StorageError};
pub use gateway::{CartGateway, GatewayError, WishlistGateway};
pub use guard::{BusyGuard, BusyKey};
pub use migration::{MigrationOutcome, MigrationPolicy};
pub use session::{SessionOracle, StaticSession};
pub use state::{CartSnapshot, Mode};
pub use wishlist::{WishlistEngine, WishlistSnapshot};
