//! Integration tests for the Hearthwood cart engine.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p hearthwood-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `cart_sync` - Cart engine behavior across guest, login and signed-in modes
//! - `wishlist_sync` - Wishlist engine behavior
//! - `file_backend` - Guest persistence across engine restarts
//!
//! All tests run against in-memory gateways and a manual clock; no network or
//! database is needed.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use chrono::TimeDelta;
use hearthwood_cart::guest::{GuestBackend, MemoryBackend};
use hearthwood_cart::testing::{InMemoryCartGateway, InMemoryWishlistGateway, ManualClock};
use hearthwood_cart::{
    CartEngine, CartSyncConfig, MigrationPolicy, SessionOracle, StaticSession, WishlistEngine,
};
use secrecy::SecretString;

/// Collaborators and engines for one test.
pub struct TestContext {
    pub clock: Arc<ManualClock>,
    pub session: Arc<StaticSession>,
    pub backend: Arc<dyn GuestBackend>,
    pub cart_gateway: Arc<InMemoryCartGateway>,
    pub wishlist_gateway: Arc<InMemoryWishlistGateway>,
    pub config: CartSyncConfig,
    pub cart: CartEngine,
    pub wishlist: WishlistEngine,
}

impl TestContext {
    /// Anonymous session, memory backend, default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    #[must_use]
    pub fn builder() -> TestContextBuilder {
        TestContextBuilder::default()
    }

    /// Sign the session in (engines pick this up on their next call).
    pub fn sign_in(&self) {
        self.session.login(SecretString::from("cust_integration_token"));
    }

    pub fn sign_out(&self) {
        self.session.logout();
    }

    /// Engines over the same backend, gateways and clock, as after a restart.
    #[must_use]
    pub fn restart(&self) -> Self {
        let session = Arc::new(StaticSession::anonymous());
        if self.session.is_authenticated() {
            session.login(SecretString::from("cust_integration_token"));
        }
        Self::assemble(
            self.clock.clone(),
            session,
            self.backend.clone(),
            self.cart_gateway.clone(),
            self.wishlist_gateway.clone(),
            self.config.clone(),
        )
    }

    fn assemble(
        clock: Arc<ManualClock>,
        session: Arc<StaticSession>,
        backend: Arc<dyn GuestBackend>,
        cart_gateway: Arc<InMemoryCartGateway>,
        wishlist_gateway: Arc<InMemoryWishlistGateway>,
        config: CartSyncConfig,
    ) -> Self {
        let cart = CartEngine::with_clock(
            session.clone(),
            cart_gateway.clone(),
            backend.clone(),
            &config,
            clock.clone(),
        );
        let wishlist = WishlistEngine::with_clock(
            session.clone(),
            wishlist_gateway.clone(),
            backend.clone(),
            &config,
            clock.clone(),
        );
        Self {
            clock,
            session,
            backend,
            cart_gateway,
            wishlist_gateway,
            config,
            cart,
            wishlist,
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`TestContext`].
#[derive(Default)]
pub struct TestContextBuilder {
    backend: Option<Arc<dyn GuestBackend>>,
    policy: MigrationPolicy,
    serialize_row_mutations: bool,
    guest_ttl: Option<TimeDelta>,
}

impl TestContextBuilder {
    /// Use `backend` instead of a fresh memory backend.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn GuestBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    #[must_use]
    pub const fn migration_policy(mut self, policy: MigrationPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn serialize_row_mutations(mut self, enabled: bool) -> Self {
        self.serialize_row_mutations = enabled;
        self
    }

    #[must_use]
    pub const fn guest_ttl(mut self, ttl: TimeDelta) -> Self {
        self.guest_ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn build(self) -> TestContext {
        let clock = Arc::new(ManualClock::epoch());
        let mut config = CartSyncConfig {
            migration_policy: self.policy,
            serialize_row_mutations: self.serialize_row_mutations,
            ..CartSyncConfig::default()
        };
        if let Some(ttl) = self.guest_ttl {
            config.guest_ttl = ttl;
        }

        let backend: Arc<dyn GuestBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(MemoryBackend::new()),
        };

        TestContext::assemble(
            clock.clone(),
            Arc::new(StaticSession::anonymous()),
            backend,
            Arc::new(InMemoryCartGateway::new(clock.clone())),
            Arc::new(InMemoryWishlistGateway::new(clock)),
            config,
        )
    }
}
