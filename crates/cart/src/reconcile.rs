//! Convergence with the server of record.
//!
//! Reconciliation replaces the aggregate's rows wholesale with the server's
//! and stamps the sync time. It never merges: whatever the server returns is
//! the cart. On failure the aggregate is left exactly as it was.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, instrument};

use hearthwood_core::CartItem;

use crate::clock::Clock;
use crate::error::CartError;
use crate::gateway::CartGateway;
use crate::mutation::{Reconcile, SyncedList};
use crate::state::CartStore;
use crate::telemetry;

/// Re-fetches the remote cart into a [`CartStore`].
pub struct Reconciler {
    gateway: Arc<dyn CartGateway>,
    store: Arc<CartStore>,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    #[must_use]
    pub fn new(gateway: Arc<dyn CartGateway>, store: Arc<CartStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            gateway,
            store,
            clock,
        }
    }

    /// Fetch the remote cart and replace the aggregate with it.
    ///
    /// # Errors
    ///
    /// Returns the classified gateway error; the aggregate's rows, totals and
    /// sync stamp are untouched and the error message is recorded.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<(), CartError> {
        match self.gateway.fetch_cart().await {
            Ok(cart) => {
                let items: Vec<CartItem> = cart
                    .items
                    .into_iter()
                    .filter_map(|line| line.into_cart_item())
                    .collect();
                debug!(lines = items.len(), "Cart reconciled");
                self.store.reconcile_with(items, cart.discount, self.clock.now());
                Ok(())
            }
            Err(e) => {
                let err = CartError::from(e);
                error!(error = %err, "Failed to fetch cart");
                self.store.set_error(err.user_message());
                telemetry::capture_error(&err);
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Reconcile for Reconciler {
    async fn reconcile(&self) -> Result<(), CartError> {
        Self::reconcile(self).await
    }
}
