//! Guest-to-account migration.
//!
//! At login the guest rows are uploaded to the remote API in one batch. The
//! guest store is only touched after the batch call succeeds, so a failed
//! migration never loses anything.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use hearthwood_core::CartItem;

use crate::error::CartError;
use crate::gateway::{CartGateway, MergeReport};
use crate::guard::{BusyGuard, BusyKey};
use crate::guest::GuestStore;
use crate::mutation::SyncedList;
use crate::reconcile::Reconciler;
use crate::row::SyncedRow;
use crate::state::CartStore;
use crate::telemetry;

/// What happens to guest rows the API rejects during a batch merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPolicy {
    /// Any successful call clears the whole guest store, rejected rows included.
    #[default]
    AllOrNothing,
    /// Only accepted rows leave the guest store; rejected rows stay for retry.
    RetainRejected,
}

/// Unrecognized migration policy name.
#[derive(Debug, Error)]
#[error("Unknown migration policy: {0} (expected all_or_nothing or retain_rejected)")]
pub struct ParsePolicyError(String);

impl FromStr for MigrationPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all_or_nothing" => Ok(Self::AllOrNothing),
            "retain_rejected" => Ok(Self::RetainRejected),
            other => Err(ParsePolicyError(other.to_string())),
        }
    }
}

/// Row counts from one migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    /// Rows sent in the batch.
    pub submitted: usize,
    /// Rows the API accepted.
    pub accepted: usize,
    /// Rows the API rejected.
    pub rejected: usize,
    /// Rejected rows kept in the guest store.
    pub retained: usize,
    /// Whether the migrated rows left the guest store.
    ///
    /// `false` means the upload succeeded but the local copy could not be
    /// removed; the rows are on the server and still on this device.
    pub guest_cleared: bool,
}

impl Default for MigrationOutcome {
    fn default() -> Self {
        Self {
            submitted: 0,
            accepted: 0,
            rejected: 0,
            retained: 0,
            guest_cleared: true,
        }
    }
}

/// Split submitted rows by the API's verdict, applying `policy`.
///
/// Returns the outcome and the rows that should remain in the guest store.
pub(crate) fn settle<T: SyncedRow>(
    policy: MigrationPolicy,
    submitted: Vec<T>,
    report: &MergeReport,
) -> (MigrationOutcome, Vec<T>) {
    let total = submitted.len();
    let (rejected, accepted): (Vec<T>, Vec<T>) = submitted.into_iter().partition(|row| {
        report
            .rejected
            .iter()
            .any(|line| &line.item_id == row.id())
    });

    let retained = match policy {
        MigrationPolicy::AllOrNothing => {
            if !rejected.is_empty() {
                warn!(
                    rejected = rejected.len(),
                    "Discarding guest rows rejected by the API"
                );
            }
            Vec::new()
        }
        MigrationPolicy::RetainRejected => rejected.clone(),
    };

    let outcome = MigrationOutcome {
        submitted: total,
        accepted: accepted.len(),
        rejected: rejected.len(),
        retained: retained.len(),
        guest_cleared: true,
    };
    (outcome, retained)
}

/// Moves the guest cart into the customer's remote cart.
pub struct MigrationCoordinator {
    gateway: Arc<dyn CartGateway>,
    guest: Arc<GuestStore<CartItem>>,
    store: Arc<CartStore>,
    reconciler: Arc<Reconciler>,
    guard: Arc<BusyGuard>,
    policy: MigrationPolicy,
}

impl MigrationCoordinator {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn CartGateway>,
        guest: Arc<GuestStore<CartItem>>,
        store: Arc<CartStore>,
        reconciler: Arc<Reconciler>,
        guard: Arc<BusyGuard>,
        policy: MigrationPolicy,
    ) -> Self {
        Self {
            gateway,
            guest,
            store,
            reconciler,
            guard,
            policy,
        }
    }

    /// Upload the guest cart as a single batch, then reconcile.
    ///
    /// An empty guest store skips the upload. A failure of the follow-up
    /// reconcile is logged but does not fail the migration, since the rows
    /// already reached the server. A failure to remove the migrated rows from
    /// the guest store does not fail it either; it is recorded as the
    /// aggregate's error and reported through
    /// [`MigrationOutcome::guest_cleared`].
    ///
    /// # Errors
    ///
    /// Returns `CartError::Storage` if the guest store cannot be read, or the
    /// classified gateway error if the batch call fails. In both cases the
    /// guest store is left intact.
    #[instrument(skip(self), fields(policy = ?self.policy))]
    pub async fn migrate_on_login(&self) -> Result<MigrationOutcome, CartError> {
        let _busy = self.guard.mark(BusyKey::Global);

        let rows = match self.guest.get().await {
            Ok(rows) => rows,
            Err(e) => {
                let err = CartError::from(e);
                self.fail(&err);
                return Err(err);
            }
        };

        if rows.is_empty() {
            info!("No guest cart to migrate");
            if let Err(e) = self.reconciler.reconcile().await {
                warn!(error = %e, "Reconcile after login failed");
            }
            return Ok(MigrationOutcome::default());
        }

        telemetry::add_breadcrumb(
            "cart",
            "migrate_on_login",
            Some(&[("rows", rows.len().to_string().as_str())]),
        );

        let report = match self.gateway.merge_batch(&rows).await {
            Ok(report) => report,
            Err(e) => {
                let err = CartError::from(e);
                error!(rows = rows.len(), error = %err, "Guest cart migration failed, guest rows kept");
                self.fail(&err);
                return Err(err);
            }
        };

        let (mut outcome, retained) = settle(self.policy, rows, &report);
        let cleanup = self.guest.replace_all(&retained).await;
        outcome.guest_cleared = cleanup.is_ok();

        info!(
            submitted = outcome.submitted,
            accepted = outcome.accepted,
            retained = outcome.retained,
            "Guest cart migrated"
        );

        if let Err(e) = self.reconciler.reconcile().await {
            warn!(error = %e, "Reconcile after migration failed");
        }

        if let Err(e) = cleanup {
            let err = CartError::from(e);
            error!(error = %err, "Failed to remove migrated rows from the guest cart");
            self.fail(&err);
        }
        Ok(outcome)
    }

    fn fail(&self, err: &CartError) {
        self.store.set_error(err.user_message());
        telemetry::capture_error(err);
    }
}
