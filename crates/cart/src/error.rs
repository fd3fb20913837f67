//! Engine error taxonomy.
//!
//! Gateway failures are classified into auth, stock and generic gateway
//! errors. Each error carries a single human-readable message (recorded in the
//! engine state for display) while keeping the structured cause reachable via
//! `source()`.

use thiserror::Error;

use hearthwood_core::ItemId;

use crate::gateway::GatewayError;

/// Guest store persistence errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing medium failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing an envelope failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by the cart and wishlist engines.
#[derive(Debug, Error)]
pub enum CartError {
    /// The request cannot be applied (e.g., adding zero units).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The target row is not in the aggregate.
    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    /// Network or server failure from the remote cart API.
    #[error("Gateway error: {0}")]
    Gateway(#[source] GatewayError),

    /// Credential missing or rejected at call time.
    #[error("Auth error: {0}")]
    Auth(#[source] GatewayError),

    /// The remote cart API rejected the change for lack of inventory.
    #[error("Stock error: {0}")]
    Stock(#[source] GatewayError),

    /// The guest store could not be read or written.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<GatewayError> for CartError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unauthorized(_) | GatewayError::MissingCredential => Self::Auth(err),
            GatewayError::InsufficientStock { .. } => Self::Stock(err),
            _ => Self::Gateway(err),
        }
    }
}

impl CartError {
    /// Message suitable for showing to the customer.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::ItemNotFound(_) => "That item is no longer in your cart".to_string(),
            Self::Auth(_) => "Your session has expired, please sign in again".to_string(),
            Self::Stock(GatewayError::InsufficientStock {
                available: Some(available),
                ..
            }) => format!("Only {available} left in stock"),
            Self::Stock(_) => "Not enough stock for that quantity".to_string(),
            Self::Gateway(GatewayError::RateLimited(_)) => {
                "Too many requests, please wait a moment and try again".to_string()
            }
            Self::Gateway(_) => "We couldn't update your cart. Please try again.".to_string(),
            Self::Storage(_) => "We couldn't save your cart on this device".to_string(),
        }
    }

    /// Whether this is an infrastructure failure worth reporting to Sentry.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(self, Self::Gateway(_) | Self::Storage(_))
    }
}
