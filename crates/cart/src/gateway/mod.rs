//! Remote cart and wishlist API contracts.
//!
//! # Architecture
//!
//! - The remote API is the source of truth for a signed-in customer
//! - [`CartGateway`] / [`WishlistGateway`] are the only way the engine talks
//!   to it; retries, backoff and credential refresh live beneath them
//! - [`HttpCartGateway`] implements both over `reqwest` with JSON bodies
//!
//! Line shapes returned by the API ([`RemoteCartLine`], [`RemoteWishlistLine`])
//! are mapped into the core row types here, dropping anything that would break
//! the row invariants.

mod http;
mod wire;

pub use http::HttpCartGateway;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use hearthwood_core::{
    CartItem, Discount, ItemId, NewCartItem, NewWishlistItem, VariantId, WishlistItem,
};

/// Errors that can occur when talking to the remote cart API.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status without a more specific meaning.
    #[error("Unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configured base URL cannot address API routes.
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    /// No credential is available for an authenticated call.
    #[error("Missing credential")]
    MissingCredential,

    /// The credential was rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Not enough inventory for the requested quantity.
    #[error("Insufficient stock: {message}")]
    InsufficientStock {
        message: String,
        available: Option<u32>,
    },

    /// Row or cart not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limited by the API.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// The API is unreachable or refused the request.
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

/// Authoritative cart as returned by the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCart {
    #[serde(default)]
    pub items: Vec<RemoteCartLine>,
    #[serde(default)]
    pub discount: Option<Discount>,
}

/// A cart line in the API's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCartLine {
    pub id: String,
    pub variant_id: String,
    pub quantity: i64,
    pub price: Decimal,
    #[serde(default)]
    pub assembly_required: bool,
    #[serde(default)]
    pub assemble_charges: Option<Decimal>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub stock: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemoteCartLine {
    /// Map into a [`CartItem`].
    ///
    /// Lines with a non-positive quantity are dropped: a row in the aggregate
    /// always has at least one unit.
    #[must_use]
    pub fn into_cart_item(self) -> Option<CartItem> {
        let Ok(quantity) = u32::try_from(self.quantity) else {
            warn!(line_id = %self.id, quantity = self.quantity, "Dropping cart line with invalid quantity");
            return None;
        };
        if quantity == 0 {
            warn!(line_id = %self.id, "Dropping cart line with zero quantity");
            return None;
        }

        Some(CartItem {
            id: ItemId::new(self.id),
            variant_id: VariantId::new(self.variant_id),
            quantity,
            unit_price: self.price,
            assembly_required: self.assembly_required,
            assemble_charges: self.assemble_charges.unwrap_or(Decimal::ZERO),
            color: self.color,
            size: self.size,
            stock: self.stock.and_then(|s| u32::try_from(s).ok()),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// A wishlist line in the API's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteWishlistLine {
    pub id: String,
    pub variant_id: String,
    pub price: Decimal,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<RemoteWishlistLine> for WishlistItem {
    fn from(line: RemoteWishlistLine) -> Self {
        Self {
            id: ItemId::new(line.id),
            variant_id: VariantId::new(line.variant_id),
            unit_price: line.price,
            color: line.color,
            size: line.size,
            created_at: line.created_at,
            updated_at: line.updated_at,
        }
    }
}

/// Result of a batch merge.
///
/// An empty `rejected` list means every submitted row was accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    #[serde(default)]
    pub rejected: Vec<RejectedLine>,
}

/// A row the API refused during a batch merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedLine {
    /// The id the row had in the submitted batch.
    pub item_id: ItemId,
    pub reason: String,
}

/// Authenticated cart operations against the server of record.
#[async_trait]
pub trait CartGateway: Send + Sync {
    /// Fetch the customer's cart.
    async fn fetch_cart(&self) -> Result<RemoteCart, GatewayError>;

    /// Add units of a variant (the API merges onto an existing line).
    async fn add_item(&self, item: &NewCartItem) -> Result<(), GatewayError>;

    /// Set the quantity of a line (always at least 1).
    async fn update_quantity(&self, item_id: &ItemId, quantity: u32) -> Result<(), GatewayError>;

    /// Set the assembly flag of a line.
    async fn update_flag(&self, item_id: &ItemId, assembly_required: bool)
    -> Result<(), GatewayError>;

    /// Change the display color of a line.
    async fn update_color(&self, item_id: &ItemId, color: Option<&str>)
    -> Result<(), GatewayError>;

    /// Delete a line.
    async fn remove_item(&self, item_id: &ItemId) -> Result<(), GatewayError>;

    /// Delete every line.
    async fn clear_cart(&self) -> Result<(), GatewayError>;

    /// Upload guest rows in one round trip.
    async fn merge_batch(&self, items: &[CartItem]) -> Result<MergeReport, GatewayError>;
}

/// Authenticated wishlist operations against the server of record.
#[async_trait]
pub trait WishlistGateway: Send + Sync {
    async fn fetch_wishlist(&self) -> Result<Vec<RemoteWishlistLine>, GatewayError>;

    async fn add_item(&self, item: &NewWishlistItem) -> Result<(), GatewayError>;

    async fn remove_item(&self, item_id: &ItemId) -> Result<(), GatewayError>;

    async fn clear_wishlist(&self) -> Result<(), GatewayError>;

    async fn merge_batch(&self, items: &[WishlistItem]) -> Result<MergeReport, GatewayError>;
}
