//! Cart and wishlist rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{ItemId, VariantId};

/// A single cart row.
///
/// `quantity` is always at least 1 for a row that exists; a requested
/// quantity of zero or below is a removal and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Row id (server-assigned when authenticated, client-assigned as guest).
    pub id: ItemId,
    /// Catalog SKU reference.
    pub variant_id: VariantId,
    /// Units in the cart.
    pub quantity: u32,
    /// Price of one unit.
    pub unit_price: Decimal,
    /// Whether the customer asked for assembly.
    pub assembly_required: bool,
    /// Per-unit assembly surcharge, may be zero.
    pub assemble_charges: Decimal,
    /// Display color; part of guest row identity.
    pub color: Option<String>,
    /// Display size.
    pub size: Option<String>,
    /// Advisory stock level reported by the server.
    pub stock: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartItem {
    /// Build a row from an add request.
    #[must_use]
    pub fn from_new(id: ItemId, new: &NewCartItem, now: DateTime<Utc>) -> Self {
        Self {
            id,
            variant_id: new.variant_id.clone(),
            quantity: new.quantity,
            unit_price: new.unit_price,
            assembly_required: new.assembly_required,
            assemble_charges: new.assemble_charges,
            color: new.color.clone(),
            size: new.size.clone(),
            stock: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this row represents `(variant_id, color)`.
    #[must_use]
    pub fn matches(&self, variant_id: &VariantId, color: Option<&str>) -> bool {
        self.variant_id == *variant_id && self.color.as_deref() == color
    }

    /// `unit_price × quantity`, saturating at the `Decimal` bounds.
    #[must_use]
    pub fn line_subtotal(&self) -> Decimal {
        self.unit_price.saturating_mul(Decimal::from(self.quantity))
    }

    /// `assemble_charges × quantity` when assembly is requested, else zero.
    #[must_use]
    pub fn line_assembly(&self) -> Decimal {
        if self.assembly_required {
            self.assemble_charges.saturating_mul(Decimal::from(self.quantity))
        } else {
            Decimal::ZERO
        }
    }
}

/// An add-to-cart request.
///
/// Prices come from the catalog collaborator; the engine does not look them up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCartItem {
    pub variant_id: VariantId,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub assembly_required: bool,
    pub assemble_charges: Decimal,
    pub color: Option<String>,
    pub size: Option<String>,
}

impl NewCartItem {
    /// A plain add with no assembly and no display attributes.
    #[must_use]
    pub fn new(variant_id: impl Into<VariantId>, quantity: u32, unit_price: Decimal) -> Self {
        Self {
            variant_id: variant_id.into(),
            quantity,
            unit_price,
            assembly_required: false,
            assemble_charges: Decimal::ZERO,
            color: None,
            size: None,
        }
    }

    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    /// Set the per-unit assembly surcharge and whether assembly is requested.
    #[must_use]
    pub const fn with_assembly(mut self, required: bool, charges: Decimal) -> Self {
        self.assembly_required = required;
        self.assemble_charges = charges;
        self
    }
}

/// A single wishlist row. Wishlists have no quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishlistItem {
    pub id: ItemId,
    pub variant_id: VariantId,
    pub unit_price: Decimal,
    pub color: Option<String>,
    pub size: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WishlistItem {
    /// Build a row from an add request.
    #[must_use]
    pub fn from_new(id: ItemId, new: &NewWishlistItem, now: DateTime<Utc>) -> Self {
        Self {
            id,
            variant_id: new.variant_id.clone(),
            unit_price: new.unit_price,
            color: new.color.clone(),
            size: new.size.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// An add-to-wishlist request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWishlistItem {
    pub variant_id: VariantId,
    pub unit_price: Decimal,
    pub color: Option<String>,
    pub size: Option<String>,
}

impl NewWishlistItem {
    #[must_use]
    pub fn new(variant_id: impl Into<VariantId>, unit_price: Decimal) -> Self {
        Self {
            variant_id: variant_id.into(),
            unit_price,
            color: None,
            size: None,
        }
    }
}
