//! Totals calculator.
//!
//! Derived cart totals are a pure function of the item list. Nothing else in
//! the workspace computes or stores them independently.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::item::CartItem;

/// Totals derived from a cart's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CartTotals {
    /// Sum of quantities.
    pub total_item_count: u32,
    /// Sum of `unit_price × quantity`.
    pub subtotal: Decimal,
    /// Sum of `assemble_charges × quantity` over rows needing assembly.
    pub assembly_total: Decimal,
    /// `subtotal + assembly_total`.
    pub cart_total: Decimal,
}

/// A discount supplied by the pricing collaborator (coupon validation happens
/// elsewhere).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub coupon_code: String,
    pub amount: Decimal,
}

/// Compute totals for `items`.
///
/// Sums saturate at `Decimal::MAX` instead of overflowing.
#[must_use]
pub fn calculate_totals(items: &[CartItem]) -> CartTotals {
    let (total_item_count, subtotal, assembly_total) = items.iter().fold(
        (0u32, Decimal::ZERO, Decimal::ZERO),
        |(count, subtotal, assembly), item| {
            (
                count.saturating_add(item.quantity),
                subtotal.saturating_add(item.line_subtotal()),
                assembly.saturating_add(item.line_assembly()),
            )
        },
    );

    CartTotals {
        total_item_count,
        subtotal,
        assembly_total,
        cart_total: subtotal.saturating_add(assembly_total),
    }
}

/// Apply an external discount to the cart total, clamped at zero.
#[must_use]
pub fn grand_total(totals: &CartTotals, discount: Option<&Discount>) -> Decimal {
    let amount = discount.map_or(Decimal::ZERO, |d| d.amount);
    totals.cart_total.saturating_sub(amount).max(Decimal::ZERO)
}
