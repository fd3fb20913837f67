//! `hw-cli cart` commands.

use hearthwood_cart::{CartEngine, CartSnapshot};
use hearthwood_core::{CurrencyCode, ItemId, NewCartItem, format_amount};
use serde_json::{Value, json};
use tracing::info;

use super::{CliError, emit};
use crate::CartAction;
use crate::context::Context;

/// Load the cart, apply `action`, and print the result.
pub async fn run(ctx: &Context, action: CartAction) -> Result<(), CliError> {
    let cart = &ctx.cart;
    cart.load().await?;

    match action {
        CartAction::Show => {}
        CartAction::Add {
            variant,
            quantity,
            price,
            color,
            size,
            assembly,
        } => {
            let mut item = NewCartItem::new(variant, quantity, price);
            item.color = color;
            item.size = size;
            if let Some(charges) = assembly {
                item = item.with_assembly(true, charges);
            }
            cart.add_item(item).await?;
        }
        CartAction::Qty { item_id, quantity } => {
            cart.update_quantity(&ItemId::new(item_id), quantity).await?;
        }
        CartAction::Assembly { item_id, enabled } => {
            cart.set_assembly(&ItemId::new(item_id), enabled).await?;
        }
        CartAction::Color { item_id, color } => {
            cart.update_color(&ItemId::new(item_id), color).await?;
        }
        CartAction::Remove { item_id } => {
            cart.remove_item(&ItemId::new(item_id)).await?;
        }
        CartAction::Clear => cart.clear().await?,
    }

    show(cart)
}

/// Print the cart snapshot.
pub fn show(cart: &CartEngine) -> Result<(), CliError> {
    let snapshot = cart.snapshot();
    let currency = CurrencyCode::default();
    info!(
        mode = %snapshot.mode,
        rows = snapshot.items.len(),
        total = %format_amount(snapshot.grand_total, currency),
        "Cart"
    );
    emit(&render(&snapshot, currency)?)
}

/// The snapshot as JSON, plus a `display` object of formatted amounts.
fn render(snapshot: &CartSnapshot, currency: CurrencyCode) -> Result<Value, CliError> {
    let mut value = serde_json::to_value(snapshot)?;
    let totals = &snapshot.totals;
    value["display"] = json!({
        "subtotal": format_amount(totals.subtotal, currency),
        "assembly_total": format_amount(totals.assembly_total, currency),
        "discount": snapshot
            .discount
            .as_ref()
            .map(|discount| format_amount(discount.amount, currency)),
        "grand_total": format_amount(snapshot.grand_total, currency),
    });
    Ok(value)
}
