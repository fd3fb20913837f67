//! `hw-cli wishlist` commands.

use hearthwood_cart::WishlistEngine;
use hearthwood_core::{ItemId, NewWishlistItem};

use super::{CliError, emit};
use crate::WishlistAction;
use crate::context::Context;

/// Load the wishlist, apply `action`, and print the result.
pub async fn run(ctx: &Context, action: WishlistAction) -> Result<(), CliError> {
    let wishlist = &ctx.wishlist;
    wishlist.load().await?;

    match action {
        WishlistAction::Show => {}
        WishlistAction::Add {
            variant,
            price,
            color,
            size,
        } => {
            let mut item = NewWishlistItem::new(variant, price);
            item.color = color;
            item.size = size;
            wishlist.add(item).await?;
        }
        WishlistAction::Remove { item_id } => wishlist.remove(&ItemId::new(item_id)).await?,
        WishlistAction::Clear => wishlist.clear().await?,
    }

    show(wishlist)
}

pub fn show(wishlist: &WishlistEngine) -> Result<(), CliError> {
    emit(&serde_json::to_value(wishlist.snapshot())?)
}
