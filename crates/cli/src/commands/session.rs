//! `hw-cli login` and `hw-cli logout`.

use secrecy::SecretString;
use serde_json::json;
use tracing::info;

use super::{CliError, emit};
use crate::context::Context;

/// Sign in and migrate the guest cart and wishlist into the account.
///
/// The cart is migrated first. A failed wishlist migration does not undo the
/// cart migration; rerunning `login` retries only what is left in the guest
/// store.
pub async fn login(ctx: &Context, token: SecretString) -> Result<(), CliError> {
    ctx.cart.load().await?;
    ctx.session.login(token);

    let cart = ctx.cart.handle_login().await?;
    let wishlist = ctx.wishlist.handle_login().await?;
    info!(?cart, ?wishlist, "Signed in");

    emit(&json!({
        "cart_migration": cart,
        "wishlist_migration": wishlist,
        "cart": ctx.cart.snapshot(),
        "wishlist": ctx.wishlist.snapshot(),
    }))
}

/// Sign out and show what is left in the guest store.
pub async fn logout(ctx: &Context) -> Result<(), CliError> {
    ctx.session.logout();
    ctx.cart.handle_logout().await?;
    ctx.wishlist.handle_logout().await?;
    info!("Signed out");

    emit(&json!({
        "cart": ctx.cart.snapshot(),
        "wishlist": ctx.wishlist.snapshot(),
    }))
}
