//! Wishlist engine integration tests.

#![allow(clippy::unwrap_used)]

use rust_decimal::Decimal;

use hearthwood_cart::testing::{Failure, GatewayOp, new_item};
use hearthwood_cart::{CartError, MigrationPolicy, Mode};
use hearthwood_core::{NewWishlistItem, VariantId};
use hearthwood_integration_tests::TestContext;

fn saved(variant: &str, price: i64) -> NewWishlistItem {
    NewWishlistItem::new(variant, Decimal::from(price))
}

// =============================================================================
// Guest Mode
// =============================================================================

#[tokio::test]
async fn test_guest_wishlist_dedupes_on_variant() {
    let ctx = TestContext::new();
    let wishlist = &ctx.wishlist;

    wishlist.add(saved("sku-a", 10)).await.unwrap();
    wishlist.add(saved("sku-a", 12)).await.unwrap();
    wishlist.add(saved("sku-b", 40)).await.unwrap();

    let items = wishlist.items();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].unit_price, Decimal::from(12));
    assert!(items.iter().all(|item| item.id.is_guest()));
}

#[tokio::test]
async fn test_guest_toggle() {
    let ctx = TestContext::new();
    let variant = VariantId::new("sku-a");

    assert!(ctx.wishlist.toggle(saved("sku-a", 10)).await.unwrap());
    assert!(ctx.wishlist.contains(&variant));

    assert!(!ctx.wishlist.toggle(saved("sku-a", 10)).await.unwrap());
    assert!(!ctx.wishlist.contains(&variant));
    assert!(ctx.wishlist.items().is_empty());
}

#[tokio::test]
async fn test_wishlist_and_cart_are_stored_separately() {
    let ctx = TestContext::new();
    ctx.wishlist.add(saved("sku-a", 10)).await.unwrap();
    ctx.cart.add_item(new_item("sku-b", 1, 20)).await.unwrap();

    ctx.wishlist.clear().await.unwrap();
    ctx.cart.load().await.unwrap();

    assert!(ctx.wishlist.items().is_empty());
    assert_eq!(ctx.cart.items().len(), 1);
}

// =============================================================================
// Authenticated Mode
// =============================================================================

#[tokio::test]
async fn test_remote_add_converges_on_server_ids() {
    let ctx = TestContext::new();
    ctx.sign_in();
    ctx.wishlist.load().await.unwrap();
    assert_eq!(ctx.wishlist.mode(), Mode::Authenticated);

    ctx.wishlist.add(saved("sku-a", 10)).await.unwrap();

    let items = ctx.wishlist.items();
    assert_eq!(items, ctx.wishlist_gateway.lines());
    assert_eq!(items[0].id.as_str(), "wish-1");
    assert!(ctx.wishlist.snapshot().last_synced_at.is_some());
}

#[tokio::test]
async fn test_remote_remove_failure_restores_row() {
    let ctx = TestContext::new();
    ctx.sign_in();
    ctx.wishlist_gateway.seed(saved("sku-a", 10));
    ctx.wishlist_gateway.seed(saved("sku-b", 20));
    ctx.wishlist.load().await.unwrap();
    let before = ctx.wishlist.items();

    ctx.wishlist_gateway
        .fail(GatewayOp::RemoveItem, Failure::Unavailable);
    let err = ctx.wishlist.remove(&before[0].id).await.unwrap_err();

    assert!(matches!(err, CartError::Gateway(_)));
    assert_eq!(ctx.wishlist.items(), before);
    assert!(!ctx.wishlist.is_busy(&before[0].id));
    assert!(ctx.wishlist.error().is_some());
}

#[tokio::test]
async fn test_remote_clear_failure_restores_rows() {
    let ctx = TestContext::new();
    ctx.sign_in();
    ctx.wishlist_gateway.seed(saved("sku-a", 10));
    ctx.wishlist.load().await.unwrap();
    let before = ctx.wishlist.items();

    ctx.wishlist_gateway
        .fail(GatewayOp::ClearWishlist, Failure::Unauthorized);
    let err = ctx.wishlist.clear().await.unwrap_err();

    assert!(matches!(err, CartError::Auth(_)));
    assert_eq!(ctx.wishlist.items(), before);
}

#[tokio::test]
async fn test_remote_toggle_round_trip() {
    let ctx = TestContext::new();
    ctx.sign_in();
    ctx.wishlist.load().await.unwrap();

    assert!(ctx.wishlist.toggle(saved("sku-a", 10)).await.unwrap());
    assert_eq!(ctx.wishlist_gateway.lines().len(), 1);

    assert!(!ctx.wishlist.toggle(saved("sku-a", 10)).await.unwrap());
    assert!(ctx.wishlist_gateway.lines().is_empty());
    assert!(ctx.wishlist.items().is_empty());
}

// =============================================================================
// Login / Logout
// =============================================================================

#[tokio::test]
async fn test_login_migrates_guest_wishlist() {
    let ctx = TestContext::new();
    ctx.wishlist.add(saved("sku-a", 10)).await.unwrap();
    ctx.wishlist.add(saved("sku-b", 20)).await.unwrap();
    ctx.wishlist_gateway.seed(saved("sku-a", 10));

    ctx.sign_in();
    let outcome = ctx.wishlist.handle_login().await.unwrap().unwrap();
    assert_eq!(outcome.submitted, 2);
    assert_eq!(ctx.wishlist_gateway.calls(GatewayOp::MergeBatch), 1);

    let items = ctx.wishlist.items();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| !item.id.is_guest()));

    assert!(ctx.wishlist.handle_login().await.unwrap().is_none());

    ctx.sign_out();
    ctx.wishlist.handle_logout().await.unwrap();
    assert!(ctx.wishlist.items().is_empty());
}

#[tokio::test]
async fn test_failed_wishlist_migration_keeps_guest_rows() {
    let ctx = TestContext::new();
    ctx.wishlist.add(saved("sku-a", 10)).await.unwrap();

    ctx.sign_in();
    ctx.wishlist_gateway
        .fail(GatewayOp::MergeBatch, Failure::Unavailable);
    ctx.wishlist.handle_login().await.unwrap_err();

    ctx.sign_out();
    ctx.wishlist.handle_logout().await.unwrap();
    assert_eq!(ctx.wishlist.items().len(), 1);
}

#[tokio::test]
async fn test_rejected_wishlist_rows_retained_with_policy() {
    let ctx = TestContext::builder()
        .migration_policy(MigrationPolicy::RetainRejected)
        .build();
    ctx.wishlist_gateway.reject_variant("sku-b");
    ctx.wishlist.add(saved("sku-a", 10)).await.unwrap();
    ctx.wishlist.add(saved("sku-b", 20)).await.unwrap();

    ctx.sign_in();
    let outcome = ctx.wishlist.handle_login().await.unwrap().unwrap();
    assert_eq!(outcome.rejected, 1);
    assert_eq!(outcome.retained, 1);

    ctx.sign_out();
    ctx.wishlist.handle_logout().await.unwrap();
    assert!(ctx.wishlist.contains(&VariantId::new("sku-b")));
    assert!(!ctx.wishlist.contains(&VariantId::new("sku-a")));
}
