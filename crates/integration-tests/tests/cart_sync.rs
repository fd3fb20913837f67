//! Cart engine integration tests.
//!
//! Drives `CartEngine` through guest mode, login migration, signed-in
//! optimistic mutations and logout, against the in-memory cart gateway.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use chrono::TimeDelta;
use rust_decimal::Decimal;

use hearthwood_cart::guest::{GuestBackend, keys};
use hearthwood_cart::testing::{Failure, GatewayOp, new_item};
use hearthwood_cart::{CartError, MigrationPolicy, Mode};
use hearthwood_core::{Discount, ItemId, calculate_totals};
use hearthwood_integration_tests::TestContext;

// =============================================================================
// Guest Mode
// =============================================================================

#[tokio::test]
async fn test_guest_add_merge_and_assembly_totals() {
    let ctx = TestContext::new();
    let cart = &ctx.cart;
    assert_eq!(cart.mode(), Mode::Guest);

    cart.add_item(new_item("sku-a", 2, 10).with_assembly(false, Decimal::from(5)))
        .await
        .unwrap();
    cart.add_item(new_item("sku-a", 1, 10).with_assembly(false, Decimal::from(5)))
        .await
        .unwrap();

    let items = cart.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 3);
    assert_eq!(cart.totals().subtotal, Decimal::from(30));
    assert_eq!(cart.totals().assembly_total, Decimal::ZERO);

    cart.set_assembly(&items[0].id, true).await.unwrap();

    let totals = cart.totals();
    assert_eq!(totals.total_item_count, 3);
    assert_eq!(totals.assembly_total, Decimal::from(15));
    assert_eq!(totals.cart_total, Decimal::from(45));
}

#[tokio::test]
async fn test_guest_rows_are_unique_per_variant_and_color() {
    let ctx = TestContext::new();
    let cart = &ctx.cart;

    cart.add_item(new_item("sku-a", 1, 10).with_color("oak")).await.unwrap();
    cart.add_item(new_item("sku-a", 1, 10).with_color("walnut")).await.unwrap();
    cart.add_item(new_item("sku-a", 2, 10).with_color("oak")).await.unwrap();
    cart.add_item(new_item("sku-b", 1, 40)).await.unwrap();

    let items = cart.items();
    assert_eq!(items.len(), 3);
    for (i, a) in items.iter().enumerate() {
        for b in items.iter().skip(i + 1) {
            assert!(
                !(a.variant_id == b.variant_id && a.color == b.color),
                "duplicate row for {} / {:?}",
                a.variant_id,
                a.color
            );
        }
    }
    let oak = items
        .iter()
        .find(|item| item.color.as_deref() == Some("oak"))
        .unwrap();
    assert_eq!(oak.quantity, 3);
}

#[tokio::test]
async fn test_totals_always_match_item_list() {
    let ctx = TestContext::new();
    let cart = &ctx.cart;

    cart.add_item(new_item("sku-a", 2, 10).with_assembly(true, Decimal::from(4)))
        .await
        .unwrap();
    cart.add_item(new_item("sku-b", 1, 25)).await.unwrap();
    assert_eq!(cart.totals(), calculate_totals(&cart.items()));

    let id = cart.items()[0].id.clone();
    cart.update_quantity(&id, 5).await.unwrap();
    assert_eq!(cart.totals(), calculate_totals(&cart.items()));

    cart.remove_item(&id).await.unwrap();
    assert_eq!(cart.totals(), calculate_totals(&cart.items()));
    assert_eq!(cart.totals().subtotal, Decimal::from(25));
}

#[tokio::test]
async fn test_guest_quantity_zero_removes_row() {
    let ctx = TestContext::new();
    ctx.cart.add_item(new_item("sku-a", 2, 10)).await.unwrap();
    let id = ctx.cart.items()[0].id.clone();

    ctx.cart.update_quantity(&id, 0).await.unwrap();
    assert!(ctx.cart.items().is_empty());
}

#[tokio::test]
async fn test_zero_quantity_add_is_rejected() {
    let ctx = TestContext::new();
    let err = ctx.cart.add_item(new_item("sku-a", 0, 10)).await.unwrap_err();
    assert!(matches!(err, CartError::Validation(_)));
    assert!(ctx.cart.items().is_empty());
}

#[tokio::test]
async fn test_guest_mode_never_calls_gateway() {
    let ctx = TestContext::new();
    ctx.cart.add_item(new_item("sku-a", 1, 10)).await.unwrap();
    ctx.cart.load().await.unwrap();
    ctx.cart.clear().await.unwrap();

    assert_eq!(ctx.cart_gateway.calls(GatewayOp::AddItem), 0);
    assert_eq!(ctx.cart_gateway.calls(GatewayOp::FetchCart), 0);
    assert_eq!(ctx.cart_gateway.calls(GatewayOp::ClearCart), 0);
}

// =============================================================================
// Guest Expiration
// =============================================================================

#[tokio::test]
async fn test_expired_guest_cart_loads_empty() {
    let ctx = TestContext::builder().guest_ttl(TimeDelta::days(7)).build();
    ctx.cart.add_item(new_item("sku-a", 1, 10)).await.unwrap();

    ctx.clock.advance(TimeDelta::days(7) + TimeDelta::seconds(1));
    ctx.cart.load().await.unwrap();

    assert!(ctx.cart.items().is_empty());
    assert!(ctx.backend.read(keys::CART).await.unwrap().is_none());
}

#[tokio::test]
async fn test_guest_write_refreshes_expiry() {
    let ctx = TestContext::builder().guest_ttl(TimeDelta::days(7)).build();
    ctx.cart.add_item(new_item("sku-a", 1, 10)).await.unwrap();

    ctx.clock.advance(TimeDelta::days(5));
    ctx.cart.add_item(new_item("sku-b", 1, 10)).await.unwrap();
    ctx.clock.advance(TimeDelta::days(5));
    ctx.cart.load().await.unwrap();

    assert_eq!(ctx.cart.items().len(), 2);
}

#[tokio::test]
async fn test_unreadable_guest_cart_loads_empty() {
    let ctx = TestContext::new();
    ctx.backend.write(keys::CART, "{not json").await.unwrap();

    ctx.cart.load().await.unwrap();
    assert!(ctx.cart.items().is_empty());
    assert!(ctx.cart.error().is_none());
}

// =============================================================================
// Authenticated Mode
// =============================================================================

#[tokio::test]
async fn test_authenticated_add_converges_on_server_ids() {
    let ctx = TestContext::new();
    ctx.sign_in();
    ctx.cart.load().await.unwrap();
    assert_eq!(ctx.cart.mode(), Mode::Authenticated);

    ctx.cart.add_item(new_item("sku-a", 2, 10)).await.unwrap();

    let items = ctx.cart.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, ItemId::new("line-1"));
    assert!(!items[0].id.is_pending());
    assert_eq!(items, ctx.cart_gateway.lines());
    assert!(ctx.cart.snapshot().last_synced_at.is_some());
}

#[tokio::test]
async fn test_failed_update_restores_previous_items() {
    let ctx = TestContext::new();
    ctx.sign_in();
    let id = ctx.cart_gateway.seed(new_item("sku-a", 2, 10));
    ctx.cart.load().await.unwrap();
    let before = ctx.cart.snapshot();

    ctx.cart_gateway
        .fail(GatewayOp::UpdateQuantity, Failure::Unavailable);
    let err = ctx.cart.update_quantity(&id, 7).await.unwrap_err();

    assert!(matches!(err, CartError::Gateway(_)));
    assert_eq!(ctx.cart.items(), before.items);
    assert_eq!(ctx.cart.totals(), before.totals);
    assert!(!ctx.cart.is_busy(&id));
    assert!(ctx.cart.error().is_some());

    ctx.cart_gateway.recover(GatewayOp::UpdateQuantity);
    ctx.cart.update_quantity(&id, 7).await.unwrap();
    assert_eq!(ctx.cart.items()[0].quantity, 7);
    assert!(ctx.cart.error().is_none());
}

#[tokio::test]
async fn test_failed_add_drops_provisional_row() {
    let ctx = TestContext::new();
    ctx.sign_in();
    ctx.cart_gateway.seed(new_item("sku-a", 1, 10));
    ctx.cart.load().await.unwrap();
    let before = ctx.cart.items();

    ctx.cart_gateway.fail(GatewayOp::AddItem, Failure::Unavailable);
    ctx.cart.add_item(new_item("sku-b", 1, 20)).await.unwrap_err();
    assert_eq!(ctx.cart.items(), before);

    ctx.cart.add_item(new_item("sku-a", 3, 10)).await.unwrap_err();
    assert_eq!(ctx.cart.items(), before);
    assert!(!ctx.cart.guard().any_busy());
}

#[tokio::test]
async fn test_failed_remove_reinserts_row_in_place() {
    let ctx = TestContext::new();
    ctx.sign_in();
    ctx.cart_gateway.seed(new_item("sku-a", 1, 10));
    let middle = ctx.cart_gateway.seed(new_item("sku-b", 1, 10));
    ctx.cart_gateway.seed(new_item("sku-c", 1, 10));
    ctx.cart.load().await.unwrap();
    let before = ctx.cart.items();

    ctx.cart_gateway.fail(GatewayOp::RemoveItem, Failure::Unavailable);
    ctx.cart.remove_item(&middle).await.unwrap_err();
    assert_eq!(ctx.cart.items(), before);
}

#[tokio::test]
async fn test_failed_clear_restores_everything() {
    let ctx = TestContext::new();
    ctx.sign_in();
    ctx.cart_gateway.seed(new_item("sku-a", 1, 10));
    ctx.cart_gateway.seed(new_item("sku-b", 2, 15));
    ctx.cart.load().await.unwrap();
    let before = ctx.cart.items();

    ctx.cart_gateway.fail(GatewayOp::ClearCart, Failure::Unavailable);
    ctx.cart.clear().await.unwrap_err();
    assert_eq!(ctx.cart.items(), before);
}

#[tokio::test]
async fn test_stock_and_auth_failures_are_classified() {
    let ctx = TestContext::new();
    ctx.sign_in();
    let id = ctx.cart_gateway.seed(new_item("sku-a", 1, 10));
    ctx.cart.load().await.unwrap();

    ctx.cart_gateway.fail(
        GatewayOp::UpdateQuantity,
        Failure::OutOfStock { available: Some(2) },
    );
    let err = ctx.cart.update_quantity(&id, 9).await.unwrap_err();
    assert!(matches!(err, CartError::Stock(_)));

    ctx.cart_gateway.fail(GatewayOp::UpdateFlag, Failure::Unauthorized);
    let err = ctx.cart.set_assembly(&id, true).await.unwrap_err();
    assert!(matches!(err, CartError::Auth(_)));
    assert!(!ctx.cart.items()[0].assembly_required);
}

#[tokio::test]
async fn test_unknown_row_is_not_found() {
    let ctx = TestContext::new();
    ctx.sign_in();
    ctx.cart.load().await.unwrap();

    let err = ctx
        .cart
        .update_quantity(&ItemId::new("line-404"), 2)
        .await
        .unwrap_err();
    assert!(matches!(err, CartError::ItemNotFound(_)));
    assert_eq!(ctx.cart_gateway.calls(GatewayOp::UpdateQuantity), 0);
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let ctx = TestContext::new();
    ctx.sign_in();
    ctx.cart_gateway.seed(new_item("sku-a", 2, 10));
    ctx.cart_gateway.seed(new_item("sku-b", 1, 30).with_color("ash"));

    ctx.cart.reconcile().await.unwrap();
    let first = ctx.cart.snapshot();
    ctx.cart.reconcile().await.unwrap();

    assert_eq!(ctx.cart.snapshot(), first);
}

#[tokio::test]
async fn test_failed_reconcile_keeps_state() {
    let ctx = TestContext::new();
    ctx.sign_in();
    ctx.cart_gateway.seed(new_item("sku-a", 2, 10));
    ctx.cart.reconcile().await.unwrap();
    let before = ctx.cart.items();

    ctx.cart_gateway.seed(new_item("sku-b", 1, 10));
    ctx.cart_gateway.fail(GatewayOp::FetchCart, Failure::RateLimited(30));
    ctx.cart.reconcile().await.unwrap_err();

    assert_eq!(ctx.cart.items(), before);
    assert!(ctx.cart.error().is_some());
}

#[tokio::test]
async fn test_discount_survives_reconcile_without_server_discount() {
    let ctx = TestContext::new();
    ctx.sign_in();
    ctx.cart_gateway.seed(new_item("sku-a", 2, 10));
    ctx.cart.reconcile().await.unwrap();

    ctx.cart.apply_discount(Discount {
        coupon_code: "WELCOME5".to_string(),
        amount: Decimal::from(5),
    });
    ctx.cart.reconcile().await.unwrap();

    let snapshot = ctx.cart.snapshot();
    assert_eq!(snapshot.grand_total, Decimal::from(15));

    ctx.cart.apply_discount(Discount {
        coupon_code: "HUGE".to_string(),
        amount: Decimal::from(100),
    });
    assert_eq!(ctx.cart.snapshot().grand_total, Decimal::ZERO);

    ctx.cart.clear_discount();
    assert_eq!(ctx.cart.snapshot().grand_total, Decimal::from(20));
}

// =============================================================================
// Overlapping Mutations
// =============================================================================

#[tokio::test]
async fn test_overlapping_updates_both_reach_gateway_and_converge() {
    let ctx = TestContext::new();
    ctx.sign_in();
    let id = ctx.cart_gateway.seed(new_item("sku-a", 1, 10));
    ctx.cart.load().await.unwrap();
    ctx.cart_gateway.set_latency(Duration::from_millis(20));

    let (first, second) = tokio::join!(
        ctx.cart.update_quantity(&id, 2),
        ctx.cart.update_quantity(&id, 5)
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(ctx.cart_gateway.calls(GatewayOp::UpdateQuantity), 2);
    assert_eq!(ctx.cart_gateway.max_in_flight(), 2);
    assert_eq!(ctx.cart.items(), ctx.cart_gateway.lines());
    assert!(!ctx.cart.is_busy(&id));
}

#[tokio::test]
async fn test_overlapping_adds_converge_on_server() {
    let ctx = TestContext::new();
    ctx.sign_in();
    ctx.cart.load().await.unwrap();
    ctx.cart_gateway.set_latency(Duration::from_millis(20));

    let (first, second) = tokio::join!(
        ctx.cart.add_item(new_item("sku-a", 1, 10)),
        ctx.cart.add_item(new_item("sku-b", 2, 15))
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(ctx.cart_gateway.calls(GatewayOp::AddItem), 2);
    assert_eq!(ctx.cart_gateway.max_in_flight(), 2);

    let items = ctx.cart.items();
    assert_eq!(items, ctx.cart_gateway.lines());
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| !item.id.is_pending()));
    assert_eq!(ctx.cart.totals().subtotal, Decimal::from(40));
    assert!(!ctx.cart.guard().any_busy());
}

#[tokio::test]
async fn test_row_locks_serialize_overlapping_updates() {
    let ctx = TestContext::builder().serialize_row_mutations(true).build();
    ctx.sign_in();
    let id = ctx.cart_gateway.seed(new_item("sku-a", 1, 10));
    ctx.cart.load().await.unwrap();
    ctx.cart_gateway.set_latency(Duration::from_millis(20));

    let (first, second) = tokio::join!(
        ctx.cart.update_quantity(&id, 2),
        ctx.cart.update_quantity(&id, 5)
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(ctx.cart_gateway.max_in_flight(), 1);
    assert_eq!(ctx.cart.items()[0].quantity, 5);
    assert_eq!(ctx.cart_gateway.lines()[0].quantity, 5);
}

// =============================================================================
// Login / Logout
// =============================================================================

#[tokio::test]
async fn test_login_migrates_guest_cart_once() {
    let ctx = TestContext::new();
    ctx.cart.add_item(new_item("sku-a", 2, 10)).await.unwrap();
    ctx.cart
        .add_item(new_item("sku-b", 1, 30).with_color("ash"))
        .await
        .unwrap();

    ctx.sign_in();
    let outcome = ctx.cart.handle_login().await.unwrap().unwrap();
    assert_eq!(outcome.submitted, 2);
    assert_eq!(outcome.accepted, 2);
    assert_eq!(ctx.cart_gateway.calls(GatewayOp::MergeBatch), 1);

    let items = ctx.cart.items();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| !item.id.is_guest()));
    assert_eq!(items, ctx.cart_gateway.lines());

    assert!(ctx.cart.handle_login().await.unwrap().is_none());
    assert_eq!(ctx.cart_gateway.calls(GatewayOp::MergeBatch), 1);

    ctx.sign_out();
    ctx.cart.handle_logout().await.unwrap();
    assert!(ctx.cart.items().is_empty());
}

#[tokio::test]
async fn test_login_merges_into_existing_server_rows() {
    let ctx = TestContext::new();
    ctx.cart_gateway.seed(new_item("sku-a", 1, 10));
    ctx.cart.add_item(new_item("sku-a", 2, 10)).await.unwrap();

    ctx.sign_in();
    ctx.cart.handle_login().await.unwrap();

    let items = ctx.cart.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 3);
}

#[tokio::test]
async fn test_failed_migration_keeps_guest_rows_and_retries() {
    let ctx = TestContext::new();
    ctx.cart.add_item(new_item("sku-a", 2, 10)).await.unwrap();

    ctx.sign_in();
    ctx.cart_gateway.fail(GatewayOp::MergeBatch, Failure::Unavailable);
    ctx.cart.handle_login().await.unwrap_err();
    assert!(ctx.cart.error().is_some());
    assert!(ctx.backend.read(keys::CART).await.unwrap().is_some());

    ctx.cart_gateway.recover(GatewayOp::MergeBatch);
    let outcome = ctx.cart.handle_login().await.unwrap().unwrap();
    assert_eq!(outcome.accepted, 1);
    assert_eq!(ctx.cart_gateway.calls(GatewayOp::MergeBatch), 2);
    assert_eq!(ctx.cart_gateway.lines()[0].quantity, 2);
}

#[tokio::test]
async fn test_empty_guest_cart_login_only_reconciles() {
    let ctx = TestContext::new();
    ctx.cart_gateway.seed(new_item("sku-a", 1, 10));

    ctx.sign_in();
    let outcome = ctx.cart.handle_login().await.unwrap().unwrap();

    assert_eq!(outcome.submitted, 0);
    assert_eq!(ctx.cart_gateway.calls(GatewayOp::MergeBatch), 0);
    assert_eq!(ctx.cart.items().len(), 1);
}

#[tokio::test]
async fn test_handle_login_requires_session() {
    let ctx = TestContext::new();
    let err = ctx.cart.handle_login().await.unwrap_err();
    assert!(matches!(err, CartError::Auth(_)));
}

#[tokio::test]
async fn test_rejected_rows_dropped_by_default() {
    let ctx = TestContext::new();
    ctx.cart_gateway.reject_variant("sku-b");
    ctx.cart.add_item(new_item("sku-a", 1, 10)).await.unwrap();
    ctx.cart.add_item(new_item("sku-b", 1, 10)).await.unwrap();

    ctx.sign_in();
    let outcome = ctx.cart.handle_login().await.unwrap().unwrap();
    assert_eq!(outcome.rejected, 1);
    assert_eq!(outcome.retained, 0);

    ctx.sign_out();
    ctx.cart.handle_logout().await.unwrap();
    assert!(ctx.cart.items().is_empty());
}

#[tokio::test]
async fn test_rejected_rows_retained_with_policy() {
    let ctx = TestContext::builder()
        .migration_policy(MigrationPolicy::RetainRejected)
        .build();
    ctx.cart_gateway.reject_variant("sku-b");
    ctx.cart.add_item(new_item("sku-a", 1, 10)).await.unwrap();
    ctx.cart.add_item(new_item("sku-b", 1, 10)).await.unwrap();

    ctx.sign_in();
    let outcome = ctx.cart.handle_login().await.unwrap().unwrap();
    assert_eq!(outcome.accepted, 1);
    assert_eq!(outcome.retained, 1);
    assert_eq!(ctx.cart_gateway.lines().len(), 1);

    ctx.sign_out();
    ctx.cart.handle_logout().await.unwrap();
    let guest_rows = ctx.cart.items();
    assert_eq!(guest_rows.len(), 1);
    assert_eq!(guest_rows[0].variant_id.as_str(), "sku-b");
}

#[tokio::test]
async fn test_logout_then_login_migrates_again() {
    let ctx = TestContext::new();
    ctx.sign_in();
    ctx.cart.handle_login().await.unwrap();

    ctx.sign_out();
    ctx.cart.handle_logout().await.unwrap();
    assert_eq!(ctx.cart.mode(), Mode::Guest);
    ctx.cart.add_item(new_item("sku-c", 1, 12)).await.unwrap();

    ctx.sign_in();
    let outcome = ctx.cart.handle_login().await.unwrap().unwrap();
    assert_eq!(outcome.accepted, 1);
    assert_eq!(ctx.cart.items()[0].variant_id.as_str(), "sku-c");
}
