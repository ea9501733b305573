//! End-to-end order lifecycle: creation snapshots, the status state machine,
//! delivery-time warranty minting, and both cancellation paths.

mod common;

use std::collections::HashSet;

use assert_matches::assert_matches;
use common::{customer, staff, TestCtx};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

use voltcart_api::{
    auth::Actor,
    entities::{order::OrderStatus, product, warranty_unit::WarrantyStatus},
    errors::ServiceError,
    services::orders::{CreateOrderRequest, OrderDetails, OrderLineInput},
};

fn order_request(customer_id: Uuid, lines: Vec<OrderLineInput>) -> CreateOrderRequest {
    CreateOrderRequest {
        customer_id,
        customer_name: "Linh Tran".to_string(),
        customer_phone: "+84912345678".to_string(),
        shipping_address: "12 Vo Thi Sau, District 3, HCMC".to_string(),
        items: lines,
        coupon_code: None,
    }
}

async fn place_order(ctx: &TestCtx, actor: &Actor, lines: Vec<OrderLineInput>) -> OrderDetails {
    ctx.orders
        .create_order(actor, order_request(actor.id, lines))
        .await
        .expect("order created")
}

async fn deliver(ctx: &TestCtx, order_id: Uuid) -> OrderDetails {
    let shop = staff();
    for status in [OrderStatus::Confirmed, OrderStatus::Shipping, OrderStatus::Delivered] {
        ctx.orders
            .transition_order(&shop, order_id, status, None)
            .await
            .expect("transition");
    }
    ctx.orders
        .get_order(order_id)
        .await
        .expect("load")
        .expect("order exists")
}

#[tokio::test]
async fn order_total_is_sum_of_snapshot_prices() {
    let ctx = TestCtx::new().await;
    let phone = ctx.seed_product("Volt Phone X", "VPX-01", dec!(500)).await;
    let charger = ctx.seed_product("Volt Charger", "VCH-01", dec!(25)).await;

    let buyer = customer();
    let details = place_order(
        &ctx,
        &buyer,
        vec![
            OrderLineInput { product_id: phone.id, quantity: 2 },
            OrderLineInput { product_id: charger.id, quantity: 1 },
        ],
    )
    .await;

    assert_eq!(details.order.status, OrderStatus::New);
    assert_eq!(details.order.total_amount, dec!(1025));
    assert_eq!(details.lines.len(), 2);
    assert!(details.order.order_number.starts_with("ORD-"));
}

#[tokio::test]
async fn delivery_mints_one_unit_per_purchased_quantity() {
    let ctx = TestCtx::new().await;
    let product = ctx
        .seed_product_with_warranty("Volt Tab", "VTB-01", dec!(300), 24, 3)
        .await;

    let buyer = customer();
    let details = place_order(
        &ctx,
        &buyer,
        vec![OrderLineInput { product_id: product.id, quantity: 3 }],
    )
    .await;

    let delivered = deliver(&ctx, details.order.id).await;
    assert_eq!(delivered.order.status, OrderStatus::Delivered);
    assert!(delivered.order.delivered_date.is_some());

    let units = &delivered.lines[0].warranty_units;
    assert_eq!(units.len(), 3);

    let codes: HashSet<_> = units.iter().map(|u| u.warranty_code.clone()).collect();
    assert_eq!(codes.len(), 3, "every unit gets its own code");

    let delivered_at = delivered.order.delivered_date.unwrap();
    for unit in units {
        assert_eq!(unit.status, WarrantyStatus::Active);
        assert_eq!(unit.start_date, delivered_at);
        assert_eq!(unit.warranty_months_at_purchase, 24);
        assert_eq!(unit.exchange_months_at_purchase, 3);
        assert!(unit.end_date > unit.exchange_until);
    }
}

#[tokio::test]
async fn repeated_delivery_confirmation_is_a_noop() {
    let ctx = TestCtx::new().await;
    let product = ctx.seed_product("Volt Buds", "VBD-01", dec!(80)).await;

    let buyer = customer();
    let details = place_order(
        &ctx,
        &buyer,
        vec![OrderLineInput { product_id: product.id, quantity: 2 }],
    )
    .await;
    let delivered = deliver(&ctx, details.order.id).await;
    assert_eq!(delivered.lines[0].warranty_units.len(), 2);

    // Duplicate confirmation: reported as a no-op, nothing minted again.
    let outcome = ctx
        .orders
        .transition_order(&staff(), details.order.id, OrderStatus::Delivered, None)
        .await
        .expect("idempotent retry");
    assert!(outcome.is_noop());

    let reloaded = ctx
        .orders
        .get_order(details.order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.lines[0].warranty_units.len(), 2);
    assert_eq!(
        reloaded.order.delivered_date,
        delivered.order.delivered_date
    );
}

#[tokio::test]
async fn snapshots_survive_catalog_edits() {
    let ctx = TestCtx::new().await;
    let product = ctx
        .seed_product_with_warranty("Volt Cam", "VCM-01", dec!(200), 12, 1)
        .await;

    let buyer = customer();
    let details = place_order(
        &ctx,
        &buyer,
        vec![OrderLineInput { product_id: product.id, quantity: 1 }],
    )
    .await;

    // Reprice and shorten the warranty after the sale.
    let mut edit: product::ActiveModel = product.into();
    edit.price = Set(dec!(350));
    edit.warranty_months = Set(6);
    edit.update(ctx.db.as_ref()).await.expect("product edit");

    let delivered = deliver(&ctx, details.order.id).await;
    let line = &delivered.lines[0];
    assert_eq!(line.item.unit_price_at_purchase, dec!(200));
    assert_eq!(line.item.warranty_months_snapshot, 12);
    assert_eq!(line.warranty_units[0].warranty_months_at_purchase, 12);
    assert_eq!(delivered.order.total_amount, dec!(200));
}

#[tokio::test]
async fn skipping_states_is_refused() {
    let ctx = TestCtx::new().await;
    let product = ctx.seed_product("Volt Hub", "VHB-01", dec!(60)).await;

    let buyer = customer();
    let details = place_order(
        &ctx,
        &buyer,
        vec![OrderLineInput { product_id: product.id, quantity: 1 }],
    )
    .await;

    let err = ctx
        .orders
        .transition_order(&staff(), details.order.id, OrderStatus::Delivered, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn customer_cancellation_needs_a_reason_and_ownership() {
    let ctx = TestCtx::new().await;
    let product = ctx.seed_product("Volt Light", "VLT-01", dec!(30)).await;

    let buyer = customer();
    let details = place_order(
        &ctx,
        &buyer,
        vec![OrderLineInput { product_id: product.id, quantity: 1 }],
    )
    .await;

    let err = ctx
        .orders
        .cancel_order(&buyer, details.order.id, "too short".to_string())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let stranger = customer();
    let err = ctx
        .orders
        .cancel_order(&stranger, details.order.id, "I changed my mind about it".to_string())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));

    let cancelled = ctx
        .orders
        .cancel_order(&buyer, details.order.id, "I changed my mind about it".to_string())
        .await
        .expect("cancel");
    assert_eq!(cancelled.status, OrderStatus::CancelledByCustomer);
    assert!(cancelled.cancel_reason.is_some());
}

#[tokio::test]
async fn shop_cancellation_is_allowed_mid_shipping() {
    let ctx = TestCtx::new().await;
    let product = ctx.seed_product("Volt Fan", "VFN-01", dec!(45)).await;

    let buyer = customer();
    let details = place_order(
        &ctx,
        &buyer,
        vec![OrderLineInput { product_id: product.id, quantity: 1 }],
    )
    .await;

    let shop = staff();
    ctx.orders
        .transition_order(&shop, details.order.id, OrderStatus::Confirmed, None)
        .await
        .unwrap();
    ctx.orders
        .transition_order(&shop, details.order.id, OrderStatus::Shipping, None)
        .await
        .unwrap();

    let cancelled = ctx
        .orders
        .cancel_order(&shop, details.order.id, "carrier lost the parcel".to_string())
        .await
        .expect("shop cancel");
    assert_eq!(cancelled.status, OrderStatus::CancelledByShop);

    // Terminal: nothing moves out of a cancelled state.
    let err = ctx
        .orders
        .transition_order(&shop, details.order.id, OrderStatus::Confirmed, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn every_mutation_leaves_an_audit_row() {
    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
    use voltcart_api::entities::event_log::{self, Entity as EventLogEntity};

    let ctx = TestCtx::new().await;
    let product = ctx.seed_product("Volt Watch", "VWT-01", dec!(150)).await;

    let buyer = customer();
    let details = place_order(
        &ctx,
        &buyer,
        vec![OrderLineInput { product_id: product.id, quantity: 2 }],
    )
    .await;
    deliver(&ctx, details.order.id).await;

    let rows = EventLogEntity::find()
        .filter(event_log::Column::OrderId.eq(details.order.id))
        .all(ctx.db.as_ref())
        .await
        .unwrap();
    let types: Vec<&str> = rows.iter().map(|r| r.event_type.as_str()).collect();

    assert!(types.contains(&"ORDER_CREATED"));
    assert!(types.contains(&"ORDER_DELIVERED_CONFIRMED"));
    assert!(types.contains(&"WARRANTY_CODES_GENERATED"));
    // One status-change row per transition walked.
    assert_eq!(
        types.iter().filter(|t| **t == "ORDER_STATUS_CHANGED").count(),
        3
    );
    for row in &rows {
        assert!(!row.metadata.is_empty());
        assert!(row.created_at >= ctx.now() - chrono::Duration::days(1));
    }
}

#[tokio::test]
async fn customers_cannot_order_for_someone_else() {
    let ctx = TestCtx::new().await;
    let product = ctx.seed_product("Volt Dock", "VDK-01", dec!(90)).await;

    let buyer = customer();
    let someone_else = Uuid::new_v4();
    let err = ctx
        .orders
        .create_order(
            &buyer,
            order_request(
                someone_else,
                vec![OrderLineInput { product_id: product.id, quantity: 1 }],
            ),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));
}

#[tokio::test]
async fn inactive_products_cannot_be_ordered() {
    let ctx = TestCtx::new().await;
    let product = ctx.seed_product("Volt Relic", "VRL-01", dec!(10)).await;
    let mut edit: product::ActiveModel = product.clone().into();
    edit.is_active = Set(false);
    edit.update(ctx.db.as_ref()).await.expect("deactivate");

    let buyer = customer();
    let err = ctx
        .orders
        .create_order(
            &buyer,
            order_request(
                buyer.id,
                vec![OrderLineInput { product_id: product.id, quantity: 1 }],
            ),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}
