//! Return workflow: filing window, review rules, replacement orders, and the
//! warranty replacement chain closed by a technician.

mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use common::{admin, customer, staff, technician, TestCtx};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

use voltcart_api::{
    auth::{Actor, Role},
    entities::{
        order::OrderStatus, product, return_request::ReturnStatus,
        warranty_unit::WarrantyStatus,
    },
    errors::ServiceError,
    services::{
        orders::{CreateOrderRequest, OrderDetails, OrderLineInput},
        returns::CreateReturnRequest,
    },
};

/// Seeds a product, places a one-unit order for `buyer` and walks it to
/// DELIVERED. Returns the loaded order with its minted warranty unit.
async fn delivered_order(ctx: &TestCtx, buyer: &Actor, price: rust_decimal::Decimal) -> (product::Model, OrderDetails) {
    let sku = format!("SKU-{}", &Uuid::new_v4().to_string()[..8]);
    let product = ctx
        .seed_product_with_warranty("Volt Phone X", &sku, price, 12, 1)
        .await;

    let details = ctx
        .orders
        .create_order(
            buyer,
            CreateOrderRequest {
                customer_id: buyer.id,
                customer_name: "Linh Tran".to_string(),
                customer_phone: "+84912345678".to_string(),
                shipping_address: "12 Vo Thi Sau, District 3, HCMC".to_string(),
                items: vec![OrderLineInput { product_id: product.id, quantity: 1 }],
                coupon_code: None,
            },
        )
        .await
        .expect("order created");

    let shop = staff();
    for status in [OrderStatus::Confirmed, OrderStatus::Shipping, OrderStatus::Delivered] {
        ctx.orders
            .transition_order(&shop, details.order.id, status, None)
            .await
            .expect("transition");
    }
    let loaded = ctx
        .orders
        .get_order(details.order.id)
        .await
        .unwrap()
        .unwrap();
    (product, loaded)
}

fn return_request(order_id: Uuid, unit_id: Option<Uuid>) -> CreateReturnRequest {
    CreateReturnRequest {
        order_id,
        warranty_unit_id: unit_id,
        reason: "Screen flickers after a few minutes".to_string(),
        images: vec!["https://img.voltcart.test/claim-01.jpg".to_string()],
    }
}

#[tokio::test]
async fn return_window_is_inclusive_at_the_boundary() {
    let ctx = TestCtx::new().await;
    let buyer = customer();
    let (_, order) = delivered_order(&ctx, &buyer, dec!(500)).await;
    let unit_id = order.lines[0].warranty_units[0].id;

    // Exactly 30 days after delivery: still allowed.
    ctx.clock.advance(Duration::days(common::RETURN_WINDOW_DAYS));
    let created = ctx
        .returns
        .create_return(&buyer, return_request(order.order.id, Some(unit_id)))
        .await
        .expect("boundary claim accepted");
    assert_eq!(created.status, ReturnStatus::Pending);
}

#[tokio::test]
async fn return_window_closes_the_day_after() {
    let ctx = TestCtx::new().await;
    let buyer = customer();
    let (_, order) = delivered_order(&ctx, &buyer, dec!(500)).await;
    let unit_id = order.lines[0].warranty_units[0].id;

    ctx.clock
        .advance(Duration::days(common::RETURN_WINDOW_DAYS + 1));
    let err = ctx
        .returns
        .create_return(&buyer, return_request(order.order.id, Some(unit_id)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ReturnWindowExpired(_));
}

#[tokio::test]
async fn one_pending_claim_per_unit() {
    let ctx = TestCtx::new().await;
    let buyer = customer();
    let (_, order) = delivered_order(&ctx, &buyer, dec!(500)).await;
    let unit_id = order.lines[0].warranty_units[0].id;

    ctx.returns
        .create_return(&buyer, return_request(order.order.id, Some(unit_id)))
        .await
        .expect("first claim");
    let err = ctx
        .returns
        .create_return(&buyer, return_request(order.order.id, Some(unit_id)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::DuplicatePendingReturn(id) if id == unit_id);
}

#[tokio::test]
async fn returns_are_scoped_to_the_owner_and_delivered_orders() {
    let ctx = TestCtx::new().await;
    let buyer = customer();
    let (_, order) = delivered_order(&ctx, &buyer, dec!(500)).await;
    let unit_id = order.lines[0].warranty_units[0].id;

    let stranger = customer();
    let err = ctx
        .returns
        .create_return(&stranger, return_request(order.order.id, Some(unit_id)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));

    // Fresh, undelivered order by the same buyer.
    let sku = format!("SKU-{}", &Uuid::new_v4().to_string()[..8]);
    let other = ctx.seed_product("Volt Hub", &sku, dec!(60)).await;
    let fresh = ctx
        .orders
        .create_order(
            &buyer,
            CreateOrderRequest {
                customer_id: buyer.id,
                customer_name: "Linh Tran".to_string(),
                customer_phone: "+84912345678".to_string(),
                shipping_address: "12 Vo Thi Sau, District 3, HCMC".to_string(),
                items: vec![OrderLineInput { product_id: other.id, quantity: 1 }],
                coupon_code: None,
            },
        )
        .await
        .unwrap();
    let err = ctx
        .returns
        .create_return(&buyer, return_request(fresh.order.id, None))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn filer_cannot_review_their_own_return() {
    let ctx = TestCtx::new().await;
    let buyer = customer();
    let (_, order) = delivered_order(&ctx, &buyer, dec!(500)).await;
    let unit_id = order.lines[0].warranty_units[0].id;

    let created = ctx
        .returns
        .create_return(&buyer, return_request(order.order.id, Some(unit_id)))
        .await
        .unwrap();

    // Same person, now wearing a staff badge.
    let moonlighting = Actor::new(buyer.id, Role::Staff);
    let err = ctx
        .returns
        .approve_return(&moonlighting, created.id, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));
}

#[tokio::test]
async fn approval_spawns_a_replacement_order_for_active_products() {
    let ctx = TestCtx::new().await;
    let buyer = customer();
    let (product, order) = delivered_order(&ctx, &buyer, dec!(500)).await;
    let unit_id = order.lines[0].warranty_units[0].id;

    // Catalog repriced since the sale; the replacement uses the current price.
    let mut edit: product::ActiveModel = product.clone().into();
    edit.price = Set(dec!(450));
    edit.update(ctx.db.as_ref()).await.unwrap();

    let created = ctx
        .returns
        .create_return(&buyer, return_request(order.order.id, Some(unit_id)))
        .await
        .unwrap();
    let approved = ctx
        .returns
        .approve_return(&staff(), created.id, Some("verified in store".to_string()))
        .await
        .expect("approve");

    assert_eq!(approved.status, ReturnStatus::Approved);
    let replacement_id = approved.replacement_order_id.expect("replacement spawned");

    let replacement = ctx
        .orders
        .get_order(replacement_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replacement.order.status, OrderStatus::New);
    assert_eq!(
        replacement.order.order_number,
        format!("{}-R1", order.order.order_number)
    );
    assert_eq!(replacement.order.total_amount, dec!(450));
    assert_eq!(replacement.lines.len(), 1);
    assert_eq!(replacement.lines[0].item.quantity, 1);
    assert!(replacement.lines[0].item.promo_snapshot.is_none());
}

#[tokio::test]
async fn approval_without_an_active_product_spawns_nothing() {
    let ctx = TestCtx::new().await;
    let buyer = customer();
    let (product, order) = delivered_order(&ctx, &buyer, dec!(500)).await;
    let unit_id = order.lines[0].warranty_units[0].id;

    let mut edit: product::ActiveModel = product.into();
    edit.is_active = Set(false);
    edit.update(ctx.db.as_ref()).await.unwrap();

    let created = ctx
        .returns
        .create_return(&buyer, return_request(order.order.id, Some(unit_id)))
        .await
        .unwrap();
    let approved = ctx
        .returns
        .approve_return(&staff(), created.id, None)
        .await
        .unwrap();

    assert_eq!(approved.status, ReturnStatus::Approved);
    assert!(approved.replacement_order_id.is_none());
}

#[tokio::test]
async fn rejection_needs_a_substantive_note() {
    let ctx = TestCtx::new().await;
    let buyer = customer();
    let (_, order) = delivered_order(&ctx, &buyer, dec!(500)).await;
    let unit_id = order.lines[0].warranty_units[0].id;

    let created = ctx
        .returns
        .create_return(&buyer, return_request(order.order.id, Some(unit_id)))
        .await
        .unwrap();

    let reviewer = staff();
    let err = ctx
        .returns
        .reject_return(&reviewer, created.id, "no".to_string())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let rejected = ctx
        .returns
        .reject_return(&reviewer, created.id, "damage is clearly user-inflicted".to_string())
        .await
        .unwrap();
    assert_eq!(rejected.status, ReturnStatus::Rejected);
    assert!(rejected.admin_note.is_some());

    // Terminal; a second review bounces.
    let err = ctx
        .returns
        .approve_return(&reviewer, created.id, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn completion_replaces_the_warranty_unit() {
    let ctx = TestCtx::new().await;
    let buyer = customer();
    let (_, order) = delivered_order(&ctx, &buyer, dec!(500)).await;
    let old_unit = order.lines[0].warranty_units[0].clone();

    let created = ctx
        .returns
        .create_return(&buyer, return_request(order.order.id, Some(old_unit.id)))
        .await
        .unwrap();
    ctx.returns
        .approve_return(&staff(), created.id, None)
        .await
        .unwrap();

    // The swap happens a week later; the fresh term starts then.
    ctx.clock.advance(Duration::days(7));
    let completed = ctx
        .returns
        .complete_return(&technician(), created.id)
        .await
        .expect("complete");

    assert_eq!(completed.return_request.status, ReturnStatus::Completed);
    assert_eq!(completed.old_warranty.status, WarrantyStatus::Replaced);
    assert_eq!(completed.old_warranty.replaced_by, Some(completed.new_warranty.id));

    let new = &completed.new_warranty;
    assert_eq!(new.status, WarrantyStatus::Active);
    assert_ne!(new.warranty_code, completed.old_warranty.warranty_code);
    assert_eq!(new.warranty_months_at_purchase, old_unit.warranty_months_at_purchase);
    assert_eq!(new.start_date, ctx.now());
    assert!(new.end_date > old_unit.end_date);

    // The chain link is set exactly once.
    let err = ctx
        .returns
        .complete_return(&technician(), created.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn a_claim_is_reviewed_only_once() {
    let ctx = TestCtx::new().await;
    let buyer = customer();
    let (_, order) = delivered_order(&ctx, &buyer, dec!(500)).await;
    let unit_id = order.lines[0].warranty_units[0].id;

    let created = ctx
        .returns
        .create_return(&buyer, return_request(order.order.id, Some(unit_id)))
        .await
        .unwrap();
    ctx.returns
        .approve_return(&staff(), created.id, None)
        .await
        .unwrap();

    // A second review finds nothing pending.
    let err = ctx
        .returns
        .approve_return(&staff(), created.id, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
    let err = ctx
        .returns
        .reject_return(&staff(), created.id, "changed my mind about this".to_string())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn a_voided_unit_cannot_be_swapped_at_completion() {
    let ctx = TestCtx::new().await;
    let buyer = customer();
    let (_, order) = delivered_order(&ctx, &buyer, dec!(500)).await;
    let unit_id = order.lines[0].warranty_units[0].id;

    let created = ctx
        .returns
        .create_return(&buyer, return_request(order.order.id, Some(unit_id)))
        .await
        .unwrap();
    ctx.returns
        .approve_return(&staff(), created.id, None)
        .await
        .unwrap();

    // Fraud caught between approval and the physical swap.
    ctx.warranties
        .void_full(&admin(), unit_id, "serial number tampered")
        .await
        .unwrap();

    let err = ctx
        .returns
        .complete_return(&technician(), created.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));

    let unit = ctx.warranties.get_warranty(unit_id).await.unwrap().unwrap();
    assert_eq!(unit.status, WarrantyStatus::Voided);
    assert!(unit.replaced_by.is_none());
}

#[tokio::test]
async fn completion_requires_prior_approval_and_a_technician() {
    let ctx = TestCtx::new().await;
    let buyer = customer();
    let (_, order) = delivered_order(&ctx, &buyer, dec!(500)).await;
    let unit_id = order.lines[0].warranty_units[0].id;

    let created = ctx
        .returns
        .create_return(&buyer, return_request(order.order.id, Some(unit_id)))
        .await
        .unwrap();

    // Still pending.
    let err = ctx
        .returns
        .complete_return(&technician(), created.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));

    ctx.returns
        .approve_return(&staff(), created.id, None)
        .await
        .unwrap();

    // The reviewer role cannot close it out.
    let err = ctx
        .returns
        .complete_return(&staff(), created.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));
}
