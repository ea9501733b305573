use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::Actor,
    entities::order::{self, OrderStatus},
    errors::ServiceError,
    services::orders::{CreateOrderRequest, OrderDetails, TransitionOrderRequest},
    ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse,
};

use super::warranties::WarrantyUnitResponse;

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderLineResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub snapshot_name: String,
    pub quantity: i32,
    pub unit_price_at_purchase: Decimal,
    pub warranty_months_snapshot: i32,
    pub warranty_exchange_months_snapshot: i32,
    pub warranty_units: Vec<WarrantyUnitResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub customer_phone: String,
    pub shipping_address: String,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub delivered_date: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub coupon_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLineResponse>,
    /// True when the call was the idempotent repeat of a DELIVERED
    /// confirmation rather than a fresh transition.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub already_delivered: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderSummary {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<order::Model> for OrderSummary {
    fn from(model: order::Model) -> Self {
        Self {
            id: model.id,
            order_number: model.order_number,
            customer_id: model.customer_id,
            status: model.status,
            total_amount: model.total_amount,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CancelOrderRequest {
    #[validate(length(min = 10, message = "Reason must be at least 10 characters"))]
    pub reason: String,
}

fn details_response(details: OrderDetails, now: DateTime<Utc>, already_delivered: bool) -> OrderResponse {
    let order = details.order;
    OrderResponse {
        id: order.id,
        order_number: order.order_number,
        customer_id: order.customer_id,
        customer_name: order.customer_name,
        customer_phone: order.customer_phone,
        shipping_address: order.shipping_address,
        status: order.status,
        total_amount: order.total_amount,
        delivered_date: order.delivered_date,
        cancel_reason: order.cancel_reason,
        coupon_id: order.coupon_id,
        created_at: order.created_at,
        lines: details
            .lines
            .into_iter()
            .map(|line| OrderLineResponse {
                id: line.item.id,
                product_id: line.item.product_id,
                snapshot_name: line.item.snapshot_name,
                quantity: line.item.quantity,
                unit_price_at_purchase: line.item.unit_price_at_purchase,
                warranty_months_snapshot: line.item.warranty_months_snapshot,
                warranty_exchange_months_snapshot: line.item.warranty_exchange_months_snapshot,
                warranty_units: line
                    .warranty_units
                    .into_iter()
                    .map(|unit| WarrantyUnitResponse::from_model(unit, now))
                    .collect(),
            })
            .collect(),
        already_delivered,
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 200, description = "Order created"),
        (status = 400, description = "Validation failed"),
        (status = 422, description = "Coupon below minimum order value"),
    ),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<CreateOrderRequest>,
) -> ApiResult<OrderResponse> {
    let details = state.services.orders.create_order(&actor, request).await?;
    let now = state.services.warranties.clock().now();
    Ok(Json(ApiResponse::success(details_response(details, now, false))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    responses((status = 200), (status = 404, description = "Unknown order")),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let details = state
        .services
        .orders
        .get_order(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
    let now = state.services.warranties.clock().now();
    Ok(Json(ApiResponse::success(details_response(details, now, false))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    responses((status = 200)),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    _actor: Actor,
    Query(query): Query<ListQuery>,
) -> ApiResult<PaginatedResponse<OrderSummary>> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, 100);
    let (orders, total) = state.services.orders.list_orders(page, limit).await?;

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items: orders.into_iter().map(OrderSummary::from).collect(),
        total,
        page,
        limit,
        total_pages: total.div_ceil(limit),
    })))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/status",
    request_body = TransitionOrderRequest,
    responses(
        (status = 200, description = "Transition applied, or idempotent DELIVERED repeat"),
        (status = 409, description = "Illegal transition"),
    ),
    tag = "orders"
)]
pub async fn transition_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<TransitionOrderRequest>,
) -> ApiResult<OrderResponse> {
    let outcome = state
        .services
        .orders
        .transition_order(&actor, id, request.new_status, request.note)
        .await?;
    let already_delivered = outcome.is_noop();

    let details = state
        .services
        .orders
        .get_order(outcome.order().id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
    let now = state.services.warranties.clock().now();
    Ok(Json(ApiResponse::success(details_response(
        details,
        now,
        already_delivered,
    ))))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    request_body = CancelOrderRequest,
    responses((status = 200), (status = 409, description = "Order is past cancellation")),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelOrderRequest>,
) -> ApiResult<OrderSummary> {
    request
        .validate()
        .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
    let order = state
        .services
        .orders
        .cancel_order(&actor, id, request.reason)
        .await?;
    Ok(Json(ApiResponse::success(OrderSummary::from(order))))
}
