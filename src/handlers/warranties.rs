use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::Actor,
    entities::warranty_unit::{self, WarrantyPhase, WarrantyStatus},
    errors::ServiceError,
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct WarrantyUnitResponse {
    pub id: Uuid,
    pub order_item_id: Uuid,
    pub unit_no: i32,
    pub warranty_code: String,
    pub status: WarrantyStatus,
    /// Derived from the three dates at read time, never stored.
    pub phase: WarrantyPhase,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub exchange_until: DateTime<Utc>,
    pub replaced_by: Option<Uuid>,
}

impl WarrantyUnitResponse {
    pub fn from_model(model: warranty_unit::Model, now: DateTime<Utc>) -> Self {
        let phase = model.phase(now);
        Self {
            id: model.id,
            order_item_id: model.order_item_id,
            unit_no: model.unit_no,
            warranty_code: model.warranty_code,
            status: model.status,
            phase,
            start_date: model.start_date,
            end_date: model.end_date,
            exchange_until: model.exchange_until,
            replaced_by: model.replaced_by,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VoidWarrantyRequest {
    #[validate(length(min = 1, message = "Reason is required"))]
    pub reason: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/warranties/{id}",
    responses((status = 200), (status = 404, description = "Unknown warranty unit")),
    tag = "warranties"
)]
pub async fn get_warranty(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<WarrantyUnitResponse> {
    let unit = state
        .services
        .warranties
        .get_warranty(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Warranty unit {} not found", id)))?;
    let now = state.services.warranties.clock().now();
    Ok(Json(ApiResponse::success(WarrantyUnitResponse::from_model(
        unit, now,
    ))))
}

#[utoipa::path(
    get,
    path = "/api/v1/warranties/code/{code}",
    responses((status = 200), (status = 404, description = "Unknown warranty code")),
    tag = "warranties"
)]
pub async fn get_by_code(
    State(state): State<AppState>,
    _actor: Actor,
    Path(code): Path<String>,
) -> ApiResult<WarrantyUnitResponse> {
    let unit = state
        .services
        .warranties
        .get_by_code(&code)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Warranty code {} not found", code)))?;
    let now = state.services.warranties.clock().now();
    Ok(Json(ApiResponse::success(WarrantyUnitResponse::from_model(
        unit, now,
    ))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/warranties",
    responses((status = 200)),
    tag = "warranties"
)]
pub async fn list_for_order(
    State(state): State<AppState>,
    _actor: Actor,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Vec<WarrantyUnitResponse>> {
    let units = state.services.warranties.list_for_order(order_id).await?;
    let now = state.services.warranties.clock().now();
    Ok(Json(ApiResponse::success(
        units
            .into_iter()
            .map(|unit| WarrantyUnitResponse::from_model(unit, now))
            .collect(),
    )))
}

#[utoipa::path(
    post,
    path = "/api/v1/warranties/{id}/void-exchange",
    request_body = VoidWarrantyRequest,
    responses((status = 200), (status = 403, description = "Admin only")),
    tag = "warranties"
)]
pub async fn void_exchange(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<VoidWarrantyRequest>,
) -> ApiResult<WarrantyUnitResponse> {
    let unit = state
        .services
        .warranties
        .void_exchange(&actor, id, &request.reason)
        .await?;
    let now = state.services.warranties.clock().now();
    Ok(Json(ApiResponse::success(WarrantyUnitResponse::from_model(
        unit, now,
    ))))
}

#[utoipa::path(
    post,
    path = "/api/v1/warranties/{id}/void",
    request_body = VoidWarrantyRequest,
    responses((status = 200), (status = 403, description = "Admin only")),
    tag = "warranties"
)]
pub async fn void_full(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<VoidWarrantyRequest>,
) -> ApiResult<WarrantyUnitResponse> {
    let unit = state
        .services
        .warranties
        .void_full(&actor, id, &request.reason)
        .await?;
    let now = state.services.warranties.clock().now();
    Ok(Json(ApiResponse::success(WarrantyUnitResponse::from_model(
        unit, now,
    ))))
}
