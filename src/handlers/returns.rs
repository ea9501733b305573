use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::Actor,
    entities::return_request::{self, ReturnStatus},
    errors::ServiceError,
    services::returns::CreateReturnRequest,
    ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse,
};

use super::warranties::WarrantyUnitResponse;

#[derive(Debug, Serialize, ToSchema)]
pub struct ReturnResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub warranty_unit_id: Option<Uuid>,
    pub customer_id: Uuid,
    pub reason: String,
    pub images: Vec<String>,
    pub status: ReturnStatus,
    pub admin_note: Option<String>,
    pub replacement_order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<return_request::Model> for ReturnResponse {
    fn from(model: return_request::Model) -> Self {
        let images = model.image_urls();
        Self {
            id: model.id,
            order_id: model.order_id,
            warranty_unit_id: model.warranty_unit_id,
            customer_id: model.customer_id,
            reason: model.reason,
            images,
            status: model.status,
            admin_note: model.admin_note,
            replacement_order_id: model.replacement_order_id,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CompletedReturnResponse {
    pub return_request: ReturnResponse,
    pub old_warranty: WarrantyUnitResponse,
    pub new_warranty: WarrantyUnitResponse,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReviewReturnRequest {
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RejectReturnRequest {
    pub note: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/returns",
    request_body = CreateReturnRequest,
    responses(
        (status = 200, description = "Return filed"),
        (status = 409, description = "Duplicate pending return for the unit"),
        (status = 422, description = "Return window expired"),
    ),
    tag = "returns"
)]
pub async fn create_return(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<CreateReturnRequest>,
) -> ApiResult<ReturnResponse> {
    let created = state.services.returns.create_return(&actor, request).await?;
    Ok(Json(ApiResponse::success(ReturnResponse::from(created))))
}

#[utoipa::path(
    get,
    path = "/api/v1/returns/{id}",
    responses((status = 200), (status = 404, description = "Unknown return")),
    tag = "returns"
)]
pub async fn get_return(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<ReturnResponse> {
    let request = state
        .services
        .returns
        .get_return(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Return {} not found", id)))?;
    Ok(Json(ApiResponse::success(ReturnResponse::from(request))))
}

#[utoipa::path(
    get,
    path = "/api/v1/returns",
    responses((status = 200)),
    tag = "returns"
)]
pub async fn list_returns(
    State(state): State<AppState>,
    _actor: Actor,
    Query(query): Query<ListQuery>,
) -> ApiResult<PaginatedResponse<ReturnResponse>> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, 100);
    let (requests, total) = state.services.returns.list_returns(page, limit).await?;

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items: requests.into_iter().map(ReturnResponse::from).collect(),
        total,
        page,
        limit,
        total_pages: total.div_ceil(limit),
    })))
}

#[utoipa::path(
    post,
    path = "/api/v1/returns/{id}/approve",
    request_body = ReviewReturnRequest,
    responses((status = 200), (status = 409, description = "Return is not pending")),
    tag = "returns"
)]
pub async fn approve_return(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<ReviewReturnRequest>,
) -> ApiResult<ReturnResponse> {
    let updated = state
        .services
        .returns
        .approve_return(&actor, id, request.note)
        .await?;
    Ok(Json(ApiResponse::success(ReturnResponse::from(updated))))
}

#[utoipa::path(
    post,
    path = "/api/v1/returns/{id}/reject",
    request_body = RejectReturnRequest,
    responses((status = 200), (status = 409, description = "Return is not pending")),
    tag = "returns"
)]
pub async fn reject_return(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectReturnRequest>,
) -> ApiResult<ReturnResponse> {
    let updated = state
        .services
        .returns
        .reject_return(&actor, id, request.note)
        .await?;
    Ok(Json(ApiResponse::success(ReturnResponse::from(updated))))
}

#[utoipa::path(
    post,
    path = "/api/v1/returns/{id}/complete",
    responses(
        (status = 200, description = "Warranty replaced, return closed"),
        (status = 403, description = "Technician only"),
    ),
    tag = "returns"
)]
pub async fn complete_return(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<CompletedReturnResponse> {
    let completed = state.services.returns.complete_return(&actor, id).await?;
    let now = state.services.warranties.clock().now();
    Ok(Json(ApiResponse::success(CompletedReturnResponse {
        return_request: ReturnResponse::from(completed.return_request),
        old_warranty: WarrantyUnitResponse::from_model(completed.old_warranty, now),
        new_warranty: WarrantyUnitResponse::from_model(completed.new_warranty, now),
    })))
}
