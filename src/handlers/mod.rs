pub mod orders;
pub mod returns;
pub mod warranties;

use axum::{
    routing::{get, post},
    Json, Router,
};
use utoipa::OpenApi;

use crate::openapi::ApiDoc;
use crate::AppState;

/// Service container handed to the router.
#[derive(Clone)]
pub struct AppServices {
    pub orders: std::sync::Arc<crate::services::orders::OrderService>,
    pub returns: std::sync::Arc<crate::services::returns::ReturnService>,
    pub warranties: std::sync::Arc<crate::services::warranties::WarrantyService>,
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api-docs/openapi.json", get(openapi_spec))
        .route("/api/v1/orders", post(orders::create_order).get(orders::list_orders))
        .route("/api/v1/orders/:id", get(orders::get_order))
        .route("/api/v1/orders/:id/status", post(orders::transition_order))
        .route("/api/v1/orders/:id/cancel", post(orders::cancel_order))
        .route("/api/v1/orders/:id/warranties", get(warranties::list_for_order))
        .route("/api/v1/returns", post(returns::create_return).get(returns::list_returns))
        .route("/api/v1/returns/:id", get(returns::get_return))
        .route("/api/v1/returns/:id/approve", post(returns::approve_return))
        .route("/api/v1/returns/:id/reject", post(returns::reject_return))
        .route("/api/v1/returns/:id/complete", post(returns::complete_return))
        .route("/api/v1/warranties/:id", get(warranties::get_warranty))
        .route("/api/v1/warranties/code/:code", get(warranties::get_by_code))
        .route(
            "/api/v1/warranties/:id/void-exchange",
            post(warranties::void_exchange),
        )
        .route("/api/v1/warranties/:id/void", post(warranties::void_full))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn openapi_document_is_served_as_json() {
        let Json(doc) = openapi_spec().await;
        assert!(doc.paths.paths.contains_key("/api/v1/orders"));
        assert!(doc.paths.paths.contains_key("/api/v1/warranties/code/{code}"));
    }
}
