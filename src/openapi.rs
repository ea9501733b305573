//! OpenAPI document assembly for the HTTP surface.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "VoltCart API",
        version = "0.3.0",
        description = "Order, warranty and return lifecycle backend for the VoltCart storefront."
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::transition_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::returns::create_return,
        crate::handlers::returns::get_return,
        crate::handlers::returns::list_returns,
        crate::handlers::returns::approve_return,
        crate::handlers::returns::reject_return,
        crate::handlers::returns::complete_return,
        crate::handlers::warranties::get_warranty,
        crate::handlers::warranties::get_by_code,
        crate::handlers::warranties::list_for_order,
        crate::handlers::warranties::void_exchange,
        crate::handlers::warranties::void_full,
    ),
    components(schemas(
        crate::handlers::orders::OrderResponse,
        crate::handlers::orders::OrderLineResponse,
        crate::handlers::orders::OrderSummary,
        crate::handlers::orders::CancelOrderRequest,
        crate::handlers::returns::ReturnResponse,
        crate::handlers::returns::CompletedReturnResponse,
        crate::handlers::returns::ReviewReturnRequest,
        crate::handlers::returns::RejectReturnRequest,
        crate::handlers::warranties::WarrantyUnitResponse,
        crate::handlers::warranties::VoidWarrantyRequest,
        crate::services::orders::CreateOrderRequest,
        crate::services::orders::OrderLineInput,
        crate::services::orders::TransitionOrderRequest,
        crate::services::returns::CreateReturnRequest,
        crate::entities::order::OrderStatus,
        crate::entities::warranty_unit::WarrantyStatus,
        crate::entities::warranty_unit::WarrantyPhase,
        crate::entities::return_request::ReturnStatus,
    )),
    tags(
        (name = "orders", description = "Order lifecycle endpoints"),
        (name = "returns", description = "Return and replacement workflow endpoints"),
        (name = "warranties", description = "Warranty unit endpoints")
    )
)]
pub struct ApiDoc;
