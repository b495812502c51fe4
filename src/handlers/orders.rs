use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{self, OrderProduct, StatusHistoryEntry};
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::order_status::WorkflowInfo;
use crate::{ApiResponse, ListQuery, PaginatedResponse};

// Order DTOs

#[derive(Debug, Serialize, ToSchema)]
pub struct CustomerResponse {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AddressResponse {
    pub line1: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PricingResponse {
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
    pub customer: CustomerResponse,
    pub delivery_address: AddressResponse,
    pub delivery_method: String,
    pub payment_method: String,
    pub products: Vec<OrderProduct>,
    pub pricing: PricingResponse,
    pub payment_status: String,
    pub order_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub status_history: Vec<StatusHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    /// Requested fulfillment status (confirmed, preparing, shipped)
    pub order_status: String,
    #[serde(default)]
    pub notes: Option<String>,
    /// Email of the admin making the change, recorded in the status history
    #[serde(default)]
    pub admin_email: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UpdateOrderStatusResponse {
    pub order: OrderResponse,
    pub status_changed: bool,
    pub previous_status: String,
    pub notification_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_error: Option<String>,
}

pub(crate) fn map_order(model: order::Model) -> Result<OrderResponse, ServiceError> {
    let products = model.product_lines().map_err(|e| {
        ServiceError::SerializationError(format!("order {} products undecodable: {}", model.id, e))
    })?;
    let status_history = model.history().map_err(|e| {
        ServiceError::SerializationError(format!("order {} history undecodable: {}", model.id, e))
    })?;

    Ok(OrderResponse {
        id: model.id,
        session_id: model.session_id,
        payment_intent_id: model.payment_intent_id,
        customer: CustomerResponse {
            name: model.customer_name,
            email: model.customer_email,
            phone: model.customer_phone,
        },
        delivery_address: AddressResponse {
            line1: model.address_line1,
            city: model.address_city,
            postal_code: model.address_postal_code,
            country: model.address_country,
        },
        delivery_method: model.delivery_method,
        payment_method: model.payment_method,
        products,
        pricing: PricingResponse {
            subtotal: model.subtotal,
            delivery_fee: model.delivery_fee,
            total: model.total,
        },
        payment_status: model.payment_status,
        order_status: model.order_status,
        notes: model.notes,
        status_history,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

// Handler functions

/// List orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(ListQuery),
    responses(
        (status = 200, description = "List orders", body = crate::ApiResponse<crate::PaginatedResponse<OrderResponse>>)
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderResponse>>>, ServiceError> {
    let (orders, total) = state.services.orders.list(query.page, query.limit).await?;

    let items = orders
        .into_iter()
        .map(map_order)
        .collect::<Result<Vec<_>, _>>()?;

    let response = PaginatedResponse {
        items,
        total,
        page: query.page,
        limit: query.limit,
        total_pages: total.div_ceil(query.limit.max(1)),
    };

    Ok(Json(ApiResponse::success(response)))
}

/// Get a single order
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order details", body = crate::ApiResponse<OrderResponse>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .get(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;

    Ok(Json(ApiResponse::success(map_order(order)?)))
}

/// Update the fulfillment status of an order
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = crate::ApiResponse<UpdateOrderStatusResponse>),
        (status = 400, description = "Invalid or regressive status", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<UpdateOrderStatusResponse>>, ServiceError> {
    let outcome = state
        .services
        .order_status
        .update_status(id, &request.order_status, request.admin_email, request.notes)
        .await?;

    let response = UpdateOrderStatusResponse {
        status_changed: outcome.status_changed,
        previous_status: outcome.previous_status,
        notification_sent: outcome.notification_sent,
        notification_error: outcome.notification_error,
        order: map_order(outcome.order)?,
    };

    Ok(Json(ApiResponse::success(response)))
}

/// Expose the canonical status sequence and notification-template mapping
#[utoipa::path(
    get,
    path = "/api/v1/orders/statuses",
    responses(
        (status = 200, description = "Workflow info", body = crate::ApiResponse<WorkflowInfo>)
    ),
    tag = "Orders"
)]
pub async fn get_workflow_info(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<WorkflowInfo>>, ServiceError> {
    Ok(Json(ApiResponse::success(
        state.services.order_status.workflow_info(),
    )))
}

/// Delete an order (admin only)
#[utoipa::path(
    delete,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order deleted"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ServiceError> {
    state.services.orders.delete(id).await?;
    Ok(Json(ApiResponse::success(
        serde_json::json!({"deleted": id}),
    )))
}

/// Order routes
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/statuses", get(get_workflow_info))
        .route(
            "/{id}",
            get(get_order).delete(delete_order),
        )
        .route("/{id}/status", put(update_order_status))
}
