use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::payment_attempt::{self, PaymentStatus};
use crate::errors::ServiceError;
use crate::handlers::orders::{AddressResponse, CustomerResponse, PricingResponse};
use crate::handlers::AppState;
use crate::services::ledger::{AttemptFilter, AttemptStatistics};
use crate::ApiResponse;

// Payment DTOs

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
    pub customer: CustomerResponse,
    pub delivery_address: AddressResponse,
    pub delivery_method: String,
    pub payment_method: String,
    pub items: serde_json::Value,
    pub pricing: PricingResponse,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_received: Option<Decimal>,
    pub refunded: bool,
    pub refund_amount: Decimal,
    pub order_created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn map_attempt(model: payment_attempt::Model) -> PaymentResponse {
    PaymentResponse {
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
        items: model.items,
        pricing: PricingResponse {
            subtotal: model.subtotal,
            delivery_fee: model.delivery_fee,
            total: model.total,
        },
        payment_status: model.payment_status,
        processor_status: model.processor_status,
        failure_reason: model.failure_reason,
        currency: model.currency,
        amount_received: model.amount_received,
        refunded: model.refunded,
        refund_amount: model.refund_amount,
        order_created: model.order_created,
        order_id: model.order_id,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

#[derive(Debug, Deserialize, ToSchema, utoipa::IntoParams)]
pub struct PaymentListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    /// Filter by payment status (pending, processing, succeeded, failed, canceled)
    #[serde(default)]
    pub status: Option<String>,
    /// Substring match on customer email
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub from_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to_date: Option<DateTime<Utc>>,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    50
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentListResponse {
    pub payments: Vec<PaymentResponse>,
    pub pagination: PaginationMeta,
    pub statistics: AttemptStatistics,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaginationMeta {
    pub current: u64,
    pub total: u64,
    pub total_records: u64,
    pub limit: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefundPaymentRequest {
    /// Refund amount in major units (omit for a full refund)
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefundPaymentResponse {
    pub message: String,
    pub refund: RefundInfo,
    pub payment: PaymentResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefundInfo {
    pub id: String,
    pub amount: Decimal,
    pub status: String,
}

fn parse_status_filter(value: &str) -> Result<PaymentStatus, ServiceError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "pending" => Ok(PaymentStatus::Pending),
        "processing" => Ok(PaymentStatus::Processing),
        "succeeded" => Ok(PaymentStatus::Succeeded),
        "failed" => Ok(PaymentStatus::Failed),
        "cancelled" | "canceled" => Ok(PaymentStatus::Canceled),
        "requires_action" => Ok(PaymentStatus::RequiresAction),
        other => Err(ServiceError::ValidationError(format!(
            "invalid payment status filter: {}",
            other
        ))),
    }
}

// Handler functions

/// List payment attempts with filters and aggregate statistics
#[utoipa::path(
    get,
    path = "/api/v1/payments",
    params(PaymentListQuery),
    responses(
        (status = 200, description = "List payments", body = crate::ApiResponse<PaymentListResponse>)
    ),
    tag = "Payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<PaymentListQuery>,
) -> Result<Json<ApiResponse<PaymentListResponse>>, ServiceError> {
    let status = match &query.status {
        Some(value) => Some(parse_status_filter(value)?),
        None => None,
    };

    let filter = AttemptFilter {
        status,
        email: query.email.clone(),
        from_date: query.from_date,
        to_date: query.to_date,
    };

    let (attempts, total) = state
        .services
        .ledger
        .list(query.page, query.limit, filter)
        .await?;
    let statistics = state.services.ledger.statistics().await?;

    let response = PaymentListResponse {
        payments: attempts.into_iter().map(map_attempt).collect(),
        pagination: PaginationMeta {
            current: query.page,
            total: total.div_ceil(query.limit.max(1)),
            total_records: total,
            limit: query.limit,
        },
        statistics,
    };

    Ok(Json(ApiResponse::success(response)))
}

/// Get a payment attempt by ID
#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment details", body = crate::ApiResponse<PaymentResponse>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentResponse>>, ServiceError> {
    let attempt = state
        .services
        .ledger
        .get(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", id)))?;

    Ok(Json(ApiResponse::success(map_attempt(attempt))))
}

/// Get a payment attempt by checkout session ID
#[utoipa::path(
    get,
    path = "/api/v1/payments/session/{session_id}",
    params(("session_id" = String, Path, description = "Checkout session ID")),
    responses(
        (status = 200, description = "Payment details", body = crate::ApiResponse<PaymentResponse>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn get_payment_by_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<PaymentResponse>>, ServiceError> {
    let attempt = state
        .services
        .ledger
        .find_by_session(&session_id)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Payment for session {} not found", session_id))
        })?;

    Ok(Json(ApiResponse::success(map_attempt(attempt))))
}

/// Get payment attempts for a customer email, newest first
#[utoipa::path(
    get,
    path = "/api/v1/payments/customer/{email}",
    params(("email" = String, Path, description = "Customer email")),
    responses(
        (status = 200, description = "Customer payments", body = crate::ApiResponse<Vec<PaymentResponse>>)
    ),
    tag = "Payments"
)]
pub async fn get_customer_payments(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<ApiResponse<Vec<PaymentResponse>>>, ServiceError> {
    let attempts = state.services.ledger.find_by_customer_email(&email).await?;
    Ok(Json(ApiResponse::success(
        attempts.into_iter().map(map_attempt).collect(),
    )))
}

/// Refund a succeeded payment, fully or partially
#[utoipa::path(
    post,
    path = "/api/v1/payments/{id}/refund",
    params(("id" = Uuid, Path, description = "Payment ID")),
    request_body = RefundPaymentRequest,
    responses(
        (status = 200, description = "Refund processed", body = crate::ApiResponse<RefundPaymentResponse>),
        (status = 400, description = "Payment not refundable", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<RefundPaymentRequest>,
) -> Result<Json<ApiResponse<RefundPaymentResponse>>, ServiceError> {
    let (payment, refund) = state
        .services
        .payments
        .refund(id, request.amount, request.reason)
        .await?;

    let response = RefundPaymentResponse {
        message: "Refund processed successfully".to_string(),
        refund: RefundInfo {
            id: refund.id,
            amount: crate::services::money::from_minor_units(refund.amount_minor),
            status: refund.status,
        },
        payment: map_attempt(payment),
    };

    Ok(Json(ApiResponse::success(response)))
}

/// Delete a payment record (admin purge)
#[utoipa::path(
    delete,
    path = "/api/v1/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment deleted"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn delete_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ServiceError> {
    state.services.ledger.delete(id).await?;
    Ok(Json(ApiResponse::success(
        serde_json::json!({"deleted": id}),
    )))
}

/// Payment routes. The webhook lives here too so the nested router owns the
/// whole /payments prefix.
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_payments))
        .route(
            "/webhook",
            post(crate::handlers::payment_webhooks::payment_webhook),
        )
        .route("/session/{session_id}", get(get_payment_by_session))
        .route("/customer/{email}", get(get_customer_payments))
        .route("/{id}", get(get_payment).delete(delete_payment))
        .route("/{id}/refund", post(refund_payment))
}
