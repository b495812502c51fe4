use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::checkout::{CheckoutCreated, CreateCheckoutRequest};

/// Processor session state for the storefront confirmation page. Amounts are
/// passed through in minor units, exactly as the processor reports them.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub id: String,
    pub payment_status: String,
    pub amount_total: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    pub metadata: std::collections::HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent: Option<String>,
}

/// Create a hosted checkout session
#[utoipa::path(
    post,
    path = "/api/v1/checkout/sessions",
    request_body = CreateCheckoutRequest,
    responses(
        (status = 201, description = "Session created", body = crate::ApiResponse<CheckoutCreated>),
        (status = 400, description = "Missing items or customer", body = crate::errors::ErrorResponse),
        (status = 502, description = "Processor unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Json(request): Json<CreateCheckoutRequest>,
) -> Result<(StatusCode, Json<crate::ApiResponse<CheckoutCreated>>), ServiceError> {
    let created = state.services.checkout.create_session(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(crate::ApiResponse::success(created)),
    ))
}

/// Retrieve a checkout session from the processor
#[utoipa::path(
    get,
    path = "/api/v1/checkout/sessions/{session_id}",
    params(("session_id" = String, Path, description = "Checkout session ID")),
    responses(
        (status = 200, description = "Session details", body = crate::ApiResponse<SessionResponse>),
        (status = 502, description = "Processor unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn get_checkout_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<crate::ApiResponse<SessionResponse>>, ServiceError> {
    let session = state
        .services
        .checkout
        .retrieve_session(&session_id)
        .await?;

    Ok(Json(crate::ApiResponse::success(SessionResponse {
        id: session.id,
        payment_status: session.payment_status,
        amount_total: session.amount_total_minor,
        currency: session.currency,
        customer_email: session.customer_email,
        metadata: session.metadata,
        payment_intent: session.payment_intent_id,
    })))
}

/// Checkout routes
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_checkout_session))
        .route("/sessions/{session_id}", get(get_checkout_session))
}
