use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use bytes::Bytes;
use tracing::info;

use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::reconciliation::ReconciliationOutcome;

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Event acknowledged"),
        (status = 400, description = "Invalid signature or payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    // Verification and state transitions both live in the reconciler; the
    // handler only owes the source a 200 for every authenticated event.
    let outcome = state
        .services
        .reconciliation
        .process_event(&body, &headers)
        .await?;

    match &outcome {
        ReconciliationOutcome::Ignored { event_type } => {
            info!(event_type = %event_type, "Webhook acknowledged without action");
        }
        ReconciliationOutcome::UnknownSession { reference } => {
            info!(reference = %reference, "Webhook for untracked session acknowledged");
        }
        _ => {}
    }

    Ok(Json(serde_json::json!({ "received": true })))
}
