use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Order & Payment API

Backend for a hosted-checkout storefront: creates processor checkout
sessions, reconciles asynchronous payment webhooks into durable
payment/order records, and drives the fulfillment status workflow with
customer notifications.

## Error Handling

The API uses consistent error response formats with appropriate HTTP status
codes:

```json
{
  "error": "Bad Request",
  "message": "Validation failed",
  "request_id": "req-abc123xyz",
  "timestamp": "2025-07-14T10:30:00.000Z"
}
```

## Pagination

List endpoints support `page` and `limit` query parameters.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Checkout", description = "Hosted checkout session endpoints"),
        (name = "Orders", description = "Order management and fulfillment workflow"),
        (name = "Payments", description = "Payment ledger and webhook endpoints")
    ),
    paths(
        // Checkout
        crate::handlers::checkout::create_checkout_session,
        crate::handlers::checkout::get_checkout_session,

        // Orders
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::get_workflow_info,
        crate::handlers::orders::delete_order,

        // Payments
        crate::handlers::payments::list_payments,
        crate::handlers::payments::get_payment,
        crate::handlers::payments::get_payment_by_session,
        crate::handlers::payments::get_customer_payments,
        crate::handlers::payments::refund_payment,
        crate::handlers::payments::delete_payment,

        // Webhooks
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::PaginatedResponse<serde_json::Value>,
            crate::ListQuery,

            // Checkout types
            crate::services::checkout::CreateCheckoutRequest,
            crate::services::checkout::CheckoutItem,
            crate::services::checkout::CustomerInfo,
            crate::services::checkout::CheckoutCreated,
            crate::services::orders::DeliveryAddress,
            crate::handlers::checkout::SessionResponse,

            // Order types
            crate::handlers::orders::OrderResponse,
            crate::handlers::orders::UpdateOrderStatusRequest,
            crate::handlers::orders::UpdateOrderStatusResponse,
            crate::entities::order::OrderProduct,
            crate::entities::order::StatusHistoryEntry,
            crate::services::order_status::WorkflowInfo,
            crate::services::order_status::StatusTemplate,

            // Payment types
            crate::handlers::payments::PaymentResponse,
            crate::handlers::payments::PaymentListResponse,
            crate::handlers::payments::RefundPaymentRequest,
            crate::handlers::payments::RefundPaymentResponse,
            crate::services::ledger::AttemptStatistics,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
