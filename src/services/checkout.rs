use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    config::AppConfig,
    errors::ServiceError,
    processor::{CreateSessionParams, PaymentProcessor, SessionDetails, SessionLineItem},
    services::ledger::{AttemptSnapshot, LedgerService},
    services::money,
    services::orders::{metadata_keys, DeliveryAddress, DELIVERY_FEE_ITEM_NAME},
};

/// A purchasable line as submitted by the storefront, major units.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutItem {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    pub quantity: i64,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CustomerInfo {
    #[validate(length(min = 1, message = "Customer name is required"))]
    pub name: String,
    #[validate(email(message = "Customer email must be valid"))]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub address: DeliveryAddress,
}

/// Checkout request as accepted by the HTTP surface.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateCheckoutRequest {
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<CheckoutItem>,
    #[validate]
    pub customer: CustomerInfo,
    pub delivery_method: String,
    #[serde(default)]
    pub payment_method: Option<String>,
    pub total: Decimal,
    #[serde(default)]
    pub success_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutCreated {
    pub session_id: String,
    pub url: String,
}

/// Creates hosted checkout sessions and records the pending ledger row.
#[derive(Clone)]
pub struct CheckoutService {
    config: AppConfig,
    ledger: LedgerService,
    processor: Arc<dyn PaymentProcessor>,
}

impl CheckoutService {
    pub fn new(
        config: AppConfig,
        ledger: LedgerService,
        processor: Arc<dyn PaymentProcessor>,
    ) -> Self {
        Self {
            config,
            ledger,
            processor,
        }
    }

    fn delivery_fee_for(&self, delivery_method: &str) -> Decimal {
        if delivery_method == "domicile" {
            self.config.home_delivery_fee
        } else {
            Decimal::ZERO
        }
    }

    /// Builds processor line items (minor units, rounded half-up once) and a
    /// delivery-fee pseudo-item for home delivery, creates the hosted
    /// session, then records the attempt as pending.
    #[instrument(skip(self, request), fields(customer_email = %request.customer.email, items = request.items.len()))]
    pub async fn create_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutCreated, ServiceError> {
        request.validate()?;

        let delivery_fee = self.delivery_fee_for(&request.delivery_method);
        let subtotal: Decimal = request
            .items
            .iter()
            .map(|item| item.price * Decimal::from(item.quantity))
            .sum();
        let total = subtotal + delivery_fee;

        if request.total != subtotal && request.total != total {
            warn!(
                submitted = %request.total,
                computed = %total,
                "Client-submitted total disagrees with computed pricing"
            );
        }

        let mut line_items: Vec<SessionLineItem> = request
            .items
            .iter()
            .map(|item| SessionLineItem {
                name: item.name.clone(),
                description: item.description.clone(),
                image: item.image.clone(),
                unit_amount_minor: money::to_minor_units(item.price),
                quantity: item.quantity,
            })
            .collect();

        if delivery_fee > Decimal::ZERO {
            line_items.push(SessionLineItem {
                name: DELIVERY_FEE_ITEM_NAME.to_string(),
                description: Some("Livraison à domicile".to_string()),
                image: None,
                unit_amount_minor: money::to_minor_units(delivery_fee),
                quantity: 1,
            });
        }

        let payment_method = request
            .payment_method
            .clone()
            .unwrap_or_else(|| "card".to_string());
        let address_json = serde_json::to_string(&request.customer.address)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;

        let metadata = vec![
            (
                metadata_keys::CUSTOMER_NAME.to_string(),
                request.customer.name.clone(),
            ),
            (
                metadata_keys::CUSTOMER_PHONE.to_string(),
                request.customer.phone.clone().unwrap_or_default(),
            ),
            (metadata_keys::DELIVERY_ADDRESS.to_string(), address_json),
            (
                metadata_keys::DELIVERY_METHOD.to_string(),
                request.delivery_method.clone(),
            ),
            (
                metadata_keys::PAYMENT_METHOD.to_string(),
                payment_method.clone(),
            ),
            (metadata_keys::ORDER_TOTAL.to_string(), total.to_string()),
        ];

        let frontend = self.config.frontend_url.trim_end_matches('/');
        let params = CreateSessionParams {
            line_items,
            currency: self.config.default_currency.clone(),
            customer_email: request.customer.email.clone(),
            success_url: request.success_url.clone().unwrap_or_else(|| {
                format!(
                    "{}/confirmation?session_id={{CHECKOUT_SESSION_ID}}",
                    frontend
                )
            }),
            cancel_url: request
                .cancel_url
                .clone()
                .unwrap_or_else(|| format!("{}/commande", frontend)),
            metadata: metadata.clone(),
            locale: Some("fr".to_string()),
        };

        let session = self.processor.create_checkout_session(params).await?;

        let snapshot = AttemptSnapshot {
            customer_name: request.customer.name,
            customer_email: request.customer.email,
            customer_phone: request.customer.phone,
            address_line1: request.customer.address.line1,
            address_city: request.customer.address.city,
            address_postal_code: request.customer.address.postal_code,
            address_country: request.customer.address.country,
            delivery_method: request.delivery_method,
            payment_method,
            items: serde_json::to_value(&request.items)
                .map_err(|e| ServiceError::SerializationError(e.to_string()))?,
            subtotal,
            delivery_fee,
            total,
            currency: self.config.default_currency.clone(),
            metadata: serde_json::Value::Object(
                metadata
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect(),
            ),
        };

        self.ledger.record_attempt(&session.id, snapshot).await?;

        info!(session_id = %session.id, "Checkout session created");
        Ok(CheckoutCreated {
            session_id: session.id,
            url: session.url,
        })
    }

    /// Proxies the processor's view of a session (payment status, totals,
    /// metadata) for the storefront confirmation page.
    pub async fn retrieve_session(&self, session_id: &str) -> Result<SessionDetails, ServiceError> {
        self.processor.retrieve_session(session_id).await
    }
}
