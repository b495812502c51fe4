//! Client boundary for the hosted-checkout payment processor.
//!
//! The reconciliation core only ever talks to the processor through the
//! [`PaymentProcessor`] trait, so tests can substitute a scripted double and
//! no component reaches for a globally configured SDK client.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, instrument};

use crate::errors::ServiceError;

/// Line item sent when creating a hosted checkout session. Amounts are minor
/// units; conversion from major units happens in the checkout service.
#[derive(Debug, Clone)]
pub struct SessionLineItem {
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub unit_amount_minor: i64,
    pub quantity: i64,
}

/// Parameters for creating a hosted checkout session.
#[derive(Debug, Clone)]
pub struct CreateSessionParams {
    pub line_items: Vec<SessionLineItem>,
    pub currency: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: Vec<(String, String)>,
    pub locale: Option<String>,
}

/// Newly created session: the ID is the ledger key, the URL is where the
/// customer completes payment.
#[derive(Debug, Clone)]
pub struct CheckoutSessionSummary {
    pub id: String,
    pub url: String,
}

/// A line item as echoed back by the processor, product expanded.
#[derive(Debug, Clone)]
pub struct SessionLineItemDetails {
    pub name: String,
    pub unit_amount_minor: i64,
    pub quantity: i64,
    pub amount_total_minor: i64,
    pub image: Option<String>,
}

/// Session state as reported by the processor.
#[derive(Debug, Clone)]
pub struct SessionDetails {
    pub id: String,
    pub payment_status: String,
    pub payment_intent_id: Option<String>,
    pub amount_total_minor: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub metadata: HashMap<String, String>,
    pub line_items: Vec<SessionLineItemDetails>,
}

/// Result of a refund request.
#[derive(Debug, Clone)]
pub struct RefundDetails {
    pub id: String,
    pub amount_minor: i64,
    pub status: String,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_checkout_session(
        &self,
        params: CreateSessionParams,
    ) -> Result<CheckoutSessionSummary, ServiceError>;

    /// Retrieve a session with its line items expanded.
    async fn retrieve_session(&self, session_id: &str) -> Result<SessionDetails, ServiceError>;

    async fn create_refund(
        &self,
        payment_intent_id: &str,
        amount_minor: Option<i64>,
        reason: Option<String>,
    ) -> Result<RefundDetails, ServiceError>;
}

/// REST client for a Stripe-style processor API (form-encoded requests,
/// bearer-key auth, expandable sub-objects).
#[derive(Clone)]
pub struct HttpPaymentProcessor {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl HttpPaymentProcessor {
    pub fn new(api_base: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client construction cannot fail with static config"),
            api_base: api_base.into(),
            secret_key: secret_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }

    async fn read_or_error<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        context: &str,
    ) -> Result<T, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "{} request rejected by processor", context);
            return Err(ServiceError::ExternalServiceError(format!(
                "{} failed with status {}",
                context, status
            )));
        }
        response.json::<T>().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("{} returned invalid JSON: {}", context, e))
        })
    }
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    #[instrument(skip(self, params), fields(items = params.line_items.len()))]
    async fn create_checkout_session(
        &self,
        params: CreateSessionParams,
    ) -> Result<CheckoutSessionSummary, ServiceError> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("payment_method_types[0]".into(), "card".into()),
            ("success_url".into(), params.success_url),
            ("cancel_url".into(), params.cancel_url),
            ("customer_email".into(), params.customer_email),
        ];
        if let Some(locale) = params.locale {
            form.push(("locale".into(), locale));
        }
        for (i, item) in params.line_items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            form.push((
                format!("{}[price_data][currency]", prefix),
                params.currency.clone(),
            ));
            form.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            if let Some(description) = &item.description {
                form.push((
                    format!("{}[price_data][product_data][description]", prefix),
                    description.clone(),
                ));
            }
            if let Some(image) = &item.image {
                form.push((
                    format!("{}[price_data][product_data][images][0]", prefix),
                    image.clone(),
                ));
            }
            form.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_amount_minor.to_string(),
            ));
            form.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        }
        for (key, value) in params.metadata {
            form.push((format!("metadata[{}]", key), value));
        }

        let response = self
            .client
            .post(self.url("/checkout/sessions"))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("session creation failed: {}", e))
            })?;

        let wire: WireSession = Self::read_or_error(response, "checkout session creation").await?;
        let url = wire.url.clone().ok_or_else(|| {
            ServiceError::ExternalServiceError("processor returned session without URL".into())
        })?;
        Ok(CheckoutSessionSummary { id: wire.id, url })
    }

    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> Result<SessionDetails, ServiceError> {
        let response = self
            .client
            .get(self.url(&format!("/checkout/sessions/{}", session_id)))
            .bearer_auth(&self.secret_key)
            .query(&[
                ("expand[]", "line_items"),
                ("expand[]", "line_items.data.price.product"),
            ])
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("session retrieval failed: {}", e))
            })?;

        let wire: WireSession = Self::read_or_error(response, "checkout session retrieval").await?;
        Ok(wire.into_details())
    }

    #[instrument(skip(self))]
    async fn create_refund(
        &self,
        payment_intent_id: &str,
        amount_minor: Option<i64>,
        reason: Option<String>,
    ) -> Result<RefundDetails, ServiceError> {
        let mut form: Vec<(String, String)> =
            vec![("payment_intent".into(), payment_intent_id.to_string())];
        if let Some(amount) = amount_minor {
            form.push(("amount".into(), amount.to_string()));
        }
        form.push((
            "reason".into(),
            reason.unwrap_or_else(|| "requested_by_customer".into()),
        ));

        let response = self
            .client
            .post(self.url("/refunds"))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("refund creation failed: {}", e))
            })?;

        let wire: WireRefund = Self::read_or_error(response, "refund creation").await?;
        Ok(RefundDetails {
            id: wire.id,
            amount_minor: wire.amount,
            status: wire.status,
        })
    }
}

// ---- Wire types ----------------------------------------------------------

/// Fields that may arrive either collapsed to an ID or expanded to an object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Expandable<T> {
    Id(String),
    Object(T),
}

#[derive(Debug, Deserialize)]
struct WireSession {
    id: String,
    url: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    payment_intent: Option<Expandable<WirePaymentIntent>>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    line_items: Option<WireList<WireLineItem>>,
}

#[derive(Debug, Clone, Deserialize)]
struct WirePaymentIntent {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct WireLineItem {
    #[serde(default)]
    quantity: Option<i64>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    price: Option<WirePrice>,
}

#[derive(Debug, Deserialize)]
struct WirePrice {
    #[serde(default)]
    unit_amount: Option<i64>,
    #[serde(default)]
    product: Option<Expandable<WireProduct>>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireProduct {
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "Vec::new")]
    images: Vec<String>,
}

impl WireSession {
    fn into_details(self) -> SessionDetails {
        let payment_intent_id = self.payment_intent.map(|pi| match pi {
            Expandable::Id(id) => id,
            Expandable::Object(obj) => obj.id,
        });

        let line_items = self
            .line_items
            .map(|list| {
                list.data
                    .into_iter()
                    .map(|item| {
                        let (name, image) = match item.price.as_ref().and_then(|p| p.product.clone())
                        {
                            Some(Expandable::Object(product)) => (
                                product.name.or(item.description.clone()),
                                product.images.first().cloned(),
                            ),
                            _ => (item.description.clone(), None),
                        };
                        SessionLineItemDetails {
                            name: name.unwrap_or_default(),
                            unit_amount_minor: item
                                .price
                                .as_ref()
                                .and_then(|p| p.unit_amount)
                                .unwrap_or_default(),
                            quantity: item.quantity.unwrap_or(1),
                            amount_total_minor: item.amount_total.unwrap_or_default(),
                            image,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        SessionDetails {
            id: self.id,
            payment_status: self.payment_status.unwrap_or_default(),
            payment_intent_id,
            amount_total_minor: self.amount_total.unwrap_or_default(),
            currency: self.currency.unwrap_or_default(),
            customer_email: self.customer_email,
            metadata: self.metadata.unwrap_or_default(),
            line_items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireRefund {
    id: String,
    amount: i64,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_wire_format_parses_with_expanded_line_items() {
        let raw = json!({
            "id": "cs_test_abc",
            "payment_status": "paid",
            "payment_intent": "pi_123",
            "amount_total": 4498,
            "currency": "eur",
            "customer_email": "jo@example.com",
            "metadata": {"delivery_method": "domicile"},
            "line_items": {
                "data": [
                    {
                        "quantity": 2,
                        "amount_total": 3998,
                        "price": {
                            "unit_amount": 1999,
                            "product": {"name": "Oat drink", "images": ["https://img/oat.png"]}
                        }
                    },
                    {
                        "quantity": 1,
                        "amount_total": 500,
                        "price": {
                            "unit_amount": 500,
                            "product": {"name": "Frais de livraison", "images": []}
                        }
                    }
                ]
            }
        });

        let wire: WireSession = serde_json::from_value(raw).unwrap();
        let details = wire.into_details();

        assert_eq!(details.id, "cs_test_abc");
        assert_eq!(details.payment_intent_id.as_deref(), Some("pi_123"));
        assert_eq!(details.line_items.len(), 2);
        assert_eq!(details.line_items[0].name, "Oat drink");
        assert_eq!(details.line_items[0].unit_amount_minor, 1999);
        assert_eq!(
            details.line_items[0].image.as_deref(),
            Some("https://img/oat.png")
        );
    }

    #[test]
    fn unexpanded_payment_intent_object_still_yields_id() {
        let raw = json!({
            "id": "cs_test_def",
            "payment_intent": {"id": "pi_456", "status": "succeeded"}
        });

        let wire: WireSession = serde_json::from_value(raw).unwrap();
        let details = wire.into_details();
        assert_eq!(details.payment_intent_id.as_deref(), Some("pi_456"));
    }
}
