//! Outbound customer/admin notifications.
//!
//! Dispatch is best-effort by contract: a failed send must never roll back
//! or fail the ledger/order mutation that triggered it. Callers log the
//! error and surface a soft warning at most.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, instrument};

use crate::entities::order;

/// Notification service errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Email provider request failed: {0}")]
    Transport(String),
    #[error("Email provider rejected the request with status {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("No template configured for status: {0}")]
    NoTemplate(String),
    #[error("Notification dispatch is disabled (no API key configured)")]
    Disabled,
}

/// Trait for notification dispatch so tests can substitute a recording double.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Send the customer a templated status email for the given order.
    async fn send_status_email(
        &self,
        order: &order::Model,
        template_id: i64,
    ) -> Result<(), NotificationError>;

    /// Alert the configured admin address that a new order landed.
    async fn send_admin_new_order_alert(
        &self,
        order: &order::Model,
    ) -> Result<(), NotificationError>;
}

/// Transactional-email implementation against a Brevo-style REST API.
#[derive(Clone)]
pub struct TransactionalEmailService {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    sender_name: String,
    sender_address: Option<String>,
    admin_email: Option<String>,
}

impl TransactionalEmailService {
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        sender_name: impl Into<String>,
        sender_address: Option<String>,
        admin_email: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client construction cannot fail with static config"),
            api_base: api_base.into(),
            api_key,
            sender_name: sender_name.into(),
            sender_address,
            admin_email,
        }
    }

    fn delivery_method_label(method: &str) -> &'static str {
        if method == "domicile" {
            "Livraison à domicile"
        } else {
            "Point relais"
        }
    }

    async fn post_email(&self, payload: serde_json::Value) -> Result<(), NotificationError> {
        let api_key = self.api_key.as_ref().ok_or(NotificationError::Disabled)?;

        let response = self
            .client
            .post(format!(
                "{}/smtp/email",
                self.api_base.trim_end_matches('/')
            ))
            .header("api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationService for TransactionalEmailService {
    #[instrument(skip(self, order), fields(session_id = %order.session_id, template_id))]
    async fn send_status_email(
        &self,
        order: &order::Model,
        template_id: i64,
    ) -> Result<(), NotificationError> {
        let payload = serde_json::json!({
            "to": [{
                "email": order.customer_email,
                "name": order.customer_name,
            }],
            "templateId": template_id,
            "params": {
                "CUSTOMER_NAME": order.customer_name,
                "ORDER_ID": order.session_id,
                "ORDER_TOTAL": format!("{:.2}", order.total),
                "SUBTOTAL": format!("{:.2}", order.subtotal),
                "DELIVERY_FEE": format!("{:.2}", order.delivery_fee),
                "DELIVERY_ADDRESS": format!(
                    "{}, {}, {}",
                    order.address_line1, order.address_city, order.address_postal_code
                ),
                "DELIVERY_METHOD": Self::delivery_method_label(&order.delivery_method),
                "ORDER_DATE": order.created_at.format("%d/%m/%Y").to_string(),
            },
        });

        self.post_email(payload).await?;
        info!(
            customer_email = %order.customer_email,
            template_id,
            "Status email sent"
        );
        Ok(())
    }

    #[instrument(skip(self, order), fields(session_id = %order.session_id))]
    async fn send_admin_new_order_alert(
        &self,
        order: &order::Model,
    ) -> Result<(), NotificationError> {
        let admin_email = self
            .admin_email
            .as_ref()
            .ok_or(NotificationError::Disabled)?;

        let products_html: String = order
            .product_lines()
            .unwrap_or_default()
            .iter()
            .map(|p| {
                format!(
                    "<tr><td>{}</td><td style=\"text-align:center;\">{}</td><td style=\"text-align:right;\">{:.2}€</td></tr>",
                    p.name, p.quantity, p.price
                )
            })
            .collect();

        let payload = serde_json::json!({
            "to": [{"email": admin_email}],
            "sender": {
                "name": self.sender_name,
                "email": self.sender_address.clone().unwrap_or_else(|| "no-reply@localhost".into()),
            },
            "subject": format!("Nouvelle commande - {}", order.session_id),
            "htmlContent": format!(
                "<h2>Nouvelle commande reçue</h2>\
                 <p><strong>Client:</strong> {} ({})</p>\
                 <p><strong>Adresse:</strong> {}, {} {}, {}</p>\
                 <p><strong>Méthode de livraison:</strong> {}</p>\
                 <table style=\"width:100%;border-collapse:collapse;\">{}</table>\
                 <p><strong>Sous-total:</strong> {:.2}€</p>\
                 <p><strong>Frais de livraison:</strong> {:.2}€</p>\
                 <p><strong>Total:</strong> {:.2}€</p>",
                order.customer_name,
                order.customer_email,
                order.address_line1,
                order.address_postal_code,
                order.address_city,
                order.address_country,
                Self::delivery_method_label(&order.delivery_method),
                products_html,
                order.subtotal,
                order.delivery_fee,
                order.total,
            ),
        });

        self.post_email(payload).await?;
        info!(admin_email = %admin_email, "Admin new-order alert sent");
        Ok(())
    }
}
