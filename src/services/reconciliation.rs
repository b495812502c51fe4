//! Applies asynchronous processor lifecycle events to local state.
//!
//! Deliveries may be duplicated or reordered, so every handler here is
//! idempotent, and payment-state truth (the ledger) is never blocked or
//! rolled back by failures in downstream concerns (order materialization,
//! notification dispatch).

use std::sync::Arc;

use hmac::{Hmac, Mac};
use http::HeaderMap;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{error, info, instrument, warn};

use crate::{
    config::AppConfig,
    entities::payment_attempt::PaymentStatus,
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::NotificationService,
    processor::PaymentProcessor,
    services::ledger::{LedgerService, StatusUpdate},
    services::orders::OrderService,
};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// What a reconciliation pass did with an event. Every variant is an
/// acknowledgeable outcome: the event source must receive a 200 for any
/// authenticated event, or it retries forever.
#[derive(Debug)]
pub enum ReconciliationOutcome {
    /// Event applied; order_created tells whether this call built the order.
    Processed {
        session_id: String,
        order_created: bool,
    },
    /// Redelivery of a completed session that was already materialized.
    AlreadyProcessed { session_id: String },
    /// Ledger shows the payment succeeded but no order exists. Needs a
    /// human; the divergence is logged, never silently dropped.
    RequiresManualReview { session_id: String, reason: String },
    /// Event referenced a session or intent the ledger never recorded.
    UnknownSession { reference: String },
    /// Recognized-but-unhandled or unknown event type.
    Ignored { event_type: String },
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: serde_json::Value,
}

/// Webhook reconciler: verifies authenticity, then drives ledger and
/// materializer updates off the event stream.
#[derive(Clone)]
pub struct ReconciliationService {
    config: AppConfig,
    ledger: LedgerService,
    orders: OrderService,
    processor: Arc<dyn PaymentProcessor>,
    notifier: Arc<dyn NotificationService>,
    event_sender: Option<Arc<EventSender>>,
}

impl ReconciliationService {
    pub fn new(
        config: AppConfig,
        ledger: LedgerService,
        orders: OrderService,
        processor: Arc<dyn PaymentProcessor>,
        notifier: Arc<dyn NotificationService>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            config,
            ledger,
            orders,
            processor,
            notifier,
            event_sender,
        }
    }

    /// Verifies the event signature and applies it. Verification is a hard
    /// precondition: on failure nothing is mutated and the caller owes the
    /// source a 400.
    #[instrument(skip(self, payload, headers))]
    pub async fn process_event(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        if let Some(secret) = &self.config.processor_webhook_secret {
            let tolerance = self
                .config
                .processor_webhook_tolerance_secs
                .unwrap_or(DEFAULT_TOLERANCE_SECS);
            if !verify_signature(headers, payload, secret, tolerance) {
                warn!("Webhook signature verification failed");
                return Err(ServiceError::UnauthenticatedEvent(
                    "invalid webhook signature".to_string(),
                ));
            }
        } else {
            warn!("No webhook secret configured; skipping signature verification");
        }

        let envelope: WebhookEnvelope = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::BadRequest(format!("invalid webhook payload: {}", e)))?;

        match envelope.event_type.as_str() {
            "checkout.session.completed" => self.handle_session_completed(&envelope.data.object).await,
            "checkout.session.expired" => self.handle_session_expired(&envelope.data.object).await,
            "payment_intent.succeeded" => self.handle_intent_succeeded(&envelope.data.object).await,
            "payment_intent.payment_failed" => self.handle_intent_failed(&envelope.data.object).await,
            "payment_intent.canceled" => self.handle_intent_canceled(&envelope.data.object).await,
            other => {
                info!("Unhandled webhook event type: {}", other);
                Ok(ReconciliationOutcome::Ignored {
                    event_type: other.to_string(),
                })
            }
        }
    }

    /// pending → succeeded: stamp the ledger, then materialize exactly once,
    /// link, and notify. Ledger truth is committed before any downstream
    /// concern runs.
    async fn handle_session_completed(
        &self,
        object: &serde_json::Value,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let session_id = object_id(object)?;
        info!(session_id = %session_id, "Checkout session completed");

        let update = StatusUpdate {
            processor_status: object
                .get("payment_status")
                .and_then(|v| v.as_str())
                .map(String::from),
            payment_intent_id: string_or_object_id(object.get("payment_intent")),
            amount_received_minor: object.get("amount_total").and_then(|v| v.as_i64()),
            failure_reason: None,
        };

        let attempt = match self
            .ledger
            .update_status(&session_id, PaymentStatus::Succeeded, update)
            .await
        {
            Ok(attempt) => Some(attempt),
            // A session we never recorded locally; the order is still
            // authoritative, so materialization proceeds.
            Err(ServiceError::UnknownSession(_)) => {
                warn!(session_id = %session_id, "Completed event for untracked session");
                None
            }
            Err(e) => return Err(e),
        };

        self.send_event(Event::PaymentSucceeded {
            session_id: session_id.clone(),
        })
        .await;

        // Redelivery dedup: once the ledger says the order exists, neither
        // the materializer nor the notifications run again.
        if attempt.as_ref().is_some_and(|a| a.order_created) {
            info!(session_id = %session_id, "Order already created, skipping materialization");
            return Ok(ReconciliationOutcome::AlreadyProcessed { session_id });
        }

        let session = match self.processor.retrieve_session(&session_id).await {
            Ok(session) => session,
            Err(e) => {
                error!(
                    session_id = %session_id,
                    error = %e,
                    "MANUAL RECONCILIATION REQUIRED: payment succeeded but session could not be retrieved for materialization"
                );
                return Ok(ReconciliationOutcome::RequiresManualReview {
                    session_id,
                    reason: e.to_string(),
                });
            }
        };

        let (order, created) = match self.orders.materialize(&session).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    session_id = %session_id,
                    error = %e,
                    "MANUAL RECONCILIATION REQUIRED: payment succeeded but order materialization failed"
                );
                return Ok(ReconciliationOutcome::RequiresManualReview {
                    session_id,
                    reason: e.to_string(),
                });
            }
        };

        self.ledger.link_order(&session_id, order.id).await;

        if created {
            if let Some(template_id) = self.config.template_for_status("confirmed") {
                if let Err(e) = self.notifier.send_status_email(&order, template_id).await {
                    warn!(error = %e, "Order confirmation email failed");
                }
            }
            if let Err(e) = self.notifier.send_admin_new_order_alert(&order).await {
                warn!(error = %e, "Admin new-order alert failed");
            }
        }

        Ok(ReconciliationOutcome::Processed {
            session_id,
            order_created: created,
        })
    }

    /// pending/processing → failed on session expiry. A late expiry for a
    /// session that already succeeded is out-of-order delivery and must not
    /// regress payment truth.
    async fn handle_session_expired(
        &self,
        object: &serde_json::Value,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let session_id = object_id(object)?;
        info!(session_id = %session_id, "Checkout session expired");

        let Some(attempt) = self.ledger.find_by_session(&session_id).await? else {
            warn!(session_id = %session_id, "Expiry event for untracked session");
            return Ok(ReconciliationOutcome::UnknownSession {
                reference: session_id,
            });
        };
        if !failure_applies_to(attempt.payment_status) {
            warn!(
                session_id = %session_id,
                current = ?attempt.payment_status,
                "Out-of-order expiry event ignored"
            );
            return Ok(ReconciliationOutcome::Ignored {
                event_type: "checkout.session.expired".to_string(),
            });
        }

        let update = StatusUpdate {
            processor_status: Some("expired".to_string()),
            failure_reason: Some("Session expired".to_string()),
            ..Default::default()
        };
        self.ledger
            .update_status(&session_id, PaymentStatus::Failed, update)
            .await?;

        self.send_event(Event::PaymentFailed {
            session_id: session_id.clone(),
            reason: "Session expired".to_string(),
        })
        .await;
        Ok(ReconciliationOutcome::Processed {
            session_id,
            order_created: false,
        })
    }

    async fn handle_intent_succeeded(
        &self,
        object: &serde_json::Value,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let intent_id = object_id(object)?;
        info!(payment_intent_id = %intent_id, "Payment intent succeeded");

        let Some(attempt) = self.ledger.find_by_payment_intent(&intent_id).await? else {
            return Ok(ReconciliationOutcome::UnknownSession {
                reference: intent_id,
            });
        };

        let update = StatusUpdate {
            processor_status: object
                .get("status")
                .and_then(|v| v.as_str())
                .map(String::from),
            amount_received_minor: object.get("amount_received").and_then(|v| v.as_i64()),
            ..Default::default()
        };
        self.ledger
            .update_status(&attempt.session_id, PaymentStatus::Succeeded, update)
            .await?;

        Ok(ReconciliationOutcome::Processed {
            session_id: attempt.session_id,
            order_created: false,
        })
    }

    async fn handle_intent_failed(
        &self,
        object: &serde_json::Value,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let intent_id = object_id(object)?;
        info!(payment_intent_id = %intent_id, "Payment intent failed");

        let Some(attempt) = self.ledger.find_by_payment_intent(&intent_id).await? else {
            return Ok(ReconciliationOutcome::UnknownSession {
                reference: intent_id,
            });
        };
        if !failure_applies_to(attempt.payment_status) {
            warn!(
                session_id = %attempt.session_id,
                current = ?attempt.payment_status,
                "Out-of-order failure event ignored"
            );
            return Ok(ReconciliationOutcome::Ignored {
                event_type: "payment_intent.payment_failed".to_string(),
            });
        }

        let reason = object
            .get("last_payment_error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("Payment failed")
            .to_string();

        let update = StatusUpdate {
            processor_status: object
                .get("status")
                .and_then(|v| v.as_str())
                .map(String::from),
            failure_reason: Some(reason.clone()),
            ..Default::default()
        };
        self.ledger
            .update_status(&attempt.session_id, PaymentStatus::Failed, update)
            .await?;

        self.send_event(Event::PaymentFailed {
            session_id: attempt.session_id.clone(),
            reason,
        })
        .await;

        Ok(ReconciliationOutcome::Processed {
            session_id: attempt.session_id,
            order_created: false,
        })
    }

    /// Any state → canceled.
    async fn handle_intent_canceled(
        &self,
        object: &serde_json::Value,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let intent_id = object_id(object)?;
        info!(payment_intent_id = %intent_id, "Payment intent canceled");

        let Some(attempt) = self.ledger.find_by_payment_intent(&intent_id).await? else {
            return Ok(ReconciliationOutcome::UnknownSession {
                reference: intent_id,
            });
        };

        let update = StatusUpdate {
            processor_status: object
                .get("status")
                .and_then(|v| v.as_str())
                .map(String::from),
            failure_reason: Some("Payment canceled by customer".to_string()),
            ..Default::default()
        };
        self.ledger
            .update_status(&attempt.session_id, PaymentStatus::Canceled, update)
            .await?;

        self.send_event(Event::PaymentCanceled {
            session_id: attempt.session_id.clone(),
        })
        .await;

        Ok(ReconciliationOutcome::Processed {
            session_id: attempt.session_id,
            order_created: false,
        })
    }

    async fn send_event(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send reconciliation event");
            }
        }
    }
}

/// Failure events only apply to attempts still in flight.
fn failure_applies_to(status: PaymentStatus) -> bool {
    matches!(
        status,
        PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::RequiresAction
    )
}

fn object_id(object: &serde_json::Value) -> Result<String, ServiceError> {
    object
        .get("id")
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| ServiceError::BadRequest("event object has no id".to_string()))
}

fn string_or_object_id(value: Option<&serde_json::Value>) -> Option<String> {
    match value {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Object(map)) => {
            map.get("id").and_then(|v| v.as_str()).map(String::from)
        }
        _ => None,
    }
}

/// Verifies the HMAC signature on a raw webhook payload. Supports both the
/// processor's `Stripe-Signature: t=...,v1=...` header and a generic
/// x-timestamp/x-signature pair.
pub fn verify_signature(
    headers: &HeaderMap,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
) -> bool {
    if let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) {
        if let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) {
            if let Ok(ts_i) = ts.parse::<i64>() {
                let now = chrono::Utc::now().timestamp();
                if (now - ts_i).unsigned_abs() > tolerance_secs {
                    return false;
                }
            }
            return signature_matches(ts, payload, secret, sig);
        }
    }
    if let Some(sig) = headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
    {
        let mut ts = "";
        let mut v1 = "";
        for part in sig.split(',') {
            let mut it = part.split('=');
            match (it.next(), it.next()) {
                (Some("t"), Some(val)) => ts = val,
                (Some("v1"), Some(val)) => v1 = val,
                _ => {}
            }
        }
        if !ts.is_empty() && !v1.is_empty() {
            if let Ok(ts_i) = ts.parse::<i64>() {
                let now = chrono::Utc::now().timestamp();
                if (now - ts_i).unsigned_abs() > tolerance_secs {
                    return false;
                }
            }
            return signature_matches(ts, payload, secret, v1);
        }
    }
    false
}

fn signature_matches(timestamp: &str, payload: &[u8], secret: &str, provided: &str) -> bool {
    let signed = format!("{}.{}", timestamp, std::str::from_utf8(payload).unwrap_or(""));
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(signed.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, provided)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
