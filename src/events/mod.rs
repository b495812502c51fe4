use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Checkout / payment lifecycle
    CheckoutSessionCreated {
        session_id: String,
    },
    PaymentSucceeded {
        session_id: String,
    },
    PaymentFailed {
        session_id: String,
        reason: String,
    },
    PaymentCanceled {
        session_id: String,
    },
    PaymentRefunded {
        session_id: String,
    },

    // Order lifecycle
    OrderMaterialized {
        order_id: Uuid,
        session_id: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
}

/// Consumes events off the channel. Handlers are deliberately best-effort:
/// the reconciliation core never blocks on event fan-out.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::PaymentFailed { session_id, reason } => {
                warn!(session_id = %session_id, reason = %reason, "Payment failed");
            }
            Event::OrderMaterialized {
                order_id,
                session_id,
            } => {
                info!(order_id = %order_id, session_id = %session_id, "Order materialized");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    order_id = %order_id,
                    old_status = %old_status,
                    new_status = %new_status,
                    "Order status changed"
                );
            }
            other => {
                info!("Received event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}
