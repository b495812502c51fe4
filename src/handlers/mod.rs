pub mod checkout;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::notifications::NotificationService;
use crate::processor::PaymentProcessor;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: crate::services::checkout::CheckoutService,
    pub ledger: crate::services::ledger::LedgerService,
    pub orders: crate::services::orders::OrderService,
    pub order_status: crate::services::order_status::OrderStatusService,
    pub payments: crate::services::payments::PaymentService,
    pub reconciliation: crate::services::reconciliation::ReconciliationService,
}

impl AppServices {
    /// Wires every service against the shared pool and the injected external
    /// collaborators. Collaborators arrive as trait objects so tests can pass
    /// doubles; nothing here reaches for global SDK state.
    pub fn new(
        db_pool: Arc<DbPool>,
        config: AppConfig,
        event_sender: Arc<EventSender>,
        processor: Arc<dyn PaymentProcessor>,
        notifier: Arc<dyn NotificationService>,
    ) -> Self {
        let ledger = crate::services::ledger::LedgerService::new(
            db_pool.clone(),
            Some(event_sender.clone()),
        );
        let orders = crate::services::orders::OrderService::new(
            db_pool.clone(),
            Some(event_sender.clone()),
        );
        let order_status = crate::services::order_status::OrderStatusService::new(
            db_pool.clone(),
            config.clone(),
            notifier.clone(),
            Some(event_sender.clone()),
        );
        let checkout = crate::services::checkout::CheckoutService::new(
            config.clone(),
            ledger.clone(),
            processor.clone(),
        );
        let payments =
            crate::services::payments::PaymentService::new(ledger.clone(), processor.clone());
        let reconciliation = crate::services::reconciliation::ReconciliationService::new(
            config,
            ledger.clone(),
            orders.clone(),
            processor,
            notifier,
            Some(event_sender),
        );

        Self {
            checkout,
            ledger,
            orders,
            order_status,
            payments,
            reconciliation,
        }
    }
}
