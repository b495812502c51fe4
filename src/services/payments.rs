use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::payment_attempt::{Model as AttemptModel, PaymentStatus},
    errors::ServiceError,
    processor::{PaymentProcessor, RefundDetails},
    services::ledger::LedgerService,
    services::money,
};

/// Refund orchestration over the ledger and the processor.
#[derive(Clone)]
pub struct PaymentService {
    ledger: LedgerService,
    processor: Arc<dyn PaymentProcessor>,
}

impl PaymentService {
    pub fn new(ledger: LedgerService, processor: Arc<dyn PaymentProcessor>) -> Self {
        Self { ledger, processor }
    }

    /// Refunds a succeeded payment, fully or partially. The processor call
    /// happens first; the ledger is only stamped once the refund exists.
    #[instrument(skip(self), fields(attempt_id = %attempt_id))]
    pub async fn refund(
        &self,
        attempt_id: Uuid,
        amount: Option<Decimal>,
        reason: Option<String>,
    ) -> Result<(AttemptModel, RefundDetails), ServiceError> {
        let attempt = self
            .ledger
            .get(attempt_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", attempt_id)))?;

        if attempt.payment_status != PaymentStatus::Succeeded {
            return Err(ServiceError::ValidationError(
                "Can only refund successful payments".to_string(),
            ));
        }

        let payment_intent_id = attempt.payment_intent_id.as_deref().ok_or_else(|| {
            ServiceError::ValidationError(
                "Payment has no processor intent to refund against".to_string(),
            )
        })?;

        let refund = self
            .processor
            .create_refund(
                payment_intent_id,
                amount.map(money::to_minor_units),
                reason,
            )
            .await?;

        let partial = amount.is_some();
        let updated = self
            .ledger
            .record_refund(
                attempt_id,
                money::from_minor_units(refund.amount_minor),
                partial,
            )
            .await?;

        info!(refund_id = %refund.id, partial, "Refund processed");
        Ok((updated, refund))
    }
}
