use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, SqlErr,
};
use sea_orm::{sea_query::Expr, FromQueryResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::payment_attempt::{
        self, ActiveModel as AttemptActiveModel, Entity as AttemptEntity, Model as AttemptModel,
        PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Everything the ledger keeps about a checkout attempt at creation time.
#[derive(Debug, Clone)]
pub struct AttemptSnapshot {
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub address_line1: String,
    pub address_city: String,
    pub address_postal_code: String,
    pub address_country: String,
    pub delivery_method: String,
    pub payment_method: String,
    /// Line items as submitted at checkout, major units
    pub items: serde_json::Value,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub metadata: serde_json::Value,
}

/// Fields a reconciliation pass may stamp onto an attempt.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub processor_status: Option<String>,
    pub payment_intent_id: Option<String>,
    pub amount_received_minor: Option<i64>,
    pub failure_reason: Option<String>,
}

/// Admin listing filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttemptFilter {
    pub status: Option<PaymentStatus>,
    pub email: Option<String>,
    pub from_date: Option<chrono::DateTime<Utc>>,
    pub to_date: Option<chrono::DateTime<Utc>>,
}

/// Aggregates for the admin payments view
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct AttemptStatistics {
    pub total_payments: u64,
    pub successful_payments: u64,
    pub failed_payments: u64,
    pub pending_payments: u64,
    pub total_amount: Decimal,
    pub successful_amount: Decimal,
}

/// Single source of truth for payment-attempt state.
#[derive(Clone)]
pub struct LedgerService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
}

impl LedgerService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Records a new checkout attempt as pending. Insert-if-absent: a second
    /// record for the same session fails with DuplicateSession and leaves the
    /// original untouched. The unique key on session_id backs this under
    /// concurrent calls.
    #[instrument(skip(self, snapshot), fields(session_id = %session_id))]
    pub async fn record_attempt(
        &self,
        session_id: &str,
        snapshot: AttemptSnapshot,
    ) -> Result<AttemptModel, ServiceError> {
        let now = Utc::now();

        let attempt = AttemptActiveModel {
            id: Set(Uuid::new_v4()),
            session_id: Set(session_id.to_string()),
            payment_intent_id: Set(None),
            customer_name: Set(snapshot.customer_name),
            customer_email: Set(snapshot.customer_email),
            customer_phone: Set(snapshot.customer_phone),
            address_line1: Set(snapshot.address_line1),
            address_city: Set(snapshot.address_city),
            address_postal_code: Set(snapshot.address_postal_code),
            address_country: Set(snapshot.address_country),
            delivery_method: Set(snapshot.delivery_method),
            payment_method: Set(snapshot.payment_method),
            items: Set(snapshot.items),
            subtotal: Set(snapshot.subtotal),
            delivery_fee: Set(snapshot.delivery_fee),
            total: Set(snapshot.total),
            payment_status: Set(PaymentStatus::Pending),
            processor_status: Set(None),
            failure_reason: Set(None),
            currency: Set(snapshot.currency),
            amount_received: Set(None),
            refunded: Set(false),
            refund_amount: Set(Decimal::ZERO),
            order_created: Set(false),
            order_id: Set(None),
            metadata: Set(snapshot.metadata),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match attempt.insert(&*self.db).await {
            Ok(model) => {
                info!(attempt_id = %model.id, "Payment attempt recorded");
                if let Some(event_sender) = &self.event_sender {
                    if let Err(e) = event_sender
                        .send(Event::CheckoutSessionCreated {
                            session_id: session_id.to_string(),
                        })
                        .await
                    {
                        warn!(error = %e, "Failed to send checkout created event");
                    }
                }
                Ok(model)
            }
            Err(e) => match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => {
                    warn!("Attempt already recorded for session");
                    Err(ServiceError::DuplicateSession(session_id.to_string()))
                }
                _ => {
                    error!(error = %e, "Failed to record payment attempt");
                    Err(ServiceError::DatabaseError(e))
                }
            },
        }
    }

    /// Applies a reconciled status to the attempt for a session. Signals
    /// UnknownSession when the ledger has no such row; the caller decides
    /// whether that is benign. Re-applying an identical status and fields is
    /// a no-op.
    #[instrument(skip(self, update), fields(session_id = %session_id, status = ?status))]
    pub async fn update_status(
        &self,
        session_id: &str,
        status: PaymentStatus,
        update: StatusUpdate,
    ) -> Result<AttemptModel, ServiceError> {
        let attempt = self
            .find_by_session(session_id)
            .await?
            .ok_or_else(|| ServiceError::UnknownSession(session_id.to_string()))?;

        let amount_received = update.amount_received_minor.map(super::money::from_minor_units);

        let unchanged = attempt.payment_status == status
            && (update.processor_status.is_none()
                || update.processor_status == attempt.processor_status)
            && (update.payment_intent_id.is_none()
                || update.payment_intent_id == attempt.payment_intent_id)
            && (amount_received.is_none() || amount_received == attempt.amount_received)
            && (update.failure_reason.is_none()
                || update.failure_reason == attempt.failure_reason);
        if unchanged {
            info!("Status already applied, skipping write");
            return Ok(attempt);
        }

        let mut active: AttemptActiveModel = attempt.into();
        active.payment_status = Set(status);
        if let Some(raw) = update.processor_status {
            active.processor_status = Set(Some(raw));
        }
        if let Some(intent) = update.payment_intent_id {
            active.payment_intent_id = Set(Some(intent));
        }
        if let Some(amount) = amount_received {
            active.amount_received = Set(Some(amount));
        }
        if let Some(reason) = update.failure_reason {
            active.failure_reason = Set(Some(reason));
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await.map_err(|e| {
            error!(error = %e, "Failed to update payment status");
            ServiceError::DatabaseError(e)
        })?;

        info!(attempt_id = %updated.id, "Payment status updated");
        Ok(updated)
    }

    /// Marks the attempt as materialized into an order. A missing ledger row
    /// is recoverable, not fatal: the order record itself stays authoritative,
    /// so this only logs.
    #[instrument(skip(self), fields(session_id = %session_id, order_id = %order_id))]
    pub async fn link_order(&self, session_id: &str, order_id: Uuid) {
        let attempt = match self.find_by_session(session_id).await {
            Ok(Some(attempt)) => attempt,
            Ok(None) => {
                warn!("No ledger entry to link order to; order remains authoritative");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to look up ledger entry for order link");
                return;
            }
        };

        let mut active: AttemptActiveModel = attempt.into();
        active.order_created = Set(true);
        active.order_id = Set(Some(order_id));
        active.updated_at = Set(Utc::now());

        if let Err(e) = active.update(&*self.db).await {
            error!(error = %e, "Failed to link order to ledger entry");
        }
    }

    /// Stamps refund state onto a succeeded attempt.
    #[instrument(skip(self), fields(attempt_id = %attempt_id))]
    pub async fn record_refund(
        &self,
        attempt_id: Uuid,
        refund_amount: Decimal,
        partial: bool,
    ) -> Result<AttemptModel, ServiceError> {
        let attempt = self
            .get(attempt_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", attempt_id)))?;

        let session_id = attempt.session_id.clone();
        let mut active: AttemptActiveModel = attempt.into();
        active.refunded = Set(true);
        active.refund_amount = Set(refund_amount);
        active.processor_status = Set(Some(if partial {
            "partially_refunded".to_string()
        } else {
            "refunded".to_string()
        }));
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await.map_err(|e| {
            error!(error = %e, "Failed to record refund");
            ServiceError::DatabaseError(e)
        })?;

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::PaymentRefunded { session_id })
                .await
            {
                warn!(error = %e, "Failed to send refund event");
            }
        }

        Ok(updated)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<AttemptModel>, ServiceError> {
        AttemptEntity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    pub async fn find_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<AttemptModel>, ServiceError> {
        AttemptEntity::find()
            .filter(payment_attempt::Column::SessionId.eq(session_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    pub async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<AttemptModel>, ServiceError> {
        AttemptEntity::find()
            .filter(payment_attempt::Column::PaymentIntentId.eq(payment_intent_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    pub async fn find_by_customer_email(
        &self,
        email: &str,
    ) -> Result<Vec<AttemptModel>, ServiceError> {
        AttemptEntity::find()
            .filter(payment_attempt::Column::CustomerEmail.eq(email))
            .order_by_desc(payment_attempt::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Lists attempts newest first with the admin view's filters.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        page: u64,
        per_page: u64,
        filter: AttemptFilter,
    ) -> Result<(Vec<AttemptModel>, u64), ServiceError> {
        let mut query = AttemptEntity::find();
        if let Some(status) = filter.status {
            query = query.filter(payment_attempt::Column::PaymentStatus.eq(status));
        }
        if let Some(email) = &filter.email {
            query = query.filter(payment_attempt::Column::CustomerEmail.contains(email));
        }
        if let Some(from) = filter.from_date {
            query = query.filter(payment_attempt::Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.to_date {
            query = query.filter(payment_attempt::Column::CreatedAt.lte(to));
        }

        let paginator = query
            .order_by_desc(payment_attempt::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let attempts = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok((attempts, total))
    }

    /// Aggregate counts and amounts for the admin payments view.
    #[instrument(skip(self))]
    pub async fn statistics(&self) -> Result<AttemptStatistics, ServiceError> {
        let db = &*self.db;

        let total_payments = AttemptEntity::find()
            .count(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let count_by = |status: PaymentStatus| {
            AttemptEntity::find().filter(payment_attempt::Column::PaymentStatus.eq(status))
        };
        let successful_payments = count_by(PaymentStatus::Succeeded)
            .count(db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        let failed_payments = count_by(PaymentStatus::Failed)
            .count(db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        let pending_payments = count_by(PaymentStatus::Pending)
            .count(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        #[derive(FromQueryResult)]
        struct SumRow {
            value: Option<Decimal>,
        }

        let total_amount = AttemptEntity::find()
            .select_only()
            .column_as(
                Expr::col((AttemptEntity, payment_attempt::Column::Total)).sum(),
                "value",
            )
            .into_model::<SumRow>()
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .and_then(|row| row.value)
            .unwrap_or(Decimal::ZERO);

        let successful_amount = AttemptEntity::find()
            .filter(payment_attempt::Column::PaymentStatus.eq(PaymentStatus::Succeeded))
            .select_only()
            .column_as(
                Expr::col((AttemptEntity, payment_attempt::Column::Total)).sum(),
                "value",
            )
            .into_model::<SumRow>()
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .and_then(|row| row.value)
            .unwrap_or(Decimal::ZERO);

        Ok(AttemptStatistics {
            total_payments,
            successful_payments,
            failed_payments,
            pending_payments,
            total_amount,
            successful_amount,
        })
    }

    /// Explicit admin purge; the only path that ever deletes a ledger row.
    #[instrument(skip(self), fields(attempt_id = %id))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let result = AttemptEntity::delete_by_id(id)
            .exec(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Payment {} not found",
                id
            )));
        }

        info!("Payment attempt deleted");
        Ok(())
    }
}
