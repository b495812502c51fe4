use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
        OrderProduct, StatusHistoryEntry,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    processor::SessionDetails,
    services::money,
};

/// Display name of the delivery-fee pseudo-item on processor line items.
/// The materializer folds it into the pricing breakdown instead of keeping
/// it as a purchasable product row.
pub const DELIVERY_FEE_ITEM_NAME: &str = "Frais de livraison";

/// Metadata keys stamped onto checkout sessions and read back during
/// materialization.
pub mod metadata_keys {
    pub const CUSTOMER_NAME: &str = "customer_name";
    pub const CUSTOMER_PHONE: &str = "customer_phone";
    pub const DELIVERY_ADDRESS: &str = "delivery_address";
    pub const DELIVERY_METHOD: &str = "delivery_method";
    pub const PAYMENT_METHOD: &str = "payment_method";
    pub const ORDER_TOTAL: &str = "order_total";
}

/// Delivery address as serialized into session metadata.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryAddress {
    pub line1: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

/// Exactly-once construction of orders from completed checkout sessions,
/// plus the admin read surface over them.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Materializes an order from processor-confirmed session data. Safe
    /// against duplicate invocation: an existing order for the session is
    /// returned as-is, and a lost insert race is recovered by re-reading the
    /// winner. Returns the order and whether this call created it.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn materialize(
        &self,
        session: &SessionDetails,
    ) -> Result<(OrderModel, bool), ServiceError> {
        if let Some(existing) = self.find_by_session(&session.id).await? {
            info!(order_id = %existing.id, "Order already materialized for session");
            return Ok((existing, false));
        }

        let address_raw = session
            .metadata
            .get(metadata_keys::DELIVERY_ADDRESS)
            .ok_or_else(|| {
                ServiceError::MalformedSessionMetadata(format!(
                    "session {} has no delivery address metadata",
                    session.id
                ))
            })?;
        let address: DeliveryAddress = serde_json::from_str(address_raw).map_err(|e| {
            ServiceError::MalformedSessionMetadata(format!(
                "session {} delivery address is unparseable: {}",
                session.id, e
            ))
        })?;

        let customer_name = session
            .metadata
            .get(metadata_keys::CUSTOMER_NAME)
            .cloned()
            .unwrap_or_default();
        let customer_email = session.customer_email.clone().unwrap_or_default();
        let customer_phone = session
            .metadata
            .get(metadata_keys::CUSTOMER_PHONE)
            .filter(|phone| !phone.is_empty())
            .cloned();
        let delivery_method = session
            .metadata
            .get(metadata_keys::DELIVERY_METHOD)
            .cloned()
            .unwrap_or_else(|| "point_relais".to_string());
        let payment_method = session
            .metadata
            .get(metadata_keys::PAYMENT_METHOD)
            .cloned()
            .unwrap_or_else(|| "card".to_string());

        // Pull the delivery-fee pseudo-item out of the product list and fold
        // it into the pricing breakdown.
        let delivery_fee_minor: i64 = session
            .line_items
            .iter()
            .filter(|item| item.name.contains(DELIVERY_FEE_ITEM_NAME))
            .map(|item| item.amount_total_minor)
            .sum();

        let products: Vec<OrderProduct> = session
            .line_items
            .iter()
            .filter(|item| !item.name.contains(DELIVERY_FEE_ITEM_NAME))
            .enumerate()
            .map(|(index, item)| OrderProduct {
                id: index as i64 + 1,
                name: item.name.clone(),
                price: money::from_minor_units(item.unit_amount_minor),
                quantity: item.quantity,
                image: item.image.clone(),
            })
            .collect();

        let total = money::from_minor_units(session.amount_total_minor);
        let delivery_fee = money::from_minor_units(delivery_fee_minor);
        let subtotal = total - delivery_fee;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let initial_history = vec![StatusHistoryEntry {
            status: "confirmed".to_string(),
            timestamp: now,
            actor: "system".to_string(),
            note: None,
        }];

        let active = OrderActiveModel {
            id: Set(order_id),
            session_id: Set(session.id.clone()),
            payment_intent_id: Set(session.payment_intent_id.clone()),
            customer_name: Set(customer_name),
            customer_email: Set(customer_email),
            customer_phone: Set(customer_phone),
            address_line1: Set(address.line1),
            address_city: Set(address.city),
            address_postal_code: Set(address.postal_code),
            address_country: Set(address.country),
            delivery_method: Set(delivery_method),
            payment_method: Set(payment_method),
            products: Set(serde_json::to_value(&products)
                .map_err(|e| ServiceError::SerializationError(e.to_string()))?),
            subtotal: Set(subtotal),
            delivery_fee: Set(delivery_fee),
            total: Set(total),
            payment_status: Set("paid".to_string()),
            order_status: Set("confirmed".to_string()),
            notes: Set(None),
            status_history: Set(serde_json::to_value(&initial_history)
                .map_err(|e| ServiceError::SerializationError(e.to_string()))?),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match active.insert(&*self.db).await {
            Ok(model) => {
                info!(order_id = %model.id, "Order materialized");
                if let Some(event_sender) = &self.event_sender {
                    if let Err(e) = event_sender
                        .send(Event::OrderMaterialized {
                            order_id: model.id,
                            session_id: session.id.clone(),
                        })
                        .await
                    {
                        warn!(error = %e, "Failed to send order materialized event");
                    }
                }
                Ok((model, true))
            }
            Err(e) => match e.sql_err() {
                // A concurrent completed-event delivery won the insert; the
                // unique session key turned the race into a readable result.
                Some(SqlErr::UniqueConstraintViolation(_)) => {
                    warn!("Concurrent materialization detected, reusing existing order");
                    let existing = self.find_by_session(&session.id).await?.ok_or_else(|| {
                        ServiceError::InternalServerError
                    })?;
                    Ok((existing, false))
                }
                _ => {
                    error!(error = %e, "Failed to materialize order");
                    Err(ServiceError::DatabaseError(e))
                }
            },
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        OrderEntity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    pub async fn find_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::SessionId.eq(session_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Lists orders newest first.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let orders = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok((orders, total))
    }

    /// Admin-only removal of an order record.
    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let result = OrderEntity::delete_by_id(id)
            .exec(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Order {} not found", id)));
        }

        info!("Order deleted");
        Ok(())
    }
}
