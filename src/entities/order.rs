use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A product line captured at the time of purchase. This is a snapshot, not
/// a live catalog reference; prices are major units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderProduct {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    pub quantity: i64,
    #[serde(default)]
    pub image: Option<String>,
}

/// Append-only record of a fulfillment status change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StatusHistoryEntry {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// Who made the change (admin email, or "system" for materialization)
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Materialized exactly once per successfully paid checkout session. The
/// product/pricing snapshot is immutable after insert; only order_status,
/// notes and status_history may change, and history only appends.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub session_id: String,

    pub payment_intent_id: Option<String>,

    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,

    pub address_line1: String,
    pub address_city: String,
    pub address_postal_code: String,
    pub address_country: String,

    pub delivery_method: String,
    pub payment_method: String,

    /// JSON array of OrderProduct
    pub products: Json,

    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,

    /// pending | paid | failed | refunded
    pub payment_status: String,

    /// pending | confirmed | preparing | shipped | delivered | cancelled
    pub order_status: String,

    pub notes: Option<String>,

    /// JSON array of StatusHistoryEntry, append-only
    pub status_history: Json,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::payment_attempt::Entity")]
    PaymentAttempt,
}

impl Related<super::payment_attempt::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentAttempt.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Decode the products snapshot column.
    pub fn product_lines(&self) -> Result<Vec<OrderProduct>, serde_json::Error> {
        serde_json::from_value(self.products.clone())
    }

    /// Decode the status history column.
    pub fn history(&self) -> Result<Vec<StatusHistoryEntry>, serde_json::Error> {
        serde_json::from_value(self.status_history.clone())
    }
}
