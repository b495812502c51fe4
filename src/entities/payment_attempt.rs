use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle of a checkout attempt as reported by the payment processor.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "canceled")]
    Canceled,
    #[sea_orm(string_value = "requires_action")]
    RequiresAction,
}

/// One row per checkout session, created pending at session creation and
/// mutated only by webhook reconciliation and refunds. The unique session_id
/// column is what makes re-submission an update instead of a duplicate.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_attempts")]
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

    /// Line items as submitted at checkout, in major units
    pub items: Json,

    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,

    pub payment_status: PaymentStatus,

    /// Raw status string last reported by the processor
    pub processor_status: Option<String>,
    pub failure_reason: Option<String>,

    pub currency: String,
    pub amount_received: Option<Decimal>,

    pub refunded: bool,
    pub refund_amount: Decimal,

    pub order_created: bool,
    pub order_id: Option<Uuid>,

    pub metadata: Json,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
