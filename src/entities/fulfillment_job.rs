use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable fulfillment queue entry, enqueued by the webhook receiver once a
/// completed-payment event is authenticated. The unique `event_id` makes
/// redelivered events conflict-free no-ops; a background worker drains
/// pending rows and retries failures with backoff.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fulfillment_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub event_id: String,
    pub cart_id: Uuid,
    pub buyer_email: String,
    pub amount_total_minor: i64,
    /// Buyer/shipping metadata mirrored from the checkout session
    #[sea_orm(column_type = "Json")]
    pub shipping: Json,
    pub status: FulfillmentStatus,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum FulfillmentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "applied")]
    Applied,
    #[sea_orm(string_value = "failed")]
    Failed,
}
