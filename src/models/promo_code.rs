//! PromoCode entity model
//!
//! Local mirror of one remote discount code together with a snapshot of the
//! owning price rule's fields.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "promo_codes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Remote discount code id; unique, the upsert key
    #[sea_orm(unique)]
    pub shopify_code_id: i64,

    /// Remote price rule id owning this code
    pub shopify_rule_id: i64,

    /// The redeemable string customers enter
    pub code: String,

    pub rule_title: String,

    /// Discount amount as reported remotely (e.g. "-10.0")
    pub value: String,

    /// `percentage` or `fixed_amount`
    pub value_type: String,

    pub usage_limit: Option<i64>,

    pub usage_count: i64,

    pub starts_at: Option<DateTimeWithTimeZone>,

    pub ends_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    /// Stamped on every upsert
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
