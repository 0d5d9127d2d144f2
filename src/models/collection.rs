//! Collection entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "collections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Remote GraphQL id, e.g. `gid://shopify/Collection/841564295`; the upsert key
    #[sea_orm(unique)]
    pub shopify_collection_id: String,

    pub handle: String,

    pub title: String,

    pub image_url: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    /// Stamped on every upsert
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
