//! PromoCode repository
//!
//! Bulk upsert of remote discount codes keyed by the remote code id, plus the
//! read and delete operations used by the admin side.

use std::collections::HashMap;

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use tracing::debug;
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::promo_code::{ActiveModel, Column, Entity as PromoCode, Model};
use crate::shopify::{RemoteCode, RemoteRule};

/// Columns refreshed when a code that already exists locally is observed again.
const REFRESHED_COLUMNS: [Column; 10] = [
    Column::ShopifyRuleId,
    Column::Code,
    Column::RuleTitle,
    Column::Value,
    Column::ValueType,
    Column::UsageLimit,
    Column::UsageCount,
    Column::StartsAt,
    Column::EndsAt,
    Column::UpdatedAt,
];

/// Repository for the local promo-code mirror
pub struct PromoCodeRepository {
    db: DatabaseConnection,
}

impl PromoCodeRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Write one page of codes for `rule` in a single `INSERT ... ON CONFLICT DO UPDATE`.
    ///
    /// Duplicate code ids within the batch collapse to their last occurrence.
    /// Returns the number of rows the statement reported; an empty batch writes nothing.
    pub async fn upsert_batch(
        &self,
        rule: &RemoteRule,
        codes: &[RemoteCode],
    ) -> Result<u64, SyncError> {
        let codes = dedupe_last_wins(codes);
        if codes.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().fixed_offset();
        let rows = codes.iter().map(|code| ActiveModel {
            id: Set(Uuid::new_v4()),
            shopify_code_id: Set(code.id),
            shopify_rule_id: Set(rule.id),
            code: Set(code.code.clone()),
            rule_title: Set(rule.title.clone()),
            value: Set(rule.value.clone()),
            value_type: Set(rule.value_type.clone()),
            usage_limit: Set(rule.usage_limit),
            usage_count: Set(code.usage_count),
            starts_at: Set(rule.starts_at),
            ends_at: Set(rule.ends_at),
            created_at: Set(now),
            updated_at: Set(now),
        });

        let written = PromoCode::insert_many(rows)
            .on_conflict(
                OnConflict::column(Column::ShopifyCodeId)
                    .update_columns(REFRESHED_COLUMNS)
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        debug!(
            rule_id = rule.id,
            batch = codes.len(),
            written,
            "Upserted promo code batch"
        );
        Ok(written)
    }

    /// Page through the mirror, optionally restricted to one rule.
    pub async fn list(
        &self,
        rule_id: Option<i64>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Model>, SyncError> {
        let mut query = PromoCode::find()
            .order_by_asc(Column::ShopifyRuleId)
            .order_by_asc(Column::ShopifyCodeId);

        if let Some(rule_id) = rule_id {
            query = query.filter(Column::ShopifyRuleId.eq(rule_id));
        }

        Ok(query.offset(offset).limit(limit).all(&self.db).await?)
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<Model>, SyncError> {
        Ok(PromoCode::find()
            .filter(Column::Code.eq(code))
            .one(&self.db)
            .await?)
    }

    /// Remove every code of a rule deleted by an administrator.
    pub async fn delete_by_rule(&self, rule_id: i64) -> Result<u64, SyncError> {
        let deleted = PromoCode::delete_many()
            .filter(Column::ShopifyRuleId.eq(rule_id))
            .exec(&self.db)
            .await?;
        Ok(deleted.rows_affected)
    }
}

/// Keep the last occurrence of each code id, in order of those last occurrences.
fn dedupe_last_wins(codes: &[RemoteCode]) -> Vec<&RemoteCode> {
    let last_index: HashMap<i64, usize> = codes
        .iter()
        .enumerate()
        .map(|(idx, code)| (code.id, idx))
        .collect();

    codes
        .iter()
        .enumerate()
        .filter(|(idx, code)| last_index.get(&code.id) == Some(idx))
        .map(|(_, code)| code)
        .collect()
}
