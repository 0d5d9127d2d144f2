//! Migration to create the promo_codes table.
//!
//! Local mirror of remote discount codes, denormalized with the fields of the
//! owning price rule. `shopify_code_id` is the upsert key.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PromoCodes::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(PromoCodes::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(PromoCodes::ShopifyCodeId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PromoCodes::ShopifyRuleId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PromoCodes::Code).text().not_null())
                    .col(ColumnDef::new(PromoCodes::RuleTitle).text().not_null())
                    .col(ColumnDef::new(PromoCodes::Value).text().not_null())
                    .col(ColumnDef::new(PromoCodes::ValueType).text().not_null())
                    .col(ColumnDef::new(PromoCodes::UsageLimit).big_integer().null())
                    .col(
                        ColumnDef::new(PromoCodes::UsageCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PromoCodes::StartsAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PromoCodes::EndsAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PromoCodes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PromoCodes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Upsert target; must be a unique index for ON CONFLICT
        manager
            .create_index(
                Index::create()
                    .name("idx_promo_codes_shopify_code_id")
                    .table(PromoCodes::Table)
                    .col(PromoCodes::ShopifyCodeId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_promo_codes_shopify_rule_id")
                    .table(PromoCodes::Table)
                    .col(PromoCodes::ShopifyRuleId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_promo_codes_code")
                    .table(PromoCodes::Table)
                    .col(PromoCodes::Code)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_promo_codes_shopify_code_id",
            "idx_promo_codes_shopify_rule_id",
            "idx_promo_codes_code",
        ] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(PromoCodes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PromoCodes {
    Table,
    Id,
    ShopifyCodeId,
    ShopifyRuleId,
    Code,
    RuleTitle,
    Value,
    ValueType,
    UsageLimit,
    UsageCount,
    StartsAt,
    EndsAt,
    CreatedAt,
    UpdatedAt,
}
