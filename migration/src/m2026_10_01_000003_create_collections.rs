//! Migration to create the collections table.
//!
//! Local mirror of the storefront collection list, keyed by the remote
//! GraphQL id.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Collections::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Collections::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Collections::ShopifyCollectionId)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Collections::Handle).text().not_null())
                    .col(ColumnDef::new(Collections::Title).text().not_null())
                    .col(ColumnDef::new(Collections::ImageUrl).text().null())
                    .col(
                        ColumnDef::new(Collections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Collections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_collections_shopify_collection_id")
                    .table(Collections::Table)
                    .col(Collections::ShopifyCollectionId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Not unique: two collections swapping handles between passes would
        // otherwise fail the batch
        manager
            .create_index(
                Index::create()
                    .name("idx_collections_handle")
                    .table(Collections::Table)
                    .col(Collections::Handle)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in ["idx_collections_shopify_collection_id", "idx_collections_handle"] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(Collections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Collections {
    Table,
    Id,
    ShopifyCollectionId,
    Handle,
    Title,
    ImageUrl,
    CreatedAt,
    UpdatedAt,
}
