//! Collection repository
//!
//! Bulk upsert of storefront collections keyed by their remote GraphQL id.

use std::collections::HashMap;

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use tracing::debug;
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::collection::{ActiveModel, Column, Entity as Collection, Model};
use crate::shopify::RemoteCollection;

const REFRESHED_COLUMNS: [Column; 4] = [
    Column::Handle,
    Column::Title,
    Column::ImageUrl,
    Column::UpdatedAt,
];

/// Repository for the local collection mirror
pub struct CollectionRepository {
    db: DatabaseConnection,
}

impl CollectionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Write one page of collections in a single `INSERT ... ON CONFLICT DO UPDATE`.
    ///
    /// Duplicate ids within the page collapse to their last occurrence.
    pub async fn upsert_batch(&self, collections: &[RemoteCollection]) -> Result<u64, SyncError> {
        let collections = dedupe_last_wins(collections);
        if collections.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().fixed_offset();
        let rows = collections.iter().map(|collection| ActiveModel {
            id: Set(Uuid::new_v4()),
            shopify_collection_id: Set(collection.id.clone()),
            handle: Set(collection.handle.clone()),
            title: Set(collection.title.clone()),
            image_url: Set(collection.image_url().map(str::to_string)),
            created_at: Set(now),
            updated_at: Set(now),
        });

        let written = Collection::insert_many(rows)
            .on_conflict(
                OnConflict::column(Column::ShopifyCollectionId)
                    .update_columns(REFRESHED_COLUMNS)
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        debug!(batch = collections.len(), written, "Upserted collection batch");
        Ok(written)
    }

    /// Page through the mirror ordered by handle.
    pub async fn list(&self, limit: u64, offset: u64) -> Result<Vec<Model>, SyncError> {
        Ok(Collection::find()
            .order_by_asc(Column::Handle)
            .order_by_asc(Column::ShopifyCollectionId)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    pub async fn find_by_handle(&self, handle: &str) -> Result<Option<Model>, SyncError> {
        Ok(Collection::find()
            .filter(Column::Handle.eq(handle))
            .order_by_desc(Column::UpdatedAt)
            .one(&self.db)
            .await?)
    }
}

fn dedupe_last_wins(collections: &[RemoteCollection]) -> Vec<&RemoteCollection> {
    let last_index: HashMap<&str, usize> = collections
        .iter()
        .enumerate()
        .map(|(idx, collection)| (collection.id.as_str(), idx))
        .collect();

    collections
        .iter()
        .enumerate()
        .filter(|(idx, collection)| last_index.get(collection.id.as_str()) == Some(idx))
        .map(|(_, collection)| collection)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shopify::CollectionImage;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn repo() -> CollectionRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        CollectionRepository::new(db)
    }

    fn collection(id: u32, handle: &str, image: Option<&str>) -> RemoteCollection {
        RemoteCollection {
            id: format!("gid://shopify/Collection/{id}"),
            handle: handle.to_string(),
            title: handle.to_uppercase(),
            image: image.map(|src| CollectionImage {
                original_src: src.to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn upsert_refreshes_existing_rows_in_place() {
        let repo = repo().await;
        repo.upsert_batch(&[
            collection(1, "summer", Some("https://cdn.test/a.png")),
            collection(2, "sale", None),
        ])
        .await
        .unwrap();
        let first = repo.find_by_handle("summer").await.unwrap().unwrap();
        assert_eq!(first.image_url.as_deref(), Some("https://cdn.test/a.png"));

        repo.upsert_batch(&[collection(1, "summer-2026", None)])
            .await
            .unwrap();

        assert!(repo.find_by_handle("summer").await.unwrap().is_none());
        let renamed = repo.find_by_handle("summer-2026").await.unwrap().unwrap();
        assert_eq!(renamed.id, first.id);
        assert_eq!(renamed.title, "SUMMER-2026");
        assert_eq!(renamed.image_url, None);
        assert_eq!(renamed.created_at, first.created_at);
        assert_eq!(repo.list(10, 0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_ids_collapse_and_empty_batches_write_nothing() {
        let repo = repo().await;
        assert_eq!(repo.upsert_batch(&[]).await.unwrap(), 0);

        repo.upsert_batch(&[collection(1, "old", None), collection(1, "new", None)])
            .await
            .unwrap();
        let rows = repo.list(10, 0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].handle, "new");
    }

    #[tokio::test]
    async fn handles_can_swap_between_passes() {
        let repo = repo().await;
        repo.upsert_batch(&[collection(1, "a", None), collection(2, "b", None)])
            .await
            .unwrap();
        repo.upsert_batch(&[collection(1, "b", None), collection(2, "a", None)])
            .await
            .unwrap();

        let rows = repo.list(10, 0).await.unwrap();
        assert_eq!(rows[0].handle, "a");
        assert_eq!(rows[0].shopify_collection_id, "gid://shopify/Collection/2");
        assert_eq!(rows[1].shopify_collection_id, "gid://shopify/Collection/1");
    }
}
