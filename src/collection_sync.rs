//! Collection Mirror
//!
//! Copies the storefront collection list into the local `collections` table.
//! Each GraphQL page is upserted as soon as it arrives, keyed by the remote
//! id. Runs are serialized in-process: a run requested while another is in
//! flight is skipped rather than queued.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

use crate::error::SyncError;
use crate::page_walker::CollectionWalker;
use crate::repositories::CollectionRepository;
use crate::shopify::ShopifyClient;

/// Outcome of one completed collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectionSyncReport {
    pub pages: u64,
    pub collections: u64,
}

#[derive(Clone)]
pub struct CollectionSync {
    client: ShopifyClient,
    collections: Arc<CollectionRepository>,
    running: Arc<Mutex<()>>,
}

impl CollectionSync {
    pub fn new(db: DatabaseConnection, client: ShopifyClient) -> Self {
        Self {
            client,
            collections: Arc::new(CollectionRepository::new(db)),
            running: Arc::new(Mutex::new(())),
        }
    }

    pub fn collections(&self) -> &CollectionRepository {
        &self.collections
    }

    /// Mirror every collection page.
    ///
    /// Returns `Ok(None)` without touching the network when another pass is
    /// still running. Pages written before a failure stay written.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<Option<CollectionSyncReport>, SyncError> {
        let Ok(_guard) = self.running.try_lock() else {
            info!("Collection sync skipped, another pass is running");
            counter!("promo_sync_collection_runs_total", "outcome" => "skipped").increment(1);
            return Ok(None);
        };

        let started = Instant::now();
        info!("Collection sync started");
        let outcome = self.walk().await;
        histogram!("promo_sync_collection_run_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1_000.0);

        match outcome {
            Ok(report) => {
                counter!("promo_sync_collection_runs_total", "outcome" => "completed").increment(1);
                info!(
                    pages = report.pages,
                    collections = report.collections,
                    "Collection sync completed"
                );
                Ok(Some(report))
            }
            Err(err) => {
                counter!("promo_sync_collection_runs_total", "outcome" => "failed").increment(1);
                Err(err)
            }
        }
    }

    /// Run a pass from a background trigger; failures end as a log line.
    pub async fn run_logged(&self) {
        if let Err(err) = self.run().await {
            error!(error = %err, kind = err.kind(), "Collection sync failed");
        }
    }

    async fn walk(&self) -> Result<CollectionSyncReport, SyncError> {
        let mut walker = CollectionWalker::new(self.client.clone());

        while let Some(page) = walker.next_page().await? {
            self.collections.upsert_batch(&page).await?;
            counter!("promo_sync_collections_upserted_total").increment(page.len() as u64);
        }

        let (pages, collections) = walker.counts();
        Ok(CollectionSyncReport { pages, collections })
    }
}
