//! Sync Executor
//!
//! Run boundary of a promo-code synchronization: records the attempt in the
//! ledger, claims the single-flight gate, drives the page walker into the
//! writer and settles the ledger. Every failure inside a run ends as a FAILED
//! job plus a log line; none of them escapes to the trigger that asked for it.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use tokio::sync::{Mutex, watch};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{AppConfig, SyncConfig};
use crate::error::SyncError;
use crate::models::sync_job::{Model, SyncTrigger};
use crate::page_walker::{PageWalker, WalkStats};
use crate::repositories::{JobProgress, PromoCodeRepository, SyncJobRepository};
use crate::shopify::ShopifyClient;

/// What to synchronize and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    pub trigger: SyncTrigger,
    /// Only rules created within this window are walked; `None` walks the full history
    pub lookback: Option<chrono::Duration>,
}

impl SyncRequest {
    pub fn new(trigger: SyncTrigger, lookback: Option<chrono::Duration>) -> Self {
        Self { trigger, lookback }
    }
}

impl From<WalkStats> for JobProgress {
    fn from(stats: WalkStats) -> Self {
        Self {
            rules_synced: stats.rules,
            codes_synced: stats.codes,
        }
    }
}

enum Claim {
    Started(Model),
    Rejected(Model),
}

/// Executor shared by the scheduler, the CLI and the code-created hook.
#[derive(Clone)]
pub struct SyncExecutor {
    jobs: Arc<SyncJobRepository>,
    codes: Arc<PromoCodeRepository>,
    client: ShopifyClient,
    config: Arc<SyncConfig>,
    /// Serializes create-and-claim within this process
    claim_lock: Arc<Mutex<()>>,
}

impl SyncExecutor {
    pub fn new(db: DatabaseConnection, client: ShopifyClient, config: SyncConfig) -> Self {
        Self {
            jobs: Arc::new(SyncJobRepository::new(db.clone(), config.lease())),
            codes: Arc::new(PromoCodeRepository::new(db)),
            client,
            config: Arc::new(config),
            claim_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Build the executor and its Shopify client from application configuration.
    pub fn from_config(db: DatabaseConnection, config: &AppConfig) -> Result<Self, SyncError> {
        let client = ShopifyClient::new(&config.shopify)?;
        Ok(Self::new(db, client, config.sync.clone()))
    }

    pub fn jobs(&self) -> &SyncJobRepository {
        &self.jobs
    }

    pub fn codes(&self) -> &PromoCodeRepository {
        &self.codes
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Record a PENDING attempt without claiming it.
    pub async fn enqueue(&self, request: SyncRequest) -> Result<Model, SyncError> {
        self.jobs
            .create_pending(request.trigger, request.lookback)
            .await
    }

    /// Claim an existing PENDING job through the gate.
    pub async fn claim(&self, job_id: Uuid) -> Result<Model, SyncError> {
        let _guard = self.claim_lock.lock().await;
        self.jobs.try_start(job_id).await
    }

    /// Claim and run an existing job inline, returning its final ledger row.
    pub async fn execute(&self, job_id: Uuid) -> Result<Model, SyncError> {
        match self.claim(job_id).await {
            Ok(job) => self.run_claimed(job).await,
            Err(SyncError::GateRejected { job_id }) => {
                info!(%job_id, "Sync skipped, another sync already running");
                counter!("promo_sync_runs_total", "outcome" => "rejected").increment(1);
                self.jobs.get(job_id).await
            }
            Err(err) => Err(err),
        }
    }

    /// Create, claim and run a sync inline.
    pub async fn sync_now(&self, request: SyncRequest) -> Result<Model, SyncError> {
        match self.enqueue_and_claim(request).await? {
            Claim::Started(job) => self.run_claimed(job).await,
            Claim::Rejected(job) => Ok(job),
        }
    }

    /// Create and claim a sync, then run the walk in a detached task.
    ///
    /// Returns `None` when the gate rejected the attempt; the attempt is still
    /// recorded as FAILED in the ledger.
    pub async fn start_sync(&self, request: SyncRequest) -> Result<Option<Uuid>, SyncError> {
        match self.enqueue_and_claim(request).await? {
            Claim::Started(job) => {
                let job_id = job.id;
                let executor = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = executor.run_claimed(job).await {
                        error!(%job_id, error = %err, "Failed to settle sync job");
                    }
                });
                Ok(Some(job_id))
            }
            Claim::Rejected(_) => Ok(None),
        }
    }

    pub async fn job_status(&self, job_id: Uuid) -> Result<Model, SyncError> {
        self.jobs.get(job_id).await
    }

    async fn enqueue_and_claim(&self, request: SyncRequest) -> Result<Claim, SyncError> {
        let _guard = self.claim_lock.lock().await;
        let job = self.enqueue(request).await?;

        match self.jobs.try_start(job.id).await {
            Ok(started) => Ok(Claim::Started(started)),
            Err(SyncError::GateRejected { job_id }) => {
                info!(
                    %job_id,
                    trigger = %request.trigger,
                    "Sync skipped, another sync already running"
                );
                counter!("promo_sync_runs_total", "outcome" => "rejected").increment(1);
                Ok(Claim::Rejected(self.jobs.get(job_id).await?))
            }
            Err(err) => {
                if let Err(fail_err) = self.jobs.fail(job.id, &err.to_string()).await {
                    warn!(job_id = %job.id, error = %fail_err, "Failed to record claim failure");
                }
                Err(err)
            }
        }
    }

    /// Walk and write for a RUNNING job, then settle it.
    ///
    /// Only an error writing the terminal state itself is returned.
    #[instrument(skip(self, job), fields(job_id = %job.id, trigger = %job.trigger))]
    pub async fn run_claimed(&self, job: Model) -> Result<Model, SyncError> {
        let started = Instant::now();
        info!(lookback_seconds = ?job.lookback_seconds, "Sync started");

        let outcome = self.walk_with_heartbeat(&job).await;
        histogram!("promo_sync_run_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        match outcome {
            Ok(stats) => {
                let done = self.jobs.complete(job.id, stats.into()).await?;
                counter!("promo_sync_runs_total", "outcome" => "completed").increment(1);
                info!(
                    rule_pages = stats.rule_pages,
                    rules = stats.rules,
                    code_pages = stats.code_pages,
                    codes = stats.codes,
                    "Sync completed"
                );
                Ok(done)
            }
            Err(err) => {
                counter!("promo_sync_runs_total", "outcome" => "failed").increment(1);
                error!(error = %err, kind = err.kind(), "Sync failed");
                self.jobs.fail(job.id, &err.to_string()).await
            }
        }
    }

    /// Drive the walk while refreshing the lease on a timer.
    ///
    /// Rule pages, empty code pages, pacing and 429 backoff produce no batch,
    /// so the lease must not depend on batch heartbeats alone.
    async fn walk_with_heartbeat(&self, job: &Model) -> Result<WalkStats, SyncError> {
        let (progress_tx, progress_rx) = watch::channel(WalkStats::default());
        let walk = self.walk(job, &progress_tx);
        tokio::pin!(walk);

        let mut ticker = interval(self.config.heartbeat_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and the claim just stamped the row
        ticker.tick().await;

        loop {
            tokio::select! {
                outcome = &mut walk => return outcome,
                _ = ticker.tick() => {
                    let stats = *progress_rx.borrow();
                    self.jobs.heartbeat(job.id, stats.into()).await?;
                    debug!(job_id = %job.id, "Sync lease refreshed");
                }
            }
        }
    }

    async fn walk(
        &self,
        job: &Model,
        progress: &watch::Sender<WalkStats>,
    ) -> Result<WalkStats, SyncError> {
        let lookback = job.lookback_seconds.map(chrono::Duration::seconds);
        let mut walker =
            PageWalker::for_window(self.client.clone(), lookback, self.config.rule_pacing())?;

        while let Some(batch) = walker.next_batch().await? {
            self.codes.upsert_batch(&batch.rule, &batch.codes).await?;
            counter!("promo_sync_codes_upserted_total").increment(batch.codes.len() as u64);
            self.jobs.heartbeat(job.id, walker.stats().into()).await?;
            progress.send_replace(walker.stats());
        }

        Ok(walker.stats())
    }
}
