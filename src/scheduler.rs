//! # Sync Scheduler
//!
//! Background task firing promo-code syncs at process startup, once a day at a
//! fixed local time, and shortly after a discount code is created. Every
//! trigger goes through [`SyncExecutor::start_sync`], so the ledger gate
//! decides whether a run actually happens.
//!
//! When a [`CollectionSync`] is attached, the collection mirror also runs at
//! startup and once a day at its own local time.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use metrics::counter;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::collection_sync::CollectionSync;
use crate::config::{AppConfig, ConfigError};
use crate::models::sync_job::SyncTrigger;
use crate::sync_executor::{SyncExecutor, SyncRequest};

/// Capacity of the code-created work queue.
const TRIGGER_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
enum TriggerEvent {
    CodeCreated,
}

/// Cheap handle for requesting a sync from outside the scheduler task.
#[derive(Debug, Clone)]
pub struct SyncTriggerHandle {
    tx: mpsc::Sender<TriggerEvent>,
}

impl SyncTriggerHandle {
    /// Request a narrow sync after a code was created. Never blocks.
    ///
    /// Returns false when the request was dropped because the queue is full or
    /// the scheduler has stopped.
    pub fn notify_code_created(&self) -> bool {
        match self.tx.try_send(TriggerEvent::CodeCreated) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                counter!("promo_sync_triggers_dropped_total").increment(1);
                warn!("Sync trigger queue full, dropping code-created trigger");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Scheduler stopped, ignoring code-created trigger");
                false
            }
        }
    }
}

/// Background scheduler service.
pub struct SyncScheduler {
    executor: SyncExecutor,
    run_on_startup: bool,
    daily_at: NaiveTime,
    offset: FixedOffset,
    collections_at: NaiveTime,
    collection_sync: Option<CollectionSync>,
    triggers: mpsc::Receiver<TriggerEvent>,
}

impl SyncScheduler {
    /// Create the scheduler and the handle used to feed it code-created events.
    pub fn new(
        config: &AppConfig,
        executor: SyncExecutor,
    ) -> Result<(Self, SyncTriggerHandle), ConfigError> {
        let (tx, rx) = mpsc::channel(TRIGGER_QUEUE_CAPACITY);
        let scheduler = Self {
            executor,
            run_on_startup: config.scheduler.run_on_startup,
            daily_at: config.scheduler.daily_time()?,
            offset: config.scheduler.utc_offset()?,
            collections_at: config.scheduler.collections_daily_time()?,
            collection_sync: None,
            triggers: rx,
        };
        Ok((scheduler, SyncTriggerHandle { tx }))
    }

    /// Also mirror collections at startup and daily at `collections_daily_run_at`.
    pub fn with_collection_sync(mut self, collection_sync: CollectionSync) -> Self {
        self.collection_sync = Some(collection_sync);
        self
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(daily_at = %self.daily_at, offset = %self.offset, "Starting sync scheduler");

        if self.run_on_startup {
            self.trigger_if_idle(SyncTrigger::Startup).await;
            self.spawn_collection_sync();
        }

        // Last slot fired per timer; a wall clock lagging the timer must not refire it
        let mut sync_fired = Utc::now();
        let mut collections_fired = sync_fired;

        loop {
            let now = Utc::now();
            let next = next_daily_run(now.max(sync_fired), self.daily_at, self.offset);
            let wait = (next - now).to_std().unwrap_or_default();
            debug!(next_run = %next, "Next daily sync scheduled");

            let collections_enabled = self.collection_sync.is_some();
            let next_collections =
                next_daily_run(now.max(collections_fired), self.collections_at, self.offset);
            let collections_wait = (next_collections - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sync scheduler shutdown requested");
                    break;
                }
                _ = sleep(wait) => {
                    sync_fired = next;
                    self.trigger_if_idle(SyncTrigger::Scheduled).await;
                }
                _ = sleep(collections_wait), if collections_enabled => {
                    collections_fired = next_collections;
                    self.spawn_collection_sync();
                }
                Some(event) = self.triggers.recv() => match event {
                    TriggerEvent::CodeCreated => self.spawn_post_create_sync(),
                },
            }
        }

        info!("Sync scheduler stopped");
    }

    /// Start a wide-window sync unless one is already in flight.
    async fn trigger_if_idle(&self, trigger: SyncTrigger) {
        match self.executor.jobs().has_active().await {
            Ok(true) => {
                info!(%trigger, "Sync already in flight, skipping trigger");
                return;
            }
            Ok(false) => {}
            Err(err) => {
                error!(%trigger, error = %err, "Failed to check for an active sync");
                return;
            }
        }

        let request = SyncRequest::new(trigger, Some(self.executor.config().scheduled_lookback()));
        match self.executor.start_sync(request).await {
            Ok(Some(job_id)) => info!(%trigger, %job_id, "Triggered sync"),
            Ok(None) => {}
            Err(err) => error!(%trigger, error = %err, "Failed to start sync"),
        }
    }

    /// Start a narrow-window sync after the configured delay, off the scheduler task.
    fn spawn_post_create_sync(&self) {
        let executor = self.executor.clone();
        let delay = executor.config().post_create_delay();
        let request = SyncRequest::new(
            SyncTrigger::CodeCreated,
            Some(executor.config().post_create_lookback()),
        );

        tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            match executor.start_sync(request).await {
                Ok(Some(job_id)) => info!(%job_id, "Triggered post-create sync"),
                Ok(None) => {}
                Err(err) => error!(error = %err, "Failed to start post-create sync"),
            }
        });
    }

    /// Run a collection pass off the scheduler task, if a mirror is attached.
    fn spawn_collection_sync(&self) {
        if let Some(collection_sync) = self.collection_sync.clone() {
            tokio::spawn(async move { collection_sync.run_logged().await });
        }
    }
}

/// The first instant strictly after `now` whose wall-clock time at `offset` is `at`.
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    let local_date = now.with_timezone(&offset).date_naive();
    let offset_delta = Duration::seconds(i64::from(offset.local_minus_utc()));
    let today = (local_date.and_time(at) - offset_delta).and_utc();

    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}
