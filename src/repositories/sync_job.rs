//! # SyncJob Repository
//!
//! Persisted state machine of synchronization attempts. Every transition is a
//! single conditional `UPDATE`, so the current status is re-checked by the
//! database instead of trusted from a previously loaded row.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, QueryTrait, Set,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{GATE_REJECTED_REASON, LEASE_EXPIRED_REASON, SyncError};
use crate::models::sync_job::{ActiveModel, Column, Entity as SyncJob, Model, SyncJobStatus, SyncTrigger};

/// Progress counters written on heartbeat and completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobProgress {
    pub rules_synced: u64,
    pub codes_synced: u64,
}

/// Repository for the `sync_jobs` ledger
pub struct SyncJobRepository {
    db: DatabaseConnection,
    lease: Duration,
}

impl SyncJobRepository {
    /// Create a repository; non-terminal jobs silent for longer than `lease` count as abandoned.
    pub fn new(db: DatabaseConnection, lease: Duration) -> Self {
        Self { db, lease }
    }

    /// Insert a new PENDING attempt.
    pub async fn create_pending(
        &self,
        trigger: SyncTrigger,
        lookback: Option<Duration>,
    ) -> Result<Model, SyncError> {
        let now = Utc::now().fixed_offset();

        let job = ActiveModel {
            id: Set(Uuid::new_v4()),
            status: Set(SyncJobStatus::Pending.as_str().to_string()),
            trigger: Set(trigger.as_str().to_string()),
            lookback_seconds: Set(lookback.map(|window| window.num_seconds())),
            rules_synced: Set(0),
            codes_synced: Set(0),
            started_at: Set(None),
            completed_at: Set(None),
            error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let job = job.insert(&self.db).await?;
        info!(job_id = %job.id, trigger = %job.trigger, "Sync job created");
        Ok(job)
    }

    /// Claim a PENDING job, moving it to RUNNING if no other live job holds the gate.
    ///
    /// Abandoned jobs are reclaimed first. On contention the job is recorded as
    /// FAILED and `GateRejected` is returned.
    pub async fn try_start(&self, job_id: Uuid) -> Result<Model, SyncError> {
        let now = Utc::now().fixed_offset();
        let cutoff = self.lease_cutoff(now);

        let reclaimed = self.reclaim_abandoned(job_id, now, cutoff).await?;
        if reclaimed > 0 {
            warn!(reclaimed, "Reclaimed abandoned sync jobs past their lease");
        }

        let other_live = SyncJob::find()
            .select_only()
            .column(Column::Id)
            .filter(Column::Status.is_in(SyncJobStatus::non_terminal_values()))
            .filter(Column::Id.ne(job_id))
            .filter(Column::UpdatedAt.gt(cutoff))
            .into_query();

        let claimed = SyncJob::update_many()
            .col_expr(Column::Status, Expr::value(SyncJobStatus::Running.as_str()))
            .col_expr(Column::StartedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(SyncJobStatus::Pending.as_str()))
            .filter(Condition::all().add(Expr::exists(other_live)).not())
            .exec(&self.db)
            .await?;

        if claimed.rows_affected == 1 {
            return self.get(job_id).await;
        }

        let job = self.get(job_id).await?;
        if job.job_status() != SyncJobStatus::Pending {
            return Err(SyncError::InvalidTransition {
                job_id,
                status: job.status,
            });
        }

        self.fail(job_id, GATE_REJECTED_REASON).await?;
        Err(SyncError::GateRejected { job_id })
    }

    /// Refresh the lease and progress of a RUNNING job.
    ///
    /// Fails with `InvalidTransition` if the job is no longer RUNNING, which
    /// happens when it was reclaimed after missing its lease.
    pub async fn heartbeat(&self, job_id: Uuid, progress: JobProgress) -> Result<(), SyncError> {
        let now = Utc::now().fixed_offset();

        let updated = SyncJob::update_many()
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .col_expr(Column::RulesSynced, Expr::value(db_count(progress.rules_synced)))
            .col_expr(Column::CodesSynced, Expr::value(db_count(progress.codes_synced)))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(SyncJobStatus::Running.as_str()))
            .exec(&self.db)
            .await?;

        if updated.rows_affected == 0 {
            return Err(self.transition_error(job_id).await);
        }
        Ok(())
    }

    /// Mark a RUNNING job COMPLETED.
    pub async fn complete(&self, job_id: Uuid, progress: JobProgress) -> Result<Model, SyncError> {
        let now = Utc::now().fixed_offset();

        let updated = SyncJob::update_many()
            .col_expr(Column::Status, Expr::value(SyncJobStatus::Completed.as_str()))
            .col_expr(Column::CompletedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .col_expr(Column::RulesSynced, Expr::value(db_count(progress.rules_synced)))
            .col_expr(Column::CodesSynced, Expr::value(db_count(progress.codes_synced)))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(SyncJobStatus::Running.as_str()))
            .exec(&self.db)
            .await?;

        if updated.rows_affected == 0 {
            return Err(self.transition_error(job_id).await);
        }
        self.get(job_id).await
    }

    /// Mark a non-terminal job FAILED with `reason`. Terminal jobs are never rewritten.
    pub async fn fail(&self, job_id: Uuid, reason: &str) -> Result<Model, SyncError> {
        let now = Utc::now().fixed_offset();

        let updated = SyncJob::update_many()
            .col_expr(Column::Status, Expr::value(SyncJobStatus::Failed.as_str()))
            .col_expr(Column::CompletedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .col_expr(Column::Error, Expr::value(reason))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.is_in(SyncJobStatus::non_terminal_values()))
            .exec(&self.db)
            .await?;

        if updated.rows_affected == 0 {
            return Err(self.transition_error(job_id).await);
        }
        self.get(job_id).await
    }

    /// Whether a live (non-abandoned) job currently holds the gate.
    pub async fn has_active(&self) -> Result<bool, SyncError> {
        let cutoff = self.lease_cutoff(Utc::now().fixed_offset());

        let live = SyncJob::find()
            .filter(Column::Status.is_in(SyncJobStatus::non_terminal_values()))
            .filter(Column::UpdatedAt.gt(cutoff))
            .count(&self.db)
            .await?;

        Ok(live > 0)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Model, SyncError> {
        SyncJob::find_by_id(job_id)
            .one(&self.db)
            .await?
            .ok_or(SyncError::JobNotFound(job_id))
    }

    /// Most recent attempts first.
    pub async fn list_recent(&self, limit: u64) -> Result<Vec<Model>, SyncError> {
        Ok(SyncJob::find()
            .order_by_desc(Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    fn lease_cutoff(&self, now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        now - self.lease
    }

    async fn reclaim_abandoned(
        &self,
        claimant: Uuid,
        now: DateTime<FixedOffset>,
        cutoff: DateTime<FixedOffset>,
    ) -> Result<u64, SyncError> {
        let reclaimed = SyncJob::update_many()
            .col_expr(Column::Status, Expr::value(SyncJobStatus::Failed.as_str()))
            .col_expr(Column::CompletedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .col_expr(Column::Error, Expr::value(LEASE_EXPIRED_REASON))
            .filter(Column::Status.is_in(SyncJobStatus::non_terminal_values()))
            .filter(Column::Id.ne(claimant))
            .filter(Column::UpdatedAt.lte(cutoff))
            .exec(&self.db)
            .await?;

        Ok(reclaimed.rows_affected)
    }

    /// Explain why a conditional transition touched no row.
    async fn transition_error(&self, job_id: Uuid) -> SyncError {
        match self.get(job_id).await {
            Ok(job) => SyncError::InvalidTransition {
                job_id,
                status: job.status,
            },
            Err(err) => err,
        }
    }
}

fn db_count(value: u64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
