//! SyncJob entity model
//!
//! This module contains the SeaORM entity model for the sync_jobs table,
//! the persisted ledger of promo-code synchronization attempts.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// SyncJob entity, one row per synchronization attempt
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    /// Unique identifier for the sync job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Ledger state: PENDING, RUNNING, COMPLETED or FAILED
    pub status: String,

    /// Which trigger created the attempt
    pub trigger: String,

    /// Lookback window applied to the rule listing; `None` walks the full history
    pub lookback_seconds: Option<i64>,

    /// Rules fully drained so far
    pub rules_synced: i32,

    /// Codes upserted so far
    pub codes_synced: i32,

    /// Set on the transition into RUNNING
    pub started_at: Option<DateTimeWithTimeZone>,

    /// Set on the transition into COMPLETED or FAILED
    pub completed_at: Option<DateTimeWithTimeZone>,

    /// Human-readable failure reason, only present when FAILED
    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    /// Heartbeat; a non-terminal job that stops refreshing this is reclaimed by the lease
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parsed ledger status. Unknown values are reported as FAILED.
    pub fn job_status(&self) -> SyncJobStatus {
        self.status.parse().unwrap_or(SyncJobStatus::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        self.job_status().is_terminal()
    }
}

/// Ledger states of a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SyncJobStatus {
    /// States that hold the single-flight gate.
    pub const NON_TERMINAL: [SyncJobStatus; 2] = [SyncJobStatus::Pending, SyncJobStatus::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncJobStatus::Pending => "PENDING",
            SyncJobStatus::Running => "RUNNING",
            SyncJobStatus::Completed => "COMPLETED",
            SyncJobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncJobStatus::Completed | SyncJobStatus::Failed)
    }

    pub(crate) fn non_terminal_values() -> Vec<&'static str> {
        Self::NON_TERMINAL.iter().map(|s| s.as_str()).collect()
    }
}

impl fmt::Display for SyncJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SyncJobStatus::Pending),
            "RUNNING" => Ok(SyncJobStatus::Running),
            "COMPLETED" => Ok(SyncJobStatus::Completed),
            "FAILED" => Ok(SyncJobStatus::Failed),
            other => Err(format!("unknown sync job status '{other}'")),
        }
    }
}

/// What caused a sync attempt to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// Process startup
    Startup,
    /// Daily schedule
    Scheduled,
    /// A discount code was just created through the management API
    CodeCreated,
    /// Operator-initiated (CLI)
    Manual,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Startup => "startup",
            SyncTrigger::Scheduled => "scheduled",
            SyncTrigger::CodeCreated => "code_created",
            SyncTrigger::Manual => "manual",
        }
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
