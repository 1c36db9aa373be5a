//! Warehouse seam shared by every stage.
//!
//! Each write method is atomic: it either applies completely or leaves the
//! warehouse untouched. Reads see only committed state.

pub mod memory;
pub mod postgres;

use crate::dimension::{DimensionBatch, DimensionIndex, DimensionKind};
use crate::error::Result;
use crate::fact::{FactBatch, FactKind};
use crate::pipeline::Stage;
use crate::staging::{SourceKind, StagingSet};
use crate::validate::Measure;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

/// Any of the fourteen warehouse tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Staging(SourceKind),
    Dimension(DimensionKind),
    Fact(FactKind),
}

impl Table {
    pub fn all() -> Vec<Table> {
        SourceKind::ALL
            .iter()
            .map(|k| Table::Staging(*k))
            .chain(DimensionKind::ALL.iter().map(|k| Table::Dimension(*k)))
            .chain(FactKind::ALL.iter().map(|k| Table::Fact(*k)))
            .collect()
    }

    /// Schema-qualified table name.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Staging(kind) => kind.staging_table(),
            Table::Dimension(kind) => kind.table(),
            Table::Fact(kind) => kind.table(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Ok,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Ok => "ok",
            JobStatus::Failed => "failed",
        }
    }
}

/// How a stage invocation ended.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub error: Option<String>,
    pub detail: serde_json::Value,
}

impl JobOutcome {
    pub fn ok(detail: serde_json::Value) -> Self {
        Self {
            status: JobStatus::Ok,
            error: None,
            detail,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            status: JobStatus::Failed,
            error: Some(error.to_string()),
            detail: serde_json::json!({}),
        }
    }
}

/// One row of the stage audit trail.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JobRun {
    pub job_run_id: Uuid,
    pub stage: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub detail: serde_json::Value,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Held for the duration of a stage or full run.
    type RunLock: Send;

    async fn ping(&self) -> Result<()>;

    /// `None` when another run already holds the lock.
    async fn try_lock_run(&self) -> Result<Option<Self::RunLock>>;

    async fn unlock_run(&self, lock: Self::RunLock) -> Result<()>;

    /// Truncates and reloads all three staging tables in one write.
    async fn replace_staging(&self, staging: &StagingSet) -> Result<()>;

    /// Staging rows of every table, ordered by source line.
    async fn load_staging(&self) -> Result<StagingSet>;

    async fn dimension_index(&self) -> Result<DimensionIndex>;

    /// Appends new members, assigning surrogate keys in batch order.
    async fn insert_dimensions(&self, batch: &DimensionBatch) -> Result<()>;

    async fn fact_business_keys(&self, kind: FactKind) -> Result<HashSet<String>>;

    async fn insert_facts(&self, batch: &FactBatch) -> Result<()>;

    async fn row_count(&self, table: Table) -> Result<u64>;

    /// Fact rows whose key for `dimension` matches no dimension row.
    async fn orphaned_rows(&self, fact: FactKind, dimension: DimensionKind) -> Result<u64>;

    async fn null_measures(&self, measure: Measure) -> Result<u64>;

    async fn negative_measures(&self, measure: Measure) -> Result<u64>;

    /// Latest `loaded_at` across all fact tables.
    async fn latest_fact_load(&self) -> Result<Option<DateTime<Utc>>>;

    /// Distinct staging business keys with no row in the fact table.
    async fn unloaded_staging_rows(&self, fact: FactKind) -> Result<u64>;

    async fn start_job_run(&self, stage: Stage) -> Result<Uuid>;

    async fn finish_job_run(&self, job_run_id: Uuid, outcome: &JobOutcome) -> Result<()>;

    /// Most recent first.
    async fn recent_job_runs(&self, limit: i64) -> Result<Vec<JobRun>>;
}
