//! In-process warehouse used by `run --dry-run` and by the test suite.
//!
//! Writes are validated against the full batch before anything is applied, so a
//! rejected write leaves the state untouched. Unique keys are enforced the same
//! way the Postgres schema enforces them; foreign keys are not.

use super::{JobOutcome, JobRun, JobStatus, Table, Warehouse};
use crate::dimension::{
    DimensionBatch, DimensionIndex, DimensionKind, Member, SurrogateKey,
};
use crate::error::{EtlError, Result};
use crate::fact::{FactBatch, FactKind, FactRow};
use crate::pipeline::Stage;
use crate::staging::StagingSet;
use crate::validate::Measure;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    staging: StagingSet,
    index: DimensionIndex,
    next_keys: HashMap<DimensionKind, SurrogateKey>,
    facts: FactBatch,
    latest_fact_load: Option<DateTime<Utc>>,
    job_runs: Vec<JobRun>,
}

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    state: Mutex<State>,
    locked: AtomicBool,
}

/// Proof of holding the in-process run lock.
#[derive(Debug)]
pub struct MemoryRunLock {
    _private: (),
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored fact row.
    #[cfg(test)]
    pub(crate) async fn facts(&self) -> FactBatch {
        self.state.lock().await.facts.clone()
    }
}

fn check_new_members<M: Member>(members: &[M], index: &DimensionIndex) -> Result<()> {
    let existing = M::index(index);
    let mut seen = HashSet::new();
    for member in members {
        let key = member.natural_key();
        if existing.contains_key(key) || !seen.insert(key) {
            return Err(EtlError::ConstraintViolation {
                table: M::KIND.table().to_string(),
                message: format!("duplicate {}", M::KIND.natural_key_column()),
            });
        }
    }
    Ok(())
}

fn append_members<M: Member>(
    members: &[M],
    keys: &mut HashMap<M::Key, SurrogateKey>,
    next_keys: &mut HashMap<DimensionKind, SurrogateKey>,
) {
    let next = next_keys.entry(M::KIND).or_insert(1);
    for member in members {
        keys.insert(member.natural_key().clone(), *next);
        *next += 1;
    }
}

fn check_new_facts<F: FactRow>(existing: &[F], rows: &[F]) -> Result<()> {
    let mut seen: HashSet<&str> = existing.iter().map(|f| f.business_key()).collect();
    for row in rows {
        if !seen.insert(row.business_key()) {
            return Err(EtlError::ConstraintViolation {
                table: F::KIND.table().to_string(),
                message: format!("duplicate {}", F::KIND.business_key_column()),
            });
        }
    }
    Ok(())
}

fn count_orphans<F: FactRow>(rows: &[F], dimension: DimensionKind, keys: &HashSet<SurrogateKey>) -> u64 {
    rows.iter()
        .filter_map(|row| row.dimension_key(dimension))
        .filter(|key| !keys.contains(key))
        .count() as u64
}

fn surrogate_keys(index: &DimensionIndex, kind: DimensionKind) -> HashSet<SurrogateKey> {
    match kind {
        DimensionKind::Time => index.time.values().copied().collect(),
        DimensionKind::Site => index.site.values().copied().collect(),
        DimensionKind::Equipment => index.equipment.values().copied().collect(),
        DimensionKind::Material => index.material.values().copied().collect(),
        DimensionKind::Employee => index.employee.values().copied().collect(),
        DimensionKind::Shift => index.shift.values().copied().collect(),
        DimensionKind::Project => index.project.values().copied().collect(),
        DimensionKind::Account => index.account.values().copied().collect(),
    }
}

fn fact_keys(facts: &FactBatch, kind: FactKind) -> HashSet<&str> {
    match kind {
        FactKind::EquipmentUsage => facts.equipment_usage.iter().map(|f| f.business_key()).collect(),
        FactKind::Production => facts.production.iter().map(|f| f.business_key()).collect(),
        FactKind::FinancialTransaction => facts
            .financial_transaction
            .iter()
            .map(|f| f.business_key())
            .collect(),
    }
}

fn measure_values(facts: &FactBatch, measure: Measure) -> Vec<Option<f64>> {
    let usage = &facts.equipment_usage;
    match measure {
        Measure::EquipmentEfficiency => usage.iter().map(|f| f.efficiency_ratio).collect(),
        Measure::EquipmentOperatingHours => usage.iter().map(|f| f.operating_hours).collect(),
        Measure::EquipmentFuelConsumption => usage.iter().map(|f| f.fuel_consumption).collect(),
        Measure::EquipmentMaintenanceCost => usage.iter().map(|f| f.maintenance_cost).collect(),
        Measure::ProductionVolume => facts.production.iter().map(|f| f.produced_volume).collect(),
        Measure::FinancialActualCost => facts
            .financial_transaction
            .iter()
            .map(|f| f.actual_cost)
            .collect(),
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    type RunLock = MemoryRunLock;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn try_lock_run(&self) -> Result<Option<MemoryRunLock>> {
        let acquired = self
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        Ok(acquired.then_some(MemoryRunLock { _private: () }))
    }

    async fn unlock_run(&self, _lock: MemoryRunLock) -> Result<()> {
        self.locked.store(false, Ordering::Release);
        Ok(())
    }

    async fn replace_staging(&self, staging: &StagingSet) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut sorted = staging.clone();
        sorted.equipment_usage.sort_by_key(|r| r.source_line);
        sorted.production.sort_by_key(|r| r.source_line);
        sorted.financial_transaction.sort_by_key(|r| r.source_line);
        state.staging = sorted;
        Ok(())
    }

    async fn load_staging(&self) -> Result<StagingSet> {
        Ok(self.state.lock().await.staging.clone())
    }

    async fn dimension_index(&self) -> Result<DimensionIndex> {
        Ok(self.state.lock().await.index.clone())
    }

    async fn insert_dimensions(&self, batch: &DimensionBatch) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        check_new_members(&batch.time, &state.index)?;
        check_new_members(&batch.site, &state.index)?;
        check_new_members(&batch.equipment, &state.index)?;
        check_new_members(&batch.material, &state.index)?;
        check_new_members(&batch.employee, &state.index)?;
        check_new_members(&batch.shift, &state.index)?;
        check_new_members(&batch.project, &state.index)?;
        check_new_members(&batch.account, &state.index)?;

        let next = &mut state.next_keys;
        append_members(&batch.time, &mut state.index.time, next);
        append_members(&batch.site, &mut state.index.site, next);
        append_members(&batch.equipment, &mut state.index.equipment, next);
        append_members(&batch.material, &mut state.index.material, next);
        append_members(&batch.employee, &mut state.index.employee, next);
        append_members(&batch.shift, &mut state.index.shift, next);
        append_members(&batch.project, &mut state.index.project, next);
        append_members(&batch.account, &mut state.index.account, next);
        Ok(())
    }

    async fn fact_business_keys(&self, kind: FactKind) -> Result<HashSet<String>> {
        let state = self.state.lock().await;
        Ok(fact_keys(&state.facts, kind)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    async fn insert_facts(&self, batch: &FactBatch) -> Result<()> {
        let mut state = self.state.lock().await;

        check_new_facts(&state.facts.equipment_usage, &batch.equipment_usage)?;
        check_new_facts(&state.facts.production, &batch.production)?;
        check_new_facts(&state.facts.financial_transaction, &batch.financial_transaction)?;

        let facts = &mut state.facts;
        facts.equipment_usage.extend(batch.equipment_usage.iter().cloned());
        facts.production.extend(batch.production.iter().cloned());
        facts
            .financial_transaction
            .extend(batch.financial_transaction.iter().cloned());
        if FactKind::ALL.iter().any(|kind| batch.len(*kind) > 0) {
            state.latest_fact_load = Some(Utc::now());
        }
        Ok(())
    }

    async fn row_count(&self, table: Table) -> Result<u64> {
        let state = self.state.lock().await;
        let count = match table {
            Table::Staging(kind) => state.staging.len(kind),
            Table::Dimension(kind) => state.index.len(kind),
            Table::Fact(kind) => state.facts.len(kind),
        };
        Ok(count as u64)
    }

    async fn orphaned_rows(&self, fact: FactKind, dimension: DimensionKind) -> Result<u64> {
        let state = self.state.lock().await;
        let keys = surrogate_keys(&state.index, dimension);
        let orphans = match fact {
            FactKind::EquipmentUsage => count_orphans(&state.facts.equipment_usage, dimension, &keys),
            FactKind::Production => count_orphans(&state.facts.production, dimension, &keys),
            FactKind::FinancialTransaction => {
                count_orphans(&state.facts.financial_transaction, dimension, &keys)
            }
        };
        Ok(orphans)
    }

    async fn null_measures(&self, measure: Measure) -> Result<u64> {
        let state = self.state.lock().await;
        let nulls = measure_values(&state.facts, measure)
            .into_iter()
            .filter(|v| v.is_none())
            .count();
        Ok(nulls as u64)
    }

    async fn negative_measures(&self, measure: Measure) -> Result<u64> {
        let state = self.state.lock().await;
        let negatives = measure_values(&state.facts, measure)
            .into_iter()
            .filter(|v| matches!(v, Some(x) if *x < 0.0))
            .count();
        Ok(negatives as u64)
    }

    async fn latest_fact_load(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state.lock().await.latest_fact_load)
    }

    async fn unloaded_staging_rows(&self, fact: FactKind) -> Result<u64> {
        let state = self.state.lock().await;
        let loaded = fact_keys(&state.facts, fact);
        let staged: HashSet<&str> = state.staging.business_keys(fact.source()).into_iter().collect();
        Ok(staged.difference(&loaded).count() as u64)
    }

    async fn start_job_run(&self, stage: Stage) -> Result<Uuid> {
        let job_run_id = Uuid::new_v4();
        self.state.lock().await.job_runs.push(JobRun {
            job_run_id,
            stage: stage.as_str().to_string(),
            status: JobStatus::Running.as_str().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
            detail: serde_json::json!({}),
        });
        Ok(job_run_id)
    }

    async fn finish_job_run(&self, job_run_id: Uuid, outcome: &JobOutcome) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(run) = state.job_runs.iter_mut().find(|r| r.job_run_id == job_run_id) {
            run.status = outcome.status.as_str().to_string();
            run.finished_at = Some(Utc::now());
            run.error = outcome.error.clone();
            run.detail = outcome.detail.clone();
        }
        Ok(())
    }

    async fn recent_job_runs(&self, limit: i64) -> Result<Vec<JobRun>> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(state.job_runs.iter().rev().take(limit).cloned().collect())
    }
}
