//! Postgres warehouse
//!
//! Responsibilities:
//! - Apply the warehouse DDL
//! - Set-based bulk inserts, chunked under the bind-parameter limit
//! - One transaction per stage write
//! - Session advisory lock serializing pipeline runs
//! - Validator queries and the job-run audit trail

use super::{JobOutcome, JobRun, Table, Warehouse};
use crate::dimension::{DimensionBatch, DimensionIndex, DimensionKind, SurrogateKey};
use crate::error::{EtlError, Result};
use crate::fact::{FactBatch, FactKind};
use crate::pipeline::Stage;
use crate::staging::{
    EquipmentUsageRecord, FinancialTransactionRecord, ProductionRecord, SourceKind, StagingSet,
};
use crate::validate::Measure;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::query_builder::Separated;
use sqlx::{Connection, Postgres, QueryBuilder};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../sql/schema.sql");

/// Advisory lock key shared by every `etl` process.
const RUN_LOCK_KEY: i64 = 0x4d49_4e45_4554_4c;

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;

const EQUIPMENT_USAGE_STAGING: &[&str] = &[
    "source_line", "equipment_usage_id", "time_id", "date", "site_name", "region",
    "latitude", "longitude", "equipment_name", "equipment_type", "manufacture", "model",
    "capacity", "purchase_date", "operating_hours", "downtime_hours", "fuel_consumption",
    "maintenance_cost", "created_at", "created_by",
];

const PRODUCTION_STAGING: &[&str] = &[
    "source_line", "production_id", "time_id", "site_id", "material_id", "employee_id",
    "shift_id", "produced_volume", "unit_cost", "date", "site_name", "region", "latitude",
    "longitude", "material_name", "material_type", "unit_of_measure", "quantity",
    "employee_name", "position", "department", "status", "hire_date", "shift_name",
    "start_time", "end_time",
];

const TRANSACTION_STAGING: &[&str] = &[
    "source_line", "transaction_id", "time_id", "site_id", "project_id", "account_id",
    "variance", "budgeted_cost", "actual_cost", "created_at", "created_by", "date",
    "site_name", "region", "latitude", "longitude", "project_name", "project_manager",
    "status", "start_date", "end_date", "account_name", "account_type", "budget_category",
    "cost",
];

const TIME_COLUMNS: &[&str] = &[
    "date", "time_id", "day_of_month", "day_name", "month", "month_name", "quarter", "year",
    "is_weekend",
];
const SITE_COLUMNS: &[&str] = &["site_name", "site_id", "region", "latitude", "longitude"];
const EQUIPMENT_COLUMNS: &[&str] = &[
    "equipment_name", "equipment_type", "manufacture", "model", "capacity", "purchase_date",
];
const MATERIAL_COLUMNS: &[&str] = &["material_id", "material_name", "material_type", "unit_of_measure"];
const EMPLOYEE_COLUMNS: &[&str] = &[
    "employee_id", "employee_name", "position", "department", "status", "hire_date",
];
const SHIFT_COLUMNS: &[&str] = &["shift_id", "shift_name", "start_time", "end_time"];
const PROJECT_COLUMNS: &[&str] = &[
    "project_id", "project_name", "project_manager", "status", "start_date", "end_date",
];
const ACCOUNT_COLUMNS: &[&str] = &["account_id", "account_name", "account_type", "budget_category"];

const EQUIPMENT_USAGE_FACT: &[&str] = &[
    "equipment_usage_id", "time_key", "site_key", "equipment_key", "operating_hours",
    "downtime_hours", "fuel_consumption", "maintenance_cost", "efficiency_ratio",
];
const PRODUCTION_FACT: &[&str] = &[
    "production_id", "time_key", "site_key", "material_key", "employee_key", "shift_key",
    "produced_volume", "unit_cost", "material_quantity",
];
const TRANSACTION_FACT: &[&str] = &[
    "transaction_id", "time_key", "site_key", "project_key", "account_key", "budgeted_cost",
    "actual_cost", "variance_amount", "variance_status", "account_cost",
];

/// The advisory lock lives on this connection, outside the pool.
pub struct PgRunLock {
    conn: PgConnection,
}

#[derive(Debug, Clone)]
pub struct PgWarehouse {
    pool: PgPool,
    chunk_size: usize,
}

impl PgWarehouse {
    pub async fn connect(db_url: &str, max_connections: u32, chunk_size: usize) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await
            .map_err(EtlError::Connection)?;
        Ok(Self::from_pool(pool, chunk_size))
    }

    pub fn from_pool(pool: PgPool, chunk_size: usize) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("Warehouse schema is in place");
        Ok(())
    }

    /// Rows per statement, shrunk for wide tables so binds stay under the limit.
    fn rows_per_statement(&self, columns: &[&str]) -> usize {
        self.chunk_size.min(MAX_BIND_PARAMS / columns.len()).max(1)
    }

    async fn text_keys(&self, kind: DimensionKind) -> Result<HashMap<String, SurrogateKey>> {
        let sql = format!(
            "SELECT {}, {} FROM {}",
            kind.natural_key_column(),
            kind.key_column(),
            kind.table()
        );
        let rows: Vec<(String, SurrogateKey)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().collect())
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}

fn insert_prefix(table: &str, columns: &[&str]) -> String {
    format!("INSERT INTO {} ({}) ", table, columns.join(", "))
}

fn select_staging(table: &str, columns: &[&str]) -> String {
    format!(
        "SELECT {} FROM {} ORDER BY source_line",
        columns.join(", "),
        table
    )
}

fn latest_fact_load_sql() -> String {
    let loads: Vec<String> = FactKind::ALL
        .iter()
        .map(|kind| format!("SELECT max(loaded_at) AS loaded_at FROM {}", kind.table()))
        .collect();
    format!("SELECT max(loaded_at) FROM ({}) loads", loads.join(" UNION ALL "))
}

/// Multi-row `INSERT ... VALUES`, one statement per chunk, all on `conn`.
async fn bulk_insert<'a, T, F>(
    conn: &mut PgConnection,
    table: &str,
    columns: &[&str],
    rows: &'a [T],
    rows_per_statement: usize,
    mut bind: F,
) -> Result<()>
where
    T: Sync,
    F: FnMut(Separated<'_, 'a, Postgres, &'static str>, &'a T) + Send,
{
    for chunk in rows.chunks(rows_per_statement) {
        let mut builder: QueryBuilder<'a, Postgres> = QueryBuilder::new(insert_prefix(table, columns));
        builder.push_values(chunk, &mut bind);
        builder
            .build()
            .execute(&mut *conn)
            .await
            .map_err(|e| EtlError::from_write(table, e))?;
    }
    if !rows.is_empty() {
        debug!(table, rows = rows.len(), "Bulk insert");
    }
    Ok(())
}

#[async_trait]
impl Warehouse for PgWarehouse {
    type RunLock = PgRunLock;

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(EtlError::Connection)?;
        Ok(())
    }

    async fn try_lock_run(&self) -> Result<Option<PgRunLock>> {
        let mut conn = self.pool.acquire().await?.detach();
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(RUN_LOCK_KEY)
            .fetch_one(&mut conn)
            .await?;
        if !acquired {
            conn.close().await?;
            return Ok(None);
        }
        Ok(Some(PgRunLock { conn }))
    }

    async fn unlock_run(&self, lock: PgRunLock) -> Result<()> {
        let mut conn = lock.conn;
        let _: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(RUN_LOCK_KEY)
            .fetch_one(&mut conn)
            .await?;
        conn.close().await?;
        Ok(())
    }

    async fn replace_staging(&self, staging: &StagingSet) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let tables: Vec<&str> = SourceKind::ALL.iter().map(|k| k.staging_table()).collect();
        sqlx::query(&format!("TRUNCATE {}", tables.join(", ")))
            .execute(&mut *tx)
            .await?;

        bulk_insert(
            &mut tx,
            SourceKind::EquipmentUsage.staging_table(),
            EQUIPMENT_USAGE_STAGING,
            &staging.equipment_usage,
            self.rows_per_statement(EQUIPMENT_USAGE_STAGING),
            |mut b, r| {
                b.push_bind(r.source_line)
                    .push_bind(r.equipment_usage_id.as_str())
                    .push_bind(r.time_id)
                    .push_bind(r.date)
                    .push_bind(r.site_name.as_deref())
                    .push_bind(r.region.as_deref())
                    .push_bind(r.latitude)
                    .push_bind(r.longitude)
                    .push_bind(r.equipment_name.as_deref())
                    .push_bind(r.equipment_type.as_deref())
                    .push_bind(r.manufacture.as_deref())
                    .push_bind(r.model.as_deref())
                    .push_bind(r.capacity)
                    .push_bind(r.purchase_date)
                    .push_bind(r.operating_hours)
                    .push_bind(r.downtime_hours)
                    .push_bind(r.fuel_consumption)
                    .push_bind(r.maintenance_cost)
                    .push_bind(r.created_at)
                    .push_bind(r.created_by.as_deref());
            },
        )
        .await?;

        bulk_insert(
            &mut tx,
            SourceKind::Production.staging_table(),
            PRODUCTION_STAGING,
            &staging.production,
            self.rows_per_statement(PRODUCTION_STAGING),
            |mut b, r| {
                b.push_bind(r.source_line)
                    .push_bind(r.production_id.as_str())
                    .push_bind(r.time_id)
                    .push_bind(r.site_id.as_deref())
                    .push_bind(r.material_id.as_deref())
                    .push_bind(r.employee_id.as_deref())
                    .push_bind(r.shift_id.as_deref())
                    .push_bind(r.produced_volume)
                    .push_bind(r.unit_cost)
                    .push_bind(r.date)
                    .push_bind(r.site_name.as_deref())
                    .push_bind(r.region.as_deref())
                    .push_bind(r.latitude)
                    .push_bind(r.longitude)
                    .push_bind(r.material_name.as_deref())
                    .push_bind(r.material_type.as_deref())
                    .push_bind(r.unit_of_measure.as_deref())
                    .push_bind(r.quantity)
                    .push_bind(r.employee_name.as_deref())
                    .push_bind(r.position.as_deref())
                    .push_bind(r.department.as_deref())
                    .push_bind(r.status.as_deref())
                    .push_bind(r.hire_date)
                    .push_bind(r.shift_name.as_deref())
                    .push_bind(r.start_time.as_deref())
                    .push_bind(r.end_time.as_deref());
            },
        )
        .await?;

        bulk_insert(
            &mut tx,
            SourceKind::FinancialTransaction.staging_table(),
            TRANSACTION_STAGING,
            &staging.financial_transaction,
            self.rows_per_statement(TRANSACTION_STAGING),
            |mut b, r| {
                b.push_bind(r.source_line)
                    .push_bind(r.transaction_id.as_str())
                    .push_bind(r.time_id)
                    .push_bind(r.site_id.as_deref())
                    .push_bind(r.project_id.as_deref())
                    .push_bind(r.account_id.as_deref())
                    .push_bind(r.variance)
                    .push_bind(r.budgeted_cost)
                    .push_bind(r.actual_cost)
                    .push_bind(r.created_at)
                    .push_bind(r.created_by.as_deref())
                    .push_bind(r.date)
                    .push_bind(r.site_name.as_deref())
                    .push_bind(r.region.as_deref())
                    .push_bind(r.latitude)
                    .push_bind(r.longitude)
                    .push_bind(r.project_name.as_deref())
                    .push_bind(r.project_manager.as_deref())
                    .push_bind(r.status.as_deref())
                    .push_bind(r.start_date)
                    .push_bind(r.end_date)
                    .push_bind(r.account_name.as_deref())
                    .push_bind(r.account_type.as_deref())
                    .push_bind(r.budget_category.as_deref())
                    .push_bind(r.cost);
            },
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_staging(&self) -> Result<StagingSet> {
        let equipment_usage: Vec<EquipmentUsageRecord> = sqlx::query_as(&select_staging(
            SourceKind::EquipmentUsage.staging_table(),
            EQUIPMENT_USAGE_STAGING,
        ))
        .fetch_all(&self.pool)
        .await?;
        let production: Vec<ProductionRecord> = sqlx::query_as(&select_staging(
            SourceKind::Production.staging_table(),
            PRODUCTION_STAGING,
        ))
        .fetch_all(&self.pool)
        .await?;
        let financial_transaction: Vec<FinancialTransactionRecord> = sqlx::query_as(
            &select_staging(SourceKind::FinancialTransaction.staging_table(), TRANSACTION_STAGING),
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(StagingSet {
            equipment_usage,
            production,
            financial_transaction,
        })
    }

    async fn dimension_index(&self) -> Result<DimensionIndex> {
        let time_sql = format!(
            "SELECT {}, {} FROM {}",
            DimensionKind::Time.natural_key_column(),
            DimensionKind::Time.key_column(),
            DimensionKind::Time.table()
        );
        let time: Vec<(NaiveDate, SurrogateKey)> =
            sqlx::query_as(&time_sql).fetch_all(&self.pool).await?;

        Ok(DimensionIndex {
            time: time.into_iter().collect(),
            site: self.text_keys(DimensionKind::Site).await?,
            equipment: self.text_keys(DimensionKind::Equipment).await?,
            material: self.text_keys(DimensionKind::Material).await?,
            employee: self.text_keys(DimensionKind::Employee).await?,
            shift: self.text_keys(DimensionKind::Shift).await?,
            project: self.text_keys(DimensionKind::Project).await?,
            account: self.text_keys(DimensionKind::Account).await?,
        })
    }

    async fn insert_dimensions(&self, batch: &DimensionBatch) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        bulk_insert(
            &mut tx,
            DimensionKind::Time.table(),
            TIME_COLUMNS,
            &batch.time,
            self.rows_per_statement(TIME_COLUMNS),
            |mut b, m| {
                b.push_bind(m.date)
                    .push_bind(m.time_id)
                    .push_bind(m.day_of_month)
                    .push_bind(m.day_name.as_str())
                    .push_bind(m.month)
                    .push_bind(m.month_name.as_str())
                    .push_bind(m.quarter)
                    .push_bind(m.year)
                    .push_bind(m.is_weekend);
            },
        )
        .await?;

        bulk_insert(
            &mut tx,
            DimensionKind::Site.table(),
            SITE_COLUMNS,
            &batch.site,
            self.rows_per_statement(SITE_COLUMNS),
            |mut b, m| {
                b.push_bind(m.site_name.as_str())
                    .push_bind(m.site_id.as_deref())
                    .push_bind(m.region.as_deref())
                    .push_bind(m.latitude)
                    .push_bind(m.longitude);
            },
        )
        .await?;

        bulk_insert(
            &mut tx,
            DimensionKind::Equipment.table(),
            EQUIPMENT_COLUMNS,
            &batch.equipment,
            self.rows_per_statement(EQUIPMENT_COLUMNS),
            |mut b, m| {
                b.push_bind(m.equipment_name.as_str())
                    .push_bind(m.equipment_type.as_deref())
                    .push_bind(m.manufacture.as_deref())
                    .push_bind(m.model.as_deref())
                    .push_bind(m.capacity)
                    .push_bind(m.purchase_date);
            },
        )
        .await?;

        bulk_insert(
            &mut tx,
            DimensionKind::Material.table(),
            MATERIAL_COLUMNS,
            &batch.material,
            self.rows_per_statement(MATERIAL_COLUMNS),
            |mut b, m| {
                b.push_bind(m.material_id.as_str())
                    .push_bind(m.material_name.as_deref())
                    .push_bind(m.material_type.as_deref())
                    .push_bind(m.unit_of_measure.as_deref());
            },
        )
        .await?;

        bulk_insert(
            &mut tx,
            DimensionKind::Employee.table(),
            EMPLOYEE_COLUMNS,
            &batch.employee,
            self.rows_per_statement(EMPLOYEE_COLUMNS),
            |mut b, m| {
                b.push_bind(m.employee_id.as_str())
                    .push_bind(m.employee_name.as_deref())
                    .push_bind(m.position.as_deref())
                    .push_bind(m.department.as_deref())
                    .push_bind(m.status.as_deref())
                    .push_bind(m.hire_date);
            },
        )
        .await?;

        bulk_insert(
            &mut tx,
            DimensionKind::Shift.table(),
            SHIFT_COLUMNS,
            &batch.shift,
            self.rows_per_statement(SHIFT_COLUMNS),
            |mut b, m| {
                b.push_bind(m.shift_id.as_str())
                    .push_bind(m.shift_name.as_deref())
                    .push_bind(m.start_time.as_deref())
                    .push_bind(m.end_time.as_deref());
            },
        )
        .await?;

        bulk_insert(
            &mut tx,
            DimensionKind::Project.table(),
            PROJECT_COLUMNS,
            &batch.project,
            self.rows_per_statement(PROJECT_COLUMNS),
            |mut b, m| {
                b.push_bind(m.project_id.as_str())
                    .push_bind(m.project_name.as_deref())
                    .push_bind(m.project_manager.as_deref())
                    .push_bind(m.status.as_deref())
                    .push_bind(m.start_date)
                    .push_bind(m.end_date);
            },
        )
        .await?;

        bulk_insert(
            &mut tx,
            DimensionKind::Account.table(),
            ACCOUNT_COLUMNS,
            &batch.account,
            self.rows_per_statement(ACCOUNT_COLUMNS),
            |mut b, m| {
                b.push_bind(m.account_id.as_str())
                    .push_bind(m.account_name.as_deref())
                    .push_bind(m.account_type.as_deref())
                    .push_bind(m.budget_category.as_deref());
            },
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fact_business_keys(&self, kind: FactKind) -> Result<HashSet<String>> {
        let sql = format!("SELECT {} FROM {}", kind.business_key_column(), kind.table());
        let keys: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
        Ok(keys.into_iter().collect())
    }

    async fn insert_facts(&self, batch: &FactBatch) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        bulk_insert(
            &mut tx,
            FactKind::EquipmentUsage.table(),
            EQUIPMENT_USAGE_FACT,
            &batch.equipment_usage,
            self.rows_per_statement(EQUIPMENT_USAGE_FACT),
            |mut b, f| {
                b.push_bind(f.equipment_usage_id.as_str())
                    .push_bind(f.time_key)
                    .push_bind(f.site_key)
                    .push_bind(f.equipment_key)
                    .push_bind(f.operating_hours)
                    .push_bind(f.downtime_hours)
                    .push_bind(f.fuel_consumption)
                    .push_bind(f.maintenance_cost)
                    .push_bind(f.efficiency_ratio);
            },
        )
        .await?;

        bulk_insert(
            &mut tx,
            FactKind::Production.table(),
            PRODUCTION_FACT,
            &batch.production,
            self.rows_per_statement(PRODUCTION_FACT),
            |mut b, f| {
                b.push_bind(f.production_id.as_str())
                    .push_bind(f.time_key)
                    .push_bind(f.site_key)
                    .push_bind(f.material_key)
                    .push_bind(f.employee_key)
                    .push_bind(f.shift_key)
                    .push_bind(f.produced_volume)
                    .push_bind(f.unit_cost)
                    .push_bind(f.material_quantity);
            },
        )
        .await?;

        bulk_insert(
            &mut tx,
            FactKind::FinancialTransaction.table(),
            TRANSACTION_FACT,
            &batch.financial_transaction,
            self.rows_per_statement(TRANSACTION_FACT),
            |mut b, f| {
                b.push_bind(f.transaction_id.as_str())
                    .push_bind(f.time_key)
                    .push_bind(f.site_key)
                    .push_bind(f.project_key)
                    .push_bind(f.account_key)
                    .push_bind(f.budgeted_cost)
                    .push_bind(f.actual_cost)
                    .push_bind(f.variance_amount)
                    .push_bind(f.variance_status.map(|s| s.as_str()))
                    .push_bind(f.account_cost);
            },
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn row_count(&self, table: Table) -> Result<u64> {
        self.count(&format!("SELECT count(*) FROM {}", table.name()))
            .await
    }

    async fn orphaned_rows(&self, fact: FactKind, dimension: DimensionKind) -> Result<u64> {
        if !fact.dimensions().contains(&dimension) {
            return Ok(0);
        }
        let key = dimension.key_column();
        let sql = format!(
            "SELECT count(*) FROM {fact} f LEFT JOIN {dim} d ON f.{key} = d.{key} WHERE d.{key} IS NULL",
            fact = fact.table(),
            dim = dimension.table(),
            key = key,
        );
        self.count(&sql).await
    }

    async fn null_measures(&self, measure: Measure) -> Result<u64> {
        let sql = format!(
            "SELECT count(*) FROM {} WHERE {} IS NULL",
            measure.fact().table(),
            measure.column()
        );
        self.count(&sql).await
    }

    async fn negative_measures(&self, measure: Measure) -> Result<u64> {
        let sql = format!(
            "SELECT count(*) FROM {} WHERE {} < 0",
            measure.fact().table(),
            measure.column()
        );
        self.count(&sql).await
    }

    async fn latest_fact_load(&self) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<DateTime<Utc>> = sqlx::query_scalar(&latest_fact_load_sql())
            .fetch_one(&self.pool)
            .await?;
        Ok(latest)
    }

    async fn unloaded_staging_rows(&self, fact: FactKind) -> Result<u64> {
        let sql = format!(
            "SELECT count(DISTINCT s.{key}) FROM {staging} s \
             WHERE NOT EXISTS (SELECT 1 FROM {fact} f WHERE f.{key} = s.{key})",
            key = fact.business_key_column(),
            staging = fact.source().staging_table(),
            fact = fact.table(),
        );
        self.count(&sql).await
    }

    async fn start_job_run(&self, stage: Stage) -> Result<Uuid> {
        let job_run_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO etl.job_runs (job_run_id, stage, status)
            VALUES ($1, $2, 'running')
            "#,
        )
        .bind(job_run_id)
        .bind(stage.as_str())
        .execute(&self.pool)
        .await?;
        Ok(job_run_id)
    }

    async fn finish_job_run(&self, job_run_id: Uuid, outcome: &JobOutcome) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE etl.job_runs
            SET finished_at = now(), status = $2, error = $3, detail = $4
            WHERE job_run_id = $1
            "#,
        )
        .bind(job_run_id)
        .bind(outcome.status.as_str())
        .bind(outcome.error.as_deref())
        .bind(&outcome.detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_job_runs(&self, limit: i64) -> Result<Vec<JobRun>> {
        let runs = sqlx::query_as::<_, JobRun>(
            r#"
            SELECT job_run_id, stage, status, started_at, finished_at, error, detail
            FROM etl.job_runs
            ORDER BY started_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_defines_every_table() {
        for table in Table::all() {
            let ddl = format!("CREATE TABLE IF NOT EXISTS {} (", table.name());
            assert!(SCHEMA.contains(&ddl), "missing DDL for {}", table.name());
        }
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS etl.job_runs ("));
    }

    #[test]
    fn test_dimension_natural_keys_are_unique_in_schema() {
        for kind in DimensionKind::ALL {
            let column = format!("{} ", kind.natural_key_column());
            let table_ddl = SCHEMA
                .split("CREATE TABLE IF NOT EXISTS ")
                .find(|block| block.starts_with(kind.table()))
                .unwrap();
            let line = table_ddl
                .lines()
                .find(|l| l.trim_start().starts_with(&column))
                .unwrap();
            assert!(line.contains("NOT NULL UNIQUE"), "{}", line);
        }
    }

    #[test]
    fn test_staging_columns_exist_in_schema() {
        for (kind, columns) in [
            (SourceKind::EquipmentUsage, EQUIPMENT_USAGE_STAGING),
            (SourceKind::Production, PRODUCTION_STAGING),
            (SourceKind::FinancialTransaction, TRANSACTION_STAGING),
        ] {
            let table_ddl = SCHEMA
                .split("CREATE TABLE IF NOT EXISTS ")
                .find(|block| block.starts_with(kind.staging_table()))
                .unwrap();
            for column in columns {
                assert!(
                    table_ddl.lines().any(|l| l.trim_start().starts_with(&format!("{} ", column))),
                    "{} missing from {}",
                    column,
                    kind.staging_table()
                );
            }
        }
    }

    #[test]
    fn test_insert_and_select_statements() {
        assert_eq!(
            insert_prefix("dim.dim_shift", SHIFT_COLUMNS),
            "INSERT INTO dim.dim_shift (shift_id, shift_name, start_time, end_time) "
        );
        assert_eq!(
            select_staging("staging.production", &["source_line", "production_id"]),
            "SELECT source_line, production_id FROM staging.production ORDER BY source_line"
        );
    }

    #[test]
    fn test_latest_fact_load_spans_every_fact_table() {
        let sql = latest_fact_load_sql();
        assert!(sql.starts_with("SELECT max(loaded_at) FROM ("));
        for kind in FactKind::ALL {
            assert!(sql.contains(&format!("FROM {}", kind.table())), "{}", sql);
        }
        assert_eq!(sql.matches(" UNION ALL ").count(), 2);
    }

    #[tokio::test]
    async fn test_rows_per_statement_respects_bind_limit() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let warehouse = PgWarehouse::from_pool(pool, 10_000);
        assert_eq!(warehouse.rows_per_statement(PRODUCTION_STAGING), 65_535 / 26);
        let small = PgWarehouse::from_pool(warehouse.pool.clone(), 500);
        assert_eq!(small.rows_per_statement(PRODUCTION_STAGING), 500);
    }
}
