//! Quality Validator - Checks the loaded warehouse and grades it
//!
//! Responsibilities:
//! - Row counts for every staging, dimension and fact table
//! - Orphaned fact foreign keys per fact/dimension pair
//! - Null critical measures against a threshold
//! - Negative equipment usage measures
//! - Freshness: the latest fact load time
//! - Staging business keys that never reached their fact table
//! - Aggregate verdict and JSON report
//!
//! An empty fact table always grades POOR.

use crate::error::{EtlError, Result};
use crate::fact::FactKind;
use crate::store::{Table, Warehouse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Good,
    Fair,
    Poor,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Good => "GOOD",
            Verdict::Fair => "FAIR",
            Verdict::Poor => "POOR",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "good" => Ok(Verdict::Good),
            "fair" => Ok(Verdict::Fair),
            "poor" => Ok(Verdict::Poor),
            other => Err(format!("expected good, fair or poor, got '{}'", other)),
        }
    }
}

/// Fact measure columns the validator inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    EquipmentEfficiency,
    EquipmentOperatingHours,
    EquipmentFuelConsumption,
    EquipmentMaintenanceCost,
    ProductionVolume,
    FinancialActualCost,
}

impl Measure {
    /// Critical measures checked for nulls against the threshold.
    pub const NULL_CHECKED: [Measure; 3] = [
        Measure::EquipmentEfficiency,
        Measure::ProductionVolume,
        Measure::FinancialActualCost,
    ];

    /// Equipment measures that must never be negative.
    pub const NON_NEGATIVE: [Measure; 3] = [
        Measure::EquipmentOperatingHours,
        Measure::EquipmentFuelConsumption,
        Measure::EquipmentMaintenanceCost,
    ];

    pub fn fact(&self) -> FactKind {
        match self {
            Measure::EquipmentEfficiency
            | Measure::EquipmentOperatingHours
            | Measure::EquipmentFuelConsumption
            | Measure::EquipmentMaintenanceCost => FactKind::EquipmentUsage,
            Measure::ProductionVolume => FactKind::Production,
            Measure::FinancialActualCost => FactKind::FinancialTransaction,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Measure::EquipmentEfficiency => "efficiency_ratio",
            Measure::EquipmentOperatingHours => "operating_hours",
            Measure::EquipmentFuelConsumption => "fuel_consumption",
            Measure::EquipmentMaintenanceCost => "maintenance_cost",
            Measure::ProductionVolume => "produced_volume",
            Measure::FinancialActualCost => "actual_cost",
        }
    }

    /// `table.column` label used in the report.
    pub fn label(&self) -> String {
        format!("{}.{}", self.fact().table(), self.column())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub timestamp: DateTime<Utc>,
    /// Most recent `loaded_at` across the fact tables; `None` while they are empty.
    pub latest_fact_load: Option<DateTime<Utc>>,
    pub verdict: Verdict,
    pub null_threshold: u64,
    pub row_counts: BTreeMap<&'static str, u64>,
    pub orphaned_rows: BTreeMap<String, u64>,
    pub null_values: BTreeMap<String, u64>,
    pub negative_values: BTreeMap<String, u64>,
    pub unloaded_staging_rows: BTreeMap<&'static str, u64>,
    pub issues: Vec<String>,
}

impl QualityReport {
    /// Recomputes verdict and issues from the collected counts.
    fn grade(&mut self) {
        let mut issues = Vec::new();
        let mut verdict = Verdict::Good;

        for kind in FactKind::ALL {
            if self.row_counts.get(kind.table()).copied().unwrap_or(0) == 0 {
                issues.push(format!("{} is empty", kind.table()));
                verdict = Verdict::Poor;
            }
        }

        let mut flag = |issue: String| {
            issues.push(issue);
            verdict = verdict.max(Verdict::Fair);
        };
        for (column, count) in &self.orphaned_rows {
            if *count > 0 {
                flag(format!("{} orphaned rows in {}", count, column));
            }
        }
        for (table, count) in &self.unloaded_staging_rows {
            if *count > 0 {
                flag(format!("{} staging business keys missing from {}", count, table));
            }
        }
        for (column, count) in &self.null_values {
            if *count > self.null_threshold {
                flag(format!(
                    "{} null values in {} (threshold {})",
                    count, column, self.null_threshold
                ));
            }
        }
        for (column, count) in &self.negative_values {
            if *count > 0 {
                flag(format!("{} negative values in {}", count, column));
            }
        }

        self.verdict = verdict;
        self.issues = issues;
    }
}

/// Collects every check and grades the result without side effects.
pub async fn quality_report<W: Warehouse>(warehouse: &W, null_threshold: u64) -> Result<QualityReport> {
    let mut row_counts = BTreeMap::new();
    for table in Table::all() {
        row_counts.insert(table.name(), warehouse.row_count(table).await?);
    }

    let mut orphaned_rows = BTreeMap::new();
    let mut unloaded_staging_rows = BTreeMap::new();
    for fact in FactKind::ALL {
        for dimension in fact.dimensions() {
            let orphans = warehouse.orphaned_rows(fact, *dimension).await?;
            orphaned_rows.insert(format!("{}.{}", fact.table(), dimension.key_column()), orphans);
        }
        unloaded_staging_rows.insert(fact.table(), warehouse.unloaded_staging_rows(fact).await?);
    }

    let mut null_values = BTreeMap::new();
    for measure in Measure::NULL_CHECKED {
        null_values.insert(measure.label(), warehouse.null_measures(measure).await?);
    }

    let mut negative_values = BTreeMap::new();
    for measure in Measure::NON_NEGATIVE {
        negative_values.insert(measure.label(), warehouse.negative_measures(measure).await?);
    }

    let mut report = QualityReport {
        timestamp: Utc::now(),
        latest_fact_load: warehouse.latest_fact_load().await?,
        verdict: Verdict::Good,
        null_threshold,
        row_counts,
        orphaned_rows,
        null_values,
        negative_values,
        unloaded_staging_rows,
        issues: Vec::new(),
    };
    report.grade();
    Ok(report)
}

pub async fn write_report(report: &QualityReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, serde_json::to_vec_pretty(report)?).await?;
    Ok(())
}

/// Validate stage: grade the warehouse, persist the report, fail at or above `fail_on`.
pub async fn validate<W: Warehouse>(
    warehouse: &W,
    null_threshold: u64,
    report_path: Option<&Path>,
    fail_on: Verdict,
) -> Result<QualityReport> {
    let report = quality_report(warehouse, null_threshold).await?;

    for issue in &report.issues {
        warn!(verdict = %report.verdict, "{}", issue);
    }
    info!(verdict = %report.verdict, issues = report.issues.len(), "Quality check complete");

    if let Some(path) = report_path {
        write_report(&report, path).await?;
        info!(path = %path.display(), "Wrote quality report");
    }

    if report.verdict >= fail_on {
        return Err(EtlError::QualityCheckFailed {
            verdict: report.verdict.to_string(),
        });
    }
    Ok(report)
}
