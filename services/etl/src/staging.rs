//! Staging records: one typed row per source CSV row, fully replaced on every extract.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

/// The three extract domains. Each maps to one source file, one staging table and one fact table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    EquipmentUsage,
    Production,
    FinancialTransaction,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::EquipmentUsage,
        SourceKind::Production,
        SourceKind::FinancialTransaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::EquipmentUsage => "equipment_usage",
            SourceKind::Production => "production",
            SourceKind::FinancialTransaction => "financial_transaction",
        }
    }

    pub fn staging_table(&self) -> &'static str {
        match self {
            SourceKind::EquipmentUsage => "staging.equipment_usage",
            SourceKind::Production => "staging.production",
            SourceKind::FinancialTransaction => "staging.financial_transaction",
        }
    }

    /// Column holding the business key in the staging table.
    pub fn business_key_column(&self) -> &'static str {
        match self {
            SourceKind::EquipmentUsage => "equipment_usage_id",
            SourceKind::Production => "production_id",
            SourceKind::FinancialTransaction => "transaction_id",
        }
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct EquipmentUsageRecord {
    pub source_line: i64,
    pub equipment_usage_id: String,
    pub time_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub site_name: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub equipment_name: Option<String>,
    pub equipment_type: Option<String>,
    pub manufacture: Option<String>,
    pub model: Option<String>,
    pub capacity: Option<f64>,
    pub purchase_date: Option<NaiveDate>,
    pub operating_hours: Option<f64>,
    pub downtime_hours: Option<f64>,
    pub fuel_consumption: Option<f64>,
    pub maintenance_cost: Option<f64>,
    pub created_at: Option<NaiveDateTime>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ProductionRecord {
    pub source_line: i64,
    pub production_id: String,
    pub time_id: Option<i64>,
    pub site_id: Option<String>,
    pub material_id: Option<String>,
    pub employee_id: Option<String>,
    pub shift_id: Option<String>,
    pub produced_volume: Option<f64>,
    pub unit_cost: Option<f64>,
    pub date: Option<NaiveDate>,
    pub site_name: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub material_name: Option<String>,
    pub material_type: Option<String>,
    pub unit_of_measure: Option<String>,
    pub quantity: Option<f64>,
    pub employee_name: Option<String>,
    pub position: Option<String>,
    pub department: Option<String>,
    pub status: Option<String>,
    pub hire_date: Option<NaiveDate>,
    pub shift_name: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct FinancialTransactionRecord {
    pub source_line: i64,
    pub transaction_id: String,
    pub time_id: Option<i64>,
    pub site_id: Option<String>,
    pub project_id: Option<String>,
    pub account_id: Option<String>,
    pub variance: Option<f64>,
    pub budgeted_cost: Option<f64>,
    pub actual_cost: Option<f64>,
    pub created_at: Option<NaiveDateTime>,
    pub created_by: Option<String>,
    pub date: Option<NaiveDate>,
    pub site_name: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub project_name: Option<String>,
    pub project_manager: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub account_name: Option<String>,
    pub account_type: Option<String>,
    pub budget_category: Option<String>,
    pub cost: Option<f64>,
}

/// Contents of all three staging tables, each in source line order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagingSet {
    pub equipment_usage: Vec<EquipmentUsageRecord>,
    pub production: Vec<ProductionRecord>,
    pub financial_transaction: Vec<FinancialTransactionRecord>,
}

impl StagingSet {
    pub fn len(&self, kind: SourceKind) -> usize {
        match kind {
            SourceKind::EquipmentUsage => self.equipment_usage.len(),
            SourceKind::Production => self.production.len(),
            SourceKind::FinancialTransaction => self.financial_transaction.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        SourceKind::ALL.iter().all(|kind| self.len(*kind) == 0)
    }

    /// Business keys of one staging table, in row order (duplicates included).
    pub fn business_keys(&self, kind: SourceKind) -> Vec<&str> {
        match kind {
            SourceKind::EquipmentUsage => self
                .equipment_usage
                .iter()
                .map(|r| r.equipment_usage_id.as_str())
                .collect(),
            SourceKind::Production => {
                self.production.iter().map(|r| r.production_id.as_str()).collect()
            }
            SourceKind::FinancialTransaction => self
                .financial_transaction
                .iter()
                .map(|r| r.transaction_id.as_str())
                .collect(),
        }
    }
}
