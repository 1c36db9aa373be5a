//! Fact rows, keyed by the staging business key and referencing dimensions by surrogate key.

use crate::dimension::{DimensionKind, SurrogateKey};
use crate::staging::SourceKind;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    EquipmentUsage,
    Production,
    FinancialTransaction,
}

impl FactKind {
    pub const ALL: [FactKind; 3] = [
        FactKind::EquipmentUsage,
        FactKind::Production,
        FactKind::FinancialTransaction,
    ];

    pub fn as_str(&self) -> &'static str {
        self.source().as_str()
    }

    pub fn table(&self) -> &'static str {
        match self {
            FactKind::EquipmentUsage => "fact.fact_equipment_usage",
            FactKind::Production => "fact.fact_production",
            FactKind::FinancialTransaction => "fact.fact_financial_transaction",
        }
    }

    pub fn source(&self) -> SourceKind {
        match self {
            FactKind::EquipmentUsage => SourceKind::EquipmentUsage,
            FactKind::Production => SourceKind::Production,
            FactKind::FinancialTransaction => SourceKind::FinancialTransaction,
        }
    }

    /// Same column name as the staging business key.
    pub fn business_key_column(&self) -> &'static str {
        self.source().business_key_column()
    }

    /// Dimensions every row of this fact must resolve against.
    pub fn dimensions(&self) -> &'static [DimensionKind] {
        match self {
            FactKind::EquipmentUsage => &[
                DimensionKind::Time,
                DimensionKind::Site,
                DimensionKind::Equipment,
            ],
            FactKind::Production => &[
                DimensionKind::Time,
                DimensionKind::Site,
                DimensionKind::Material,
                DimensionKind::Employee,
                DimensionKind::Shift,
            ],
            FactKind::FinancialTransaction => &[
                DimensionKind::Time,
                DimensionKind::Site,
                DimensionKind::Project,
                DimensionKind::Account,
            ],
        }
    }
}

/// Budget comparison of a financial transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VarianceStatus {
    #[serde(rename = "Over Budget")]
    OverBudget,
    #[serde(rename = "Under Budget")]
    UnderBudget,
    #[serde(rename = "On Budget")]
    OnBudget,
}

impl VarianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarianceStatus::OverBudget => "Over Budget",
            VarianceStatus::UnderBudget => "Under Budget",
            VarianceStatus::OnBudget => "On Budget",
        }
    }

    /// `None` when either side is absent or not comparable.
    pub fn classify(budgeted: Option<f64>, actual: Option<f64>) -> Option<Self> {
        match actual?.partial_cmp(&budgeted?)? {
            Ordering::Greater => Some(VarianceStatus::OverBudget),
            Ordering::Less => Some(VarianceStatus::UnderBudget),
            Ordering::Equal => Some(VarianceStatus::OnBudget),
        }
    }
}

impl fmt::Display for VarianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Share of scheduled hours the equipment was operating.
pub fn efficiency_ratio(operating_hours: Option<f64>, downtime_hours: Option<f64>) -> Option<f64> {
    let operating = operating_hours?;
    let total = operating + downtime_hours?;
    if total > 0.0 {
        Some(operating / total)
    } else {
        None
    }
}

pub fn variance_amount(budgeted: Option<f64>, actual: Option<f64>) -> Option<f64> {
    Some(actual? - budgeted?)
}

/// Common view over fact rows used by validation.
pub trait FactRow {
    const KIND: FactKind;

    fn business_key(&self) -> &str;

    fn dimension_key(&self, dimension: DimensionKind) -> Option<SurrogateKey>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquipmentUsageFact {
    pub equipment_usage_id: String,
    pub time_key: SurrogateKey,
    pub site_key: SurrogateKey,
    pub equipment_key: SurrogateKey,
    pub operating_hours: Option<f64>,
    pub downtime_hours: Option<f64>,
    pub fuel_consumption: Option<f64>,
    pub maintenance_cost: Option<f64>,
    pub efficiency_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductionFact {
    pub production_id: String,
    pub time_key: SurrogateKey,
    pub site_key: SurrogateKey,
    pub material_key: SurrogateKey,
    pub employee_key: SurrogateKey,
    pub shift_key: SurrogateKey,
    pub produced_volume: Option<f64>,
    pub unit_cost: Option<f64>,
    pub material_quantity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialTransactionFact {
    pub transaction_id: String,
    pub time_key: SurrogateKey,
    pub site_key: SurrogateKey,
    pub project_key: SurrogateKey,
    pub account_key: SurrogateKey,
    pub budgeted_cost: Option<f64>,
    pub actual_cost: Option<f64>,
    pub variance_amount: Option<f64>,
    pub variance_status: Option<VarianceStatus>,
    pub account_cost: Option<f64>,
}

impl FactRow for EquipmentUsageFact {
    const KIND: FactKind = FactKind::EquipmentUsage;

    fn business_key(&self) -> &str {
        &self.equipment_usage_id
    }

    fn dimension_key(&self, dimension: DimensionKind) -> Option<SurrogateKey> {
        match dimension {
            DimensionKind::Time => Some(self.time_key),
            DimensionKind::Site => Some(self.site_key),
            DimensionKind::Equipment => Some(self.equipment_key),
            _ => None,
        }
    }
}

impl FactRow for ProductionFact {
    const KIND: FactKind = FactKind::Production;

    fn business_key(&self) -> &str {
        &self.production_id
    }

    fn dimension_key(&self, dimension: DimensionKind) -> Option<SurrogateKey> {
        match dimension {
            DimensionKind::Time => Some(self.time_key),
            DimensionKind::Site => Some(self.site_key),
            DimensionKind::Material => Some(self.material_key),
            DimensionKind::Employee => Some(self.employee_key),
            DimensionKind::Shift => Some(self.shift_key),
            _ => None,
        }
    }
}

impl FactRow for FinancialTransactionFact {
    const KIND: FactKind = FactKind::FinancialTransaction;

    fn business_key(&self) -> &str {
        &self.transaction_id
    }

    fn dimension_key(&self, dimension: DimensionKind) -> Option<SurrogateKey> {
        match dimension {
            DimensionKind::Time => Some(self.time_key),
            DimensionKind::Site => Some(self.site_key),
            DimensionKind::Project => Some(self.project_key),
            DimensionKind::Account => Some(self.account_key),
            _ => None,
        }
    }
}

/// New fact rows to append, per fact table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactBatch {
    pub equipment_usage: Vec<EquipmentUsageFact>,
    pub production: Vec<ProductionFact>,
    pub financial_transaction: Vec<FinancialTransactionFact>,
}

impl FactBatch {
    pub fn len(&self, kind: FactKind) -> usize {
        match kind {
            FactKind::EquipmentUsage => self.equipment_usage.len(),
            FactKind::Production => self.production.len(),
            FactKind::FinancialTransaction => self.financial_transaction.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        FactKind::ALL.iter().all(|kind| self.len(*kind) == 0)
    }

    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        FactKind::ALL
            .iter()
            .map(|kind| (kind.as_str(), self.len(*kind)))
            .collect()
    }
}
