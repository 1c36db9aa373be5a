//! Fact Resolver - Joins staging rows to dimensions and appends new fact rows
//!
//! Each staging row is resolved against every dimension its fact requires. Rows
//! with a missing or unknown natural key are dropped (inner-join semantics) unless
//! the policy is `Fail`. A staging business key already present in the fact table,
//! or repeated within the same staging batch, never produces a second fact row.

use crate::dimension::{
    AccountMember, DimensionIndex, DimensionKind, EmployeeMember, EquipmentMember,
    MaterialMember, Member, ProjectMember, ShiftMember, SiteMember, SurrogateKey, TimeMember,
};
use crate::error::{EtlError, Result};
use crate::fact::{
    efficiency_ratio, variance_amount, EquipmentUsageFact, FactBatch, FactKind,
    FinancialTransactionFact, ProductionFact, VarianceStatus,
};
use crate::staging::{
    EquipmentUsageRecord, FinancialTransactionRecord, ProductionRecord, StagingSet,
};
use crate::store::Warehouse;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

/// What to do with staging rows that fail to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedPolicy {
    Drop,
    Fail,
}

impl FromStr for UnresolvedPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(UnresolvedPolicy::Drop),
            "fail" => Ok(UnresolvedPolicy::Fail),
            other => Err(format!("expected 'drop' or 'fail', got '{}'", other)),
        }
    }
}

impl fmt::Display for UnresolvedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedPolicy::Drop => f.write_str("drop"),
            UnresolvedPolicy::Fail => f.write_str("fail"),
        }
    }
}

/// A staging row excluded because at least one dimension lookup failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedRow {
    pub business_key: String,
    pub source_line: i64,
    pub missing: Vec<DimensionKind>,
}

/// Outcome of resolving one staging table.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<F> {
    pub rows: Vec<F>,
    pub unresolved: Vec<UnresolvedRow>,
    pub already_loaded: usize,
    pub duplicate_keys: usize,
}

impl<F> Default for Resolution<F> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            unresolved: Vec::new(),
            already_loaded: 0,
            duplicate_keys: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FactLoadSummary {
    pub inserted: usize,
    pub unresolved: usize,
    pub already_loaded: usize,
    pub duplicate_keys: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveSummary {
    pub facts: BTreeMap<&'static str, FactLoadSummary>,
}

impl ResolveSummary {
    pub fn total_inserted(&self) -> usize {
        self.facts.values().map(|f| f.inserted).sum()
    }

    pub fn total_unresolved(&self) -> usize {
        self.facts.values().map(|f| f.unresolved).sum()
    }
}

/// Collects the dimensions a single staging row could not resolve.
struct Lookup<'a> {
    index: &'a DimensionIndex,
    missing: Vec<DimensionKind>,
}

impl<'a> Lookup<'a> {
    fn new(index: &'a DimensionIndex) -> Self {
        Self {
            index,
            missing: Vec::new(),
        }
    }

    fn key<M: Member>(&mut self, natural_key: Option<&M::Key>) -> SurrogateKey {
        match natural_key.and_then(|k| self.index.lookup::<M>(k)) {
            Some(key) => key,
            None => {
                self.missing.push(M::KIND);
                0
            }
        }
    }

    fn finish(self) -> Option<Vec<DimensionKind>> {
        if self.missing.is_empty() {
            None
        } else {
            Some(self.missing)
        }
    }
}

/// Shared dedup and join bookkeeping for one fact table.
fn resolve_rows<R, F, J>(
    records: &[R],
    loaded: &HashSet<String>,
    business_key: impl Fn(&R) -> &str,
    source_line: impl Fn(&R) -> i64,
    mut join: J,
) -> Resolution<F>
where
    J: FnMut(&R) -> std::result::Result<F, Vec<DimensionKind>>,
{
    let mut resolution = Resolution::default();
    let mut resolved: HashSet<&str> = HashSet::new();
    let mut failed: HashSet<&str> = HashSet::new();
    let mut candidates = 0;

    // Join first, then keep one row per key: a later copy that resolves wins
    // over an earlier copy that did not.
    for record in records {
        let key = business_key(record);
        if loaded.contains(key) {
            resolution.already_loaded += 1;
            continue;
        }
        candidates += 1;
        if resolved.contains(key) {
            continue;
        }
        match join(record) {
            Ok(row) => {
                resolved.insert(key);
                resolution.rows.push(row);
            }
            Err(missing) => {
                if failed.insert(key) {
                    resolution.unresolved.push(UnresolvedRow {
                        business_key: key.to_string(),
                        source_line: source_line(record),
                        missing,
                    });
                }
            }
        }
    }

    resolution
        .unresolved
        .retain(|row| !resolved.contains(row.business_key.as_str()));
    resolution.duplicate_keys = candidates - resolution.rows.len() - resolution.unresolved.len();
    resolution
}

pub fn resolve_equipment_usage(
    records: &[EquipmentUsageRecord],
    index: &DimensionIndex,
    loaded: &HashSet<String>,
) -> Resolution<EquipmentUsageFact> {
    resolve_rows(
        records,
        loaded,
        |r| r.equipment_usage_id.as_str(),
        |r| r.source_line,
        |r| {
            let mut lookup = Lookup::new(index);
            let time_key = lookup.key::<TimeMember>(r.date.as_ref());
            let site_key = lookup.key::<SiteMember>(r.site_name.as_ref());
            let equipment_key = lookup.key::<EquipmentMember>(r.equipment_name.as_ref());
            if let Some(missing) = lookup.finish() {
                return Err(missing);
            }
            Ok(EquipmentUsageFact {
                equipment_usage_id: r.equipment_usage_id.clone(),
                time_key,
                site_key,
                equipment_key,
                operating_hours: r.operating_hours,
                downtime_hours: r.downtime_hours,
                fuel_consumption: r.fuel_consumption,
                maintenance_cost: r.maintenance_cost,
                efficiency_ratio: efficiency_ratio(r.operating_hours, r.downtime_hours),
            })
        },
    )
}

pub fn resolve_production(
    records: &[ProductionRecord],
    index: &DimensionIndex,
    loaded: &HashSet<String>,
) -> Resolution<ProductionFact> {
    resolve_rows(
        records,
        loaded,
        |r| r.production_id.as_str(),
        |r| r.source_line,
        |r| {
            let mut lookup = Lookup::new(index);
            let time_key = lookup.key::<TimeMember>(r.date.as_ref());
            let site_key = lookup.key::<SiteMember>(r.site_name.as_ref());
            let material_key = lookup.key::<MaterialMember>(r.material_id.as_ref());
            let employee_key = lookup.key::<EmployeeMember>(r.employee_id.as_ref());
            let shift_key = lookup.key::<ShiftMember>(r.shift_id.as_ref());
            if let Some(missing) = lookup.finish() {
                return Err(missing);
            }
            Ok(ProductionFact {
                production_id: r.production_id.clone(),
                time_key,
                site_key,
                material_key,
                employee_key,
                shift_key,
                produced_volume: r.produced_volume,
                unit_cost: r.unit_cost,
                material_quantity: r.quantity,
            })
        },
    )
}

pub fn resolve_financial_transactions(
    records: &[FinancialTransactionRecord],
    index: &DimensionIndex,
    loaded: &HashSet<String>,
) -> Resolution<FinancialTransactionFact> {
    resolve_rows(
        records,
        loaded,
        |r| r.transaction_id.as_str(),
        |r| r.source_line,
        |r| {
            let mut lookup = Lookup::new(index);
            let time_key = lookup.key::<TimeMember>(r.date.as_ref());
            let site_key = lookup.key::<SiteMember>(r.site_name.as_ref());
            let project_key = lookup.key::<ProjectMember>(r.project_id.as_ref());
            let account_key = lookup.key::<AccountMember>(r.account_id.as_ref());
            if let Some(missing) = lookup.finish() {
                return Err(missing);
            }
            Ok(FinancialTransactionFact {
                transaction_id: r.transaction_id.clone(),
                time_key,
                site_key,
                project_key,
                account_key,
                budgeted_cost: r.budgeted_cost,
                actual_cost: r.actual_cost,
                variance_amount: variance_amount(r.budgeted_cost, r.actual_cost),
                variance_status: VarianceStatus::classify(r.budgeted_cost, r.actual_cost),
                account_cost: r.cost,
            })
        },
    )
}

fn summarize<F>(kind: FactKind, resolution: &Resolution<F>, policy: UnresolvedPolicy) -> Result<FactLoadSummary> {
    if !resolution.unresolved.is_empty() {
        let sample: Vec<&str> = resolution
            .unresolved
            .iter()
            .take(5)
            .map(|u| u.business_key.as_str())
            .collect();
        warn!(
            fact = kind.as_str(),
            count = resolution.unresolved.len(),
            ?sample,
            %policy,
            "Staging rows did not resolve against their dimensions"
        );
        if policy == UnresolvedPolicy::Fail {
            return Err(EtlError::UnresolvedKeys {
                fact: kind.as_str(),
                count: resolution.unresolved.len(),
            });
        }
    }
    if resolution.duplicate_keys > 0 {
        warn!(
            fact = kind.as_str(),
            count = resolution.duplicate_keys,
            "Repeated business keys in staging were skipped"
        );
    }

    Ok(FactLoadSummary {
        inserted: resolution.rows.len(),
        unresolved: resolution.unresolved.len(),
        already_loaded: resolution.already_loaded,
        duplicate_keys: resolution.duplicate_keys,
    })
}

/// Fact stage: resolve all three fact tables, then append the new rows in one write.
pub async fn resolve_facts<W: Warehouse>(
    warehouse: &W,
    policy: UnresolvedPolicy,
) -> Result<ResolveSummary> {
    let staging: StagingSet = warehouse.load_staging().await?;
    let index = warehouse.dimension_index().await?;

    let equipment_usage = resolve_equipment_usage(
        &staging.equipment_usage,
        &index,
        &warehouse.fact_business_keys(FactKind::EquipmentUsage).await?,
    );
    let production = resolve_production(
        &staging.production,
        &index,
        &warehouse.fact_business_keys(FactKind::Production).await?,
    );
    let financial_transaction = resolve_financial_transactions(
        &staging.financial_transaction,
        &index,
        &warehouse.fact_business_keys(FactKind::FinancialTransaction).await?,
    );

    let mut facts = BTreeMap::new();
    facts.insert(
        FactKind::EquipmentUsage.as_str(),
        summarize(FactKind::EquipmentUsage, &equipment_usage, policy)?,
    );
    facts.insert(
        FactKind::Production.as_str(),
        summarize(FactKind::Production, &production, policy)?,
    );
    facts.insert(
        FactKind::FinancialTransaction.as_str(),
        summarize(FactKind::FinancialTransaction, &financial_transaction, policy)?,
    );

    let batch = FactBatch {
        equipment_usage: equipment_usage.rows,
        production: production.rows,
        financial_transaction: financial_transaction.rows,
    };
    if batch.is_empty() {
        info!("No new fact rows");
    } else {
        warehouse.insert_facts(&batch).await?;
    }

    for (fact, summary) in &facts {
        info!(
            fact,
            inserted = summary.inserted,
            unresolved = summary.unresolved,
            already_loaded = summary.already_loaded,
            "Loaded fact table"
        );
    }

    Ok(ResolveSummary { facts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn index() -> DimensionIndex {
        let mut index = DimensionIndex::default();
        index.time.insert(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), 1);
        index.site.insert("Pit North".to_string(), 10);
        index.equipment.insert("Excavator 01".to_string(), 100);
        index.equipment.insert("Hauler 07".to_string(), 101);
        index.project.insert("PRJ-1".to_string(), 200);
        index.account.insert("ACC-1".to_string(), 300);
        index
    }

    fn usage(id: &str, site: &str, equipment: &str) -> EquipmentUsageRecord {
        EquipmentUsageRecord {
            source_line: 2,
            equipment_usage_id: id.to_string(),
            time_id: None,
            date: NaiveDate::from_ymd_opt(2024, 3, 1),
            site_name: Some(site.to_string()),
            region: None,
            latitude: None,
            longitude: None,
            equipment_name: Some(equipment.to_string()),
            equipment_type: None,
            manufacture: None,
            model: None,
            capacity: None,
            purchase_date: None,
            operating_hours: Some(6.0),
            downtime_hours: Some(2.0),
            fuel_consumption: Some(40.0),
            maintenance_cost: None,
            created_at: None,
            created_by: None,
        }
    }

    fn transaction(id: &str, budgeted: f64, actual: f64) -> FinancialTransactionRecord {
        FinancialTransactionRecord {
            source_line: 2,
            transaction_id: id.to_string(),
            time_id: None,
            site_id: None,
            project_id: Some("PRJ-1".to_string()),
            account_id: Some("ACC-1".to_string()),
            variance: None,
            budgeted_cost: Some(budgeted),
            actual_cost: Some(actual),
            created_at: None,
            created_by: None,
            date: NaiveDate::from_ymd_opt(2024, 3, 1),
            site_name: Some("Pit North".to_string()),
            region: None,
            latitude: None,
            longitude: None,
            project_name: None,
            project_manager: None,
            status: None,
            start_date: None,
            end_date: None,
            account_name: None,
            account_type: None,
            budget_category: None,
            cost: Some(actual),
        }
    }

    #[test]
    fn test_resolves_surrogate_keys() {
        let resolution = resolve_equipment_usage(
            &[usage("EU-1", "Pit North", "Hauler 07")],
            &index(),
            &HashSet::new(),
        );
        assert_eq!(resolution.rows.len(), 1);
        let fact = &resolution.rows[0];
        assert_eq!((fact.time_key, fact.site_key, fact.equipment_key), (1, 10, 101));
        assert_eq!(fact.efficiency_ratio, Some(0.75));
    }

    #[test]
    fn test_unknown_site_is_dropped() {
        let resolution = resolve_equipment_usage(
            &[
                usage("EU-1", "Pit North", "Excavator 01"),
                usage("EU-2", "Pit Nowhere", "Excavator 01"),
            ],
            &index(),
            &HashSet::new(),
        );
        assert_eq!(resolution.rows.len(), 1);
        assert_eq!(resolution.unresolved.len(), 1);
        assert_eq!(resolution.unresolved[0].business_key, "EU-2");
        assert_eq!(resolution.unresolved[0].missing, vec![DimensionKind::Site]);
    }

    #[test]
    fn test_absent_natural_key_is_unresolved() {
        let mut record = usage("EU-1", "Pit North", "Excavator 01");
        record.equipment_name = None;
        record.date = None;
        let resolution = resolve_equipment_usage(&[record], &index(), &HashSet::new());
        assert!(resolution.rows.is_empty());
        assert_eq!(
            resolution.unresolved[0].missing,
            vec![DimensionKind::Time, DimensionKind::Equipment]
        );
    }

    #[test]
    fn test_loaded_business_keys_are_skipped() {
        let loaded: HashSet<String> = ["EU-1".to_string()].into_iter().collect();
        let resolution = resolve_equipment_usage(
            &[
                usage("EU-1", "Pit North", "Excavator 01"),
                usage("EU-2", "Pit North", "Excavator 01"),
            ],
            &index(),
            &loaded,
        );
        assert_eq!(resolution.already_loaded, 1);
        assert_eq!(resolution.rows.len(), 1);
        assert_eq!(resolution.rows[0].equipment_usage_id, "EU-2");
    }

    #[test]
    fn test_repeated_business_key_in_batch() {
        let resolution = resolve_equipment_usage(
            &[
                usage("EU-1", "Pit North", "Excavator 01"),
                usage("EU-1", "Pit North", "Hauler 07"),
            ],
            &index(),
            &HashSet::new(),
        );
        assert_eq!(resolution.rows.len(), 1);
        assert_eq!(resolution.rows[0].equipment_key, 100);
        assert_eq!(resolution.duplicate_keys, 1);
    }

    #[test]
    fn test_later_resolvable_copy_of_key_is_kept() {
        let resolution = resolve_equipment_usage(
            &[
                usage("EU-1", "Pit Nowhere", "Excavator 01"),
                usage("EU-1", "Pit North", "Excavator 01"),
            ],
            &index(),
            &HashSet::new(),
        );
        assert_eq!(resolution.rows.len(), 1);
        assert_eq!(resolution.rows[0].site_key, 10);
        assert!(resolution.unresolved.is_empty());
        assert_eq!(resolution.duplicate_keys, 1);

        let summary = summarize(FactKind::EquipmentUsage, &resolution, UnresolvedPolicy::Fail).unwrap();
        assert_eq!(summary.inserted, 1);
    }

    #[test]
    fn test_key_unresolved_in_every_copy_counts_once() {
        let resolution = resolve_equipment_usage(
            &[
                usage("EU-1", "Pit Nowhere", "Excavator 01"),
                usage("EU-1", "Pit South", "Excavator 01"),
            ],
            &index(),
            &HashSet::new(),
        );
        assert!(resolution.rows.is_empty());
        assert_eq!(resolution.unresolved.len(), 1);
        assert_eq!(resolution.duplicate_keys, 1);
    }

    #[test]
    fn test_financial_variance_fields() {
        let resolution = resolve_financial_transactions(
            &[
                transaction("T-1", 100.0, 120.0),
                transaction("T-2", 100.0, 80.0),
                transaction("T-3", 100.0, 100.0),
            ],
            &index(),
            &HashSet::new(),
        );
        let statuses: Vec<Option<VarianceStatus>> =
            resolution.rows.iter().map(|f| f.variance_status).collect();
        assert_eq!(
            statuses,
            vec![
                Some(VarianceStatus::OverBudget),
                Some(VarianceStatus::UnderBudget),
                Some(VarianceStatus::OnBudget),
            ]
        );
        assert_eq!(resolution.rows[0].variance_amount, Some(20.0));
        assert_eq!(resolution.rows[1].account_cost, Some(80.0));
    }

    #[test]
    fn test_fail_policy_rejects_unresolved() {
        let resolution = resolve_equipment_usage(
            &[usage("EU-1", "Pit Nowhere", "Excavator 01")],
            &index(),
            &HashSet::new(),
        );
        let err = summarize(FactKind::EquipmentUsage, &resolution, UnresolvedPolicy::Fail).unwrap_err();
        assert!(matches!(err, EtlError::UnresolvedKeys { count: 1, .. }));

        let summary = summarize(FactKind::EquipmentUsage, &resolution, UnresolvedPolicy::Drop).unwrap();
        assert_eq!(summary.unresolved, 1);
        assert_eq!(summary.inserted, 0);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("DROP".parse::<UnresolvedPolicy>(), Ok(UnresolvedPolicy::Drop));
        assert_eq!("fail".parse::<UnresolvedPolicy>(), Ok(UnresolvedPolicy::Fail));
        assert!("skip".parse::<UnresolvedPolicy>().is_err());
    }
}
