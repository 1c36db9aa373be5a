//! Dimension Conformer - Turns staging candidates into new, surrogate-keyed dimension members
//!
//! For every dimension the candidates from all contributing staging sources are
//! scanned in a fixed source order. The first sighting of a natural key wins its
//! attributes; keys already present in the warehouse are skipped. New members are
//! ordered by natural key so surrogate keys do not depend on source row order.
//!
//! Running the conformer twice on unchanged staging data inserts nothing the second time.

use crate::dimension::{
    AccountMember, DimensionBatch, DimensionIndex, DimensionKind, EmployeeMember,
    EquipmentMember, MaterialMember, Member, ProjectMember, ShiftMember, SiteMember, TimeMember,
};
use crate::error::Result;
use crate::staging::StagingSet;
use crate::store::Warehouse;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct ConformSummary {
    pub inserted: BTreeMap<&'static str, usize>,
}

impl ConformSummary {
    pub fn total_inserted(&self) -> usize {
        self.inserted.values().sum()
    }
}

/// Keeps the first candidate per natural key that the index does not already hold.
fn new_members<M, I>(candidates: I, index: &DimensionIndex) -> Vec<M>
where
    M: Member,
    I: IntoIterator<Item = M>,
{
    let existing = M::index(index);
    let mut fresh: BTreeMap<M::Key, M> = BTreeMap::new();
    let mut scanned = 0usize;

    for candidate in candidates {
        scanned += 1;
        let key = candidate.natural_key();
        if existing.contains_key(key) || fresh.contains_key(key) {
            continue;
        }
        fresh.insert(key.clone(), candidate);
    }

    debug!(
        dimension = M::KIND.as_str(),
        scanned,
        new = fresh.len(),
        "Scanned dimension candidates"
    );
    fresh.into_values().collect()
}

fn time_candidates(staging: &StagingSet) -> impl Iterator<Item = TimeMember> + '_ {
    let equipment = staging
        .equipment_usage
        .iter()
        .filter_map(|r| Some(TimeMember::from_date(r.date?, r.time_id)));
    let production = staging
        .production
        .iter()
        .filter_map(|r| Some(TimeMember::from_date(r.date?, r.time_id)));
    let transactions = staging
        .financial_transaction
        .iter()
        .filter_map(|r| Some(TimeMember::from_date(r.date?, r.time_id)));
    equipment.chain(production).chain(transactions)
}

/// Production and transactions carry a source `site_id`, so they are scanned before equipment usage.
fn site_candidates(staging: &StagingSet) -> impl Iterator<Item = SiteMember> + '_ {
    let production = staging.production.iter().filter_map(|r| {
        Some(SiteMember {
            site_name: r.site_name.clone()?,
            site_id: r.site_id.clone(),
            region: r.region.clone(),
            latitude: r.latitude,
            longitude: r.longitude,
        })
    });
    let transactions = staging.financial_transaction.iter().filter_map(|r| {
        Some(SiteMember {
            site_name: r.site_name.clone()?,
            site_id: r.site_id.clone(),
            region: r.region.clone(),
            latitude: r.latitude,
            longitude: r.longitude,
        })
    });
    let equipment = staging.equipment_usage.iter().filter_map(|r| {
        Some(SiteMember {
            site_name: r.site_name.clone()?,
            site_id: None,
            region: r.region.clone(),
            latitude: r.latitude,
            longitude: r.longitude,
        })
    });
    production.chain(transactions).chain(equipment)
}

fn equipment_candidates(staging: &StagingSet) -> impl Iterator<Item = EquipmentMember> + '_ {
    staging.equipment_usage.iter().filter_map(|r| {
        Some(EquipmentMember {
            equipment_name: r.equipment_name.clone()?,
            equipment_type: r.equipment_type.clone(),
            manufacture: r.manufacture.clone(),
            model: r.model.clone(),
            capacity: r.capacity,
            purchase_date: r.purchase_date,
        })
    })
}

fn material_candidates(staging: &StagingSet) -> impl Iterator<Item = MaterialMember> + '_ {
    staging.production.iter().filter_map(|r| {
        Some(MaterialMember {
            material_id: r.material_id.clone()?,
            material_name: r.material_name.clone(),
            material_type: r.material_type.clone(),
            unit_of_measure: r.unit_of_measure.clone(),
        })
    })
}

fn employee_candidates(staging: &StagingSet) -> impl Iterator<Item = EmployeeMember> + '_ {
    staging.production.iter().filter_map(|r| {
        Some(EmployeeMember {
            employee_id: r.employee_id.clone()?,
            employee_name: r.employee_name.clone(),
            position: r.position.clone(),
            department: r.department.clone(),
            status: r.status.clone(),
            hire_date: r.hire_date,
        })
    })
}

fn shift_candidates(staging: &StagingSet) -> impl Iterator<Item = ShiftMember> + '_ {
    staging.production.iter().filter_map(|r| {
        Some(ShiftMember {
            shift_id: r.shift_id.clone()?,
            shift_name: r.shift_name.clone(),
            start_time: r.start_time.clone(),
            end_time: r.end_time.clone(),
        })
    })
}

fn project_candidates(staging: &StagingSet) -> impl Iterator<Item = ProjectMember> + '_ {
    staging.financial_transaction.iter().filter_map(|r| {
        Some(ProjectMember {
            project_id: r.project_id.clone()?,
            project_name: r.project_name.clone(),
            project_manager: r.project_manager.clone(),
            status: r.status.clone(),
            start_date: r.start_date,
            end_date: r.end_date,
        })
    })
}

fn account_candidates(staging: &StagingSet) -> impl Iterator<Item = AccountMember> + '_ {
    staging.financial_transaction.iter().filter_map(|r| {
        Some(AccountMember {
            account_id: r.account_id.clone()?,
            account_name: r.account_name.clone(),
            account_type: r.account_type.clone(),
            budget_category: r.budget_category.clone(),
        })
    })
}

/// Computes every member the warehouse does not hold yet.
pub fn plan_dimensions(staging: &StagingSet, index: &DimensionIndex) -> DimensionBatch {
    DimensionBatch {
        time: new_members(time_candidates(staging), index),
        site: new_members(site_candidates(staging), index),
        equipment: new_members(equipment_candidates(staging), index),
        material: new_members(material_candidates(staging), index),
        employee: new_members(employee_candidates(staging), index),
        shift: new_members(shift_candidates(staging), index),
        project: new_members(project_candidates(staging), index),
        account: new_members(account_candidates(staging), index),
    }
}

/// Dimension stage: conform all eight dimensions and append the new members in one write.
pub async fn conform_dimensions<W: Warehouse>(warehouse: &W) -> Result<ConformSummary> {
    let staging = warehouse.load_staging().await?;
    let index = warehouse.dimension_index().await?;
    let batch = plan_dimensions(&staging, &index);

    if batch.is_empty() {
        info!("No new dimension members");
    } else {
        warehouse.insert_dimensions(&batch).await?;
    }

    for kind in DimensionKind::ALL {
        info!(
            dimension = kind.as_str(),
            inserted = batch.len(kind),
            existing = index.len(kind),
            "Conformed dimension"
        );
    }

    Ok(ConformSummary {
        inserted: batch.counts(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::{EquipmentUsageRecord, FinancialTransactionRecord, ProductionRecord};
    use crate::store::memory::MemoryWarehouse;
    use crate::store::Table;
    use chrono::NaiveDate;

    fn day(d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2024, 3, d)
    }

    fn usage(id: &str, site: &str, equipment: &str, d: u32) -> EquipmentUsageRecord {
        EquipmentUsageRecord {
            source_line: 0,
            equipment_usage_id: id.to_string(),
            time_id: None,
            date: day(d),
            site_name: Some(site.to_string()),
            region: Some("Kalimantan".to_string()),
            latitude: None,
            longitude: None,
            equipment_name: Some(equipment.to_string()),
            equipment_type: Some("Excavator".to_string()),
            manufacture: None,
            model: None,
            capacity: None,
            purchase_date: None,
            operating_hours: Some(8.0),
            downtime_hours: Some(1.0),
            fuel_consumption: None,
            maintenance_cost: None,
            created_at: None,
            created_by: None,
        }
    }

    fn production(id: &str, site: &str, site_id: &str, material: &str) -> ProductionRecord {
        ProductionRecord {
            source_line: 0,
            production_id: id.to_string(),
            time_id: None,
            site_id: Some(site_id.to_string()),
            material_id: Some(material.to_string()),
            employee_id: Some("E-1".to_string()),
            shift_id: Some("1".to_string()),
            produced_volume: Some(100.0),
            unit_cost: Some(2.0),
            date: day(1),
            site_name: Some(site.to_string()),
            region: Some("Sumatra".to_string()),
            latitude: None,
            longitude: None,
            material_name: Some("Coal".to_string()),
            material_type: None,
            unit_of_measure: Some("ton".to_string()),
            quantity: None,
            employee_name: Some("Budi".to_string()),
            position: None,
            department: None,
            status: None,
            hire_date: None,
            shift_name: Some("Morning".to_string()),
            start_time: None,
            end_time: None,
        }
    }

    fn transaction(id: &str, site: &str) -> FinancialTransactionRecord {
        FinancialTransactionRecord {
            source_line: 0,
            transaction_id: id.to_string(),
            time_id: None,
            site_id: None,
            project_id: Some("PRJ-1".to_string()),
            account_id: Some("ACC-1".to_string()),
            variance: None,
            budgeted_cost: Some(100.0),
            actual_cost: Some(120.0),
            created_at: None,
            created_by: None,
            date: day(2),
            site_name: Some(site.to_string()),
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
            cost: None,
        }
    }

    // -------------------------------------------------------------------------
    // PLANNING TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_distinct_equipment_names() {
        let staging = StagingSet {
            equipment_usage: vec![
                usage("EU-1", "Pit North", "Excavator 01", 1),
                usage("EU-2", "Pit North", "Hauler 07", 1),
                usage("EU-3", "Pit North", "Excavator 01", 2),
            ],
            ..Default::default()
        };
        let batch = plan_dimensions(&staging, &DimensionIndex::default());
        assert_eq!(batch.equipment.len(), 2);
        assert_eq!(batch.site.len(), 1);
        assert_eq!(batch.time.len(), 2);
    }

    #[test]
    fn test_new_members_sorted_by_natural_key() {
        let staging = StagingSet {
            equipment_usage: vec![
                usage("EU-1", "Pit North", "Loader 02", 1),
                usage("EU-2", "Pit North", "Dozer 11", 1),
                usage("EU-3", "Pit North", "Excavator 01", 1),
            ],
            ..Default::default()
        };
        let batch = plan_dimensions(&staging, &DimensionIndex::default());
        let names: Vec<&str> = batch.equipment.iter().map(|e| e.equipment_name.as_str()).collect();
        assert_eq!(names, vec!["Dozer 11", "Excavator 01", "Loader 02"]);
    }

    #[test]
    fn test_existing_keys_are_skipped() {
        let staging = StagingSet {
            equipment_usage: vec![
                usage("EU-1", "Pit North", "Excavator 01", 1),
                usage("EU-2", "Pit South", "Hauler 07", 1),
            ],
            ..Default::default()
        };
        let mut index = DimensionIndex::default();
        index.site.insert("Pit North".to_string(), 1);
        index.equipment.insert("Excavator 01".to_string(), 1);

        let batch = plan_dimensions(&staging, &index);
        assert_eq!(batch.site.len(), 1);
        assert_eq!(batch.site[0].site_name, "Pit South");
        assert_eq!(batch.equipment.len(), 1);
        assert_eq!(batch.equipment[0].equipment_name, "Hauler 07");
    }

    #[test]
    fn test_site_merge_prefers_production_attributes() {
        let staging = StagingSet {
            equipment_usage: vec![usage("EU-1", "Pit North", "Excavator 01", 1)],
            production: vec![production("P-1", "Pit North", "3", "7")],
            financial_transaction: vec![transaction("T-1", "Pit North")],
        };
        let batch = plan_dimensions(&staging, &DimensionIndex::default());
        assert_eq!(batch.site.len(), 1);
        assert_eq!(batch.site[0].site_id.as_deref(), Some("3"));
        assert_eq!(batch.site[0].region.as_deref(), Some("Sumatra"));
    }

    #[test]
    fn test_time_merged_across_sources() {
        let staging = StagingSet {
            equipment_usage: vec![usage("EU-1", "Pit North", "Excavator 01", 1)],
            production: vec![production("P-1", "Pit North", "3", "7")],
            financial_transaction: vec![transaction("T-1", "Pit North")],
        };
        let batch = plan_dimensions(&staging, &DimensionIndex::default());
        // Days 1 (equipment, production) and 2 (transaction)
        assert_eq!(batch.time.len(), 2);
    }

    #[test]
    fn test_absent_natural_key_not_conformed() {
        let mut record = usage("EU-1", "Pit North", "Excavator 01", 1);
        record.equipment_name = None;
        record.date = None;
        let staging = StagingSet {
            equipment_usage: vec![record],
            ..Default::default()
        };
        let batch = plan_dimensions(&staging, &DimensionIndex::default());
        assert!(batch.equipment.is_empty());
        assert!(batch.time.is_empty());
        assert_eq!(batch.site.len(), 1);
    }

    #[test]
    fn test_plan_independent_of_row_order() {
        let rows = vec![
            usage("EU-1", "Pit North", "Loader 02", 1),
            usage("EU-2", "Pit South", "Dozer 11", 2),
            usage("EU-3", "Pit East", "Excavator 01", 3),
        ];
        let mut reversed = rows.clone();
        reversed.reverse();

        let a = plan_dimensions(
            &StagingSet { equipment_usage: rows, ..Default::default() },
            &DimensionIndex::default(),
        );
        let b = plan_dimensions(
            &StagingSet { equipment_usage: reversed, ..Default::default() },
            &DimensionIndex::default(),
        );
        assert_eq!(a, b);
    }

    // -------------------------------------------------------------------------
    // STAGE TESTS
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_conform_is_idempotent() {
        let warehouse = MemoryWarehouse::new();
        warehouse
            .replace_staging(&StagingSet {
                equipment_usage: vec![
                    usage("EU-1", "Pit North", "Excavator 01", 1),
                    usage("EU-2", "Pit North", "Hauler 07", 2),
                ],
                production: vec![production("P-1", "Pit South", "4", "7")],
                financial_transaction: vec![transaction("T-1", "Pit East")],
            })
            .await
            .unwrap();

        let first = conform_dimensions(&warehouse).await.unwrap();
        assert!(first.total_inserted() > 0);
        let sites_after_first = warehouse.row_count(Table::Dimension(DimensionKind::Site)).await.unwrap();
        assert_eq!(sites_after_first, 3);

        let second = conform_dimensions(&warehouse).await.unwrap();
        assert_eq!(second.total_inserted(), 0);
        for kind in DimensionKind::ALL {
            let table = Table::Dimension(kind);
            assert_eq!(
                warehouse.row_count(table).await.unwrap() as usize,
                first.inserted[kind.as_str()],
                "{} changed on rerun",
                kind.as_str()
            );
        }
    }

    #[tokio::test]
    async fn test_conform_appends_only_new_keys() {
        let warehouse = MemoryWarehouse::new();
        warehouse
            .replace_staging(&StagingSet {
                equipment_usage: vec![usage("EU-1", "Pit North", "Excavator 01", 1)],
                ..Default::default()
            })
            .await
            .unwrap();
        conform_dimensions(&warehouse).await.unwrap();
        let before = warehouse.dimension_index().await.unwrap();

        warehouse
            .replace_staging(&StagingSet {
                equipment_usage: vec![
                    usage("EU-2", "Pit North", "Hauler 07", 1),
                    usage("EU-3", "Pit North", "Excavator 01", 1),
                ],
                ..Default::default()
            })
            .await
            .unwrap();
        let summary = conform_dimensions(&warehouse).await.unwrap();
        assert_eq!(summary.inserted["equipment"], 1);

        let after = warehouse.dimension_index().await.unwrap();
        assert_eq!(after.equipment["Excavator 01"], before.equipment["Excavator 01"]);
        assert!(after.equipment["Hauler 07"] > before.equipment["Excavator 01"]);
    }
}
