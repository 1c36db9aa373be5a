//! Conformed dimension members and the natural-key → surrogate-key index.
//!
//! Every dimension has one explicit natural key. Members are append-only: once a
//! natural key has a surrogate key it is never rewritten.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

pub type SurrogateKey = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
    Time,
    Site,
    Equipment,
    Material,
    Employee,
    Shift,
    Project,
    Account,
}

impl DimensionKind {
    /// Load order used by the conformer and by bulk inserts.
    pub const ALL: [DimensionKind; 8] = [
        DimensionKind::Time,
        DimensionKind::Site,
        DimensionKind::Equipment,
        DimensionKind::Material,
        DimensionKind::Employee,
        DimensionKind::Shift,
        DimensionKind::Project,
        DimensionKind::Account,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionKind::Time => "time",
            DimensionKind::Site => "site",
            DimensionKind::Equipment => "equipment",
            DimensionKind::Material => "material",
            DimensionKind::Employee => "employee",
            DimensionKind::Shift => "shift",
            DimensionKind::Project => "project",
            DimensionKind::Account => "account",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            DimensionKind::Time => "dim.dim_time",
            DimensionKind::Site => "dim.dim_site",
            DimensionKind::Equipment => "dim.dim_equipment",
            DimensionKind::Material => "dim.dim_material",
            DimensionKind::Employee => "dim.dim_employee",
            DimensionKind::Shift => "dim.dim_shift",
            DimensionKind::Project => "dim.dim_project",
            DimensionKind::Account => "dim.dim_account",
        }
    }

    /// Surrogate key column, shared by the dimension table and the referencing fact columns.
    pub fn key_column(&self) -> &'static str {
        match self {
            DimensionKind::Time => "time_key",
            DimensionKind::Site => "site_key",
            DimensionKind::Equipment => "equipment_key",
            DimensionKind::Material => "material_key",
            DimensionKind::Employee => "employee_key",
            DimensionKind::Shift => "shift_key",
            DimensionKind::Project => "project_key",
            DimensionKind::Account => "account_key",
        }
    }

    pub fn natural_key_column(&self) -> &'static str {
        match self {
            DimensionKind::Time => "date",
            DimensionKind::Site => "site_name",
            DimensionKind::Equipment => "equipment_name",
            DimensionKind::Material => "material_id",
            DimensionKind::Employee => "employee_id",
            DimensionKind::Shift => "shift_id",
            DimensionKind::Project => "project_id",
            DimensionKind::Account => "account_id",
        }
    }
}

/// A dimension member that can be conformed by natural key.
pub trait Member: Clone {
    type Key: Clone + Eq + Ord + Hash;
    const KIND: DimensionKind;

    fn natural_key(&self) -> &Self::Key;

    /// The slice of a [`DimensionIndex`] holding this dimension's keys.
    fn index(index: &DimensionIndex) -> &HashMap<Self::Key, SurrogateKey>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeMember {
    pub date: NaiveDate,
    pub time_id: Option<i64>,
    pub day_of_month: i32,
    pub day_name: String,
    pub month: i32,
    pub month_name: String,
    pub quarter: i32,
    pub year: i32,
    pub is_weekend: bool,
}

impl TimeMember {
    /// Derives the calendar attributes from the date itself.
    pub fn from_date(date: NaiveDate, time_id: Option<i64>) -> Self {
        Self {
            date,
            time_id,
            day_of_month: date.day() as i32,
            day_name: date.format("%A").to_string(),
            month: date.month() as i32,
            month_name: date.format("%B").to_string(),
            quarter: (date.month0() / 3 + 1) as i32,
            year: date.year(),
            is_weekend: matches!(date.weekday(), Weekday::Sat | Weekday::Sun),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteMember {
    pub site_name: String,
    pub site_id: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquipmentMember {
    pub equipment_name: String,
    pub equipment_type: Option<String>,
    pub manufacture: Option<String>,
    pub model: Option<String>,
    pub capacity: Option<f64>,
    pub purchase_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterialMember {
    pub material_id: String,
    pub material_name: Option<String>,
    pub material_type: Option<String>,
    pub unit_of_measure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmployeeMember {
    pub employee_id: String,
    pub employee_name: Option<String>,
    pub position: Option<String>,
    pub department: Option<String>,
    pub status: Option<String>,
    pub hire_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShiftMember {
    pub shift_id: String,
    pub shift_name: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectMember {
    pub project_id: String,
    pub project_name: Option<String>,
    pub project_manager: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountMember {
    pub account_id: String,
    pub account_name: Option<String>,
    pub account_type: Option<String>,
    pub budget_category: Option<String>,
}

macro_rules! impl_member {
    ($member:ty, $key:ty, $kind:expr, $field:ident, $slot:ident) => {
        impl Member for $member {
            type Key = $key;
            const KIND: DimensionKind = $kind;

            fn natural_key(&self) -> &Self::Key {
                &self.$field
            }

            fn index(index: &DimensionIndex) -> &HashMap<Self::Key, SurrogateKey> {
                &index.$slot
            }
        }
    };
}

impl_member!(TimeMember, NaiveDate, DimensionKind::Time, date, time);
impl_member!(SiteMember, String, DimensionKind::Site, site_name, site);
impl_member!(EquipmentMember, String, DimensionKind::Equipment, equipment_name, equipment);
impl_member!(MaterialMember, String, DimensionKind::Material, material_id, material);
impl_member!(EmployeeMember, String, DimensionKind::Employee, employee_id, employee);
impl_member!(ShiftMember, String, DimensionKind::Shift, shift_id, shift);
impl_member!(ProjectMember, String, DimensionKind::Project, project_id, project);
impl_member!(AccountMember, String, DimensionKind::Account, account_id, account);

/// New members to append, per dimension, sorted by natural key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DimensionBatch {
    pub time: Vec<TimeMember>,
    pub site: Vec<SiteMember>,
    pub equipment: Vec<EquipmentMember>,
    pub material: Vec<MaterialMember>,
    pub employee: Vec<EmployeeMember>,
    pub shift: Vec<ShiftMember>,
    pub project: Vec<ProjectMember>,
    pub account: Vec<AccountMember>,
}

impl DimensionBatch {
    pub fn len(&self, kind: DimensionKind) -> usize {
        match kind {
            DimensionKind::Time => self.time.len(),
            DimensionKind::Site => self.site.len(),
            DimensionKind::Equipment => self.equipment.len(),
            DimensionKind::Material => self.material.len(),
            DimensionKind::Employee => self.employee.len(),
            DimensionKind::Shift => self.shift.len(),
            DimensionKind::Project => self.project.len(),
            DimensionKind::Account => self.account.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        DimensionKind::ALL.iter().all(|kind| self.len(*kind) == 0)
    }

    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        DimensionKind::ALL
            .iter()
            .map(|kind| (kind.as_str(), self.len(*kind)))
            .collect()
    }
}

/// Natural key → surrogate key for every loaded dimension member.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DimensionIndex {
    pub time: HashMap<NaiveDate, SurrogateKey>,
    pub site: HashMap<String, SurrogateKey>,
    pub equipment: HashMap<String, SurrogateKey>,
    pub material: HashMap<String, SurrogateKey>,
    pub employee: HashMap<String, SurrogateKey>,
    pub shift: HashMap<String, SurrogateKey>,
    pub project: HashMap<String, SurrogateKey>,
    pub account: HashMap<String, SurrogateKey>,
}

impl DimensionIndex {
    pub fn len(&self, kind: DimensionKind) -> usize {
        match kind {
            DimensionKind::Time => self.time.len(),
            DimensionKind::Site => self.site.len(),
            DimensionKind::Equipment => self.equipment.len(),
            DimensionKind::Material => self.material.len(),
            DimensionKind::Employee => self.employee.len(),
            DimensionKind::Shift => self.shift.len(),
            DimensionKind::Project => self.project.len(),
            DimensionKind::Account => self.account.len(),
        }
    }

    pub fn lookup<M: Member>(&self, key: &M::Key) -> Option<SurrogateKey> {
        M::index(self).get(key).copied()
    }
}
