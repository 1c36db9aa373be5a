//! Extractor - Reads the CSV extracts and repopulates the staging tables
//!
//! Responsibilities:
//! - Check every source header against its fixed column schema
//! - Normalize date-like fields to calendar dates (ISO-like, or YYYYMMDD for transaction dates)
//! - Coerce numeric fields; unparsable numbers become `None`, never a placeholder string
//! - Abort the whole extract on the first malformed row
//! - Replace all staging tables in one transaction (full refresh)

use crate::config::SourceFiles;
use crate::error::{EtlError, Result};
use crate::staging::{
    EquipmentUsageRecord, FinancialTransactionRecord, ProductionRecord, SourceKind, StagingSet,
};
use crate::store::Warehouse;
use chrono::{NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

pub(crate) const EQUIPMENT_USAGE_COLUMNS: &[&str] = &[
    "equipment_usage_id", "time_id", "date", "day", "day_name", "month", "year",
    "site_name", "region", "latitude", "longitude", "equipment_name",
    "equipment_type", "manufacture", "model", "capacity", "purchase_date",
    "operating_hours", "downtime_hours", "fuel_consumption",
    "maintenance_cost", "created_at", "created_by",
];

pub(crate) const PRODUCTION_COLUMNS: &[&str] = &[
    "production_id", "time_id", "site_id", "material_id", "employee_id", "shift_id",
    "produced_volume", "unit_cost", "date", "day", "month", "year", "day_name",
    "site_name", "region", "latitude", "longitude", "material_name", "material_type",
    "unit_of_measure", "quantity", "employee_name", "position", "department",
    "status", "hire_date", "shift_name", "start_time", "end_time",
];

pub(crate) const TRANSACTION_COLUMNS: &[&str] = &[
    "id", "time_id", "site_id", "project_id", "account_id", "variance",
    "budgeted_cost", "actual_cost", "created_at", "created_by", "date",
    "day", "day_name", "month", "year", "site_name", "region", "latitude",
    "longitude", "project_name", "project_manager", "status", "start_date",
    "end_date", "account_name", "account_type", "budget_category", "cost",
];

/// Spellings pandas-style exports use for a missing value.
const NULL_MARKERS: &[&str] = &["nan", "null", "none", "na", "n/a", "nat"];

const ISO_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
const ISO_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub source: SourceKind,
    pub file: String,
    pub rows: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractSummary {
    pub sources: Vec<SourceSummary>,
}

impl ExtractSummary {
    pub fn total_rows(&self) -> usize {
        self.sources.iter().map(|s| s.rows).sum()
    }
}

// =============================================================================
// Raw CSV rows (every field as text, normalized afterwards)
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawEquipmentUsage {
    equipment_usage_id: Option<String>,
    time_id: Option<String>,
    date: Option<String>,
    site_name: Option<String>,
    region: Option<String>,
    latitude: Option<String>,
    longitude: Option<String>,
    equipment_name: Option<String>,
    equipment_type: Option<String>,
    manufacture: Option<String>,
    model: Option<String>,
    capacity: Option<String>,
    purchase_date: Option<String>,
    operating_hours: Option<String>,
    downtime_hours: Option<String>,
    fuel_consumption: Option<String>,
    maintenance_cost: Option<String>,
    created_at: Option<String>,
    created_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawProduction {
    production_id: Option<String>,
    time_id: Option<String>,
    site_id: Option<String>,
    material_id: Option<String>,
    employee_id: Option<String>,
    shift_id: Option<String>,
    produced_volume: Option<String>,
    unit_cost: Option<String>,
    date: Option<String>,
    site_name: Option<String>,
    region: Option<String>,
    latitude: Option<String>,
    longitude: Option<String>,
    material_name: Option<String>,
    material_type: Option<String>,
    unit_of_measure: Option<String>,
    quantity: Option<String>,
    employee_name: Option<String>,
    position: Option<String>,
    department: Option<String>,
    status: Option<String>,
    hire_date: Option<String>,
    shift_name: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    id: Option<String>,
    time_id: Option<String>,
    site_id: Option<String>,
    project_id: Option<String>,
    account_id: Option<String>,
    variance: Option<String>,
    budgeted_cost: Option<String>,
    actual_cost: Option<String>,
    created_at: Option<String>,
    created_by: Option<String>,
    date: Option<String>,
    site_name: Option<String>,
    region: Option<String>,
    latitude: Option<String>,
    longitude: Option<String>,
    project_name: Option<String>,
    project_manager: Option<String>,
    status: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    account_name: Option<String>,
    account_type: Option<String>,
    budget_category: Option<String>,
    cost: Option<String>,
}

// =============================================================================
// Field normalization
// =============================================================================

type FieldResult<T> = std::result::Result<T, String>;

fn text(raw: Option<String>) -> Option<String> {
    let value = raw?;
    let trimmed = value.trim();
    if trimmed.is_empty() || NULL_MARKERS.contains(&trimmed.to_ascii_lowercase().as_str()) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Removes `1,250,000.5` style thousands separators. Any other comma, such as a
/// decimal comma in `1,5`, makes the value unparsable.
fn strip_thousands(value: &str) -> Option<String> {
    if !value.contains(',') {
        return Some(value.to_string());
    }
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (value, ""),
    };
    if fraction.contains(',') {
        return None;
    }
    let digits = whole.strip_prefix(|c: char| c == '-' || c == '+').unwrap_or(whole);
    let all_digits = |group: &str| group.chars().all(|c| c.is_ascii_digit());
    let mut groups = digits.split(',');
    let lead = groups.next()?;
    if !(1..=3).contains(&lead.len()) || !all_digits(lead) {
        return None;
    }
    if !groups.all(|group| group.len() == 3 && all_digits(group)) {
        return None;
    }
    Some(value.replace(',', ""))
}

fn number(raw: Option<String>) -> Option<f64> {
    strip_thousands(&text(raw)?)?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn integer(raw: Option<String>) -> Option<i64> {
    let value = text(raw)?;
    if let Ok(v) = value.parse::<i64>() {
        return Some(v);
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && v.fract() == 0.0)
        .filter(|v| (i64::MIN as f64..=i64::MAX as f64).contains(v))
        .map(|v| v as i64)
}

/// Source identifiers, with the `12.0` float artifact folded back to `12`.
fn identifier(raw: Option<String>) -> Option<String> {
    let value = text(raw)?;
    match value.strip_suffix(".0") {
        Some(digits) if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) => {
            Some(digits.to_string())
        }
        _ => Some(value),
    }
}

fn business_key(raw: Option<String>, column: &str) -> FieldResult<String> {
    identifier(raw).ok_or_else(|| format!("missing business key '{}'", column))
}

fn date(raw: Option<String>, column: &str) -> FieldResult<Option<NaiveDate>> {
    let Some(value) = text(raw) else {
        return Ok(None);
    };
    for format in ISO_DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(&value, format) {
            return Ok(Some(d));
        }
    }
    for format in ISO_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&value, format) {
            return Ok(Some(dt.date()));
        }
    }
    Err(format!("invalid date in '{}': '{}'", column, value))
}

/// `YYYYMMDD`, possibly exported as a float (`20240115.0`).
fn compact_date(raw: Option<String>, column: &str) -> FieldResult<Option<NaiveDate>> {
    let Some(value) = text(raw) else {
        return Ok(None);
    };
    let digits = value.strip_suffix(".0").unwrap_or(&value);
    NaiveDate::parse_from_str(digits, "%Y%m%d")
        .map(Some)
        .map_err(|_| format!("invalid YYYYMMDD date in '{}': '{}'", column, value))
}

fn datetime(raw: Option<String>, column: &str) -> FieldResult<Option<NaiveDateTime>> {
    let Some(value) = text(raw) else {
        return Ok(None);
    };
    for format in ISO_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&value, format) {
            return Ok(Some(dt));
        }
    }
    for format in ISO_DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(&value, format) {
            return Ok(d.and_hms_opt(0, 0, 0));
        }
    }
    Err(format!("invalid timestamp in '{}': '{}'", column, value))
}

// =============================================================================
// Parsers
// =============================================================================

/// Parses one CSV source. Any malformed row aborts with its line number.
fn parse_source<R, T, F>(content: &str, file: &str, columns: &[&str], convert: F) -> Result<Vec<T>>
where
    R: DeserializeOwned,
    F: Fn(R, i64) -> FieldResult<T>,
{
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader.headers()?.clone();
    let missing: Vec<&str> = columns
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|h| h == *column))
        .collect();
    if !missing.is_empty() {
        return Err(EtlError::parse(
            file,
            1,
            format!("missing columns: {}", missing.join(", ")),
        ));
    }

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let fallback_line = idx + 2; // +1 for 0-index, +1 for header
        let record = result.map_err(|e| {
            let line = e
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(fallback_line);
            EtlError::parse(file, line, e.to_string())
        })?;
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(fallback_line);

        let raw: R = record
            .deserialize(Some(&headers))
            .map_err(|e| EtlError::parse(file, line, e.to_string()))?;
        let row = convert(raw, line as i64).map_err(|msg| EtlError::parse(file, line, msg))?;
        rows.push(row);
    }

    Ok(rows)
}

pub fn parse_equipment_usage(content: &str, file: &str) -> Result<Vec<EquipmentUsageRecord>> {
    parse_source(content, file, EQUIPMENT_USAGE_COLUMNS, |raw: RawEquipmentUsage, line| {
        Ok(EquipmentUsageRecord {
            source_line: line,
            equipment_usage_id: business_key(raw.equipment_usage_id, "equipment_usage_id")?,
            time_id: integer(raw.time_id),
            date: date(raw.date, "date")?,
            site_name: text(raw.site_name),
            region: text(raw.region),
            latitude: number(raw.latitude),
            longitude: number(raw.longitude),
            equipment_name: text(raw.equipment_name),
            equipment_type: text(raw.equipment_type),
            manufacture: text(raw.manufacture),
            model: text(raw.model),
            capacity: number(raw.capacity),
            purchase_date: date(raw.purchase_date, "purchase_date")?,
            operating_hours: number(raw.operating_hours),
            downtime_hours: number(raw.downtime_hours),
            fuel_consumption: number(raw.fuel_consumption),
            maintenance_cost: number(raw.maintenance_cost),
            created_at: datetime(raw.created_at, "created_at")?,
            created_by: text(raw.created_by),
        })
    })
}

pub fn parse_production(content: &str, file: &str) -> Result<Vec<ProductionRecord>> {
    parse_source(content, file, PRODUCTION_COLUMNS, |raw: RawProduction, line| {
        Ok(ProductionRecord {
            source_line: line,
            production_id: business_key(raw.production_id, "production_id")?,
            time_id: integer(raw.time_id),
            site_id: identifier(raw.site_id),
            material_id: identifier(raw.material_id),
            employee_id: identifier(raw.employee_id),
            shift_id: identifier(raw.shift_id),
            produced_volume: number(raw.produced_volume),
            unit_cost: number(raw.unit_cost),
            date: date(raw.date, "date")?,
            site_name: text(raw.site_name),
            region: text(raw.region),
            latitude: number(raw.latitude),
            longitude: number(raw.longitude),
            material_name: text(raw.material_name),
            material_type: text(raw.material_type),
            unit_of_measure: text(raw.unit_of_measure),
            quantity: number(raw.quantity),
            employee_name: text(raw.employee_name),
            position: text(raw.position),
            department: text(raw.department),
            status: text(raw.status),
            hire_date: date(raw.hire_date, "hire_date")?,
            shift_name: text(raw.shift_name),
            start_time: text(raw.start_time),
            end_time: text(raw.end_time),
        })
    })
}

pub fn parse_financial_transactions(
    content: &str,
    file: &str,
) -> Result<Vec<FinancialTransactionRecord>> {
    parse_source(content, file, TRANSACTION_COLUMNS, |raw: RawTransaction, line| {
        Ok(FinancialTransactionRecord {
            source_line: line,
            transaction_id: business_key(raw.id, "id")?,
            time_id: integer(raw.time_id),
            site_id: identifier(raw.site_id),
            project_id: identifier(raw.project_id),
            account_id: identifier(raw.account_id),
            variance: number(raw.variance),
            budgeted_cost: number(raw.budgeted_cost),
            actual_cost: number(raw.actual_cost),
            created_at: datetime(raw.created_at, "created_at")?,
            created_by: text(raw.created_by),
            date: compact_date(raw.date, "date")?,
            site_name: text(raw.site_name),
            region: text(raw.region),
            latitude: number(raw.latitude),
            longitude: number(raw.longitude),
            project_name: text(raw.project_name),
            project_manager: text(raw.project_manager),
            status: text(raw.status),
            start_date: date(raw.start_date, "start_date")?,
            end_date: date(raw.end_date, "end_date")?,
            account_name: text(raw.account_name),
            account_type: text(raw.account_type),
            budget_category: text(raw.budget_category),
            cost: number(raw.cost),
        })
    })
}

// =============================================================================
// Stage
// =============================================================================

async fn read_source(path: &Path) -> Result<(String, String)> {
    let bytes = fs::read(path).await?;
    let sha256 = format!("{:x}", Sha256::digest(&bytes));
    let content = String::from_utf8(bytes)
        .map_err(|_| EtlError::parse(&path.display().to_string(), 0, "file is not valid UTF-8"))?;
    Ok((content, sha256))
}

/// Reads and parses all three sources without touching the warehouse.
pub async fn read_sources(files: &SourceFiles) -> Result<(StagingSet, ExtractSummary)> {
    let mut staging = StagingSet::default();
    let mut sources = Vec::with_capacity(SourceKind::ALL.len());

    for kind in SourceKind::ALL {
        let path = match kind {
            SourceKind::EquipmentUsage => &files.equipment_usage,
            SourceKind::Production => &files.production,
            SourceKind::FinancialTransaction => &files.financial_transaction,
        };
        let file = path.display().to_string();
        info!(source = kind.as_str(), %file, "Reading source");

        let (content, sha256) = read_source(path).await?;
        let rows = match kind {
            SourceKind::EquipmentUsage => {
                staging.equipment_usage = parse_equipment_usage(&content, &file)?;
                staging.equipment_usage.len()
            }
            SourceKind::Production => {
                staging.production = parse_production(&content, &file)?;
                staging.production.len()
            }
            SourceKind::FinancialTransaction => {
                staging.financial_transaction = parse_financial_transactions(&content, &file)?;
                staging.financial_transaction.len()
            }
        };

        if rows == 0 {
            warn!(source = kind.as_str(), %file, "Source has no data rows");
        }
        sources.push(SourceSummary {
            source: kind,
            file,
            rows,
            sha256,
        });
    }

    Ok((staging, ExtractSummary { sources }))
}

/// Extract stage: parse every source, then truncate and repopulate staging.
pub async fn extract<W: Warehouse>(warehouse: &W, files: &SourceFiles) -> Result<ExtractSummary> {
    let (staging, summary) = read_sources(files).await?;
    warehouse.replace_staging(&staging).await?;

    for source in &summary.sources {
        info!(
            source = source.source.as_str(),
            rows = source.rows,
            sha256 = %source.sha256,
            "Loaded staging table"
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryWarehouse;
    use std::io::Write;

    const EQUIPMENT_HEADER: &str = "equipment_usage_id,time_id,date,day,day_name,month,year,site_name,region,latitude,longitude,equipment_name,equipment_type,manufacture,model,capacity,purchase_date,operating_hours,downtime_hours,fuel_consumption,maintenance_cost,created_at,created_by";
    const PRODUCTION_HEADER: &str = "production_id,time_id,site_id,material_id,employee_id,shift_id,produced_volume,unit_cost,date,day,month,year,day_name,site_name,region,latitude,longitude,material_name,material_type,unit_of_measure,quantity,employee_name,position,department,status,hire_date,shift_name,start_time,end_time";
    const TRANSACTION_HEADER: &str = "id,time_id,site_id,project_id,account_id,variance,budgeted_cost,actual_cost,created_at,created_by,date,day,day_name,month,year,site_name,region,latitude,longitude,project_name,project_manager,status,start_date,end_date,account_name,account_type,budget_category,cost";

    fn equipment_csv(rows: &[&str]) -> String {
        let mut csv = format!("{}\n", EQUIPMENT_HEADER);
        for row in rows {
            csv.push_str(row);
            csv.push('\n');
        }
        csv
    }

    const EQUIPMENT_ROW: &str = "EU-1,101,2024-03-15,15,Friday,3,2024,Pit North,Kalimantan,-1.5,116.2,Excavator 01,Excavator,Komatsu,PC2000,12.5,2019-06-01,7.5,0.5,120.0,350.25,2024-03-15 08:00:00,system";

    // -------------------------------------------------------------------------
    // FIELD NORMALIZATION TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_text_null_markers() {
        assert_eq!(text(Some("  ".to_string())), None);
        assert_eq!(text(Some("NaN".to_string())), None);
        assert_eq!(text(Some("null".to_string())), None);
        assert_eq!(text(Some(" Pit North ".to_string())), Some("Pit North".to_string()));
    }

    #[test]
    fn test_number_unparsable_becomes_none() {
        assert_eq!(number(Some("12.5".to_string())), Some(12.5));
        assert_eq!(number(Some("1,250.5".to_string())), Some(1250.5));
        assert_eq!(number(Some("n/a".to_string())), None);
        assert_eq!(number(Some("twelve".to_string())), None);
        assert_eq!(number(Some("inf".to_string())), None);
    }

    #[test]
    fn test_number_rejects_decimal_comma() {
        assert_eq!(number(Some("1,5".to_string())), None);
        assert_eq!(number(Some("12,50".to_string())), None);
        assert_eq!(number(Some("1.250,5".to_string())), None);
        assert_eq!(number(Some(",250".to_string())), None);
        assert_eq!(number(Some("-1,250,000".to_string())), Some(-1_250_000.0));
    }

    #[test]
    fn test_integer_accepts_float_artifact() {
        assert_eq!(integer(Some("42".to_string())), Some(42));
        assert_eq!(integer(Some("42.0".to_string())), Some(42));
        assert_eq!(integer(Some("42.5".to_string())), None);
    }

    #[test]
    fn test_integer_out_of_range_is_none() {
        assert_eq!(integer(Some("1e20".to_string())), None);
        assert_eq!(integer(Some("-1e20".to_string())), None);
        assert_eq!(integer(Some("1e3".to_string())), Some(1000));
    }

    #[test]
    fn test_identifier_folds_float_suffix() {
        assert_eq!(identifier(Some("7.0".to_string())), Some("7".to_string()));
        assert_eq!(identifier(Some("MAT-7.0".to_string())), Some("MAT-7.0".to_string()));
        assert_eq!(identifier(Some("".to_string())), None);
    }

    #[test]
    fn test_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(date(Some("2024-03-15".to_string()), "date").unwrap(), Some(expected));
        assert_eq!(date(Some("2024/03/15".to_string()), "date").unwrap(), Some(expected));
        assert_eq!(
            date(Some("2024-03-15 13:45:00".to_string()), "date").unwrap(),
            Some(expected)
        );
        assert_eq!(date(None, "date").unwrap(), None);
        assert!(date(Some("15th March".to_string()), "date").is_err());
    }

    #[test]
    fn test_compact_date() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(compact_date(Some("20240115".to_string()), "date").unwrap(), Some(expected));
        assert_eq!(compact_date(Some("20240115.0".to_string()), "date").unwrap(), Some(expected));
        assert!(compact_date(Some("2024-01-15".to_string()), "date").is_err());
    }

    #[test]
    fn test_datetime_from_date_only() {
        let dt = datetime(Some("2024-03-15".to_string()), "created_at").unwrap().unwrap();
        assert_eq!(dt.to_string(), "2024-03-15 00:00:00");
    }

    // -------------------------------------------------------------------------
    // PARSER TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_equipment_usage_row() {
        let rows = parse_equipment_usage(&equipment_csv(&[EQUIPMENT_ROW]), "equipment.csv").unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.source_line, 2);
        assert_eq!(row.equipment_usage_id, "EU-1");
        assert_eq!(row.time_id, Some(101));
        assert_eq!(row.date, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(row.site_name.as_deref(), Some("Pit North"));
        assert_eq!(row.capacity, Some(12.5));
        assert_eq!(row.maintenance_cost, Some(350.25));
        assert_eq!(row.purchase_date, NaiveDate::from_ymd_opt(2019, 6, 1));
    }

    #[test]
    fn test_parse_unparsable_measure_is_null() {
        let row = EQUIPMENT_ROW.replace(",7.5,", ",broken,");
        let rows = parse_equipment_usage(&equipment_csv(&[&row]), "equipment.csv").unwrap();
        assert_eq!(rows[0].operating_hours, None);
        assert_eq!(rows[0].downtime_hours, Some(0.5));
    }

    #[test]
    fn test_parse_missing_business_key_aborts() {
        let bad = EQUIPMENT_ROW.replacen("EU-1", "", 1);
        let err = parse_equipment_usage(&equipment_csv(&[EQUIPMENT_ROW, &bad]), "equipment.csv")
            .unwrap_err();
        match err {
            EtlError::Parse { line, message, .. } => {
                assert_eq!(line, 3);
                assert!(message.contains("equipment_usage_id"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_bad_date_aborts() {
        let bad = EQUIPMENT_ROW.replace("2024-03-15,15", "not-a-date,15");
        assert!(matches!(
            parse_equipment_usage(&equipment_csv(&[&bad]), "equipment.csv"),
            Err(EtlError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn test_parse_wrong_field_count_aborts() {
        let err = parse_equipment_usage(&equipment_csv(&["EU-1,101"]), "equipment.csv").unwrap_err();
        assert!(matches!(err, EtlError::Parse { .. }));
    }

    #[test]
    fn test_parse_missing_column_aborts() {
        let csv = "equipment_usage_id,date\nEU-1,2024-03-15\n";
        let err = parse_equipment_usage(csv, "equipment.csv").unwrap_err();
        match err {
            EtlError::Parse { line, message, .. } => {
                assert_eq!(line, 1);
                assert!(message.contains("site_name"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_header_only_is_empty() {
        let rows = parse_equipment_usage(&equipment_csv(&[]), "equipment.csv").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_parse_production_identifiers() {
        let csv = format!(
            "{}\nP-1,101,3.0,7,E-9,1,250.5,12.0,2024-03-15,15,3,2024,Friday,Pit North,Kalimantan,-1.5,116.2,Coal,Thermal,ton,250.5,Budi,Operator,Mining,Active,2020-01-10,Morning,06:00:00,14:00:00\n",
            PRODUCTION_HEADER
        );
        let rows = parse_production(&csv, "production.csv").unwrap();
        assert_eq!(rows[0].site_id.as_deref(), Some("3"));
        assert_eq!(rows[0].material_id.as_deref(), Some("7"));
        assert_eq!(rows[0].shift_id.as_deref(), Some("1"));
        assert_eq!(rows[0].start_time.as_deref(), Some("06:00:00"));
        assert_eq!(rows[0].hire_date, NaiveDate::from_ymd_opt(2020, 1, 10));
    }

    #[test]
    fn test_parse_transaction_compact_date() {
        let csv = format!(
            "{}\nT-1,101,3,PRJ-1,ACC-1,20.0,100,120,2024-01-15 09:00:00,system,20240115,15,Monday,1,2024,Pit North,Kalimantan,-1.5,116.2,Haul Road,Sari,Active,2024-01-01,2024-12-31,Fuel,Expense,Operations,120\n",
            TRANSACTION_HEADER
        );
        let rows = parse_financial_transactions(&csv, "transaksi.csv").unwrap();
        assert_eq!(rows[0].transaction_id, "T-1");
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(rows[0].budgeted_cost, Some(100.0));
        assert_eq!(rows[0].actual_cost, Some(120.0));
        assert_eq!(rows[0].end_date, NaiveDate::from_ymd_opt(2024, 12, 31));
    }

    // -------------------------------------------------------------------------
    // STAGE TESTS
    // -------------------------------------------------------------------------

    fn write_file(dir: &Path, name: &str, content: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn test_extract_replaces_staging() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "dataset_alat_berat_dw.csv", &equipment_csv(&[EQUIPMENT_ROW]));
        write_file(dir.path(), "dataset_production.csv", &format!("{}\n", PRODUCTION_HEADER));
        write_file(dir.path(), "dataset_transaksi.csv", &format!("{}\n", TRANSACTION_HEADER));
        let files = SourceFiles::in_dir(dir.path());

        let warehouse = MemoryWarehouse::new();
        let first = extract(&warehouse, &files).await.unwrap();
        assert_eq!(first.total_rows(), 1);
        assert_eq!(first.sources[0].sha256.len(), 64);

        // Second extract fully replaces, never appends
        extract(&warehouse, &files).await.unwrap();
        let staging = warehouse.load_staging().await.unwrap();
        assert_eq!(staging.equipment_usage.len(), 1);
        assert!(staging.production.is_empty());
    }

    #[tokio::test]
    async fn test_extract_failure_leaves_staging_untouched() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "dataset_alat_berat_dw.csv", &equipment_csv(&[EQUIPMENT_ROW]));
        write_file(dir.path(), "dataset_production.csv", &format!("{}\n", PRODUCTION_HEADER));
        write_file(dir.path(), "dataset_transaksi.csv", &format!("{}\n", TRANSACTION_HEADER));
        let files = SourceFiles::in_dir(dir.path());
        let warehouse = MemoryWarehouse::new();
        extract(&warehouse, &files).await.unwrap();

        write_file(dir.path(), "dataset_transaksi.csv", "id,date\nT-1,20240115\n");
        assert!(extract(&warehouse, &files).await.is_err());
        assert_eq!(warehouse.load_staging().await.unwrap().equipment_usage.len(), 1);
    }

    #[tokio::test]
    async fn test_extract_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = MemoryWarehouse::new();
        let err = extract(&warehouse, &SourceFiles::in_dir(dir.path())).await.unwrap_err();
        assert!(matches!(err, EtlError::Io(_)));
    }
}
