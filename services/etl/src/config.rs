//! Environment-driven settings shared by every stage.

use crate::error::{EtlError, Result};
use crate::resolve::UnresolvedPolicy;
use crate::validate::Verdict;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Settings {
    pub db_url: Option<String>,
    pub db_max_connections: u32,
    pub sources: SourceFiles,
    pub quality_report_path: PathBuf,
    pub null_threshold: u64,
    pub unresolved_policy: UnresolvedPolicy,
    pub fail_on: Verdict,
    pub insert_chunk_size: usize,
}

/// Locations of the three CSV extracts.
#[derive(Debug, Clone)]
pub struct SourceFiles {
    pub equipment_usage: PathBuf,
    pub production: PathBuf,
    pub financial_transaction: PathBuf,
}

impl SourceFiles {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            equipment_usage: dir.join("dataset_alat_berat_dw.csv"),
            production: dir.join("dataset_production.csv"),
            financial_transaction: dir.join("dataset_transaksi.csv"),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_url: None,
            db_max_connections: 5,
            sources: SourceFiles::in_dir("./data/sources"),
            quality_report_path: PathBuf::from("./data/quality_report.json"),
            null_threshold: 100,
            unresolved_policy: UnresolvedPolicy::Drop,
            fail_on: Verdict::Poor,
            insert_chunk_size: 1000,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let source_dir =
            PathBuf::from(lookup("SOURCE_DIR").unwrap_or_else(|| "./data/sources".to_string()));
        let file = |key: &str, default: &str| {
            source_dir.join(lookup(key).unwrap_or_else(|| default.to_string()))
        };

        let settings = Self {
            db_url: lookup("DB_URL").filter(|url| !url.trim().is_empty()),
            db_max_connections: parse_var(&lookup, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            sources: SourceFiles {
                equipment_usage: file("EQUIPMENT_USAGE_FILE", "dataset_alat_berat_dw.csv"),
                production: file("PRODUCTION_FILE", "dataset_production.csv"),
                financial_transaction: file("TRANSACTION_FILE", "dataset_transaksi.csv"),
            },
            quality_report_path: lookup("QUALITY_REPORT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.quality_report_path),
            null_threshold: parse_var(&lookup, "NULL_THRESHOLD", defaults.null_threshold)?,
            unresolved_policy: parse_var(&lookup, "UNRESOLVED_POLICY", defaults.unresolved_policy)?,
            fail_on: parse_var(&lookup, "FAIL_ON", defaults.fail_on)?,
            insert_chunk_size: parse_var(&lookup, "INSERT_CHUNK_SIZE", defaults.insert_chunk_size)?,
        };

        if settings.insert_chunk_size == 0 {
            return Err(EtlError::Config("INSERT_CHUNK_SIZE must be positive".to_string()));
        }
        if settings.db_max_connections == 0 {
            return Err(EtlError::Config("DB_MAX_CONNECTIONS must be positive".to_string()));
        }

        Ok(settings)
    }

    pub fn require_db_url(&self) -> Result<&str> {
        self.db_url
            .as_deref()
            .ok_or_else(|| EtlError::Config("DB_URL env var missing".to_string()))
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| EtlError::Config(format!("invalid {}='{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_variables() {
        let settings = settings_from(&[]).unwrap();
        assert!(settings.db_url.is_none());
        assert_eq!(settings.null_threshold, 100);
        assert_eq!(settings.unresolved_policy, UnresolvedPolicy::Drop);
        assert_eq!(settings.fail_on, Verdict::Poor);
        assert_eq!(
            settings.sources.financial_transaction,
            PathBuf::from("./data/sources/dataset_transaksi.csv")
        );
    }

    #[test]
    fn test_source_files_follow_source_dir() {
        let settings = settings_from(&[
            ("SOURCE_DIR", "/srv/extracts"),
            ("PRODUCTION_FILE", "prod.csv"),
        ])
        .unwrap();
        assert_eq!(settings.sources.production, PathBuf::from("/srv/extracts/prod.csv"));
        assert_eq!(
            settings.sources.equipment_usage,
            PathBuf::from("/srv/extracts/dataset_alat_berat_dw.csv")
        );
    }

    #[test]
    fn test_policy_and_verdict_parsing() {
        let settings = settings_from(&[("UNRESOLVED_POLICY", "fail"), ("FAIL_ON", "fair")]).unwrap();
        assert_eq!(settings.unresolved_policy, UnresolvedPolicy::Fail);
        assert_eq!(settings.fail_on, Verdict::Fair);
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let err = settings_from(&[("NULL_THRESHOLD", "lots")]).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(settings_from(&[("INSERT_CHUNK_SIZE", "0")]).is_err());
    }

    #[test]
    fn test_blank_db_url_is_missing() {
        let settings = settings_from(&[("DB_URL", "  ")]).unwrap();
        assert!(settings.require_db_url().is_err());
    }
}
