use thiserror::Error;

pub type Result<T> = std::result::Result<T, EtlError>;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Warehouse unreachable: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Parse error in {file} at line {line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    #[error("Constraint violation on {table}: {message}")]
    ConstraintViolation { table: String, message: String },

    #[error("{count} {fact} rows could not be resolved against their dimensions")]
    UnresolvedKeys { fact: &'static str, count: usize },

    #[error("Quality check failed with verdict {verdict}")]
    QualityCheckFailed { verdict: String },

    #[error("Another pipeline run holds the warehouse lock")]
    RunLocked,

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EtlError {
    pub fn parse(file: &str, line: usize, message: impl Into<String>) -> Self {
        EtlError::Parse {
            file: file.to_string(),
            line,
            message: message.into(),
        }
    }

    /// Classifies a driver error, tagging constraint violations with the table being written.
    pub fn from_write(table: &str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db)
                if db.is_unique_violation() || db.is_foreign_key_violation() =>
            {
                EtlError::ConstraintViolation {
                    table: table.to_string(),
                    message: db.message().to_string(),
                }
            }
            other => other.into(),
        }
    }
}

impl From<sqlx::Error> for EtlError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => EtlError::Connection(err),
            sqlx::Error::Database(ref db)
                if db.is_unique_violation() || db.is_foreign_key_violation() =>
            {
                let table = db.table().unwrap_or("unknown").to_string();
                EtlError::ConstraintViolation {
                    table,
                    message: db.message().to_string(),
                }
            }
            other => EtlError::Database(other),
        }
    }
}
