use thiserror::Error;

/// Value coercion failures. Messages quote the raw text as received.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Value is empty")]
    Empty,
    #[error("Cannot parse value: '{0}'")]
    Placeholder(String),
    #[error("Cannot convert to number: '{0}'")]
    NotANumber(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("invalid stored geometry: {0}")]
    Geometry(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Map unique/foreign-key violations reported by PostgreSQL onto `Constraint`.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() || db.is_foreign_key_violation() {
                return StoreError::Constraint(db.message().to_string());
            }
        }
        StoreError::Database(err)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A single row or feature that could not be stored. Tallied, never fatal.
#[derive(Debug, Error)]
pub enum RowError {
    #[error(transparent)]
    Value(#[from] ParseError),
    #[error("Invalid geometry: {0}")]
    Geometry(String),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of the outer container: the whole file is rejected.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("'{0}' is not a CSV file. Only CSV files are accepted.")]
    NotTabular(String),
    #[error("Please upload a GeoJSON file")]
    NotGeoJson(String),
    #[error("file is not valid UTF-8 text")]
    Encoding,
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("workbook error: {0}")]
    Workbook(String),
    #[error("{0}")]
    Format(String),
    #[error("year {0} is outside 1900-2100")]
    InvalidYear(i32),
    #[error(transparent)]
    Store(#[from] StoreError),
}
