use std::num::ParseIntError;
use thiserror::Error;

/// Anything that can go wrong while retrieving a dataset from its source.
///
/// The loader never lets these escape: they are folded into
/// [`LoadOutcome::Failed`](crate::loader::LoadOutcome) with a user-facing
/// diagnostic.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("missing connection setting `{0}`")]
    MissingSetting(&'static str),

    #[error("invalid table name `{0}`")]
    InvalidTableName(String),

    #[error("table `{0}` does not exist")]
    TableNotFound(String),

    #[error("cannot tell the file format of `{0}` (expected .parquet or .csv)")]
    UnsupportedFormat(String),

    #[error("malformed dataset: {0}")]
    Shape(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for LoadError {
    fn from(e: tokio::task::JoinError) -> Self {
        LoadError::Task(e.to_string())
    }
}

/// The dataset does not carry the column the index is built on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("column `{column}` not found in dataset (available: {})", .available.join(", "))]
    MissingKeyColumn {
        column: String,
        available: Vec<String>,
    },
}

/// User-supplied key text that is not an integer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("`{input}` is not a valid number: {source}")]
pub struct KeyParseError {
    pub input: String,
    #[source]
    pub source: ParseIntError,
}
