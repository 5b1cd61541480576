//! Unified error type for the data layer

use thiserror::Error;

/// Errors from the analytical store, the dataset registry, and ingest
#[derive(Error, Debug)]
pub enum DataError {
    /// DuckDB error (analytical store)
    #[error("DuckDB error: {0}")]
    Database(#[from] duckdb::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Statement timeout
    #[error("Query timeout after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Unknown dataset id
    #[error("Dataset not found: {dataset_id}")]
    DatasetNotFound { dataset_id: String },

    /// Column not present in the dataset schema
    #[error("Column not found: {column}")]
    ColumnNotFound { column: String },

    /// File could not be loaded into the store
    #[error("Ingest failed: {0}")]
    Ingest(String),
}

impl DataError {
    pub fn ingest(message: impl Into<String>) -> Self {
        Self::Ingest(message.into())
    }
}
