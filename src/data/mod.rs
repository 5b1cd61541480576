//! Data layer: analytical store, dataset registry, ingest

pub mod duckdb;
pub mod error;
pub mod ingest;
pub mod registry;

pub use self::duckdb::DuckdbService;
pub use self::error::DataError;
pub use self::ingest::{IngestRequest, ingest_file};
pub use self::registry::{Column, ColumnType, Dataset, DatasetRegistry, SampleRows};
