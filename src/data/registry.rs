//! Dataset registry
//!
//! Process-wide map from `dataset_id` to the stored table plus its column
//! schema and summary statistics. Schemas are immutable once published;
//! readers take the lock only to clone the `Arc`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value as Json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::duckdb::{DuckdbService, fetch_rows};
use super::error::DataError;
use crate::core::config::DatasetConfig;
use crate::core::constants::MAX_SAMPLE_ROWS;
use crate::utils::sql::quote_ident;

/// Logical column type of a dataset column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    String,
    Date,
    Datetime,
    Bool,
}

impl ColumnType {
    /// Map a DuckDB type name (from DESCRIBE) to the logical type
    pub fn from_duckdb(type_name: &str) -> Self {
        let upper = type_name.to_ascii_uppercase();
        match upper.as_str() {
            "BOOLEAN" => Self::Bool,
            "TINYINT" | "SMALLINT" | "INTEGER" | "BIGINT" | "HUGEINT" | "UTINYINT"
            | "USMALLINT" | "UINTEGER" | "UBIGINT" => Self::Int,
            "FLOAT" | "DOUBLE" | "REAL" => Self::Float,
            "DATE" => Self::Date,
            _ if upper.starts_with("DECIMAL") => Self::Float,
            _ if upper.starts_with("TIMESTAMP") => Self::Datetime,
            _ => Self::String,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }

    /// Types with a meaningful ordering for range filters
    pub fn is_comparable(&self) -> bool {
        !matches!(self, Self::Bool)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Bool => "bool",
        }
    }
}

/// One column of a dataset schema, with summary statistics from ingest
#[derive(Debug, Clone, Serialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub null_ratio: f64,
    pub example_values: Vec<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<Json>,
}

/// A registered dataset; immutable after registration
#[derive(Debug, Clone, Serialize)]
pub struct Dataset {
    pub dataset_id: String,
    /// Physical table name in the store; never user-supplied
    pub table_name: String,
    pub columns: Vec<Column>,
    pub row_count: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

impl Dataset {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Deterministic sample of a dataset prefix
#[derive(Debug, Clone, Serialize)]
pub struct SampleRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Json>>,
    pub total_rows: u64,
}

/// Process-wide dataset registry
pub struct DatasetRegistry {
    db: Arc<DuckdbService>,
    datasets: RwLock<HashMap<String, Arc<Dataset>>>,
}

impl DatasetRegistry {
    pub fn new(db: Arc<DuckdbService>) -> Self {
        Self {
            db,
            datasets: RwLock::new(HashMap::new()),
        }
    }

    pub fn db(&self) -> &Arc<DuckdbService> {
        &self.db
    }

    /// Register a stored table as a queryable dataset; returns the new id
    pub fn register(
        &self,
        table_name: String,
        columns: Vec<Column>,
        row_count: u64,
        source_file: Option<String>,
    ) -> Arc<Dataset> {
        let dataset_id = format!("ds_{}", &Uuid::new_v4().simple().to_string()[..12]);
        let dataset = Arc::new(Dataset {
            dataset_id: dataset_id.clone(),
            table_name,
            columns,
            row_count,
            created_at: Utc::now(),
            source_file,
        });
        self.datasets.write().insert(dataset_id, dataset.clone());
        tracing::info!(
            dataset_id = %dataset.dataset_id,
            rows = dataset.row_count,
            columns = dataset.columns.len(),
            "Dataset registered"
        );
        dataset
    }

    pub fn exists(&self, dataset_id: &str) -> bool {
        self.datasets.read().contains_key(dataset_id)
    }

    pub fn get(&self, dataset_id: &str) -> Result<Arc<Dataset>, DataError> {
        self.datasets
            .read()
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| DataError::DatasetNotFound {
                dataset_id: dataset_id.to_string(),
            })
    }

    pub fn list(&self) -> Vec<Arc<Dataset>> {
        let mut datasets: Vec<_> = self.datasets.read().values().cloned().collect();
        datasets.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        datasets
    }

    /// Return the first `n` rows of the stored table, optionally projected.
    ///
    /// The prefix is deterministic for a given dataset and `n`: the table is
    /// immutable after ingest and scanned without reordering.
    pub async fn sample(
        &self,
        dataset_id: &str,
        n: usize,
        columns: Option<&[String]>,
    ) -> Result<SampleRows, DataError> {
        let dataset = self.get(dataset_id)?;
        let n = n.min(MAX_SAMPLE_ROWS);

        let selected: Vec<String> = match columns {
            Some(cols) if !cols.is_empty() => {
                for col in cols {
                    if dataset.column(col).is_none() {
                        return Err(DataError::ColumnNotFound {
                            column: col.clone(),
                        });
                    }
                }
                cols.to_vec()
            }
            _ => dataset.columns.iter().map(|c| c.name.clone()).collect(),
        };

        let projection: Vec<String> = selected.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "SELECT {} FROM {} LIMIT {}",
            projection.join(", "),
            quote_ident(&dataset.table_name),
            n
        );

        let width = selected.len();
        let rows = self
            .db
            .run(move |conn| fetch_rows(conn, &sql, &[], width))
            .await?;

        Ok(SampleRows {
            columns: selected,
            rows,
            total_rows: dataset.row_count,
        })
    }

    /// Drop the stored table and forget the dataset
    pub async fn remove(&self, dataset_id: &str) -> Result<(), DataError> {
        let dataset = self.get(dataset_id)?;
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(&dataset.table_name));
        self.db
            .run(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await?;
        self.datasets.write().remove(dataset_id);
        tracing::info!(dataset_id, "Dataset removed");
        Ok(())
    }

    /// Dataset ids whose age exceeds the TTL
    fn expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> Vec<String> {
        self.datasets
            .read()
            .values()
            .filter(|d| now - d.created_at > ttl)
            .map(|d| d.dataset_id.clone())
            .collect()
    }

    /// Spawn the periodic TTL sweep; `None` when GC is disabled.
    pub fn start_cleanup_task(
        self: &Arc<Self>,
        config: &DatasetConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let ttl_hours = config.ttl_hours?;
        let registry = Arc::clone(self);
        let interval_secs = config.cleanup_interval_secs;
        tracing::debug!(ttl_hours, "Starting dataset cleanup task");

        Some(tokio::spawn(async move {
            let ttl = chrono::Duration::hours(ttl_hours as i64);
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Dataset cleanup task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let expired = registry.expired(ttl, Utc::now());
                        for dataset_id in expired {
                            if let Err(e) = registry.remove(&dataset_id).await {
                                tracing::warn!(dataset_id, error = %e, "Failed to remove expired dataset");
                            } else {
                                tracing::info!(dataset_id, "Expired dataset removed");
                            }
                        }
                    }
                }
            }
        }))
    }
}
