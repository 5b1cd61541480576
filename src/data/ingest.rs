//! Delimited-text ingestion
//!
//! Loads an uploaded file into the store with DuckDB's native CSV reader,
//! profiles the resulting table (types, null ratios, example values), and
//! registers it as a dataset. Spreadsheet sheets are an external
//! collaborator's job and are rejected with a structured error.

use std::path::Path;
use std::sync::Arc;

use duckdb::Connection;
use serde_json::Value as Json;
use uuid::Uuid;

use super::duckdb::{DuckdbService, fetch_rows, value_to_json};
use super::error::DataError;
use super::registry::{Column, ColumnType, Dataset, DatasetRegistry};
use crate::core::constants::{MAX_DATASET_COLUMNS, SCHEMA_EXAMPLE_VALUES};
use crate::utils::sql::quote_ident;

const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "tsv", "txt"];

/// Arguments of the `create_dataset` tool and `/dataset/create` endpoint
#[derive(Debug, Clone, serde::Deserialize)]
pub struct IngestRequest {
    pub file_id: String,
    #[serde(default)]
    pub sheet: Option<String>,
    /// 1-based header row; rows above it are skipped
    #[serde(default)]
    pub header_row: Option<u32>,
}

/// Load the uploaded file into a fresh table and register it
pub async fn ingest_file(
    registry: &Arc<DatasetRegistry>,
    uploads_dir: &Path,
    request: IngestRequest,
) -> Result<Arc<Dataset>, DataError> {
    if let Some(sheet) = &request.sheet {
        return Err(DataError::ingest(format!(
            "sheet '{sheet}' requested, but spreadsheet ingestion is handled by the upload \
             collaborator; only delimited text files are ingested natively"
        )));
    }

    validate_file_id(&request.file_id)?;

    let path = uploads_dir.join(&request.file_id);
    if !path.is_file() {
        return Err(DataError::ingest(format!(
            "file not found: {}",
            request.file_id
        )));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(DataError::ingest(format!(
            "unsupported file type '.{extension}'; expected one of: {}",
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }

    let table_name = format!("dataset_{}", &Uuid::new_v4().simple().to_string()[..12]);
    let skip_rows = request.header_row.unwrap_or(1).saturating_sub(1);
    let path_literal = path.to_string_lossy().replace('\'', "''");

    let db: &Arc<DuckdbService> = registry.db();
    let profile = {
        let table_name = table_name.clone();
        db.run(move |conn| {
            let create = format!(
                "CREATE TABLE {} AS SELECT * FROM read_csv('{}', header = true, skip = {})",
                quote_ident(&table_name),
                path_literal,
                skip_rows
            );
            conn.execute_batch(&create)
                .map_err(|e| DataError::ingest(format!("CSV load failed: {e}")))?;

            match profile_table(conn, &table_name) {
                Ok(profile) => Ok(profile),
                Err(e) => {
                    // Leave no orphan table behind on a failed profile
                    let drop = format!("DROP TABLE IF EXISTS {}", quote_ident(&table_name));
                    if let Err(drop_err) = conn.execute_batch(&drop) {
                        tracing::warn!(table_name, error = %drop_err, "Failed to drop table after ingest error");
                    }
                    Err(e)
                }
            }
        })
        .await?
    };

    let dataset = registry.register(
        table_name,
        profile.columns,
        profile.row_count,
        Some(request.file_id),
    );
    Ok(dataset)
}

struct TableProfile {
    columns: Vec<Column>,
    row_count: u64,
}

/// Extract the schema and per-column summary statistics
fn profile_table(conn: &Connection, table_name: &str) -> Result<TableProfile, DataError> {
    let table = quote_ident(table_name);

    let described = fetch_rows(conn, &format!("DESCRIBE {table}"), &[], 2)?;
    if described.len() > MAX_DATASET_COLUMNS {
        return Err(DataError::ingest(format!(
            "too many columns: {} > {}",
            described.len(),
            MAX_DATASET_COLUMNS
        )));
    }
    if described.is_empty() {
        return Err(DataError::ingest("file has no columns"));
    }

    let row_count: i64 =
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?;
    let row_count = row_count.max(0) as u64;

    let mut columns = Vec::with_capacity(described.len());
    for entry in described {
        let name = match &entry[0] {
            Json::String(s) => s.clone(),
            other => other.to_string(),
        };
        let type_name = match &entry[1] {
            Json::String(s) => s.clone(),
            other => other.to_string(),
        };
        let column_type = ColumnType::from_duckdb(&type_name);
        columns.push(profile_column(conn, &table, name, column_type, row_count)?);
    }

    Ok(TableProfile { columns, row_count })
}

fn profile_column(
    conn: &Connection,
    quoted_table: &str,
    name: String,
    column_type: ColumnType,
    row_count: u64,
) -> Result<Column, DataError> {
    let col = quote_ident(&name);

    let (non_null, unique_count): (i64, i64) = conn.query_row(
        &format!("SELECT COUNT({col}), COUNT(DISTINCT {col}) FROM {quoted_table}"),
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let null_ratio = if row_count == 0 {
        0.0
    } else {
        1.0 - non_null as f64 / row_count as f64
    };

    let example_rows = fetch_rows(
        conn,
        &format!(
            "SELECT DISTINCT {col} FROM {quoted_table} WHERE {col} IS NOT NULL LIMIT {SCHEMA_EXAMPLE_VALUES}"
        ),
        &[],
        1,
    )?;
    let example_values: Vec<Json> = example_rows.into_iter().map(|mut r| r.remove(0)).collect();

    let (min_value, max_value) = if column_type.is_numeric() && non_null > 0 {
        let (min, max): (duckdb::types::Value, duckdb::types::Value) = conn.query_row(
            &format!("SELECT MIN({col}), MAX({col}) FROM {quoted_table}"),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        (Some(value_to_json(min)), Some(value_to_json(max)))
    } else {
        (None, None)
    };

    Ok(Column {
        name,
        column_type,
        null_ratio: (null_ratio * 10_000.0).round() / 10_000.0,
        example_values,
        unique_count: Some(unique_count.max(0) as u64),
        min_value,
        max_value,
    })
}

/// File ids come back from the LLM; keep them strictly inside the uploads dir.
fn validate_file_id(file_id: &str) -> Result<(), DataError> {
    let valid = !file_id.is_empty()
        && file_id.len() <= 128
        && !file_id.starts_with('.')
        && !file_id.contains("..")
        && file_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(DataError::ingest(format!("invalid file id: {file_id:?}")))
    }
}
