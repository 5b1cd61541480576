//! Collaborator-facing dataset endpoints
//!
//! `/upload` stores a raw file and hands back a `file_id`;
//! `/dataset/create` turns an uploaded file into a queryable dataset; the
//! remaining routes are registry pass-throughs.

use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::types::{ApiError, DatasetSummary, UploadResponse};
use crate::data::{IngestRequest, ingest_file};

/// Store the uploaded file under `uploads/` and return its id
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request("BAD_UPLOAD", e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload.csv").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request("BAD_UPLOAD", e.to_string()))?;
        if data.is_empty() {
            return Err(ApiError::bad_request("BAD_UPLOAD", "uploaded file is empty"));
        }

        let file_id = format!(
            "up_{}_{}",
            &Uuid::new_v4().simple().to_string()[..8],
            sanitize_filename(&filename)
        );
        let path = state.uploads_dir.join(&file_id);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| ApiError::internal(format!("failed to store upload: {e}")))?;

        tracing::info!(file_id, size_bytes = data.len(), "File uploaded");
        return Ok(Json(UploadResponse {
            file_id,
            filename,
            size_bytes: data.len(),
        }));
    }
    Err(ApiError::bad_request(
        "BAD_UPLOAD",
        "multipart field 'file' is required",
    ))
}

/// Keep only the basename with filesystem-safe characters
fn sanitize_filename(filename: &str) -> String {
    let basename = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim_start_matches('.');
    let safe: String = basename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() {
        "upload.csv".to_string()
    } else {
        safe
    }
}

pub async fn create_dataset(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let dataset = ingest_file(&state.registry, &state.uploads_dir, request)
        .await
        .map_err(ApiError::from_data)?;
    Ok(Json(json!({
        "dataset_id": dataset.dataset_id,
        "schema": dataset.columns,
        "row_count": dataset.row_count,
    })))
}

pub async fn list_datasets(State(state): State<AppState>) -> Json<Vec<DatasetSummary>> {
    let datasets = state
        .registry
        .list()
        .into_iter()
        .map(|d| DatasetSummary {
            dataset_id: d.dataset_id.clone(),
            row_count: d.row_count,
            column_count: d.columns.len(),
            created_at: d.created_at,
        })
        .collect();
    Json(datasets)
}

pub async fn get_dataset_schema(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let dataset = state
        .registry
        .get(&dataset_id)
        .map_err(ApiError::from_data)?;
    Ok(Json(json!({
        "dataset_id": dataset.dataset_id,
        "columns": dataset.columns,
        "row_count": dataset.row_count,
    })))
}

pub async fn delete_dataset(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .registry
        .remove(&dataset_id)
        .await
        .map_err(ApiError::from_data)?;
    Ok(StatusCode::NO_CONTENT)
}
