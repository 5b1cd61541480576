//! Shared API types
//!
//! Request/response DTOs and the error type every handler returns.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::core::config::LlmProvider;
use crate::domain::plot::ChartOutput;
use crate::domain::trace::TraceSummary;
use crate::domain::{ErrorCode, NamedTable};

/// Standard API error response
#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: String, message: String },
    NotFound { code: String, message: String },
    TooManyRequests { message: String },
    Timeout { message: String },
    Internal { code: String, message: String },
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::TooManyRequests {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            code: "INTERNAL".to_string(),
            message: message.into(),
        }
    }

    pub fn from_data(e: crate::data::DataError) -> Self {
        use crate::data::DataError;
        match &e {
            DataError::DatasetNotFound { .. } => {
                Self::not_found(ErrorCode::DatasetNotFound.as_str(), e.to_string())
            }
            DataError::ColumnNotFound { .. } => {
                Self::bad_request(ErrorCode::ColumnNotFound.as_str(), e.to_string())
            }
            DataError::Ingest(_) => Self::bad_request("INGEST_FAILED", e.to_string()),
            DataError::Timeout { .. } => Self::timeout(e.to_string()),
            _ => {
                tracing::error!(error = %e, "Data error");
                Self::internal("database operation failed")
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_type, code, message) = match self {
            Self::BadRequest { code, message } => ("bad_request", code, message),
            Self::NotFound { code, message } => ("not_found", code, message),
            Self::TooManyRequests { message } => (
                "too_many_requests",
                "RATE_LIMITED".to_string(),
                message,
            ),
            Self::Timeout { message } => ("timeout", ErrorCode::QueryTimeout.as_str().to_string(), message),
            Self::Internal { code, message } => ("internal", code, message),
        };
        let body = serde_json::json!({
            "error": {"type": error_type, "code": code, "message": message}
        });
        (status, Json(body)).into_response()
    }
}

/// HTTP status for a terminal analysis error event
pub fn status_for_error_code(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::DatasetNotFound => StatusCode::NOT_FOUND,
        ErrorCode::LlmRateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::QueryTimeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// =============================================================================
// Analyze DTOs
// =============================================================================

/// Per-request LLM override; unset fields fall back to server defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmConfigOverride {
    #[serde(default)]
    pub provider: Option<LlmProvider>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub question: String,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub llm_config: Option<LlmConfigOverride>,
}

/// The unified analysis response; present for successes and for best-effort
/// terminals alike, always carrying the trace.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResponse {
    pub answer: String,
    pub tables: Vec<NamedTable>,
    pub charts: Vec<ChartOutput>,
    pub trace: TraceSummary,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// Dataset DTOs
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub file_id: String,
    pub filename: String,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub dataset_id: String,
    pub row_count: u64,
    pub column_count: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
