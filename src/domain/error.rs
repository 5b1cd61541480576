//! Stable error taxonomy surfaced to clients and to the LLM as tool errors

use serde::Serialize;
use thiserror::Error;

use crate::data::DataError;

/// Error codes of the analysis surface.
///
/// These identifiers are stable: they appear in tool results handed back to
/// the LLM, in trace steps, in SSE `error` events, and in HTTP responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadSpec,
    BadPlot,
    ColumnNotFound,
    DatasetNotFound,
    UnknownTool,
    BadToolArgs,
    QueryFailed,
    QueryTimeout,
    LlmError,
    LlmRateLimited,
    BudgetExhausted,
    Cancelled,
}

impl ErrorCode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BadSpec => "BAD_SPEC",
            Self::BadPlot => "BAD_PLOT",
            Self::ColumnNotFound => "COLUMN_NOT_FOUND",
            Self::DatasetNotFound => "DATASET_NOT_FOUND",
            Self::UnknownTool => "UNKNOWN_TOOL",
            Self::BadToolArgs => "BAD_TOOL_ARGS",
            Self::QueryFailed => "QUERY_FAILED",
            Self::QueryTimeout => "QUERY_TIMEOUT",
            Self::LlmError => "LLM_ERROR",
            Self::LlmRateLimited => "LLM_RATE_LIMITED",
            Self::BudgetExhausted => "BUDGET_EXHAUSTED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether the agent loop may hand this back to the LLM for self-correction
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BadSpec
                | Self::BadPlot
                | Self::ColumnNotFound
                | Self::BadToolArgs
                | Self::QueryFailed
                | Self::QueryTimeout
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed tool invocation, structured for the LLM to act on
#[derive(Debug, Clone, Error, Serialize)]
#[error("{code}: {message}")]
pub struct ToolError {
    pub code: ErrorCode,
    pub message: String,
    /// Path of the offending field for spec validation failures,
    /// e.g. `filters[2].value`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
}

impl ToolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field_path: None,
        }
    }

    pub fn bad_spec(field_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::BadSpec,
            message: reason.into(),
            field_path: Some(field_path.into()),
        }
    }

    pub fn bad_plot(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadPlot, message)
    }

    pub fn bad_args(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadToolArgs, message)
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(ErrorCode::UnknownTool, format!("unknown tool: {name}"))
    }

    /// Wire form embedded in the tool-result message for the LLM
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.message,
            "code": self.code,
            "field_path": self.field_path,
        })
    }
}

impl From<DataError> for ToolError {
    fn from(e: DataError) -> Self {
        match e {
            DataError::DatasetNotFound { dataset_id } => Self::new(
                ErrorCode::DatasetNotFound,
                format!("dataset not found: {dataset_id}"),
            ),
            DataError::ColumnNotFound { column } => Self::new(
                ErrorCode::ColumnNotFound,
                format!("column not found: {column}"),
            ),
            DataError::Timeout { timeout_secs } => Self::new(
                ErrorCode::QueryTimeout,
                format!("query exceeded {timeout_secs}s timeout"),
            ),
            DataError::Ingest(message) => Self::new(ErrorCode::BadToolArgs, message),
            DataError::Database(e) => Self::new(ErrorCode::QueryFailed, e.to_string()),
            DataError::Io(e) => Self::new(ErrorCode::QueryFailed, e.to_string()),
        }
    }
}
