//! Agent loop event stream
//!
//! The loop publishes a lazy, finite, non-restartable sequence of these
//! events; order reflects the true serial order of the loop. Terminal
//! events are `complete` and `error`, mutually exclusive.

use serde::Serialize;

use crate::domain::error::ErrorCode;
use crate::domain::plot::ChartOutput;
use crate::domain::query::Table;
use crate::domain::trace::TraceSummary;

/// A query result carried into the final response
#[derive(Debug, Clone, Serialize)]
pub struct NamedTable {
    pub name: String,
    #[serde(flatten)]
    pub table: Table,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Start {
        trace_id: String,
    },
    StepStart {
        step: u32,
        max_steps: u32,
    },
    ToolCall {
        tool: String,
        args_digest: String,
    },
    ToolResult {
        tool: String,
        success: bool,
        latency_ms: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
    AnswerChunk {
        content: String,
    },
    /// Periodic transport keepalive, injected by the SSE layer
    Heartbeat,
    Complete {
        answer: String,
        tables: Vec<NamedTable>,
        charts: Vec<ChartOutput>,
        trace: TraceSummary,
        /// Set when the loop terminated on a budget or tool-failure cap but
        /// still produced a best-effort answer
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
    Error {
        error_code: ErrorCode,
        message: String,
        trace: TraceSummary,
    },
}

impl AgentEvent {
    /// SSE event name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::StepStart { .. } => "step_start",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::AnswerChunk { .. } => "answer_chunk",
            Self::Heartbeat => "heartbeat",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}
