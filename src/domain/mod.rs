//! Domain layer: query compilation, plotting, tools, LLM adapters, the
//! agent loop, and per-analysis tracing

pub mod agent;
pub mod error;
pub mod llm;
pub mod plot;
pub mod query;
pub mod tools;
pub mod trace;

pub use agent::AgentLoop;
pub use agent::events::{AgentEvent, NamedTable};
pub use error::{ErrorCode, ToolError};
pub use llm::{LlmClient, LlmSettings};
pub use plot::{ChartOutput, PlotSpec};
pub use query::{QueryCache, QuerySpec, Table};
pub use tools::{ToolCall, ToolExecutor, ToolResult};
pub use trace::{TraceContext, TraceStep, TraceSummary};
