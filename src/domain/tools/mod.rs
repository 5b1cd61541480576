//! Tool registry, executor, and field resolution

pub mod executor;
pub mod registry;
pub mod resolve;

pub use executor::{ToolCall, ToolExecutor, ToolResult};
pub use registry::{ToolDecl, ToolName, declarations};
