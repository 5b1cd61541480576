//! Tool executor
//!
//! Mediates between the model and the backend engines: registry lookup,
//! argument validation, dispatch, trace recording, and error-code
//! translation. Holds the per-request pointer to the most recent query
//! table so `plot` can bind to it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde_json::{Value as Json, json};

use super::registry::ToolName;
use super::resolve;
use crate::data::{DatasetRegistry, IngestRequest, ingest_file};
use crate::domain::error::{ErrorCode, ToolError};
use crate::domain::plot::{self, PlotSpec};
use crate::domain::query::{QueryCache, QuerySpec, Table, compile_and_run};
use crate::domain::trace::{TraceContext, TraceStep};

/// A structured tool invocation from the model
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub args: Json,
}

/// Outcome of one tool invocation
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub success: bool,
    /// Success payload, or the structured error payload on failure
    pub payload: Json,
    pub error: Option<ToolError>,
    pub latency_ms: f64,
    pub row_count: Option<usize>,
}

impl ToolResult {
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

#[derive(Debug, Deserialize)]
struct GetSchemaArgs {
    dataset_id: String,
}

fn default_sample_n() -> usize {
    5
}

#[derive(Debug, Deserialize)]
struct SampleRowsArgs {
    dataset_id: String,
    #[serde(default = "default_sample_n")]
    n: usize,
    #[serde(default)]
    columns: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ResolveFieldsArgs {
    dataset_id: String,
    terms: Vec<String>,
}

struct ToolOutcome {
    payload: Json,
    row_count: Option<usize>,
}

/// Per-request executor; not shared across analyses
pub struct ToolExecutor {
    registry: Arc<DatasetRegistry>,
    cache: Arc<QueryCache>,
    uploads_dir: PathBuf,
    last_table: Option<Table>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<DatasetRegistry>, cache: Arc<QueryCache>, uploads_dir: PathBuf) -> Self {
        Self {
            registry,
            cache,
            uploads_dir,
            last_table: None,
        }
    }

    /// The most recent successful `run_query` table, if any
    pub fn last_table(&self) -> Option<&Table> {
        self.last_table.as_ref()
    }

    /// Execute one call: validate, dispatch, record a trace step, translate
    /// failures into stable error codes.
    pub async fn execute(&mut self, trace: &mut TraceContext, call: &ToolCall) -> ToolResult {
        let start = Instant::now();
        let outcome = self.dispatch(call).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let (success, payload, error, row_count) = match outcome {
            Ok(outcome) => {
                tracing::info!(tool = %call.name, latency_ms, "Tool executed");
                (true, outcome.payload, None, outcome.row_count)
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, code = %e.code, error = %e.message, "Tool failed");
                (false, e.to_payload(), Some(e), None)
            }
        };

        trace.add_step(TraceStep {
            step_index: trace.next_step_index(),
            tool_name: call.name.clone(),
            args_digest: TraceContext::digest_args(&call.args),
            latency_ms,
            row_count,
            tokens: None,
            cost_usd: None,
            success,
            error_code: error.as_ref().map(|e| e.code),
        });

        ToolResult {
            call_id: call.call_id.clone(),
            tool_name: call.name.clone(),
            success,
            payload,
            error,
            latency_ms,
            row_count,
        }
    }

    async fn dispatch(&mut self, call: &ToolCall) -> Result<ToolOutcome, ToolError> {
        let Some(tool) = ToolName::parse(&call.name) else {
            return Err(ToolError::unknown_tool(&call.name));
        };

        match tool {
            ToolName::CreateDataset => {
                let args: IngestRequest = parse_args(&call.args)?;
                let dataset = ingest_file(&self.registry, &self.uploads_dir, args)
                    .await
                    .map_err(ToolError::from)?;
                Ok(ToolOutcome {
                    payload: json!({
                        "dataset_id": dataset.dataset_id,
                        "schema": dataset.columns,
                        "row_count": dataset.row_count,
                        "column_count": dataset.columns.len(),
                    }),
                    row_count: Some(dataset.row_count as usize),
                })
            }
            ToolName::GetSchema => {
                let args: GetSchemaArgs = parse_args(&call.args)?;
                let dataset = self.registry.get(&args.dataset_id).map_err(ToolError::from)?;
                Ok(ToolOutcome {
                    payload: json!({
                        "dataset_id": dataset.dataset_id,
                        "columns": dataset.columns,
                        "row_count": dataset.row_count,
                    }),
                    row_count: None,
                })
            }
            ToolName::SampleRows => {
                let args: SampleRowsArgs = parse_args(&call.args)?;
                if args.n == 0 {
                    return Err(ToolError::bad_args("n must be at least 1"));
                }
                let sample = self
                    .registry
                    .sample(&args.dataset_id, args.n, args.columns.as_deref())
                    .await
                    .map_err(ToolError::from)?;
                let row_count = sample.rows.len();
                Ok(ToolOutcome {
                    payload: serde_json::to_value(&sample).unwrap_or(Json::Null),
                    row_count: Some(row_count),
                })
            }
            ToolName::RunQuery => {
                let spec: QuerySpec = parse_args(&call.args)?;
                let table = compile_and_run(&self.registry, &self.cache, &spec).await?;
                let row_count = table.row_count;
                let payload = serde_json::to_value(&table).unwrap_or(Json::Null);
                self.last_table = Some(table);
                Ok(ToolOutcome {
                    payload,
                    row_count: Some(row_count),
                })
            }
            ToolName::Plot => {
                let spec: PlotSpec = parse_args(&call.args)?;
                let Some(table) = self.last_table.as_ref() else {
                    return Err(ToolError::bad_plot(
                        "no query result available; call run_query before plot",
                    ));
                };
                let chart = plot::normalise(table, &spec)?;
                Ok(ToolOutcome {
                    payload: serde_json::to_value(&chart).unwrap_or(Json::Null),
                    row_count: None,
                })
            }
            ToolName::ResolveFields => {
                let args: ResolveFieldsArgs = parse_args(&call.args)?;
                let dataset = self.registry.get(&args.dataset_id).map_err(ToolError::from)?;
                let resolved = resolve::resolve_terms(&dataset, &args.terms);
                Ok(ToolOutcome {
                    payload: serde_json::to_value(&resolved).unwrap_or(Json::Null),
                    row_count: None,
                })
            }
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: &Json) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::bad_args(e.to_string()))
}
