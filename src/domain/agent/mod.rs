//! The agent loop
//!
//! Drives the prompt↔tool cycle: ask the model for its next action, execute
//! validated tool calls, append results, repeat, all under step, wall-clock,
//! and cost budgets. The whole run is exposed as a lazy event stream; the
//! loop suspends only on LLM calls, SQL execution, and event emission, and
//! observes cancellation at each of those points.

pub mod events;
pub mod prompt;


use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use futures::Stream;
use tokio::sync::watch;

use super::error::{ErrorCode, ToolError};
use super::llm::{ChatMessage, LlmClient, LlmError, pricing};
use super::plot::ChartOutput;
use super::query::QueryCache;
use super::tools::{ToolExecutor, declarations};
use super::trace::TraceContext;
use crate::core::config::LimitsConfig;
use crate::core::constants::{
    ANSWER_CHUNK_CHARS, LLM_RETRY_DELAYS_MS, MAX_CONSECUTIVE_TOOL_FAILURES, MAX_RESPONSE_TABLES,
};
use crate::data::DatasetRegistry;
use crate::utils::retry::retry_with_schedule;
use events::{AgentEvent, NamedTable};

pub struct AgentLoop {
    llm: LlmClient,
    executor: ToolExecutor,
    registry: Arc<DatasetRegistry>,
    limits: LimitsConfig,
    cancel: watch::Receiver<bool>,
}

impl AgentLoop {
    pub fn new(
        llm: LlmClient,
        registry: Arc<DatasetRegistry>,
        cache: Arc<QueryCache>,
        uploads_dir: PathBuf,
        limits: LimitsConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            llm,
            executor: ToolExecutor::new(registry.clone(), cache, uploads_dir),
            registry,
            limits,
            cancel,
        }
    }

    /// Run one analysis to completion, yielding the event stream of §events.
    pub fn run(
        mut self,
        question: String,
        dataset_id: Option<String>,
    ) -> impl Stream<Item = AgentEvent> + Send {
        stream! {
            let mut trace = TraceContext::new();
            tracing::info!(trace_id = %trace.trace_id, "Analysis started");
            yield AgentEvent::Start { trace_id: trace.trace_id.clone() };

            let dataset = match &dataset_id {
                Some(id) => match self.registry.get(id) {
                    Ok(dataset) => Some(dataset),
                    Err(e) => {
                        let e = ToolError::from(e);
                        yield AgentEvent::Error {
                            error_code: e.code,
                            message: e.message,
                            trace: trace.summary(),
                        };
                        return;
                    }
                },
                None => None,
            };

            let mut messages = vec![
                ChatMessage::system(prompt::SYSTEM_PROMPT),
                ChatMessage::user(prompt::seed_user_message(&question, dataset.as_deref())),
            ];

            let started = Instant::now();
            let deadline = Duration::from_secs(self.limits.deadline_secs);
            let max_steps = self.limits.max_steps;

            let mut tables: Vec<NamedTable> = Vec::new();
            let mut charts: Vec<ChartOutput> = Vec::new();
            let mut table_index = 0usize;
            let mut consecutive_failures: HashMap<String, u32> = HashMap::new();
            let mut exhaustion: Option<(ErrorCode, String)> = None;

            'turns: for step in 1..=max_steps {
                yield AgentEvent::StepStart { step, max_steps };

                if *self.cancel.borrow() {
                    yield cancelled_event(&trace);
                    return;
                }

                // One completion with the bounded provider retry, raced
                // against cancellation.
                let outcome = {
                    let llm = &self.llm;
                    let msgs = &messages;
                    let fut = retry_with_schedule(
                        LLM_RETRY_DELAYS_MS,
                        |e: &LlmError| e.is_transient(),
                        || llm.complete(msgs, declarations()),
                    );
                    tokio::pin!(fut);
                    let mut cancel = self.cancel.clone();
                    tokio::select! {
                        biased;
                        _ = wait_cancelled(&mut cancel) => None,
                        result = &mut fut => Some(result),
                    }
                };
                let Some(result) = outcome else {
                    yield cancelled_event(&trace);
                    return;
                };
                let reply = match result {
                    Ok((reply, attempts)) => {
                        if attempts > 1 {
                            tracing::debug!(attempts, "LLM call succeeded after retry");
                        }
                        reply
                    }
                    Err((e, attempts)) => {
                        tracing::error!(error = %e, attempts, "LLM call failed");
                        yield AgentEvent::Error {
                            error_code: e.error_code(),
                            message: e.to_string(),
                            trace: trace.summary(),
                        };
                        return;
                    }
                };

                trace.llm_steps += 1;
                let turn_tokens = reply.usage.total();
                let turn_cost = pricing::cost_usd(self.llm.model(), &reply.usage);
                trace.record_usage(turn_tokens, turn_cost);

                if reply.is_answer() {
                    let answer = if reply.text.trim().is_empty() {
                        "The analysis finished without a textual answer.".to_string()
                    } else {
                        reply.text
                    };
                    for chunk in chunk_answer(&answer) {
                        yield AgentEvent::AnswerChunk { content: chunk };
                    }
                    trim_tables(&mut tables);
                    tracing::info!(
                        trace_id = %trace.trace_id,
                        steps = trace.llm_steps,
                        "Analysis complete"
                    );
                    yield AgentEvent::Complete {
                        answer,
                        tables,
                        charts,
                        trace: trace.summary(),
                        error_code: None,
                    };
                    return;
                }

                let first_step_index = trace.next_step_index();
                messages.push(ChatMessage::assistant(
                    reply.text.clone(),
                    reply.tool_calls.clone(),
                ));

                for (call_index, call) in reply.tool_calls.iter().enumerate() {
                    yield AgentEvent::ToolCall {
                        tool: call.name.clone(),
                        args_digest: TraceContext::digest_args(&call.args),
                    };

                    let outcome = {
                        let fut = self.executor.execute(&mut trace, call);
                        tokio::pin!(fut);
                        let mut cancel = self.cancel.clone();
                        tokio::select! {
                            biased;
                            _ = wait_cancelled(&mut cancel) => None,
                            result = &mut fut => Some(result),
                        }
                    };
                    let Some(result) = outcome else {
                        yield cancelled_event(&trace);
                        return;
                    };
                    if call_index == 0 {
                        trace.attach_usage(first_step_index, turn_tokens, turn_cost);
                    }

                    yield AgentEvent::ToolResult {
                        tool: result.tool_name.clone(),
                        success: result.success,
                        latency_ms: result.latency_ms,
                        error_code: result.error_code(),
                    };
                    messages.push(ChatMessage::tool_result(&result.call_id, &result.payload));

                    if result.success {
                        consecutive_failures.remove(&result.tool_name);
                        if result.tool_name == "run_query" {
                            if let Some(table) = self.executor.last_table() {
                                table_index += 1;
                                tables.push(NamedTable {
                                    name: format!("query_result_{table_index}"),
                                    table: table.clone(),
                                });
                            }
                        } else if result.tool_name == "plot" {
                            match serde_json::from_value::<ChartOutput>(result.payload.clone()) {
                                Ok(chart) => charts.push(chart),
                                Err(e) => tracing::warn!(error = %e, "Chart payload did not round-trip"),
                            }
                        }
                        continue;
                    }

                    let Some(code) = result.error_code() else { continue };
                    if !code.is_recoverable() {
                        let message = result
                            .error
                            .as_ref()
                            .map(|e| e.message.clone())
                            .unwrap_or_else(|| code.to_string());
                        yield AgentEvent::Error {
                            error_code: code,
                            message,
                            trace: trace.summary(),
                        };
                        return;
                    }
                    // Validation errors go back to the model for correction;
                    // repeated execution failures of one tool end the run.
                    if matches!(code, ErrorCode::QueryFailed | ErrorCode::QueryTimeout) {
                        let failures = consecutive_failures
                            .entry(result.tool_name.clone())
                            .or_insert(0);
                        *failures += 1;
                        if *failures >= MAX_CONSECUTIVE_TOOL_FAILURES {
                            exhaustion = Some((
                                code,
                                format!(
                                    "{} failed {} times in a row",
                                    result.tool_name, failures
                                ),
                            ));
                            break 'turns;
                        }
                    }
                }

                if started.elapsed() >= deadline {
                    exhaustion = Some((
                        ErrorCode::BudgetExhausted,
                        format!("wall-clock deadline of {}s reached", deadline.as_secs()),
                    ));
                    break 'turns;
                }
                if let Some(ceiling) = self.limits.max_cost_usd {
                    if trace.llm_cost_usd >= ceiling {
                        exhaustion = Some((
                            ErrorCode::BudgetExhausted,
                            format!("cost ceiling of ${ceiling:.2} reached"),
                        ));
                        break 'turns;
                    }
                }
            }

            // Out of budget, or a tool kept failing: answer with what we have.
            let (code, reason) = exhaustion.unwrap_or_else(|| {
                (
                    ErrorCode::BudgetExhausted,
                    format!("step budget of {max_steps} steps reached"),
                )
            });
            tracing::warn!(trace_id = %trace.trace_id, code = %code, reason = %reason, "Analysis stopped early");
            let answer = partial_answer(&reason, &tables, &charts);
            trim_tables(&mut tables);
            yield AgentEvent::Complete {
                answer,
                tables,
                charts,
                trace: trace.summary(),
                error_code: Some(code),
            };
        }
    }
}

fn cancelled_event(trace: &TraceContext) -> AgentEvent {
    AgentEvent::Error {
        error_code: ErrorCode::Cancelled,
        message: "analysis cancelled".to_string(),
        trace: trace.summary(),
    }
}

/// Resolve when the cancellation signal fires; pend forever otherwise.
async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    // Sender dropped without cancelling: nothing to wait for.
    std::future::pending::<()>().await
}

/// Split the answer into ordered chunks on char boundaries
fn chunk_answer(answer: &str) -> Vec<String> {
    let chars: Vec<char> = answer.chars().collect();
    chars
        .chunks(ANSWER_CHUNK_CHARS)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

fn trim_tables(tables: &mut Vec<NamedTable>) {
    if tables.len() > MAX_RESPONSE_TABLES {
        tables.drain(..tables.len() - MAX_RESPONSE_TABLES);
    }
}

/// Best-effort summary when the loop ends without a model answer
fn partial_answer(reason: &str, tables: &[NamedTable], charts: &[ChartOutput]) -> String {
    let mut answer = format!("The analysis stopped early ({reason}).");
    if tables.is_empty() && charts.is_empty() {
        answer.push_str(" No query results were gathered; try a simpler or more specific question.");
    } else {
        if !tables.is_empty() {
            let rows: usize = tables.iter().map(|t| t.table.row_count).sum();
            answer.push_str(&format!(
                " Partial findings: {} query result(s) totalling {} row(s) are attached.",
                tables.len(),
                rows
            ));
        }
        if !charts.is_empty() {
            answer.push_str(&format!(" {} chart(s) were produced.", charts.len()));
        }
    }
    answer
}
