//! Analysis endpoints
//!
//! `/analyze` drives the loop to completion and returns the assembled
//! response; `/analyze/stream` forwards the loop's event stream as SSE with
//! periodic heartbeats. A disconnecting subscriber drops the stream, which
//! the loop observes as cancellation at its next suspension point.
//!
//! The loop enforces its own wall-clock deadline and then answers with a
//! best-effort `BUDGET_EXHAUSTED` completion; an outer watchdog (deadline
//! plus a small grace) catches the case where the loop cannot even do that,
//! e.g. a hung provider call, and fails the request with 504.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};

use crate::api::AppState;
use crate::api::types::{AnalysisResponse, AnalyzeRequest, ApiError, status_for_error_code};
use crate::core::constants::DEADLINE_GRACE_SECS;
use crate::domain::agent::events::AgentEvent;
use crate::domain::llm::{LlmClient, LlmSettings};
use crate::domain::{AgentLoop, ErrorCode};

/// Heartbeat cadence on the SSE stream (seconds)
const HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// Longest accepted question (characters)
const MAX_QUESTION_CHARS: usize = 4_000;

fn build_agent(
    state: &AppState,
    request: AnalyzeRequest,
) -> Result<(AgentLoop, String, Option<String>), ApiError> {
    let question = request.question.trim().to_string();
    if question.is_empty() {
        return Err(ApiError::bad_request(
            "EMPTY_QUESTION",
            "question must not be empty",
        ));
    }
    if question.chars().count() > MAX_QUESTION_CHARS {
        return Err(ApiError::bad_request(
            "QUESTION_TOO_LONG",
            format!("question exceeds {MAX_QUESTION_CHARS} characters"),
        ));
    }

    if let Some(ref dataset_id) = request.dataset_id {
        if !state.registry.exists(dataset_id) {
            return Err(ApiError::not_found(
                ErrorCode::DatasetNotFound.as_str(),
                format!("dataset not found: {dataset_id}"),
            ));
        }
    }

    let overrides = request.llm_config.unwrap_or_default();
    let settings = LlmSettings::resolve(
        &state.llm_defaults,
        overrides.provider,
        overrides.api_key,
        overrides.model,
        overrides.base_url,
    )
    .map_err(|message| ApiError::bad_request("LLM_CONFIG", message))?;

    let agent = AgentLoop::new(
        LlmClient::new(settings),
        state.registry.clone(),
        state.cache.clone(),
        state.uploads_dir.clone(),
        state.limits.clone(),
        state.shutdown_rx.clone(),
    );
    Ok((agent, question, request.dataset_id))
}

/// Watchdog window: the loop's own deadline plus a winding-down grace
fn watchdog_window(state: &AppState) -> Duration {
    Duration::from_secs(state.limits.deadline_secs + DEADLINE_GRACE_SECS)
}

/// Full analysis: drive the stream to its terminal event, under the
/// overall-deadline watchdog. A watchdog breach drops the stream (the loop
/// sees cancellation) and surfaces as 504.
pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Response, ApiError> {
    let (agent, question, dataset_id) = build_agent(&state, request)?;
    let stream = agent.run(question, dataset_id);

    match tokio::time::timeout(watchdog_window(&state), drive_to_terminal(stream)).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::timeout(format!(
            "analysis did not finish within the {}s deadline",
            state.limits.deadline_secs
        ))),
    }
}

async fn drive_to_terminal(
    stream: impl Stream<Item = AgentEvent>,
) -> Result<Response, ApiError> {
    futures::pin_mut!(stream);

    while let Some(event) = stream.next().await {
        match event {
            AgentEvent::Complete {
                answer,
                tables,
                charts,
                trace,
                error_code,
            } => {
                let response = AnalysisResponse {
                    answer,
                    tables,
                    charts,
                    trace,
                    success: error_code.is_none(),
                    error_code,
                    error: None,
                };
                return Ok(Json(response).into_response());
            }
            AgentEvent::Error {
                error_code,
                message,
                trace,
            } => {
                let response = AnalysisResponse {
                    answer: String::new(),
                    tables: Vec::new(),
                    charts: Vec::new(),
                    trace,
                    success: false,
                    error_code: Some(error_code),
                    error: Some(message),
                };
                return Ok((status_for_error_code(error_code), Json(response)).into_response());
            }
            _ => {}
        }
    }
    Err(ApiError::internal("analysis ended without a terminal event"))
}

enum StreamItem {
    Agent(Option<AgentEvent>),
    Heartbeat,
    DeadlineExceeded,
}

/// Streaming analysis over server-sent events
pub async fn analyze_stream(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (agent, question, dataset_id) = build_agent(&state, request)?;
    let events = agent.run(question, dataset_id);
    let watchdog = watchdog_window(&state);

    let stream = async_stream::stream! {
        futures::pin_mut!(events);
        let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        heartbeat.tick().await; // consume the immediate first tick
        let deadline = tokio::time::sleep(watchdog);
        tokio::pin!(deadline);

        loop {
            let item = tokio::select! {
                event = events.next() => StreamItem::Agent(event),
                _ = heartbeat.tick() => StreamItem::Heartbeat,
                _ = &mut deadline => StreamItem::DeadlineExceeded,
            };
            match item {
                StreamItem::Agent(None) => break,
                StreamItem::Agent(Some(event)) => {
                    let terminal = event.is_terminal();
                    match serde_json::to_string(&event) {
                        Ok(data) => yield Ok(Event::default().event(event.name()).data(data)),
                        Err(e) => tracing::error!(error = %e, "Failed to serialize SSE event"),
                    }
                    if terminal {
                        break;
                    }
                }
                StreamItem::Heartbeat => {
                    let beat = AgentEvent::Heartbeat;
                    let data = serde_json::to_string(&beat).unwrap_or_else(|_| "{}".to_string());
                    yield Ok(Event::default().event(beat.name()).data(data));
                }
                StreamItem::DeadlineExceeded => {
                    // The loop failed to wind down by its own deadline;
                    // emit a terminal error and drop it (cancellation).
                    tracing::warn!("Streaming analysis hit the overall-deadline watchdog");
                    let data = serde_json::json!({
                        "type": "error",
                        "error_code": ErrorCode::BudgetExhausted,
                        "message": "analysis did not finish within the deadline",
                    });
                    yield Ok(Event::default().event("error").data(data.to_string()));
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    ))
}
