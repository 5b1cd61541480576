//! Per-analysis trace accumulation
//!
//! Every analysis owns one `TraceContext` keyed by a fresh `trace_id`.
//! Steps are append-only; the summary ships in the final response and in
//! the terminal SSE event for post-mortem and cost attribution.

use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use super::error::ErrorCode;
use crate::utils::crypto::short_digest;

/// One recorded tool invocation
#[derive(Debug, Clone, Serialize)]
pub struct TraceStep {
    pub step_index: u32,
    pub tool_name: String,
    /// Digest of the canonical argument JSON; raw arguments never leave the
    /// process through the trace
    pub args_digest: String,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    /// Tokens of the LLM turn that requested this call (first call of the
    /// turn only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

/// Accumulated trace of one analysis
#[derive(Debug)]
pub struct TraceContext {
    pub trace_id: String,
    steps: Vec<TraceStep>,
    started: Instant,
    /// LLM turns taken so far
    pub llm_steps: u32,
    pub llm_tokens: u64,
    pub llm_cost_usd: f64,
    /// Set when any turn used a model missing from the pricing table
    pub cost_unknown: bool,
}

impl TraceContext {
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            steps: Vec::new(),
            started: Instant::now(),
            llm_steps: 0,
            llm_tokens: 0,
            llm_cost_usd: 0.0,
            cost_unknown: false,
        }
    }

    /// Stable digest of a tool call's arguments
    pub fn digest_args(args: &serde_json::Value) -> String {
        short_digest(&args.to_string())
    }

    pub fn add_step(&mut self, step: TraceStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn next_step_index(&self) -> u32 {
        self.steps.len() as u32
    }

    /// Accumulate an LLM turn's usage into the trace totals
    pub fn record_usage(&mut self, tokens: u64, cost_usd: Option<f64>) {
        self.llm_tokens += tokens;
        match cost_usd {
            Some(cost) => self.llm_cost_usd += cost,
            None => self.cost_unknown = true,
        }
    }

    /// Attribute a turn's usage to the first tool step it produced
    pub fn attach_usage(&mut self, step_index: u32, tokens: u64, cost_usd: Option<f64>) {
        if let Some(step) = self.steps.iter_mut().find(|s| s.step_index == step_index) {
            step.tokens = Some(tokens);
            step.cost_usd = cost_usd;
        }
    }

    pub fn duration_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary {
            trace_id: self.trace_id.clone(),
            steps: self.steps.clone(),
            total_steps: self.llm_steps,
            tool_calls: self.steps.len(),
            llm_tokens: self.llm_tokens,
            llm_cost_usd: (self.llm_cost_usd * 10_000.0).round() / 10_000.0,
            cost_unknown: self.cost_unknown,
            duration_ms: self.duration_ms(),
        }
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialized trace carried in responses and terminal events
#[derive(Debug, Clone, Serialize)]
pub struct TraceSummary {
    pub trace_id: String,
    pub steps: Vec<TraceStep>,
    /// LLM turns taken
    pub total_steps: u32,
    pub tool_calls: usize,
    pub llm_tokens: u64,
    pub llm_cost_usd: f64,
    pub cost_unknown: bool,
    pub duration_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(index: u32, tool: &str) -> TraceStep {
        TraceStep {
            step_index: index,
            tool_name: tool.to_string(),
            args_digest: "0".repeat(16),
            latency_ms: 1.0,
            row_count: None,
            tokens: None,
            cost_usd: None,
            success: true,
            error_code: None,
        }
    }

    #[test]
    fn digest_is_stable_for_identical_args() {
        let args = serde_json::json!({"dataset_id": "ds_1", "n": 5});
        assert_eq!(
            TraceContext::digest_args(&args),
            TraceContext::digest_args(&args)
        );
    }

    #[test]
    fn steps_are_append_only_and_indexed() {
        let mut trace = TraceContext::new();
        assert_eq!(trace.next_step_index(), 0);
        trace.add_step(step(0, "get_schema"));
        trace.add_step(step(1, "run_query"));
        assert_eq!(trace.next_step_index(), 2);
        assert_eq!(trace.steps()[1].tool_name, "run_query");
    }

    #[test]
    fn usage_attaches_to_requested_step() {
        let mut trace = TraceContext::new();
        trace.add_step(step(0, "run_query"));
        trace.record_usage(120, Some(0.0012));
        trace.attach_usage(0, 120, Some(0.0012));
        trace.record_usage(80, Some(0.0008));

        assert_eq!(trace.llm_tokens, 200);
        assert!(!trace.cost_unknown);
        assert_eq!(trace.steps()[0].tokens, Some(120));
        assert_eq!(trace.steps()[0].cost_usd, Some(0.0012));

        let summary = trace.summary();
        assert_eq!(summary.llm_cost_usd, 0.002);
    }

    #[test]
    fn unknown_cost_sets_flag() {
        let mut trace = TraceContext::new();
        trace.record_usage(10, None);
        assert!(trace.cost_unknown);
        assert_eq!(trace.llm_cost_usd, 0.0);
    }
}
