//! HTTP API surface

pub mod rate_limit;
pub mod routes;
pub mod server;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;

use crate::core::config::{LimitsConfig, LlmConfig};
use crate::data::DatasetRegistry;
use crate::domain::QueryCache;

/// Shared state behind every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DatasetRegistry>,
    pub cache: Arc<QueryCache>,
    pub uploads_dir: PathBuf,
    pub llm_defaults: LlmConfig,
    pub limits: LimitsConfig,
    /// Doubles as the cancellation signal for in-flight analyses
    pub shutdown_rx: watch::Receiver<bool>,
}
