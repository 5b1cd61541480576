//! Application configuration
//!
//! Resolution order: built-in defaults, then the JSON config file, then
//! environment variables, then CLI flags.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::cli::CliConfig;
use super::constants::{
    CONFIG_FILE_NAME, DATASET_CLEANUP_INTERVAL_SECS, DEFAULT_DATASET_TTL_HOURS,
    DEFAULT_DEADLINE_SECS, DEFAULT_HOST, DEFAULT_MAX_STEPS, DEFAULT_PORT,
    DEFAULT_QUERY_TIMEOUT_SECS, ENV_ANTHROPIC_API_KEY, ENV_CONFIG, ENV_HOST, ENV_OPENAI_API_KEY,
    ENV_PORT,
};

// =============================================================================
// LLM Provider Enum
// =============================================================================

/// Chat-model provider for the analysis loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Openai,
    Anthropic,
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmProvider::Openai => write!(f, "openai"),
            LlmProvider::Anthropic => write!(f, "anthropic"),
        }
    }
}

// =============================================================================
// Config Sections
// =============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Default LLM settings used when a request carries no `llm_config`
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub base_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Openai,
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            openai_api_key: None,
            anthropic_api_key: None,
        }
    }
}

// API keys must never reach logs, including via Debug formatting.
impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "***"))
            .field(
                "anthropic_api_key",
                &self.anthropic_api_key.as_ref().map(|_| "***"),
            )
            .finish()
    }
}

impl LlmConfig {
    /// API key for the given provider, if configured
    pub fn api_key_for(&self, provider: LlmProvider) -> Option<&str> {
        match provider {
            LlmProvider::Openai => self.openai_api_key.as_deref(),
            LlmProvider::Anthropic => self.anthropic_api_key.as_deref(),
        }
    }
}

/// Per-request analysis budgets
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum LLM turns per analysis
    pub max_steps: u32,
    /// Wall-clock deadline per analysis (seconds)
    pub deadline_secs: u64,
    /// Statement timeout per query (seconds)
    pub query_timeout_secs: u64,
    /// Optional USD cost ceiling per analysis
    pub max_cost_usd: Option<f64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            deadline_secs: DEFAULT_DEADLINE_SECS,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            max_cost_usd: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Dataset time-to-live in hours; `null` disables garbage collection
    pub ttl_hours: Option<u64>,
    /// Interval between GC sweeps (seconds)
    pub cleanup_interval_secs: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            ttl_hours: Some(DEFAULT_DATASET_TTL_HOURS),
            cleanup_interval_secs: DATASET_CLEANUP_INTERVAL_SECS,
        }
    }
}

// =============================================================================
// AppConfig
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub debug: bool,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub limits: LimitsConfig,
    pub datasets: DatasetConfig,
    /// Data directory override (normally resolved from the platform dirs)
    pub data_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration, applying file, env, and CLI layers in order.
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let mut config = match Self::config_file_path(cli) {
            Some(path) if path.exists() => {
                let raw = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                let config: AppConfig = serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid config file: {}", path.display()))?;
                tracing::debug!(path = %path.display(), "Config file loaded");
                config
            }
            _ => AppConfig::default(),
        };

        config.apply_env();
        config.apply_cli(cli);
        Ok(config)
    }

    fn config_file_path(cli: &CliConfig) -> Option<PathBuf> {
        if let Some(ref path) = cli.config {
            return Some(path.clone());
        }
        if let Ok(path) = std::env::var(ENV_CONFIG) {
            return Some(PathBuf::from(path));
        }
        Some(super::storage::AppStorage::resolve_data_dir(None).join(CONFIG_FILE_NAME))
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var(ENV_HOST) {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var(ENV_PORT)
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
        }
        if self.llm.openai_api_key.is_none()
            && let Ok(key) = std::env::var(ENV_OPENAI_API_KEY)
            && !key.is_empty()
        {
            self.llm.openai_api_key = Some(key);
        }
        if self.llm.anthropic_api_key.is_none()
            && let Ok(key) = std::env::var(ENV_ANTHROPIC_API_KEY)
            && !key.is_empty()
        {
            self.llm.anthropic_api_key = Some(key);
        }
    }

    fn apply_cli(&mut self, cli: &CliConfig) {
        if let Some(ref host) = cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(ref dir) = cli.data_dir {
            self.data_dir = Some(dir.clone());
        }
        if cli.debug {
            self.debug = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_budgets() {
        let config = AppConfig::default();
        assert_eq!(config.limits.max_steps, 8);
        assert_eq!(config.limits.deadline_secs, 60);
        assert_eq!(config.limits.query_timeout_secs, 30);
        assert_eq!(config.datasets.ttl_hours, Some(24));
        assert_eq!(config.server.port, DEFAULT_PORT);
    }

    #[test]
    fn cli_overrides_take_precedence() {
        let mut config = AppConfig::default();
        config.apply_cli(&CliConfig {
            host: Some("0.0.0.0".into()),
            port: Some(9000),
            debug: true,
            ..Default::default()
        });
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert!(config.debug);
    }

    #[test]
    fn debug_format_redacts_keys() {
        let llm = LlmConfig {
            openai_api_key: Some("sk-very-secret".into()),
            ..Default::default()
        };
        let rendered = format!("{:?}", llm);
        assert!(!rendered.contains("sk-very-secret"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn provider_parses_lowercase() {
        let p: LlmProvider = serde_json::from_str("\"anthropic\"").unwrap();
        assert_eq!(p, LlmProvider::Anthropic);
        assert_eq!(p.to_string(), "anthropic");
    }

    #[test]
    fn config_file_round_trip() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
    }
}
