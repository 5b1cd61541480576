//! Provider-agnostic LLM adapter
//!
//! A tagged variant over the supported wire formats with one capability:
//! `complete(messages, tools)` returns either a terminal answer or a set of
//! structured tool invocations, plus token usage. Providers differ only in
//! message encoding; the loop never sees wire formats.

pub mod anthropic;
pub mod openai;
pub mod pricing;

use serde_json::Value as Json;
use thiserror::Error;

use crate::core::config::{LlmConfig, LlmProvider};
use crate::domain::tools::{ToolCall, ToolDecl};

/// Message roles of the normalized sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One record of the normalized message sequence, the sole state the agent
/// loop carries between turns.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Structured invocations attached to an assistant turn
    pub tool_calls: Vec<ToolCall>,
    /// Id of the call a tool message answers
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, payload: &Json) -> Self {
        Self {
            role: Role::Tool,
            content: payload.to_string(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Token usage of one completion
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One completion: terminal text when `tool_calls` is empty
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

impl LlmReply {
    pub fn is_answer(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("provider rate limited: {0}")]
    RateLimited(String),

    #[error("provider error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed provider response: {0}")]
    BadResponse(String),
}

impl LlmError {
    /// Transport failures, 5xx, and rate limits are worth one bounded retry
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::BadResponse(_) => false,
        }
    }

    pub fn error_code(&self) -> crate::domain::error::ErrorCode {
        match self {
            Self::RateLimited(_) => crate::domain::error::ErrorCode::LlmRateLimited,
            _ => crate::domain::error::ErrorCode::LlmError,
        }
    }
}

/// Resolved per-request provider settings (defaults merged with the
/// request's `llm_config`)
#[derive(Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

// Keys stay out of logs here too.
impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .finish()
    }
}

impl LlmSettings {
    /// Merge a request override onto the configured defaults.
    ///
    /// Returns an error message suitable for a 400 when no API key is
    /// available for the chosen provider.
    pub fn resolve(
        defaults: &LlmConfig,
        provider: Option<LlmProvider>,
        api_key: Option<String>,
        model: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self, String> {
        let provider = provider.unwrap_or(defaults.provider);
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .or_else(|| defaults.api_key_for(provider).map(str::to_string))
            .ok_or_else(|| format!("no API key configured for provider {provider}"))?;
        Ok(Self {
            provider,
            api_key,
            model: model.unwrap_or_else(|| defaults.model.clone()),
            base_url: base_url.or_else(|| defaults.base_url.clone()),
        })
    }
}

/// The provider-tagged chat client
pub enum LlmClient {
    OpenAi(openai::OpenAiChat),
    Anthropic(anthropic::AnthropicMessages),
    #[cfg(test)]
    Scripted(scripted::ScriptedClient),
}

impl LlmClient {
    pub fn new(settings: LlmSettings) -> Self {
        match settings.provider {
            LlmProvider::Openai => Self::OpenAi(openai::OpenAiChat::new(
                settings.api_key,
                settings.model,
                settings.base_url,
            )),
            LlmProvider::Anthropic => Self::Anthropic(anthropic::AnthropicMessages::new(
                settings.api_key,
                settings.model,
                settings.base_url,
            )),
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::OpenAi(c) => c.model(),
            Self::Anthropic(c) => c.model(),
            #[cfg(test)]
            Self::Scripted(c) => c.model(),
        }
    }

    /// One chat turn: the full message sequence and tool declarations in,
    /// an answer or tool invocations out.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDecl],
    ) -> Result<LlmReply, LlmError> {
        match self {
            Self::OpenAi(c) => c.complete(messages, tools).await,
            Self::Anthropic(c) => c.complete(messages, tools).await,
            #[cfg(test)]
            Self::Scripted(c) => c.complete(messages, tools).await,
        }
    }
}

#[cfg(test)]
pub mod scripted {
    //! Deterministic stand-in for provider clients in loop tests

    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Pops a pre-programmed reply per `complete` call; answers "done" when
    /// the script runs dry.
    pub struct ScriptedClient {
        replies: Mutex<VecDeque<Result<LlmReply, LlmError>>>,
        calls: Arc<AtomicU32>,
    }

    impl ScriptedClient {
        pub fn new(replies: Vec<Result<LlmReply, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Arc::new(AtomicU32::new(0)),
            }
        }

        pub fn call_counter(&self) -> Arc<AtomicU32> {
            self.calls.clone()
        }

        pub fn model(&self) -> &str {
            "scripted-model"
        }

        pub async fn complete(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolDecl],
        ) -> Result<LlmReply, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies.lock().pop_front().unwrap_or_else(|| {
                Ok(LlmReply {
                    text: "done".to_string(),
                    tool_calls: Vec::new(),
                    usage: Usage::default(),
                })
            })
        }
    }

    /// Reply that answers with text
    pub fn answer(text: &str) -> Result<LlmReply, LlmError> {
        Ok(LlmReply {
            text: text.to_string(),
            tool_calls: Vec::new(),
            usage: Usage {
                input_tokens: 100,
                output_tokens: 20,
            },
        })
    }

    /// Reply that invokes one tool
    pub fn tool_call(name: &str, args: Json) -> Result<LlmReply, LlmError> {
        Ok(LlmReply {
            text: String::new(),
            tool_calls: vec![ToolCall {
                call_id: format!("call_{name}"),
                name: name.to_string(),
                args,
            }],
            usage: Usage {
                input_tokens: 100,
                output_tokens: 30,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_resolution_prefers_request_values() {
        let defaults = LlmConfig {
            provider: LlmProvider::Openai,
            model: "gpt-4o-mini".into(),
            openai_api_key: Some("default-key".into()),
            anthropic_api_key: Some("ant-key".into()),
            base_url: None,
        };

        let settings = LlmSettings::resolve(
            &defaults,
            Some(LlmProvider::Anthropic),
            None,
            Some("claude-sonnet-4-20250514".into()),
            None,
        )
        .unwrap();
        assert_eq!(settings.provider, LlmProvider::Anthropic);
        assert_eq!(settings.api_key, "ant-key");
        assert_eq!(settings.model, "claude-sonnet-4-20250514");

        let settings = LlmSettings::resolve(&defaults, None, None, None, None).unwrap();
        assert_eq!(settings.provider, LlmProvider::Openai);
        assert_eq!(settings.model, "gpt-4o-mini");
    }

    #[test]
    fn settings_resolution_fails_without_key() {
        let defaults = LlmConfig::default();
        let err = LlmSettings::resolve(&defaults, None, None, None, None).unwrap_err();
        assert!(err.contains("no API key"));
    }

    #[test]
    fn transient_classification() {
        assert!(LlmError::RateLimited("slow down".into()).is_transient());
        assert!(
            LlmError::Api {
                status: 503,
                message: "overloaded".into()
            }
            .is_transient()
        );
        assert!(
            !LlmError::Api {
                status: 401,
                message: "bad key".into()
            }
            .is_transient()
        );
        assert!(!LlmError::BadResponse("garbage".into()).is_transient());
    }

    #[test]
    fn rate_limit_maps_to_its_own_code() {
        use crate::domain::error::ErrorCode;
        assert_eq!(
            LlmError::RateLimited("x".into()).error_code(),
            ErrorCode::LlmRateLimited
        );
        assert_eq!(
            LlmError::BadResponse("x".into()).error_code(),
            ErrorCode::LlmError
        );
    }
}
