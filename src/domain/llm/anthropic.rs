//! Anthropic messages wire format

use serde::Deserialize;
use serde_json::{Value as Json, json};

use super::{ChatMessage, LlmError, LlmReply, Role, Usage};
use crate::domain::tools::{ToolCall, ToolDecl};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicMessages {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicMessages {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDecl],
    ) -> Result<LlmReply, LlmError> {
        let body = build_request(&self.model, messages, tools);
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::RateLimited(truncate(&message)));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: truncate(&message),
            });
        }

        let raw: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::BadResponse(e.to_string()))?;
        parse_response(raw)
    }
}

/// Request body: the system prompt rides in its own field, tool results
/// become `tool_result` blocks inside user turns, and consecutive tool
/// messages coalesce into one user turn to keep roles alternating.
fn build_request(model: &str, messages: &[ChatMessage], tools: &[ToolDecl]) -> Json {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let mut encoded: Vec<Json> = Vec::new();
    let mut pending_results: Vec<Json> = Vec::new();

    let flush_results = |pending: &mut Vec<Json>, encoded: &mut Vec<Json>| {
        if !pending.is_empty() {
            encoded.push(json!({"role": "user", "content": std::mem::take(pending)}));
        }
    };

    for message in messages {
        match message.role {
            Role::System => {}
            Role::User => {
                flush_results(&mut pending_results, &mut encoded);
                encoded.push(json!({
                    "role": "user",
                    "content": [{"type": "text", "text": message.content}],
                }));
            }
            Role::Assistant => {
                flush_results(&mut pending_results, &mut encoded);
                let mut blocks: Vec<Json> = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": message.content}));
                }
                for call in &message.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.call_id,
                        "name": call.name,
                        "input": call.args,
                    }));
                }
                encoded.push(json!({"role": "assistant", "content": blocks}));
            }
            Role::Tool => {
                pending_results.push(json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id,
                    "content": message.content,
                }));
            }
        }
    }
    flush_results(&mut pending_results, &mut encoded);

    let tools: Vec<Json> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters,
            })
        })
        .collect();

    json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "system": system.join("\n\n"),
        "messages": encoded,
        "tools": tools,
    })
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Json,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn parse_response(raw: MessagesResponse) -> Result<LlmReply, LlmError> {
    if raw.content.is_empty() {
        return Err(LlmError::BadResponse("response carried no content".into()));
    }

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in raw.content {
        match block {
            ContentBlock::Text { text: t } => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&t);
            }
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    call_id: id,
                    name,
                    args: input,
                });
            }
            ContentBlock::Other => {}
        }
    }

    let usage = raw
        .usage
        .map(|u| Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        })
        .unwrap_or_default();

    Ok(LlmReply {
        text,
        tool_calls,
        usage,
    })
}

fn truncate(message: &str) -> String {
    const MAX: usize = 300;
    if message.len() <= MAX {
        message.to_string()
    } else {
        let mut end = MAX;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &message[..end])
    }
}
