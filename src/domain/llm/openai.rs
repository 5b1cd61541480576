//! OpenAI-compatible chat completions wire format

use serde::Deserialize;
use serde_json::{Value as Json, json};

use super::{ChatMessage, LlmError, LlmReply, Role, Usage};
use crate::domain::tools::{ToolCall, ToolDecl};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiChat {
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
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
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

        let raw: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::BadResponse(e.to_string()))?;
        parse_response(raw)
    }
}

/// Request body; tool declarations ride along as function definitions
fn build_request(model: &str, messages: &[ChatMessage], tools: &[ToolDecl]) -> Json {
    let messages: Vec<Json> = messages.iter().map(encode_message).collect();
    let tools: Vec<Json> = tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect();

    json!({
        "model": model,
        "messages": messages,
        "tools": tools,
        "temperature": 0,
    })
}

fn encode_message(message: &ChatMessage) -> Json {
    match message.role {
        Role::System => json!({"role": "system", "content": message.content}),
        Role::User => json!({"role": "user", "content": message.content}),
        Role::Assistant => {
            let mut encoded = json!({"role": "assistant", "content": message.content});
            if !message.tool_calls.is_empty() {
                encoded["tool_calls"] = Json::Array(
                    message
                        .tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.call_id,
                                "type": "function",
                                "function": {
                                    "name": c.name,
                                    "arguments": c.args.to_string(),
                                }
                            })
                        })
                        .collect(),
                );
            }
            encoded
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content,
        }),
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    /// JSON-encoded argument object
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn parse_response(raw: ChatResponse) -> Result<LlmReply, LlmError> {
    let choice = raw
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::BadResponse("response carried no choices".into()))?;

    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .into_iter()
        .map(|c| {
            // Invalid argument JSON flows through as null and fails argument
            // validation downstream, where the model can correct it.
            let args = serde_json::from_str(&c.function.arguments).unwrap_or(Json::Null);
            ToolCall {
                call_id: c.id,
                name: c.function.name,
                args,
            }
        })
        .collect();

    let usage = raw
        .usage
        .map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(LlmReply {
        text: choice.message.content.unwrap_or_default(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tools::declarations;

    #[test]
    fn request_carries_tools_and_zero_temperature() {
        let messages = vec![
            ChatMessage::system("be useful"),
            ChatMessage::user("total returns?"),
        ];
        let body = build_request("gpt-4o-mini", &messages, declarations());

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["temperature"], 0);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["tools"].as_array().unwrap().len(), 6);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][3]["function"]["name"], "run_query");
    }

    #[test]
    fn assistant_tool_calls_round_trip_as_strings() {
        let call = ToolCall {
            call_id: "call_1".into(),
            name: "run_query".into(),
            args: json!({"dataset_id": "ds_1"}),
        };
        let encoded = encode_message(&ChatMessage::assistant("", vec![call]));
        assert_eq!(
            encoded["tool_calls"][0]["function"]["arguments"],
            "{\"dataset_id\":\"ds_1\"}"
        );
    }

    #[test]
    fn tool_result_message_carries_call_id() {
        let encoded = encode_message(&ChatMessage::tool_result("call_9", &json!({"rows": []})));
        assert_eq!(encoded["role"], "tool");
        assert_eq!(encoded["tool_call_id"], "call_9");
    }

    #[test]
    fn parses_tool_call_response() {
        let raw: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {
                            "name": "get_schema",
                            "arguments": "{\"dataset_id\": \"ds_1\"}"
                        }
                    }]
                }
            }],
            "usage": {"prompt_tokens": 320, "completion_tokens": 18}
        }))
        .unwrap();

        let reply = parse_response(raw).unwrap();
        assert!(!reply.is_answer());
        assert_eq!(reply.tool_calls[0].name, "get_schema");
        assert_eq!(reply.tool_calls[0].args["dataset_id"], "ds_1");
        assert_eq!(reply.usage.input_tokens, 320);
        assert_eq!(reply.usage.output_tokens, 18);
    }

    #[test]
    fn parses_terminal_answer() {
        let raw: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "Total returns: 22"}}],
            "usage": {"prompt_tokens": 500, "completion_tokens": 10}
        }))
        .unwrap();
        let reply = parse_response(raw).unwrap();
        assert!(reply.is_answer());
        assert_eq!(reply.text, "Total returns: 22");
    }

    #[test]
    fn invalid_argument_json_degrades_to_null() {
        let raw: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "c",
                        "function": {"name": "run_query", "arguments": "{not json"}
                    }]
                }
            }]
        }))
        .unwrap();
        let reply = parse_response(raw).unwrap();
        assert_eq!(reply.tool_calls[0].args, Json::Null);
    }

    #[test]
    fn empty_choices_is_a_bad_response() {
        let raw: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            parse_response(raw),
            Err(LlmError::BadResponse(_))
        ));
    }
}
