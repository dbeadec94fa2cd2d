//! Groq provider using raw HTTP
//!
//! Groq serves an OpenAI-compatible chat completions API, so requests and
//! responses use the OpenAI wire shapes with tool calling.

use super::{
    CompletionRequest, CompletionResponse, ContentPart, FinishReason, Message, Provider, Role,
    ToolDefinition, Usage,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

pub struct GroqProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for GroqProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroqProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"<REDACTED>")
            .field("api_key_len", &self.api_key.len())
            .finish()
    }
}

impl GroqProvider {
    /// Create against a custom OpenAI-compatible endpoint
    pub fn with_base_url(api_key: String, base_url: String, timeout: Duration) -> Result<Self> {
        tracing::debug!(
            provider = "groq",
            base_url = %base_url,
            api_key_len = api_key.len(),
            "Creating Groq provider"
        );
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn convert_messages(messages: &[Message]) -> Vec<Value> {
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            match msg.role {
                Role::Tool => {
                    // One wire message per tool result
                    for part in &msg.content {
                        if let ContentPart::ToolResult {
                            tool_call_id,
                            content,
                        } = part
                        {
                            out.push(json!({
                                "role": "tool",
                                "tool_call_id": tool_call_id,
                                "content": content
                            }));
                        }
                    }
                }
                Role::Assistant => {
                    let text = msg.text();
                    let tool_calls: Vec<Value> = msg
                        .content
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::ToolCall {
                                id,
                                name,
                                arguments,
                            } => Some(json!({
                                "id": id,
                                "type": "function",
                                "function": {
                                    "name": name,
                                    "arguments": arguments
                                }
                            })),
                            _ => None,
                        })
                        .collect();

                    if tool_calls.is_empty() {
                        out.push(json!({"role": "assistant", "content": text}));
                    } else {
                        out.push(json!({
                            "role": "assistant",
                            "content": text,
                            "tool_calls": tool_calls
                        }));
                    }
                }
                Role::System | Role::User => {
                    let role = if msg.role == Role::System {
                        "system"
                    } else {
                        "user"
                    };
                    out.push(json!({"role": role, "content": msg.text()}));
                }
            }
        }
        out
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters
                    }
                })
            })
            .collect()
    }

    fn build_body(request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": Self::convert_messages(&request.messages),
        });
        let tools = Self::convert_tools(&request.tools);
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max) = request.max_tokens {
            body["max_tokens"] = json!(max);
        }
        body
    }

    fn parse_response(text: &str) -> Result<CompletionResponse> {
        let response: ChatResponse = serde_json::from_str(text).context(format!(
            "Failed to parse response: {}",
            text.chars().take(200).collect::<String>()
        ))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No choices"))?;

        let mut content = Vec::new();
        if let Some(text) = choice.message.content
            && !text.is_empty()
        {
            content.push(ContentPart::Text { text });
        }

        let tool_calls = choice.message.tool_calls.unwrap_or_default();
        let has_tool_calls = !tool_calls.is_empty();
        for tc in tool_calls {
            tracing::debug!(
                tool_call_id = %tc.id,
                function_name = %tc.function.name,
                "Processing Groq tool call"
            );
            content.push(ContentPart::ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            });
        }

        let finish_reason = if has_tool_calls {
            FinishReason::ToolCalls
        } else {
            match choice.finish_reason.as_deref() {
                Some("length") => FinishReason::Length,
                Some("tool_calls") => FinishReason::ToolCalls,
                Some("content_filter") => FinishReason::ContentFilter,
                _ => FinishReason::Stop,
            }
        };

        let usage = response.usage.unwrap_or_default();
        Ok(CompletionResponse {
            message: Message {
                role: Role::Assistant,
                content,
            },
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
            finish_reason,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatToolCall {
    id: String,
    function: ChatFunction,
}

#[derive(Debug, Deserialize)]
struct ChatFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
    #[serde(default)]
    total_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<Value>,
}

#[async_trait]
impl Provider for GroqProvider {
    fn name(&self) -> &str {
        "groq"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = Self::build_body(&request);
        tracing::debug!(
            model = %request.model,
            message_count = request.messages.len(),
            tool_count = request.tools.len(),
            "Sending Groq completion request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let text = response.text().await.context("Failed to read response")?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<ErrorResponse>(&text) {
                anyhow::bail!(
                    "Groq API error: {} (code: {})",
                    err.error.message,
                    err.error.code.map(|c| c.to_string()).unwrap_or_default()
                );
            }
            anyhow::bail!("Groq API error: {} {}", status, text);
        }

        Self::parse_response(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_tool_calls_round_into_wire_format() {
        let messages = vec![
            Message::system("sys"),
            Message::user("how many rows?"),
            Message {
                role: Role::Assistant,
                content: vec![ContentPart::ToolCall {
                    id: "call_1".into(),
                    name: "describe_table".into(),
                    arguments: "{}".into(),
                }],
            },
            Message::tool_result("call_1", "rows: 3"),
        ];
        let wire = GroqProvider::convert_messages(&messages);
        assert_eq!(wire.len(), 4);
        assert_eq!(wire[2]["tool_calls"][0]["function"]["name"], "describe_table");
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
    }

    #[test]
    fn body_includes_tools_and_temperature() {
        let request = CompletionRequest {
            messages: vec![Message::user("hi")],
            tools: vec![ToolDefinition {
                name: "head_rows".into(),
                description: "rows".into(),
                parameters: json!({"type": "object"}),
            }],
            model: "llama-3-3-70b-instruct".into(),
            temperature: Some(0.2),
            max_tokens: None,
        };
        let body = GroqProvider::build_body(&request);
        assert_eq!(body["tools"][0]["type"], "function");
        assert!(body.get("max_tokens").is_none());
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn parses_tool_call_response() {
        let text = r#"{
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "query_table", "arguments": "{\"limit\":1}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let response = GroqProvider::parse_response(text).unwrap();
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.usage.total_tokens, 15);
        assert!(matches!(
            &response.message.content[0],
            ContentPart::ToolCall { name, .. } if name == "query_table"
        ));
    }

    #[test]
    fn parses_text_response() {
        let text = r#"{"choices":[{"message":{"content":"3"},"finish_reason":"stop"}]}"#;
        let response = GroqProvider::parse_response(text).unwrap();
        assert_eq!(response.message.text(), "3");
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn debug_redacts_key() {
        let provider = GroqProvider::with_base_url(
            "gsk_secret".into(),
            DEFAULT_BASE_URL.into(),
            Duration::from_secs(5),
        )
        .unwrap();
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("gsk_secret"));
    }
}
