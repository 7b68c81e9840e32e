//! OpenAI-compatible HTTP backend.
//!
//! Speaks the `/chat/completions` dialect shared by OpenAI, OpenRouter,
//! vLLM, Ollama and most gateways, including tool calling and SSE
//! streaming. One instance is one ring member; fallback across providers is
//! a gateway concern.

use crate::backend::ChatBackend;
use crate::error::{LlmError, Result};
use crate::types::{ChatRequest, ChatResponse, ChatStream, StreamChunk, Usage};
use async_trait::async_trait;
use cadence_core::{Message, MessageRole, ToolCall, ToolDescriptor};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Connection settings for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,

    /// Bearer token.
    pub api_key: String,

    /// Model name sent in requests and matched in the ring.
    pub model: String,

    /// Optional organization header.
    pub organization: Option<String>,

    /// Client-level timeout; the gateway applies the tighter per-call one.
    pub timeout: Duration,
}

impl OpenAiConfig {
    /// Settings for a hosted endpoint.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            organization: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// OpenAI-compatible [`ChatBackend`].
#[derive(Clone)]
pub struct OpenAiCompatibleBackend {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiCompatibleBackend {
    /// Create a backend; fails if the HTTP client cannot be constructed.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::InvalidRequest(format!("http client: {e}")))?;
        Ok(Self { config, client })
    }

    fn convert_message(msg: &Message) -> WireMessage {
        let role = match msg.role {
            MessageRole::System => "system",
            MessageRole::Human => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        kind: "function".to_string(),
                        function: WireFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect(),
            )
        };
        WireMessage {
            role: role.to_string(),
            content: Some(msg.content.clone()),
            name: msg.name.clone(),
            tool_call_id: msg.tool_call_id.clone(),
            tool_calls,
        }
    }

    fn convert_tools(tools: &[ToolDescriptor]) -> Option<Vec<WireTool>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .iter()
                .map(|tool| WireTool {
                    kind: "function".to_string(),
                    function: WireFunction {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
        )
    }

    fn wire_request(&self, request: &ChatRequest, stream: bool) -> WireRequest {
        WireRequest {
            model: self.config.model.clone(),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            tools: Self::convert_tools(&request.tools),
            temperature: request.params.temperature,
            max_tokens: request.params.max_tokens,
            stop: if request.params.stop.is_empty() {
                None
            } else {
                Some(request.params.stop.clone())
            },
            stream,
        }
    }

    async fn send(&self, body: &WireRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let mut req = self
            .client
            .post(&url)
            .json(body)
            .header("Authorization", format!("Bearer {}", self.config.api_key));
        if let Some(org) = &self.config.organization {
            req = req.header("OpenAI-Organization", org);
        }

        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 | 403 => LlmError::Auth(detail),
            429 => LlmError::RateLimited(detail),
            400 | 404 | 422 => LlmError::InvalidRequest(detail),
            _ => LlmError::Upstream(format!("{status}: {detail}")),
        })
    }

    fn parse_tool_calls(calls: Vec<WireToolCall>) -> Result<Vec<ToolCall>> {
        calls
            .into_iter()
            .map(|call| {
                let arguments: Value = if call.function.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&call.function.arguments).map_err(|e| {
                        LlmError::InvalidResponse(format!("tool arguments: {e}"))
                    })?
                };
                Ok(ToolCall::with_id(call.id, call.function.name, arguments))
            })
            .collect()
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatibleBackend {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = self.wire_request(&request, false);
        let response = self.send(&body).await?;
        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices".into()))?;

        let content = choice.message.content.unwrap_or_default();
        let tool_calls = Self::parse_tool_calls(choice.message.tool_calls.unwrap_or_default())?;
        let message = if tool_calls.is_empty() {
            Message::assistant(content)
        } else {
            Message::assistant_with_tool_calls(content, tool_calls)
        };

        let mut chat_response = ChatResponse::new(wire.model, message);
        chat_response.usage = wire.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        });
        if let Some(reason) = choice.finish_reason {
            chat_response
                .metadata
                .insert("finish_reason".to_string(), Value::String(reason));
        }
        Ok(chat_response)
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        let body = self.wire_request(&request, true);
        let response = self.send(&body).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(LlmError::from(e));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE frames are newline-delimited `data:` lines.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<WireStreamEvent>(payload) {
                        Ok(event) => {
                            if let Some(choice) = event.choices.into_iter().next() {
                                let done = choice.finish_reason.is_some();
                                yield Ok(StreamChunk {
                                    content: choice.delta.content.unwrap_or_default(),
                                    finish_reason: choice.finish_reason,
                                });
                                if done {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            yield Err(LlmError::InvalidResponse(e.to_string()));
                            return;
                        }
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

// Wire format.

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    model: String,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireStreamEvent {
    choices: Vec<WireStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_request_includes_tools() {
        let backend = OpenAiCompatibleBackend::new(OpenAiConfig::new(
            "http://localhost:1234/v1",
            "key",
            "m0",
        ))
        .unwrap();

        let request = ChatRequest::new(vec![Message::human("hi")]).with_tools(vec![
            ToolDescriptor {
                name: "web_search".into(),
                description: "search".into(),
                parameters: json!({"type": "object"}),
            },
        ]);
        let wire = backend.wire_request(&request, false);
        let tools = wire.tools.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].function.name, "web_search");
    }

    #[test]
    fn test_tool_call_arguments_parse_from_string() {
        let calls = vec![WireToolCall {
            id: "call_1".into(),
            kind: "function".into(),
            function: WireFunctionCall {
                name: "web_search".into(),
                arguments: r#"{"q": "X"}"#.into(),
            },
        }];
        let parsed = OpenAiCompatibleBackend::parse_tool_calls(calls).unwrap();
        assert_eq!(parsed[0].arguments, json!({"q": "X"}));
    }

    #[test]
    fn test_empty_arguments_become_empty_object() {
        let calls = vec![WireToolCall {
            id: "call_1".into(),
            kind: "function".into(),
            function: WireFunctionCall {
                name: "noop".into(),
                arguments: "".into(),
            },
        }];
        let parsed = OpenAiCompatibleBackend::parse_tool_calls(calls).unwrap();
        assert_eq!(parsed[0].arguments, json!({}));
    }
}
