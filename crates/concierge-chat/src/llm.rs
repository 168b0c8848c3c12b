//! Language-model boundary.
//!
//! [`CompletionService`] is what the orchestrator talks to. [`OpenAiClient`]
//! implements it against any OpenAI-compatible `/chat/completions` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error};

use concierge_action::intent::tool::ToolSpec;
use concierge_core::config::LlmConfig;

use crate::error::LlmError;
use crate::types::Usage;

/// Message in the model's own conversation format.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelMessage {
    User(String),
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    /// Result of one tool call, sent back for the reply pass.
    Tool { call_id: String, content: String },
}

/// A structured invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON argument object, as text.
    pub arguments: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub response_id: Option<String>,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// One completion. An empty `tools` slice asks for plain text.
    /// `previous_response_id` references the last response of the same
    /// conversation, when there is one to resume.
    async fn complete(
        &self,
        system: &str,
        messages: &[ModelMessage],
        tools: &[ToolSpec],
        previous_response_id: Option<&str>,
    ) -> Result<Completion, LlmError>;
}

/// Client for OpenAI-compatible chat completion APIs.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    chain_responses: bool,
}

impl OpenAiClient {
    /// Build from config, reading the API key from `api_key_env`.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        if !config.enabled {
            return Err(LlmError::NotConfigured("llm.enabled is false".to_string()));
        }
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            LlmError::NotConfigured(format!("environment variable {} is not set", config.api_key_env))
        })?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            chain_responses: config.chain_responses,
        })
    }

    fn request_body(
        &self,
        system: &str,
        messages: &[ModelMessage],
        tools: &[ToolSpec],
        previous_response_id: Option<&str>,
    ) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": format_messages(system, messages),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = format_tools(tools);
            body["tool_choice"] = json!("auto");
        }
        if let (true, Some(previous)) = (self.chain_responses, previous_response_id) {
            body["previous_response_id"] = json!(previous);
        }
        body
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn complete(
        &self,
        system: &str,
        messages: &[ModelMessage],
        tools: &[ToolSpec],
        previous_response_id: Option<&str>,
    ) -> Result<Completion, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(system, messages, tools, previous_response_id);
        debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            resumed = previous_response_id.is_some(),
            "Model request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message: String = text.chars().take(300).collect();
            error!(status = status.as_u16(), body = %message, "Model service error");
            return Err(LlmError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;
        parse_completion(&value)
    }
}

fn format_messages(system: &str, messages: &[ModelMessage]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(json!({ "role": "system", "content": system }));
    for msg in messages {
        out.push(match msg {
            ModelMessage::User(text) => json!({ "role": "user", "content": text }),
            ModelMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut m = json!({ "role": "assistant", "content": content });
                if !tool_calls.is_empty() {
                    m["tool_calls"] = tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": { "name": tc.name, "arguments": tc.arguments },
                            })
                        })
                        .collect();
                }
                m
            }
            ModelMessage::Tool { call_id, content } => json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": content,
            }),
        });
    }
    out
}

fn format_tools(tools: &[ToolSpec]) -> Value {
    tools
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
        .collect()
}

fn parse_completion(value: &Value) -> Result<Completion, LlmError> {
    let message = value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| LlmError::Decode("response has no choices".to_string()))?;

    let text = message["content"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for (index, call) in calls.iter().enumerate() {
            let name = call["function"]["name"]
                .as_str()
                .ok_or_else(|| LlmError::Decode("tool call without a name".to_string()))?;
            // Some servers send arguments as an object instead of a string.
            let arguments = match &call["function"]["arguments"] {
                Value::String(s) => s.clone(),
                Value::Null => "{}".to_string(),
                other => other.to_string(),
            };
            // The reply pass must echo a non-empty id back to the server.
            let id = match call["id"].as_str() {
                Some(id) if !id.trim().is_empty() => id.to_string(),
                _ => {
                    debug!(index, tool = name, "Tool call without id, synthesizing one");
                    format!("call_{}", index)
                }
            };
            tool_calls.push(ToolCall {
                id,
                name: name.to_string(),
                arguments,
            });
        }
    }

    let u = &value["usage"];
    let usage = Usage {
        prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
        total_tokens: u["total_tokens"].as_u64().unwrap_or(0),
    };

    Ok(Completion {
        text,
        tool_calls,
        usage,
        response_id: value["id"].as_str().map(str::to_string),
    })
}
