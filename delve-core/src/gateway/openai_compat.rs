//! OpenAI-compatible completion gateway.
//!
//! Talks to any endpoint that follows the OpenAI chat completions format.
//! When search is enabled the request declares a `google_search` function tool;
//! proxies that execute the search themselves answer with a tool call first,
//! which is acknowledged with placeholder tool results in a second request.

use crate::config::{GatewayConfig, RetryConfig};
use crate::error::{ConfigError, LlmError};
use crate::gateway::{CompletionGateway, with_retry};
use crate::types::{CompletionOutcome, CompletionRequest, Message, Role};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the search tool declared to the model.
pub const SEARCH_TOOL_NAME: &str = "google_search";

/// A tool call parsed from an assistant message.
#[derive(Debug, Clone, PartialEq)]
struct ToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// The parts of the first choice the gateway cares about.
#[derive(Debug)]
struct ChoiceReply {
    raw_message: Value,
    content: Option<String>,
    tool_calls: Vec<ToolCall>,
}

/// OpenAI-compatible completion gateway.
pub struct OpenAiCompatibleGateway {
    client: Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
    retry: RetryConfig,
}

impl OpenAiCompatibleGateway {
    /// Create a new gateway from configuration.
    ///
    /// Resolves the API key from `config.api_key` or the `config.api_key_env` variable.
    pub fn new(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let api_key = config.resolve_api_key()?;
        Self::new_with_key(config, api_key)
    }

    /// Create a new gateway with an explicitly provided API key.
    pub fn new_with_key(config: &GatewayConfig, api_key: String) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_secs: config.timeout_secs,
            retry: config.retry.clone(),
        })
    }

    /// Convert internal messages to OpenAI JSON format.
    fn messages_to_json(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                };
                json!({
                    "role": role,
                    "content": msg.content,
                })
            })
            .collect()
    }

    /// The search tool definition in OpenAI format.
    fn search_tool() -> Value {
        json!({
            "type": "function",
            "function": {
                "name": SEARCH_TOOL_NAME,
                "description": "Performs a Google search and returns results.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "The search query." }
                    },
                    "required": ["query"]
                }
            }
        })
    }

    fn request_body(request: &CompletionRequest, messages: Vec<Value>, with_tools: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if with_tools {
            body["tools"] = json!([Self::search_tool()]);
            body["tool_choice"] = json!("auto");
        }
        body
    }

    /// Extract content and tool calls from the first choice of a response body.
    fn parse_choice(body: &Value) -> Result<ChoiceReply, LlmError> {
        let choice =
            body.get("choices")
                .and_then(|c| c.get(0))
                .ok_or_else(|| LlmError::ResponseParse {
                    message: "No choices in response".to_string(),
                })?;

        let message = choice
            .get("message")
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No message in choice".to_string(),
            })?;

        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let tool_calls = message
            .get("tool_calls")
            .and_then(|t| t.as_array())
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|tc| {
                        let func = tc.get("function")?;
                        Some(ToolCall {
                            id: tc
                                .get("id")
                                .and_then(|i| i.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            name: func.get("name")?.as_str()?.to_string(),
                            arguments: func
                                .get("arguments")
                                .and_then(|a| a.as_str())
                                .unwrap_or("{}")
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ChoiceReply {
            raw_message: message.clone(),
            content,
            tool_calls,
        })
    }

    /// Turn an unresolved tool call into the outcome handed back to the caller.
    fn tool_invocation(call: &ToolCall) -> CompletionOutcome {
        let arguments = serde_json::from_str(&call.arguments)
            .unwrap_or_else(|_| json!({ "raw": call.arguments }));
        CompletionOutcome::tool_invocation(call.name.clone(), arguments)
    }

    /// Placeholder tool results acknowledging each call, so the proxy can finish the turn.
    fn placeholder_results(calls: &[ToolCall]) -> Vec<Value> {
        calls
            .iter()
            .map(|call| {
                json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "name": call.name,
                    "content": format!(
                        "[Tool call processed for {} with args: {}]",
                        call.name, call.arguments
                    ),
                })
            })
            .collect()
    }

    /// POST a body and return the parsed JSON response.
    async fn post(&self, body: &Value) -> Result<Value, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
            message: format!("Invalid JSON: {}", e),
        })
    }

    /// One complete invocation: first call, plus the acknowledgement call when needed.
    async fn invoke_once(&self, request: &CompletionRequest) -> Result<CompletionOutcome, LlmError> {
        let messages = Self::messages_to_json(&request.messages);
        debug!(
            model = %request.model,
            messages = messages.len(),
            search = request.enable_search,
            "Sending completion request"
        );

        let first_body = Self::request_body(request, messages.clone(), request.enable_search);
        let first = Self::parse_choice(&self.post(&first_body).await?)?;

        if first.tool_calls.is_empty() {
            return first
                .content
                .map(CompletionOutcome::Content)
                .ok_or_else(|| LlmError::ResponseParse {
                    message: "Response has neither content nor tool calls".to_string(),
                });
        }

        if !request.enable_search {
            warn!(
                model = %request.model,
                tool = %first.tool_calls[0].name,
                "Model requested a tool although search was disabled"
            );
            return Ok(Self::tool_invocation(&first.tool_calls[0]));
        }

        info!(
            model = %request.model,
            calls = first.tool_calls.len(),
            "Acknowledging search tool calls with a second request"
        );
        let mut second_messages = messages;
        second_messages.push(first.raw_message.clone());
        second_messages.extend(Self::placeholder_results(&first.tool_calls));

        let second_body = Self::request_body(request, second_messages, false);
        let second = Self::parse_choice(&self.post(&second_body).await?)?;

        if let Some(content) = second.content {
            return Ok(CompletionOutcome::Content(content));
        }
        if let Some(call) = second.tool_calls.first() {
            warn!(model = %request.model, tool = %call.name, "Tool call left unresolved");
            return Ok(Self::tool_invocation(call));
        }
        Err(LlmError::ResponseParse {
            message: "Response after tool acknowledgement has no content".to_string(),
        })
    }

    fn map_transport_error(&self, err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else if err.is_connect() {
            LlmError::Connection {
                message: err.to_string(),
            }
        } else {
            LlmError::ApiRequest {
                message: format!("Request failed: {}", err),
            }
        }
    }

    /// Map an HTTP status code to the appropriate LlmError.
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            401 => {
                debug!(body = %body, "Authentication failed (401)");
                LlmError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                // "Rate limit reached ... try again in 7s"
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ")
                            .last()
                            .and_then(|s| s.trim_end_matches('s').parse::<u64>().ok())
                    })
                    .unwrap_or(5);
                LlmError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            status if status >= 500 => LlmError::ApiRequest {
                message: format!("Server error ({}): {}", status, body),
            },
            _ => {
                let detail = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| v.get("error")?.get("message")?.as_str().map(String::from))
                    .unwrap_or_else(|| body.to_string());
                LlmError::ApiRequest {
                    message: format!("HTTP {}: {}", status, detail),
                }
            }
        }
    }
}

#[async_trait]
impl CompletionGateway for OpenAiCompatibleGateway {
    async fn invoke(&self, request: CompletionRequest) -> Result<CompletionOutcome, LlmError> {
        with_retry(&self.retry, || self.invoke_once(&request)).await
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}
