//! OpenAI-compatible chat service for text generation and tool calling.
//!
//! Minimal, non-streaming client around the chat REST API. Endpoints are
//! derived from `LlmModelConfig::endpoint`:
//! - POST {endpoint}/v1/chat/completions — chat completion (non-streaming)
//!
//! Constructor validation:
//! - `cfg.provider` must be `LlmProvider::OpenAi`
//! - `cfg.api_key` must be present
//! - `cfg.endpoint` must start with http:// or https://
//!
//! Errors are normalized via unified error types in `error_handler`.

use std::time::{Duration, Instant};

use reqwest::header;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::{
    chat::{ChatOutcome, ChatTurn, ToolCall, ToolSpec},
    config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider},
    error_handler::{AiLlmError, HttpError, Provider, ProviderError, ProviderErrorKind, make_snippet},
};

/// Thin client for an OpenAI-compatible chat API.
///
/// Constructed from a complete [`LlmModelConfig`]. Internally keeps a
/// preconfigured `reqwest::Client` (timeout and default headers).
///
/// High-level operations:
/// - [`OpenAiService::generate`] — single non-streaming chat completion
/// - [`OpenAiService::chat`]     — one chat round with optional tools
#[derive(Debug)]
pub struct OpenAiService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    url_chat: String,
}

impl OpenAiService {
    /// Creates a new [`OpenAiService`] from the given config.
    ///
    /// # Errors
    /// - `InvalidProvider` if `cfg.provider` is not OpenAI-compatible
    /// - `MissingApiKey` if `cfg.api_key` is `None`
    /// - `InvalidEndpoint` if `cfg.endpoint` is invalid
    /// - [`AiLlmError::HttpTransport`] if the HTTP client cannot be built
    pub fn new(cfg: LlmModelConfig) -> Result<Self, AiLlmError> {
        if cfg.provider != LlmProvider::OpenAi {
            return Err(
                ProviderError::new(Provider::OpenAi, ProviderErrorKind::InvalidProvider).into(),
            );
        }

        let api_key = cfg.api_key.clone().ok_or_else(|| {
            ProviderError::new(Provider::OpenAi, ProviderErrorKind::MissingApiKey)
        })?;

        let endpoint = cfg.endpoint.trim();
        if endpoint.is_empty()
            || !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            return Err(ProviderError::new(
                Provider::OpenAi,
                ProviderErrorKind::InvalidEndpoint(cfg.endpoint.clone()),
            )
            .into());
        }

        let timeout = cfg
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(120));

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e| {
                ProviderError::new(
                    Provider::OpenAi,
                    ProviderErrorKind::Decode(format!("invalid API key header: {e}")),
                )
            })?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        let base = endpoint.trim_end_matches('/').to_string();
        let url_chat = format!("{}/v1/chat/completions", base);

        info!(
            provider = %cfg.provider,
            model = %cfg.model,
            endpoint = %cfg.endpoint,
            timeout_secs = cfg.timeout_secs.unwrap_or(120),
            "OpenAiService initialized"
        );

        Ok(Self {
            client,
            cfg,
            url_chat,
        })
    }

    /// Performs a non-streaming chat completion for a plain prompt.
    ///
    /// Minimal `messages` array: optional system message plus the user
    /// prompt. Mapped options from config: `model`, `temperature`, `top_p`,
    /// `max_tokens`.
    pub async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, AiLlmError> {
        let mut turns = Vec::with_capacity(2);
        if let Some(sys) = system {
            turns.push(ChatTurn::System(sys.to_string()));
        }
        turns.push(ChatTurn::User(prompt.to_string()));

        match self.chat(&turns, &[]).await? {
            ChatOutcome::Message(text) => Ok(text),
            ChatOutcome::ToolCalls(_) => Err(ProviderError::new(
                Provider::OpenAi,
                ProviderErrorKind::Decode("unexpected tool_calls without tool definitions".into()),
            )
            .into()),
        }
    }

    /// One chat round with optional tool definitions.
    ///
    /// Returns either the model's final message or the tool calls it wants
    /// executed.
    pub async fn chat(
        &self,
        turns: &[ChatTurn],
        tools: &[ToolSpec],
    ) -> Result<ChatOutcome, AiLlmError> {
        let started = Instant::now();
        let body = ChatCompletionRequest::from_turns(&self.cfg, turns, tools);

        debug!(
            model = %self.cfg.model,
            turns = turns.len(),
            tools = tools.len(),
            "POST {}", self.url_chat
        );

        let resp = self.client.post(&self.url_chat).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let url = self.url_chat.clone();
            let text = resp.text().await.unwrap_or_default();
            let snippet = make_snippet(&text);

            error!(
                %status,
                %url,
                %snippet,
                model = %self.cfg.model,
                latency_ms = started.elapsed().as_millis(),
                "chat completions returned non-success status"
            );

            return Err(ProviderError::new(
                Provider::OpenAi,
                ProviderErrorKind::HttpStatus(HttpError {
                    status,
                    url,
                    snippet,
                }),
            )
            .into());
        }

        let out: ChatCompletionResponse = resp.json().await.map_err(|e| {
            ProviderError::new(
                Provider::OpenAi,
                ProviderErrorKind::Decode(format!(
                    "serde error: {e}; expected `choices[0].message`"
                )),
            )
        })?;

        let message = out
            .choices
            .into_iter()
            .map(|c| c.message)
            .next()
            .ok_or_else(|| ProviderError::new(Provider::OpenAi, ProviderErrorKind::EmptyChoices))?;

        info!(
            model = %self.cfg.model,
            latency_ms = started.elapsed().as_millis(),
            "chat completion completed"
        );

        if let Some(calls) = message.tool_calls.filter(|c| !c.is_empty()) {
            let calls = calls
                .into_iter()
                .map(|c| ToolCall {
                    id: c.id,
                    name: c.function.name,
                    arguments: c.function.arguments,
                })
                .collect();
            return Ok(ChatOutcome::ToolCalls(calls));
        }

        message
            .content
            .map(ChatOutcome::Message)
            .ok_or_else(|| ProviderError::new(Provider::OpenAi, ProviderErrorKind::EmptyChoices).into())
    }
}

/* ===========================================================================
HTTP payloads & options
======================================================================== */

/// Minimal request body for `/v1/chat/completions` (non-streaming).
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

impl<'a> ChatCompletionRequest<'a> {
    fn from_turns(cfg: &'a LlmModelConfig, turns: &[ChatTurn], tools: &'a [ToolSpec]) -> Self {
        let messages = turns.iter().map(WireMessage::from_turn).collect();
        let tools = tools
            .iter()
            .map(|t| WireTool {
                kind: "function",
                function: WireFunctionDef {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect();

        Self {
            model: &cfg.model,
            messages,
            tools,
            temperature: cfg.temperature,
            top_p: cfg.top_p,
            max_tokens: cfg.max_tokens,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn from_turn(turn: &ChatTurn) -> Self {
        match turn {
            ChatTurn::System(s) => Self {
                role: "system",
                content: Some(s.clone()),
                tool_calls: None,
                tool_call_id: None,
            },
            ChatTurn::User(u) => Self {
                role: "user",
                content: Some(u.clone()),
                tool_calls: None,
                tool_call_id: None,
            },
            ChatTurn::Assistant {
                content,
                tool_calls,
            } => Self {
                role: "assistant",
                content: content.clone(),
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        tool_calls
                            .iter()
                            .map(|c| WireToolCall {
                                id: c.id.clone(),
                                kind: "function".to_string(),
                                function: WireFunctionCall {
                                    name: c.name.clone(),
                                    arguments: c.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: None,
            },
            ChatTurn::Tool { call_id, content } => Self {
                role: "tool",
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: Some(call_id.clone()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
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

/// Minimal response for `/v1/chat/completions`.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Debug, Deserialize)]
struct ChatMessageOut {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}
