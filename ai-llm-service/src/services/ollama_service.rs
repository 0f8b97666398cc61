//! Lightweight Ollama service for text generation.
//!
//! Thin client for the local Ollama API:
//! - `POST {endpoint}/api/generate` — synchronous text generation (`stream=false`)
//!
//! Uses the universal [`LlmModelConfig`] and ensures that the selected
//! provider is [`LlmProvider::Ollama`]. Errors are normalized via the
//! unified types in `error_handler`.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{
    config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider},
    error_handler::{AiLlmError, HttpError, Provider, ProviderError, ProviderErrorKind, make_snippet},
};

/// Thin client for Ollama.
///
/// Initialized with a full [`LlmModelConfig`]. Reuses an HTTP client with a
/// configurable timeout.
#[derive(Debug)]
pub struct OllamaService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    url_generate: String,
}

impl OllamaService {
    /// Creates a new [`OllamaService`] from the given config.
    ///
    /// # Errors
    /// - `InvalidProvider` if `cfg.provider` is not Ollama
    /// - `InvalidEndpoint` if `cfg.endpoint` is empty or not http(s)
    /// - [`AiLlmError::HttpTransport`] if the HTTP client cannot be built
    pub fn new(cfg: LlmModelConfig) -> Result<Self, AiLlmError> {
        if cfg.provider != LlmProvider::Ollama {
            return Err(
                ProviderError::new(Provider::Ollama, ProviderErrorKind::InvalidProvider).into(),
            );
        }

        let endpoint = cfg.endpoint.trim();
        if endpoint.is_empty()
            || !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            return Err(ProviderError::new(
                Provider::Ollama,
                ProviderErrorKind::InvalidEndpoint(cfg.endpoint.clone()),
            )
            .into());
        }

        let timeout = cfg
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(120));

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let url_generate = format!("{}/api/generate", endpoint.trim_end_matches('/'));

        info!(
            provider = %cfg.provider,
            model = %cfg.model,
            endpoint = %cfg.endpoint,
            "OllamaService initialized"
        );

        Ok(Self {
            client,
            cfg,
            url_generate,
        })
    }

    /// Performs a non-streaming generation request (`/api/generate`).
    ///
    /// A system message, when given, is prepended to the prompt since the
    /// generate endpoint takes a single string.
    pub async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, AiLlmError> {
        let started = Instant::now();

        let full_prompt = match system {
            Some(sys) => format!("{sys}\n\n{prompt}"),
            None => prompt.to_string(),
        };

        let body = GenerateRequest {
            model: &self.cfg.model,
            prompt: full_prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.cfg.temperature,
                top_p: self.cfg.top_p,
                num_predict: self.cfg.max_tokens,
            },
        };

        debug!(
            model = %self.cfg.model,
            prompt_len = prompt.len(),
            "POST {}", self.url_generate
        );

        let resp = self
            .client
            .post(&self.url_generate)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let url = self.url_generate.clone();
            let text = resp.text().await.unwrap_or_default();
            let snippet = make_snippet(&text);

            error!(
                %status,
                %url,
                %snippet,
                model = %self.cfg.model,
                latency_ms = started.elapsed().as_millis(),
                "Ollama /api/generate returned non-success status"
            );

            return Err(ProviderError::new(
                Provider::Ollama,
                ProviderErrorKind::HttpStatus(HttpError {
                    status,
                    url,
                    snippet,
                }),
            )
            .into());
        }

        let out: GenerateResponse = resp.json().await.map_err(|e| {
            ProviderError::new(
                Provider::Ollama,
                ProviderErrorKind::Decode(format!("serde error: {e}; expected `response`")),
            )
        })?;

        info!(
            model = %self.cfg.model,
            latency_ms = started.elapsed().as_millis(),
            "generation completed"
        );

        Ok(out.response)
    }
}

/* ===========================================================================
HTTP payloads
======================================================================== */

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}
