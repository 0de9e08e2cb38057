//! Ollama HTTP backend (`POST {base_url}/api/generate`, non-streaming).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::domain::{BackendError, GenerationParams, Usage};
use crate::ports::{Generation, GenerationBackend};

pub const CONNECTION_ERROR_KIND: &str = "ConnectionError";
pub const HTTP_ERROR_KIND: &str = "HttpError";
pub const REQUEST_TIMEOUT_KIND: &str = "BackendTimeout";
pub const INVALID_RESPONSE_KIND: &str = "InvalidResponse";
pub const REQUEST_ERROR_KIND: &str = "RequestError";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    /// Reasoning models put their output here and leave `response` empty.
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

impl GenerateResponse {
    fn into_generation(self) -> Generation {
        let text = match self.thinking {
            Some(thinking) if self.response.is_empty() => thinking,
            _ => self.response,
        };
        let generation = Generation::new(text);
        match (self.prompt_eval_count, self.eval_count) {
            (Some(prompt_tokens), Some(completion_tokens)) => generation.with_usage(Usage {
                prompt_tokens,
                completion_tokens,
            }),
            _ => generation,
        }
    }
}

/// Client for an Ollama server's non-streaming generate endpoint.
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    /// `request_timeout` bounds the HTTP call itself; the worker deadline
    /// still applies on top of it.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::new(REQUEST_ERROR_KIND, e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    /// Model name sent with every request.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn classify(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::new(REQUEST_TIMEOUT_KIND, "Ollama request timed out")
        } else if err.is_connect() {
            BackendError::new(
                CONNECTION_ERROR_KIND,
                format!("cannot connect to Ollama at {}", self.base_url),
            )
        } else if err.is_decode() {
            BackendError::new(INVALID_RESPONSE_KIND, "malformed Ollama response")
        } else {
            BackendError::new(REQUEST_ERROR_KIND, "Ollama request failed")
        }
        .with_detail(err.to_string())
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, BackendError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: params.max_tokens,
                temperature: params.temperature,
                top_p: params.top_p,
            },
        };

        tracing::debug!(url = %self.endpoint(), model = %self.model, "calling Ollama");
        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::new(
                HTTP_ERROR_KIND,
                format!("Ollama API error: {}", status.as_u16()),
            )
            .with_detail(text));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| self.classify(e))?;
        Ok(parsed.into_generation())
    }
}
