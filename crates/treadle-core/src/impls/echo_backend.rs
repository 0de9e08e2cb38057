//! Deterministic in-process backend.
//!
//! Replies with the prompt's words, capped at `max_tokens` words, after an
//! optional artificial latency. Good enough to drive the whole pipeline
//! without a model server.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{BackendError, GenerationParams, Usage};
use crate::ports::{Generation, GenerationBackend};

/// Offline backend: echoes the prompt back, up to `max_tokens` words.
#[derive(Debug, Clone, Default)]
pub struct EchoBackend {
    latency: Duration,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl GenerationBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, BackendError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let words: Vec<&str> = prompt
            .split_whitespace()
            .take(params.max_tokens as usize)
            .collect();
        let text = if words.is_empty() {
            // Whitespace-only prompts are rejected upstream; keep output non-empty anyway.
            prompt.to_string()
        } else {
            words.join(" ")
        };

        let usage = Usage {
            prompt_tokens: prompt.split_whitespace().count() as u32,
            completion_tokens: words.len() as u32,
        };
        Ok(Generation::new(text).with_usage(usage))
    }
}
