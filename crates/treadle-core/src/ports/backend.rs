//! GenerationBackend port - the model that turns a prompt into text.
//!
//! # Implementations
//! - **EchoBackend**: deterministic, in-process (tests, demos)
//! - **OllamaBackend**: HTTP call to an Ollama server

use async_trait::async_trait;

use crate::domain::{BackendError, GenerationParams, Usage};

/// Text produced by a backend, with token counts when it reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub usage: Option<Usage>,
}

impl Generation {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }

    /// Token counts as reported by the model.
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Any model behind the worker.
///
/// Called from a spawned task so the worker can enforce its deadline; the
/// backend itself does not need to know about time limits.
#[async_trait]
pub trait GenerationBackend: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, BackendError>;
}
