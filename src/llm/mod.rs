//! Language model backends
//!
//! The pipeline only sees the `LanguageModel` trait. Transport faults are
//! reported as `ModelError`; content problems are the guardrail's concern.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

pub mod gemini;
pub use gemini::GeminiModel;

/// Fixed, low-variance decoding parameters
#[derive(Debug, Clone, PartialEq)]
pub struct DecodingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub max_output_tokens: i32,
    /// Ask the backend for a JSON-only response body
    pub json_output: bool,
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.9,
            top_k: 20,
            max_output_tokens: 1024,
            json_output: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub text: String,
    pub token_count: Option<u32>,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            token_count: None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("model call timed out")]
    Timeout,

    /// Not retryable: missing key, bad request, unknown model
    #[error("model misconfigured: {0}")]
    Misconfigured(String),
}

impl ModelError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ModelError::Transport(_) | ModelError::Timeout)
    }
}

/// Trait for text completion backends
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        prompt: &str,
        params: &DecodingParams,
        timeout: Duration,
    ) -> Result<ModelReply, ModelError>;
}

/// Deterministic model for development & testing.
///
/// Replays a fixed script of replies; the last entry repeats once the
/// script runs out.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<String, ModelError>>>,
    last: Mutex<Option<Result<String, ModelError>>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<String, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(reply: impl Into<String>) -> Self {
        Self::new(vec![Ok(reply.into())])
    }

    pub fn replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        prompt: &str,
        _params: &DecodingParams,
        _timeout: Duration,
    ) -> Result<ModelReply, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        let next = self
            .script
            .lock()
            .map_err(|_| ModelError::Misconfigured("script lock poisoned".into()))?
            .pop_front();

        let mut last = self
            .last
            .lock()
            .map_err(|_| ModelError::Misconfigured("script lock poisoned".into()))?;

        let entry = match next {
            Some(entry) => {
                *last = Some(entry.clone());
                entry
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(ModelError::Misconfigured("empty script".into()))),
        };

        entry.map(ModelReply::text)
    }
}
