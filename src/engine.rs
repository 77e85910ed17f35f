//! Analysis engine
//!
//! Wraps a `LanguageModel` with a per-call timeout and a bounded retry loop
//! for transport faults only. Malformed content is returned as-is; the
//! guardrail decides what to do with it.

use crate::error::AnalysisError;
use crate::llm::{DecodingParams, LanguageModel, ModelError};
use crate::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub call_timeout: Duration,
    /// Retries after the first attempt, transport faults only
    pub max_retries: u32,
    /// Base delay; doubled on each retry
    pub backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(20),
            max_retries: 2,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Raw model output plus call metadata
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub latency_ms: u64,
    pub token_count: Option<u32>,
    /// Attempts spent on this completion, including transport retries
    pub attempts: u32,
}

pub struct AnalysisEngine {
    model: Arc<dyn LanguageModel>,
    params: DecodingParams,
    config: EngineConfig,
}

impl AnalysisEngine {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        params: DecodingParams,
        config: EngineConfig,
    ) -> Self {
        Self {
            model,
            params,
            config,
        }
    }

    pub fn params(&self) -> &DecodingParams {
        &self.params
    }

    /// Obtain one completion, retrying transport faults up to the configured limit
    pub async fn complete(&self, prompt: &str) -> Result<Completion> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let call = self
                .model
                .complete(prompt, &self.params, self.config.call_timeout);

            let outcome = match tokio::time::timeout(self.config.call_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(ModelError::Timeout),
            };

            match outcome {
                Ok(reply) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    debug!(
                        model = self.model.name(),
                        attempt,
                        latency_ms,
                        tokens = ?reply.token_count,
                        "Completion received"
                    );
                    return Ok(Completion {
                        text: reply.text,
                        latency_ms,
                        token_count: reply.token_count,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_transient() && attempt <= self.config.max_retries => {
                    let delay = self.config.backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        model = self.model.name(),
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Transient model fault - retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        model = self.model.name(),
                        attempt,
                        error = %e,
                        "Model provider unavailable"
                    );
                    return Err(AnalysisError::ProviderUnavailable(format!(
                        "{} after {} attempt(s)",
                        e, attempt
                    )));
                }
            }
        }
    }
}
