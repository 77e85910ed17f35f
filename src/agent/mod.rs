//! Research agent - runs the per-request pipeline
//!
//! QUERY → CATEGORIZE → ASSEMBLE → COMPOSE → COMPLETE → VALIDATE → RESPOND
//!
//! Every path ends in an `AnalyzeResponse` of the same shape. Only an
//! invalid question is returned as an error, before any stage runs.

use crate::classifier::{
    categorize_or_general, Categorizer, ClassifierStrategy, KeywordCategorizer, ModelCategorizer,
};
use crate::config::Settings;
use crate::context::ContextAssembler;
use crate::engine::AnalysisEngine;
use crate::error::AnalysisError;
use crate::guardrail::{EngineReviser, Guardrail, GuardrailReport};
use crate::llm::{GeminiModel, LanguageModel};
use crate::models::{
    AnalysisResult, AnalysisStatus, AnalyzeResponse, Category, Fact, FailureKind, Query,
    ResponseMeta, ValidationOutcome,
};
use crate::moderation::KeywordModerator;
use crate::prompt::PromptComposer;
use crate::providers::{
    FinancialApiClient, HashingEmbedder, HttpNewsProvider, HttpStockProvider, InMemoryRetriever,
};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

const DEFAULT_CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_secs(45);

/// What one pipeline run produced, before response metadata is attached
struct PipelineOutcome {
    status: AnalysisStatus,
    analysis: AnalysisResult,
    failure: Option<FailureKind>,
    facts: Vec<Fact>,
    attempts: u32,
    fingerprint: Option<String>,
}

impl PipelineOutcome {
    fn unavailable(failure: FailureKind) -> Self {
        Self {
            status: AnalysisStatus::Unavailable,
            analysis: AnalysisResult::fallback(),
            failure: Some(failure),
            facts: Vec::new(),
            attempts: 0,
            fingerprint: None,
        }
    }

    fn from_report(report: GuardrailReport, facts: Vec<Fact>, fingerprint: String) -> Self {
        let (status, failure) = match &report.outcome {
            ValidationOutcome::Accepted => (AnalysisStatus::Accepted, None),
            ValidationOutcome::Corrected { .. } => (AnalysisStatus::Corrected, None),
            ValidationOutcome::Rejected { reason } => {
                (AnalysisStatus::Rejected, Some(FailureKind::from(*reason)))
            }
        };

        Self {
            status,
            analysis: report.result,
            failure,
            facts,
            attempts: report.attempts,
            fingerprint: Some(fingerprint),
        }
    }
}

/// Coordinates categorizer, assemblers, composer, engine and guardrail
pub struct ResearchAgent {
    categorizer: Arc<dyn Categorizer>,
    assembler: ContextAssembler,
    composer: PromptComposer,
    engine: AnalysisEngine,
    guardrail: Guardrail,
    classifier_timeout: Duration,
    request_deadline: Duration,
}

impl ResearchAgent {
    pub fn new(
        categorizer: Arc<dyn Categorizer>,
        assembler: ContextAssembler,
        composer: PromptComposer,
        engine: AnalysisEngine,
        guardrail: Guardrail,
    ) -> Self {
        Self {
            categorizer,
            assembler,
            composer,
            engine,
            guardrail,
            classifier_timeout: DEFAULT_CLASSIFIER_TIMEOUT,
            request_deadline: DEFAULT_REQUEST_DEADLINE,
        }
    }

    pub fn with_classifier_timeout(mut self, timeout: Duration) -> Self {
        self.classifier_timeout = timeout;
        self
    }

    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = deadline;
        self
    }

    /// Wire the production pipeline from settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let model: Arc<dyn LanguageModel> = Arc::new(GeminiModel::new(
            settings.gemini_api_key.clone(),
            &settings.gemini_model,
        )?);

        let categorizer: Arc<dyn Categorizer> = match settings.classifier_strategy {
            ClassifierStrategy::Keyword => Arc::new(KeywordCategorizer::with_precedence(
                settings.category_precedence.clone(),
            )),
            ClassifierStrategy::Model => {
                Arc::new(ModelCategorizer::new(model.clone(), settings.classifier_timeout))
            }
        };

        let mut assembler = ContextAssembler::new(settings.assembler_config());

        match &settings.financial_api_base_url {
            Some(base_url) => {
                let api = FinancialApiClient::new(base_url, settings.assembler_timeout)?;
                assembler = assembler
                    .with_stock(Arc::new(HttpStockProvider::new(api.clone())))
                    .with_news(Arc::new(HttpNewsProvider::new(api)));
                info!(%base_url, "Financial data providers configured");
            }
            None => warn!("FINANCIAL_API_BASE_URL not set - stock and news context unavailable"),
        }

        if let Some(path) = &settings.knowledge_base_path {
            let embedder = Arc::new(HashingEmbedder::default());
            let retriever = InMemoryRetriever::load(path, embedder.as_ref())?;
            info!(path = %path.display(), passages = retriever.len(), "Knowledge base loaded");
            assembler = assembler.with_retriever(Arc::new(retriever), embedder);
        }

        let engine =
            AnalysisEngine::new(model, settings.decoding_params(), settings.engine_config());
        let guardrail =
            Guardrail::new(settings.guardrail_config(), Arc::new(KeywordModerator::new()));

        Ok(Self::new(
            categorizer,
            assembler,
            PromptComposer::new(settings.max_prompt_chars),
            engine,
            guardrail,
        )
        .with_classifier_timeout(settings.classifier_timeout)
        .with_request_deadline(settings.request_deadline))
    }

    /// Answer one question.
    ///
    /// Returns `Err` only for `InputInvalid`; every later failure is a
    /// fallback response carrying a generic failure kind.
    pub async fn analyze(&self, question: &str) -> Result<AnalyzeResponse> {
        let query = Query::parse(question)?;

        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.request_deadline;
        let span = info_span!("analyze", %request_id, category = tracing::field::Empty);

        let category = tokio::time::timeout_at(
            deadline,
            categorize_or_general(self.categorizer.as_ref(), &query, self.classifier_timeout),
        )
        .instrument(span.clone())
        .await
        .unwrap_or(Category::General);
        span.record("category", category.as_str());

        // Dropping the pipeline future on expiry cancels every in-flight call
        let outcome = match tokio::time::timeout_at(deadline, self.run(&query, category))
            .instrument(span.clone())
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                let exceeded =
                    AnalysisError::DeadlineExceeded(self.request_deadline.as_millis() as u64);
                span.in_scope(|| warn!("{} - returning fallback", exceeded));
                PipelineOutcome::unavailable(FailureKind::DeadlineExceeded)
            }
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        span.in_scope(|| {
            info!(
                status = ?outcome.status,
                failure = ?outcome.failure,
                attempts = outcome.attempts,
                latency_ms,
                "Analysis complete"
            )
        });

        Ok(AnalyzeResponse {
            category,
            status: outcome.status,
            analysis: outcome.analysis,
            failure: outcome.failure,
            facts: outcome.facts,
            meta: ResponseMeta {
                request_id,
                attempts: outcome.attempts,
                prompt_fingerprint: outcome.fingerprint,
                latency_ms,
                generated_at: Utc::now(),
            },
        })
    }

    async fn run(&self, query: &Query, category: Category) -> PipelineOutcome {
        // === ASSEMBLE ===
        let bundle = match self.assembler.assemble(query, category).await {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(error = %e, "Required context missing - no analysis attempted");
                return PipelineOutcome::unavailable(FailureKind::AnalysisUnavailable);
            }
        };

        // === COMPOSE ===
        let prompt = self.composer.compose(query, category, &bundle);
        debug!(
            fingerprint = %prompt.fingerprint,
            facts = prompt.included.len(),
            dropped = prompt.dropped,
            "Prompt composed"
        );

        // === COMPLETE ===
        let completion = match self.engine.complete(&prompt.text).await {
            Ok(completion) => completion,
            Err(e) => {
                error!(error = %e, "Analysis engine failed");
                let mut outcome = PipelineOutcome::unavailable(FailureKind::ProviderUnavailable);
                outcome.attempts = 1;
                outcome.fingerprint = Some(prompt.fingerprint);
                outcome.facts = bundle.facts;
                return outcome;
            }
        };

        // === VALIDATE ===
        let reviser = EngineReviser {
            engine: &self.engine,
            composer: &self.composer,
            prompt: &prompt,
        };
        let report = self.guardrail.validate(completion.text, &bundle, &reviser).await;
        debug!(trace = ?report.trace, corrections = report.corrections_used, "Guardrail finished");

        if let ValidationOutcome::Rejected { reason } = &report.outcome {
            let detail = format!("{} after {} attempt(s)", reason, report.attempts);
            let rejected = match FailureKind::from(*reason) {
                FailureKind::OutputInvalid => AnalysisError::OutputInvalid(detail),
                FailureKind::OutputRejected => AnalysisError::OutputRejected(detail),
                _ => AnalysisError::ProviderUnavailable(detail),
            };
            warn!("{} - returning fallback", rejected);
        }

        PipelineOutcome::from_report(report, bundle.facts, prompt.fingerprint)
    }
}
