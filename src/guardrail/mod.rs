//! Guardrail validator
//!
//! Drives a candidate through Parsing, SchemaChecking, FactChecking and
//! SafetyChecking. Parse and schema defects may enter Correcting, which
//! re-invokes the engine once per defect kind out of a per-request budget.
//! The budget is the only place retries are granted.

use crate::engine::AnalysisEngine;
use crate::models::{AnalysisResult, ContextBundle, RejectionReason, ValidationOutcome};
use crate::moderation::{ModerationBackend, ModerationVerdict};
use crate::prompt::{ComposedPrompt, PromptComposer};
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub mod facts;
pub mod schema;

pub use facts::{
    check_facts, within_tolerance, FactCheckConfig, FactFindings, FactPolicy, UntraceablePolicy,
};

#[derive(Debug, Clone)]
pub struct GuardrailConfig {
    /// Correction attempts allowed per request, across all defect kinds
    pub correction_budget: u32,
    pub facts: FactCheckConfig,
    pub moderation_timeout: Duration,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            correction_budget: 1,
            facts: FactCheckConfig::default(),
            moderation_timeout: Duration::from_secs(5),
        }
    }
}

/// A specific problem found in a candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Defect {
    pub reason: RejectionReason,
    pub detail: String,
}

impl Defect {
    pub fn new(reason: RejectionReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    Parsing,
    SchemaChecking,
    FactChecking,
    Correcting,
    SafetyChecking,
    Accepted,
    Rejected,
}

/// Per-request correction counter, threaded through every transition
#[derive(Debug, Clone)]
pub struct RetryBudget {
    remaining: u32,
    spent_on: Vec<RejectionReason>,
}

impl RetryBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            remaining: limit,
            spent_on: Vec::new(),
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn used(&self) -> u32 {
        self.spent_on.len() as u32
    }

    /// Spend one unit for `reason`. Refused when the budget is empty or the
    /// same defect kind was already corrected once.
    pub fn try_spend(&mut self, reason: RejectionReason) -> bool {
        if self.remaining == 0 || self.spent_on.contains(&reason) {
            return false;
        }
        self.remaining -= 1;
        self.spent_on.push(reason);
        true
    }
}

/// Source of corrected candidates
#[async_trait]
pub trait Reviser: Send + Sync {
    async fn revise(&self, defect: &Defect, previous_output: &str) -> Result<String>;
}

/// Re-invokes the analysis engine with a correction prompt
pub struct EngineReviser<'a> {
    pub engine: &'a AnalysisEngine,
    pub composer: &'a PromptComposer,
    pub prompt: &'a ComposedPrompt,
}

#[async_trait]
impl<'a> Reviser for EngineReviser<'a> {
    async fn revise(&self, defect: &Defect, previous_output: &str) -> Result<String> {
        let text = self.composer.correction(self.prompt, defect, previous_output);
        let completion = self.engine.complete(&text).await?;
        Ok(completion.text)
    }
}

#[derive(Debug, Clone)]
pub struct GuardrailReport {
    pub outcome: ValidationOutcome,
    /// Validated result, or the fixed fallback when rejected
    pub result: AnalysisResult,
    /// Model outputs examined, including corrections
    pub attempts: u32,
    pub corrections_used: u32,
    pub trace: Vec<ValidationState>,
}

impl GuardrailReport {
    pub fn is_rejected(&self) -> bool {
        matches!(self.outcome, ValidationOutcome::Rejected { .. })
    }
}

/// Where the machine is, with the data each state works on
enum Step {
    Parsing(String),
    SchemaChecking(Value),
    FactChecking(AnalysisResult),
    Correcting(Defect),
    SafetyChecking(AnalysisResult),
    Accepted(AnalysisResult),
    Rejected(RejectionReason),
}

impl Step {
    fn state(&self) -> ValidationState {
        match self {
            Step::Parsing(_) => ValidationState::Parsing,
            Step::SchemaChecking(_) => ValidationState::SchemaChecking,
            Step::FactChecking(_) => ValidationState::FactChecking,
            Step::Correcting(_) => ValidationState::Correcting,
            Step::SafetyChecking(_) => ValidationState::SafetyChecking,
            Step::Accepted(_) => ValidationState::Accepted,
            Step::Rejected(_) => ValidationState::Rejected,
        }
    }
}

pub struct Guardrail {
    config: GuardrailConfig,
    moderator: Arc<dyn ModerationBackend>,
}

impl Guardrail {
    pub fn new(config: GuardrailConfig, moderator: Arc<dyn ModerationBackend>) -> Self {
        Self { config, moderator }
    }

    pub fn config(&self) -> &GuardrailConfig {
        &self.config
    }

    /// Validate `raw`, correcting through `reviser` while budget allows.
    pub async fn validate(
        &self,
        raw: String,
        bundle: &ContextBundle,
        reviser: &dyn Reviser,
    ) -> GuardrailReport {
        let mut budget = RetryBudget::new(self.config.correction_budget);
        let mut notes: Vec<String> = Vec::new();
        let mut trace = Vec::new();
        let mut attempts: u32 = 1;
        let mut last_output = raw.clone();
        let mut step = Step::Parsing(raw);

        loop {
            trace.push(step.state());
            debug!(
                state = ?step.state(),
                attempts,
                budget = budget.remaining(),
                "Guardrail transition"
            );

            step = match step {
                Step::Parsing(text) => match schema::parse(&text) {
                    Ok(value) => Step::SchemaChecking(value),
                    Err(detail) => self.on_defect(
                        Defect::new(RejectionReason::MalformedOutput, detail),
                        &mut budget,
                    ),
                },

                Step::SchemaChecking(value) => match schema::check(&value) {
                    Ok(result) => Step::FactChecking(result),
                    Err(violations) => self.on_defect(
                        Defect::new(RejectionReason::SchemaViolation, violations.join("; ")),
                        &mut budget,
                    ),
                },

                Step::FactChecking(mut result) => {
                    let findings = check_facts(&mut result, bundle, &self.config.facts);
                    if findings.rejected.is_empty() {
                        notes.extend(findings.adjusted);
                        Step::SafetyChecking(result)
                    } else {
                        warn!(findings = ?findings.rejected, "Fact check rejected candidate");
                        Step::Rejected(RejectionReason::FactMismatch)
                    }
                }

                Step::Correcting(defect) => {
                    attempts += 1;
                    notes.push(format!("re-generated after {}", defect.reason));
                    match reviser.revise(&defect, &last_output).await {
                        Ok(text) => {
                            last_output = text.clone();
                            Step::Parsing(text)
                        }
                        Err(e) => {
                            warn!(error = %e, defect = %defect.reason, "Correction call failed");
                            Step::Rejected(RejectionReason::ProviderUnavailable)
                        }
                    }
                }

                Step::SafetyChecking(result) => self.moderate(result).await,

                Step::Accepted(result) => {
                    let outcome = if budget.used() == 0 && notes.is_empty() {
                        ValidationOutcome::Accepted
                    } else {
                        ValidationOutcome::Corrected { notes }
                    };
                    return GuardrailReport {
                        outcome,
                        result,
                        attempts,
                        corrections_used: budget.used(),
                        trace,
                    };
                }

                Step::Rejected(reason) => {
                    return GuardrailReport {
                        outcome: ValidationOutcome::Rejected { reason },
                        result: AnalysisResult::fallback(),
                        attempts,
                        corrections_used: budget.used(),
                        trace,
                    };
                }
            };
        }
    }

    fn on_defect(&self, defect: Defect, budget: &mut RetryBudget) -> Step {
        if budget.try_spend(defect.reason) {
            debug!(defect = %defect.reason, detail = %defect.detail, "Requesting correction");
            Step::Correcting(defect)
        } else {
            warn!(
                defect = %defect.reason,
                detail = %defect.detail,
                remaining = budget.remaining(),
                "Candidate rejected without correction"
            );
            Step::Rejected(defect.reason)
        }
    }

    /// Unsafe or unverifiable text is blocked outright
    async fn moderate(&self, result: AnalysisResult) -> Step {
        let text = result.moderation_text();
        let call = self.moderator.check(&text);

        match tokio::time::timeout(self.config.moderation_timeout, call).await {
            Ok(Ok(ModerationVerdict::Safe)) => Step::Accepted(result),
            Ok(Ok(ModerationVerdict::Unsafe { reason })) => {
                warn!(moderator = self.moderator.name(), %reason, "Unsafe content blocked");
                Step::Rejected(RejectionReason::UnsafeContent)
            }
            Ok(Err(e)) => {
                warn!(moderator = self.moderator.name(), error = %e, "Moderation failed; blocking");
                Step::Rejected(RejectionReason::UnsafeContent)
            }
            Err(_) => {
                warn!(moderator = self.moderator.name(), "Moderation timed out; blocking");
                Step::Rejected(RejectionReason::UnsafeContent)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::error::AnalysisError;
    use crate::llm::{DecodingParams, ScriptedModel};
    use crate::models::{Category, Fact, FactSource, Query, Recommendation};
    use crate::moderation::{KeywordModerator, ModerationError};
    use std::sync::Mutex;

    const VALID: &str = r#"{"summary":"AAPL trades at 150.","recommendation":"hold",
        "subject":"AAPL",
        "figures":{"current_price":150.0},"citations":["stock:AAPL"],"confidence":0.7}"#;

    fn bundle() -> ContextBundle {
        let source = FactSource::new("stock", "AAPL");
        ContextBundle {
            subject: Some("AAPL".into()),
            facts: vec![
                Fact::text("symbol", "AAPL", source.clone()),
                Fact::number("current_price", 150.0, source),
            ],
            missing: vec![],
        }
    }

    fn rejected(reason: RejectionReason) -> ValidationOutcome {
        ValidationOutcome::Rejected { reason }
    }

    fn guardrail(budget: u32) -> Guardrail {
        let config = GuardrailConfig {
            correction_budget: budget,
            ..GuardrailConfig::default()
        };
        Guardrail::new(config, Arc::new(KeywordModerator::new()))
    }

    /// Hands out scripted corrections and records what it was asked to fix
    struct ScriptedReviser {
        replies: Mutex<Vec<Result<String>>>,
        seen: Mutex<Vec<RejectionReason>>,
    }

    impl ScriptedReviser {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<RejectionReason> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Reviser for ScriptedReviser {
        async fn revise(&self, defect: &Defect, _previous_output: &str) -> Result<String> {
            self.seen.lock().unwrap().push(defect.reason);
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(AnalysisError::ProviderUnavailable("script exhausted".into()));
            }
            replies.remove(0)
        }
    }

    struct BrokenModerator;

    #[async_trait]
    impl ModerationBackend for BrokenModerator {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn check(
            &self,
            _text: &str,
        ) -> std::result::Result<ModerationVerdict, ModerationError> {
            Err(ModerationError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn test_budget_is_bounded_and_per_kind() {
        let mut budget = RetryBudget::new(2);
        assert!(budget.try_spend(RejectionReason::MalformedOutput));
        assert!(!budget.try_spend(RejectionReason::MalformedOutput));
        assert!(budget.try_spend(RejectionReason::SchemaViolation));
        assert!(!budget.try_spend(RejectionReason::FactMismatch));
        assert_eq!(budget.remaining(), 0);
        assert_eq!(budget.used(), 2);
    }

    #[tokio::test]
    async fn test_valid_output_is_accepted() {
        let reviser = ScriptedReviser::new(vec![]);
        let report = guardrail(1).validate(VALID.into(), &bundle(), &reviser).await;

        assert_eq!(report.outcome, ValidationOutcome::Accepted);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.result.recommendation, Recommendation::Hold);
        assert_eq!(
            report.trace,
            vec![
                ValidationState::Parsing,
                ValidationState::SchemaChecking,
                ValidationState::FactChecking,
                ValidationState::SafetyChecking,
                ValidationState::Accepted,
            ]
        );
        assert!(reviser.seen().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_then_valid_is_corrected() {
        let reviser = ScriptedReviser::new(vec![Ok(VALID.into())]);
        let report = guardrail(1)
            .validate("Sure! The price is 150".into(), &bundle(), &reviser)
            .await;

        assert!(matches!(report.outcome, ValidationOutcome::Corrected { .. }));
        assert_eq!(report.attempts, 2);
        assert_eq!(report.corrections_used, 1);
        assert_eq!(reviser.seen(), vec![RejectionReason::MalformedOutput]);
        assert_eq!(report.result.figures["current_price"], 150.0);
    }

    #[tokio::test]
    async fn test_schema_failure_consumes_exactly_one_correction() {
        let broken = r#"{"summary":"AAPL","recommendation":"moon","figures":{},
            "citations":[],"confidence":0.5}"#;
        let reviser = ScriptedReviser::new(vec![Ok(broken.into()), Ok(VALID.into())]);

        let report = guardrail(1).validate(broken.into(), &bundle(), &reviser).await;

        assert_eq!(report.outcome, rejected(RejectionReason::SchemaViolation));
        assert_eq!(reviser.seen(), vec![RejectionReason::SchemaViolation]);
        assert_eq!(report.corrections_used, 1);
        assert_eq!(report.result, AnalysisResult::fallback());
    }

    #[tokio::test]
    async fn test_zero_budget_rejects_immediately() {
        let reviser = ScriptedReviser::new(vec![Ok(VALID.into())]);
        let report = guardrail(0).validate("not json".into(), &bundle(), &reviser).await;

        assert_eq!(report.outcome, rejected(RejectionReason::MalformedOutput));
        assert!(reviser.seen().is_empty());
        assert!(!report.trace.contains(&ValidationState::Correcting));
    }

    #[tokio::test]
    async fn test_same_defect_kind_is_not_corrected_twice() {
        let reviser = ScriptedReviser::new(vec![Ok("still not json".into()), Ok(VALID.into())]);
        let report = guardrail(3).validate("not json".into(), &bundle(), &reviser).await;

        assert_eq!(report.outcome, rejected(RejectionReason::MalformedOutput));
        assert_eq!(reviser.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_unsafe_output_rejected_without_correction() {
        let text = r#"{"summary":"Buy now, this is a guaranteed return.","recommendation":"buy",
            "figures":{},"citations":[],"confidence":0.9}"#;
        let reviser = ScriptedReviser::new(vec![Ok(VALID.into())]);

        let report = guardrail(1).validate(text.into(), &bundle(), &reviser).await;

        assert_eq!(report.outcome, rejected(RejectionReason::UnsafeContent));
        assert!(reviser.seen().is_empty());
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test]
    async fn test_moderation_failure_blocks() {
        let guardrail = Guardrail::new(GuardrailConfig::default(), Arc::new(BrokenModerator));
        let reviser = ScriptedReviser::new(vec![]);

        let report = guardrail.validate(VALID.into(), &bundle(), &reviser).await;
        assert!(report.is_rejected());
    }

    #[tokio::test]
    async fn test_numeric_drift_is_auto_corrected() {
        let drifted = VALID.replace("150.0", "171.0");
        let reviser = ScriptedReviser::new(vec![]);

        let report = guardrail(1).validate(drifted, &bundle(), &reviser).await;

        match report.outcome {
            ValidationOutcome::Corrected { notes } => assert_eq!(notes.len(), 1),
            other => panic!("expected corrected, got {:?}", other),
        }
        assert_eq!(report.result.figures["current_price"], 150.0);
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test]
    async fn test_untraceable_figure_passes_through_unchanged() {
        let text = VALID.replace(
            r#""figures":{"current_price":150.0}"#,
            r#""figures":{"current_price":150.0,"eps":6.1}"#,
        );
        let reviser = ScriptedReviser::new(vec![]);

        let report = guardrail(1).validate(text, &bundle(), &reviser).await;

        assert_eq!(report.outcome, ValidationOutcome::Accepted);
        assert_eq!(report.result.figures.len(), 2);
        assert_eq!(report.result.figures["current_price"], 150.0);
        assert_eq!(report.result.figures["eps"], 6.1);
        assert_eq!(report.result.citations, vec!["stock:AAPL".to_string()]);
    }

    #[tokio::test]
    async fn test_safety_check_owns_moderated_text() {
        let guardrail = guardrail(1);
        let result = schema::check(&schema::parse(VALID).unwrap()).unwrap();

        match guardrail.moderate(result).await {
            Step::Accepted(accepted) => assert_eq!(accepted.recommendation, Recommendation::Hold),
            _ => panic!("expected the candidate to pass moderation"),
        }
    }

    #[tokio::test]
    async fn test_categorical_mismatch_rejected() {
        let wrong = VALID.replace("\"subject\":\"AAPL\"", "\"subject\":\"TSLA\"");
        let reviser = ScriptedReviser::new(vec![Ok(VALID.into())]);

        let report = guardrail(1).validate(wrong, &bundle(), &reviser).await;
        assert_eq!(report.outcome, rejected(RejectionReason::FactMismatch));
        assert!(reviser.seen().is_empty());
    }

    #[tokio::test]
    async fn test_failed_correction_call_is_provider_unavailable() {
        let reviser = ScriptedReviser::new(vec![]);
        let report = guardrail(1).validate("nope".into(), &bundle(), &reviser).await;

        assert_eq!(report.outcome, rejected(RejectionReason::ProviderUnavailable));
    }

    #[tokio::test]
    async fn test_engine_reviser_sends_correction_prompt() {
        let model = Arc::new(ScriptedModel::always(VALID));
        let engine =
            AnalysisEngine::new(model.clone(), DecodingParams::default(), EngineConfig::default());

        let composer = PromptComposer::new(6_000);
        let query = Query::parse("What is the price of AAPL?").unwrap();
        let prompt = composer.compose(&query, Category::Stock, &bundle());
        let reviser = EngineReviser {
            engine: &engine,
            composer: &composer,
            prompt: &prompt,
        };

        let report = guardrail(1).validate("{oops".into(), &bundle(), &reviser).await;

        assert!(matches!(report.outcome, ValidationOutcome::Corrected { .. }));
        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("malformed_output"));
        assert!(prompts[0].starts_with(&prompt.text));
    }
}
