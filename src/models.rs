//! Core data models for the research pipeline

use crate::error::AnalysisError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//
// ================= Query =================
//

/// Raw user question, validated once at the pipeline boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    text: String,
}

impl Query {
    pub const MIN_CHARS: usize = 3;
    pub const MAX_CHARS: usize = 1000;

    pub fn parse(raw: &str) -> crate::Result<Self> {
        let text = raw.trim();
        let chars = text.chars().count();

        if chars < Self::MIN_CHARS {
            return Err(AnalysisError::InputInvalid(format!(
                "question must be at least {} characters",
                Self::MIN_CHARS
            )));
        }
        if chars > Self::MAX_CHARS {
            return Err(AnalysisError::InputInvalid(format!(
                "question must be at most {} characters",
                Self::MAX_CHARS
            )));
        }

        Ok(Self {
            text: text.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

//
// ================= Category =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Stock,
    News,
    Portfolio,
    General,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Stock,
        Category::News,
        Category::Portfolio,
        Category::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Stock => "stock",
            Category::News => "news",
            Category::Portfolio => "portfolio",
            Category::General => "general",
        }
    }

    /// Numeric fact without which an analysis for this category must not run
    pub fn required_fact(&self) -> Option<&'static str> {
        match self {
            Category::Stock => Some("current_price"),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stock" => Ok(Category::Stock),
            "news" => Ok(Category::News),
            "portfolio" => Ok(Category::Portfolio),
            "general" => Ok(Category::General),
            other => Err(AnalysisError::Config(format!("unknown category '{}'", other))),
        }
    }
}

//
// ================= Context =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FactValue {
    Number(f64),
    Text(String),
}

/// Where a fact came from: a provider call or a retrieval hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FactSource {
    pub provider: String,
    pub reference: String,
}

impl FactSource {
    pub fn new(provider: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            reference: reference.into(),
        }
    }

    /// Identifier the model is expected to cite
    pub fn citation(&self) -> String {
        format!("{}:{}", self.provider, self.reference)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fact {
    pub key: String,
    pub value: FactValue,
    pub source: FactSource,
    pub relevance: f32,
}

impl Fact {
    pub fn number(key: impl Into<String>, value: f64, source: FactSource) -> Self {
        Self {
            key: key.into(),
            value: FactValue::Number(value),
            source,
            relevance: 1.0,
        }
    }

    pub fn text(key: impl Into<String>, value: impl Into<String>, source: FactSource) -> Self {
        Self {
            key: key.into(),
            value: FactValue::Text(value.into()),
            source,
            relevance: 1.0,
        }
    }

    pub fn with_relevance(mut self, relevance: f32) -> Self {
        self.relevance = relevance;
        self
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.value {
            FactValue::Number(n) => Some(n),
            FactValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.value {
            FactValue::Text(s) => Some(s),
            FactValue::Number(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissingReason {
    NotFound,
    Unavailable,
    TimedOut,
}

impl fmt::Display for MissingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MissingReason::NotFound => "not found",
            MissingReason::Unavailable => "unavailable",
            MissingReason::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// An assembler that produced nothing for this request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MissingContext {
    pub assembler: String,
    pub reason: MissingReason,
}

/// Structured facts gathered for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContextBundle {
    pub subject: Option<String>,
    pub facts: Vec<Fact>,
    pub missing: Vec<MissingContext>,
}

impl ContextBundle {
    pub fn number(&self, key: &str) -> Option<f64> {
        self.facts
            .iter()
            .filter(|f| f.key == key)
            .find_map(Fact::as_number)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.facts
            .iter()
            .filter(|f| f.key == key)
            .find_map(Fact::as_text)
    }

    /// Every citation id a result may legitimately reference
    pub fn citations(&self) -> BTreeSet<String> {
        self.facts.iter().map(|f| f.source.citation()).collect()
    }

    pub fn mark_missing(&mut self, assembler: &str, reason: MissingReason) {
        self.missing.push(MissingContext {
            assembler: assembler.to_string(),
            reason,
        });
    }
}

//
// ================= Analysis =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Buy,
    Hold,
    Sell,
    None,
}

impl Recommendation {
    pub const ALLOWED: [&'static str; 4] = ["buy", "hold", "sell", "none"];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub const ALLOWED: [&'static str; 3] = ["positive", "neutral", "negative"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }
}

/// Structured model output after validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub summary: String,
    pub recommendation: Recommendation,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    pub figures: BTreeMap<String, f64>,
    pub citations: Vec<String>,
    pub confidence: f64,
}

impl AnalysisResult {
    pub const FALLBACK_SUMMARY: &'static str =
        "A verified analysis could not be produced for this question. \
         Please try again later or rephrase the question.";

    /// Fixed safe response used whenever no validated result exists
    pub fn fallback() -> Self {
        Self {
            summary: Self::FALLBACK_SUMMARY.to_string(),
            recommendation: Recommendation::None,
            subject: None,
            sentiment: None,
            figures: BTreeMap::new(),
            citations: Vec::new(),
            confidence: 0.0,
        }
    }

    /// Free text handed to moderation
    pub fn moderation_text(&self) -> String {
        let mut text = self.summary.clone();
        if let Some(subject) = &self.subject {
            text.push('\n');
            text.push_str(subject);
        }
        text
    }
}

//
// ================= Validation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    MalformedOutput,
    SchemaViolation,
    FactMismatch,
    UnsafeContent,
    ProviderUnavailable,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectionReason::MalformedOutput => "malformed_output",
            RejectionReason::SchemaViolation => "schema_violation",
            RejectionReason::FactMismatch => "fact_mismatch",
            RejectionReason::UnsafeContent => "unsafe_content",
            RejectionReason::ProviderUnavailable => "provider_unavailable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ValidationOutcome {
    Accepted,
    Corrected { notes: Vec<String> },
    Rejected { reason: RejectionReason },
}

//
// ================= Response =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Accepted,
    Corrected,
    Rejected,
    Unavailable,
}

/// Generic failure category exposed to callers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    AnalysisUnavailable,
    ProviderUnavailable,
    OutputInvalid,
    OutputRejected,
    DeadlineExceeded,
    Internal,
}

impl From<RejectionReason> for FailureKind {
    fn from(reason: RejectionReason) -> Self {
        match reason {
            RejectionReason::MalformedOutput | RejectionReason::SchemaViolation => {
                FailureKind::OutputInvalid
            }
            RejectionReason::FactMismatch | RejectionReason::UnsafeContent => {
                FailureKind::OutputRejected
            }
            RejectionReason::ProviderUnavailable => FailureKind::ProviderUnavailable,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub request_id: Uuid,
    pub attempts: u32,
    pub prompt_fingerprint: Option<String>,
    pub latency_ms: u64,
    pub generated_at: DateTime<Utc>,
}

/// The single response shape returned for every `analyze` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub category: Category,
    pub status: AnalysisStatus,
    pub analysis: AnalysisResult,
    pub failure: Option<FailureKind>,
    pub facts: Vec<Fact>,
    pub meta: ResponseMeta,
}

impl AnalyzeResponse {
    pub fn is_fallback(&self) -> bool {
        matches!(
            self.status,
            AnalysisStatus::Rejected | AnalysisStatus::Unavailable
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub app: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_bounds() {
        assert!(Query::parse("  ").is_err());
        assert!(Query::parse("hi").is_err());
        assert!(Query::parse(&"a".repeat(1001)).is_err());

        let query = Query::parse("  What is the price of AAPL?  ").unwrap();
        assert_eq!(query.as_str(), "What is the price of AAPL?");
    }

    #[test]
    fn test_category_round_trip_names() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert!("crypto".parse::<Category>().is_err());
    }

    #[test]
    fn test_bundle_lookup_and_citations() {
        let source = FactSource::new("stock", "AAPL");
        let bundle = ContextBundle {
            subject: Some("AAPL".into()),
            facts: vec![
                Fact::text("symbol", "AAPL", source.clone()),
                Fact::number("current_price", 150.0, source),
            ],
            missing: vec![],
        };

        assert_eq!(bundle.number("current_price"), Some(150.0));
        assert_eq!(bundle.text("symbol"), Some("AAPL"));
        assert_eq!(bundle.number("symbol"), None);
        assert!(bundle.citations().contains("stock:AAPL"));
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(ValidationOutcome::Rejected {
            reason: RejectionReason::UnsafeContent,
        })
        .unwrap();
        assert_eq!(json["status"], "rejected");
        assert_eq!(json["reason"], "unsafe_content");
    }
}
