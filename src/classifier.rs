//! Query Categorizer
//!
//! Classifies a query as one of:
//! - Stock: prices, indicators, company figures ("what is the PE ratio of MSFT?")
//! - News: events, headlines, sentiment ("latest news on Apple")
//! - Portfolio: holdings and transactions ("show my portfolio")
//! - General: everything else ("explain inflation")
//!
//! Strategies are interchangeable behind `Categorizer`; callers go through
//! `categorize_or_general`, which never fails.

use crate::error::AnalysisError;
use crate::llm::{DecodingParams, LanguageModel, ModelError};
use crate::models::{Category, Query};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("classifier backend failed: {0}")]
    Backend(#[from] ModelError),

    #[error("unrecognized category '{0}'")]
    Unrecognized(String),
}

#[async_trait]
pub trait Categorizer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn categorize(&self, query: &Query) -> Result<Category, ClassificationError>;
}

/// Which categorizer the service runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierStrategy {
    Keyword,
    Model,
}

impl FromStr for ClassifierStrategy {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "keyword" | "rules" => Ok(ClassifierStrategy::Keyword),
            "model" | "llm" => Ok(ClassifierStrategy::Model),
            other => Err(AnalysisError::Config(format!(
                "unknown classifier strategy '{}'",
                other
            ))),
        }
    }
}

/// Bounded, fail-closed classification.
///
/// Any backend fault or timeout routes the query to `general`.
pub async fn categorize_or_general(
    categorizer: &dyn Categorizer,
    query: &Query,
    timeout: Duration,
) -> Category {
    match tokio::time::timeout(timeout, categorizer.categorize(query)).await {
        Ok(Ok(category)) => {
            debug!(strategy = categorizer.name(), %category, "Query categorized");
            category
        }
        Ok(Err(e)) => {
            let degraded = AnalysisError::ClassificationDegraded(e.to_string());
            warn!(strategy = categorizer.name(), "{} - falling back to general", degraded);
            Category::General
        }
        Err(_) => {
            let degraded = AnalysisError::ClassificationDegraded(format!(
                "timed out after {} ms",
                timeout.as_millis()
            ));
            warn!(strategy = categorizer.name(), "{} - falling back to general", degraded);
            Category::General
        }
    }
}

//
// ================= Keyword strategy =================
//

/// Static keyword lists, zero allocation.
/// Each keyword word matches a query word exactly or with an inflection
/// suffix ("headlines", "selling"), never as a bare prefix ("percent").
const STOCK_KEYWORDS: &[&str] = &[
    "price", "pe ratio", "dividend", "volume", "chart", "high", "low", "market cap",
];

const NEWS_KEYWORDS: &[&str] = &[
    "news", "headline", "happened", "event", "latest", "update", "report",
];

const PORTFOLIO_KEYWORDS: &[&str] = &[
    "portfolio", "holding", "bought", "sold", "buy", "sell", "balance", "account",
    "transaction", "position",
];

/// Rule-based categorizer with a configurable precedence order
#[derive(Debug, Clone)]
pub struct KeywordCategorizer {
    precedence: Vec<Category>,
}

impl KeywordCategorizer {
    pub fn new() -> Self {
        Self::with_precedence(crate::config::default_precedence())
    }

    pub fn with_precedence(precedence: Vec<Category>) -> Self {
        Self { precedence }
    }

    /// Every intent whose keywords appear in the text, in no particular order
    pub fn signals(text: &str) -> Vec<Category> {
        let words = tokenize(text);

        [
            (Category::Stock, STOCK_KEYWORDS),
            (Category::News, NEWS_KEYWORDS),
            (Category::Portfolio, PORTFOLIO_KEYWORDS),
        ]
        .into_iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| contains_phrase(&words, kw)))
        .map(|(category, _)| category)
        .collect()
    }

    /// Deterministic: depends only on which intents matched, never on where
    pub fn classify(&self, text: &str) -> Category {
        let signals = Self::signals(text);

        self.precedence
            .iter()
            .copied()
            .find(|category| signals.contains(category))
            .unwrap_or(Category::General)
    }
}

impl Default for KeywordCategorizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Categorizer for KeywordCategorizer {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn categorize(&self, query: &Query) -> Result<Category, ClassificationError> {
        Ok(self.classify(query.as_str()))
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

const INFLECTIONS: &[&str] = &["s", "es", "d", "ed", "ing", "ings"];

fn matches_word(word: &str, part: &str) -> bool {
    word.strip_prefix(part)
        .is_some_and(|rest| rest.is_empty() || INFLECTIONS.contains(&rest))
}

/// True when the keyword's words match a consecutive run of query words
fn contains_phrase(words: &[String], keyword: &str) -> bool {
    let parts: Vec<&str> = keyword.split_whitespace().collect();
    if parts.is_empty() || parts.len() > words.len() {
        return false;
    }

    words.windows(parts.len()).any(|window| {
        window
            .iter()
            .zip(&parts)
            .all(|(word, part)| matches_word(word, part))
    })
}

//
// ================= Model strategy =================
//

pub const CLASSIFIER_PROMPT: &str = r#"You are a financial intent classifier.
Classify the following query into exactly ONE of these categories:
- stock: questions about stock price, technical indicators, company financials.
- news: questions about market news, recent events, sentiment.
- portfolio: questions about current holdings, adding/removing stocks, performance.
- general: greeting, definitions, or queries unrelated to specific financial data.

Output strictly the category name in lowercase. No punctuation, no explanation."#;

/// Model-backed categorizer
pub struct ModelCategorizer {
    model: Arc<dyn LanguageModel>,
    params: DecodingParams,
    timeout: Duration,
}

impl ModelCategorizer {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self {
            model,
            params: DecodingParams {
                temperature: 0.0,
                max_output_tokens: 8,
                json_output: false,
                ..DecodingParams::default()
            },
            timeout,
        }
    }

    pub fn build_prompt(query: &Query) -> String {
        format!("{}\n\nQuery: {}", CLASSIFIER_PROMPT, query.as_str())
    }
}

#[async_trait]
impl Categorizer for ModelCategorizer {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn categorize(&self, query: &Query) -> Result<Category, ClassificationError> {
        let reply = self
            .model
            .complete(&Self::build_prompt(query), &self.params, self.timeout)
            .await?;

        let answer = reply
            .text
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();

        answer
            .parse::<Category>()
            .map_err(|_| ClassificationError::Unrecognized(answer))
    }
}
