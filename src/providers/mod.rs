//! Context providers
//!
//! Stock, news and portfolio data come from `DataProvider`s; knowledge-base
//! passages come from a `Retriever` fed by an `Embedder`. Every fact a
//! provider returns carries its `FactSource`.

use crate::models::{Fact, FactSource, Sentiment};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;
pub mod memory;

pub use http::{FinancialApiClient, HttpNewsProvider, HttpStockProvider};
pub use memory::{
    HashingEmbedder, Holding, InMemoryRetriever, Passage, StaticNewsProvider,
    StaticPortfolioProvider, StaticStockProvider,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("no data for '{0}'")]
    NotFound(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchParams {
    /// Upper bound on list-shaped results (headlines, holdings)
    pub limit: usize,
}

impl Default for FetchParams {
    fn default() -> Self {
        Self { limit: 5 }
    }
}

/// Trait for structured data sources (stock, news, portfolio)
#[async_trait]
pub trait DataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, subject: &str, params: &FetchParams) -> Result<Vec<Fact>, ProviderError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalHit {
    pub passage: String,
    pub score: f32,
    pub source: FactSource,
}

impl RetrievalHit {
    pub fn into_fact(self) -> Fact {
        Fact::text("passage", self.passage, self.source).with_relevance(self.score)
    }
}

/// Similarity search over a knowledge base
#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &'static str;

    /// Hits ordered by descending score; empty when nothing clears `score_threshold`
    async fn retrieve(
        &self,
        query_embedding: &[f32],
        k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievalHit>, ProviderError>;
}

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

//
// ================= Shared payloads =================
//

/// Quote payload shared by the HTTP and static stock providers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockQuote {
    pub symbol: String,
    pub current_price: f64,
    #[serde(default)]
    pub change_percent: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub pe_ratio: Option<f64>,
    #[serde(default)]
    pub day_high: Option<f64>,
    #[serde(default)]
    pub day_low: Option<f64>,
}

impl StockQuote {
    pub fn new(symbol: &str, current_price: f64) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            current_price,
            change_percent: None,
            volume: None,
            market_cap: None,
            pe_ratio: None,
            day_high: None,
            day_low: None,
        }
    }

    pub fn into_facts(self, provider: &str) -> Vec<Fact> {
        let source = FactSource::new(provider, self.symbol.clone());

        let mut facts = vec![
            Fact::text("symbol", self.symbol.clone(), source.clone()),
            Fact::number("current_price", self.current_price, source.clone()),
        ];

        let optional = [
            ("change_percent", self.change_percent, 0.9),
            ("volume", self.volume, 0.7),
            ("market_cap", self.market_cap, 0.7),
            ("pe_ratio", self.pe_ratio, 0.8),
            ("day_high", self.day_high, 0.6),
            ("day_low", self.day_low, 0.6),
        ];

        facts.extend(optional.into_iter().filter_map(|(key, value, relevance)| {
            value
                .filter(|v| v.is_finite())
                .map(|v| Fact::number(key, v, source.clone()).with_relevance(relevance))
        }));

        facts
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
}

/// Headline list plus optional aggregate sentiment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsDigest {
    pub articles: Vec<Article>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
}

impl NewsDigest {
    /// Headlines lose relevance with rank so truncation drops the tail first
    pub fn into_facts(self, provider: &str, topic: &str, limit: usize) -> Vec<Fact> {
        let mut facts: Vec<Fact> = self
            .articles
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(rank, article)| {
                let title = match &article.publisher {
                    Some(publisher) => format!("{} ({})", article.title, publisher),
                    None => article.title.clone(),
                };
                let relevance = (0.9 - rank as f32 * 0.1).max(0.1);
                Fact::text("headline", title, FactSource::new(provider, article.id))
                    .with_relevance(relevance)
            })
            .collect();

        if let Some(sentiment) = self.sentiment {
            facts.push(Fact::text(
                "sentiment",
                sentiment.as_str(),
                FactSource::new(provider, topic),
            ));
        }

        facts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_facts_skip_absent_values() {
        let mut quote = StockQuote::new("aapl", 150.0);
        quote.pe_ratio = Some(28.5);
        quote.volume = Some(f64::NAN);

        let facts = quote.into_facts("stock");
        let keys: Vec<&str> = facts.iter().map(|f| f.key.as_str()).collect();

        assert_eq!(keys, vec!["symbol", "current_price", "pe_ratio"]);
        assert!(facts.iter().all(|f| f.source.citation() == "stock:AAPL"));
    }

    #[test]
    fn test_news_facts_rank_and_limit() {
        let digest = NewsDigest {
            articles: (0..4)
                .map(|i| Article {
                    id: format!("n{}", i),
                    title: format!("Headline {}", i),
                    publisher: None,
                    published_at: None,
                })
                .collect(),
            sentiment: Some(Sentiment::Negative),
        };

        let facts = digest.into_facts("news", "AAPL", 3);
        assert_eq!(facts.len(), 4);
        assert!(facts[0].relevance > facts[2].relevance);
        assert_eq!(facts[3].key, "sentiment");
        assert_eq!(facts[3].as_text(), Some("negative"));
    }
}
