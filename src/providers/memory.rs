//! In-process providers: static fixtures and a small vector index.
//!
//! Used for local runs without the financial API and as test doubles.

use super::{
    Article, DataProvider, Embedder, FetchParams, NewsDigest, ProviderError, RetrievalHit,
    Retriever, StockQuote,
};
use crate::models::{Fact, FactSource, Sentiment};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

//
// ================= Stock =================
//

#[derive(Debug, Clone, Default)]
pub struct StaticStockProvider {
    quotes: HashMap<String, StockQuote>,
}

impl StaticStockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quote(mut self, quote: StockQuote) -> Self {
        self.quotes.insert(quote.symbol.to_uppercase(), quote);
        self
    }
}

#[async_trait]
impl DataProvider for StaticStockProvider {
    fn name(&self) -> &'static str {
        "stock"
    }

    async fn fetch(
        &self,
        subject: &str,
        _params: &FetchParams,
    ) -> Result<Vec<Fact>, ProviderError> {
        self.quotes
            .get(&subject.trim().to_uppercase())
            .cloned()
            .map(|quote| quote.into_facts(self.name()))
            .ok_or_else(|| ProviderError::NotFound(subject.to_string()))
    }
}

//
// ================= News =================
//

#[derive(Debug, Clone, Default)]
pub struct StaticNewsProvider {
    digests: HashMap<String, NewsDigest>,
}

impl StaticNewsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_headlines(
        mut self,
        topic: &str,
        titles: &[&str],
        sentiment: Option<Sentiment>,
    ) -> Self {
        let key = topic.trim().to_uppercase();
        let articles = titles
            .iter()
            .enumerate()
            .map(|(i, title)| Article {
                id: format!("{}-{}", key.to_lowercase(), i + 1),
                title: title.to_string(),
                publisher: None,
                published_at: None,
            })
            .collect();

        self.digests.insert(key, NewsDigest { articles, sentiment });
        self
    }
}

#[async_trait]
impl DataProvider for StaticNewsProvider {
    fn name(&self) -> &'static str {
        "news"
    }

    async fn fetch(&self, subject: &str, params: &FetchParams) -> Result<Vec<Fact>, ProviderError> {
        self.digests
            .get(&subject.trim().to_uppercase())
            .cloned()
            .map(|digest| digest.into_facts(self.name(), subject, params.limit))
            .ok_or_else(|| ProviderError::NotFound(subject.to_string()))
    }
}

//
// ================= Portfolio =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    pub symbol: String,
    pub quantity: f64,
    pub cost_basis: f64,
}

/// Single-account holdings fixture
#[derive(Debug, Clone, Default)]
pub struct StaticPortfolioProvider {
    holdings: Vec<Holding>,
}

impl StaticPortfolioProvider {
    pub fn new(holdings: Vec<Holding>) -> Self {
        Self { holdings }
    }
}

#[async_trait]
impl DataProvider for StaticPortfolioProvider {
    fn name(&self) -> &'static str {
        "portfolio"
    }

    async fn fetch(
        &self,
        _subject: &str,
        params: &FetchParams,
    ) -> Result<Vec<Fact>, ProviderError> {
        if self.holdings.is_empty() {
            return Err(ProviderError::NotFound("no holdings".to_string()));
        }

        let source = FactSource::new(self.name(), "holdings");
        let total_cost: f64 = self
            .holdings
            .iter()
            .map(|h| h.quantity * h.cost_basis)
            .sum();

        let mut facts = vec![
            Fact::number("holdings_count", self.holdings.len() as f64, source.clone()),
            Fact::number("total_cost_basis", total_cost, source.clone()),
        ];

        facts.extend(self.holdings.iter().take(params.limit).map(|h| {
            Fact::text(
                "holding",
                format!("{} x{} @ {:.2}", h.symbol, h.quantity, h.cost_basis),
                FactSource::new(self.name(), h.symbol.clone()),
            )
            .with_relevance(0.8)
        }));

        Ok(facts)
    }
}

//
// ================= Retrieval =================
//

/// Deterministic bag-of-words embedder (feature hashing, L2-normalized)
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];

        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let bucket = (fnv1a(word.as_bytes()) % self.dims as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf29ce484222325u64, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x100000001b3)
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Passage {
    pub id: String,
    pub text: String,
}

/// Cosine-similarity index held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryRetriever {
    entries: Vec<(Passage, Vec<f32>)>,
}

impl InMemoryRetriever {
    pub fn from_passages(embedder: &dyn Embedder, passages: Vec<Passage>) -> Self {
        let entries = passages
            .into_iter()
            .map(|p| {
                let vector = embedder.embed(&p.text);
                (p, vector)
            })
            .collect();
        Self { entries }
    }

    /// Load a JSON array of `{ "id", "text" }` passages
    pub fn load(path: &Path, embedder: &dyn Embedder) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let passages: Vec<Passage> = serde_json::from_str(&raw)?;
        Ok(Self::from_passages(embedder, passages))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    fn name(&self) -> &'static str {
        "kb"
    }

    async fn retrieve(
        &self,
        query_embedding: &[f32],
        k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievalHit>, ProviderError> {
        let mut scored: Vec<(&Passage, f32)> = self
            .entries
            .iter()
            .map(|(passage, vector)| (passage, cosine(query_embedding, vector)))
            .filter(|(_, score)| *score >= score_threshold && *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(passage, score)| RetrievalHit {
                passage: passage.text.clone(),
                score,
                source: FactSource::new(self.name(), passage.id.clone()),
            })
            .collect())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passages() -> Vec<Passage> {
        vec![
            Passage {
                id: "inflation".into(),
                text: "Inflation is the rate at which the general level of prices rises.".into(),
            },
            Passage {
                id: "pe-ratio".into(),
                text: "The price to earnings ratio compares share price with earnings per share."
                    .into(),
            },
            Passage {
                id: "dividend".into(),
                text: "A dividend is a distribution of company profits to shareholders.".into(),
            },
        ]
    }

    #[tokio::test]
    async fn test_static_stock_provider_lookup() {
        let provider = StaticStockProvider::new().with_quote(StockQuote::new("AAPL", 150.0));

        let facts = provider.fetch("aapl", &FetchParams::default()).await.unwrap();
        assert!(facts.iter().any(|f| f.key == "current_price" && f.as_number() == Some(150.0)));

        let missing = provider.fetch("a shoe", &FetchParams::default()).await;
        assert_eq!(missing, Err(ProviderError::NotFound("a shoe".into())));
    }

    #[tokio::test]
    async fn test_portfolio_totals() {
        let provider = StaticPortfolioProvider::new(vec![
            Holding { symbol: "AAPL".into(), quantity: 10.0, cost_basis: 120.0 },
            Holding { symbol: "MSFT".into(), quantity: 5.0, cost_basis: 300.0 },
        ]);

        let facts = provider.fetch("me", &FetchParams::default()).await.unwrap();
        let total = facts.iter().find(|f| f.key == "total_cost_basis").unwrap();
        assert_eq!(total.as_number(), Some(2700.0));
        assert_eq!(facts.iter().filter(|f| f.key == "holding").count(), 2);
    }

    #[test]
    fn test_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("What is inflation?");
        let b = embedder.embed("What is inflation?");
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(embedder.embed("").iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn test_retriever_orders_and_thresholds() {
        let embedder = HashingEmbedder::default();
        let retriever = InMemoryRetriever::from_passages(&embedder, passages());

        let hits = retriever
            .retrieve(&embedder.embed("explain inflation and prices"), 2, 0.1)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].source.citation(), "kb:inflation");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        let none = retriever
            .retrieve(&embedder.embed("zebra"), 3, 0.5)
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
