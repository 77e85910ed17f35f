//! Context assembly
//!
//! Runs the assemblers a category needs concurrently, each under its own
//! timeout. A failed or slow assembler degrades the bundle instead of
//! failing the request, unless the category cannot be answered without it.

use crate::error::AnalysisError;
use crate::models::{Category, ContextBundle, Fact, MissingReason, Query};
use crate::providers::{DataProvider, Embedder, FetchParams, ProviderError, Retriever};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub mod subject;
pub use subject::extract_ticker;

#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub timeout: Duration,
    pub retrieval_top_k: usize,
    pub retrieval_score_threshold: f32,
    pub fetch: FetchParams,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retrieval_top_k: 4,
            retrieval_score_threshold: 0.2,
            fetch: FetchParams::default(),
        }
    }
}

/// Which assemblers a category draws on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyPlan {
    pub stock: bool,
    pub news: bool,
    pub portfolio: bool,
    pub retrieval: bool,
}

impl AssemblyPlan {
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Stock => Self {
                stock: true,
                news: true,
                portfolio: false,
                retrieval: true,
            },
            Category::News => Self {
                stock: false,
                news: true,
                portfolio: false,
                retrieval: true,
            },
            Category::Portfolio => Self {
                stock: false,
                news: false,
                portfolio: true,
                retrieval: true,
            },
            Category::General => Self {
                stock: false,
                news: false,
                portfolio: false,
                retrieval: true,
            },
        }
    }
}

enum Gathered {
    Skipped,
    Facts(Vec<Fact>),
    Missing(MissingReason),
}

pub struct ContextAssembler {
    stock: Option<Arc<dyn DataProvider>>,
    news: Option<Arc<dyn DataProvider>>,
    portfolio: Option<Arc<dyn DataProvider>>,
    retriever: Option<(Arc<dyn Retriever>, Arc<dyn Embedder>)>,
    config: AssemblerConfig,
}

impl ContextAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self {
            stock: None,
            news: None,
            portfolio: None,
            retriever: None,
            config,
        }
    }

    pub fn with_stock(mut self, provider: Arc<dyn DataProvider>) -> Self {
        self.stock = Some(provider);
        self
    }

    pub fn with_news(mut self, provider: Arc<dyn DataProvider>) -> Self {
        self.news = Some(provider);
        self
    }

    pub fn with_portfolio(mut self, provider: Arc<dyn DataProvider>) -> Self {
        self.portfolio = Some(provider);
        self
    }

    pub fn with_retriever(
        mut self,
        retriever: Arc<dyn Retriever>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        self.retriever = Some((retriever, embedder));
        self
    }

    /// Gather the bundle for one request.
    ///
    /// Fails with `AnalysisUnavailable` only when the category's required
    /// fact is absent after every assembler has finished or timed out.
    pub async fn assemble(&self, query: &Query, category: Category) -> Result<ContextBundle> {
        let plan = AssemblyPlan::for_category(category);
        let ticker = extract_ticker(query.as_str());
        let subject = ticker.clone().unwrap_or_else(|| query.as_str().to_string());

        let (stock, news, portfolio, retrieval) = tokio::join!(
            self.gather("stock", plan.stock, self.stock.as_ref(), &subject),
            self.gather("news", plan.news, self.news.as_ref(), &subject),
            self.gather("portfolio", plan.portfolio, self.portfolio.as_ref(), &subject),
            self.gather_passages(plan.retrieval, query),
        );

        let mut bundle = ContextBundle {
            subject: ticker,
            ..ContextBundle::default()
        };

        for (assembler, gathered) in [
            ("stock", stock),
            ("news", news),
            ("portfolio", portfolio),
            ("retrieval", retrieval),
        ] {
            match gathered {
                Gathered::Skipped => {}
                Gathered::Facts(facts) => bundle.facts.extend(facts),
                Gathered::Missing(reason) => {
                    let incomplete = AnalysisError::ContextIncomplete {
                        assembler: assembler.to_string(),
                        reason: reason.to_string(),
                    };
                    warn!(%category, "{}", incomplete);
                    bundle.mark_missing(assembler, reason);
                }
            }
        }

        debug!(
            %category,
            facts = bundle.facts.len(),
            missing = bundle.missing.len(),
            "Context assembled"
        );

        if let Some(required) = category.required_fact() {
            if bundle.number(required).is_none() {
                return Err(AnalysisError::AnalysisUnavailable(format!(
                    "{} query has no {} for '{}'",
                    category, required, subject
                )));
            }
        }

        Ok(bundle)
    }

    async fn gather(
        &self,
        assembler: &str,
        wanted: bool,
        provider: Option<&Arc<dyn DataProvider>>,
        subject: &str,
    ) -> Gathered {
        if !wanted {
            return Gathered::Skipped;
        }
        let Some(provider) = provider else {
            debug!(assembler, "No provider configured");
            return Gathered::Missing(MissingReason::Unavailable);
        };

        let call = provider.fetch(subject, &self.config.fetch);
        match tokio::time::timeout(self.config.timeout, call).await {
            Ok(Ok(facts)) if facts.is_empty() => Gathered::Missing(MissingReason::NotFound),
            Ok(Ok(facts)) => Gathered::Facts(facts),
            Ok(Err(ProviderError::NotFound(_))) => Gathered::Missing(MissingReason::NotFound),
            Ok(Err(e)) => {
                warn!(assembler, provider = provider.name(), error = %e, "Provider failed");
                Gathered::Missing(MissingReason::Unavailable)
            }
            Err(_) => Gathered::Missing(MissingReason::TimedOut),
        }
    }

    async fn gather_passages(&self, wanted: bool, query: &Query) -> Gathered {
        if !wanted {
            return Gathered::Skipped;
        }
        // The knowledge base is optional everywhere
        let Some((retriever, embedder)) = &self.retriever else {
            return Gathered::Skipped;
        };

        let embedding = embedder.embed(query.as_str());
        let call = retriever.retrieve(
            &embedding,
            self.config.retrieval_top_k,
            self.config.retrieval_score_threshold,
        );

        match tokio::time::timeout(self.config.timeout, call).await {
            Ok(Ok(hits)) if hits.is_empty() => Gathered::Missing(MissingReason::NotFound),
            Ok(Ok(hits)) => Gathered::Facts(hits.into_iter().map(|h| h.into_fact()).collect()),
            Ok(Err(e)) => {
                warn!(retriever = retriever.name(), error = %e, "Retrieval failed");
                Gathered::Missing(MissingReason::Unavailable)
            }
            Err(_) => Gathered::Missing(MissingReason::TimedOut),
        }
    }
}
