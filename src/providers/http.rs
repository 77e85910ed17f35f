//! HTTP-backed providers that call the financial data API service.

use super::{DataProvider, FetchParams, NewsDigest, ProviderError, StockQuote};
use crate::models::Fact;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct FinancialApiClient {
    client: Client,
    base_url: String,
}

impl FinancialApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                ProviderError::Unavailable(format!(
                    "Financial API request failed for {}: {}",
                    path, e
                ))
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(body.to_string()));
        }

        let body = response.json::<Value>().await.map_err(|e| {
            ProviderError::Unavailable(format!("Invalid JSON response from {}: {}", path, e))
        })?;

        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!(
                "Financial API returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }
}

/// Quotes from `/api/v1/market/quote`
pub struct HttpStockProvider {
    api: FinancialApiClient,
}

impl HttpStockProvider {
    pub fn new(api: FinancialApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl DataProvider for HttpStockProvider {
    fn name(&self) -> &'static str {
        "stock"
    }

    async fn fetch(
        &self,
        subject: &str,
        _params: &FetchParams,
    ) -> Result<Vec<Fact>, ProviderError> {
        let response = self
            .api
            .post_json("/api/v1/market/quote", &json!({ "symbol": subject }))
            .await?;

        // The service answers unknown symbols with 200 and a null quote
        let quote = response.get("quote").cloned().unwrap_or(response);
        if quote.is_null() {
            return Err(ProviderError::NotFound(subject.to_string()));
        }

        let quote: StockQuote = serde_json::from_value(quote).map_err(|e| {
            warn!(subject, error = %e, "Quote payload did not match schema");
            ProviderError::Unavailable(format!("malformed quote for {}: {}", subject, e))
        })?;

        Ok(quote.into_facts(self.name()))
    }
}

/// Headlines from `/api/v1/news/search`
pub struct HttpNewsProvider {
    api: FinancialApiClient,
}

impl HttpNewsProvider {
    pub fn new(api: FinancialApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl DataProvider for HttpNewsProvider {
    fn name(&self) -> &'static str {
        "news"
    }

    async fn fetch(&self, subject: &str, params: &FetchParams) -> Result<Vec<Fact>, ProviderError> {
        let response = self
            .api
            .post_json(
                "/api/v1/news/search",
                &json!({ "query": subject, "limit": params.limit }),
            )
            .await?;

        let digest: NewsDigest = serde_json::from_value(response).map_err(|e| {
            ProviderError::Unavailable(format!("malformed news digest for {}: {}", subject, e))
        })?;

        if digest.articles.is_empty() {
            return Err(ProviderError::NotFound(subject.to_string()));
        }

        Ok(digest.into_facts(self.name(), subject, params.limit))
    }
}
