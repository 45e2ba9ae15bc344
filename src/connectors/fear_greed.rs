// src/connectors/fear_greed.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::connectors::traits::SentimentIndex;
use crate::errors::TraderError;
use crate::types::FearGreed;

const FNG_URL: &str = "https://api.alternative.me/fng/";
const PROVIDER: &str = "alternative.me";

/// Crypto fear & greed index. Purely advisory input to the decision
/// payload; the executor tolerates failures here.
pub struct FearGreedClient {
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct FngResponse {
    data: Vec<FngEntry>,
}

#[derive(Debug, Deserialize)]
struct FngEntry {
    value: String,
    value_classification: String,
}

impl FearGreedClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            base_url: FNG_URL.to_string(),
        }
    }
}

impl Default for FearGreedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SentimentIndex for FearGreedClient {
    async fn fetch(&self) -> Result<FearGreed, TraderError> {
        let response = self.http.get(&self.base_url).send().await.map_err(|e| {
            TraderError::provider(PROVIDER, e.status().map(|s| s.as_u16()), e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TraderError::provider(PROVIDER, Some(status.as_u16()), body));
        }

        let parsed: FngResponse = response
            .json()
            .await
            .map_err(|e| TraderError::provider(PROVIDER, None, format!("malformed body: {e}")))?;

        let entry = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| TraderError::provider(PROVIDER, None, "empty index data"))?;

        Ok(FearGreed {
            value: entry.value,
            classification: entry.value_classification,
        })
    }
}
