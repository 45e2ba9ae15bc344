// src/connectors/serpapi.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::connectors::traits::NewsProvider;
use crate::errors::TraderError;
use crate::types::NewsItem;

const SERPAPI_URL: &str = "https://serpapi.com/search.json";
const PROVIDER: &str = "serpapi";

/// Google News lookup through SerpAPI. Only title and date are kept
/// from each result.
pub struct SerpApiClient {
    api_key: String,
    locale: String,
    language: String,
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    news_results: Vec<RawNewsItem>,
}

#[derive(Debug, Deserialize)]
struct RawNewsItem {
    title: Option<String>,
    date: Option<String>,
}

impl SerpApiClient {
    pub fn new(api_key: String, locale: String, language: String) -> Self {
        Self {
            api_key,
            locale,
            language,
            http: Client::new(),
            base_url: SERPAPI_URL.to_string(),
        }
    }
}

#[async_trait]
impl NewsProvider for SerpApiClient {
    async fn get_news(&self, topic: &str, limit: usize) -> Result<Vec<NewsItem>, TraderError> {
        let query = format!("{topic} news");
        debug!("fetching news for '{}'", topic);

        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("engine", "google_news"),
                ("q", query.as_str()),
                ("gl", self.locale.as_str()),
                ("hl", self.language.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                TraderError::provider(PROVIDER, e.status().map(|s| s.as_u16()), e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TraderError::provider(PROVIDER, Some(status.as_u16()), body));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| TraderError::provider(PROVIDER, None, format!("malformed body: {e}")))?;

        Ok(parsed
            .news_results
            .into_iter()
            .take(limit)
            .map(|item| NewsItem {
                title: item.title,
                date: item.date,
            })
            .collect())
    }
}
