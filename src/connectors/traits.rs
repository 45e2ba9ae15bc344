// src/connectors/traits.rs
use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::warn;

use crate::errors::TraderError;
use crate::types::{Candle, CoinSelection, FearGreed, MarketSnapshot, NewsItem, OrderAck, TradingDecision};

/// Candle granularities the pipeline works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    Minute60,
    Minute240,
    Day,
}

/// Market data + account access on one exchange. Candle sequences come
/// back chronologically ascending no matter what the provider returns.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Up to `count` (provider-capped) most recent candles at or before
    /// the optional `to` cursor.
    async fn get_candles(
        &self,
        market: &str,
        interval: Interval,
        count: u32,
        to: Option<&str>,
    ) -> Result<Vec<Candle>, TraderError>;

    async fn get_current_price(&self, market: &str) -> Result<Decimal, TraderError>;

    /// Authenticated balance lookup. A currency absent from the account
    /// is 0, not an error.
    async fn get_balance(&self, currency: &str) -> Result<Decimal, TraderError>;

    /// Market buy sized by KRW notional.
    async fn buy_market(&self, market: &str, krw_amount: Decimal) -> Result<OrderAck, TraderError>;

    /// Market sell sized by coin quantity.
    async fn sell_market(&self, market: &str, quantity: Decimal) -> Result<OrderAck, TraderError>;
}

/// News headline lookup by free-text topic.
#[async_trait]
pub trait NewsProvider: Send + Sync {
    async fn get_news(&self, topic: &str, limit: usize) -> Result<Vec<NewsItem>, TraderError>;

    /// Fetches several topics in parallel with per-topic isolation: a
    /// failed topic logs and yields an empty list instead of aborting
    /// the batch.
    async fn get_news_batch(
        &self,
        topics: &[&str],
        limit: usize,
    ) -> HashMap<String, Vec<NewsItem>> {
        let lookups = topics.iter().map(|topic| async move {
            let items = match self.get_news(topic, limit).await {
                Ok(items) => items,
                Err(e) => {
                    warn!("news lookup for '{}' failed, continuing without it: {}", topic, e);
                    Vec::new()
                }
            };
            (topic.to_string(), items)
        });
        futures::future::join_all(lookups).await.into_iter().collect()
    }
}

/// The LLM seam. Implementations never return a partially valid
/// decision; anything that fails schema or range validation is an error.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn decide(&self, snapshot: &MarketSnapshot) -> Result<TradingDecision, TraderError>;

    /// Picks the most promising topic out of a per-topic news map.
    /// The returned topic is always a key of the input.
    async fn select_best_coin(
        &self,
        news_by_topic: &HashMap<String, Vec<NewsItem>>,
    ) -> Result<CoinSelection, TraderError>;
}

/// Market-wide sentiment gauge (fear & greed index).
#[async_trait]
pub trait SentimentIndex: Send + Sync {
    async fn fetch(&self) -> Result<FearGreed, TraderError>;
}
