// src/types.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV bucket. Immutable once fetched; sequences are always
/// chronologically ascending (oldest first) by the time they leave a
/// connector, regardless of the provider's native order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Epoch milliseconds.
    pub time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// A news headline. Only title and date survive the provider response;
/// items are ephemeral and never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: Option<String>,
    pub date: Option<String>,
}

/// The three-way trading decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Action::Buy),
            "sell" => Some(Action::Sell),
            "hold" => Some(Action::Hold),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
            Action::Hold => "hold",
        }
    }
}

/// Order side on the exchange wire (bid = buy, ask = sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

/// Validated LLM decision. Produced once per cycle; `percentage` is
/// guaranteed to be within 0..=100 by the decision engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingDecision {
    pub action: Action,
    pub percentage: u8,
    pub reason: String,
}

/// News sentiment grades for coin selection. `Negative` is a signal to
/// the executor to sit the cycle out entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    VeryPositive,
    Positive,
    Neutral,
    Negative,
}

/// Output of the multi-coin topic selection step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinSelection {
    pub topic: String,
    pub sentiment: Sentiment,
    pub reason: String,
}

/// Account snapshot taken at cycle start and re-taken after any order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Balances {
    pub krw: Decimal,
    pub coin: Decimal,
    pub current_price: Decimal,
}

impl Balances {
    pub fn portfolio_value(&self) -> Decimal {
        self.krw + self.coin * self.current_price
    }
}

/// Exchange acknowledgement for a submitted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub id: String,
    pub market: String,
    pub side: String,
}

/// Fear & greed index reading (alternative.me).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FearGreed {
    pub value: String,
    pub classification: String,
}

/// Everything the decision engine sees for one cycle, serialized as-is
/// into the LLM user message.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub short_term: Vec<Candle>,
    pub mid_term: Vec<Candle>,
    pub long_term: Vec<Candle>,
    pub news: Vec<NewsItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fear_greed: Option<FearGreed>,
}

/// One persisted ledger row: the full outcome of a completed decision
/// cycle. `portfolio_value == krw_balance + coin_balance * price` holds
/// exactly at write time.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub coin: String,
    pub action: Action,
    pub percentage: u8,
    pub price: Decimal,
    pub coin_balance: Decimal,
    pub krw_balance: Decimal,
    pub portfolio_value: Decimal,
    pub profit_loss: Option<Decimal>,
    pub profit_loss_pct: Option<Decimal>,
    pub reason: String,
}

/// Ledger row before insertion (id assigned by the store).
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub timestamp: DateTime<Utc>,
    pub coin: String,
    pub action: Action,
    pub percentage: u8,
    pub price: Decimal,
    pub coin_balance: Decimal,
    pub krw_balance: Decimal,
    pub portfolio_value: Decimal,
    pub profit_loss: Option<Decimal>,
    pub profit_loss_pct: Option<Decimal>,
    pub reason: String,
}

/// What a finished cycle looked like, reported back to the scheduler for
/// logging only.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleReport {
    /// Cycle ran to persistence. `executed` is false for hold and for
    /// skipped-below-minimum orders.
    Completed {
        coin: String,
        action: Action,
        executed: bool,
        portfolio_value: Decimal,
    },
    /// Multi-coin selection came back negative; nothing was ordered or
    /// recorded.
    SkippedNegativeSentiment { topic: String },
}
