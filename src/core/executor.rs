// src/core/executor.rs
//! One trading cycle end to end: pick a target, gather market data and
//! news, ask the decision engine, size and submit the order, reconcile
//! balances, append the ledger row. Collaborator errors propagate to the
//! scheduler untouched; the executor performs no rollback. An order that
//! fills but whose reconciliation or persistence then fails stays filled
//! on the exchange and unrecorded here.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::connectors::traits::{
    DecisionProvider, Interval, MarketData, NewsProvider, SentimentIndex,
};
use crate::errors::TraderError;
use crate::storage::ledger::TradeLedger;
use crate::types::{
    Action, Balances, CycleReport, MarketSnapshot, NewTrade, NewsItem, Sentiment, TradingDecision,
};

/// Topics offered to the LLM in multi-coin mode and their markets.
const TOPIC_COINS: &[(&str, &str)] = &[
    ("bitcoin", "BTC"),
    ("ethereum", "ETH"),
    ("solana", "SOL"),
    ("ripple", "XRP"),
];

const MULTI_COIN_TOPICS: &[&str] = &["bitcoin", "ethereum", "solana"];

fn symbol_for_topic(topic: &str) -> Option<&'static str> {
    TOPIC_COINS
        .iter()
        .find(|(t, _)| *t == topic)
        .map(|(_, sym)| *sym)
}

fn topic_for_symbol(symbol: &str) -> String {
    TOPIC_COINS
        .iter()
        .find(|(_, s)| *s == symbol)
        .map(|(t, _)| (*t).to_string())
        .unwrap_or_else(|| symbol.to_lowercase())
}

/// The slice of configuration the executor needs per cycle.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub coin: Option<String>,
    pub min_order_krw: Decimal,
    pub fee_rate: Decimal,
    pub max_tradable_coin: Option<Decimal>,
    pub news_per_topic: usize,
    pub settlement: Duration,
}

impl From<&AppConfig> for ExecutorSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            coin: cfg.coin.clone(),
            min_order_krw: cfg.min_order_krw,
            fee_rate: cfg.fee_rate,
            max_tradable_coin: cfg.max_tradable_coin,
            news_per_topic: cfg.news_per_topic,
            settlement: Duration::from_secs(cfg.settlement_secs),
        }
    }
}

pub struct TradeExecutor {
    settings: ExecutorSettings,
    exchange: Arc<dyn MarketData>,
    news: Option<Arc<dyn NewsProvider>>,
    brain: Arc<dyn DecisionProvider>,
    sentiment: Option<Arc<dyn SentimentIndex>>,
    ledger: TradeLedger,
}

/// Gross KRW amount a buy decision commits, net of the taker fee.
pub fn buy_notional(krw: Decimal, percentage: u8, fee_rate: Decimal) -> Decimal {
    krw * Decimal::from(percentage) / Decimal::ONE_HUNDRED * (Decimal::ONE - fee_rate)
}

/// Coin quantity a sell decision releases, net of the taker fee.
pub fn sell_quantity(effective: Decimal, percentage: u8, fee_rate: Decimal) -> Decimal {
    effective * Decimal::from(percentage) / Decimal::ONE_HUNDRED * (Decimal::ONE - fee_rate)
}

/// Tradable portion of the current holding under the reservation policy:
/// whatever the position started with beyond `cap` is held back.
/// Always within `0..=current`.
pub fn effective_balance(current: Decimal, initial: Decimal, cap: Decimal) -> Decimal {
    let reserved = (initial - cap).max(Decimal::ZERO);
    (current - reserved).max(Decimal::ZERO)
}

impl TradeExecutor {
    pub fn new(
        settings: ExecutorSettings,
        exchange: Arc<dyn MarketData>,
        news: Option<Arc<dyn NewsProvider>>,
        brain: Arc<dyn DecisionProvider>,
        sentiment: Option<Arc<dyn SentimentIndex>>,
        ledger: TradeLedger,
    ) -> Self {
        Self {
            settings,
            exchange,
            news,
            brain,
            sentiment,
            ledger,
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, TraderError> {
        // 1. Select the target coin.
        let (symbol, preselected_news) = match &self.settings.coin {
            Some(symbol) => (symbol.clone(), None),
            None => match self.select_target().await? {
                Selected::Coin { symbol, news } => (symbol, Some(news)),
                Selected::SkipNegative { topic } => {
                    warn!("sentiment for '{}' is negative, sitting this cycle out", topic);
                    return Ok(CycleReport::SkippedNegativeSentiment { topic });
                }
            },
        };
        let market = format!("KRW-{symbol}");
        info!("cycle target: {}", market);

        // 2. Gather candles, news and the fear & greed reading in parallel.
        let news_fut = async {
            match (&preselected_news, &self.news) {
                (Some(items), _) => Ok(items.clone()),
                (None, Some(provider)) => {
                    provider
                        .get_news(&topic_for_symbol(&symbol), self.settings.news_per_topic)
                        .await
                }
                (None, None) => Ok(Vec::new()),
            }
        };
        let fear_fut = async {
            match &self.sentiment {
                Some(gauge) => match gauge.fetch().await {
                    Ok(reading) => Some(reading),
                    Err(e) => {
                        warn!("fear & greed lookup failed, continuing without it: {}", e);
                        None
                    }
                },
                None => None,
            }
        };

        let (short_term, mid_term, long_term, news, fear_greed) = tokio::join!(
            self.exchange.get_candles(&market, Interval::Minute60, 24, None),
            self.exchange.get_candles(&market, Interval::Minute240, 30, None),
            self.exchange.get_candles(&market, Interval::Day, 30, None),
            news_fut,
            fear_fut,
        );

        let snapshot = MarketSnapshot {
            short_term: short_term?,
            mid_term: mid_term?,
            long_term: long_term?,
            news: news?,
            fear_greed,
        };

        // 3. Ask the decision engine.
        let mut decision = self.brain.decide(&snapshot).await?;
        info!(
            "decision: {} {}% ({})",
            decision.action.as_str(),
            decision.percentage,
            decision.reason
        );

        // 4. Resolve tradable balances.
        let balances = self.read_balances(&market, &symbol).await?;
        info!(
            "balances: {} KRW, {} {}, price {}",
            balances.krw, balances.coin, symbol, balances.current_price
        );

        let first_row = self.ledger.first().await?;
        let effective = match self.settings.max_tradable_coin {
            Some(cap) => {
                let initial = first_row
                    .as_ref()
                    .map(|r| r.coin_balance)
                    .unwrap_or(balances.coin);
                if first_row.is_none() && decision.action == Action::Buy {
                    // The capped setup starts out fully in coin with no
                    // KRW to deploy, so the very first buy is meaningless.
                    warn!("first cycle under the capped policy: downgrading buy to hold");
                    decision = TradingDecision {
                        action: Action::Hold,
                        percentage: 0,
                        reason: decision.reason,
                    };
                }
                effective_balance(balances.coin, initial, cap)
            }
            None => balances.coin,
        };

        // 5. Size and submit the order, then reconcile.
        let (final_balances, executed) = match decision.action {
            Action::Buy => {
                let notional = buy_notional(balances.krw, decision.percentage, self.settings.fee_rate);
                if notional > self.settings.min_order_krw {
                    info!("market buy on {} for {} KRW", market, notional.floor());
                    self.exchange.buy_market(&market, notional).await?;
                    (self.settle_and_reread(&market, &symbol).await?, true)
                } else {
                    warn!(
                        "buy skipped: {} KRW is not above the {} KRW minimum",
                        notional, self.settings.min_order_krw
                    );
                    (balances, false)
                }
            }
            Action::Sell => {
                let quantity = sell_quantity(effective, decision.percentage, self.settings.fee_rate);
                let value = quantity * balances.current_price;
                if effective > Decimal::ZERO && value > self.settings.min_order_krw {
                    info!("market sell on {} of {} {}", market, quantity, symbol);
                    self.exchange.sell_market(&market, quantity).await?;
                    (self.settle_and_reread(&market, &symbol).await?, true)
                } else {
                    warn!(
                        "sell skipped: value {} KRW (effective balance {}) is not above the {} KRW minimum",
                        value, effective, self.settings.min_order_krw
                    );
                    (balances, false)
                }
            }
            Action::Hold => {
                info!("holding position");
                (balances, false)
            }
        };

        // 6. Persist the cycle.
        let portfolio_value = final_balances.portfolio_value();
        let (profit_loss, profit_loss_pct) = match &first_row {
            Some(first) if !first.portfolio_value.is_zero() => {
                let pl = portfolio_value - first.portfolio_value;
                (
                    Some(pl),
                    Some(pl / first.portfolio_value * Decimal::ONE_HUNDRED),
                )
            }
            _ => (None, None),
        };

        let record = NewTrade {
            timestamp: Utc::now(),
            coin: symbol.clone(),
            action: decision.action,
            percentage: decision.percentage,
            price: final_balances.current_price,
            coin_balance: final_balances.coin,
            krw_balance: final_balances.krw,
            portfolio_value,
            profit_loss,
            profit_loss_pct,
            reason: decision.reason,
        };
        let id = self.ledger.append(&record).await?;
        info!(
            "cycle recorded (row {}): portfolio value {} KRW",
            id, portfolio_value
        );

        Ok(CycleReport::Completed {
            coin: symbol,
            action: record.action,
            executed,
            portfolio_value,
        })
    }

    /// Multi-coin mode: batch news over the fixed topic set and let the
    /// LLM pick. Negative sentiment short-circuits the cycle.
    async fn select_target(&self) -> Result<Selected, TraderError> {
        let provider = self.news.as_ref().ok_or_else(|| {
            TraderError::Config("multi-coin mode requires a news provider".into())
        })?;

        let by_topic = provider
            .get_news_batch(MULTI_COIN_TOPICS, self.settings.news_per_topic)
            .await;
        let selection = self.brain.select_best_coin(&by_topic).await?;
        info!(
            "selected topic '{}' ({:?}): {}",
            selection.topic, selection.sentiment, selection.reason
        );

        if selection.sentiment == Sentiment::Negative {
            return Ok(Selected::SkipNegative {
                topic: selection.topic,
            });
        }

        let symbol = symbol_for_topic(&selection.topic).ok_or_else(|| {
            TraderError::Decision(format!("no market mapping for topic '{}'", selection.topic))
        })?;
        let news = by_topic.get(&selection.topic).cloned().unwrap_or_default();
        Ok(Selected::Coin {
            symbol: symbol.to_string(),
            news,
        })
    }

    async fn read_balances(&self, market: &str, symbol: &str) -> Result<Balances, TraderError> {
        let krw = self.exchange.get_balance("KRW").await?;
        let coin = self.exchange.get_balance(symbol).await?;
        let current_price = self.exchange.get_current_price(market).await?;
        Ok(Balances {
            krw,
            coin,
            current_price,
        })
    }

    /// Post-order settlement: give the exchange a moment, then trust
    /// only the re-read figures.
    async fn settle_and_reread(&self, market: &str, symbol: &str) -> Result<Balances, TraderError> {
        tokio::time::sleep(self.settings.settlement).await;
        self.read_balances(market, symbol).await
    }
}

enum Selected {
    Coin { symbol: String, news: Vec<NewsItem> },
    SkipNegative { topic: String },
}
