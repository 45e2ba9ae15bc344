// tests/cycle.rs
//! Full-cycle executor tests against in-memory fakes for the exchange,
//! the news provider and the decision engine. The ledger is a real
//! in-memory SQLite database.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;

use coinpilot::connectors::traits::{DecisionProvider, Interval, MarketData, NewsProvider};
use coinpilot::core::executor::{ExecutorSettings, TradeExecutor};
use coinpilot::core::scheduler::Scheduler;
use coinpilot::errors::TraderError;
use coinpilot::storage::ledger::TradeLedger;
use coinpilot::types::{
    Action, Candle, CoinSelection, CycleReport, MarketSnapshot, NewTrade, NewsItem, OrderAck,
    Sentiment, TradingDecision,
};

fn candle(time: i64) -> Candle {
    Candle {
        time,
        open: dec!(100),
        high: dec!(110),
        low: dec!(90),
        close: dec!(105),
        volume: dec!(1000),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FakeOrder {
    Buy { market: String, krw: Decimal },
    Sell { market: String, quantity: Decimal },
}

/// Exchange double: fixed price, mutable balances, optional post-order
/// balance override so settlement re-reads observe the fill.
struct FakeExchange {
    krw: Mutex<Decimal>,
    coin: Mutex<Decimal>,
    price: Decimal,
    after_order: Option<(Decimal, Decimal)>,
    orders: Mutex<Vec<FakeOrder>>,
}

impl FakeExchange {
    fn new(krw: Decimal, coin: Decimal, price: Decimal) -> Self {
        Self {
            krw: Mutex::new(krw),
            coin: Mutex::new(coin),
            price,
            after_order: None,
            orders: Mutex::new(Vec::new()),
        }
    }

    fn with_post_trade(mut self, krw: Decimal, coin: Decimal) -> Self {
        self.after_order = Some((krw, coin));
        self
    }

    fn orders(&self) -> Vec<FakeOrder> {
        self.orders.lock().unwrap().clone()
    }

    fn apply_fill(&self) {
        if let Some((krw, coin)) = self.after_order {
            *self.krw.lock().unwrap() = krw;
            *self.coin.lock().unwrap() = coin;
        }
    }
}

#[async_trait]
impl MarketData for FakeExchange {
    async fn get_candles(
        &self,
        _market: &str,
        _interval: Interval,
        count: u32,
        _to: Option<&str>,
    ) -> Result<Vec<Candle>, TraderError> {
        Ok((0..i64::from(count.min(5))).map(|i| candle(i * 1000)).collect())
    }

    async fn get_current_price(&self, _market: &str) -> Result<Decimal, TraderError> {
        Ok(self.price)
    }

    async fn get_balance(&self, currency: &str) -> Result<Decimal, TraderError> {
        if currency == "KRW" {
            Ok(*self.krw.lock().unwrap())
        } else {
            Ok(*self.coin.lock().unwrap())
        }
    }

    async fn buy_market(&self, market: &str, krw_amount: Decimal) -> Result<OrderAck, TraderError> {
        self.orders.lock().unwrap().push(FakeOrder::Buy {
            market: market.to_string(),
            krw: krw_amount,
        });
        self.apply_fill();
        Ok(OrderAck {
            id: "order-1".into(),
            market: market.to_string(),
            side: "bid".into(),
        })
    }

    async fn sell_market(&self, market: &str, quantity: Decimal) -> Result<OrderAck, TraderError> {
        self.orders.lock().unwrap().push(FakeOrder::Sell {
            market: market.to_string(),
            quantity,
        });
        self.apply_fill();
        Ok(OrderAck {
            id: "order-2".into(),
            market: market.to_string(),
            side: "ask".into(),
        })
    }
}

struct FakeNews;

#[async_trait]
impl NewsProvider for FakeNews {
    async fn get_news(&self, topic: &str, _limit: usize) -> Result<Vec<NewsItem>, TraderError> {
        Ok(vec![NewsItem {
            title: Some(format!("{topic} rallies")),
            date: Some("1 hour ago".into()),
        }])
    }
}

struct FakeBrain {
    decision: TradingDecision,
    selection: Option<CoinSelection>,
}

impl FakeBrain {
    fn deciding(action: Action, percentage: u8) -> Self {
        Self {
            decision: TradingDecision {
                action,
                percentage,
                reason: "fixture".into(),
            },
            selection: None,
        }
    }
}

#[async_trait]
impl DecisionProvider for FakeBrain {
    async fn decide(&self, _snapshot: &MarketSnapshot) -> Result<TradingDecision, TraderError> {
        Ok(self.decision.clone())
    }

    async fn select_best_coin(
        &self,
        _news_by_topic: &HashMap<String, Vec<NewsItem>>,
    ) -> Result<CoinSelection, TraderError> {
        self.selection
            .clone()
            .ok_or_else(|| TraderError::Decision("no selection configured".into()))
    }
}

fn settings(fee_rate: Decimal, max_tradable_coin: Option<Decimal>) -> ExecutorSettings {
    ExecutorSettings {
        coin: Some("BTC".into()),
        min_order_krw: dec!(5000),
        fee_rate,
        max_tradable_coin,
        news_per_topic: 5,
        settlement: Duration::from_millis(0),
    }
}

async fn memory_ledger() -> TradeLedger {
    TradeLedger::connect("sqlite::memory:").await.unwrap()
}

fn seed_row(coin_balance: Decimal, portfolio_value: Decimal) -> NewTrade {
    NewTrade {
        timestamp: Utc::now(),
        coin: "BTC".into(),
        action: Action::Buy,
        percentage: 10,
        price: dec!(100),
        coin_balance,
        krw_balance: dec!(0),
        portfolio_value,
        profit_loss: None,
        profit_loss_pct: None,
        reason: "seed".into(),
    }
}

fn executor(
    settings: ExecutorSettings,
    exchange: Arc<FakeExchange>,
    brain: FakeBrain,
    ledger: TradeLedger,
) -> TradeExecutor {
    TradeExecutor::new(
        settings,
        exchange,
        Some(Arc::new(FakeNews)),
        Arc::new(brain),
        None,
        ledger,
    )
}

#[tokio::test]
async fn buy_cycle_places_order_and_records_settled_balances() {
    let exchange = Arc::new(
        FakeExchange::new(dec!(100000), dec!(0), dec!(100))
            .with_post_trade(dec!(50150), dec!(497)),
    );
    let ledger = memory_ledger().await;
    let exec = executor(
        settings(dec!(0.003), None),
        exchange.clone(),
        FakeBrain::deciding(Action::Buy, 50),
        ledger.clone(),
    );

    let report = exec.run_cycle().await.unwrap();
    assert_eq!(
        report,
        CycleReport::Completed {
            coin: "BTC".into(),
            action: Action::Buy,
            executed: true,
            portfolio_value: dec!(50150) + dec!(497) * dec!(100),
        }
    );

    // 100000 * 0.5 * 0.997
    assert_eq!(
        exchange.orders(),
        vec![FakeOrder::Buy {
            market: "KRW-BTC".into(),
            krw: dec!(49850.000),
        }]
    );

    // The ledger row reflects the settled post-trade figures, and the
    // portfolio identity holds exactly.
    let rows = ledger.list_by_recency(None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].krw_balance, dec!(50150));
    assert_eq!(rows[0].coin_balance, dec!(497));
    assert_eq!(
        rows[0].portfolio_value,
        rows[0].krw_balance + rows[0].coin_balance * rows[0].price
    );
}

#[tokio::test]
async fn buy_notional_at_exact_minimum_is_skipped() {
    // fee 0: 10000 * 50% = exactly 5000, which is not strictly above the
    // minimum, so no order goes out.
    let exchange = Arc::new(FakeExchange::new(dec!(10000), dec!(0), dec!(100)));
    let ledger = memory_ledger().await;
    let exec = executor(
        settings(dec!(0), None),
        exchange.clone(),
        FakeBrain::deciding(Action::Buy, 50),
        ledger.clone(),
    );

    let report = exec.run_cycle().await.unwrap();
    assert!(exchange.orders().is_empty());
    assert_eq!(
        report,
        CycleReport::Completed {
            coin: "BTC".into(),
            action: Action::Buy,
            executed: false,
            portfolio_value: dec!(10000),
        }
    );

    // Unexecuted path carries the pre-cycle balances forward.
    let rows = ledger.list_by_recency(None).await.unwrap();
    assert_eq!(rows[0].krw_balance, dec!(10000));
    assert_eq!(rows[0].coin_balance, dec!(0));
}

#[tokio::test]
async fn buy_notional_just_above_minimum_executes() {
    // 10000.02 * 50% = 5000.01 > 5000.
    let exchange = Arc::new(
        FakeExchange::new(dec!(10000.02), dec!(0), dec!(100)).with_post_trade(dec!(5000.01), dec!(50)),
    );
    let ledger = memory_ledger().await;
    let exec = executor(
        settings(dec!(0), None),
        exchange.clone(),
        FakeBrain::deciding(Action::Buy, 50),
        ledger.clone(),
    );

    exec.run_cycle().await.unwrap();
    assert_eq!(
        exchange.orders(),
        vec![FakeOrder::Buy {
            market: "KRW-BTC".into(),
            krw: dec!(5000.01),
        }]
    );
}

#[tokio::test]
async fn hold_records_pre_cycle_balances_without_orders() {
    let exchange = Arc::new(FakeExchange::new(dec!(850000), dec!(0.5), dec!(95000)));
    let ledger = memory_ledger().await;
    let exec = executor(
        settings(dec!(0.003), None),
        exchange.clone(),
        FakeBrain::deciding(Action::Hold, 0),
        ledger.clone(),
    );

    exec.run_cycle().await.unwrap();
    assert!(exchange.orders().is_empty());

    let rows = ledger.list_by_recency(None).await.unwrap();
    assert_eq!(rows[0].action, Action::Hold);
    assert_eq!(rows[0].krw_balance, dec!(850000));
    assert_eq!(rows[0].coin_balance, dec!(0.5));
    assert_eq!(rows[0].portfolio_value, dec!(850000) + dec!(0.5) * dec!(95000));
}

#[tokio::test]
async fn sell_below_minimum_value_is_skipped() {
    // 0.2 coin at price 100 is worth 20 KRW, far below the minimum.
    let exchange = Arc::new(FakeExchange::new(dec!(1000), dec!(0.2), dec!(100)));
    let ledger = memory_ledger().await;
    let exec = executor(
        settings(dec!(0), None),
        exchange.clone(),
        FakeBrain::deciding(Action::Sell, 100),
        ledger.clone(),
    );

    let report = exec.run_cycle().await.unwrap();
    assert!(exchange.orders().is_empty());
    assert!(matches!(
        report,
        CycleReport::Completed { executed: false, .. }
    ));
}

#[tokio::test]
async fn first_cycle_under_capped_policy_downgrades_buy_to_hold() {
    let exchange = Arc::new(FakeExchange::new(dec!(1000000), dec!(500), dec!(100)));
    let ledger = memory_ledger().await;
    let exec = executor(
        settings(dec!(0.003), Some(dec!(1000))),
        exchange.clone(),
        FakeBrain::deciding(Action::Buy, 80),
        ledger.clone(),
    );

    exec.run_cycle().await.unwrap();

    // No order despite a confident buy and plenty of KRW.
    assert!(exchange.orders().is_empty());
    let rows = ledger.list_by_recency(None).await.unwrap();
    assert_eq!(rows[0].action, Action::Hold);
    assert_eq!(rows[0].percentage, 0);
}

#[tokio::test]
async fn capped_buy_is_not_downgraded_after_first_cycle() {
    let exchange = Arc::new(
        FakeExchange::new(dec!(1000000), dec!(500), dec!(100)).with_post_trade(dec!(501500), dec!(5480)),
    );
    let ledger = memory_ledger().await;
    ledger.append(&seed_row(dec!(500), dec!(1050000))).await.unwrap();

    let exec = executor(
        settings(dec!(0.003), Some(dec!(1000))),
        exchange.clone(),
        FakeBrain::deciding(Action::Buy, 50),
        ledger.clone(),
    );

    exec.run_cycle().await.unwrap();
    assert_eq!(exchange.orders().len(), 1);
}

#[tokio::test]
async fn capped_sell_releases_only_the_effective_balance() {
    // initial 2000 (ledger), cap 1000 -> 1000 reserved; current 1500 ->
    // 500 tradable, all of it sold (fee 0, 100%).
    let exchange = Arc::new(
        FakeExchange::new(dec!(0), dec!(1500), dec!(100)).with_post_trade(dec!(50000), dec!(1000)),
    );
    let ledger = memory_ledger().await;
    ledger.append(&seed_row(dec!(2000), dec!(200000))).await.unwrap();

    let exec = executor(
        settings(dec!(0), Some(dec!(1000))),
        exchange.clone(),
        FakeBrain::deciding(Action::Sell, 100),
        ledger.clone(),
    );

    exec.run_cycle().await.unwrap();
    assert_eq!(
        exchange.orders(),
        vec![FakeOrder::Sell {
            market: "KRW-BTC".into(),
            quantity: dec!(500),
        }]
    );
}

#[tokio::test]
async fn profit_loss_is_measured_against_the_first_row() {
    let exchange = Arc::new(FakeExchange::new(dec!(1100000), dec!(0), dec!(100)));
    let ledger = memory_ledger().await;
    ledger.append(&seed_row(dec!(0), dec!(1000000))).await.unwrap();

    let exec = executor(
        settings(dec!(0.003), None),
        exchange.clone(),
        FakeBrain::deciding(Action::Hold, 0),
        ledger.clone(),
    );

    exec.run_cycle().await.unwrap();
    let rows = ledger.list_by_recency(Some(1)).await.unwrap();
    assert_eq!(rows[0].profit_loss, Some(dec!(100000)));
    assert_eq!(rows[0].profit_loss_pct, Some(dec!(10)));
}

#[tokio::test]
async fn negative_sentiment_skips_the_cycle_entirely() {
    let exchange = Arc::new(FakeExchange::new(dec!(1000000), dec!(0), dec!(100)));
    let ledger = memory_ledger().await;

    let brain = FakeBrain {
        decision: TradingDecision {
            action: Action::Buy,
            percentage: 100,
            reason: "should never be consulted".into(),
        },
        selection: Some(CoinSelection {
            topic: "bitcoin".into(),
            sentiment: Sentiment::Negative,
            reason: "regulatory crackdown".into(),
        }),
    };

    let mut multi = settings(dec!(0.003), None);
    multi.coin = None;
    let exec = executor(multi, exchange.clone(), brain, ledger.clone());

    let report = exec.run_cycle().await.unwrap();
    assert_eq!(
        report,
        CycleReport::SkippedNegativeSentiment {
            topic: "bitcoin".into()
        }
    );
    assert!(exchange.orders().is_empty());
    assert!(ledger.list_by_recency(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn multi_coin_mode_trades_the_selected_topic() {
    let exchange = Arc::new(FakeExchange::new(dec!(850000), dec!(0), dec!(100)));
    let ledger = memory_ledger().await;

    let brain = FakeBrain {
        decision: TradingDecision {
            action: Action::Hold,
            percentage: 0,
            reason: "waiting for confirmation".into(),
        },
        selection: Some(CoinSelection {
            topic: "solana".into(),
            sentiment: Sentiment::Positive,
            reason: "ecosystem growth".into(),
        }),
    };

    let mut multi = settings(dec!(0.003), None);
    multi.coin = None;
    let exec = executor(multi, exchange.clone(), brain, ledger.clone());

    let report = exec.run_cycle().await.unwrap();
    assert!(matches!(
        report,
        CycleReport::Completed { ref coin, .. } if coin == "SOL"
    ));
    assert_eq!(ledger.list_by_recency(None).await.unwrap()[0].coin, "SOL");
}

#[tokio::test]
async fn scheduler_does_not_start_a_cycle_once_stopped() {
    let exchange = Arc::new(FakeExchange::new(dec!(1000000), dec!(0), dec!(100)));
    let ledger = memory_ledger().await;
    let exec = executor(
        settings(dec!(0.003), None),
        exchange.clone(),
        FakeBrain::deciding(Action::Buy, 100),
        ledger,
    );

    let scheduler = Scheduler::new(exec, Duration::from_secs(60));
    let (tx, rx) = watch::channel(true);
    scheduler.run(rx).await;
    drop(tx);

    assert!(exchange.orders().is_empty());
}
