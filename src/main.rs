// src/main.rs
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenvy::dotenv;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use coinpilot::config::AppConfig;
use coinpilot::connectors::fear_greed::FearGreedClient;
use coinpilot::connectors::serpapi::SerpApiClient;
use coinpilot::connectors::traits::{DecisionProvider, MarketData, NewsProvider, SentimentIndex};
use coinpilot::connectors::upbit::UpbitClient;
use coinpilot::core::executor::{ExecutorSettings, TradeExecutor};
use coinpilot::core::scheduler::Scheduler;
use coinpilot::decision::DecisionEngine;
use coinpilot::storage::ledger::TradeLedger;

fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily("logs", "coinpilot.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let _guard = init_tracing();

    // Fail fast on configuration before touching the network.
    let config = AppConfig::new().context("configuration")?;

    let run_once = std::env::args().any(|a| a == "--once");

    info!("coinpilot starting (exchange: UPBIT)");
    match &config.coin {
        Some(coin) => info!("mode: fixed coin {}", coin),
        None => info!("mode: multi-coin topic selection"),
    }

    let exchange: Arc<dyn MarketData> = Arc::new(UpbitClient::new(
        config.upbit_access_key.clone(),
        config.upbit_secret_key.clone(),
    ));
    let news: Option<Arc<dyn NewsProvider>> = config.serpapi_key.clone().map(|key| {
        Arc::new(SerpApiClient::new(
            key,
            config.news_locale.clone(),
            config.news_language.clone(),
        )) as Arc<dyn NewsProvider>
    });
    if news.is_none() {
        info!("no serpapi_key set, trading without news input");
    }
    let brain: Arc<dyn DecisionProvider> = Arc::new(DecisionEngine::new(
        config.openai_api_key.clone(),
        config.openai_model.clone(),
    ));
    let sentiment: Option<Arc<dyn SentimentIndex>> =
        Some(Arc::new(FearGreedClient::new()) as Arc<dyn SentimentIndex>);

    let ledger = TradeLedger::connect(&config.database_url)
        .await
        .context("opening trade ledger")?;

    let executor = TradeExecutor::new(
        ExecutorSettings::from(&config),
        exchange,
        news,
        brain,
        sentiment,
        ledger,
    );

    if run_once {
        // One-shot invocation: propagate any failure as exit code 1.
        let report = executor.run_cycle().await?;
        info!("single cycle done: {:?}", report);
        return Ok(());
    }

    let scheduler = Scheduler::new(executor, Duration::from_secs(config.wait_minutes * 60));

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received, finishing the current cycle");
                let _ = stop_tx.send(true);
            }
            Err(e) => error!("failed to listen for shutdown signal: {}", e),
        }
    });

    scheduler.run(stop_rx).await;
    Ok(())
}
