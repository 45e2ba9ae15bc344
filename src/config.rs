// src/config.rs
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::errors::TraderError;

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_min_order_krw() -> Decimal {
    Decimal::from(5000)
}

fn default_fee_rate() -> Decimal {
    // 0.3% taker fee
    Decimal::new(3, 3)
}

fn default_wait_minutes() -> u64 {
    5
}

fn default_news_per_topic() -> usize {
    5
}

fn default_news_locale() -> String {
    "us".to_string()
}

fn default_news_language() -> String {
    "en".to_string()
}

fn default_database_url() -> String {
    "sqlite:trades.db".to_string()
}

fn default_settlement_secs() -> u64 {
    2
}

/// Application configuration, built once at startup from `Settings.toml`
/// plus `APP_`-prefixed environment variables (env wins). Business code
/// never reads the process environment directly.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub upbit_access_key: String,
    pub upbit_secret_key: String,
    pub openai_api_key: String,
    #[serde(default = "default_model")]
    pub openai_model: String,
    /// News lookups are skipped entirely when no SerpAPI key is set.
    #[serde(default)]
    pub serpapi_key: Option<String>,
    /// Fixed trading symbol (e.g. "XRP"). When unset the bot runs in
    /// multi-coin mode and lets the LLM pick the day's best topic.
    #[serde(default)]
    pub coin: Option<String>,
    #[serde(default = "default_min_order_krw")]
    pub min_order_krw: Decimal,
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
    #[serde(default = "default_wait_minutes")]
    pub wait_minutes: u64,
    /// Cap on the coin quantity the bot may touch. Enables the
    /// reserved-balance policy and the first-cycle buy guard.
    #[serde(default)]
    pub max_tradable_coin: Option<Decimal>,
    #[serde(default = "default_news_per_topic")]
    pub news_per_topic: usize,
    #[serde(default = "default_news_locale")]
    pub news_locale: String,
    #[serde(default = "default_news_language")]
    pub news_language: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_settlement_secs")]
    pub settlement_secs: u64,
}

impl AppConfig {
    pub fn new() -> Result<Self, TraderError> {
        let builder = Config::builder()
            .add_source(File::with_name("Settings").required(false))
            .add_source(Environment::with_prefix("APP"));

        let config: AppConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TraderError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Fail fast before any network call is made.
    pub fn validate(&self) -> Result<(), TraderError> {
        if self.upbit_access_key.trim().is_empty() || self.upbit_secret_key.trim().is_empty() {
            return Err(TraderError::Config(
                "upbit_access_key / upbit_secret_key must be set".into(),
            ));
        }
        if self.openai_api_key.trim().is_empty() {
            return Err(TraderError::Config("openai_api_key must be set".into()));
        }
        if self.min_order_krw <= Decimal::ZERO {
            return Err(TraderError::Config("min_order_krw must be positive".into()));
        }
        if self.fee_rate < Decimal::ZERO || self.fee_rate >= Decimal::ONE {
            return Err(TraderError::Config("fee_rate must be within [0, 1)".into()));
        }
        if self.wait_minutes == 0 {
            return Err(TraderError::Config("wait_minutes must be at least 1".into()));
        }
        if self.coin.is_none() && self.serpapi_key.is_none() {
            // Topic selection runs on news; without a news key there is
            // nothing to select from.
            return Err(TraderError::Config(
                "multi-coin mode requires serpapi_key".into(),
            ));
        }
        Ok(())
    }
}
