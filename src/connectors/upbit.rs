// src/connectors/upbit.rs
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use tracing::{debug, info};
use uuid::Uuid;

use crate::connectors::traits::{Interval, MarketData};
use crate::errors::TraderError;
use crate::types::{Candle, OrderAck, Side};
use crate::utils::retry::RetryPolicy;

const UPBIT_API_URL: &str = "https://api.upbit.com/v1";

/// Upbit caps every candle request at 200 rows.
pub const MAX_CANDLES_PER_PAGE: u32 = 200;

const PROVIDER: &str = "upbit";

/// Controls for the daily-candle historical backfill.
#[derive(Debug, Clone, Copy)]
pub struct BackfillConfig {
    /// Stop once a page's oldest candle predates this year.
    pub cutoff_year: i32,
    /// Hard cap on page requests (200 daily candles each).
    pub max_pages: u32,
    /// Pause between consecutive pages to stay under rate limits.
    pub page_delay: Duration,
    /// Per-page retry budget for HTTP 429 responses.
    pub retry: RetryPolicy,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            cutoff_year: 2017,
            max_pages: 20,
            page_delay: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        }
    }
}

/// Upbit REST client. Public endpoints are unauthenticated; account and
/// order endpoints carry a per-request JWT (HS256 over access key +
/// uuid nonce + SHA-512 query hash). Tokens are never reused across
/// requests, so nonces cannot replay.
pub struct UpbitClient {
    access_key: String,
    secret_key: String,
    http: Client,
    base_url: String,
}

#[derive(Serialize)]
struct TokenClaims<'a> {
    access_key: &'a str,
    nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_hash_alg: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct UpbitCandle {
    timestamp: i64,
    #[serde(with = "rust_decimal::serde::float")]
    opening_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    high_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    low_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    trade_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    candle_acc_trade_volume: Decimal,
}

impl From<UpbitCandle> for Candle {
    fn from(c: UpbitCandle) -> Self {
        Candle {
            time: c.timestamp,
            open: c.opening_price,
            high: c.high_price,
            low: c.low_price,
            close: c.trade_price,
            volume: c.candle_acc_trade_volume,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TickerInfo {
    #[serde(with = "rust_decimal::serde::float")]
    trade_price: Decimal,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    currency: String,
    balance: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    uuid: String,
    market: String,
    side: String,
}

impl UpbitClient {
    pub fn new(access_key: String, secret_key: String) -> Self {
        Self {
            access_key,
            secret_key,
            http: Client::new(),
            base_url: UPBIT_API_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(access_key: String, secret_key: String, base_url: String) -> Self {
        Self {
            access_key,
            secret_key,
            http: Client::new(),
            base_url,
        }
    }

    /// Builds the `Bearer` token for one signed request. `query` is the
    /// canonical (key-sorted, urlencoded) query string of the request
    /// parameters, hashed with SHA-512 when present.
    fn auth_header(&self, query: Option<&str>) -> Result<String, TraderError> {
        let query_hash = query.map(|q| {
            let mut hasher = Sha512::new();
            hasher.update(q.as_bytes());
            hex::encode(hasher.finalize())
        });

        let claims = TokenClaims {
            access_key: &self.access_key,
            nonce: Uuid::new_v4().to_string(),
            query_hash_alg: query_hash.as_ref().map(|_| "SHA512"),
            query_hash,
        };

        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret_key.as_bytes()),
        )
        .map_err(|e| TraderError::provider(PROVIDER, None, format!("token signing: {e}")))?;

        Ok(format!("Bearer {token}"))
    }

    fn canonical_query(params: &BTreeMap<&str, String>) -> Result<String, TraderError> {
        serde_urlencoded::to_string(params)
            .map_err(|e| TraderError::provider(PROVIDER, None, format!("query encoding: {e}")))
    }

    async fn read_error(provider_status: StatusCode, response: reqwest::Response) -> TraderError {
        let body = response.text().await.unwrap_or_default();
        TraderError::provider(PROVIDER, Some(provider_status.as_u16()), body)
    }

    async fn public_get<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        market: &str,
    ) -> Result<T, TraderError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| TraderError::provider(PROVIDER, e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TraderError::NotFound(market.to_string()));
        }
        if !status.is_success() {
            return Err(Self::read_error(status, response).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| TraderError::provider(PROVIDER, None, format!("malformed body: {e}")))
    }

    async fn signed_get<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
    ) -> Result<T, TraderError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let auth = self.auth_header(None)?;

        let response = self
            .http
            .get(&url)
            .header("Authorization", auth)
            .send()
            .await
            .map_err(|e| TraderError::provider(PROVIDER, e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::read_error(status, response).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| TraderError::provider(PROVIDER, None, format!("malformed body: {e}")))
    }

    async fn signed_post<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: BTreeMap<&str, String>,
    ) -> Result<T, TraderError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let query = Self::canonical_query(&params)?;
        let auth = self.auth_header(Some(&query))?;

        let response = self
            .http
            .post(&url)
            .header("Authorization", auth)
            .json(&params)
            .send()
            .await
            .map_err(|e| TraderError::provider(PROVIDER, e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::read_error(status, response).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| TraderError::provider(PROVIDER, None, format!("malformed body: {e}")))
    }

    fn candle_endpoint(interval: Interval) -> &'static str {
        match interval {
            Interval::Minute60 => "/candles/minutes/60",
            Interval::Minute240 => "/candles/minutes/240",
            Interval::Day => "/candles/days",
        }
    }

    /// Walks daily candles backward from now until `cutoff_year`, the
    /// page budget, or a short page, whichever comes first. Pages hit by
    /// HTTP 429 are retried with exponential backoff; any other error
    /// aborts the whole backfill.
    pub async fn fetch_daily_history(
        &self,
        market: &str,
        cfg: &BackfillConfig,
    ) -> Result<Vec<Candle>, TraderError> {
        info!("backfilling daily candles for {} back to {}", market, cfg.cutoff_year);
        paginate_daily_history(
            |to| async move {
                self.get_candles(market, Interval::Day, MAX_CANDLES_PER_PAGE, to.as_deref())
                    .await
            },
            cfg,
        )
        .await
    }
}

#[async_trait]
impl MarketData for UpbitClient {
    async fn get_candles(
        &self,
        market: &str,
        interval: Interval,
        count: u32,
        to: Option<&str>,
    ) -> Result<Vec<Candle>, TraderError> {
        let mut params = vec![
            ("market", market.to_string()),
            ("count", count.min(MAX_CANDLES_PER_PAGE).to_string()),
        ];
        if let Some(to) = to {
            params.push(("to", to.to_string()));
        }

        let raw: Vec<UpbitCandle> = self
            .public_get(Self::candle_endpoint(interval), &params, market)
            .await?;

        // Upbit returns newest first; callers always see oldest first.
        let mut candles: Vec<Candle> = raw.into_iter().map(Candle::from).collect();
        candles.sort_by_key(|c| c.time);
        Ok(candles)
    }

    async fn get_current_price(&self, market: &str) -> Result<Decimal, TraderError> {
        let tickers: Vec<TickerInfo> = self
            .public_get("/ticker", &[("markets", market.to_string())], market)
            .await?;

        tickers
            .first()
            .map(|t| t.trade_price)
            .ok_or_else(|| TraderError::NotFound(market.to_string()))
    }

    async fn get_balance(&self, currency: &str) -> Result<Decimal, TraderError> {
        let accounts: Vec<AccountInfo> = self.signed_get("/accounts").await?;

        let wanted = currency.to_uppercase();
        let Some(account) = accounts.iter().find(|a| a.currency == wanted) else {
            return Ok(Decimal::ZERO);
        };

        account
            .balance
            .parse::<Decimal>()
            .map_err(|e| TraderError::provider(PROVIDER, None, format!("bad balance figure: {e}")))
    }

    async fn buy_market(&self, market: &str, krw_amount: Decimal) -> Result<OrderAck, TraderError> {
        let mut params = BTreeMap::new();
        params.insert("market", market.to_string());
        params.insert("side", Side::Bid.as_str().to_string());
        params.insert("ord_type", "price".to_string());
        // KRW notional is submitted in whole won.
        params.insert("price", krw_amount.floor().to_string());

        debug!("submitting market buy on {} for {} KRW", market, krw_amount.floor());
        let resp: OrderResponse = self.signed_post("/orders", params).await?;
        Ok(OrderAck {
            id: resp.uuid,
            market: resp.market,
            side: resp.side,
        })
    }

    async fn sell_market(&self, market: &str, quantity: Decimal) -> Result<OrderAck, TraderError> {
        let mut params = BTreeMap::new();
        params.insert("market", market.to_string());
        params.insert("side", Side::Ask.as_str().to_string());
        params.insert("ord_type", "market".to_string());
        params.insert("volume", quantity.to_string());

        debug!("submitting market sell on {} of {}", market, quantity);
        let resp: OrderResponse = self.signed_post("/orders", params).await?;
        Ok(OrderAck {
            id: resp.uuid,
            market: resp.market,
            side: resp.side,
        })
    }
}

/// `to` cursor for the page preceding a candle at `oldest_ms`: the prior
/// day's midnight, rendered in the KST format Upbit expects.
pub fn next_to_cursor(oldest_ms: i64) -> Option<String> {
    let prev_day = DateTime::<Utc>::from_timestamp_millis(oldest_ms)? - ChronoDuration::days(1);
    let kst = prev_day + ChronoDuration::hours(9);
    Some(format!("{}T00:00:00+09:00", kst.format("%Y-%m-%d")))
}

fn candle_year(candle: &Candle) -> i32 {
    DateTime::<Utc>::from_timestamp_millis(candle.time)
        .map(|dt| dt.year())
        .unwrap_or(i32::MAX)
}

/// Backward pagination over daily candles, factored out of the HTTP
/// client so the termination rules can be tested against fixtures.
/// `fetch_page` receives the `to` cursor (None for the newest page) and
/// returns one ascending page.
pub async fn paginate_daily_history<F, Fut>(
    mut fetch_page: F,
    cfg: &BackfillConfig,
) -> Result<Vec<Candle>, TraderError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Vec<Candle>, TraderError>>,
{
    let mut all: Vec<Candle> = Vec::new();
    let mut to_cursor: Option<String> = None;

    for page_index in 0..cfg.max_pages {
        if page_index > 0 {
            tokio::time::sleep(cfg.page_delay).await;
        }

        let cursor = to_cursor.clone();
        let page = cfg
            .retry
            .run(|| fetch_page(cursor.clone()), TraderError::is_rate_limited)
            .await?;

        let Some(oldest) = page.first().cloned() else {
            break;
        };
        let page_len = page.len();
        all.extend(page);

        if candle_year(&oldest) < cfg.cutoff_year {
            break;
        }
        if (page_len as u32) < MAX_CANDLES_PER_PAGE {
            break;
        }

        to_cursor = next_to_cursor(oldest.time);
        if to_cursor.is_none() {
            break;
        }
    }

    all.sort_by_key(|c| c.time);
    Ok(all)
}
