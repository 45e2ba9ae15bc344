// src/storage/ledger.rs
//! Append-only trade ledger on SQLite. One row per completed decision
//! cycle; rows are never updated or deleted. Numeric fields are stored
//! as exact decimal strings so repeated read/write cycles cannot drift.
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::errors::TraderError;
use crate::types::{Action, NewTrade, TradeRecord};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    coin TEXT NOT NULL,
    decision TEXT NOT NULL,
    percentage TEXT NOT NULL,
    price TEXT NOT NULL,
    coin_balance TEXT NOT NULL,
    krw_balance TEXT NOT NULL,
    portfolio_value TEXT NOT NULL,
    profit_loss TEXT,
    profit_loss_pct TEXT,
    reason TEXT NOT NULL
);
"#;

/// Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct TradeLedger {
    pool: SqlitePool,
}

impl TradeLedger {
    /// Opens (creating if missing) the ledger database and ensures the
    /// schema exists. A single connection is enough for the strictly
    /// sequential trade loop and keeps `sqlite::memory:` tests honest.
    pub async fn connect(url: &str) -> Result<Self, TraderError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Appends one row and returns its id.
    pub async fn append(&self, trade: &NewTrade) -> Result<i64, TraderError> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (
                timestamp, coin, decision, percentage, price,
                coin_balance, krw_balance, portfolio_value,
                profit_loss, profit_loss_pct, reason
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(trade.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(&trade.coin)
        .bind(trade.action.as_str())
        .bind(trade.percentage.to_string())
        .bind(trade.price.to_string())
        .bind(trade.coin_balance.to_string())
        .bind(trade.krw_balance.to_string())
        .bind(trade.portfolio_value.to_string())
        .bind(trade.profit_loss.map(|d| d.to_string()))
        .bind(trade.profit_loss_pct.map(|d| d.to_string()))
        .bind(&trade.reason)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent rows first, optionally limited.
    pub async fn list_by_recency(&self, limit: Option<i64>) -> Result<Vec<TradeRecord>, TraderError> {
        let rows = sqlx::query(
            "SELECT * FROM trades ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// The very first row ever appended, used to recover the initial
    /// coin balance and baseline portfolio value.
    pub async fn first(&self) -> Result<Option<TradeRecord>, TraderError> {
        let row = sqlx::query("SELECT * FROM trades ORDER BY timestamp ASC, id ASC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }
}

fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, TraderError> {
    let raw: String = row
        .try_get(column)
        .map_err(|e| TraderError::Db(e.to_string()))?;
    raw.parse::<Decimal>()
        .map_err(|e| TraderError::Db(format!("bad decimal in column {column}: {e}")))
}

fn optional_decimal_column(row: &SqliteRow, column: &str) -> Result<Option<Decimal>, TraderError> {
    let raw: Option<String> = row
        .try_get(column)
        .map_err(|e| TraderError::Db(e.to_string()))?;
    raw.map(|s| {
        s.parse::<Decimal>()
            .map_err(|e| TraderError::Db(format!("bad decimal in column {column}: {e}")))
    })
    .transpose()
}

fn row_to_record(row: &SqliteRow) -> Result<TradeRecord, TraderError> {
    let timestamp_raw: String = row
        .try_get("timestamp")
        .map_err(|e| TraderError::Db(e.to_string()))?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp_raw)
        .map_err(|e| TraderError::Db(format!("bad timestamp: {e}")))?
        .with_timezone(&Utc);

    let decision_raw: String = row
        .try_get("decision")
        .map_err(|e| TraderError::Db(e.to_string()))?;
    let action = Action::parse(&decision_raw)
        .ok_or_else(|| TraderError::Db(format!("unknown decision '{decision_raw}'")))?;

    let percentage_raw: String = row
        .try_get("percentage")
        .map_err(|e| TraderError::Db(e.to_string()))?;
    let percentage = percentage_raw
        .parse::<u8>()
        .map_err(|e| TraderError::Db(format!("bad percentage: {e}")))?;

    Ok(TradeRecord {
        id: row.try_get("id").map_err(|e| TraderError::Db(e.to_string()))?,
        timestamp,
        coin: row
            .try_get("coin")
            .map_err(|e| TraderError::Db(e.to_string()))?,
        action,
        percentage,
        price: decimal_column(row, "price")?,
        coin_balance: decimal_column(row, "coin_balance")?,
        krw_balance: decimal_column(row, "krw_balance")?,
        portfolio_value: decimal_column(row, "portfolio_value")?,
        profit_loss: optional_decimal_column(row, "profit_loss")?,
        profit_loss_pct: optional_decimal_column(row, "profit_loss_pct")?,
        reason: row
            .try_get("reason")
            .map_err(|e| TraderError::Db(e.to_string()))?,
    })
}
