// src/errors.rs
use thiserror::Error;

/// Error taxonomy for the trading pipeline.
///
/// Transport and JSON errors from third-party APIs are wrapped into
/// `Provider` at the client boundary; raw `reqwest`/`serde_json` errors
/// never cross a module seam. An order that is too small to submit is a
/// logged skip outcome, not an error, so it has no variant here.
#[derive(Debug, Error)]
pub enum TraderError {
    /// Non-2xx or malformed response from a third-party API.
    #[error("{provider} API error (HTTP {status:?}): {message}")]
    Provider {
        provider: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// Unknown market / symbol (HTTP 404 from the exchange).
    #[error("market not found: {0}")]
    NotFound(String),

    /// LLM output failed parsing or schema/range validation.
    #[error("decision rejected: {0}")]
    Decision(String),

    /// Missing or invalid configuration, raised at startup.
    #[error("config error: {0}")]
    Config(String),

    /// Ledger storage failure.
    #[error("ledger error: {0}")]
    Db(String),
}

impl TraderError {
    pub fn provider(
        provider: &'static str,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider,
            status,
            message: message.into(),
        }
    }

    /// True for responses worth retrying (rate limiting).
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::Provider {
                status: Some(429),
                ..
            }
        )
    }
}

impl From<sqlx::Error> for TraderError {
    fn from(e: sqlx::Error) -> Self {
        Self::Db(e.to_string())
    }
}
