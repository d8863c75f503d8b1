//! Execution layer error types.

use qbtc_connectors::BinanceRestError;
use thiserror::Error;

/// Errors that can occur during execution operations.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Exchange communication error (network, unexpected payload)
    #[error("Exchange error: {0}")]
    Exchange(String),

    /// Exchange answered with an API error
    #[error("Exchange API error (HTTP {status}): {code} - {msg}")]
    Api {
        /// HTTP status
        status: u16,
        /// Exchange error code
        code: i64,
        /// Exchange message
        msg: String,
    },

    /// Exchange refused the request for rate limits
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Order was rejected by exchange
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// Request is malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Trading is switched off or the account is in emergency mode
    #[error("Trading disabled: {0}")]
    TradingDisabled(String),

    /// Unknown order or symbol
    #[error("Not found: {0}")]
    NotFound(String),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] qbtc_store::StoreError),

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] qbtc_domain::DomainError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout waiting for operation
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl ExecError {
    /// Whether retrying the same request can succeed.
    ///
    /// Client errors (HTTP 400/401/403), validation failures and
    /// rejections are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecError::Exchange(_) | ExecError::Timeout(_) | ExecError::RateLimited(_) => true,
            ExecError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<BinanceRestError> for ExecError {
    fn from(err: BinanceRestError) -> Self {
        match err {
            BinanceRestError::ApiError { status, code, msg } => {
                ExecError::Api { status, code, msg }
            },
            BinanceRestError::RateLimited { .. } => ExecError::RateLimited(err.to_string()),
            BinanceRestError::Timeout => ExecError::Timeout(err.to_string()),
            BinanceRestError::InvalidParameter(msg) => ExecError::Validation(msg),
            BinanceRestError::SignatureError(_) | BinanceRestError::Limiter(_) => {
                ExecError::Config(err.to_string())
            },
            BinanceRestError::RequestFailed(_) | BinanceRestError::ParseError(_) => {
                ExecError::Exchange(err.to_string())
            },
        }
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
