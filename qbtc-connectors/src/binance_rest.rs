//! Binance REST API Client for USD-M Futures
//!
//! Provides REST API integration for:
//! - Market data (price, depth, klines)
//! - Order placement, cancellation and queries
//! - Account and position risk snapshots
//! - User-data stream listen keys
//!
//! # Authentication
//!
//! Binance uses API key + secret with HMAC SHA256 signatures.
//! All signed requests require:
//! - `X-MBX-APIKEY` header
//! - `timestamp` (and `recvWindow`) query parameters
//! - `signature` query parameter (HMAC SHA256 of the query string, hex)
//!
//! Every request passes through a shared [`RateLimiter`] before it is sent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use qbtc_domain::{Kline, OrderBook, OrderRequest, OrderType, Price, Symbol};

use crate::rate_limit::{
    depth_weight, klines_weight, RateLimitError, RateLimiter, ACCOUNT_WEIGHT, ORDER_WEIGHT,
    POSITION_RISK_WEIGHT, PRICE_WEIGHT,
};

// =============================================================================
// Constants
// =============================================================================

/// Binance USD-M futures REST base URL
pub const BINANCE_FUTURES_URL: &str = "https://fapi.binance.com";

/// Binance USD-M futures testnet REST base URL
pub const BINANCE_FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Signed request validity window (ms)
const RECV_WINDOW_MS: u64 = 5000;

/// Header carrying the server's view of used request weight
const USED_WEIGHT_HEADER: &str = "X-MBX-USED-WEIGHT-1M";

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in the Binance REST client.
#[derive(Debug, Clone, Error)]
pub enum BinanceRestError {
    /// Failed to build request signature
    #[error("Failed to build signature: {0}")]
    SignatureError(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// API returned error
    #[error("Binance API error (HTTP {status}): {code} - {msg}")]
    ApiError {
        /// HTTP status
        status: u16,
        /// Binance error code
        code: i64,
        /// Binance error message
        msg: String,
    },

    /// Server refused the request for exceeding its limits (HTTP 429/418)
    #[error("Rate limited by Binance, retry after {retry_after:?}")]
    RateLimited {
        /// Server-suggested delay
        retry_after: Option<Duration>,
    },

    /// Local rate limiter refused the request
    #[error("Rate limiter: {0}")]
    Limiter(#[from] RateLimitError),

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl BinanceRestError {
    /// HTTP status of an API error, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            BinanceRestError::ApiError { status, .. } => Some(*status),
            BinanceRestError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

/// How a request authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Security {
    /// Public endpoint
    None,
    /// API key header only (listen key endpoints)
    ApiKey,
    /// API key header plus HMAC signature
    Signed,
}

// =============================================================================
// Signing
// =============================================================================

/// HMAC-SHA256 of `query` keyed with `secret`, hex encoded.
pub fn sign_query(secret: &str, query: &str) -> Result<String, BinanceRestError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BinanceRestError::SignatureError(format!("HMAC error: {}", e)))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn encode_params(params: &[(&str, String)]) -> String {
    params.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join("&")
}

// =============================================================================
// Binance REST Client
// =============================================================================

/// Binance USD-M futures REST client.
pub struct BinanceRestClient {
    /// HTTP client
    client: Client,
    /// API key
    api_key: String,
    /// API secret
    api_secret: String,
    /// Base URL (production, testnet or a mock server)
    base_url: String,
    /// Shared request budget
    limiter: Arc<RateLimiter>,
}

impl BinanceRestClient {
    /// Create a client for production or testnet.
    pub fn new(api_key: String, api_secret: String, testnet: bool) -> Self {
        let base_url = if testnet { BINANCE_FUTURES_TESTNET_URL } else { BINANCE_FUTURES_URL };
        Self {
            client: Client::new(),
            api_key,
            api_secret,
            base_url: base_url.to_string(),
            limiter: Arc::new(RateLimiter::default()),
        }
    }

    /// Override the base URL (mock servers in tests).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Use a specific rate limiter.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Base URL in use
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Rate limiter in use
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Build query string with signature for signed requests.
    ///
    /// Parameter order is preserved; `recvWindow` and `timestamp` are
    /// appended, then the signature of everything before it.
    fn build_signed_query(
        &self,
        mut params: Vec<(&str, String)>,
        timestamp_ms: i64,
    ) -> Result<String, BinanceRestError> {
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", timestamp_ms.to_string()));
        let query_string = encode_params(&params);
        let signature = sign_query(&self.api_secret, &query_string)?;
        Ok(format!("{}&signature={}", query_string, signature))
    }

    /// Send a request through the limiter and return the raw body.
    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        params: Vec<(&str, String)>,
        security: Security,
        weight: u32,
        is_order: bool,
    ) -> Result<String, BinanceRestError> {
        self.limiter.acquire(weight, is_order).await?;

        let query = match security {
            Security::Signed => self.build_signed_query(params, Utc::now().timestamp_millis())?,
            Security::None | Security::ApiKey => encode_params(&params),
        };
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}{}?{}", self.base_url, endpoint, query)
        };

        let mut request = self.client.request(method.clone(), &url);
        if security != Security::None {
            request = request.header("X-MBX-APIKEY", &self.api_key);
        }

        debug!(%method, endpoint, weight, "Binance request");
        let response = timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS), request.send())
            .await
            .map_err(|_| BinanceRestError::Timeout)?
            .map_err(|e| BinanceRestError::RequestFailed(e.to_string()))?;

        self.handle_response(response).await
    }

    async fn handle_response(&self, response: Response) -> Result<String, BinanceRestError> {
        if let Some(used) = response
            .headers()
            .get(USED_WEIGHT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
        {
            self.limiter.sync_used_weight(used);
        }

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            warn!(status = status.as_u16(), ?retry_after, "Binance rate limit hit");
            return Err(BinanceRestError::RateLimited { retry_after });
        }

        let body = response.text().await.map_err(|e| BinanceRestError::ParseError(e.to_string()))?;

        if !status.is_success() {
            // Try to parse Binance error response
            if let Ok(err) = serde_json::from_str::<BinanceErrorResponse>(&body) {
                return Err(BinanceRestError::ApiError {
                    status: status.as_u16(),
                    code: err.code,
                    msg: err.msg,
                });
            }
            return Err(BinanceRestError::RequestFailed(format!("HTTP {}: {}", status, body)));
        }

        Ok(body)
    }

    fn parse<T: DeserializeOwned>(body: &str) -> Result<T, BinanceRestError> {
        serde_json::from_str(body).map_err(|e| BinanceRestError::ParseError(e.to_string()))
    }

    // =========================================================================
    // Market Data
    // =========================================================================

    /// Ping Binance API to check connectivity.
    pub async fn ping(&self) -> Result<(), BinanceRestError> {
        let body = self.send(Method::GET, "/fapi/v1/ping", vec![], Security::None, 1, false).await?;
        if body.trim() == "{}" {
            Ok(())
        } else {
            Err(BinanceRestError::ParseError(format!("Unexpected ping response: {}", body)))
        }
    }

    /// Get last price for a symbol.
    pub async fn get_price(&self, symbol: &Symbol) -> Result<Price, BinanceRestError> {
        let params = vec![("symbol", symbol.as_pair())];
        let body = self
            .send(Method::GET, "/fapi/v1/ticker/price", params, Security::None, PRICE_WEIGHT, false)
            .await?;
        let response: PriceResponse = Self::parse(&body)?;
        Price::new(response.price)
            .map_err(|e| BinanceRestError::ParseError(format!("Invalid price in response: {}", e)))
    }

    /// Get the order book.
    pub async fn get_order_book(
        &self,
        symbol: &Symbol,
        limit: u32,
    ) -> Result<OrderBook, BinanceRestError> {
        let params = vec![("symbol", symbol.as_pair()), ("limit", limit.to_string())];
        let body = self
            .send(Method::GET, "/fapi/v1/depth", params, Security::None, depth_weight(limit), false)
            .await?;
        let depth: DepthResponse = Self::parse(&body)?;
        Ok(OrderBook {
            symbol: symbol.clone(),
            bids: depth.bids,
            asks: depth.asks,
            last_update_id: depth.last_update_id,
            timestamp: depth.e.map(millis_to_datetime).unwrap_or_else(Utc::now),
        })
    }

    /// Get candles, oldest first.
    pub async fn get_klines(
        &self,
        symbol: &Symbol,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Kline>, BinanceRestError> {
        if interval.is_empty() {
            return Err(BinanceRestError::InvalidParameter("interval is empty".to_string()));
        }
        let params = vec![
            ("symbol", symbol.as_pair()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        let body = self
            .send(
                Method::GET,
                "/fapi/v1/klines",
                params,
                Security::None,
                klines_weight(limit),
                false,
            )
            .await?;
        let rows: Vec<Vec<serde_json::Value>> = Self::parse(&body)?;
        rows.iter().map(|row| parse_kline_row(symbol, row)).collect()
    }

    // =========================================================================
    // Order API
    // =========================================================================

    /// Place an order.
    ///
    /// # Endpoint
    ///
    /// `POST /fapi/v1/order`
    pub async fn place_order(
        &self,
        order: &OrderRequest,
    ) -> Result<BinanceOrderResponse, BinanceRestError> {
        order
            .validate()
            .map_err(|e| BinanceRestError::InvalidParameter(e.to_string()))?;

        let mut params = vec![
            ("symbol", order.symbol.as_pair()),
            ("side", order.side.to_string()),
            ("type", order.order_type.as_str().to_string()),
            ("quantity", order.quantity.as_decimal().normalize().to_string()),
        ];
        if order.order_type == OrderType::Limit {
            if let Some(price) = order.price {
                params.push(("price", price.as_decimal().normalize().to_string()));
                params.push(("timeInForce", "GTC".to_string()));
            }
        }
        if order.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }
        params.push(("newClientOrderId", order.client_order_id.clone()));
        params.push(("newOrderRespType", "RESULT".to_string()));

        let body = self
            .send(Method::POST, "/fapi/v1/order", params, Security::Signed, ORDER_WEIGHT, true)
            .await?;
        Self::parse(&body)
    }

    /// Cancel an open order.
    pub async fn cancel_order(
        &self,
        symbol: &Symbol,
        order_id: u64,
    ) -> Result<BinanceOrderResponse, BinanceRestError> {
        let params = vec![("symbol", symbol.as_pair()), ("orderId", order_id.to_string())];
        let body = self
            .send(Method::DELETE, "/fapi/v1/order", params, Security::Signed, ORDER_WEIGHT, false)
            .await?;
        Self::parse(&body)
    }

    /// Query order status.
    pub async fn get_order(
        &self,
        symbol: &Symbol,
        order_id: u64,
    ) -> Result<BinanceOrderResponse, BinanceRestError> {
        let params = vec![("symbol", symbol.as_pair()), ("orderId", order_id.to_string())];
        let body = self
            .send(Method::GET, "/fapi/v1/order", params, Security::Signed, ORDER_WEIGHT, false)
            .await?;
        Self::parse(&body)
    }

    // =========================================================================
    // Account API
    // =========================================================================

    /// Account balances and positions.
    pub async fn get_account(&self) -> Result<BinanceAccount, BinanceRestError> {
        let body = self
            .send(Method::GET, "/fapi/v2/account", vec![], Security::Signed, ACCOUNT_WEIGHT, false)
            .await?;
        Self::parse(&body)
    }

    /// Position risk for every symbol (or one).
    pub async fn get_position_risk(
        &self,
        symbol: Option<&Symbol>,
    ) -> Result<Vec<BinancePositionRisk>, BinanceRestError> {
        let params = symbol.map(|s| vec![("symbol", s.as_pair())]).unwrap_or_default();
        let body = self
            .send(
                Method::GET,
                "/fapi/v2/positionRisk",
                params,
                Security::Signed,
                POSITION_RISK_WEIGHT,
                false,
            )
            .await?;
        Self::parse(&body)
    }

    // =========================================================================
    // User data stream
    // =========================================================================

    /// Create (or fetch the active) listen key.
    pub async fn create_listen_key(&self) -> Result<String, BinanceRestError> {
        let body = self
            .send(Method::POST, "/fapi/v1/listenKey", vec![], Security::ApiKey, 1, false)
            .await?;
        let response: ListenKeyResponse = Self::parse(&body)?;
        Ok(response.listen_key)
    }

    /// Extend the listen key validity by 60 minutes.
    pub async fn keepalive_listen_key(&self) -> Result<(), BinanceRestError> {
        self.send(Method::PUT, "/fapi/v1/listenKey", vec![], Security::ApiKey, 1, false)
            .await
            .map(|_| ())
    }

    /// Close the user data stream.
    pub async fn close_listen_key(&self) -> Result<(), BinanceRestError> {
        self.send(Method::DELETE, "/fapi/v1/listenKey", vec![], Security::ApiKey, 1, false)
            .await
            .map(|_| ())
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

fn value_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

/// `[openTime, open, high, low, close, volume, closeTime, quoteVolume, trades, ...]`
fn parse_kline_row(symbol: &Symbol, row: &[serde_json::Value]) -> Result<Kline, BinanceRestError> {
    let bad = || BinanceRestError::ParseError(format!("malformed kline row: {:?}", row));
    if row.len() < 9 {
        return Err(bad());
    }
    let decimal = |i: usize| value_decimal(&row[i]).ok_or_else(bad);
    Ok(Kline {
        symbol: symbol.clone(),
        open_time: millis_to_datetime(row[0].as_i64().ok_or_else(bad)?),
        open: decimal(1)?,
        high: decimal(2)?,
        low: decimal(3)?,
        close: decimal(4)?,
        volume: decimal(5)?,
        close_time: millis_to_datetime(row[6].as_i64().ok_or_else(bad)?),
        trades: row[8].as_u64().ok_or_else(bad)?,
    })
}

// =============================================================================
// Binance Types (from API responses)
// =============================================================================

/// Binance error response.
#[derive(Debug, Deserialize)]
struct BinanceErrorResponse {
    code: i64,
    msg: String,
}

/// Price ticker response.
#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: Decimal,
}

/// Depth response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepthResponse {
    last_update_id: u64,
    /// Message output time
    #[serde(rename = "E", default)]
    e: Option<i64>,
    bids: Vec<(Decimal, Decimal)>,
    asks: Vec<(Decimal, Decimal)>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenKeyResponse {
    listen_key: String,
}

/// Futures order response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceOrderResponse {
    /// Symbol
    pub symbol: String,
    /// Order ID
    pub order_id: u64,
    /// Client order ID
    pub client_order_id: String,
    /// Limit price (0 for market orders)
    pub price: Decimal,
    /// Average fill price
    #[serde(default)]
    pub avg_price: Decimal,
    /// Original quantity
    pub orig_qty: Decimal,
    /// Executed quantity
    pub executed_qty: Decimal,
    /// Quote quantity filled
    #[serde(default)]
    pub cum_quote: Decimal,
    /// Status
    pub status: String,
    /// Side
    pub side: String,
    /// Type
    #[serde(rename = "type")]
    pub order_type: String,
    /// Reduce-only flag
    #[serde(default)]
    pub reduce_only: bool,
    /// Last update time (ms)
    #[serde(default)]
    pub update_time: i64,
}

impl BinanceOrderResponse {
    /// Average fill price, falling back to the quote/qty ratio
    pub fn fill_price(&self) -> Option<Decimal> {
        if self.avg_price > Decimal::ZERO {
            Some(self.avg_price)
        } else if self.executed_qty > Decimal::ZERO && self.cum_quote > Decimal::ZERO {
            Some(self.cum_quote / self.executed_qty)
        } else if self.price > Decimal::ZERO {
            Some(self.price)
        } else {
            None
        }
    }
}

/// Futures account snapshot (`/fapi/v2/account`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceAccount {
    /// Wallet balance across assets (USD)
    pub total_wallet_balance: Decimal,
    /// Unrealized PnL across positions
    pub total_unrealized_profit: Decimal,
    /// Wallet balance + unrealized PnL
    pub total_margin_balance: Decimal,
    /// Balance available for new orders
    pub available_balance: Decimal,
    /// Per-symbol positions (zero amounts included)
    #[serde(default)]
    pub positions: Vec<BinanceAccountPosition>,
}

/// Position entry in the account snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceAccountPosition {
    /// Symbol
    pub symbol: String,
    /// Signed position amount (negative = short)
    pub position_amt: Decimal,
    /// Entry price
    pub entry_price: Decimal,
    /// Unrealized PnL
    pub unrealized_profit: Decimal,
    /// Leverage setting
    pub leverage: Decimal,
}

/// Entry of `/fapi/v2/positionRisk`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinancePositionRisk {
    /// Symbol
    pub symbol: String,
    /// Signed position amount
    pub position_amt: Decimal,
    /// Entry price
    pub entry_price: Decimal,
    /// Mark price
    pub mark_price: Decimal,
    /// Unrealized PnL
    #[serde(rename = "unRealizedProfit")]
    pub unrealized_profit: Decimal,
    /// Liquidation price
    pub liquidation_price: Decimal,
    /// Leverage setting
    pub leverage: Decimal,
}

// =============================================================================
// Tests
// =============================================================================
