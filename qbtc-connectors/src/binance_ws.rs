//! Binance Futures WebSocket Client
//!
//! Connects to Binance combined market streams or the user-data stream.
//! Normalizes Binance-specific messages to canonical domain types and
//! publishes them on a broadcast channel. The connection is re-established
//! with a fixed delay whenever it closes, errors or goes silent.

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use qbtc_domain::{BookTicker, Kline, MarkPrice, MarketDataEvent, PriceTick, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message as WebSocketMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Production futures stream base URL.
pub const BINANCE_FUTURES_WS_URL: &str = "wss://fstream.binance.com";

/// Testnet futures stream base URL.
pub const BINANCE_FUTURES_TESTNET_WS_URL: &str = "wss://stream.binancefuture.com";

/// WebSocket read timeout (in seconds).
const READ_TIMEOUT_SECS: u64 = 30;

/// Reconnect delay (in seconds).
const RECONNECT_DELAY_SECS: u64 = 5;

/// Errors that can occur in the Binance WebSocket client.
#[derive(Debug, Error)]
pub enum BinanceWsError {
    /// Failed to connect to WebSocket.
    #[error("Failed to connect to WebSocket: {0}")]
    ConnectionFailed(String),

    /// Failed to send message.
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// Failed to receive message.
    #[error("Failed to receive message: {0}")]
    ReceiveError(String),

    /// Invalid message format.
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Channel closed unexpectedly.
    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    /// Timed out waiting for message.
    #[error("Timed out waiting for message")]
    Timeout,
}

// =============================================================================
// Normalized stream events
// =============================================================================

/// Balance entry of an account update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    /// Asset (e.g. "USDT")
    pub asset: String,
    /// Wallet balance after the update
    pub wallet_balance: Decimal,
}

/// Position entry of an account update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    /// Symbol
    pub symbol: String,
    /// Signed amount (negative = short)
    pub amount: Decimal,
    /// Entry price
    pub entry_price: Decimal,
    /// Unrealized PnL
    pub unrealized_pnl: Decimal,
}

/// `ACCOUNT_UPDATE` from the user-data stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountUpdate {
    /// Reason reported by Binance (ORDER, FUNDING_FEE, ...)
    pub reason: String,
    /// Changed balances
    pub balances: Vec<BalanceUpdate>,
    /// Changed positions
    pub positions: Vec<PositionUpdate>,
    /// Event time
    pub timestamp: DateTime<Utc>,
}

/// `ORDER_TRADE_UPDATE` from the user-data stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// Symbol
    pub symbol: String,
    /// Client order ID
    pub client_order_id: String,
    /// Exchange order ID
    pub order_id: u64,
    /// BUY / SELL
    pub side: String,
    /// Order type
    pub order_type: String,
    /// Order status
    pub status: String,
    /// Last fill price
    pub last_filled_price: Decimal,
    /// Accumulated filled quantity
    pub filled_quantity: Decimal,
    /// Commission of the last fill
    pub commission: Decimal,
    /// Realized profit of the fill
    pub realized_profit: Decimal,
    /// Event time
    pub timestamp: DateTime<Utc>,
}

/// Everything a stream can deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    /// Ticker, book ticker, mark price or kline
    Market(MarketDataEvent),
    /// Balance/position change
    Account(AccountUpdate),
    /// Order lifecycle change
    Order(OrderUpdate),
    /// The listen key is no longer valid
    ListenKeyExpired,
    /// Connection dropped; the client is reconnecting
    Disconnected(String),
}

// =============================================================================
// Stream client
// =============================================================================

/// Binance futures WebSocket client with fixed-delay reconnect.
pub struct BinanceStreamClient {
    /// Full connection URL
    url: String,
    /// Sender for stream events (fan-out).
    event_sender: broadcast::Sender<StreamEvent>,
    /// Delay between reconnect attempts
    reconnect_delay: Duration,
}

fn ws_base(testnet: bool) -> &'static str {
    if testnet {
        BINANCE_FUTURES_TESTNET_WS_URL
    } else {
        BINANCE_FUTURES_WS_URL
    }
}

/// Stream names for ticker, book ticker and mark price of each symbol.
pub fn market_streams(symbols: &[Symbol]) -> Vec<String> {
    symbols
        .iter()
        .flat_map(|s| {
            let name = s.stream_name();
            [
                format!("{}@ticker", name),
                format!("{}@bookTicker", name),
                format!("{}@markPrice", name),
            ]
        })
        .collect()
}

impl BinanceStreamClient {
    /// Combined market stream for the given symbols.
    pub fn market(
        symbols: &[Symbol],
        testnet: bool,
        event_sender: broadcast::Sender<StreamEvent>,
    ) -> Self {
        let url =
            format!("{}/stream?streams={}", ws_base(testnet), market_streams(symbols).join("/"));
        Self::with_url(url, event_sender)
    }

    /// User-data stream for a listen key.
    pub fn user_data(
        listen_key: &str,
        testnet: bool,
        event_sender: broadcast::Sender<StreamEvent>,
    ) -> Self {
        Self::with_url(format!("{}/ws/{}", ws_base(testnet), listen_key), event_sender)
    }

    /// Client for an explicit URL.
    pub fn with_url(url: String, event_sender: broadcast::Sender<StreamEvent>) -> Self {
        Self { url, event_sender, reconnect_delay: Duration::from_secs(RECONNECT_DELAY_SECS) }
    }

    /// Override the reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Connection URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run until cancelled, reconnecting after every failure.
    ///
    /// Errors are logged and published as `StreamEvent::Disconnected`; they
    /// never end the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.connect_and_read() => result,
            };

            let reason = match result {
                Ok(()) => "stream closed".to_string(),
                Err(e) => e.to_string(),
            };
            warn!(
                url = %self.url,
                %reason,
                delay_secs = self.reconnect_delay.as_secs(),
                "WebSocket disconnected, reconnecting"
            );
            let _ = self.event_sender.send(StreamEvent::Disconnected(reason));

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {},
            }
        }
        info!(url = %self.url, "WebSocket client stopped");
    }

    /// One connection: connect, then read until close/error/timeout.
    async fn connect_and_read(&self) -> Result<(), BinanceWsError> {
        info!(url = %self.url, "Connecting to Binance WebSocket");
        let (mut ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| BinanceWsError::ConnectionFailed(e.to_string()))?;
        info!(url = %self.url, "Connected to Binance WebSocket");

        loop {
            let next = timeout(Duration::from_secs(READ_TIMEOUT_SECS), ws_stream.next()).await;
            let msg = match next {
                Err(_) => return Err(BinanceWsError::Timeout),
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) => return Err(BinanceWsError::ReceiveError(e.to_string())),
                Ok(Some(Ok(msg))) => msg,
            };

            match msg {
                WebSocketMessage::Text(text) => match parse_message(&text) {
                    Ok(Some(event)) => {
                        // No subscribers is fine
                        let _ = self.event_sender.send(event);
                    },
                    Ok(None) => {},
                    Err(e) => error!(error = %e, "Error handling message"),
                },
                WebSocketMessage::Ping(payload) => {
                    debug!("Received ping from Binance");
                    ws_stream
                        .send(WebSocketMessage::Pong(payload))
                        .await
                        .map_err(|e| BinanceWsError::SendFailed(e.to_string()))?;
                },
                WebSocketMessage::Close(_) => return Err(BinanceWsError::ChannelClosed),
                _ => {},
            }
        }
    }
}

// =============================================================================
// Message parsing
// =============================================================================

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

fn symbol(pair: &str) -> Result<Symbol, BinanceWsError> {
    Symbol::from_pair(pair).map_err(|e| BinanceWsError::InvalidMessage(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(json: Value, what: &str) -> Result<T, BinanceWsError> {
    serde_json::from_value(json)
        .map_err(|e| BinanceWsError::InvalidMessage(format!("Invalid {}: {}", what, e)))
}

/// Parse one text frame.
///
/// Accepts both combined (`{"stream": .., "data": ..}`) and raw payloads.
/// Event types the client does not track yield `Ok(None)`.
pub fn parse_message(text: &str) -> Result<Option<StreamEvent>, BinanceWsError> {
    let mut json: Value =
        serde_json::from_str(text).map_err(|e| BinanceWsError::InvalidMessage(e.to_string()))?;
    if let Some(data) = json.get_mut("data") {
        json = data.take();
    }

    let event_type = match json.get("e").and_then(|v| v.as_str()) {
        Some(e) => e.to_string(),
        None => return Ok(None),
    };

    let event = match event_type.as_str() {
        "24hrTicker" => {
            let e: TickerEvent = decode(json, "ticker")?;
            StreamEvent::Market(MarketDataEvent::Price(PriceTick {
                symbol: symbol(&e.symbol)?,
                price: e.last_price,
                volume: Some(e.volume),
                change_pct: Some(e.change_pct),
                timestamp: millis_to_datetime(e.event_time),
            }))
        },
        "bookTicker" => {
            let e: BookTickerEvent = decode(json, "book ticker")?;
            StreamEvent::Market(MarketDataEvent::BookTicker(BookTicker {
                symbol: symbol(&e.symbol)?,
                bid_price: e.bid_price,
                bid_qty: e.bid_qty,
                ask_price: e.ask_price,
                ask_qty: e.ask_qty,
                timestamp: millis_to_datetime(e.event_time),
            }))
        },
        "markPriceUpdate" => {
            let e: MarkPriceEvent = decode(json, "mark price")?;
            StreamEvent::Market(MarketDataEvent::MarkPrice(MarkPrice {
                symbol: symbol(&e.symbol)?,
                mark_price: e.mark_price,
                index_price: e.index_price,
                funding_rate: e.funding_rate,
                next_funding_time: e.next_funding_time.map(millis_to_datetime),
                timestamp: millis_to_datetime(e.event_time),
            }))
        },
        "kline" => {
            let e: KlineEvent = decode(json, "kline")?;
            StreamEvent::Market(MarketDataEvent::Kline(Kline {
                symbol: symbol(&e.symbol)?,
                open: e.kline.open,
                high: e.kline.high,
                low: e.kline.low,
                close: e.kline.close,
                volume: e.kline.volume,
                trades: e.kline.trades,
                open_time: millis_to_datetime(e.kline.open_time),
                close_time: millis_to_datetime(e.kline.close_time),
            }))
        },
        "ACCOUNT_UPDATE" => {
            let e: AccountUpdateEvent = decode(json, "account update")?;
            StreamEvent::Account(AccountUpdate {
                reason: e.account.reason,
                balances: e
                    .account
                    .balances
                    .into_iter()
                    .map(|b| BalanceUpdate { asset: b.asset, wallet_balance: b.wallet_balance })
                    .collect(),
                positions: e
                    .account
                    .positions
                    .into_iter()
                    .map(|p| PositionUpdate {
                        symbol: p.symbol,
                        amount: p.amount,
                        entry_price: p.entry_price,
                        unrealized_pnl: p.unrealized_pnl,
                    })
                    .collect(),
                timestamp: millis_to_datetime(e.event_time),
            })
        },
        "ORDER_TRADE_UPDATE" => {
            let e: OrderTradeUpdateEvent = decode(json, "order update")?;
            let o = e.order;
            StreamEvent::Order(OrderUpdate {
                symbol: o.symbol,
                client_order_id: o.client_order_id,
                order_id: o.order_id,
                side: o.side,
                order_type: o.order_type,
                status: o.status,
                last_filled_price: o.last_filled_price,
                filled_quantity: o.filled_quantity,
                commission: o.commission.unwrap_or(Decimal::ZERO),
                realized_profit: o.realized_profit.unwrap_or(Decimal::ZERO),
                timestamp: millis_to_datetime(e.event_time),
            })
        },
        "listenKeyExpired" => StreamEvent::ListenKeyExpired,
        other => {
            debug!(event_type = other, "Ignoring stream event");
            return Ok(None);
        },
    };

    Ok(Some(event))
}

// =============================================================================
// Binance-Specific Types (internal to connector)
// =============================================================================

/// `<symbol>@ticker`
#[derive(Debug, Deserialize)]
struct TickerEvent {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last_price: Decimal,
    #[serde(rename = "v")]
    volume: Decimal,
    #[serde(rename = "P")]
    change_pct: Decimal,
}

/// `<symbol>@bookTicker`
#[derive(Debug, Deserialize)]
struct BookTickerEvent {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bid_price: Decimal,
    #[serde(rename = "B")]
    bid_qty: Decimal,
    #[serde(rename = "a")]
    ask_price: Decimal,
    #[serde(rename = "A")]
    ask_qty: Decimal,
}

/// `<symbol>@markPrice`
#[derive(Debug, Deserialize)]
struct MarkPriceEvent {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    mark_price: Decimal,
    #[serde(rename = "i", default)]
    index_price: Option<Decimal>,
    #[serde(rename = "r", default)]
    funding_rate: Option<Decimal>,
    #[serde(rename = "T", default)]
    next_funding_time: Option<i64>,
}

/// `<symbol>@kline_<interval>`
#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "c")]
    close: Decimal,
    #[serde(rename = "v")]
    volume: Decimal,
    #[serde(rename = "n")]
    trades: u64,
}

#[derive(Debug, Deserialize)]
struct AccountUpdateEvent {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "a")]
    account: AccountPayload,
}

#[derive(Debug, Deserialize)]
struct AccountPayload {
    #[serde(rename = "m")]
    reason: String,
    #[serde(rename = "B", default)]
    balances: Vec<BalancePayload>,
    #[serde(rename = "P", default)]
    positions: Vec<PositionPayload>,
}

#[derive(Debug, Deserialize)]
struct BalancePayload {
    #[serde(rename = "a")]
    asset: String,
    #[serde(rename = "wb")]
    wallet_balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct PositionPayload {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "pa")]
    amount: Decimal,
    #[serde(rename = "ep")]
    entry_price: Decimal,
    #[serde(rename = "up")]
    unrealized_pnl: Decimal,
}

#[derive(Debug, Deserialize)]
struct OrderTradeUpdateEvent {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "o")]
    order: OrderPayload,
}

#[derive(Debug, Deserialize)]
struct OrderPayload {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    client_order_id: String,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "o")]
    order_type: String,
    #[serde(rename = "X")]
    status: String,
    #[serde(rename = "i")]
    order_id: u64,
    #[serde(rename = "L")]
    last_filled_price: Decimal,
    #[serde(rename = "z")]
    filled_quantity: Decimal,
    #[serde(rename = "n", default)]
    commission: Option<Decimal>,
    #[serde(rename = "rp", default)]
    realized_profit: Option<Decimal>,
}

// =============================================================================
// Tests
// =============================================================================
