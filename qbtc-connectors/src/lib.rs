//! QBTC Exchange Connectors
//!
//! Adapters for the Binance USD-M futures API (REST + WebSocket).
//! Normalizes exchange-specific types to domain types.

#![warn(clippy::all)]

// Public modules
pub mod binance_rest;
pub mod binance_ws;
pub mod rate_limit;

// Re-exports
pub use binance_rest::{
    sign_query, BinanceAccount, BinanceAccountPosition, BinanceOrderResponse,
    BinancePositionRisk, BinanceRestClient, BinanceRestError, BINANCE_FUTURES_TESTNET_URL,
    BINANCE_FUTURES_URL,
};
pub use binance_ws::{
    market_streams, parse_message, AccountUpdate, BalanceUpdate, BinanceStreamClient,
    BinanceWsError, OrderUpdate, PositionUpdate, StreamEvent,
};
pub use rate_limit::{Admission, RateLimitConfig, RateLimitError, RateLimiter};
