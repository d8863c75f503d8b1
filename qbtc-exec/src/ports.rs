//! Execution layer port definitions.
//!
//! Ports define the interfaces for external services (exchange, market data,
//! signal producers). Adapters implement these ports for specific services
//! (Binance, stub, etc.).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use qbtc_domain::{
    Kline, OrderBook, OrderRequest, OrderStatus, Price, Side, SignalStrength, Symbol,
};

use crate::error::ExecError;

// =============================================================================
// Exchange Port
// =============================================================================

/// Port for exchange operations.
///
/// Implementations:
/// - `StubExchange` - For testing (immediate fills at configured price)
/// - `BinanceExchange` - Binance USD-M futures
#[async_trait]
pub trait ExchangePort: Send + Sync {
    /// Place an order.
    ///
    /// `request.client_order_id` is reused across retries so the exchange
    /// can reject duplicates.
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult, ExecError>;

    /// Cancel an existing order.
    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<(), ExecError>;

    /// Query an order.
    async fn get_order(&self, symbol: &Symbol, order_id: &str) -> Result<OrderResult, ExecError>;

    /// Get current price for a symbol.
    async fn get_price(&self, symbol: &Symbol) -> Result<Price, ExecError>;

    /// Order book snapshot.
    async fn get_order_book(&self, symbol: &Symbol, limit: u32) -> Result<OrderBook, ExecError>;

    /// Candles, oldest first.
    async fn get_klines(
        &self,
        symbol: &Symbol,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Kline>, ExecError>;

    /// Balances and exchange-side positions.
    async fn get_account(&self) -> Result<AccountSnapshot, ExecError>;

    /// Check if exchange is healthy/connected.
    async fn health_check(&self) -> Result<(), ExecError>;
}

/// Exchange answer to a placed or queried order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    /// Exchange-assigned order ID
    pub exchange_order_id: String,
    /// Client-provided order ID
    pub client_order_id: String,
    /// Order status
    pub status: OrderStatus,
    /// Average fill price (limit price while unfilled)
    pub fill_price: Price,
    /// Filled quantity (0 while unfilled)
    pub filled_quantity: Decimal,
    /// Trading fee paid
    pub fee: Decimal,
    /// Fee asset (e.g., "USDT", "BNB")
    pub fee_asset: String,
    /// When the order was filled or last updated
    pub filled_at: DateTime<Utc>,
}

/// Position held on the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    /// Trading pair
    pub symbol: String,
    /// Direction
    pub side: Side,
    /// Absolute size
    pub quantity: Decimal,
    /// Entry price
    pub entry_price: Decimal,
    /// Unrealized PnL reported by the exchange
    pub unrealized_pnl: Decimal,
}

/// Account snapshot from the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Wallet balance (quote currency)
    pub wallet_balance: Decimal,
    /// Balance available for new orders
    pub available_balance: Decimal,
    /// Unrealized PnL across positions
    pub unrealized_pnl: Decimal,
    /// Non-zero positions
    pub positions: Vec<ExchangePosition>,
}

// =============================================================================
// Market Data Port
// =============================================================================

/// Port for market data subscriptions.
///
/// Implementations:
/// - `StubMarketData` - For testing (configurable price stream)
/// - the daemon's price cache, fed by the Binance streams
#[async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Subscribe to price updates for a symbol.
    ///
    /// Returns a receiver that yields price updates.
    async fn subscribe(
        &self,
        symbol: &Symbol,
    ) -> Result<tokio::sync::mpsc::Receiver<PriceUpdate>, ExecError>;

    /// Unsubscribe from price updates.
    async fn unsubscribe(&self, symbol: &Symbol) -> Result<(), ExecError>;

    /// Get current snapshot price (without subscription).
    async fn get_price(&self, symbol: &Symbol) -> Result<Price, ExecError>;
}

/// Price update from market data feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// Trading pair
    pub symbol: Symbol,
    /// Current price
    pub price: Price,
    /// Update timestamp
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Signal Source
// =============================================================================

/// Source of signal strength for sizing new positions.
pub trait SignalSource: Send + Sync {
    /// Strength in [0, 1] for a symbol
    fn strength(&self, symbol: &Symbol) -> SignalStrength;
}

/// Same strength for every symbol.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantSignal(pub SignalStrength);

impl SignalSource for ConstantSignal {
    fn strength(&self, _symbol: &Symbol) -> SignalStrength {
        self.0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_result_serialization() {
        let result = OrderResult {
            exchange_order_id: "12345".to_string(),
            client_order_id: "abc-123".to_string(),
            status: OrderStatus::Filled,
            fill_price: Price::new(dec!(95000)).unwrap(),
            filled_quantity: dec!(0.1),
            fee: dec!(0.001),
            fee_asset: "BNB".to_string(),
            filled_at: Utc::now(),
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "FILLED");
        let parsed: OrderResult = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn test_constant_signal() {
        let signal = ConstantSignal::default();
        let btc = Symbol::from_pair("BTCUSDT").unwrap();
        assert_eq!(signal.strength(&btc), SignalStrength::NEUTRAL);

        let strong = ConstantSignal(SignalStrength::new(dec!(0.9)).unwrap());
        assert_eq!(strong.strength(&btc).as_decimal(), dec!(0.9));
    }
}
