//! Stub implementations for testing.
//!
//! These implementations simulate exchange and market data behavior
//! without making real API calls.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use qbtc_domain::{Kline, OrderBook, OrderRequest, OrderStatus, OrderType, Price, Symbol};

use crate::error::ExecError;
use crate::ports::{AccountSnapshot, ExchangePort, MarketDataPort, OrderResult, PriceUpdate};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Stub Exchange
// =============================================================================

/// Stub exchange for testing.
///
/// Market orders fill immediately at the configured price; limit orders rest
/// until cancelled.
pub struct StubExchange {
    /// Current prices by symbol
    prices: RwLock<HashMap<String, Decimal>>,
    /// Default price for unknown symbols
    default_price: Decimal,
    /// Simulated fee rate (0.001 = 0.1%)
    fee_rate: Decimal,
    /// Simulated wallet balance
    balance: RwLock<Decimal>,
    /// Order counter for generating IDs
    order_counter: Mutex<u64>,
    /// Orders by exchange id
    orders: RwLock<HashMap<String, OrderResult>>,
    /// Errors returned by the next calls, in order
    failures: Mutex<VecDeque<ExecError>>,
    /// Number of `place_order` calls, failed ones included
    place_calls: Mutex<u64>,
}

impl StubExchange {
    /// Create a new stub exchange with default price.
    pub fn new(default_price: Decimal) -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            default_price,
            fee_rate: Decimal::new(1, 3), // 0.001 = 0.1%
            balance: RwLock::new(Decimal::from(100_000)),
            order_counter: Mutex::new(0),
            orders: RwLock::new(HashMap::new()),
            failures: Mutex::new(VecDeque::new()),
            place_calls: Mutex::new(0),
        }
    }

    /// Use a different fee rate.
    #[must_use]
    pub fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    /// Set price for a specific symbol.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        write(&self.prices).insert(symbol.to_string(), price);
    }

    /// Get price for a symbol (or default).
    pub fn get_price_decimal(&self, symbol: &str) -> Decimal {
        read(&self.prices).get(symbol).copied().unwrap_or(self.default_price)
    }

    /// Set the wallet balance reported by `get_account`.
    pub fn set_balance(&self, balance: Decimal) {
        *write(&self.balance) = balance;
    }

    /// Configure the next operation to fail with a transient error.
    pub fn set_fail_next(&self, fail: bool) {
        let mut failures = lock(&self.failures);
        failures.clear();
        if fail {
            failures.push_back(ExecError::Exchange("Simulated exchange failure".to_string()));
        }
    }

    /// Queue a specific error for an upcoming call.
    pub fn push_failure(&self, error: ExecError) {
        lock(&self.failures).push_back(error);
    }

    /// Report `quantity` of a resting order as filled at its limit price.
    ///
    /// Returns false if the order is unknown or already final.
    pub fn fill_order(&self, order_id: &str, quantity: Decimal, status: OrderStatus) -> bool {
        let mut orders = write(&self.orders);
        match orders.get_mut(order_id) {
            Some(order) if !order.status.is_final() => {
                order.status = status;
                order.filled_quantity = quantity;
                order.fee = order.fill_price.as_decimal() * quantity * self.fee_rate;
                order.filled_at = Utc::now();
                true
            },
            _ => false,
        }
    }

    /// How many times `place_order` was called.
    pub fn place_calls(&self) -> u64 {
        *lock(&self.place_calls)
    }

    /// Generate a unique order ID.
    fn next_order_id(&self) -> String {
        let mut counter = lock(&self.order_counter);
        *counter += 1;
        format!("STUB-{}", *counter)
    }

    /// Pop the next queued failure.
    fn take_failure(&self) -> Result<(), ExecError> {
        match lock(&self.failures).pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn price_of(&self, symbol: &Symbol) -> Result<Price, ExecError> {
        Ok(Price::new(self.get_price_decimal(&symbol.as_pair()))?)
    }
}

#[async_trait]
impl ExchangePort for StubExchange {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult, ExecError> {
        *lock(&self.place_calls) += 1;
        self.take_failure()?;
        request.validate()?;

        let exchange_order_id = self.next_order_id();
        let result = match (request.order_type, request.price) {
            (OrderType::Limit, Some(limit)) => OrderResult {
                exchange_order_id: exchange_order_id.clone(),
                client_order_id: request.client_order_id.clone(),
                status: OrderStatus::New,
                fill_price: limit,
                filled_quantity: Decimal::ZERO,
                fee: Decimal::ZERO,
                fee_asset: "USDT".to_string(),
                filled_at: Utc::now(),
            },
            _ => {
                let price = self.price_of(&request.symbol)?;
                let quantity = request.quantity.as_decimal();
                OrderResult {
                    exchange_order_id: exchange_order_id.clone(),
                    client_order_id: request.client_order_id.clone(),
                    status: OrderStatus::Filled,
                    fill_price: price,
                    filled_quantity: quantity,
                    fee: price.as_decimal() * quantity * self.fee_rate,
                    fee_asset: "USDT".to_string(),
                    filled_at: Utc::now(),
                }
            },
        };

        write(&self.orders).insert(exchange_order_id, result.clone());
        Ok(result)
    }

    async fn cancel_order(&self, _symbol: &Symbol, order_id: &str) -> Result<(), ExecError> {
        self.take_failure()?;

        let mut orders = write(&self.orders);
        match orders.get_mut(order_id) {
            Some(order) if !order.status.is_final() => {
                order.status = OrderStatus::Canceled;
                tracing::debug!(order_id, "Stub: order cancelled");
                Ok(())
            },
            _ => Err(ExecError::Api {
                status: 400,
                code: -2011,
                msg: "Unknown order sent.".to_string(),
            }),
        }
    }

    async fn get_order(&self, _symbol: &Symbol, order_id: &str) -> Result<OrderResult, ExecError> {
        self.take_failure()?;
        read(&self.orders)
            .get(order_id)
            .cloned()
            .ok_or_else(|| ExecError::NotFound(format!("order {}", order_id)))
    }

    async fn get_price(&self, symbol: &Symbol) -> Result<Price, ExecError> {
        self.take_failure()?;
        self.price_of(symbol)
    }

    async fn get_order_book(&self, symbol: &Symbol, limit: u32) -> Result<OrderBook, ExecError> {
        self.take_failure()?;
        let mid = self.get_price_decimal(&symbol.as_pair());
        // One basis point per level on each side
        let step = mid / Decimal::from(10_000);
        let levels = limit.clamp(1, 20);
        let bids = (1..=levels).map(|i| (mid - step * Decimal::from(i), Decimal::ONE)).collect();
        let asks = (1..=levels).map(|i| (mid + step * Decimal::from(i), Decimal::ONE)).collect();
        Ok(OrderBook {
            symbol: symbol.clone(),
            bids,
            asks,
            last_update_id: 1,
            timestamp: Utc::now(),
        })
    }

    async fn get_klines(
        &self,
        symbol: &Symbol,
        _interval: &str,
        limit: u32,
    ) -> Result<Vec<Kline>, ExecError> {
        self.take_failure()?;
        let price = self.get_price_decimal(&symbol.as_pair());
        let now = Utc::now();
        Ok((0..limit.min(1000))
            .rev()
            .map(|i| {
                let open_time = now - ChronoDuration::minutes(i64::from(i) + 1);
                Kline {
                    symbol: symbol.clone(),
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: Decimal::ZERO,
                    trades: 0,
                    open_time,
                    close_time: open_time + ChronoDuration::minutes(1),
                }
            })
            .collect())
    }

    async fn get_account(&self) -> Result<AccountSnapshot, ExecError> {
        self.take_failure()?;
        let balance = *read(&self.balance);
        Ok(AccountSnapshot {
            wallet_balance: balance,
            available_balance: balance,
            unrealized_pnl: Decimal::ZERO,
            positions: Vec::new(),
        })
    }

    async fn health_check(&self) -> Result<(), ExecError> {
        self.take_failure()
    }
}

// =============================================================================
// Stub Market Data
// =============================================================================

/// Stub market data provider for testing.
///
/// Allows manual price injection for testing scenarios.
pub struct StubMarketData {
    /// Current prices by symbol
    prices: RwLock<HashMap<String, Decimal>>,
    /// Active subscriptions (symbol -> sender)
    subscriptions: RwLock<HashMap<String, tokio::sync::mpsc::Sender<PriceUpdate>>>,
}

impl StubMarketData {
    /// Create a new stub market data provider.
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Set price and notify subscribers.
    pub async fn set_price(&self, symbol: &Symbol, price: Decimal) {
        let Ok(price) = Price::new(price) else {
            return;
        };
        let update = PriceUpdate { symbol: symbol.clone(), price, timestamp: Utc::now() };
        self.inject_price_update(update).await;
    }

    /// Inject a price update to all subscribers of a symbol.
    pub async fn inject_price_update(&self, update: PriceUpdate) {
        write(&self.prices).insert(update.symbol.as_pair(), update.price.as_decimal());

        // Clone the sender so no lock is held across the await
        let sender = read(&self.subscriptions).get(&update.symbol.as_pair()).cloned();
        if let Some(sender) = sender {
            // Ignore send errors (subscriber may have dropped)
            let _ = sender.send(update).await;
        }
    }
}

impl Default for StubMarketData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataPort for StubMarketData {
    async fn subscribe(
        &self,
        symbol: &Symbol,
    ) -> Result<tokio::sync::mpsc::Receiver<PriceUpdate>, ExecError> {
        let (tx, rx) = tokio::sync::mpsc::channel(100);
        write(&self.subscriptions).insert(symbol.as_pair(), tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, symbol: &Symbol) -> Result<(), ExecError> {
        write(&self.subscriptions).remove(&symbol.as_pair());
        Ok(())
    }

    async fn get_price(&self, symbol: &Symbol) -> Result<Price, ExecError> {
        let price = read(&self.prices)
            .get(&symbol.as_pair())
            .copied()
            .ok_or_else(|| ExecError::NotFound(format!("No price for {}", symbol.as_pair())))?;

        Ok(Price::new(price)?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use qbtc_domain::{OrderSide, Quantity};
    use rust_decimal_macros::dec;

    fn btc() -> Symbol {
        Symbol::from_pair("BTCUSDT").unwrap()
    }

    fn market(symbol: Symbol, qty: Decimal) -> OrderRequest {
        OrderRequest::market(symbol, OrderSide::Buy, Quantity::new(qty).unwrap())
    }

    #[tokio::test]
    async fn test_stub_exchange_place_order() {
        let exchange = StubExchange::new(dec!(95000));

        let result = exchange.place_order(&market(btc(), dec!(0.1))).await.unwrap();

        assert_eq!(result.status, OrderStatus::Filled);
        assert_eq!(result.fill_price.as_decimal(), dec!(95000));
        assert_eq!(result.filled_quantity, dec!(0.1));
        // 9500 notional * 0.1%
        assert_eq!(result.fee, dec!(9.5));
        assert_eq!(result.exchange_order_id, "STUB-1");
    }

    #[tokio::test]
    async fn test_stub_exchange_custom_price() {
        let exchange = StubExchange::new(dec!(95000));
        exchange.set_price("ETHUSDT", dec!(3000));

        let eth = exchange
            .place_order(&market(Symbol::from_pair("ETHUSDT").unwrap(), dec!(1)))
            .await
            .unwrap();
        let btc = exchange.place_order(&market(btc(), dec!(0.1))).await.unwrap();

        assert_eq!(eth.fill_price.as_decimal(), dec!(3000));
        assert_eq!(btc.fill_price.as_decimal(), dec!(95000)); // Default
    }

    #[tokio::test]
    async fn test_stub_exchange_simulated_failure() {
        let exchange = StubExchange::new(dec!(95000));

        // Configure failure
        exchange.set_fail_next(true);
        assert!(exchange.place_order(&market(btc(), dec!(0.1))).await.is_err());

        // Next call should succeed
        assert!(exchange.place_order(&market(btc(), dec!(0.1))).await.is_ok());
        assert_eq!(exchange.place_calls(), 2);
    }

    #[tokio::test]
    async fn test_limit_order_rests_until_cancelled() {
        let exchange = StubExchange::new(dec!(95000));
        let order = OrderRequest::limit(
            btc(),
            OrderSide::Buy,
            Quantity::new(dec!(0.1)).unwrap(),
            Price::new(dec!(90000)).unwrap(),
        );

        let placed = exchange.place_order(&order).await.unwrap();
        assert_eq!(placed.status, OrderStatus::New);

        exchange.cancel_order(&btc(), &placed.exchange_order_id).await.unwrap();
        let queried = exchange.get_order(&btc(), &placed.exchange_order_id).await.unwrap();
        assert_eq!(queried.status, OrderStatus::Canceled);

        // Cancelling again is an API error
        let again = exchange.cancel_order(&btc(), &placed.exchange_order_id).await;
        assert!(matches!(again, Err(ExecError::Api { code: -2011, .. })));
    }

    #[tokio::test]
    async fn test_resting_order_fill() {
        let exchange = StubExchange::new(dec!(95000));
        let order = OrderRequest::limit(
            btc(),
            OrderSide::Sell,
            Quantity::new(dec!(1)).unwrap(),
            Price::new(dec!(96000)).unwrap(),
        );
        let placed = exchange.place_order(&order).await.unwrap();

        assert!(exchange.fill_order(&placed.exchange_order_id, dec!(1), OrderStatus::Filled));
        let queried = exchange.get_order(&btc(), &placed.exchange_order_id).await.unwrap();
        assert_eq!(queried.status, OrderStatus::Filled);
        assert_eq!(queried.fee, dec!(96));

        assert!(!exchange.fill_order(&placed.exchange_order_id, dec!(1), OrderStatus::Filled));
    }

    #[tokio::test]
    async fn test_stub_order_book_and_klines() {
        let exchange = StubExchange::new(dec!(50000));
        let book = exchange.get_order_book(&btc(), 5).await.unwrap();
        assert_eq!(book.bids.len(), 5);
        assert_eq!(book.mid(), Some(dec!(50000)));

        let klines = exchange.get_klines(&btc(), "1m", 3).await.unwrap();
        assert_eq!(klines.len(), 3);
        assert!(klines[0].open_time < klines[2].open_time);
    }

    #[tokio::test]
    async fn test_stub_market_data_subscription() {
        let market_data = StubMarketData::new();
        let symbol = btc();

        let mut rx = market_data.subscribe(&symbol).await.unwrap();

        // Inject price update
        market_data.set_price(&symbol, dec!(96000)).await;

        // Should receive the update
        let update = rx.recv().await.unwrap();
        assert_eq!(update.price.as_decimal(), dec!(96000));
        assert_eq!(update.symbol.as_pair(), "BTCUSDT");
        assert_eq!(market_data.get_price(&symbol).await.unwrap().as_decimal(), dec!(96000));
    }

    #[tokio::test]
    async fn test_stub_market_data_unknown_symbol() {
        let market_data = StubMarketData::new();

        // Should fail for unknown symbol
        let result = market_data.get_price(&btc()).await;
        assert!(matches!(result, Err(ExecError::NotFound(_))));
    }
}
