//! Domain Entities for QBTC
//!
//! Core business entities with lifecycle management.
//! All entities have identity and state transitions.

use crate::tier::Tier;
use crate::trailing::TrailingStopUpdate;
use crate::value_objects::{
    DomainError, Leverage, OrderSide, Price, Quantity, Side, SignalStrength, Symbol,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier for a Position
pub type PositionId = Uuid;

/// Unique identifier for an execution record
pub type OrderId = Uuid;

// =============================================================================
// Position
// =============================================================================

/// Lifecycle status of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    /// Being monitored
    Open,
    /// Final; the position lives in the history log
    Closed,
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    /// Price crossed the (possibly ratcheted) stop-loss
    StopLoss,
    /// Price reached the take-profit target
    TakeProfit,
    /// Loss consumed too much of the position's margin
    MarginCall,
    /// Account-level drawdown breach
    Liquidation,
    /// Operator request
    Manual,
}

impl CloseReason {
    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "STOP_LOSS",
            CloseReason::TakeProfit => "TAKE_PROFIT",
            CloseReason::MarginCall => "MARGIN_CALL",
            CloseReason::Liquidation => "LIQUIDATION",
            CloseReason::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trailing stop configuration of a position
///
/// The ratcheted stop level itself is kept in `Position::stop_loss`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingStop {
    /// Fixed distance between the favorable extreme and the stop
    pub distance: Decimal,
    /// Best price seen so far (peak for Long, trough for Short)
    pub high_water_mark: Price,
}

/// Position represents a leveraged futures position with full lifecycle
///
/// Key invariants:
/// - `initial_margin == size * entry_price / leverage` after every mutation
/// - `status` goes OPEN -> CLOSED exactly once; closed positions are immutable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: Symbol,
    pub side: Side,
    pub tier: Tier,
    pub size: Quantity,
    pub leverage: Leverage,
    pub entry_price: Price,
    pub current_price: Price,

    // Exits
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub trailing_stop: Option<TrailingStop>,

    // Accounting
    pub initial_margin: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    /// Fees attributed to the remaining size (plus the exit fee once closed)
    pub fees: Decimal,
    /// Every fee ever paid on this position
    pub fees_paid: Decimal,

    pub signal_strength: Option<SignalStrength>,
    pub status: PositionStatus,

    // Audit
    pub open_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub close_time: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
}

impl Position {
    /// Create an open position from an entry fill
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        symbol: Symbol,
        side: Side,
        tier: Tier,
        size: Quantity,
        leverage: Leverage,
        entry_price: Price,
        entry_fee: Decimal,
        opened_at: DateTime<Utc>,
    ) -> Self {
        let mut position = Self {
            id: Uuid::now_v7(),
            symbol,
            side,
            tier,
            size,
            leverage,
            entry_price,
            current_price: entry_price,
            stop_loss: None,
            take_profit: None,
            trailing_stop: None,
            initial_margin: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            fees: entry_fee,
            fees_paid: entry_fee,
            signal_strength: None,
            status: PositionStatus::Open,
            open_time: opened_at,
            updated_at: opened_at,
            close_time: None,
            close_reason: None,
        };
        position.initial_margin = Self::margin_for(size, entry_price, leverage);
        position.recompute_pnl();
        position
    }

    /// Attach a fixed stop-loss
    pub fn with_stop_loss(mut self, stop: Price) -> Self {
        self.stop_loss = Some(stop);
        self
    }

    /// Attach a take-profit target
    pub fn with_take_profit(mut self, target: Price) -> Self {
        self.take_profit = Some(target);
        self
    }

    /// Enable a trailing stop anchored at the entry price.
    ///
    /// When no stop-loss is set yet, the initial stop is placed `distance` away
    /// from the entry.
    pub fn with_trailing_stop(mut self, distance: Decimal) -> Self {
        if distance <= Decimal::ZERO {
            return self;
        }
        if self.stop_loss.is_none() {
            let initial = self.entry_price.as_decimal() - distance * self.side.sign();
            self.stop_loss = Price::new(initial).ok();
        }
        self.trailing_stop = Some(TrailingStop {
            distance,
            high_water_mark: self.entry_price,
        });
        self
    }

    /// Record the signal that sized this position
    pub fn with_signal_strength(mut self, strength: SignalStrength) -> Self {
        self.signal_strength = Some(strength);
        self
    }

    /// Required margin for a given size, price and leverage
    pub fn margin_for(size: Quantity, price: Price, leverage: Leverage) -> Decimal {
        size.as_decimal() * price.as_decimal() / leverage.as_decimal()
    }

    /// Check if position is still being monitored
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Notional value at the current price
    pub fn notional(&self) -> Decimal {
        self.size.as_decimal() * self.current_price.as_decimal()
    }

    /// Share of initial margin consumed by the current loss (0 when in profit)
    pub fn margin_ratio(&self) -> Decimal {
        if self.initial_margin <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (-self.unrealized_pnl).max(Decimal::ZERO) / self.initial_margin
    }

    /// Refresh the mark and recompute unrealized PnL
    pub fn update_price(&mut self, price: Price, at: DateTime<Utc>) {
        if !self.is_open() {
            return;
        }
        self.current_price = price;
        self.updated_at = at;
        self.recompute_pnl();
    }

    /// Apply a trailing stop ratchet computed by the pure trailing functions
    pub fn apply_trailing_update(&mut self, update: TrailingStopUpdate) {
        if let Some(trailing) = self.trailing_stop.as_mut() {
            trailing.high_water_mark = update.new_favorable_extreme;
            self.stop_loss = Some(update.new_stop);
        }
    }

    /// Partially close the position.
    ///
    /// Books `(price - entry) * quantity * sign` minus the proportional share of
    /// attributed fees and the reduction fee. Returns the PnL booked.
    ///
    /// # Errors
    /// - position is closed
    /// - quantity is not strictly below the current size (use `close` instead)
    pub fn reduce(
        &mut self,
        quantity: Quantity,
        price: Price,
        fee: Decimal,
    ) -> Result<Decimal, DomainError> {
        self.ensure_open("reduce")?;
        let size = self.size.as_decimal();
        let qty = quantity.as_decimal();
        if qty >= size {
            return Err(DomainError::InvalidOrder(format!(
                "reduce quantity {} must be below position size {}",
                qty, size
            )));
        }

        let fee_share = self.fees * qty / size;
        let booked = (price.as_decimal() - self.entry_price.as_decimal()) * qty * self.side.sign()
            - fee_share
            - fee;

        self.realized_pnl += booked;
        self.fees -= fee_share;
        self.fees_paid += fee;
        self.size = Quantity::new(size - qty)?;
        self.initial_margin = Self::margin_for(self.size, self.entry_price, self.leverage);
        self.recompute_pnl();
        Ok(booked)
    }

    /// Add to the position at `price`, averaging the entry price
    ///
    /// # Errors
    /// Position is closed
    pub fn increase(
        &mut self,
        quantity: Quantity,
        price: Price,
        fee: Decimal,
    ) -> Result<(), DomainError> {
        self.ensure_open("increase")?;
        let size = self.size.as_decimal();
        let qty = quantity.as_decimal();
        let new_size = size + qty;
        let entry = (self.entry_price.as_decimal() * size + price.as_decimal() * qty) / new_size;

        self.entry_price = Price::new(entry)?;
        self.size = Quantity::new(new_size)?;
        self.fees += fee;
        self.fees_paid += fee;
        self.initial_margin = Self::margin_for(self.size, self.entry_price, self.leverage);
        self.recompute_pnl();
        Ok(())
    }

    /// Close the position at `exit_price`.
    ///
    /// # Errors
    /// `DomainError::InvalidStateTransition` if the position is already closed
    pub fn close(
        &mut self,
        exit_price: Price,
        exit_fee: Decimal,
        reason: CloseReason,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_open("close")?;

        let gross = (exit_price.as_decimal() - self.entry_price.as_decimal())
            * self.size.as_decimal()
            * self.side.sign();
        self.realized_pnl += gross - self.fees - exit_fee;
        self.fees += exit_fee;
        self.fees_paid += exit_fee;
        self.current_price = exit_price;
        self.unrealized_pnl = Decimal::ZERO;
        self.status = PositionStatus::Closed;
        self.close_reason = Some(reason);
        self.close_time = Some(at);
        self.updated_at = at;
        Ok(())
    }

    fn recompute_pnl(&mut self) {
        self.unrealized_pnl = (self.current_price.as_decimal() - self.entry_price.as_decimal())
            * self.size.as_decimal()
            * self.side.sign()
            - self.fees;
    }

    fn ensure_open(&self, action: &str) -> Result<(), DomainError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DomainError::InvalidStateTransition(format!(
                "cannot {} position {}: already closed",
                action, self.id
            )))
        }
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Order types supported
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Market order (immediate execution)
    Market,
    /// Limit order (price guaranteed)
    Limit,
}

impl OrderType {
    /// Exchange wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        }
    }
}

/// Order status lifecycle (exchange vocabulary)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Accepted, not filled yet
    New,
    /// Partially filled
    PartiallyFilled,
    /// Completely filled
    Filled,
    /// Cancelled
    Canceled,
    /// Rejected by exchange
    Rejected,
    /// Expired
    Expired,
}

impl OrderStatus {
    /// No further fills can happen
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    /// Parse the exchange status string
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NEW" => Some(OrderStatus::New),
            "PARTIALLY_FILLED" => Some(OrderStatus::PartiallyFilled),
            "FILLED" => Some(OrderStatus::Filled),
            "CANCELED" | "CANCELLED" => Some(OrderStatus::Canceled),
            "REJECTED" => Some(OrderStatus::Rejected),
            "EXPIRED" | "EXPIRED_IN_MATCH" => Some(OrderStatus::Expired),
            _ => None,
        }
    }
}

/// Ephemeral order request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Quantity,
    pub price: Option<Price>,
    #[serde(default)]
    pub reduce_only: bool,
    pub client_order_id: String,
}

impl OrderRequest {
    /// Market order
    pub fn market(symbol: Symbol, side: OrderSide, quantity: Quantity) -> Self {
        Self {
            symbol,
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            reduce_only: false,
            client_order_id: Uuid::now_v7().simple().to_string(),
        }
    }

    /// Limit order at `price`
    pub fn limit(symbol: Symbol, side: OrderSide, quantity: Quantity, price: Price) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            ..Self::market(symbol, side, quantity)
        }
    }

    /// Mark as reduce-only (exits, rebalance reductions)
    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    /// Check structural validity
    ///
    /// # Errors
    /// `DomainError::InvalidOrder` if a limit order has no price
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.order_type == OrderType::Limit && self.price.is_none() {
            return Err(DomainError::InvalidOrder("limit order requires a price".to_string()));
        }
        Ok(())
    }
}

/// Finalized execution of an order request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: OrderId,
    pub position_id: Option<PositionId>,
    pub request: OrderRequest,
    pub exchange_order_id: String,
    pub status: OrderStatus,
    pub expected_price: Option<Price>,
    pub executed_price: Price,
    pub executed_quantity: Decimal,
    /// `executed - expected`: positive is adverse for a BUY
    pub slippage: Decimal,
    pub fees: Decimal,
    pub fee_asset: String,
    pub latency_ms: u64,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Build a record, deriving slippage from the expected price
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request: OrderRequest,
        exchange_order_id: String,
        status: OrderStatus,
        expected_price: Option<Price>,
        executed_price: Price,
        executed_quantity: Decimal,
        fees: Decimal,
        fee_asset: String,
        executed_at: DateTime<Utc>,
    ) -> Self {
        let slippage = expected_price
            .map(|expected| executed_price.as_decimal() - expected.as_decimal())
            .unwrap_or(Decimal::ZERO);
        Self {
            id: Uuid::now_v7(),
            position_id: None,
            request,
            exchange_order_id,
            status,
            expected_price,
            executed_price,
            executed_quantity,
            slippage,
            fees,
            fee_asset,
            latency_ms: 0,
            executed_at,
        }
    }

    /// Link the record to a managed position
    pub fn for_position(mut self, position_id: PositionId) -> Self {
        self.position_id = Some(position_id);
        self
    }

    /// Apply a later status report for the same order.
    ///
    /// Returns whether anything changed. A record in a final status is left
    /// untouched.
    pub fn apply_update(
        &mut self,
        status: OrderStatus,
        executed_price: Price,
        executed_quantity: Decimal,
        fees: Decimal,
        at: DateTime<Utc>,
    ) -> bool {
        if self.status.is_final() {
            return false;
        }
        if self.status == status && self.executed_quantity == executed_quantity {
            return false;
        }
        self.status = status;
        self.executed_price = executed_price;
        self.executed_quantity = executed_quantity;
        self.fees = fees;
        self.executed_at = at;
        if let Some(expected) = self.expected_price {
            self.slippage = executed_price.as_decimal() - expected.as_decimal();
        }
        true
    }

    /// Traded value in quote currency
    ///
    /// `executed_quantity` comes straight from the exchange report, so the
    /// product saturates instead of overflowing.
    pub fn notional(&self) -> Decimal {
        self.executed_price.as_decimal().saturating_mul(self.executed_quantity)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc_long(size: Decimal, entry: Decimal, fee: Decimal) -> Position {
        Position::open(
            Symbol::from_pair("BTCUSDT").unwrap(),
            Side::Long,
            Tier::Tier1,
            Quantity::new(size).unwrap(),
            Leverage::new(10).unwrap(),
            Price::new(entry).unwrap(),
            fee,
            Utc::now(),
        )
    }

    fn px(value: Decimal) -> Price {
        Price::new(value).unwrap()
    }

    #[test]
    fn test_initial_margin_at_creation() {
        let position = btc_long(dec!(1), dec!(50000), dec!(0));
        assert_eq!(position.initial_margin, dec!(5000));
        assert_eq!(position.unrealized_pnl, dec!(0));
        assert!(position.is_open());
    }

    #[test]
    fn test_unrealized_pnl_minus_fees() {
        let mut position = btc_long(dec!(1), dec!(50000), dec!(50));
        position.update_price(px(dec!(51000)), Utc::now());
        assert_eq!(position.unrealized_pnl, dec!(950));
        assert_eq!(position.margin_ratio(), dec!(0));
    }

    #[test]
    fn test_short_pnl_sign() {
        let mut position = Position::open(
            Symbol::from_pair("ETHUSDT").unwrap(),
            Side::Short,
            Tier::Tier1,
            Quantity::new(dec!(2)).unwrap(),
            Leverage::new(5).unwrap(),
            px(dec!(3000)),
            dec!(0),
            Utc::now(),
        );
        position.update_price(px(dec!(2900)), Utc::now());
        assert_eq!(position.unrealized_pnl, dec!(200));
        position.update_price(px(dec!(3300)), Utc::now());
        assert_eq!(position.unrealized_pnl, dec!(-600));
        // 600 loss on 1200 margin
        assert_eq!(position.margin_ratio(), dec!(0.5));
    }

    #[test]
    fn test_close_books_realized_once() {
        let mut position = btc_long(dec!(1), dec!(50000), dec!(50));
        position.close(px(dec!(49000)), dec!(49), CloseReason::StopLoss, Utc::now()).unwrap();

        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.realized_pnl, dec!(-1099));
        assert_eq!(position.unrealized_pnl, dec!(0));
        assert_eq!(position.fees, dec!(99));
        assert_eq!(position.close_reason, Some(CloseReason::StopLoss));

        let again = position.close(px(dec!(48000)), dec!(0), CloseReason::Manual, Utc::now());
        assert!(matches!(again, Err(DomainError::InvalidStateTransition(_))));
        assert_eq!(position.realized_pnl, dec!(-1099));
    }

    #[test]
    fn test_closed_position_ignores_price_updates() {
        let mut position = btc_long(dec!(1), dec!(50000), dec!(0));
        position.close(px(dec!(50000)), dec!(0), CloseReason::Manual, Utc::now()).unwrap();
        position.update_price(px(dec!(60000)), Utc::now());
        assert_eq!(position.current_price.as_decimal(), dec!(50000));
    }

    #[test]
    fn test_reduce_books_proportional_pnl() {
        let mut position = btc_long(dec!(2), dec!(50000), dec!(100));
        let booked = position
            .reduce(Quantity::new(dec!(0.5)).unwrap(), px(dec!(52000)), dec!(26))
            .unwrap();

        // 2000 * 0.5 - 25 (fee share) - 26
        assert_eq!(booked, dec!(949));
        assert_eq!(position.realized_pnl, dec!(949));
        assert_eq!(position.size.as_decimal(), dec!(1.5));
        assert_eq!(position.fees, dec!(75));
        assert_eq!(position.fees_paid, dec!(126));
        assert_eq!(position.initial_margin, dec!(7500));
    }

    #[test]
    fn test_margin_at_value_caps() {
        let size = Quantity::new(crate::MAX_QUANTITY).unwrap();
        let margin = Position::margin_for(size, px(crate::MAX_PRICE), Leverage::new(1).unwrap());
        assert_eq!(margin, crate::MAX_QUANTITY * crate::MAX_PRICE);

        let mut position = btc_long(dec!(1), dec!(50000), dec!(0));
        position.size = size;
        position.update_price(px(crate::MAX_PRICE), Utc::now());
        assert!(position.unrealized_pnl > Decimal::ZERO);
        assert!(position.notional() > Decimal::ZERO);
    }

    #[test]
    fn test_reduce_full_size_rejected() {
        let mut position = btc_long(dec!(1), dec!(50000), dec!(0));
        let result = position.reduce(Quantity::new(dec!(1)).unwrap(), px(dec!(50000)), dec!(0));
        assert!(result.is_err());
        assert_eq!(position.size.as_decimal(), dec!(1));
    }

    #[test]
    fn test_increase_averages_entry() {
        let mut position = btc_long(dec!(1), dec!(50000), dec!(0));
        position.increase(Quantity::new(dec!(1)).unwrap(), px(dec!(52000)), dec!(10)).unwrap();

        assert_eq!(position.entry_price.as_decimal(), dec!(51000));
        assert_eq!(position.size.as_decimal(), dec!(2));
        assert_eq!(position.initial_margin, dec!(10200));
        assert_eq!(position.fees, dec!(10));
    }

    #[test]
    fn test_trailing_stop_initial_level() {
        let position = btc_long(dec!(1), dec!(50000), dec!(0)).with_trailing_stop(dec!(1000));
        assert_eq!(position.stop_loss, Some(px(dec!(49000))));
        assert_eq!(position.trailing_stop.unwrap().high_water_mark, px(dec!(50000)));

        let explicit = btc_long(dec!(1), dec!(50000), dec!(0))
            .with_stop_loss(px(dec!(48000)))
            .with_trailing_stop(dec!(1000));
        assert_eq!(explicit.stop_loss, Some(px(dec!(48000))));
    }

    #[test]
    fn test_order_request_validation() {
        let symbol = Symbol::from_pair("BTCUSDT").unwrap();
        let qty = Quantity::new(dec!(0.01)).unwrap();

        let market = OrderRequest::market(symbol.clone(), OrderSide::Buy, qty);
        assert!(market.validate().is_ok());
        assert!(!market.reduce_only);

        let mut limit = OrderRequest::limit(symbol, OrderSide::Sell, qty, px(dec!(50000)));
        assert!(limit.validate().is_ok());
        limit.price = None;
        assert!(limit.validate().is_err());
    }

    #[test]
    fn test_execution_record_slippage() {
        let symbol = Symbol::from_pair("BTCUSDT").unwrap();
        let request =
            OrderRequest::market(symbol, OrderSide::Buy, Quantity::new(dec!(1)).unwrap());
        let record = ExecutionRecord::new(
            request,
            "1".to_string(),
            OrderStatus::Filled,
            Some(px(dec!(50000))),
            px(dec!(50010)),
            dec!(1),
            dec!(50.01),
            "USDT".to_string(),
            Utc::now(),
        );
        assert_eq!(record.slippage, dec!(10));
        assert_eq!(record.notional(), dec!(50010));
    }

    #[test]
    fn test_resting_record_takes_fill_update() {
        let symbol = Symbol::from_pair("BTCUSDT").unwrap();
        let qty = Quantity::new(dec!(0.5)).unwrap();
        let request = OrderRequest::limit(symbol, OrderSide::Buy, qty, px(dec!(49000)));
        let mut record = ExecutionRecord::new(
            request,
            "7".to_string(),
            OrderStatus::New,
            Some(px(dec!(49000))),
            px(dec!(49000)),
            dec!(0),
            dec!(0),
            "USDT".to_string(),
            Utc::now(),
        );

        let at = Utc::now();
        let filled = px(dec!(48990));
        assert!(record.apply_update(OrderStatus::Filled, filled, dec!(0.5), dec!(24.5), at));
        assert_eq!(record.status, OrderStatus::Filled);
        assert_eq!(record.executed_quantity, dec!(0.5));
        assert_eq!(record.slippage, dec!(-10));

        // Final status is sticky
        assert!(!record.apply_update(OrderStatus::Canceled, px(dec!(1)), dec!(0), dec!(0), at));
        assert_eq!(record.status, OrderStatus::Filled);
    }

    #[test]
    fn test_order_status() {
        assert!(OrderStatus::Filled.is_final());
        assert!(!OrderStatus::New.is_final());
        assert_eq!(OrderStatus::parse("PARTIALLY_FILLED"), Some(OrderStatus::PartiallyFilled));
        assert_eq!(OrderStatus::parse("bogus"), None);
        assert_eq!(serde_json::to_string(&CloseReason::MarginCall).unwrap(), "\"MARGIN_CALL\"");
    }
}
