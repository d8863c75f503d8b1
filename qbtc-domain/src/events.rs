//! Domain Events for QBTC
//!
//! Events represent state changes in the domain.
//! They are appended to the event log as an audit trail.

use crate::entities::{CloseReason, OrderId, PositionId};
use crate::tier::Tier;
use crate::value_objects::{Leverage, OrderSide, Price, Quantity, Side, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Domain events
///
/// Events are immutable records of state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Open order filled and position accepted
    PositionOpened {
        /// Unique position identifier
        position_id: PositionId,
        /// Trading pair symbol
        symbol: Symbol,
        /// Position direction
        side: Side,
        /// Exposure bucket
        tier: Tier,
        /// Filled size
        size: Quantity,
        /// Leverage
        leverage: Leverage,
        /// Fill price
        entry_price: Price,
        /// Margin locked
        initial_margin: Decimal,
        /// When the position was opened
        timestamp: DateTime<Utc>,
    },

    /// Trailing stop tightened due to favorable price movement
    StopLossRatcheted {
        /// Position identifier
        position_id: PositionId,
        /// Previous stop price
        previous_stop: Option<Price>,
        /// New stop price
        new_stop: Price,
        /// Price that triggered the update
        trigger_price: Price,
        /// When the update occurred
        timestamp: DateTime<Utc>,
    },

    /// Position closed with final P&L
    PositionClosed {
        /// Position identifier
        position_id: PositionId,
        /// Reason for closure
        reason: CloseReason,
        /// Entry price
        entry_price: Price,
        /// Price the PnL was booked at
        exit_price: Price,
        /// Realized profit/loss in quote currency
        realized_pnl: Decimal,
        /// Total fees paid
        total_fees: Decimal,
        /// When the position was closed
        timestamp: DateTime<Utc>,
    },

    /// Order filled on the exchange
    OrderExecuted {
        /// Execution record id
        order_id: OrderId,
        /// Managed position the order belongs to, if any
        position_id: Option<PositionId>,
        /// Exchange order id
        exchange_order_id: String,
        /// Trading pair symbol
        symbol: Symbol,
        /// Order direction
        side: OrderSide,
        /// Executed quantity
        quantity: Decimal,
        /// Average fill price
        executed_price: Price,
        /// Fill minus expected price
        slippage: Decimal,
        /// Fees paid
        fees: Decimal,
        /// When the order was executed
        timestamp: DateTime<Utc>,
    },

    /// Open order cancelled on the exchange
    OrderCancelled {
        /// Trading pair symbol
        symbol: Symbol,
        /// Exchange order id
        exchange_order_id: String,
        /// When the cancellation occurred
        timestamp: DateTime<Utc>,
    },

    /// Rebalance round completed
    RebalanceExecuted {
        /// Trades executed in this round
        trades: usize,
        /// Sum of traded value
        total_value: Decimal,
        /// When the rebalance finished
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Position the event refers to, if any
    pub fn position_id(&self) -> Option<PositionId> {
        match self {
            Event::PositionOpened { position_id, .. }
            | Event::StopLossRatcheted { position_id, .. }
            | Event::PositionClosed { position_id, .. } => Some(*position_id),
            Event::OrderExecuted { position_id, .. } => *position_id,
            Event::OrderCancelled { .. } | Event::RebalanceExecuted { .. } => None,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::PositionOpened { timestamp, .. }
            | Event::StopLossRatcheted { timestamp, .. }
            | Event::PositionClosed { timestamp, .. }
            | Event::OrderExecuted { timestamp, .. }
            | Event::OrderCancelled { timestamp, .. }
            | Event::RebalanceExecuted { timestamp, .. } => *timestamp,
        }
    }

    /// Serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::PositionOpened { .. } => "position_opened",
            Event::StopLossRatcheted { .. } => "stop_loss_ratcheted",
            Event::PositionClosed { .. } => "position_closed",
            Event::OrderExecuted { .. } => "order_executed",
            Event::OrderCancelled { .. } => "order_cancelled",
            Event::RebalanceExecuted { .. } => "rebalance_executed",
        }
    }
}
