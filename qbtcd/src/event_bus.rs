//! Event bus for internal daemon communication.
//!
//! The event bus decouples producers from consumers:
//! - Market data bridge → price cache, WebSocket clients
//! - Position manager → WebSocket clients (opened, ratcheted, closed)
//! - Risk monitor → WebSocket clients (alerts)
//!
//! Uses tokio broadcast channels for fan-out to multiple receivers. Events
//! serialize as `{"type": "...", "data": {...}}`.

use chrono::{DateTime, Utc};
use qbtc_connectors::AccountUpdate;
use qbtc_domain::{
    BookTicker, ExecutionRecord, MarkPrice, Position, PositionId, Price, Symbol,
};
use qbtc_engine::RiskAlert;
use qbtc_exec::PriceUpdate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// =============================================================================
// Event Types
// =============================================================================

/// Events that flow through the daemon event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DaemonEvent {
    /// Last traded price changed
    PriceUpdate(PriceUpdate),

    /// Best bid/ask changed
    BookTicker(BookTicker),

    /// Mark price update
    MarkPrice(MarkPrice),

    /// Position accepted and opened
    PositionOpened(Position),

    /// Trailing stop moved
    StopLossRatcheted {
        /// Position identifier
        position_id: PositionId,
        /// Trading pair
        symbol: Symbol,
        /// Stop before the move
        previous_stop: Option<Price>,
        /// Stop after the move
        new_stop: Price,
        /// Price that moved it
        trigger_price: Price,
        /// When it moved
        timestamp: DateTime<Utc>,
    },

    /// Position closed and moved to history
    PositionClosed(Position),

    /// Balance or position change reported by the exchange
    AccountUpdate(AccountUpdate),

    /// Order filled
    OrderExecuted(ExecutionRecord),

    /// Order cancelled
    OrderCancelled {
        /// Trading pair
        symbol: Symbol,
        /// Exchange order id
        order_id: String,
        /// When it was cancelled
        timestamp: DateTime<Utc>,
    },

    /// Rebalance round finished
    RebalanceExecuted {
        /// Trades executed
        trades: usize,
        /// Sum of traded value
        total_value: Decimal,
        /// When it finished
        timestamp: DateTime<Utc>,
    },

    /// Account health alert (deduplicated)
    RiskAlert(RiskAlert),

    /// Exchange connectivity problem
    GatewayError {
        /// Component that failed (`market_stream`, `user_stream`, `account_sync`, ...)
        source: String,
        /// Error description
        message: String,
        /// When it happened
        timestamp: DateTime<Utc>,
    },
}

impl DaemonEvent {
    /// Serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            DaemonEvent::PriceUpdate(_) => "price_update",
            DaemonEvent::BookTicker(_) => "book_ticker",
            DaemonEvent::MarkPrice(_) => "mark_price",
            DaemonEvent::PositionOpened(_) => "position_opened",
            DaemonEvent::StopLossRatcheted { .. } => "stop_loss_ratcheted",
            DaemonEvent::PositionClosed(_) => "position_closed",
            DaemonEvent::AccountUpdate(_) => "account_update",
            DaemonEvent::OrderExecuted(_) => "order_executed",
            DaemonEvent::OrderCancelled { .. } => "order_cancelled",
            DaemonEvent::RebalanceExecuted { .. } => "rebalance_executed",
            DaemonEvent::RiskAlert(_) => "risk_alert",
            DaemonEvent::GatewayError { .. } => "gateway_error",
        }
    }

    /// Gateway error stamped now
    pub fn gateway_error(source: &str, message: impl Into<String>) -> Self {
        DaemonEvent::GatewayError {
            source: source.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Event bus for daemon-wide communication.
///
/// Multiple producers can send events, and multiple consumers can receive.
/// Uses broadcast channels for fan-out pattern.
pub struct EventBus {
    sender: broadcast::Sender<DaemonEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity.
    ///
    /// Capacity determines how many events can be buffered before
    /// slow receivers start missing events (lagging).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    /// Returns 0 if there are no active receivers.
    pub fn send(&self, event: DaemonEvent) -> usize {
        // send() returns Err if there are no receivers, but we don't care
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events.
    ///
    /// Returns a receiver that will receive all events sent after subscription.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver { receiver: self.sender.subscribe() }
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Receiver for daemon events.
pub struct EventReceiver {
    receiver: broadcast::Receiver<DaemonEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` if the sender has been dropped.
    /// Returns error description if the receiver lagged (missed events).
    pub async fn recv(&mut self) -> Option<Result<DaemonEvent, String>> {
        match self.receiver.recv().await {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} events", count)))
            },
        }
    }

    /// Try to receive an event without blocking.
    ///
    /// Returns `None` if no event is immediately available.
    pub fn try_recv(&mut self) -> Option<Result<DaemonEvent, String>> {
        match self.receiver.try_recv() {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::TryRecvError::Empty) => None,
            Err(broadcast::error::TryRecvError::Closed) => None,
            Err(broadcast::error::TryRecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} events", count)))
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
