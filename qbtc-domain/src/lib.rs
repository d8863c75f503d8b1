//! QBTC Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains positions, tiers, portfolio aggregates, orders and the
//! trailing-stop rules shared by the engine and the daemon.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod clock;
pub mod entities;
pub mod events;
pub mod market_data;
pub mod portfolio;
pub mod tier;
pub mod trailing;
pub mod value_objects;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use entities::{
    CloseReason, ExecutionRecord, OrderId, OrderRequest, OrderStatus, OrderType, Position,
    PositionId, PositionStatus, TrailingStop,
};
pub use events::Event;
pub use market_data::{BookTicker, Kline, MarkPrice, MarketDataEvent, OrderBook, PriceTick};
pub use portfolio::{PortfolioState, TierExposure};
pub use tier::{Tier, TierTable};
pub use trailing::{is_stop_hit, is_take_profit_hit, ratchet_trailing_stop, TrailingStopUpdate};
pub use value_objects::{
    DomainError, Leverage, OrderSide, Price, Quantity, Side, SignalStrength, Symbol, MAX_PRICE,
    MAX_QUANTITY,
};
