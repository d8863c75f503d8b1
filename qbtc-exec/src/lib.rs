//! QBTC Execution Layer
//!
//! Order execution with retries, trading switches and execution records.
//!
//! # Architecture
//!
//! ```text
//! Position Manager → OrderExecutor → ExchangePort → Exchange
//!                         ↓
//!                  Store (records, events)
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits defining interfaces for exchange, market data and signals
//! - **Executor**: Retries transient failures, enforces trading switches, records executions
//! - **Binance**: `ExchangePort` over the futures REST client
//! - **Stub**: Test implementations for development
//!
//! # Example
//!
//! ```rust,ignore
//! use qbtc_exec::{OrderExecutor, StubExchange};
//! use qbtc_store::MemoryStore;
//! use std::sync::Arc;
//!
//! let exchange = Arc::new(StubExchange::new(dec!(95000)));
//! let store = Arc::new(MemoryStore::new());
//! let executor = OrderExecutor::new(exchange, store);
//!
//! let record = executor.execute(request, Some(expected_price), None).await?;
//! ```

#![warn(clippy::all)]

pub mod binance;
pub mod error;
pub mod executor;
pub mod ports;
pub mod stub;

// Re-exports for convenience
pub use binance::BinanceExchange;
pub use error::{ExecError, ExecResult};
pub use executor::{ExecutionMetrics, OrderExecutor, RetryPolicy, TradingState};
pub use ports::{
    AccountSnapshot, ConstantSignal, ExchangePort, ExchangePosition, MarketDataPort, OrderResult,
    PriceUpdate, SignalSource,
};
pub use stub::{StubExchange, StubMarketData};
