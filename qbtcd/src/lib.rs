//! QBTC Daemon Library
//!
//! Runtime orchestrator for the QBTC position and risk core.
//!
//! # Architecture
//!
//! ```text
//! HTTP/WS API → Position Manager → Engine (risk, tick) → Executor → Exchange
//!                    ↑        ↑
//!          Scheduler jobs   Price Cache ← Market Data Bridge ← Exchange streams
//!   (monitor, risk, rebalance)
//!                    ↓
//!                Event Bus → WebSocket clients
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator
//! - **Position Manager**: Open/close, monitor tick, ledger and portfolio
//! - **Rebalancer**: Tier allocation rebalancing
//! - **Risk Monitor**: Account health, alerts, emergency mode
//! - **Scheduler**: Periodic jobs with failure isolation
//! - **Market Data**: Price cache and stream bridge
//! - **Event Bus**: Internal fan-out (API WebSocket, logging)
//! - **API**: HTTP endpoints
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use qbtcd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     Daemon::new_stub(config)?.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod event_bus;
pub mod market_data;
pub mod metrics;
pub mod position_manager;
pub mod rebalancer;
pub mod risk_monitor;
pub mod scheduler;

// Re-exports for convenience
pub use config::{ApiConfig, Config, Environment, LogFormat};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use event_bus::{DaemonEvent, EventBus, EventReceiver};
pub use market_data::{MarketDataBridge, PriceCache};
pub use metrics::DaemonMetrics;
pub use position_manager::{OpenPositionRequest, PositionManager, TickSummary};
pub use rebalancer::{PortfolioRebalancer, RebalanceOutcome};
pub use risk_monitor::RiskMonitor;
pub use scheduler::{JobStats, Scheduler};
