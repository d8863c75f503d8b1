//! QBTC Daemon
//!
//! Runtime orchestrator for positions, risk, execution and the API server.
//!
//! # Usage
//!
//! ```bash
//! # Start against the stub exchange
//! cargo run -p qbtcd
//!
//! # Trade on the futures testnet
//! BINANCE_API_KEY=... BINANCE_API_SECRET=... BINANCE_TESTNET=true cargo run -p qbtcd
//! ```
//!
//! # Environment Variables
//!
//! - `QBTC_ENV`: Environment (test, development, production)
//! - `QBTC_API_HOST` / `PORT` / `QBTC_API_PORT`: API address (default 0.0.0.0:8080)
//! - `QBTC_LOG_FORMAT`: `text` (default) or `json`
//! - `QBTC_SYMBOLS`: Streamed symbols, comma separated
//! - `QBTC_INITIAL_EQUITY`: Starting ledger balance (default 100000)
//! - `QBTC_MAX_POSITIONS`, `QBTC_MAX_LEVERAGE`, `QBTC_LIQUIDATION_THRESHOLD`: Risk limits
//! - `QBTC_DEFAULT_TRAILING_PCT`: Trailing distance when a request sets none (default 0.02)
//! - `QBTC_REBALANCE_THRESHOLD`, `QBTC_REBALANCE_COOLDOWN_SECS`, `QBTC_MAX_DAILY_REBALANCES`
//! - `QBTC_MONITOR_INTERVAL_SECS`, `QBTC_RISK_INTERVAL_SECS`, `QBTC_REBALANCE_INTERVAL_SECS`,
//!   `QBTC_ORDER_MONITOR_INTERVAL_SECS`
//! - `BINANCE_API_KEY`, `BINANCE_API_SECRET`, `BINANCE_TESTNET`: Exchange access
//! - `RUST_LOG`: Log filter (default `qbtcd=info`)

use qbtcd::{Config, Daemon, LogFormat};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qbtcd=info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::registry().with(fmt::layer()).with(filter).init(),
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        live = config.is_live(),
        "QBTC Daemon"
    );

    // Create and run daemon
    if config.is_live() {
        Daemon::live(config)?.run().await?;
    } else {
        Daemon::new_stub(config)?.run().await?;
    }

    Ok(())
}
