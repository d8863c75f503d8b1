//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Position Manager (position lifecycle, monitor tick)
//! - Rebalancer and Risk Monitor (periodic jobs)
//! - Event Bus (internal communication, WebSocket fan-out)
//! - API Server (HTTP endpoints)
//! - Market Data (exchange streams into the price cache)
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Initialize components
//! 3. Restore open positions from store
//! 4. Start API server
//! 5. Start streams (live only) and the job scheduler
//! 6. Log events until SIGINT, then shut down gracefully

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use qbtc_connectors::{BinanceRestClient, BinanceStreamClient, StreamEvent};
use qbtc_engine::Engine;
use qbtc_exec::{BinanceExchange, ExecError, ExchangePort, OrderExecutor, StubExchange};
use qbtc_store::{MemoryStore, Store};

use crate::api::{create_router, ApiState};
use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::{DaemonEvent, EventBus};
use crate::market_data::{MarketDataBridge, PriceCache};
use crate::metrics::DaemonMetrics;
use crate::position_manager::PositionManager;
use crate::rebalancer::PortfolioRebalancer;
use crate::risk_monitor::RiskMonitor;
use crate::scheduler::Scheduler;

/// Capacity of the daemon event bus
const EVENT_BUS_CAPACITY: usize = 1000;

/// Capacity of the raw stream channel
const STREAM_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Daemon
// =============================================================================

/// The main QBTC daemon.
pub struct Daemon<E: ExchangePort + ?Sized + 'static, S: Store + ?Sized + 'static> {
    /// Configuration
    config: Config,
    /// Position manager
    position_manager: Arc<PositionManager<E, S>>,
    /// Tier rebalancer
    rebalancer: Arc<PortfolioRebalancer<E, S>>,
    /// Account risk monitor
    risk_monitor: Arc<RiskMonitor<E, S>>,
    /// Price cache fed by the streams
    price_cache: Arc<PriceCache<E>>,
    /// Event bus
    event_bus: Arc<EventBus>,
    /// Prometheus registry
    metrics: Arc<DaemonMetrics>,
    /// REST client for listen keys (live only)
    user_stream: Option<Arc<BinanceExchange>>,
    /// Start time
    started_at: DateTime<Utc>,
}

impl Daemon<StubExchange, MemoryStore> {
    /// Create a new daemon with stub components (for testing/development).
    pub fn new_stub(config: Config) -> DaemonResult<Self> {
        let exchange = Arc::new(StubExchange::new(rust_decimal_macros::dec!(95000)));
        let store = Arc::new(MemoryStore::new());
        Self::new(config, exchange, store, None)
    }
}

impl Daemon<BinanceExchange, MemoryStore> {
    /// Create a daemon trading on Binance futures with the configured keys.
    pub fn live(config: Config) -> DaemonResult<Self> {
        let (key, secret) = config
            .exchange
            .credentials()
            .ok_or_else(|| DaemonError::Config("BINANCE_API_KEY/SECRET not set".to_string()))?;
        let client = BinanceRestClient::new(key, secret, config.exchange.testnet);
        let exchange = Arc::new(BinanceExchange::new(client));
        let store = Arc::new(MemoryStore::new());
        Self::new(config, exchange.clone(), store, Some(exchange))
    }
}

impl<E: ExchangePort + ?Sized + 'static, S: Store + ?Sized + 'static> Daemon<E, S> {
    /// Create a new daemon with provided exchange and store.
    pub fn new(
        config: Config,
        exchange: Arc<E>,
        store: Arc<S>,
        user_stream: Option<Arc<BinanceExchange>>,
    ) -> DaemonResult<Self> {
        let event_bus = Arc::new(EventBus::new(EVENT_BUS_CAPACITY));
        let metrics = Arc::new(DaemonMetrics::new()?);
        let price_cache = Arc::new(PriceCache::new(exchange.clone()));
        let executor = Arc::new(OrderExecutor::new(exchange, store));

        let position_manager = Arc::new(
            PositionManager::new(
                Engine::new(config.risk.limits.clone()),
                executor,
                price_cache.clone(),
                event_bus.clone(),
                config.risk.initial_equity,
            )
            .with_default_trailing_pct(config.risk.default_trailing_pct)
            .with_metrics(metrics.clone())
            .with_exchange_balance(user_stream.is_some()),
        );
        let rebalancer = Arc::new(PortfolioRebalancer::new(
            position_manager.clone(),
            config.rebalancer.clone(),
            event_bus.clone(),
        ));
        let risk_monitor = Arc::new(RiskMonitor::new(
            position_manager.clone(),
            config.risk.account.clone(),
            event_bus.clone(),
        ));

        Ok(Self {
            config,
            position_manager,
            rebalancer,
            risk_monitor,
            price_cache,
            event_bus,
            metrics,
            user_stream,
            started_at: Utc::now(),
        })
    }

    /// Position manager
    pub fn position_manager(&self) -> &Arc<PositionManager<E, S>> {
        &self.position_manager
    }

    /// Event bus
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT).
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            live = self.user_stream.is_some(),
            "Starting QBTC daemon"
        );
        let cancel = CancellationToken::new();

        // 1. Restore open positions (and the wallet balance when live)
        self.restore_positions().await?;

        // 2. Start API server
        let (api_addr, server) = self.start_api_server(cancel.clone()).await?;
        info!(%api_addr, "API server started");

        // 3. Streams
        let mut tasks = self.start_streams(cancel.clone());
        tasks.push(server);

        // 4. Periodic jobs
        let scheduler = self.build_scheduler();
        tasks.push(tokio::spawn(scheduler.run(cancel.clone())));

        // 5. Event log loop
        let mut event_receiver = self.event_bus.subscribe();
        info!("Entering main event loop");
        loop {
            tokio::select! {
                Some(event_result) = event_receiver.recv() => {
                    match event_result {
                        Ok(event) => log_event(&event),
                        Err(lag_msg) => warn!(%lag_msg, "Event receiver lagged"),
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        // 6. Graceful shutdown
        cancel.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.shutdown().await
    }

    /// Restore open positions from store.
    async fn restore_positions(&self) -> DaemonResult<()> {
        let count = self.position_manager.restore().await?;
        if count > 0 {
            info!(count, "Restored open positions from store");
        } else {
            info!("No open positions to restore");
        }

        if self.user_stream.is_some() {
            match self.position_manager.sync_account().await {
                Ok(balance) => info!(%balance, "Account synced"),
                // The account_sync job retries
                Err(e) => warn!(error = %e, "Initial account sync failed"),
            }
        }
        Ok(())
    }

    /// Start the API server; it drains in-flight requests once `cancel` fires.
    async fn start_api_server(
        &self,
        cancel: CancellationToken,
    ) -> DaemonResult<(SocketAddr, JoinHandle<()>)> {
        let state = Arc::new(ApiState {
            position_manager: self.position_manager.clone(),
            event_bus: self.event_bus.clone(),
            metrics: self.metrics.clone(),
            started_at: self.started_at,
            environment: self.config.environment.to_string(),
        });

        let router = create_router(state);
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| DaemonError::Config(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::Config(format!("Failed to get local address: {}", e)))?;

        // Spawn the server task
        let server = tokio::spawn(async move {
            let shutdown = async move { cancel.cancelled().await };
            if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(shutdown).await {
                error!(error = %e, "API server error");
            }
            info!("API server stopped");
        });

        Ok((local_addr, server))
    }

    /// Spawn the market stream, the user-data stream and the bridge (live only).
    fn start_streams(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let Some(exchange) = self.user_stream.clone() else {
            info!("No exchange credentials, streams disabled");
            return Vec::new();
        };

        let (sender, receiver) = broadcast::channel(STREAM_CHANNEL_CAPACITY);
        let bridge = MarketDataBridge::new(self.price_cache.clone(), self.event_bus.clone());
        let expired = bridge.listen_key_expired();
        let mut tasks = vec![bridge.spawn(receiver, cancel.clone())];

        let market = BinanceStreamClient::market(
            &self.config.symbols,
            self.config.exchange.testnet,
            sender.clone(),
        );
        info!(symbols = self.config.symbols.len(), "Starting market stream");
        let market_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move { market.run(market_cancel).await }));

        let testnet = self.config.exchange.testnet;
        let event_bus = self.event_bus.clone();
        tasks.push(tokio::spawn(async move {
            run_user_stream(exchange, testnet, sender, expired, event_bus, cancel).await;
        }));

        tasks
    }

    /// Register the periodic jobs.
    pub fn build_scheduler(&self) -> Scheduler {
        let schedule = &self.config.schedule;
        let mut scheduler = Scheduler::new(self.position_manager.clock().clone())
            .with_metrics(self.metrics.clone());

        let manager = self.position_manager.clone();
        scheduler.every("position_monitor", schedule.monitor_interval, move || {
            let manager = manager.clone();
            async move {
                let summary = manager.monitor_tick().await?;
                if summary.closed > 0 || summary.ratcheted > 0 || summary.failed > 0 {
                    info!(
                        evaluated = summary.evaluated,
                        ratcheted = summary.ratcheted,
                        closed = summary.closed,
                        failed = summary.failed,
                        "Monitor tick"
                    );
                }
                Ok(())
            }
        });

        let risk_monitor = self.risk_monitor.clone();
        scheduler.every("risk_monitor", schedule.risk_interval, move || {
            let risk_monitor = risk_monitor.clone();
            async move {
                let assessment = risk_monitor.run_once().await?;
                debug!(health_score = assessment.health_score, "Risk check");
                Ok(())
            }
        });

        let rebalancer = self.rebalancer.clone();
        scheduler.every("rebalancer", schedule.rebalance_interval, move || {
            let rebalancer = rebalancer.clone();
            async move {
                let outcome = rebalancer.run_once().await?;
                debug!(?outcome, "Rebalance check");
                Ok(())
            }
        });

        let manager = self.position_manager.clone();
        scheduler.every("order_monitor", schedule.order_monitor_interval, move || {
            let manager = manager.clone();
            async move {
                manager.track_orders().await?;
                Ok(())
            }
        });

        if let Some(exchange) = self.user_stream.clone() {
            let manager = self.position_manager.clone();
            let event_bus = self.event_bus.clone();
            scheduler.every("account_sync", schedule.account_sync_interval, move || {
                let manager = manager.clone();
                let event_bus = event_bus.clone();
                async move {
                    if let Err(e) = manager.sync_account().await {
                        event_bus.send(DaemonEvent::gateway_error("account_sync", e.to_string()));
                        return Err(e);
                    }
                    Ok(())
                }
            });

            scheduler.every("listen_key_renewal", schedule.listen_key_interval, move || {
                let exchange = exchange.clone();
                async move {
                    exchange
                        .client()
                        .keepalive_listen_key()
                        .await
                        .map_err(|e| DaemonError::Exec(ExecError::from(e)))?;
                    debug!("Listen key renewed");
                    Ok(())
                }
            });
        }

        scheduler
    }

    /// Graceful shutdown.
    async fn shutdown(&self) -> DaemonResult<()> {
        info!("Initiating graceful shutdown");

        if let Some(exchange) = &self.user_stream {
            if let Err(e) = exchange.client().close_listen_key().await {
                warn!(error = %e, "Failed to close listen key");
            }
        }

        // Positions stay open; they are restored on the next start
        let portfolio = self.position_manager.portfolio().await?;
        info!(
            open_positions = portfolio.open_positions,
            equity = %portfolio.total_equity,
            "Shutdown complete"
        );

        Ok(())
    }
}

/// Keep a user-data stream connected, replacing the listen key when it expires.
async fn run_user_stream(
    exchange: Arc<BinanceExchange>,
    testnet: bool,
    sender: broadcast::Sender<StreamEvent>,
    expired: Arc<tokio::sync::Notify>,
    event_bus: Arc<EventBus>,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        let listen_key = match exchange.client().create_listen_key().await {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Failed to create listen key");
                event_bus.send(DaemonEvent::gateway_error("user_stream", e.to_string()));
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => continue,
                }
            },
        };

        info!("Starting user-data stream");
        let client = BinanceStreamClient::user_data(&listen_key, testnet, sender.clone());
        let session = cancel.child_token();
        tokio::select! {
            _ = client.run(session.clone()) => {},
            _ = expired.notified() => {
                info!("Reconnecting user-data stream with a new listen key");
                session.cancel();
            },
        }
    }
}

/// Log one bus event at a level matching its weight.
fn log_event(event: &DaemonEvent) {
    match event {
        DaemonEvent::PriceUpdate(_) | DaemonEvent::BookTicker(_) | DaemonEvent::MarkPrice(_) => {},
        DaemonEvent::GatewayError { source, message, .. } => {
            warn!(%source, %message, "Gateway error");
        },
        other => debug!(event_type = other.event_type(), "Event"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position_manager::OpenPositionRequest;
    use qbtc_domain::Side;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[tokio::test]
    async fn test_daemon_stub_creation() {
        let daemon = Daemon::new_stub(Config::test()).unwrap();

        let portfolio = daemon.position_manager().portfolio().await.unwrap();
        assert_eq!(portfolio.open_positions, 0);
        assert_eq!(portfolio.total_equity, dec!(100000));
    }

    #[tokio::test]
    async fn test_daemon_api_server_start() {
        let daemon = Daemon::new_stub(Config::test()).unwrap();
        let cancel = CancellationToken::new();

        let (addr, server) = daemon.start_api_server(cancel.clone()).await.unwrap();

        // Server should be running on a port
        assert!(addr.port() > 0);

        let client = reqwest::Client::new();
        let response = client.get(format!("http://{}/health", addr)).send().await.unwrap();
        assert!(response.status().is_success());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server drains after cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn test_daemon_restore_empty() {
        let daemon = Daemon::new_stub(Config::test()).unwrap();

        // Should not fail with empty store
        daemon.restore_positions().await.unwrap();
    }

    #[tokio::test]
    async fn test_stub_daemon_has_no_live_jobs() {
        let daemon = Daemon::new_stub(Config::test()).unwrap();

        let scheduler = daemon.build_scheduler();

        assert_eq!(
            scheduler.job_names(),
            vec!["position_monitor", "risk_monitor", "rebalancer", "order_monitor"]
        );
        assert!(daemon.start_streams(CancellationToken::new()).is_empty());
    }

    #[tokio::test]
    async fn test_restore_sees_positions_opened_before_restart() {
        let exchange = Arc::new(StubExchange::new(dec!(50000)));
        let store = Arc::new(MemoryStore::new());

        let first = Daemon::new(Config::test(), exchange.clone(), store.clone(), None).unwrap();
        let request = OpenPositionRequest {
            size: Some(dec!(1)),
            ..OpenPositionRequest::new("BTCUSDT", Side::Long)
        };
        let opened = first.position_manager().open_position(request).await.unwrap();
        drop(first);

        let second = Daemon::new(Config::test(), exchange, store, None).unwrap();
        second.restore_positions().await.unwrap();

        let open = second.position_manager().open_positions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, opened.id);
        let portfolio = second.position_manager().portfolio().await.unwrap();
        assert_eq!(portfolio.used_margin, dec!(5000));
    }
}
