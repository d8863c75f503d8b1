//! Order executor: the single path from the daemon to the exchange.
//!
//! The executor owns everything that must happen around an exchange call:
//! trading switches, retries for transient failures, the execution record,
//! the `order_executed` event and execution metrics.
//!
//! # Flow
//!
//! ```text
//! OrderRequest → switches → Exchange (retry 1s/3s/5s) → ExecutionRecord → Store
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use qbtc_domain::{Event, ExecutionRecord, OrderRequest, OrderStatus, PositionId, Price, Symbol};
use qbtc_store::Store;

use crate::error::{ExecError, ExecResult};
use crate::ports::{ExchangePort, OrderResult};

// =============================================================================
// Retry policy
// =============================================================================

/// Delays between attempts; one retry per entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before retry n
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: vec![Duration::from_secs(1), Duration::from_secs(3), Duration::from_secs(5)],
        }
    }
}

impl RetryPolicy {
    /// No retries
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }
}

// =============================================================================
// Trading switches and metrics
// =============================================================================

/// Current trading switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingState {
    /// New exposure allowed
    pub trading_enabled: bool,
    /// Emergency mode (only reduce-only orders pass)
    pub emergency: bool,
}

/// Execution counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Orders submitted (successful + failed)
    pub total_orders: u64,
    /// Orders accepted by the exchange
    pub successful_orders: u64,
    /// Orders that ended in an error
    pub failed_orders: u64,
    /// Orders cancelled through the executor
    pub cancelled_orders: u64,
    /// Traded value in quote currency
    pub total_volume: Decimal,
    /// Mean exchange latency of successful orders
    pub average_latency_ms: u64,
}

#[derive(Debug, Default)]
struct MetricsInner {
    metrics: ExecutionMetrics,
    latency_sum_ms: u64,
}

// =============================================================================
// Executor
// =============================================================================

/// Places orders with retries and records every execution.
pub struct OrderExecutor<E: ExchangePort + ?Sized, S: Store + ?Sized> {
    /// Exchange port for placing orders
    exchange: Arc<E>,
    /// Store for execution records and events
    store: Arc<S>,
    retry: RetryPolicy,
    trading_enabled: AtomicBool,
    emergency: AtomicBool,
    metrics: Mutex<MetricsInner>,
}

impl<E: ExchangePort + ?Sized, S: Store + ?Sized> OrderExecutor<E, S> {
    /// Create a new executor with trading enabled.
    pub fn new(exchange: Arc<E>, store: Arc<S>) -> Self {
        Self {
            exchange,
            store,
            retry: RetryPolicy::default(),
            trading_enabled: AtomicBool::new(true),
            emergency: AtomicBool::new(false),
            metrics: Mutex::new(MetricsInner::default()),
        }
    }

    /// Use a specific retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Exchange port.
    pub fn exchange(&self) -> &Arc<E> {
        &self.exchange
    }

    /// Store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // =========================================================================
    // Switches
    // =========================================================================

    /// Current switches.
    pub fn trading_state(&self) -> TradingState {
        TradingState {
            trading_enabled: self.trading_enabled.load(Ordering::SeqCst),
            emergency: self.emergency.load(Ordering::SeqCst),
        }
    }

    /// Turn new exposure on or off.
    pub fn set_trading_enabled(&self, enabled: bool) {
        self.trading_enabled.store(enabled, Ordering::SeqCst);
        info!(enabled, "Trading switch changed");
    }

    /// Enter emergency mode; returns false if it was already active.
    pub fn enter_emergency(&self, reason: &str) -> bool {
        let was = self.emergency.swap(true, Ordering::SeqCst);
        self.trading_enabled.store(false, Ordering::SeqCst);
        if !was {
            warn!(%reason, "Emergency mode activated, trading disabled");
        }
        !was
    }

    /// Leave emergency mode and re-enable trading.
    pub fn clear_emergency(&self) {
        self.emergency.store(false, Ordering::SeqCst);
        self.trading_enabled.store(true, Ordering::SeqCst);
        info!("Emergency mode cleared");
    }

    /// Reject orders that add exposure while trading is off.
    pub fn check_allowed(&self, request: &OrderRequest) -> ExecResult<()> {
        if request.reduce_only {
            return Ok(());
        }
        let state = self.trading_state();
        if state.emergency {
            return Err(ExecError::TradingDisabled("emergency mode active".to_string()));
        }
        if !state.trading_enabled {
            return Err(ExecError::TradingDisabled("trading disabled".to_string()));
        }
        Ok(())
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Place an order and record the execution.
    ///
    /// `expected_price` is the price the caller based its decision on; the
    /// record's slippage is measured against it.
    pub async fn execute(
        &self,
        request: OrderRequest,
        expected_price: Option<Price>,
        position_id: Option<PositionId>,
    ) -> ExecResult<ExecutionRecord> {
        request.validate()?;
        self.check_allowed(&request)?;

        info!(
            symbol = %request.symbol,
            side = %request.side,
            quantity = %request.quantity,
            reduce_only = request.reduce_only,
            client_order_id = %request.client_order_id,
            "Placing order"
        );

        let started = Instant::now();
        let result = match self.place_with_retry(&request).await {
            Ok(result) => result,
            Err(e) => {
                error!(symbol = %request.symbol, error = %e, "Order failed");
                self.record_failure();
                return Err(e);
            },
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut record = ExecutionRecord::new(
            request,
            result.exchange_order_id,
            result.status,
            expected_price,
            result.fill_price,
            result.filled_quantity,
            result.fee,
            result.fee_asset,
            result.filled_at,
        );
        record.latency_ms = latency_ms;
        if let Some(id) = position_id {
            record = record.for_position(id);
        }

        self.store.orders().save(&record).await?;
        if record.status == OrderStatus::Filled || record.status == OrderStatus::PartiallyFilled {
            self.store
                .events()
                .append(&Event::OrderExecuted {
                    order_id: record.id,
                    position_id: record.position_id,
                    exchange_order_id: record.exchange_order_id.clone(),
                    symbol: record.request.symbol.clone(),
                    side: record.request.side,
                    quantity: record.executed_quantity,
                    executed_price: record.executed_price,
                    slippage: record.slippage,
                    fees: record.fees,
                    timestamp: record.executed_at,
                })
                .await?;
        }
        self.record_success(record.notional(), latency_ms);

        info!(
            exchange_order_id = %record.exchange_order_id,
            status = ?record.status,
            executed_price = %record.executed_price,
            slippage = %record.slippage,
            latency_ms,
            "Order executed"
        );
        Ok(record)
    }

    async fn place_with_retry(&self, request: &OrderRequest) -> ExecResult<OrderResult> {
        let mut attempt = 0;
        loop {
            match self.exchange.place_order(request).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.retry.delays.len() => {
                    let delay = self.retry.delays[attempt];
                    attempt += 1;
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Order attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Cancel an open order.
    pub async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> ExecResult<()> {
        self.exchange.cancel_order(symbol, order_id).await?;
        self.lock_metrics().metrics.cancelled_orders += 1;
        self.store
            .events()
            .append(&Event::OrderCancelled {
                symbol: symbol.clone(),
                exchange_order_id: order_id.to_string(),
                timestamp: chrono::Utc::now(),
            })
            .await?;
        info!(%symbol, order_id, "Order cancelled");
        Ok(())
    }

    /// Poll the exchange for an order that can still fill and persist any
    /// change. Returns `None` when the exchange reports nothing new.
    ///
    /// Newly filled quantity is appended as `order_executed`.
    pub async fn refresh_order(
        &self,
        record: &ExecutionRecord,
    ) -> ExecResult<Option<ExecutionRecord>> {
        let report =
            self.exchange.get_order(&record.request.symbol, &record.exchange_order_id).await?;

        let mut updated = record.clone();
        let filled_before = updated.executed_quantity;
        if !updated.apply_update(
            report.status,
            report.fill_price,
            report.filled_quantity,
            report.fee,
            report.filled_at,
        ) {
            return Ok(None);
        }
        self.store.orders().save(&updated).await?;

        let newly_filled = updated.executed_quantity - filled_before;
        if newly_filled > Decimal::ZERO {
            self.store
                .events()
                .append(&Event::OrderExecuted {
                    order_id: updated.id,
                    position_id: updated.position_id,
                    exchange_order_id: updated.exchange_order_id.clone(),
                    symbol: updated.request.symbol.clone(),
                    side: updated.request.side,
                    quantity: newly_filled,
                    executed_price: updated.executed_price,
                    slippage: updated.slippage,
                    fees: updated.fees,
                    timestamp: updated.executed_at,
                })
                .await?;
            self.lock_metrics().metrics.total_volume +=
                updated.executed_price.as_decimal().saturating_mul(newly_filled);
        }

        info!(
            exchange_order_id = %updated.exchange_order_id,
            previous = ?record.status,
            status = ?updated.status,
            executed_quantity = %updated.executed_quantity,
            "Order status updated"
        );
        Ok(Some(updated))
    }

    /// Execution counters snapshot.
    pub fn metrics(&self) -> ExecutionMetrics {
        self.lock_metrics().metrics.clone()
    }

    fn lock_metrics(&self) -> std::sync::MutexGuard<'_, MetricsInner> {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_failure(&self) {
        let mut inner = self.lock_metrics();
        inner.metrics.total_orders += 1;
        inner.metrics.failed_orders += 1;
    }

    fn record_success(&self, volume: Decimal, latency_ms: u64) {
        let mut inner = self.lock_metrics();
        inner.metrics.total_orders += 1;
        inner.metrics.successful_orders += 1;
        inner.metrics.total_volume += volume;
        inner.latency_sum_ms += latency_ms;
        inner.metrics.average_latency_ms =
            inner.latency_sum_ms / inner.metrics.successful_orders;
    }
}

// =============================================================================
// Tests
// =============================================================================
