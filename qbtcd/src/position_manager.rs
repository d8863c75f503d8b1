//! Position Manager: owns the position lifecycle.
//!
//! The Position Manager is responsible for:
//! - Opening positions (tier lookup, sizing, risk validation, entry order)
//! - Running the monitoring tick (price refresh, trailing stop, exit triggers)
//! - Closing positions (manual, triggered, forced) exactly once
//! - Applying rebalance trades to managed positions
//! - Keeping the ledger (balance and peak equity) the portfolio is derived from
//!
//! # Architecture
//!
//! ```text
//! API / Scheduler → PositionManager → Engine (pure decisions)
//!                        ↓
//!                  OrderExecutor → Exchange
//!                        ↓
//!                  Store + EventBus
//! ```
//!
//! Every mutation runs under the ledger lock, so a risk check and the open it
//! guards can not interleave with a close or another open.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use qbtc_domain::{
    Clock, CloseReason, Event, ExecutionRecord, Leverage, OrderRequest, PortfolioState, Position,
    PositionId, Price, Quantity, Side, SignalStrength, Symbol, SystemClock, TierTable,
};
use qbtc_engine::{
    validate_increase, validate_open, Engine, EngineAction, RebalanceDirection, RebalanceTrade,
    SizingPolicy,
};
use qbtc_exec::{ConstantSignal, ExchangePort, MarketDataPort, OrderExecutor, SignalSource};
use qbtc_store::Store;

use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::{DaemonEvent, EventBus};
use crate::metrics::DaemonMetrics;

/// Leverage used when a size is given without one
const DEFAULT_LEVERAGE: u8 = 10;

// =============================================================================
// Requests and summaries
// =============================================================================

/// Request to open a position.
///
/// Either `size` is given (explicit sizing, `leverage` defaults to 10x) or the
/// position is sized from signal strength, which then also picks leverage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPositionRequest {
    /// Trading pair, e.g. `BTCUSDT`
    pub symbol: String,
    /// LONG or SHORT
    pub side: Side,
    /// Base quantity
    #[serde(default)]
    pub size: Option<Decimal>,
    /// Leverage for an explicit size
    #[serde(default)]
    pub leverage: Option<u8>,
    /// Fixed stop-loss level
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    /// Take-profit level
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    /// Trailing distance as a fraction of entry; 0 disables trailing
    #[serde(default)]
    pub trailing_pct: Option<Decimal>,
    /// Overrides the signal source when sizing from strength
    #[serde(default)]
    pub signal_strength: Option<Decimal>,
}

impl OpenPositionRequest {
    /// Request with every optional field unset
    pub fn new(symbol: impl Into<String>, side: Side) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            size: None,
            leverage: None,
            stop_loss: None,
            take_profit: None,
            trailing_pct: None,
            signal_strength: None,
        }
    }
}

/// What one monitoring tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// Positions evaluated
    pub evaluated: usize,
    /// Trailing stops moved
    pub ratcheted: usize,
    /// Positions closed
    pub closed: usize,
    /// Positions skipped because of an error
    pub failed: usize,
}

struct Ledger {
    /// Initial equity plus realized PnL (or the exchange wallet when live)
    balance: Decimal,
    /// Highest total equity seen
    peak_equity: Decimal,
}

// =============================================================================
// Position Manager
// =============================================================================

/// Manages the position lifecycle.
pub struct PositionManager<E: ExchangePort + ?Sized, S: Store + ?Sized> {
    engine: Engine,
    executor: Arc<OrderExecutor<E, S>>,
    market_data: Arc<dyn MarketDataPort>,
    signal: Arc<dyn SignalSource>,
    clock: Arc<dyn Clock>,
    tiers: TierTable,
    sizing: SizingPolicy,
    default_trailing_pct: Decimal,
    event_bus: Arc<EventBus>,
    metrics: Option<Arc<DaemonMetrics>>,
    adopt_exchange_balance: bool,
    ledger: Mutex<Ledger>,
}

impl<E: ExchangePort + ?Sized, S: Store + ?Sized> PositionManager<E, S> {
    /// Create a position manager with `initial_equity` as the ledger balance.
    pub fn new(
        engine: Engine,
        executor: Arc<OrderExecutor<E, S>>,
        market_data: Arc<dyn MarketDataPort>,
        event_bus: Arc<EventBus>,
        initial_equity: Decimal,
    ) -> Self {
        Self {
            engine,
            executor,
            market_data,
            signal: Arc::new(ConstantSignal::default()),
            clock: Arc::new(SystemClock),
            tiers: TierTable::default(),
            sizing: SizingPolicy::default(),
            default_trailing_pct: dec!(0.02),
            event_bus,
            metrics: None,
            adopt_exchange_balance: false,
            ledger: Mutex::new(Ledger { balance: initial_equity, peak_equity: initial_equity }),
        }
    }

    /// Use a custom tier table
    #[must_use]
    pub fn with_tier_table(mut self, tiers: TierTable) -> Self {
        self.tiers = tiers;
        self
    }

    /// Use a custom sizing policy
    #[must_use]
    pub fn with_sizing_policy(mut self, sizing: SizingPolicy) -> Self {
        self.sizing = sizing;
        self
    }

    /// Use a signal source for strength-based sizing
    #[must_use]
    pub fn with_signal_source(mut self, signal: Arc<dyn SignalSource>) -> Self {
        self.signal = signal;
        self
    }

    /// Use a specific clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Trailing distance applied when a request does not set one
    #[must_use]
    pub fn with_default_trailing_pct(mut self, pct: Decimal) -> Self {
        self.default_trailing_pct = pct;
        self
    }

    /// Report into the metrics registry
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<DaemonMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replace the ledger balance with the exchange wallet on `sync_account`
    #[must_use]
    pub fn with_exchange_balance(mut self, adopt: bool) -> Self {
        self.adopt_exchange_balance = adopt;
        self
    }

    /// Order executor
    pub fn executor(&self) -> &Arc<OrderExecutor<E, S>> {
        &self.executor
    }

    /// Store
    pub fn store(&self) -> &Arc<S> {
        self.executor.store()
    }

    /// Clock
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Tier table
    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    // =========================================================================
    // Open
    // =========================================================================

    /// Open a position.
    ///
    /// Nothing is persisted and no order is placed unless every check passes.
    ///
    /// # Errors
    /// - `Domain` for an unknown symbol or a malformed value
    /// - `InvalidRequest` for stops on the wrong side of the price
    /// - `Risk` when a risk check refuses the exposure
    /// - `Exec` when the entry order fails
    pub async fn open_position(&self, request: OpenPositionRequest) -> DaemonResult<Position> {
        let symbol = Symbol::from_pair(&request.symbol)?;
        let tier = self.tiers.tier_of(&symbol)?;
        let trailing_pct = request.trailing_pct.unwrap_or(self.default_trailing_pct);
        if trailing_pct < Decimal::ZERO || trailing_pct >= Decimal::ONE {
            return Err(DaemonError::InvalidRequest(format!(
                "trailing_pct must be in [0, 1), got {}",
                trailing_pct
            )));
        }

        let mut ledger = self.ledger.lock().await;

        let price = self.market_data.get_price(&symbol).await?;
        let open = self.store().positions().find_open().await?;
        let portfolio = PortfolioState::compute(ledger.balance, &open, &self.tiers);

        let (quantity, leverage, strength) = match request.size {
            Some(size) => {
                let leverage = Leverage::new(request.leverage.unwrap_or(DEFAULT_LEVERAGE))?;
                (Quantity::new(size)?, leverage, None)
            },
            None => {
                let strength = match request.signal_strength {
                    Some(s) => SignalStrength::new(s)?,
                    None => self.signal.strength(&symbol),
                };
                let sized =
                    self.sizing.size_position(strength, portfolio.total_equity, price)?;
                (sized.quantity, sized.leverage, Some(strength))
            },
        };

        let stop_loss = request.stop_loss.map(Price::new).transpose()?;
        let take_profit = request.take_profit.map(Price::new).transpose()?;
        check_exit_levels(request.side, price, stop_loss, take_profit)?;

        let required = Position::margin_for(quantity, price, leverage);
        if let Err(rejection) =
            validate_open(&portfolio, tier, required, leverage, self.engine.limits())
        {
            warn!(
                symbol = %symbol,
                %tier,
                %required,
                reason = %rejection,
                "Open rejected by risk checks"
            );
            return Err(rejection.into());
        }

        let order = OrderRequest::market(symbol.clone(), request.side.entry_action(), quantity);
        let record = self.executor.execute(order, Some(price), None).await?;
        let filled = filled_quantity(&record)?;

        let now = self.clock.now();
        let mut position = Position::open(
            symbol.clone(),
            request.side,
            tier,
            filled,
            leverage,
            record.executed_price,
            record.fees,
            now,
        );
        if let Some(stop) = stop_loss {
            position = position.with_stop_loss(stop);
        }
        if let Some(target) = take_profit {
            position = position.with_take_profit(target);
        }
        if trailing_pct > Decimal::ZERO {
            let distance = record.executed_price.as_decimal() * trailing_pct;
            position = position.with_trailing_stop(distance);
        }
        if let Some(strength) = strength {
            position = position.with_signal_strength(strength);
        }

        self.store().positions().insert_open(&position).await?;
        let record = record.for_position(position.id);
        self.store().orders().save(&record).await?;
        self.store()
            .events()
            .append(&Event::PositionOpened {
                position_id: position.id,
                symbol: symbol.clone(),
                side: position.side,
                tier,
                size: position.size,
                leverage,
                entry_price: position.entry_price,
                initial_margin: position.initial_margin,
                timestamp: now,
            })
            .await?;

        info!(
            position_id = %position.id,
            symbol = %symbol,
            side = %position.side,
            size = %position.size,
            %leverage,
            entry_price = %position.entry_price,
            initial_margin = %position.initial_margin,
            "Position opened"
        );

        self.event_bus.send(DaemonEvent::OrderExecuted(record));
        self.event_bus.send(DaemonEvent::PositionOpened(position.clone()));
        if let Some(metrics) = &self.metrics {
            metrics.position_opened();
        }
        self.refresh_portfolio(&mut ledger).await?;

        Ok(position)
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Close an open position at market.
    ///
    /// # Errors
    /// `PositionNotFound` if the id is not open, including a second close of
    /// the same position.
    pub async fn close_position(
        &self,
        position_id: PositionId,
        reason: CloseReason,
    ) -> DaemonResult<Position> {
        let mut ledger = self.ledger.lock().await;
        let position = self
            .store()
            .positions()
            .find_open_by_id(position_id)
            .await?
            .ok_or(DaemonError::PositionNotFound(position_id))?;

        let (closed, _) = self.close_locked(&mut ledger, position, reason, None).await?;
        self.refresh_portfolio(&mut ledger).await?;
        Ok(closed)
    }

    /// Close every open position, returning the ids closed.
    ///
    /// A position whose exit fails stays open and is retried by the next call.
    pub async fn close_all(&self, reason: CloseReason) -> DaemonResult<Vec<PositionId>> {
        let mut ledger = self.ledger.lock().await;
        let open = self.store().positions().find_open().await?;
        let mut closed = Vec::with_capacity(open.len());

        for position in open {
            let id = position.id;
            match self.close_locked(&mut ledger, position, reason, None).await {
                Ok(_) => closed.push(id),
                Err(e) => warn!(position_id = %id, error = %e, "Forced close failed"),
            }
        }

        self.refresh_portfolio(&mut ledger).await?;
        Ok(closed)
    }

    /// Exit order, final PnL, archive, events.
    ///
    /// `booked_price` is the level PnL is booked at; `None` books the fill.
    async fn close_locked(
        &self,
        ledger: &mut MutexGuard<'_, Ledger>,
        mut position: Position,
        reason: CloseReason,
        booked_price: Option<Price>,
    ) -> DaemonResult<(Position, ExecutionRecord)> {
        let expected = booked_price.unwrap_or(position.current_price);
        let order = OrderRequest::market(
            position.symbol.clone(),
            position.side.exit_action(),
            position.size,
        )
        .reduce_only();
        let record = self.executor.execute(order, Some(expected), Some(position.id)).await?;
        let exit_price = booked_price.unwrap_or(record.executed_price);

        if record.executed_quantity < position.size.as_decimal() {
            return Err(self.keep_unfilled_remainder(ledger, position, &record, exit_price).await?);
        }

        let realized_before = position.realized_pnl;
        position.close(exit_price, record.fees, reason, self.clock.now())?;
        self.store().positions().archive(&position).await?;

        ledger.balance += position.realized_pnl - realized_before;

        self.store()
            .events()
            .append(&Event::PositionClosed {
                position_id: position.id,
                reason,
                entry_price: position.entry_price,
                exit_price,
                realized_pnl: position.realized_pnl,
                total_fees: position.fees_paid,
                timestamp: self.clock.now(),
            })
            .await?;

        info!(
            position_id = %position.id,
            symbol = %position.symbol,
            %reason,
            %exit_price,
            fill_price = %record.executed_price,
            realized_pnl = %position.realized_pnl,
            "Position closed"
        );

        self.event_bus.send(DaemonEvent::OrderExecuted(record.clone()));
        self.event_bus.send(DaemonEvent::PositionClosed(position.clone()));
        if let Some(metrics) = &self.metrics {
            metrics.position_closed(reason);
        }

        Ok((position, record))
    }

    /// An exit that filled short of the position size: book the filled part,
    /// keep the rest open for the next attempt, and report it.
    async fn keep_unfilled_remainder(
        &self,
        ledger: &mut MutexGuard<'_, Ledger>,
        mut position: Position,
        record: &ExecutionRecord,
        exit_price: Price,
    ) -> DaemonResult<DaemonError> {
        let filled = record.executed_quantity.max(Decimal::ZERO);
        if filled > Decimal::ZERO {
            let booked = position.reduce(Quantity::new(filled)?, exit_price, record.fees)?;
            ledger.balance += booked;
            self.event_bus.send(DaemonEvent::OrderExecuted(record.clone()));
        }
        position.updated_at = self.clock.now();
        self.store().positions().update_open(&position).await?;

        warn!(
            position_id = %position.id,
            exchange_order_id = %record.exchange_order_id,
            status = ?record.status,
            %filled,
            remaining = %position.size,
            "Exit order not fully filled, remainder stays open"
        );
        Ok(DaemonError::ExitIncomplete {
            position_id: position.id,
            filled,
            remaining: position.size.as_decimal(),
        })
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    /// Evaluate every open position against its current price.
    ///
    /// A failure on one position (price unavailable, exit order refused) is
    /// logged and the tick moves on to the next one.
    pub async fn monitor_tick(&self) -> DaemonResult<TickSummary> {
        let mut ledger = self.ledger.lock().await;
        let open = self.store().positions().find_open().await?;
        let mut summary = TickSummary::default();

        for position in open {
            summary.evaluated += 1;
            match self.evaluate(&mut ledger, position, &mut summary).await {
                Ok(()) => {},
                Err(e) => {
                    summary.failed += 1;
                    warn!(error = %e, "Position evaluation failed");
                },
            }
        }

        self.refresh_portfolio(&mut ledger).await?;
        if summary.ratcheted > 0 || summary.closed > 0 || summary.failed > 0 {
            info!(?summary, "Monitoring tick");
        } else {
            debug!(evaluated = summary.evaluated, "Monitoring tick");
        }
        Ok(summary)
    }

    async fn evaluate(
        &self,
        ledger: &mut MutexGuard<'_, Ledger>,
        position: Position,
        summary: &mut TickSummary,
    ) -> DaemonResult<()> {
        let price = self.market_data.get_price(&position.symbol).await?;
        let now = self.clock.now();
        let decision = self.engine.process_tick(&position, price, now);

        for action in &decision.actions {
            if let EngineAction::RatchetStop { position_id, previous, new_stop, trigger_price } =
                action
            {
                summary.ratcheted += 1;
                self.store()
                    .events()
                    .append(&Event::StopLossRatcheted {
                        position_id: *position_id,
                        previous_stop: *previous,
                        new_stop: *new_stop,
                        trigger_price: *trigger_price,
                        timestamp: now,
                    })
                    .await?;
                self.event_bus.send(DaemonEvent::StopLossRatcheted {
                    position_id: *position_id,
                    symbol: position.symbol.clone(),
                    previous_stop: *previous,
                    new_stop: *new_stop,
                    trigger_price: *trigger_price,
                    timestamp: now,
                });
            }
        }

        match decision.close() {
            Some((reason, exit_price)) => {
                self.close_locked(ledger, decision.updated_position, reason, Some(exit_price))
                    .await?;
                summary.closed += 1;
            },
            None => {
                self.store().positions().update_open(&decision.updated_position).await?;
            },
        }
        Ok(())
    }

    // =========================================================================
    // Rebalance trades
    // =========================================================================

    /// Execute one rebalance trade and resize the targeted position.
    ///
    /// A reduction covering the whole position closes it (`MANUAL`); a
    /// partial reduction books proportional PnL; an addition averages the
    /// entry and must pass the tier and margin checks.
    pub async fn apply_rebalance_trade(
        &self,
        trade: &RebalanceTrade,
    ) -> DaemonResult<ExecutionRecord> {
        let mut ledger = self.ledger.lock().await;
        let mut position = self
            .store()
            .positions()
            .find_open_by_id(trade.position_id)
            .await?
            .ok_or(DaemonError::PositionNotFound(trade.position_id))?;

        let record = match trade.direction {
            RebalanceDirection::Reduce if trade.quantity >= position.size => {
                let (_, record) =
                    self.close_locked(&mut ledger, position, CloseReason::Manual, None).await?;
                record
            },
            RebalanceDirection::Reduce => {
                let price = self.market_data.get_price(&position.symbol).await?;
                let order = OrderRequest::market(
                    position.symbol.clone(),
                    position.side.exit_action(),
                    trade.quantity,
                )
                .reduce_only();
                let record = self.executor.execute(order, Some(price), Some(position.id)).await?;
                let filled = filled_quantity(&record)?;
                let booked = position.reduce(filled, record.executed_price, record.fees)?;
                position.updated_at = self.clock.now();
                self.store().positions().update_open(&position).await?;
                ledger.balance += booked;
                info!(
                    position_id = %position.id,
                    quantity = %filled,
                    %booked,
                    "Position reduced by rebalance"
                );
                self.event_bus.send(DaemonEvent::OrderExecuted(record.clone()));
                record
            },
            RebalanceDirection::Add => {
                let price = self.market_data.get_price(&position.symbol).await?;
                let open = self.store().positions().find_open().await?;
                let portfolio = PortfolioState::compute(ledger.balance, &open, &self.tiers);
                let required = Position::margin_for(trade.quantity, price, position.leverage);
                validate_increase(&portfolio, position.tier, required)?;

                let order = OrderRequest::market(
                    position.symbol.clone(),
                    position.side.entry_action(),
                    trade.quantity,
                );
                let record = self.executor.execute(order, Some(price), Some(position.id)).await?;
                let filled = filled_quantity(&record)?;
                position.increase(filled, record.executed_price, record.fees)?;
                position.updated_at = self.clock.now();
                self.store().positions().update_open(&position).await?;
                info!(
                    position_id = %position.id,
                    quantity = %filled,
                    entry_price = %position.entry_price,
                    "Position increased by rebalance"
                );
                self.event_bus.send(DaemonEvent::OrderExecuted(record.clone()));
                record
            },
        };

        self.refresh_portfolio(&mut ledger).await?;
        Ok(record)
    }

    // =========================================================================
    // Unmanaged orders
    // =========================================================================

    /// Place an order that is not tied to a managed position.
    pub async fn place_order(&self, request: OrderRequest) -> DaemonResult<ExecutionRecord> {
        let expected = match request.price {
            Some(price) => Some(price),
            None => self.market_data.get_price(&request.symbol).await.ok(),
        };
        let record = self.executor.execute(request, expected, None).await?;
        self.event_bus.send(DaemonEvent::OrderExecuted(record.clone()));
        Ok(record)
    }

    /// Cancel an open order on the exchange.
    pub async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> DaemonResult<()> {
        self.executor.cancel_order(symbol, order_id).await?;
        self.event_bus.send(DaemonEvent::OrderCancelled {
            symbol: symbol.clone(),
            order_id: order_id.to_string(),
            timestamp: self.clock.now(),
        });
        Ok(())
    }

    /// Most recent execution records
    pub async fn recent_orders(&self, limit: usize) -> DaemonResult<Vec<ExecutionRecord>> {
        Ok(self.store().orders().find_recent(limit).await?)
    }

    /// Poll every order that can still fill and record status changes.
    ///
    /// Returns how many records changed. An order the exchange no longer
    /// knows is logged and skipped.
    pub async fn track_orders(&self) -> DaemonResult<usize> {
        let active = self.store().orders().find_active().await?;
        let mut changed = 0;
        for record in &active {
            match self.executor.refresh_order(record).await {
                Ok(Some(updated)) => {
                    changed += 1;
                    self.event_bus.send(DaemonEvent::OrderExecuted(updated));
                },
                Ok(None) => {},
                Err(e) => warn!(
                    exchange_order_id = %record.exchange_order_id,
                    error = %e,
                    "Order status poll failed"
                ),
            }
        }
        if changed > 0 {
            debug!(active = active.len(), changed, "Order statuses refreshed");
        }
        Ok(changed)
    }

    // =========================================================================
    // Account
    // =========================================================================

    /// Pull the account from the exchange.
    ///
    /// When live, the wallet balance replaces the ledger balance. Returns the
    /// balance in use afterwards.
    pub async fn sync_account(&self) -> DaemonResult<Decimal> {
        let account = self.executor.exchange().get_account().await?;
        let mut ledger = self.ledger.lock().await;
        if self.adopt_exchange_balance {
            if ledger.balance != account.wallet_balance {
                info!(
                    previous = %ledger.balance,
                    wallet = %account.wallet_balance,
                    "Ledger balance synced from exchange"
                );
            }
            ledger.balance = account.wallet_balance;
        } else {
            debug!(wallet = %account.wallet_balance, "Account fetched (ledger kept)");
        }
        self.refresh_portfolio(&mut ledger).await?;
        Ok(ledger.balance)
    }

    /// Load the open set after a restart, returning how many positions are open.
    pub async fn restore(&self) -> DaemonResult<usize> {
        let mut ledger = self.ledger.lock().await;
        let open = self.store().positions().find_open().await?;
        for position in &open {
            info!(
                position_id = %position.id,
                symbol = %position.symbol,
                side = %position.side,
                size = %position.size,
                "Restored open position"
            );
        }
        self.refresh_portfolio(&mut ledger).await?;
        Ok(open.len())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current portfolio aggregates
    pub async fn portfolio(&self) -> DaemonResult<PortfolioState> {
        Ok(self.snapshot().await?.0)
    }

    /// Portfolio and the open positions it was derived from
    pub async fn snapshot(&self) -> DaemonResult<(PortfolioState, Vec<Position>)> {
        let ledger = self.ledger.lock().await;
        let open = self.store().positions().find_open().await?;
        let portfolio = PortfolioState::compute(ledger.balance, &open, &self.tiers);
        Ok((portfolio, open))
    }

    /// Portfolio and the equity peak used for drawdown
    pub async fn risk_snapshot(&self) -> DaemonResult<(PortfolioState, Decimal)> {
        let mut ledger = self.ledger.lock().await;
        let portfolio = self.refresh_portfolio(&mut ledger).await?;
        Ok((portfolio, ledger.peak_equity))
    }

    /// Open positions, oldest first
    pub async fn open_positions(&self) -> DaemonResult<Vec<Position>> {
        Ok(self.store().positions().find_open().await?)
    }

    /// Closed positions, most recent first
    pub async fn history(&self, limit: usize) -> DaemonResult<Vec<Position>> {
        Ok(self.store().positions().find_history(limit).await?)
    }

    /// A position by id, open or closed
    pub async fn find_position(&self, position_id: PositionId) -> DaemonResult<Position> {
        let positions = self.store().positions();
        if let Some(position) = positions.find_open_by_id(position_id).await? {
            return Ok(position);
        }
        positions
            .find_in_history(position_id)
            .await?
            .ok_or(DaemonError::PositionNotFound(position_id))
    }

    /// Recompute the portfolio, track the equity peak, refresh gauges.
    async fn refresh_portfolio(
        &self,
        ledger: &mut MutexGuard<'_, Ledger>,
    ) -> DaemonResult<PortfolioState> {
        let open = self.store().positions().find_open().await?;
        let portfolio = PortfolioState::compute(ledger.balance, &open, &self.tiers);
        if portfolio.total_equity > ledger.peak_equity {
            ledger.peak_equity = portfolio.total_equity;
        }
        if let Some(metrics) = &self.metrics {
            metrics.set_portfolio(&portfolio);
        }
        Ok(portfolio)
    }

    /// Equity peak so far
    pub async fn peak_equity(&self) -> Decimal {
        self.ledger.lock().await.peak_equity
    }

    /// Measure drawdown from the current equity from now on.
    pub async fn reset_peak_equity(&self) -> DaemonResult<Decimal> {
        let mut ledger = self.ledger.lock().await;
        let open = self.store().positions().find_open().await?;
        let portfolio = PortfolioState::compute(ledger.balance, &open, &self.tiers);
        let previous = ledger.peak_equity;
        ledger.peak_equity = portfolio.total_equity;
        info!(%previous, peak = %ledger.peak_equity, "Equity peak reset");
        Ok(ledger.peak_equity)
    }

    /// Operator clear of emergency mode.
    ///
    /// The equity peak restarts at the current equity, otherwise a drawdown
    /// that already forced a close would trip again on the next risk check.
    pub async fn clear_emergency(&self) -> DaemonResult<()> {
        self.reset_peak_equity().await?;
        self.executor.clear_emergency();
        Ok(())
    }
}

/// Quantity an order actually filled; an unfilled order is an error.
fn filled_quantity(record: &ExecutionRecord) -> DaemonResult<Quantity> {
    Quantity::new(record.executed_quantity).map_err(|_| {
        DaemonError::InvalidRequest(format!(
            "order {} not filled ({:?})",
            record.exchange_order_id, record.status
        ))
    })
}

/// Stops below and targets above the price for a LONG; mirrored for a SHORT.
fn check_exit_levels(
    side: Side,
    price: Price,
    stop_loss: Option<Price>,
    take_profit: Option<Price>,
) -> DaemonResult<()> {
    let sign = side.sign();
    let p = price.as_decimal();
    if let Some(stop) = stop_loss {
        if (p - stop.as_decimal()) * sign <= Decimal::ZERO {
            return Err(DaemonError::InvalidRequest(format!(
                "stop_loss {} is on the wrong side of price {} for {}",
                stop, price, side
            )));
        }
    }
    if let Some(target) = take_profit {
        if (target.as_decimal() - p) * sign <= Decimal::ZERO {
            return Err(DaemonError::InvalidRequest(format!(
                "take_profit {} is on the wrong side of price {} for {}",
                target, price, side
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
