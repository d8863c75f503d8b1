//! Portfolio rebalancer service.
//!
//! Plans with the pure `plan_rebalance` and hands each trade to the position
//! manager. The gating state (cooldown, daily count) lives here and is only
//! advanced when at least one trade went through.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use qbtc_domain::Event;
use qbtc_engine::{plan_rebalance, RebalancePlan, RebalanceState, RebalancerConfig};
use qbtc_exec::ExchangePort;
use qbtc_store::Store;

use crate::error::DaemonResult;
use crate::event_bus::{DaemonEvent, EventBus};
use crate::position_manager::PositionManager;

/// Result of one rebalance round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RebalanceOutcome {
    /// Allocation within threshold, or nothing tradable
    NoAction,
    /// Deviation found but cooldown or daily cap refused
    Skipped {
        /// Why
        reason: String,
    },
    /// Trades were attempted
    Executed {
        /// Trades that filled
        trades: usize,
        /// Trades that failed
        failed: usize,
        /// Traded value of the filled trades
        total_value: Decimal,
    },
}

/// Periodic tier rebalancing.
pub struct PortfolioRebalancer<E: ExchangePort + ?Sized, S: Store + ?Sized> {
    manager: Arc<PositionManager<E, S>>,
    config: RebalancerConfig,
    state: Mutex<RebalanceState>,
    event_bus: Arc<EventBus>,
}

impl<E: ExchangePort + ?Sized, S: Store + ?Sized> PortfolioRebalancer<E, S> {
    /// Create a rebalancer with empty gating state.
    pub fn new(
        manager: Arc<PositionManager<E, S>>,
        config: RebalancerConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self { manager, config, state: Mutex::new(RebalanceState::default()), event_bus }
    }

    /// Gating state snapshot
    pub async fn state(&self) -> RebalanceState {
        self.state.lock().await.clone()
    }

    /// Plan and execute one round.
    pub async fn run_once(&self) -> DaemonResult<RebalanceOutcome> {
        let mut state = self.state.lock().await;
        let now = self.manager.clock().now();
        let (portfolio, positions) = self.manager.snapshot().await?;

        let trades = match plan_rebalance(&portfolio, &positions, &self.config, &state, now) {
            RebalancePlan::NoAction => {
                debug!("Allocation within threshold");
                return Ok(RebalanceOutcome::NoAction);
            },
            RebalancePlan::Skipped(reason) => {
                info!(%reason, "Rebalance skipped");
                return Ok(RebalanceOutcome::Skipped { reason });
            },
            RebalancePlan::Trades(trades) => trades,
        };

        info!(planned = trades.len(), "Rebalancing");
        let mut executed = 0;
        let mut failed = 0;
        let mut total_value = Decimal::ZERO;

        for trade in &trades {
            match self.manager.apply_rebalance_trade(trade).await {
                Ok(record) => {
                    executed += 1;
                    total_value += record.notional();
                    info!(
                        position_id = %trade.position_id,
                        symbol = %trade.symbol,
                        tier = %trade.tier,
                        direction = ?trade.direction,
                        quantity = %trade.quantity,
                        current = %trade.current_fraction,
                        target = %trade.target_fraction,
                        "Rebalance trade executed"
                    );
                },
                Err(e) => {
                    failed += 1;
                    warn!(
                        position_id = %trade.position_id,
                        symbol = %trade.symbol,
                        error = %e,
                        "Rebalance trade failed"
                    );
                },
            }
        }

        if executed > 0 {
            let finished = self.manager.clock().now();
            state.record(finished);
            self.manager
                .store()
                .events()
                .append(&Event::RebalanceExecuted {
                    trades: executed,
                    total_value,
                    timestamp: finished,
                })
                .await?;
            self.event_bus.send(DaemonEvent::RebalanceExecuted {
                trades: executed,
                total_value,
                timestamp: finished,
            });
        }

        Ok(RebalanceOutcome::Executed { trades: executed, failed, total_value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::PriceCache;
    use crate::position_manager::OpenPositionRequest;
    use chrono::TimeZone;
    use qbtc_domain::{ManualClock, Side};
    use qbtc_engine::{Engine, RiskLimits};
    use qbtc_exec::{OrderExecutor, StubExchange};
    use qbtc_store::MemoryStore;
    use rust_decimal_macros::dec;

    struct Fixture {
        rebalancer: PortfolioRebalancer<StubExchange, MemoryStore>,
        manager: Arc<PositionManager<StubExchange, MemoryStore>>,
        clock: ManualClock,
        bus: Arc<EventBus>,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(chrono::Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
        let exchange = Arc::new(StubExchange::new(dec!(50000)));
        exchange.set_price("SOLUSDT", dec!(100));
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new(100));
        let manager = Arc::new(
            PositionManager::new(
                Engine::new(RiskLimits::default()),
                Arc::new(OrderExecutor::new(exchange.clone(), store)),
                Arc::new(PriceCache::new(exchange)),
                bus.clone(),
                dec!(100000),
            )
            .with_clock(Arc::new(clock.clone())),
        );
        let rebalancer =
            PortfolioRebalancer::new(manager.clone(), RebalancerConfig::default(), bus.clone());
        Fixture { rebalancer, manager, clock, bus }
    }

    fn open(symbol: &str, size: Decimal) -> OpenPositionRequest {
        OpenPositionRequest {
            size: Some(size),
            trailing_pct: Some(Decimal::ZERO),
            ..OpenPositionRequest::new(symbol, Side::Long)
        }
    }

    #[tokio::test]
    async fn test_no_positions_no_action() {
        let f = fixture();
        assert_eq!(f.rebalancer.run_once().await.unwrap(), RebalanceOutcome::NoAction);
    }

    #[tokio::test]
    async fn test_overweight_tier_reduced_and_underweight_added() {
        let f = fixture();
        let mut events = f.bus.subscribe();
        let btc = f.manager.open_position(open("BTCUSDT", dec!(1))).await.unwrap();
        let sol = f.manager.open_position(open("SOLUSDT", dec!(10))).await.unwrap();

        let outcome = f.rebalancer.run_once().await.unwrap();

        let RebalanceOutcome::Executed { trades, failed, total_value } = outcome else {
            panic!("expected trades, got {:?}", outcome);
        };
        assert_eq!((trades, failed), (2, 0));
        assert!(total_value > Decimal::ZERO);

        let btc = f.manager.find_position(btc.id).await.unwrap();
        let sol = f.manager.find_position(sol.id).await.unwrap();
        assert!(btc.size.as_decimal() < dec!(1));
        assert!(sol.size.as_decimal() > dec!(10));

        let state = f.rebalancer.state().await;
        assert_eq!(state.count_today, 1);

        let mut saw_rebalance = false;
        while let Some(Ok(event)) = events.try_recv() {
            saw_rebalance |= event.event_type() == "rebalance_executed";
        }
        assert!(saw_rebalance);
    }

    #[tokio::test]
    async fn test_cooldown_skips_second_round() {
        let f = fixture();
        f.manager.open_position(open("BTCUSDT", dec!(1))).await.unwrap();
        f.manager.open_position(open("SOLUSDT", dec!(10))).await.unwrap();
        f.rebalancer.run_once().await.unwrap();

        f.clock.advance(chrono::Duration::minutes(5));
        let outcome = f.rebalancer.run_once().await.unwrap();

        assert!(matches!(outcome, RebalanceOutcome::Skipped { .. }));
    }
}
