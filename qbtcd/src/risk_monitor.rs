//! Account risk monitor.
//!
//! Runs `assess_account` on the current portfolio, publishes alerts once per
//! episode and carries out the account action:
//!
//! - `EnterEmergency` switches the executor to emergency mode (exits only).
//!   The monitor clears it again once the account recovers.
//! - `ForceCloseAll` enters emergency mode and closes every position with
//!   reason `LIQUIDATION`. That emergency stays until an operator clears it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use qbtc_domain::CloseReason;
use qbtc_engine::{assess_account, AccountAction, AccountAssessment, AccountRiskLimits};
use qbtc_exec::ExchangePort;
use qbtc_store::Store;

use crate::error::DaemonResult;
use crate::event_bus::{DaemonEvent, EventBus};
use crate::position_manager::PositionManager;

/// Periodic account health check.
pub struct RiskMonitor<E: ExchangePort + ?Sized, S: Store + ?Sized> {
    manager: Arc<PositionManager<E, S>>,
    limits: AccountRiskLimits,
    event_bus: Arc<EventBus>,
    active_alerts: Mutex<HashSet<String>>,
    /// Emergency mode entered by this monitor (and so cleared by it)
    emergency_raised: AtomicBool,
}

impl<E: ExchangePort + ?Sized, S: Store + ?Sized> RiskMonitor<E, S> {
    /// Create a monitor.
    pub fn new(
        manager: Arc<PositionManager<E, S>>,
        limits: AccountRiskLimits,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            manager,
            limits,
            event_bus,
            active_alerts: Mutex::new(HashSet::new()),
            emergency_raised: AtomicBool::new(false),
        }
    }

    /// Assess the account once and act on it.
    pub async fn run_once(&self) -> DaemonResult<AccountAssessment> {
        let (portfolio, peak) = self.manager.risk_snapshot().await?;
        let assessment = assess_account(&portfolio, peak, &self.limits);

        self.publish_alerts(&assessment).await;

        let executor = self.manager.executor();
        match assessment.action {
            AccountAction::ForceCloseAll => {
                executor.enter_emergency("max drawdown exceeded");
                let open = portfolio.open_positions;
                if open > 0 {
                    error!(
                        drawdown_pct = %assessment.drawdown_pct,
                        open,
                        "Max drawdown exceeded, closing all positions"
                    );
                    let closed = self.manager.close_all(CloseReason::Liquidation).await?;
                    info!(closed = closed.len(), "Forced close finished");
                }
            },
            AccountAction::EnterEmergency => {
                if executor.enter_emergency("critical margin level") {
                    self.emergency_raised.store(true, Ordering::SeqCst);
                }
            },
            AccountAction::None => {
                if self.emergency_raised.swap(false, Ordering::SeqCst) {
                    info!(health_score = assessment.health_score, "Account recovered");
                    executor.clear_emergency();
                }
            },
        }

        Ok(assessment)
    }

    /// Send alerts not already active; forget the ones that cleared.
    async fn publish_alerts(&self, assessment: &AccountAssessment) {
        let mut active = self.active_alerts.lock().await;
        let current: HashSet<String> =
            assessment.alerts.iter().map(|a| a.message.clone()).collect();

        for alert in &assessment.alerts {
            if active.contains(&alert.message) {
                continue;
            }
            warn!(
                level = %alert.level,
                message = %alert.message,
                value = %alert.value,
                threshold = %alert.threshold,
                "Risk alert"
            );
            self.event_bus.send(DaemonEvent::RiskAlert(alert.clone()));
        }

        *active = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::PriceCache;
    use crate::position_manager::OpenPositionRequest;
    use qbtc_domain::Side;
    use qbtc_engine::{Engine, RiskLimits};
    use qbtc_exec::{OrderExecutor, StubExchange};
    use qbtc_store::MemoryStore;
    use rust_decimal_macros::dec;

    struct Fixture {
        monitor: RiskMonitor<StubExchange, MemoryStore>,
        manager: Arc<PositionManager<StubExchange, MemoryStore>>,
        exchange: Arc<StubExchange>,
        bus: Arc<EventBus>,
    }

    fn fixture(limits: AccountRiskLimits) -> Fixture {
        let exchange = Arc::new(StubExchange::new(dec!(50000)));
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new(100));
        let manager = Arc::new(
            PositionManager::new(
                Engine::new(RiskLimits::default()),
                Arc::new(OrderExecutor::new(exchange.clone(), store)),
                Arc::new(PriceCache::new(exchange.clone())),
                bus.clone(),
                dec!(100000),
            )
            .with_exchange_balance(true),
        );
        let monitor = RiskMonitor::new(manager.clone(), limits, bus.clone());
        Fixture { monitor, manager, exchange, bus }
    }

    fn drain_alerts(bus: &mut crate::event_bus::EventReceiver) -> usize {
        let mut count = 0;
        while let Some(Ok(event)) = bus.try_recv() {
            if event.event_type() == "risk_alert" {
                count += 1;
            }
        }
        count
    }

    /// Default limits with the drawdown breach out of reach
    fn no_drawdown_limit() -> AccountRiskLimits {
        AccountRiskLimits { max_drawdown_pct: dec!(100), ..AccountRiskLimits::default() }
    }

    #[tokio::test]
    async fn test_healthy_account_no_action() {
        let f = fixture(AccountRiskLimits::default());
        let assessment = f.monitor.run_once().await.unwrap();

        assert_eq!(assessment.action, AccountAction::None);
        assert!(assessment.alerts.is_empty());
        assert!(f.manager.executor().trading_state().trading_enabled);
    }

    #[tokio::test]
    async fn test_alerts_are_deduplicated() {
        let f = fixture(no_drawdown_limit());
        let mut events = f.bus.subscribe();
        // Free margin below the 1000 minimum
        f.exchange.set_balance(dec!(500));
        f.manager.sync_account().await.unwrap();

        f.monitor.run_once().await.unwrap();
        f.monitor.run_once().await.unwrap();

        assert_eq!(drain_alerts(&mut events), 1);
    }

    #[tokio::test]
    async fn test_drawdown_breach_closes_everything() {
        let f = fixture(AccountRiskLimits::default());
        let request = OpenPositionRequest {
            size: Some(dec!(1)),
            ..OpenPositionRequest::new("BTCUSDT", Side::Long)
        };
        f.manager.open_position(request).await.unwrap();

        // Equity falls 20% below its peak
        f.exchange.set_balance(dec!(80000));
        f.manager.sync_account().await.unwrap();
        let assessment = f.monitor.run_once().await.unwrap();

        assert_eq!(assessment.action, AccountAction::ForceCloseAll);
        assert!(f.manager.open_positions().await.unwrap().is_empty());
        let history = f.manager.history(10).await.unwrap();
        assert_eq!(history[0].close_reason, Some(CloseReason::Liquidation));
        assert!(f.manager.executor().trading_state().emergency);
    }

    #[tokio::test]
    async fn test_operator_clear_survives_next_check() {
        let f = fixture(AccountRiskLimits::default());
        let request = OpenPositionRequest {
            size: Some(dec!(1)),
            ..OpenPositionRequest::new("BTCUSDT", Side::Long)
        };
        f.manager.open_position(request).await.unwrap();

        f.exchange.set_balance(dec!(80000));
        f.manager.sync_account().await.unwrap();
        let breach = f.monitor.run_once().await.unwrap();
        assert_eq!(breach.action, AccountAction::ForceCloseAll);

        f.manager.clear_emergency().await.unwrap();
        f.manager.sync_account().await.unwrap();
        assert_eq!(f.manager.peak_equity().await, dec!(80000));

        let next = f.monitor.run_once().await.unwrap();
        assert_eq!(next.action, AccountAction::None);
        assert_eq!(next.drawdown_pct, dec!(0));
        assert!(!f.manager.executor().trading_state().emergency);

        let request = OpenPositionRequest {
            size: Some(dec!(0.1)),
            ..OpenPositionRequest::new("BTCUSDT", Side::Long)
        };
        assert!(f.manager.open_position(request).await.is_ok());
    }

    #[tokio::test]
    async fn test_emergency_cleared_after_recovery() {
        let f = fixture(no_drawdown_limit());
        let request = OpenPositionRequest {
            size: Some(dec!(1)),
            ..OpenPositionRequest::new("BTCUSDT", Side::Long)
        };
        f.manager.open_position(request).await.unwrap();

        // 5000 margin against ~5450 equity: ratio above 0.9
        f.exchange.set_balance(dec!(5500));
        f.manager.sync_account().await.unwrap();
        let assessment = f.monitor.run_once().await.unwrap();
        assert_eq!(assessment.action, AccountAction::EnterEmergency);
        assert!(f.manager.executor().trading_state().emergency);

        f.exchange.set_balance(dec!(100000));
        f.manager.sync_account().await.unwrap();
        f.monitor.run_once().await.unwrap();
        assert!(!f.manager.executor().trading_state().emergency);
    }
}
