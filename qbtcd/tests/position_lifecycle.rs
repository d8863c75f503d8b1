//! E2E test: a position from open to stop-out, through the manager.
//!
//! Flow:
//! 1. Open 1 BTC long at 10x on a 100k account -> 5000 margin locked
//! 2. Tick at 51k -> PnL marked, trailing stop ratcheted and persisted
//! 3. Tick below the stop -> closed at the stop level, margin released
//! 4. Tier cap rejects an open without side effects

use std::sync::Arc;

use qbtc_domain::{CloseReason, Event, Side};
use qbtc_engine::{Engine, RiskLimits};
use qbtc_exec::{OrderExecutor, StubExchange};
use qbtc_store::{MemoryStore, Store};
use qbtcd::{DaemonError, EventBus, OpenPositionRequest, PositionManager, PriceCache};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

type Manager = PositionManager<StubExchange, MemoryStore>;

fn setup() -> (Manager, Arc<StubExchange>, Arc<MemoryStore>) {
    let exchange = Arc::new(StubExchange::new(dec!(50000)));
    let store = Arc::new(MemoryStore::new());
    let manager = PositionManager::new(
        Engine::new(RiskLimits::default()),
        Arc::new(OrderExecutor::new(exchange.clone(), store.clone())),
        Arc::new(PriceCache::new(exchange.clone())),
        Arc::new(EventBus::new(100)),
        dec!(100000),
    );
    (manager, exchange, store)
}

fn long_btc(size: Decimal) -> OpenPositionRequest {
    OpenPositionRequest {
        size: Some(size),
        leverage: Some(10),
        trailing_pct: Some(Decimal::ZERO),
        ..OpenPositionRequest::new("BTCUSDT", Side::Long)
    }
}

// =============================================================================
// Test: Open -> Mark -> Ratchet -> Stop
// =============================================================================

#[tokio::test]
async fn test_position_lifecycle_e2e() {
    let (manager, exchange, store) = setup();

    // Open with a 2% trailing stop: stop at 49000
    let request = OpenPositionRequest { trailing_pct: Some(dec!(0.02)), ..long_btc(dec!(1)) };
    let position = manager.open_position(request).await.unwrap();
    assert_eq!(position.initial_margin, dec!(5000));
    assert_eq!(position.stop_loss.unwrap().as_decimal(), dec!(49000));

    let portfolio = manager.portfolio().await.unwrap();
    assert_eq!(portfolio.used_margin, dec!(5000));

    // TICK A: price rises to 51k
    exchange.set_price("BTCUSDT", dec!(51000));
    let summary = manager.monitor_tick().await.unwrap();
    assert_eq!(summary.evaluated, 1);
    assert_eq!(summary.ratcheted, 1);
    assert_eq!(summary.closed, 0);

    let stored = store.positions().find_open_by_id(position.id).await.unwrap().unwrap();
    // 1000 gross minus the 50 entry fee
    assert_eq!(stored.unrealized_pnl, dec!(950));
    assert_eq!(stored.stop_loss.unwrap().as_decimal(), dec!(50000));

    // TICK B: price falls through the stop
    exchange.set_price("BTCUSDT", dec!(49500));
    let summary = manager.monitor_tick().await.unwrap();
    assert_eq!(summary.closed, 1);

    let closed = manager.find_position(position.id).await.unwrap();
    assert_eq!(closed.close_reason, Some(CloseReason::StopLoss));
    assert_eq!(closed.current_price.as_decimal(), dec!(50000));
    // Break-even gross, minus entry and exit fees
    assert!(closed.realized_pnl < Decimal::ZERO);

    let portfolio = manager.portfolio().await.unwrap();
    assert_eq!(portfolio.used_margin, Decimal::ZERO);
    assert_eq!(portfolio.open_positions, 0);

    // Event trail, order fills aside
    let events = store.events().find_by_position(position.id).await.unwrap();
    let kinds: Vec<&str> = events
        .iter()
        .filter(|e| !matches!(e, Event::OrderExecuted { .. }))
        .map(|e| e.event_type())
        .collect();
    assert_eq!(kinds, vec!["position_opened", "stop_loss_ratcheted", "position_closed"]);
}

// =============================================================================
// Test: Tier cap
// =============================================================================

#[tokio::test]
async fn test_tier_cap_rejects_without_side_effects() {
    let (manager, exchange, store) = setup();

    // 29000 margin of the 30000 TIER1 allowance
    manager.open_position(long_btc(dec!(5.8))).await.unwrap();
    let calls_before = exchange.place_calls();
    let events_before = store.events().count().await.unwrap();

    let err = manager.open_position(long_btc(dec!(0.4))).await.unwrap_err();

    assert!(matches!(err, DaemonError::Risk(_)));
    assert_eq!(err.to_string(), "tier exposure limit exceeded");
    assert_eq!(exchange.place_calls(), calls_before);
    assert_eq!(store.events().count().await.unwrap(), events_before);
    let portfolio = manager.portfolio().await.unwrap();
    assert_eq!(portfolio.open_positions, 1);
    assert_eq!(portfolio.used_margin, dec!(29000));
}

// =============================================================================
// Test: Idempotent close
// =============================================================================

#[tokio::test]
async fn test_second_close_is_not_found() {
    let (manager, _exchange, _store) = setup();
    let position = manager.open_position(long_btc(dec!(1))).await.unwrap();

    let closed = manager.close_position(position.id, CloseReason::Manual).await.unwrap();
    assert_eq!(closed.close_reason, Some(CloseReason::Manual));

    let err = manager.close_position(position.id, CloseReason::Manual).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(manager.history(10).await.unwrap().len(), 1);
}
