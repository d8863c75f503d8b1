//! Per-tick position evaluation
//!
//! ```text
//! price → refresh PnL → ratchet trailing stop → stop-loss? → take-profit? → margin call?
//! ```
//!
//! The engine never mutates its input. It returns the updated position plus
//! the actions the daemon has to carry out.

use chrono::{DateTime, Utc};
use qbtc_domain::{
    is_stop_hit, is_take_profit_hit, ratchet_trailing_stop, CloseReason, Position, PositionId,
    Price, Side,
};
use serde::Serialize;
use tracing::debug;

use crate::risk::RiskLimits;

/// Action produced by the engine for the daemon to execute
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EngineAction {
    /// Trailing stop moved (already applied to `updated_position`)
    RatchetStop {
        /// Position identifier
        position_id: PositionId,
        /// Stop before this tick
        previous: Option<Price>,
        /// Stop after this tick
        new_stop: Price,
        /// Price that moved it
        trigger_price: Price,
    },
    /// Close the position, booking PnL at `exit_price`
    Close {
        /// Position identifier
        position_id: PositionId,
        /// Trigger
        reason: CloseReason,
        /// Level the PnL is booked at
        exit_price: Price,
    },
}

/// Outcome of one monitoring tick for one position
#[derive(Debug, Clone)]
pub struct TickDecision {
    /// Position with refreshed price, PnL and stop
    pub updated_position: Position,
    /// Actions to execute, at most one `Close`
    pub actions: Vec<EngineAction>,
}

impl TickDecision {
    /// The close action, if one fired
    pub fn close(&self) -> Option<(CloseReason, Price)> {
        self.actions.iter().find_map(|action| match action {
            EngineAction::Close { reason, exit_price, .. } => Some((*reason, *exit_price)),
            _ => None,
        })
    }

    /// Whether nothing happened besides the price refresh
    pub fn is_quiet(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Pure decision engine for open positions
#[derive(Debug, Clone, Default)]
pub struct Engine {
    limits: RiskLimits,
}

impl Engine {
    /// Create an engine with the given limits
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    /// Limits in force
    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Evaluate one price update for one position.
    ///
    /// Exit priority: stop-loss, take-profit, margin call. Stop-loss books at
    /// the stop level and take-profit at the target even when price gapped
    /// past them; a margin call books at the current price.
    pub fn process_tick(
        &self,
        position: &Position,
        price: Price,
        at: DateTime<Utc>,
    ) -> TickDecision {
        let mut updated = position.clone();
        let mut actions = Vec::new();

        if !updated.is_open() {
            return TickDecision { updated_position: updated, actions };
        }

        updated.update_price(price, at);

        if let (Some(trailing), Some(stop)) = (updated.trailing_stop, updated.stop_loss) {
            if let Some(update) = ratchet_trailing_stop(
                updated.side,
                price,
                trailing.high_water_mark,
                stop,
                trailing.distance,
            ) {
                debug!(
                    position_id = %updated.id,
                    previous = %stop,
                    new = %update.new_stop,
                    trigger = %price,
                    "Trailing stop ratcheted"
                );
                updated.apply_trailing_update(update);
                actions.push(EngineAction::RatchetStop {
                    position_id: updated.id,
                    previous: Some(stop),
                    new_stop: update.new_stop,
                    trigger_price: price,
                });
            } else {
                // Track the extreme even when the stop doesn't move yet
                let extreme = match updated.side {
                    Side::Long => price.max(trailing.high_water_mark),
                    Side::Short => price.min(trailing.high_water_mark),
                };
                if let Some(t) = updated.trailing_stop.as_mut() {
                    t.high_water_mark = extreme;
                }
            }
        }

        let close = if let Some(stop) =
            updated.stop_loss.filter(|s| is_stop_hit(updated.side, price, *s))
        {
            Some((CloseReason::StopLoss, stop))
        } else if let Some(target) =
            updated.take_profit.filter(|t| is_take_profit_hit(updated.side, price, *t))
        {
            Some((CloseReason::TakeProfit, target))
        } else if updated.margin_ratio() >= self.limits.liquidation_threshold {
            Some((CloseReason::MarginCall, price))
        } else {
            None
        };

        if let Some((reason, exit_price)) = close {
            debug!(position_id = %updated.id, %reason, %exit_price, "Exit triggered");
            actions.push(EngineAction::Close { position_id: updated.id, reason, exit_price });
        }

        TickDecision { updated_position: updated, actions }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use qbtc_domain::{Leverage, Quantity, Symbol, Tier};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn px(value: Decimal) -> Price {
        Price::new(value).unwrap()
    }

    fn btc(side: Side) -> Position {
        Position::open(
            Symbol::from_pair("BTCUSDT").unwrap(),
            side,
            Tier::Tier1,
            Quantity::new(dec!(1)).unwrap(),
            Leverage::new(10).unwrap(),
            px(dec!(50000)),
            Decimal::ZERO,
            Utc::now(),
        )
    }

    #[test]
    fn test_quiet_tick_refreshes_pnl() {
        let engine = Engine::default();
        let position = btc(Side::Long).with_stop_loss(px(dec!(49000)));

        let decision = engine.process_tick(&position, px(dec!(51000)), Utc::now());
        assert!(decision.is_quiet());
        assert_eq!(decision.updated_position.unrealized_pnl, dec!(1000));
        // Input untouched
        assert_eq!(position.unrealized_pnl, dec!(0));
    }

    #[test]
    fn test_stop_loss_books_at_stop_level() {
        let engine = Engine::default();
        let position = btc(Side::Long).with_stop_loss(px(dec!(49000)));

        // Gap through the stop
        let decision = engine.process_tick(&position, px(dec!(48500)), Utc::now());
        assert_eq!(decision.close(), Some((CloseReason::StopLoss, px(dec!(49000)))));
    }

    #[test]
    fn test_take_profit_for_short() {
        let engine = Engine::default();
        let position = btc(Side::Short).with_take_profit(px(dec!(47000)));

        let decision = engine.process_tick(&position, px(dec!(46900)), Utc::now());
        assert_eq!(decision.close(), Some((CloseReason::TakeProfit, px(dec!(47000)))));
    }

    #[test]
    fn test_stop_loss_wins_over_take_profit() {
        let engine = Engine::default();
        // Misconfigured levels where both trigger at the same price
        let position = btc(Side::Long)
            .with_stop_loss(px(dec!(52000)))
            .with_take_profit(px(dec!(51000)));

        let decision = engine.process_tick(&position, px(dec!(51500)), Utc::now());
        assert_eq!(decision.close().map(|(r, _)| r), Some(CloseReason::StopLoss));
    }

    #[test]
    fn test_margin_call_at_current_price() {
        let engine = Engine::default();
        let position = btc(Side::Long);

        // 4,000 loss on 5,000 margin = 0.8
        let decision = engine.process_tick(&position, px(dec!(46000)), Utc::now());
        assert_eq!(decision.close(), Some((CloseReason::MarginCall, px(dec!(46000)))));

        let safe = engine.process_tick(&position, px(dec!(46100)), Utc::now());
        assert!(safe.close().is_none());
    }

    #[test]
    fn test_trailing_ratchet_then_stop() {
        let engine = Engine::default();
        let position = btc(Side::Long).with_trailing_stop(dec!(1000));

        let up = engine.process_tick(&position, px(dec!(52000)), Utc::now());
        assert_eq!(up.updated_position.stop_loss, Some(px(dec!(51000))));
        assert!(matches!(
            up.actions.as_slice(),
            [EngineAction::RatchetStop { previous: Some(p), .. }] if *p == px(dec!(49000))
        ));

        let down = engine.process_tick(&up.updated_position, px(dec!(50900)), Utc::now());
        assert_eq!(down.close(), Some((CloseReason::StopLoss, px(dec!(51000)))));
        assert_eq!(down.updated_position.stop_loss, Some(px(dec!(51000))));
    }

    #[test]
    fn test_high_water_tracked_without_ratchet() {
        let engine = Engine::default();
        // Explicit stop tighter than trailing distance
        let position = btc(Side::Long)
            .with_stop_loss(px(dec!(49800)))
            .with_trailing_stop(dec!(1000));

        let decision = engine.process_tick(&position, px(dec!(50500)), Utc::now());
        assert!(decision.is_quiet());
        assert_eq!(
            decision.updated_position.trailing_stop.unwrap().high_water_mark,
            px(dec!(50500))
        );
    }

    #[test]
    fn test_closed_position_is_ignored() {
        let engine = Engine::default();
        let mut position = btc(Side::Long).with_stop_loss(px(dec!(49000)));
        position.close(px(dec!(50000)), Decimal::ZERO, CloseReason::Manual, Utc::now()).unwrap();

        let decision = engine.process_tick(&position, px(dec!(40000)), Utc::now());
        assert!(decision.is_quiet());
    }
}
