//! Portfolio aggregates
//!
//! `PortfolioState` is always derived from the ledger balance and the open
//! positions, never stored, so `used_margin` can not drift from the sum of
//! the positions' initial margin.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entities::Position;
use crate::tier::{Tier, TierTable};

/// Exposure of a single tier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierExposure {
    /// Cap: tier fraction of total equity
    pub allocated: Decimal,
    /// Sum of initial margin of the tier's open positions
    pub used: Decimal,
    /// Open positions in the tier
    pub position_count: usize,
    /// Sum of size * current price
    pub notional: Decimal,
}

impl TierExposure {
    /// Room left under the cap (never negative)
    pub fn available(&self) -> Decimal {
        (self.allocated - self.used).max(Decimal::ZERO)
    }
}

/// Snapshot of account-level aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub balance: Decimal,
    pub total_equity: Decimal,
    pub used_margin: Decimal,
    pub free_margin: Decimal,
    pub margin_ratio: Decimal,
    pub unrealized_pnl: Decimal,
    pub open_positions: usize,
    pub tiers: BTreeMap<Tier, TierExposure>,
}

impl PortfolioState {
    /// Derive the aggregates from the balance and the open positions.
    ///
    /// Closed positions in the input are ignored.
    pub fn compute<'a>(
        balance: Decimal,
        positions: impl IntoIterator<Item = &'a Position>,
        tiers: &TierTable,
    ) -> Self {
        let mut exposures: BTreeMap<Tier, TierExposure> =
            tiers.tiers().map(|(tier, _)| (tier, TierExposure::default())).collect();

        let mut used_margin = Decimal::ZERO;
        let mut unrealized = Decimal::ZERO;
        let mut open = 0;

        for position in positions.into_iter().filter(|p| p.is_open()) {
            used_margin += position.initial_margin;
            unrealized += position.unrealized_pnl;
            open += 1;

            let exposure = exposures.entry(position.tier).or_default();
            exposure.used += position.initial_margin;
            exposure.position_count += 1;
            exposure.notional += position.notional();
        }

        let total_equity = balance + unrealized;
        for (tier, exposure) in exposures.iter_mut() {
            exposure.allocated = tiers.fraction(*tier) * total_equity.max(Decimal::ZERO);
        }

        let margin_ratio = if total_equity > Decimal::ZERO {
            used_margin / total_equity
        } else {
            Decimal::ZERO
        };

        Self {
            balance,
            total_equity,
            used_margin,
            free_margin: total_equity - used_margin,
            margin_ratio,
            unrealized_pnl: unrealized,
            open_positions: open,
            tiers: exposures,
        }
    }

    /// Exposure of one tier (zeroed if the tier is not configured)
    pub fn tier(&self, tier: Tier) -> TierExposure {
        self.tiers.get(&tier).cloned().unwrap_or_default()
    }

    /// Sum of tier notionals
    pub fn total_notional(&self) -> Decimal {
        self.tiers.values().map(|t| t.notional).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::CloseReason;
    use crate::value_objects::{Leverage, Price, Quantity, Side, Symbol};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn position(pair: &str, tier: Tier, size: Decimal, entry: Decimal, leverage: u8) -> Position {
        Position::open(
            Symbol::from_pair(pair).unwrap(),
            Side::Long,
            tier,
            Quantity::new(size).unwrap(),
            Leverage::new(leverage).unwrap(),
            Price::new(entry).unwrap(),
            dec!(0),
            Utc::now(),
        )
    }

    #[test]
    fn test_empty_portfolio() {
        let state =
            PortfolioState::compute(dec!(100000), std::iter::empty(), &TierTable::default());
        assert_eq!(state.total_equity, dec!(100000));
        assert_eq!(state.free_margin, dec!(100000));
        assert_eq!(state.margin_ratio, dec!(0));
        assert_eq!(state.tier(Tier::Tier1).allocated, dec!(30000));
        assert_eq!(state.tier(Tier::Tier6).allocated, dec!(5000));
    }

    #[test]
    fn test_used_margin_is_sum_of_open_positions() {
        let btc = position("BTCUSDT", Tier::Tier1, dec!(1), dec!(50000), 10);
        let sol = position("SOLUSDT", Tier::Tier2, dec!(100), dec!(150), 5);
        let mut closed = position("ETHUSDT", Tier::Tier1, dec!(1), dec!(3000), 10);
        closed
            .close(Price::new(dec!(3000)).unwrap(), dec!(0), CloseReason::Manual, Utc::now())
            .unwrap();

        let positions = vec![btc, sol, closed];
        let state = PortfolioState::compute(dec!(100000), &positions, &TierTable::default());

        assert_eq!(state.used_margin, dec!(8000));
        assert_eq!(state.free_margin, dec!(92000));
        assert_eq!(state.margin_ratio, dec!(0.08));
        assert_eq!(state.open_positions, 2);
        assert_eq!(state.tier(Tier::Tier1).used, dec!(5000));
        assert_eq!(state.tier(Tier::Tier1).position_count, 1);
        assert_eq!(state.tier(Tier::Tier2).notional, dec!(15000));
        assert_eq!(state.total_notional(), dec!(65000));
    }

    #[test]
    fn test_equity_includes_unrealized() {
        let mut btc = position("BTCUSDT", Tier::Tier1, dec!(1), dec!(50000), 10);
        btc.update_price(Price::new(dec!(51000)).unwrap(), Utc::now());

        let state = PortfolioState::compute(dec!(100000), [&btc], &TierTable::default());
        assert_eq!(state.total_equity, dec!(101000));
        assert_eq!(state.tier(Tier::Tier1).allocated, dec!(30300));
        assert_eq!(state.tier(Tier::Tier1).available(), dec!(25300));
    }
}
