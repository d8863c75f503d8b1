//! Tier rebalance planning
//!
//! Compares each tier's share of open notional with its target weight and
//! plans trades on existing positions to close the gap. Planning is pure;
//! the daemon executes the trades and records the gating state.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use qbtc_domain::{
    OrderSide, PortfolioState, Position, PositionId, Quantity, Symbol, Tier, TierTable,
};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Target share of open notional for one tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetWeight {
    /// Tier
    pub tier: Tier,
    /// Target share (normalized before use)
    pub weight: Decimal,
}

/// Scale positive weights so they sum to 1.
///
/// Non-positive weights are dropped. Returns an empty list when nothing is
/// left to normalize.
pub fn normalize_weights(targets: &[TargetWeight]) -> Vec<TargetWeight> {
    let positive: Vec<TargetWeight> =
        targets.iter().copied().filter(|t| t.weight > Decimal::ZERO).collect();
    let total: Decimal = positive.iter().map(|t| t.weight).sum();
    if total <= Decimal::ZERO {
        return Vec::new();
    }
    positive
        .into_iter()
        .map(|t| TargetWeight { tier: t.tier, weight: t.weight / total })
        .collect()
}

/// Rebalancer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancerConfig {
    /// Target weights per tier
    pub targets: Vec<TargetWeight>,
    /// Absolute deviation that makes a tier actionable
    pub deviation_threshold: Decimal,
    /// Minimum time between rebalances
    #[serde(with = "duration_secs")]
    pub cooldown: Duration,
    /// Rebalances allowed per UTC day
    pub max_daily_rebalances: u32,
    /// Largest single trade as a fraction of total equity
    pub max_trade_fraction: Decimal,
    /// Trades below this value (quote currency) are dropped
    pub min_trade_value: Decimal,
}

impl RebalancerConfig {
    /// Targets taken from the tier allocation caps
    pub fn from_tier_table(table: &TierTable) -> Self {
        Self {
            targets: table.tiers().map(|(tier, weight)| TargetWeight { tier, weight }).collect(),
            deviation_threshold: dec!(0.05),
            cooldown: Duration::hours(1),
            max_daily_rebalances: 4,
            max_trade_fraction: dec!(0.10),
            min_trade_value: dec!(10),
        }
    }

    /// Check value ranges
    pub fn validate(&self) -> EngineResult<()> {
        if self.deviation_threshold <= Decimal::ZERO || self.deviation_threshold >= Decimal::ONE {
            return Err(EngineError::InvalidConfig(
                "deviation_threshold must be in (0, 1)".to_string(),
            ));
        }
        if self.max_trade_fraction <= Decimal::ZERO || self.max_trade_fraction > Decimal::ONE {
            return Err(EngineError::InvalidConfig(
                "max_trade_fraction must be in (0, 1]".to_string(),
            ));
        }
        if self.cooldown < Duration::zero() || self.min_trade_value < Decimal::ZERO {
            return Err(EngineError::InvalidConfig("negative cooldown or minimum".to_string()));
        }
        if normalize_weights(&self.targets).is_empty() {
            return Err(EngineError::InvalidConfig("no positive target weight".to_string()));
        }
        Ok(())
    }
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self::from_tier_table(&TierTable::default())
    }
}

/// Gating state carried between rebalance rounds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebalanceState {
    /// When the last round executed
    pub last_rebalance_at: Option<DateTime<Utc>>,
    /// UTC day `count_today` refers to
    pub day: Option<NaiveDate>,
    /// Rounds executed on `day`
    pub count_today: u32,
}

impl RebalanceState {
    /// Rounds already executed on the UTC day of `now`
    pub fn count_on(&self, now: DateTime<Utc>) -> u32 {
        if self.day == Some(now.date_naive()) {
            self.count_today
        } else {
            0
        }
    }

    /// Record an executed round
    pub fn record(&mut self, at: DateTime<Utc>) {
        let today = at.date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.count_today = 0;
        }
        self.count_today += 1;
        self.last_rebalance_at = Some(at);
    }
}

/// Whether a trade shrinks or grows the position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceDirection {
    /// Overweight tier: partial close
    Reduce,
    /// Underweight tier: add at market
    Add,
}

/// One planned trade
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceTrade {
    /// Position the trade applies to
    pub position_id: PositionId,
    /// Symbol of that position
    pub symbol: Symbol,
    /// Tier being corrected
    pub tier: Tier,
    /// Reduce or add
    pub direction: RebalanceDirection,
    /// Order side on the exchange
    pub side: OrderSide,
    /// Base quantity
    pub quantity: Quantity,
    /// Estimated value at the current price
    pub value: Decimal,
    /// Reductions are sent reduce-only
    pub reduce_only: bool,
    /// Tier share before the trade
    pub current_fraction: Decimal,
    /// Normalized target share
    pub target_fraction: Decimal,
}

/// Outcome of planning
#[derive(Debug, Clone, PartialEq)]
pub enum RebalancePlan {
    /// Nothing to do (no exposure, no deviation, or every trade too small)
    NoAction,
    /// Deviation found but gating refused
    Skipped(String),
    /// Trades to execute, largest deviation first
    Trades(Vec<RebalanceTrade>),
}

/// Plan a rebalance round.
pub fn plan_rebalance(
    portfolio: &PortfolioState,
    positions: &[Position],
    config: &RebalancerConfig,
    state: &RebalanceState,
    now: DateTime<Utc>,
) -> RebalancePlan {
    let total_notional = portfolio.total_notional();
    if total_notional <= Decimal::ZERO {
        return RebalancePlan::NoAction;
    }

    let mut actionable: Vec<(TargetWeight, Decimal, Decimal)> = normalize_weights(&config.targets)
        .into_iter()
        .filter_map(|target| {
            let current = portfolio.tier(target.tier).notional / total_notional;
            let deviation = current - target.weight;
            (deviation.abs() > config.deviation_threshold).then_some((target, current, deviation))
        })
        .collect();

    if actionable.is_empty() {
        return RebalancePlan::NoAction;
    }

    if let Some(last) = state.last_rebalance_at {
        let elapsed = now - last;
        if elapsed < config.cooldown {
            return RebalancePlan::Skipped(format!(
                "cooldown active ({}s remaining)",
                (config.cooldown - elapsed).num_seconds()
            ));
        }
    }
    if state.count_on(now) >= config.max_daily_rebalances {
        return RebalancePlan::Skipped("daily rebalance limit reached".to_string());
    }

    actionable.sort_by(|a, b| b.2.abs().cmp(&a.2.abs()));

    let max_trade_value = config.max_trade_fraction * portfolio.total_equity.max(Decimal::ZERO);
    let mut trades = Vec::new();

    for (target, current, deviation) in actionable {
        let value = (deviation.abs() * total_notional).min(max_trade_value);
        if value < config.min_trade_value {
            debug!(tier = %target.tier, %value, "Rebalance trade below minimum, dropped");
            continue;
        }

        let Some(position) = largest_position(positions, target.tier) else {
            debug!(tier = %target.tier, "No position to rebalance in tier");
            continue;
        };

        let price = position.current_price.as_decimal();
        let direction = if deviation > Decimal::ZERO {
            RebalanceDirection::Reduce
        } else {
            RebalanceDirection::Add
        };

        let mut quantity = (value / price).round_dp_with_strategy(6, RoundingStrategy::ToZero);
        if direction == RebalanceDirection::Reduce {
            quantity = quantity.min(position.size.as_decimal());
        }
        let Ok(quantity) = Quantity::new(quantity) else {
            continue;
        };

        let trade_value = quantity.as_decimal() * price;
        if trade_value < config.min_trade_value {
            continue;
        }

        let (side, reduce_only) = match direction {
            RebalanceDirection::Reduce => (position.side.exit_action(), true),
            RebalanceDirection::Add => (position.side.entry_action(), false),
        };

        trades.push(RebalanceTrade {
            position_id: position.id,
            symbol: position.symbol.clone(),
            tier: target.tier,
            direction,
            side,
            quantity,
            value: trade_value,
            reduce_only,
            current_fraction: current,
            target_fraction: target.weight,
        });
    }

    if trades.is_empty() {
        RebalancePlan::NoAction
    } else {
        RebalancePlan::Trades(trades)
    }
}

fn largest_position(positions: &[Position], tier: Tier) -> Option<&Position> {
    positions
        .iter()
        .filter(|p| p.is_open() && p.tier == tier)
        .max_by(|a, b| a.notional().cmp(&b.notional()))
}

mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        i64::deserialize(deserializer).map(Duration::seconds)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use qbtc_domain::{Leverage, Price, Side};

    fn position(pair: &str, tier: Tier, size: Decimal, price: Decimal) -> Position {
        Position::open(
            Symbol::from_pair(pair).unwrap(),
            Side::Long,
            tier,
            Quantity::new(size).unwrap(),
            Leverage::new(5).unwrap(),
            Price::new(price).unwrap(),
            Decimal::ZERO,
            Utc::now(),
        )
    }

    fn two_tier_config() -> RebalancerConfig {
        RebalancerConfig {
            targets: vec![
                TargetWeight { tier: Tier::Tier1, weight: dec!(0.5) },
                TargetWeight { tier: Tier::Tier2, weight: dec!(0.5) },
            ],
            ..RebalancerConfig::default()
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    /// Two-tier plan with no prior rebalances
    fn plan_at_noon(state: &PortfolioState, positions: &[Position]) -> RebalancePlan {
        plan_rebalance(state, positions, &two_tier_config(), &RebalanceState::default(), noon())
    }

    #[test]
    fn test_normalize_weights() {
        let weights = normalize_weights(&[
            TargetWeight { tier: Tier::Tier1, weight: dec!(3) },
            TargetWeight { tier: Tier::Tier2, weight: dec!(1) },
            TargetWeight { tier: Tier::Tier3, weight: dec!(0) },
        ]);
        assert_eq!(weights.len(), 2);
        assert_eq!(weights[0].weight, dec!(0.75));
        assert_eq!(weights[1].weight, dec!(0.25));
        assert!(normalize_weights(&[]).is_empty());
    }

    #[test]
    fn test_no_exposure_no_plan() {
        let state =
            PortfolioState::compute(dec!(100000), std::iter::empty(), &TierTable::default());
        let plan =
            plan_rebalance(&state, &[], &two_tier_config(), &RebalanceState::default(), noon());
        assert_eq!(plan, RebalancePlan::NoAction);
    }

    #[test]
    fn test_balanced_no_plan() {
        let positions = vec![
            position("BTCUSDT", Tier::Tier1, dec!(0.2), dec!(50000)),
            position("SOLUSDT", Tier::Tier2, dec!(100), dec!(100)),
        ];
        let state = PortfolioState::compute(dec!(100000), &positions, &TierTable::default());
        let plan = plan_at_noon(&state, &positions);
        assert_eq!(plan, RebalancePlan::NoAction);
    }

    #[test]
    fn test_overweight_reduces_and_underweight_adds() {
        // Tier1 15,000 notional, Tier2 5,000: 0.75 / 0.25 against 0.5 / 0.5
        let positions = vec![
            position("BTCUSDT", Tier::Tier1, dec!(0.3), dec!(50000)),
            position("SOLUSDT", Tier::Tier2, dec!(50), dec!(100)),
        ];
        let state = PortfolioState::compute(dec!(100000), &positions, &TierTable::default());
        let plan = plan_at_noon(&state, &positions);

        let RebalancePlan::Trades(trades) = plan else {
            panic!("expected trades, got {:?}", plan);
        };
        assert_eq!(trades.len(), 2);

        let reduce = trades.iter().find(|t| t.tier == Tier::Tier1).unwrap();
        assert_eq!(reduce.direction, RebalanceDirection::Reduce);
        assert_eq!(reduce.side, OrderSide::Sell);
        assert!(reduce.reduce_only);
        // 0.25 * 20,000 = 5,000 → 0.1 BTC
        assert_eq!(reduce.quantity.as_decimal(), dec!(0.1));
        assert_eq!(reduce.value, dec!(5000));

        let add = trades.iter().find(|t| t.tier == Tier::Tier2).unwrap();
        assert_eq!(add.direction, RebalanceDirection::Add);
        assert_eq!(add.side, OrderSide::Buy);
        assert_eq!(add.quantity.as_decimal(), dec!(50));
    }

    #[test]
    fn test_trade_capped_by_equity_fraction() {
        let positions = vec![
            position("BTCUSDT", Tier::Tier1, dec!(3), dec!(50000)),
            position("SOLUSDT", Tier::Tier2, dec!(500), dec!(100)),
        ];
        // 200,000 notional, deviation 0.25 → 50,000, capped at 10% of 100,000
        let state = PortfolioState::compute(dec!(100000), &positions, &TierTable::default());
        let plan = plan_at_noon(&state, &positions);
        let RebalancePlan::Trades(trades) = plan else { panic!("expected trades") };
        assert!(trades.iter().all(|t| t.value <= dec!(10000)));
    }

    #[test]
    fn test_cooldown_and_daily_cap() {
        let positions = vec![
            position("BTCUSDT", Tier::Tier1, dec!(0.3), dec!(50000)),
            position("SOLUSDT", Tier::Tier2, dec!(50), dec!(100)),
        ];
        let state = PortfolioState::compute(dec!(100000), &positions, &TierTable::default());
        let config = two_tier_config();

        let mut gate = RebalanceState::default();
        gate.record(noon() - Duration::minutes(30));
        let plan = plan_rebalance(&state, &positions, &config, &gate, noon());
        assert!(matches!(plan, RebalancePlan::Skipped(ref r) if r.starts_with("cooldown active")));

        let mut gate = RebalanceState::default();
        for hour in 0..4 {
            gate.record(Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap());
        }
        let plan = plan_rebalance(&state, &positions, &config, &gate, noon());
        assert_eq!(plan, RebalancePlan::Skipped("daily rebalance limit reached".to_string()));

        // Next UTC day resets the count
        let tomorrow = noon() + Duration::days(1);
        assert!(matches!(
            plan_rebalance(&state, &positions, &config, &gate, tomorrow),
            RebalancePlan::Trades(_)
        ));
    }

    #[test]
    fn test_tier_without_position_produces_no_trade() {
        // Only Tier1 held: Tier1 overweight (1.0 vs 0.5), Tier2 underweight but empty
        let positions = vec![position("BTCUSDT", Tier::Tier1, dec!(0.01), dec!(50000))];
        let state = PortfolioState::compute(dec!(100000), &positions, &TierTable::default());
        let plan = plan_at_noon(&state, &positions);
        let RebalancePlan::Trades(trades) = plan else { panic!("expected trades") };
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].direction, RebalanceDirection::Reduce);
        assert_eq!(trades[0].quantity.as_decimal(), dec!(0.005));
    }

    #[test]
    fn test_small_trades_dropped() {
        let positions = vec![
            position("BTCUSDT", Tier::Tier1, dec!(0.0003), dec!(50000)),
            position("SOLUSDT", Tier::Tier2, dec!(0.05), dec!(100)),
        ];
        // 20 notional total, deviation 0.25 → 5 < 10
        let state = PortfolioState::compute(dec!(100000), &positions, &TierTable::default());
        let plan = plan_at_noon(&state, &positions);
        assert_eq!(plan, RebalancePlan::NoAction);
    }

    #[test]
    fn test_default_config_valid() {
        assert!(RebalancerConfig::default().validate().is_ok());
        let json = serde_json::to_value(RebalancerConfig::default()).unwrap();
        assert_eq!(json["cooldown"], 3600);
    }
}
