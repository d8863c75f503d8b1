//! Risk validation for new exposure
//!
//! Checks run in a fixed order and the first failure wins:
//! position count, free margin, tier cap, leverage.

use qbtc_domain::{Leverage, PortfolioState, Tier};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Account-wide limits applied to every open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum simultaneously open positions
    pub max_positions: usize,
    /// Highest leverage accepted on open
    pub max_leverage: Leverage,
    /// Share of a position's margin a loss may consume before a margin call
    pub liquidation_threshold: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_positions: 10,
            max_leverage: Leverage::new_const(20),
            liquidation_threshold: dec!(0.8),
        }
    }
}

/// Why an open (or increase) was refused
///
/// `Display` is the reason string returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RiskRejection {
    /// Open count already at the cap
    #[error("max positions reached")]
    MaxPositionsReached {
        /// Currently open
        open: usize,
        /// Configured cap
        max: usize,
    },

    /// Margin needed exceeds free margin
    #[error("insufficient free margin")]
    InsufficientFreeMargin {
        /// Margin the new exposure needs
        required: Decimal,
        /// Free margin available
        free: Decimal,
    },

    /// Tier would go above its allocation
    #[error("tier exposure limit exceeded")]
    TierExposureExceeded {
        /// Tier of the symbol
        tier: Tier,
        /// Margin already used in the tier
        used: Decimal,
        /// Margin the new exposure needs
        required: Decimal,
        /// Tier cap
        allocated: Decimal,
    },

    /// Requested leverage above the configured max
    #[error("leverage exceeds maximum")]
    LeverageExceedsMaximum {
        /// Requested leverage
        requested: Leverage,
        /// Configured max
        max: Leverage,
    },
}

impl RiskRejection {
    /// Reason string for API responses and logs
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// Validate a new position against the account and tier limits.
///
/// # Errors
/// The first `RiskRejection` in check order. No state is touched either way.
pub fn validate_open(
    portfolio: &PortfolioState,
    tier: Tier,
    required_margin: Decimal,
    leverage: Leverage,
    limits: &RiskLimits,
) -> Result<(), RiskRejection> {
    if portfolio.open_positions >= limits.max_positions {
        return Err(RiskRejection::MaxPositionsReached {
            open: portfolio.open_positions,
            max: limits.max_positions,
        });
    }

    check_margin(portfolio, tier, required_margin)?;

    if leverage > limits.max_leverage {
        return Err(RiskRejection::LeverageExceedsMaximum {
            requested: leverage,
            max: limits.max_leverage,
        });
    }

    Ok(())
}

/// Validate adding margin to an existing position (no new slot is used).
///
/// # Errors
/// `InsufficientFreeMargin` or `TierExposureExceeded`
pub fn validate_increase(
    portfolio: &PortfolioState,
    tier: Tier,
    required_margin: Decimal,
) -> Result<(), RiskRejection> {
    check_margin(portfolio, tier, required_margin)
}

fn check_margin(
    portfolio: &PortfolioState,
    tier: Tier,
    required_margin: Decimal,
) -> Result<(), RiskRejection> {
    if required_margin > portfolio.free_margin {
        return Err(RiskRejection::InsufficientFreeMargin {
            required: required_margin,
            free: portfolio.free_margin,
        });
    }

    let exposure = portfolio.tier(tier);
    if exposure.used + required_margin > exposure.allocated {
        return Err(RiskRejection::TierExposureExceeded {
            tier,
            used: exposure.used,
            required: required_margin,
            allocated: exposure.allocated,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use qbtc_domain::{Position, Price, Quantity, Side, Symbol, TierTable};

    fn open(pair: &str, tier: Tier, size: Decimal, entry: Decimal) -> Position {
        Position::open(
            Symbol::from_pair(pair).unwrap(),
            Side::Long,
            tier,
            Quantity::new(size).unwrap(),
            Leverage::new(10).unwrap(),
            Price::new(entry).unwrap(),
            Decimal::ZERO,
            Utc::now(),
        )
    }

    fn lev(value: u8) -> Leverage {
        Leverage::new(value).unwrap()
    }

    #[test]
    fn test_accepts_within_limits() {
        let state =
            PortfolioState::compute(dec!(100000), std::iter::empty(), &TierTable::default());
        let limits = RiskLimits::default();
        assert!(validate_open(&state, Tier::Tier1, dec!(5000), lev(10), &limits).is_ok());
    }

    #[test]
    fn test_tier_cap_rejection() {
        // TIER1 allocated 30,000 with 29,000 used
        let positions = vec![open("BTCUSDT", Tier::Tier1, dec!(5.8), dec!(50000))];
        let state = PortfolioState::compute(dec!(100000), &positions, &TierTable::default());
        assert_eq!(state.tier(Tier::Tier1).used, dec!(29000));

        let limits = RiskLimits::default();
        let err = validate_open(&state, Tier::Tier1, dec!(2000), lev(10), &limits).unwrap_err();
        assert_eq!(err.reason(), "tier exposure limit exceeded");

        // Other tiers are unaffected
        assert!(validate_open(&state, Tier::Tier2, dec!(2000), lev(10), &limits).is_ok());
    }

    #[test]
    fn test_max_positions_checked_first() {
        let positions: Vec<Position> =
            (0..2).map(|_| open("BTCUSDT", Tier::Tier1, dec!(0.1), dec!(50000))).collect();
        let state = PortfolioState::compute(dec!(100000), &positions, &TierTable::default());
        let limits = RiskLimits { max_positions: 2, ..RiskLimits::default() };

        // Would also fail leverage, but count comes first
        let err = validate_open(&state, Tier::Tier1, dec!(1), lev(50), &limits).unwrap_err();
        assert_eq!(err.to_string(), "max positions reached");
    }

    #[test]
    fn test_free_margin_before_tier() {
        let state = PortfolioState::compute(dec!(1000), std::iter::empty(), &TierTable::default());
        let err = validate_open(&state, Tier::Tier1, dec!(1500), lev(10), &RiskLimits::default())
            .unwrap_err();
        assert_eq!(err.reason(), "insufficient free margin");
    }

    #[test]
    fn test_leverage_cap() {
        let state =
            PortfolioState::compute(dec!(100000), std::iter::empty(), &TierTable::default());
        let limits = RiskLimits::default();
        let err = validate_open(&state, Tier::Tier1, dec!(100), lev(25), &limits).unwrap_err();
        assert_eq!(err.reason(), "leverage exceeds maximum");
        assert!(validate_open(&state, Tier::Tier1, dec!(100), lev(20), &limits).is_ok());
    }

    #[test]
    fn test_increase_skips_position_count() {
        let positions = vec![open("BTCUSDT", Tier::Tier1, dec!(0.1), dec!(50000))];
        let state = PortfolioState::compute(dec!(100000), &positions, &TierTable::default());
        assert!(validate_increase(&state, Tier::Tier1, dec!(1000)).is_ok());
        assert!(validate_increase(&state, Tier::Tier1, dec!(30000)).is_err());
    }
}
