//! Signal-strength position sizing
//!
//! Signal producers are pluggable; sizing only sees a strength in [0, 1] and
//! interpolates margin and leverage linearly between the policy bounds.

use qbtc_domain::{Leverage, Price, Quantity, SignalStrength};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Decimal places kept on computed quantities
const QUANTITY_DP: u32 = 6;

/// Bounds for signal-driven sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingPolicy {
    /// Margin as a fraction of equity at strength 0
    pub min_margin_fraction: Decimal,
    /// Margin as a fraction of equity at strength 1
    pub max_margin_fraction: Decimal,
    /// Leverage at strength 0
    pub min_leverage: Leverage,
    /// Leverage at strength 1
    pub max_leverage: Leverage,
}

impl Default for SizingPolicy {
    fn default() -> Self {
        Self {
            min_margin_fraction: dec!(0.01),
            max_margin_fraction: dec!(0.05),
            min_leverage: Leverage::new_const(2),
            max_leverage: Leverage::new_const(10),
        }
    }
}

/// Sized order for a new position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizedPosition {
    /// Base-asset quantity
    pub quantity: Quantity,
    /// Leverage to open with
    pub leverage: Leverage,
    /// Margin the position locks (`quantity * price / leverage`)
    pub margin: Decimal,
}

impl SizingPolicy {
    /// Check bounds ordering
    pub fn validate(&self) -> EngineResult<()> {
        if self.min_margin_fraction <= Decimal::ZERO
            || self.max_margin_fraction > Decimal::ONE
            || self.min_margin_fraction > self.max_margin_fraction
        {
            return Err(EngineError::InvalidConfig(
                "margin fractions must satisfy 0 < min <= max <= 1".to_string(),
            ));
        }
        if self.min_leverage > self.max_leverage {
            return Err(EngineError::InvalidConfig("min_leverage above max_leverage".to_string()));
        }
        Ok(())
    }

    /// Size a position from signal strength, equity and entry price.
    ///
    /// # Errors
    /// `EngineError::Sizing` when equity is not positive or the quantity
    /// rounds to zero.
    pub fn size_position(
        &self,
        strength: SignalStrength,
        equity: Decimal,
        price: Price,
    ) -> EngineResult<SizedPosition> {
        if equity <= Decimal::ZERO {
            return Err(EngineError::Sizing(format!("equity must be positive, got {}", equity)));
        }
        let s = strength.as_decimal();

        let fraction =
            self.min_margin_fraction + (self.max_margin_fraction - self.min_margin_fraction) * s;
        let lev_min = self.min_leverage.as_decimal();
        let lev_max = self.max_leverage.as_decimal();
        let lev_raw = (lev_min + (lev_max - lev_min) * s)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
        let leverage = lev_raw
            .to_u8()
            .ok_or_else(|| EngineError::Sizing(format!("leverage out of range: {}", lev_raw)))
            .and_then(|l| Leverage::new(l).map_err(EngineError::from))?;

        let target_margin = equity * fraction;
        let quantity = (target_margin * leverage.as_decimal() / price.as_decimal())
            .round_dp_with_strategy(QUANTITY_DP, RoundingStrategy::ToZero);
        let quantity = Quantity::new(quantity)
            .map_err(|_| EngineError::Sizing("quantity rounds to zero".to_string()))?;

        let margin = quantity.as_decimal() * price.as_decimal() / leverage.as_decimal();
        Ok(SizedPosition { quantity, leverage, margin })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px(value: Decimal) -> Price {
        Price::new(value).unwrap()
    }

    #[test]
    fn test_interpolation_bounds() {
        let policy = SizingPolicy::default();

        let weak = policy
            .size_position(SignalStrength::new(dec!(0)).unwrap(), dec!(100000), px(dec!(50000)))
            .unwrap();
        assert_eq!(weak.leverage.value(), 2);
        assert_eq!(weak.quantity.as_decimal(), dec!(0.04));
        assert_eq!(weak.margin, dec!(1000));

        let strong = policy
            .size_position(SignalStrength::new(dec!(1)).unwrap(), dec!(100000), px(dec!(50000)))
            .unwrap();
        assert_eq!(strong.leverage.value(), 10);
        assert_eq!(strong.quantity.as_decimal(), dec!(1));
        assert_eq!(strong.margin, dec!(5000));
    }

    #[test]
    fn test_neutral_signal() {
        let sized = SizingPolicy::default()
            .size_position(SignalStrength::NEUTRAL, dec!(100000), px(dec!(50000)))
            .unwrap();
        assert_eq!(sized.leverage.value(), 6);
        // margin 3000 * 6 / 50000
        assert_eq!(sized.quantity.as_decimal(), dec!(0.36));
    }

    #[test]
    fn test_rejects_non_positive_equity() {
        let result = SizingPolicy::default().size_position(
            SignalStrength::NEUTRAL,
            dec!(0),
            px(dec!(50000)),
        );
        assert!(matches!(result, Err(EngineError::Sizing(_))));
    }

    #[test]
    fn test_tiny_equity_rounds_to_zero() {
        let result = SizingPolicy::default().size_position(
            SignalStrength::new(dec!(0)).unwrap(),
            dec!(0.001),
            px(dec!(50000)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_policy_validation() {
        assert!(SizingPolicy::default().validate().is_ok());
        let inverted = SizingPolicy {
            min_margin_fraction: dec!(0.1),
            max_margin_fraction: dec!(0.05),
            ..SizingPolicy::default()
        };
        assert!(inverted.validate().is_err());
    }
}
