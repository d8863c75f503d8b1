//! Stop Logic (Pure Functions)
//!
//! Pure functions for ratcheting trailing stops and checking exit levels.
//! All functions are deterministic and have no side effects.
//!
//! # Trailing Stop Algorithm
//!
//! The stop trails the best price seen by a fixed distance:
//! - LONG: Stop = high_water_mark - distance
//! - SHORT: Stop = low_water_mark + distance
//!
//! Key invariants:
//! - Stop is monotonic (never loosens)
//! - Favorable extreme is monotonic (peak only rises, trough only falls)
//! - Stop is only updated when the candidate is strictly tighter

use crate::value_objects::{Price, Side};
use rust_decimal::Decimal;

/// Result of a trailing stop ratchet
///
/// Returned only when the stop actually moves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailingStopUpdate {
    /// New stop price
    pub new_stop: Price,
    /// New favorable extreme (peak for Long, trough for Short)
    pub new_favorable_extreme: Price,
}

/// Ratchet a trailing stop toward price.
///
/// # Arguments
///
/// * `side` - Position side
/// * `current_price` - Latest mark
/// * `high_water_mark` - Best price seen so far (peak for Long, trough for Short)
/// * `current_stop` - Stop level currently in force
/// * `distance` - Trailing distance in quote currency
///
/// # Returns
///
/// * `Some(TrailingStopUpdate)` - candidate stop is strictly tighter than `current_stop`
/// * `None` - stop stays where it is
///
/// ```text
/// LONG:  peak = max(current, high_water);  candidate = peak - distance;  move if candidate > stop
/// SHORT: low  = min(current, high_water);  candidate = low  + distance;  move if candidate < stop
/// ```
///
/// # Examples
///
/// ```
/// # use qbtc_domain::trailing::ratchet_trailing_stop;
/// # use qbtc_domain::value_objects::{Price, Side};
/// # use rust_decimal_macros::dec;
/// let stop = Price::new(dec!(49000)).unwrap();
/// let peak = Price::new(dec!(50000)).unwrap();
///
/// // Price rises to 51,000: stop follows to 50,000
/// let price = Price::new(dec!(51000)).unwrap();
/// let update = ratchet_trailing_stop(Side::Long, price, peak, stop, dec!(1000)).unwrap();
/// assert_eq!(update.new_stop.as_decimal(), dec!(50000));
///
/// // Pullback to 50,500: no change
/// assert!(ratchet_trailing_stop(
///     Side::Long,
///     Price::new(dec!(50500)).unwrap(),
///     update.new_favorable_extreme,
///     update.new_stop,
///     dec!(1000),
/// )
/// .is_none());
/// ```
pub fn ratchet_trailing_stop(
    side: Side,
    current_price: Price,
    high_water_mark: Price,
    current_stop: Price,
    distance: Decimal,
) -> Option<TrailingStopUpdate> {
    if distance <= Decimal::ZERO {
        return None;
    }

    match side {
        Side::Long => {
            let new_peak = current_price.max(high_water_mark);
            let candidate = new_peak.as_decimal() - distance;

            if candidate > current_stop.as_decimal() {
                // candidate > stop > 0, so always a valid price
                Price::new(candidate).ok().map(|new_stop| TrailingStopUpdate {
                    new_stop,
                    new_favorable_extreme: new_peak,
                })
            } else {
                None
            }
        },
        Side::Short => {
            let new_low = current_price.min(high_water_mark);
            let candidate = new_low.as_decimal() + distance;

            if candidate < current_stop.as_decimal() {
                Price::new(candidate).ok().map(|new_stop| TrailingStopUpdate {
                    new_stop,
                    new_favorable_extreme: new_low,
                })
            } else {
                None
            }
        },
    }
}

/// Check if a stop level is hit
///
/// LONG exits when price <= stop, SHORT when price >= stop.
///
/// ```
/// # use qbtc_domain::trailing::is_stop_hit;
/// # use qbtc_domain::value_objects::{Price, Side};
/// # use rust_decimal_macros::dec;
/// let stop = Price::new(dec!(49000)).unwrap();
/// assert!(is_stop_hit(Side::Long, Price::new(dec!(49000)).unwrap(), stop));
/// assert!(!is_stop_hit(Side::Long, Price::new(dec!(49001)).unwrap(), stop));
/// assert!(is_stop_hit(Side::Short, Price::new(dec!(49500)).unwrap(), stop));
/// ```
pub fn is_stop_hit(side: Side, current_price: Price, stop: Price) -> bool {
    match side {
        Side::Long => current_price <= stop,
        Side::Short => current_price >= stop,
    }
}

/// Check if a take-profit target is reached
///
/// LONG exits when price >= target, SHORT when price <= target.
pub fn is_take_profit_hit(side: Side, current_price: Price, target: Price) -> bool {
    match side {
        Side::Long => current_price >= target,
        Side::Short => current_price <= target,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn px(value: Decimal) -> Price {
        Price::new(value).unwrap()
    }

    // =========================================================================
    // LONG Position Tests
    // =========================================================================

    #[test]
    fn test_long_stop_moves_up_on_new_high() {
        let result = ratchet_trailing_stop(
            Side::Long,
            px(dec!(96500)),
            px(dec!(95000)),
            px(dec!(93500)),
            dec!(1500),
        );

        let update = result.unwrap();
        assert_eq!(update.new_stop.as_decimal(), dec!(95000));
        assert_eq!(update.new_favorable_extreme.as_decimal(), dec!(96500));
    }

    #[test]
    fn test_long_no_update_below_extreme() {
        let result = ratchet_trailing_stop(
            Side::Long,
            px(dec!(95500)),
            px(dec!(96500)),
            px(dec!(95000)),
            dec!(1500),
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_long_sequence() {
        let mut stop = px(dec!(93500));
        let mut extreme = px(dec!(95000));

        let prices = [dec!(96000), dec!(97000), dec!(98000)];
        let expected = [dec!(94500), dec!(95500), dec!(96500)];

        for (price, want) in prices.iter().zip(expected) {
            let update =
                ratchet_trailing_stop(Side::Long, px(*price), extreme, stop, dec!(1500)).unwrap();
            assert_eq!(update.new_stop.as_decimal(), want);
            stop = update.new_stop;
            extreme = update.new_favorable_extreme;
        }
    }

    #[test]
    fn test_wide_initial_stop_not_loosened() {
        // Stop placed tighter than the trailing distance would put it
        let result = ratchet_trailing_stop(
            Side::Long,
            px(dec!(50500)),
            px(dec!(50000)),
            px(dec!(49800)),
            dec!(1000),
        );
        assert!(result.is_none());
    }

    // =========================================================================
    // SHORT Position Tests
    // =========================================================================

    #[test]
    fn test_short_stop_moves_down_on_new_low() {
        let update = ratchet_trailing_stop(
            Side::Short,
            px(dec!(93500)),
            px(dec!(95000)),
            px(dec!(96500)),
            dec!(1500),
        )
        .unwrap();
        assert_eq!(update.new_stop.as_decimal(), dec!(95000));
        assert_eq!(update.new_favorable_extreme.as_decimal(), dec!(93500));
    }

    #[test]
    fn test_short_never_goes_up() {
        let result = ratchet_trailing_stop(
            Side::Short,
            px(dec!(95000)),
            px(dec!(93500)),
            px(dec!(95000)),
            dec!(1500),
        );
        assert!(result.is_none());
    }

    // =========================================================================
    // Exit checks
    // =========================================================================

    #[test]
    fn test_stop_hit_boundaries() {
        let stop = px(dec!(95000));
        assert!(is_stop_hit(Side::Long, px(dec!(95000)), stop));
        assert!(is_stop_hit(Side::Long, px(dec!(94900)), stop));
        assert!(!is_stop_hit(Side::Long, px(dec!(95100)), stop));

        assert!(is_stop_hit(Side::Short, px(dec!(95000)), stop));
        assert!(is_stop_hit(Side::Short, px(dec!(95100)), stop));
        assert!(!is_stop_hit(Side::Short, px(dec!(94900)), stop));
    }

    #[test]
    fn test_take_profit_boundaries() {
        let target = px(dec!(55000));
        assert!(is_take_profit_hit(Side::Long, px(dec!(55000)), target));
        assert!(!is_take_profit_hit(Side::Long, px(dec!(54999)), target));
        assert!(is_take_profit_hit(Side::Short, px(dec!(54000)), target));
        assert!(!is_take_profit_hit(Side::Short, px(dec!(55001)), target));
    }

    #[test]
    fn test_zero_distance_is_disabled() {
        let result = ratchet_trailing_stop(
            Side::Long,
            px(dec!(98000)),
            px(dec!(95000)),
            px(dec!(93500)),
            dec!(0),
        );
        assert!(result.is_none());
    }
}
