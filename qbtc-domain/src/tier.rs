//! Tier classification
//!
//! Every tradable symbol belongs to exactly one tier, and every tier carries a
//! maximum allocation fraction of total equity. The table is validated at
//! construction so lookups never have to deal with ambiguity.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::value_objects::{DomainError, Symbol};

/// Classification bucket for exposure limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    /// Majors
    Tier1,
    /// Large caps
    Tier2,
    /// Mid caps
    Tier3,
    /// Tier 4
    Tier4,
    /// Tier 5
    Tier5,
    /// Tier 6
    Tier6,
}

impl Tier {
    /// All tiers in order
    pub const ALL: [Tier; 6] =
        [Tier::Tier1, Tier::Tier2, Tier::Tier3, Tier::Tier4, Tier::Tier5, Tier::Tier6];

    /// Parse "TIER1".."TIER6" (case-insensitive)
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.to_uppercase().as_str() {
            "TIER1" => Ok(Tier::Tier1),
            "TIER2" => Ok(Tier::Tier2),
            "TIER3" => Ok(Tier::Tier3),
            "TIER4" => Ok(Tier::Tier4),
            "TIER5" => Ok(Tier::Tier5),
            "TIER6" => Ok(Tier::Tier6),
            other => Err(DomainError::InvalidTierConfig(format!("unknown tier: {}", other))),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            Tier::Tier1 => 1,
            Tier::Tier2 => 2,
            Tier::Tier3 => 3,
            Tier::Tier4 => 4,
            Tier::Tier5 => 5,
            Tier::Tier6 => 6,
        };
        write!(f, "TIER{}", n)
    }
}

/// Symbol -> tier assignment plus tier -> allocation cap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    fractions: BTreeMap<Tier, Decimal>,
    symbols: BTreeMap<String, Tier>,
}

impl TierTable {
    /// Build a validated table.
    ///
    /// # Errors
    /// - a fraction outside (0, 1]
    /// - fractions summing above 1
    /// - a symbol listed under two tiers
    /// - a symbol assigned to a tier without a fraction
    pub fn new(
        fractions: impl IntoIterator<Item = (Tier, Decimal)>,
        assignments: impl IntoIterator<Item = (Symbol, Tier)>,
    ) -> Result<Self, DomainError> {
        let mut fraction_map = BTreeMap::new();
        for (tier, fraction) in fractions {
            if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
                return Err(DomainError::InvalidTierConfig(format!(
                    "{} allocation must be in (0, 1], got {}",
                    tier, fraction
                )));
            }
            fraction_map.insert(tier, fraction);
        }

        let total: Decimal = fraction_map.values().sum();
        if total > Decimal::ONE {
            return Err(DomainError::InvalidTierConfig(format!(
                "tier allocations sum to {}, must not exceed 1",
                total
            )));
        }

        let mut symbols = BTreeMap::new();
        for (symbol, tier) in assignments {
            if !fraction_map.contains_key(&tier) {
                return Err(DomainError::InvalidTierConfig(format!(
                    "{} assigned to {} which has no allocation",
                    symbol, tier
                )));
            }
            if let Some(existing) = symbols.insert(symbol.as_pair(), tier) {
                if existing != tier {
                    return Err(DomainError::InvalidTierConfig(format!(
                        "{} assigned to both {} and {}",
                        symbol, existing, tier
                    )));
                }
            }
        }

        Ok(Self { fractions: fraction_map, symbols })
    }

    /// Tier of a symbol
    ///
    /// # Errors
    /// `DomainError::UnknownSymbol` when the symbol is not in the table
    pub fn tier_of(&self, symbol: &Symbol) -> Result<Tier, DomainError> {
        self.symbols
            .get(&symbol.as_pair())
            .copied()
            .ok_or_else(|| DomainError::UnknownSymbol(symbol.as_pair()))
    }

    /// Allocation cap of a tier as a fraction of equity (0 if unconfigured)
    pub fn fraction(&self, tier: Tier) -> Decimal {
        self.fractions.get(&tier).copied().unwrap_or(Decimal::ZERO)
    }

    /// Configured tiers with their fractions, in tier order
    pub fn tiers(&self) -> impl Iterator<Item = (Tier, Decimal)> + '_ {
        self.fractions.iter().map(|(tier, fraction)| (*tier, *fraction))
    }

    /// Symbols assigned to a tier
    pub fn symbols_in(&self, tier: Tier) -> Vec<String> {
        self.symbols
            .iter()
            .filter(|(_, t)| **t == tier)
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }
}

impl Default for TierTable {
    fn default() -> Self {
        let layout: [(Tier, Decimal, &[&str]); 6] = [
            (Tier::Tier1, dec!(0.30), &["BTCUSDT", "ETHUSDT"]),
            (Tier::Tier2, dec!(0.25), &["BNBUSDT", "SOLUSDT", "XRPUSDT"]),
            (Tier::Tier3, dec!(0.20), &["ADAUSDT", "DOGEUSDT", "AVAXUSDT"]),
            (Tier::Tier4, dec!(0.12), &["DOTUSDT", "LINKUSDT", "MATICUSDT"]),
            (Tier::Tier5, dec!(0.08), &["LTCUSDT", "ATOMUSDT", "UNIUSDT"]),
            (Tier::Tier6, dec!(0.05), &["FILUSDT", "NEARUSDT", "APTUSDT"]),
        ];

        let mut fractions = BTreeMap::new();
        let mut symbols = BTreeMap::new();
        for (tier, fraction, pairs) in layout {
            fractions.insert(tier, fraction);
            for pair in pairs {
                symbols.insert((*pair).to_string(), tier);
            }
        }
        Self { fractions, symbols }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(pair: &str) -> Symbol {
        Symbol::from_pair(pair).unwrap()
    }

    #[test]
    fn test_default_table_lookup() {
        let table = TierTable::default();
        assert_eq!(table.tier_of(&sym("BTCUSDT")).unwrap(), Tier::Tier1);
        assert_eq!(table.tier_of(&sym("SOLUSDT")).unwrap(), Tier::Tier2);
        assert_eq!(table.tier_of(&sym("APTUSDT")).unwrap(), Tier::Tier6);
        assert_eq!(table.fraction(Tier::Tier1), dec!(0.30));

        let total: Decimal = table.tiers().map(|(_, f)| f).sum();
        assert_eq!(total, Decimal::ONE);
    }

    #[test]
    fn test_unknown_symbol() {
        let table = TierTable::default();
        let err = table.tier_of(&sym("PEPEUSDT")).unwrap_err();
        assert_eq!(err, DomainError::UnknownSymbol("PEPEUSDT".to_string()));
        assert_eq!(err.to_string(), "unknown symbol: PEPEUSDT");
    }

    #[test]
    fn test_duplicate_assignment_rejected() {
        let result = TierTable::new(
            [(Tier::Tier1, dec!(0.5)), (Tier::Tier2, dec!(0.5))],
            [(sym("BTCUSDT"), Tier::Tier1), (sym("BTCUSDT"), Tier::Tier2)],
        );
        assert!(matches!(result, Err(DomainError::InvalidTierConfig(_))));
    }

    #[test]
    fn test_fraction_bounds() {
        assert!(TierTable::new([(Tier::Tier1, dec!(0))], []).is_err());
        assert!(TierTable::new([(Tier::Tier1, dec!(0.7)), (Tier::Tier2, dec!(0.4))], []).is_err());
        assert!(TierTable::new([(Tier::Tier1, dec!(1))], [(sym("BTCUSDT"), Tier::Tier1)]).is_ok());
    }

    #[test]
    fn test_assignment_requires_fraction() {
        let result = TierTable::new([(Tier::Tier1, dec!(0.3))], [(sym("SOLUSDT"), Tier::Tier2)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_tier_display_and_serde() {
        assert_eq!(Tier::Tier3.to_string(), "TIER3");
        assert_eq!(serde_json::to_string(&Tier::Tier1).unwrap(), "\"TIER1\"");
        assert_eq!(Tier::parse("tier4").unwrap(), Tier::Tier4);
    }
}
