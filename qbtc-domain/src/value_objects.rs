//! Value Objects for the QBTC domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time, including
//! when they are deserialized from API payloads.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound for a price. Keeps `price * quantity * leverage` well inside
/// the `Decimal` range.
pub const MAX_PRICE: Decimal = dec!(1000000000000);

/// Upper bound for a quantity
pub const MAX_QUANTITY: Decimal = dec!(1000000000000);

/// Domain errors for value object and entity validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Price must be positive
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    /// Quantity must be positive
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Symbol must be valid trading pair
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Symbol is well formed but not assigned to any tier
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Leverage outside the supported range
    #[error("Invalid leverage: {0}")]
    InvalidLeverage(String),

    /// Signal strength outside [0, 1]
    #[error("Invalid signal strength: {0}")]
    InvalidSignalStrength(String),

    /// Tier table misconfiguration
    #[error("Invalid tier configuration: {0}")]
    InvalidTierConfig(String),

    /// Order request failed validation
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Invalid state transition
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

// =============================================================================
// Price
// =============================================================================

/// Price represents a positive decimal price
///
/// # Invariants
/// - Must be > 0
/// - Must not exceed [`MAX_PRICE`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    /// Create a new Price with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPrice` if value <= 0 or above `MAX_PRICE`
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidPrice("Price must be positive".to_string()));
        }
        if value > MAX_PRICE {
            return Err(DomainError::InvalidPrice(format!("{} exceeds {}", value, MAX_PRICE)));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Price {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self {
        price.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Quantity
// =============================================================================

/// Quantity represents a positive decimal quantity (base asset units)
///
/// # Invariants
/// - Must be > 0
/// - Must not exceed [`MAX_QUANTITY`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl Quantity {
    /// Create a new Quantity with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidQuantity` if value <= 0 or above `MAX_QUANTITY`
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidQuantity("Quantity must be positive".to_string()));
        }
        if value > MAX_QUANTITY {
            return Err(DomainError::InvalidQuantity(format!(
                "{} exceeds {}",
                value, MAX_QUANTITY
            )));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Quantity {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(quantity: Quantity) -> Self {
        quantity.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Symbol
// =============================================================================

/// Symbol represents a trading pair (e.g., BTCUSDT)
///
/// Serialized as the pair string (`"BTCUSDT"`).
///
/// # Invariants
/// - Must be valid format (base + quote)
/// - Base and quote must be non-empty
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol {
    base: String,
    quote: String,
}

impl Symbol {
    /// Create a Symbol from a trading pair string
    ///
    /// # Examples
    /// ```
    /// # use qbtc_domain::value_objects::Symbol;
    /// let symbol = Symbol::from_pair("btcusdt").unwrap();
    /// assert_eq!(symbol.base(), "BTC");
    /// assert_eq!(symbol.quote(), "USDT");
    /// ```
    ///
    /// # Errors
    /// Returns `DomainError::InvalidSymbol` if format is invalid
    pub fn from_pair(pair: &str) -> Result<Self, DomainError> {
        const QUOTE_CURRENCIES: &[&str] = &["USDT", "BUSD", "USDC", "BTC", "ETH", "BNB"];

        let pair = pair.trim().to_uppercase();
        if !pair.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::InvalidSymbol(format!("Cannot parse trading pair: {}", pair)));
        }

        for quote in QUOTE_CURRENCIES {
            if let Some(base) = pair.strip_suffix(quote) {
                if !base.is_empty() {
                    return Ok(Self {
                        base: base.to_string(),
                        quote: quote.to_string(),
                    });
                }
            }
        }

        Err(DomainError::InvalidSymbol(format!("Cannot parse trading pair: {}", pair)))
    }

    /// Get the base currency
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Get the quote currency
    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// Get the trading pair as string (e.g., "BTCUSDT")
    pub fn as_pair(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    /// Lowercase pair, as used in stream names
    pub fn stream_name(&self) -> String {
        self.as_pair().to_lowercase()
    }
}

impl TryFrom<String> for Symbol {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_pair(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.as_pair()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base, self.quote)
    }
}

// =============================================================================
// Side
// =============================================================================

/// Side represents the position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Long position (buy low, sell high)
    Long,
    /// Short position (sell high, buy low)
    Short,
}

impl Side {
    /// PnL direction: +1 for Long, -1 for Short
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Get the entry action for this side
    ///
    /// Long → Buy, Short → Sell
    pub fn entry_action(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Get the exit action for this side
    ///
    /// Long → Sell, Short → Buy
    pub fn exit_action(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }

    /// Parse "LONG"/"BUY" or "SHORT"/"SELL" (case-insensitive)
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.to_uppercase().as_str() {
            "LONG" | "BUY" => Ok(Side::Long),
            "SHORT" | "SELL" => Ok(Side::Short),
            other => Err(DomainError::InvalidOrder(format!(
                "Invalid side: {}. Expected: LONG or SHORT",
                other
            ))),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// OrderSide represents the order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    /// Buy order
    Buy,
    /// Sell order
    Sell,
}

impl OrderSide {
    /// Position side this order opens or adds to
    pub fn as_position_side(&self) -> Side {
        match self {
            OrderSide::Buy => Side::Long,
            OrderSide::Sell => Side::Short,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

// =============================================================================
// Leverage
// =============================================================================

/// Leverage multiplier for a futures position
///
/// # Invariants
/// - Between 1x and 125x (exchange maximum)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Leverage(u8);

impl Leverage {
    /// Highest leverage the exchange accepts
    pub const MAX: u8 = 125;

    /// Create a validated leverage
    ///
    /// # Errors
    /// Returns `DomainError::InvalidLeverage` outside 1..=125
    pub fn new(value: u8) -> Result<Self, DomainError> {
        if value == 0 || value > Self::MAX {
            return Err(DomainError::InvalidLeverage(format!(
                "Leverage must be between 1 and {}, got {}",
                Self::MAX,
                value
            )));
        }
        Ok(Self(value))
    }

    /// Compile-time constructor for known-good constants
    ///
    /// Panics (at compile time when used in a const) outside 1..=125.
    pub const fn new_const(value: u8) -> Self {
        assert!(value >= 1 && value <= Self::MAX, "leverage out of range");
        Self(value)
    }

    /// Raw multiplier
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Multiplier as Decimal (for margin math)
    pub fn as_decimal(&self) -> Decimal {
        Decimal::from(self.0)
    }
}

impl TryFrom<u8> for Leverage {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Leverage> for u8 {
    fn from(leverage: Leverage) -> Self {
        leverage.0
    }
}

impl fmt::Display for Leverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

// =============================================================================
// SignalStrength
// =============================================================================

/// Strength of a trading signal in [0, 1]
///
/// The only input the sizing policy accepts from signal producers. Producers
/// are pluggable; the domain only guarantees the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct SignalStrength(Decimal);

impl SignalStrength {
    /// Neutral mid-point signal
    pub const NEUTRAL: Self = Self(Decimal::from_parts(5, 0, 0, false, 1));

    /// Create a validated signal strength
    ///
    /// # Errors
    /// Returns `DomainError::InvalidSignalStrength` outside [0, 1]
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value < Decimal::ZERO || value > Decimal::ONE {
            return Err(DomainError::InvalidSignalStrength(format!(
                "Signal strength must be within [0, 1], got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Clamp an arbitrary value into [0, 1]
    pub fn clamped(value: Decimal) -> Self {
        Self(value.max(Decimal::ZERO).min(Decimal::ONE))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl Default for SignalStrength {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl TryFrom<Decimal> for SignalStrength {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SignalStrength> for Decimal {
    fn from(strength: SignalStrength) -> Self {
        strength.0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_validation() {
        assert!(Price::new(dec!(50000)).is_ok());
        assert!(Price::new(Decimal::ZERO).is_err());
        assert!(Price::new(dec!(-1)).is_err());
    }

    #[test]
    fn test_price_deserialize_rejects_non_positive() {
        let ok: Result<Price, _> = serde_json::from_str("\"51000.5\"");
        assert_eq!(ok.unwrap().as_decimal(), dec!(51000.5));

        let bad: Result<Price, _> = serde_json::from_str("\"0\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_quantity_validation() {
        assert!(Quantity::new(dec!(0.001)).is_ok());
        assert!(Quantity::new(Decimal::ZERO).is_err());
    }

    #[test]
    fn test_oversized_values_rejected() {
        assert!(Price::new(MAX_PRICE).is_ok());
        assert!(Price::new(MAX_PRICE + Decimal::ONE).is_err());
        assert!(Quantity::new(MAX_QUANTITY).is_ok());
        assert!(matches!(
            Quantity::new(dec!(10000000000000000000000000)),
            Err(DomainError::InvalidQuantity(_))
        ));

        let bad: Result<Quantity, _> = serde_json::from_str("\"10000000000000000000000000\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_symbol_from_pair() {
        let symbol = Symbol::from_pair("ETHUSDT").unwrap();
        assert_eq!(symbol.base(), "ETH");
        assert_eq!(symbol.quote(), "USDT");
        assert_eq!(symbol.as_pair(), "ETHUSDT");
        assert_eq!(symbol.stream_name(), "ethusdt");

        let cross = Symbol::from_pair("ETHBTC").unwrap();
        assert_eq!(cross.quote(), "BTC");
    }

    #[test]
    fn test_symbol_invalid() {
        assert!(Symbol::from_pair("USDT").is_err());
        assert!(Symbol::from_pair("BTC-USD").is_err());
        assert!(Symbol::from_pair("").is_err());
    }

    #[test]
    fn test_symbol_serializes_as_pair() {
        let symbol = Symbol::from_pair("BTCUSDT").unwrap();
        assert_eq!(serde_json::to_string(&symbol).unwrap(), "\"BTCUSDT\"");

        let parsed: Symbol = serde_json::from_str("\"solusdt\"").unwrap();
        assert_eq!(parsed.as_pair(), "SOLUSDT");
    }

    #[test]
    fn test_side_sign_and_actions() {
        assert_eq!(Side::Long.sign(), Decimal::ONE);
        assert_eq!(Side::Short.sign(), Decimal::NEGATIVE_ONE);
        assert_eq!(Side::Long.entry_action(), OrderSide::Buy);
        assert_eq!(Side::Long.exit_action(), OrderSide::Sell);
        assert_eq!(Side::Short.entry_action(), OrderSide::Sell);
        assert_eq!(Side::Short.exit_action(), OrderSide::Buy);
    }

    #[test]
    fn test_side_parse_and_serde() {
        assert_eq!(Side::parse("buy").unwrap(), Side::Long);
        assert_eq!(Side::parse("SHORT").unwrap(), Side::Short);
        assert!(Side::parse("sideways").is_err());
        assert_eq!(serde_json::to_string(&Side::Short).unwrap(), "\"SHORT\"");
    }

    #[test]
    fn test_leverage_bounds() {
        assert!(Leverage::new(0).is_err());
        assert!(Leverage::new(126).is_err());
        assert_eq!(Leverage::new(10).unwrap().as_decimal(), dec!(10));
        assert_eq!(Leverage::new(20).unwrap().to_string(), "20x");
    }

    #[test]
    fn test_signal_strength_range() {
        assert!(SignalStrength::new(dec!(0)).is_ok());
        assert!(SignalStrength::new(dec!(1)).is_ok());
        assert!(SignalStrength::new(dec!(1.01)).is_err());
        assert!(SignalStrength::new(dec!(-0.1)).is_err());
        assert_eq!(SignalStrength::clamped(dec!(3)).as_decimal(), dec!(1));
        assert_eq!(SignalStrength::default().as_decimal(), dec!(0.5));
    }
}
