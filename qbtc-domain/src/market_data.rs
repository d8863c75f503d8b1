//! Market Data Types
//!
//! Exchange-agnostic market data used across QBTC.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Symbol;

// =============================================================================
// Ticks
// =============================================================================

/// Last-price update (24h ticker or trade)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Trading symbol
    pub symbol: Symbol,
    /// Last traded price
    pub price: Decimal,
    /// 24h base volume, when the source provides it
    pub volume: Option<Decimal>,
    /// 24h change percent, when the source provides it
    pub change_pct: Option<Decimal>,
    /// Exchange event time
    pub timestamp: DateTime<Utc>,
}

/// Best bid/ask update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookTicker {
    /// Trading symbol
    pub symbol: Symbol,
    /// Best bid price
    pub bid_price: Decimal,
    /// Best bid quantity
    pub bid_qty: Decimal,
    /// Best ask price
    pub ask_price: Decimal,
    /// Best ask quantity
    pub ask_qty: Decimal,
    /// Event time
    pub timestamp: DateTime<Utc>,
}

impl BookTicker {
    /// (bid + ask) / 2
    pub fn mid(&self) -> Decimal {
        (self.bid_price + self.ask_price) / Decimal::from(2)
    }
}

/// Mark price and funding update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPrice {
    /// Trading symbol
    pub symbol: Symbol,
    /// Mark price used for margin
    pub mark_price: Decimal,
    /// Index price
    pub index_price: Option<Decimal>,
    /// Current funding rate
    pub funding_rate: Option<Decimal>,
    /// Next funding time
    pub next_funding_time: Option<DateTime<Utc>>,
    /// Event time
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Kline
// =============================================================================

/// OHLCV candlestick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    /// Trading symbol
    pub symbol: Symbol,
    /// Open price
    pub open: Decimal,
    /// High price
    pub high: Decimal,
    /// Low price
    pub low: Decimal,
    /// Close price
    pub close: Decimal,
    /// Base volume
    pub volume: Decimal,
    /// Number of trades
    pub trades: u64,
    /// Candle open time
    pub open_time: DateTime<Utc>,
    /// Candle close time
    pub close_time: DateTime<Utc>,
}

impl Kline {
    /// Midpoint of the candle range.
    pub fn midpoint(&self) -> Option<Decimal> {
        let mid = (self.high + self.low) / Decimal::from(2);
        if mid > Decimal::ZERO { Some(mid) } else { None }
    }
}

// =============================================================================
// Order Book
// =============================================================================

/// Snapshot of the order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    /// Trading symbol
    pub symbol: Symbol,
    /// Bids (price, quantity), best first
    pub bids: Vec<(Decimal, Decimal)>,
    /// Asks (price, quantity), best first
    pub asks: Vec<(Decimal, Decimal)>,
    /// Exchange update id
    pub last_update_id: u64,
    /// Snapshot time
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    /// Get the best bid price (highest bid).
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|(price, _)| *price)
    }

    /// Get the best ask price (lowest ask).
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|(price, _)| *price)
    }

    /// (best bid + best ask) / 2
    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }

    /// best ask - best bid
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }
}

// =============================================================================
// Market Data Event (unified feed)
// =============================================================================

/// Unified market data event from the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketDataEvent {
    /// Last price
    Price(PriceTick),
    /// Best bid/ask
    BookTicker(BookTicker),
    /// Mark price
    MarkPrice(MarkPrice),
    /// Closed or updating candle
    Kline(Kline),
}

impl MarketDataEvent {
    /// Get the symbol of the event.
    pub fn symbol(&self) -> &Symbol {
        match self {
            MarketDataEvent::Price(t) => &t.symbol,
            MarketDataEvent::BookTicker(b) => &b.symbol,
            MarketDataEvent::MarkPrice(m) => &m.symbol,
            MarketDataEvent::Kline(k) => &k.symbol,
        }
    }

    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MarketDataEvent::Price(t) => t.timestamp,
            MarketDataEvent::BookTicker(b) => b.timestamp,
            MarketDataEvent::MarkPrice(m) => m.timestamp,
            MarketDataEvent::Kline(k) => k.close_time,
        }
    }

    /// Best price estimate carried by the event.
    pub fn price(&self) -> Option<Decimal> {
        match self {
            MarketDataEvent::Price(t) => Some(t.price),
            MarketDataEvent::BookTicker(b) => Some(b.mid()),
            MarketDataEvent::MarkPrice(m) => Some(m.mark_price),
            MarketDataEvent::Kline(k) => Some(k.close),
        }
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
    fn test_order_book_best_prices() {
        let symbol = Symbol::from_pair("BTCUSDT").unwrap();
        let ob = OrderBook {
            symbol,
            bids: vec![(dec!(94999), dec!(1.0)), (dec!(94998), dec!(2.0))],
            asks: vec![(dec!(95001), dec!(1.0)), (dec!(95002), dec!(2.0))],
            last_update_id: 1,
            timestamp: Utc::now(),
        };

        assert_eq!(ob.best_bid(), Some(dec!(94999)));
        assert_eq!(ob.best_ask(), Some(dec!(95001)));
        assert_eq!(ob.mid(), Some(dec!(95000)));
        assert_eq!(ob.spread(), Some(dec!(2)));
    }

    #[test]
    fn test_empty_book_has_no_mid() {
        let ob = OrderBook {
            symbol: Symbol::from_pair("BTCUSDT").unwrap(),
            bids: vec![],
            asks: vec![(dec!(1), dec!(1))],
            last_update_id: 0,
            timestamp: Utc::now(),
        };
        assert_eq!(ob.mid(), None);
    }

    #[test]
    fn test_event_price_uses_book_mid() {
        let event = MarketDataEvent::BookTicker(BookTicker {
            symbol: Symbol::from_pair("ETHUSDT").unwrap(),
            bid_price: dec!(2999),
            bid_qty: dec!(3),
            ask_price: dec!(3001),
            ask_qty: dec!(4),
            timestamp: Utc::now(),
        });

        assert_eq!(event.symbol().as_pair(), "ETHUSDT");
        assert_eq!(event.price(), Some(dec!(3000)));
    }
}
