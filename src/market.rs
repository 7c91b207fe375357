//! Market data value types: ticks, bars, timeframes
//!
//! All prices are fixed-point `i64` scaled by the owning symbol's digits.
//! Example: EURUSD (5 digits): 1.10523 -> 110523
//!          XAUUSD (2 digits): 2350.50 -> 235050

use crate::core_types::SymbolId;
use serde::{Deserialize, Serialize};

/// Bar timeframe. Each discriminant is the duration in minutes, which
/// makes arithmetic comparisons and conversions trivial.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    M1 = 1,
    M5 = 5,
    M15 = 15,
    M30 = 30,
    H1 = 60,
    H4 = 240,
    D1 = 1440,
    W1 = 10080,
    MN1 = 43200,
}

impl Timeframe {
    /// Duration in minutes.
    #[inline]
    pub fn minutes(self) -> u32 {
        self as u32
    }

    /// Duration in microseconds.
    #[inline]
    pub fn duration_us(self) -> i64 {
        self.minutes() as i64 * 60 * 1_000_000
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
            Timeframe::W1 => "W1",
            Timeframe::MN1 => "MN1",
        }
    }

    /// Reverse lookup from a minute count (used by the broadcast/WAL decode
    /// paths, which carry the raw u16).
    pub fn from_minutes(minutes: u32) -> Option<Timeframe> {
        match minutes {
            1 => Some(Timeframe::M1),
            5 => Some(Timeframe::M5),
            15 => Some(Timeframe::M15),
            30 => Some(Timeframe::M30),
            60 => Some(Timeframe::H1),
            240 => Some(Timeframe::H4),
            1440 => Some(Timeframe::D1),
            10080 => Some(Timeframe::W1),
            43200 => Some(Timeframe::MN1),
            _ => None,
        }
    }
}

/// A single bid/ask price quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp_us: i64,
    pub symbol_id: SymbolId,
    /// Bid price (fixed-point: value x 10^digits)
    pub bid: i64,
    /// Ask price (fixed-point: value x 10^digits)
    pub ask: i64,
    pub bid_volume: i64,
    pub ask_volume: i64,
    /// Spread in points (ask - bid in price units)
    pub spread_points: i32,
}

impl Tick {
    pub fn new(
        timestamp_us: i64,
        symbol_id: SymbolId,
        bid: i64,
        ask: i64,
        bid_volume: i64,
        ask_volume: i64,
    ) -> Self {
        Self {
            timestamp_us,
            symbol_id,
            bid,
            ask,
            bid_volume,
            ask_volume,
            spread_points: (ask - bid) as i32,
        }
    }

    /// Basic sanity: bid positive and ask at or above bid.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.bid > 0 && self.ask >= self.bid
    }

    #[inline]
    pub fn mid_price(&self) -> i64 {
        (self.bid + self.ask) / 2
    }
}

/// OHLCV candlestick bar. `timestamp_us` is the bar open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp_us: i64,
    pub symbol_id: SymbolId,
    pub timeframe: Timeframe,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub close: i64,
    pub tick_volume: i64,
    pub real_volume: i64,
    pub spread_points: i32,
}

impl Bar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp_us: i64,
        symbol_id: SymbolId,
        timeframe: Timeframe,
        open: i64,
        high: i64,
        low: i64,
        close: i64,
        tick_volume: i64,
    ) -> Self {
        Self {
            timestamp_us,
            symbol_id,
            timeframe,
            open,
            high,
            low,
            close,
            tick_volume,
            real_volume: 0,
            spread_points: 0,
        }
    }

    /// OHLC relationship: high bounds both open and close from above,
    /// low from below, and high >= low.
    #[inline]
    pub fn is_valid(&self) -> bool {
        let max_oc = self.open.max(self.close);
        let min_oc = self.open.min(self.close);
        self.high >= max_oc && self.low <= min_oc && self.high >= self.low
    }

    #[inline]
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    #[inline]
    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    #[inline]
    pub fn range(&self) -> i64 {
        self.high - self.low
    }

    #[inline]
    pub fn body(&self) -> i64 {
        (self.close - self.open).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_validity() {
        let good = Tick::new(1_000_000, 1, 110000, 110015, 0, 0);
        assert!(good.is_valid());
        assert_eq!(good.spread_points, 15);
        assert_eq!(good.mid_price(), 110007);

        let crossed = Tick::new(1_000_000, 1, 110015, 110000, 0, 0);
        assert!(!crossed.is_valid());

        let zero_bid = Tick::new(1_000_000, 1, 0, 110015, 0, 0);
        assert!(!zero_bid.is_valid());
    }

    #[test]
    fn test_bar_validity() {
        let good = Bar::new(0, 1, Timeframe::M1, 110000, 110100, 109900, 110050, 100);
        assert!(good.is_valid());
        assert!(good.is_bullish());
        assert_eq!(good.range(), 200);
        assert_eq!(good.body(), 50);

        // High below close
        let bad = Bar::new(0, 1, Timeframe::M1, 110000, 110020, 109900, 110050, 100);
        assert!(!bad.is_valid());

        // Low above open
        let bad2 = Bar::new(0, 1, Timeframe::M1, 110000, 110100, 110010, 110050, 100);
        assert!(!bad2.is_valid());
    }

    #[test]
    fn test_timeframe_minutes() {
        assert_eq!(Timeframe::M1.minutes(), 1);
        assert_eq!(Timeframe::H4.minutes(), 240);
        assert_eq!(Timeframe::MN1.minutes(), 43200);
        assert_eq!(Timeframe::H1.duration_us(), 3_600_000_000);
        assert_eq!(Timeframe::from_minutes(10080), Some(Timeframe::W1));
        assert_eq!(Timeframe::from_minutes(7), None);
        assert_eq!(Timeframe::D1.as_str(), "D1");
    }
}
