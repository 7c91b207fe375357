//! Symbol specification
//!
//! `SymbolSpec` is the contract descriptor for a tradable instrument:
//! digits, contract size, volume constraints, swap configuration, stop
//! distances and currencies. The descriptor part is immutable after
//! registration; the quote part (bid/ask/spread/session extrema) is
//! updated by the engine as ticks arrive.
//!
//! All prices are held fixed-point (value x 10^digits). One *point* is
//! therefore exactly 1 in fixed representation; `point()` as a double is
//! `10^-digits`.

use crate::core_types::SymbolId;
use crate::fixed;
use serde::{Deserialize, Serialize};

/// Swap calculation mode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapMode {
    /// Swap rate expressed in points per day
    Points = 0,
    /// Swap rate expressed as percent of position value per day
    Percentage = 1,
}

/// Trade-mode policy for a symbol.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeMode {
    Disabled = 0,
    LongOnly = 1,
    ShortOnly = 2,
    CloseOnly = 3,
    Full = 4,
}

/// Contract specification plus live quote state for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSpec {
    // Identification
    pub name: String,
    pub symbol_id: SymbolId,

    // Price formatting
    pub digits: i32,

    // Contract
    pub contract_size: i64,
    pub tick_size: f64,
    pub tick_value: f64,

    // Volume constraints (micro-lots: lots x 10^6)
    pub volume_min: i64,
    pub volume_max: i64,
    pub volume_step: i64,

    // Swap configuration
    pub swap_long: f64,
    pub swap_short: f64,
    pub swap_mode: SwapMode,
    /// Day of week carrying the triple swap (0 = Sunday, 3 = Wednesday)
    pub swap_rollover_day: u32,

    // Trading constraints
    pub trade_mode: TradeMode,
    /// Minimal SL/TP distance from market, in points
    pub stops_level: i32,
    /// Distance inside which order modification is frozen, in points
    pub freeze_level: i32,

    // Currencies
    pub currency_base: String,
    pub currency_profit: String,
    pub currency_margin: String,

    // Live quote state (fixed-point)
    pub bid: i64,
    pub ask: i64,
    pub spread_points: i32,
    pub bid_high: i64,
    pub bid_low: i64,
    pub ask_high: i64,
    pub ask_low: i64,
    pub quote_time_us: i64,
}

impl SymbolSpec {
    /// Create a spec with sane FX defaults; refine with the `with_*` setters
    /// during registration.
    pub fn new(name: &str, symbol_id: SymbolId, digits: i32) -> Self {
        Self {
            name: name.to_string(),
            symbol_id,
            digits,
            contract_size: 100_000,
            tick_size: fixed::to_double(1, digits),
            tick_value: 1.0,
            volume_min: fixed::from_double(0.01, 6),
            volume_max: fixed::from_double(100.0, 6),
            volume_step: fixed::from_double(0.01, 6),
            swap_long: 0.0,
            swap_short: 0.0,
            swap_mode: SwapMode::Points,
            swap_rollover_day: 3,
            trade_mode: TradeMode::Full,
            stops_level: 0,
            freeze_level: 0,
            currency_base: String::new(),
            currency_profit: String::new(),
            currency_margin: String::new(),
            bid: 0,
            ask: 0,
            spread_points: 0,
            bid_high: 0,
            bid_low: 0,
            ask_high: 0,
            ask_low: 0,
            quote_time_us: 0,
        }
    }

    pub fn with_contract_size(mut self, contract_size: i64) -> Self {
        self.contract_size = contract_size;
        self
    }

    /// Volume constraints in lots.
    pub fn with_volume_limits(mut self, min: f64, max: f64, step: f64) -> Self {
        self.volume_min = fixed::from_double(min, 6);
        self.volume_max = fixed::from_double(max, 6);
        self.volume_step = fixed::from_double(step, 6);
        self
    }

    pub fn with_currencies(mut self, base: &str, profit: &str, margin: &str) -> Self {
        self.currency_base = base.to_string();
        self.currency_profit = profit.to_string();
        self.currency_margin = margin.to_string();
        self
    }

    pub fn with_swap(mut self, long: f64, short: f64, mode: SwapMode) -> Self {
        self.swap_long = long;
        self.swap_short = short;
        self.swap_mode = mode;
        self
    }

    pub fn with_swap_rollover_day(mut self, day: u32) -> Self {
        self.swap_rollover_day = day;
        self
    }

    pub fn with_trade_mode(mut self, mode: TradeMode) -> Self {
        self.trade_mode = mode;
        self
    }

    pub fn with_stops_level(mut self, stops_level: i32, freeze_level: i32) -> Self {
        self.stops_level = stops_level;
        self.freeze_level = freeze_level;
        self
    }

    pub fn with_tick(mut self, tick_size: f64, tick_value: f64) -> Self {
        self.tick_size = tick_size;
        self.tick_value = tick_value;
        self
    }

    // --- Price conversion helpers ---

    /// Point size as a double (10^-digits).
    #[inline]
    pub fn point(&self) -> f64 {
        1.0 / fixed::pow10(self.digits) as f64
    }

    #[inline]
    pub fn price_to_fixed(&self, price: f64) -> i64 {
        fixed::from_double(price, self.digits)
    }

    #[inline]
    pub fn price_to_double(&self, price: i64) -> f64 {
        fixed::to_double(price, self.digits)
    }

    /// Round a double price to the symbol's digits.
    pub fn normalize_price(&self, price: f64) -> f64 {
        if self.digits <= 0 {
            return price;
        }
        let multiplier = fixed::pow10(self.digits) as f64;
        (price * multiplier).round() / multiplier
    }

    // --- Quote state ---

    /// Install a new quote: recompute spread in points, maintain the
    /// session high/low of bid and ask, stamp the quote time.
    pub fn update_price(&mut self, bid: f64, ask: f64, timestamp_us: i64) {
        self.bid = self.price_to_fixed(bid);
        self.ask = self.price_to_fixed(ask);
        self.spread_points = (self.ask - self.bid) as i32;
        self.quote_time_us = timestamp_us;

        if self.bid > self.bid_high || self.bid_high == 0 {
            self.bid_high = self.bid;
        }
        if self.bid < self.bid_low || self.bid_low == 0 {
            self.bid_low = self.bid;
        }
        if self.ask > self.ask_high || self.ask_high == 0 {
            self.ask_high = self.ask;
        }
        if self.ask < self.ask_low || self.ask_low == 0 {
            self.ask_low = self.ask;
        }
    }

    #[inline]
    pub fn bid_f64(&self) -> f64 {
        self.price_to_double(self.bid)
    }

    #[inline]
    pub fn ask_f64(&self) -> f64 {
        self.price_to_double(self.ask)
    }

    pub fn has_quote(&self) -> bool {
        self.bid > 0 && self.ask > 0
    }

    // --- Volume validation ---

    /// Validate a volume in lots against the symbol constraints.
    ///
    /// Returns the volume in micro-lots aligned to the step grid anchored
    /// at `volume_min`, or `None` when outside `[volume_min, volume_max]`.
    pub fn validate_volume(&self, lots: f64) -> Option<i64> {
        let micro = fixed::from_double(lots, 6);
        if micro < self.volume_min || micro > self.volume_max {
            return None;
        }
        if self.volume_step <= 0 {
            return Some(micro);
        }
        let steps = fixed::div_int(micro - self.volume_min, self.volume_step);
        let aligned = self.volume_min + steps * self.volume_step;
        Some(fixed::clamp(aligned, self.volume_min, self.volume_max))
    }

    /// Volume in lots for a micro-lot quantity.
    #[inline]
    pub fn volume_to_lots(volume: i64) -> f64 {
        fixed::to_double(volume, 6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eurusd() -> SymbolSpec {
        SymbolSpec::new("EURUSD", 1, 5)
            .with_contract_size(100_000)
            .with_volume_limits(0.01, 100.0, 0.01)
            .with_currencies("EUR", "USD", "USD")
    }

    #[test]
    fn test_update_price_spread_and_session() {
        let mut spec = eurusd();
        spec.update_price(1.10000, 1.10015, 1_000_000);
        assert_eq!(spec.bid, 110000);
        assert_eq!(spec.ask, 110015);
        assert_eq!(spec.spread_points, 15);
        assert_eq!(spec.quote_time_us, 1_000_000);

        spec.update_price(1.10100, 1.10115, 2_000_000);
        assert_eq!(spec.bid_high, 110100);
        assert_eq!(spec.bid_low, 110000);
        assert_eq!(spec.ask_high, 110115);
        assert_eq!(spec.ask_low, 110015);
    }

    #[test]
    fn test_normalize_price() {
        let spec = eurusd();
        assert_eq!(spec.normalize_price(1.100004), 1.10000);
        assert_eq!(spec.normalize_price(1.100006), 1.10001);
    }

    #[test]
    fn test_validate_volume() {
        let spec = eurusd();
        assert_eq!(spec.validate_volume(0.1), Some(100_000));
        assert_eq!(spec.validate_volume(0.01), Some(10_000));
        assert_eq!(spec.validate_volume(100.0), Some(100_000_000));
        // Out of range
        assert_eq!(spec.validate_volume(0.001), None);
        assert_eq!(spec.validate_volume(100.01), None);
        // Aligned to step grid (0.015 rounds to 0.02 from min 0.01)
        assert_eq!(spec.validate_volume(0.015), Some(20_000));
        assert_eq!(spec.validate_volume(0.014), Some(10_000));
    }

    #[test]
    fn test_point() {
        let spec = eurusd();
        assert!((spec.point() - 0.00001).abs() < 1e-12);
        let gold = SymbolSpec::new("XAUUSD", 2, 2);
        assert!((gold.point() - 0.01).abs() < 1e-12);
    }
}
