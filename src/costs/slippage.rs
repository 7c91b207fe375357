//! Slippage models
//!
//! A slippage model returns a non-negative fixed-point price increment
//! applied adverse to the trade direction: added to the ask on buys,
//! subtracted from the bid on sells. With prices scaled by 10^digits one
//! point equals exactly 1 in fixed representation, so "points" values are
//! used directly as price increments.

use crate::market::Tick;
use crate::rng::SimRng;
use crate::symbol::SymbolSpec;
use crate::trade::position::PositionType;

/// Strategy interface for fill-price degradation.
pub trait SlippageModel: Send {
    /// Slippage in fixed price units (>= 0, worse fill).
    fn calculate(
        &self,
        side: PositionType,
        volume: i64,
        tick: &Tick,
        spec: &SymbolSpec,
        rng: &mut SimRng,
    ) -> i64;
}

/// Ideal execution: orders fill at exact bid/ask.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroSlippage;

impl SlippageModel for ZeroSlippage {
    fn calculate(&self, _: PositionType, _: i64, _: &Tick, _: &SymbolSpec, _: &mut SimRng) -> i64 {
        0
    }
}

/// Constant slippage regardless of market conditions.
/// Example: 2 points on EURUSD = 0.00002 price degradation.
#[derive(Debug, Clone, Copy)]
pub struct FixedSlippage {
    pub points: i64,
}

impl FixedSlippage {
    pub fn new(points: i64) -> Self {
        Self { points }
    }
}

impl SlippageModel for FixedSlippage {
    fn calculate(&self, _: PositionType, _: i64, _: &Tick, _: &SymbolSpec, _: &mut SimRng) -> i64 {
        self.points.max(0)
    }
}

/// Uniform random slippage in `[min_points, max_points]`.
/// Draws exactly once per call, so the RNG stream advances once per fill.
#[derive(Debug, Clone, Copy)]
pub struct RandomSlippage {
    pub min_points: i64,
    pub max_points: i64,
}

impl RandomSlippage {
    pub fn new(min_points: i64, max_points: i64) -> Self {
        Self {
            min_points,
            max_points,
        }
    }
}

impl SlippageModel for RandomSlippage {
    fn calculate(
        &self,
        _: PositionType,
        _: i64,
        _: &Tick,
        _: &SymbolSpec,
        rng: &mut SimRng,
    ) -> i64 {
        rng.next_int(self.min_points, self.max_points).max(0)
    }
}

/// Volume-dependent slippage: larger orders move the market more.
/// `points = round(base + volume_lots * points_per_lot)`.
#[derive(Debug, Clone, Copy)]
pub struct VolumeSlippage {
    pub base_points: i64,
    /// Additional points per lot, stored as millipoints for integer math
    millipoints_per_lot: i64,
}

impl VolumeSlippage {
    pub fn new(base_points: i64, points_per_lot: f64) -> Self {
        Self {
            base_points,
            millipoints_per_lot: (points_per_lot * 1_000.0).round() as i64,
        }
    }
}

impl SlippageModel for VolumeSlippage {
    fn calculate(
        &self,
        _: PositionType,
        volume: i64,
        _: &Tick,
        _: &SymbolSpec,
        _: &mut SimRng,
    ) -> i64 {
        // volume is micro-lots; millipoints/lot * micro-lots drops 9 digits
        let extra = crate::fixed::rescale(volume as i128 * self.millipoints_per_lot as i128, 9);
        (self.base_points + extra).max(0)
    }
}

/// Latency-profile slippage: a fraction of the current spread plus a
/// half-normal component scaled by execution latency.
#[derive(Debug, Clone, Copy)]
pub struct LatencyProfileSlippage {
    /// Execution latency in milliseconds (typical: 10-100)
    pub latency_ms: f64,
    /// Spread fraction in parts-per-million (0.4 -> 400_000)
    spread_fraction_ppm: i64,
}

impl LatencyProfileSlippage {
    pub fn new(latency_ms: f64, spread_fraction: f64) -> Self {
        Self {
            latency_ms,
            spread_fraction_ppm: (spread_fraction * 1_000_000.0).round() as i64,
        }
    }
}

impl SlippageModel for LatencyProfileSlippage {
    fn calculate(
        &self,
        _: PositionType,
        _: i64,
        tick: &Tick,
        _: &SymbolSpec,
        rng: &mut SimRng,
    ) -> i64 {
        let spread = tick.ask - tick.bid;
        let base = crate::fixed::rescale(spread as i128 * self.spread_fraction_ppm as i128, 6);
        let latency_points = rng.next_normal(0.0, self.latency_ms / 100.0).abs().round() as i64;
        (base + latency_points).max(0)
    }
}
