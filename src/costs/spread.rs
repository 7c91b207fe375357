//! Spread models
//!
//! A spread model returns the bid-ask spread (fixed price units) to use
//! for fills, substituting for the tick's raw `ask - bid` when the
//! configuration calls for a synthetic spread. Spreads widen in thin
//! sessions and volatility bursts, narrow during the London/NY overlap.

use crate::market::Tick;
use crate::rng::SimRng;
use crate::symbol::SymbolSpec;
use crate::timeutil::MICROS_PER_HOUR;

/// Strategy interface for spread synthesis. Takes `&mut self` because some
/// variants (volatility) keep running state.
pub trait SpreadModel: Send {
    /// Spread in fixed price units.
    fn calculate(&mut self, tick: &Tick, spec: &SymbolSpec, timestamp_us: i64, rng: &mut SimRng)
        -> i64;
}

/// Constant spread regardless of market conditions.
#[derive(Debug, Clone, Copy)]
pub struct FixedSpread {
    pub points: i64,
}

impl FixedSpread {
    pub fn new(points: i64) -> Self {
        Self { points }
    }
}

impl SpreadModel for FixedSpread {
    fn calculate(&mut self, _: &Tick, _: &SymbolSpec, _: i64, _: &mut SimRng) -> i64 {
        self.points
    }
}

/// Pass through the tick's actual spread, floored at a minimum.
#[derive(Debug, Clone, Copy)]
pub struct HistoricalSpread {
    pub min_points: i64,
}

impl HistoricalSpread {
    pub fn new(min_points: i64) -> Self {
        Self { min_points }
    }
}

impl SpreadModel for HistoricalSpread {
    fn calculate(&mut self, tick: &Tick, _: &SymbolSpec, _: i64, _: &mut SimRng) -> i64 {
        (tick.ask - tick.bid).max(self.min_points)
    }
}

/// Session-dependent spread keyed on the integer UTC hour.
///
/// Sessions: Asian 00-08, London 08-16, NY 13-22, overlap 13-16.
#[derive(Debug, Clone, Copy)]
pub struct TimeOfDaySpread {
    pub base_points: i64,
    asian_ppm: i64,
    london_ppm: i64,
    ny_ppm: i64,
    overlap_ppm: i64,
}

impl TimeOfDaySpread {
    pub fn new(base_points: i64) -> Self {
        Self::with_multipliers(base_points, 1.5, 0.8, 0.9, 0.7)
    }

    pub fn with_multipliers(
        base_points: i64,
        asian: f64,
        london: f64,
        ny: f64,
        overlap: f64,
    ) -> Self {
        let ppm = |m: f64| (m * 1_000_000.0).round() as i64;
        Self {
            base_points,
            asian_ppm: ppm(asian),
            london_ppm: ppm(london),
            ny_ppm: ppm(ny),
            overlap_ppm: ppm(overlap),
        }
    }
}

impl SpreadModel for TimeOfDaySpread {
    fn calculate(&mut self, _: &Tick, _: &SymbolSpec, timestamp_us: i64, _: &mut SimRng) -> i64 {
        let hour = (timestamp_us / MICROS_PER_HOUR).rem_euclid(24);
        let ppm = if (13..16).contains(&hour) {
            self.overlap_ppm
        } else if (8..16).contains(&hour) {
            self.london_ppm
        } else if (13..22).contains(&hour) {
            self.ny_ppm
        } else {
            self.asian_ppm
        };
        crate::fixed::rescale(self.base_points as i128 * ppm as i128, 6)
    }
}

/// Normally distributed spread clamped from below.
#[derive(Debug, Clone, Copy)]
pub struct RandomSpread {
    pub mean_points: i64,
    pub stddev_points: i64,
    pub min_points: i64,
}

impl RandomSpread {
    pub fn new(mean_points: i64, stddev_points: i64, min_points: i64) -> Self {
        Self {
            mean_points,
            stddev_points,
            min_points,
        }
    }
}

impl SpreadModel for RandomSpread {
    fn calculate(&mut self, _: &Tick, _: &SymbolSpec, _: i64, rng: &mut SimRng) -> i64 {
        let draw = rng
            .next_normal(self.mean_points as f64, self.stddev_points as f64)
            .abs();
        draw.max(self.min_points as f64) as i64
    }
}

/// Volatility-adjusted spread: widens with the running average absolute
/// mid-price change over a bounded lookback sample.
#[derive(Debug, Clone, Copy)]
pub struct VolatilitySpread {
    pub base_points: i64,
    volatility_multiplier: f64,
    lookback_samples: i64,
    last_mid: i64,
    running_volatility: f64,
    sample_count: i64,
}

impl VolatilitySpread {
    pub fn new(base_points: i64, volatility_multiplier: f64, lookback_samples: i64) -> Self {
        Self {
            base_points,
            volatility_multiplier,
            lookback_samples,
            last_mid: 0,
            running_volatility: 0.0,
            sample_count: 0,
        }
    }
}

impl SpreadModel for VolatilitySpread {
    fn calculate(&mut self, tick: &Tick, _: &SymbolSpec, _: i64, _: &mut SimRng) -> i64 {
        let mid = tick.mid_price();

        if self.last_mid != 0 && self.sample_count < self.lookback_samples {
            let change = (mid - self.last_mid).abs() as f64;
            self.running_volatility = (self.running_volatility * self.sample_count as f64
                + change)
                / (self.sample_count + 1) as f64;
            self.sample_count += 1;
        }
        self.last_mid = mid;

        // Mid-price changes are already in price units, i.e. points
        let adjustment = (self.running_volatility * self.volatility_multiplier) as i64;
        self.base_points + adjustment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> (SymbolSpec, SimRng) {
        (SymbolSpec::new("EURUSD", 1, 5), SimRng::new(42))
    }

    fn tick(bid: i64, ask: i64) -> Tick {
        Tick::new(1_000_000, 1, bid, ask, 0, 0)
    }

    #[test]
    fn test_fixed() {
        let (spec, mut rng) = ctx();
        let mut m = FixedSpread::new(15);
        assert_eq!(m.calculate(&tick(110_000, 110_030), &spec, 0, &mut rng), 15);
    }

    #[test]
    fn test_historical_floor() {
        let (spec, mut rng) = ctx();
        let mut m = HistoricalSpread::new(10);
        // Raw spread above floor passes through
        assert_eq!(m.calculate(&tick(110_000, 110_015), &spec, 0, &mut rng), 15);
        // Unrealistically tight spread is floored
        assert_eq!(m.calculate(&tick(110_000, 110_002), &spec, 0, &mut rng), 10);
    }

    #[test]
    fn test_time_of_day_sessions() {
        let (spec, mut rng) = ctx();
        let mut m = TimeOfDaySpread::new(10);
        let t = tick(110_000, 110_015);
        let at = |hour: i64| hour * MICROS_PER_HOUR;

        // Asian 03:00 -> 1.5x
        assert_eq!(m.calculate(&t, &spec, at(3), &mut rng), 15);
        // London 10:00 -> 0.8x
        assert_eq!(m.calculate(&t, &spec, at(10), &mut rng), 8);
        // Overlap 14:00 -> 0.7x
        assert_eq!(m.calculate(&t, &spec, at(14), &mut rng), 7);
        // NY 18:00 -> 0.9x
        assert_eq!(m.calculate(&t, &spec, at(18), &mut rng), 9);
        // Late Asian 23:00 -> 1.5x
        assert_eq!(m.calculate(&t, &spec, at(23), &mut rng), 15);
    }

    #[test]
    fn test_random_clamped() {
        let (spec, mut rng) = ctx();
        let mut m = RandomSpread::new(15, 5, 8);
        for _ in 0..200 {
            let v = m.calculate(&tick(110_000, 110_015), &spec, 0, &mut rng);
            assert!(v >= 8, "spread {} below floor", v);
        }
    }

    #[test]
    fn test_volatility_widens_with_movement() {
        let (spec, mut rng) = ctx();
        let mut m = VolatilitySpread::new(10, 1.0, 100);

        // First observation establishes the baseline
        assert_eq!(m.calculate(&tick(110_000, 110_010), &spec, 0, &mut rng), 10);
        // Static prices: no widening
        assert_eq!(m.calculate(&tick(110_000, 110_010), &spec, 1, &mut rng), 10);

        // A 100-point jump raises the running average
        let widened = m.calculate(&tick(110_100, 110_110), &spec, 2, &mut rng);
        assert!(widened > 10, "expected widening, got {}", widened);
    }
}
