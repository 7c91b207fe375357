//! Commission models
//!
//! A commission model returns the broker fee for one execution in account
//! currency, money micros. Double parameters are converted to fixed
//! integers at construction so the per-fill path is pure integer math.

use crate::fixed;
use crate::symbol::SymbolSpec;
use crate::trade::position::PositionType;

/// Strategy interface for broker fees.
pub trait CommissionModel: Send {
    /// Commission in account-currency money micros.
    fn calculate(&self, side: PositionType, volume: i64, fill_price: i64, spec: &SymbolSpec)
        -> i64;
}

/// No transaction costs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroCommission;

impl CommissionModel for ZeroCommission {
    fn calculate(&self, _: PositionType, _: i64, _: i64, _: &SymbolSpec) -> i64 {
        0
    }
}

/// Fixed amount per lot traded. Example: $7 per lot.
#[derive(Debug, Clone, Copy)]
pub struct FixedPerLot {
    per_lot_micros: i64,
}

impl FixedPerLot {
    pub fn new(per_lot: f64) -> Self {
        Self {
            per_lot_micros: fixed::money_from_double(per_lot),
        }
    }
}

impl CommissionModel for FixedPerLot {
    fn calculate(&self, _: PositionType, volume: i64, _: i64, _: &SymbolSpec) -> i64 {
        // micro-lots * micros/lot, drop the lot scale
        fixed::rescale(volume as i128 * self.per_lot_micros as i128, 6)
    }
}

/// Flat fee per trade regardless of volume.
#[derive(Debug, Clone, Copy)]
pub struct FixedPerTrade {
    per_trade_micros: i64,
}

impl FixedPerTrade {
    pub fn new(per_trade: f64) -> Self {
        Self {
            per_trade_micros: fixed::money_from_double(per_trade),
        }
    }
}

impl CommissionModel for FixedPerTrade {
    fn calculate(&self, _: PositionType, _: i64, _: i64, _: &SymbolSpec) -> i64 {
        self.per_trade_micros
    }
}

/// Broker widens the spread as its fee: the markup (in points) is charged
/// over the full contract volume.
#[derive(Debug, Clone, Copy)]
pub struct SpreadMarkup {
    pub markup_points: i64,
}

impl SpreadMarkup {
    pub fn new(markup_points: i64) -> Self {
        Self { markup_points }
    }
}

impl CommissionModel for SpreadMarkup {
    fn calculate(&self, _: PositionType, volume: i64, _: i64, spec: &SymbolSpec) -> i64 {
        // micro-lots * units/lot * points (price units, 10^digits scale):
        // drop the lot scale against the price scale to land on micros.
        fixed::rescale(
            volume as i128 * spec.contract_size as i128 * self.markup_points as i128,
            spec.digits,
        )
    }
}

/// Percentage of the trade's notional value.
/// Example: 0.001 (= 0.1%, 10 basis points).
#[derive(Debug, Clone, Copy)]
pub struct PercentageOfValue {
    fraction_ppm: i64,
}

impl PercentageOfValue {
    pub fn new(fraction: f64) -> Self {
        Self {
            fraction_ppm: (fraction * 1_000_000.0).round() as i64,
        }
    }
}

impl CommissionModel for PercentageOfValue {
    fn calculate(&self, _: PositionType, volume: i64, fill_price: i64, spec: &SymbolSpec) -> i64 {
        let value_micros = fixed::rescale(
            volume as i128 * spec.contract_size as i128 * fill_price as i128,
            spec.digits,
        );
        fixed::rescale(value_micros as i128 * self.fraction_ppm as i128, 6)
    }
}

/// Volume-tiered per-lot commission: the tier with the highest threshold
/// at or below the traded volume applies.
#[derive(Debug, Clone)]
pub struct TieredCommission {
    /// (volume threshold in micro-lots, commission per lot in micros),
    /// sorted ascending by threshold
    tiers: Vec<(i64, i64)>,
}

impl TieredCommission {
    /// Build from (volume_threshold_lots, commission_per_lot) pairs.
    pub fn new(tiers: Vec<(f64, f64)>) -> Self {
        let mut tiers: Vec<(i64, i64)> = tiers
            .into_iter()
            .map(|(threshold, per_lot)| {
                (
                    fixed::from_double(threshold, 6),
                    fixed::money_from_double(per_lot),
                )
            })
            .collect();
        tiers.sort_by_key(|t| t.0);
        Self { tiers }
    }
}

impl CommissionModel for TieredCommission {
    fn calculate(&self, _: PositionType, volume: i64, _: i64, _: &SymbolSpec) -> i64 {
        let Some(first) = self.tiers.first() else {
            return 0;
        };
        let mut per_lot = first.1;
        for &(threshold, rate) in &self.tiers {
            if volume >= threshold {
                per_lot = rate;
            } else {
                break;
            }
        }
        fixed::rescale(volume as i128 * per_lot as i128, 6)
    }
}
