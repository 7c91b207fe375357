//! Swap (rollover) models
//!
//! Overnight financing charges/credits for held positions. Swap applies at
//! the broker rollover and carries a configurable triple day that covers
//! the weekend settlement. Positive amounts credit the account.

use crate::fixed;
use crate::symbol::{SwapMode, SymbolSpec};
use crate::timeutil;
use crate::trade::position::PositionType;

/// Strategy interface for overnight financing.
pub trait SwapModel: Send {
    /// Daily swap amount in account-currency money micros
    /// (positive = credit, negative = charge).
    fn calculate(
        &self,
        side: PositionType,
        volume: i64,
        open_price: i64,
        current_price: i64,
        spec: &SymbolSpec,
        days_held: i64,
    ) -> i64;

    /// Whether swap applies at this timestamp.
    fn should_apply(&self, timestamp_us: i64) -> bool;

    /// Day multiplier: 3 on the triple-swap day, 1 otherwise.
    fn multiplier(&self, timestamp_us: i64) -> i64;
}

/// Swap-free execution (no financing, no multiplier).
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroSwap;

impl SwapModel for ZeroSwap {
    fn calculate(&self, _: PositionType, _: i64, _: i64, _: i64, _: &SymbolSpec, _: i64) -> i64 {
        0
    }

    fn should_apply(&self, _: i64) -> bool {
        false
    }

    fn multiplier(&self, _: i64) -> i64 {
        1
    }
}

/// Standard broker swap: rate per side, in points or percent of position
/// value, with a triple day covering the weekend.
#[derive(Debug, Clone, Copy)]
pub struct StandardSwap {
    /// Long rate in micro-points (Points mode) or micro-percent (Percentage)
    long_rate_micro: i64,
    short_rate_micro: i64,
    mode: SwapMode,
    #[allow(dead_code)]
    rollover_hour: u32,
    /// Day of week carrying the triple swap (0 = Sunday, 3 = Wednesday)
    triple_day: u32,
}

impl StandardSwap {
    pub fn new(long_rate: f64, short_rate: f64, mode: SwapMode) -> Self {
        Self::with_rollover(long_rate, short_rate, mode, 0, 3)
    }

    pub fn with_rollover(
        long_rate: f64,
        short_rate: f64,
        mode: SwapMode,
        rollover_hour: u32,
        triple_day: u32,
    ) -> Self {
        Self {
            long_rate_micro: (long_rate * 1_000_000.0).round() as i64,
            short_rate_micro: (short_rate * 1_000_000.0).round() as i64,
            mode,
            rollover_hour,
            triple_day,
        }
    }

    /// Build from a symbol's swap configuration.
    pub fn from_spec(spec: &SymbolSpec) -> Self {
        Self::with_rollover(
            spec.swap_long,
            spec.swap_short,
            spec.swap_mode,
            0,
            spec.swap_rollover_day,
        )
    }
}

impl SwapModel for StandardSwap {
    fn calculate(
        &self,
        side: PositionType,
        volume: i64,
        _open_price: i64,
        current_price: i64,
        spec: &SymbolSpec,
        days_held: i64,
    ) -> i64 {
        if days_held == 0 {
            return 0;
        }
        let rate_micro = match side {
            PositionType::Buy => self.long_rate_micro,
            PositionType::Sell => self.short_rate_micro,
        };

        match self.mode {
            SwapMode::Points => {
                // units * rate_points * point, expressed in money micros:
                // micro-lots * units/lot * micro-points collapses the two
                // micro scales against each other and the price scale.
                fixed::rescale(
                    volume as i128 * spec.contract_size as i128 * rate_micro as i128,
                    6 + spec.digits,
                )
            }
            SwapMode::Percentage => {
                let value_micros = fixed::rescale(
                    volume as i128 * spec.contract_size as i128 * current_price as i128,
                    spec.digits,
                );
                // value * rate% / 100, rate carried in micro-percent
                fixed::rescale(value_micros as i128 * rate_micro as i128, 8)
            }
        }
    }

    fn should_apply(&self, _timestamp_us: i64) -> bool {
        // Daily rollover; the costs engine gates on whole days held.
        true
    }

    fn multiplier(&self, timestamp_us: i64) -> i64 {
        if timeutil::day_of_week(timestamp_us) == self.triple_day {
            3
        } else {
            1
        }
    }
}

/// Islamic (swap-free) account: no financing, but a holding fee per lot
/// per day once the grace period is exhausted.
#[derive(Debug, Clone, Copy)]
pub struct IslamicSwap {
    holding_fee_micros: i64,
    grace_days: i64,
}

impl IslamicSwap {
    pub fn new(holding_fee_per_lot_day: f64, grace_days: i64) -> Self {
        Self {
            holding_fee_micros: fixed::money_from_double(holding_fee_per_lot_day),
            grace_days,
        }
    }
}

impl SwapModel for IslamicSwap {
    fn calculate(
        &self,
        _: PositionType,
        volume: i64,
        _: i64,
        _: i64,
        _: &SymbolSpec,
        days_held: i64,
    ) -> i64 {
        if days_held <= self.grace_days {
            return 0;
        }
        let billable = days_held - self.grace_days;
        // Fee is a charge, returned negative
        -fixed::rescale(
            volume as i128 * self.holding_fee_micros as i128 * billable as i128,
            6,
        )
    }

    fn should_apply(&self, _: i64) -> bool {
        true
    }

    fn multiplier(&self, _: i64) -> i64 {
        1
    }
}
