//! Margin calculation and stop-out arithmetic
//!
//! Standalone calculator for required margin, margin level, free margin
//! and maximum openable volume. The ledger maintains its own incremental
//! margin bookkeeping; this component is the queryable surface the engine
//! uses for pre-trade checks and stop-out decisions.

use crate::currency::CurrencyConverter;
use crate::fixed;
use crate::symbol::SymbolSpec;
use crate::trade::account::Account;
use crate::trade::position::{Position, PositionType};
use rustc_hash::FxHashMap;
use tracing::warn;

/// Margin calculator. Stateless; currency conversion context is passed
/// per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarginCalculator;

impl MarginCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Required margin for a position, in the symbol's quote currency
    /// (money micros): `volume * contract_size * price / leverage`.
    /// Non-positive leverage clamps to 1.
    pub fn required_margin(
        &self,
        spec: &SymbolSpec,
        _side: PositionType,
        volume: i64,
        price: i64,
        leverage: i64,
    ) -> i64 {
        let leverage = leverage.max(1);
        let notional = fixed::rescale(
            volume as i128 * spec.contract_size as i128 * price as i128,
            spec.digits,
        );
        fixed::div_int(notional, leverage)
    }

    /// Margin level percentage: `equity / margin * 100`, infinite when no
    /// margin is in use.
    pub fn margin_level(&self, equity: i64, margin: i64) -> f64 {
        if margin <= 0 {
            return f64::INFINITY;
        }
        equity as f64 / margin as f64 * 100.0
    }

    /// Free margin: `equity - margin`.
    pub fn free_margin(&self, equity: i64, margin: i64) -> i64 {
        equity - margin
    }

    /// Total margin across positions, converted into the account currency.
    /// Positions whose quote currency cannot be converted contribute their
    /// raw value (warned; see the design notes on graceful degradation).
    pub fn total_margin(
        &self,
        positions: &[Position],
        symbols: &FxHashMap<u32, SymbolSpec>,
        leverage: i64,
        account_currency: &str,
        conv: &CurrencyConverter,
    ) -> i64 {
        let mut total = 0_i64;
        for position in positions {
            let Some(spec) = symbols.get(&position.symbol_id) else {
                continue;
            };
            let mut margin = self.required_margin(
                spec,
                position.position_type,
                position.volume,
                position.price_open,
                leverage,
            );
            let margin_ccy = &spec.currency_profit;
            if !margin_ccy.is_empty() && margin_ccy != account_currency {
                match conv.convert_money(margin, margin_ccy, account_currency) {
                    Ok(converted) => margin = converted,
                    Err(err) => {
                        warn!(symbol = %spec.name, %err, "margin conversion unavailable, using raw value");
                    }
                }
            }
            total += margin;
        }
        total
    }

    /// Whether adding `additional_margin` keeps the margin level at or
    /// above `min_margin_level` percent.
    #[allow(clippy::too_many_arguments)]
    pub fn has_sufficient_margin(
        &self,
        account: &Account,
        positions: &[Position],
        symbols: &FxHashMap<u32, SymbolSpec>,
        additional_margin: i64,
        min_margin_level: f64,
        conv: &CurrencyConverter,
    ) -> bool {
        let current = self.total_margin(
            positions,
            symbols,
            account.leverage,
            &account.currency,
            conv,
        );
        let new_margin = current + additional_margin;
        if new_margin <= 0 {
            return true;
        }
        self.margin_level(account.equity_fixed(), new_margin) >= min_margin_level
    }

    /// Whether the current margin level sits below the stop-out threshold.
    pub fn should_stop_out(
        &self,
        account: &Account,
        positions: &[Position],
        symbols: &FxHashMap<u32, SymbolSpec>,
        threshold: f64,
        conv: &CurrencyConverter,
    ) -> bool {
        if positions.is_empty() {
            return false;
        }
        let margin = self.total_margin(
            positions,
            symbols,
            account.leverage,
            &account.currency,
            conv,
        );
        if margin <= 0 {
            return false;
        }
        self.margin_level(account.equity_fixed(), margin) < threshold
    }

    /// Index of the largest losing position (most negative profit), or
    /// `None` when nothing is under water.
    pub fn find_largest_loser(&self, positions: &[Position]) -> Option<usize> {
        let mut worst: Option<(i64, usize)> = None;
        for (index, position) in positions.iter().enumerate() {
            if position.profit < 0 {
                match worst {
                    Some((profit, _)) if profit <= position.profit => {}
                    _ => worst = Some((position.profit, index)),
                }
            }
        }
        worst.map(|(_, index)| index)
    }

    /// Margin-call warning check (informational, above the stop-out level).
    pub fn is_margin_call(&self, equity: i64, margin: i64, margin_call_level: f64) -> bool {
        if margin <= 0 {
            return false;
        }
        self.margin_level(equity, margin) < margin_call_level
    }

    /// Maximum volume openable with the given free margin, floored to the
    /// symbol's volume step and clamped to its limits. Returns micro-lots.
    pub fn max_volume(
        &self,
        spec: &SymbolSpec,
        _side: PositionType,
        price: i64,
        free_margin: i64,
        leverage: i64,
    ) -> i64 {
        let leverage = leverage.max(1);
        if price <= 0 {
            return 0;
        }
        // margin = volume * contract * price / leverage
        // => volume_micro = free * leverage * 10^digits / (contract * price)
        let numerator = free_margin as i128 * leverage as i128 * fixed::pow10(spec.digits) as i128;
        let denominator = spec.contract_size as i128 * price as i128;
        if denominator == 0 {
            return 0;
        }
        let mut volume = (numerator / denominator) as i64;
        if spec.volume_step > 0 {
            volume = (volume / spec.volume_step) * spec.volume_step;
        }
        fixed::clamp(volume, spec.volume_min, spec.volume_max)
    }
}
