//! Execution costs engine
//!
//! Composes one instance of each cost-model family plus the engine-owned
//! seeded RNG, and answers two questions per tick: does this pending order
//! trigger, and does this position's SL/TP trigger. Gap scenarios fill at
//! the worse of (market, level). Reseeding via `set_seed` is the
//! operational knob for bit-identical re-runs.

use crate::core_types::SymbolId;
use crate::costs::commission::CommissionModel;
use crate::costs::slippage::SlippageModel;
use crate::costs::spread::SpreadModel;
use crate::costs::swap::SwapModel;
use crate::market::Tick;
use crate::rng::SimRng;
use crate::symbol::SymbolSpec;
use crate::timeutil::MICROS_PER_DAY;
use crate::trade::order::{OrderType, PendingOrder};
use crate::trade::position::{Position, PositionType};
use rustc_hash::FxHashMap;

/// Outcome of an order or position evaluation against one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub executed: bool,
    /// Actual fill price including slippage (fixed-point)
    pub fill_price: i64,
    /// Slippage applied (fixed-point price units)
    pub slippage: i64,
    /// Commission charged (account currency micros)
    pub commission: i64,
    /// Spread used for the fill (fixed-point)
    pub spread_cost: i64,
}

#[derive(Debug, Clone, Copy)]
struct LastPrice {
    bid: i64,
    ask: i64,
    #[allow(dead_code)]
    timestamp_us: i64,
}

/// Execution costs engine with pluggable cost models.
pub struct CostsEngine {
    slippage_model: Box<dyn SlippageModel>,
    commission_model: Box<dyn CommissionModel>,
    swap_model: Box<dyn SwapModel>,
    spread_model: Box<dyn SpreadModel>,
    rng: SimRng,
    /// Last known prices per symbol (gap detection, synthetic ticks)
    last_prices: FxHashMap<SymbolId, LastPrice>,
}

impl CostsEngine {
    pub fn new(
        slippage: Box<dyn SlippageModel>,
        commission: Box<dyn CommissionModel>,
        swap: Box<dyn SwapModel>,
        spread: Box<dyn SpreadModel>,
        seed: u64,
    ) -> Self {
        Self {
            slippage_model: slippage,
            commission_model: commission,
            swap_model: swap,
            spread_model: spread,
            rng: SimRng::new(seed),
            last_prices: FxHashMap::default(),
        }
    }

    /// Frictionless configuration: zero slippage/commission/swap, a fixed
    /// 1.5-pip spread. The engine's default until models are configured.
    pub fn frictionless(seed: u64) -> Self {
        use crate::costs::commission::ZeroCommission;
        use crate::costs::slippage::ZeroSlippage;
        use crate::costs::spread::FixedSpread;
        use crate::costs::swap::ZeroSwap;

        Self::new(
            Box::new(ZeroSlippage),
            Box::new(ZeroCommission),
            Box::new(ZeroSwap),
            Box::new(FixedSpread::new(15)),
            seed,
        )
    }

    /// Reseed the RNG (deterministic replay knob).
    pub fn set_seed(&mut self, seed: u64) {
        self.rng.reset_with(seed);
    }

    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    /// Record the latest market prices for a symbol.
    pub fn update_market(&mut self, symbol_id: SymbolId, tick: &Tick) {
        self.last_prices.insert(
            symbol_id,
            LastPrice {
                bid: tick.bid,
                ask: tick.ask,
                timestamp_us: tick.timestamp_us,
            },
        );
    }

    /// Last seen (bid, ask) for a symbol, if any.
    pub fn last_price(&self, symbol_id: SymbolId) -> Option<(i64, i64)> {
        self.last_prices.get(&symbol_id).map(|p| (p.bid, p.ask))
    }

    /// Evaluate a pending order against a tick.
    ///
    /// Trigger rules:
    /// - market BUY/SELL: unconditional, at ask/bid
    /// - BUY_LIMIT:  ask <= price, fills at the limit (price-or-better)
    /// - SELL_LIMIT: bid >= price, fills at the limit
    /// - BUY_STOP:   ask >= price, fills at market (gap fill)
    /// - SELL_STOP:  bid <= price, fills at market
    /// - BUY_STOP_LIMIT:  ask >= price, fills at min(ask, price)
    /// - SELL_STOP_LIMIT: bid <= price, fills at max(bid, price)
    pub fn evaluate_order(
        &mut self,
        order: &PendingOrder,
        tick: &Tick,
        spec: &SymbolSpec,
    ) -> ExecutionResult {
        let mut result = ExecutionResult::default();

        let (triggers, trigger_price) = match order.order_type {
            OrderType::Buy => (true, tick.ask),
            OrderType::Sell => (true, tick.bid),
            OrderType::BuyLimit => (tick.ask <= order.price_open, order.price_open),
            OrderType::SellLimit => (tick.bid >= order.price_open, order.price_open),
            OrderType::BuyStop => (tick.ask >= order.price_open, tick.ask),
            OrderType::SellStop => (tick.bid <= order.price_open, tick.bid),
            OrderType::BuyStopLimit => (
                tick.ask >= order.price_open,
                tick.ask.min(order.price_open),
            ),
            OrderType::SellStopLimit => (
                tick.bid <= order.price_open,
                tick.bid.max(order.price_open),
            ),
        };

        if !triggers {
            return result;
        }

        let side = if order.order_type.is_buy() {
            PositionType::Buy
        } else {
            PositionType::Sell
        };

        self.fill(&mut result, side, order.volume_current, trigger_price, tick, spec);
        result
    }

    /// Evaluate an open position's SL/TP against a tick.
    ///
    /// Longs exit on the bid, shorts on the ask. When price gaps through a
    /// stop the fill lands at the worse of (market, level); a gap through a
    /// take-profit lands at the better of the two.
    pub fn evaluate_position(
        &mut self,
        position: &Position,
        tick: &Tick,
        spec: &SymbolSpec,
    ) -> ExecutionResult {
        let mut result = ExecutionResult::default();

        let (triggers, trigger_price) = match position.position_type {
            PositionType::Buy => {
                if position.stop_loss > 0 && tick.bid <= position.stop_loss {
                    (true, tick.bid.min(position.stop_loss))
                } else if position.take_profit > 0 && tick.bid >= position.take_profit {
                    (true, tick.bid.max(position.take_profit))
                } else {
                    (false, 0)
                }
            }
            PositionType::Sell => {
                if position.stop_loss > 0 && tick.ask >= position.stop_loss {
                    (true, tick.ask.max(position.stop_loss))
                } else if position.take_profit > 0 && tick.ask <= position.take_profit {
                    (true, tick.ask.min(position.take_profit))
                } else {
                    (false, 0)
                }
            }
        };

        if !triggers {
            return result;
        }

        let close_side = position.position_type.opposite();
        self.fill(&mut result, close_side, position.volume, trigger_price, tick, spec);
        result
    }

    /// Execute a market order immediately at the tick's prices.
    pub fn execute_market(
        &mut self,
        side: PositionType,
        volume: i64,
        tick: &Tick,
        spec: &SymbolSpec,
    ) -> ExecutionResult {
        let trigger_price = match side {
            PositionType::Buy => tick.ask,
            PositionType::Sell => tick.bid,
        };
        let mut result = ExecutionResult::default();
        self.fill(&mut result, side, volume, trigger_price, tick, spec);
        result
    }

    /// Daily swap for a position: whole days held since open, gated by the
    /// model and scaled by the triple-day multiplier.
    pub fn calculate_swap(
        &self,
        position: &Position,
        current_price: i64,
        spec: &SymbolSpec,
        timestamp_us: i64,
    ) -> i64 {
        if !self.swap_model.should_apply(timestamp_us) {
            return 0;
        }
        let days_held = (timestamp_us - position.open_time_us) / MICROS_PER_DAY;
        if days_held < 1 {
            return 0;
        }
        let swap = self.swap_model.calculate(
            position.position_type,
            position.volume,
            position.price_open,
            current_price,
            spec,
            days_held,
        );
        swap * self.swap_model.multiplier(timestamp_us)
    }

    fn fill(
        &mut self,
        result: &mut ExecutionResult,
        side: PositionType,
        volume: i64,
        trigger_price: i64,
        tick: &Tick,
        spec: &SymbolSpec,
    ) {
        result.executed = true;
        result.slippage = self
            .slippage_model
            .calculate(side, volume, tick, spec, &mut self.rng);
        result.spread_cost =
            self.spread_model
                .calculate(tick, spec, tick.timestamp_us, &mut self.rng);

        // Slippage is adverse: buys fill higher, sells fill lower
        result.fill_price = match side {
            PositionType::Buy => trigger_price + result.slippage,
            PositionType::Sell => trigger_price - result.slippage,
        };

        result.commission =
            self.commission_model
                .calculate(side, volume, result.fill_price, spec);
    }
}
