//! Open position state
//!
//! A position is an open leveraged exposure. Prices and money are held
//! fixed-point; lot volumes are micro-lots (lots x 10^6). Unrealized
//! profit is derived from the price distance in the symbol's profit
//! currency; conversion to the account currency happens in the ledger's
//! equity aggregation.

use crate::core_types::{SymbolId, Ticket};
use crate::fixed;
use serde::{Deserialize, Serialize};

/// Position side.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionType {
    Buy = 0,
    Sell = 1,
}

impl PositionType {
    #[inline]
    pub fn opposite(self) -> PositionType {
        match self {
            PositionType::Buy => PositionType::Sell,
            PositionType::Sell => PositionType::Buy,
        }
    }
}

/// Trailing-stop configuration attached to a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailingStop {
    /// Distance between price and the trailed SL, in points
    pub distance_points: i64,
    /// Minimum SL improvement before the stop moves again (0 = continuous)
    pub step_points: i64,
    /// Price at which the stop last moved (fixed-point)
    pub trigger_price: i64,
}

/// Fields captured by `store_state` for mutation detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct StoredState {
    volume: i64,
    stop_loss: i64,
    take_profit: i64,
    profit: i64,
}

/// An open market exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: Ticket,
    /// Unique position identifier (equals the ticket)
    pub identifier: Ticket,
    pub symbol: String,
    pub symbol_id: SymbolId,
    pub position_type: PositionType,
    /// Volume in micro-lots
    pub volume: i64,
    pub price_open: i64,
    pub price_current: i64,
    /// 0 = no stop loss
    pub stop_loss: i64,
    /// 0 = no take profit
    pub take_profit: i64,
    /// Unrealized profit in the symbol's profit currency (money micros)
    pub profit: i64,
    /// Commission charged so far (money micros)
    pub commission: i64,
    /// Accumulated swap (money micros, positive = credit)
    pub swap: i64,
    pub open_time_us: i64,
    pub time_update_us: i64,
    pub magic: u32,
    pub comment: String,
    pub trailing: Option<TrailingStop>,

    // Symbol view needed for profit math
    pub digits: i32,
    pub contract_size: i64,

    stored_state: Option<StoredState>,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ticket: Ticket,
        symbol: &str,
        symbol_id: SymbolId,
        position_type: PositionType,
        volume: i64,
        price_open: i64,
        digits: i32,
        contract_size: i64,
        open_time_us: i64,
    ) -> Self {
        let mut pos = Self {
            ticket,
            identifier: ticket,
            symbol: symbol.to_string(),
            symbol_id,
            position_type,
            volume,
            price_open,
            price_current: price_open,
            stop_loss: 0,
            take_profit: 0,
            profit: 0,
            commission: 0,
            swap: 0,
            open_time_us,
            time_update_us: open_time_us,
            magic: 0,
            comment: String::new(),
            trailing: None,
            digits,
            contract_size,
            stored_state: None,
        };
        pos.recalculate_profit();
        pos
    }

    #[inline]
    pub fn is_buy(&self) -> bool {
        self.position_type == PositionType::Buy
    }

    /// Update the tracked market price and rederive profit.
    pub fn update_price(&mut self, price: i64, timestamp_us: i64) {
        self.price_current = price;
        self.time_update_us = timestamp_us;
        self.recalculate_profit();
    }

    /// profit = price_diff * volume * contract_size, expressed in profit
    /// currency money micros. BUY gains when price rises, SELL mirrors.
    pub fn recalculate_profit(&mut self) {
        let price_diff = match self.position_type {
            PositionType::Buy => self.price_current - self.price_open,
            PositionType::Sell => self.price_open - self.price_current,
        };
        self.profit = fixed::rescale(
            price_diff as i128 * self.volume as i128 * self.contract_size as i128,
            self.digits,
        );
    }

    /// Volume in lots (boundary representation).
    #[inline]
    pub fn volume_lots(&self) -> f64 {
        fixed::to_double(self.volume, 6)
    }

    #[inline]
    pub fn profit_f64(&self) -> f64 {
        fixed::money_to_double(self.profit)
    }

    /// Profit net of commission, plus accumulated swap.
    pub fn net_profit(&self) -> i64 {
        self.profit + self.swap - self.commission
    }

    /// Signed distance from the open price in points (positive = in the
    /// profit direction).
    pub fn distance_in_points(&self) -> i64 {
        match self.position_type {
            PositionType::Buy => self.price_current - self.price_open,
            PositionType::Sell => self.price_open - self.price_current,
        }
    }

    /// Capture volume/SL/TP/profit for later change detection.
    pub fn store_state(&mut self) {
        self.stored_state = Some(StoredState {
            volume: self.volume,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            profit: self.profit,
        });
    }

    /// Whether any tracked field changed since `store_state`.
    pub fn state_changed(&self) -> bool {
        match self.stored_state {
            Some(s) => {
                s.volume != self.volume
                    || s.stop_loss != self.stop_loss
                    || s.take_profit != self.take_profit
                    || s.profit != self.profit
            }
            None => false,
        }
    }
}
