//! Deal history records
//!
//! A deal is the immutable record of a single execution (entry or exit)
//! attached to a position. Deals are append-only; the vector is the
//! account's audit trail.

use crate::core_types::{SymbolId, Ticket};
use serde::{Deserialize, Serialize};

/// Deal type. Discriminants follow the canonical numbering
/// (BUY=0, SELL=1, BALANCE=2, plus the extended categories).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealType {
    Buy = 0,
    Sell = 1,
    Balance = 2,
    Credit = 3,
    Charge = 4,
    Correction = 5,
    Bonus = 6,
    Commission = 7,
    Interest = 12,
    Dividend = 15,
    Tax = 17,
}

/// Deal entry direction.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealEntry {
    /// Entry into market (open position)
    In = 0,
    /// Exit from market (close position)
    Out = 1,
    /// Reverse (close and open opposite)
    InOut = 2,
    /// Close by an opposite position
    OutBy = 3,
}

/// Immutable execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub ticket: Ticket,
    /// Order that generated this deal (0 = direct position operation)
    pub order: Ticket,
    pub position_id: Ticket,
    pub symbol: String,
    pub symbol_id: SymbolId,
    pub deal_type: DealType,
    pub entry: DealEntry,
    /// Executed volume, micro-lots
    pub volume: i64,
    /// Execution price (fixed-point)
    pub price: i64,
    /// Realized profit in account currency (money micros)
    pub profit: i64,
    pub commission: i64,
    pub swap: i64,
    pub time_us: i64,
    pub magic: u32,
    pub comment: String,

    // Analytics extensions: the position's entry/exit context
    pub entry_price: i64,
    pub exit_price: i64,
    pub entry_time_us: i64,
    pub exit_time_us: i64,
}

impl Deal {
    /// Profit net of commission, plus swap (account currency micros).
    pub fn net_profit(&self) -> i64 {
        self.profit + self.swap - self.commission
    }
}
