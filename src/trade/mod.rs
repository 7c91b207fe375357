//! Trading ledger: account, positions, orders, deals
//!
//! The [`ledger::Trade`] type is the bookkeeping core; the submodules hold
//! its value-typed entities. Everything monetary is fixed-point; doubles
//! live only at the command boundary.

pub mod account;
pub mod deal;
pub mod ledger;
pub mod order;
pub mod position;

pub use account::{Account, AccountTradeMode, MarginMode, StopOutMode};
pub use deal::{Deal, DealEntry, DealType};
pub use ledger::{
    Retcode, Snapshot, Trade, TradeAction, TradeCheckResult, TradeRequest, TradeResult,
};
pub use order::{HistoryOrder, OrderFilling, OrderState, OrderTime, OrderType, PendingOrder};
pub use position::{Position, PositionType, TrailingStop};
