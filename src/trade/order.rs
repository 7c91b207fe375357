//! Pending orders and the history-order log
//!
//! A pending order is an instruction parameterized by a trigger price; it
//! becomes a position when a tick satisfies its condition. Orders move
//! through STARTED -> PLACED -> (PARTIAL)* -> FILLED | CANCELED | EXPIRED |
//! REJECTED; only PLACED and PARTIAL orders live in the active map, every
//! terminal state is snapshotted into the history-order log.

use crate::core_types::{SymbolId, Ticket};
use crate::timeutil;
use serde::{Deserialize, Serialize};

/// Order type. Discriminants match the wire encoding.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Buy = 0,
    Sell = 1,
    BuyLimit = 2,
    SellLimit = 3,
    BuyStop = 4,
    SellStop = 5,
    BuyStopLimit = 6,
    SellStopLimit = 7,
}

impl OrderType {
    /// Whether the order opens long exposure.
    #[inline]
    pub fn is_buy(self) -> bool {
        matches!(
            self,
            OrderType::Buy | OrderType::BuyLimit | OrderType::BuyStop | OrderType::BuyStopLimit
        )
    }

    /// Market orders execute unconditionally on the next tick.
    #[inline]
    pub fn is_market(self) -> bool {
        matches!(self, OrderType::Buy | OrderType::Sell)
    }
}

/// Order lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Started = 0,
    Placed = 1,
    Canceled = 2,
    Partial = 3,
    Filled = 4,
    Rejected = 5,
    Expired = 6,
}

impl OrderState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Canceled | OrderState::Expired | OrderState::Rejected
        )
    }
}

/// Fill policy.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderFilling {
    Fok = 0,
    Ioc = 1,
    Return = 2,
}

/// Time-in-force policy.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderTime {
    Gtc = 0,
    Day = 1,
    Specified = 2,
    SpecifiedDay = 3,
}

/// A pending order awaiting its trigger condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub ticket: Ticket,
    pub symbol: String,
    pub symbol_id: SymbolId,
    pub order_type: OrderType,
    pub state: OrderState,
    /// Volume at placement, micro-lots
    pub volume_initial: i64,
    /// Remaining volume, micro-lots
    pub volume_current: i64,
    /// Trigger price (fixed-point)
    pub price_open: i64,
    /// Limit price armed after a stop-limit triggers (fixed-point, 0 = none)
    pub price_stop_limit: i64,
    pub stop_loss: i64,
    pub take_profit: i64,
    pub time_setup_us: i64,
    /// 0 = no expiration
    pub time_expiration_us: i64,
    /// Stamped when the order reaches a terminal state
    pub time_done_us: i64,
    pub type_filling: OrderFilling,
    pub type_time: OrderTime,
    pub magic: u32,
    pub comment: String,
    pub digits: i32,

    stored_state: Option<(OrderState, i64)>,
}

impl PendingOrder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ticket: Ticket,
        symbol: &str,
        symbol_id: SymbolId,
        order_type: OrderType,
        volume: i64,
        price_open: i64,
        digits: i32,
        time_setup_us: i64,
    ) -> Self {
        Self {
            ticket,
            symbol: symbol.to_string(),
            symbol_id,
            order_type,
            state: OrderState::Placed,
            volume_initial: volume,
            volume_current: volume,
            price_open,
            price_stop_limit: 0,
            stop_loss: 0,
            take_profit: 0,
            time_setup_us,
            time_expiration_us: 0,
            time_done_us: 0,
            type_filling: OrderFilling::Fok,
            type_time: OrderTime::Gtc,
            magic: 0,
            comment: String::new(),
            digits,
            stored_state: None,
        }
    }

    /// Whether the order has passed its time-in-force window.
    ///
    /// GTC orders never expire. DAY orders expire at the end of the setup
    /// day when no explicit expiration was provided.
    pub fn is_expired(&self, now_us: i64) -> bool {
        match self.type_time {
            OrderTime::Gtc => false,
            OrderTime::Day => {
                let deadline = if self.time_expiration_us > 0 {
                    self.time_expiration_us
                } else {
                    timeutil::floor_to_day(self.time_setup_us) + timeutil::MICROS_PER_DAY
                };
                now_us >= deadline
            }
            OrderTime::Specified | OrderTime::SpecifiedDay => {
                self.time_expiration_us > 0 && now_us >= self.time_expiration_us
            }
        }
    }

    /// Capture state/volume for later change detection.
    pub fn store_state(&mut self) {
        self.stored_state = Some((self.state, self.volume_current));
    }

    /// Whether state or remaining volume changed since `store_state`.
    pub fn state_changed(&self) -> bool {
        match self.stored_state {
            Some((state, volume)) => state != self.state || volume != self.volume_current,
            None => false,
        }
    }
}

/// Snapshot of a pending order at the moment it became non-active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryOrder {
    pub ticket: Ticket,
    pub symbol: String,
    pub symbol_id: SymbolId,
    pub order_type: OrderType,
    pub state: OrderState,
    pub volume_initial: i64,
    pub volume_current: i64,
    pub price_open: i64,
    pub stop_loss: i64,
    pub take_profit: i64,
    pub time_setup_us: i64,
    pub time_done_us: i64,
    pub magic: u32,
    pub comment: String,
}

impl From<&PendingOrder> for HistoryOrder {
    fn from(order: &PendingOrder) -> Self {
        Self {
            ticket: order.ticket,
            symbol: order.symbol.clone(),
            symbol_id: order.symbol_id,
            order_type: order.order_type,
            state: order.state,
            volume_initial: order.volume_initial,
            volume_current: order.volume_current,
            price_open: order.price_open,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            time_setup_us: order.time_setup_us,
            time_done_us: order.time_done_us,
            magic: order.magic,
            comment: order.comment.clone(),
        }
    }
}
