//! Account state
//!
//! All monetary state is fixed-point (money micros); doubles are exposed
//! only through the read accessors. Equity, free margin and margin level
//! are rederived on every `update_equity` call so the invariants
//! `equity = balance + profit` and `margin_free = equity - margin` hold
//! after every mutation.

use crate::fixed;
use serde::{Deserialize, Serialize};

/// Account trade mode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountTradeMode {
    Demo = 0,
    Contest = 1,
    Real = 2,
}

/// How the stop-out threshold is expressed.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopOutMode {
    Percent = 0,
    Money = 1,
}

/// Margin calculation mode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginMode {
    RetailNetting = 0,
    Exchange = 1,
    RetailHedging = 2,
}

/// Trading account state with running statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    // Core monetary state (money micros)
    balance: i64,
    equity: i64,
    margin: i64,
    margin_free: i64,
    /// Current unrealized profit
    profit: i64,
    credit: i64,
    /// Margin level percentage; infinity when no margin is in use
    margin_level: f64,

    // Thresholds (percent)
    margin_call_level: f64,
    stop_out_level: f64,

    // Properties
    pub currency: String,
    pub leverage: i64,
    pub trade_mode: AccountTradeMode,
    pub stopout_mode: StopOutMode,
    pub margin_mode: MarginMode,
    pub trade_allowed: bool,
    pub limit_orders: i32,

    // Running statistics (money micros / counts)
    pub total_profit: i64,
    pub total_loss: i64,
    pub total_commission: i64,
    pub total_swap: i64,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub daily_trades: u32,
    pub daily_profit: i64,
    pub daily_high_equity: i64,
    pub daily_low_equity: i64,
}

impl Account {
    pub fn new(initial_balance: f64, currency: &str, leverage: i64) -> Self {
        let balance = fixed::money_from_double(initial_balance);
        Self {
            balance,
            equity: balance,
            margin: 0,
            margin_free: balance,
            profit: 0,
            credit: 0,
            margin_level: f64::INFINITY,
            margin_call_level: 100.0,
            stop_out_level: 50.0,
            currency: currency.to_string(),
            leverage,
            trade_mode: AccountTradeMode::Demo,
            stopout_mode: StopOutMode::Percent,
            margin_mode: MarginMode::RetailHedging,
            trade_allowed: true,
            limit_orders: 200,
            total_profit: 0,
            total_loss: 0,
            total_commission: 0,
            total_swap: 0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            daily_trades: 0,
            daily_profit: 0,
            daily_high_equity: balance,
            daily_low_equity: balance,
        }
    }

    // --- Fixed-point accessors ---

    #[inline]
    pub fn balance_fixed(&self) -> i64 {
        self.balance
    }

    #[inline]
    pub fn equity_fixed(&self) -> i64 {
        self.equity
    }

    #[inline]
    pub fn margin_fixed(&self) -> i64 {
        self.margin
    }

    #[inline]
    pub fn margin_free_fixed(&self) -> i64 {
        self.margin_free
    }

    #[inline]
    pub fn profit_fixed(&self) -> i64 {
        self.profit
    }

    #[inline]
    pub fn credit_fixed(&self) -> i64 {
        self.credit
    }

    // --- Boundary (double) accessors ---

    pub fn balance(&self) -> f64 {
        fixed::money_to_double(self.balance)
    }

    pub fn equity(&self) -> f64 {
        fixed::money_to_double(self.equity)
    }

    pub fn margin(&self) -> f64 {
        fixed::money_to_double(self.margin)
    }

    pub fn margin_free(&self) -> f64 {
        fixed::money_to_double(self.margin_free)
    }

    pub fn profit(&self) -> f64 {
        fixed::money_to_double(self.profit)
    }

    pub fn credit(&self) -> f64 {
        fixed::money_to_double(self.credit)
    }

    pub fn margin_level(&self) -> f64 {
        self.margin_level
    }

    pub fn margin_call_level(&self) -> f64 {
        self.margin_call_level
    }

    pub fn stop_out_level(&self) -> f64 {
        self.stop_out_level
    }

    pub fn set_margin_call_level(&mut self, level: f64) {
        self.margin_call_level = level;
    }

    pub fn set_stop_out_level(&mut self, level: f64) {
        self.stop_out_level = level;
    }

    // --- Mutations (ledger-internal) ---

    /// Reserve margin for a newly opened exposure.
    pub fn add_margin(&mut self, amount: i64) {
        self.margin += amount;
        self.update_equity(self.profit);
    }

    /// Release margin after a close.
    pub fn sub_margin(&mut self, amount: i64) {
        self.margin -= amount;
        if self.margin < 0 {
            self.margin = 0;
        }
        self.update_equity(self.profit);
    }

    /// Direct balance adjustment (deposits, balance deals).
    pub fn add_balance(&mut self, amount: i64) {
        self.balance += amount;
        self.update_equity(self.profit);
    }

    /// Recompute equity, free margin and margin level from a fresh
    /// unrealized-PnL total (account currency micros).
    pub fn update_equity(&mut self, total_unrealized: i64) {
        self.profit = total_unrealized;
        self.equity = self.balance + self.credit + total_unrealized;
        self.margin_free = self.equity - self.margin;
        self.margin_level = if self.margin > 0 {
            (self.equity as f64 / self.margin as f64) * 100.0
        } else {
            f64::INFINITY
        };

        if self.equity > self.daily_high_equity {
            self.daily_high_equity = self.equity;
        }
        if self.equity < self.daily_low_equity || self.daily_low_equity == 0 {
            self.daily_low_equity = self.equity;
        }
    }

    /// Apply a realized result to the balance and running statistics.
    /// Commission is a charge; swap is positive when credited.
    pub fn apply_realized_pnl(&mut self, realized: i64, commission: i64, swap: i64) {
        let net = realized - commission + swap;
        self.balance += net;
        self.total_commission += commission;
        self.total_swap += swap;
        self.total_trades += 1;

        if realized > 0 {
            self.total_profit += realized;
            self.winning_trades += 1;
        } else if realized < 0 {
            self.total_loss += -realized;
            self.losing_trades += 1;
        }

        self.daily_trades += 1;
        self.daily_profit += net;
        self.update_equity(self.profit);
    }

    /// Roll the daily statistics over to a new session.
    pub fn reset_daily_stats(&mut self) {
        self.daily_trades = 0;
        self.daily_profit = 0;
        self.daily_high_equity = self.equity;
        self.daily_low_equity = self.equity;
    }

    pub fn is_margin_call(&self) -> bool {
        self.margin > 0 && self.margin_level < self.margin_call_level
    }

    pub fn is_stop_out(&self) -> bool {
        self.margin > 0 && self.margin_level < self.stop_out_level
    }
}
