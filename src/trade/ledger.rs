//! Trade ledger
//!
//! The ledger orchestrates everything visible to a user: opening,
//! modifying and closing positions, pending-order lifecycle, realized PnL
//! application, equity/margin recomputation on every price update, the
//! deal and history-order logs, trailing stops, stop-out enforcement and
//! whole-state snapshots.
//!
//! Commands never raise for trading failures: each records a `TradeResult`
//! carrying a retcode from the canonical space and returns `false`. State
//! is mutated only after validation passes.
//!
//! Positions and orders live in `BTreeMap`s keyed by ticket so every
//! ordered visit (trigger evaluation, trailing stops, stop-out scans) is
//! ticket-ascending and deterministic.

use crate::core_types::{SymbolId, Ticket};
use crate::costs::ExecutionResult;
use crate::currency::CurrencyConverter;
use crate::fixed;
use crate::symbol::{SymbolSpec, TradeMode};
use crate::trade::account::Account;
use crate::trade::deal::{Deal, DealEntry, DealType};
use crate::trade::order::{HistoryOrder, OrderFilling, OrderState, OrderTime, OrderType, PendingOrder};
use crate::trade::position::{Position, PositionType, TrailingStop};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Trade return codes (canonical numbering).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Retcode {
    Placed = 10008,
    Done = 10009,
    DonePartial = 10010,
    Error = 10011,
    Timeout = 10012,
    Invalid = 10013,
    InvalidVolume = 10014,
    InvalidPrice = 10015,
    InvalidStops = 10016,
    TradeDisabled = 10017,
    MarketClosed = 10018,
    NoMoney = 10019,
    PriceChanged = 10020,
    PriceOff = 10021,
    InvalidExpiration = 10022,
    OrderChanged = 10023,
    TooManyRequests = 10024,
    NoChanges = 10025,
    Reject = 10026,
    Cancel = 10027,
    Frozen = 10029,
    InvalidFill = 10030,
    InvalidOrder = 10035,
    PositionClosed = 10036,
}

/// Request action kinds.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Deal = 1,
    Pending = 5,
    Sltp = 6,
    Modify = 7,
    Remove = 8,
    CloseBy = 10,
}

/// The last submitted request (boundary representation: doubles).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub action: TradeAction,
    pub magic: u32,
    pub order: Ticket,
    pub symbol: String,
    pub volume: f64,
    pub price: f64,
    pub stop_limit: f64,
    pub sl: f64,
    pub tp: f64,
    pub deviation: u64,
    pub order_type: OrderType,
    pub type_filling: OrderFilling,
    pub type_time: OrderTime,
    pub expiration_us: i64,
    pub comment: String,
    pub position: Ticket,
    pub position_by: Ticket,
}

impl Default for TradeRequest {
    fn default() -> Self {
        Self {
            action: TradeAction::Deal,
            magic: 0,
            order: 0,
            symbol: String::new(),
            volume: 0.0,
            price: 0.0,
            stop_limit: 0.0,
            sl: 0.0,
            tp: 0.0,
            deviation: 0,
            order_type: OrderType::Buy,
            type_filling: OrderFilling::Fok,
            type_time: OrderTime::Gtc,
            expiration_us: 0,
            comment: String::new(),
            position: 0,
            position_by: 0,
        }
    }
}

/// The outcome of the last command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub retcode: Retcode,
    pub deal: Ticket,
    pub order: Ticket,
    pub volume: f64,
    pub price: f64,
    pub bid: f64,
    pub ask: f64,
    pub comment: String,
}

impl Default for TradeResult {
    fn default() -> Self {
        Self {
            retcode: Retcode::Error,
            deal: 0,
            order: 0,
            volume: 0.0,
            price: 0.0,
            bid: 0.0,
            ask: 0.0,
            comment: String::new(),
        }
    }
}

/// Pre-trade margin projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeCheckResult {
    pub retcode: Retcode,
    pub balance: f64,
    pub equity: f64,
    pub profit: f64,
    pub margin: f64,
    pub margin_free: f64,
    pub margin_level: f64,
    pub comment: String,
}

impl Default for TradeCheckResult {
    fn default() -> Self {
        Self {
            retcode: Retcode::Done,
            balance: 0.0,
            equity: 0.0,
            profit: 0.0,
            margin: 0.0,
            margin_free: 0.0,
            margin_level: 0.0,
            comment: String::new(),
        }
    }
}

/// Deep-copy snapshot of the entire ledger; the exchange format with the
/// WAL layer and the only supported persistence surface besides it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub account: Account,
    pub positions: Vec<Position>,
    pub orders: Vec<PendingOrder>,
    pub deals: Vec<Deal>,
    pub history_orders: Vec<HistoryOrder>,
    pub symbols: Vec<SymbolSpec>,
    pub next_ticket: Ticket,
    pub current_time_us: i64,
}

const FIRST_TICKET: Ticket = 1000;

/// The account/position/order/deal bookkeeping core.
#[derive(Debug)]
pub struct Trade {
    account: Account,
    positions: BTreeMap<Ticket, Position>,
    orders: BTreeMap<Ticket, PendingOrder>,
    deals: Vec<Deal>,
    history_orders: Vec<HistoryOrder>,
    next_ticket: Ticket,

    symbols: FxHashMap<SymbolId, SymbolSpec>,
    symbol_ids: FxHashMap<String, SymbolId>,

    magic: u32,
    deviation: u64,
    type_filling: OrderFilling,

    last_request: TradeRequest,
    last_result: TradeResult,
    last_check: TradeCheckResult,

    current_time_us: i64,
}

impl Trade {
    pub fn new(initial_balance: f64, currency: &str, leverage: i64) -> Self {
        Self {
            account: Account::new(initial_balance, currency, leverage),
            positions: BTreeMap::new(),
            orders: BTreeMap::new(),
            deals: Vec::new(),
            history_orders: Vec::new(),
            next_ticket: FIRST_TICKET,
            symbols: FxHashMap::default(),
            symbol_ids: FxHashMap::default(),
            magic: 0,
            deviation: 10,
            type_filling: OrderFilling::Fok,
            last_request: TradeRequest::default(),
            last_result: TradeResult::default(),
            last_check: TradeCheckResult::default(),
            current_time_us: 0,
        }
    }

    // --- Configuration ---

    pub fn set_magic(&mut self, magic: u32) {
        self.magic = magic;
    }

    pub fn set_deviation(&mut self, deviation: u64) {
        self.deviation = deviation;
    }

    pub fn set_type_filling(&mut self, filling: OrderFilling) {
        self.type_filling = filling;
    }

    pub fn register_symbol(&mut self, spec: SymbolSpec) {
        self.symbol_ids.insert(spec.name.clone(), spec.symbol_id);
        self.symbols.insert(spec.symbol_id, spec);
    }

    pub fn set_current_time(&mut self, timestamp_us: i64) {
        self.current_time_us = timestamp_us;
    }

    pub fn current_time(&self) -> i64 {
        self.current_time_us
    }

    // --- State access ---

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn account_mut(&mut self) -> &mut Account {
        &mut self.account
    }

    pub fn positions(&self) -> &BTreeMap<Ticket, Position> {
        &self.positions
    }

    pub fn orders(&self) -> &BTreeMap<Ticket, PendingOrder> {
        &self.orders
    }

    pub fn deals(&self) -> &[Deal] {
        &self.deals
    }

    pub fn history_orders(&self) -> &[HistoryOrder] {
        &self.history_orders
    }

    pub fn position(&self, ticket: Ticket) -> Option<&Position> {
        self.positions.get(&ticket)
    }

    pub fn order(&self, ticket: Ticket) -> Option<&PendingOrder> {
        self.orders.get(&ticket)
    }

    pub fn symbol(&self, name: &str) -> Option<&SymbolSpec> {
        self.symbol_ids.get(name).and_then(|id| self.symbols.get(id))
    }

    pub fn symbol_by_id(&self, symbol_id: SymbolId) -> Option<&SymbolSpec> {
        self.symbols.get(&symbol_id)
    }

    pub fn symbol_name(&self, symbol_id: SymbolId) -> Option<&str> {
        self.symbols.get(&symbol_id).map(|s| s.name.as_str())
    }

    pub fn request(&self) -> &TradeRequest {
        &self.last_request
    }

    pub fn result(&self) -> &TradeResult {
        &self.last_result
    }

    pub fn check_result(&self) -> &TradeCheckResult {
        &self.last_check
    }

    // --- Price updates ---

    /// Install a new quote for a symbol: delegate to the spec, track the
    /// opposite-side price on every position of that symbol, recompute
    /// profit and equity.
    pub fn update_prices(
        &mut self,
        conv: &CurrencyConverter,
        symbol: &str,
        bid: f64,
        ask: f64,
        timestamp_us: i64,
    ) {
        let Some(&symbol_id) = self.symbol_ids.get(symbol) else {
            return;
        };
        let Some(spec) = self.symbols.get_mut(&symbol_id) else {
            return;
        };
        spec.update_price(bid, ask, timestamp_us);
        let (bid_fixed, ask_fixed) = (spec.bid, spec.ask);

        if timestamp_us > 0 {
            self.current_time_us = timestamp_us;
        }

        for position in self.positions.values_mut() {
            if position.symbol_id != symbol_id {
                continue;
            }
            // Longs are marked at the bid, shorts at the ask
            let current = match position.position_type {
                PositionType::Buy => bid_fixed,
                PositionType::Sell => ask_fixed,
            };
            position.update_price(current, timestamp_us);
        }

        self.update_equity(conv);
    }

    /// Recompute equity from balance plus every position's unrealized
    /// profit converted into the account currency.
    pub fn update_equity(&mut self, conv: &CurrencyConverter) {
        let mut total_unrealized = 0_i64;
        for position in self.positions.values() {
            total_unrealized += self.convert_to_account(conv, position.profit, position.symbol_id);
        }
        self.account.update_equity(total_unrealized);
    }

    fn convert_to_account(&self, conv: &CurrencyConverter, amount: i64, symbol_id: SymbolId) -> i64 {
        let Some(spec) = self.symbols.get(&symbol_id) else {
            return amount;
        };
        let profit_ccy = &spec.currency_profit;
        if profit_ccy.is_empty() || *profit_ccy == self.account.currency {
            return amount;
        }
        match conv.convert_money(amount, profit_ccy, &self.account.currency) {
            Ok(converted) => converted,
            Err(err) => {
                // Graceful degradation: the unconverted value stands in
                warn!(symbol_id, %err, "currency conversion unavailable, using raw amount");
                amount
            }
        }
    }

    // --- Position commands ---

    /// Open a BUY position at market.
    pub fn buy(
        &mut self,
        conv: &CurrencyConverter,
        volume: f64,
        symbol: &str,
        sl: f64,
        tp: f64,
        comment: &str,
    ) -> bool {
        self.position_open(conv, symbol, OrderType::Buy, volume, 0.0, sl, tp, comment)
    }

    /// Open a SELL position at market.
    pub fn sell(
        &mut self,
        conv: &CurrencyConverter,
        volume: f64,
        symbol: &str,
        sl: f64,
        tp: f64,
        comment: &str,
    ) -> bool {
        self.position_open(conv, symbol, OrderType::Sell, volume, 0.0, sl, tp, comment)
    }

    /// Open a position with market execution. `price = 0` executes at the
    /// current ask (BUY) or bid (SELL).
    #[allow(clippy::too_many_arguments)]
    pub fn position_open(
        &mut self,
        conv: &CurrencyConverter,
        symbol: &str,
        order_type: OrderType,
        volume: f64,
        price: f64,
        sl: f64,
        tp: f64,
        comment: &str,
    ) -> bool {
        self.last_request = TradeRequest {
            action: TradeAction::Deal,
            symbol: symbol.to_string(),
            order_type,
            volume,
            price,
            sl,
            tp,
            deviation: self.deviation,
            type_filling: self.type_filling,
            magic: self.magic,
            comment: comment.to_string(),
            ..TradeRequest::default()
        };
        self.last_result = TradeResult::default();

        if !order_type.is_market() {
            return self.fail(Retcode::Invalid, "invalid order type for market execution");
        }
        let side = if order_type.is_buy() {
            PositionType::Buy
        } else {
            PositionType::Sell
        };

        let Some(spec) = self.symbol(symbol).cloned() else {
            return self.fail(Retcode::Invalid, "unknown symbol");
        };
        self.last_result.bid = spec.bid_f64();
        self.last_result.ask = spec.ask_f64();

        if let Some(rc) = Self::trade_mode_violation(&spec, side, false) {
            return self.fail(rc, "trade mode forbids this operation");
        }

        let Some(volume_micro) = spec.validate_volume(volume) else {
            return self.fail(Retcode::InvalidVolume, "volume out of range");
        };

        let exec_price = if price > 0.0 {
            spec.price_to_fixed(spec.normalize_price(price))
        } else {
            match side {
                PositionType::Buy => spec.ask,
                PositionType::Sell => spec.bid,
            }
        };
        if exec_price <= 0 {
            return self.fail(Retcode::PriceOff, "no quotes for symbol");
        }

        if !self.check_margin(conv, &spec, volume_micro, exec_price) {
            return self.fail(Retcode::NoMoney, "insufficient free margin");
        }

        let sl_fixed = if sl > 0.0 { spec.price_to_fixed(sl) } else { 0 };
        let tp_fixed = if tp > 0.0 { spec.price_to_fixed(tp) } else { 0 };

        let ticket = self.open_position_internal(
            conv,
            &spec,
            side,
            volume_micro,
            exec_price,
            sl_fixed,
            tp_fixed,
            0,
            0,
            comment,
        );

        self.last_result.retcode = Retcode::Done;
        self.last_result.order = ticket;
        self.last_result.volume = fixed::to_double(volume_micro, 6);
        self.last_result.price = spec.price_to_double(exec_price);
        self.last_result.comment = "position opened".to_string();
        true
    }

    /// Open a position at an externally costed fill (slippage and
    /// commission already applied by the costs engine), with the full
    /// validation and result-recording pipeline of `position_open`.
    #[allow(clippy::too_many_arguments)]
    pub fn position_open_at(
        &mut self,
        conv: &CurrencyConverter,
        symbol: &str,
        order_type: OrderType,
        volume: f64,
        fill_price: i64,
        sl: f64,
        tp: f64,
        commission: i64,
        comment: &str,
    ) -> bool {
        self.last_request = TradeRequest {
            action: TradeAction::Deal,
            symbol: symbol.to_string(),
            order_type,
            volume,
            sl,
            tp,
            deviation: self.deviation,
            type_filling: self.type_filling,
            magic: self.magic,
            comment: comment.to_string(),
            ..TradeRequest::default()
        };
        self.last_result = TradeResult::default();

        if !order_type.is_market() {
            return self.fail(Retcode::Invalid, "invalid order type for market execution");
        }
        let side = if order_type.is_buy() {
            PositionType::Buy
        } else {
            PositionType::Sell
        };

        let Some(spec) = self.symbol(symbol).cloned() else {
            return self.fail(Retcode::Invalid, "unknown symbol");
        };
        self.last_result.bid = spec.bid_f64();
        self.last_result.ask = spec.ask_f64();

        if let Some(rc) = Self::trade_mode_violation(&spec, side, false) {
            return self.fail(rc, "trade mode forbids this operation");
        }
        let Some(volume_micro) = spec.validate_volume(volume) else {
            return self.fail(Retcode::InvalidVolume, "volume out of range");
        };
        if fill_price <= 0 {
            return self.fail(Retcode::PriceOff, "no quotes for symbol");
        }
        if !self.check_margin(conv, &spec, volume_micro, fill_price) {
            return self.fail(Retcode::NoMoney, "insufficient free margin");
        }

        let sl_fixed = if sl > 0.0 { spec.price_to_fixed(sl) } else { 0 };
        let tp_fixed = if tp > 0.0 { spec.price_to_fixed(tp) } else { 0 };

        let ticket = self.open_position_internal(
            conv,
            &spec,
            side,
            volume_micro,
            fill_price,
            sl_fixed,
            tp_fixed,
            commission,
            0,
            comment,
        );

        self.last_result.retcode = Retcode::Done;
        self.last_result.order = ticket;
        self.last_result.volume = fixed::to_double(volume_micro, 6);
        self.last_result.price = spec.price_to_double(fill_price);
        self.last_result.comment = "position opened".to_string();
        true
    }

    /// Engine entry point: open a position from a costed execution
    /// (market fill or triggered pending order).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn open_position_executed(
        &mut self,
        conv: &CurrencyConverter,
        symbol_id: SymbolId,
        side: PositionType,
        volume_micro: i64,
        fill_price: i64,
        sl_fixed: i64,
        tp_fixed: i64,
        commission: i64,
        order_ticket: Ticket,
        comment: &str,
    ) -> Option<Ticket> {
        let spec = self.symbols.get(&symbol_id)?.clone();
        if !self.check_margin(conv, &spec, volume_micro, fill_price) {
            return None;
        }
        Some(self.open_position_internal(
            conv,
            &spec,
            side,
            volume_micro,
            fill_price,
            sl_fixed,
            tp_fixed,
            commission,
            order_ticket,
            comment,
        ))
    }

    /// Modify a position's SL/TP. Stop levels must respect the symbol's
    /// minimal stop distance from the current market.
    pub fn position_modify(&mut self, ticket: Ticket, sl: f64, tp: f64) -> bool {
        self.last_request = TradeRequest {
            action: TradeAction::Sltp,
            position: ticket,
            sl,
            tp,
            magic: self.magic,
            ..TradeRequest::default()
        };
        self.last_result = TradeResult::default();

        let Some(position) = self.positions.get(&ticket) else {
            return self.fail(Retcode::InvalidOrder, "position not found");
        };
        let Some(spec) = self.symbols.get(&position.symbol_id) else {
            return self.fail(Retcode::Invalid, "symbol not found");
        };

        let sl_fixed = if sl > 0.0 { spec.price_to_fixed(sl) } else { 0 };
        let tp_fixed = if tp > 0.0 { spec.price_to_fixed(tp) } else { 0 };
        let stops_distance = spec.stops_level as i64;

        let valid = match position.position_type {
            PositionType::Buy => {
                (sl_fixed == 0 || sl_fixed <= spec.bid - stops_distance)
                    && (tp_fixed == 0 || tp_fixed >= spec.bid + stops_distance)
            }
            PositionType::Sell => {
                (sl_fixed == 0 || sl_fixed >= spec.ask + stops_distance)
                    && (tp_fixed == 0 || tp_fixed <= spec.ask - stops_distance)
            }
        };
        if !valid {
            return self.fail(Retcode::InvalidStops, "stops inside minimal distance");
        }

        let position = self.positions.get_mut(&ticket).unwrap();
        if sl_fixed > 0 {
            position.stop_loss = sl_fixed;
        }
        if tp_fixed > 0 {
            position.take_profit = tp_fixed;
        }
        position.time_update_us = self.current_time_us;

        self.last_result.retcode = Retcode::Done;
        self.last_result.comment = "position modified".to_string();
        true
    }

    /// Close a position's full volume at the opposite side of the current
    /// market (BUY closes at bid, SELL at ask).
    pub fn position_close(&mut self, conv: &CurrencyConverter, ticket: Ticket, deviation: u64) -> bool {
        let Some(position) = self.positions.get(&ticket) else {
            self.last_result = TradeResult::default();
            return self.fail(Retcode::PositionClosed, "position not found");
        };
        let volume = position.volume;
        let symbol = position.symbol.clone();
        let side = position.position_type;

        self.last_request = TradeRequest {
            action: TradeAction::Deal,
            position: ticket,
            symbol: symbol.clone(),
            volume: fixed::to_double(volume, 6),
            deviation: if deviation > 0 { deviation } else { self.deviation },
            magic: self.magic,
            ..TradeRequest::default()
        };
        self.last_result = TradeResult::default();

        let (close_price, bid, ask) = match self.symbol(&symbol) {
            Some(spec) => (
                match side {
                    PositionType::Buy => spec.bid,
                    PositionType::Sell => spec.ask,
                },
                spec.bid_f64(),
                spec.ask_f64(),
            ),
            None => return self.fail(Retcode::Invalid, "symbol not found"),
        };
        self.last_result.bid = bid;
        self.last_result.ask = ask;

        self.close_position_internal(conv, ticket, volume, close_price, DealEntry::Out, 0, 0)
    }

    /// Close part of a position; a requested volume at or above the open
    /// volume promotes to a full close.
    pub fn position_close_partial(
        &mut self,
        conv: &CurrencyConverter,
        ticket: Ticket,
        volume: f64,
        deviation: u64,
    ) -> bool {
        let Some(position) = self.positions.get(&ticket) else {
            self.last_result = TradeResult::default();
            return self.fail(Retcode::PositionClosed, "position not found");
        };
        let close_micro = fixed::from_double(volume, 6);
        if close_micro <= 0 {
            self.last_result = TradeResult::default();
            return self.fail(Retcode::InvalidVolume, "invalid close volume");
        }
        if close_micro >= position.volume {
            return self.position_close(conv, ticket, deviation);
        }

        let symbol = position.symbol.clone();
        let side = position.position_type;
        self.last_request = TradeRequest {
            action: TradeAction::Deal,
            position: ticket,
            symbol: symbol.clone(),
            volume,
            deviation: if deviation > 0 { deviation } else { self.deviation },
            magic: self.magic,
            ..TradeRequest::default()
        };
        self.last_result = TradeResult::default();

        let (close_price, bid, ask) = match self.symbol(&symbol) {
            Some(spec) => (
                match side {
                    PositionType::Buy => spec.bid,
                    PositionType::Sell => spec.ask,
                },
                spec.bid_f64(),
                spec.ask_f64(),
            ),
            None => return self.fail(Retcode::Invalid, "symbol not found"),
        };
        self.last_result.bid = bid;
        self.last_result.ask = ask;

        self.close_position_internal(conv, ticket, close_micro, close_price, DealEntry::Out, 0, 0)
    }

    /// Close two opposite positions on the same symbol against each other
    /// at the current bid. The smaller volume is extinguished from both.
    pub fn position_close_by(
        &mut self,
        conv: &CurrencyConverter,
        ticket: Ticket,
        ticket_by: Ticket,
    ) -> bool {
        self.last_request = TradeRequest {
            action: TradeAction::CloseBy,
            position: ticket,
            position_by: ticket_by,
            magic: self.magic,
            ..TradeRequest::default()
        };
        self.last_result = TradeResult::default();

        let (Some(pos), Some(pos_by)) = (self.positions.get(&ticket), self.positions.get(&ticket_by))
        else {
            return self.fail(Retcode::InvalidOrder, "position not found");
        };
        if pos.symbol_id != pos_by.symbol_id {
            return self.fail(Retcode::Invalid, "positions must be on the same symbol");
        }
        if pos.position_type == pos_by.position_type {
            return self.fail(Retcode::Invalid, "positions must be opposite types");
        }

        let volume = pos.volume.min(pos_by.volume);
        let Some(spec) = self.symbols.get(&pos.symbol_id) else {
            return self.fail(Retcode::Invalid, "symbol not found");
        };
        // Both legs settle at the bid; their exposures offset
        let price = spec.bid;

        let first = self.close_position_internal(conv, ticket, volume, price, DealEntry::OutBy, 0, 0);
        if first {
            self.close_position_internal(conv, ticket_by, volume, price, DealEntry::OutBy, 0, 0);
        }
        first
    }

    // --- Pending order commands ---

    /// Place a pending order. The ledger never triggers it; the costs
    /// engine matches it against subsequent ticks.
    #[allow(clippy::too_many_arguments)]
    pub fn order_open(
        &mut self,
        symbol: &str,
        order_type: OrderType,
        volume: f64,
        price: f64,
        stop_price: f64,
        sl: f64,
        tp: f64,
        type_time: OrderTime,
        expiration_us: i64,
        comment: &str,
    ) -> bool {
        self.last_request = TradeRequest {
            action: TradeAction::Pending,
            symbol: symbol.to_string(),
            order_type,
            volume,
            price,
            stop_limit: stop_price,
            sl,
            tp,
            type_time,
            expiration_us,
            type_filling: self.type_filling,
            magic: self.magic,
            comment: comment.to_string(),
            ..TradeRequest::default()
        };
        self.last_result = TradeResult::default();

        let Some(spec) = self.symbol(symbol).cloned() else {
            return self.fail(Retcode::Invalid, "unknown symbol");
        };
        let side = if order_type.is_buy() {
            PositionType::Buy
        } else {
            PositionType::Sell
        };
        if let Some(rc) = Self::trade_mode_violation(&spec, side, false) {
            return self.fail(rc, "trade mode forbids this operation");
        }
        let Some(volume_micro) = spec.validate_volume(volume) else {
            return self.fail(Retcode::InvalidVolume, "volume out of range");
        };
        if !order_type.is_market() && price <= 0.0 {
            return self.fail(Retcode::InvalidPrice, "pending order requires a price");
        }
        if matches!(type_time, OrderTime::Specified | OrderTime::SpecifiedDay) && expiration_us <= 0
        {
            return self.fail(Retcode::InvalidExpiration, "expiration required");
        }

        let ticket = self.alloc_ticket();
        let mut order = PendingOrder::new(
            ticket,
            symbol,
            spec.symbol_id,
            order_type,
            volume_micro,
            spec.price_to_fixed(spec.normalize_price(price)),
            spec.digits,
            self.current_time_us,
        );
        order.price_stop_limit = if stop_price > 0.0 {
            spec.price_to_fixed(spec.normalize_price(stop_price))
        } else {
            0
        };
        order.stop_loss = if sl > 0.0 { spec.price_to_fixed(sl) } else { 0 };
        order.take_profit = if tp > 0.0 { spec.price_to_fixed(tp) } else { 0 };
        order.type_filling = self.type_filling;
        order.type_time = type_time;
        order.time_expiration_us = expiration_us;
        order.magic = self.magic;
        order.comment = comment.to_string();

        self.orders.insert(ticket, order);

        self.last_result.retcode = Retcode::Placed;
        self.last_result.order = ticket;
        self.last_result.volume = fixed::to_double(volume_micro, 6);
        self.last_result.price = price;
        self.last_result.comment = "order placed".to_string();
        true
    }

    /// Modify an active pending order. Only positive fields replace the
    /// stored values.
    pub fn order_modify(
        &mut self,
        ticket: Ticket,
        price: f64,
        sl: f64,
        tp: f64,
        stop_limit: f64,
        expiration_us: i64,
    ) -> bool {
        self.last_request = TradeRequest {
            action: TradeAction::Modify,
            order: ticket,
            price,
            sl,
            tp,
            stop_limit,
            expiration_us,
            magic: self.magic,
            ..TradeRequest::default()
        };
        self.last_result = TradeResult::default();

        let Some(order) = self.orders.get(&ticket) else {
            return self.fail(Retcode::InvalidOrder, "order not found");
        };
        let digits = order.digits;
        let order = self.orders.get_mut(&ticket).unwrap();
        if price > 0.0 {
            order.price_open = fixed::from_double(price, digits);
        }
        if sl > 0.0 {
            order.stop_loss = fixed::from_double(sl, digits);
        }
        if tp > 0.0 {
            order.take_profit = fixed::from_double(tp, digits);
        }
        if stop_limit > 0.0 {
            order.price_stop_limit = fixed::from_double(stop_limit, digits);
        }
        if expiration_us > 0 {
            order.time_expiration_us = expiration_us;
        }

        self.last_result.retcode = Retcode::Done;
        self.last_result.order = ticket;
        self.last_result.comment = "order modified".to_string();
        true
    }

    /// Cancel a pending order: mark CANCELED, stamp done time, move to the
    /// history-order log.
    pub fn order_delete(&mut self, ticket: Ticket) -> bool {
        self.last_request = TradeRequest {
            action: TradeAction::Remove,
            order: ticket,
            magic: self.magic,
            ..TradeRequest::default()
        };
        self.last_result = TradeResult::default();

        let Some(mut order) = self.orders.remove(&ticket) else {
            return self.fail(Retcode::InvalidOrder, "order not found");
        };
        order.state = OrderState::Canceled;
        order.time_done_us = self.current_time_us;
        self.history_orders.push(HistoryOrder::from(&order));

        self.last_result.retcode = Retcode::Done;
        self.last_result.order = ticket;
        self.last_result.comment = "order deleted".to_string();
        true
    }

    /// Retire orders whose time-in-force has elapsed. Returns the expired
    /// tickets so the host can observe the state changes.
    pub fn expire_orders(&mut self, now_us: i64) -> Vec<Ticket> {
        let expired: Vec<Ticket> = self
            .orders
            .values()
            .filter(|o| o.is_expired(now_us))
            .map(|o| o.ticket)
            .collect();
        for ticket in &expired {
            if let Some(mut order) = self.orders.remove(ticket) {
                order.state = OrderState::Expired;
                order.time_done_us = now_us;
                debug!(ticket = order.ticket, "pending order expired");
                self.history_orders.push(HistoryOrder::from(&order));
            }
        }
        expired
    }

    /// Fill a triggered pending order at its costed execution: transition
    /// to FILLED (or REJECTED when margin fails), create the position and
    /// emit its IN deal. Returns the new position ticket.
    pub fn execute_triggered_order(
        &mut self,
        conv: &CurrencyConverter,
        ticket: Ticket,
        exec: &ExecutionResult,
        timestamp_us: i64,
    ) -> Option<Ticket> {
        let Some(mut order) = self.orders.remove(&ticket) else {
            return None;
        };
        let side = if order.order_type.is_buy() {
            PositionType::Buy
        } else {
            PositionType::Sell
        };

        let position_ticket = self.open_position_executed(
            conv,
            order.symbol_id,
            side,
            order.volume_current,
            exec.fill_price,
            order.stop_loss,
            order.take_profit,
            exec.commission,
            order.ticket,
            &order.comment.clone(),
        );

        order.time_done_us = timestamp_us;
        match position_ticket {
            Some(_) => {
                order.state = OrderState::Filled;
                order.volume_current = 0;
            }
            None => {
                warn!(ticket, "triggered order rejected: insufficient margin");
                order.state = OrderState::Rejected;
            }
        }
        self.history_orders.push(HistoryOrder::from(&order));
        position_ticket
    }

    /// Close a position whose SL/TP fired, at the costed fill price.
    pub fn close_triggered_position(
        &mut self,
        conv: &CurrencyConverter,
        ticket: Ticket,
        exec: &ExecutionResult,
        _timestamp_us: i64,
    ) -> bool {
        let Some(position) = self.positions.get(&ticket) else {
            return false;
        };
        let volume = position.volume;
        self.close_position_internal(
            conv,
            ticket,
            volume,
            exec.fill_price,
            DealEntry::Out,
            exec.commission,
            0,
        )
    }

    /// Accumulate a swap amount on an open position.
    pub fn apply_swap(&mut self, ticket: Ticket, amount: i64) {
        if let Some(position) = self.positions.get_mut(&ticket) {
            position.swap += amount;
        }
    }

    // --- Balance operations ---

    /// Direct balance adjustment recorded as a BALANCE deal (deposits,
    /// corrections).
    pub fn balance_change(&mut self, amount: f64, comment: &str) -> bool {
        let amount_fixed = fixed::money_from_double(amount);
        self.account.add_balance(amount_fixed);

        let deal_ticket = self.alloc_ticket();
        self.deals.push(Deal {
            ticket: deal_ticket,
            order: 0,
            position_id: 0,
            symbol: String::new(),
            symbol_id: 0,
            deal_type: DealType::Balance,
            entry: DealEntry::In,
            volume: 0,
            price: 0,
            profit: amount_fixed,
            commission: 0,
            swap: 0,
            time_us: self.current_time_us,
            magic: self.magic,
            comment: comment.to_string(),
            entry_price: 0,
            exit_price: 0,
            entry_time_us: self.current_time_us,
            exit_time_us: self.current_time_us,
        });

        self.last_result = TradeResult {
            retcode: Retcode::Done,
            deal: deal_ticket,
            volume: 0.0,
            price: 0.0,
            comment: "balance updated".to_string(),
            ..TradeResult::default()
        };
        true
    }

    // --- Trailing stops ---

    /// Arm a trailing stop on a position.
    pub fn trailing_stop_enable(&mut self, ticket: Ticket, distance_points: i64, step_points: i64) -> bool {
        let Some(position) = self.positions.get_mut(&ticket) else {
            return false;
        };
        position.trailing = Some(TrailingStop {
            distance_points,
            step_points,
            trigger_price: position.price_current,
        });
        true
    }

    pub fn trailing_stop_disable(&mut self, ticket: Ticket) -> bool {
        match self.positions.get_mut(&ticket) {
            Some(position) => {
                position.trailing = None;
                true
            }
            None => false,
        }
    }

    /// Advance trailing stops for positions on one symbol. A stop only
    /// ever tightens: for longs the SL moves up when the candidate is
    /// strictly better (step-guarded), mirrored for shorts. Returns the
    /// tickets whose SL moved.
    pub fn update_trailing_stops(&mut self, symbol_id: SymbolId) -> Vec<Ticket> {
        let mut moved = Vec::new();
        for position in self.positions.values_mut() {
            if position.symbol_id != symbol_id {
                continue;
            }
            let Some(trailing) = position.trailing else {
                continue;
            };
            if trailing.distance_points == 0 {
                continue;
            }
            let price = position.price_current;
            let current_sl = position.stop_loss;

            match position.position_type {
                PositionType::Buy => {
                    let candidate = price - trailing.distance_points;
                    if current_sl != 0 && candidate <= current_sl {
                        continue;
                    }
                    if trailing.step_points > 0 {
                        let reference = if current_sl != 0 {
                            candidate - current_sl
                        } else {
                            price - trailing.trigger_price
                        };
                        if reference < trailing.step_points {
                            continue;
                        }
                    }
                    position.stop_loss = candidate;
                }
                PositionType::Sell => {
                    let candidate = price + trailing.distance_points;
                    if current_sl != 0 && candidate >= current_sl {
                        continue;
                    }
                    if trailing.step_points > 0 {
                        let reference = if current_sl != 0 {
                            current_sl - candidate
                        } else {
                            trailing.trigger_price - price
                        };
                        if reference < trailing.step_points {
                            continue;
                        }
                    }
                    position.stop_loss = candidate;
                }
            }

            position.trailing = Some(TrailingStop {
                trigger_price: price,
                ..trailing
            });
            moved.push(position.ticket);
        }
        moved
    }

    // --- Stop-out ---

    /// Forcibly close the largest losing position while the margin level
    /// sits below the stop-out threshold. Repeats until the level
    /// recovers, positions exhaust, or margin reaches zero. Returns the
    /// number of liquidated positions.
    pub fn check_stop_out(&mut self, conv: &CurrencyConverter) -> u32 {
        if self.account.is_margin_call() && !self.account.is_stop_out() {
            warn!(
                margin_level = self.account.margin_level(),
                "margin call: level below warning threshold"
            );
        }

        let mut closed = 0_u32;
        while self.account.is_stop_out() {
            let worst = self
                .positions
                .values()
                .map(|p| (self.convert_to_account(conv, p.profit, p.symbol_id), p.ticket))
                .filter(|(profit, _)| *profit < 0)
                .min();
            let Some((profit, ticket)) = worst else {
                break;
            };
            warn!(
                ticket,
                loss = fixed::money_to_double(profit),
                margin_level = self.account.margin_level(),
                "stop-out: force-closing largest loser"
            );
            if !self.position_close(conv, ticket, 0) {
                break;
            }
            closed += 1;
        }
        closed
    }

    // --- Snapshot / restore ---

    /// Deep copy of the whole ledger. Symbols are ordered by id so two
    /// snapshots of identical state compare equal.
    pub fn create_snapshot(&self) -> Snapshot {
        let mut symbols: Vec<SymbolSpec> = self.symbols.values().cloned().collect();
        symbols.sort_by_key(|s| s.symbol_id);
        Snapshot {
            account: self.account.clone(),
            positions: self.positions.values().cloned().collect(),
            orders: self.orders.values().cloned().collect(),
            deals: self.deals.clone(),
            history_orders: self.history_orders.clone(),
            symbols,
            next_ticket: self.next_ticket,
            current_time_us: self.current_time_us,
        }
    }

    /// Replace all ledger state atomically; the ticket counter resumes
    /// from the snapshot.
    pub fn restore_snapshot(&mut self, snapshot: Snapshot) {
        self.account = snapshot.account;
        self.next_ticket = snapshot.next_ticket;
        self.current_time_us = snapshot.current_time_us;
        self.deals = snapshot.deals;
        self.history_orders = snapshot.history_orders;

        self.positions.clear();
        for position in snapshot.positions {
            self.positions.insert(position.ticket, position);
        }
        self.orders.clear();
        for order in snapshot.orders {
            self.orders.insert(order.ticket, order);
        }
        self.symbols.clear();
        self.symbol_ids.clear();
        for spec in snapshot.symbols {
            self.register_symbol(spec);
        }
    }

    // --- Internal helpers ---

    fn alloc_ticket(&mut self) -> Ticket {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    fn fail(&mut self, retcode: Retcode, comment: &str) -> bool {
        self.last_result.retcode = retcode;
        self.last_result.comment = comment.to_string();
        false
    }

    fn trade_mode_violation(spec: &SymbolSpec, side: PositionType, closing: bool) -> Option<Retcode> {
        match spec.trade_mode {
            TradeMode::Full => None,
            TradeMode::Disabled => Some(Retcode::TradeDisabled),
            TradeMode::CloseOnly => {
                if closing {
                    None
                } else {
                    Some(Retcode::TradeDisabled)
                }
            }
            TradeMode::LongOnly => {
                if closing || side == PositionType::Buy {
                    None
                } else {
                    Some(Retcode::Invalid)
                }
            }
            TradeMode::ShortOnly => {
                if closing || side == PositionType::Sell {
                    None
                } else {
                    Some(Retcode::Invalid)
                }
            }
        }
    }

    /// Margin requirement for a volume at a price, account-currency micros.
    fn required_margin(&self, conv: &CurrencyConverter, spec: &SymbolSpec, volume: i64, price: i64) -> i64 {
        let leverage = self.account.leverage.max(1);
        let notional = fixed::rescale(
            volume as i128 * spec.contract_size as i128 * price as i128,
            spec.digits,
        );
        let margin = fixed::div_int(notional, leverage);
        // The notional (volume * contract * price) is denominated in the
        // quote/profit currency; convert it into the account currency
        self.convert_margin(conv, margin, spec)
    }

    fn convert_margin(&self, conv: &CurrencyConverter, amount: i64, spec: &SymbolSpec) -> i64 {
        let margin_ccy = &spec.currency_profit;
        if margin_ccy.is_empty() || *margin_ccy == self.account.currency {
            return amount;
        }
        match conv.convert_money(amount, margin_ccy, &self.account.currency) {
            Ok(converted) => converted,
            Err(err) => {
                warn!(symbol = %spec.name, %err, "margin conversion unavailable, using raw amount");
                amount
            }
        }
    }

    /// Hypothetical post-trade margin check; records the projection in
    /// `last_check`. Fails when the post-trade margin level would fall
    /// below 100%.
    fn check_margin(&mut self, conv: &CurrencyConverter, spec: &SymbolSpec, volume: i64, price: i64) -> bool {
        let required = self.required_margin(conv, spec, volume, price);
        let new_margin = self.account.margin_fixed() + required;
        let equity = self.account.equity_fixed();
        let margin_free = equity - new_margin;
        let margin_level = if new_margin > 0 {
            equity as f64 / new_margin as f64 * 100.0
        } else {
            f64::INFINITY
        };

        let sufficient = margin_level >= 100.0;
        self.last_check = TradeCheckResult {
            retcode: if sufficient { Retcode::Done } else { Retcode::NoMoney },
            balance: self.account.balance(),
            equity: fixed::money_to_double(equity),
            profit: self.account.profit(),
            margin: fixed::money_to_double(new_margin),
            margin_free: fixed::money_to_double(margin_free),
            margin_level,
            comment: if sufficient {
                "request valid".to_string()
            } else {
                "insufficient margin".to_string()
            },
        };
        sufficient
    }

    #[allow(clippy::too_many_arguments)]
    fn open_position_internal(
        &mut self,
        conv: &CurrencyConverter,
        spec: &SymbolSpec,
        side: PositionType,
        volume: i64,
        price: i64,
        sl_fixed: i64,
        tp_fixed: i64,
        commission: i64,
        order_ticket: Ticket,
        comment: &str,
    ) -> Ticket {
        let ticket = self.alloc_ticket();
        let mut position = Position::new(
            ticket,
            &spec.name,
            spec.symbol_id,
            side,
            volume,
            price,
            spec.digits,
            spec.contract_size,
            self.current_time_us,
        );
        position.stop_loss = sl_fixed;
        position.take_profit = tp_fixed;
        position.commission = commission;
        position.magic = self.magic;
        position.comment = comment.to_string();

        let margin = self.required_margin(conv, spec, volume, price);
        self.positions.insert(ticket, position);
        self.account.add_margin(margin);

        let deal_ticket = self.alloc_ticket();
        self.deals.push(Deal {
            ticket: deal_ticket,
            order: order_ticket,
            position_id: ticket,
            symbol: spec.name.clone(),
            symbol_id: spec.symbol_id,
            deal_type: match side {
                PositionType::Buy => DealType::Buy,
                PositionType::Sell => DealType::Sell,
            },
            entry: DealEntry::In,
            volume,
            price,
            profit: 0,
            commission,
            swap: 0,
            time_us: self.current_time_us,
            magic: self.magic,
            comment: comment.to_string(),
            entry_price: price,
            exit_price: 0,
            entry_time_us: self.current_time_us,
            exit_time_us: 0,
        });
        self.last_result.deal = deal_ticket;

        self.update_equity(conv);
        ticket
    }

    /// Shared close path. Realizes profit proportionally to the closed
    /// volume, consumes commission and swap in the same proportion,
    /// appends the OUT deal, releases margin and removes or shrinks the
    /// position.
    #[allow(clippy::too_many_arguments)]
    fn close_position_internal(
        &mut self,
        conv: &CurrencyConverter,
        ticket: Ticket,
        volume: i64,
        price: i64,
        entry: DealEntry,
        extra_commission: i64,
        order_ticket: Ticket,
    ) -> bool {
        let Some(position) = self.positions.get_mut(&ticket) else {
            return self.fail(Retcode::PositionClosed, "position not found");
        };

        position.update_price(price, self.current_time_us);
        let close_volume = volume.min(position.volume);
        let full_close = close_volume >= position.volume;

        let realized_profit = prorate(position.profit, close_volume, position.volume);
        let commission_part =
            prorate(position.commission, close_volume, position.volume) + extra_commission;
        let swap_part = prorate(position.swap, close_volume, position.volume);

        let symbol_id = position.symbol_id;
        let symbol = position.symbol.clone();
        let side = position.position_type;
        let open_price = position.price_open;
        let open_volume = position.volume;
        let open_time = position.open_time_us;
        let magic = position.magic;
        let comment = position.comment.clone();

        let realized_account = self.convert_to_account(conv, realized_profit, symbol_id);

        let deal_ticket = self.alloc_ticket();
        self.deals.push(Deal {
            ticket: deal_ticket,
            order: order_ticket,
            position_id: ticket,
            symbol: symbol.clone(),
            symbol_id,
            deal_type: match side {
                PositionType::Buy => DealType::Sell,
                PositionType::Sell => DealType::Buy,
            },
            entry,
            volume: close_volume,
            price,
            profit: realized_account,
            commission: commission_part,
            swap: swap_part,
            time_us: self.current_time_us,
            magic,
            comment,
            entry_price: open_price,
            exit_price: price,
            entry_time_us: open_time,
            exit_time_us: self.current_time_us,
        });

        self.account
            .apply_realized_pnl(realized_account, commission_part, swap_part);

        let spec = self.symbols.get(&symbol_id).cloned();
        if full_close {
            if let Some(spec) = &spec {
                let margin = self.required_margin(conv, spec, open_volume, open_price);
                self.account.sub_margin(margin);
            }
            self.positions.remove(&ticket);
        } else {
            if let Some(spec) = &spec {
                let old_margin = self.required_margin(conv, spec, open_volume, open_price);
                let new_margin =
                    self.required_margin(conv, spec, open_volume - close_volume, open_price);
                self.account.sub_margin(old_margin - new_margin);
            }
            if let Some(position) = self.positions.get_mut(&ticket) {
                position.volume -= close_volume;
                position.commission -= commission_part - extra_commission;
                position.swap -= swap_part;
                position.recalculate_profit();
            }
        }

        self.update_equity(conv);

        self.last_result.retcode = if full_close { Retcode::Done } else { Retcode::DonePartial };
        self.last_result.deal = deal_ticket;
        self.last_result.volume = fixed::to_double(close_volume, 6);
        self.last_result.price = spec
            .as_ref()
            .map(|s| s.price_to_double(price))
            .unwrap_or_default();
        self.last_result.comment = if full_close {
            "position closed".to_string()
        } else {
            "position partially closed".to_string()
        };
        true
    }
}

// --- WAL recovery support ---
//
// Replay entry points that honor tickets recorded in the log instead of
// drawing fresh ones, so a recovered ledger matches the pre-crash state.
impl Trade {
    /// Ensure the ticket counter has moved past a recovered ticket.
    pub(crate) fn bump_ticket_counter(&mut self, ticket: Ticket) {
        if ticket >= self.next_ticket {
            self.next_ticket = ticket + 1;
        }
    }

    /// Re-create a position under its recorded ticket, reserving margin
    /// and appending its IN deal.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn recover_position_open(
        &mut self,
        conv: &CurrencyConverter,
        ticket: Ticket,
        symbol_id: SymbolId,
        side: PositionType,
        volume: i64,
        price: i64,
        sl_fixed: i64,
        tp_fixed: i64,
        commission: i64,
        order_ticket: Ticket,
        time_us: i64,
    ) -> bool {
        let Some(spec) = self.symbols.get(&symbol_id).cloned() else {
            return false;
        };
        self.bump_ticket_counter(ticket);
        let mut position = Position::new(
            ticket,
            &spec.name,
            symbol_id,
            side,
            volume,
            price,
            spec.digits,
            spec.contract_size,
            time_us,
        );
        position.stop_loss = sl_fixed;
        position.take_profit = tp_fixed;
        position.commission = commission;
        self.positions.insert(ticket, position);

        let margin = self.required_margin(conv, &spec, volume, price);
        self.account.add_margin(margin);

        let deal_ticket = self.alloc_ticket();
        self.deals.push(Deal {
            ticket: deal_ticket,
            order: order_ticket,
            position_id: ticket,
            symbol: spec.name.clone(),
            symbol_id,
            deal_type: match side {
                PositionType::Buy => DealType::Buy,
                PositionType::Sell => DealType::Sell,
            },
            entry: DealEntry::In,
            volume,
            price,
            profit: 0,
            commission,
            swap: 0,
            time_us,
            magic: 0,
            comment: "recovered".to_string(),
            entry_price: price,
            exit_price: 0,
            entry_time_us: time_us,
            exit_time_us: 0,
        });

        // The generating order (if any) reached FILLED before the crash
        if order_ticket != 0 {
            if let Some(mut order) = self.orders.remove(&order_ticket) {
                order.state = OrderState::Filled;
                order.volume_current = 0;
                order.time_done_us = time_us;
                self.history_orders.push(HistoryOrder::from(&order));
            }
        }

        self.update_equity(conv);
        true
    }

    /// Replay a close at its recorded price and commission.
    pub(crate) fn recover_position_close(
        &mut self,
        conv: &CurrencyConverter,
        ticket: Ticket,
        volume: i64,
        price: i64,
        commission: i64,
        time_us: i64,
    ) -> bool {
        self.current_time_us = time_us;
        self.close_position_internal(conv, ticket, volume, price, DealEntry::Out, commission, 0)
    }

    /// Replay an SL/TP mutation.
    pub(crate) fn recover_position_modify(&mut self, ticket: Ticket, sl: i64, tp: i64) -> bool {
        match self.positions.get_mut(&ticket) {
            Some(position) => {
                if sl > 0 {
                    position.stop_loss = sl;
                }
                if tp > 0 {
                    position.take_profit = tp;
                }
                true
            }
            None => false,
        }
    }

    /// Re-install a pending order under its recorded ticket.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn recover_order_place(
        &mut self,
        ticket: Ticket,
        symbol_id: SymbolId,
        order_type: OrderType,
        volume: i64,
        price: i64,
        stop_limit: i64,
        sl: i64,
        tp: i64,
        type_time: OrderTime,
        expiration_us: i64,
        time_us: i64,
    ) -> bool {
        let Some(spec) = self.symbols.get(&symbol_id) else {
            return false;
        };
        let digits = spec.digits;
        let name = spec.name.clone();
        self.bump_ticket_counter(ticket);
        let mut order =
            PendingOrder::new(ticket, &name, symbol_id, order_type, volume, price, digits, time_us);
        order.price_stop_limit = stop_limit;
        order.stop_loss = sl;
        order.take_profit = tp;
        order.type_time = type_time;
        order.time_expiration_us = expiration_us;
        self.orders.insert(ticket, order);
        true
    }
}

/// `value * part / whole` with i128 precision, rounding half away from zero.
fn prorate(value: i64, part: i64, whole: i64) -> i64 {
    if whole == 0 {
        return 0;
    }
    let numerator = value as i128 * part as i128;
    let whole = whole as i128;
    let half = if (numerator < 0) != (whole < 0) { -(whole / 2) } else { whole / 2 };
    ((numerator + half) / whole) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolSpec;

    fn eurusd() -> SymbolSpec {
        SymbolSpec::new("EURUSD", 1, 5)
            .with_contract_size(100_000)
            .with_volume_limits(0.01, 100.0, 0.01)
            .with_currencies("EUR", "USD", "USD")
    }

    fn ledger() -> (Trade, CurrencyConverter) {
        let mut trade = Trade::new(10_000.0, "USD", 100);
        trade.register_symbol(eurusd());
        let conv = CurrencyConverter::new();
        (trade, conv)
    }

    fn ledger_with_quote() -> (Trade, CurrencyConverter) {
        let (mut trade, conv) = ledger();
        trade.update_prices(&conv, "EURUSD", 1.10000, 1.10015, 1_000_000);
        (trade, conv)
    }

    #[test]
    fn test_open_reserves_margin_and_emits_in_deal() {
        let (mut trade, conv) = ledger_with_quote();
        assert!(trade.buy(&conv, 0.1, "EURUSD", 0.0, 0.0, ""));

        let result = trade.result().clone();
        assert_eq!(result.retcode, Retcode::Done);
        assert_eq!(result.price, 1.10015);

        // 0.1 * 100000 * 1.10015 / 100 = 110.015
        assert!((trade.account().margin() - 110.015).abs() < 1e-6);
        assert_eq!(trade.positions().len(), 1);
        assert_eq!(trade.deals().len(), 1);
        assert_eq!(trade.deals()[0].entry, DealEntry::In);
        assert_eq!(trade.deals()[0].deal_type, DealType::Buy);
    }

    #[test]
    fn test_ticket_monotonicity_across_entities() {
        let (mut trade, conv) = ledger_with_quote();
        trade.buy(&conv, 0.1, "EURUSD", 0.0, 0.0, "");
        trade.order_open(
            "EURUSD",
            OrderType::BuyLimit,
            0.1,
            1.09000,
            0.0,
            0.0,
            0.0,
            OrderTime::Gtc,
            0,
            "",
        );
        let pos_ticket = *trade.positions().keys().next().unwrap();
        let deal_ticket = trade.deals()[0].ticket;
        let order_ticket = trade.orders().keys().next().copied().unwrap();

        let mut all = vec![pos_ticket, deal_ticket, order_ticket];
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 3, "tickets must be unique across entity kinds");
        assert_eq!(pos_ticket, 1000);
        assert_eq!(deal_ticket, 1001);
        assert_eq!(order_ticket, 1002);
    }

    #[test]
    fn test_invalid_volume() {
        let (mut trade, conv) = ledger_with_quote();
        assert!(!trade.buy(&conv, 1000.0, "EURUSD", 0.0, 0.0, ""));
        assert_eq!(trade.result().retcode, Retcode::InvalidVolume);
        assert!(trade.positions().is_empty());

        assert!(!trade.buy(&conv, 0.001, "EURUSD", 0.0, 0.0, ""));
        assert_eq!(trade.result().retcode, Retcode::InvalidVolume);
    }

    #[test]
    fn test_unknown_symbol() {
        let (mut trade, conv) = ledger_with_quote();
        assert!(!trade.buy(&conv, 0.1, "GBPUSD", 0.0, 0.0, ""));
        assert_eq!(trade.result().retcode, Retcode::Invalid);
    }

    #[test]
    fn test_no_money() {
        let (mut trade, conv) = ledger_with_quote();
        // 100 lots needs $110,015 margin against $10,000 equity
        assert!(!trade.buy(&conv, 100.0, "EURUSD", 0.0, 0.0, ""));
        assert_eq!(trade.result().retcode, Retcode::NoMoney);
        assert_eq!(trade.check_result().retcode, Retcode::NoMoney);
        assert!(trade.positions().is_empty());
        assert_eq!(trade.account().margin(), 0.0);
    }

    #[test]
    fn test_round_trip_s1() {
        // Single-symbol round trip per the seed scenario: buy 0.1 at
        // 1.10015, price rises 85 points, close at bid 1.10100 -> +$8.50.
        let (mut trade, conv) = ledger_with_quote();
        assert!(trade.buy(&conv, 0.1, "EURUSD", 0.0, 0.0, ""));
        let ticket = *trade.positions().keys().next().unwrap();

        trade.update_prices(&conv, "EURUSD", 1.10100, 1.10115, 2_000_000);
        let position = trade.position(ticket).unwrap();
        assert_eq!(position.profit, 8_500_000);
        assert!(
            (trade.account().equity() - (10_000.0 + 8.5)).abs() < 1e-6,
            "equity {} != balance + profit",
            trade.account().equity()
        );

        assert!(trade.position_close(&conv, ticket, 0));
        assert_eq!(trade.result().retcode, Retcode::Done);
        assert!(trade.positions().is_empty());
        assert_eq!(trade.account().margin(), 0.0);
        assert!((trade.account().balance() - 10_008.5).abs() < 1e-6);

        // One IN deal, one OUT deal
        assert_eq!(trade.deals().len(), 2);
        let out = &trade.deals()[1];
        assert_eq!(out.entry, DealEntry::Out);
        assert_eq!(out.profit, 8_500_000);
        assert_eq!(out.entry_price, 110_015);
        assert_eq!(out.exit_price, 110_100);
    }

    #[test]
    fn test_partial_close() {
        let (mut trade, conv) = ledger_with_quote();
        assert!(trade.buy(&conv, 1.0, "EURUSD", 0.0, 0.0, ""));
        let ticket = *trade.positions().keys().next().unwrap();
        let full_margin = trade.account().margin();

        trade.update_prices(&conv, "EURUSD", 1.10100, 1.10115, 2_000_000);
        assert!(trade.position_close_partial(&conv, ticket, 0.4, 0));
        assert_eq!(trade.result().retcode, Retcode::DonePartial);

        let position = trade.position(ticket).unwrap();
        assert_eq!(position.volume, 600_000);
        // 40% of the margin was released
        assert!((trade.account().margin() - full_margin * 0.6).abs() < 1e-3);
        // 40% of the 85-point profit was realized: 0.4 * 100000 * 0.00085 = $34
        assert!((trade.account().balance() - 10_034.0).abs() < 1e-6);

        // Close volume >= remaining promotes to full close
        assert!(trade.position_close_partial(&conv, ticket, 5.0, 0));
        assert_eq!(trade.result().retcode, Retcode::Done);
        assert!(trade.positions().is_empty());
        assert!((trade.account().balance() - 10_085.0).abs() < 1e-6);
        assert_eq!(trade.account().margin(), 0.0);
    }

    #[test]
    fn test_close_by() {
        let (mut trade, conv) = ledger_with_quote();
        assert!(trade.buy(&conv, 0.3, "EURUSD", 0.0, 0.0, ""));
        assert!(trade.sell(&conv, 0.1, "EURUSD", 0.0, 0.0, ""));
        let tickets: Vec<Ticket> = trade.positions().keys().copied().collect();

        assert!(trade.position_close_by(&conv, tickets[0], tickets[1]));
        // Smaller leg extinguished, larger reduced by 0.1
        assert_eq!(trade.positions().len(), 1);
        let survivor = trade.position(tickets[0]).unwrap();
        assert_eq!(survivor.volume, 200_000);
        // OUT_BY deals recorded for both legs
        let out_by: Vec<&Deal> = trade
            .deals()
            .iter()
            .filter(|d| d.entry == DealEntry::OutBy)
            .collect();
        assert_eq!(out_by.len(), 2);
    }

    #[test]
    fn test_close_by_validation() {
        let (mut trade, conv) = ledger_with_quote();
        trade.buy(&conv, 0.1, "EURUSD", 0.0, 0.0, "");
        trade.buy(&conv, 0.1, "EURUSD", 0.0, 0.0, "");
        let tickets: Vec<Ticket> = trade.positions().keys().copied().collect();
        // Same direction cannot be closed by each other
        assert!(!trade.position_close_by(&conv, tickets[0], tickets[1]));
        assert_eq!(trade.result().retcode, Retcode::Invalid);
    }

    #[test]
    fn test_position_modify_stops_level() {
        let (mut trade, conv) = ledger_with_quote();
        let mut spec = eurusd();
        spec.stops_level = 50;
        trade.register_symbol(spec);
        trade.update_prices(&conv, "EURUSD", 1.10000, 1.10015, 1_000_000);
        trade.buy(&conv, 0.1, "EURUSD", 0.0, 0.0, "");
        let ticket = *trade.positions().keys().next().unwrap();

        // SL too close to the bid (inside 50 points)
        assert!(!trade.position_modify(ticket, 1.09980, 0.0));
        assert_eq!(trade.result().retcode, Retcode::InvalidStops);

        // Valid SL 100 points below the bid
        assert!(trade.position_modify(ticket, 1.09900, 0.0));
        assert_eq!(trade.position(ticket).unwrap().stop_loss, 109_900);

        // TP must sit above bid + stops level for longs
        assert!(!trade.position_modify(ticket, 0.0, 1.10020));
        assert_eq!(trade.result().retcode, Retcode::InvalidStops);
        assert!(trade.position_modify(ticket, 0.0, 1.10100));
    }

    #[test]
    fn test_order_lifecycle_place_modify_delete() {
        let (mut trade, _conv) = ledger_with_quote();
        assert!(trade.order_open(
            "EURUSD",
            OrderType::BuyLimit,
            0.1,
            1.09000,
            0.0,
            0.0,
            0.0,
            OrderTime::Gtc,
            0,
            "dip buy",
        ));
        assert_eq!(trade.result().retcode, Retcode::Placed);
        let ticket = trade.result().order;
        assert_eq!(trade.order(ticket).unwrap().state, OrderState::Placed);

        assert!(trade.order_modify(ticket, 1.08900, 1.08500, 1.09500, 0.0, 0));
        let order = trade.order(ticket).unwrap();
        assert_eq!(order.price_open, 108_900);
        assert_eq!(order.stop_loss, 108_500);
        assert_eq!(order.take_profit, 109_500);

        assert!(trade.order_delete(ticket));
        assert!(trade.order(ticket).is_none());
        assert_eq!(trade.history_orders().len(), 1);
        assert_eq!(trade.history_orders()[0].state, OrderState::Canceled);

        // Deleting again fails
        assert!(!trade.order_delete(ticket));
        assert_eq!(trade.result().retcode, Retcode::InvalidOrder);
    }

    #[test]
    fn test_order_requires_price() {
        let (mut trade, _conv) = ledger_with_quote();
        assert!(!trade.order_open(
            "EURUSD",
            OrderType::SellStop,
            0.1,
            0.0,
            0.0,
            0.0,
            0.0,
            OrderTime::Gtc,
            0,
            "",
        ));
        assert_eq!(trade.result().retcode, Retcode::InvalidPrice);
    }

    #[test]
    fn test_order_expiration() {
        let (mut trade, _conv) = ledger_with_quote();
        trade.order_open(
            "EURUSD",
            OrderType::BuyLimit,
            0.1,
            1.09000,
            0.0,
            0.0,
            0.0,
            OrderTime::Specified,
            5_000_000,
            "",
        );
        let ticket = trade.result().order;

        assert!(trade.expire_orders(4_999_999).is_empty());
        let expired = trade.expire_orders(5_000_000);
        assert_eq!(expired, vec![ticket]);
        assert!(trade.orders().is_empty());
        assert_eq!(trade.history_orders().last().unwrap().state, OrderState::Expired);
    }

    #[test]
    fn test_execute_triggered_order_creates_position() {
        let (mut trade, conv) = ledger_with_quote();
        trade.order_open(
            "EURUSD",
            OrderType::BuyLimit,
            0.1,
            1.09000,
            0.0,
            0.0,
            0.0,
            OrderTime::Gtc,
            0,
            "",
        );
        let order_ticket = trade.result().order;

        let exec = ExecutionResult {
            executed: true,
            fill_price: 109_000,
            slippage: 0,
            commission: 700_000,
            spread_cost: 15,
        };
        let pos_ticket = trade
            .execute_triggered_order(&conv, order_ticket, &exec, 2_000_000)
            .unwrap();

        let position = trade.position(pos_ticket).unwrap();
        assert_eq!(position.price_open, 109_000);
        assert_eq!(position.commission, 700_000);
        assert!(trade.orders().is_empty());
        assert_eq!(trade.history_orders().last().unwrap().state, OrderState::Filled);
        // IN deal references the originating order
        assert_eq!(trade.deals().last().unwrap().order, order_ticket);
    }

    #[test]
    fn test_trailing_stop_s6() {
        let (mut trade, conv) = ledger_with_quote();
        trade.update_prices(&conv, "EURUSD", 1.10005, 1.10020, 1_000_000);
        trade.buy(&conv, 1.0, "EURUSD", 0.0, 0.0, "");
        let ticket = *trade.positions().keys().next().unwrap();

        assert!(trade.trailing_stop_enable(ticket, 50, 0));

        // Price advances to 1.10100: SL trails to 1.10050
        trade.update_prices(&conv, "EURUSD", 1.10100, 1.10115, 2_000_000);
        let moved = trade.update_trailing_stops(1);
        assert_eq!(moved, vec![ticket]);
        assert_eq!(trade.position(ticket).unwrap().stop_loss, 110_050);

        // Down-tick must NOT lower the stop
        trade.update_prices(&conv, "EURUSD", 1.10050, 1.10065, 3_000_000);
        assert!(trade.update_trailing_stops(1).is_empty());
        assert_eq!(trade.position(ticket).unwrap().stop_loss, 110_050);
    }

    #[test]
    fn test_trailing_stop_step_guard() {
        let (mut trade, conv) = ledger_with_quote();
        trade.buy(&conv, 1.0, "EURUSD", 0.0, 0.0, "");
        let ticket = *trade.positions().keys().next().unwrap();
        trade.trailing_stop_enable(ticket, 50, 30);

        // First move: price gained 85 points from the trigger, enough
        trade.update_prices(&conv, "EURUSD", 1.10100, 1.10115, 2_000_000);
        assert_eq!(trade.update_trailing_stops(1), vec![ticket]);
        assert_eq!(trade.position(ticket).unwrap().stop_loss, 110_050);

        // +10 points improvement is below the 30-point step: frozen
        trade.update_prices(&conv, "EURUSD", 1.10110, 1.10125, 3_000_000);
        assert!(trade.update_trailing_stops(1).is_empty());

        // +40 points clears the step
        trade.update_prices(&conv, "EURUSD", 1.10140, 1.10155, 4_000_000);
        assert_eq!(trade.update_trailing_stops(1), vec![ticket]);
        assert_eq!(trade.position(ticket).unwrap().stop_loss, 110_090);
    }

    #[test]
    fn test_trailing_stop_sell_mirror() {
        let (mut trade, conv) = ledger_with_quote();
        trade.sell(&conv, 1.0, "EURUSD", 0.0, 0.0, "");
        let ticket = *trade.positions().keys().next().unwrap();
        trade.trailing_stop_enable(ticket, 50, 0);

        // Favorable down move: SL trails above the ask
        trade.update_prices(&conv, "EURUSD", 1.09900, 1.09915, 2_000_000);
        assert_eq!(trade.update_trailing_stops(1), vec![ticket]);
        assert_eq!(trade.position(ticket).unwrap().stop_loss, 109_965);

        // Adverse up-tick: stop stays
        trade.update_prices(&conv, "EURUSD", 1.09950, 1.09965, 3_000_000);
        assert!(trade.update_trailing_stops(1).is_empty());
        assert_eq!(trade.position(ticket).unwrap().stop_loss, 109_965);
    }

    #[test]
    fn test_stop_out_closes_largest_loser() {
        let (mut trade, conv) = ledger_with_quote();
        trade.account_mut().set_stop_out_level(50.0);
        trade.buy(&conv, 0.5, "EURUSD", 0.0, 0.0, "");
        trade.buy(&conv, 0.1, "EURUSD", 0.0, 0.0, "");
        assert_eq!(trade.positions().len(), 2);
        let big = *trade.positions().keys().next().unwrap();

        // Crash the market: 0.6 lots lose 0.0185 -> -$1,110 each way
        // Equity ~ 10000 - 0.6*100000*0.165 = ... drive it deep under water
        trade.update_prices(&conv, "EURUSD", 0.94500, 0.94515, 2_000_000);
        // Margin ~660, equity = 10000 - 0.6*100000*0.155 = 700, level > 50%:
        // push further
        trade.update_prices(&conv, "EURUSD", 0.93800, 0.93815, 3_000_000);

        if trade.account().is_stop_out() {
            let closed = trade.check_stop_out(&conv);
            assert!(closed >= 1);
            // Largest loser (the 0.5-lot position) went first
            assert!(trade.position(big).is_none());
            assert!(!trade.account().is_stop_out());
        } else {
            // Drive to guaranteed stop-out
            trade.update_prices(&conv, "EURUSD", 0.50000, 0.50015, 4_000_000);
            let closed = trade.check_stop_out(&conv);
            assert!(closed >= 1);
            assert!(trade.position(big).is_none());
        }
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let (mut trade, conv) = ledger_with_quote();
        trade.buy(&conv, 0.1, "EURUSD", 0.0, 0.0, "keep");
        trade.order_open(
            "EURUSD",
            OrderType::SellLimit,
            0.1,
            1.10500,
            0.0,
            0.0,
            0.0,
            OrderTime::Gtc,
            0,
            "tp order",
        );
        let snapshot = trade.create_snapshot();

        // Mutate heavily after the snapshot
        trade.update_prices(&conv, "EURUSD", 1.10100, 1.10115, 2_000_000);
        let ticket = *trade.positions().keys().next().unwrap();
        trade.position_close(&conv, ticket, 0);
        trade.buy(&conv, 0.2, "EURUSD", 0.0, 0.0, "other");

        trade.restore_snapshot(snapshot.clone());
        let restored = trade.create_snapshot();
        assert_eq!(snapshot, restored);

        // Ticket counter resumes from the snapshot
        trade.buy(&conv, 0.1, "EURUSD", 0.0, 0.0, "");
        assert_eq!(*trade.positions().keys().last().unwrap(), snapshot.next_ticket);
    }

    #[test]
    fn test_balance_change_deal() {
        let (mut trade, _conv) = ledger();
        assert!(trade.balance_change(500.0, "deposit"));
        assert!((trade.account().balance() - 10_500.0).abs() < 1e-9);
        let deal = trade.deals().last().unwrap();
        assert_eq!(deal.deal_type, DealType::Balance);
        assert_eq!(deal.profit, 500_000_000);
    }

    #[test]
    fn test_trade_mode_policies() {
        let (mut trade, conv) = ledger();
        let mut spec = eurusd();
        spec.trade_mode = TradeMode::LongOnly;
        trade.register_symbol(spec);
        trade.update_prices(&conv, "EURUSD", 1.10000, 1.10015, 1_000_000);

        assert!(trade.buy(&conv, 0.1, "EURUSD", 0.0, 0.0, ""));
        assert!(!trade.sell(&conv, 0.1, "EURUSD", 0.0, 0.0, ""));
        assert_eq!(trade.result().retcode, Retcode::Invalid);

        let mut spec = eurusd();
        spec.trade_mode = TradeMode::Disabled;
        trade.register_symbol(spec);
        assert!(!trade.buy(&conv, 0.1, "EURUSD", 0.0, 0.0, ""));
        assert_eq!(trade.result().retcode, Retcode::TradeDisabled);
    }

    #[test]
    fn test_profit_currency_conversion_in_equity() {
        // USDJPY profits accrue in JPY and must be converted to USD
        let mut trade = Trade::new(10_000.0, "USD", 100);
        let spec = SymbolSpec::new("USDJPY", 2, 3)
            .with_contract_size(100_000)
            .with_volume_limits(0.01, 100.0, 0.01)
            .with_currencies("USD", "JPY", "USD");
        trade.register_symbol(spec);

        let mut conv = CurrencyConverter::new();
        conv.register_pair("USD", "JPY", 150.0, 0);

        trade.update_prices(&conv, "USDJPY", 150.000, 150.020, 1_000_000);
        assert!(trade.buy(&conv, 0.1, "USDJPY", 0.0, 0.0, ""));

        // +0.5 JPY per USD: profit = 0.1 * 100000 * 0.5 = 5000 JPY = $33.33
        trade.update_prices(&conv, "USDJPY", 150.520, 150.540, 2_000_000);
        let profit_jpy = trade.positions().values().next().unwrap().profit;
        assert_eq!(profit_jpy, 5_000_000_000); // 5000 JPY in micros
        let equity = trade.account().equity();
        assert!(
            (equity - (10_000.0 + 5_000.0 / 150.0)).abs() < 0.01,
            "equity {} missing JPY->USD conversion",
            equity
        );
    }

    #[test]
    fn test_prorate() {
        assert_eq!(prorate(100, 1, 2), 50);
        assert_eq!(prorate(-100, 1, 3), -33);
        assert_eq!(prorate(101, 1, 2), 51); // half away from zero
        assert_eq!(prorate(7, 0, 2), 0);
        assert_eq!(prorate(7, 1, 0), 0);
    }
}
