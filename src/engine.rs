//! Backtesting engine facade
//!
//! Wires the event loop, global clock, data feed, trade ledger, currency
//! graph, margin calculator, costs engine, and the optional WAL and
//! broadcaster into one component, and implements the per-tick pipeline:
//!
//! 1. update symbol prices
//! 2. update the global clock
//! 3. evaluate open positions' SL/TP (ticket ascending)
//! 4. expire, then evaluate pending orders (ticket ascending)
//! 5. advance trailing stops
//! 6. recompute equity, enforce stop-out
//! 7. invoke the host tick callback
//! 8. publish to the broadcaster
//!
//! Host callbacks run synchronously on the simulator thread; a panicking
//! callback is caught at the boundary, logged, and never destabilizes the
//! engine.

use crate::broadcast::{BroadcastError, UdpBroadcaster};
use crate::clock::{GlobalClock, PitEnforcer};
use crate::config::EngineConfig;
use crate::core_types::{SymbolId, Ticket};
use crate::costs::{CostsEngine, ExecutionResult};
use crate::currency::{CurrencyConverter, CurrencyError};
use crate::event_loop::{Event, EventKind, EventLoop, EventLoopError};
use crate::feed::{BarFeed, FeedError};
use crate::fixed;
use crate::margin::MarginCalculator;
use crate::market::{Bar, Tick, Timeframe};
use crate::symbol::SymbolSpec;
use crate::trade::{
    Deal, OrderState, OrderTime, OrderType, PendingOrder, PositionType, Snapshot, Trade,
};
use crate::wal::payload::{
    self, BalanceChangeRecord, OrderCancelRecord, OrderPlaceRecord, PositionCloseRecord,
    PositionModifyRecord, PositionOpenRecord,
};
use crate::wal::{WalEntryType, WalError, WriteAheadLog};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Paused,
}

/// Engine construction/configuration errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Currency(#[from] CurrencyError),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    #[error(transparent)]
    EventLoop(#[from] EventLoopError),
}

type TickCallback = Box<dyn FnMut(&Tick, &SymbolSpec)>;
type BarCallback = Box<dyn FnMut(&Bar, &SymbolSpec, Timeframe)>;
type TradeCallback = Box<dyn FnMut(&Deal)>;
type OrderCallback = Box<dyn FnMut(&PendingOrder)>;

/// The backtesting engine.
pub struct Engine {
    event_loop: Arc<EventLoop>,
    clock: GlobalClock,
    feed: BarFeed,
    trade: Trade,
    converter: CurrencyConverter,
    margin_calc: MarginCalculator,
    costs: CostsEngine,
    broadcaster: Option<UdpBroadcaster>,
    wal: Option<WriteAheadLog>,

    on_tick: Option<TickCallback>,
    on_bar: Option<BarCallback>,
    on_trade: Option<TradeCallback>,
    on_order: Option<OrderCallback>,

    current_time_us: i64,
    deals_seen: usize,
}

impl Engine {
    /// Build an engine from configuration. WAL open failures and
    /// broadcaster startup failures propagate: the engine refuses to
    /// start when integrity cannot be established.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let mut trade = Trade::new(config.initial_balance, &config.currency, config.leverage);
        trade.account_mut().set_margin_call_level(config.margin_call_level);
        trade.account_mut().set_stop_out_level(config.stop_out_level);

        let wal = if config.wal.enabled {
            let mut wal = WriteAheadLog::new(&config.wal.path);
            wal.open(false)?;
            Some(wal)
        } else {
            None
        };

        let broadcaster = if config.broadcast.enabled {
            let mut b = UdpBroadcaster::new(&config.broadcast.endpoint);
            b.start()?;
            Some(b)
        } else {
            None
        };

        info!(
            balance = config.initial_balance,
            currency = %config.currency,
            leverage = config.leverage,
            seed = config.rng_seed,
            "engine created"
        );

        Ok(Self {
            event_loop: Arc::new(EventLoop::new()),
            clock: GlobalClock::new(),
            feed: BarFeed::new(),
            trade,
            converter: CurrencyConverter::new(),
            margin_calc: MarginCalculator::new(),
            costs: CostsEngine::frictionless(config.rng_seed),
            broadcaster,
            wal,
            on_tick: None,
            on_bar: None,
            on_trade: None,
            on_order: None,
            current_time_us: 0,
            deals_seen: 0,
        })
    }

    /// Engine with default config except the account parameters.
    pub fn with_account(balance: f64, currency: &str, leverage: i64) -> Self {
        let config = EngineConfig {
            initial_balance: balance,
            currency: currency.to_string(),
            leverage,
            ..EngineConfig::default()
        };
        // Default config enables no fallible resources
        Self::new(config).expect("default engine construction cannot fail")
    }

    // --- Configuration ---

    /// Register a tradable symbol.
    pub fn load_symbol(&mut self, spec: SymbolSpec) {
        self.trade.register_symbol(spec);
    }

    /// Register a currency conversion rate.
    pub fn load_conversion_pair(&mut self, base: &str, quote: &str, rate: f64) {
        self.converter.register_pair(base, quote, rate, self.current_time_us);
    }

    /// Load a bar series into the PIT feed.
    pub fn load_bars(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        bars: Vec<Bar>,
    ) -> Result<usize, FeedError> {
        self.feed.load_bars(symbol, timeframe, bars)
    }

    /// Fail-fast configuration validation: the conversion graph must be
    /// connected before a run starts.
    pub fn validate_configuration(&self) -> Result<(), EngineError> {
        self.converter.validate_paths()?;
        Ok(())
    }

    /// Replace the execution cost models.
    pub fn set_cost_models(&mut self, costs: CostsEngine) {
        self.costs = costs;
    }

    /// Reseed the costs-engine RNG (bit-identical replay knob).
    pub fn set_seed(&mut self, seed: u64) {
        self.costs.set_seed(seed);
    }

    // --- Callbacks ---

    pub fn set_on_tick(&mut self, callback: impl FnMut(&Tick, &SymbolSpec) + 'static) {
        self.on_tick = Some(Box::new(callback));
    }

    pub fn set_on_bar(&mut self, callback: impl FnMut(&Bar, &SymbolSpec, Timeframe) + 'static) {
        self.on_bar = Some(Box::new(callback));
    }

    pub fn set_on_trade(&mut self, callback: impl FnMut(&Deal) + 'static) {
        self.on_trade = Some(Box::new(callback));
    }

    pub fn set_on_order(&mut self, callback: impl FnMut(&PendingOrder) + 'static) {
        self.on_order = Some(Box::new(callback));
    }

    // --- Event feeding ---

    /// Enqueue a tick event (prices fixed-point).
    pub fn push_tick(&self, timestamp_us: i64, symbol_id: SymbolId, bid: i64, ask: i64) {
        self.event_loop.push(Event::tick(timestamp_us, symbol_id, bid, ask));
    }

    /// Enqueue a tick event with boundary (double) prices.
    pub fn push_quote(&self, timestamp_us: i64, symbol: &str, bid: f64, ask: f64) {
        if let Some(spec) = self.trade.symbol(symbol) {
            self.event_loop.push(Event::tick(
                timestamp_us,
                spec.symbol_id,
                spec.price_to_fixed(bid),
                spec.price_to_fixed(ask),
            ));
        }
    }

    pub fn push_bar_close(&self, timestamp_us: i64, symbol_id: SymbolId, timeframe: Timeframe) {
        self.event_loop
            .push(Event::bar_close(timestamp_us, symbol_id, timeframe));
    }

    pub fn push_timer(&self, timestamp_us: i64, timer_id: u32) {
        self.event_loop.push(Event::timer(timestamp_us, timer_id));
    }

    pub fn push_events(&self, events: impl IntoIterator<Item = Event>) {
        self.event_loop.push_batch(events);
    }

    // --- Lifecycle ---

    /// Run until the queue drains or `stop` is called.
    pub fn run(&mut self) -> Result<(), EngineError> {
        let event_loop = Arc::clone(&self.event_loop);
        event_loop.run(|event| self.process_event(event))?;
        Ok(())
    }

    /// Process at most `n` events; returns the number processed.
    pub fn step(&mut self, n: usize) -> Result<u64, EngineError> {
        let event_loop = Arc::clone(&self.event_loop);
        let processed = event_loop.step(n, |event| self.process_event(event))?;
        Ok(processed)
    }

    pub fn pause(&self) {
        self.event_loop.pause();
    }

    pub fn resume(&self) {
        self.event_loop.resume();
    }

    /// Stop the run after the in-flight event; unprocessed events remain
    /// queued.
    pub fn stop(&self) {
        self.event_loop.stop();
    }

    pub fn state(&self) -> EngineState {
        if self.event_loop.is_running() {
            if self.event_loop.is_paused() {
                EngineState::Paused
            } else {
                EngineState::Running
            }
        } else {
            EngineState::Idle
        }
    }

    // --- Trading commands (costed market execution) ---

    /// Open a BUY position at the current ask, with slippage and
    /// commission from the configured cost models.
    pub fn buy(&mut self, volume: f64, symbol: &str, sl: f64, tp: f64, comment: &str) -> bool {
        self.market_order(PositionType::Buy, volume, symbol, sl, tp, comment)
    }

    /// Open a SELL position at the current bid.
    pub fn sell(&mut self, volume: f64, symbol: &str, sl: f64, tp: f64, comment: &str) -> bool {
        self.market_order(PositionType::Sell, volume, symbol, sl, tp, comment)
    }

    fn market_order(
        &mut self,
        side: PositionType,
        volume: f64,
        symbol: &str,
        sl: f64,
        tp: f64,
        comment: &str,
    ) -> bool {
        let Some(spec) = self.trade.symbol(symbol).cloned() else {
            return false;
        };
        if !spec.has_quote() {
            return false;
        }
        let tick = Tick::new(self.current_time_us, spec.symbol_id, spec.bid, spec.ask, 0, 0);
        let volume_micro = match spec.validate_volume(volume) {
            Some(v) => v,
            None => {
                // Let the ledger surface the InvalidVolume retcode
                return self.trade.position_open_at(
                    &self.converter,
                    symbol,
                    side_to_market_order(side),
                    volume,
                    spec.ask,
                    sl,
                    tp,
                    0,
                    comment,
                );
            }
        };

        let exec = self.costs.execute_market(side, volume_micro, &tick, &spec);
        let ok = self.trade.position_open_at(
            &self.converter,
            symbol,
            side_to_market_order(side),
            volume,
            exec.fill_price,
            sl,
            tp,
            exec.commission,
            comment,
        );
        if ok {
            let ticket = self.trade.result().order;
            self.wal_position_open(ticket, &exec, volume_micro, side, &spec, sl, tp, 0);
            self.drain_new_deals();
        }
        ok
    }

    /// Modify a position's SL/TP.
    pub fn modify(&mut self, ticket: Ticket, sl: f64, tp: f64) -> bool {
        let ok = self.trade.position_modify(ticket, sl, tp);
        if ok {
            if let Some(position) = self.trade.position(ticket) {
                let record = PositionModifyRecord {
                    ticket,
                    stop_loss: position.stop_loss,
                    take_profit: position.take_profit,
                    time_us: self.current_time_us,
                };
                Self::wal_append(&mut self.wal, WalEntryType::PositionModify, &record);
            }
        }
        ok
    }

    /// Close a position at the current market.
    pub fn close(&mut self, ticket: Ticket) -> bool {
        let digits = self
            .trade
            .position(ticket)
            .map(|p| p.digits)
            .unwrap_or(5);
        let ok = self.trade.position_close(&self.converter, ticket, 0);
        if ok {
            let result = self.trade.result().clone();
            let record = PositionCloseRecord {
                ticket,
                volume: fixed::from_double(result.volume, 6),
                price: fixed::from_double(result.price, digits),
                commission: 0,
                time_us: self.current_time_us,
            };
            Self::wal_append(&mut self.wal, WalEntryType::PositionClose, &record);
            self.drain_new_deals();
        }
        ok
    }

    /// Place a pending order.
    #[allow(clippy::too_many_arguments)]
    pub fn place_order(
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
        let ok = self.trade.order_open(
            symbol,
            order_type,
            volume,
            price,
            stop_price,
            sl,
            tp,
            type_time,
            expiration_us,
            comment,
        );
        if ok {
            let ticket = self.trade.result().order;
            if let Some(order) = self.trade.order(ticket).cloned() {
                let record = OrderPlaceRecord {
                    ticket,
                    symbol_id: order.symbol_id,
                    order_type: order.order_type as u8,
                    volume: order.volume_initial,
                    price: order.price_open,
                    stop_limit: order.price_stop_limit,
                    stop_loss: order.stop_loss,
                    take_profit: order.take_profit,
                    type_time: order.type_time as u8,
                    expiration_us: order.time_expiration_us,
                    time_us: self.current_time_us,
                };
                Self::wal_append(&mut self.wal, WalEntryType::OrderPlace, &record);
                self.fire_on_order(&order);
            }
        }
        ok
    }

    /// Cancel a pending order.
    pub fn cancel(&mut self, ticket: Ticket) -> bool {
        let snapshot = self.trade.order(ticket).cloned();
        let ok = self.trade.order_delete(ticket);
        if ok {
            let record = OrderCancelRecord {
                ticket,
                time_us: self.current_time_us,
            };
            Self::wal_append(&mut self.wal, WalEntryType::OrderCancel, &record);
            if let Some(mut order) = snapshot {
                order.state = OrderState::Canceled;
                order.time_done_us = self.current_time_us;
                self.fire_on_order(&order);
            }
        }
        ok
    }

    /// Adjust the account balance directly (deposit/withdrawal/correction),
    /// recorded as a BALANCE deal and journaled.
    pub fn balance_change(&mut self, amount: f64, comment: &str) -> bool {
        let ok = self.trade.balance_change(amount, comment);
        if ok {
            let record = BalanceChangeRecord {
                amount: fixed::money_from_double(amount),
                comment: comment.to_string(),
                time_us: self.current_time_us,
            };
            Self::wal_append(&mut self.wal, WalEntryType::BalanceChange, &record);
            self.drain_new_deals();
        }
        ok
    }

    /// Arm a trailing stop on a position.
    pub fn trailing_stop_enable(&mut self, ticket: Ticket, distance_points: i64, step_points: i64) -> bool {
        self.trade.trailing_stop_enable(ticket, distance_points, step_points)
    }

    pub fn trailing_stop_disable(&mut self, ticket: Ticket) -> bool {
        self.trade.trailing_stop_disable(ticket)
    }

    /// Apply daily swap to every open position (typically driven by a
    /// rollover TIMER event pushed by the host).
    pub fn apply_daily_swap(&mut self) {
        let entries: Vec<(Ticket, i64)> = self
            .trade
            .positions()
            .values()
            .filter_map(|position| {
                let spec = self.trade.symbol_by_id(position.symbol_id)?;
                let swap = self.costs.calculate_swap(
                    position,
                    position.price_current,
                    spec,
                    self.current_time_us,
                );
                (swap != 0).then_some((position.ticket, swap))
            })
            .collect();
        for (ticket, swap) in entries {
            self.trade.apply_swap(ticket, swap);
        }
    }

    /// Maximum volume openable on a symbol with the current free margin.
    pub fn max_volume(&self, symbol: &str, side: PositionType) -> f64 {
        let Some(spec) = self.trade.symbol(symbol) else {
            return 0.0;
        };
        let price = match side {
            PositionType::Buy => spec.ask,
            PositionType::Sell => spec.bid,
        };
        let volume = self.margin_calc.max_volume(
            spec,
            side,
            price,
            self.trade.account().margin_free_fixed(),
            self.trade.account().leverage,
        );
        fixed::to_double(volume, 6)
    }

    // --- Snapshots / WAL ---

    pub fn create_snapshot(&self) -> Snapshot {
        self.trade.create_snapshot()
    }

    pub fn restore_snapshot(&mut self, snapshot: Snapshot) {
        self.trade.restore_snapshot(snapshot);
        self.deals_seen = self.trade.deals().len();
    }

    /// Mark a WAL checkpoint (call once the current snapshot is durable).
    pub fn mark_checkpoint(&mut self) -> Result<(), EngineError> {
        if let Some(wal) = self.wal.as_mut() {
            wal.mark_checkpoint()?;
        }
        Ok(())
    }

    // --- State access ---

    pub fn trade(&self) -> &Trade {
        &self.trade
    }

    pub fn trade_mut(&mut self) -> &mut Trade {
        &mut self.trade
    }

    pub fn converter(&self) -> &CurrencyConverter {
        &self.converter
    }

    pub fn clock(&self) -> &GlobalClock {
        &self.clock
    }

    pub fn feed(&self) -> &BarFeed {
        &self.feed
    }

    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    pub fn costs(&self) -> &CostsEngine {
        &self.costs
    }

    pub fn broadcaster(&self) -> Option<&UdpBroadcaster> {
        self.broadcaster.as_ref()
    }

    pub fn wal(&self) -> Option<&WriteAheadLog> {
        self.wal.as_ref()
    }

    pub fn current_time(&self) -> i64 {
        self.current_time_us
    }

    pub fn events_processed(&self) -> u64 {
        self.event_loop.events_processed()
    }

    // --- Event dispatch ---

    fn process_event(&mut self, event: &Event) {
        self.current_time_us = event.timestamp_us;

        match event.kind {
            EventKind::Tick { symbol_id, bid, ask } => {
                self.process_tick(event.timestamp_us, symbol_id, bid, ask);
            }
            EventKind::BarClose { symbol_id, timeframe } => {
                self.process_bar_close(event.timestamp_us, symbol_id, timeframe);
            }
            EventKind::OrderTrigger { ticket } => {
                self.process_order_trigger(ticket);
            }
            // Timers and custom events only advance statistics; the host
            // reacts to them through its own bookkeeping
            EventKind::Timer { .. } | EventKind::Custom(_) => {}
        }
    }

    fn process_tick(&mut self, timestamp_us: i64, symbol_id: SymbolId, bid: i64, ask: i64) {
        let Some(spec) = self.trade.symbol_by_id(symbol_id).cloned() else {
            return;
        };
        let symbol = spec.name.clone();
        let tick = Tick::new(timestamp_us, symbol_id, bid, ask, 0, 0);
        if !tick.is_valid() {
            warn!(symbol_id, bid, ask, "discarding invalid tick");
            return;
        }

        // 1. Symbol prices (also marks positions and recomputes equity)
        self.trade.update_prices(
            &self.converter,
            &symbol,
            spec.price_to_double(bid),
            spec.price_to_double(ask),
            timestamp_us,
        );
        // Re-read the spec with the fresh quote state
        let spec = self
            .trade
            .symbol_by_id(symbol_id)
            .cloned()
            .unwrap_or(spec);

        // 2. Global clock
        self.clock.update_symbol(symbol_id, timestamp_us);

        // 3. Last-price cache for the cost models
        self.costs.update_market(symbol_id, &tick);

        // 4. Open positions: SL/TP triggers, ticket ascending
        let position_tickets: Vec<Ticket> = self
            .trade
            .positions()
            .values()
            .filter(|p| p.symbol_id == symbol_id)
            .map(|p| p.ticket)
            .collect();
        for ticket in position_tickets {
            let Some(position) = self.trade.position(ticket).cloned() else {
                continue;
            };
            let exec = self.costs.evaluate_position(&position, &tick, &spec);
            if exec.executed
                && self
                    .trade
                    .close_triggered_position(&self.converter, ticket, &exec, timestamp_us)
            {
                let record = PositionCloseRecord {
                    ticket,
                    volume: position.volume,
                    price: exec.fill_price,
                    commission: exec.commission,
                    time_us: timestamp_us,
                };
                Self::wal_append(&mut self.wal, WalEntryType::PositionClose, &record);
            }
        }

        // 5. Pending orders: expiry sweep, then triggers, ticket ascending.
        //    The RNG advances once per triggered order.
        let expiring: Vec<PendingOrder> = self
            .trade
            .orders()
            .values()
            .filter(|o| o.is_expired(timestamp_us))
            .cloned()
            .collect();
        if !expiring.is_empty() {
            self.trade.expire_orders(timestamp_us);
            for mut order in expiring {
                order.state = OrderState::Expired;
                order.time_done_us = timestamp_us;
                self.fire_on_order(&order);
            }
        }

        let order_snapshots: Vec<PendingOrder> = self
            .trade
            .orders()
            .values()
            .filter(|o| o.symbol_id == symbol_id)
            .cloned()
            .collect();
        for mut order in order_snapshots {
            let exec = self.costs.evaluate_order(&order, &tick, &spec);
            if !exec.executed {
                continue;
            }
            let filled = self.trade.execute_triggered_order(
                &self.converter,
                order.ticket,
                &exec,
                timestamp_us,
            );
            match filled {
                Some(position_ticket) => {
                    order.state = OrderState::Filled;
                    let side = if order.order_type.is_buy() {
                        PositionType::Buy
                    } else {
                        PositionType::Sell
                    };
                    self.wal_position_open(
                        position_ticket,
                        &exec,
                        order.volume_initial,
                        side,
                        &spec,
                        fixed::to_double(order.stop_loss, spec.digits),
                        fixed::to_double(order.take_profit, spec.digits),
                        order.ticket,
                    );
                }
                None => order.state = OrderState::Rejected,
            }
            order.time_done_us = timestamp_us;
            self.fire_on_order(&order);
        }

        // 6. Trailing stops
        let moved = self.trade.update_trailing_stops(symbol_id);
        for ticket in moved {
            if let Some(position) = self.trade.position(ticket) {
                let record = PositionModifyRecord {
                    ticket,
                    stop_loss: position.stop_loss,
                    take_profit: position.take_profit,
                    time_us: timestamp_us,
                };
                Self::wal_append(&mut self.wal, WalEntryType::PositionModify, &record);
            }
        }

        // 7. Equity is current after the closes above; enforce stop-out
        self.trade.check_stop_out(&self.converter);

        // 8. Host callback, then deal fan-out
        self.drain_new_deals();
        if let Some(callback) = self.on_tick.as_mut() {
            let result = catch_unwind(AssertUnwindSafe(|| callback(&tick, &spec)));
            if result.is_err() {
                error!(symbol = %spec.name, "on_tick callback panicked");
            }
        }

        // 9. Broadcast
        if let Some(broadcaster) = self.broadcaster.as_mut() {
            broadcaster.publish_tick(symbol_id, timestamp_us, bid, ask);
            let account = self.trade.account();
            broadcaster.publish_equity(
                timestamp_us,
                account.balance_fixed(),
                account.equity_fixed(),
                account.margin_fixed(),
                account.margin_free_fixed(),
            );
        }
    }

    fn process_bar_close(&mut self, timestamp_us: i64, symbol_id: SymbolId, timeframe: Timeframe) {
        let Some(spec) = self.trade.symbol_by_id(symbol_id).cloned() else {
            return;
        };
        // PIT clamp: never hand out a bar past the global clock
        let as_of = PitEnforcer::new(&self.clock).clamp_query_time(timestamp_us);

        match self.feed.get_last_bar(&spec.name, timeframe, as_of) {
            Ok(bar) => {
                if let Some(callback) = self.on_bar.as_mut() {
                    let result =
                        catch_unwind(AssertUnwindSafe(|| callback(&bar, &spec, timeframe)));
                    if result.is_err() {
                        error!(symbol = %spec.name, "on_bar callback panicked");
                    }
                }
                if let Some(broadcaster) = self.broadcaster.as_mut() {
                    broadcaster.publish_bar(
                        symbol_id,
                        timeframe.minutes() as u16,
                        bar.timestamp_us,
                        bar.open,
                        bar.high,
                        bar.low,
                        bar.close,
                        bar.tick_volume,
                    );
                }
            }
            Err(err) => {
                // Data errors surface to the host log; the engine continues
                warn!(symbol = %spec.name, timeframe = timeframe.as_str(), %err, "bar close without bar data");
            }
        }
    }

    /// Re-evaluate a single pending order against the symbol's current
    /// quote (ORDER_TRIGGER event).
    fn process_order_trigger(&mut self, ticket: Ticket) {
        let Some(order) = self.trade.order(ticket).cloned() else {
            return;
        };
        let Some(spec) = self.trade.symbol_by_id(order.symbol_id).cloned() else {
            return;
        };
        if !spec.has_quote() {
            return;
        }
        let tick = Tick::new(self.current_time_us, spec.symbol_id, spec.bid, spec.ask, 0, 0);
        let exec = self.costs.evaluate_order(&order, &tick, &spec);
        if !exec.executed {
            return;
        }
        let mut order = order;
        match self
            .trade
            .execute_triggered_order(&self.converter, ticket, &exec, self.current_time_us)
        {
            Some(position_ticket) => {
                order.state = OrderState::Filled;
                let side = if order.order_type.is_buy() {
                    PositionType::Buy
                } else {
                    PositionType::Sell
                };
                self.wal_position_open(
                    position_ticket,
                    &exec,
                    order.volume_initial,
                    side,
                    &spec,
                    fixed::to_double(order.stop_loss, spec.digits),
                    fixed::to_double(order.take_profit, spec.digits),
                    ticket,
                );
            }
            None => order.state = OrderState::Rejected,
        }
        order.time_done_us = self.current_time_us;
        self.fire_on_order(&order);
        self.drain_new_deals();
    }

    // --- Internal plumbing ---

    #[allow(clippy::too_many_arguments)]
    fn wal_position_open(
        &mut self,
        ticket: Ticket,
        exec: &ExecutionResult,
        volume: i64,
        side: PositionType,
        spec: &SymbolSpec,
        sl: f64,
        tp: f64,
        order_ticket: Ticket,
    ) {
        let record = PositionOpenRecord {
            ticket,
            symbol_id: spec.symbol_id,
            side: side as u8,
            volume,
            price: exec.fill_price,
            stop_loss: if sl > 0.0 { spec.price_to_fixed(sl) } else { 0 },
            take_profit: if tp > 0.0 { spec.price_to_fixed(tp) } else { 0 },
            commission: exec.commission,
            order_ticket,
            time_us: self.current_time_us,
        };
        Self::wal_append(&mut self.wal, WalEntryType::PositionOpen, &record);
    }

    fn wal_append<T: serde::Serialize>(
        wal: &mut Option<WriteAheadLog>,
        entry_type: WalEntryType,
        record: &T,
    ) {
        let Some(wal) = wal.as_mut() else {
            return;
        };
        match payload::encode(record) {
            Ok(bytes) => wal.append_soft(entry_type, &bytes),
            Err(err) => error!(%err, ?entry_type, "WAL payload encode failed"),
        }
    }

    /// Fan out `on_trade` for deals emitted since the last drain, and
    /// mirror them to the broadcaster.
    fn drain_new_deals(&mut self) {
        if self.deals_seen >= self.trade.deals().len() {
            return;
        }
        let new_deals: Vec<Deal> = self.trade.deals()[self.deals_seen..].to_vec();
        self.deals_seen = self.trade.deals().len();

        for deal in &new_deals {
            if let Some(callback) = self.on_trade.as_mut() {
                let result = catch_unwind(AssertUnwindSafe(|| callback(deal)));
                if result.is_err() {
                    error!(deal = deal.ticket, "on_trade callback panicked");
                }
            }
            if let Some(broadcaster) = self.broadcaster.as_mut() {
                broadcaster.publish_trade(
                    deal.ticket,
                    deal.symbol_id,
                    deal.time_us,
                    fixed::to_double(deal.volume, 6),
                    self.trade
                        .symbol_by_id(deal.symbol_id)
                        .map(|s| s.price_to_double(deal.price))
                        .unwrap_or_default(),
                    deal.profit,
                );
            }
        }
    }

    fn fire_on_order(&mut self, order: &PendingOrder) {
        if let Some(callback) = self.on_order.as_mut() {
            let result = catch_unwind(AssertUnwindSafe(|| callback(order)));
            if result.is_err() {
                error!(order = order.ticket, "on_order callback panicked");
            }
        }
        if let Some(broadcaster) = self.broadcaster.as_mut() {
            let price = self
                .trade
                .symbol_by_id(order.symbol_id)
                .map(|s| s.price_to_double(order.price_open))
                .unwrap_or_default();
            broadcaster.publish_order(
                order.ticket,
                order.symbol_id,
                self.current_time_us,
                order.order_type as u8,
                fixed::to_double(order.volume_initial, 6),
                price,
            );
        }
    }

}

fn side_to_market_order(side: PositionType) -> OrderType {
    match side {
        PositionType::Buy => OrderType::Buy,
        PositionType::Sell => OrderType::Sell,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eurusd() -> SymbolSpec {
        SymbolSpec::new("EURUSD", 1, 5)
            .with_contract_size(100_000)
            .with_volume_limits(0.01, 100.0, 0.01)
            .with_currencies("EUR", "USD", "USD")
    }

    fn engine() -> Engine {
        let mut engine = Engine::with_account(10_000.0, "USD", 100);
        engine.load_symbol(eurusd());
        engine
    }

    #[test]
    fn test_tick_updates_prices_and_clock() {
        let mut engine = engine();
        engine.push_tick(1_000_000, 1, 110_000, 110_015);
        engine.run().unwrap();

        let spec = engine.trade().symbol("EURUSD").unwrap();
        assert_eq!(spec.bid, 110_000);
        assert_eq!(spec.ask, 110_015);
        assert_eq!(engine.clock().current_time(), 1_000_000);
        assert_eq!(engine.events_processed(), 1);
    }

    #[test]
    fn test_buy_close_round_trip() {
        let mut engine = engine();
        engine.push_tick(1_000_000, 1, 110_000, 110_015);
        engine.run().unwrap();

        assert!(engine.buy(0.1, "EURUSD", 0.0, 0.0, ""));
        let ticket = *engine.trade().positions().keys().next().unwrap();

        engine.push_tick(2_000_000, 1, 110_100, 110_115);
        engine.run().unwrap();

        assert!((engine.trade().position(ticket).unwrap().profit_f64() - 8.5).abs() < 1e-9);
        assert!(engine.close(ticket));
        assert!((engine.trade().account().balance() - 10_008.5).abs() < 1e-6);
    }

    #[test]
    fn test_sl_triggered_by_tick_pipeline() {
        let mut engine = engine();
        engine.push_tick(1_000_000, 1, 110_000, 110_015);
        engine.run().unwrap();

        assert!(engine.buy(1.0, "EURUSD", 1.09500, 0.0, ""));
        assert_eq!(engine.trade().positions().len(), 1);

        // Gap through the stop: fill at the worse price (the market)
        engine.push_tick(2_000_000, 1, 109_000, 109_015);
        engine.run().unwrap();

        assert!(engine.trade().positions().is_empty());
        let out = engine.trade().deals().last().unwrap();
        assert!(out.price <= 109_500);
        // Loss at the gap price: (1.09000 - 1.10015) * 1.0 * 100000
        assert!(out.profit <= -500_000_000);
    }

    #[test]
    fn test_pending_order_triggers_in_pipeline() {
        let mut engine = engine();
        engine.push_tick(1_000_000, 1, 110_000, 110_015);
        engine.run().unwrap();

        assert!(engine.place_order(
            "EURUSD",
            OrderType::BuyLimit,
            0.1,
            1.09900,
            0.0,
            0.0,
            0.0,
            OrderTime::Gtc,
            0,
            "dip",
        ));
        assert_eq!(engine.trade().orders().len(), 1);

        // Not yet: ask above the limit
        engine.push_tick(2_000_000, 1, 109_950, 109_965);
        engine.run().unwrap();
        assert_eq!(engine.trade().orders().len(), 1);

        // Ask reaches the limit: filled at the limit price
        engine.push_tick(3_000_000, 1, 109_885, 109_900);
        engine.run().unwrap();
        assert!(engine.trade().orders().is_empty());
        assert_eq!(engine.trade().positions().len(), 1);
        let position = engine.trade().positions().values().next().unwrap();
        assert_eq!(position.price_open, 109_900);
        assert_eq!(
            engine.trade().history_orders().last().unwrap().state,
            OrderState::Filled
        );
    }

    #[test]
    fn test_trailing_stop_pipeline() {
        let mut engine = engine();
        engine.push_tick(1_000_000, 1, 110_005, 110_020);
        engine.run().unwrap();
        assert!(engine.buy(1.0, "EURUSD", 0.0, 0.0, ""));
        let ticket = *engine.trade().positions().keys().next().unwrap();
        assert!(engine.trailing_stop_enable(ticket, 50, 0));

        engine.push_tick(2_000_000, 1, 110_100, 110_115);
        engine.run().unwrap();
        assert_eq!(engine.trade().position(ticket).unwrap().stop_loss, 110_050);

        // The trailed stop then fires on the way down
        engine.push_tick(3_000_000, 1, 110_040, 110_055);
        engine.run().unwrap();
        assert!(engine.trade().positions().is_empty());
    }

    #[test]
    fn test_on_tick_and_on_trade_callbacks() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut engine = engine();
        let ticks = Rc::new(RefCell::new(0_u32));
        let deals = Rc::new(RefCell::new(Vec::new()));

        let t = Rc::clone(&ticks);
        engine.set_on_tick(move |_, _| *t.borrow_mut() += 1);
        let d = Rc::clone(&deals);
        engine.set_on_trade(move |deal| d.borrow_mut().push(deal.ticket));

        engine.push_tick(1_000_000, 1, 110_000, 110_015);
        engine.run().unwrap();
        assert!(engine.buy(0.1, "EURUSD", 0.0, 0.0, ""));
        engine.push_tick(2_000_000, 1, 110_100, 110_115);
        engine.run().unwrap();

        assert_eq!(*ticks.borrow(), 2);
        assert_eq!(deals.borrow().len(), 1); // the IN deal
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let mut engine = engine();
        engine.set_on_tick(|_, _| panic!("host bug"));
        engine.push_tick(1_000_000, 1, 110_000, 110_015);
        engine.push_tick(2_000_000, 1, 110_001, 110_016);
        engine.run().unwrap();
        // Both events processed despite the panics
        assert_eq!(engine.events_processed(), 2);
    }

    #[test]
    fn test_bar_close_dispatch() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut engine = engine();
        let bars: Vec<Bar> = (0..3)
            .map(|i| {
                Bar::new(
                    i * 60_000_000,
                    1,
                    Timeframe::M1,
                    110_000,
                    110_050,
                    109_950,
                    110_020,
                    10,
                )
            })
            .collect();
        engine.load_bars("EURUSD", Timeframe::M1, bars).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        engine.set_on_bar(move |bar, _, tf| s.borrow_mut().push((bar.timestamp_us, tf)));

        engine.push_tick(150_000_000, 1, 110_000, 110_015);
        engine.push_bar_close(150_000_001, 1, Timeframe::M1);
        engine.run().unwrap();

        // Last bar at or before the (clamped) bar-close time is bar #2
        assert_eq!(seen.borrow().as_slice(), &[(120_000_000, Timeframe::M1)]);
    }

    #[test]
    fn test_bar_close_is_pit_clamped() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut engine = engine();
        let bars: Vec<Bar> = (0..10)
            .map(|i| {
                Bar::new(
                    i * 60_000_000,
                    1,
                    Timeframe::M1,
                    110_000,
                    110_050,
                    109_950,
                    110_020,
                    10,
                )
            })
            .collect();
        engine.load_bars("EURUSD", Timeframe::M1, bars).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        engine.set_on_bar(move |bar, _, _| s.borrow_mut().push(bar.timestamp_us));

        // The clock only reached t=130s; a bar-close stamped far in the
        // future must still resolve to the bar at or before the clock
        engine.push_tick(130_000_000, 1, 110_000, 110_015);
        engine.push_bar_close(500_000_000, 1, Timeframe::M1);
        engine.run().unwrap();

        assert_eq!(seen.borrow().as_slice(), &[120_000_000]);
    }

    #[test]
    fn test_step_and_stop() {
        let mut engine = engine();
        for i in 0..5 {
            engine.push_tick(1_000_000 + i, 1, 110_000, 110_015);
        }
        assert_eq!(engine.step(2).unwrap(), 2);
        assert_eq!(engine.event_loop().len(), 3);
        assert_eq!(engine.state(), EngineState::Idle);

        engine.run().unwrap();
        assert!(engine.event_loop().is_empty());
    }

    #[test]
    fn test_validate_configuration() {
        let mut engine = engine();
        engine.load_conversion_pair("EUR", "USD", 1.10);
        engine.load_conversion_pair("USD", "JPY", 150.0);
        assert!(engine.validate_configuration().is_ok());

        engine.load_conversion_pair("AUD", "NZD", 1.08);
        assert!(engine.validate_configuration().is_err());
    }

    #[test]
    fn test_order_trigger_event() {
        let mut engine = engine();
        engine.push_tick(1_000_000, 1, 109_885, 109_900);
        engine.run().unwrap();

        engine.place_order(
            "EURUSD",
            OrderType::BuyLimit,
            0.1,
            1.09900,
            0.0,
            0.0,
            0.0,
            OrderTime::Gtc,
            0,
            "",
        );
        let ticket = engine.trade().result().order;

        engine.event_loop().push(Event::order_trigger(2_000_000, ticket));
        engine.run().unwrap();
        assert!(engine.trade().orders().is_empty());
        assert_eq!(engine.trade().positions().len(), 1);
    }
}
