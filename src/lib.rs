//! tickforge - deterministic tick-level backtesting core
//!
//! An event-driven simulator for leveraged margin-trading accounts
//! (forex/CFD style) at tick resolution. Historical quotes replay through
//! a timestamp-ordered event loop while the ledger maintains an accurate,
//! margin-consistent model of positions, pending orders, deals and account
//! solvency under configurable execution-cost models.
//!
//! Given identical inputs (tick stream, symbol specs, cost models, RNG
//! seed, conversion rates) a run is bit-identical across platforms: all
//! ledger math is `i64` fixed-point, every randomized model draws from one
//! seeded stream, and every ordered visit walks tickets ascending.
//!
//! # Modules
//!
//! - [`fixed`] - fixed-point arithmetic (prices 10^digits, money 10^6)
//! - [`timeutil`] - microsecond timestamps, ISO-8601, calendar accessors
//! - [`rng`] - seeded deterministic RNG
//! - [`currency`] - BFS currency-conversion graph
//! - [`symbol`] - symbol contract specifications
//! - [`market`] - ticks, bars, timeframes
//! - [`feed`] - point-in-time bar feed
//! - [`clock`] - global clock and PIT enforcement
//! - [`event_loop`] - timestamp-ordered event pump
//! - [`costs`] - slippage/commission/swap/spread models and the costs engine
//! - [`trade`] - the account/position/order/deal ledger
//! - [`margin`] - margin calculator
//! - [`wal`] - CRC-checked write-ahead log and recovery
//! - [`broadcast`] - non-blocking outbound event publisher
//! - [`engine`] - the facade wiring everything together

// Core types - must be first!
pub mod core_types;

// Foundations
pub mod config;
pub mod fixed;
pub mod logging;
pub mod rng;
pub mod timeutil;

// Market data
pub mod clock;
pub mod currency;
pub mod feed;
pub mod market;
pub mod symbol;

// Simulation
pub mod broadcast;
pub mod costs;
pub mod engine;
pub mod event_loop;
pub mod margin;
pub mod trade;
pub mod wal;

// Convenient re-exports at crate root
pub use clock::{GlobalClock, PitEnforcer};
pub use config::EngineConfig;
pub use core_types::{SeqNum, SymbolId, Ticket, TimestampUs};
pub use costs::{CostsEngine, ExecutionResult};
pub use currency::{CurrencyConverter, CurrencyError, CurrencyPair};
pub use engine::{Engine, EngineError, EngineState};
pub use event_loop::{Event, EventKind, EventLoop, EventLoopError};
pub use feed::{BarFeed, FeedError};
pub use margin::MarginCalculator;
pub use market::{Bar, Tick, Timeframe};
pub use rng::SimRng;
pub use symbol::{SwapMode, SymbolSpec, TradeMode};
pub use trade::{
    Account, Deal, DealEntry, DealType, OrderState, OrderTime, OrderType, PendingOrder, Position,
    PositionType, Retcode, Snapshot, Trade, TradeResult,
};
pub use wal::{WalEntryType, WalError, WriteAheadLog};
