//! Execution cost models and the costs engine
//!
//! Four polymorphic model families (slippage, commission, swap, spread)
//! composed by [`engine::CostsEngine`], which turns a pending order or an
//! open position plus a new market tick into an execution decision. All
//! randomness flows through the engine-owned [`crate::rng::SimRng`].

pub mod commission;
pub mod engine;
pub mod slippage;
pub mod spread;
pub mod swap;

pub use commission::{
    CommissionModel, FixedPerLot, FixedPerTrade, PercentageOfValue, SpreadMarkup,
    TieredCommission, ZeroCommission,
};
pub use engine::{CostsEngine, ExecutionResult};
pub use slippage::{
    FixedSlippage, LatencyProfileSlippage, RandomSlippage, SlippageModel, VolumeSlippage,
    ZeroSlippage,
};
pub use spread::{
    FixedSpread, HistoricalSpread, RandomSpread, SpreadModel, TimeOfDaySpread, VolatilitySpread,
};
pub use swap::{IslamicSwap, StandardSwap, SwapModel, ZeroSwap};
