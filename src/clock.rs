//! Global clock for multi-asset point-in-time ordering
//!
//! Tracks the latest observed timestamp per symbol and caches the minimum
//! across all tracked symbols as the global time. Strategies must operate
//! at or before the global time; `PitEnforcer` clamps query timestamps so
//! no history read can reach past the slowest symbol.
//!
//! Example problem this solves:
//! - EURUSD data available up to 10:30:00
//! - GBPUSD data available up to 10:25:00
//! - Strategy must not see EURUSD data past 10:25:00 until GBPUSD catches up
//!
//! The clock is owned and mutated exclusively by the simulator thread, so
//! unlike the event queue it carries no internal locking.

use crate::core_types::SymbolId;
use rustc_hash::FxHashMap;

/// Per-symbol timestamps with a cached global minimum.
#[derive(Debug, Default, Clone)]
pub struct GlobalClock {
    symbol_timestamps: FxHashMap<SymbolId, i64>,
    global_time: i64,
}

impl GlobalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or overwrite a symbol's latest timestamp and recompute the
    /// global minimum.
    pub fn update_symbol(&mut self, symbol_id: SymbolId, timestamp_us: i64) {
        self.symbol_timestamps.insert(symbol_id, timestamp_us);
        self.recalculate();
    }

    /// Batch variant of `update_symbol` with one recomputation.
    pub fn update_batch(&mut self, updates: &[(SymbolId, i64)]) {
        for &(symbol_id, timestamp_us) in updates {
            self.symbol_timestamps.insert(symbol_id, timestamp_us);
        }
        self.recalculate();
    }

    /// Whether a symbol may advance to `target_us` without outrunning the
    /// other tracked symbols. A clock tracking at most one symbol always
    /// admits any advance.
    pub fn can_advance(&self, symbol_id: SymbolId, target_us: i64) -> bool {
        if self.symbol_timestamps.len() <= 1 {
            return true;
        }
        let min_of_others = self
            .symbol_timestamps
            .iter()
            .filter(|(id, _)| **id != symbol_id)
            .map(|(_, ts)| *ts)
            .min();
        match min_of_others {
            Some(min) => target_us <= min,
            None => true,
        }
    }

    /// Global time: minimum timestamp across all tracked symbols, 0 when
    /// none are tracked.
    #[inline]
    pub fn current_time(&self) -> i64 {
        self.global_time
    }

    /// Latest timestamp for one symbol, 0 when not tracked.
    pub fn symbol_time(&self, symbol_id: SymbolId) -> i64 {
        self.symbol_timestamps.get(&symbol_id).copied().unwrap_or(0)
    }

    /// How far ahead of global time this symbol is. 0 means it is the
    /// slowest symbol (or untracked).
    pub fn symbol_lag(&self, symbol_id: SymbolId) -> i64 {
        match self.symbol_timestamps.get(&symbol_id) {
            Some(ts) => ts - self.global_time,
            None => 0,
        }
    }

    /// The symbol holding back the global minimum. Ties resolve to the
    /// smallest symbol id so the answer is deterministic.
    pub fn slowest_symbol(&self) -> Option<SymbolId> {
        self.symbol_timestamps
            .iter()
            .min_by_key(|(id, ts)| (**ts, **id))
            .map(|(id, _)| *id)
    }

    pub fn symbol_count(&self) -> usize {
        self.symbol_timestamps.len()
    }

    pub fn remove_symbol(&mut self, symbol_id: SymbolId) {
        self.symbol_timestamps.remove(&symbol_id);
        self.recalculate();
    }

    pub fn clear(&mut self) {
        self.symbol_timestamps.clear();
        self.global_time = 0;
    }

    /// Reset for a new run, optionally pre-setting the global time.
    pub fn reset(&mut self, initial_time_us: i64) {
        self.symbol_timestamps.clear();
        self.global_time = initial_time_us;
    }

    fn recalculate(&mut self) {
        self.global_time = self.symbol_timestamps.values().copied().min().unwrap_or(0);
    }
}

/// Clamps data-query timestamps to the global clock so a strategy can never
/// see data past the slowest symbol, even when it passes a future timestamp.
#[derive(Debug)]
pub struct PitEnforcer<'a> {
    clock: &'a GlobalClock,
}

impl<'a> PitEnforcer<'a> {
    pub fn new(clock: &'a GlobalClock) -> Self {
        Self { clock }
    }

    /// `min(query_time, global_time)`
    #[inline]
    pub fn clamp_query_time(&self, query_time_us: i64) -> i64 {
        query_time_us.min(self.clock.current_time())
    }

    #[inline]
    pub fn is_valid_query(&self, query_time_us: i64) -> bool {
        query_time_us <= self.clock.current_time()
    }

    #[inline]
    pub fn max_query_time(&self) -> i64 {
        self.clock.current_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_time_is_minimum() {
        let mut clock = GlobalClock::new();
        clock.update_symbol(1, 1_000_000);
        clock.update_symbol(2, 999_000);
        assert_eq!(clock.current_time(), 999_000);

        clock.update_symbol(2, 1_000_500);
        assert_eq!(clock.current_time(), 1_000_000);
    }

    #[test]
    fn test_can_advance() {
        let mut clock = GlobalClock::new();
        clock.update_symbol(1, 1_000_000);
        clock.update_symbol(2, 999_000);

        // Symbol 1 may not advance past the other symbols' minimum
        assert!(!clock.can_advance(1, 1_001_000));
        // Symbol 2 is behind symbol 1 and may advance
        assert!(clock.can_advance(2, 999_500));
        assert!(clock.can_advance(2, 1_000_000));
        assert!(!clock.can_advance(2, 1_000_001));
    }

    #[test]
    fn test_single_symbol_always_advances() {
        let mut clock = GlobalClock::new();
        clock.update_symbol(7, 42);
        assert!(clock.can_advance(7, i64::MAX));
        // Untracked clock too
        let empty = GlobalClock::new();
        assert!(empty.can_advance(1, i64::MAX));
    }

    #[test]
    fn test_lag_and_slowest() {
        let mut clock = GlobalClock::new();
        clock.update_symbol(1, 1_000_000);
        clock.update_symbol(2, 999_000);

        assert_eq!(clock.symbol_lag(1), 1_000);
        assert_eq!(clock.symbol_lag(2), 0);
        assert_eq!(clock.slowest_symbol(), Some(2));
        assert_eq!(clock.symbol_count(), 2);
    }

    #[test]
    fn test_remove_and_reset() {
        let mut clock = GlobalClock::new();
        clock.update_symbol(1, 500);
        clock.update_symbol(2, 300);
        clock.remove_symbol(2);
        assert_eq!(clock.current_time(), 500);

        clock.reset(0);
        assert_eq!(clock.symbol_count(), 0);
        assert_eq!(clock.current_time(), 0);
    }

    #[test]
    fn test_pit_enforcer_clamps() {
        let mut clock = GlobalClock::new();
        clock.update_symbol(1, 1_000_000);
        clock.update_symbol(2, 999_000);

        let enforcer = PitEnforcer::new(&clock);
        assert_eq!(enforcer.clamp_query_time(1_001_000), 999_000);
        assert_eq!(enforcer.clamp_query_time(500_000), 500_000);
        assert!(enforcer.is_valid_query(999_000));
        assert!(!enforcer.is_valid_query(999_001));
        assert_eq!(enforcer.max_query_time(), 999_000);
    }
}
