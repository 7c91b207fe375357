//! Point-in-time bar feed
//!
//! In-memory store of ascending bar series keyed by (symbol, timeframe).
//! Every query is bounded by an `as_of` timestamp: the feed binary-searches
//! the last bar at or before that instant and never returns anything newer,
//! so strategies cannot acquire look-ahead bias through history queries.

use crate::market::{Bar, Timeframe};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Data feed errors
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("data not loaded for {symbol} {timeframe}")]
    NotLoaded { symbol: String, timeframe: &'static str },

    #[error("no data available for {symbol} {timeframe} at or before {timestamp_us}")]
    NoData {
        symbol: String,
        timeframe: &'static str,
        timestamp_us: i64,
    },

    #[error("bars for {symbol} {timeframe} are not sorted ascending at index {index}")]
    UnsortedBars {
        symbol: String,
        timeframe: &'static str,
        index: usize,
    },

    #[error("bar at index {index} violates the OHLC invariant")]
    InvalidBar { index: usize },
}

/// In-memory PIT bar store with binary-searched queries.
#[derive(Debug, Default)]
pub struct BarFeed {
    data: FxHashMap<(String, Timeframe), Vec<Bar>>,
}

impl BarFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a bar series. Bars must be sorted ascending by timestamp and
    /// every bar must satisfy the OHLC invariant; both are validated here
    /// so queries never have to re-check.
    pub fn load_bars(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        bars: Vec<Bar>,
    ) -> Result<usize, FeedError> {
        for (index, bar) in bars.iter().enumerate() {
            if !bar.is_valid() {
                return Err(FeedError::InvalidBar { index });
            }
            if index > 0 && bars[index - 1].timestamp_us >= bar.timestamp_us {
                return Err(FeedError::UnsortedBars {
                    symbol: symbol.to_string(),
                    timeframe: timeframe.as_str(),
                    index,
                });
            }
        }
        let count = bars.len();
        self.data.insert((symbol.to_string(), timeframe), bars);
        Ok(count)
    }

    /// Bars at or before `as_of_us`, newest first, at most `max_count`
    /// (0 = all). Returns an empty vector when the series starts after
    /// `as_of_us`.
    pub fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        as_of_us: i64,
        max_count: usize,
    ) -> Result<Vec<Bar>, FeedError> {
        let bars = self.series(symbol, timeframe)?;
        let Some(last_idx) = Self::find_last_index(bars, as_of_us) else {
            return Ok(Vec::new());
        };

        let available = last_idx + 1;
        let count = if max_count == 0 {
            available
        } else {
            max_count.min(available)
        };
        let start = available - count;

        Ok(bars[start..available].iter().rev().copied().collect())
    }

    /// The single most recent bar at or before `as_of_us`.
    pub fn get_last_bar(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        as_of_us: i64,
    ) -> Result<Bar, FeedError> {
        let bars = self.series(symbol, timeframe)?;
        match Self::find_last_index(bars, as_of_us) {
            Some(idx) => Ok(bars[idx]),
            None => Err(FeedError::NoData {
                symbol: symbol.to_string(),
                timeframe: timeframe.as_str(),
                timestamp_us: as_of_us,
            }),
        }
    }

    /// First and last timestamps of a loaded series.
    pub fn get_time_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<(i64, i64), FeedError> {
        let bars = self.series(symbol, timeframe)?;
        match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => Ok((first.timestamp_us, last.timestamp_us)),
            _ => Err(FeedError::NoData {
                symbol: symbol.to_string(),
                timeframe: timeframe.as_str(),
                timestamp_us: 0,
            }),
        }
    }

    pub fn has_data(&self, symbol: &str, timeframe: Timeframe) -> bool {
        self.data
            .get(&(symbol.to_string(), timeframe))
            .is_some_and(|bars| !bars.is_empty())
    }

    pub fn bar_count(&self, symbol: &str, timeframe: Timeframe) -> usize {
        self.data
            .get(&(symbol.to_string(), timeframe))
            .map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    fn series(&self, symbol: &str, timeframe: Timeframe) -> Result<&Vec<Bar>, FeedError> {
        self.data
            .get(&(symbol.to_string(), timeframe))
            .ok_or_else(|| FeedError::NotLoaded {
                symbol: symbol.to_string(),
                timeframe: timeframe.as_str(),
            })
    }

    /// Index of the last bar with `timestamp_us <= as_of_us`.
    fn find_last_index(bars: &[Bar], as_of_us: i64) -> Option<usize> {
        let upper = bars.partition_point(|b| b.timestamp_us <= as_of_us);
        upper.checked_sub(1)
    }
}
