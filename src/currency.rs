//! Multi-hop currency conversion over a bidirectional rate graph
//!
//! Each registered pair stores one directed edge (base -> quote) plus an
//! undirected adjacency entry, so conversion can traverse either direction
//! (the reverse hop divides by the rate). Multi-hop paths are found with
//! BFS, so the shortest path always wins. The adjacency sets are ordered
//! containers: when several shortest paths exist, neighbor iteration order
//! is the sorted order and the chosen path is deterministic.

use crate::fixed;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use thiserror::Error;

/// Currency conversion errors
#[derive(Debug, Error)]
pub enum CurrencyError {
    #[error("no conversion path from {from} to {to}")]
    NoPath { from: String, to: String },

    #[error("pair {0} not registered")]
    UnknownPair(String),

    #[error("currency {currency} is unreachable from {start}: graph has disconnected components")]
    Disconnected { currency: String, start: String },
}

/// A registered exchange rate: 1 `base` = `rate` `quote`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: String,
    pub quote: String,
    pub rate: f64,
    pub timestamp_us: i64,
}

impl CurrencyPair {
    pub fn pair_id(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }
}

/// Currency converter with BFS path finding.
///
/// ```
/// use tickforge::currency::CurrencyConverter;
///
/// let mut conv = CurrencyConverter::new();
/// conv.register_pair("EUR", "USD", 1.10, 0);
/// conv.register_pair("USD", "JPY", 150.0, 0);
///
/// assert_eq!(conv.convert(100.0, "EUR", "USD").unwrap(), 110.0);
/// // Multi-hop EUR -> USD -> JPY
/// assert_eq!(conv.convert(100.0, "EUR", "JPY").unwrap(), 16500.0);
/// ```
#[derive(Debug, Default, Clone)]
pub struct CurrencyConverter {
    /// "BASE/QUOTE" -> pair
    pairs: FxHashMap<String, CurrencyPair>,
    /// currency -> sorted set of connected currencies (either direction)
    graph: BTreeMap<String, BTreeSet<String>>,
}

impl CurrencyConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update a currency pair. Both the forward edge and the
    /// undirected adjacency entries are installed.
    pub fn register_pair(&mut self, base: &str, quote: &str, rate: f64, timestamp_us: i64) {
        let pair = CurrencyPair {
            base: base.to_string(),
            quote: quote.to_string(),
            rate,
            timestamp_us,
        };
        self.pairs.insert(pair.pair_id(), pair);
        self.graph
            .entry(base.to_string())
            .or_default()
            .insert(quote.to_string());
        self.graph
            .entry(quote.to_string())
            .or_default()
            .insert(base.to_string());
    }

    /// Update the rate of an already-registered pair.
    pub fn update_rate(
        &mut self,
        base: &str,
        quote: &str,
        rate: f64,
        timestamp_us: i64,
    ) -> Result<(), CurrencyError> {
        let pair_id = format!("{}/{}", base, quote);
        match self.pairs.get_mut(&pair_id) {
            Some(pair) => {
                pair.rate = rate;
                pair.timestamp_us = timestamp_us;
                Ok(())
            }
            None => Err(CurrencyError::UnknownPair(pair_id)),
        }
    }

    pub fn has_pair(&self, base: &str, quote: &str) -> bool {
        self.pairs.contains_key(&format!("{}/{}", base, quote))
    }

    pub fn get_rate(&self, base: &str, quote: &str) -> Result<f64, CurrencyError> {
        let pair_id = format!("{}/{}", base, quote);
        self.pairs
            .get(&pair_id)
            .map(|p| p.rate)
            .ok_or(CurrencyError::UnknownPair(pair_id))
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
        self.graph.clear();
    }

    /// Convert an amount between currencies.
    ///
    /// Resolution order: identity, direct edge, inverse edge, BFS multi-hop.
    pub fn convert(&self, amount: f64, from: &str, to: &str) -> Result<f64, CurrencyError> {
        if from == to {
            return Ok(amount);
        }

        if let Some(pair) = self.pairs.get(&format!("{}/{}", from, to)) {
            return Ok(amount * pair.rate);
        }
        if let Some(pair) = self.pairs.get(&format!("{}/{}", to, from)) {
            return Ok(amount / pair.rate);
        }

        let path = self.find_path(from, to);
        if path.is_empty() {
            return Err(CurrencyError::NoPath {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let mut result = amount;
        for hop in path.windows(2) {
            let (curr, next) = (&hop[0], &hop[1]);
            if let Some(pair) = self.pairs.get(&format!("{}/{}", curr, next)) {
                result *= pair.rate;
            } else if let Some(pair) = self.pairs.get(&format!("{}/{}", next, curr)) {
                result /= pair.rate;
            } else {
                // find_path only walks registered adjacency
                return Err(CurrencyError::NoPath {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }
        Ok(result)
    }

    /// Convert a money fixed-point amount (10^6), rounding half away
    /// from zero after applying the (double) rate chain.
    pub fn convert_money(&self, amount: i64, from: &str, to: &str) -> Result<i64, CurrencyError> {
        if from == to {
            return Ok(amount);
        }
        let converted = self.convert(fixed::money_to_double(amount), from, to)?;
        Ok(fixed::money_from_double(converted))
    }

    /// Shortest conversion path found by BFS, e.g. `["EUR","USD","JPY"]`.
    /// Empty when no path exists.
    pub fn find_path(&self, from: &str, to: &str) -> Vec<String> {
        if from == to {
            return vec![from.to_string()];
        }
        if !self.graph.contains_key(from) || !self.graph.contains_key(to) {
            return Vec::new();
        }

        let mut parent: BTreeMap<String, String> = BTreeMap::new();
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        visited.insert(from.to_string());
        queue.push_back(from.to_string());

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![current];
                while let Some(p) = parent.get(path.last().unwrap()) {
                    path.push(p.clone());
                }
                path.reverse();
                return path;
            }
            if let Some(neighbors) = self.graph.get(&current) {
                for neighbor in neighbors {
                    if visited.insert(neighbor.clone()) {
                        parent.insert(neighbor.clone(), current.clone());
                        queue.push_back(neighbor.clone());
                    }
                }
            }
        }

        Vec::new()
    }

    /// Configuration-time validation: every registered currency must be
    /// reachable from every other. Walks reachability from the smallest
    /// currency code and fails on the first disconnected one.
    pub fn validate_paths(&self) -> Result<(), CurrencyError> {
        let Some(start) = self.graph.keys().next().cloned() else {
            return Ok(());
        };

        let mut reachable: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        reachable.insert(start.clone());
        queue.push_back(start.clone());

        while let Some(current) = queue.pop_front() {
            if let Some(neighbors) = self.graph.get(&current) {
                for neighbor in neighbors {
                    if reachable.insert(neighbor.clone()) {
                        queue.push_back(neighbor.clone());
                    }
                }
            }
        }

        for currency in self.graph.keys() {
            if !reachable.contains(currency) {
                return Err(CurrencyError::Disconnected {
                    currency: currency.clone(),
                    start,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter() -> CurrencyConverter {
        let mut conv = CurrencyConverter::new();
        conv.register_pair("EUR", "USD", 1.10, 0);
        conv.register_pair("USD", "JPY", 150.0, 0);
        conv
    }

    #[test]
    fn test_identity_conversion() {
        let conv = converter();
        assert_eq!(conv.convert(123.45, "EUR", "EUR").unwrap(), 123.45);
        // Identity holds even for unregistered currencies
        assert_eq!(conv.convert(1.0, "XXX", "XXX").unwrap(), 1.0);
    }

    #[test]
    fn test_direct_and_inverse() {
        let conv = converter();
        assert!((conv.convert(100.0, "EUR", "USD").unwrap() - 110.0).abs() < 1e-9);
        assert!((conv.convert(110.0, "USD", "EUR").unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_multi_hop() {
        let conv = converter();
        // EUR -> USD -> JPY: 100 * 1.10 * 150 = 16500
        assert!((conv.convert(100.0, "EUR", "JPY").unwrap() - 16500.0).abs() < 1e-6);
        // Reverse multi-hop
        assert!((conv.convert(16500.0, "JPY", "EUR").unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_path() {
        let mut conv = converter();
        conv.register_pair("AUD", "NZD", 1.08, 0);
        let err = conv.convert(1.0, "EUR", "NZD").unwrap_err();
        assert!(matches!(err, CurrencyError::NoPath { .. }));
    }

    #[test]
    fn test_validate_paths() {
        let conv = converter();
        assert!(conv.validate_paths().is_ok());

        let mut disconnected = converter();
        disconnected.register_pair("AUD", "NZD", 1.08, 0);
        assert!(matches!(
            disconnected.validate_paths(),
            Err(CurrencyError::Disconnected { .. })
        ));
    }

    #[test]
    fn test_find_path_is_shortest() {
        let mut conv = converter();
        // Add a longer alternative EUR -> GBP -> JPY alongside EUR -> USD -> JPY
        conv.register_pair("EUR", "GBP", 0.85, 0);
        conv.register_pair("GBP", "CHF", 1.12, 0);
        conv.register_pair("CHF", "JPY", 170.0, 0);
        let path = conv.find_path("EUR", "JPY");
        assert_eq!(path, vec!["EUR", "USD", "JPY"]);
    }

    #[test]
    fn test_update_rate() {
        let mut conv = converter();
        conv.update_rate("EUR", "USD", 1.20, 99).unwrap();
        assert_eq!(conv.get_rate("EUR", "USD").unwrap(), 1.20);
        assert!(conv.update_rate("EUR", "CHF", 0.95, 0).is_err());
    }

    #[test]
    fn test_convert_money_fixed() {
        let conv = converter();
        // $100 -> EUR at 1.10: 90.909091 (rounded at 6 decimals)
        let eur = conv.convert_money(100_000_000, "USD", "EUR").unwrap();
        assert_eq!(eur, 90_909_091);
        assert_eq!(conv.convert_money(42, "USD", "USD").unwrap(), 42);
    }
}
