//! Engine configuration
//!
//! Serde-backed configuration with sensible defaults for every section, so
//! a partial JSON file (or none at all) yields a runnable engine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Starting balance in the account currency
    pub initial_balance: f64,
    /// Account currency code (e.g. "USD")
    pub currency: String,
    /// Account leverage (e.g. 100 for 1:100)
    pub leverage: i64,
    /// Margin-call warning threshold, percent
    pub margin_call_level: f64,
    /// Forced-liquidation threshold, percent
    pub stop_out_level: f64,
    /// Seed for the costs engine RNG (bit-identical replay knob)
    pub rng_seed: u64,
    #[serde(default)]
    pub wal: WalConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            currency: "USD".to_string(),
            leverage: 100,
            margin_call_level: 100.0,
            stop_out_level: 50.0,
            rng_seed: 0,
            wal: WalConfig::default(),
            broadcast: BroadcastConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Write-ahead-log section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "data/backtest.wal".to_string(),
        }
    }
}

/// Outbound broadcaster section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    pub enabled: bool,
    /// UDP target, host:port
    pub endpoint: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "127.0.0.1:5555".to_string(),
        }
    }
}

/// Logging section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub dir: String,
    pub file: String,
    pub use_json: bool,
    /// "hourly", "daily" or "never"
    pub rotation: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
            file: "tickforge.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
        }
    }
}
