//! WAL payload encoding
//!
//! One serde struct per entry type, serialized with bincode. The encoding
//! is deterministic (fixed-width integers, length-prefixed strings), so
//! records round-trip through the WAL without loss.

use crate::core_types::{SymbolId, Ticket};
use crate::wal::{WalEntry, WalEntryType, WalError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionOpenRecord {
    pub ticket: Ticket,
    pub symbol_id: SymbolId,
    /// 0 = buy, 1 = sell
    pub side: u8,
    pub volume: i64,
    pub price: i64,
    pub stop_loss: i64,
    pub take_profit: i64,
    pub commission: i64,
    /// Originating pending order, 0 for direct market opens
    pub order_ticket: Ticket,
    pub time_us: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionCloseRecord {
    pub ticket: Ticket,
    pub volume: i64,
    pub price: i64,
    pub commission: i64,
    pub time_us: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionModifyRecord {
    pub ticket: Ticket,
    pub stop_loss: i64,
    pub take_profit: i64,
    pub time_us: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaceRecord {
    pub ticket: Ticket,
    pub symbol_id: SymbolId,
    pub order_type: u8,
    pub volume: i64,
    pub price: i64,
    pub stop_limit: i64,
    pub stop_loss: i64,
    pub take_profit: i64,
    pub type_time: u8,
    pub expiration_us: i64,
    pub time_us: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelRecord {
    pub ticket: Ticket,
    pub time_us: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChangeRecord {
    pub amount: i64,
    pub comment: String,
    pub time_us: i64,
}

/// Typed view of a decoded WAL entry.
#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    PositionOpen(PositionOpenRecord),
    PositionClose(PositionCloseRecord),
    PositionModify(PositionModifyRecord),
    OrderPlace(OrderPlaceRecord),
    OrderCancel(OrderCancelRecord),
    BalanceChange(BalanceChangeRecord),
    Checkpoint,
}

pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, WalError> {
    bincode::serialize(record)
        .map_err(|e| WalError::Corrupted(format!("payload encode failed: {}", e)))
}

fn decode_payload<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, WalError> {
    bincode::deserialize(payload)
        .map_err(|e| WalError::Corrupted(format!("payload decode failed: {}", e)))
}

/// Decode a raw WAL entry into its typed record.
pub fn decode(entry: &WalEntry) -> Result<WalRecord, WalError> {
    Ok(match entry.entry_type {
        WalEntryType::PositionOpen => WalRecord::PositionOpen(decode_payload(&entry.payload)?),
        WalEntryType::PositionClose => WalRecord::PositionClose(decode_payload(&entry.payload)?),
        WalEntryType::PositionModify => WalRecord::PositionModify(decode_payload(&entry.payload)?),
        WalEntryType::OrderPlace => WalRecord::OrderPlace(decode_payload(&entry.payload)?),
        WalEntryType::OrderCancel => WalRecord::OrderCancel(decode_payload(&entry.payload)?),
        WalEntryType::BalanceChange => WalRecord::BalanceChange(decode_payload(&entry.payload)?),
        WalEntryType::Checkpoint => WalRecord::Checkpoint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_open_round_trip() {
        let record = PositionOpenRecord {
            ticket: 1000,
            symbol_id: 1,
            side: 0,
            volume: 100_000,
            price: 110_015,
            stop_loss: 109_500,
            take_profit: 111_000,
            commission: 700_000,
            order_ticket: 0,
            time_us: 1_000_000,
        };
        let bytes = encode(&record).unwrap();
        let entry = WalEntry {
            entry_type: WalEntryType::PositionOpen,
            payload: bytes,
        };
        assert_eq!(decode(&entry).unwrap(), WalRecord::PositionOpen(record));
    }

    #[test]
    fn test_balance_change_round_trip_with_string() {
        let record = BalanceChangeRecord {
            amount: -42_000_000,
            comment: "weekly fee".to_string(),
            time_us: 7,
        };
        let entry = WalEntry {
            entry_type: WalEntryType::BalanceChange,
            payload: encode(&record).unwrap(),
        };
        assert_eq!(decode(&entry).unwrap(), WalRecord::BalanceChange(record));
    }

    #[test]
    fn test_checkpoint_decodes_without_payload() {
        let entry = WalEntry {
            entry_type: WalEntryType::Checkpoint,
            payload: vec![0],
        };
        assert_eq!(decode(&entry).unwrap(), WalRecord::Checkpoint);
    }

    #[test]
    fn test_garbage_payload_fails() {
        let entry = WalEntry {
            entry_type: WalEntryType::PositionOpen,
            payload: vec![1, 2, 3],
        };
        assert!(matches!(decode(&entry), Err(WalError::Corrupted(_))));
    }
}
