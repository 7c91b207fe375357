//! WAL recovery
//!
//! Replays decoded WAL records against a ledger restored from the last
//! durable snapshot, rebuilding the pre-crash state. The usual sequence:
//!
//! 1. restore the ledger from the checkpoint snapshot
//! 2. `wal.read_uncommitted()` for the records past the checkpoint
//! 3. `replay` them here
//! 4. `wal.mark_checkpoint()` once a fresh snapshot is durable

use crate::currency::CurrencyConverter;
use crate::trade::order::{OrderTime, OrderType};
use crate::trade::position::PositionType;
use crate::trade::Trade;
use crate::wal::payload::{self, WalRecord};
use crate::wal::{WalEntry, WalError};
use tracing::{info, warn};

fn order_type_from_u8(value: u8) -> Option<OrderType> {
    match value {
        0 => Some(OrderType::Buy),
        1 => Some(OrderType::Sell),
        2 => Some(OrderType::BuyLimit),
        3 => Some(OrderType::SellLimit),
        4 => Some(OrderType::BuyStop),
        5 => Some(OrderType::SellStop),
        6 => Some(OrderType::BuyStopLimit),
        7 => Some(OrderType::SellStopLimit),
        _ => None,
    }
}

fn order_time_from_u8(value: u8) -> OrderTime {
    match value {
        1 => OrderTime::Day,
        2 => OrderTime::Specified,
        3 => OrderTime::SpecifiedDay,
        _ => OrderTime::Gtc,
    }
}

/// Replay WAL entries into a ledger. Returns the number of applied
/// records. Records referencing unknown tickets or symbols are skipped
/// with a warning (the log may legitimately contain operations on
/// entities closed before the snapshot).
pub fn replay(
    entries: &[WalEntry],
    trade: &mut Trade,
    conv: &CurrencyConverter,
) -> Result<u64, WalError> {
    let mut applied = 0_u64;

    for entry in entries {
        let record = payload::decode(entry)?;
        let ok = match record {
            WalRecord::PositionOpen(rec) => {
                let side = if rec.side == 0 {
                    PositionType::Buy
                } else {
                    PositionType::Sell
                };
                trade.recover_position_open(
                    conv,
                    rec.ticket,
                    rec.symbol_id,
                    side,
                    rec.volume,
                    rec.price,
                    rec.stop_loss,
                    rec.take_profit,
                    rec.commission,
                    rec.order_ticket,
                    rec.time_us,
                )
            }
            WalRecord::PositionClose(rec) => trade.recover_position_close(
                conv,
                rec.ticket,
                rec.volume,
                rec.price,
                rec.commission,
                rec.time_us,
            ),
            WalRecord::PositionModify(rec) => {
                trade.recover_position_modify(rec.ticket, rec.stop_loss, rec.take_profit)
            }
            WalRecord::OrderPlace(rec) => match order_type_from_u8(rec.order_type) {
                Some(order_type) => trade.recover_order_place(
                    rec.ticket,
                    rec.symbol_id,
                    order_type,
                    rec.volume,
                    rec.price,
                    rec.stop_limit,
                    rec.stop_loss,
                    rec.take_profit,
                    order_time_from_u8(rec.type_time),
                    rec.expiration_us,
                    rec.time_us,
                ),
                None => false,
            },
            WalRecord::OrderCancel(rec) => {
                trade.set_current_time(rec.time_us);
                trade.order_delete(rec.ticket)
            }
            WalRecord::BalanceChange(rec) => {
                trade.set_current_time(rec.time_us);
                trade.balance_change(crate::fixed::money_to_double(rec.amount), &rec.comment)
            }
            WalRecord::Checkpoint => true,
        };

        if ok {
            applied += 1;
        } else {
            warn!(entry_type = ?entry.entry_type, "skipped unreplayable WAL record");
        }
    }

    trade.update_equity(conv);
    info!(applied, total = entries.len(), "WAL recovery complete");
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolSpec;
    use crate::wal::payload::{
        encode, OrderCancelRecord, OrderPlaceRecord, PositionCloseRecord, PositionOpenRecord,
    };
    use crate::wal::WalEntryType;

    fn ledger() -> (Trade, CurrencyConverter) {
        let mut trade = Trade::new(10_000.0, "USD", 100);
        trade.register_symbol(
            SymbolSpec::new("EURUSD", 1, 5)
                .with_contract_size(100_000)
                .with_volume_limits(0.01, 100.0, 0.01)
                .with_currencies("EUR", "USD", "USD"),
        );
        (trade, conv())
    }

    fn conv() -> CurrencyConverter {
        CurrencyConverter::new()
    }

    fn entry<T: serde::Serialize>(entry_type: WalEntryType, record: &T) -> WalEntry {
        WalEntry {
            entry_type,
            payload: encode(record).unwrap(),
        }
    }

    #[test]
    fn test_replay_open_then_close() {
        let (mut trade, conv) = ledger();

        let entries = vec![
            entry(
                WalEntryType::PositionOpen,
                &PositionOpenRecord {
                    ticket: 1000,
                    symbol_id: 1,
                    side: 0,
                    volume: 100_000,
                    price: 110_015,
                    stop_loss: 0,
                    take_profit: 0,
                    commission: 0,
                    order_ticket: 0,
                    time_us: 1_000_000,
                },
            ),
            entry(
                WalEntryType::PositionClose,
                &PositionCloseRecord {
                    ticket: 1000,
                    volume: 100_000,
                    price: 110_100,
                    commission: 0,
                    time_us: 2_000_000,
                },
            ),
        ];

        let applied = replay(&entries, &mut trade, &conv).unwrap();
        assert_eq!(applied, 2);
        assert!(trade.positions().is_empty());
        // Round trip realized +$8.50
        assert!((trade.account().balance() - 10_008.5).abs() < 1e-6);
        assert_eq!(trade.deals().len(), 2);
    }

    #[test]
    fn test_replay_restores_open_position_and_counter() {
        let (mut trade, conv) = ledger();

        let entries = vec![entry(
            WalEntryType::PositionOpen,
            &PositionOpenRecord {
                ticket: 1040,
                symbol_id: 1,
                side: 1,
                volume: 200_000,
                price: 110_000,
                stop_loss: 110_500,
                take_profit: 109_000,
                commission: 140_000,
                order_ticket: 0,
                time_us: 1_000_000,
            },
        )];
        replay(&entries, &mut trade, &conv).unwrap();

        let position = trade.position(1040).unwrap();
        assert_eq!(position.position_type, PositionType::Sell);
        assert_eq!(position.stop_loss, 110_500);
        assert_eq!(position.commission, 140_000);
        assert!(trade.account().margin() > 0.0);

        // New tickets continue past the recovered ones
        trade.update_prices(&conv, "EURUSD", 1.10000, 1.10015, 3_000_000);
        trade.buy(&conv, 0.1, "EURUSD", 0.0, 0.0, "");
        assert!(*trade.positions().keys().last().unwrap() > 1040);
    }

    #[test]
    fn test_replay_order_place_and_cancel() {
        let (mut trade, conv) = ledger();

        let entries = vec![
            entry(
                WalEntryType::OrderPlace,
                &OrderPlaceRecord {
                    ticket: 1010,
                    symbol_id: 1,
                    order_type: 2, // BUY_LIMIT
                    volume: 100_000,
                    price: 109_000,
                    stop_limit: 0,
                    stop_loss: 0,
                    take_profit: 0,
                    type_time: 0,
                    expiration_us: 0,
                    time_us: 1_000_000,
                },
            ),
            entry(
                WalEntryType::OrderCancel,
                &OrderCancelRecord {
                    ticket: 1010,
                    time_us: 2_000_000,
                },
            ),
        ];
        let applied = replay(&entries, &mut trade, &conv).unwrap();
        assert_eq!(applied, 2);
        assert!(trade.orders().is_empty());
        assert_eq!(trade.history_orders().len(), 1);
    }

    #[test]
    fn test_replay_skips_unknown_tickets() {
        let (mut trade, conv) = ledger();
        let entries = vec![entry(
            WalEntryType::PositionClose,
            &PositionCloseRecord {
                ticket: 9999,
                volume: 100_000,
                price: 110_000,
                commission: 0,
                time_us: 1,
            },
        )];
        let applied = replay(&entries, &mut trade, &conv).unwrap();
        assert_eq!(applied, 0);
    }

    #[test]
    fn test_fill_record_retires_pending_order() {
        let (mut trade, conv) = ledger();

        let entries = vec![
            entry(
                WalEntryType::OrderPlace,
                &OrderPlaceRecord {
                    ticket: 1010,
                    symbol_id: 1,
                    order_type: 2,
                    volume: 100_000,
                    price: 109_000,
                    stop_limit: 0,
                    stop_loss: 0,
                    take_profit: 0,
                    type_time: 0,
                    expiration_us: 0,
                    time_us: 1_000_000,
                },
            ),
            entry(
                WalEntryType::PositionOpen,
                &PositionOpenRecord {
                    ticket: 1011,
                    symbol_id: 1,
                    side: 0,
                    volume: 100_000,
                    price: 109_000,
                    stop_loss: 0,
                    take_profit: 0,
                    commission: 0,
                    order_ticket: 1010,
                    time_us: 2_000_000,
                },
            ),
        ];
        replay(&entries, &mut trade, &conv).unwrap();

        assert!(trade.orders().is_empty(), "filled order must leave the active map");
        assert!(trade.position(1011).is_some());
        let filled = trade.history_orders().last().unwrap();
        assert_eq!(filled.ticket, 1010);
    }
}
