//! Core types used throughout the engine
//!
//! These are fundamental type aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

/// Symbol ID - dense integer identifier for a registered symbol.
///
/// # Constraints:
/// - **Immutable**: Once assigned at registration, NEVER changes
/// - **Small values**: Assigned contiguously (0, 1, 2, ...)
///
/// Used as the key for per-symbol clocks, last-price caches and
/// broadcast payloads so the hot path never hashes strings.
pub type SymbolId = u32;

/// Ticket - unique identifier drawn from the ledger's monotonic counter.
///
/// Positions, pending orders and deals all draw from the same stream,
/// so a ticket is globally unique across entity kinds. The counter
/// starts at 1000 and never decreases except via snapshot restore.
pub type Ticket = u64;

/// Sequence number for ordering (event queue tie-break, WAL entries)
pub type SeqNum = u64;

/// Microseconds since the Unix epoch, UTC
pub type TimestampUs = i64;
