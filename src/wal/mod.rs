//! Write-ahead log for crash recovery
//!
//! Append-only binary file of state-changing operations. Each record is
//! `[magic:u32][type:u8][length:u32][crc32:u32][payload]`, all fields
//! little-endian, CRC32 over the payload (IEEE 802.3 polynomial). Every
//! append is flushed and fsync'd before returning.
//!
//! A CHECKPOINT record marks a durable ledger snapshot: recovery replays
//! only the entries after the last checkpoint, and the file can be
//! truncated back to the checkpoint offset once the snapshot is safe.

pub mod payload;
pub mod recovery;

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Record magic marking the start of every entry.
pub const WAL_MAGIC: u32 = 0x4851_5457;

/// Header size on disk: magic(4) + type(1) + length(4) + crc32(4).
pub const WAL_HEADER_SIZE: usize = 13;

/// WAL errors
#[derive(Debug, Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupted WAL: {0}")]
    Corrupted(String),

    #[error("WAL is not open")]
    NotOpen,

    #[error("unknown WAL entry type {0}")]
    UnknownEntryType(u8),
}

/// Entry types enumerate the ledger's state-changing operations.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalEntryType {
    PositionOpen = 1,
    PositionClose = 2,
    PositionModify = 3,
    OrderPlace = 4,
    OrderCancel = 5,
    BalanceChange = 6,
    Checkpoint = 7,
}

impl TryFrom<u8> for WalEntryType {
    type Error = WalError;

    fn try_from(value: u8) -> Result<Self, WalError> {
        match value {
            1 => Ok(Self::PositionOpen),
            2 => Ok(Self::PositionClose),
            3 => Ok(Self::PositionModify),
            4 => Ok(Self::OrderPlace),
            5 => Ok(Self::OrderCancel),
            6 => Ok(Self::BalanceChange),
            7 => Ok(Self::Checkpoint),
            other => Err(WalError::UnknownEntryType(other)),
        }
    }
}

/// One decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    pub entry_type: WalEntryType,
    pub payload: Vec<u8>,
}

/// Append-only, CRC-checked, fsync'd operation log.
#[derive(Debug)]
pub struct WriteAheadLog {
    path: PathBuf,
    file: Option<File>,
    entry_count: u64,
    bytes_written: u64,
    last_checkpoint_pos: Option<u64>,
    append_failures: u64,
}

impl WriteAheadLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            entry_count: 0,
            bytes_written: 0,
            last_checkpoint_pos: None,
            append_failures: 0,
        }
    }

    /// Open (creating if needed) for appending. `truncate` discards any
    /// existing content.
    pub fn open(&mut self, truncate: bool) -> Result<(), WalError> {
        if self.file.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(truncate)
            .open(&self.path)?;
        let end = file.seek(SeekFrom::End(0))?;
        self.bytes_written = end;
        self.file = Some(file);
        self.entry_count = 0;
        self.last_checkpoint_pos = None;
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.sync_all();
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn append_failures(&self) -> u64 {
        self.append_failures
    }

    /// Append one record: header, payload, flush, fsync.
    pub fn append(&mut self, entry_type: WalEntryType, payload: &[u8]) -> Result<(), WalError> {
        let file = self.file.as_mut().ok_or(WalError::NotOpen)?;

        let mut header = [0u8; WAL_HEADER_SIZE];
        header[0..4].copy_from_slice(&WAL_MAGIC.to_le_bytes());
        header[4] = entry_type as u8;
        header[5..9].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        header[9..13].copy_from_slice(&crc32fast::hash(payload).to_le_bytes());

        file.write_all(&header)?;
        file.write_all(payload)?;
        file.flush()?;
        file.sync_all()?;

        self.entry_count += 1;
        self.bytes_written += (WAL_HEADER_SIZE + payload.len()) as u64;
        Ok(())
    }

    /// Non-critical-path append: failures are counted and logged, never
    /// propagated (used per command inside the tick pipeline).
    pub fn append_soft(&mut self, entry_type: WalEntryType, payload: &[u8]) {
        if let Err(err) = self.append(entry_type, payload) {
            self.append_failures += 1;
            tracing::error!(%err, ?entry_type, "WAL append failed");
        }
    }

    /// Write a CHECKPOINT record and remember its file offset for
    /// `truncate_to_checkpoint`.
    pub fn mark_checkpoint(&mut self) -> Result<(), WalError> {
        let file = self.file.as_mut().ok_or(WalError::NotOpen)?;
        let pos = file.stream_position()?;
        self.last_checkpoint_pos = Some(pos);
        self.append(WalEntryType::Checkpoint, &[0u8])
    }

    /// Scan the file from the start and return every record. Fails with
    /// `Corrupted` on magic mismatch, short payloads, or CRC mismatch.
    /// A torn header at the tail (partial final write) ends the scan.
    pub fn read_all(&self) -> Result<Vec<WalEntry>, WalError> {
        let mut reader = File::open(&self.path)?;
        let mut entries = Vec::new();

        loop {
            let mut header = [0u8; WAL_HEADER_SIZE];
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            if magic != WAL_MAGIC {
                return Err(WalError::Corrupted(format!(
                    "invalid magic 0x{:08X} at entry {}",
                    magic,
                    entries.len()
                )));
            }
            let entry_type = WalEntryType::try_from(header[4])?;
            let length = u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize;
            let expected_crc = u32::from_le_bytes([header[9], header[10], header[11], header[12]]);

            let mut payload = vec![0u8; length];
            reader.read_exact(&mut payload).map_err(|_| {
                WalError::Corrupted(format!("incomplete payload at entry {}", entries.len()))
            })?;

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                return Err(WalError::Corrupted(format!(
                    "CRC32 mismatch at entry {}: expected {:08X}, got {:08X}",
                    entries.len(),
                    expected_crc,
                    actual_crc
                )));
            }

            entries.push(WalEntry {
                entry_type,
                payload,
            });
        }

        Ok(entries)
    }

    /// Entries after the last CHECKPOINT record (all entries when no
    /// checkpoint exists).
    pub fn read_uncommitted(&self) -> Result<Vec<WalEntry>, WalError> {
        let entries = self.read_all()?;
        let start = entries
            .iter()
            .rposition(|e| e.entry_type == WalEntryType::Checkpoint)
            .map(|idx| idx + 1)
            .unwrap_or(0);
        Ok(entries[start..].to_vec())
    }

    /// Shorten the file to the last checkpoint's offset and reopen.
    /// No-op when no checkpoint was marked on this handle.
    pub fn truncate_to_checkpoint(&mut self) -> Result<(), WalError> {
        let Some(pos) = self.last_checkpoint_pos else {
            return Ok(());
        };
        let file = self.file.as_mut().ok_or(WalError::NotOpen)?;
        file.sync_all()?;
        file.set_len(pos)?;
        file.seek(SeekFrom::End(0))?;
        file.sync_all()?;
        self.bytes_written = pos;
        self.last_checkpoint_pos = None;
        Ok(())
    }

    /// Truncate to zero length.
    pub fn clear(&mut self) -> Result<(), WalError> {
        let file = self.file.as_mut().ok_or(WalError::NotOpen)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.sync_all()?;
        self.entry_count = 0;
        self.bytes_written = 0;
        self.last_checkpoint_pos = None;
        Ok(())
    }
}

impl Drop for WriteAheadLog {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn wal_path(tag: &str) -> String {
        format!("target/test_wal_{}_{}.wal", tag, std::process::id())
    }

    fn open_wal(tag: &str) -> WriteAheadLog {
        let path = wal_path(tag);
        let _ = fs::remove_file(&path);
        let mut wal = WriteAheadLog::new(&path);
        wal.open(true).unwrap();
        wal
    }

    #[test]
    fn test_append_read_round_trip() {
        let mut wal = open_wal("roundtrip");

        wal.append(WalEntryType::PositionOpen, b"first payload").unwrap();
        wal.append(WalEntryType::OrderPlace, b"second").unwrap();
        wal.append(WalEntryType::BalanceChange, b"").unwrap();
        assert_eq!(wal.entry_count(), 3);

        let entries = wal.read_all().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].entry_type, WalEntryType::PositionOpen);
        assert_eq!(entries[0].payload, b"first payload");
        assert_eq!(entries[1].entry_type, WalEntryType::OrderPlace);
        assert_eq!(entries[1].payload, b"second");
        assert!(entries[2].payload.is_empty());

        let _ = fs::remove_file(wal.path().to_path_buf());
    }

    #[test]
    fn test_corruption_detection() {
        let mut wal = open_wal("crc");
        wal.append(WalEntryType::PositionOpen, b"some payload bytes").unwrap();
        let path = wal.path().to_path_buf();
        wal.close();

        // Flip a payload byte just past the header
        let mut bytes = fs::read(&path).unwrap();
        bytes[WAL_HEADER_SIZE] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let mut wal = WriteAheadLog::new(&path);
        wal.open(false).unwrap();
        let err = wal.read_all().unwrap_err();
        assert!(matches!(err, WalError::Corrupted(_)), "got {:?}", err);
        assert!(err.to_string().contains("CRC32"));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_magic_mismatch() {
        let mut wal = open_wal("magic");
        wal.append(WalEntryType::OrderCancel, b"x").unwrap();
        let path = wal.path().to_path_buf();
        wal.close();

        let mut bytes = fs::read(&path).unwrap();
        bytes[0] = 0x00;
        fs::write(&path, &bytes).unwrap();

        let mut wal = WriteAheadLog::new(&path);
        wal.open(false).unwrap();
        let err = wal.read_all().unwrap_err();
        assert!(err.to_string().contains("magic"));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_length_underflow() {
        let mut wal = open_wal("short");
        wal.append(WalEntryType::OrderPlace, b"full payload").unwrap();
        let path = wal.path().to_path_buf();
        wal.close();

        // Chop the payload tail
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        let mut wal = WriteAheadLog::new(&path);
        wal.open(false).unwrap();
        let err = wal.read_all().unwrap_err();
        assert!(err.to_string().contains("incomplete payload"));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_checkpoint_and_uncommitted() {
        let mut wal = open_wal("checkpoint");
        wal.append(WalEntryType::PositionOpen, b"before-1").unwrap();
        wal.append(WalEntryType::PositionClose, b"before-2").unwrap();
        wal.mark_checkpoint().unwrap();
        wal.append(WalEntryType::OrderPlace, b"after-1").unwrap();
        wal.append(WalEntryType::OrderCancel, b"after-2").unwrap();

        let uncommitted = wal.read_uncommitted().unwrap();
        assert_eq!(uncommitted.len(), 2);
        assert_eq!(uncommitted[0].payload, b"after-1");
        assert_eq!(uncommitted[1].payload, b"after-2");

        let _ = fs::remove_file(wal.path().to_path_buf());
    }

    #[test]
    fn test_truncate_to_checkpoint() {
        let mut wal = open_wal("truncate");
        wal.append(WalEntryType::PositionOpen, b"keep").unwrap();
        wal.mark_checkpoint().unwrap();
        wal.append(WalEntryType::OrderPlace, b"drop-1").unwrap();
        wal.append(WalEntryType::OrderPlace, b"drop-2").unwrap();

        wal.truncate_to_checkpoint().unwrap();

        let entries = wal.read_all().unwrap();
        // Only the pre-checkpoint entry survives (the checkpoint record
        // itself sat at the remembered offset and is dropped too)
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload, b"keep");

        // Appends continue cleanly after the truncation
        wal.append(WalEntryType::BalanceChange, b"new").unwrap();
        let entries = wal.read_all().unwrap();
        assert_eq!(entries.len(), 2);

        let _ = fs::remove_file(wal.path().to_path_buf());
    }

    #[test]
    fn test_no_checkpoint_returns_everything() {
        let mut wal = open_wal("nocp");
        wal.append(WalEntryType::PositionOpen, b"a").unwrap();
        wal.append(WalEntryType::PositionClose, b"b").unwrap();
        assert_eq!(wal.read_uncommitted().unwrap().len(), 2);
        // Truncation without a checkpoint is a no-op
        wal.truncate_to_checkpoint().unwrap();
        assert_eq!(wal.read_all().unwrap().len(), 2);

        let _ = fs::remove_file(wal.path().to_path_buf());
    }

    #[test]
    fn test_append_requires_open() {
        let mut wal = WriteAheadLog::new(wal_path("closed"));
        assert!(matches!(
            wal.append(WalEntryType::PositionOpen, b"x"),
            Err(WalError::NotOpen)
        ));
    }

    #[test]
    fn test_append_soft_counts_failures() {
        let mut wal = WriteAheadLog::new(wal_path("soft"));
        wal.append_soft(WalEntryType::PositionOpen, b"x");
        assert_eq!(wal.append_failures(), 1);
    }
}
