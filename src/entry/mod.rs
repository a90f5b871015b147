//! Log Entry Module
//!
//! The closed set of entries that can appear in the transaction log and the
//! checkpoint log, plus their binary codec.
//!
//! ## Entry Format
//! ```text
//! ┌──────────┬─────────────┬──────────────────────────────┬──────────────┐
//! │ Kind (1) │ Version (1) │ Fields (big-endian, length-  │ Checksum (4) │
//! │          │             │ prefixed variable parts)     │              │
//! └──────────┴─────────────┴──────────────────────────────┴──────────────┘
//! ```
//!
//! The checksum is a CRC32 over kind, version and fields, seeded with the
//! checksum of the previous entry. Kind `0` at an entry boundary marks the
//! end of written data (preallocated space is zero-filled).
//!
//! ## Kinds
//! - 0x01: transaction start
//! - 0x03: command
//! - 0x05: transaction commit
//! - 0x06: chunk start (5.6+)
//! - 0x07: chunk end (5.6+)
//! - 0x08: detached checkpoint (one layout per kernel version)

mod codec;

pub use codec::{decode_entry, DecodeOutcome, DecodedEntry, LogEntryWriter};
pub(crate) use codec::is_known_entry;

use crate::model::{ChunkId, ConsensusIndex, KernelVersion, LegacyStoreId, LogPosition, StoreId, TransactionId};
use crate::transaction::StorageCommand;

/// Size of the trailing checksum of every entry
pub const CHECKSUM_SIZE: u64 = 4;

/// Tag byte identifying the entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryKind {
    Start = 0x01,
    Command = 0x03,
    Commit = 0x05,
    ChunkStart = 0x06,
    ChunkEnd = 0x07,
    Checkpoint = 0x08,
}

impl EntryKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(EntryKind::Start),
            0x03 => Some(EntryKind::Command),
            0x05 => Some(EntryKind::Commit),
            0x06 => Some(EntryKind::ChunkStart),
            0x07 => Some(EntryKind::ChunkEnd),
            0x08 => Some(EntryKind::Checkpoint),
            _ => None,
        }
    }
}

// =============================================================================
// Transaction Entries
// =============================================================================

/// Opens a transaction (or the first chunk of one)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartEntry {
    pub kernel_version: KernelVersion,
    pub time_written: i64,
    pub last_committed_tx_when_started: i64,
    /// Checksum of the previous transaction's final entry
    pub previous_checksum: i32,
    /// Opaque header bytes; carries the consensus index
    pub additional_header: Vec<u8>,
}

impl StartEntry {
    pub fn consensus_index(&self) -> ConsensusIndex {
        ConsensusIndex::from_header(&self.additional_header)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEntry {
    pub kernel_version: KernelVersion,
    pub command: StorageCommand,
}

/// Closes a transaction. The entry checksum doubles as the transaction checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    pub kernel_version: KernelVersion,
    pub tx_id: i64,
    pub time_written: i64,
}

/// Opens a non-first chunk of a chunked transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkStartEntry {
    pub kernel_version: KernelVersion,
    pub time_written: i64,
    pub chunk_id: ChunkId,
    pub previous_batch_position: Option<LogPosition>,
}

/// Closes a non-last chunk of a chunked transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEndEntry {
    pub kernel_version: KernelVersion,
    pub tx_id: i64,
    pub chunk_id: ChunkId,
}

// =============================================================================
// Checkpoint Entries
// =============================================================================

/// 4.2-era checkpoint: no transaction id, legacy store id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyCheckpointEntry {
    pub log_position: LogPosition,
    pub time_written: i64,
    pub store_id: LegacyStoreId,
    pub reason: String,
}

/// 5.0 detached checkpoint: transaction id without consensus index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedCheckpointV5_0 {
    pub transaction_id: TransactionId,
    pub log_position: LogPosition,
    pub time_written: i64,
    pub store_id: StoreId,
    pub reason: String,
}

/// 5.6 detached checkpoint: full transaction id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedCheckpointV5_6 {
    pub transaction_id: TransactionId,
    pub log_position: LogPosition,
    pub time_written: i64,
    pub store_id: StoreId,
    pub reason: String,
}

/// A checkpoint marker in whichever layout it was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointEntry {
    Legacy(LegacyCheckpointEntry),
    DetachedV5_0(DetachedCheckpointV5_0),
    DetachedV5_6(DetachedCheckpointV5_6),
}

impl CheckpointEntry {
    /// Builds the layout that belongs to `kernel_version`, dropping whatever
    /// that layout cannot hold.
    pub fn new(
        kernel_version: KernelVersion,
        transaction_id: TransactionId,
        log_position: LogPosition,
        time_written: i64,
        store_id: &StoreId,
        reason: impl Into<String>,
    ) -> Self {
        let reason = reason.into();
        match kernel_version {
            KernelVersion::V4_2 => CheckpointEntry::Legacy(LegacyCheckpointEntry {
                log_position,
                time_written,
                store_id: LegacyStoreId::from(store_id),
                reason,
            }),
            KernelVersion::V5_0 => CheckpointEntry::DetachedV5_0(DetachedCheckpointV5_0 {
                transaction_id: transaction_id.without_consensus_index(),
                log_position,
                time_written,
                store_id: store_id.clone(),
                reason,
            }),
            KernelVersion::V5_6 => CheckpointEntry::DetachedV5_6(DetachedCheckpointV5_6 {
                transaction_id,
                log_position,
                time_written,
                store_id: store_id.clone(),
                reason,
            }),
        }
    }

    pub fn kernel_version(&self) -> KernelVersion {
        match self {
            CheckpointEntry::Legacy(_) => KernelVersion::V4_2,
            CheckpointEntry::DetachedV5_0(_) => KernelVersion::V5_0,
            CheckpointEntry::DetachedV5_6(_) => KernelVersion::V5_6,
        }
    }

    /// Transaction log position the checkpoint is consistent with
    pub fn log_position(&self) -> LogPosition {
        match self {
            CheckpointEntry::Legacy(e) => e.log_position,
            CheckpointEntry::DetachedV5_0(e) => e.log_position,
            CheckpointEntry::DetachedV5_6(e) => e.log_position,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            CheckpointEntry::Legacy(e) => &e.reason,
            CheckpointEntry::DetachedV5_0(e) => &e.reason,
            CheckpointEntry::DetachedV5_6(e) => &e.reason,
        }
    }

    pub fn time_written(&self) -> i64 {
        match self {
            CheckpointEntry::Legacy(e) => e.time_written,
            CheckpointEntry::DetachedV5_0(e) => e.time_written,
            CheckpointEntry::DetachedV5_6(e) => e.time_written,
        }
    }
}

// =============================================================================
// LogEntry
// =============================================================================

/// Any entry of either log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Start(StartEntry),
    Command(CommandEntry),
    Commit(CommitEntry),
    ChunkStart(ChunkStartEntry),
    ChunkEnd(ChunkEndEntry),
    Checkpoint(CheckpointEntry),
}

impl LogEntry {
    pub fn kind(&self) -> EntryKind {
        match self {
            LogEntry::Start(_) => EntryKind::Start,
            LogEntry::Command(_) => EntryKind::Command,
            LogEntry::Commit(_) => EntryKind::Commit,
            LogEntry::ChunkStart(_) => EntryKind::ChunkStart,
            LogEntry::ChunkEnd(_) => EntryKind::ChunkEnd,
            LogEntry::Checkpoint(_) => EntryKind::Checkpoint,
        }
    }

    pub fn kernel_version(&self) -> KernelVersion {
        match self {
            LogEntry::Start(e) => e.kernel_version,
            LogEntry::Command(e) => e.kernel_version,
            LogEntry::Commit(e) => e.kernel_version,
            LogEntry::ChunkStart(e) => e.kernel_version,
            LogEntry::ChunkEnd(e) => e.kernel_version,
            LogEntry::Checkpoint(e) => e.kernel_version(),
        }
    }
}
