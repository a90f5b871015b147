//! Transaction identity

use std::fmt;

/// Id of the synthetic transaction every store starts from
pub const BASE_TX_ID: i64 = 1;

/// Checksum seed used before any transaction has been written
pub const BASE_TX_CHECKSUM: i32 = 0xDEAD_5EEDu32 as i32;

pub const BASE_TX_COMMIT_TIMESTAMP: i64 = 0;

/// Chunk number of a chunked transaction; `None` where one is expected means
/// the batch is not chunked.
pub type ChunkId = i64;

/// Consensus (replication) index attached to a transaction.
///
/// Entries written before consensus tracking existed carry no index. That
/// absence is kept as its own state and never folded into a number, since
/// every `i64` is a valid index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConsensusIndex {
    #[default]
    Unknown,
    Known(i64),
}

impl ConsensusIndex {
    pub fn as_option(self) -> Option<i64> {
        match self {
            ConsensusIndex::Unknown => None,
            ConsensusIndex::Known(index) => Some(index),
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, ConsensusIndex::Known(_))
    }

    /// Encodes the index as the opaque start-entry header.
    /// Unknown is an empty header.
    pub fn to_header(self) -> Vec<u8> {
        match self {
            ConsensusIndex::Unknown => Vec::new(),
            ConsensusIndex::Known(index) => index.to_be_bytes().to_vec(),
        }
    }

    /// Inverse of [`ConsensusIndex::to_header`]; headers of any other length
    /// carry no index.
    pub fn from_header(header: &[u8]) -> Self {
        match <[u8; 8]>::try_from(header) {
            Ok(bytes) => ConsensusIndex::Known(i64::from_be_bytes(bytes)),
            Err(_) => ConsensusIndex::Unknown,
        }
    }
}

impl From<Option<i64>> for ConsensusIndex {
    fn from(index: Option<i64>) -> Self {
        index.map_or(ConsensusIndex::Unknown, ConsensusIndex::Known)
    }
}

/// Identity of a committed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId {
    pub id: i64,
    pub checksum: i32,
    pub commit_timestamp: i64,
    pub consensus_index: ConsensusIndex,
}

impl TransactionId {
    pub fn new(id: i64, checksum: i32, commit_timestamp: i64, consensus_index: ConsensusIndex) -> Self {
        Self {
            id,
            checksum,
            commit_timestamp,
            consensus_index,
        }
    }

    /// The transaction a brand-new store is considered to have committed
    pub fn base() -> Self {
        Self::new(
            BASE_TX_ID,
            BASE_TX_CHECKSUM,
            BASE_TX_COMMIT_TIMESTAMP,
            ConsensusIndex::Unknown,
        )
    }

    /// Copy with the consensus index dropped
    pub fn without_consensus_index(self) -> Self {
        Self {
            consensus_index: ConsensusIndex::Unknown,
            ..self
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TransactionId{{id={}, checksum={}, commit_ts={}, consensus={:?}}}",
            self.id, self.checksum, self.commit_timestamp, self.consensus_index
        )
    }
}
