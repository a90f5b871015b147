//! Transaction Module
//!
//! What the log stores for a transaction: opaque storage commands grouped in
//! batches, and the committed form read back from the log.

mod committed;
mod cursor;

pub use committed::CommittedTransactionRepresentation;
pub use cursor::TransactionCursor;

use bytes::Bytes;

use crate::model::{ConsensusIndex, KernelVersion};

/// One opaque storage-engine command. The log never looks inside the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageCommand {
    payload: Bytes,
}

impl StorageCommand {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Commands handed to the log in one append, with the transaction facts the
/// entries around them need.
///
/// A complete transaction is a single batch with `first` and `last` set.
/// A chunked transaction is a run of batches: only the first has `first`,
/// only the final one has `last`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    pub commands: Vec<StorageCommand>,
    pub consensus_index: ConsensusIndex,
    pub time_started: i64,
    pub last_committed_tx_when_started: i64,
    pub time_committed: i64,
    pub kernel_version: KernelVersion,
    pub first: bool,
    pub last: bool,
}

impl CommandBatch {
    /// A whole transaction in one batch
    pub fn complete(
        commands: Vec<StorageCommand>,
        consensus_index: ConsensusIndex,
        time_started: i64,
        last_committed_tx_when_started: i64,
        time_committed: i64,
        kernel_version: KernelVersion,
    ) -> Self {
        Self {
            commands,
            consensus_index,
            time_started,
            last_committed_tx_when_started,
            time_committed,
            kernel_version,
            first: true,
            last: true,
        }
    }

    /// One chunk of a larger transaction
    pub fn chunk(complete: Self, first: bool, last: bool) -> Self {
        Self {
            first,
            last,
            ..complete
        }
    }

    pub fn is_chunked(&self) -> bool {
        !(self.first && self.last)
    }
}
