//! Recovery Module
//!
//! Startup scan of both logs: finds the last checkpoint, walks the
//! transaction log forward from it, and repairs a torn tail.
//!
//! ## Recovery Process
//! 1. Drop a highest segment whose header never reached disk
//! 2. Read checkpoint segments from the highest version down until one
//!    holds a checkpoint; a torn final checkpoint entry is cut off
//! 3. Walk transactions from the checkpoint position (or log start)
//! 4. Truncate everything after the last fully committed transaction

mod extractor;

pub use extractor::LogTailExtractor;

use crate::checkpoint::CheckpointInfo;
use crate::model::{KernelVersion, LogPosition, StoreId, TransactionId};

/// What recovery found at the end of the logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTailMetadata {
    /// `None` for a store that never checkpointed
    pub last_checkpoint: Option<CheckpointInfo>,
    /// Last transaction with a valid commit entry, falling back to the
    /// checkpoint's transaction
    pub last_committed_transaction: Option<TransactionId>,
    pub last_committed_kernel_version: Option<KernelVersion>,
    /// End of the last complete transaction; appends continue here
    pub last_closed_position: Option<LogPosition>,
    /// Transactions after the checkpoint that must be replayed
    pub transactions_after_checkpoint: u64,
    pub first_transaction_id_after_checkpoint: Option<i64>,
    pub recovered_from_torn_write: bool,
    /// Store id in the header of the highest transaction log segment
    pub observed_store_id: Option<StoreId>,
}

impl LogTailMetadata {
    pub(crate) fn empty() -> Self {
        Self {
            last_checkpoint: None,
            last_committed_transaction: None,
            last_committed_kernel_version: None,
            last_closed_position: None,
            transactions_after_checkpoint: 0,
            first_transaction_id_after_checkpoint: None,
            recovered_from_torn_write: false,
            observed_store_id: None,
        }
    }

    pub fn is_recovery_required(&self) -> bool {
        self.transactions_after_checkpoint > 0
    }

    pub fn has_checkpoint(&self) -> bool {
        self.last_checkpoint.is_some()
    }

    /// No checkpoint and no transactions: a store without log history
    pub fn is_empty_log(&self) -> bool {
        self.last_checkpoint.is_none() && self.last_committed_transaction.is_none()
    }

    pub fn last_closed_transaction_id(&self) -> Option<i64> {
        self.last_committed_transaction.map(|tx| tx.id)
    }
}
