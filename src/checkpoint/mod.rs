//! Checkpoint Module
//!
//! [`CheckpointInfo`] is the single in-memory form of a checkpoint,
//! whatever layout its entry was written in. The factory fills in what an
//! older layout could not store.

mod factory;

pub use factory::{of_log_entry, CheckpointOverrides};

use std::fmt;

use crate::model::{KernelVersion, LogPosition, StoreId, TransactionId};

/// A checkpoint, normalized across entry layouts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Transaction log position the store was consistent with
    pub transaction_log_position: LogPosition,
    pub store_id: StoreId,
    /// Where the checkpoint entry starts in the checkpoint log
    pub checkpoint_entry_position: LogPosition,
    /// Checkpoint log position just past the entry
    pub channel_position_after_checkpoint: LogPosition,
    /// Checkpoint log position the reader stopped at after reading the entry
    pub checkpoint_file_post_read_position: LogPosition,
    pub transaction_id: TransactionId,
    /// Layout the entry was written in
    pub kernel_version: KernelVersion,
    pub reason: String,
}

impl fmt::Display for CheckpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Checkpoint{{tx={}, position={}, entry={}, kernel={}, reason='{}'}}",
            self.transaction_id, self.transaction_log_position, self.checkpoint_entry_position, self.kernel_version, self.reason
        )
    }
}
