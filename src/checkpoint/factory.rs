//! Checkpoint normalization

use crate::entry::CheckpointEntry;
use crate::model::{ConsensusIndex, LogPosition, StoreId, TransactionId};

use super::CheckpointInfo;

/// Values a caller tracked separately, used where an entry layout is lacking.
///
/// Only the 4.2 layout is short of a transaction id and a modern store id,
/// so position and store id overrides apply to it alone. A transaction
/// override also supplies the consensus index missing from 5.0 entries
/// when it names the same transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointOverrides {
    pub transaction_log_position: Option<LogPosition>,
    pub store_id: Option<StoreId>,
    pub transaction_id: Option<TransactionId>,
}

/// Builds a [`CheckpointInfo`] from a checkpoint entry of any layout.
///
/// Fields the layout cannot hold come from `overrides`, else from
/// sentinels: the base transaction and an unknown consensus index.
pub fn of_log_entry(
    entry: &CheckpointEntry,
    checkpoint_entry_position: LogPosition,
    channel_position_after_checkpoint: LogPosition,
    checkpoint_file_post_read_position: LogPosition,
    overrides: CheckpointOverrides,
) -> CheckpointInfo {
    let (transaction_log_position, store_id, transaction_id) = match entry {
        CheckpointEntry::Legacy(e) => (
            overrides.transaction_log_position.unwrap_or(e.log_position),
            overrides.store_id.unwrap_or_else(|| e.store_id.to_store_id()),
            overrides
                .transaction_id
                .map_or_else(TransactionId::base, TransactionId::without_consensus_index),
        ),
        CheckpointEntry::DetachedV5_0(e) => {
            let consensus_index = match overrides.transaction_id {
                Some(known) if known.id == e.transaction_id.id => known.consensus_index,
                _ => ConsensusIndex::Unknown,
            };
            (
                e.log_position,
                e.store_id.clone(),
                TransactionId {
                    consensus_index,
                    ..e.transaction_id
                },
            )
        }
        CheckpointEntry::DetachedV5_6(e) => (e.log_position, e.store_id.clone(), e.transaction_id),
    };

    CheckpointInfo {
        transaction_log_position,
        store_id,
        checkpoint_entry_position,
        channel_position_after_checkpoint,
        checkpoint_file_post_read_position,
        transaction_id,
        kernel_version: entry.kernel_version(),
        reason: entry.reason().to_string(),
    }
}
