//! Checkpoint Appender

use tracing::info;

use crate::checkpoint::{of_log_entry, CheckpointInfo, CheckpointOverrides};
use crate::entry::{CheckpointEntry, LogEntry};
use crate::error::{Result, TxLogError};
use crate::files::segmented::SegmentedLog;
use crate::files::LogFile;
use crate::model::{KernelVersion, LogPosition, TransactionId};

/// Writes checkpoint entries. A checkpoint never refers to transaction log
/// data that is not yet durable.
pub struct CheckpointAppender<'a> {
    checkpoint_log: &'a SegmentedLog,
    log_file: &'a LogFile,
}

impl<'a> CheckpointAppender<'a> {
    pub(crate) fn new(checkpoint_log: &'a SegmentedLog, log_file: &'a LogFile) -> Self {
        Self {
            checkpoint_log,
            log_file,
        }
    }

    /// Records that the store is consistent with the transaction log up to
    /// `log_position`, whose last transaction is `transaction_id`.
    ///
    /// The entry layout follows `kernel_version`. The checkpoint log is
    /// forced before returning.
    pub fn check_point(
        &self,
        transaction_id: TransactionId,
        kernel_version: KernelVersion,
        log_position: LogPosition,
        timestamp: i64,
        reason: &str,
    ) -> Result<CheckpointInfo> {
        if log_position > self.log_file.flushed_position() {
            self.log_file.force()?;
        }
        let flushed = self.log_file.flushed_position();
        if log_position > flushed {
            return Err(TxLogError::InvalidEntry(format!(
                "checkpoint position {} is past the end of the transaction log {}",
                log_position, flushed
            )));
        }

        let store_id = self.checkpoint_log.context().store_id();
        let entry = CheckpointEntry::new(kernel_version, transaction_id, log_position, timestamp, &store_id, reason);
        let appended = self
            .checkpoint_log
            .append(|writer| writer.write_entry(&LogEntry::Checkpoint(entry.clone())).map(|_| ()))?;
        self.checkpoint_log.force()?;

        info!(
            tx_id = transaction_id.id,
            position = %log_position,
            kernel = %kernel_version,
            reason,
            "Checkpoint written"
        );

        let overrides = CheckpointOverrides {
            transaction_id: Some(transaction_id.without_consensus_index()),
            ..CheckpointOverrides::default()
        };
        Ok(of_log_entry(&entry, appended.position, appended.end, appended.end, overrides))
    }

    /// End of the checkpoint log
    pub fn current_position(&self) -> LogPosition {
        self.checkpoint_log.current_position()
    }
}
