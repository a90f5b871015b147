//! Transaction Log Writer
//!
//! Turns command batches into entry runs on the transaction log.
//!
//! ## Entry Runs
//! ```text
//! complete:     Start      Command* Commit
//! first chunk:  Start      Command* ChunkEnd
//! middle chunk: ChunkStart Command* ChunkEnd
//! last chunk:   ChunkStart Command* Commit
//! ```

use tracing::trace;

use crate::entry::{ChunkEndEntry, ChunkStartEntry, CommandEntry, CommitEntry, LogEntry, StartEntry};
use crate::error::{Result, TxLogError};
use crate::files::segmented::SegmentedLog;
use crate::model::{ChunkId, LogPosition};
use crate::transaction::{CommandBatch, CommittedTransactionRepresentation};

/// Appends transactions to the transaction log. Cheap to create; the log's
/// own lock serializes concurrent writers.
pub struct TransactionLogWriter<'a> {
    log: &'a SegmentedLog,
}

impl<'a> TransactionLogWriter<'a> {
    pub(crate) fn new(log: &'a SegmentedLog) -> Self {
        Self { log }
    }

    /// Appends one batch and returns the checksum of its last entry.
    ///
    /// The whole run reaches the file in one write. `chunk_id` is required
    /// for every batch of a chunked transaction; `previous_checksum` is
    /// recorded in the start entry of a first batch. `tx_id` must be above
    /// the last transaction in the log, or equal to it for a later chunk.
    pub fn append(
        &self,
        batch: &CommandBatch,
        tx_id: i64,
        chunk_id: Option<ChunkId>,
        previous_checksum: i32,
        previous_batch_position: Option<LogPosition>,
    ) -> Result<i32> {
        let chunk_id = match (batch.is_chunked(), chunk_id) {
            (false, _) => None,
            (true, Some(chunk_id)) => Some(chunk_id),
            (true, None) => {
                return Err(TxLogError::InvalidEntry(format!(
                    "batch of chunked transaction {} has no chunk id",
                    tx_id
                )))
            }
        };
        let kernel_version = batch.kernel_version;

        let appended = self.log.append_transaction(tx_id, !batch.first, |writer| {
            let opening = if batch.first {
                LogEntry::Start(StartEntry {
                    kernel_version,
                    time_written: batch.time_started,
                    last_committed_tx_when_started: batch.last_committed_tx_when_started,
                    previous_checksum,
                    additional_header: batch.consensus_index.to_header(),
                })
            } else {
                LogEntry::ChunkStart(ChunkStartEntry {
                    kernel_version,
                    time_written: batch.time_started,
                    chunk_id: chunk_id.unwrap_or_default(),
                    previous_batch_position,
                })
            };
            writer.write_entry(&opening)?;

            for command in &batch.commands {
                writer.write_entry(&LogEntry::Command(CommandEntry {
                    kernel_version,
                    command: command.clone(),
                }))?;
            }

            let closing = match chunk_id {
                Some(chunk_id) if !batch.last => LogEntry::ChunkEnd(ChunkEndEntry {
                    kernel_version,
                    tx_id,
                    chunk_id,
                }),
                _ => LogEntry::Commit(CommitEntry {
                    kernel_version,
                    tx_id,
                    time_written: batch.time_committed,
                }),
            };
            writer.write_entry(&closing)?;
            Ok(())
        })?;

        trace!(
            tx_id,
            chunk = ?chunk_id,
            commands = batch.commands.len(),
            position = %appended.position,
            "Appended command batch"
        );
        Ok(appended.checksum)
    }

    /// Appends a transaction read from another log, unchunked
    pub fn append_committed(&self, transaction: &CommittedTransactionRepresentation) -> Result<i32> {
        let appended = self
            .log
            .append_transaction(transaction.tx_id(), false, |writer| transaction.serialize(writer).map(|_| ()))?;
        trace!(tx_id = transaction.tx_id(), position = %appended.position, "Appended committed transaction");
        Ok(appended.checksum)
    }

    /// End of the transaction log after the last append
    pub fn current_position(&self) -> LogPosition {
        self.log.current_position()
    }
}
