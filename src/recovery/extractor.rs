//! Log tail extraction

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::checkpoint::{of_log_entry, CheckpointInfo, CheckpointOverrides};
use crate::context::LogFilesContext;
use crate::entry::{CheckpointEntry, LogEntry};
use crate::error::{Result, TxLogError};
use crate::files::segmented::{discard_incomplete_segment, naming_for, preallocation_size, truncate_log};
use crate::files::{open_segment, CursorStop, LogEntryCursor, LogFileKind, LogFileNaming, ReadBound, LOG_HEADER_SIZE};
use crate::model::{KernelVersion, LogPosition, StoreId, TransactionId};
use crate::transaction::TransactionCursor;

use super::LogTailMetadata;

/// Scans the logs of one store before any appends happen.
///
/// Unless read-only, a torn tail is truncated in place, so a second run
/// finds nothing to repair.
pub struct LogTailExtractor {
    context: Arc<LogFilesContext>,
    read_only: bool,
    deadline: Option<Instant>,
}

struct TransactionScan {
    last: Option<(TransactionId, KernelVersion)>,
    count: u64,
    first_id: Option<i64>,
    closed: LogPosition,
    repaired: bool,
}

impl LogTailExtractor {
    pub fn new(context: Arc<LogFilesContext>) -> Self {
        Self {
            context,
            read_only: false,
            deadline: None,
        }
    }

    /// Report only; leave torn tails on disk
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Give up with `DeadlineExceeded` once `deadline` has passed
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn get_tail_metadata(&self) -> Result<LogTailMetadata> {
        match self.extract() {
            Ok(tail) => {
                info!(
                    database = %self.context.config().database_name,
                    checkpoint = ?tail.last_checkpoint.as_ref().map(|c| c.transaction_log_position),
                    last_tx = ?tail.last_closed_transaction_id(),
                    to_replay = tail.transactions_after_checkpoint,
                    torn = tail.recovered_from_torn_write,
                    "Log tail extracted"
                );
                Ok(tail)
            }
            Err(e) => {
                if !matches!(e, TxLogError::DeadlineExceeded { .. }) {
                    error!(error = %e, "Log tail extraction failed");
                    self.context.health().panic(&e);
                }
                Err(e)
            }
        }
    }

    fn extract(&self) -> Result<LogTailMetadata> {
        let tx_naming = naming_for(&self.context, LogFileKind::Transaction);
        let cp_naming = naming_for(&self.context, LogFileKind::Checkpoint);
        if !self.read_only {
            discard_incomplete_segment(&tx_naming)?;
            discard_incomplete_segment(&cp_naming)?;
        }

        let tx_versions = tx_naming.versions()?;
        let bounds = tx_versions.first().copied().zip(tx_versions.last().copied());
        let observed_store_id = match bounds {
            Some((_, highest)) => {
                let store_id = open_segment(&tx_naming, LogFileKind::Transaction, highest)?.1.store_id;
                self.check_store_id(&store_id)?;
                Some(store_id)
            }
            None => None,
        };

        let mut tail = LogTailMetadata::empty();
        let last_checkpoint =
            self.find_last_checkpoint(&cp_naming, &tx_naming, observed_store_id.as_ref(), &mut tail)?;
        tail.last_checkpoint = last_checkpoint;
        tail.observed_store_id = observed_store_id;

        let Some((lowest, highest)) = bounds else {
            if let Some(checkpoint) = &tail.last_checkpoint {
                return Err(TxLogError::corrupted(
                    checkpoint.transaction_log_position,
                    "checkpoint refers to a transaction log that does not exist",
                ));
            }
            return Ok(tail);
        };

        let start = match &tail.last_checkpoint {
            Some(checkpoint) => {
                let position = checkpoint.transaction_log_position;
                if position.log_version < lowest || position.log_version > highest {
                    return Err(TxLogError::corrupted(
                        position,
                        format!("checkpoint refers to a segment outside the retained versions {}..={}", lowest, highest),
                    ));
                }
                position
            }
            None => LogPosition::new(lowest, LOG_HEADER_SIZE),
        };

        let scan = self.scan_transactions(&tx_naming, start, highest)?;
        tail.recovered_from_torn_write |= scan.repaired;
        tail.last_closed_position = Some(scan.closed);
        tail.transactions_after_checkpoint = scan.count;
        tail.first_transaction_id_after_checkpoint = scan.first_id;
        match scan.last {
            Some((transaction, kernel_version)) => {
                tail.last_committed_transaction = Some(transaction);
                tail.last_committed_kernel_version = Some(kernel_version);
            }
            None => {
                tail.last_committed_transaction = tail.last_checkpoint.as_ref().map(|c| c.transaction_id);
                tail.last_committed_kernel_version = tail.last_checkpoint.as_ref().map(|c| c.kernel_version);
            }
        }
        Ok(tail)
    }

    /// Newest checkpoint in the checkpoint log, searching segments from the
    /// highest version down.
    fn find_last_checkpoint(
        &self,
        cp_naming: &LogFileNaming,
        tx_naming: &LogFileNaming,
        observed_store_id: Option<&StoreId>,
        tail: &mut LogTailMetadata,
    ) -> Result<Option<CheckpointInfo>> {
        let versions = cp_naming.versions()?;
        let Some(&highest) = versions.last() else {
            return Ok(None);
        };

        for &version in versions.iter().rev() {
            let (_, header) = open_segment(cp_naming, LogFileKind::Checkpoint, version)?;
            self.check_store_id(&header.store_id)?;
            let mut cursor = LogEntryCursor::open(
                cp_naming.clone(),
                LogFileKind::Checkpoint,
                header.first_entry_position(),
                ReadBound::Physical { last_version: version },
                true,
            )?;

            let mut last: Option<(CheckpointEntry, LogPosition, LogPosition)> = None;
            while let Some(entry) = cursor.next() {
                let entry = entry?;
                match entry.entry {
                    LogEntry::Checkpoint(checkpoint) => last = Some((checkpoint, entry.position, entry.end)),
                    other => {
                        return Err(TxLogError::corrupted(
                            entry.position,
                            format!("{:?} entry in checkpoint log", other.kind()),
                        ))
                    }
                }
            }

            if let Some(CursorStop::TornWrite { position }) = cursor.stop().cloned() {
                if version != highest {
                    return Err(TxLogError::corrupted(position, "incomplete checkpoint entry before the end of the log"));
                }
                self.repair(cp_naming, position, LogFileKind::Checkpoint)?;
                tail.recovered_from_torn_write = true;
            }

            let Some((entry, position, end)) = last else {
                debug!(version, "No checkpoint in segment");
                continue;
            };

            let overrides = match &entry {
                CheckpointEntry::Legacy(_) => CheckpointOverrides {
                    transaction_id: Some(self.transaction_before(tx_naming, entry.log_position())?),
                    store_id: observed_store_id.cloned(),
                    ..CheckpointOverrides::default()
                },
                CheckpointEntry::DetachedV5_0(e) => {
                    self.check_store_id(&e.store_id)?;
                    CheckpointOverrides::default()
                }
                CheckpointEntry::DetachedV5_6(e) => {
                    self.check_store_id(&e.store_id)?;
                    CheckpointOverrides::default()
                }
            };
            let info = of_log_entry(&entry, position, end, cursor.position(), overrides);
            debug!(checkpoint = %info, "Found last checkpoint");
            return Ok(Some(info));
        }
        Ok(None)
    }

    /// Last transaction committed at or before `position`, for checkpoints
    /// that do not record it.
    fn transaction_before(&self, tx_naming: &LogFileNaming, position: LogPosition) -> Result<TransactionId> {
        let versions = tx_naming.versions()?;
        let (Some(&lowest), Some(&highest)) = (versions.first(), versions.last()) else {
            return Ok(TransactionId::base());
        };
        let start = LogPosition::new(lowest, LOG_HEADER_SIZE);
        if position <= start {
            return Ok(TransactionId::base());
        }

        let entries = LogEntryCursor::open(
            tx_naming.clone(),
            LogFileKind::Transaction,
            start,
            ReadBound::Physical { last_version: highest },
            true,
        )?;
        let mut cursor = TransactionCursor::new(entries);
        let mut found = TransactionId::base();
        while let Some(transaction) = cursor.next() {
            let transaction = transaction?;
            if cursor.position() > position {
                break;
            }
            found = transaction.transaction_id().without_consensus_index();
        }
        Ok(found)
    }

    fn scan_transactions(&self, naming: &LogFileNaming, start: LogPosition, highest: u64) -> Result<TransactionScan> {
        let entries = LogEntryCursor::open(
            naming.clone(),
            LogFileKind::Transaction,
            start,
            ReadBound::Physical { last_version: highest },
            true,
        )?;
        let mut cursor = TransactionCursor::new(entries);

        let mut scan = TransactionScan {
            last: None,
            count: 0,
            first_id: None,
            closed: start,
            repaired: false,
        };
        while let Some(transaction) = cursor.next() {
            let transaction = transaction?;
            scan.count += 1;
            scan.first_id.get_or_insert(transaction.tx_id());
            scan.last = Some((transaction.transaction_id(), transaction.kernel_version()));
            self.check_deadline(cursor.position())?;
        }
        scan.closed = cursor.position();

        let torn = matches!(cursor.stop(), Some(CursorStop::TornWrite { .. }));
        if torn || cursor.incomplete_transaction_position().is_some() {
            self.repair(naming, scan.closed, LogFileKind::Transaction)?;
            scan.repaired = true;
        }
        Ok(scan)
    }

    /// Truncates a log after its last complete write
    fn repair(&self, naming: &LogFileNaming, position: LogPosition, kind: LogFileKind) -> Result<()> {
        if self.read_only {
            warn!(log = naming.base_name(), %position, "Torn write found, leaving it in place (read-only)");
            return Ok(());
        }
        warn!(log = naming.base_name(), %position, "Truncating torn write");
        truncate_log(naming, position, preallocation_size(&self.context, kind))
    }

    /// Logs of another store must never be recovered into this one
    fn check_store_id(&self, found: &StoreId) -> Result<()> {
        let expected = self.context.store_id();
        if *found != expected {
            return Err(TxLogError::StoreIdMismatch {
                expected,
                found: found.clone(),
            });
        }
        Ok(())
    }

    fn check_deadline(&self, position: LogPosition) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() > deadline => Err(TxLogError::DeadlineExceeded { position }),
            _ => Ok(()),
        }
    }
}
