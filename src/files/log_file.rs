//! Transaction Log File
//!
//! The segmented transaction log: where committed transactions are appended
//! and where recovery and replication read them back from.

use std::path::PathBuf;
use std::sync::Arc;

use crate::context::LogFilesContext;
use crate::error::Result;
use crate::model::LogPosition;
use crate::transaction::TransactionCursor;
use crate::writer::TransactionLogWriter;

use super::cursor::LogEntryCursor;
use super::header::LogFileKind;
use super::segmented::SegmentedLog;

pub struct LogFile {
    log: SegmentedLog,
}

impl LogFile {
    pub fn open(context: Arc<LogFilesContext>) -> Result<Self> {
        Ok(Self {
            log: SegmentedLog::open(context, LogFileKind::Transaction)?,
        })
    }

    /// Writer for appending transactions to this log
    pub fn transaction_log_writer(&self) -> TransactionLogWriter<'_> {
        TransactionLogWriter::new(&self.log)
    }

    /// Forces the current segment and starts the next one; returns its version
    pub fn rotate(&self) -> Result<u64> {
        self.log.rotate()
    }

    /// Makes everything appended so far durable
    pub fn force(&self) -> Result<()> {
        self.log.force()
    }

    /// End of the appended data
    pub fn current_position(&self) -> LogPosition {
        self.log.current_position()
    }

    /// End of the data known to be durable
    pub fn flushed_position(&self) -> LogPosition {
        self.log.flushed_position()
    }

    /// Checksum of the last entry appended; seeds the next transaction
    pub fn last_checksum(&self) -> i32 {
        self.log.last_checksum()
    }

    pub fn current_log_version(&self) -> u64 {
        self.log.current_version()
    }

    pub fn lowest_log_version(&self) -> Result<Option<u64>> {
        self.log.naming().lowest_version()
    }

    pub fn highest_log_version(&self) -> Result<Option<u64>> {
        self.log.naming().highest_version()
    }

    pub fn log_file_for_version(&self, version: u64) -> PathBuf {
        self.log.naming().path_for(version)
    }

    pub fn version_exists(&self, version: u64) -> bool {
        self.log.naming().exists(version)
    }

    /// Raw entries from `position` up to the current end
    pub fn open_cursor(&self, position: LogPosition) -> Result<LogEntryCursor> {
        self.log.open_cursor(position)
    }

    /// Committed transactions from `position` up to the current end
    pub fn open_transaction_cursor(&self, position: LogPosition) -> Result<TransactionCursor> {
        Ok(TransactionCursor::new(self.open_cursor(position)?))
    }

    pub fn context(&self) -> &Arc<LogFilesContext> {
        self.log.context()
    }

    pub fn close(&self) -> Result<()> {
        self.log.close()
    }
}
