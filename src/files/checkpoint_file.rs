//! Checkpoint Log File
//!
//! Separate segmented log holding only checkpoint entries, each pointing at
//! a transaction log position the store was consistent with.

use std::path::PathBuf;
use std::sync::Arc;

use crate::checkpoint::{of_log_entry, CheckpointInfo, CheckpointOverrides};
use crate::context::LogFilesContext;
use crate::entry::LogEntry;
use crate::error::{Result, TxLogError};
use crate::model::LogPosition;
use crate::writer::CheckpointAppender;

use super::cursor::LogEntryCursor;
use super::header::{LogFileKind, LOG_HEADER_SIZE};
use super::log_file::LogFile;
use super::segmented::{naming_for, SegmentedLog};

pub struct CheckpointFile {
    log: SegmentedLog,
}

impl CheckpointFile {
    pub fn open(context: Arc<LogFilesContext>) -> Result<Self> {
        Ok(Self {
            log: SegmentedLog::open(context, LogFileKind::Checkpoint)?,
        })
    }

    /// Appender writing checkpoints that refer to `log_file`
    pub fn checkpoint_appender<'a>(&'a self, log_file: &'a LogFile) -> CheckpointAppender<'a> {
        CheckpointAppender::new(&self.log, log_file)
    }

    pub fn current_position(&self) -> LogPosition {
        self.log.current_position()
    }

    pub fn rotate(&self) -> Result<u64> {
        self.log.rotate()
    }

    pub fn force(&self) -> Result<()> {
        self.log.force()
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

    pub fn detached_checkpoint_file_for_version(&self, version: u64) -> PathBuf {
        self.log.naming().path_for(version)
    }

    pub fn open_cursor(&self, position: LogPosition) -> Result<LogEntryCursor> {
        self.log.open_cursor(position)
    }

    /// Every checkpoint whose transaction log position is still present,
    /// oldest first.
    ///
    /// 4.2-era checkpoints carry no transaction id and report the base
    /// transaction here; recovery resolves the real one from the
    /// transaction log.
    pub fn reachable_checkpoints(&self) -> Result<Vec<CheckpointInfo>> {
        let Some(lowest) = self.lowest_log_version()? else {
            return Ok(Vec::new());
        };
        let lowest_tx_version = naming_for(self.log.context(), LogFileKind::Transaction).lowest_version()?;

        let mut checkpoints = Vec::new();
        for entry in self.open_cursor(LogPosition::new(lowest, LOG_HEADER_SIZE))? {
            let entry = entry?;
            let LogEntry::Checkpoint(checkpoint) = &entry.entry else {
                return Err(TxLogError::corrupted(
                    entry.position,
                    format!("{:?} entry in checkpoint log", entry.entry.kind()),
                ));
            };
            let info = of_log_entry(checkpoint, entry.position, entry.end, entry.end, CheckpointOverrides::default());
            let reachable = lowest_tx_version
                .map_or(false, |lowest_tx| info.transaction_log_position.log_version >= lowest_tx);
            if reachable {
                checkpoints.push(info);
            }
        }
        Ok(checkpoints)
    }

    /// Most recent reachable checkpoint
    pub fn latest_checkpoint(&self) -> Result<Option<CheckpointInfo>> {
        Ok(self.reachable_checkpoints()?.pop())
    }

    pub fn context(&self) -> &Arc<LogFilesContext> {
        self.log.context()
    }

    pub fn close(&self) -> Result<()> {
        self.log.close()
    }
}
