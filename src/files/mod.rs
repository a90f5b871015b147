//! Log Files Module
//!
//! On-disk side of both logs: segment naming and headers, write channels,
//! entry cursors, and the two log files built from them.
//!
//! ## Directory Layout
//! ```text
//! {logs_dir}/
//!   ├── transaction.log.0
//!   ├── transaction.log.1
//!   ├── ...
//!   ├── checkpoint.log.0
//!   └── ...
//! ```

mod channel;
mod checkpoint_file;
mod cursor;
mod header;
mod log_file;
mod naming;
pub(crate) mod segmented;

use std::sync::Arc;

pub use channel::LogChannel;
pub use checkpoint_file::CheckpointFile;
pub use cursor::{CursorStop, LogEntryCursor, PositionedEntry};
pub use header::{LogFileKind, LogHeader, LOG_HEADER_SIZE};
pub use log_file::LogFile;
pub use naming::{LogFileNaming, CHECKPOINT_LOG_BASE_NAME, TRANSACTION_LOG_BASE_NAME};
pub use segmented::AppendResult;

pub(crate) use cursor::{open_segment, ReadBound};
pub(crate) use naming::sync_dir;

use crate::context::LogFilesContext;
use crate::error::Result;
use crate::writer::CheckpointAppender;

/// Both logs of one store, opened together
pub struct LogFiles {
    context: Arc<LogFilesContext>,
    log_file: LogFile,
    checkpoint_file: CheckpointFile,
}

impl LogFiles {
    pub fn open(context: Arc<LogFilesContext>) -> Result<Self> {
        let log_file = LogFile::open(Arc::clone(&context))?;
        let checkpoint_file = CheckpointFile::open(Arc::clone(&context))?;
        tracing::info!(
            database = %context.config().database_name,
            dir = %context.config().logs_dir.display(),
            position = %log_file.current_position(),
            "Log files opened"
        );
        Ok(Self {
            context,
            log_file,
            checkpoint_file,
        })
    }

    pub fn log_file(&self) -> &LogFile {
        &self.log_file
    }

    pub fn checkpoint_file(&self) -> &CheckpointFile {
        &self.checkpoint_file
    }

    pub fn checkpoint_appender(&self) -> CheckpointAppender<'_> {
        self.checkpoint_file.checkpoint_appender(&self.log_file)
    }

    pub fn context(&self) -> &Arc<LogFilesContext> {
        &self.context
    }

    /// Forces and closes both logs
    pub fn close(self) -> Result<()> {
        self.log_file.close()?;
        self.checkpoint_file.close()
    }
}
