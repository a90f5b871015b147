//! Configuration for txlog
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, TxLogError};
use crate::files::LOG_HEADER_SIZE;

/// Configuration for one store's transaction log and checkpoint log
#[derive(Debug, Clone)]
pub struct LogConfig {
    // -------------------------------------------------------------------------
    // Layout
    // -------------------------------------------------------------------------
    /// Directory holding both logs:
    ///   {logs_dir}/
    ///     ├── transaction.log.{version}
    ///     └── checkpoint.log.{version}
    pub logs_dir: PathBuf,

    /// Name used in log output only
    pub database_name: String,

    // -------------------------------------------------------------------------
    // Rotation
    // -------------------------------------------------------------------------
    /// Size (bytes) after which the active transaction log segment is rotated
    pub rotation_threshold: u64,

    /// Size (bytes) after which the active checkpoint log segment is rotated
    pub checkpoint_rotation_threshold: u64,

    /// Preallocate new segments to their rotation size
    pub preallocate: bool,

    // -------------------------------------------------------------------------
    // Durability / Integrity
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to force the transaction log
    pub sync_strategy: LogSyncStrategy,

    /// Cursors fail on mid-log corruption instead of stopping at it
    pub fail_on_corrupted_log_files: bool,
}

/// Log sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSyncStrategy {
    /// force after every append (safest, slowest)
    EveryAppend,

    /// force after N appends; callers force explicitly in between
    EveryNAppends { count: usize },
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("./transaction_logs"),
            database_name: "default".to_string(),
            rotation_threshold: 256 * 1024 * 1024, // 256 MB
            checkpoint_rotation_threshold: 1024 * 1024, // 1 MB
            preallocate: true,
            sync_strategy: LogSyncStrategy::EveryAppend,
            fail_on_corrupted_log_files: true,
        }
    }
}

impl LogConfig {
    /// Create a new config builder
    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }

    /// Reject settings the log files cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.rotation_threshold <= LOG_HEADER_SIZE {
            return Err(TxLogError::Config(format!(
                "rotation_threshold must exceed the {} byte segment header, got {}",
                LOG_HEADER_SIZE, self.rotation_threshold
            )));
        }
        if self.checkpoint_rotation_threshold <= LOG_HEADER_SIZE {
            return Err(TxLogError::Config(format!(
                "checkpoint_rotation_threshold must exceed the {} byte segment header, got {}",
                LOG_HEADER_SIZE, self.checkpoint_rotation_threshold
            )));
        }
        if let LogSyncStrategy::EveryNAppends { count: 0 } = self.sync_strategy {
            return Err(TxLogError::Config(
                "EveryNAppends sync strategy needs a count of at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for LogConfig
#[derive(Default)]
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl LogConfigBuilder {
    /// Set the directory holding both logs
    pub fn logs_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.logs_dir = path.into();
        self
    }

    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.config.database_name = name.into();
        self
    }

    /// Set the transaction log rotation threshold (in bytes)
    pub fn rotation_threshold(mut self, bytes: u64) -> Self {
        self.config.rotation_threshold = bytes;
        self
    }

    /// Set the checkpoint log rotation threshold (in bytes)
    pub fn checkpoint_rotation_threshold(mut self, bytes: u64) -> Self {
        self.config.checkpoint_rotation_threshold = bytes;
        self
    }

    pub fn preallocate(mut self, preallocate: bool) -> Self {
        self.config.preallocate = preallocate;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: LogSyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    pub fn fail_on_corrupted_log_files(mut self, fail: bool) -> Self {
        self.config.fail_on_corrupted_log_files = fail;
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}
