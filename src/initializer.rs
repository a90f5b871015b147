//! Log Initializer
//!
//! Gives a store a minimal consistent log history: one empty transaction
//! and one checkpoint referring to it. Used for brand-new stores and for
//! stores whose logs are rebuilt after migration.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::LogConfig;
use crate::context::{Clock, DatabaseHealth, LogFilesContext, MetadataProvider, SystemClock};
use crate::error::{Result, TxLogError};
use crate::files::{sync_dir, LogFileNaming, LogFiles};
use crate::model::{ConsensusIndex, TransactionId, BASE_TX_CHECKSUM};
use crate::transaction::CommandBatch;

/// Creates the log files of a store that has none
pub trait LogFilesInitializer {
    /// Returns the id of the transaction written
    fn initialize(&self, logs_dir: &Path, reason: &str) -> Result<i64>;
}

pub struct TransactionLogInitializer {
    config: LogConfig,
    metadata: Arc<dyn MetadataProvider>,
    clock: Arc<dyn Clock>,
    health: Option<Arc<dyn DatabaseHealth>>,
}

impl TransactionLogInitializer {
    pub fn new(config: LogConfig, metadata: Arc<dyn MetadataProvider>) -> Self {
        Self {
            config,
            metadata,
            clock: Arc::new(SystemClock),
            health: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_health(mut self, health: Arc<dyn DatabaseHealth>) -> Self {
        self.health = Some(health);
        self
    }

    /// Writes the first transaction and checkpoint of a store without logs.
    ///
    /// Refuses with `AlreadyInitialized` if either log has a segment.
    pub fn initialize_empty_log_file(&self, logs_dir: &Path, checkpoint_reason: &str) -> Result<i64> {
        let transaction_log = LogFileNaming::transaction_log(logs_dir);
        let checkpoint_log = LogFileNaming::checkpoint_log(logs_dir);
        if !transaction_log.versions()?.is_empty() || !checkpoint_log.versions()?.is_empty() {
            return Err(TxLogError::AlreadyInitialized(logs_dir.to_path_buf()));
        }

        let tx_id = self.bootstrap(logs_dir, checkpoint_reason)?;
        info!(dir = %logs_dir.display(), tx_id, "Initialized empty transaction log");
        Ok(tx_id)
    }

    /// Replaces whatever logs exist with a fresh history starting at
    /// version 0.
    ///
    /// Every old segment of both logs is deleted before the first new one
    /// is written.
    pub fn migrate_existing_log_files(&self, logs_dir: &Path, checkpoint_reason: &str) -> Result<i64> {
        let removed = delete_all_segments(logs_dir)?;
        info!(dir = %logs_dir.display(), removed, "Removed existing log segments for migration");

        let tx_id = self.bootstrap(logs_dir, checkpoint_reason)?;
        info!(dir = %logs_dir.display(), tx_id, "Migrated transaction log");
        Ok(tx_id)
    }

    /// Opens both logs, writes the history and closes them. On failure
    /// every segment written is removed so the caller can retry.
    fn bootstrap(&self, logs_dir: &Path, reason: &str) -> Result<i64> {
        let result = self.context_for(logs_dir).and_then(|context| {
            let log_files = LogFiles::open(context)?;
            let tx_id = append_empty_transaction_and_checkpoint(&log_files, self.metadata.as_ref(), self.clock.as_ref(), reason)?;
            log_files.close()?;
            Ok(tx_id)
        });

        if let Err(e) = &result {
            warn!(dir = %logs_dir.display(), error = %e, "Log initialization failed, removing new segments");
            if let Err(cleanup) = delete_all_segments(logs_dir) {
                warn!(error = %cleanup, "Could not remove segments after failed initialization");
            }
        }
        result
    }

    fn context_for(&self, logs_dir: &Path) -> Result<Arc<LogFilesContext>> {
        let config = LogConfig {
            logs_dir: logs_dir.to_path_buf(),
            ..self.config.clone()
        };
        let mut context = LogFilesContext::new(config, Arc::clone(&self.metadata))?.with_clock(Arc::clone(&self.clock));
        if let Some(health) = &self.health {
            context = context.with_health(Arc::clone(health));
        }
        Ok(Arc::new(context))
    }
}

impl LogFilesInitializer for TransactionLogInitializer {
    fn initialize(&self, logs_dir: &Path, reason: &str) -> Result<i64> {
        self.initialize_empty_log_file(logs_dir, reason)
    }
}

fn append_empty_transaction_and_checkpoint(
    log_files: &LogFiles,
    metadata: &dyn MetadataProvider,
    clock: &dyn Clock,
    reason: &str,
) -> Result<i64> {
    let committed = metadata.last_committed_transaction();
    let timestamp = committed.commit_timestamp;
    let tx_id = metadata.next_committing_transaction_id();
    let kernel_version = metadata.kernel_version();

    let batch = CommandBatch::complete(
        Vec::new(),
        ConsensusIndex::Unknown,
        timestamp,
        committed.id,
        timestamp,
        kernel_version,
    );
    let log_file = log_files.log_file();
    let checksum = log_file
        .transaction_log_writer()
        .append(&batch, tx_id, None, BASE_TX_CHECKSUM, None)?;
    log_file.force()?;

    let transaction = TransactionId::new(tx_id, checksum, timestamp, ConsensusIndex::Unknown);
    log_files.checkpoint_appender().check_point(
        transaction,
        kernel_version,
        log_file.current_position(),
        clock.millis(),
        reason,
    )?;

    metadata.transaction_committed(tx_id, checksum, timestamp, ConsensusIndex::Unknown);
    Ok(tx_id)
}

/// Deletes every segment of both logs in `logs_dir`; returns how many
fn delete_all_segments(logs_dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for naming in [LogFileNaming::transaction_log(logs_dir), LogFileNaming::checkpoint_log(logs_dir)] {
        for version in naming.versions()? {
            naming.delete(version)?;
            removed += 1;
        }
    }
    if logs_dir.is_dir() {
        sync_dir(logs_dir)?;
    }
    Ok(removed)
}
