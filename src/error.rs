//! Error types for txlog
//!
//! Provides a unified error type for all log operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::{LogPosition, StoreId};

/// Result type alias using TxLogError
pub type Result<T> = std::result::Result<T, TxLogError>;

/// Unified error type for transaction log and checkpoint log operations
#[derive(Debug, Error)]
pub enum TxLogError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Format Errors
    // -------------------------------------------------------------------------
    /// The entry was written by software this build cannot read
    #[error("Unsupported log entry format: kind={kind} version=0x{version:02x} at {position}")]
    UnsupportedFormatVersion {
        kind: u8,
        version: u8,
        position: LogPosition,
    },

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    #[error("Corrupted log at {position}: {reason}")]
    CorruptedLog { position: LogPosition, reason: String },

    /// Incomplete last write, repaired by truncation during recovery
    #[error("Torn write at {position}")]
    TornWrite { position: LogPosition },

    /// Entry cannot be encoded (field too large, or kind not valid for its version)
    #[error("Invalid log entry: {0}")]
    InvalidEntry(String),

    #[error("Store id mismatch: expected {expected}, found {found}")]
    StoreIdMismatch { expected: StoreId, found: StoreId },

    // -------------------------------------------------------------------------
    // Configuration / Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transaction logs already exist in {0}")]
    AlreadyInitialized(PathBuf),

    #[error("Database is unhealthy: {0}")]
    Unhealthy(String),

    #[error("Log scan passed its deadline at {position}")]
    DeadlineExceeded { position: LogPosition },
}

impl TxLogError {
    /// Shorthand for a corruption error at `position`
    pub fn corrupted(position: LogPosition, reason: impl Into<String>) -> Self {
        TxLogError::CorruptedLog {
            position,
            reason: reason.into(),
        }
    }

    /// Only a torn tail write may be repaired; everything else aborts.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TxLogError::TornWrite { .. })
    }
}
