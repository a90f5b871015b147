//! # txlog
//!
//! Durable transaction log and checkpoint log for a transactional store:
//! - Segmented, checksum-chained transaction log with size-based rotation
//! - Separate checkpoint log with layouts from several format generations
//! - Recovery scan that finds the last checkpoint and repairs torn writes
//! - Bootstrap and migration of an empty, consistent log history
//!
//! ## Architecture Overview
//!
//! ```text
//!        commit path                              startup path
//!             │                                        │
//! ┌───────────▼───────────┐              ┌─────────────▼─────────────┐
//! │  TransactionLogWriter │              │      LogTailExtractor      │
//! └───────────┬───────────┘              └──────┬──────────────┬─────┘
//!             │                                 │              │
//! ┌───────────▼───────────┐  position   ┌───────▼───────┐ ┌────▼─────────────────┐
//! │        LogFile        │◄────────────│ CheckpointFile│ │ CheckpointInfo       │
//! │ transaction.log.{v}   │             │checkpoint.log │ │ (normalized layouts) │
//! └───────────────────────┘             └───────▲───────┘ └──────────────────────┘
//!                                               │
//!                                     ┌─────────┴─────────┐
//!                                     │ CheckpointAppender│
//!                                     └───────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod context;

pub mod model;
pub mod entry;
pub mod transaction;
pub mod files;
pub mod writer;
pub mod checkpoint;
pub mod recovery;
pub mod initializer;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, TxLogError};
pub use config::{LogConfig, LogSyncStrategy};
pub use context::{Clock, DatabaseHealth, HealthMonitor, InMemoryMetadata, LogFilesContext, MetadataProvider};
pub use model::{ConsensusIndex, KernelVersion, LogPosition, StoreId, TransactionId};
pub use files::{CheckpointFile, LogFile, LogFiles};
pub use checkpoint::CheckpointInfo;
pub use recovery::{LogTailExtractor, LogTailMetadata};
pub use initializer::{LogFilesInitializer, TransactionLogInitializer};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of txlog
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
