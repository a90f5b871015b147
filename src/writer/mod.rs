//! Log Writers
//!
//! Append-side entry points: transactions into the transaction log and
//! checkpoints into the checkpoint log.

mod checkpoint;
mod transaction;

pub use checkpoint::CheckpointAppender;
pub use transaction::TransactionLogWriter;
