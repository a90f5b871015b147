//! Value Types
//!
//! Immutable identifiers shared by every other module.
//!
//! ## Contents
//! - `LogPosition`: exact byte in the version-spanning log stream
//! - `StoreId`: identity of the store a log belongs to
//! - `TransactionId` / `ConsensusIndex`: committed transaction identity
//! - `KernelVersion`: on-disk entry layout tag

mod kernel_version;
mod position;
mod store_id;
mod transaction_id;

pub use kernel_version::KernelVersion;
pub use position::LogPosition;
pub use store_id::{LegacyStoreId, StoreId};
pub use transaction_id::{
    ChunkId, ConsensusIndex, TransactionId, BASE_TX_CHECKSUM, BASE_TX_COMMIT_TIMESTAMP, BASE_TX_ID,
};
