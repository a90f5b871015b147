//! Committed transaction as read back from the log

use crate::entry::{CommandEntry, CommitEntry, LogEntry, LogEntryWriter, StartEntry};
use crate::error::Result;
use crate::model::{ConsensusIndex, KernelVersion, TransactionId};

use super::StorageCommand;

/// A start entry, its commands and the commit entry closing them.
///
/// For a chunked transaction the commands of every chunk are gathered in
/// order and `start` is the first chunk's start entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTransactionRepresentation {
    pub start: StartEntry,
    pub commands: Vec<StorageCommand>,
    pub commit: CommitEntry,
    /// Checksum of the commit entry
    pub checksum: i32,
}

impl CommittedTransactionRepresentation {
    pub fn tx_id(&self) -> i64 {
        self.commit.tx_id
    }

    pub fn checksum(&self) -> i32 {
        self.checksum
    }

    pub fn kernel_version(&self) -> KernelVersion {
        self.commit.kernel_version
    }

    pub fn consensus_index(&self) -> ConsensusIndex {
        self.start.consensus_index()
    }

    pub fn transaction_id(&self) -> TransactionId {
        TransactionId::new(
            self.commit.tx_id,
            self.checksum,
            self.commit.time_written,
            self.consensus_index(),
        )
    }

    /// Re-encodes the transaction as one unchunked run of entries and returns
    /// the checksum of the commit entry.
    pub fn serialize(&self, writer: &mut LogEntryWriter) -> Result<i32> {
        writer.write_entry(&LogEntry::Start(self.start.clone()))?;
        for command in &self.commands {
            writer.write_entry(&LogEntry::Command(CommandEntry {
                kernel_version: self.start.kernel_version,
                command: command.clone(),
            }))?;
        }
        writer.write_entry(&LogEntry::Commit(self.commit.clone()))?;
        Ok(writer.checksum())
    }
}
