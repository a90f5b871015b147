//! Transaction Cursor
//!
//! Groups raw entries into committed transactions, gathering the chunks of
//! chunked transactions. Entries after the last commit are held back until
//! their commit shows up. Commit ids must increase; anything else is
//! corruption.

use tracing::warn;

use crate::entry::{LogEntry, StartEntry};
use crate::error::{Result, TxLogError};
use crate::files::{CursorStop, LogEntryCursor};
use crate::model::{ChunkId, LogPosition};

use super::{CommittedTransactionRepresentation, StorageCommand};

struct PendingTransaction {
    start: StartEntry,
    position: LogPosition,
    commands: Vec<StorageCommand>,
    /// Set between a ChunkEnd and the next ChunkStart
    open_chunk: Option<(i64, ChunkId)>,
}

pub struct TransactionCursor {
    entries: LogEntryCursor,
    /// End of the last complete transaction
    position: LogPosition,
    pending: Option<PendingTransaction>,
    last_tx_id: Option<i64>,
    failed: bool,
}

impl TransactionCursor {
    pub fn new(entries: LogEntryCursor) -> Self {
        let position = entries.position();
        Self {
            entries,
            position,
            pending: None,
            last_tx_id: None,
            failed: false,
        }
    }

    /// End of the last complete transaction returned (or the start position)
    pub fn position(&self) -> LogPosition {
        self.position
    }

    /// Start of a transaction that has begun but not yet committed
    pub fn incomplete_transaction_position(&self) -> Option<LogPosition> {
        self.pending.as_ref().map(|p| p.position)
    }

    pub fn stop(&self) -> Option<&CursorStop> {
        self.entries.stop()
    }

    fn corrupted(&mut self, position: LogPosition, reason: String) -> Option<Result<CommittedTransactionRepresentation>> {
        self.failed = true;
        Some(Err(TxLogError::corrupted(position, reason)))
    }
}

impl Iterator for TransactionCursor {
    type Item = Result<CommittedTransactionRepresentation>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let positioned = match self.entries.next()? {
                Ok(positioned) => positioned,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            };
            let position = positioned.position;

            match positioned.entry {
                LogEntry::Start(start) => {
                    if let Some(abandoned) = self.pending.take() {
                        warn!(
                            position = %abandoned.position,
                            "Skipping transaction that never committed"
                        );
                    }
                    self.pending = Some(PendingTransaction {
                        start,
                        position,
                        commands: Vec::new(),
                        open_chunk: None,
                    });
                }
                LogEntry::Command(command) => match self.pending.as_mut() {
                    Some(pending) if pending.open_chunk.is_none() => pending.commands.push(command.command),
                    _ => return self.corrupted(position, "command outside of a transaction".to_string()),
                },
                LogEntry::ChunkEnd(end) => match self.pending.as_mut() {
                    Some(pending) if pending.open_chunk.is_none() => {
                        pending.open_chunk = Some((end.tx_id, end.chunk_id));
                    }
                    _ => return self.corrupted(position, "chunk end outside of a transaction".to_string()),
                },
                LogEntry::ChunkStart(chunk) => match self.pending.as_mut() {
                    Some(pending) if pending.open_chunk.is_some() => {
                        let previous = pending.open_chunk.map_or(0, |(_, id)| id);
                        if chunk.chunk_id <= previous {
                            let reason = format!("chunk {} follows chunk {}", chunk.chunk_id, previous);
                            return self.corrupted(position, reason);
                        }
                        pending.open_chunk = None;
                    }
                    _ => return self.corrupted(position, "chunk start without an open chunked transaction".to_string()),
                },
                LogEntry::Commit(commit) => {
                    let Some(pending) = self.pending.take() else {
                        return self.corrupted(position, format!("commit of transaction {} without start", commit.tx_id));
                    };
                    if pending.open_chunk.is_some() {
                        return self.corrupted(position, "commit between chunks".to_string());
                    }
                    if let Some(last) = self.last_tx_id.filter(|&last| commit.tx_id <= last) {
                        let reason = format!("transaction {} committed after transaction {}", commit.tx_id, last);
                        return self.corrupted(position, reason);
                    }
                    self.last_tx_id = Some(commit.tx_id);
                    self.position = positioned.end;
                    return Some(Ok(CommittedTransactionRepresentation {
                        start: pending.start,
                        commands: pending.commands,
                        commit,
                        checksum: positioned.checksum,
                    }));
                }
                LogEntry::Checkpoint(_) => {
                    return self.corrupted(position, "checkpoint entry in transaction log".to_string());
                }
            }
        }
    }
}
