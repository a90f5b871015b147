//! Tests for TransactionLogWriter and the transaction log
//!
//! These tests verify:
//! - Appended transactions read back with the checksums `append` returned
//! - Chunked transactions are written as entry runs and reassembled
//! - Corruption is reported at the damaged transaction
//! - Reopening continues the chain and drops an incomplete tail
//! - A tripped health signal refuses further appends
//! - Transaction ids only grow within a log

use std::sync::Arc;

use txlog::config::LogSyncStrategy;
use txlog::context::{DatabaseHealth, HealthMonitor};
use txlog::entry::{CommitEntry, EntryKind, LogEntry, LogEntryWriter, StartEntry};
use txlog::files::{CursorStop, LogFileNaming, LOG_HEADER_SIZE};
use txlog::model::{ConsensusIndex, KernelVersion, LogPosition};
use txlog::transaction::CommandBatch;
use txlog::{LogConfig, LogFile, TxLogError};
use tempfile::TempDir;

use crate::common::{
    append_raw, append_transactions, batch, command, context_for, corrupt_byte, first_position, segment_len, setup,
    test_config, FIRST_TX_ID,
};

// =============================================================================
// Append / Read Back Tests
// =============================================================================

#[test]
fn test_fresh_log_starts_after_header() {
    let (_temp, context) = setup();
    let log_file = LogFile::open(context).unwrap();

    assert_eq!(log_file.current_position(), first_position());
    assert_eq!(log_file.lowest_log_version().unwrap(), Some(0));
    assert_eq!(log_file.highest_log_version().unwrap(), Some(0));
    assert_eq!(log_file.open_transaction_cursor(first_position()).unwrap().count(), 0);
}

#[test]
fn test_append_and_read_back_checksums() {
    let (_temp, context) = setup();
    let log_file = LogFile::open(context).unwrap();

    let appended = append_transactions(&log_file, 5, 64);
    let read: Vec<_> = log_file
        .open_transaction_cursor(first_position())
        .unwrap()
        .map(|tx| tx.unwrap())
        .collect();

    assert_eq!(read.len(), 5);
    for (i, (tx, (checksum, _))) in read.iter().zip(&appended).enumerate() {
        assert_eq!(tx.tx_id(), FIRST_TX_ID + i as i64);
        assert_eq!(tx.checksum(), *checksum);
        assert_eq!(tx.commands, vec![command(i, 64)]);
        assert_eq!(tx.consensus_index(), ConsensusIndex::Unknown);
    }
    assert_eq!(log_file.last_checksum(), appended[4].0);
    assert_eq!(log_file.current_position(), appended[4].1);
}

#[test]
fn test_cursor_from_middle_position() {
    let (_temp, context) = setup();
    let log_file = LogFile::open(context).unwrap();

    let appended = append_transactions(&log_file, 4, 32);
    let ids: Vec<i64> = log_file
        .open_transaction_cursor(appended[1].1)
        .unwrap()
        .map(|tx| tx.unwrap().tx_id())
        .collect();

    assert_eq!(ids, vec![FIRST_TX_ID + 2, FIRST_TX_ID + 3]);
}

#[test]
fn test_entry_runs_of_complete_transaction() {
    let (_temp, context) = setup();
    let log_file = LogFile::open(context).unwrap();

    let commands = vec![command(0, 10), command(1, 10)];
    let batch = CommandBatch::complete(commands, ConsensusIndex::Known(9), 100, 1, 200, KernelVersion::V5_6);
    log_file
        .transaction_log_writer()
        .append(&batch, FIRST_TX_ID, None, 12345, None)
        .unwrap();

    let entries: Vec<_> = log_file.open_cursor(first_position()).unwrap().map(|e| e.unwrap()).collect();
    let kinds: Vec<EntryKind> = entries.iter().map(|e| e.entry.kind()).collect();
    assert_eq!(kinds, vec![EntryKind::Start, EntryKind::Command, EntryKind::Command, EntryKind::Commit]);

    let LogEntry::Start(start) = &entries[0].entry else {
        panic!("first entry must be a start entry");
    };
    assert_eq!(start.previous_checksum, 12345);
    assert_eq!(start.time_written, 100);
    assert_eq!(start.consensus_index(), ConsensusIndex::Known(9));

    // entries are contiguous
    for pair in entries.windows(2) {
        assert_eq!(pair[0].end, pair[1].position);
    }
}

// =============================================================================
// Chunked Transaction Tests
// =============================================================================

#[test]
fn test_chunked_transaction_reassembled() {
    let (_temp, context) = setup();
    let log_file = LogFile::open(context).unwrap();
    let writer = log_file.transaction_log_writer();

    let whole = batch(Vec::new(), KernelVersion::V5_6);
    let first = CommandBatch::chunk(
        CommandBatch {
            commands: vec![command(0, 16)],
            ..whole.clone()
        },
        true,
        false,
    );
    let middle = CommandBatch::chunk(
        CommandBatch {
            commands: vec![command(1, 16)],
            ..whole.clone()
        },
        false,
        false,
    );
    let last = CommandBatch::chunk(
        CommandBatch {
            commands: vec![command(2, 16)],
            ..whole
        },
        false,
        true,
    );

    let checksum = writer.append(&first, FIRST_TX_ID, Some(1), log_file.last_checksum(), None).unwrap();
    let first_end = writer.current_position();
    let checksum = writer.append(&middle, FIRST_TX_ID, Some(2), checksum, Some(first_position())).unwrap();
    let checksum = writer.append(&last, FIRST_TX_ID, Some(3), checksum, Some(first_end)).unwrap();

    let kinds: Vec<EntryKind> = log_file
        .open_cursor(first_position())
        .unwrap()
        .map(|e| e.unwrap().entry.kind())
        .collect();
    assert_eq!(
        kinds,
        vec![
            EntryKind::Start,
            EntryKind::Command,
            EntryKind::ChunkEnd,
            EntryKind::ChunkStart,
            EntryKind::Command,
            EntryKind::ChunkEnd,
            EntryKind::ChunkStart,
            EntryKind::Command,
            EntryKind::Commit,
        ]
    );

    let transactions: Vec<_> = log_file
        .open_transaction_cursor(first_position())
        .unwrap()
        .map(|tx| tx.unwrap())
        .collect();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].tx_id(), FIRST_TX_ID);
    assert_eq!(transactions[0].checksum(), checksum);
    assert_eq!(transactions[0].commands, vec![command(0, 16), command(1, 16), command(2, 16)]);
}

#[test]
fn test_unfinished_chunked_transaction_not_returned() {
    let (_temp, context) = setup();
    let log_file = LogFile::open(context).unwrap();
    let writer = log_file.transaction_log_writer();

    append_transactions(&log_file, 1, 8);
    let first = CommandBatch::chunk(batch(vec![command(9, 8)], KernelVersion::V5_6), true, false);
    writer.append(&first, FIRST_TX_ID + 1, Some(1), log_file.last_checksum(), None).unwrap();

    let mut cursor = log_file.open_transaction_cursor(first_position()).unwrap();
    assert_eq!(cursor.next().unwrap().unwrap().tx_id(), FIRST_TX_ID);
    assert!(cursor.next().is_none());
    assert!(cursor.incomplete_transaction_position().is_some());
}

#[test]
fn test_chunked_batch_without_chunk_id_rejected() {
    let (_temp, context) = setup();
    let log_file = LogFile::open(context).unwrap();

    let first = CommandBatch::chunk(batch(vec![command(0, 8)], KernelVersion::V5_6), true, false);
    let result = log_file.transaction_log_writer().append(&first, FIRST_TX_ID, None, 0, None);

    assert!(matches!(result, Err(TxLogError::InvalidEntry(_))));
    assert_eq!(log_file.current_position(), first_position());
}

#[test]
fn test_chunked_batch_needs_5_6() {
    let (_temp, context) = setup();
    let log_file = LogFile::open(context).unwrap();

    let first = CommandBatch::chunk(batch(vec![command(0, 8)], KernelVersion::V5_0), true, false);
    let result = log_file.transaction_log_writer().append(&first, FIRST_TX_ID, Some(1), 0, None);

    assert!(matches!(result, Err(TxLogError::InvalidEntry(_))));
    assert_eq!(log_file.current_position(), first_position());
}

// =============================================================================
// Corruption Tests
// =============================================================================

fn corrupt_transaction(temp: &TempDir, start: LogPosition) {
    let naming = LogFileNaming::transaction_log(temp.path());
    // inside the start entry's time field
    corrupt_byte(&naming.path_for(start.log_version), start.byte_offset + 3);
}

#[test]
fn test_strict_cursor_fails_at_corrupted_transaction() {
    let (temp, context) = setup();
    let log_file = LogFile::open(context).unwrap();
    let appended = append_transactions(&log_file, 5, 32);

    corrupt_transaction(&temp, appended[1].1);

    let mut cursor = log_file.open_transaction_cursor(first_position()).unwrap();
    assert_eq!(cursor.next().unwrap().unwrap().tx_id(), FIRST_TX_ID);
    assert_eq!(cursor.next().unwrap().unwrap().tx_id(), FIRST_TX_ID + 1);
    match cursor.next() {
        Some(Err(TxLogError::CorruptedLog { position, .. })) => assert_eq!(position, appended[1].1),
        other => panic!("expected corruption at the third transaction, got {:?}", other.map(|r| r.map(|t| t.tx_id()))),
    }
    assert!(cursor.next().is_none());
}

#[test]
fn test_lenient_cursor_stops_at_corrupted_transaction() {
    let temp = TempDir::new().unwrap();
    let config = LogConfig {
        fail_on_corrupted_log_files: false,
        ..test_config(temp.path())
    };
    let log_file = LogFile::open(context_for(config)).unwrap();
    let appended = append_transactions(&log_file, 5, 32);

    corrupt_transaction(&temp, appended[1].1);

    let mut cursor = log_file.open_transaction_cursor(first_position()).unwrap();
    let ids: Vec<i64> = cursor.by_ref().map(|tx| tx.unwrap().tx_id()).collect();
    assert_eq!(ids, vec![FIRST_TX_ID, FIRST_TX_ID + 1]);
    assert!(matches!(
        cursor.stop(),
        Some(CursorStop::Corrupted { position, .. }) if *position == appended[1].1
    ));
}

#[test]
fn test_damaged_last_transaction_is_torn_not_corrupt() {
    let (temp, context) = setup();
    let log_file = LogFile::open(context).unwrap();
    let appended = append_transactions(&log_file, 5, 32);

    // last byte of the final commit entry's checksum
    let naming = LogFileNaming::transaction_log(temp.path());
    corrupt_byte(&naming.path_for(0), appended[4].1.byte_offset - 1);

    let mut cursor = log_file.open_transaction_cursor(first_position()).unwrap();
    let ids: Vec<i64> = cursor.by_ref().map(|tx| tx.unwrap().tx_id()).collect();
    assert_eq!(ids.len(), 4);
    assert_eq!(cursor.position(), appended[3].1);
    assert!(matches!(cursor.stop(), Some(CursorStop::TornWrite { .. })));
}

// =============================================================================
// Reopen Tests
// =============================================================================

#[test]
fn test_reopen_continues_chain() {
    let (_temp, context) = setup();
    let log_file = LogFile::open(Arc::clone(&context)).unwrap();
    let appended = append_transactions(&log_file, 3, 20);
    log_file.close().unwrap();
    drop(log_file);

    let log_file = LogFile::open(context).unwrap();
    assert_eq!(log_file.current_position(), appended[2].1);
    assert_eq!(log_file.last_checksum(), appended[2].0);

    append_transactions(&log_file, 1, 20);
    let ids: Vec<i64> = log_file
        .open_transaction_cursor(first_position())
        .unwrap()
        .map(|tx| tx.unwrap().tx_id())
        .collect();
    assert_eq!(ids, vec![FIRST_TX_ID, FIRST_TX_ID + 1, FIRST_TX_ID + 2, FIRST_TX_ID + 3]);
}

#[test]
fn test_reopen_drops_torn_tail() {
    let (temp, context) = setup();
    let naming = LogFileNaming::transaction_log(temp.path());
    let log_file = LogFile::open(Arc::clone(&context)).unwrap();
    let appended = append_transactions(&log_file, 2, 20);
    drop(log_file);

    append_raw(&naming.path_for(0), &[0x01, 0x56, 0x00, 0x00, 0x01]);

    let log_file = LogFile::open(context).unwrap();
    assert_eq!(log_file.current_position(), appended[1].1);
    assert_eq!(segment_len(&naming, 0), appended[1].1.byte_offset);
}

#[test]
fn test_reopen_drops_dangling_start() {
    let (temp, context) = setup();
    let naming = LogFileNaming::transaction_log(temp.path());
    let log_file = LogFile::open(Arc::clone(&context)).unwrap();
    let appended = append_transactions(&log_file, 2, 20);

    let mut writer = LogEntryWriter::new(log_file.last_checksum());
    writer
        .write_entry(&LogEntry::Start(StartEntry {
            kernel_version: KernelVersion::V5_6,
            time_written: 1,
            last_committed_tx_when_started: FIRST_TX_ID + 1,
            previous_checksum: log_file.last_checksum(),
            additional_header: Vec::new(),
        }))
        .unwrap();
    drop(log_file);
    append_raw(&naming.path_for(0), writer.as_bytes());

    let log_file = LogFile::open(context).unwrap();
    assert_eq!(log_file.current_position(), appended[1].1);
    assert_eq!(log_file.last_checksum(), appended[1].0);
}

#[test]
fn test_reopen_refuses_corrupted_length_prefix() {
    let (temp, context) = setup();
    let naming = LogFileNaming::transaction_log(temp.path());
    let log_file = LogFile::open(Arc::clone(&context)).unwrap();
    let appended = append_transactions(&log_file, 5, 40);
    drop(log_file);

    // payload length of the second transaction's command
    let command_start = appended[0].1.byte_offset + 30;
    crate::common::set_byte(&naming.path_for(0), command_start + 3, 0x10);

    let result = LogFile::open(context);
    assert!(matches!(
        result,
        Err(TxLogError::CorruptedLog { position, .. }) if position == LogPosition::new(0, command_start)
    ));
    assert_eq!(segment_len(&naming, 0), appended[4].1.byte_offset);
}

// =============================================================================
// Transaction Id Tests
// =============================================================================

#[test]
fn test_append_rejects_non_increasing_tx_id() {
    let (_temp, context) = setup();
    let log_file = LogFile::open(context).unwrap();
    append_transactions(&log_file, 2, 16);
    let end = log_file.current_position();
    let writer = log_file.transaction_log_writer();

    for tx_id in [FIRST_TX_ID + 1, FIRST_TX_ID] {
        let result = writer.append(
            &batch(vec![command(9, 16)], KernelVersion::V5_6),
            tx_id,
            None,
            log_file.last_checksum(),
            None,
        );
        assert!(matches!(result, Err(TxLogError::InvalidEntry(_))), "tx {}", tx_id);
    }
    assert_eq!(log_file.current_position(), end);

    // gaps are fine
    writer
        .append(
            &batch(vec![command(9, 16)], KernelVersion::V5_6),
            FIRST_TX_ID + 5,
            None,
            log_file.last_checksum(),
            None,
        )
        .unwrap();
}

#[test]
fn test_reopen_remembers_last_tx_id() {
    let (_temp, context) = setup();
    let log_file = LogFile::open(Arc::clone(&context)).unwrap();
    append_transactions(&log_file, 3, 16);
    drop(log_file);

    let log_file = LogFile::open(context).unwrap();
    let writer = log_file.transaction_log_writer();
    let repeated = writer.append(
        &batch(vec![command(0, 16)], KernelVersion::V5_6),
        FIRST_TX_ID + 2,
        None,
        log_file.last_checksum(),
        None,
    );
    assert!(matches!(repeated, Err(TxLogError::InvalidEntry(_))));

    append_transactions(&log_file, 1, 16);
    assert_eq!(log_file.open_transaction_cursor(first_position()).unwrap().count(), 4);
}

#[test]
fn test_chunk_must_continue_open_transaction() {
    let (_temp, context) = setup();
    let log_file = LogFile::open(context).unwrap();
    let writer = log_file.transaction_log_writer();

    let first = CommandBatch::chunk(batch(vec![command(0, 8)], KernelVersion::V5_6), true, false);
    let checksum = writer.append(&first, FIRST_TX_ID, Some(1), log_file.last_checksum(), None).unwrap();
    let end = writer.current_position();

    let middle = CommandBatch::chunk(batch(vec![command(1, 8)], KernelVersion::V5_6), false, false);
    let result = writer.append(&middle, FIRST_TX_ID + 1, Some(2), checksum, Some(first_position()));
    assert!(matches!(result, Err(TxLogError::InvalidEntry(_))));
    assert_eq!(writer.current_position(), end);

    writer.append(&middle, FIRST_TX_ID, Some(2), checksum, Some(first_position())).unwrap();
}

#[test]
fn test_cursor_rejects_repeated_tx_id_on_disk() {
    let (temp, context) = setup();
    let naming = LogFileNaming::transaction_log(temp.path());
    let log_file = LogFile::open(Arc::clone(&context)).unwrap();
    let appended = append_transactions(&log_file, 2, 16);
    let checksum = log_file.last_checksum();
    drop(log_file);

    // a complete, correctly chained transaction reusing the last id
    let mut writer = LogEntryWriter::new(checksum);
    writer
        .write_entry(&LogEntry::Start(StartEntry {
            kernel_version: KernelVersion::V5_6,
            time_written: 1,
            last_committed_tx_when_started: FIRST_TX_ID + 1,
            previous_checksum: checksum,
            additional_header: Vec::new(),
        }))
        .unwrap();
    writer
        .write_entry(&LogEntry::Commit(CommitEntry {
            kernel_version: KernelVersion::V5_6,
            tx_id: FIRST_TX_ID + 1,
            time_written: 2,
        }))
        .unwrap();
    append_raw(&naming.path_for(0), writer.as_bytes());

    let log_file = LogFile::open(context).unwrap();
    let mut cursor = log_file.open_transaction_cursor(first_position()).unwrap();
    assert_eq!(cursor.next().unwrap().unwrap().tx_id(), FIRST_TX_ID);
    assert_eq!(cursor.next().unwrap().unwrap().tx_id(), FIRST_TX_ID + 1);
    assert!(matches!(cursor.next(), Some(Err(TxLogError::CorruptedLog { .. }))));
    assert!(cursor.next().is_none());
    assert_eq!(cursor.position(), appended[1].1);
}

// =============================================================================
// Durability / Health Tests
// =============================================================================

#[test]
fn test_every_n_appends_defers_force() {
    let temp = TempDir::new().unwrap();
    let config = LogConfig {
        sync_strategy: LogSyncStrategy::EveryNAppends { count: 3 },
        ..test_config(temp.path())
    };
    let log_file = LogFile::open(context_for(config)).unwrap();

    let appended = append_transactions(&log_file, 2, 8);
    assert_eq!(log_file.flushed_position(), first_position());

    let more = append_transactions(&log_file, 1, 8);
    assert_eq!(log_file.flushed_position(), more[0].1);
    assert!(appended[1].1 < more[0].1);

    append_transactions(&log_file, 1, 8);
    log_file.force().unwrap();
    assert_eq!(log_file.flushed_position(), log_file.current_position());
}

#[test]
fn test_unhealthy_log_refuses_appends() {
    let temp = TempDir::new().unwrap();
    let health = Arc::new(HealthMonitor::default());
    let metadata = Arc::new(txlog::InMemoryMetadata::new(crate::common::store_id()));
    let context = Arc::new(
        txlog::LogFilesContext::new(test_config(temp.path()), metadata)
            .unwrap()
            .with_health(health.clone()),
    );
    let log_file = LogFile::open(context).unwrap();
    append_transactions(&log_file, 1, 8);
    let before = log_file.current_position();

    health.panic(&TxLogError::Config("disk full".to_string()));

    let result = log_file
        .transaction_log_writer()
        .append(&batch(vec![command(0, 8)], KernelVersion::V5_6), 10, None, 0, None);
    assert!(matches!(result, Err(TxLogError::Unhealthy(_))));
    assert!(matches!(log_file.rotate(), Err(TxLogError::Unhealthy(_))));
    assert_eq!(log_file.current_position(), before);
    assert!(!health.is_healthy());
}

// =============================================================================
// Re-serialization Tests
// =============================================================================

#[test]
fn test_append_committed_reproduces_transaction() {
    let (_source_dir, source_context) = setup();
    let source = LogFile::open(source_context).unwrap();
    let appended = append_transactions(&source, 3, 40);

    let (_target_dir, target_context) = setup();
    let target = LogFile::open(target_context).unwrap();
    let writer = target.transaction_log_writer();
    for tx in source.open_transaction_cursor(first_position()).unwrap() {
        writer.append_committed(&tx.unwrap()).unwrap();
    }

    let copied: Vec<_> = target
        .open_transaction_cursor(LogPosition::new(0, LOG_HEADER_SIZE))
        .unwrap()
        .map(|tx| tx.unwrap())
        .collect();
    let original: Vec<_> = source
        .open_transaction_cursor(first_position())
        .unwrap()
        .map(|tx| tx.unwrap())
        .collect();
    assert_eq!(copied, original);
    // same seed, same bytes, same chain
    assert_eq!(target.last_checksum(), appended[2].0);
    assert_eq!(target.current_position(), source.current_position());
}
