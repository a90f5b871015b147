//! Tests for LogTailExtractor
//!
//! These tests verify:
//! - Empty directories report an empty log
//! - The last checkpoint and the transactions after it are found
//! - Torn tails are truncated, once
//! - Corruption before the tail fails recovery and trips the health signal
//! - Logs of another store are refused
//! - Legacy checkpoints get their transaction resolved from the log

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use txlog::files::LogFileNaming;
use txlog::model::{ConsensusIndex, KernelVersion, LogPosition, TransactionId};
use txlog::{DatabaseHealth, InMemoryMetadata, LogFile, LogFiles, LogTailExtractor, TxLogError};

use crate::common::{
    append_raw, append_transactions, context_with_metadata, corrupt_byte, other_store_id, segment_len, set_byte, setup,
    store_id, test_config, truncate, FIRST_TX_ID,
};

/// Writes `count` transactions and a checkpoint after the first `checkpoint_after` of them
fn log_with_checkpoint(
    context: &Arc<txlog::LogFilesContext>,
    count: usize,
    checkpoint_after: usize,
    kernel_version: KernelVersion,
) -> Vec<(i32, LogPosition)> {
    let log_files = LogFiles::open(Arc::clone(context)).unwrap();
    let mut appended = append_transactions(log_files.log_file(), checkpoint_after, 40);
    let (checksum, position) = appended[checkpoint_after - 1];
    let tx = TransactionId::new(
        FIRST_TX_ID + checkpoint_after as i64 - 1,
        checksum,
        200,
        ConsensusIndex::Unknown,
    );
    log_files
        .checkpoint_appender()
        .check_point(tx, kernel_version, position, 1_000, "test")
        .unwrap();
    appended.extend(append_transactions(log_files.log_file(), count - checkpoint_after, 40));
    log_files.close().unwrap();
    appended
}

// =============================================================================
// Clean Log Tests
// =============================================================================

#[test]
fn test_empty_directory() {
    let (_temp, context) = setup();

    let tail = LogTailExtractor::new(context).get_tail_metadata().unwrap();

    assert!(tail.is_empty_log());
    assert!(!tail.has_checkpoint());
    assert!(!tail.is_recovery_required());
    assert_eq!(tail.last_closed_position, None);
    assert_eq!(tail.observed_store_id, None);
}

#[test]
fn test_transactions_without_checkpoint() {
    let (_temp, context) = setup();
    let log_file = LogFile::open(Arc::clone(&context)).unwrap();
    let appended = append_transactions(&log_file, 3, 40);
    drop(log_file);

    let tail = LogTailExtractor::new(context).get_tail_metadata().unwrap();

    assert!(!tail.has_checkpoint());
    assert!(!tail.is_empty_log());
    assert_eq!(tail.transactions_after_checkpoint, 3);
    assert_eq!(tail.first_transaction_id_after_checkpoint, Some(FIRST_TX_ID));
    assert_eq!(tail.last_closed_transaction_id(), Some(FIRST_TX_ID + 2));
    assert_eq!(tail.last_committed_transaction.unwrap().checksum, appended[2].0);
    assert_eq!(tail.last_closed_position, Some(appended[2].1));
    assert_eq!(tail.observed_store_id, Some(store_id()));
    assert!(!tail.recovered_from_torn_write);
}

#[test]
fn test_checkpoint_followed_by_transactions() {
    let (_temp, context) = setup();
    let appended = log_with_checkpoint(&context, 5, 3, KernelVersion::V5_6);

    let tail = LogTailExtractor::new(context).get_tail_metadata().unwrap();

    let checkpoint = tail.last_checkpoint.as_ref().unwrap();
    assert_eq!(checkpoint.transaction_log_position, appended[2].1);
    assert_eq!(checkpoint.transaction_id.id, FIRST_TX_ID + 2);
    assert!(tail.is_recovery_required());
    assert_eq!(tail.transactions_after_checkpoint, 2);
    assert_eq!(tail.first_transaction_id_after_checkpoint, Some(FIRST_TX_ID + 3));
    assert_eq!(tail.last_closed_transaction_id(), Some(FIRST_TX_ID + 4));
    assert_eq!(tail.last_committed_kernel_version, Some(KernelVersion::V5_6));
    assert_eq!(tail.last_closed_position, Some(appended[4].1));
}

#[test]
fn test_checkpoint_at_end_of_log() {
    let (_temp, context) = setup();
    let appended = log_with_checkpoint(&context, 2, 2, KernelVersion::V5_6);

    let tail = LogTailExtractor::new(context).get_tail_metadata().unwrap();

    let checkpoint = tail.last_checkpoint.clone().unwrap();
    assert!(!tail.is_recovery_required());
    assert_eq!(tail.first_transaction_id_after_checkpoint, None);
    assert_eq!(tail.last_committed_transaction, Some(checkpoint.transaction_id));
    assert_eq!(tail.last_committed_kernel_version, Some(KernelVersion::V5_6));
    assert_eq!(tail.last_closed_position, Some(appended[1].1));
}

#[test]
fn test_latest_of_several_checkpoint_segments() {
    let (_temp, context) = setup();
    let log_files = LogFiles::open(Arc::clone(&context)).unwrap();
    for i in 0..3 {
        let appended = append_transactions(log_files.log_file(), 1, 16);
        let tx = TransactionId::new(FIRST_TX_ID + i, appended[0].0, 200, ConsensusIndex::Unknown);
        log_files
            .checkpoint_appender()
            .check_point(tx, KernelVersion::V5_6, appended[0].1, 1_000, "rotated")
            .unwrap();
        log_files.checkpoint_file().rotate().unwrap();
    }
    log_files.close().unwrap();

    let tail = LogTailExtractor::new(context).get_tail_metadata().unwrap();

    // the highest checkpoint segment is empty; the search moves down
    let checkpoint = tail.last_checkpoint.unwrap();
    assert_eq!(checkpoint.checkpoint_entry_position.log_version, 2);
    assert_eq!(checkpoint.transaction_id.id, FIRST_TX_ID + 2);
    assert_eq!(tail.transactions_after_checkpoint, 0);
}

// =============================================================================
// Torn Write Tests
// =============================================================================

#[test]
fn test_torn_transaction_truncated() {
    let (temp, context) = setup();
    let naming = LogFileNaming::transaction_log(temp.path());
    let log_file = LogFile::open(Arc::clone(&context)).unwrap();
    let appended = append_transactions(&log_file, 5, 100);
    drop(log_file);

    // cut the fifth transaction inside its command entry
    truncate(&naming.path_for(0), appended[3].1.byte_offset + 100);

    let tail = LogTailExtractor::new(Arc::clone(&context)).get_tail_metadata().unwrap();
    assert!(tail.recovered_from_torn_write);
    assert_eq!(tail.last_closed_transaction_id(), Some(FIRST_TX_ID + 3));
    assert_eq!(tail.transactions_after_checkpoint, 4);
    assert_eq!(tail.last_closed_position, Some(appended[3].1));
    assert_eq!(segment_len(&naming, 0), appended[3].1.byte_offset);

    // nothing left to repair
    let again = LogTailExtractor::new(context).get_tail_metadata().unwrap();
    assert!(!again.recovered_from_torn_write);
    assert_eq!(again.last_closed_transaction_id(), Some(FIRST_TX_ID + 3));
    assert_eq!(segment_len(&naming, 0), appended[3].1.byte_offset);
}

#[test]
fn test_read_only_leaves_torn_tail() {
    let (temp, context) = setup();
    let naming = LogFileNaming::transaction_log(temp.path());
    let log_file = LogFile::open(Arc::clone(&context)).unwrap();
    let appended = append_transactions(&log_file, 3, 100);
    drop(log_file);

    let cut = appended[1].1.byte_offset + 50;
    truncate(&naming.path_for(0), cut);

    let tail = LogTailExtractor::new(context).read_only().get_tail_metadata().unwrap();
    assert!(tail.recovered_from_torn_write);
    assert_eq!(tail.last_closed_transaction_id(), Some(FIRST_TX_ID + 1));
    assert_eq!(segment_len(&naming, 0), cut);
}

#[test]
fn test_torn_rotation_removes_later_segments() {
    let (temp, context) = setup();
    let naming = LogFileNaming::transaction_log(temp.path());
    let log_file = LogFile::open(Arc::clone(&context)).unwrap();
    let appended = append_transactions(&log_file, 2, 40);
    drop(log_file);

    // a segment whose header never reached disk
    fs::write(naming.path_for(1), b"").unwrap();

    let tail = LogTailExtractor::new(context).get_tail_metadata().unwrap();
    assert_eq!(naming.versions().unwrap(), vec![0]);
    assert_eq!(tail.last_closed_position, Some(appended[1].1));
}

#[test]
fn test_torn_checkpoint_tolerated() {
    let (temp, context) = setup();
    let naming = LogFileNaming::checkpoint_log(temp.path());
    let appended = log_with_checkpoint(&context, 2, 2, KernelVersion::V5_6);
    let complete_len = segment_len(&naming, 0);

    append_raw(&naming.path_for(0), &[0x08, 0x56, 0x00, 0x00, 0x00]);

    let tail = LogTailExtractor::new(context).get_tail_metadata().unwrap();
    assert!(tail.recovered_from_torn_write);
    let checkpoint = tail.last_checkpoint.unwrap();
    assert_eq!(checkpoint.transaction_log_position, appended[1].1);
    assert_eq!(segment_len(&naming, 0), complete_len);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_mid_log_corruption_is_fatal() {
    let (temp, context) = setup();
    let naming = LogFileNaming::transaction_log(temp.path());
    let log_file = LogFile::open(Arc::clone(&context)).unwrap();
    let appended = append_transactions(&log_file, 5, 40);
    drop(log_file);

    corrupt_byte(&naming.path_for(0), appended[1].1.byte_offset + 3);

    let result = LogTailExtractor::new(Arc::clone(&context)).get_tail_metadata();
    match result {
        Err(TxLogError::CorruptedLog { position, .. }) => assert_eq!(position, appended[1].1),
        other => panic!("expected corruption, got {:?}", other.map(|t| t.last_closed_transaction_id())),
    }
    assert!(!context.health().is_healthy());
    // nothing was truncated
    assert_eq!(segment_len(&naming, 0), appended[4].1.byte_offset);
}

#[test]
fn test_corrupted_length_prefix_is_not_torn() {
    let (temp, context) = setup();
    let naming = LogFileNaming::transaction_log(temp.path());
    let log_file = LogFile::open(Arc::clone(&context)).unwrap();
    let appended = append_transactions(&log_file, 5, 40);
    drop(log_file);

    // the command of the second transaction now claims about 1 MiB, running
    // its read past every later transaction
    let command_start = appended[0].1.byte_offset + 30;
    set_byte(&naming.path_for(0), command_start + 3, 0x10);

    let result = LogTailExtractor::new(Arc::clone(&context)).get_tail_metadata();
    match result {
        Err(TxLogError::CorruptedLog { position, .. }) => assert_eq!(position, LogPosition::new(0, command_start)),
        other => panic!("expected corruption, got {:?}", other.map(|t| t.last_closed_transaction_id())),
    }
    assert!(!context.health().is_healthy());
    assert_eq!(segment_len(&naming, 0), appended[4].1.byte_offset);
}

#[test]
fn test_zeroed_kind_byte_mid_log_is_fatal() {
    let (temp, context) = setup();
    let naming = LogFileNaming::transaction_log(temp.path());
    let log_file = LogFile::open(Arc::clone(&context)).unwrap();
    let appended = append_transactions(&log_file, 5, 40);
    drop(log_file);

    // the third transaction's start entry reads as the end of the log
    set_byte(&naming.path_for(0), appended[1].1.byte_offset, 0x00);

    let result = LogTailExtractor::new(Arc::clone(&context)).read_only().get_tail_metadata();
    match result {
        Err(TxLogError::CorruptedLog { position, .. }) => assert_eq!(position, appended[1].1),
        other => panic!("expected corruption, got {:?}", other.map(|t| t.last_closed_transaction_id())),
    }

    // appends must not land on top of the later transactions either
    assert!(matches!(LogFile::open(context), Err(TxLogError::CorruptedLog { .. })));
    assert_eq!(segment_len(&naming, 0), appended[4].1.byte_offset);
}

#[test]
fn test_zero_padding_after_last_transaction() {
    let (temp, context) = setup();
    let naming = LogFileNaming::transaction_log(temp.path());
    let log_file = LogFile::open(Arc::clone(&context)).unwrap();
    let appended = append_transactions(&log_file, 3, 40);
    drop(log_file);

    append_raw(&naming.path_for(0), &[0u8; 512]);

    let tail = LogTailExtractor::new(context).get_tail_metadata().unwrap();
    assert!(!tail.recovered_from_torn_write);
    assert_eq!(tail.last_closed_transaction_id(), Some(FIRST_TX_ID + 2));
    assert_eq!(tail.last_closed_position, Some(appended[2].1));
}

#[test]
fn test_unsupported_entry_version_is_fatal() {
    let (temp, context) = setup();
    let naming = LogFileNaming::transaction_log(temp.path());
    let log_file = LogFile::open(Arc::clone(&context)).unwrap();
    let appended = append_transactions(&log_file, 2, 40);
    drop(log_file);

    append_raw(&naming.path_for(0), &[0x01, 0x99, 0x00, 0x00, 0x00, 0x00]);

    let result = LogTailExtractor::new(context).get_tail_metadata();
    assert!(matches!(
        result,
        Err(TxLogError::UnsupportedFormatVersion { kind: 0x01, version: 0x99, position }) if position == appended[1].1
    ));
}

#[test]
fn test_checkpoint_into_missing_segment_is_fatal() {
    let (temp, context) = setup();
    log_with_checkpoint(&context, 2, 2, KernelVersion::V5_6);
    {
        let log_file = LogFile::open(Arc::clone(&context)).unwrap();
        log_file.rotate().unwrap();
        append_transactions(&log_file, 1, 40);
    }
    LogFileNaming::transaction_log(temp.path()).delete(0).unwrap();

    let result = LogTailExtractor::new(context).get_tail_metadata();
    assert!(matches!(result, Err(TxLogError::CorruptedLog { .. })));
}

// =============================================================================
// Store Id Tests
// =============================================================================

#[test]
fn test_logs_of_another_store_refused() {
    let (temp, context) = setup();
    log_with_checkpoint(&context, 3, 2, KernelVersion::V5_6);

    let other = context_with_metadata(test_config(temp.path()), Arc::new(InMemoryMetadata::new(other_store_id())));
    let result = LogTailExtractor::new(Arc::clone(&other)).get_tail_metadata();

    match result {
        Err(TxLogError::StoreIdMismatch { expected, found }) => {
            assert_eq!(expected, other_store_id());
            assert_eq!(found, store_id());
        }
        other => panic!("expected store id mismatch, got {:?}", other.map(|t| t.last_closed_transaction_id())),
    }
    assert!(!other.health().is_healthy());
}

#[test]
fn test_checkpoint_log_of_another_store_refused() {
    let (temp, context) = setup();
    log_with_checkpoint(&context, 2, 2, KernelVersion::V5_6);

    // this store's transaction log next to the other store's checkpoints
    let tx_naming = LogFileNaming::transaction_log(temp.path());
    for version in tx_naming.versions().unwrap() {
        tx_naming.delete(version).unwrap();
    }
    let other = context_with_metadata(test_config(temp.path()), Arc::new(InMemoryMetadata::new(other_store_id())));
    drop(LogFile::open(Arc::clone(&other)).unwrap());

    let result = LogTailExtractor::new(other).get_tail_metadata();
    assert!(matches!(
        result,
        Err(TxLogError::StoreIdMismatch { found, .. }) if found == store_id()
    ));
}

// =============================================================================
// Legacy Checkpoint Tests
// =============================================================================

#[test]
fn test_legacy_checkpoint_resolves_transaction() {
    let (_temp, context) = setup();
    let appended = log_with_checkpoint(&context, 4, 3, KernelVersion::V4_2);

    let tail = LogTailExtractor::new(context).get_tail_metadata().unwrap();

    let checkpoint = tail.last_checkpoint.unwrap();
    assert_eq!(checkpoint.kernel_version, KernelVersion::V4_2);
    assert_eq!(checkpoint.transaction_log_position, appended[2].1);
    assert_eq!(checkpoint.transaction_id.id, FIRST_TX_ID + 2);
    assert_eq!(checkpoint.transaction_id.checksum, appended[2].0);
    assert_eq!(checkpoint.transaction_id.commit_timestamp, 200);
    assert_eq!(checkpoint.store_id, store_id());
    assert_eq!(tail.transactions_after_checkpoint, 1);
}

// =============================================================================
// Deadline Tests
// =============================================================================

#[test]
fn test_deadline_exceeded() {
    let (_temp, context) = setup();
    let log_file = LogFile::open(Arc::clone(&context)).unwrap();
    append_transactions(&log_file, 3, 40);
    drop(log_file);

    let deadline = Instant::now();
    thread::sleep(Duration::from_millis(5));

    let result = LogTailExtractor::new(Arc::clone(&context))
        .with_deadline(deadline)
        .get_tail_metadata();
    assert!(matches!(result, Err(TxLogError::DeadlineExceeded { .. })));
    // running out of time is not a log failure
    assert!(context.health().is_healthy());
}
