//! Shared test fixtures

#![allow(dead_code)]

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use txlog::context::FixedClock;
use txlog::files::{LogFileNaming, LOG_HEADER_SIZE};
use txlog::model::{ConsensusIndex, KernelVersion, LogPosition, StoreId, BASE_TX_CHECKSUM};
use txlog::transaction::{CommandBatch, StorageCommand};
use txlog::{InMemoryMetadata, LogConfig, LogFile, LogFilesContext};

pub const FIRST_TX_ID: i64 = 2;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn store_id() -> StoreId {
    StoreId::new(1_700_000_000_000, 42, "record", "aligned", 5, 6)
}

/// Same layout as `store_id`, different store
pub fn other_store_id() -> StoreId {
    StoreId::new(1_700_000_000_000, 43, "record", "aligned", 5, 6)
}

pub fn test_config(dir: &Path) -> LogConfig {
    LogConfig::builder().logs_dir(dir).preallocate(false).build()
}

pub fn context_for(config: LogConfig) -> Arc<LogFilesContext> {
    context_with_metadata(config, Arc::new(InMemoryMetadata::new(store_id())))
}

pub fn context_with_metadata(config: LogConfig, metadata: Arc<InMemoryMetadata>) -> Arc<LogFilesContext> {
    init_tracing();
    Arc::new(
        LogFilesContext::new(config, metadata)
            .unwrap()
            .with_clock(Arc::new(FixedClock::new(1_000))),
    )
}

pub fn setup() -> (TempDir, Arc<LogFilesContext>) {
    let temp_dir = TempDir::new().unwrap();
    let context = context_for(test_config(temp_dir.path()));
    (temp_dir, context)
}

pub fn first_position() -> LogPosition {
    LogPosition::new(0, LOG_HEADER_SIZE)
}

pub fn command(i: usize, size: usize) -> StorageCommand {
    let mut payload = format!("command-{}:", i).into_bytes();
    payload.resize(size, b'x');
    StorageCommand::new(payload)
}

pub fn batch(commands: Vec<StorageCommand>, kernel_version: KernelVersion) -> CommandBatch {
    CommandBatch::complete(commands, ConsensusIndex::Unknown, 100, 1, 200, kernel_version)
}

/// Appends `count` one-command transactions with ids from FIRST_TX_ID.
/// Returns (checksum, end position) per transaction.
pub fn append_transactions(log_file: &LogFile, count: usize, payload_size: usize) -> Vec<(i32, LogPosition)> {
    let writer = log_file.transaction_log_writer();
    let mut previous = log_file.last_checksum();
    let start_id = next_id_after(log_file);
    (0..count)
        .map(|i| {
            let batch = batch(vec![command(i, payload_size)], KernelVersion::V5_6);
            let checksum = writer
                .append(&batch, start_id + i as i64, None, previous, None)
                .unwrap();
            previous = checksum;
            (checksum, writer.current_position())
        })
        .collect()
}

fn next_id_after(log_file: &LogFile) -> i64 {
    let cursor = log_file.open_transaction_cursor(first_position()).unwrap();
    cursor
        .map(|tx| tx.unwrap().tx_id() + 1)
        .last()
        .unwrap_or(FIRST_TX_ID)
}

pub fn segment_len(naming: &LogFileNaming, version: u64) -> u64 {
    fs::metadata(naming.path_for(version)).unwrap().len()
}

/// Flips every bit of the byte at `offset`
pub fn corrupt_byte(path: &Path, offset: u64) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.read_exact(&mut byte).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&[!byte[0]]).unwrap();
    file.sync_all().unwrap();
}

pub fn set_byte(path: &Path, offset: u64, value: u8) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&[value]).unwrap();
    file.sync_all().unwrap();
}

pub fn append_raw(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

pub fn truncate(path: &Path, len: u64) {
    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.set_len(len).unwrap();
    file.sync_all().unwrap();
}

pub fn base_checksum() -> i32 {
    BASE_TX_CHECKSUM
}
