//! Entry codec
//!
//! Encoding goes through [`LogEntryWriter`], which keeps the running checksum
//! chain. Decoding is table driven: one decode function per (kind, kernel
//! version) pair, so a new on-disk layout is one more row in `DECODERS`.

use std::io::{self, Read};

use bytes::{BufMut, Bytes, BytesMut};
use crc32fast::Hasher;

use crate::error::{Result, TxLogError};
use crate::model::{ConsensusIndex, KernelVersion, LegacyStoreId, LogPosition, StoreId, TransactionId};
use crate::transaction::StorageCommand;

use super::{
    CheckpointEntry, ChunkEndEntry, ChunkStartEntry, CommandEntry, CommitEntry, DetachedCheckpointV5_0,
    DetachedCheckpointV5_6, EntryKind, LegacyCheckpointEntry, LogEntry, StartEntry, CHECKSUM_SIZE,
};

/// Upper bound for any length prefix; anything larger is garbage, not data
const MAX_FIELD_SIZE: usize = 256 * 1024 * 1024;

/// Initial buffer for length-prefixed fields
const READ_CHUNK_SIZE: usize = 64 * 1024;

// =============================================================================
// Encoding
// =============================================================================

/// Serializes entries into an in-memory buffer, chaining checksums.
///
/// The buffer is handed to the channel in one piece so that a whole
/// transaction reaches the file with a single write.
pub struct LogEntryWriter {
    buffer: BytesMut,
    checksum: i32,
}

impl LogEntryWriter {
    /// `previous_checksum` seeds the chain: the checksum of the entry written
    /// just before this one (or the segment header seed).
    pub fn new(previous_checksum: i32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
            checksum: previous_checksum,
        }
    }

    /// Checksum of the last entry written (the seed if nothing was written)
    pub fn checksum(&self) -> i32 {
        self.checksum
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Takes the encoded bytes, leaving the writer empty but keeping the chain
    pub fn take_bytes(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Appends one entry and returns the number of bytes it occupies.
    ///
    /// On error nothing is left in the buffer and the chain is unchanged.
    pub fn write_entry(&mut self, entry: &LogEntry) -> Result<usize> {
        let start = self.buffer.len();
        if let Err(e) = self.encode_fields(entry) {
            self.buffer.truncate(start);
            return Err(e);
        }

        let mut hasher = Hasher::new_with_initial(self.checksum as u32);
        hasher.update(&self.buffer[start..]);
        let checksum = hasher.finalize();
        self.buffer.put_u32(checksum);
        self.checksum = checksum as i32;

        Ok(self.buffer.len() - start)
    }

    fn encode_fields(&mut self, entry: &LogEntry) -> Result<()> {
        let version = entry.kernel_version();
        self.buffer.put_u8(entry.kind() as u8);
        self.buffer.put_u8(version.version_byte());

        match entry {
            LogEntry::Start(e) => {
                self.buffer.put_i64(e.time_written);
                self.buffer.put_i64(e.last_committed_tx_when_started);
                self.buffer.put_i32(e.previous_checksum);
                self.put_u32_prefixed(&e.additional_header, "start header")?;
            }
            LogEntry::Command(e) => {
                self.put_u32_prefixed(e.command.payload(), "command")?;
            }
            LogEntry::Commit(e) => {
                self.buffer.put_i64(e.tx_id);
                self.buffer.put_i64(e.time_written);
            }
            LogEntry::ChunkStart(e) => {
                Self::require_chunks(version)?;
                self.buffer.put_i64(e.time_written);
                self.buffer.put_i64(e.chunk_id);
                self.put_optional_position(e.previous_batch_position);
            }
            LogEntry::ChunkEnd(e) => {
                Self::require_chunks(version)?;
                self.buffer.put_i64(e.tx_id);
                self.buffer.put_i64(e.chunk_id);
            }
            LogEntry::Checkpoint(CheckpointEntry::Legacy(e)) => {
                self.put_position(e.log_position);
                self.buffer.put_i64(e.time_written);
                self.buffer.put_i64(e.store_id.creation_time);
                self.buffer.put_i64(e.store_id.random_id);
                self.buffer.put_i64(e.store_id.store_version);
                self.put_reason(&e.reason)?;
            }
            LogEntry::Checkpoint(CheckpointEntry::DetachedV5_0(e)) => {
                self.buffer.put_i64(e.transaction_id.id);
                self.buffer.put_i32(e.transaction_id.checksum);
                self.buffer.put_i64(e.transaction_id.commit_timestamp);
                self.put_position(e.log_position);
                self.buffer.put_i64(e.time_written);
                self.put_store_id(&e.store_id)?;
                self.put_reason(&e.reason)?;
            }
            LogEntry::Checkpoint(CheckpointEntry::DetachedV5_6(e)) => {
                self.buffer.put_i64(e.transaction_id.id);
                self.buffer.put_i32(e.transaction_id.checksum);
                self.buffer.put_i64(e.transaction_id.commit_timestamp);
                match e.transaction_id.consensus_index {
                    ConsensusIndex::Unknown => self.buffer.put_u8(0),
                    ConsensusIndex::Known(index) => {
                        self.buffer.put_u8(1);
                        self.buffer.put_i64(index);
                    }
                }
                self.put_position(e.log_position);
                self.buffer.put_i64(e.time_written);
                self.put_store_id(&e.store_id)?;
                self.put_reason(&e.reason)?;
            }
        }
        Ok(())
    }

    fn require_chunks(version: KernelVersion) -> Result<()> {
        if version.supports_chunks() {
            Ok(())
        } else {
            Err(TxLogError::InvalidEntry(format!(
                "chunk entries need kernel version {} or later, got {}",
                KernelVersion::V5_6,
                version
            )))
        }
    }

    fn put_position(&mut self, position: LogPosition) {
        self.buffer.put_u64(position.log_version);
        self.buffer.put_u64(position.byte_offset);
    }

    fn put_optional_position(&mut self, position: Option<LogPosition>) {
        match position {
            None => self.buffer.put_u8(0),
            Some(position) => {
                self.buffer.put_u8(1);
                self.put_position(position);
            }
        }
    }

    fn put_u32_prefixed(&mut self, bytes: &[u8], what: &str) -> Result<()> {
        if bytes.len() > MAX_FIELD_SIZE {
            return Err(TxLogError::InvalidEntry(format!(
                "{} of {} bytes exceeds {} bytes",
                what,
                bytes.len(),
                MAX_FIELD_SIZE
            )));
        }
        self.buffer.put_u32(bytes.len() as u32);
        self.buffer.put_slice(bytes);
        Ok(())
    }

    fn put_reason(&mut self, reason: &str) -> Result<()> {
        let len = u16::try_from(reason.len()).map_err(|_| {
            TxLogError::InvalidEntry(format!("checkpoint reason of {} bytes is too long", reason.len()))
        })?;
        self.buffer.put_u16(len);
        self.buffer.put_slice(reason.as_bytes());
        Ok(())
    }

    fn put_short_string(&mut self, value: &str) -> Result<()> {
        let len = u8::try_from(value.len())
            .map_err(|_| TxLogError::InvalidEntry(format!("store id name '{}' is too long", value)))?;
        self.buffer.put_u8(len);
        self.buffer.put_slice(value.as_bytes());
        Ok(())
    }

    fn put_store_id(&mut self, store_id: &StoreId) -> Result<()> {
        self.buffer.put_i64(store_id.creation_time);
        self.buffer.put_i64(store_id.random_id);
        self.put_short_string(&store_id.storage_engine_name)?;
        self.put_short_string(&store_id.format_name)?;
        self.buffer.put_i32(store_id.major_version);
        self.buffer.put_i32(store_id.minor_version);
        Ok(())
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// A successfully decoded entry with its checksum and encoded length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEntry {
    pub entry: LogEntry,
    pub checksum: i32,
    pub length: u64,
}

/// Result of trying to decode one entry at the current read position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    Entry(DecodedEntry),
    /// No bytes left, or a zero kind byte. Whether that is really the end
    /// of the log is for the caller to decide.
    EndOfData,
    /// The data ran out inside the entry
    Truncated { consumed: u64 },
    /// The entry was complete but its checksum does not match the chain
    ChecksumMismatch { expected: u32, actual: u32, length: u64 },
    /// A length prefix or flag that cannot belong to a valid entry
    Malformed { consumed: u64, reason: String },
    /// No decoder for this (kind, version) pair
    Unsupported { kind: u8, version: u8 },
}

/// Reader that feeds every byte it hands out into the running checksum
pub(crate) struct EntryReader<'a> {
    inner: &'a mut dyn Read,
    hasher: Hasher,
    consumed: u64,
}

impl<'a> EntryReader<'a> {
    fn new(inner: &'a mut dyn Read, seed: i32) -> Self {
        Self {
            inner,
            hasher: Hasher::new_with_initial(seed as u32),
            consumed: 0,
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf)?;
        self.hasher.update(buf);
        self.consumed += buf.len() as u64;
        Ok(())
    }

    fn feed(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
        self.consumed += bytes.len() as u64;
    }

    fn read_u8(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn read_i32(&mut self) -> io::Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    fn read_u64(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    fn read_i64(&mut self) -> io::Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    fn read_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        if len > MAX_FIELD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("field length {} exceeds {}", len, MAX_FIELD_SIZE),
            ));
        }
        // grow with the data actually present; a garbage prefix must not
        // allocate its full claimed size
        let mut buf = Vec::with_capacity(len.min(READ_CHUNK_SIZE));
        (&mut *self.inner).take(len as u64).read_to_end(&mut buf)?;
        if buf.len() < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("field of {} bytes cut off after {}", len, buf.len()),
            ));
        }
        self.feed(&buf);
        Ok(buf)
    }

    fn read_flag(&mut self) -> io::Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid presence flag {}", other),
            )),
        }
    }

    fn read_position(&mut self) -> io::Result<LogPosition> {
        let log_version = self.read_u64()?;
        let byte_offset = self.read_u64()?;
        Ok(LogPosition::new(log_version, byte_offset))
    }

    fn read_string(&mut self, len: usize) -> io::Result<String> {
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn read_store_id(&mut self) -> io::Result<StoreId> {
        let creation_time = self.read_i64()?;
        let random_id = self.read_i64()?;
        let engine_len = self.read_u8()? as usize;
        let engine = self.read_string(engine_len)?;
        let format_len = self.read_u8()? as usize;
        let format = self.read_string(format_len)?;
        let major = self.read_i32()?;
        let minor = self.read_i32()?;
        Ok(StoreId::new(creation_time, random_id, engine, format, major, minor))
    }

    fn read_reason(&mut self) -> io::Result<String> {
        let len = self.read_u16()? as usize;
        self.read_string(len)
    }

    fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

type DecodeFn = fn(&mut EntryReader<'_>, KernelVersion) -> io::Result<LogEntry>;

/// Every (kind, version) pair this build can read
static DECODERS: &[(EntryKind, KernelVersion, DecodeFn)] = &[
    (EntryKind::Start, KernelVersion::V4_2, decode_start),
    (EntryKind::Start, KernelVersion::V5_0, decode_start),
    (EntryKind::Start, KernelVersion::V5_6, decode_start),
    (EntryKind::Command, KernelVersion::V4_2, decode_command),
    (EntryKind::Command, KernelVersion::V5_0, decode_command),
    (EntryKind::Command, KernelVersion::V5_6, decode_command),
    (EntryKind::Commit, KernelVersion::V4_2, decode_commit),
    (EntryKind::Commit, KernelVersion::V5_0, decode_commit),
    (EntryKind::Commit, KernelVersion::V5_6, decode_commit),
    (EntryKind::ChunkStart, KernelVersion::V5_6, decode_chunk_start),
    (EntryKind::ChunkEnd, KernelVersion::V5_6, decode_chunk_end),
    (EntryKind::Checkpoint, KernelVersion::V4_2, decode_legacy_checkpoint),
    (EntryKind::Checkpoint, KernelVersion::V5_0, decode_checkpoint_v5_0),
    (EntryKind::Checkpoint, KernelVersion::V5_6, decode_checkpoint_v5_6),
];

fn decoder_for(kind: u8, version: u8) -> Option<(KernelVersion, DecodeFn)> {
    let kind = EntryKind::from_byte(kind)?;
    let version = KernelVersion::from_version_byte(version)?;
    DECODERS
        .iter()
        .find(|(k, v, _)| *k == kind && *v == version)
        .map(|(_, v, decode)| (*v, *decode))
}

/// True when some decoder handles the (kind, version) pair
pub(crate) fn is_known_entry(kind: u8, version: u8) -> bool {
    decoder_for(kind, version).is_some()
}

fn decode_start(reader: &mut EntryReader<'_>, kernel_version: KernelVersion) -> io::Result<LogEntry> {
    let time_written = reader.read_i64()?;
    let last_committed_tx_when_started = reader.read_i64()?;
    let previous_checksum = reader.read_i32()?;
    let header_len = reader.read_u32()? as usize;
    let additional_header = reader.read_bytes(header_len)?;
    Ok(LogEntry::Start(StartEntry {
        kernel_version,
        time_written,
        last_committed_tx_when_started,
        previous_checksum,
        additional_header,
    }))
}

fn decode_command(reader: &mut EntryReader<'_>, kernel_version: KernelVersion) -> io::Result<LogEntry> {
    let len = reader.read_u32()? as usize;
    let payload = reader.read_bytes(len)?;
    Ok(LogEntry::Command(CommandEntry {
        kernel_version,
        command: StorageCommand::new(Bytes::from(payload)),
    }))
}

fn decode_commit(reader: &mut EntryReader<'_>, kernel_version: KernelVersion) -> io::Result<LogEntry> {
    let tx_id = reader.read_i64()?;
    let time_written = reader.read_i64()?;
    Ok(LogEntry::Commit(CommitEntry {
        kernel_version,
        tx_id,
        time_written,
    }))
}

fn decode_chunk_start(reader: &mut EntryReader<'_>, kernel_version: KernelVersion) -> io::Result<LogEntry> {
    let time_written = reader.read_i64()?;
    let chunk_id = reader.read_i64()?;
    let previous_batch_position = if reader.read_flag()? {
        Some(reader.read_position()?)
    } else {
        None
    };
    Ok(LogEntry::ChunkStart(ChunkStartEntry {
        kernel_version,
        time_written,
        chunk_id,
        previous_batch_position,
    }))
}

fn decode_chunk_end(reader: &mut EntryReader<'_>, kernel_version: KernelVersion) -> io::Result<LogEntry> {
    let tx_id = reader.read_i64()?;
    let chunk_id = reader.read_i64()?;
    Ok(LogEntry::ChunkEnd(ChunkEndEntry {
        kernel_version,
        tx_id,
        chunk_id,
    }))
}

fn decode_legacy_checkpoint(reader: &mut EntryReader<'_>, _: KernelVersion) -> io::Result<LogEntry> {
    let log_position = reader.read_position()?;
    let time_written = reader.read_i64()?;
    let store_id = LegacyStoreId {
        creation_time: reader.read_i64()?,
        random_id: reader.read_i64()?,
        store_version: reader.read_i64()?,
    };
    let reason = reader.read_reason()?;
    Ok(LogEntry::Checkpoint(CheckpointEntry::Legacy(LegacyCheckpointEntry {
        log_position,
        time_written,
        store_id,
        reason,
    })))
}

fn decode_checkpoint_v5_0(reader: &mut EntryReader<'_>, _: KernelVersion) -> io::Result<LogEntry> {
    let id = reader.read_i64()?;
    let checksum = reader.read_i32()?;
    let commit_timestamp = reader.read_i64()?;
    let log_position = reader.read_position()?;
    let time_written = reader.read_i64()?;
    let store_id = reader.read_store_id()?;
    let reason = reader.read_reason()?;
    Ok(LogEntry::Checkpoint(CheckpointEntry::DetachedV5_0(DetachedCheckpointV5_0 {
        transaction_id: TransactionId::new(id, checksum, commit_timestamp, ConsensusIndex::Unknown),
        log_position,
        time_written,
        store_id,
        reason,
    })))
}

fn decode_checkpoint_v5_6(reader: &mut EntryReader<'_>, _: KernelVersion) -> io::Result<LogEntry> {
    let id = reader.read_i64()?;
    let checksum = reader.read_i32()?;
    let commit_timestamp = reader.read_i64()?;
    let consensus_index = if reader.read_flag()? {
        ConsensusIndex::Known(reader.read_i64()?)
    } else {
        ConsensusIndex::Unknown
    };
    let log_position = reader.read_position()?;
    let time_written = reader.read_i64()?;
    let store_id = reader.read_store_id()?;
    let reason = reader.read_reason()?;
    Ok(LogEntry::Checkpoint(CheckpointEntry::DetachedV5_6(DetachedCheckpointV5_6 {
        transaction_id: TransactionId::new(id, checksum, commit_timestamp, consensus_index),
        log_position,
        time_written,
        store_id,
        reason,
    })))
}

/// Reads one byte, distinguishing a clean end of input from an error
fn read_leading_byte(reader: &mut dyn Read) -> io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Decodes the entry at the reader's current position.
///
/// `seed` is the checksum of the previous entry. Only genuine I/O failures
/// are returned as `Err`; every kind of bad data is reported through
/// [`DecodeOutcome`] so the caller can decide between torn write and corruption.
pub fn decode_entry(reader: &mut dyn Read, seed: i32) -> io::Result<DecodeOutcome> {
    let kind = match read_leading_byte(reader)? {
        None | Some(0) => return Ok(DecodeOutcome::EndOfData),
        Some(kind) => kind,
    };
    let version = match read_leading_byte(reader)? {
        None => return Ok(DecodeOutcome::Truncated { consumed: 1 }),
        Some(version) => version,
    };
    let Some((kernel_version, decode)) = decoder_for(kind, version) else {
        return Ok(DecodeOutcome::Unsupported { kind, version });
    };

    let mut entry_reader = EntryReader::new(reader, seed);
    entry_reader.feed(&[kind, version]);

    let entry = match decode(&mut entry_reader, kernel_version) {
        Ok(entry) => entry,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Ok(DecodeOutcome::Truncated {
                consumed: entry_reader.consumed,
            })
        }
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            return Ok(DecodeOutcome::Malformed {
                consumed: entry_reader.consumed,
                reason: e.to_string(),
            })
        }
        Err(e) => return Err(e),
    };

    let actual = entry_reader.checksum();
    let length = entry_reader.consumed + CHECKSUM_SIZE;
    let mut stored = [0u8; 4];
    match entry_reader.inner.read_exact(&mut stored) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Ok(DecodeOutcome::Truncated {
                consumed: entry_reader.consumed,
            })
        }
        Err(e) => return Err(e),
    }
    let expected = u32::from_be_bytes(stored);

    if expected != actual {
        return Ok(DecodeOutcome::ChecksumMismatch {
            expected,
            actual,
            length,
        });
    }

    Ok(DecodeOutcome::Entry(DecodedEntry {
        entry,
        checksum: actual as i32,
        length,
    }))
}
