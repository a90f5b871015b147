//! Log Entry Cursor
//!
//! Reads entries forward from a position, following the segment chain and
//! verifying the checksum chain as it goes.
//!
//! ## Stop Conditions
//! - clean end: end of written data in the last readable segment, with
//!   nothing but zeros after it
//! - torn write: a bad entry in the last segment with no valid entry
//!   anywhere after its start
//! - corruption: any other bad entry, or data after a zero kind byte; an
//!   error when the cursor is strict
//!
//! Entries of an unknown (kind, version) pair are always an error.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::entry::{decode_entry, is_known_entry, DecodeOutcome, LogEntry, CHECKSUM_SIZE};
use crate::error::{Result, TxLogError};
use crate::model::LogPosition;

use super::header::{LogFileKind, LogHeader, LOG_HEADER_SIZE};
use super::naming::LogFileNaming;

/// How far a cursor may read
#[derive(Clone)]
pub(crate) enum ReadBound {
    /// Whatever is on disk, up to and including `last_version`
    Physical { last_version: u64 },
    /// Up to the end published by the log's writer
    Published(Arc<RwLock<LogPosition>>),
}

impl ReadBound {
    fn end(&self) -> Option<LogPosition> {
        match self {
            ReadBound::Physical { .. } => None,
            ReadBound::Published(end) => Some(*end.read()),
        }
    }

    fn last_version(&self) -> u64 {
        match self {
            ReadBound::Physical { last_version } => *last_version,
            ReadBound::Published(end) => end.read().log_version,
        }
    }
}

/// Why a cursor stopped returning entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorStop {
    EndOfLog,
    /// Incomplete final write starting at `position`
    TornWrite { position: LogPosition },
    Corrupted { position: LogPosition, reason: String },
}

/// A decoded entry with where it sits in the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedEntry {
    pub entry: LogEntry,
    pub checksum: i32,
    pub position: LogPosition,
    /// Position just past the entry
    pub end: LogPosition,
}

pub struct LogEntryCursor {
    naming: LogFileNaming,
    kind: LogFileKind,
    bound: ReadBound,
    fail_on_corruption: bool,
    reader: BufReader<File>,
    position: LogPosition,
    checksum: i32,
    stop: Option<CursorStop>,
}

impl LogEntryCursor {
    /// Opens a cursor at `position`, which must be an entry boundary or the
    /// end of a segment header.
    pub(crate) fn open(
        naming: LogFileNaming,
        kind: LogFileKind,
        position: LogPosition,
        bound: ReadBound,
        fail_on_corruption: bool,
    ) -> Result<Self> {
        if position.log_version > bound.last_version() || bound.end().map_or(false, |end| position > end) {
            return Err(TxLogError::corrupted(position, "position is beyond the end of the log"));
        }
        if position.byte_offset < LOG_HEADER_SIZE {
            return Err(TxLogError::corrupted(position, "position points inside the segment header"));
        }

        let (mut file, header) = open_segment(&naming, kind, position.log_version)?;

        let checksum = if position.byte_offset == LOG_HEADER_SIZE {
            header.previous_checksum
        } else {
            // the checksum of the entry ending here seeds the next one
            let mut stored = [0u8; CHECKSUM_SIZE as usize];
            file.seek(SeekFrom::Start(position.byte_offset - CHECKSUM_SIZE))?;
            match file.read_exact(&mut stored) {
                Ok(()) => i32::from_be_bytes(stored),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(TxLogError::corrupted(position, "position is beyond the end of the segment"))
                }
                Err(e) => return Err(e.into()),
            }
        };
        file.seek(SeekFrom::Start(position.byte_offset))?;

        Ok(Self {
            naming,
            kind,
            bound,
            fail_on_corruption,
            reader: BufReader::new(file),
            position,
            checksum,
            stop: None,
        })
    }

    /// Position of the next entry to read
    pub fn position(&self) -> LogPosition {
        self.position
    }

    /// Checksum of the last entry read (or the seed before the first)
    pub fn checksum(&self) -> i32 {
        self.checksum
    }

    /// Why the cursor stopped; `None` while it can still return entries
    pub fn stop(&self) -> Option<&CursorStop> {
        self.stop.as_ref()
    }

    fn read_one(&mut self) -> io::Result<DecodeOutcome> {
        match self.remaining_in_segment() {
            Some(0) => Ok(DecodeOutcome::EndOfData),
            Some(remaining) => {
                // the writer may have filled bytes we buffered earlier
                self.reader.seek(SeekFrom::Start(self.position.byte_offset))?;
                let mut limited = (&mut self.reader).take(remaining);
                decode_entry(&mut limited, self.checksum)
            }
            None => decode_entry(&mut self.reader, self.checksum),
        }
    }

    /// Bytes readable in the current segment, when bounded by a published end
    fn remaining_in_segment(&self) -> Option<u64> {
        let end = self.bound.end()?;
        if end.log_version != self.position.log_version {
            return None;
        }
        Some(end.byte_offset.saturating_sub(self.position.byte_offset))
    }

    /// End of the readable bytes of the current segment
    fn segment_end(&self) -> io::Result<u64> {
        match self.bound.end() {
            Some(end) if end.log_version == self.position.log_version => Ok(end.byte_offset),
            _ => Ok(self.reader.get_ref().metadata()?.len()),
        }
    }

    /// True when only zero bytes lie between the cursor and the segment end
    fn only_zeros_follow(&mut self) -> io::Result<bool> {
        let end = self.segment_end()?;
        self.reader.seek(SeekFrom::Start(self.position.byte_offset))?;
        let mut rest = (&mut self.reader).take(end.saturating_sub(self.position.byte_offset));
        let mut chunk = [0u8; 8192];
        loop {
            let read = match rest.read(&mut chunk) {
                Ok(0) => return Ok(true),
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if chunk[..read].iter().any(|&b| b != 0) {
                return Ok(false);
            }
        }
    }

    /// True when a complete entry with a matching checksum starts anywhere
    /// after the cursor in the current segment.
    ///
    /// Every offset holding a known (kind, version) pair is tried, seeded
    /// with the four bytes before it as the previous entry's checksum.
    fn valid_entry_follows(&mut self) -> io::Result<bool> {
        let end = self.segment_end()?;
        let mut candidate = File::open(self.naming.path_for(self.position.log_version))?;

        // seed bytes of the first candidate, one byte past the bad entry
        let scan_start = self.position.byte_offset + 1 - CHECKSUM_SIZE;
        self.reader.seek(SeekFrom::Start(scan_start))?;

        // [seed; 4] [kind] [version]
        let mut window = [0u8; 6];
        let mut offset = scan_start;
        for byte in (&mut self.reader).take(end.saturating_sub(scan_start)).bytes() {
            window.copy_within(1.., 0);
            window[5] = byte?;
            offset += 1;
            if offset < scan_start + window.len() as u64 || !is_known_entry(window[4], window[5]) {
                continue;
            }

            let entry_start = offset - 2;
            let seed = i32::from_be_bytes([window[0], window[1], window[2], window[3]]);
            candidate.seek(SeekFrom::Start(entry_start))?;
            let mut entry = BufReader::new(&mut candidate).take(end - entry_start);
            if let DecodeOutcome::Entry(_) = decode_entry(&mut entry, seed)? {
                debug!(log = self.naming.base_name(), offset = entry_start, "Valid entry after bad entry");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// A bad entry is a torn write only at the end of the last segment
    fn is_torn(&mut self) -> io::Result<bool> {
        if self.position.log_version != self.bound.last_version() {
            return Ok(false);
        }
        Ok(!self.valid_entry_follows()?)
    }

    fn advance_segment(&mut self) -> Result<()> {
        let next = self.position.log_version + 1;
        let (mut file, header) = open_segment(&self.naming, self.kind, next)?;
        if header.previous_checksum != self.checksum {
            return Err(TxLogError::corrupted(
                header.first_entry_position(),
                format!(
                    "checksum chain broken across segments: header seed {:08x}, previous entry {:08x}",
                    header.previous_checksum, self.checksum
                ),
            ));
        }
        file.seek(SeekFrom::Start(LOG_HEADER_SIZE))?;
        self.reader = BufReader::new(file);
        self.position = header.first_entry_position();
        debug!(log = self.naming.base_name(), version = next, "Cursor moved to next segment");
        Ok(())
    }

    /// Stops at a bad entry, deciding between torn write and corruption
    fn stop_at_bad_entry(&mut self, reason: String) -> Option<Result<PositionedEntry>> {
        let position = self.position;
        let torn = match self.is_torn() {
            Ok(torn) => torn,
            Err(e) => return self.fail(e.into()),
        };
        if torn {
            warn!(log = self.naming.base_name(), %position, reason = %reason, "Torn write at end of log");
            self.stop = Some(CursorStop::TornWrite { position });
            return None;
        }
        self.corrupt_at(reason)
    }

    fn corrupt_at(&mut self, reason: String) -> Option<Result<PositionedEntry>> {
        let position = self.position;
        self.stop = Some(CursorStop::Corrupted {
            position,
            reason: reason.clone(),
        });
        if self.fail_on_corruption {
            Some(Err(TxLogError::corrupted(position, reason)))
        } else {
            warn!(log = self.naming.base_name(), %position, reason = %reason, "Stopping at corrupted entry");
            None
        }
    }

    fn fail(&mut self, err: TxLogError) -> Option<Result<PositionedEntry>> {
        self.stop = Some(CursorStop::Corrupted {
            position: self.position,
            reason: err.to_string(),
        });
        Some(Err(err))
    }
}

impl Iterator for LogEntryCursor {
    type Item = Result<PositionedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stop.is_some() {
            return None;
        }

        loop {
            let outcome = match self.read_one() {
                Ok(outcome) => outcome,
                Err(e) => return self.fail(e.into()),
            };

            return match outcome {
                DecodeOutcome::Entry(decoded) => {
                    let position = self.position;
                    self.position = position.with_offset(position.byte_offset + decoded.length);
                    self.checksum = decoded.checksum;
                    Some(Ok(PositionedEntry {
                        entry: decoded.entry,
                        checksum: decoded.checksum,
                        position,
                        end: self.position,
                    }))
                }
                DecodeOutcome::EndOfData => {
                    if self.position.log_version < self.bound.last_version() {
                        if let Err(e) = self.advance_segment() {
                            return self.fail(e);
                        }
                        continue;
                    }
                    match self.only_zeros_follow() {
                        Ok(true) => {
                            self.stop = Some(CursorStop::EndOfLog);
                            None
                        }
                        Ok(false) => self.corrupt_at(format!(
                            "data after a zero kind byte at offset {}",
                            self.position.byte_offset
                        )),
                        Err(e) => self.fail(e.into()),
                    }
                }
                DecodeOutcome::Unsupported { kind, version } => self.fail(TxLogError::UnsupportedFormatVersion {
                    kind,
                    version,
                    position: self.position,
                }),
                DecodeOutcome::Truncated { consumed } => {
                    self.stop_at_bad_entry(format!("entry cut off after {} bytes", consumed))
                }
                DecodeOutcome::ChecksumMismatch { expected, actual, .. } => self.stop_at_bad_entry(format!(
                    "checksum mismatch: stored={:08x}, computed={:08x}",
                    expected, actual
                )),
                DecodeOutcome::Malformed { reason, .. } => self.stop_at_bad_entry(reason),
            };
        }
    }
}

/// Opens a segment for reading and validates its header
pub(crate) fn open_segment(naming: &LogFileNaming, kind: LogFileKind, version: u64) -> Result<(File, LogHeader)> {
    let path = naming.path_for(version);
    let mut file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(TxLogError::corrupted(
                LogPosition::new(version, 0),
                format!("missing segment {}", path.display()),
            ))
        }
        Err(e) => return Err(e.into()),
    };
    let header = LogHeader::read_from(&mut file, version)?;
    if header.kind != kind {
        return Err(TxLogError::corrupted(
            LogPosition::new(version, 0),
            format!("expected a {:?} segment, found {:?}", kind, header.kind),
        ));
    }
    Ok((file, header))
}
