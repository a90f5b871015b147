//! Segment Header
//!
//! Every segment of either log starts with a fixed-size header.
//!
//! ## Header Layout (128 bytes, big-endian)
//! ```text
//! ┌───────────┬────────────┬──────────┬─────────────────┬───────────────────┐
//! │ Magic (4) │ Format (1) │ Kind (1) │ Log Version (8) │ Prev Checksum (4) │
//! ├───────────┴────────────┴──────────┴─────────────────┴───────────────────┤
//! │ Last Committed Tx (8) │ Store Id (creation, random, engine, format,    │
//! │                       │ major, minor)                                   │
//! ├───────────────────────┴─────────────────────────────────────────────────┤
//! │ zero padding                                                 │ CRC (4) │
//! └──────────────────────────────────────────────────────────────┴─────────┘
//! ```
//!
//! The previous checksum seeds the checksum chain of the first entry in the
//! segment, so the chain runs unbroken across rotations.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, TxLogError};
use crate::model::{LogPosition, StoreId};

pub const LOG_HEADER_SIZE: u64 = 128;

const MAGIC: &[u8; 4] = b"TXLG";
const HEADER_FORMAT: u8 = 1;
const CRC_OFFSET: usize = LOG_HEADER_SIZE as usize - 4;
const MAX_NAME_LEN: usize = 36;

/// Which log a segment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogFileKind {
    Transaction = 1,
    Checkpoint = 2,
}

impl LogFileKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(LogFileKind::Transaction),
            2 => Some(LogFileKind::Checkpoint),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHeader {
    pub kind: LogFileKind,
    pub log_version: u64,
    /// Seed for the first entry's checksum
    pub previous_checksum: i32,
    pub last_committed_tx_id: i64,
    pub store_id: StoreId,
}

impl LogHeader {
    pub fn encode(&self) -> Result<[u8; LOG_HEADER_SIZE as usize]> {
        for name in [&self.store_id.storage_engine_name, &self.store_id.format_name] {
            if name.len() > MAX_NAME_LEN {
                return Err(TxLogError::Config(format!(
                    "store id name '{}' is longer than {} bytes",
                    name, MAX_NAME_LEN
                )));
            }
        }

        let mut buf = BytesMut::with_capacity(LOG_HEADER_SIZE as usize);
        buf.put_slice(MAGIC);
        buf.put_u8(HEADER_FORMAT);
        buf.put_u8(self.kind as u8);
        buf.put_u64(self.log_version);
        buf.put_i32(self.previous_checksum);
        buf.put_i64(self.last_committed_tx_id);
        buf.put_i64(self.store_id.creation_time);
        buf.put_i64(self.store_id.random_id);
        buf.put_i32(self.store_id.major_version);
        buf.put_i32(self.store_id.minor_version);
        buf.put_u8(self.store_id.storage_engine_name.len() as u8);
        buf.put_slice(self.store_id.storage_engine_name.as_bytes());
        buf.put_u8(self.store_id.format_name.len() as u8);
        buf.put_slice(self.store_id.format_name.as_bytes());
        buf.resize(CRC_OFFSET, 0);

        let crc = crc32fast::hash(&buf);
        buf.put_u32(crc);

        let mut out = [0u8; LOG_HEADER_SIZE as usize];
        out.copy_from_slice(&buf);
        Ok(out)
    }

    /// Parses a header. `version` is only used to place errors.
    pub fn decode(bytes: &[u8; LOG_HEADER_SIZE as usize], version: u64) -> Result<Self> {
        let at = LogPosition::new(version, 0);

        let stored = u32::from_be_bytes([
            bytes[CRC_OFFSET],
            bytes[CRC_OFFSET + 1],
            bytes[CRC_OFFSET + 2],
            bytes[CRC_OFFSET + 3],
        ]);
        let computed = crc32fast::hash(&bytes[..CRC_OFFSET]);
        if stored != computed {
            return Err(TxLogError::corrupted(
                at,
                format!("header checksum mismatch: stored={:08x}, computed={:08x}", stored, computed),
            ));
        }

        let mut buf = &bytes[..CRC_OFFSET];
        if &buf[..4] != MAGIC {
            return Err(TxLogError::corrupted(at, "bad segment magic"));
        }
        buf.advance(4);

        let format = buf.get_u8();
        if format != HEADER_FORMAT {
            return Err(TxLogError::corrupted(at, format!("unknown header format {}", format)));
        }
        let kind = LogFileKind::from_byte(buf.get_u8())
            .ok_or_else(|| TxLogError::corrupted(at, "unknown segment kind"))?;
        let log_version = buf.get_u64();
        let previous_checksum = buf.get_i32();
        let last_committed_tx_id = buf.get_i64();
        let creation_time = buf.get_i64();
        let random_id = buf.get_i64();
        let major_version = buf.get_i32();
        let minor_version = buf.get_i32();
        let engine = take_name(&mut buf).ok_or_else(|| TxLogError::corrupted(at, "bad engine name"))?;
        let format_name = take_name(&mut buf).ok_or_else(|| TxLogError::corrupted(at, "bad format name"))?;

        if log_version != version {
            return Err(TxLogError::corrupted(
                at,
                format!("header claims version {} but file is version {}", log_version, version),
            ));
        }

        Ok(Self {
            kind,
            log_version,
            previous_checksum,
            last_committed_tx_id,
            store_id: StoreId::new(
                creation_time,
                random_id,
                engine,
                format_name,
                major_version,
                minor_version,
            ),
        })
    }

    /// Reads the header at the start of `file`
    pub fn read_from(file: &mut File, version: u64) -> Result<Self> {
        let mut bytes = [0u8; LOG_HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        match file.read_exact(&mut bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(TxLogError::corrupted(
                    LogPosition::new(version, 0),
                    "segment is shorter than its header",
                ))
            }
            Err(e) => return Err(e.into()),
        }
        Self::decode(&bytes, version)
    }

    /// Position of the first entry in this segment
    pub fn first_entry_position(&self) -> LogPosition {
        LogPosition::new(self.log_version, LOG_HEADER_SIZE)
    }
}

fn take_name(buf: &mut &[u8]) -> Option<String> {
    if !buf.has_remaining() {
        return None;
    }
    let len = buf.get_u8() as usize;
    if len > MAX_NAME_LEN || buf.remaining() < len {
        return None;
    }
    let name = std::str::from_utf8(&buf[..len]).ok()?.to_string();
    buf.advance(len);
    Some(name)
}
