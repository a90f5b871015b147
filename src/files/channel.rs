//! Log Channel
//!
//! Positioned writes to one segment file. The owner serializes access.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::LogPosition;

use super::header::{LogHeader, LOG_HEADER_SIZE};

/// Write handle for one segment
pub struct LogChannel {
    file: File,
    path: PathBuf,
    version: u64,
    /// Next write offset
    position: u64,
}

impl LogChannel {
    /// Creates a new segment: header first, then optional zero
    /// preallocation, then a full sync.
    ///
    /// The file is created exclusively; an existing segment is never
    /// overwritten.
    pub fn create(path: &Path, header: &LogHeader, preallocate_to: Option<u64>) -> Result<Self> {
        let bytes = header.encode()?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        file.write_all(&bytes)?;
        if let Some(size) = preallocate_to {
            if size > LOG_HEADER_SIZE {
                file.set_len(size)?;
            }
        }
        file.sync_all()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            version: header.log_version,
            position: LOG_HEADER_SIZE,
        })
    }

    /// Opens an existing segment for appending at `position`
    pub fn open(path: &Path, version: u64, position: u64) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            version,
            position,
        })
    }

    /// Writes `bytes` at the current position in one call
    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(self.position))?;
        self.file.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Flushes written data to stable storage
    pub fn force(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }

    /// Cuts the segment at `offset`, re-zeroing up to `preallocate_to`
    pub fn truncate(&mut self, offset: u64, preallocate_to: Option<u64>) -> io::Result<()> {
        truncate_file(&self.file, offset, preallocate_to)?;
        self.position = offset;
        Ok(())
    }

    pub fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn log_position(&self) -> LogPosition {
        LogPosition::new(self.version, self.position)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Truncates `file` at `offset` and syncs. With preallocation the tail is
/// re-extended with zeros so that stale bytes never follow the cut.
pub(crate) fn truncate_file(file: &File, offset: u64, preallocate_to: Option<u64>) -> io::Result<()> {
    file.set_len(offset)?;
    if let Some(size) = preallocate_to {
        if size > offset {
            file.set_len(size)?;
        }
    }
    file.sync_all()
}
