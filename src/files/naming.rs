//! Segment file naming
//!
//! Segments are `{base}.{version}` in the logs directory, versions strictly
//! increasing from 0.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub const TRANSACTION_LOG_BASE_NAME: &str = "transaction.log";
pub const CHECKPOINT_LOG_BASE_NAME: &str = "checkpoint.log";

/// Maps segment versions to paths for one log
#[derive(Debug, Clone)]
pub struct LogFileNaming {
    dir: PathBuf,
    base_name: &'static str,
}

impl LogFileNaming {
    pub fn new(dir: impl Into<PathBuf>, base_name: &'static str) -> Self {
        Self {
            dir: dir.into(),
            base_name,
        }
    }

    pub fn transaction_log(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, TRANSACTION_LOG_BASE_NAME)
    }

    pub fn checkpoint_log(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, CHECKPOINT_LOG_BASE_NAME)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn base_name(&self) -> &'static str {
        self.base_name
    }

    pub fn path_for(&self, version: u64) -> PathBuf {
        self.dir.join(format!("{}.{}", self.base_name, version))
    }

    /// Version encoded in `file_name`, if it names a segment of this log
    pub fn parse_version(&self, file_name: &str) -> Option<u64> {
        file_name
            .strip_prefix(self.base_name)?
            .strip_prefix('.')?
            .parse()
            .ok()
    }

    /// All segment versions present, ascending. A missing directory has none.
    pub fn versions(&self) -> Result<Vec<u64>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(version) = entry.file_name().to_str().and_then(|n| self.parse_version(n)) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    pub fn lowest_version(&self) -> Result<Option<u64>> {
        Ok(self.versions()?.first().copied())
    }

    pub fn highest_version(&self) -> Result<Option<u64>> {
        Ok(self.versions()?.last().copied())
    }

    pub fn exists(&self, version: u64) -> bool {
        self.path_for(version).is_file()
    }

    /// Removes a segment; an already missing one is not an error
    pub fn delete(&self, version: u64) -> Result<()> {
        match fs::remove_file(self.path_for(version)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Makes file creations and deletions in `dir` durable
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}
