//! Log positions

use std::fmt;

/// An exact byte in the logical log stream.
///
/// `log_version` selects the segment file, `byte_offset` is the offset inside it.
/// Ordering is lexicographic on (version, offset), which the derive gives us
/// from the field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPosition {
    pub log_version: u64,
    pub byte_offset: u64,
}

impl LogPosition {
    pub const fn new(log_version: u64, byte_offset: u64) -> Self {
        Self {
            log_version,
            byte_offset,
        }
    }

    /// Same segment, different offset
    pub fn with_offset(self, byte_offset: u64) -> Self {
        Self::new(self.log_version, byte_offset)
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogPosition{{version={}, offset={}}}", self.log_version, self.byte_offset)
    }
}
