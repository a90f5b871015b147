//! Kernel versions
//!
//! Tags the entry layout that was in use when an entry was written.

use std::fmt;

/// On-disk entry layout generation.
///
/// Declaration order is chronological, so the derived `Ord` compares
/// versions by age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KernelVersion {
    /// Legacy layout: checkpoints carry no transaction id
    V4_2,
    /// First detached checkpoint layout with transaction id and full store id
    V5_0,
    /// Adds the consensus index to checkpoints and chunked transactions
    V5_6,
}

impl KernelVersion {
    pub const LATEST: KernelVersion = KernelVersion::V5_6;

    pub const ALL: [KernelVersion; 3] = [KernelVersion::V4_2, KernelVersion::V5_0, KernelVersion::V5_6];

    /// Byte written after the entry kind
    pub fn version_byte(self) -> u8 {
        match self {
            KernelVersion::V4_2 => 0x42,
            KernelVersion::V5_0 => 0x50,
            KernelVersion::V5_6 => 0x56,
        }
    }

    pub fn from_version_byte(byte: u8) -> Option<Self> {
        match byte {
            0x42 => Some(KernelVersion::V4_2),
            0x50 => Some(KernelVersion::V5_0),
            0x56 => Some(KernelVersion::V5_6),
            _ => None,
        }
    }

    /// Whether transactions may be split into chunks with this layout
    pub fn supports_chunks(self) -> bool {
        self >= KernelVersion::V5_6
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KernelVersion::V4_2 => "4.2",
            KernelVersion::V5_0 => "5.0",
            KernelVersion::V5_6 => "5.6",
        };
        write!(f, "{}", name)
    }
}
