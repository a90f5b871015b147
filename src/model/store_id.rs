//! Store identity

use std::fmt;

/// Identifies the store a log belongs to.
///
/// Every segment header carries one; opening a segment whose store id
/// differs from the store's own is a fatal integrity error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreId {
    pub creation_time: i64,
    pub random_id: i64,
    pub storage_engine_name: String,
    pub format_name: String,
    pub major_version: i32,
    pub minor_version: i32,
}

impl StoreId {
    pub fn new(
        creation_time: i64,
        random_id: i64,
        storage_engine_name: impl Into<String>,
        format_name: impl Into<String>,
        major_version: i32,
        minor_version: i32,
    ) -> Self {
        Self {
            creation_time,
            random_id,
            storage_engine_name: storage_engine_name.into(),
            format_name: format_name.into(),
            major_version,
            minor_version,
        }
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StoreId{{creation={}, random={}, engine={}, format={}, v{}.{}}}",
            self.creation_time,
            self.random_id,
            self.storage_engine_name,
            self.format_name,
            self.major_version,
            self.minor_version
        )
    }
}

/// Store identity as written by 4.2-era checkpoints.
///
/// Only the creation time and random id survive the conversion; engine and
/// format are reported as `"legacy"` with version 1.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LegacyStoreId {
    pub creation_time: i64,
    pub random_id: i64,
    pub store_version: i64,
}

impl LegacyStoreId {
    pub const LEGACY_NAME: &'static str = "legacy";

    pub fn to_store_id(self) -> StoreId {
        StoreId::new(
            self.creation_time,
            self.random_id,
            Self::LEGACY_NAME,
            Self::LEGACY_NAME,
            1,
            1,
        )
    }
}

impl From<&StoreId> for LegacyStoreId {
    fn from(store_id: &StoreId) -> Self {
        let store_version =
            ((store_id.major_version as i64) << 32) | (store_id.minor_version as u32 as i64);
        Self {
            creation_time: store_id.creation_time,
            random_id: store_id.random_id,
            store_version,
        }
    }
}
