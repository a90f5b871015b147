//! Segmented Log
//!
//! The machinery shared by the transaction log and the checkpoint log: one
//! active segment appended to under a mutex, rotation by size, and a
//! published end that bounds what readers may see.
//!
//! ## Concurrency Model
//! - Single writer: every append, force and rotation holds `active`
//! - Readers never touch `active`; they read files up to `published`
//! - A new segment is published only after its header is synced
//!
//! The transaction log also tracks the id of the last transaction it closed,
//! so ids only ever grow within one log.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::mem;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::LogSyncStrategy;
use crate::context::LogFilesContext;
use crate::entry::{LogEntry, LogEntryWriter};
use crate::error::{Result, TxLogError};
use crate::model::{LogPosition, BASE_TX_CHECKSUM};

use super::channel::{truncate_file, LogChannel};
use super::cursor::{open_segment, CursorStop, LogEntryCursor, ReadBound};
use super::header::{LogFileKind, LogHeader, LOG_HEADER_SIZE};
use super::naming::{sync_dir, LogFileNaming};

/// Where an append landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    pub position: LogPosition,
    /// Position just past the appended bytes, before any rotation
    pub end: LogPosition,
    /// Checksum of the last entry appended
    pub checksum: i32,
}

struct ActiveSegment {
    channel: LogChannel,
    last_checksum: i32,
    /// Id carried by the last commit or chunk end; transaction log only
    last_tx_id: Option<i64>,
    appends_since_force: usize,
    flushed: LogPosition,
}

pub(crate) struct SegmentedLog {
    context: Arc<LogFilesContext>,
    naming: LogFileNaming,
    kind: LogFileKind,
    active: Mutex<ActiveSegment>,
    published: Arc<RwLock<LogPosition>>,
}

impl SegmentedLog {
    /// Opens the log, creating segment 0 if there is none.
    ///
    /// The tail of the highest segment is scanned: a torn final write, and
    /// for the transaction log an unfinished transaction, are cut off.
    /// Corruption anywhere else fails the open.
    pub(crate) fn open(context: Arc<LogFilesContext>, kind: LogFileKind) -> Result<Self> {
        let naming = naming_for(&context, kind);
        fs::create_dir_all(naming.dir())?;
        discard_incomplete_segment(&naming)?;

        let (channel, last_checksum, last_tx_id) = match naming.highest_version()? {
            None => {
                let last_tx_id = context.metadata().last_committed_transaction().id;
                let channel = create_segment(&context, &naming, kind, 0, BASE_TX_CHECKSUM, last_tx_id)?;
                sync_dir(naming.dir())?;
                info!(log = naming.base_name(), dir = %naming.dir().display(), "Created first log segment");
                (channel, BASE_TX_CHECKSUM, last_tx_id)
            }
            Some(highest) => open_tail(&context, &naming, kind, highest)?,
        };
        let last_tx_id = (kind == LogFileKind::Transaction).then_some(last_tx_id);

        let end = channel.log_position();
        debug!(log = naming.base_name(), %end, "Log opened");

        Ok(Self {
            context,
            naming,
            kind,
            active: Mutex::new(ActiveSegment {
                channel,
                last_checksum,
                last_tx_id,
                appends_since_force: 0,
                flushed: end,
            }),
            published: Arc::new(RwLock::new(end)),
        })
    }

    /// Encodes entries through `encode` and writes them with a single write.
    ///
    /// Rotation is checked after the write, so the entries never straddle
    /// two segments.
    pub(crate) fn append<F>(&self, encode: F) -> Result<AppendResult>
    where
        F: FnOnce(&mut LogEntryWriter) -> Result<()>,
    {
        self.context.health().assert_healthy()?;
        let mut active = self.active.lock();
        self.append_locked(&mut active, None, encode)
    }

    /// Appends a run of transaction entries closed by `tx_id`.
    ///
    /// A run that opens a transaction needs an id above the last one closed;
    /// a chunk continuing a transaction must carry that transaction's id.
    pub(crate) fn append_transaction<F>(&self, tx_id: i64, continues: bool, encode: F) -> Result<AppendResult>
    where
        F: FnOnce(&mut LogEntryWriter) -> Result<()>,
    {
        self.context.health().assert_healthy()?;
        let mut active = self.active.lock();
        if let Some(last) = active.last_tx_id {
            if continues && tx_id != last {
                return Err(TxLogError::InvalidEntry(format!(
                    "chunk of transaction {} continues after transaction {}",
                    tx_id, last
                )));
            }
            if !continues && tx_id <= last {
                return Err(TxLogError::InvalidEntry(format!(
                    "transaction {} is not after the last transaction {}",
                    tx_id, last
                )));
            }
        }

        self.append_locked(&mut active, Some(tx_id), encode)
    }

    fn append_locked<F>(&self, active: &mut ActiveSegment, closed_tx_id: Option<i64>, encode: F) -> Result<AppendResult>
    where
        F: FnOnce(&mut LogEntryWriter) -> Result<()>,
    {
        let mut writer = LogEntryWriter::new(active.last_checksum);
        encode(&mut writer)?;
        let bytes = writer.take_bytes();

        let position = active.channel.log_position();
        if let Err(e) = active.channel.write(&bytes) {
            return Err(self.panic(e.into()));
        }
        active.last_checksum = writer.checksum();
        if closed_tx_id.is_some() {
            active.last_tx_id = closed_tx_id;
        }
        active.appends_since_force += 1;
        let end = active.channel.log_position();

        if self.force_due(active) {
            self.force_locked(active)?;
        }
        *self.published.write() = end;

        if end.byte_offset >= self.rotation_threshold() {
            self.rotate_locked(active)?;
        }

        Ok(AppendResult {
            position,
            end,
            checksum: writer.checksum(),
        })
    }

    /// Forces the active segment and moves on to a new one
    pub(crate) fn rotate(&self) -> Result<u64> {
        self.context.health().assert_healthy()?;
        let mut active = self.active.lock();
        self.rotate_locked(&mut active)
    }

    pub(crate) fn force(&self) -> Result<()> {
        self.context.health().assert_healthy()?;
        let mut active = self.active.lock();
        self.force_locked(&mut active)
    }

    pub(crate) fn close(&self) -> Result<()> {
        let mut active = self.active.lock();
        if self.context.health().is_healthy() {
            self.force_locked(&mut active)?;
        }
        debug!(log = self.naming.base_name(), end = %active.channel.log_position(), "Log closed");
        Ok(())
    }

    /// End of the data readers may see
    pub(crate) fn current_position(&self) -> LogPosition {
        *self.published.read()
    }

    pub(crate) fn flushed_position(&self) -> LogPosition {
        self.active.lock().flushed
    }

    pub(crate) fn last_checksum(&self) -> i32 {
        self.active.lock().last_checksum
    }

    pub(crate) fn current_version(&self) -> u64 {
        self.published.read().log_version
    }

    pub(crate) fn naming(&self) -> &LogFileNaming {
        &self.naming
    }

    pub(crate) fn context(&self) -> &Arc<LogFilesContext> {
        &self.context
    }

    /// Cursor over published data starting at `position`
    pub(crate) fn open_cursor(&self, position: LogPosition) -> Result<LogEntryCursor> {
        LogEntryCursor::open(
            self.naming.clone(),
            self.kind,
            position,
            ReadBound::Published(Arc::clone(&self.published)),
            self.context.fail_on_corrupted_log_files(),
        )
    }

    fn rotation_threshold(&self) -> u64 {
        rotation_threshold(&self.context, self.kind)
    }

    fn force_due(&self, active: &ActiveSegment) -> bool {
        if self.kind == LogFileKind::Checkpoint {
            return false;
        }
        match self.context.config().sync_strategy {
            LogSyncStrategy::EveryAppend => true,
            LogSyncStrategy::EveryNAppends { count } => active.appends_since_force >= count,
        }
    }

    fn force_locked(&self, active: &mut ActiveSegment) -> Result<()> {
        if let Err(e) = active.channel.force() {
            return Err(self.panic(e.into()));
        }
        active.flushed = active.channel.log_position();
        active.appends_since_force = 0;
        Ok(())
    }

    fn rotate_locked(&self, active: &mut ActiveSegment) -> Result<u64> {
        self.force_locked(active)?;

        let from = active.channel.version();
        let next = from + 1;
        let last_tx_id = active
            .last_tx_id
            .unwrap_or_else(|| self.context.metadata().last_committed_transaction().id);
        let channel = create_segment(&self.context, &self.naming, self.kind, next, active.last_checksum, last_tx_id)
            .and_then(|channel| sync_dir(self.naming.dir()).map(|_| channel))
            .map_err(|e| self.panic(e))?;

        let start = channel.log_position();
        drop(mem::replace(&mut active.channel, channel));
        active.flushed = start;
        *self.published.write() = start;

        info!(log = self.naming.base_name(), from, to = next, "Rotated log segment");
        Ok(next)
    }

    fn panic(&self, err: TxLogError) -> TxLogError {
        self.context.health().panic(&err);
        err
    }
}

pub(crate) fn naming_for(context: &LogFilesContext, kind: LogFileKind) -> LogFileNaming {
    let dir = context.config().logs_dir.clone();
    match kind {
        LogFileKind::Transaction => LogFileNaming::transaction_log(dir),
        LogFileKind::Checkpoint => LogFileNaming::checkpoint_log(dir),
    }
}

pub(crate) fn rotation_threshold(context: &LogFilesContext, kind: LogFileKind) -> u64 {
    match kind {
        LogFileKind::Transaction => context.rotation_threshold(),
        LogFileKind::Checkpoint => context.config().checkpoint_rotation_threshold,
    }
}

pub(crate) fn preallocation_size(context: &LogFilesContext, kind: LogFileKind) -> Option<u64> {
    context.try_preallocate().then(|| rotation_threshold(context, kind))
}

fn create_segment(
    context: &LogFilesContext,
    naming: &LogFileNaming,
    kind: LogFileKind,
    version: u64,
    previous_checksum: i32,
    last_committed_tx_id: i64,
) -> Result<LogChannel> {
    let header = LogHeader {
        kind,
        log_version: version,
        previous_checksum,
        last_committed_tx_id,
        store_id: context.store_id(),
    };
    LogChannel::create(&naming.path_for(version), &header, preallocation_size(context, kind))
}

/// Scans the highest segment and opens it for appending after its last
/// complete write. Also returns the id of the last transaction closed in the
/// segment, or the one its header recorded when it holds none.
fn open_tail(
    context: &LogFilesContext,
    naming: &LogFileNaming,
    kind: LogFileKind,
    highest: u64,
) -> Result<(LogChannel, i32, i64)> {
    let (_, header) = open_segment(naming, kind, highest)?;
    let expected = context.store_id();
    if header.store_id != expected {
        return Err(TxLogError::StoreIdMismatch {
            expected,
            found: header.store_id,
        });
    }

    let mut cursor = LogEntryCursor::open(
        naming.clone(),
        kind,
        header.first_entry_position(),
        ReadBound::Physical { last_version: highest },
        true,
    )?;

    let mut boundary = (cursor.position(), cursor.checksum());
    let mut last_tx_id = header.last_committed_tx_id;
    let mut dangling = false;
    while let Some(entry) = cursor.next() {
        let entry = entry?;
        let closed_tx = match &entry.entry {
            LogEntry::Commit(commit) => Some(commit.tx_id),
            LogEntry::ChunkEnd(end) => Some(end.tx_id),
            _ => None,
        };
        let closes = kind == LogFileKind::Checkpoint || closed_tx.is_some();
        if closes {
            boundary = (entry.end, entry.checksum);
            last_tx_id = closed_tx.unwrap_or(last_tx_id);
            dangling = false;
        } else {
            dangling = true;
        }
    }
    let torn = matches!(cursor.stop(), Some(CursorStop::TornWrite { .. }));

    let (end, checksum) = boundary;
    let mut channel = LogChannel::open(&naming.path_for(highest), highest, end.byte_offset)?;
    if torn || dangling {
        warn!(
            log = naming.base_name(),
            %end,
            torn,
            dangling,
            "Discarding incomplete data at end of log"
        );
        channel.truncate(end.byte_offset, preallocation_size(context, kind))?;
    }
    Ok((channel, checksum, last_tx_id))
}

/// Deletes the highest segment if its header never made it to disk, which
/// happens when a rotation is interrupted.
pub(crate) fn discard_incomplete_segment(naming: &LogFileNaming) -> Result<bool> {
    let Some(highest) = naming.highest_version()? else {
        return Ok(false);
    };

    let path = naming.path_for(highest);
    let mut header = Vec::with_capacity(LOG_HEADER_SIZE as usize);
    File::open(&path)?.take(LOG_HEADER_SIZE).read_to_end(&mut header)?;
    if header.len() as u64 == LOG_HEADER_SIZE && header.iter().any(|&b| b != 0) {
        return Ok(false);
    }

    warn!(log = naming.base_name(), version = highest, "Removing segment with incomplete header");
    naming.delete(highest)?;
    sync_dir(naming.dir())?;
    Ok(true)
}

/// Cuts a log at `position`: the segment holding it is truncated there and
/// every later segment is deleted.
pub(crate) fn truncate_log(naming: &LogFileNaming, position: LogPosition, preallocate_to: Option<u64>) -> Result<()> {
    let file = match OpenOptions::new().write(true).open(naming.path_for(position.log_version)) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(TxLogError::corrupted(position, "cannot truncate a missing segment"))
        }
        Err(e) => return Err(e.into()),
    };
    truncate_file(&file, position.byte_offset, preallocate_to)?;

    for version in naming.versions()? {
        if version > position.log_version {
            naming.delete(version)?;
        }
    }
    sync_dir(naming.dir())?;
    info!(log = naming.base_name(), %position, "Truncated log");
    Ok(())
}
