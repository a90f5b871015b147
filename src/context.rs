//! Log Files Context
//!
//! Configuration plus the cross-cutting providers every log component needs.
//! Built once per open store and shared read-only (`Arc<LogFilesContext>`).
//! The rotation threshold and preallocation flag are atomics owned by
//! whoever created them; the context only reads them.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::config::LogConfig;
use crate::error::{Result, TxLogError};
use crate::model::{ConsensusIndex, KernelVersion, StoreId, TransactionId, BASE_TX_ID};

// =============================================================================
// Metadata Provider
// =============================================================================

/// Store-side transaction bookkeeping the log consults and updates
pub trait MetadataProvider: Send + Sync {
    fn store_id(&self) -> StoreId;

    fn last_committed_transaction(&self) -> TransactionId;

    /// Reserves and returns the id of the next transaction to commit
    fn next_committing_transaction_id(&self) -> i64;

    fn transaction_committed(
        &self,
        transaction_id: i64,
        checksum: i32,
        commit_timestamp: i64,
        consensus_index: ConsensusIndex,
    );

    /// Layout new entries are written with
    fn kernel_version(&self) -> KernelVersion;
}

struct MetadataState {
    last_committed: TransactionId,
    committing: i64,
}

/// Metadata kept in memory, for bootstrap and tests
pub struct InMemoryMetadata {
    store_id: StoreId,
    kernel_version: KernelVersion,
    state: Mutex<MetadataState>,
}

impl InMemoryMetadata {
    pub fn new(store_id: StoreId) -> Self {
        Self {
            store_id,
            kernel_version: KernelVersion::LATEST,
            state: Mutex::new(MetadataState {
                last_committed: TransactionId::base(),
                committing: BASE_TX_ID,
            }),
        }
    }

    pub fn with_kernel_version(mut self, kernel_version: KernelVersion) -> Self {
        self.kernel_version = kernel_version;
        self
    }

    pub fn with_last_committed(self, transaction: TransactionId) -> Self {
        {
            let mut state = self.state.lock();
            state.last_committed = transaction;
            state.committing = transaction.id;
        }
        self
    }
}

impl MetadataProvider for InMemoryMetadata {
    fn store_id(&self) -> StoreId {
        self.store_id.clone()
    }

    fn last_committed_transaction(&self) -> TransactionId {
        self.state.lock().last_committed
    }

    fn next_committing_transaction_id(&self) -> i64 {
        let mut state = self.state.lock();
        state.committing += 1;
        state.committing
    }

    fn transaction_committed(
        &self,
        transaction_id: i64,
        checksum: i32,
        commit_timestamp: i64,
        consensus_index: ConsensusIndex,
    ) {
        let mut state = self.state.lock();
        if transaction_id > state.last_committed.id {
            state.last_committed =
                TransactionId::new(transaction_id, checksum, commit_timestamp, consensus_index);
        }
        state.committing = state.committing.max(transaction_id);
    }

    fn kernel_version(&self) -> KernelVersion {
        self.kernel_version
    }
}

// =============================================================================
// Health
// =============================================================================

/// Fail-fast signal raised on unrecoverable log failures
pub trait DatabaseHealth: Send + Sync {
    fn panic(&self, cause: &TxLogError);

    fn is_healthy(&self) -> bool;

    fn assert_healthy(&self) -> Result<()>;
}

/// Latches the first failure and logs it
#[derive(Default)]
pub struct HealthMonitor {
    cause: Mutex<Option<String>>,
}

impl DatabaseHealth for HealthMonitor {
    fn panic(&self, cause: &TxLogError) {
        let mut slot = self.cause.lock();
        if slot.is_none() {
            tracing::error!(error = %cause, "Log subsystem panic, refusing further writes");
            *slot = Some(cause.to_string());
        }
    }

    fn is_healthy(&self) -> bool {
        self.cause.lock().is_none()
    }

    fn assert_healthy(&self) -> Result<()> {
        match self.cause.lock().as_ref() {
            None => Ok(()),
            Some(cause) => Err(TxLogError::Unhealthy(cause.clone())),
        }
    }
}

// =============================================================================
// Clock
// =============================================================================

pub trait Clock: Send + Sync {
    /// Wall-clock time in milliseconds since the epoch
    fn millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(millis: i64) -> Self {
        Self {
            now: AtomicI64::new(millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Context
// =============================================================================

pub struct LogFilesContext {
    config: LogConfig,
    rotation_threshold: Arc<AtomicU64>,
    try_preallocate: Arc<AtomicBool>,
    metadata: Arc<dyn MetadataProvider>,
    health: Arc<dyn DatabaseHealth>,
    clock: Arc<dyn Clock>,
}

impl LogFilesContext {
    /// Context with a fresh health monitor, the system clock and atomics
    /// seeded from `config`.
    pub fn new(config: LogConfig, metadata: Arc<dyn MetadataProvider>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            rotation_threshold: Arc::new(AtomicU64::new(config.rotation_threshold)),
            try_preallocate: Arc::new(AtomicBool::new(config.preallocate)),
            config,
            metadata,
            health: Arc::new(HealthMonitor::default()),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_health(mut self, health: Arc<dyn DatabaseHealth>) -> Self {
        self.health = health;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share an externally owned rotation threshold
    pub fn with_rotation_threshold(mut self, threshold: Arc<AtomicU64>) -> Self {
        self.rotation_threshold = threshold;
        self
    }

    /// Share an externally owned preallocation flag
    pub fn with_preallocation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.try_preallocate = flag;
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn rotation_threshold(&self) -> u64 {
        self.rotation_threshold.load(Ordering::Acquire)
    }

    pub fn rotation_threshold_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.rotation_threshold)
    }

    pub fn try_preallocate(&self) -> bool {
        self.try_preallocate.load(Ordering::Acquire)
    }

    pub fn preallocation_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.try_preallocate)
    }

    pub fn metadata(&self) -> &dyn MetadataProvider {
        self.metadata.as_ref()
    }

    pub fn health(&self) -> &dyn DatabaseHealth {
        self.health.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn store_id(&self) -> StoreId {
        self.metadata.store_id()
    }

    pub fn fail_on_corrupted_log_files(&self) -> bool {
        self.config.fail_on_corrupted_log_files
    }
}
