//! WAL-backed record store.
//!
//! Reads are served from an in-memory [`RecordIndex`]. Writes take the index
//! write lock, check the precondition, append to the WAL, and only then apply
//! to the index, so a crash between log and apply is healed by replay and a
//! failed append leaves the index untouched.
//!
//! Once applied, a write is reported as successful. Compaction runs after it
//! and only logs its own failure; the next write retries it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::{debug, info, warn};

use crate::fact::{Fact, FactId, Scope};
use crate::identity::IdentityKey;
use crate::storage::index::RecordIndex;
use crate::storage::traits::{RecordStore, Retirement, StorageError, WriteCondition};

use super::file_lock::FileLock;
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "facts.wal";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn io_err(context: &'static str) -> impl Fn(std::io::Error) -> StorageError {
    move |e| StorageError::BackendError(format!("{context}: {e}"))
}

/// Durable record store backed by a write-ahead log.
pub struct PersistentRecordStore {
    index: RwLock<RecordIndex>,
    wal: WriteAheadLog,
    config: PersistentConfig,
    /// WAL size right after the last compaction (or at open).
    snapshot_bytes: AtomicU64,
    compactions: AtomicU64,
    dir: PathBuf,
    _lock: FileLock,
}

impl std::fmt::Debug for PersistentRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentRecordStore")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PersistentRecordStore {
    /// Open (or create) a store directory and replay its log.
    ///
    /// # Errors
    /// Returns `StorageError::BackendError` for I/O failures or if the
    /// directory is locked by another process.
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(io_err("create store directory"))?;
        let lock = FileLock::acquire(dir).map_err(io_err("lock store directory"))?;
        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
            .map_err(io_err("open WAL"))?;

        let mut index = RecordIndex::default();
        let mut replayed = 0u64;
        for entry in wal.iter().map_err(io_err("read WAL"))? {
            // `open` already truncated anything past the intact prefix.
            let entry = entry.map_err(io_err("replay WAL"))?;
            match entry.kind {
                WalEntryKind::Put { record } => index.apply_put(record),
                WalEntryKind::Restore { record } => index.apply_restore(record),
                WalEntryKind::Retire {
                    scope,
                    fact_id,
                    retirement,
                } => {
                    index.apply_retire(&scope, fact_id, retirement);
                }
                WalEntryKind::Purge { scope, fact_id } => {
                    index.apply_purge(&scope, fact_id);
                }
            }
            replayed += 1;
        }
        let snapshot_bytes = wal.size_bytes().map_err(io_err("stat WAL"))?;
        info!(dir = %dir.display(), replayed, bytes = snapshot_bytes, "opened persistent fact store");

        Ok(Self {
            index: RwLock::new(index),
            wal,
            config,
            snapshot_bytes: AtomicU64::new(snapshot_bytes),
            compactions: AtomicU64::new(0),
            dir: dir.to_path_buf(),
            _lock: lock,
        })
    }

    /// Directory holding the store files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rewrite the log as a snapshot of the current index.
    ///
    /// Returns the number of records written.
    ///
    /// # Errors
    /// Returns `StorageError::BackendError` on I/O failure; the previous log
    /// stays in place in that case.
    pub fn compact(&self) -> Result<u64, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("record.compact"))?;
        self.compact_locked(&index)
    }

    fn compact_locked(&self, index: &RecordIndex) -> Result<u64, StorageError> {
        let before = self.wal.size_bytes().unwrap_or(0);
        let written = self
            .wal
            .rewrite(index.records().map(|r| WalEntryKind::Restore { record: r.clone() }))
            .map_err(io_err("compact WAL"))?;
        let after = self.wal.size_bytes().map_err(io_err("stat WAL"))?;
        self.snapshot_bytes.store(after, Ordering::Relaxed);
        let compactions = self.compactions.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            records = written,
            before_bytes = before,
            after_bytes = after,
            compactions,
            "compacted fact WAL"
        );
        Ok(written)
    }

    /// Size the WAL must exceed before the next automatic compaction.
    ///
    /// At least `max_wal_size`, and at least twice the last snapshot, so live
    /// data larger than the limit does not trigger a rewrite on every write.
    fn compaction_threshold(&self) -> u64 {
        self.config
            .max_wal_size
            .max(self.snapshot_bytes.load(Ordering::Relaxed).saturating_mul(2))
    }

    fn log(&self, kind: WalEntryKind) -> Result<(), StorageError> {
        let seq = self.wal.append(kind).map_err(io_err("append WAL"))?;
        debug!(sequence = seq, "logged fact mutation");
        Ok(())
    }

    /// Compact after a committed write. Failure is logged, never returned.
    fn maybe_compact(&self, index: &RecordIndex) {
        let size = match self.wal.size_bytes() {
            Ok(size) => size,
            Err(e) => {
                warn!(error = %e, "could not stat WAL; skipping compaction");
                return;
            }
        };
        if size <= self.compaction_threshold() {
            return;
        }
        if let Err(e) = self.compact_locked(index) {
            warn!(
                dir = %self.dir.display(),
                wal_bytes = size,
                error = %e,
                "WAL compaction failed; the write itself is durable"
            );
        }
    }
}

impl RecordStore for PersistentRecordStore {
    fn get(&self, scope: &Scope, fact_id: FactId) -> Result<Option<Fact>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("record.get"))?;
        Ok(index.get(scope, fact_id))
    }

    fn get_version(
        &self,
        scope: &Scope,
        fact_id: FactId,
        version: u32,
    ) -> Result<Option<Fact>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("record.get_version"))?;
        Ok(index.get_version(scope, fact_id, version))
    }

    fn lineage(&self, scope: &Scope, fact_id: FactId) -> Result<Vec<Fact>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("record.lineage"))?;
        Ok(index.lineage(scope, fact_id))
    }

    fn put(&self, scope: &Scope, record: Fact, condition: WriteCondition) -> Result<(), StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("record.put"))?;
        index.check_put(scope, &record, &condition)?;
        self.log(WalEntryKind::Put {
            record: record.clone(),
        })?;
        index.apply_put(record);
        self.maybe_compact(&index);
        Ok(())
    }

    fn retire(
        &self,
        scope: &Scope,
        fact_id: FactId,
        expected_version: u32,
        retirement: Retirement,
    ) -> Result<Fact, StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("record.retire"))?;
        index.check_retire(scope, fact_id, expected_version)?;
        self.log(WalEntryKind::Retire {
            scope: scope.clone(),
            fact_id,
            retirement,
        })?;
        let head = index
            .apply_retire(scope, fact_id, retirement)
            .ok_or(StorageError::LineageNotFound(fact_id))?;
        self.maybe_compact(&index);
        Ok(head)
    }

    fn scan(
        &self,
        scope: &Scope,
        filter: &dyn Fn(&Fact) -> bool,
    ) -> Result<Vec<Fact>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("record.scan"))?;
        Ok(index.scan(scope, filter))
    }

    fn find_by_identity(&self, scope: &Scope, key: &IdentityKey) -> Result<Vec<Fact>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("record.find_by_identity"))?;
        Ok(index.find_by_identity(scope, key))
    }

    fn purge(&self, scope: &Scope, fact_id: FactId) -> Result<bool, StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("record.purge"))?;
        if !index.contains(scope, fact_id) {
            return Ok(false);
        }
        self.log(WalEntryKind::Purge {
            scope: scope.clone(),
            fact_id,
        })?;
        let removed = index.apply_purge(scope, fact_id);
        self.maybe_compact(&index);
        Ok(removed)
    }
}
