//! Persistent storage backend for KyroFacts.
//!
//! Durable, crash-safe record storage with:
//! - Write-ahead logging: every mutation is logged before it becomes visible
//! - File locking: one process per store directory
//! - CRC32 checksums: torn or corrupted tails are detected and dropped
//! - Compaction: the log is periodically rewritten as a snapshot
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │          PersistentRecordStore             │
//! ├────────────────────────────────────────────┤
//! │  RecordIndex (reads)   WriteAheadLog       │
//! │         ↑                    ↑             │
//! │         └──── write lock ────┘             │
//! │                   ↓                        │
//! │            FileLock (flock)                │
//! └────────────────────────────────────────────┘
//! ```

mod codec;
mod file_lock;
mod store;
mod wal;

pub use file_lock::FileLock;
pub use store::PersistentRecordStore;
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FactResult, ValidationError};

/// Configuration for persistent storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// WAL size that triggers compaction (bytes).
    pub max_wal_size: u64,
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024, // 64 MB
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    // Avoid degenerate compaction loops.
    const MIN_WAL_SIZE: u64 = 4 * 1024;

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidConfig` if `max_wal_size` is too small.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "max_wal_size must be at least {} bytes (got {})",
                    Self::MIN_WAL_SIZE,
                    self.max_wal_size
                ),
            });
        }
        Ok(self)
    }
}

/// Open or create a persistent fact store in the given directory.
///
/// # Errors
/// - If the directory cannot be created or accessed
/// - If another process holds the lock
/// - If the configuration is invalid
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use kyrofacts::storage::persistent::open_store;
/// use kyrofacts::{EngineConfig, FactEngine};
///
/// let store = open_store("./agent-facts", None)?;
/// let engine = FactEngine::new(Arc::new(store), EngineConfig::default())?;
/// ```
pub fn open_store(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> FactResult<PersistentRecordStore> {
    let cfg = config.unwrap_or_default().validate()?;
    Ok(PersistentRecordStore::open(path.as_ref(), cfg)?)
}
