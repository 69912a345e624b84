//! In-memory storage backend.
//!
//! Thread-safe in-memory implementation of [`RecordStore`]. It is intended for
//! embedded usage, tests, and as a reference implementation of the
//! conditional-write contract.

use std::sync::RwLock;

use crate::fact::{Fact, FactId, Scope};
use crate::identity::IdentityKey;
use crate::storage::index::RecordIndex;
use crate::storage::traits::{RecordStore, Retirement, StorageError, WriteCondition};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory record store.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    index: RwLock<RecordIndex>,
}

impl InMemoryRecordStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for InMemoryRecordStore {
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
        index.apply_put(record);
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
        index
            .apply_retire(scope, fact_id, retirement)
            .ok_or(StorageError::LineageNotFound(fact_id))
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
        Ok(index.apply_purge(scope, fact_id))
    }
}
