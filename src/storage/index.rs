//! Lineage index shared by the in-memory and persistent backends.
//!
//! The index is a plain state machine: `check_*` methods validate a
//! conditional write against the current state without touching it, and
//! `apply_*` methods perform the write unconditionally. Backends hold a write
//! lock across check and apply; the persistent backend logs between the two.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::fact::{Fact, FactId, FactRef, Scope};
use crate::identity::IdentityKey;
use crate::storage::traits::{Retirement, StorageError, WriteCondition};

#[derive(Debug)]
struct Lineage {
    versions: BTreeMap<u32, Fact>,
    head: u32,
}

impl Lineage {
    fn head(&self) -> Option<&Fact> {
        self.versions.get(&self.head)
    }
}

#[derive(Debug, Default)]
struct ScopeIndex {
    lineages: HashMap<FactId, Lineage>,
    /// Identity keys of current heads only.
    identities: HashMap<IdentityKey, BTreeSet<FactId>>,
}

fn index_head(identities: &mut HashMap<IdentityKey, BTreeSet<FactId>>, head: &Fact) {
    if !head.is_current() {
        return;
    }
    for key in head.identity_keys() {
        identities.entry(key).or_default().insert(head.fact_id);
    }
}

fn unindex_head(identities: &mut HashMap<IdentityKey, BTreeSet<FactId>>, head: &Fact) {
    for key in head.identity_keys() {
        if let Some(set) = identities.get_mut(&key) {
            set.remove(&head.fact_id);
            if set.is_empty() {
                identities.remove(&key);
            }
        }
    }
}

/// In-memory lineage state for every scope.
#[derive(Debug, Default)]
pub(crate) struct RecordIndex {
    scopes: HashMap<Scope, ScopeIndex>,
}

impl RecordIndex {
    fn lineage_of(&self, scope: &Scope, fact_id: FactId) -> Option<&Lineage> {
        self.scopes.get(scope)?.lineages.get(&fact_id)
    }

    pub(crate) fn get(&self, scope: &Scope, fact_id: FactId) -> Option<Fact> {
        self.lineage_of(scope, fact_id)?.head().cloned()
    }

    pub(crate) fn get_version(&self, scope: &Scope, fact_id: FactId, version: u32) -> Option<Fact> {
        self.lineage_of(scope, fact_id)?.versions.get(&version).cloned()
    }

    pub(crate) fn lineage(&self, scope: &Scope, fact_id: FactId) -> Vec<Fact> {
        self.lineage_of(scope, fact_id)
            .map(|l| l.versions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn scan(&self, scope: &Scope, filter: &dyn Fn(&Fact) -> bool) -> Vec<Fact> {
        let Some(state) = self.scopes.get(scope) else {
            return Vec::new();
        };
        state
            .lineages
            .values()
            .flat_map(|l| l.versions.values())
            .filter(|f| filter(f))
            .cloned()
            .collect()
    }

    pub(crate) fn find_by_identity(&self, scope: &Scope, key: &IdentityKey) -> Vec<Fact> {
        let Some(state) = self.scopes.get(scope) else {
            return Vec::new();
        };
        let Some(ids) = state.identities.get(key) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| state.lineages.get(id)?.head())
            .filter(|f| f.is_current())
            .cloned()
            .collect()
    }

    pub(crate) fn contains(&self, scope: &Scope, fact_id: FactId) -> bool {
        self.lineage_of(scope, fact_id).is_some()
    }

    /// Every stored record, grouped by scope, versions ascending per lineage.
    pub(crate) fn records(&self) -> impl Iterator<Item = &Fact> {
        self.scopes
            .values()
            .flat_map(|s| s.lineages.values())
            .flat_map(|l| l.versions.values())
    }

    pub(crate) fn check_put(
        &self,
        scope: &Scope,
        record: &Fact,
        condition: &WriteCondition,
    ) -> Result<(), StorageError> {
        if &record.scope != scope {
            return Err(StorageError::InvalidRecord(format!(
                "record scope {} does not match target scope {scope}",
                record.scope
            )));
        }
        if record.superseded_by.is_some() || record.invalid {
            return Err(StorageError::InvalidRecord(
                "new versions must be current".to_string(),
            ));
        }

        match condition {
            WriteCondition::Create { claim } => {
                if self.contains(scope, record.fact_id) {
                    return Err(StorageError::DuplicateKey(record.fact_id.to_string()));
                }
                if record.version != 1 || record.supersedes.is_some() {
                    return Err(StorageError::InvalidRecord(format!(
                        "new lineage must start at v1 without predecessor (got v{})",
                        record.version
                    )));
                }
                if let Some(key) = claim {
                    let holder = self
                        .scopes
                        .get(scope)
                        .and_then(|s| s.identities.get(key))
                        .and_then(|ids| ids.iter().next().copied());
                    if let Some(holder) = holder {
                        return Err(StorageError::IdentityTaken {
                            key: key.clone(),
                            holder,
                        });
                    }
                }
                Ok(())
            }
            WriteCondition::Advance { expected_version } => {
                let lineage = self
                    .lineage_of(scope, record.fact_id)
                    .ok_or(StorageError::LineageNotFound(record.fact_id))?;
                if lineage.head != *expected_version {
                    return Err(StorageError::VersionConflict {
                        fact_id: record.fact_id,
                        expected: *expected_version,
                        actual: lineage.head,
                    });
                }
                if !lineage.head().is_some_and(Fact::is_current) {
                    return Err(StorageError::NotCurrent(record.fact_id));
                }
                let predecessor = FactRef::new(record.fact_id, *expected_version);
                if record.version != expected_version + 1 || record.supersedes != Some(predecessor) {
                    return Err(StorageError::InvalidRecord(format!(
                        "next version of {predecessor} must be v{} superseding it",
                        expected_version + 1
                    )));
                }
                Ok(())
            }
        }
    }

    /// Append a version, superseding the previous head when one exists.
    pub(crate) fn apply_put(&mut self, record: Fact) {
        let ScopeIndex {
            lineages,
            identities,
        } = self.scopes.entry(record.scope.clone()).or_default();

        match lineages.get_mut(&record.fact_id) {
            None => {
                index_head(identities, &record);
                let head = record.version;
                let fact_id = record.fact_id;
                let mut versions = BTreeMap::new();
                versions.insert(head, record);
                lineages.insert(fact_id, Lineage { versions, head });
            }
            Some(lineage) => {
                if let Some(old) = lineage.versions.get_mut(&lineage.head) {
                    unindex_head(identities, old);
                    old.superseded_by = Some(record.fact_ref());
                }
                index_head(identities, &record);
                lineage.head = record.version;
                lineage.versions.insert(record.version, record);
            }
        }
    }

    /// Insert a record verbatim (pointers included). Used by snapshot replay.
    pub(crate) fn apply_restore(&mut self, record: Fact) {
        let ScopeIndex {
            lineages,
            identities,
        } = self.scopes.entry(record.scope.clone()).or_default();

        let lineage = lineages.entry(record.fact_id).or_insert_with(|| Lineage {
            versions: BTreeMap::new(),
            head: record.version,
        });
        if let Some(old) = lineage.head() {
            unindex_head(identities, old);
        }
        lineage.versions.insert(record.version, record);
        lineage.head = lineage.versions.keys().next_back().copied().unwrap_or(1);
        if let Some(head) = lineage.head() {
            index_head(identities, head);
        }
    }

    pub(crate) fn check_retire(
        &self,
        scope: &Scope,
        fact_id: FactId,
        expected_version: u32,
    ) -> Result<(), StorageError> {
        let lineage = self
            .lineage_of(scope, fact_id)
            .ok_or(StorageError::LineageNotFound(fact_id))?;
        if lineage.head != expected_version {
            return Err(StorageError::VersionConflict {
                fact_id,
                expected: expected_version,
                actual: lineage.head,
            });
        }
        if !lineage.head().is_some_and(Fact::is_current) {
            return Err(StorageError::NotCurrent(fact_id));
        }
        Ok(())
    }

    pub(crate) fn apply_retire(
        &mut self,
        scope: &Scope,
        fact_id: FactId,
        retirement: Retirement,
    ) -> Option<Fact> {
        let ScopeIndex {
            lineages,
            identities,
        } = self.scopes.get_mut(scope)?;
        let lineage = lineages.get_mut(&fact_id)?;
        let head = lineage.versions.get_mut(&lineage.head)?;
        unindex_head(identities, head);
        match retirement {
            Retirement::Invalidated => head.invalid = true,
            Retirement::SupersededBy { by } => head.superseded_by = Some(by),
        }
        Some(head.clone())
    }

    pub(crate) fn apply_purge(&mut self, scope: &Scope, fact_id: FactId) -> bool {
        let Some(state) = self.scopes.get_mut(scope) else {
            return false;
        };
        let Some(lineage) = state.lineages.remove(&fact_id) else {
            return false;
        };
        if let Some(head) = lineage.head() {
            unindex_head(&mut state.identities, head);
        }
        if state.lineages.is_empty() {
            self.scopes.remove(scope);
        }
        true
    }
}
