//! Version chain management.
//!
//! Every mutation of a lineage goes through [`VersionChain`], which turns a
//! decided action into exactly one conditional write. Reads walk the chain
//! from version 1 along `superseded_by` pointers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::fact::{CandidateFact, Fact, FactId, Scope};
use crate::identity::IdentityKey;
use crate::revision::Action;
use crate::storage::{RecordStore, Retirement, StorageError, WriteCondition};

/// Creation time for a successor version, never earlier than its predecessor.
fn commit_time(requested: DateTime<Utc>, previous: &Fact) -> DateTime<Utc> {
    requested.max(previous.created_at)
}

/// Applies revision actions and serves lineage reads.
pub struct VersionChain<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> VersionChain<'a> {
    /// Create a chain manager over a record store.
    #[must_use]
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    /// Apply a decided action.
    ///
    /// `NONE` returns the matched fact unchanged without touching the store.
    ///
    /// # Errors
    /// - `StorageError::IdentityTaken` if an `ADD` lost a claimed identity
    /// - `StorageError::VersionConflict` / `NotCurrent` if the matched head moved
    /// - `StorageError::InvalidRecord` if the action needs a match and none was given
    pub fn apply(
        &self,
        action: Action,
        scope: &Scope,
        candidate: CandidateFact,
        matched: Option<&Fact>,
        claim: Option<IdentityKey>,
        tx_time: DateTime<Utc>,
    ) -> Result<Fact, StorageError> {
        match (action, matched) {
            (Action::Add, _) => self.add(scope, candidate, claim, tx_time),
            (Action::None, Some(existing)) => Ok(existing.clone()),
            (Action::Update | Action::Supersede, Some(existing)) => {
                let draft = candidate.into_record(existing.fact_id, scope.clone(), 0, None, tx_time);
                self.advance(scope, existing, draft)
            }
            (action, None) => Err(StorageError::InvalidRecord(format!(
                "{action} requires a matched fact"
            ))),
        }
    }

    /// Start a new lineage at version 1.
    ///
    /// # Errors
    /// Propagates the conditional-create failure.
    pub fn add(
        &self,
        scope: &Scope,
        candidate: CandidateFact,
        claim: Option<IdentityKey>,
        tx_time: DateTime<Utc>,
    ) -> Result<Fact, StorageError> {
        let record = candidate.into_record(FactId::new(), scope.clone(), 1, None, tx_time);
        self.store
            .put(scope, record.clone(), WriteCondition::Create { claim })?;
        Ok(record)
    }

    /// Append `draft` as the successor of `current`.
    ///
    /// Only the content of `draft` is used; identity, version, pointers, and
    /// flags are derived from `current`. `draft.created_at` is the requested
    /// recording time.
    ///
    /// # Errors
    /// `StorageError::VersionConflict` or `NotCurrent` if `current` is no
    /// longer the head.
    pub fn advance(&self, scope: &Scope, current: &Fact, draft: Fact) -> Result<Fact, StorageError> {
        let record = Fact {
            fact_id: current.fact_id,
            scope: scope.clone(),
            version: current.version + 1,
            supersedes: Some(current.fact_ref()),
            superseded_by: None,
            invalid: false,
            created_at: commit_time(draft.created_at, current),
            ..draft
        };
        self.store.put(
            scope,
            record.clone(),
            WriteCondition::Advance {
                expected_version: current.version,
            },
        )?;
        Ok(record)
    }

    /// Mark `current` as no longer current.
    ///
    /// # Errors
    /// `StorageError::VersionConflict` or `NotCurrent` if `current` is no
    /// longer the head.
    pub fn retire(
        &self,
        scope: &Scope,
        current: &Fact,
        retirement: Retirement,
    ) -> Result<Fact, StorageError> {
        self.store
            .retire(scope, current.fact_id, current.version, retirement)
    }

    /// Every version of a lineage, oldest first. Empty if unknown or purged.
    ///
    /// # Errors
    /// Propagates record-store failures.
    pub fn history(&self, scope: &Scope, fact_id: FactId) -> Result<Vec<Fact>, StorageError> {
        let stored = self.store.lineage(scope, fact_id)?;
        let limit = stored.len();
        let mut by_version: HashMap<u32, Fact> =
            stored.into_iter().map(|f| (f.version, f)).collect();

        let mut history = Vec::with_capacity(limit);
        let mut next = by_version.remove(&1);
        while let Some(fact) = next {
            next = match fact.superseded_by {
                // A pointer into another lineage (consolidation) ends this one.
                Some(forward) if forward.fact_id == fact_id => {
                    let successor = by_version.remove(&forward.version);
                    if successor.is_none() {
                        warn!(
                            scope = %scope,
                            fact_id = %fact_id,
                            missing = forward.version,
                            "version chain points at a missing version"
                        );
                    }
                    successor
                }
                _ => None,
            };
            history.push(fact);
            if history.len() >= limit {
                break;
            }
        }
        Ok(history)
    }

    /// Version `n` of a lineage.
    ///
    /// # Errors
    /// Propagates record-store failures.
    pub fn version(
        &self,
        scope: &Scope,
        fact_id: FactId,
        version: u32,
    ) -> Result<Option<Fact>, StorageError> {
        self.store.get_version(scope, fact_id, version)
    }

    /// The version that was current at `at`: the latest created at or before it.
    ///
    /// # Errors
    /// Propagates record-store failures.
    pub fn at_timestamp(
        &self,
        scope: &Scope,
        fact_id: FactId,
        at: DateTime<Utc>,
    ) -> Result<Option<Fact>, StorageError> {
        Ok(self
            .history(scope, fact_id)?
            .into_iter()
            .take_while(|f| f.created_at <= at)
            .last())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::fact::FactRef;
    use crate::storage::InMemoryRecordStore;

    fn scope() -> Scope {
        Scope::new("space").unwrap()
    }

    fn candidate(confidence: u8) -> CandidateFact {
        CandidateFact::builder()
            .fact("alice works at acme")
            .triple("alice", "works_at", "acme")
            .confidence(confidence)
            .build()
            .unwrap()
    }

    #[test]
    fn update_links_both_directions() {
        let store = InMemoryRecordStore::new();
        let chain = VersionChain::new(&store);
        let t0 = Utc::now();

        let v1 = chain
            .apply(Action::Add, &scope(), candidate(70), None, None, t0)
            .unwrap();
        let v2 = chain
            .apply(Action::Update, &scope(), candidate(95), Some(&v1), None, t0)
            .unwrap();

        assert_eq!(v2.fact_id, v1.fact_id);
        assert_eq!(v2.version, 2);
        assert_eq!(v2.supersedes, Some(FactRef::new(v1.fact_id, 1)));
        let old = chain.version(&scope(), v1.fact_id, 1).unwrap().unwrap();
        assert_eq!(old.superseded_by, Some(v2.fact_ref()));
        assert!(chain.version(&scope(), v1.fact_id, 3).unwrap().is_none());
    }

    #[test]
    fn none_does_not_write() {
        let store = InMemoryRecordStore::new();
        let chain = VersionChain::new(&store);
        let v1 = chain
            .apply(Action::Add, &scope(), candidate(70), None, None, Utc::now())
            .unwrap();
        let kept = chain
            .apply(Action::None, &scope(), candidate(10), Some(&v1), None, Utc::now())
            .unwrap();
        assert_eq!(kept, v1);
        assert_eq!(chain.history(&scope(), v1.fact_id).unwrap().len(), 1);
    }

    #[test]
    fn update_without_match_is_rejected() {
        let store = InMemoryRecordStore::new();
        let chain = VersionChain::new(&store);
        let err = chain
            .apply(Action::Update, &scope(), candidate(70), None, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord(_)));
    }

    #[test]
    fn stale_head_conflicts() {
        let store = InMemoryRecordStore::new();
        let chain = VersionChain::new(&store);
        let v1 = chain
            .apply(Action::Add, &scope(), candidate(70), None, None, Utc::now())
            .unwrap();
        chain
            .apply(Action::Update, &scope(), candidate(80), Some(&v1), None, Utc::now())
            .unwrap();
        let err = chain
            .apply(Action::Update, &scope(), candidate(90), Some(&v1), None, Utc::now())
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn history_and_time_travel() {
        let store = InMemoryRecordStore::new();
        let chain = VersionChain::new(&store);
        let t1 = Utc::now() - Duration::hours(3);
        let t2 = t1 + Duration::hours(1);
        let t3 = t2 + Duration::hours(1);

        let v1 = chain.apply(Action::Add, &scope(), candidate(50), None, None, t1).unwrap();
        let v2 = chain
            .apply(Action::Supersede, &scope(), candidate(60), Some(&v1), None, t2)
            .unwrap();
        let v3 = chain
            .apply(Action::Supersede, &scope(), candidate(70), Some(&v2), None, t3)
            .unwrap();

        let history = chain.history(&scope(), v1.fact_id).unwrap();
        let versions: Vec<u32> = history.iter().map(|f| f.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(history.last(), Some(&v3));

        let id = v1.fact_id;
        assert!(chain.at_timestamp(&scope(), id, t1 - Duration::seconds(1)).unwrap().is_none());
        assert_eq!(chain.at_timestamp(&scope(), id, t1).unwrap().unwrap().version, 1);
        assert_eq!(chain.at_timestamp(&scope(), id, t2).unwrap().unwrap().version, 2);
        assert_eq!(
            chain
                .at_timestamp(&scope(), id, t3 - Duration::seconds(1))
                .unwrap()
                .unwrap()
                .version,
            2
        );
        assert_eq!(chain.at_timestamp(&scope(), id, t3).unwrap().unwrap().version, 3);
    }

    #[test]
    fn backdated_revision_is_clamped() {
        let store = InMemoryRecordStore::new();
        let chain = VersionChain::new(&store);
        let t1 = Utc::now();
        let v1 = chain.apply(Action::Add, &scope(), candidate(50), None, None, t1).unwrap();
        let v2 = chain
            .apply(
                Action::Supersede,
                &scope(),
                candidate(60),
                Some(&v1),
                None,
                t1 - Duration::days(1),
            )
            .unwrap();
        assert_eq!(v2.created_at, t1);
    }

    #[test]
    fn unknown_lineage_reads_are_empty() {
        let store = InMemoryRecordStore::new();
        let chain = VersionChain::new(&store);
        let id = FactId::new();
        assert!(chain.history(&scope(), id).unwrap().is_empty());
        assert!(chain.version(&scope(), id, 1).unwrap().is_none());
        assert!(chain.at_timestamp(&scope(), id, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn retired_head_cannot_advance() {
        let store = InMemoryRecordStore::new();
        let chain = VersionChain::new(&store);
        let v1 = chain
            .apply(Action::Add, &scope(), candidate(70), None, None, Utc::now())
            .unwrap();
        let head = chain.retire(&scope(), &v1, Retirement::Invalidated).unwrap();
        assert!(head.invalid);
        let err = chain
            .apply(Action::Update, &scope(), candidate(90), Some(&v1), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, StorageError::NotCurrent(_)));
        assert_eq!(chain.history(&scope(), v1.fact_id).unwrap().len(), 1);
    }
}
