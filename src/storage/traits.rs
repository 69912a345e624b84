//! Abstract record-store trait for KyroFacts.
//!
//! The record store is the only shared mutable resource in the system. It
//! keeps an append-only log of fact versions keyed by `(scope, fact_id,
//! version)` plus one head pointer per lineage, and it is the place where the
//! optimistic-concurrency discipline is enforced:
//! - creates can claim an identity key, so two racing ADDs of the same fact
//!   cannot both produce a lineage
//! - advances are compare-and-swap on the head version, so two racing
//!   revisions cannot both produce a current head

use thiserror::Error;

use crate::fact::{Fact, FactId, FactRef, Scope};
use crate::identity::IdentityKey;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Lineage not found.
    #[error("Fact lineage not found: {0}")]
    LineageNotFound(FactId),

    /// A create targeted a lineage that already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Conditional write observed a different head version.
    #[error("Version conflict on {fact_id}: expected v{expected}, found v{actual}")]
    VersionConflict {
        /// Lineage being written.
        fact_id: FactId,
        /// Version the writer observed.
        expected: u32,
        /// Version the store holds.
        actual: u32,
    },

    /// Conditional create lost the race for an identity key.
    #[error("Identity {key} already held by {holder}")]
    IdentityTaken {
        /// Contested identity.
        key: IdentityKey,
        /// Lineage currently holding it.
        holder: FactId,
    },

    /// The head is not current (superseded or invalidated) and cannot advance.
    #[error("Fact {0} has no current head")]
    NotCurrent(FactId),

    /// The record handed to the store is malformed for the requested write.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl StorageError {
    /// True when the failure is an optimistic-concurrency loss that a
    /// fresh match-decide-apply pass may resolve.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::VersionConflict { .. } | Self::IdentityTaken { .. } | Self::NotCurrent(_)
        )
    }
}

/// Precondition attached to [`RecordStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// Start a new lineage at version 1.
    ///
    /// Fails with `IdentityTaken` if `claim` is set and a current lineage in
    /// the scope already holds that key.
    Create {
        /// Identity the new lineage must own exclusively.
        claim: Option<IdentityKey>,
    },

    /// Append `expected_version + 1` and supersede the head atomically.
    ///
    /// Fails with `VersionConflict` if the head has moved, or `NotCurrent`
    /// if the head was retired.
    Advance {
        /// Head version the writer observed.
        expected_version: u32,
    },
}

/// In-place terminal mark for a lineage head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Retirement {
    /// Soft delete.
    Invalidated,
    /// Replaced by a fact from another lineage (consolidation).
    SupersededBy {
        /// The replacing version.
        by: FactRef,
    },
}

/// Storage trait for fact records.
///
/// # Safety Considerations
/// - `put` and `retire` must apply their precondition check and every write
///   they imply as one atomic unit
/// - Implementations must handle concurrent access safely
pub trait RecordStore: Send + Sync {
    /// Head (highest version) of a lineage, current or not.
    fn get(&self, scope: &Scope, fact_id: FactId) -> Result<Option<Fact>, StorageError>;

    /// One exact version of a lineage.
    fn get_version(
        &self,
        scope: &Scope,
        fact_id: FactId,
        version: u32,
    ) -> Result<Option<Fact>, StorageError>;

    /// Every stored version of a lineage, ascending. Empty if unknown.
    fn lineage(&self, scope: &Scope, fact_id: FactId) -> Result<Vec<Fact>, StorageError>;

    /// Conditionally write a new version.
    fn put(&self, scope: &Scope, record: Fact, condition: WriteCondition) -> Result<(), StorageError>;

    /// Conditionally mark the head of a lineage as no longer current.
    ///
    /// Returns the updated head.
    fn retire(
        &self,
        scope: &Scope,
        fact_id: FactId,
        expected_version: u32,
        retirement: Retirement,
    ) -> Result<Fact, StorageError>;

    /// All records (every version) in a scope accepted by `filter`.
    fn scan(
        &self,
        scope: &Scope,
        filter: &dyn Fn(&Fact) -> bool,
    ) -> Result<Vec<Fact>, StorageError>;

    /// Current heads in a scope holding an identity key.
    fn find_by_identity(&self, scope: &Scope, key: &IdentityKey) -> Result<Vec<Fact>, StorageError>;

    /// Remove every version of a lineage. Returns false if it did not exist.
    fn purge(&self, scope: &Scope, fact_id: FactId) -> Result<bool, StorageError>;
}
