//! Read views over the fact set: entity profiles, relationship edges,
//! filtered listings, and text search.
//!
//! All views are read-only and exclude superseded or invalidated versions
//! unless history is requested explicitly.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::confidence::Confidence;
use crate::fact::{Fact, FactType, Scope};
use crate::identity::normalize_text;
use crate::matcher::newest_first;
use crate::storage::{RecordStore, StorageError};

/// Options shared by the relationship views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Include superseded and invalidated versions (audit view).
    #[serde(default)]
    pub include_history: bool,
}

impl QueryOptions {
    /// Options for the audit view.
    #[must_use]
    pub const fn with_history() -> Self {
        Self {
            include_history: true,
        }
    }
}

/// Filter for [`FactQuery::list`] and [`FactQuery::count`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactFilter {
    /// Only facts of this category.
    #[serde(default)]
    pub fact_type: Option<FactType>,
    /// Matches facts carrying any of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Only facts at or above this confidence.
    #[serde(default)]
    pub min_confidence: Option<Confidence>,
    /// Only facts owned by this user.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Only facts about this participant.
    #[serde(default)]
    pub participant_id: Option<String>,
    /// Include superseded and invalidated versions.
    #[serde(default)]
    pub include_history: bool,
    /// Maximum number of results.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl FactFilter {
    /// Filter accepting every current fact.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one category.
    #[must_use]
    pub fn fact_type(mut self, fact_type: FactType) -> Self {
        self.fact_type = Some(fact_type);
        self
    }

    /// Also accept facts carrying `tag`.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Restrict to a minimum confidence.
    #[must_use]
    pub fn min_confidence(mut self, confidence: Confidence) -> Self {
        self.min_confidence = Some(confidence);
        self
    }

    /// Restrict to one user.
    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Restrict to one participant.
    #[must_use]
    pub fn participant_id(mut self, participant_id: impl Into<String>) -> Self {
        self.participant_id = Some(participant_id.into());
        self
    }

    /// Include non-current versions.
    #[must_use]
    pub fn include_history(mut self, include: bool) -> Self {
        self.include_history = include;
        self
    }

    /// Cap the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn accepts(&self, fact: &Fact) -> bool {
        if !self.include_history && !fact.is_current() {
            return false;
        }
        if self.fact_type.is_some_and(|t| t != fact.fact_type) {
            return false;
        }
        if !self.tags.is_empty() && !fact.tags.iter().any(|t| self.tags.contains(t)) {
            return false;
        }
        if self.min_confidence.is_some_and(|min| fact.confidence < min) {
            return false;
        }
        if self
            .user_id
            .as_deref()
            .is_some_and(|u| fact.user_id.as_deref() != Some(u))
        {
            return false;
        }
        if self
            .participant_id
            .as_deref()
            .is_some_and(|p| fact.participant_id.as_deref() != Some(p))
        {
            return false;
        }
        true
    }
}

/// Most recent first; versions of one lineage newest first.
fn by_recency(a: &Fact, b: &Fact) -> Ordering {
    newest_first(a, b).then_with(|| b.version.cmp(&a.version))
}

fn field_matches(field: Option<&str>, normalized: &str) -> bool {
    field.is_some_and(|v| normalize_text(v) == normalized)
}

/// Read-only query layer over a record store.
pub struct FactQuery<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> FactQuery<'a> {
    /// Create a query view over a record store.
    #[must_use]
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    fn collect(
        &self,
        scope: &Scope,
        include_history: bool,
        filter: &dyn Fn(&Fact) -> bool,
    ) -> Result<Vec<Fact>, StorageError> {
        let mut facts = self
            .store
            .scan(scope, &|f| (include_history || f.is_current()) && filter(f))?;
        facts.sort_by(by_recency);
        Ok(facts)
    }

    /// Facts about one entity, most recent first.
    ///
    /// # Errors
    /// Propagates record-store failures.
    pub fn by_subject(
        &self,
        scope: &Scope,
        subject: &str,
        options: &QueryOptions,
    ) -> Result<Vec<Fact>, StorageError> {
        let subject = normalize_text(subject);
        self.collect(scope, options.include_history, &|f| {
            field_matches(f.subject.as_deref(), &subject)
        })
    }

    /// Edges leaving `subject` labelled `predicate`, most recent first.
    ///
    /// # Errors
    /// Propagates record-store failures.
    pub fn by_relationship(
        &self,
        scope: &Scope,
        subject: &str,
        predicate: &str,
        options: &QueryOptions,
    ) -> Result<Vec<Fact>, StorageError> {
        let subject = normalize_text(subject);
        let predicate = normalize_text(predicate);
        self.collect(scope, options.include_history, &|f| {
            field_matches(f.subject.as_deref(), &subject)
                && field_matches(f.predicate.as_deref(), &predicate)
        })
    }

    /// Facts accepted by `filter`, most recent first, truncated to its limit.
    ///
    /// # Errors
    /// Propagates record-store failures.
    pub fn list(&self, scope: &Scope, filter: &FactFilter) -> Result<Vec<Fact>, StorageError> {
        let mut facts = self.collect(scope, filter.include_history, &|f| filter.accepts(f))?;
        if let Some(limit) = filter.limit {
            facts.truncate(limit);
        }
        Ok(facts)
    }

    /// Number of facts accepted by `filter`, ignoring its limit.
    ///
    /// # Errors
    /// Propagates record-store failures.
    pub fn count(&self, scope: &Scope, filter: &FactFilter) -> Result<usize, StorageError> {
        Ok(self
            .store
            .scan(scope, &|f| filter.accepts(f))?
            .len())
    }

    /// Current facts whose normalized text contains the normalized query.
    ///
    /// Ordered by confidence, then recency.
    ///
    /// # Errors
    /// Propagates record-store failures.
    pub fn search(&self, scope: &Scope, query: &str, limit: usize) -> Result<Vec<Fact>, StorageError> {
        let needle = normalize_text(query);
        let mut facts = self
            .store
            .scan(scope, &|f| f.is_current() && normalize_text(&f.fact).contains(&needle))?;
        facts.sort_by(|a, b| {
            b.confidence
                .cmp(&a.confidence)
                .then_with(|| by_recency(a, b))
        });
        facts.truncate(limit);
        Ok(facts)
    }
}
