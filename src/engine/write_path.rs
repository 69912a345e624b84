//! Engine write path.
//!
//! Every write is an optimistic match-decide-apply pass. A pass that loses a
//! conditional write (the head moved, or a racing ADD claimed the identity
//! first) is retried from a fresh read, up to `max_write_attempts`; then the
//! call fails with a retryable contention error. External calls (embedding)
//! happen once, before the first pass.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{FactEngine, StoreOptions, StoreOutcome};
use crate::error::{ExecutionError, FactResult, ValidationError};
use crate::fact::{CandidateFact, Fact, FactChanges, FactId, Scope};
use crate::matcher::{Matcher, Strategy};
use crate::revision::{decide, Action};
use crate::storage::{Retirement, StorageError};

enum Pass<T> {
    Done(T),
    Conflict(StorageError),
}

impl FactEngine {
    fn with_retries<T>(
        &self,
        op: &'static str,
        scope: &Scope,
        mut pass: impl FnMut() -> FactResult<Pass<T>>,
    ) -> FactResult<T> {
        let attempts = self.config.max_write_attempts;
        for attempt in 1..=attempts {
            match pass()? {
                Pass::Done(value) => return Ok(value),
                Pass::Conflict(err) => {
                    warn!(
                        op,
                        scope = %scope,
                        attempt,
                        max_attempts = attempts,
                        error = %err,
                        "write conflict; retrying"
                    );
                }
            }
        }
        Err(ExecutionError::Contention { attempts }.into())
    }

    /// Store a candidate fact, deduplicating against current facts in `scope`.
    ///
    /// Always returns a definite outcome: a new lineage (`ADD`), a new
    /// version of the matched lineage (`UPDATE`), or the retained existing
    /// fact (`NONE`).
    ///
    /// # Errors
    /// - `ValidationError` for malformed input, before any store interaction
    /// - `ExecutionError::Contention` when every attempt lost a write race
    /// - `ExecutionError::Embedding` if a configured embedder fails, or if the
    ///   candidate's vector and a stored one differ in dimension
    /// - `ExecutionError::Storage` for record-store failures
    pub fn store(
        &self,
        mut candidate: CandidateFact,
        scope: &Scope,
        options: &StoreOptions,
    ) -> FactResult<StoreOutcome> {
        self.check_scope(scope)?;
        self.check_candidate(&candidate)?;
        let strategy = self.resolve_strategy(options.strategy, options.threshold)?;
        let tx_time = options.tx_time.unwrap_or_else(Utc::now);

        if let Strategy::Semantic { embedder, .. } = strategy {
            if candidate.embedding.is_none() {
                let embedding = embedder.embed(&candidate.fact)?;
                if embedding.is_empty() {
                    return Err(ValidationError::EmptyEmbedding.into());
                }
                candidate.embedding = Some(embedding);
            }
        }

        let claim = strategy.identity_key(candidate.text_key(), candidate.triple_key());
        let matcher = Matcher::new(self.store.as_ref());
        let chain = self.chain();

        self.with_retries("store", scope, || {
            let matched = matcher.find(&candidate, scope, &strategy)?;
            let action = decide(candidate.confidence, matched.as_ref());
            let applied = chain.apply(
                action,
                scope,
                candidate.clone(),
                matched.as_ref(),
                claim.clone(),
                tx_time,
            );
            match applied {
                Ok(fact) => {
                    debug!(
                        scope = %scope,
                        fact_id = %fact.fact_id,
                        version = fact.version,
                        action = %action,
                        strategy = %strategy.kind(),
                        "store decided"
                    );
                    Ok(Pass::Done(StoreOutcome {
                        fact,
                        action,
                        was_updated: action == Action::Update,
                        matched_existing: matched.is_some(),
                    }))
                }
                Err(err) if err.is_conflict() => Ok(Pass::Conflict(err)),
                Err(err) => Err(err.into()),
            }
        })
    }

    /// Explicitly revise a fact. Always supersedes, regardless of confidence.
    ///
    /// When the text changes without a new embedding and an embedder is
    /// configured, the new text is embedded; otherwise the stale embedding is
    /// dropped.
    ///
    /// Under an exact or structural default strategy, changes that would move
    /// the fact onto the identity of another current fact are refused.
    /// Concurrent updates racing onto one identity are not detected.
    ///
    /// # Errors
    /// - `ExecutionError::FactNotFound` if the lineage does not exist
    /// - `ExecutionError::NotCurrent` if its head was invalidated or merged away
    /// - `ExecutionError::IdentityConflict` if another current fact holds the new identity
    /// - `ExecutionError::Contention` when every attempt lost a write race
    pub fn update(&self, scope: &Scope, fact_id: FactId, mut changes: FactChanges) -> FactResult<Fact> {
        self.check_scope(scope)?;
        changes.validate()?;
        if let Some(text) = &changes.fact {
            self.check_text(text)?;
        }
        if let Some(tags) = &changes.tags {
            self.check_tags(tags)?;
        }
        let tx_time = changes.tx_time.unwrap_or_else(Utc::now);

        if changes.embedding.is_none() {
            if let (Some(text), Some(embedder)) = (&changes.fact, &self.embedder) {
                let embedding = embedder.embed(text)?;
                changes.embedding = Some(embedding);
            }
        }

        let strategy = self.resolve_strategy(None, None)?;
        let chain = self.chain();
        self.with_retries("update", scope, || {
            let head = self.current_head(scope, fact_id)?;
            let draft = Fact {
                created_at: tx_time,
                ..changes.apply_to(&head)
            };
            if let Some(holder) = self.identity_holder(scope, &strategy, &head, &draft)? {
                return Err(ExecutionError::IdentityConflict { id: fact_id, holder }.into());
            }
            match chain.advance(scope, &head, draft) {
                Ok(fact) => {
                    debug!(
                        scope = %scope,
                        fact_id = %fact.fact_id,
                        version = fact.version,
                        action = %Action::Supersede,
                        "update applied"
                    );
                    Ok(Pass::Done(fact))
                }
                Err(err) if err.is_conflict() => Ok(Pass::Conflict(err)),
                Err(err) => Err(err.into()),
            }
        })
    }

    /// Soft-delete the current version of a lineage.
    ///
    /// Returns the invalidated head; it stays readable through history.
    ///
    /// # Errors
    /// `ExecutionError::FactNotFound` or `NotCurrent` as for [`update`](Self::update).
    pub fn invalidate(&self, scope: &Scope, fact_id: FactId) -> FactResult<Fact> {
        self.check_scope(scope)?;
        let chain = self.chain();
        self.with_retries("invalidate", scope, || {
            let head = self.current_head(scope, fact_id)?;
            match chain.retire(scope, &head, Retirement::Invalidated) {
                Ok(fact) => {
                    debug!(scope = %scope, fact_id = %fact_id, version = fact.version, "fact invalidated");
                    Ok(Pass::Done(fact))
                }
                Err(err) if err.is_conflict() => Ok(Pass::Conflict(err)),
                Err(err) => Err(err.into()),
            }
        })
    }

    /// Remove every version of a lineage. Returns false if it did not exist.
    ///
    /// # Errors
    /// Returns validation or storage errors.
    pub fn purge(&self, scope: &Scope, fact_id: FactId) -> FactResult<bool> {
        self.check_scope(scope)?;
        let removed = self.store.purge(scope, fact_id)?;
        if removed {
            info!(scope = %scope, fact_id = %fact_id, "fact lineage purged");
        }
        Ok(removed)
    }

    /// Erase every lineage with any version attributed to `user_id`.
    ///
    /// Returns the number of lineages removed.
    ///
    /// # Errors
    /// Returns `ValidationError::EmptyField` for a blank user id, or storage errors.
    pub fn purge_user(&self, scope: &Scope, user_id: &str) -> FactResult<usize> {
        self.check_scope(scope)?;
        if user_id.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "user_id".to_string(),
            }
            .into());
        }

        let lineages: BTreeSet<FactId> = self
            .store
            .scan(scope, &|f| f.user_id.as_deref() == Some(user_id))?
            .into_iter()
            .map(|f| f.fact_id)
            .collect();

        let mut removed = 0;
        for fact_id in lineages {
            if self.store.purge(scope, fact_id)? {
                removed += 1;
            }
        }
        info!(scope = %scope, removed, "user facts purged");
        Ok(removed)
    }

    /// Another current fact already holding the identity `draft` moves to.
    fn identity_holder(
        &self,
        scope: &Scope,
        strategy: &Strategy<'_>,
        head: &Fact,
        draft: &Fact,
    ) -> FactResult<Option<FactId>> {
        let Some(key) = strategy.identity_key(draft.text_key(), draft.triple_key()) else {
            return Ok(None);
        };
        if strategy.identity_key(head.text_key(), head.triple_key()).as_ref() == Some(&key) {
            return Ok(None);
        }
        Ok(self
            .store
            .find_by_identity(scope, &key)?
            .into_iter()
            .find(|f| f.is_current() && f.fact_id != head.fact_id)
            .map(|f| f.fact_id))
    }

    fn current_head(&self, scope: &Scope, fact_id: FactId) -> FactResult<Fact> {
        let head = self
            .store
            .get(scope, fact_id)?
            .ok_or(ExecutionError::FactNotFound { id: fact_id })?;
        if !head.is_current() {
            return Err(ExecutionError::NotCurrent { id: fact_id }.into());
        }
        Ok(head)
    }
}
