//! Duplicate detection.
//!
//! The [`Matcher`] finds at most one current fact in a scope that an incoming
//! candidate duplicates. It is read-only: it never writes to the record store
//! and never calls the embedder (embeddings are computed before matching).

use std::cmp::Ordering;
use std::fmt;

use tracing::{debug, warn};

use crate::config::MatchStrategy;
use crate::embedding::{cosine_similarity, Embedder, EmbeddingError};
use crate::error::FactResult;
use crate::fact::{CandidateFact, Fact, Scope};
use crate::identity::IdentityKey;
use crate::storage::{RecordStore, StorageError};

/// A match strategy resolved against the engine's collaborators.
#[derive(Clone, Copy)]
pub enum Strategy<'a> {
    /// Never match.
    None,
    /// Normalized free-text equality.
    Exact,
    /// Normalized triple equality; unstructured candidates never match.
    Structural,
    /// Cosine similarity over stored embeddings.
    Semantic {
        /// Embedder for candidates that arrive without a vector.
        embedder: &'a dyn Embedder,
        /// Minimum similarity for a match.
        threshold: f32,
    },
}

impl fmt::Debug for Strategy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Exact => f.write_str("Exact"),
            Self::Structural => f.write_str("Structural"),
            Self::Semantic {
                embedder,
                threshold,
            } => f
                .debug_struct("Semantic")
                .field("model", &embedder.model_name())
                .field("threshold", threshold)
                .finish(),
        }
    }
}

impl<'a> Strategy<'a> {
    /// Resolve a requested strategy.
    ///
    /// `Semantic` without an embedder downgrades to `Structural`.
    #[must_use]
    pub fn resolve(
        requested: MatchStrategy,
        embedder: Option<&'a dyn Embedder>,
        threshold: f32,
    ) -> Self {
        match requested {
            MatchStrategy::None => Self::None,
            MatchStrategy::Exact => Self::Exact,
            MatchStrategy::Structural => Self::Structural,
            MatchStrategy::Semantic => match embedder {
                Some(embedder) => Self::Semantic {
                    embedder,
                    threshold,
                },
                None => {
                    debug!("no embedder configured; semantic matching downgraded to structural");
                    Self::Structural
                }
            },
        }
    }

    /// The strategy actually in effect.
    #[must_use]
    pub const fn kind(&self) -> MatchStrategy {
        match self {
            Self::None => MatchStrategy::None,
            Self::Exact => MatchStrategy::Exact,
            Self::Structural => MatchStrategy::Structural,
            Self::Semantic { .. } => MatchStrategy::Semantic,
        }
    }

    /// Identity key a fact is matched (and claimed) under, for key-based strategies.
    #[must_use]
    pub fn identity_key(
        &self,
        text_key: IdentityKey,
        triple_key: Option<IdentityKey>,
    ) -> Option<IdentityKey> {
        match self {
            Self::None | Self::Semantic { .. } => None,
            Self::Exact => Some(text_key),
            Self::Structural => triple_key,
        }
    }
}

/// Orders facts most recent first: later `created_at`, then greater id.
pub(crate) fn newest_first(a: &Fact, b: &Fact) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.fact_id.cmp(&a.fact_id))
}

/// Finds the current fact a candidate duplicates.
pub struct Matcher<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> Matcher<'a> {
    /// Create a matcher over a record store.
    #[must_use]
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    /// Find the single current fact `candidate` duplicates in `scope`.
    ///
    /// For `Semantic`, the candidate's own embedding is compared; a candidate
    /// without one never matches.
    ///
    /// # Errors
    /// - Propagates record-store failures
    /// - `EmbeddingError::DimensionMismatch` if a stored embedding in scope has
    ///   a different dimension than the candidate's
    pub fn find(
        &self,
        candidate: &CandidateFact,
        scope: &Scope,
        strategy: &Strategy<'_>,
    ) -> FactResult<Option<Fact>> {
        match strategy {
            Strategy::None => Ok(None),
            Strategy::Exact | Strategy::Structural => {
                let Some(key) = strategy.identity_key(candidate.text_key(), candidate.triple_key())
                else {
                    return Ok(None);
                };
                Ok(self.find_by_key(scope, &key)?)
            }
            Strategy::Semantic { threshold, .. } => match &candidate.embedding {
                Some(embedding) => self.find_similar(scope, embedding, *threshold),
                None => Ok(None),
            },
        }
    }

    fn find_by_key(&self, scope: &Scope, key: &IdentityKey) -> Result<Option<Fact>, StorageError> {
        let mut current: Vec<Fact> = self
            .store
            .find_by_identity(scope, key)?
            .into_iter()
            .filter(Fact::is_current)
            .collect();
        if current.len() > 1 {
            warn!(
                scope = %scope,
                key = %key,
                count = current.len(),
                "multiple current facts share one identity; picking the most recent"
            );
        }
        current.sort_by(newest_first);
        Ok(current.into_iter().next())
    }

    fn find_similar(
        &self,
        scope: &Scope,
        embedding: &[f32],
        threshold: f32,
    ) -> FactResult<Option<Fact>> {
        let candidates = self
            .store
            .scan(scope, &|f| f.is_current() && f.embedding.is_some())?;

        let mut best: Option<(f32, Fact)> = None;
        for fact in candidates {
            let Some(stored) = fact.embedding.as_deref() else {
                continue;
            };
            if stored.len() != embedding.len() {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: stored.len(),
                    actual: embedding.len(),
                }
                .into());
            }
            let score = cosine_similarity(embedding, stored);
            if score < threshold {
                continue;
            }
            let better = match &best {
                None => true,
                Some((best_score, best_fact)) => {
                    score > *best_score
                        || (score == *best_score && newest_first(&fact, best_fact) == Ordering::Less)
                }
            };
            if better {
                best = Some((score, fact));
            }
        }

        if let Some((score, fact)) = &best {
            debug!(scope = %scope, fact_id = %fact.fact_id, score, "semantic match");
        }
        Ok(best.map(|(_, fact)| fact))
    }
}
