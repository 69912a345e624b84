//! The fact engine.
//!
//! [`FactEngine`] is the entry point surrounding layers call. It validates
//! requests, resolves the match strategy, and drives the matcher, revision
//! decider, and version chain against a pluggable [`RecordStore`]. The engine
//! holds no state between calls; every operation is a short transaction
//! against the store.

mod write_path;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::VersionChain;
use crate::config::{check_threshold, EngineConfig, MatchStrategy};
use crate::consolidate::{ConsolidateOptions, ConsolidationReport, Consolidator};
use crate::embedding::Embedder;
use crate::error::{FactResult, ValidationError};
use crate::fact::{check_structured_fields, CandidateFact, Fact, FactId, Scope};
use crate::matcher::Strategy;
use crate::query::{FactFilter, FactQuery, QueryOptions};
use crate::revision::Action;
use crate::storage::{InMemoryRecordStore, RecordStore};

/// Per-call options for [`FactEngine::store`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Match strategy; defaults to the engine's configured strategy.
    #[serde(default)]
    pub strategy: Option<MatchStrategy>,
    /// Semantic threshold; defaults to the configured threshold.
    #[serde(default)]
    pub threshold: Option<f32>,
    /// Recording time for a written version; defaults to now.
    #[serde(default)]
    pub tx_time: Option<DateTime<Utc>>,
}

impl StoreOptions {
    /// Options selecting a strategy.
    #[must_use]
    pub fn strategy(strategy: MatchStrategy) -> Self {
        Self {
            strategy: Some(strategy),
            ..Self::default()
        }
    }

    /// Set the semantic threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Set the recording time.
    #[must_use]
    pub fn at(mut self, tx_time: DateTime<Utc>) -> Self {
        self.tx_time = Some(tx_time);
        self
    }
}

/// Definite result of a store call.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreOutcome {
    /// The fact now representing the candidate: the new version, or the
    /// retained existing fact on `NONE`.
    pub fact: Fact,
    /// The action taken.
    pub action: Action,
    /// True when an existing lineage gained a version.
    pub was_updated: bool,
    /// True when the candidate matched an existing current fact.
    pub matched_existing: bool,
}

/// Deduplicating, versioning fact store engine.
#[derive(Clone)]
pub struct FactEngine {
    store: Arc<dyn RecordStore>,
    embedder: Option<Arc<dyn Embedder>>,
    config: EngineConfig,
}

impl std::fmt::Debug for FactEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactEngine")
            .field("embedder", &self.embedder.as_ref().map(|e| e.model_name().to_string()))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FactEngine {
    /// Create an engine without an embedder.
    ///
    /// `semantic` requests downgrade to `structural`.
    ///
    /// # Errors
    /// Returns `ValidationError` if the configuration is invalid.
    pub fn new(store: Arc<dyn RecordStore>, config: EngineConfig) -> Result<Self, ValidationError> {
        Ok(Self {
            store,
            embedder: None,
            config: config.validate()?,
        })
    }

    /// Create an engine with an embedder for semantic matching.
    ///
    /// # Errors
    /// Returns `ValidationError` if the configuration is invalid.
    pub fn with_embedder(
        store: Arc<dyn RecordStore>,
        embedder: Arc<dyn Embedder>,
        config: EngineConfig,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            store,
            embedder: Some(embedder),
            config: config.validate()?,
        })
    }

    /// An engine over a fresh in-memory store with default configuration.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemoryRecordStore::new()),
            embedder: None,
            config: EngineConfig::default(),
        }
    }

    /// The record store.
    pub fn record_store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// The embedder, if configured.
    pub fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        self.embedder.as_ref()
    }

    /// The active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn resolve_strategy(
        &self,
        requested: Option<MatchStrategy>,
        threshold: Option<f32>,
    ) -> Result<Strategy<'_>, ValidationError> {
        let threshold = check_threshold(threshold.unwrap_or(self.config.semantic_threshold))?;
        Ok(Strategy::resolve(
            requested.unwrap_or(self.config.default_strategy),
            self.embedder.as_deref(),
            threshold,
        ))
    }

    fn check_scope(&self, scope: &Scope) -> Result<(), ValidationError> {
        if scope.as_str().chars().count() > self.config.max_scope_length {
            return Err(ValidationError::InvalidScope {
                reason: format!("longer than {} characters", self.config.max_scope_length),
            });
        }
        Ok(())
    }

    fn check_text(&self, text: &str) -> Result<(), ValidationError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyFact);
        }
        if text.chars().count() > self.config.max_fact_length {
            return Err(ValidationError::FieldTooLong {
                field: "fact".to_string(),
                max_length: self.config.max_fact_length,
            });
        }
        Ok(())
    }

    fn check_tags(&self, tags: &[String]) -> Result<(), ValidationError> {
        if tags.len() > self.config.max_tags {
            return Err(ValidationError::TooManyTags {
                count: tags.len(),
                max: self.config.max_tags,
            });
        }
        Ok(())
    }

    // Candidates may arrive deserialized, bypassing the builder.
    fn check_candidate(&self, candidate: &CandidateFact) -> Result<(), ValidationError> {
        self.check_text(&candidate.fact)?;
        self.check_tags(&candidate.tags)?;
        check_structured_fields(
            candidate.subject.as_deref(),
            candidate.predicate.as_deref(),
            candidate.object.as_deref(),
        )?;
        if candidate.embedding.as_ref().is_some_and(Vec::is_empty) {
            return Err(ValidationError::EmptyEmbedding);
        }
        Ok(())
    }

    fn chain(&self) -> VersionChain<'_> {
        VersionChain::new(self.store.as_ref())
    }

    fn query(&self) -> FactQuery<'_> {
        FactQuery::new(self.store.as_ref())
    }

    /// Current version of a lineage; `None` if unknown, superseded, or invalidated.
    ///
    /// # Errors
    /// Returns validation or storage errors.
    pub fn get(&self, scope: &Scope, fact_id: FactId) -> FactResult<Option<Fact>> {
        self.check_scope(scope)?;
        Ok(self.store.get(scope, fact_id)?.filter(Fact::is_current))
    }

    /// Every version of a lineage, oldest first; empty if unknown or purged.
    ///
    /// # Errors
    /// Returns validation or storage errors.
    pub fn history(&self, scope: &Scope, fact_id: FactId) -> FactResult<Vec<Fact>> {
        self.check_scope(scope)?;
        Ok(self.chain().history(scope, fact_id)?)
    }

    /// Version `n` of a lineage.
    ///
    /// # Errors
    /// Returns validation or storage errors.
    pub fn version(&self, scope: &Scope, fact_id: FactId, version: u32) -> FactResult<Option<Fact>> {
        self.check_scope(scope)?;
        Ok(self.chain().version(scope, fact_id, version)?)
    }

    /// The version of a lineage that was current at `at`.
    ///
    /// # Errors
    /// Returns validation or storage errors.
    pub fn at_timestamp(
        &self,
        scope: &Scope,
        fact_id: FactId,
        at: DateTime<Utc>,
    ) -> FactResult<Option<Fact>> {
        self.check_scope(scope)?;
        Ok(self.chain().at_timestamp(scope, fact_id, at)?)
    }

    /// Entity profile: facts whose subject is `subject`, most recent first.
    ///
    /// # Errors
    /// Returns validation or storage errors.
    pub fn by_subject(
        &self,
        scope: &Scope,
        subject: &str,
        options: &QueryOptions,
    ) -> FactResult<Vec<Fact>> {
        self.check_scope(scope)?;
        Ok(self.query().by_subject(scope, subject, options)?)
    }

    /// Graph edges: facts with `subject` and `predicate`, most recent first.
    ///
    /// # Errors
    /// Returns validation or storage errors.
    pub fn by_relationship(
        &self,
        scope: &Scope,
        subject: &str,
        predicate: &str,
        options: &QueryOptions,
    ) -> FactResult<Vec<Fact>> {
        self.check_scope(scope)?;
        Ok(self
            .query()
            .by_relationship(scope, subject, predicate, options)?)
    }

    /// Facts accepted by `filter`.
    ///
    /// # Errors
    /// Returns validation or storage errors.
    pub fn list(&self, scope: &Scope, filter: &FactFilter) -> FactResult<Vec<Fact>> {
        self.check_scope(scope)?;
        Ok(self.query().list(scope, filter)?)
    }

    /// Number of facts accepted by `filter`.
    ///
    /// # Errors
    /// Returns validation or storage errors.
    pub fn count(&self, scope: &Scope, filter: &FactFilter) -> FactResult<usize> {
        self.check_scope(scope)?;
        Ok(self.query().count(scope, filter)?)
    }

    /// Substring search over current facts, most confident first.
    ///
    /// # Errors
    /// Returns `ValidationError::EmptyField` for a blank query.
    pub fn search(&self, scope: &Scope, query: &str, limit: usize) -> FactResult<Vec<Fact>> {
        self.check_scope(scope)?;
        if query.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "query".to_string(),
            }
            .into());
        }
        Ok(self.query().search(scope, query, limit)?)
    }

    /// Merge near-duplicate current facts in a scope.
    ///
    /// Running it again on a consolidated scope changes nothing.
    ///
    /// # Errors
    /// Returns validation errors, or a storage error if the scope cannot be
    /// scanned. Per-group failures are reported, not returned.
    pub fn consolidate(
        &self,
        scope: &Scope,
        options: &ConsolidateOptions,
    ) -> FactResult<ConsolidationReport> {
        self.check_scope(scope)?;
        let strategy = self.resolve_strategy(options.strategy, options.threshold)?;
        let tx_time = options.tx_time.unwrap_or_else(Utc::now);
        Ok(Consolidator::new(self.store.as_ref()).run(scope, &strategy, tx_time)?)
    }
}
