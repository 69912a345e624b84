//! # KyroFacts - Deduplicating, Versioned Fact Memory for Agents
//!
//! KyroFacts records discrete, versioned facts for AI-agent memory. For every
//! incoming fact it decides whether the fact is new information, a duplicate,
//! a confidence-driven correction, or an explicit supersession, and it keeps
//! an auditable version lineage per fact identity.
//!
//! ## Core Concepts
//!
//! - **Fact**: a free-text statement with an optional subject/predicate/object triple
//! - **Confidence**: integer belief strength in `0..=100`; drives revision
//! - **Scope**: isolation boundary (memory space); matching never crosses it
//! - **Lineage**: versions sharing one `FactId`, linked by `supersedes` pointers
//! - **MatchStrategy**: `none | exact | structural | semantic`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kyrofacts::{CandidateFact, FactEngine, Scope, StoreOptions};
//!
//! let engine = FactEngine::in_memory();
//! let scope = Scope::new("agent-42")?;
//!
//! let fact = CandidateFact::builder()
//!     .fact("Alice works at ACME")
//!     .triple("alice", "works_at", "acme")
//!     .confidence(70)
//!     .build()?;
//! let first = engine.store(fact, &scope, &StoreOptions::default())?;
//!
//! let stronger = CandidateFact::builder()
//!     .fact("Alice is employed by ACME")
//!     .triple("alice", "works_at", "acme")
//!     .confidence(95)
//!     .build()?;
//! let second = engine.store(stronger, &scope, &StoreOptions::default())?;
//! assert!(second.was_updated);
//! assert_eq!(second.fact.version, 2);
//! assert_eq!(engine.history(&scope, first.fact.fact_id)?.len(), 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod confidence;
pub mod error;
pub mod fact;
pub mod identity;

// Collaborator seams
pub mod embedding;
pub mod storage;

// Engine components
pub mod chain;
pub mod config;
pub mod consolidate;
pub mod engine;
pub mod matcher;
pub mod query;
pub mod revision;

pub use chain::VersionChain;
pub use confidence::Confidence;
pub use config::{EngineConfig, MatchStrategy};
pub use consolidate::{ConsolidateOptions, ConsolidationReport, GroupFailure};
pub use embedding::{cosine_similarity, Embedder, EmbeddingError, LexicalEmbedder};
pub use engine::{FactEngine, StoreOptions, StoreOutcome};
pub use error::{ExecutionError, FactError, FactResult, ValidationError};
pub use fact::{
    CandidateFact, CandidateFactBuilder, Fact, FactChanges, FactId, FactRef, FactType, Scope,
    SourceRef,
};
pub use identity::{normalize_text, IdentityKey};
pub use matcher::{Matcher, Strategy};
pub use query::{FactFilter, FactQuery, QueryOptions};
pub use revision::{decide, Action};
pub use storage::{InMemoryRecordStore, RecordStore, Retirement, StorageError, WriteCondition};
