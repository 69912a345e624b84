//! Error types for KyroFacts.
//!
//! All errors in KyroFacts are strongly typed using thiserror.
//! "No match" and "duplicate found" are never errors; they are normal
//! outcomes encoded in return values. Only malformed input, exhausted
//! write contention, and dependency failures surface here.

use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::fact::FactId;
use crate::storage::StorageError;

/// Validation errors raised before any store interaction.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Confidence value {value} is out of range [0, 100]")]
    ConfidenceOutOfRange {
        value: i64,
    },

    #[error("Fact text cannot be empty")]
    EmptyFact,

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Unknown fact type: {value}")]
    UnknownFactType {
        value: String,
    },

    #[error("Isolation scope is invalid: {reason}")]
    InvalidScope {
        reason: String,
    },

    #[error("Field '{field}' cannot be empty when provided")]
    EmptyField {
        field: String,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Too many tags: {count} (max: {max})")]
    TooManyTags {
        count: usize,
        max: usize,
    },

    #[error("Similarity threshold {value} must be within (0.0, 1.0]")]
    InvalidThreshold {
        value: f32,
    },

    #[error("Embedding cannot be empty")]
    EmptyEmbedding,

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors raised while executing an accepted operation.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Fact not found: {id}")]
    FactNotFound {
        id: FactId,
    },

    #[error("Fact {id} has no current version (superseded or invalidated)")]
    NotCurrent {
        id: FactId,
    },

    #[error("Fact {id} cannot take the identity of current fact {holder}")]
    IdentityConflict {
        id: FactId,
        holder: FactId,
    },

    #[error("Write contention: gave up after {attempts} attempts")]
    Contention {
        attempts: u32,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// Top-level error type for KyroFacts.
#[derive(Debug, Error)]
pub enum FactError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl From<StorageError> for FactError {
    fn from(err: StorageError) -> Self {
        Self::Execution(ExecutionError::Storage(err))
    }
}

impl From<EmbeddingError> for FactError {
    fn from(err: EmbeddingError) -> Self {
        Self::Execution(ExecutionError::Embedding(err))
    }
}

impl FactError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if optimistic-write retries were exhausted.
    #[must_use]
    pub const fn is_contention(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::Contention { .. }))
    }

    /// Returns true if a dependency (record store or embedder) failed.
    #[must_use]
    pub const fn is_dependency(&self) -> bool {
        matches!(
            self,
            Self::Execution(ExecutionError::Storage(_) | ExecutionError::Embedding(_))
        )
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => matches!(e, ExecutionError::Contention { .. }),
        }
    }
}

/// Result type alias for KyroFacts operations.
pub type FactResult<T> = Result<T, FactError>;
