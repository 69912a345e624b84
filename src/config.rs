//! Engine configuration, loadable from TOML.
//!
//! ```toml
//! default_strategy = "semantic"
//! semantic_threshold = 0.9
//! max_write_attempts = 5
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// How an incoming fact is matched against existing current facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Never match; every store adds a new lineage.
    None,
    /// Normalized free-text equality.
    Exact,
    /// Normalized subject/predicate/object equality.
    #[default]
    Structural,
    /// Embedding cosine similarity above a threshold.
    Semantic,
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Exact => "exact",
            Self::Structural => "structural",
            Self::Semantic => "semantic",
        };
        f.write_str(s)
    }
}

/// Deployment-wide defaults and limits for [`FactEngine`](crate::FactEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Strategy used when a call does not pick one.
    #[serde(default)]
    pub default_strategy: MatchStrategy,
    /// Minimum cosine similarity for a semantic match.
    #[serde(default = "default_semantic_threshold")]
    pub semantic_threshold: f32,
    /// Match-decide-apply passes before a write gives up with contention.
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,
    /// Maximum free-text length, in characters.
    #[serde(default = "default_max_fact_length")]
    pub max_fact_length: usize,
    /// Maximum number of tags per fact.
    #[serde(default = "default_max_tags")]
    pub max_tags: usize,
    /// Maximum isolation scope name length, in characters.
    #[serde(default = "default_max_scope_length")]
    pub max_scope_length: usize,
}

fn default_semantic_threshold() -> f32 {
    0.85
}
fn default_max_write_attempts() -> u32 {
    3
}
fn default_max_fact_length() -> usize {
    4096
}
fn default_max_tags() -> usize {
    32
}
fn default_max_scope_length() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_strategy: MatchStrategy::default(),
            semantic_threshold: default_semantic_threshold(),
            max_write_attempts: default_max_write_attempts(),
            max_fact_length: default_max_fact_length(),
            max_tags: default_max_tags(),
            max_scope_length: default_max_scope_length(),
        }
    }
}

/// Checks a similarity threshold lies in `(0, 1]`.
pub(crate) fn check_threshold(value: f32) -> Result<f32, ValidationError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(value)
    } else {
        Err(ValidationError::InvalidThreshold { value })
    }
}

impl EngineConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidConfig` if the TOML is malformed or
    /// the values are out of range.
    pub fn from_toml(toml_str: &str) -> Result<Self, ValidationError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_toml(&content)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ValidationError` for an out-of-range threshold or a zero limit.
    pub fn validate(self) -> Result<Self, ValidationError> {
        check_threshold(self.semantic_threshold)?;
        if self.max_write_attempts == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "max_write_attempts must be at least 1".to_string(),
            });
        }
        for (name, value) in [
            ("max_fact_length", self.max_fact_length),
            ("max_scope_length", self.max_scope_length),
        ] {
            if value == 0 {
                return Err(ValidationError::InvalidConfig {
                    reason: format!("{name} must be positive"),
                });
            }
        }
        Ok(self)
    }
}
