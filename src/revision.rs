//! Belief revision: what to do with a candidate given what it matched.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::confidence::Confidence;
use crate::fact::Fact;

/// Classification of an incoming fact against the existing belief.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// New information: start a lineage at version 1.
    Add,
    /// Duplicate at equal or lower confidence: keep the existing fact.
    None,
    /// Duplicate at higher confidence: the lineage gains a version.
    Update,
    /// Caller-directed replacement, regardless of confidence.
    Supersede,
}

impl Action {
    /// True for actions that write to the store.
    #[must_use]
    pub const fn writes(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "ADD",
            Self::None => "NONE",
            Self::Update => "UPDATE",
            Self::Supersede => "SUPERSEDE",
        };
        f.write_str(s)
    }
}

/// Decide the action for a candidate on the deduplicating store path.
///
/// A candidate only displaces a matched fact when it is strictly more
/// confident. Explicit updates do not go through here; they are always
/// [`Action::Supersede`].
#[must_use]
pub fn decide(candidate: Confidence, matched: Option<&Fact>) -> Action {
    match matched {
        None => Action::Add,
        Some(existing) if candidate > existing.confidence => Action::Update,
        Some(_) => Action::None,
    }
}
