//! Normalized identity keys for exact and structural matching.
//!
//! Both the matcher and the record stores derive keys from here, so a
//! conditional create in the store and a lookup in the matcher always agree
//! on what "the same fact" means.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Case-fold, trim, and collapse internal whitespace runs to one space.
#[must_use]
pub fn normalize_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for word in s.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().flat_map(char::to_lowercase));
    }
    out
}

/// A normalized identity under one matching rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityKey {
    /// Normalized free-text statement.
    Text {
        /// Normalized text.
        text: String,
    },
    /// Normalized subject/predicate/object triple.
    Triple {
        /// Normalized subject.
        subject: String,
        /// Normalized predicate.
        predicate: String,
        /// Normalized object.
        object: String,
    },
}

impl IdentityKey {
    /// Key for exact matching on free text.
    #[must_use]
    pub fn text(fact: &str) -> Self {
        Self::Text {
            text: normalize_text(fact),
        }
    }

    /// Key for structural matching; `None` unless all three fields are present.
    #[must_use]
    pub fn triple(subject: Option<&str>, predicate: Option<&str>, object: Option<&str>) -> Option<Self> {
        match (subject, predicate, object) {
            (Some(s), Some(p), Some(o)) => Some(Self::Triple {
                subject: normalize_text(s),
                predicate: normalize_text(p),
                object: normalize_text(o),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text { text } => write!(f, "text:{text}"),
            Self::Triple {
                subject,
                predicate,
                object,
            } => write!(f, "triple:{subject}|{predicate}|{object}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_case_and_whitespace() {
        assert_eq!(normalize_text("  Alice   Works\tAt\nACME "), "alice works at acme");
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn normalize_handles_unicode_case() {
        assert_eq!(normalize_text("ÉCOLE Zürich"), "école zürich");
    }

    #[test]
    fn text_keys_ignore_formatting() {
        assert_eq!(IdentityKey::text("User likes  TEA"), IdentityKey::text("user likes tea"));
        assert_ne!(IdentityKey::text("user likes tea"), IdentityKey::text("user likes coffee"));
    }

    #[test]
    fn triple_requires_all_fields() {
        assert!(IdentityKey::triple(Some("alice"), Some("works_at"), None).is_none());
        let a = IdentityKey::triple(Some("Alice"), Some("works_at"), Some("ACME")).unwrap();
        let b = IdentityKey::triple(Some("alice "), Some("works_at"), Some("acme")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "triple:alice|works_at|acme");
    }
}
