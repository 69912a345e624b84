//! Fact types: the unit of knowledge in KyroFacts.
//!
//! A fact is a versioned assertion. Every accepted revision of one logical
//! assertion appends a new version to its lineage; all versions share the
//! same `fact_id` and are linked through `supersedes` / `superseded_by`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::confidence::Confidence;
use crate::error::ValidationError;
use crate::identity::IdentityKey;

/// Stable identity of a fact lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactId(uuid::Uuid);

impl FactId {
    /// Creates a new random fact ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl Default for FactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lineage-relative pointer to one version of a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactRef {
    /// Lineage the version belongs to.
    pub fact_id: FactId,
    /// Version number within the lineage.
    pub version: u32,
}

impl FactRef {
    /// Pointer to `version` of `fact_id`.
    #[must_use]
    pub const fn new(fact_id: FactId, version: u32) -> Self {
        Self { fact_id, version }
    }
}

impl fmt::Display for FactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.fact_id, self.version)
    }
}

/// Isolation scope (memory space). Matching and queries never cross scopes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Scope(String);

impl Scope {
    /// Creates a scope.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidScope` if the name is blank or
    /// contains control characters.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::InvalidScope {
                reason: "scope name cannot be empty".to_string(),
            });
        }
        if name.chars().any(char::is_control) {
            return Err(ValidationError::InvalidScope {
                reason: "scope name cannot contain control characters".to_string(),
            });
        }
        Ok(Self(name))
    }

    /// The scope name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Scope {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.0
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed set of fact categories. Informational only; matching ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactType {
    Preference,
    Identity,
    #[default]
    Knowledge,
    Relationship,
    Event,
}

impl fmt::Display for FactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preference => write!(f, "preference"),
            Self::Identity => write!(f, "identity"),
            Self::Knowledge => write!(f, "knowledge"),
            Self::Relationship => write!(f, "relationship"),
            Self::Event => write!(f, "event"),
        }
    }
}

impl FromStr for FactType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preference" => Ok(Self::Preference),
            "identity" => Ok(Self::Identity),
            "knowledge" => Ok(Self::Knowledge),
            "relationship" => Ok(Self::Relationship),
            "event" => Ok(Self::Event),
            _ => Err(ValidationError::UnknownFactType {
                value: s.to_string(),
            }),
        }
    }
}

/// Conversation provenance. Passed through opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceRef {
    /// Conversation the fact was extracted from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Messages within that conversation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message_ids: Vec<String>,

    /// Upstream memory record, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
}

impl SourceRef {
    /// Provenance pointing at a conversation and some of its messages.
    #[must_use]
    pub fn conversation(conversation_id: impl Into<String>, message_ids: Vec<String>) -> Self {
        Self {
            conversation_id: Some(conversation_id.into()),
            message_ids,
            memory_id: None,
        }
    }
}

/// One stored version of a fact.
///
/// The persisted shape is stable across releases; fields are only ever added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Lineage id, shared by every version.
    pub fact_id: FactId,
    /// Namespace the fact lives in.
    pub scope: Scope,
    /// Category of the fact.
    #[serde(default)]
    pub fact_type: FactType,

    /// Subject of the triple, if structured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Predicate of the triple, if structured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
    /// Object of the triple, if structured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,

    /// Free-text statement; always present.
    pub fact: String,
    /// Confidence in this version, 0..=100.
    pub confidence: Confidence,

    /// Free-form labels.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Where the fact came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<SourceRef>,
    /// Conversation participant the fact is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    /// Owning user, used by per-user erasure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// 1 at creation, +1 per accepted revision.
    pub version: u32,
    /// Previous version, absent on version 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<FactRef>,
    /// Replacing version; set once this version stops being current.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<FactRef>,

    /// Soft-delete marker.
    #[serde(default)]
    pub invalid: bool,

    /// When this version was recorded.
    pub created_at: DateTime<Utc>,

    /// Vector used for semantic matching.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Opaque caller data.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Fact {
    /// Pointer to this exact version.
    #[must_use]
    pub const fn fact_ref(&self) -> FactRef {
        FactRef::new(self.fact_id, self.version)
    }

    /// True when subject, predicate, and object are all present.
    #[must_use]
    pub fn is_structured(&self) -> bool {
        self.subject.is_some() && self.predicate.is_some() && self.object.is_some()
    }

    /// True for the authoritative version of a lineage.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.superseded_by.is_none() && !self.invalid
    }

    /// Normalized free-text identity.
    #[must_use]
    pub fn text_key(&self) -> IdentityKey {
        IdentityKey::text(&self.fact)
    }

    /// Normalized triple identity, if structured.
    #[must_use]
    pub fn triple_key(&self) -> Option<IdentityKey> {
        IdentityKey::triple(
            self.subject.as_deref(),
            self.predicate.as_deref(),
            self.object.as_deref(),
        )
    }

    /// Every identity key this version can be found under.
    #[must_use]
    pub fn identity_keys(&self) -> Vec<IdentityKey> {
        let mut keys = vec![self.text_key()];
        keys.extend(self.triple_key());
        keys
    }
}

/// An incoming fact, not yet assigned to a lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFact {
    /// Free-text statement.
    pub fact: String,
    /// Confidence in the statement.
    pub confidence: Confidence,
    /// Category of the fact.
    #[serde(default)]
    pub fact_type: FactType,
    /// Subject of the triple.
    #[serde(default)]
    pub subject: Option<String>,
    /// Predicate of the triple.
    #[serde(default)]
    pub predicate: Option<String>,
    /// Object of the triple.
    #[serde(default)]
    pub object: Option<String>,
    /// Free-form labels.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Where the fact came from.
    #[serde(default)]
    pub source_ref: Option<SourceRef>,
    /// Conversation participant the fact is about.
    #[serde(default)]
    pub participant_id: Option<String>,
    /// Owning user.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Caller-computed embedding; skips the embedder when present.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Opaque caller data.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl CandidateFact {
    /// Start building a candidate.
    pub fn builder() -> CandidateFactBuilder {
        CandidateFactBuilder::new()
    }

    /// True when subject, predicate, and object are all present.
    #[must_use]
    pub fn is_structured(&self) -> bool {
        self.subject.is_some() && self.predicate.is_some() && self.object.is_some()
    }

    /// Identity key of the normalized free text.
    #[must_use]
    pub fn text_key(&self) -> IdentityKey {
        IdentityKey::text(&self.fact)
    }

    /// Identity key of the normalized triple, when all three parts are set.
    #[must_use]
    pub fn triple_key(&self) -> Option<IdentityKey> {
        IdentityKey::triple(
            self.subject.as_deref(),
            self.predicate.as_deref(),
            self.object.as_deref(),
        )
    }

    /// Materializes this candidate as a stored version.
    #[must_use]
    pub fn into_record(
        self,
        fact_id: FactId,
        scope: Scope,
        version: u32,
        supersedes: Option<FactRef>,
        created_at: DateTime<Utc>,
    ) -> Fact {
        Fact {
            fact_id,
            scope,
            fact_type: self.fact_type,
            subject: self.subject,
            predicate: self.predicate,
            object: self.object,
            fact: self.fact,
            confidence: self.confidence,
            tags: self.tags,
            source_ref: self.source_ref,
            participant_id: self.participant_id,
            user_id: self.user_id,
            version,
            supersedes,
            superseded_by: None,
            invalid: false,
            created_at,
            embedding: self.embedding,
            metadata: self.metadata,
        }
    }
}

/// Builder for [`CandidateFact`].
///
/// Ensures the free text and confidence are set and well-formed.
#[derive(Debug, Default)]
pub struct CandidateFactBuilder {
    fact: Option<String>,
    confidence: Option<u8>,
    fact_type: FactType,
    subject: Option<String>,
    predicate: Option<String>,
    object: Option<String>,
    tags: Vec<String>,
    source_ref: Option<SourceRef>,
    participant_id: Option<String>,
    user_id: Option<String>,
    embedding: Option<Vec<f32>>,
    metadata: Option<serde_json::Value>,
}

impl CandidateFactBuilder {
    /// Empty builder; `fact` and `confidence` are required.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the free-text statement.
    #[must_use]
    pub fn fact(mut self, fact: impl Into<String>) -> Self {
        self.fact = Some(fact.into());
        self
    }

    /// Set the confidence (validated on build).
    #[must_use]
    pub fn confidence(mut self, confidence: u8) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Set the category.
    #[must_use]
    pub fn fact_type(mut self, fact_type: FactType) -> Self {
        self.fact_type = fact_type;
        self
    }

    /// Set the triple subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set the triple predicate.
    #[must_use]
    pub fn predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    /// Set the triple object.
    #[must_use]
    pub fn object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    /// Sets subject, predicate, and object together.
    #[must_use]
    pub fn triple(
        self,
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        self.subject(subject).predicate(predicate).object(object)
    }

    /// Add one tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add several tags.
    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Set provenance.
    #[must_use]
    pub fn source_ref(mut self, source_ref: SourceRef) -> Self {
        self.source_ref = Some(source_ref);
        self
    }

    /// Set the participant.
    #[must_use]
    pub fn participant_id(mut self, participant_id: impl Into<String>) -> Self {
        self.participant_id = Some(participant_id.into());
        self
    }

    /// Set the owning user.
    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Supply a precomputed embedding.
    #[must_use]
    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Attach opaque caller data.
    #[must_use]
    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Builds the candidate.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the text is missing or blank, the
    /// confidence is missing or above 100, or a structured field is blank.
    pub fn build(self) -> Result<CandidateFact, ValidationError> {
        let fact = self.fact.ok_or(ValidationError::MissingField {
            field: "fact".to_string(),
        })?;
        if fact.trim().is_empty() {
            return Err(ValidationError::EmptyFact);
        }

        let confidence = self.confidence.ok_or(ValidationError::MissingField {
            field: "confidence".to_string(),
        })?;
        let confidence = Confidence::new(confidence)?;

        let candidate = CandidateFact {
            fact,
            confidence,
            fact_type: self.fact_type,
            subject: self.subject,
            predicate: self.predicate,
            object: self.object,
            tags: self.tags,
            source_ref: self.source_ref,
            participant_id: self.participant_id,
            user_id: self.user_id,
            embedding: self.embedding,
            metadata: self.metadata.unwrap_or(serde_json::Value::Null),
        };
        check_structured_fields(
            candidate.subject.as_deref(),
            candidate.predicate.as_deref(),
            candidate.object.as_deref(),
        )?;
        Ok(candidate)
    }
}

pub(crate) fn check_structured_fields(
    subject: Option<&str>,
    predicate: Option<&str>,
    object: Option<&str>,
) -> Result<(), ValidationError> {
    for (field, value) in [("subject", subject), ("predicate", predicate), ("object", object)] {
        if value.is_some_and(|v| v.trim().is_empty()) {
            return Err(ValidationError::EmptyField {
                field: field.to_string(),
            });
        }
    }
    Ok(())
}

/// Caller-supplied changes for an explicit update.
///
/// Unset fields carry over from the current version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactChanges {
    /// Replacement statement.
    #[serde(default)]
    pub fact: Option<String>,
    /// Replacement confidence.
    #[serde(default)]
    pub confidence: Option<Confidence>,
    /// Replacement category.
    #[serde(default)]
    pub fact_type: Option<FactType>,
    /// Replacement triple subject.
    #[serde(default)]
    pub subject: Option<String>,
    /// Replacement triple predicate.
    #[serde(default)]
    pub predicate: Option<String>,
    /// Replacement triple object.
    #[serde(default)]
    pub object: Option<String>,
    /// Replacement tag set.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Replacement provenance.
    #[serde(default)]
    pub source_ref: Option<SourceRef>,
    /// Replacement embedding; when omitted and the text changes, recomputed or dropped.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Replacement caller data.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Recording time for the new version; defaults to now.
    #[serde(default)]
    pub tx_time: Option<DateTime<Utc>>,
}

impl FactChanges {
    /// Applies the changes on top of `current`, producing the next version's content.
    ///
    /// Pointers, version, and timestamps are left for the version chain to set.
    #[must_use]
    pub fn apply_to(&self, current: &Fact) -> Fact {
        let mut next = current.clone();
        if let Some(fact) = &self.fact {
            next.fact.clone_from(fact);
        }
        if let Some(confidence) = self.confidence {
            next.confidence = confidence;
        }
        if let Some(fact_type) = self.fact_type {
            next.fact_type = fact_type;
        }
        if let Some(subject) = &self.subject {
            next.subject = Some(subject.clone());
        }
        if let Some(predicate) = &self.predicate {
            next.predicate = Some(predicate.clone());
        }
        if let Some(object) = &self.object {
            next.object = Some(object.clone());
        }
        if let Some(tags) = &self.tags {
            next.tags.clone_from(tags);
        }
        if let Some(source_ref) = &self.source_ref {
            next.source_ref = Some(source_ref.clone());
        }
        if self.fact.is_some() || self.embedding.is_some() {
            // A stale embedding would describe the old text.
            next.embedding.clone_from(&self.embedding);
        }
        if let Some(metadata) = &self.metadata {
            next.metadata = metadata.clone();
        }
        next
    }

    /// Validates the provided fields.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for blank text or blank structured fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.fact.as_deref().is_some_and(|f| f.trim().is_empty()) {
            return Err(ValidationError::EmptyFact);
        }
        if self.embedding.as_ref().is_some_and(Vec::is_empty) {
            return Err(ValidationError::EmptyEmbedding);
        }
        check_structured_fields(
            self.subject.as_deref(),
            self.predicate.as_deref(),
            self.object.as_deref(),
        )
    }
}
