//! Relation records.
//!
//! A relation is a directed, typed, weighted edge between two entities.
//! Relations only hold the endpoint ids, so cycles in the graph never become
//! ownership cycles.

use super::entity::{EntityId, Metadata, Source, clamp_unit};
use super::temporal::Validity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(String);

impl RelationId {
    /// Creates a relation ID from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new time-ordered relation ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Broad grouping of relation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationCategory {
    /// Structural code relationships.
    Code,
    /// Meaning-level relationships.
    Semantic,
    /// Ordering and versioning relationships.
    Temporal,
}

/// Type of relation between entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// Caller invokes callee.
    Calls,
    /// Module imports another.
    Imports,
    /// Type extends a parent.
    Extends,
    /// Type implements an interface.
    Implements,
    /// Symbol uses another.
    Uses,
    /// Scope defines a symbol.
    Defines,
    /// Container holds a member.
    Contains,
    /// Entity depends on another.
    DependsOn,
    /// Method overrides a parent method.
    Overrides,
    /// Module exports a symbol.
    Exports,
    /// General association.
    RelatedTo,
    /// Near-duplicate content.
    SimilarTo,
    /// Interchangeable option.
    AlternativeTo,
    /// Fix for a problem.
    Solves,
    /// Cause of a problem.
    Causes,
    /// Prerequisite.
    Requires,
    /// Mutually exclusive.
    ConflictsWith,
    /// Textual reference.
    Mentions,
    /// Newer version replaces an older one.
    Supersedes,
    /// Derived from another record.
    DerivedFrom,
    /// Happened at the same time.
    ConcurrentWith,
    /// Happened before.
    Before,
    /// Happened after.
    After,
    /// Immediately precedes.
    Precedes,
}

impl RelationType {
    /// Returns all relation type variants.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Calls,
            Self::Imports,
            Self::Extends,
            Self::Implements,
            Self::Uses,
            Self::Defines,
            Self::Contains,
            Self::DependsOn,
            Self::Overrides,
            Self::Exports,
            Self::RelatedTo,
            Self::SimilarTo,
            Self::AlternativeTo,
            Self::Solves,
            Self::Causes,
            Self::Requires,
            Self::ConflictsWith,
            Self::Mentions,
            Self::Supersedes,
            Self::DerivedFrom,
            Self::ConcurrentWith,
            Self::Before,
            Self::After,
            Self::Precedes,
        ]
    }

    /// Returns the relation type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Calls => "calls",
            Self::Imports => "imports",
            Self::Extends => "extends",
            Self::Implements => "implements",
            Self::Uses => "uses",
            Self::Defines => "defines",
            Self::Contains => "contains",
            Self::DependsOn => "depends_on",
            Self::Overrides => "overrides",
            Self::Exports => "exports",
            Self::RelatedTo => "related_to",
            Self::SimilarTo => "similar_to",
            Self::AlternativeTo => "alternative_to",
            Self::Solves => "solves",
            Self::Causes => "causes",
            Self::Requires => "requires",
            Self::ConflictsWith => "conflicts_with",
            Self::Mentions => "mentions",
            Self::Supersedes => "supersedes",
            Self::DerivedFrom => "derived_from",
            Self::ConcurrentWith => "concurrent_with",
            Self::Before => "before",
            Self::After => "after",
            Self::Precedes => "precedes",
        }
    }

    /// Returns the category this type belongs to.
    #[must_use]
    pub const fn category(&self) -> RelationCategory {
        match self {
            Self::Calls
            | Self::Imports
            | Self::Extends
            | Self::Implements
            | Self::Uses
            | Self::Defines
            | Self::Contains
            | Self::DependsOn
            | Self::Overrides
            | Self::Exports => RelationCategory::Code,
            Self::RelatedTo
            | Self::SimilarTo
            | Self::AlternativeTo
            | Self::Solves
            | Self::Causes
            | Self::Requires
            | Self::ConflictsWith
            | Self::Mentions => RelationCategory::Semantic,
            Self::Supersedes
            | Self::DerivedFrom
            | Self::ConcurrentWith
            | Self::Before
            | Self::After
            | Self::Precedes => RelationCategory::Temporal,
        }
    }

    /// Parses a relation type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown relation type: {s}"))
    }
}

/// A directed edge in the memory graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    /// Unique identifier.
    pub id: RelationId,
    /// Source entity.
    pub from_id: EntityId,
    /// Target entity.
    pub to_id: EntityId,
    /// Relation type.
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    /// Strength in `[0, 1]`. Path weights multiply these.
    pub weight: f32,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Start of validity.
    pub valid_from: DateTime<Utc>,
    /// End of validity (None = current).
    pub valid_to: Option<DateTime<Utc>>,
    /// Provenance.
    pub source: Source,
    /// Session that produced the relation.
    pub session_id: Option<String>,
    /// Free-form metadata.
    pub metadata: Metadata,
}

impl Relation {
    /// Returns the validity window.
    #[must_use]
    pub const fn validity(&self) -> Validity {
        Validity {
            valid_from: self.valid_from,
            valid_to: self.valid_to,
        }
    }

    /// Returns true if the relation has not been invalidated.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Returns true if `id` is either endpoint.
    #[must_use]
    pub fn touches(&self, id: &EntityId) -> bool {
        &self.from_id == id || &self.to_id == id
    }

    /// Returns the endpoint opposite to `id`, if `id` is an endpoint.
    #[must_use]
    pub fn other_end(&self, id: &EntityId) -> Option<&EntityId> {
        if &self.from_id == id {
            Some(&self.to_id)
        } else if &self.to_id == id {
            Some(&self.from_id)
        } else {
            None
        }
    }
}

/// Input for creating a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRelation {
    /// Source entity.
    pub from_id: EntityId,
    /// Target entity.
    pub to_id: EntityId,
    /// Relation type.
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    /// Strength (defaults to 1.0).
    #[serde(default)]
    pub weight: Option<f32>,
    /// Confidence (defaults to 1.0).
    #[serde(default)]
    pub confidence: Option<f32>,
    /// Provenance (defaults to `inferred`).
    #[serde(default)]
    pub source: Source,
    /// Session that produced the relation.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Start of validity (defaults to now).
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewRelation {
    /// Creates a relation input with the required fields.
    #[must_use]
    pub fn new(from_id: EntityId, to_id: EntityId, relation_type: RelationType) -> Self {
        Self {
            from_id,
            to_id,
            relation_type,
            weight: None,
            confidence: None,
            source: Source::Inferred,
            session_id: None,
            valid_from: None,
            metadata: Metadata::new(),
        }
    }

    /// Sets the weight, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = Some(clamp_unit(weight));
        self
    }

    /// Sets the confidence, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(clamp_unit(confidence));
        self
    }

    /// Sets the provenance.
    #[must_use]
    pub const fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    /// Sets the session id.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Fills defaults and produces the stored record.
    #[must_use]
    pub fn into_relation(self, now: DateTime<Utc>) -> Relation {
        Relation {
            id: RelationId::generate(),
            from_id: self.from_id,
            to_id: self.to_id,
            relation_type: self.relation_type,
            weight: self.weight.map_or(1.0, clamp_unit),
            confidence: self.confidence.map_or(1.0, clamp_unit),
            created_at: now,
            valid_from: self.valid_from.unwrap_or(now),
            valid_to: None,
            source: self.source,
            session_id: self.session_id,
            metadata: self.metadata,
        }
    }
}

/// Partial update for a relation. Endpoints are immutable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationUpdate {
    /// New type.
    pub relation_type: Option<RelationType>,
    /// New weight (clamped).
    pub weight: Option<f32>,
    /// New confidence (clamped).
    pub confidence: Option<f32>,
    /// New provenance.
    pub source: Option<Source>,
    /// New session id.
    pub session_id: Option<Option<String>>,
    /// New end of validity.
    pub valid_to: Option<Option<DateTime<Utc>>>,
    /// Replacement metadata.
    pub metadata: Option<Metadata>,
}

impl RelationUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the weight.
    #[must_use]
    pub const fn weight(mut self, weight: f32) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Sets the confidence.
    #[must_use]
    pub const fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Sets the end of validity.
    #[must_use]
    pub const fn valid_to(mut self, valid_to: Option<DateTime<Utc>>) -> Self {
        self.valid_to = Some(valid_to);
        self
    }

    /// Merges the supplied fields into `relation`.
    pub fn apply(self, relation: &mut Relation) {
        if let Some(relation_type) = self.relation_type {
            relation.relation_type = relation_type;
        }
        if let Some(weight) = self.weight {
            relation.weight = clamp_unit(weight);
        }
        if let Some(confidence) = self.confidence {
            relation.confidence = clamp_unit(confidence);
        }
        if let Some(source) = self.source {
            relation.source = source;
        }
        if let Some(session_id) = self.session_id {
            relation.session_id = session_id;
        }
        if let Some(valid_to) = self.valid_to {
            relation.valid_to = valid_to;
        }
        if let Some(metadata) = self.metadata {
            relation.metadata = metadata;
        }
    }
}
