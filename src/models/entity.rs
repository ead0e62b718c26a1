//! Entity records.
//!
//! An entity is a stored node: a code symbol, a fact extracted from a
//! conversation, or a knowledge item. Entities carry provenance, temporal
//! validity, access statistics, and a `vector_id` that pairs them with a
//! document in the external vector index.

use super::temporal::Validity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Free-form key/value metadata attached to entities and relations.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Maximum length of a content preview in characters.
pub const PREVIEW_MAX_CHARS: usize = 200;

/// Returns a preview of `content` of at most [`PREVIEW_MAX_CHARS`] characters.
///
/// Longer content keeps its first 197 characters followed by `...`.
#[must_use]
pub fn content_preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_MAX_CHARS {
        return content.to_string();
    }
    let mut preview: String = content.chars().take(PREVIEW_MAX_CHARS - 3).collect();
    preview.push_str("...");
    preview
}

/// Clamps a weight or confidence into `[0, 1]`. NaN becomes 0.
#[must_use]
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// Unique identifier for an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity ID from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new time-ordered entity ID.
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

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Broad grouping of entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    /// Symbols found by static analysis.
    Code,
    /// Facts extracted from a conversation.
    Conversation,
    /// Project-level knowledge.
    Knowledge,
}

/// Type of entity in the memory graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A function or method.
    Function,
    /// A class.
    Class,
    /// An interface or trait.
    Interface,
    /// A module or file-level namespace.
    Module,
    /// A variable or constant.
    Variable,
    /// A type alias.
    TypeAlias,
    /// An enumeration.
    Enum,
    /// A stated user preference.
    UserPreference,
    /// A decision taken during a session.
    Decision,
    /// A requirement.
    Requirement,
    /// A recurring error and how it was handled.
    ErrorPattern,
    /// An abstract concept.
    Concept,
    /// A constraint the code must respect.
    Constraint,
    /// An architectural pattern in use.
    ArchitecturePattern,
    /// An HTTP or RPC endpoint.
    ApiEndpoint,
    /// An external dependency.
    Dependency,
    /// A configuration item.
    Configuration,
}

impl EntityType {
    /// Returns all entity type variants.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Function,
            Self::Class,
            Self::Interface,
            Self::Module,
            Self::Variable,
            Self::TypeAlias,
            Self::Enum,
            Self::UserPreference,
            Self::Decision,
            Self::Requirement,
            Self::ErrorPattern,
            Self::Concept,
            Self::Constraint,
            Self::ArchitecturePattern,
            Self::ApiEndpoint,
            Self::Dependency,
            Self::Configuration,
        ]
    }

    /// Returns the entity type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Module => "module",
            Self::Variable => "variable",
            Self::TypeAlias => "type_alias",
            Self::Enum => "enum",
            Self::UserPreference => "user_preference",
            Self::Decision => "decision",
            Self::Requirement => "requirement",
            Self::ErrorPattern => "error_pattern",
            Self::Concept => "concept",
            Self::Constraint => "constraint",
            Self::ArchitecturePattern => "architecture_pattern",
            Self::ApiEndpoint => "api_endpoint",
            Self::Dependency => "dependency",
            Self::Configuration => "configuration",
        }
    }

    /// Returns the category this type belongs to.
    #[must_use]
    pub const fn category(&self) -> EntityCategory {
        match self {
            Self::Function
            | Self::Class
            | Self::Interface
            | Self::Module
            | Self::Variable
            | Self::TypeAlias
            | Self::Enum => EntityCategory::Code,
            Self::UserPreference
            | Self::Decision
            | Self::Requirement
            | Self::ErrorPattern
            | Self::Concept
            | Self::Constraint => EntityCategory::Conversation,
            Self::ArchitecturePattern
            | Self::ApiEndpoint
            | Self::Dependency
            | Self::Configuration => EntityCategory::Knowledge,
        }
    }

    /// Parses an entity type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown entity type: {s}"))
    }
}

/// Provenance of an entity or relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Produced by static code analysis.
    CodeAnalysis,
    /// Extracted from a conversation.
    Conversation,
    /// Entered explicitly by a user.
    UserDefined,
    /// Inferred by the system.
    #[default]
    Inferred,
}

impl Source {
    /// Returns all source variants.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::CodeAnalysis,
            Self::Conversation,
            Self::UserDefined,
            Self::Inferred,
        ]
    }

    /// Returns the source as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CodeAnalysis => "code_analysis",
            Self::Conversation => "conversation",
            Self::UserDefined => "user_defined",
            Self::Inferred => "inferred",
        }
    }

    /// Parses a source from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "code_analysis" | "code" => Some(Self::CodeAnalysis),
            "conversation" => Some(Self::Conversation),
            "user_defined" | "user" => Some(Self::UserDefined),
            "inferred" => Some(Self::Inferred),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown source: {s}"))
    }
}

/// Source location of a code entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Path of the file containing the symbol.
    pub file_path: String,
    /// First line (1-based).
    pub start_line: u32,
    /// Last line (inclusive).
    pub end_line: u32,
}

impl Location {
    /// Creates a location.
    #[must_use]
    pub fn new(file_path: impl Into<String>, start_line: u32, end_line: u32) -> Self {
        Self {
            file_path: file_path.into(),
            start_line,
            end_line,
        }
    }
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name.
    pub name: String,
    /// Declared type, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_annotation: Option<String>,
    /// Whether the parameter may be omitted.
    #[serde(default)]
    pub optional: bool,
}

/// Signature payload for function entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    /// Ordered parameters.
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// Declared return type, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    /// Whether the function is async.
    #[serde(default)]
    pub is_async: bool,
    /// Whether the function is exported from its module.
    #[serde(default)]
    pub is_exported: bool,
}

/// Structural payload for class entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    /// Parent class, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    /// Implemented interfaces.
    #[serde(default)]
    pub implements: Vec<String>,
    /// Method names.
    #[serde(default)]
    pub methods: Vec<String>,
    /// Property names.
    #[serde(default)]
    pub properties: Vec<String>,
    /// Whether the class is abstract.
    #[serde(default)]
    pub is_abstract: bool,
    /// Whether the class is exported from its module.
    #[serde(default)]
    pub is_exported: bool,
}

/// A node in the memory graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Unique identifier.
    pub id: EntityId,
    /// Entity type.
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// Display name.
    pub name: String,
    /// Full text or code.
    pub content: String,
    /// Derived preview of `content`.
    pub content_preview: String,
    /// Source location (code entities only).
    pub location: Option<Location>,
    /// Function signature payload.
    pub signature: Option<FunctionSignature>,
    /// Class payload.
    pub class_info: Option<ClassInfo>,
    /// Provenance.
    pub source: Source,
    /// Session that produced the entity.
    pub session_id: Option<String>,
    /// Project the entity belongs to.
    pub project_path: Option<String>,
    /// Hash of the file the entity was extracted from.
    pub file_hash: Option<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Number of recorded accesses.
    pub access_count: u64,
    /// Last recorded access.
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Start of validity.
    pub valid_from: DateTime<Utc>,
    /// End of validity (None = current).
    pub valid_to: Option<DateTime<Utc>>,
    /// Paired document in the vector index.
    pub vector_id: Option<String>,
    /// Older version this entity replaces.
    pub supersedes_id: Option<EntityId>,
    /// Free-form metadata.
    pub metadata: Metadata,
}

impl Entity {
    /// Returns the validity window.
    #[must_use]
    pub const fn validity(&self) -> Validity {
        Validity {
            valid_from: self.valid_from,
            valid_to: self.valid_to,
        }
    }

    /// Returns true if the entity has not been invalidated.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Returns the file path of the entity's location, if any.
    #[must_use]
    pub fn file_path(&self) -> Option<&str> {
        self.location.as_ref().map(|l| l.file_path.as_str())
    }
}

/// Input for creating an entity.
///
/// Only the type, name and content are required. Everything else is filled
/// with defaults by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntity {
    /// Pre-assigned id. Generated when absent.
    #[serde(default)]
    pub id: Option<EntityId>,
    /// Entity type.
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// Display name.
    pub name: String,
    /// Full text or code.
    pub content: String,
    /// Source location.
    #[serde(default)]
    pub location: Option<Location>,
    /// Function signature payload.
    #[serde(default)]
    pub signature: Option<FunctionSignature>,
    /// Class payload.
    #[serde(default)]
    pub class_info: Option<ClassInfo>,
    /// Provenance (defaults to `inferred`).
    #[serde(default)]
    pub source: Source,
    /// Session that produced the entity.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Project the entity belongs to.
    #[serde(default)]
    pub project_path: Option<String>,
    /// Hash of the source file.
    #[serde(default)]
    pub file_hash: Option<String>,
    /// Confidence (defaults to 1.0).
    #[serde(default)]
    pub confidence: Option<f32>,
    /// Start of validity (defaults to now).
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    /// Paired vector document.
    #[serde(default)]
    pub vector_id: Option<String>,
    /// Older version this entity replaces.
    #[serde(default)]
    pub supersedes_id: Option<EntityId>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewEntity {
    /// Creates an entity input with the required fields.
    #[must_use]
    pub fn new(entity_type: EntityType, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            entity_type,
            name: name.into(),
            content: content.into(),
            location: None,
            signature: None,
            class_info: None,
            source: Source::default(),
            session_id: None,
            project_path: None,
            file_hash: None,
            confidence: None,
            valid_from: None,
            vector_id: None,
            supersedes_id: None,
            metadata: Metadata::new(),
        }
    }

    /// Sets a pre-assigned id.
    #[must_use]
    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the source location.
    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets the function signature payload.
    #[must_use]
    pub fn with_signature(mut self, signature: FunctionSignature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Sets the class payload.
    #[must_use]
    pub fn with_class_info(mut self, class_info: ClassInfo) -> Self {
        self.class_info = Some(class_info);
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

    /// Sets the project path.
    #[must_use]
    pub fn with_project(mut self, project_path: impl Into<String>) -> Self {
        self.project_path = Some(project_path.into());
        self
    }

    /// Sets the source file hash.
    #[must_use]
    pub fn with_file_hash(mut self, file_hash: impl Into<String>) -> Self {
        self.file_hash = Some(file_hash.into());
        self
    }

    /// Sets the confidence, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(clamp_unit(confidence));
        self
    }

    /// Sets the start of validity.
    #[must_use]
    pub const fn with_valid_from(mut self, valid_from: DateTime<Utc>) -> Self {
        self.valid_from = Some(valid_from);
        self
    }

    /// Sets the paired vector document id.
    #[must_use]
    pub fn with_vector_id(mut self, vector_id: impl Into<String>) -> Self {
        self.vector_id = Some(vector_id.into());
        self
    }

    /// Marks this entity as a newer version of `older`.
    #[must_use]
    pub fn with_supersedes(mut self, older: EntityId) -> Self {
        self.supersedes_id = Some(older);
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
    pub fn into_entity(self, now: DateTime<Utc>) -> Entity {
        let content_preview = content_preview(&self.content);
        Entity {
            id: self.id.unwrap_or_else(EntityId::generate),
            entity_type: self.entity_type,
            name: self.name,
            content: self.content,
            content_preview,
            location: self.location,
            signature: self.signature,
            class_info: self.class_info,
            source: self.source,
            session_id: self.session_id,
            project_path: self.project_path,
            file_hash: self.file_hash,
            confidence: self.confidence.map_or(1.0, clamp_unit),
            access_count: 0,
            last_accessed_at: None,
            created_at: now,
            updated_at: now,
            valid_from: self.valid_from.unwrap_or(now),
            valid_to: None,
            vector_id: self.vector_id,
            supersedes_id: self.supersedes_id,
            metadata: self.metadata,
        }
    }
}

/// Partial update for an entity.
///
/// `None` leaves a field unchanged. Clearable fields use `Option<Option<T>>`,
/// where `Some(None)` clears the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityUpdate {
    /// New type.
    pub entity_type: Option<EntityType>,
    /// New name.
    pub name: Option<String>,
    /// New content. The preview is re-derived.
    pub content: Option<String>,
    /// New location. Replaces path and both lines together.
    pub location: Option<Option<Location>>,
    /// New signature payload.
    pub signature: Option<Option<FunctionSignature>>,
    /// New class payload.
    pub class_info: Option<Option<ClassInfo>>,
    /// New provenance.
    pub source: Option<Source>,
    /// New session id.
    pub session_id: Option<Option<String>>,
    /// New project path.
    pub project_path: Option<Option<String>>,
    /// New file hash.
    pub file_hash: Option<Option<String>>,
    /// New confidence (clamped).
    pub confidence: Option<f32>,
    /// New access count.
    pub access_count: Option<u64>,
    /// New last-access time.
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// New end of validity.
    pub valid_to: Option<Option<DateTime<Utc>>>,
    /// New vector document id.
    pub vector_id: Option<Option<String>>,
    /// New superseded entity.
    pub supersedes_id: Option<Option<EntityId>>,
    /// Replacement metadata.
    pub metadata: Option<Metadata>,
}

impl EntityUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the content.
    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Sets or clears the location.
    #[must_use]
    pub fn location(mut self, location: Option<Location>) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets or clears the project path.
    #[must_use]
    pub fn project_path(mut self, project_path: Option<String>) -> Self {
        self.project_path = Some(project_path);
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

    /// Sets or clears the vector document id.
    #[must_use]
    pub fn vector_id(mut self, vector_id: Option<String>) -> Self {
        self.vector_id = Some(vector_id);
        self
    }

    /// Replaces the metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Records an access: bumps the counter and stamps the access time.
    #[must_use]
    pub const fn accessed(mut self, access_count: u64, at: DateTime<Utc>) -> Self {
        self.access_count = Some(access_count);
        self.last_accessed_at = Some(at);
        self
    }

    /// Merges the supplied fields into `entity` and refreshes `updated_at`.
    pub fn apply(self, entity: &mut Entity, now: DateTime<Utc>) {
        if let Some(entity_type) = self.entity_type {
            entity.entity_type = entity_type;
        }
        if let Some(name) = self.name {
            entity.name = name;
        }
        if let Some(content) = self.content {
            entity.content_preview = content_preview(&content);
            entity.content = content;
        }
        if let Some(location) = self.location {
            entity.location = location;
        }
        if let Some(signature) = self.signature {
            entity.signature = signature;
        }
        if let Some(class_info) = self.class_info {
            entity.class_info = class_info;
        }
        if let Some(source) = self.source {
            entity.source = source;
        }
        if let Some(session_id) = self.session_id {
            entity.session_id = session_id;
        }
        if let Some(project_path) = self.project_path {
            entity.project_path = project_path;
        }
        if let Some(file_hash) = self.file_hash {
            entity.file_hash = file_hash;
        }
        if let Some(confidence) = self.confidence {
            entity.confidence = clamp_unit(confidence);
        }
        if let Some(access_count) = self.access_count {
            entity.access_count = access_count;
        }
        if let Some(last_accessed_at) = self.last_accessed_at {
            entity.last_accessed_at = Some(last_accessed_at);
        }
        if let Some(valid_to) = self.valid_to {
            entity.valid_to = valid_to;
        }
        if let Some(vector_id) = self.vector_id {
            entity.vector_id = vector_id;
        }
        if let Some(supersedes_id) = self.supersedes_id {
            entity.supersedes_id = supersedes_id;
        }
        if let Some(metadata) = self.metadata {
            entity.metadata = metadata;
        }
        entity.updated_at = now;
    }
}
