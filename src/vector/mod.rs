//! Vector index contract.
//!
//! The fusion layer pairs every content-bearing entity with a document in an
//! external embedding index. This module defines the narrow contract it
//! consumes ([`VectorIndex`]) plus [`InMemoryVectorIndex`], a brute-force
//! implementation over deterministic hash embeddings for tests and local
//! tooling.
//!
//! # Implementor Notes
//!
//! - Methods take `&self` so an index can be shared as `Arc<dyn VectorIndex>`
//! - Use interior mutability for the document store
//! - Scores are similarities in `[0.0, 1.0]`, higher is closer

mod embedding;
mod memory;

pub use embedding::{DEFAULT_DIMENSIONS, cosine_similarity, pseudo_embed};
pub use memory::InMemoryVectorIndex;

use crate::Result;
use crate::models::Metadata;

/// Metadata key holding the paired entity id.
pub const META_ENTITY_ID: &str = "entityId";
/// Metadata key holding the entity type.
pub const META_ENTITY_TYPE: &str = "entityType";
/// Metadata key holding the entity name.
pub const META_NAME: &str = "name";
/// Metadata key holding the project path.
pub const META_PROJECT_PATH: &str = "projectPath";
/// Metadata key holding the session id.
pub const META_SESSION_ID: &str = "sessionId";
/// Metadata key holding the file path.
pub const META_FILE_PATH: &str = "filePath";

/// A stored document: the embedded text and its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDocument {
    /// Text that was embedded.
    pub content: String,
    /// Caller-supplied key/value pairs.
    pub metadata: Metadata,
}

impl VectorDocument {
    /// Returns a metadata value as a string slice.
    #[must_use]
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(serde_json::Value::as_str)
    }
}

/// A single nearest-neighbor match.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    /// Document id.
    pub id: String,
    /// The matched document.
    pub document: VectorDocument,
    /// Similarity in `[0.0, 1.0]`.
    pub score: f32,
}

/// Search parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSearchOptions {
    /// Maximum hits to return.
    pub top_k: usize,
    /// Minimum similarity score.
    pub threshold: f32,
    /// Exact-match metadata filter; every key must equal the document's value.
    pub filter: Metadata,
}

impl VectorSearchOptions {
    /// Creates options with no filter.
    #[must_use]
    pub fn new(top_k: usize, threshold: f32) -> Self {
        Self {
            top_k,
            threshold,
            filter: Metadata::new(),
        }
    }

    /// Adds an exact-match filter on a metadata key.
    #[must_use]
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filter.insert(key.into(), value.into());
        self
    }

    /// Returns true if the document satisfies every filter entry.
    #[must_use]
    pub fn matches(&self, document: &VectorDocument) -> bool {
        self.filter
            .iter()
            .all(|(key, value)| document.metadata.get(key) == Some(value))
    }
}

/// Embedding similarity index consumed by the fusion layer.
pub trait VectorIndex: Send + Sync {
    /// Embeds and stores one document, returning its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be stored.
    fn add(&self, content: &str, metadata: Metadata) -> Result<String>;

    /// Removes a document. Unknown ids are a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal fails.
    fn delete(&self, id: &str) -> Result<()>;

    /// Returns the nearest documents above the threshold, best first.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    fn search(&self, query: &str, options: &VectorSearchOptions) -> Result<Vec<VectorHit>>;

    /// Number of stored documents.
    fn len(&self) -> usize;

    /// Returns true if the index holds no documents.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
