//! # Mnemos
//!
//! Hybrid graph + vector memory layer for AI coding assistants.
//!
//! Mnemos persists entities (code symbols, preferences, decisions, knowledge)
//! and typed, weighted relations between them in an embedded `SQLite` graph,
//! pairs every entity with a document in an external vector index, and
//! answers retrieval queries that blend semantic similarity with graph
//! structure.
//!
//! ## Layers
//!
//! - [`models`]: entity and relation records with temporal validity
//! - [`storage`]: the graph persistence engine ([`GraphStore`])
//! - [`vector`]: the vector index contract and an in-memory index
//! - [`services`]: the fusion layer ([`MemoryGraph`]) with hybrid search
//! - [`observability`]: mutation events and logging setup
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mnemos::{GraphStore, InMemoryVectorIndex, MemoryGraph, NewEntity, EntityType};
//!
//! let store = GraphStore::in_memory()?;
//! let graph = MemoryGraph::new(store, Arc::new(InMemoryVectorIndex::new()), Default::default());
//! let entity = graph.add_entity(NewEntity::new(
//!     EntityType::Decision,
//!     "storage",
//!     "Use SQLite for the graph store",
//! ))?;
//! let hits = graph.hybrid_search("graph storage engine", &Default::default())?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;
pub mod vector;

pub use config::{GraphConfig, HybridSearchConfig, MnemosConfig};
pub use models::{
    Direction, Entity, EntityCategory, EntityFilter, EntityId, EntityType, EntityUpdate,
    GraphEvent, GraphPath, Location, Neighborhood, NeighborhoodQuery, NewEntity, NewRelation,
    PathQuery, Relation, RelationCategory, RelationFilter, RelationId, RelationType,
    RelationUpdate, Source,
};
pub use observability::EventBus;
pub use services::{
    EntityContext, FileContext, HybridSearchOptions, HybridSearchResult, MemoryGraph,
    SessionContext,
};
pub use storage::{GraphStats, GraphStore};
pub use vector::{InMemoryVectorIndex, VectorIndex};

/// Error type for mnemos operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Empty names or queries, zero traversal depth, unknown enum strings |
/// | `OperationFailed` | `SQLite` failures, serialization failures, vector index failures |
/// | `Closed` | Any store operation after [`GraphStore::close`] |
///
/// Missing records are never errors: point lookups return `Ok(None)`.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` statements fail to prepare or execute
    /// - Metadata or payload JSON cannot be (de)serialized
    /// - The vector index rejects an add, delete, or search
    /// - A configuration file cannot be read or parsed
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The graph store has been closed.
    #[error("graph store is closed")]
    Closed,
}

impl Error {
    /// Builds an [`Error::OperationFailed`] from an operation tag and any displayable cause.
    pub fn operation(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for mnemos operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("test error".to_string());
        assert_eq!(err.to_string(), "invalid input: test error");

        let err = Error::OperationFailed {
            operation: "test".to_string(),
            cause: "failed".to_string(),
        };
        assert_eq!(err.to_string(), "operation 'test' failed: failed");

        assert_eq!(Error::Closed.to_string(), "graph store is closed");
    }

    #[test]
    fn test_operation_helper() {
        let err = Error::operation("create_entity", "disk full");
        assert!(matches!(
            err,
            Error::OperationFailed { ref operation, ref cause }
                if operation == "create_entity" && cause == "disk full"
        ));
    }
}
