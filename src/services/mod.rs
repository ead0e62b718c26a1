//! Fusion layer services.
//!
//! [`MemoryGraph`] composes the [`GraphStore`](crate::storage::GraphStore)
//! with a [`VectorIndex`](crate::vector::VectorIndex). It keeps both sides
//! paired and answers retrieval queries that blend vector similarity with
//! graph connectivity.

mod context;
mod hybrid;
mod memory_graph;

pub use context::{EntityContext, FileContext, SessionContext};
pub use hybrid::{HybridSearchOptions, HybridSearchResult, graph_score};
pub use memory_graph::MemoryGraph;
