//! In-process brute-force vector index.

use super::embedding::{DEFAULT_DIMENSIONS, cosine_similarity, pseudo_embed};
use super::{VectorDocument, VectorHit, VectorIndex, VectorSearchOptions};
use crate::Result;
use crate::models::Metadata;
use crate::storage::sqlite::acquire_lock;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

struct StoredDocument {
    document: VectorDocument,
    embedding: Vec<f32>,
    /// Insertion sequence, used to break score ties.
    seq: u64,
}

#[derive(Default)]
struct IndexState {
    documents: HashMap<String, StoredDocument>,
    next_seq: u64,
}

/// Vector index held entirely in memory.
///
/// Embeddings come from [`pseudo_embed`] and search is a linear scan with
/// cosine similarity mapped to `[0.0, 1.0]`. An optional artificial latency
/// simulates a remote index.
pub struct InMemoryVectorIndex {
    state: Mutex<IndexState>,
    dimensions: usize,
    latency: Option<Duration>,
}

impl InMemoryVectorIndex {
    /// Creates an empty 384-dimensional index.
    #[must_use]
    pub fn new() -> Self {
        Self::with_dimensions(DEFAULT_DIMENSIONS)
    }

    /// Creates an empty index with the given dimensionality.
    #[must_use]
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            state: Mutex::new(IndexState::default()),
            dimensions: dimensions.max(1),
            latency: None,
        }
    }

    /// Sleeps for `latency` inside every add, delete and search.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Embedding dimensionality.
    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Returns a stored document by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<VectorDocument> {
        acquire_lock(&self.state)
            .documents
            .get(id)
            .map(|stored| stored.document.clone())
    }

    /// Ids of every stored document, in insertion order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let state = acquire_lock(&self.state);
        let mut ids: Vec<(&String, u64)> = state
            .documents
            .iter()
            .map(|(id, stored)| (id, stored.seq))
            .collect();
        ids.sort_by_key(|(_, seq)| *seq);
        ids.into_iter().map(|(id, _)| id.clone()).collect()
    }

    fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn add(&self, content: &str, metadata: Metadata) -> Result<String> {
        self.simulate_latency();
        let id = uuid::Uuid::now_v7().to_string();
        let embedding = pseudo_embed(content, self.dimensions);

        let mut state = acquire_lock(&self.state);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.documents.insert(
            id.clone(),
            StoredDocument {
                document: VectorDocument {
                    content: content.to_string(),
                    metadata,
                },
                embedding,
                seq,
            },
        );
        drop(state);

        metrics::counter!("vector_index_add_total").increment(1);
        Ok(id)
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.simulate_latency();
        acquire_lock(&self.state).documents.remove(id);
        Ok(())
    }

    fn search(&self, query: &str, options: &VectorSearchOptions) -> Result<Vec<VectorHit>> {
        self.simulate_latency();
        if options.top_k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = pseudo_embed(query, self.dimensions);

        let state = acquire_lock(&self.state);
        let mut scored: Vec<(f32, u64, &String, &StoredDocument)> = state
            .documents
            .iter()
            .filter(|(_, stored)| options.matches(&stored.document))
            .map(|(id, stored)| {
                let cos = cosine_similarity(&query_embedding, &stored.embedding);
                (f32::midpoint(cos, 1.0).clamp(0.0, 1.0), stored.seq, id, stored)
            })
            .filter(|(score, ..)| *score >= options.threshold)
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let hits = scored
            .into_iter()
            .take(options.top_k)
            .map(|(score, _, id, stored)| VectorHit {
                id: id.clone(),
                document: stored.document.clone(),
                score,
            })
            .collect();
        Ok(hits)
    }

    fn len(&self) -> usize {
        acquire_lock(&self.state).documents.len()
    }
}

impl std::fmt::Debug for InMemoryVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorIndex")
            .field("dimensions", &self.dimensions)
            .field("documents", &self.len())
            .field("latency", &self.latency)
            .finish()
    }
}
