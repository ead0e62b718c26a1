//! Deterministic hash embeddings.
//!
//! Each whitespace-separated word is hashed and spread over the vector, then
//! the result is L2-normalized. Texts sharing words land close together; the
//! embedding carries no deeper semantics.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Embedding dimensions (matches all-MiniLM-L6-v2).
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Upper bound on words hashed per text.
const MAX_WORDS: usize = 1000;

/// Embeds `text` into a unit vector of `dimensions` components.
///
/// Words are lowercased before hashing. Text with no words yields the zero
/// vector.
#[must_use]
pub fn pseudo_embed(text: &str, dimensions: usize) -> Vec<f32> {
    let mut embedding = vec![0.0f32; dimensions];
    if dimensions == 0 {
        return embedding;
    }

    for (i, word) in text.split_whitespace().take(MAX_WORDS).enumerate() {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        distribute_hash(&mut embedding, hasher.finish(), i);
    }

    normalize(&mut embedding);
    embedding
}

/// Adds eight signed contributions derived from `hash` to the vector.
#[allow(clippy::cast_precision_loss)]
#[allow(clippy::cast_possible_truncation)]
fn distribute_hash(embedding: &mut [f32], hash: u64, word_idx: usize) {
    let dimensions = embedding.len();
    for j in 0..8 {
        let idx = ((hash >> (j * 8)) as usize + word_idx) % dimensions;
        let value = ((hash >> (j * 4)) & 0xFF) as f32 / 255.0 - 0.5;
        embedding[idx] += value;
    }
}

fn normalize(embedding: &mut [f32]) {
    let norm_sq: f32 = embedding.iter().map(|x| x * x).sum();
    if norm_sq <= 0.0 {
        return;
    }
    let inv_norm = norm_sq.sqrt().recip();
    for v in embedding.iter_mut() {
        *v *= inv_norm;
    }
}

/// Cosine similarity in `[-1.0, 1.0]`. Mismatched or zero vectors score 0.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
