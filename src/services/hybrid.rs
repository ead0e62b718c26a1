//! Hybrid retrieval.
//!
//! ```text
//! query
//!   │
//!   ▼
//! VectorIndex.search(top 2·k, threshold, projectPath)
//!   │
//!   ▼
//! resolve entityId → Entity, drop missing / wrong type / invalid
//!   │
//!   ▼
//! one batched neighborhood over all candidates
//!   │
//!   ▼
//! graph = avg(incident weights) × min(incident count / saturation, 1)
//! final = wv·vector + wg·graph
//!   │
//!   ▼
//! stable sort by final, take k
//! ```

#![allow(clippy::cast_precision_loss)]

use super::MemoryGraph;
use crate::models::{
    Direction, Entity, EntityId, EntityType, NeighborhoodQuery, Relation, RelationType,
};
use crate::vector::{META_ENTITY_ID, META_PROJECT_PATH, VectorSearchOptions};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Instant;
use tracing::instrument;

/// Per-query search options. `None` falls back to the configured defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridSearchOptions {
    /// Results to return.
    pub top_k: Option<usize>,
    /// Minimum vector similarity.
    pub threshold: Option<f32>,
    /// Allowed entity types (empty = any).
    pub entity_types: Vec<EntityType>,
    /// Restrict to one project.
    pub project_path: Option<String>,
    /// Drop soft-deleted entities and ignore expired edges.
    pub only_valid: bool,
    /// Compute graph scores and attach incident relations.
    pub include_relations: bool,
    /// Neighborhood depth for graph scoring. Zero disables it.
    pub neighborhood_depth: Option<u32>,
    /// Weight of the vector score.
    pub vector_weight: Option<f32>,
    /// Weight of the graph score.
    pub graph_weight: Option<f32>,
    /// Relation types counted for graph scoring (empty = any).
    pub relation_types: Vec<RelationType>,
    /// Minimum weight of counted edges.
    pub min_weight: Option<f32>,
}

impl Default for HybridSearchOptions {
    fn default() -> Self {
        Self {
            top_k: None,
            threshold: None,
            entity_types: Vec::new(),
            project_path: None,
            only_valid: true,
            include_relations: true,
            neighborhood_depth: None,
            vector_weight: None,
            graph_weight: None,
            relation_types: Vec::new(),
            min_weight: None,
        }
    }
}

impl HybridSearchOptions {
    /// Creates options that use every configured default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the result count.
    #[must_use]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Sets the similarity threshold.
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Restricts results to the given entity types.
    #[must_use]
    pub fn with_entity_types(mut self, types: impl IntoIterator<Item = EntityType>) -> Self {
        self.entity_types.extend(types);
        self
    }

    /// Restricts results to one project.
    #[must_use]
    pub fn with_project(mut self, project_path: impl Into<String>) -> Self {
        self.project_path = Some(project_path.into());
        self
    }

    /// Includes soft-deleted entities.
    #[must_use]
    pub const fn include_invalid(mut self) -> Self {
        self.only_valid = false;
        self
    }

    /// Skips graph scoring and relation attachment.
    #[must_use]
    pub const fn without_relations(mut self) -> Self {
        self.include_relations = false;
        self
    }

    /// Sets the neighborhood depth.
    #[must_use]
    pub const fn with_depth(mut self, depth: u32) -> Self {
        self.neighborhood_depth = Some(depth);
        self
    }

    /// Sets both score weights.
    #[must_use]
    pub const fn with_weights(mut self, vector_weight: f32, graph_weight: f32) -> Self {
        self.vector_weight = Some(vector_weight);
        self.graph_weight = Some(graph_weight);
        self
    }

    /// Restricts which relation types count toward the graph score.
    #[must_use]
    pub fn with_relation_types(mut self, types: impl IntoIterator<Item = RelationType>) -> Self {
        self.relation_types.extend(types);
        self
    }

    /// Sets the minimum counted edge weight.
    #[must_use]
    pub const fn with_min_weight(mut self, min_weight: f32) -> Self {
        self.min_weight = Some(min_weight);
        self
    }
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridSearchResult {
    /// The matched entity.
    pub entity: Entity,
    /// Vector similarity in `[0.0, 1.0]`.
    pub vector_score: f32,
    /// Connectivity score in `[0.0, 1.0]`.
    pub graph_score: f32,
    /// Weighted combination used for ranking.
    pub final_score: f32,
    /// Incident edges found in the neighborhood.
    pub relations: Vec<Relation>,
}

/// Connectivity score of an entity from its incident edge weights.
///
/// The average weight, scaled by a bonus that grows linearly with the edge
/// count and saturates at `saturation_edges`. No edges scores 0.
#[must_use]
pub fn graph_score(weights: &[f32], saturation_edges: usize) -> f32 {
    if weights.is_empty() {
        return 0.0;
    }
    let count = weights.len() as f32;
    let average = weights.iter().sum::<f32>() / count;
    let bonus = (count / saturation_edges.max(1) as f32).min(1.0);
    average * bonus
}

/// Options with every default resolved.
struct Resolved {
    top_k: usize,
    threshold: f32,
    depth: u32,
    vector_weight: f32,
    graph_weight: f32,
}

impl MemoryGraph {
    fn resolve(&self, options: &HybridSearchOptions) -> Resolved {
        let config = self.config();
        Resolved {
            top_k: options.top_k.unwrap_or(config.top_k),
            threshold: options.threshold.unwrap_or(config.threshold),
            depth: options.neighborhood_depth.unwrap_or(config.neighborhood_depth),
            vector_weight: options.vector_weight.unwrap_or(config.vector_weight),
            graph_weight: options.graph_weight.unwrap_or(config.graph_weight),
        }
    }

    /// Resolves vector hits to entities, keeping vector order.
    fn resolve_candidates(
        &self,
        query: &str,
        options: &HybridSearchOptions,
        resolved: &Resolved,
    ) -> Result<Vec<(Entity, f32)>> {
        let mut search = VectorSearchOptions::new(resolved.top_k.saturating_mul(2), resolved.threshold);
        if let Some(ref project_path) = options.project_path {
            search = search.with_filter(META_PROJECT_PATH, project_path.as_str());
        }
        let hits = self.index().search(query, &search)?;

        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(entity_id) = hit.document.meta_str(META_ENTITY_ID) else {
                tracing::debug!(vector_id = %hit.id, "Vector hit has no entity id");
                continue;
            };
            let entity_id = EntityId::new(entity_id);
            if !seen.insert(entity_id.clone()) {
                continue;
            }
            let Some(entity) = self.store().get_entity(&entity_id)? else {
                tracing::debug!(vector_id = %hit.id, entity_id = %entity_id, "Vector hit has no graph node");
                continue;
            };
            if !options.entity_types.is_empty() && !options.entity_types.contains(&entity.entity_type) {
                continue;
            }
            if options.only_valid && !entity.is_valid() {
                continue;
            }
            if let Some(ref project_path) = options.project_path
                && entity.project_path.as_deref() != Some(project_path.as_str())
            {
                tracing::debug!(vector_id = %hit.id, entity_id = %entity_id, "Vector hit is scoped to a stale project");
                continue;
            }
            candidates.push((entity, hit.score));
        }
        Ok(candidates)
    }

    /// Blends vector similarity with graph connectivity.
    ///
    /// Results are ordered by `final_score`, highest first. Equal scores
    /// keep the vector index order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a blank query, or an error if the
    /// vector index or the store fails.
    #[instrument(skip(self, options), fields(top_k = ?options.top_k))]
    pub fn hybrid_search(
        &self,
        query: &str,
        options: &HybridSearchOptions,
    ) -> Result<Vec<HybridSearchResult>> {
        if query.trim().is_empty() {
            return Err(Error::InvalidInput("search query must not be empty".to_string()));
        }
        let start = Instant::now();
        let resolved = self.resolve(options);
        if resolved.top_k == 0 {
            return Ok(Vec::new());
        }

        let candidates = self.resolve_candidates(query, options, &resolved)?;

        let neighborhood = if options.include_relations && resolved.depth > 0 && !candidates.is_empty() {
            let mut neighborhood_query =
                NeighborhoodQuery::new(candidates.iter().map(|(e, _)| e.id.clone()))
                    .with_depth(resolved.depth)
                    .with_direction(Direction::Both)
                    .with_relation_types(options.relation_types.iter().copied())
                    .with_max_nodes(usize::MAX);
            if let Some(min_weight) = options.min_weight {
                neighborhood_query = neighborhood_query.with_min_weight(min_weight);
            }
            if !options.only_valid {
                neighborhood_query = neighborhood_query.include_invalid();
            }
            Some(self.store().get_neighborhood(&neighborhood_query)?)
        } else {
            None
        };

        let saturation = self.config().saturation_edges;
        let mut results: Vec<HybridSearchResult> = candidates
            .into_iter()
            .map(|(entity, vector_score)| {
                let relations: Vec<Relation> = neighborhood
                    .as_ref()
                    .map(|n| {
                        n.relations
                            .iter()
                            .filter(|r| r.touches(&entity.id))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                let weights: Vec<f32> = relations.iter().map(|r| r.weight).collect();
                let graph_score = graph_score(&weights, saturation);
                let final_score =
                    resolved.vector_weight * vector_score + resolved.graph_weight * graph_score;
                HybridSearchResult {
                    entity,
                    vector_score,
                    graph_score,
                    final_score,
                    relations,
                }
            })
            .collect();

        // `sort_by` is stable, so ties keep vector order.
        results.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        results.truncate(resolved.top_k);

        metrics::counter!("hybrid_search_total").increment(1);
        metrics::histogram!("hybrid_search_duration_ms").record(start.elapsed().as_secs_f64() * 1000.0);
        tracing::debug!(results = results.len(), "Hybrid search complete");
        Ok(results)
    }

    /// Pure vector ranking: [`hybrid_search`](Self::hybrid_search) with depth 0.
    ///
    /// # Errors
    ///
    /// Same as [`hybrid_search`](Self::hybrid_search).
    pub fn semantic_search(
        &self,
        query: &str,
        options: &HybridSearchOptions,
    ) -> Result<Vec<HybridSearchResult>> {
        let options = options.clone().with_depth(0);
        self.hybrid_search(query, &options)
    }

    /// Pure graph traversal from `start_id`.
    ///
    /// Returns the start entity followed by its neighborhood, nearest
    /// first. Empty if `start_id` does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a zero depth, or an error if the
    /// traversal fails.
    #[instrument(skip(self, relation_types), fields(start_id = %start_id))]
    pub fn structural_search(
        &self,
        start_id: &EntityId,
        depth: u32,
        relation_types: &[RelationType],
        direction: Direction,
    ) -> Result<Vec<Entity>> {
        if depth == 0 {
            return Err(Error::InvalidInput(
                "structural search depth must be at least 1".to_string(),
            ));
        }
        let Some(start) = self.store().get_entity(start_id)? else {
            return Ok(Vec::new());
        };
        let neighborhood = self.store().get_neighborhood(
            &NeighborhoodQuery::new([start_id.clone()])
                .with_depth(depth)
                .with_direction(direction)
                .with_relation_types(relation_types.iter().copied()),
        )?;

        let mut entities = Vec::with_capacity(neighborhood.entities.len() + 1);
        entities.push(start);
        entities.extend(neighborhood.entities);
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HybridSearchConfig;
    use crate::models::{EntityUpdate, NewEntity, NewRelation};
    use crate::storage::GraphStore;
    use crate::vector::InMemoryVectorIndex;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn create_graph() -> MemoryGraph {
        let store = GraphStore::in_memory().expect("Failed to create in-memory store");
        MemoryGraph::new(
            store,
            Arc::new(InMemoryVectorIndex::new()),
            HybridSearchConfig {
                threshold: 0.0,
                ..HybridSearchConfig::default()
            },
        )
    }

    fn add(graph: &MemoryGraph, entity_type: EntityType, name: &str, content: &str) -> Entity {
        graph
            .add_entity(NewEntity::new(entity_type, name, content))
            .unwrap()
    }

    #[test]
    fn test_graph_score_saturates() {
        assert!(graph_score(&[], 5).abs() < f32::EPSILON);
        assert!((graph_score(&[1.0], 5) - 0.2).abs() < 1e-6);
        assert!((graph_score(&[0.5, 0.5], 5) - 0.2).abs() < 1e-6);
        assert!((graph_score(&[1.0; 5], 5) - 1.0).abs() < 1e-6);
        assert!((graph_score(&[1.0; 9], 5) - 1.0).abs() < 1e-6);
        assert!((graph_score(&[0.4; 7], 5) - 0.4).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn prop_graph_score_in_unit_range(
            weights in proptest::collection::vec(0.0f32..=1.0, 0..20),
            saturation in 1usize..10,
        ) {
            let score = graph_score(&weights, saturation);
            prop_assert!((0.0..=1.0 + 1e-6).contains(&score));
        }
    }

    #[test]
    fn test_blank_query_rejected() {
        let graph = create_graph();
        assert!(matches!(
            graph.hybrid_search("   ", &HybridSearchOptions::new()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_connected_entity_outranks_isolated_twin() {
        let graph = create_graph();
        let isolated = add(&graph, EntityType::Concept, "isolated", "token refresh flow");
        let connected = add(&graph, EntityType::Concept, "connected", "token refresh flow");
        for i in 0..5 {
            let neighbor = add(&graph, EntityType::Concept, &format!("n{i}"), &format!("zz{i}"));
            graph
                .add_relation(NewRelation::new(
                    connected.id.clone(),
                    neighbor.id,
                    RelationType::RelatedTo,
                ))
                .unwrap();
        }

        let results = graph
            .hybrid_search("token refresh flow", &HybridSearchOptions::new().with_top_k(2))
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entity.id, connected.id);
        assert_eq!(results[1].entity.id, isolated.id);
        assert!((results[0].graph_score - 1.0).abs() < 1e-6);
        assert_eq!(results[0].relations.len(), 5);
        assert!(results[1].graph_score.abs() < f32::EPSILON);
        assert!(results[0].final_score >= results[1].final_score);
    }

    #[test]
    fn test_semantic_search_ignores_graph() {
        let graph = create_graph();
        let first = add(&graph, EntityType::Concept, "first", "cache eviction policy");
        let second = add(&graph, EntityType::Concept, "second", "cache eviction policy");
        let other = add(&graph, EntityType::Concept, "other", "unrelated");
        graph
            .add_relation(NewRelation::new(second.id.clone(), other.id, RelationType::RelatedTo))
            .unwrap();

        let results = graph
            .semantic_search("cache eviction policy", &HybridSearchOptions::new().with_top_k(2))
            .unwrap();
        // Equal vector scores keep index order.
        assert_eq!(results[0].entity.id, first.id);
        assert_eq!(results[1].entity.id, second.id);
        assert!(results.iter().all(|r| r.graph_score.abs() < f32::EPSILON));
        assert!(results.iter().all(|r| r.relations.is_empty()));
    }

    #[test]
    fn test_filters_type_validity_and_project() {
        let graph = create_graph();
        let function = add(&graph, EntityType::Function, "f", "retry with backoff");
        let decision = add(&graph, EntityType::Decision, "d", "retry with backoff");
        graph
            .add_entity(
                NewEntity::new(EntityType::Decision, "p", "retry with backoff").with_project("/p"),
            )
            .unwrap();

        let functions = graph
            .hybrid_search(
                "retry with backoff",
                &HybridSearchOptions::new().with_entity_types([EntityType::Function]),
            )
            .unwrap();
        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].entity.id, function.id);

        graph.invalidate_entity(&decision.id).unwrap();
        let valid = graph
            .hybrid_search("retry with backoff", &HybridSearchOptions::new())
            .unwrap();
        assert!(valid.iter().all(|r| r.entity.id != decision.id));
        let all = graph
            .hybrid_search("retry with backoff", &HybridSearchOptions::new().include_invalid())
            .unwrap();
        assert!(all.iter().any(|r| r.entity.id == decision.id));

        let scoped = graph
            .hybrid_search("retry with backoff", &HybridSearchOptions::new().with_project("/p"))
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].entity.name, "p");
    }

    #[test]
    fn test_project_scope_checks_the_graph_node() {
        let graph = create_graph();
        let entity = graph
            .add_entity(NewEntity::new(EntityType::Decision, "d", "shard by tenant").with_project("/old"))
            .unwrap();
        // Moved behind the fusion layer's back: the document still says "/old".
        graph
            .store()
            .update_entity(
                &entity.id,
                EntityUpdate::new().project_path(Some("/new".to_string())),
            )
            .unwrap();

        let stale = graph
            .hybrid_search("shard by tenant", &HybridSearchOptions::new().with_project("/old"))
            .unwrap();
        assert!(stale.is_empty());
    }

    #[test]
    fn test_orphaned_vector_hits_are_skipped() {
        let graph = create_graph();
        let entity = add(&graph, EntityType::Concept, "c", "orphan check");
        graph.store().delete_entity(&entity.id).unwrap();

        let results = graph
            .hybrid_search("orphan check", &HybridSearchOptions::new())
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_results_are_monotone_and_capped() {
        let graph = create_graph();
        let hub = add(&graph, EntityType::Concept, "hub", "graph search ranking");
        for i in 0..12 {
            let e = add(
                &graph,
                EntityType::Concept,
                &format!("e{i}"),
                &format!("graph search ranking variant {i}"),
            );
            if i % 3 == 0 {
                graph
                    .add_relation(
                        NewRelation::new(hub.id.clone(), e.id, RelationType::RelatedTo)
                            .with_weight(0.7),
                    )
                    .unwrap();
            }
        }

        let results = graph
            .hybrid_search("graph search ranking", &HybridSearchOptions::new().with_top_k(5))
            .unwrap();
        assert_eq!(results.len(), 5);
        assert!(
            results
                .windows(2)
                .all(|pair| pair[0].final_score >= pair[1].final_score)
        );
    }

    #[test]
    fn test_structural_search() {
        let graph = create_graph();
        let a = add(&graph, EntityType::Module, "a", "a");
        let b = add(&graph, EntityType::Module, "b", "b");
        let c = add(&graph, EntityType::Module, "c", "c");
        graph
            .add_relation(NewRelation::new(a.id.clone(), b.id.clone(), RelationType::Imports))
            .unwrap();
        graph
            .add_relation(NewRelation::new(b.id.clone(), c.id.clone(), RelationType::Imports))
            .unwrap();

        let found = graph
            .structural_search(&a.id, 2, &[RelationType::Imports], Direction::Outgoing)
            .unwrap();
        let ids: Vec<_> = found.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec![a.id.clone(), b.id, c.id]);

        assert!(
            graph
                .structural_search(&EntityId::new("missing"), 1, &[], Direction::Both)
                .unwrap()
                .is_empty()
        );
        assert!(matches!(
            graph.structural_search(&a.id, 0, &[], Direction::Both),
            Err(Error::InvalidInput(_))
        ));
    }
}
