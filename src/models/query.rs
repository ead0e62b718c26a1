//! Query types for the graph store.

use super::entity::{Entity, EntityId, EntityType, Source};
use super::relation::{Relation, RelationType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default cap on nodes returned by a neighborhood expansion.
pub const DEFAULT_MAX_NODES: usize = 100;

/// Maximum number of candidate paths returned by a path search.
pub const MAX_PATHS: usize = 10;

/// Conjunctive filter for entity queries.
///
/// Every populated field narrows the result. Empty sets mean "any".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFilter {
    /// Allowed entity types.
    pub types: Vec<EntityType>,
    /// Allowed sources.
    pub sources: Vec<Source>,
    /// Exact project path.
    pub project_path: Option<String>,
    /// Exact session id.
    pub session_id: Option<String>,
    /// Exact file path.
    pub file_path: Option<String>,
    /// File path prefix.
    pub file_path_prefix: Option<String>,
    /// Minimum confidence.
    pub min_confidence: Option<f32>,
    /// Only entities without `valid_to`.
    pub only_valid: bool,
    /// Created at or after.
    pub created_after: Option<DateTime<Utc>>,
    /// Created at or before.
    pub created_before: Option<DateTime<Utc>>,
    /// Case-insensitive substring matched against name OR content.
    pub keyword: Option<String>,
}

impl EntityFilter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to a single type.
    #[must_use]
    pub fn with_type(mut self, entity_type: EntityType) -> Self {
        self.types.push(entity_type);
        self
    }

    /// Restricts to a set of types.
    #[must_use]
    pub fn with_types(mut self, types: impl IntoIterator<Item = EntityType>) -> Self {
        self.types.extend(types);
        self
    }

    /// Restricts to a single source.
    #[must_use]
    pub fn with_source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    /// Restricts to a project.
    #[must_use]
    pub fn with_project(mut self, project_path: impl Into<String>) -> Self {
        self.project_path = Some(project_path.into());
        self
    }

    /// Restricts to a session.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Restricts to a file.
    #[must_use]
    pub fn with_file(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    /// Restricts to files under a path prefix.
    #[must_use]
    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_path_prefix = Some(prefix.into());
        self
    }

    /// Sets the minimum confidence.
    #[must_use]
    pub const fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = Some(min_confidence);
        self
    }

    /// Excludes invalidated entities.
    #[must_use]
    pub const fn only_valid(mut self) -> Self {
        self.only_valid = true;
        self
    }

    /// Restricts the creation time range (inclusive).
    #[must_use]
    pub const fn created_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    /// Matches a keyword against name or content.
    #[must_use]
    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }
}

/// Column used to order entity query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    /// Creation time.
    #[default]
    CreatedAt,
    /// Last modification time.
    UpdatedAt,
    /// Name.
    Name,
    /// Confidence.
    Confidence,
    /// Access count.
    AccessCount,
}

impl SortField {
    /// Returns the column name.
    #[must_use]
    pub const fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "createdAt",
            Self::UpdatedAt => "updatedAt",
            Self::Name => "name",
            Self::Confidence => "confidence",
            Self::AccessCount => "accessCount",
        }
    }
}

/// Ordering for entity queries. Defaults to newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySort {
    /// Sort column.
    pub field: SortField,
    /// Descending order.
    pub descending: bool,
}

impl EntitySort {
    /// Ascending order on `field`.
    #[must_use]
    pub const fn asc(field: SortField) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    /// Descending order on `field`.
    #[must_use]
    pub const fn desc(field: SortField) -> Self {
        Self {
            field,
            descending: true,
        }
    }
}

impl Default for EntitySort {
    fn default() -> Self {
        Self::desc(SortField::CreatedAt)
    }
}

/// Pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    /// Rows to skip.
    pub offset: usize,
    /// Maximum rows (None = unbounded).
    pub limit: Option<usize>,
}

impl Page {
    /// First `limit` rows.
    #[must_use]
    pub const fn first(limit: usize) -> Self {
        Self {
            offset: 0,
            limit: Some(limit),
        }
    }

    /// Window starting at `offset`.
    #[must_use]
    pub const fn new(offset: usize, limit: Option<usize>) -> Self {
        Self { offset, limit }
    }
}

/// Filter for relation queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationFilter {
    /// Exact source entity.
    pub from_id: Option<EntityId>,
    /// Exact target entity.
    pub to_id: Option<EntityId>,
    /// Either endpoint.
    pub entity_id: Option<EntityId>,
    /// Allowed relation types.
    pub types: Vec<RelationType>,
    /// Allowed sources.
    pub sources: Vec<Source>,
    /// Exact session id.
    pub session_id: Option<String>,
    /// Minimum weight.
    pub min_weight: Option<f32>,
    /// Minimum confidence.
    pub min_confidence: Option<f32>,
    /// Only relations without `valid_to`.
    pub only_valid: bool,
    /// Maximum rows.
    pub limit: Option<usize>,
}

impl RelationFilter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Edges leaving `id`.
    #[must_use]
    pub fn from(mut self, id: EntityId) -> Self {
        self.from_id = Some(id);
        self
    }

    /// Edges entering `id`.
    #[must_use]
    pub fn to(mut self, id: EntityId) -> Self {
        self.to_id = Some(id);
        self
    }

    /// Edges touching `id` in either direction.
    #[must_use]
    pub fn touching(mut self, id: EntityId) -> Self {
        self.entity_id = Some(id);
        self
    }

    /// Restricts to a single type.
    #[must_use]
    pub fn with_type(mut self, relation_type: RelationType) -> Self {
        self.types.push(relation_type);
        self
    }

    /// Sets the minimum weight.
    #[must_use]
    pub const fn with_min_weight(mut self, min_weight: f32) -> Self {
        self.min_weight = Some(min_weight);
        self
    }

    /// Excludes invalidated relations.
    #[must_use]
    pub const fn only_valid(mut self) -> Self {
        self.only_valid = true;
        self
    }

    /// Caps the number of rows.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Edge direction followed during traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Follow `from -> to`.
    Outgoing,
    /// Follow `to -> from`.
    Incoming,
    /// Follow both.
    #[default]
    Both,
}

impl Direction {
    /// Returns the direction as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Outgoing => "outgoing",
            Self::Incoming => "incoming",
            Self::Both => "both",
        }
    }
}

/// Bounded neighborhood expansion request.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborhoodQuery {
    /// Seed entities.
    pub entity_ids: Vec<EntityId>,
    /// Maximum hops (at least 1).
    pub depth: u32,
    /// Edge direction.
    pub direction: Direction,
    /// Allowed relation types (empty = any).
    pub relation_types: Vec<RelationType>,
    /// Minimum edge weight.
    pub min_weight: Option<f32>,
    /// Require every edge on the path and every reached node to be valid.
    pub only_valid: bool,
    /// Cap on returned nodes.
    pub max_nodes: usize,
}

impl NeighborhoodQuery {
    /// Creates a depth-1, both-direction query around the given seeds.
    #[must_use]
    pub fn new(entity_ids: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            entity_ids: entity_ids.into_iter().collect(),
            depth: 1,
            direction: Direction::Both,
            relation_types: Vec::new(),
            min_weight: None,
            only_valid: true,
            max_nodes: DEFAULT_MAX_NODES,
        }
    }

    /// Sets the hop limit.
    #[must_use]
    pub const fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Sets the direction.
    #[must_use]
    pub const fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Restricts the followed relation types.
    #[must_use]
    pub fn with_relation_types(mut self, types: impl IntoIterator<Item = RelationType>) -> Self {
        self.relation_types.extend(types);
        self
    }

    /// Sets the minimum edge weight.
    #[must_use]
    pub const fn with_min_weight(mut self, min_weight: f32) -> Self {
        self.min_weight = Some(min_weight);
        self
    }

    /// Includes invalidated nodes and edges.
    #[must_use]
    pub const fn include_invalid(mut self) -> Self {
        self.only_valid = false;
        self
    }

    /// Caps the number of returned nodes.
    #[must_use]
    pub const fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }
}

/// Result of a neighborhood expansion.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Neighborhood {
    /// Reached entities, ordered by depth then id. Seeds are not included.
    pub entities: Vec<Entity>,
    /// Every distinct edge touched by a qualifying path.
    pub relations: Vec<Relation>,
    /// Minimum hop count per returned entity.
    pub depths: HashMap<EntityId, u32>,
}

impl Neighborhood {
    /// Returns true if nothing was reached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns the minimum hop count for an entity.
    #[must_use]
    pub fn depth_of(&self, id: &EntityId) -> Option<u32> {
        self.depths.get(id).copied()
    }

    /// Returns true if the entity was reached.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.depths.contains_key(id)
    }
}

/// Path search request.
#[derive(Debug, Clone, PartialEq)]
pub struct PathQuery {
    /// Start entity.
    pub from: EntityId,
    /// End entity.
    pub to: EntityId,
    /// Maximum hops.
    pub max_length: u32,
    /// Allowed relation types (empty = any).
    pub relation_types: Vec<RelationType>,
    /// Return only the single shortest path.
    pub shortest_only: bool,
    /// Require every edge and node on the path to be valid.
    pub only_valid: bool,
}

impl PathQuery {
    /// Creates a query for up to [`MAX_PATHS`] paths of at most `max_length` hops.
    #[must_use]
    pub const fn new(from: EntityId, to: EntityId, max_length: u32) -> Self {
        Self {
            from,
            to,
            max_length,
            relation_types: Vec::new(),
            shortest_only: false,
            only_valid: false,
        }
    }

    /// Restricts the followed relation types.
    #[must_use]
    pub fn with_relation_types(mut self, types: impl IntoIterator<Item = RelationType>) -> Self {
        self.relation_types.extend(types);
        self
    }

    /// Returns only the shortest path.
    #[must_use]
    pub const fn shortest(mut self) -> Self {
        self.shortest_only = true;
        self
    }

    /// Excludes invalidated nodes and edges.
    #[must_use]
    pub const fn only_valid(mut self) -> Self {
        self.only_valid = true;
        self
    }
}

/// A simple directed path between two entities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphPath {
    /// Visited entities, start first.
    pub nodes: Vec<EntityId>,
    /// Traversed edges in order.
    pub relations: Vec<Relation>,
    /// Hop count.
    pub length: usize,
    /// Product of edge weights.
    pub weight: f32,
}

impl GraphPath {
    /// Builds a path from its edges, computing length and weight.
    #[must_use]
    pub fn from_relations(nodes: Vec<EntityId>, relations: Vec<Relation>) -> Self {
        let weight = relations.iter().map(|r| r.weight).product();
        Self {
            length: relations.len(),
            nodes,
            relations,
            weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::relation::NewRelation;
    use crate::models::temporal::now;

    #[test]
    fn test_entity_filter_builder() {
        let filter = EntityFilter::new()
            .with_type(EntityType::Function)
            .with_project("/repo")
            .with_min_confidence(0.5)
            .only_valid();
        assert_eq!(filter.types, vec![EntityType::Function]);
        assert_eq!(filter.project_path.as_deref(), Some("/repo"));
        assert!(filter.only_valid);
    }

    #[test]
    fn test_default_sort_is_newest_first() {
        let sort = EntitySort::default();
        assert_eq!(sort.field, SortField::CreatedAt);
        assert!(sort.descending);
    }

    #[test]
    fn test_neighborhood_query_defaults() {
        let q = NeighborhoodQuery::new([EntityId::new("a")]);
        assert_eq!(q.depth, 1);
        assert_eq!(q.direction, Direction::Both);
        assert!(q.only_valid);
        assert_eq!(q.max_nodes, DEFAULT_MAX_NODES);
    }

    #[test]
    fn test_path_weight_is_product() {
        let ts = now();
        let ab = NewRelation::new("a".into(), "b".into(), RelationType::Calls)
            .with_weight(0.5)
            .into_relation(ts);
        let bc = NewRelation::new("b".into(), "c".into(), RelationType::Calls)
            .with_weight(0.4)
            .into_relation(ts);
        let path = GraphPath::from_relations(
            vec!["a".into(), "b".into(), "c".into()],
            vec![ab, bc],
        );
        assert_eq!(path.length, 2);
        assert!((path.weight - 0.2).abs() < 1e-6);
    }
}
