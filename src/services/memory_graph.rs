//! Vector/graph pairing.
//!
//! Every entity written through [`MemoryGraph`] gets a vector document
//! first, then a graph node that references it by `vector_id`. The two
//! writes are not atomic: if the node insert fails the document is left
//! orphaned. That window is logged and counted, not repaired.
//!
//! Batch operations run element by element, in input order, so each
//! document/node pair completes before the next begins.

use crate::config::{HybridSearchConfig, MnemosConfig};
use crate::models::temporal;
use crate::models::{
    Entity, EntityId, EntityType, EntityUpdate, Metadata, NewEntity, NewRelation, Relation,
    RelationType,
};
use crate::storage::GraphStore;
use crate::vector::{
    META_ENTITY_ID, META_ENTITY_TYPE, META_FILE_PATH, META_NAME, META_PROJECT_PATH,
    META_SESSION_ID, VectorIndex,
};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::instrument;

/// Identity and scope fields copied into a vector document's metadata.
#[derive(PartialEq, Eq)]
struct DocumentScope<'a> {
    id: &'a EntityId,
    entity_type: EntityType,
    name: &'a str,
    project_path: Option<&'a str>,
    session_id: Option<&'a str>,
    file_path: Option<&'a str>,
}

impl DocumentScope<'_> {
    fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(META_ENTITY_ID.to_string(), self.id.as_str().into());
        metadata.insert(META_ENTITY_TYPE.to_string(), self.entity_type.as_str().into());
        metadata.insert(META_NAME.to_string(), self.name.into());
        if let Some(project_path) = self.project_path {
            metadata.insert(META_PROJECT_PATH.to_string(), project_path.into());
        }
        if let Some(session_id) = self.session_id {
            metadata.insert(META_SESSION_ID.to_string(), session_id.into());
        }
        if let Some(file_path) = self.file_path {
            metadata.insert(META_FILE_PATH.to_string(), file_path.into());
        }
        metadata
    }
}

impl<'a> From<&'a Entity> for DocumentScope<'a> {
    fn from(entity: &'a Entity) -> Self {
        Self {
            id: &entity.id,
            entity_type: entity.entity_type,
            name: &entity.name,
            project_path: entity.project_path.as_deref(),
            session_id: entity.session_id.as_deref(),
            file_path: entity.file_path(),
        }
    }
}

/// Hybrid graph + vector memory.
///
/// An explicit handle: the caller opens the store, chooses the vector
/// index, and owns the lifetime of both.
pub struct MemoryGraph {
    store: GraphStore,
    index: Arc<dyn VectorIndex>,
    config: HybridSearchConfig,
}

impl MemoryGraph {
    /// Pairs an open store with a vector index.
    #[must_use]
    pub fn new(store: GraphStore, index: Arc<dyn VectorIndex>, config: HybridSearchConfig) -> Self {
        Self {
            store,
            index,
            config: config.normalized(),
        }
    }

    /// Opens the store described by `config` and pairs it with `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn open(config: &MnemosConfig, index: Arc<dyn VectorIndex>) -> Result<Self> {
        let store = GraphStore::open(&config.graph)?;
        Ok(Self::new(store, index, config.search.clone()))
    }

    /// The underlying graph store.
    #[must_use]
    pub const fn store(&self) -> &GraphStore {
        &self.store
    }

    /// The paired vector index.
    #[must_use]
    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    /// Search defaults.
    #[must_use]
    pub const fn config(&self) -> &HybridSearchConfig {
        &self.config
    }

    /// Closes the underlying store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to close.
    pub fn close(&self) -> Result<()> {
        self.store.close()
    }

    /// Writes a vector document, then the graph node referencing it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty name, or the error from
    /// either write. A failed node insert leaves the document orphaned.
    #[instrument(skip(self, input), fields(entity_type = %input.entity_type, name = %input.name))]
    pub fn add_entity(&self, input: NewEntity) -> Result<Entity> {
        if input.name.trim().is_empty() {
            return Err(Error::InvalidInput("entity name must not be empty".to_string()));
        }

        let id = input.id.clone().unwrap_or_else(EntityId::generate);
        let metadata = DocumentScope {
            id: &id,
            entity_type: input.entity_type,
            name: &input.name,
            project_path: input.project_path.as_deref(),
            session_id: input.session_id.as_deref(),
            file_path: input.location.as_ref().map(|l| l.file_path.as_str()),
        }
        .metadata();
        let vector_id = self.index.add(&input.content, metadata)?;

        match self
            .store
            .create_entity(input.with_id(id.clone()).with_vector_id(vector_id.clone()))
        {
            Ok(entity) => Ok(entity),
            Err(e) => {
                tracing::warn!(
                    entity_id = %id,
                    vector_id = %vector_id,
                    error = %e,
                    "Graph node insert failed after vector write; document is orphaned"
                );
                metrics::counter!("memory_graph_orphaned_vectors_total").increment(1);
                Err(e)
            },
        }
    }

    /// Adds entities one at a time, in order. Stops at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first error; earlier entities stay written.
    pub fn add_entities(&self, inputs: Vec<NewEntity>) -> Result<Vec<Entity>> {
        let mut created = Vec::with_capacity(inputs.len());
        for input in inputs {
            created.push(self.add_entity(input)?);
        }
        Ok(created)
    }

    /// Patches an entity, keeping its vector document in step.
    ///
    /// The document is replaced when the update changes the content or any
    /// field mirrored into document metadata (type, name, project, session,
    /// file). Other updates leave it untouched.
    ///
    /// Returns `None` if the entity does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector index or the store fails.
    #[instrument(skip(self, update), fields(entity_id = %id))]
    pub fn update_entity(&self, id: &EntityId, update: EntityUpdate) -> Result<Option<Entity>> {
        let Some(existing) = self.store.get_entity(id)? else {
            return Ok(None);
        };

        let mut merged = existing.clone();
        update.clone().apply(&mut merged, temporal::now());
        let document_stale = merged.content != existing.content
            || DocumentScope::from(&merged) != DocumentScope::from(&existing);
        if !document_stale {
            return self.store.update_entity(id, update);
        }

        if let Some(ref old_vector_id) = existing.vector_id {
            self.index.delete(old_vector_id)?;
        }
        let new_vector_id = self
            .index
            .add(&merged.content, DocumentScope::from(&merged).metadata())
            .inspect_err(|e| {
                tracing::warn!(
                    entity_id = %id,
                    vector_id = ?existing.vector_id,
                    error = %e,
                    "Vector rewrite failed after old document was deleted; node references a missing document"
                );
                metrics::counter!("memory_graph_dangling_vector_ids_total").increment(1);
            })?;

        let result = self
            .store
            .update_entity(id, update.vector_id(Some(new_vector_id.clone())));
        if !matches!(result, Ok(Some(_))) {
            tracing::warn!(
                entity_id = %id,
                vector_id = %new_vector_id,
                "Graph node update failed after vector rewrite; document is orphaned"
            );
            metrics::counter!("memory_graph_orphaned_vectors_total").increment(1);
        }
        result
    }

    /// Deletes the vector document, then the node and its relations.
    ///
    /// Always returns `true`.
    ///
    /// # Errors
    ///
    /// Returns an error if either delete fails. The node is kept if the
    /// vector delete fails.
    #[instrument(skip(self), fields(entity_id = %id))]
    pub fn delete_entity(&self, id: &EntityId) -> Result<bool> {
        if let Some(entity) = self.store.get_entity(id)?
            && let Some(ref vector_id) = entity.vector_id
        {
            self.index.delete(vector_id).inspect_err(|e| {
                tracing::warn!(entity_id = %id, vector_id = %vector_id, error = %e, "Vector delete failed");
            })?;
        }
        self.store.delete_entity(id)
    }

    /// Soft-deletes an entity. Its vector document is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn invalidate_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        self.store.invalidate_entity(id)
    }

    /// Soft-deletes every valid entity in a file. Returns the count.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn invalidate_file(&self, file_path: &str) -> Result<usize> {
        self.store.invalidate_entities_from_file(file_path)
    }

    /// Creates a relation. Returns `None` if an endpoint is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn add_relation(&self, input: NewRelation) -> Result<Option<Relation>> {
        self.store.create_relation(input)
    }

    /// Creates relations one at a time, in order.
    ///
    /// The result is positional: `None` marks an input whose endpoint was
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns the first insert error.
    pub fn add_relations(&self, inputs: Vec<NewRelation>) -> Result<Vec<Option<Relation>>> {
        let mut created = Vec::with_capacity(inputs.len());
        for input in inputs {
            created.push(self.store.create_relation(input)?);
        }
        Ok(created)
    }

    /// Replaces `old_id` with a new version.
    ///
    /// The new entity records `supersedes_id = old_id`, the old one is
    /// invalidated, and a `supersedes` edge links new to old. Returns
    /// `None` if `old_id` does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if any write fails.
    #[instrument(skip(self, replacement), fields(old_id = %old_id))]
    pub fn supersede_entity(
        &self,
        old_id: &EntityId,
        replacement: NewEntity,
    ) -> Result<Option<Entity>> {
        if self.store.get_entity(old_id)?.is_none() {
            return Ok(None);
        }

        let newer = self.add_entity(replacement.with_supersedes(old_id.clone()))?;
        self.store.invalidate_entity(old_id)?;
        self.store.create_relation(NewRelation::new(
            newer.id.clone(),
            old_id.clone(),
            RelationType::Supersedes,
        ))?;
        Ok(Some(newer))
    }

    /// Increments the access counter and stamps `last_accessed_at`.
    ///
    /// Returns `None` for an unknown id.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn record_access(&self, id: &EntityId) -> Result<Option<Entity>> {
        let Some(entity) = self.store.get_entity(id)? else {
            return Ok(None);
        };
        let update =
            EntityUpdate::new().accessed(entity.access_count.saturating_add(1), temporal::now());
        self.store.update_entity(id, update)
    }

    /// Records an access for each id, one at a time. Returns how many were found.
    ///
    /// # Errors
    ///
    /// Returns the first update error.
    pub fn record_access_batch(&self, ids: &[EntityId]) -> Result<usize> {
        let mut found = 0;
        for id in ids {
            if self.record_access(id)?.is_some() {
                found += 1;
            }
        }
        Ok(found)
    }
}

impl std::fmt::Debug for MemoryGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGraph")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityFilter, EntitySort, Location, Page, RelationFilter};
    use crate::vector::InMemoryVectorIndex;

    fn create_graph() -> (MemoryGraph, Arc<InMemoryVectorIndex>) {
        let index = Arc::new(InMemoryVectorIndex::new());
        let store = GraphStore::in_memory().expect("Failed to create in-memory store");
        let graph = MemoryGraph::new(store, index.clone(), HybridSearchConfig::default());
        (graph, index)
    }

    #[test]
    fn test_add_entity_pairs_vector_document() {
        let (graph, index) = create_graph();
        let entity = graph
            .add_entity(
                NewEntity::new(EntityType::Function, "parse", "fn parse() {}")
                    .with_location(Location::new("src/lib.rs", 1, 1))
                    .with_project("/repo"),
            )
            .unwrap();

        let vector_id = entity.vector_id.clone().unwrap();
        let document = index.get(&vector_id).unwrap();
        assert_eq!(document.content, "fn parse() {}");
        assert_eq!(document.meta_str(META_ENTITY_ID), Some(entity.id.as_str()));
        assert_eq!(document.meta_str(META_ENTITY_TYPE), Some("function"));
        assert_eq!(document.meta_str(META_PROJECT_PATH), Some("/repo"));
        assert_eq!(document.meta_str(META_FILE_PATH), Some("src/lib.rs"));
        assert!(document.meta_str(META_SESSION_ID).is_none());
    }

    #[test]
    fn test_add_entity_empty_name_writes_nothing() {
        let (graph, index) = create_graph();
        let result = graph.add_entity(NewEntity::new(EntityType::Concept, "", "x"));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(index.is_empty());
    }

    #[test]
    fn test_add_entity_failure_leaves_orphan() {
        let (graph, index) = create_graph();
        let id = EntityId::new("dup");
        graph
            .add_entity(NewEntity::new(EntityType::Concept, "a", "a").with_id(id.clone()))
            .unwrap();
        let result = graph.add_entity(NewEntity::new(EntityType::Concept, "b", "b").with_id(id));
        assert!(result.is_err());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_add_entities_in_order() {
        let (graph, index) = create_graph();
        let created = graph
            .add_entities(vec![
                NewEntity::new(EntityType::Concept, "one", "first"),
                NewEntity::new(EntityType::Concept, "two", "second"),
                NewEntity::new(EntityType::Concept, "three", "third"),
            ])
            .unwrap();

        let names: Vec<_> = created.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
        let vector_ids: Vec<_> = created
            .iter()
            .map(|e| e.vector_id.clone().unwrap())
            .collect();
        assert_eq!(index.ids(), vector_ids);
    }

    #[test]
    fn test_update_content_replaces_document() {
        let (graph, index) = create_graph();
        let entity = graph
            .add_entity(NewEntity::new(EntityType::Decision, "db", "Use Postgres"))
            .unwrap();
        let old_vector = entity.vector_id.clone().unwrap();

        let rescored = graph
            .update_entity(&entity.id, EntityUpdate::new().confidence(0.5))
            .unwrap()
            .unwrap();
        assert_eq!(rescored.vector_id.as_deref(), Some(old_vector.as_str()));

        let updated = graph
            .update_entity(
                &entity.id,
                EntityUpdate::new().name("database").content("Use SQLite"),
            )
            .unwrap()
            .unwrap();
        let new_vector = updated.vector_id.clone().unwrap();
        assert_ne!(new_vector, old_vector);
        assert!(index.get(&old_vector).is_none());
        let document = index.get(&new_vector).unwrap();
        assert_eq!(document.content, "Use SQLite");
        assert_eq!(document.meta_str(META_NAME), Some("database"));
        assert_eq!(index.len(), 1);

        assert!(
            graph
                .update_entity(&EntityId::new("missing"), EntityUpdate::new().content("x"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_scope_change_rewrites_document() {
        let (graph, index) = create_graph();
        let entity = graph
            .add_entity(
                NewEntity::new(EntityType::Function, "load", "fn load() {}")
                    .with_project("/old")
                    .with_location(Location::new("src/a.rs", 1, 2)),
            )
            .unwrap();
        let old_vector = entity.vector_id.clone().unwrap();

        let moved = graph
            .update_entity(
                &entity.id,
                EntityUpdate::new()
                    .project_path(Some("/new".to_string()))
                    .location(Some(Location::new("src/b.rs", 3, 4))),
            )
            .unwrap()
            .unwrap();
        let new_vector = moved.vector_id.clone().unwrap();

        assert_ne!(new_vector, old_vector);
        assert!(index.get(&old_vector).is_none());
        let document = index.get(&new_vector).unwrap();
        assert_eq!(document.content, "fn load() {}");
        assert_eq!(document.meta_str(META_PROJECT_PATH), Some("/new"));
        assert_eq!(document.meta_str(META_FILE_PATH), Some("src/b.rs"));
        assert_eq!(index.len(), 1);
    }

    /// Index whose `add` starts failing once `reject_adds` is set.
    #[derive(Default)]
    struct FlakyIndex {
        inner: InMemoryVectorIndex,
        reject_adds: std::sync::atomic::AtomicBool,
    }

    impl VectorIndex for FlakyIndex {
        fn add(&self, content: &str, metadata: Metadata) -> Result<String> {
            if self.reject_adds.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::operation("vector_add", "index unavailable"));
            }
            self.inner.add(content, metadata)
        }

        fn delete(&self, id: &str) -> Result<()> {
            self.inner.delete(id)
        }

        fn search(
            &self,
            query: &str,
            options: &crate::vector::VectorSearchOptions,
        ) -> Result<Vec<crate::vector::VectorHit>> {
            self.inner.search(query, options)
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    #[test]
    fn test_failed_rewrite_keeps_node_and_reports_error() {
        let index = Arc::new(FlakyIndex::default());
        let store = GraphStore::in_memory().expect("Failed to create in-memory store");
        let graph = MemoryGraph::new(store, index.clone(), HybridSearchConfig::default());
        let entity = graph
            .add_entity(NewEntity::new(EntityType::Concept, "c", "before"))
            .unwrap();

        index
            .reject_adds
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let result = graph.update_entity(&entity.id, EntityUpdate::new().content("after"));
        assert!(matches!(result, Err(Error::OperationFailed { .. })));

        let stored = graph.store().get_entity(&entity.id).unwrap().unwrap();
        assert_eq!(stored.content, "before");
        assert_eq!(stored.vector_id, entity.vector_id);
        assert!(index.is_empty());
    }

    #[test]
    fn test_delete_entity_removes_document_and_relations() {
        let (graph, index) = create_graph();
        let a = graph
            .add_entity(NewEntity::new(EntityType::Concept, "a", "alpha"))
            .unwrap();
        let b = graph
            .add_entity(NewEntity::new(EntityType::Concept, "b", "beta"))
            .unwrap();
        graph
            .add_relation(NewRelation::new(a.id.clone(), b.id.clone(), RelationType::RelatedTo))
            .unwrap();

        assert!(graph.delete_entity(&a.id).unwrap());
        assert_eq!(index.len(), 1);
        assert!(graph.store().get_entity(&a.id).unwrap().is_none());
        let relations = graph
            .store()
            .query_relations(&RelationFilter::new().touching(a.id.clone()))
            .unwrap();
        assert!(relations.is_empty());
        assert!(graph.delete_entity(&a.id).unwrap());
    }

    #[test]
    fn test_add_relations_is_positional() {
        let (graph, _) = create_graph();
        let a = graph
            .add_entity(NewEntity::new(EntityType::Concept, "a", "alpha"))
            .unwrap();
        let b = graph
            .add_entity(NewEntity::new(EntityType::Concept, "b", "beta"))
            .unwrap();

        let created = graph
            .add_relations(vec![
                NewRelation::new(a.id.clone(), b.id.clone(), RelationType::Requires),
                NewRelation::new(a.id.clone(), EntityId::new("ghost"), RelationType::Requires),
            ])
            .unwrap();
        assert!(created[0].is_some());
        assert!(created[1].is_none());
    }

    #[test]
    fn test_invalidate_file() {
        let (graph, _) = create_graph();
        for name in ["a", "b"] {
            graph
                .add_entity(
                    NewEntity::new(EntityType::Function, name, name)
                        .with_location(Location::new("src/x.rs", 1, 2)),
                )
                .unwrap();
        }
        assert_eq!(graph.invalidate_file("src/x.rs").unwrap(), 2);
        let valid = graph
            .store()
            .count_entities(&EntityFilter::new().only_valid())
            .unwrap();
        assert_eq!(valid, 0);
    }

    #[test]
    fn test_supersede_entity() {
        let (graph, _) = create_graph();
        let old = graph
            .add_entity(NewEntity::new(EntityType::Decision, "db", "Use Postgres"))
            .unwrap();

        let newer = graph
            .supersede_entity(
                &old.id,
                NewEntity::new(EntityType::Decision, "db", "Use SQLite"),
            )
            .unwrap()
            .unwrap();

        assert_eq!(newer.supersedes_id.as_ref(), Some(&old.id));
        assert!(!graph.store().get_entity(&old.id).unwrap().unwrap().is_valid());
        let edges = graph
            .store()
            .query_relations(&RelationFilter::new().from(newer.id.clone()))
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relation_type, RelationType::Supersedes);
        assert_eq!(graph.store().entity_history(&newer.id).unwrap().len(), 2);

        assert!(
            graph
                .supersede_entity(
                    &EntityId::new("missing"),
                    NewEntity::new(EntityType::Decision, "x", "x")
                )
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_record_access() {
        let (graph, _) = create_graph();
        let entity = graph
            .add_entity(NewEntity::new(EntityType::Concept, "c", "content"))
            .unwrap();
        assert_eq!(entity.access_count, 0);
        assert!(entity.last_accessed_at.is_none());

        let touched = graph.record_access(&entity.id).unwrap().unwrap();
        assert_eq!(touched.access_count, 1);
        assert!(touched.last_accessed_at.is_some());

        let found = graph
            .record_access_batch(&[entity.id.clone(), EntityId::new("missing"), entity.id.clone()])
            .unwrap();
        assert_eq!(found, 2);

        let stored = graph
            .store()
            .query_entities(&EntityFilter::new(), EntitySort::default(), Page::default())
            .unwrap();
        assert_eq!(stored[0].access_count, 3);
        assert!(graph.record_access(&EntityId::new("missing")).unwrap().is_none());
    }
}
