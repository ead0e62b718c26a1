//! Context helpers scoped to an entity, a file, or a session.

use super::MemoryGraph;
use crate::models::{
    Entity, EntityFilter, EntityId, EntitySort, NeighborhoodQuery, Page, Relation, RelationFilter,
    RelationType,
};
use crate::Result;
use serde::Serialize;
use std::collections::HashSet;
use tracing::instrument;

/// An entity and its bounded neighborhood.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityContext {
    /// The focal entity.
    pub entity: Entity,
    /// Reached entities, nearest first.
    pub related: Vec<Entity>,
    /// Edges touched while expanding.
    pub relations: Vec<Relation>,
}

/// Everything currently known about one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContext {
    /// The file.
    pub file_path: String,
    /// Valid entities located in the file.
    pub entities: Vec<Entity>,
    /// Valid edges with both endpoints in `entities`.
    pub relations: Vec<Relation>,
}

/// Everything produced during one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    /// The session.
    pub session_id: String,
    /// Entities scoped to the session.
    pub entities: Vec<Entity>,
    /// Distinct edges touching any of `entities`.
    pub relations: Vec<Relation>,
}

impl MemoryGraph {
    /// Returns an entity with up to `max_related` neighbors within `depth` hops.
    ///
    /// Returns `None` if the entity does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`](crate::Error::InvalidInput) for a zero
    /// depth, or an error if the traversal fails.
    #[instrument(skip(self, relation_types), fields(entity_id = %id))]
    pub fn get_entity_context(
        &self,
        id: &EntityId,
        depth: u32,
        relation_types: &[RelationType],
        max_related: usize,
    ) -> Result<Option<EntityContext>> {
        let Some(entity) = self.store().get_entity(id)? else {
            return Ok(None);
        };
        let neighborhood = self.store().get_neighborhood(
            &NeighborhoodQuery::new([id.clone()])
                .with_depth(depth)
                .with_relation_types(relation_types.iter().copied())
                .with_max_nodes(max_related),
        )?;
        Ok(Some(EntityContext {
            entity,
            related: neighborhood.entities,
            relations: neighborhood.relations,
        }))
    }

    /// Returns the valid entities in a file and the edges among them.
    ///
    /// Edges leaving the file are excluded.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    #[instrument(skip(self))]
    pub fn get_file_context(&self, file_path: &str) -> Result<FileContext> {
        let entities = self.store().query_entities(
            &EntityFilter::new().with_file(file_path).only_valid(),
            EntitySort::default(),
            Page::default(),
        )?;
        let ids: Vec<EntityId> = entities.iter().map(|e| e.id.clone()).collect();
        let relations = self.store().relations_among(&ids, true)?;
        Ok(FileContext {
            file_path: file_path.to_string(),
            entities,
            relations,
        })
    }

    /// Returns the entities of a session and every edge touching them.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    #[instrument(skip(self))]
    pub fn get_session_context(&self, session_id: &str) -> Result<SessionContext> {
        let entities = self.store().query_entities(
            &EntityFilter::new().with_session(session_id),
            EntitySort::default(),
            Page::default(),
        )?;

        let mut seen = HashSet::new();
        let mut relations = Vec::new();
        for entity in &entities {
            let incident = self
                .store()
                .query_relations(&RelationFilter::new().touching(entity.id.clone()))?;
            relations.extend(incident.into_iter().filter(|r| seen.insert(r.id.clone())));
        }

        Ok(SessionContext {
            session_id: session_id.to_string(),
            entities,
            relations,
        })
    }
}
