//! Entity operations.

// Pagination values are small and non-negative.
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use super::GraphStore;
use super::rows::{collect_rows, insert_entity, parse_entity_row, update_entity_row};
use crate::models::temporal::{self, to_millis};
use crate::models::{
    Entity, EntityFilter, EntityId, EntitySort, EntityUpdate, GraphEvent, NewEntity, Page,
};
use crate::storage::sqlite::{WhereBuilder, escape_like_wildcards};
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashSet;
use tracing::instrument;

/// Fetches one entity row by id.
pub(super) fn fetch_entity(conn: &Connection, id: &EntityId) -> Result<Option<Entity>> {
    conn.query_row(
        "SELECT * FROM Entity WHERE id = ?1",
        params![id.as_str()],
        parse_entity_row,
    )
    .optional()
    .map_err(|e| Error::OperationFailed {
        operation: "get_entity".to_string(),
        cause: e.to_string(),
    })
}

/// Fetches entities by id, in no particular order. Missing ids are skipped.
pub(super) fn fetch_entities(conn: &Connection, ids: &[&str]) -> Result<Vec<Entity>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = WhereBuilder::new();
    builder.push_in_list("id", ids.iter().map(|id| (*id).to_string()));
    let sql = format!("SELECT * FROM Entity {}", builder.clause());
    let mut stmt = conn.prepare(&sql).map_err(|e| Error::OperationFailed {
        operation: "fetch_entities_prepare".to_string(),
        cause: e.to_string(),
    })?;
    let rows = stmt        .query_map(builder.params().as_slice(), parse_entity_row)
        .map_err(|e| Error::OperationFailed {
            operation: "fetch_entities".to_string(),
            cause: e.to_string(),
        })?;
    let entities = collect_rows(rows, "fetch_entities");
    Ok(entities)
}

/// Builds the WHERE clause for an entity filter.
fn build_entity_where(filter: &EntityFilter) -> WhereBuilder {
    let mut builder = WhereBuilder::new();

    builder.push_in("type", filter.types.iter().map(|t| t.as_str().to_string()));
    builder.push_in("source", filter.sources.iter().map(|s| s.as_str().to_string()));

    if let Some(ref project_path) = filter.project_path {
        builder.push("projectPath = {}", project_path.clone());
    }
    if let Some(ref session_id) = filter.session_id {
        builder.push("sessionId = {}", session_id.clone());
    }
    if let Some(ref file_path) = filter.file_path {
        builder.push("filePath = {}", file_path.clone());
    }
    if let Some(ref prefix) = filter.file_path_prefix {
        builder.push(
            "filePath LIKE {} ESCAPE '\\'",
            format!("{}%", escape_like_wildcards(prefix)),
        );
    }
    if let Some(min_confidence) = filter.min_confidence {
        builder.push("confidence >= {}", f64::from(min_confidence));
    }
    if filter.only_valid {
        builder.push_raw("validTo IS NULL");
    }
    if let Some(ref after) = filter.created_after {
        builder.push("createdAt >= {}", to_millis(after));
    }
    if let Some(ref before) = filter.created_before {
        builder.push("createdAt <= {}", to_millis(before));
    }
    if let Some(ref keyword) = filter.keyword {
        // LIKE is case-insensitive for ASCII in SQLite.
        builder.push(
            "(name LIKE {} ESCAPE '\\' OR content LIKE {} ESCAPE '\\')",
            format!("%{}%", escape_like_wildcards(keyword)),
        );
    }

    builder
}

impl GraphStore {
    /// Creates an entity, filling defaults for every omitted field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty name, or an error if the
    /// insert fails (including a duplicate id).
    #[instrument(skip(self, input), fields(entity_type = %input.entity_type, name = %input.name))]
    pub fn create_entity(&self, input: NewEntity) -> Result<Entity> {
        if input.name.trim().is_empty() {
            return Err(Error::InvalidInput("entity name must not be empty".to_string()));
        }

        let entity = input.into_entity(temporal::now());
        self.with_conn("create_entity", |conn| insert_entity(conn, &entity))?;

        self.cache_put(&entity);
        metrics::counter!("graph_entities_created_total").increment(1);
        tracing::debug!(entity_id = %entity.id, "Created entity");
        self.emit(|meta| GraphEvent::EntityCreated {
            meta,
            entity: Box::new(entity.clone()),
        });
        Ok(entity)
    }

    /// Returns an entity by id, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    #[instrument(skip(self), fields(entity_id = %id))]
    pub fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        if let Some(cache) = &self.cache
            && let Some(entity) = cache.get(id)
        {
            return Ok(Some(entity));
        }

        let entity = self.with_conn("get_entity", |conn| fetch_entity(conn, id))?;
        if let Some(ref entity) = entity {
            self.cache_put(entity);
        }
        Ok(entity)
    }

    /// Merges the supplied fields into an entity and refreshes `updated_at`.
    ///
    /// Returns `None` if the entity does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the read or write fails.
    #[instrument(skip(self, update), fields(entity_id = %id))]
    pub fn update_entity(&self, id: &EntityId, update: EntityUpdate) -> Result<Option<Entity>> {
        let updated = self.update_entity_quiet(id, update)?;
        if let Some(ref entity) = updated {
            self.emit(|meta| GraphEvent::EntityUpdated {
                meta,
                entity: Box::new(entity.clone()),
            });
        }
        Ok(updated)
    }

    /// Read-merge-write in one transaction, without publishing an event.
    fn update_entity_quiet(&self, id: &EntityId, update: EntityUpdate) -> Result<Option<Entity>> {
        let updated = self.with_conn("update_entity", |conn| {
            let tx = conn.transaction().map_err(|e| Error::OperationFailed {
                operation: "update_entity_begin".to_string(),
                cause: e.to_string(),
            })?;
            let Some(mut entity) = fetch_entity(&tx, id)? else {
                return Ok(None);
            };
            update.apply(&mut entity, temporal::now());
            update_entity_row(&tx, &entity)?;
            tx.commit().map_err(|e| Error::OperationFailed {
                operation: "update_entity_commit".to_string(),
                cause: e.to_string(),
            })?;
            Ok(Some(entity))
        })?;

        match &updated {
            Some(entity) => {
                self.cache_put(entity);
                metrics::counter!("graph_entities_updated_total").increment(1);
            },
            None => self.cache_evict(id),
        }
        Ok(updated)
    }

    /// Deletes an entity and every relation touching it.
    ///
    /// Always returns `true`, whether or not the entity existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails; nothing is deleted in that case.
    #[instrument(skip(self), fields(entity_id = %id))]
    pub fn delete_entity(&self, id: &EntityId) -> Result<bool> {
        let (relations, nodes) = self.with_conn("delete_entity", |conn| {
            let tx = conn.transaction().map_err(|e| Error::OperationFailed {
                operation: "delete_entity_begin".to_string(),
                cause: e.to_string(),
            })?;
            let relations = tx
                .execute(
                    "DELETE FROM Relates WHERE fromId = ?1 OR toId = ?1",
                    params![id.as_str()],
                )
                .map_err(|e| Error::OperationFailed {
                    operation: "delete_entity_relations".to_string(),
                    cause: e.to_string(),
                })?;
            let nodes = tx
                .execute("DELETE FROM Entity WHERE id = ?1", params![id.as_str()])
                .map_err(|e| Error::OperationFailed {
                    operation: "delete_entity".to_string(),
                    cause: e.to_string(),
                })?;
            tx.commit().map_err(|e| Error::OperationFailed {
                operation: "delete_entity_commit".to_string(),
                cause: e.to_string(),
            })?;
            Ok((relations, nodes))
        })?;

        self.cache_evict(id);
        if nodes > 0 {
            metrics::counter!("graph_entities_deleted_total").increment(1);
        }
        tracing::debug!(entity_id = %id, relations, existed = nodes > 0, "Deleted entity");
        self.emit(|meta| GraphEvent::EntityDeleted {
            meta,
            entity_id: id.clone(),
        });
        Ok(true)
    }

    /// Soft-deletes an entity by stamping `valid_to = now`.
    ///
    /// Returns `None` if the entity does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    #[instrument(skip(self), fields(entity_id = %id))]
    pub fn invalidate_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        let updated = self.update_entity(id, EntityUpdate::new().valid_to(Some(temporal::now())))?;
        if updated.is_some() {
            self.emit(|meta| GraphEvent::EntityInvalidated {
                meta,
                entity_id: id.clone(),
            });
        }
        Ok(updated)
    }

    /// Soft-deletes every currently valid entity located in `file_path`.
    ///
    /// Returns the number of entities invalidated.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    #[instrument(skip(self))]
    pub fn invalidate_entities_from_file(&self, file_path: &str) -> Result<usize> {
        let now = to_millis(&temporal::now());
        let ids = self.with_conn("invalidate_entities_from_file", |conn| {
            let tx = conn.transaction().map_err(|e| Error::OperationFailed {
                operation: "invalidate_file_begin".to_string(),
                cause: e.to_string(),
            })?;
            let ids: Vec<EntityId> = {
                let mut stmt = tx
                    .prepare("SELECT id FROM Entity WHERE filePath = ?1 AND validTo IS NULL")
                    .map_err(|e| Error::OperationFailed {
                        operation: "invalidate_file_prepare".to_string(),
                        cause: e.to_string(),
                    })?;
                let rows = stmt
                    .query_map(params![file_path], |row| row.get::<_, String>(0))
                    .map_err(|e| Error::OperationFailed {
                        operation: "invalidate_file_select".to_string(),
                        cause: e.to_string(),
                    })?;
                collect_rows(rows, "invalidate_file_select")
                    .into_iter()
                    .map(EntityId::new)
                    .collect()
            };
            tx.execute(
                "UPDATE Entity SET validTo = ?2, updatedAt = ?2
                 WHERE filePath = ?1 AND validTo IS NULL",
                params![file_path, now],
            )
            .map_err(|e| Error::OperationFailed {
                operation: "invalidate_file_update".to_string(),
                cause: e.to_string(),
            })?;
            tx.commit().map_err(|e| Error::OperationFailed {
                operation: "invalidate_file_commit".to_string(),
                cause: e.to_string(),
            })?;
            Ok(ids)
        })?;

        if let Some(cache) = &self.cache {
            cache.evict_all(&ids);
        }
        metrics::counter!("graph_entities_invalidated_total").increment(ids.len() as u64);
        tracing::debug!(file_path, count = ids.len(), "Invalidated entities from file");
        for id in &ids {
            self.emit(|meta| GraphEvent::EntityInvalidated {
                meta,
                entity_id: id.clone(),
            });
        }
        Ok(ids.len())
    }

    /// Queries entities with a conjunctive filter, a sort order, and a page.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    #[instrument(skip(self, filter))]
    pub fn query_entities(
        &self,
        filter: &EntityFilter,
        sort: EntitySort,
        page: Page,
    ) -> Result<Vec<Entity>> {
        let builder = build_entity_where(filter);
        let direction = if sort.descending { "DESC" } else { "ASC" };
        let limit = page.limit.map_or(-1, |l| l as i64);
        let sql = format!(
            "SELECT * FROM Entity {} ORDER BY {} {direction}, id {direction} LIMIT {limit} OFFSET {}",
            builder.clause(),
            sort.field.column(),
            page.offset
        );

        self.with_conn("query_entities", |conn| {
            let mut stmt = conn.prepare(&sql).map_err(|e| Error::OperationFailed {
                operation: "query_entities_prepare".to_string(),
                cause: e.to_string(),
            })?;
            let rows = stmt                .query_map(builder.params().as_slice(), parse_entity_row)
                .map_err(|e| Error::OperationFailed {
                    operation: "query_entities".to_string(),
                    cause: e.to_string(),
                })?;
            let entities = collect_rows(rows, "query_entities");
            Ok(entities)
        })
    }

    /// Counts entities matching a filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_entities(&self, filter: &EntityFilter) -> Result<usize> {
        let builder = build_entity_where(filter);
        let sql = format!("SELECT COUNT(*) FROM Entity {}", builder.clause());
        self.with_conn("count_entities", |conn| {
            conn.query_row(&sql, builder.params().as_slice(), |row| row.get::<_, i64>(0))
                .map(|count| count as usize)
                .map_err(|e| Error::OperationFailed {
                    operation: "count_entities".to_string(),
                    cause: e.to_string(),
                })
        })
    }

    /// Finds entities whose name matches exactly, ignoring ASCII case.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    #[instrument(skip(self))]
    pub fn find_entities_by_name(&self, name: &str, limit: usize) -> Result<Vec<Entity>> {
        self.with_conn("find_entities_by_name", |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM Entity WHERE name = ?1 COLLATE NOCASE
                     ORDER BY createdAt DESC, id DESC LIMIT ?2",
                )
                .map_err(|e| Error::OperationFailed {
                    operation: "find_entities_by_name_prepare".to_string(),
                    cause: e.to_string(),
                })?;
            let rows = stmt                .query_map(params![name, limit as i64], parse_entity_row)
                .map_err(|e| Error::OperationFailed {
                    operation: "find_entities_by_name".to_string(),
                    cause: e.to_string(),
                })?;
            let entities = collect_rows(rows, "find_entities_by_name");
            Ok(entities)
        })
    }

    /// Follows the `supersedes_id` chain from `id`, newest version first.
    ///
    /// Returns an empty list if `id` does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a lookup fails.
    #[instrument(skip(self), fields(entity_id = %id))]
    pub fn entity_history(&self, id: &EntityId) -> Result<Vec<Entity>> {
        self.with_conn("entity_history", |conn| {
            let mut chain = Vec::new();
            let mut seen = HashSet::new();
            let mut next = Some(id.clone());
            while let Some(current) = next.take() {
                if !seen.insert(current.clone()) {
                    tracing::warn!(entity_id = %current, "Cycle in entity version chain");
                    break;
                }
                let Some(entity) = fetch_entity(conn, &current)? else {
                    break;
                };
                next = entity.supersedes_id.clone();
                chain.push(entity);
            }
            Ok(chain)
        })
    }
}
