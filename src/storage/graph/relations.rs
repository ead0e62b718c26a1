//! Relation operations.

#![allow(clippy::cast_possible_wrap)]

use super::GraphStore;
use super::rows::{
    collect_rows, insert_relation_if_endpoints, parse_relation_row, update_relation_row,
};
use crate::models::temporal;
use crate::models::{EntityId, GraphEvent, NewRelation, Relation, RelationFilter, RelationId, RelationUpdate};
use crate::storage::sqlite::WhereBuilder;
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::instrument;

fn fetch_relation(conn: &Connection, id: &RelationId) -> Result<Option<Relation>> {
    conn.query_row(
        "SELECT * FROM Relates WHERE id = ?1",
        params![id.as_str()],
        parse_relation_row,
    )
    .optional()
    .map_err(|e| Error::OperationFailed {
        operation: "get_relation".to_string(),
        cause: e.to_string(),
    })
}

/// Fetches relations by id. Missing ids are skipped.
pub(super) fn fetch_relations(conn: &Connection, ids: &[&str]) -> Result<Vec<Relation>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = WhereBuilder::new();
    builder.push_in_list("id", ids.iter().map(|id| (*id).to_string()));
    let sql = format!("SELECT * FROM Relates {} ORDER BY id", builder.clause());
    let mut stmt = conn.prepare(&sql).map_err(|e| Error::OperationFailed {
        operation: "fetch_relations_prepare".to_string(),
        cause: e.to_string(),
    })?;
    let rows = stmt        .query_map(builder.params().as_slice(), parse_relation_row)
        .map_err(|e| Error::OperationFailed {
            operation: "fetch_relations".to_string(),
            cause: e.to_string(),
        })?;
    let relations = collect_rows(rows, "fetch_relations");
    Ok(relations)
}

impl GraphStore {
    /// Creates a relation between two existing entities.
    ///
    /// Returns `None` (and writes nothing) if either endpoint is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    #[instrument(skip(self, input), fields(from = %input.from_id, to = %input.to_id, relation_type = %input.relation_type))]
    pub fn create_relation(&self, input: NewRelation) -> Result<Option<Relation>> {
        let relation = input.into_relation(temporal::now());
        let written = self.with_conn("create_relation", |conn| {
            insert_relation_if_endpoints(conn, &relation)
        })?;

        if written == 0 {
            tracing::debug!("Relation endpoint missing, nothing created");
            return Ok(None);
        }

        metrics::counter!("graph_relations_created_total").increment(1);
        self.emit(|meta| GraphEvent::RelationCreated {
            meta,
            relation: Box::new(relation.clone()),
        });
        Ok(Some(relation))
    }

    /// Returns a relation by id, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub fn get_relation(&self, id: &RelationId) -> Result<Option<Relation>> {
        self.with_conn("get_relation", |conn| fetch_relation(conn, id))
    }

    /// Merges weight, confidence or validity into a relation.
    ///
    /// Returns `None` if the relation does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the read or write fails.
    #[instrument(skip(self, update), fields(relation_id = %id))]
    pub fn update_relation(&self, id: &RelationId, update: RelationUpdate) -> Result<Option<Relation>> {
        let updated = self.with_conn("update_relation", |conn| {
            let tx = conn.transaction().map_err(|e| Error::OperationFailed {
                operation: "update_relation_begin".to_string(),
                cause: e.to_string(),
            })?;
            let Some(mut relation) = fetch_relation(&tx, id)? else {
                return Ok(None);
            };
            update.apply(&mut relation);
            update_relation_row(&tx, &relation)?;
            tx.commit().map_err(|e| Error::OperationFailed {
                operation: "update_relation_commit".to_string(),
                cause: e.to_string(),
            })?;
            Ok(Some(relation))
        })?;

        if let Some(ref relation) = updated {
            self.emit(|meta| GraphEvent::RelationUpdated {
                meta,
                relation: Box::new(relation.clone()),
            });
        }
        Ok(updated)
    }

    /// Soft-deletes a relation by stamping `valid_to = now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn invalidate_relation(&self, id: &RelationId) -> Result<Option<Relation>> {
        self.update_relation(id, RelationUpdate::new().valid_to(Some(temporal::now())))
    }

    /// Deletes a relation. Always returns `true`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    #[instrument(skip(self), fields(relation_id = %id))]
    pub fn delete_relation(&self, id: &RelationId) -> Result<bool> {
        let deleted = self.with_conn("delete_relation", |conn| {
            conn.execute("DELETE FROM Relates WHERE id = ?1", params![id.as_str()])
                .map_err(|e| Error::OperationFailed {
                    operation: "delete_relation".to_string(),
                    cause: e.to_string(),
                })
        })?;

        if deleted > 0 {
            metrics::counter!("graph_relations_deleted_total").increment(1);
        }
        self.emit(|meta| GraphEvent::RelationDeleted {
            meta,
            relation_id: id.clone(),
        });
        Ok(true)
    }

    /// Queries relations with a conjunctive filter, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    #[instrument(skip(self, filter))]
    pub fn query_relations(&self, filter: &RelationFilter) -> Result<Vec<Relation>> {
        let mut builder = WhereBuilder::new();
        if let Some(ref from_id) = filter.from_id {
            builder.push("fromId = {}", from_id.as_str().to_string());
        }
        if let Some(ref to_id) = filter.to_id {
            builder.push("toId = {}", to_id.as_str().to_string());
        }
        if let Some(ref entity_id) = filter.entity_id {
            builder.push("(fromId = {} OR toId = {})", entity_id.as_str().to_string());
        }
        builder.push_in("type", filter.types.iter().map(|t| t.as_str().to_string()));
        builder.push_in("source", filter.sources.iter().map(|s| s.as_str().to_string()));
        if let Some(ref session_id) = filter.session_id {
            builder.push("sessionId = {}", session_id.clone());
        }
        if let Some(min_weight) = filter.min_weight {
            builder.push("weight >= {}", f64::from(min_weight));
        }
        if let Some(min_confidence) = filter.min_confidence {
            builder.push("confidence >= {}", f64::from(min_confidence));
        }
        if filter.only_valid {
            builder.push_raw("validTo IS NULL");
        }

        let limit = filter.limit.map_or(-1, |l| l as i64);
        let sql = format!(
            "SELECT * FROM Relates {} ORDER BY createdAt DESC, id DESC LIMIT {limit}",
            builder.clause()
        );

        self.with_conn("query_relations", |conn| {
            let mut stmt = conn.prepare(&sql).map_err(|e| Error::OperationFailed {
                operation: "query_relations_prepare".to_string(),
                cause: e.to_string(),
            })?;
            let rows = stmt                .query_map(builder.params().as_slice(), parse_relation_row)
                .map_err(|e| Error::OperationFailed {
                    operation: "query_relations".to_string(),
                    cause: e.to_string(),
                })?;
            let relations = collect_rows(rows, "query_relations");
            Ok(relations)
        })
    }

    /// Returns relations whose both endpoints are in `ids`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn relations_among(&self, ids: &[EntityId], only_valid: bool) -> Result<Vec<Relation>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = WhereBuilder::new();
        let members = builder.bind_list(ids.iter().map(|id| id.as_str().to_string()));
        builder.push_raw(format!("fromId IN (SELECT value FROM json_each({members}))"));
        builder.push_raw(format!("toId IN (SELECT value FROM json_each({members}))"));
        if only_valid {
            builder.push_raw("validTo IS NULL");
        }
        let sql = format!("SELECT * FROM Relates {} ORDER BY id", builder.clause());

        self.with_conn("relations_among", |conn| {
            let mut stmt = conn.prepare(&sql).map_err(|e| Error::OperationFailed {
                operation: "relations_among_prepare".to_string(),
                cause: e.to_string(),
            })?;
            let rows = stmt                .query_map(builder.params().as_slice(), parse_relation_row)
                .map_err(|e| Error::OperationFailed {
                    operation: "relations_among".to_string(),
                    cause: e.to_string(),
                })?;
            let relations = collect_rows(rows, "relations_among");
            Ok(relations)
        })
    }
}
