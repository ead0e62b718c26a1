//! Graph statistics and maintenance.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

use super::GraphStore;
use super::rows::collect_rows;
use crate::models::{EntityType, GraphEvent, RelationType, Source};
use crate::{Error, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use tracing::instrument;

/// Aggregate counts and derived metrics for the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    /// All entity rows.
    pub total_entities: usize,
    /// Entities without `valid_to`.
    pub valid_entities: usize,
    /// Entities with `valid_to` set.
    pub expired_entities: usize,
    /// Entity count per type.
    pub entities_by_type: HashMap<EntityType, usize>,
    /// Entity count per source.
    pub entities_by_source: HashMap<Source, usize>,
    /// All relation rows.
    pub total_relations: usize,
    /// Relations without `valid_to`.
    pub valid_relations: usize,
    /// Relations with `valid_to` set.
    pub expired_relations: usize,
    /// Relation count per type.
    pub relations_by_type: HashMap<RelationType, usize>,
    /// Relation count per source.
    pub relations_by_source: HashMap<Source, usize>,
    /// Mean entity confidence.
    pub avg_entity_confidence: f64,
    /// Mean relation weight.
    pub avg_relation_weight: f64,
    /// Mean relation confidence.
    pub avg_relation_confidence: f64,
    /// `2E / (N(N-1))`, treating edges as undirected.
    pub density: f64,
    /// `2E / N`.
    pub avg_degree: f64,
    /// Half of `avg_degree`.
    pub avg_in_degree: f64,
    /// Half of `avg_degree`.
    pub avg_out_degree: f64,
}

impl GraphStats {
    /// Fills the derived metrics from the entity and relation totals.
    ///
    /// In and out degree are split evenly from the undirected average
    /// rather than counted per direction.
    fn derive(&mut self) {
        let nodes = self.total_entities as f64;
        let edges = self.total_relations as f64;
        self.density = if self.total_entities < 2 {
            0.0
        } else {
            2.0 * edges / (nodes * (nodes - 1.0))
        };
        self.avg_degree = if self.total_entities == 0 {
            0.0
        } else {
            2.0 * edges / nodes
        };
        self.avg_in_degree = self.avg_degree / 2.0;
        self.avg_out_degree = self.avg_degree / 2.0;
    }
}

/// Totals from one table: (count, valid, avg of up to two columns).
fn table_totals(conn: &Connection, sql: &str, operation: &str) -> Result<(usize, usize, f64, f64)> {
    conn.query_row(sql, [], |row| {
        Ok((
            row.get::<_, i64>(0)? as usize,
            row.get::<_, Option<i64>>(1)?.unwrap_or(0) as usize,
            row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
            row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
        ))
    })
    .map_err(|e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    })
}

/// Runs a `SELECT key, COUNT(*) ... GROUP BY key` and parses the keys.
/// Unrecognized keys are logged and left out of the breakdown.
fn grouped_counts<K: Eq + Hash>(
    conn: &Connection,
    sql: &str,
    operation: &'static str,
    parse: impl Fn(&str) -> Option<K>,
) -> Result<HashMap<K, usize>> {
    let mut stmt = conn.prepare(sql).map_err(|e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    })?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })
        .map_err(|e| Error::OperationFailed {
            operation: operation.to_string(),
            cause: e.to_string(),
        })?;

    let mut counts = HashMap::new();
    for (raw, count) in collect_rows(rows, operation) {
        match parse(&raw) {
            Some(key) => *counts.entry(key).or_insert(0) += count,
            None => {
                tracing::warn!(operation, key = %raw, count, "Unrecognized key in stats breakdown");
            },
        }
    }
    Ok(counts)
}

fn collect_stats(conn: &Connection) -> Result<GraphStats> {
    let (total_entities, valid_entities, avg_entity_confidence, _) = table_totals(
        conn,
        "SELECT COUNT(*), SUM(validTo IS NULL), AVG(confidence), NULL FROM Entity",
        "entity_stats",
    )?;
    let (total_relations, valid_relations, avg_relation_weight, avg_relation_confidence) =
        table_totals(
            conn,
            "SELECT COUNT(*), SUM(validTo IS NULL), AVG(weight), AVG(confidence) FROM Relates",
            "relation_stats",
        )?;

    let mut stats = GraphStats {
        total_entities,
        valid_entities,
        expired_entities: total_entities - valid_entities,
        entities_by_type: grouped_counts(
            conn,
            "SELECT type, COUNT(*) FROM Entity GROUP BY type",
            "entity_type_stats",
            EntityType::parse,
        )?,
        entities_by_source: grouped_counts(
            conn,
            "SELECT source, COUNT(*) FROM Entity GROUP BY source",
            "entity_source_stats",
            Source::parse,
        )?,
        total_relations,
        valid_relations,
        expired_relations: total_relations - valid_relations,
        relations_by_type: grouped_counts(
            conn,
            "SELECT type, COUNT(*) FROM Relates GROUP BY type",
            "relation_type_stats",
            RelationType::parse,
        )?,
        relations_by_source: grouped_counts(
            conn,
            "SELECT source, COUNT(*) FROM Relates GROUP BY source",
            "relation_source_stats",
            Source::parse,
        )?,
        avg_entity_confidence,
        avg_relation_weight,
        avg_relation_confidence,
        ..GraphStats::default()
    };
    stats.derive();
    Ok(stats)
}

impl GraphStore {
    /// Computes counts, averages, and derived graph metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if any aggregate query fails.
    #[instrument(skip(self))]
    pub fn get_stats(&self) -> Result<GraphStats> {
        self.with_conn("get_stats", |conn| collect_stats(conn))
    }

    /// Deletes every entity and relation.
    ///
    /// Publishes `graph:rebuilt` once the tables are empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    #[instrument(skip(self))]
    pub fn clear(&self) -> Result<()> {
        self.with_conn("clear", |conn| {
            let failed = |e: rusqlite::Error| Error::OperationFailed {
                operation: "clear_graph".to_string(),
                cause: e.to_string(),
            };
            let tx = conn.transaction().map_err(failed)?;
            tx.execute_batch("DELETE FROM Relates; DELETE FROM Entity;")
                .map_err(failed)?;
            tx.commit().map_err(failed)
        })?;
        if let Some(cache) = &self.cache {
            cache.clear();
        }
        tracing::info!("Cleared graph store");
        self.emit(|meta| GraphEvent::GraphRebuilt { meta });
        Ok(())
    }

    /// Reclaims free pages in the database file.
    ///
    /// Publishes `graph:compacted` when done.
    ///
    /// # Errors
    ///
    /// Returns an error if `VACUUM` fails.
    #[instrument(skip(self))]
    pub fn vacuum(&self) -> Result<()> {
        self.with_conn("vacuum", |conn| {
            conn.execute_batch("VACUUM;")
                .map_err(|e| Error::OperationFailed {
                    operation: "vacuum_graph".to_string(),
                    cause: e.to_string(),
                })
        })?;
        self.emit(|meta| GraphEvent::GraphCompacted { meta });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, NewEntity, NewRelation};

    fn node(store: &GraphStore, entity_type: EntityType, name: &str) -> Entity {
        store
            .create_entity(NewEntity::new(entity_type, name, name).with_confidence(0.5))
            .unwrap()
    }

    #[test]
    fn test_empty_stats() {
        let store = GraphStore::in_memory().unwrap();
        let stats = store.get_stats().unwrap();
        assert_eq!(stats, GraphStats::default());
    }

    #[test]
    fn test_stats_counts_and_derived_metrics() {
        let store = GraphStore::in_memory().unwrap();
        let a = node(&store, EntityType::Function, "a");
        let b = node(&store, EntityType::Function, "b");
        let c = node(&store, EntityType::Class, "c");
        let d = node(&store, EntityType::Decision, "d");
        store
            .create_relation(
                NewRelation::new(a.id.clone(), b.id.clone(), RelationType::Calls).with_weight(0.5),
            )
            .unwrap();
        let bc = store
            .create_relation(NewRelation::new(b.id, c.id, RelationType::Uses).with_weight(1.0))
            .unwrap()
            .unwrap();
        store.invalidate_entity(&d.id).unwrap();
        store.invalidate_relation(&bc.id).unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.total_entities, 4);
        assert_eq!(stats.valid_entities, 3);
        assert_eq!(stats.expired_entities, 1);
        assert_eq!(stats.entities_by_type.get(&EntityType::Function), Some(&2));
        assert_eq!(stats.entities_by_source.get(&Source::Inferred), Some(&4));
        assert_eq!(stats.total_relations, 2);
        assert_eq!(stats.valid_relations, 1);
        assert_eq!(stats.expired_relations, 1);
        assert_eq!(stats.relations_by_type.get(&RelationType::Calls), Some(&1));
        assert!((stats.avg_entity_confidence - 0.5).abs() < 1e-9);
        assert!((stats.avg_relation_weight - 0.75).abs() < 1e-9);

        // N = 4, E = 2
        assert!((stats.density - 4.0 / 12.0).abs() < 1e-9);
        assert!((stats.avg_degree - 1.0).abs() < 1e-9);
        assert!((stats.avg_in_degree - 0.5).abs() < 1e-9);
        assert!((stats.avg_out_degree - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_density_single_node_is_zero() {
        let store = GraphStore::in_memory().unwrap();
        node(&store, EntityType::Concept, "solo");
        let stats = store.get_stats().unwrap();
        assert!(stats.density.abs() < f64::EPSILON);
        assert!(stats.avg_degree.abs() < f64::EPSILON);
    }

    #[test]
    fn test_clear_and_vacuum_emit_events() {
        let store = GraphStore::in_memory().unwrap();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&seen);
        let a = node(&store, EntityType::Concept, "a");
        store
            .events()
            .on(move |event| sink.lock().unwrap().push(event.event_type()));

        store.clear().unwrap();
        store.vacuum().unwrap();

        assert_eq!(store.get_stats().unwrap().total_entities, 0);
        assert!(store.get_entity(&a.id).unwrap().is_none());
        assert_eq!(*seen.lock().unwrap(), vec!["graph:rebuilt", "graph:compacted"]);
    }
}
