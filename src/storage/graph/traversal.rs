//! Bounded graph traversal and path search.
//!
//! Both operations expand paths with a recursive CTE. Each row carries the
//! visited node list as a `,id,` delimited string so `instr` can reject
//! revisits, which keeps every path simple even on cyclic graphs.

#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use super::GraphStore;
use super::entities::fetch_entities;
use super::relations::fetch_relations;
use crate::models::{
    Direction, EntityId, GraphPath, MAX_PATHS, Neighborhood, NeighborhoodQuery, PathQuery,
    RelationType,
};
use crate::storage::sqlite::WhereBuilder;
use crate::{Error, Result};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use tracing::instrument;

/// One expansion step returned by the neighborhood walk.
struct Step {
    node: String,
    depth: u32,
    edge_id: String,
    src: String,
}

/// Adds the per-edge filters shared by both traversals.
fn push_edge_filters(
    builder: &mut WhereBuilder,
    relation_types: &[RelationType],
    min_weight: Option<f32>,
    only_valid: bool,
) {
    builder.push_in("type", relation_types.iter().map(|t| t.as_str().to_string()));
    if let Some(min_weight) = min_weight {
        builder.push("weight >= {}", f64::from(min_weight));
    }
    if only_valid {
        builder.push_raw("validTo IS NULL");
    }
}

/// Builds the `steps(src, dst, edge_id, weight)` CTE body for a direction.
fn steps_sql(direction: Direction, edge_clause: &str) -> String {
    let outgoing = format!("SELECT fromId AS src, toId AS dst, id AS edge_id, weight FROM Relates {edge_clause}");
    let incoming = format!("SELECT toId AS src, fromId AS dst, id AS edge_id, weight FROM Relates {edge_clause}");
    match direction {
        Direction::Outgoing => outgoing,
        Direction::Incoming => incoming,
        Direction::Both => format!("{outgoing} UNION ALL {incoming}"),
    }
}

fn walk_neighborhood(conn: &Connection, query: &NeighborhoodQuery) -> Result<Vec<Step>> {
    let mut builder = WhereBuilder::new();
    let seeds = builder.bind_list(query.entity_ids.iter().map(|id| id.as_str().to_string()));
    push_edge_filters(
        &mut builder,
        &query.relation_types,
        query.min_weight,
        query.only_valid,
    );
    let steps = steps_sql(query.direction, &builder.clause());
    let depth = builder.bind(i64::from(query.depth));
    let node_filter = if query.only_valid {
        "AND n.validTo IS NULL"
    } else {
        ""
    };

    let sql = format!(
        "WITH RECURSIVE
            seeds(id) AS (SELECT DISTINCT value FROM json_each({seeds})),
            steps AS ({steps}),
            walk(node, depth, path, edge_id, src) AS (
                SELECT id, 0, ',' || id || ',', NULL, NULL FROM seeds
                UNION ALL
                SELECT s.dst, w.depth + 1, w.path || s.dst || ',', s.edge_id, s.src
                FROM walk w
                JOIN steps s ON s.src = w.node
                JOIN Entity n ON n.id = s.dst {node_filter}
                WHERE w.depth < {depth}
                  AND instr(w.path, ',' || s.dst || ',') = 0
            )
        SELECT node, depth, edge_id, src FROM walk WHERE depth > 0"
    );

    let mut stmt = conn.prepare(&sql).map_err(|e| Error::OperationFailed {
        operation: "get_neighborhood_prepare".to_string(),
        cause: e.to_string(),
    })?;
    let steps = stmt
        .query_map(builder.params().as_slice(), |row| {
            Ok(Step {
                node: row.get(0)?,
                depth: row.get::<_, i64>(1)? as u32,
                edge_id: row.get(2)?,
                src: row.get(3)?,
            })
        })
        .map_err(|e| Error::OperationFailed {
            operation: "get_neighborhood".to_string(),
            cause: e.to_string(),
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::OperationFailed {
            operation: "get_neighborhood_row".to_string(),
            cause: e.to_string(),
        })?;
    Ok(steps)
}

fn assemble_neighborhood(
    conn: &Connection,
    query: &NeighborhoodQuery,
    steps: &[Step],
) -> Result<Neighborhood> {
    let seeds: HashSet<&str> = query.entity_ids.iter().map(EntityId::as_str).collect();

    let mut min_depth: HashMap<&str, u32> = HashMap::new();
    for step in steps.iter().filter(|s| !seeds.contains(s.node.as_str())) {
        min_depth
            .entry(step.node.as_str())
            .and_modify(|d| *d = (*d).min(step.depth))
            .or_insert(step.depth);
    }

    let mut ranked: Vec<(&str, u32)> = min_depth.into_iter().collect();
    ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    if ranked.len() > query.max_nodes {
        tracing::debug!(
            reached = ranked.len(),
            max_nodes = query.max_nodes,
            "Neighborhood truncated"
        );
        ranked.truncate(query.max_nodes);
    }

    let kept: HashSet<&str> = ranked.iter().map(|(id, _)| *id).collect();
    let ids: Vec<&str> = ranked.iter().map(|(id, _)| *id).collect();
    let mut by_id: HashMap<String, _> = fetch_entities(conn, &ids)?
        .into_iter()
        .map(|e| (e.id.as_str().to_string(), e))
        .collect();
    let entities = ids.iter().filter_map(|id| by_id.remove(*id)).collect();

    let in_scope = |id: &str| kept.contains(id) || seeds.contains(id);
    let mut edge_ids: Vec<&str> = steps
        .iter()
        .filter(|s| in_scope(&s.src) && in_scope(&s.node))
        .map(|s| s.edge_id.as_str())
        .collect();
    edge_ids.sort_unstable();
    edge_ids.dedup();
    let relations = fetch_relations(conn, &edge_ids)?;

    let depths = ranked
        .into_iter()
        .map(|(id, depth)| (EntityId::new(id), depth))
        .collect();

    Ok(Neighborhood {
        entities,
        relations,
        depths,
    })
}

/// A raw path row: visited node ids and traversed edge ids.
struct RawPath {
    nodes: Vec<String>,
    edges: Vec<String>,
}

fn split_ids(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn walk_paths(conn: &Connection, query: &PathQuery) -> Result<Vec<RawPath>> {
    let mut builder = WhereBuilder::new();
    let from = builder.bind(query.from.as_str().to_string());
    let to = builder.bind(query.to.as_str().to_string());
    push_edge_filters(&mut builder, &query.relation_types, None, query.only_valid);
    let steps = steps_sql(Direction::Outgoing, &builder.clause());
    let max_length = builder.bind(i64::from(query.max_length));
    let node_filter = if query.only_valid {
        "AND validTo IS NULL"
    } else {
        ""
    };
    let step_filter = if query.only_valid {
        "AND n.validTo IS NULL"
    } else {
        ""
    };

    let sql = format!(
        "WITH RECURSIVE
            steps AS ({steps}),
            walk(node, depth, path, edges, weight) AS (
                SELECT id, 0, ',' || id || ',', ',', 1.0 FROM Entity WHERE id = {from} {node_filter}
                UNION ALL
                SELECT s.dst, w.depth + 1, w.path || s.dst || ',', w.edges || s.edge_id || ',',
                       w.weight * s.weight
                FROM walk w
                JOIN steps s ON s.src = w.node
                JOIN Entity n ON n.id = s.dst {step_filter}
                WHERE w.depth < {max_length}
                  AND w.node <> {to}
                  AND instr(w.path, ',' || s.dst || ',') = 0
            )
        SELECT path, edges FROM walk
        WHERE node = {to} AND depth > 0
        ORDER BY depth, weight DESC, path
        LIMIT {MAX_PATHS}"
    );

    let mut stmt = conn.prepare(&sql).map_err(|e| Error::OperationFailed {
        operation: "find_paths_prepare".to_string(),
        cause: e.to_string(),
    })?;
    let paths = stmt
        .query_map(builder.params().as_slice(), |row| {
            let path: String = row.get(0)?;
            let edges: String = row.get(1)?;
            Ok(RawPath {
                nodes: split_ids(&path),
                edges: split_ids(&edges),
            })
        })
        .map_err(|e| Error::OperationFailed {
            operation: "find_paths".to_string(),
            cause: e.to_string(),
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::OperationFailed {
            operation: "find_paths_row".to_string(),
            cause: e.to_string(),
        })?;
    Ok(paths)
}

fn assemble_paths(conn: &Connection, raw: Vec<RawPath>) -> Result<Vec<GraphPath>> {
    let mut edge_ids: Vec<&str> = raw
        .iter()
        .flat_map(|p| p.edges.iter().map(String::as_str))
        .collect();
    edge_ids.sort_unstable();
    edge_ids.dedup();
    let relations: HashMap<String, _> = fetch_relations(conn, &edge_ids)?
        .into_iter()
        .map(|r| (r.id.as_str().to_string(), r))
        .collect();

    let paths = raw
        .into_iter()
        .filter_map(|path| {
            let edges = path
                .edges
                .iter()
                .map(|id| relations.get(id).cloned())
                .collect::<Option<Vec<_>>>()?;
            let nodes = path.nodes.into_iter().map(EntityId::new).collect();
            Some(GraphPath::from_relations(nodes, edges))
        })
        .collect();
    Ok(paths)
}

impl GraphStore {
    /// Expands up to `depth` hops from the seed entities.
    ///
    /// Seeds are excluded from the result. With `only_valid`, every edge on
    /// a path and every node it reaches must be valid for the path to count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a depth of zero, or an error if
    /// the query fails.
    #[instrument(skip(self, query), fields(seeds = query.entity_ids.len(), depth = query.depth))]
    pub fn get_neighborhood(&self, query: &NeighborhoodQuery) -> Result<Neighborhood> {
        if query.depth == 0 {
            return Err(Error::InvalidInput(
                "neighborhood depth must be at least 1".to_string(),
            ));
        }
        if query.entity_ids.is_empty() || query.max_nodes == 0 {
            return Ok(Neighborhood::default());
        }

        self.with_conn("get_neighborhood", |conn| {
            let steps = walk_neighborhood(conn, query)?;
            assemble_neighborhood(conn, query, &steps)
        })
    }

    /// Enumerates simple directed paths from `query.from` to `query.to`.
    ///
    /// Paths are ordered by hop count, then by descending weight (the
    /// product of edge weights). At most [`MAX_PATHS`] are returned, or one
    /// with `shortest_only`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a zero `max_length`, or an error
    /// if the query fails.
    #[instrument(skip(self, query), fields(from = %query.from, to = %query.to, max_length = query.max_length))]
    pub fn find_paths(&self, query: &PathQuery) -> Result<Vec<GraphPath>> {
        if query.max_length == 0 {
            return Err(Error::InvalidInput(
                "path max_length must be at least 1".to_string(),
            ));
        }
        if query.from == query.to {
            return Ok(Vec::new());
        }

        let mut paths = self.with_conn("find_paths", |conn| {
            let raw = walk_paths(conn, query)?;
            assemble_paths(conn, raw)
        })?;

        paths.sort_by(|a, b| {
            a.length
                .cmp(&b.length)
                .then_with(|| b.weight.total_cmp(&a.weight))
        });
        paths.truncate(if query.shortest_only { 1 } else { MAX_PATHS });
        Ok(paths)
    }
}
