//! Graph store integration tests.
//!
//! Exercises the persistence engine against an on-disk database: reopening,
//! traversal over a persisted graph, and behavior after close.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use mnemos::models::{EntitySort, Page};
use mnemos::{
    Direction, EntityFilter, EntityType, EntityUpdate, Error, GraphConfig, GraphStore, Location,
    NeighborhoodQuery, NewEntity, NewRelation, PathQuery, RelationType,
};
use tempfile::TempDir;
use test_case::test_case;

fn open_store(dir: &TempDir) -> GraphStore {
    GraphStore::open(&GraphConfig::at(dir.path())).expect("Failed to open graph store")
}

fn function(name: &str, file: &str) -> NewEntity {
    NewEntity::new(EntityType::Function, name, format!("fn {name}() {{}}"))
        .with_location(Location::new(file, 1, 3))
        .with_project("/repo")
}

#[test]
fn test_entities_and_relations_survive_reopen() -> anyhow::Result<()> {
    let dir = TempDir::new()?;

    let (a, b, edge) = {
        let store = open_store(&dir);
        let a = store.create_entity(function("parse", "src/parser.rs"))?;
        let b = store.create_entity(function("lex", "src/lexer.rs"))?;
        let edge = store
            .create_relation(
                NewRelation::new(a.id.clone(), b.id.clone(), RelationType::Calls).with_weight(0.8),
            )?
            .expect("both endpoints exist");
        store.close()?;
        (a, b, edge)
    };

    let store = open_store(&dir);
    assert!(store.db_path().is_some_and(|p| p.exists()));

    let reloaded = store.get_entity(&a.id)?.expect("entity persisted");
    assert_eq!(reloaded, a);
    assert_eq!(store.get_entity(&b.id)?.expect("entity persisted").name, "lex");

    let relation = store.get_relation(&edge.id)?.expect("relation persisted");
    assert_eq!(relation, edge);

    let stats = store.get_stats()?;
    assert_eq!(stats.total_entities, 2);
    assert_eq!(stats.total_relations, 1);
    Ok(())
}

#[test]
fn test_traversal_over_persisted_graph() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir);

    let names = ["main", "run", "parse", "lex"];
    let nodes: Vec<_> = names
        .iter()
        .map(|name| store.create_entity(function(name, "src/main.rs")))
        .collect::<mnemos::Result<_>>()?;
    for pair in nodes.windows(2) {
        store.create_relation(NewRelation::new(
            pair[0].id.clone(),
            pair[1].id.clone(),
            RelationType::Calls,
        ))?;
    }

    let neighborhood = store.get_neighborhood(
        &NeighborhoodQuery::new([nodes[0].id.clone()])
            .with_depth(2)
            .with_direction(Direction::Outgoing),
    )?;
    assert_eq!(neighborhood.entities.len(), 2);
    assert_eq!(neighborhood.depth_of(&nodes[1].id), Some(1));
    assert_eq!(neighborhood.depth_of(&nodes[2].id), Some(2));
    assert!(!neighborhood.contains(&nodes[3].id));

    let paths = store.find_paths(&PathQuery::new(nodes[0].id.clone(), nodes[3].id.clone(), 3))?;
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].length, 3);
    assert_eq!(
        paths[0].nodes,
        nodes.iter().map(|n| n.id.clone()).collect::<Vec<_>>()
    );

    let too_short =
        store.find_paths(&PathQuery::new(nodes[0].id.clone(), nodes[3].id.clone(), 2))?;
    assert!(too_short.is_empty());
    Ok(())
}

#[test_case(Direction::Outgoing, 1; "outgoing reaches callee")]
#[test_case(Direction::Incoming, 1; "incoming reaches caller")]
#[test_case(Direction::Both, 2; "both reaches caller and callee")]
fn test_neighborhood_direction(direction: Direction, expected: usize) {
    let store = GraphStore::in_memory().unwrap();
    let caller = store.create_entity(function("caller", "a.rs")).unwrap();
    let middle = store.create_entity(function("middle", "a.rs")).unwrap();
    let callee = store.create_entity(function("callee", "a.rs")).unwrap();
    store
        .create_relation(NewRelation::new(
            caller.id.clone(),
            middle.id.clone(),
            RelationType::Calls,
        ))
        .unwrap();
    store
        .create_relation(NewRelation::new(
            middle.id.clone(),
            callee.id.clone(),
            RelationType::Calls,
        ))
        .unwrap();

    let neighborhood = store
        .get_neighborhood(&NeighborhoodQuery::new([middle.id]).with_direction(direction))
        .unwrap();
    assert_eq!(neighborhood.entities.len(), expected);
}

#[test]
fn test_invalidation_is_persisted_and_filtered() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    {
        let store = open_store(&dir);
        store.create_entity(function("old", "src/stale.rs"))?;
        store.create_entity(function("older", "src/stale.rs"))?;
        store.create_entity(function("fresh", "src/live.rs"))?;
        assert_eq!(store.invalidate_entities_from_file("src/stale.rs")?, 2);
        store.close()?;
    }

    let store = open_store(&dir);
    let valid = store.query_entities(
        &EntityFilter::new().only_valid(),
        EntitySort::default(),
        Page::default(),
    )?;
    assert_eq!(valid.len(), 1);
    assert_eq!(valid[0].name, "fresh");
    assert_eq!(store.count_entities(&EntityFilter::new())?, 3);
    assert_eq!(store.get_stats()?.valid_entities, 1);
    Ok(())
}

#[test]
fn test_operations_after_close_fail() {
    let store = GraphStore::in_memory().unwrap();
    let entity = store.create_entity(function("f", "a.rs")).unwrap();
    store.close().unwrap();
    store.close().unwrap();

    assert!(store.is_closed());
    assert!(matches!(store.get_entity(&entity.id), Err(Error::Closed)));
    assert!(matches!(
        store.create_entity(function("g", "a.rs")),
        Err(Error::Closed)
    ));
    assert!(matches!(
        store.update_entity(&entity.id, EntityUpdate::new().name("h")),
        Err(Error::Closed)
    ));
    assert!(matches!(store.get_stats(), Err(Error::Closed)));
}

#[test]
fn test_uncached_store_reads_from_disk() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = GraphStore::open(&GraphConfig::at(dir.path()).without_cache())?;
    assert!(store.cache().is_none());

    let entity = store.create_entity(function("f", "a.rs"))?;
    let updated = store
        .update_entity(&entity.id, EntityUpdate::new().content("fn f() { 1 }"))?
        .expect("entity exists");
    assert_eq!(updated.content, "fn f() { 1 }");
    assert_eq!(store.get_entity(&entity.id)?, Some(updated));
    Ok(())
}
