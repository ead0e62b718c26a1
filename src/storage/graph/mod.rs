//! `SQLite` graph persistence engine.
//!
//! [`GraphStore`] owns the embedded database holding the `Entity` node table
//! and the `Relates` edge table. It provides CRUD, filtered queries, bounded
//! traversal via recursive CTEs, path search, statistics, a change feed, and
//! an optional LRU read cache.
//!
//! # Concurrency Model
//!
//! One connection per store, behind a `Mutex`. WAL mode and `busy_timeout`
//! handle contention with other processes. Events are published only after
//! the write commits and the connection lock is released, so listeners may
//! call back into the store.

mod cache;
mod entities;
mod relations;
mod rows;
mod stats;
mod traversal;

pub use cache::{CachedEntity, EntityCache};
pub use stats::GraphStats;

use crate::config::GraphConfig;
use crate::models::{Entity, EntityId, EventMeta, GraphEvent};
use crate::observability::EventBus;
use crate::storage::schema;
use crate::storage::sqlite::{
    acquire_lock, configure_connection, open_file, open_in_memory, record_operation_metrics,
};
use crate::{Error, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

/// Source label attached to events emitted by the store.
const EVENT_SOURCE: &str = "graph_store";

/// Embedded graph database handle.
///
/// Created by [`GraphStore::open`] and released by [`GraphStore::close`].
/// Every operation after `close` fails with [`Error::Closed`].
pub struct GraphStore {
    /// Connection, `None` once closed.
    conn: Mutex<Option<Connection>>,
    /// Database file (None for in-memory).
    db_path: Option<PathBuf>,
    /// Optional read cache.
    cache: Option<EntityCache>,
    /// Mutation event feed.
    events: EventBus,
}

impl GraphStore {
    /// Opens (or creates) the graph database and installs the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened, configured, or migrated.
    pub fn open(config: &GraphConfig) -> Result<Self> {
        let db_path = config.database_file();
        let mut conn = match &db_path {
            Some(path) => open_file(path)?,
            None => open_in_memory()?,
        };
        configure_connection(&conn, config.busy_timeout_ms)?;
        schema::migrate(&mut conn)?;

        let cache = if config.enable_cache {
            EntityCache::new(config.cache_size)
        } else {
            None
        };

        tracing::info!(
            path = %db_path.as_deref().map_or_else(|| ":memory:".into(), |p| p.display().to_string()),
            cache = cache.is_some(),
            "Opened graph store"
        );

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            db_path,
            cache,
            events: EventBus::default(),
        })
    }

    /// Opens an in-memory store with default settings (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        Self::open(&GraphConfig::in_memory())
    }

    /// Releases the connection and clears the cache.
    ///
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if `SQLite` fails to close the connection.
    pub fn close(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn).take();
        if let Some(cache) = &self.cache {
            cache.clear();
        }
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| Error::OperationFailed {
                operation: "close_graph_store".to_string(),
                cause: e.to_string(),
            })?;
            tracing::info!("Closed graph store");
        }
        Ok(())
    }

    /// Returns true once [`GraphStore::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        acquire_lock(&self.conn).is_none()
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Returns the mutation event bus.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Returns the read cache, if enabled.
    #[must_use]
    pub const fn cache(&self) -> Option<&EntityCache> {
        self.cache.as_ref()
    }

    /// Runs `f` with the connection locked and records operation metrics.
    fn with_conn<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let mut guard = acquire_lock(&self.conn);
        let Some(conn) = guard.as_mut() else {
            return Err(Error::Closed);
        };
        let result = f(conn);
        drop(guard);
        record_operation_metrics(operation, start, result.is_ok());
        result
    }

    fn cache_put(&self, entity: &Entity) {
        if let Some(cache) = &self.cache {
            cache.put(entity);
        }
    }

    fn cache_evict(&self, id: &EntityId) {
        if let Some(cache) = &self.cache {
            cache.evict(id);
        }
    }

    fn emit(&self, build: impl FnOnce(EventMeta) -> GraphEvent) {
        self.events.publish(build(EventMeta::new(EVENT_SOURCE)));
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("db_path", &self.db_path)
            .field("cache", &self.cache.as_ref().map(EntityCache::len))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, NewEntity};

    #[test]
    fn test_in_memory_store() {
        let store = GraphStore::in_memory().unwrap();
        assert!(store.db_path().is_none());
        assert!(store.cache().is_some());
        assert!(!store.is_closed());
    }

    #[test]
    fn test_cache_disabled() {
        let store = GraphStore::open(&GraphConfig::in_memory().without_cache()).unwrap();
        assert!(store.cache().is_none());
    }

    #[test]
    fn test_operations_after_close_fail() {
        let store = GraphStore::in_memory().unwrap();
        let entity = store
            .create_entity(NewEntity::new(EntityType::Concept, "c", "content"))
            .unwrap();
        store.close().unwrap();
        store.close().unwrap();

        assert!(store.is_closed());
        assert!(store.cache().unwrap().is_empty());
        assert!(matches!(store.get_entity(&entity.id), Err(Error::Closed)));
        assert!(matches!(
            store.create_entity(NewEntity::new(EntityType::Concept, "d", "content")),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = GraphStore::open(&GraphConfig::at(dir.path())).unwrap();
        assert_eq!(
            store.db_path(),
            Some(dir.path().join(crate::config::DB_FILE_NAME).as_path())
        );
    }
}
