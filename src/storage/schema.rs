//! Graph schema and migrations.
//!
//! The schema version is tracked in `PRAGMA user_version`. Migrations are
//! additive only: new tables, columns and indexes may be added, existing
//! columns never change type. Each migration runs in its own transaction
//! together with the version bump.

use crate::{Error, Result};
use rusqlite::Connection;

/// A single schema migration.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Migration version (sequential, starting at 1).
    pub version: i32,
    /// Human-readable description.
    pub description: &'static str,
    /// SQL to apply (may contain multiple statements).
    pub sql: &'static str,
}

/// All migrations, in order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Entity and Relates tables",
        sql: "CREATE TABLE IF NOT EXISTS Entity (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                name TEXT NOT NULL,
                content TEXT NOT NULL,
                contentPreview TEXT NOT NULL,
                filePath TEXT,
                startLine INTEGER,
                endLine INTEGER,
                signature TEXT,
                classInfo TEXT,
                source TEXT NOT NULL,
                sessionId TEXT,
                projectPath TEXT,
                fileHash TEXT,
                confidence REAL NOT NULL DEFAULT 1.0,
                accessCount INTEGER NOT NULL DEFAULT 0,
                lastAccessedAt INTEGER,
                createdAt INTEGER NOT NULL,
                updatedAt INTEGER NOT NULL,
                validFrom INTEGER NOT NULL,
                validTo INTEGER,
                vectorId TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );
            CREATE TABLE IF NOT EXISTS Relates (
                id TEXT PRIMARY KEY,
                fromId TEXT NOT NULL,
                toId TEXT NOT NULL,
                type TEXT NOT NULL,
                weight REAL NOT NULL DEFAULT 1.0,
                confidence REAL NOT NULL DEFAULT 1.0,
                createdAt INTEGER NOT NULL,
                validFrom INTEGER NOT NULL,
                validTo INTEGER,
                source TEXT NOT NULL,
                sessionId TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_entity_type ON Entity(type);
            CREATE INDEX IF NOT EXISTS idx_entity_name ON Entity(name);
            CREATE INDEX IF NOT EXISTS idx_entity_file ON Entity(filePath);
            CREATE INDEX IF NOT EXISTS idx_entity_session ON Entity(sessionId);
            CREATE INDEX IF NOT EXISTS idx_entity_project ON Entity(projectPath);
            CREATE INDEX IF NOT EXISTS idx_entity_created ON Entity(createdAt DESC);
            CREATE INDEX IF NOT EXISTS idx_relates_from ON Relates(fromId);
            CREATE INDEX IF NOT EXISTS idx_relates_to ON Relates(toId);
            CREATE INDEX IF NOT EXISTS idx_relates_type ON Relates(type);",
    },
    Migration {
        version: 2,
        description: "Entity version chain",
        sql: "ALTER TABLE Entity ADD COLUMN supersedesId TEXT;
            CREATE INDEX IF NOT EXISTS idx_entity_supersedes ON Entity(supersedesId);",
    },
    Migration {
        version: 3,
        description: "Validity-aware traversal indexes",
        sql: "CREATE INDEX IF NOT EXISTS idx_entity_valid ON Entity(validTo);
            CREATE INDEX IF NOT EXISTS idx_relates_from_valid ON Relates(fromId, validTo);
            CREATE INDEX IF NOT EXISTS idx_relates_to_valid ON Relates(toId, validTo);",
    },
];

/// Latest schema version.
#[must_use]
pub fn latest_version() -> i32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Returns the schema version recorded in the database.
///
/// # Errors
///
/// Returns an error if the pragma cannot be read.
pub fn current_version(conn: &Connection) -> Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| Error::OperationFailed {
            operation: "read_schema_version".to_string(),
            cause: e.to_string(),
        })
}

/// Applies every pending migration. Returns the number applied.
///
/// # Errors
///
/// Returns an error if a migration fails; that migration is rolled back.
pub fn migrate(conn: &mut Connection) -> Result<usize> {
    let current = current_version(conn)?;
    let latest = latest_version();
    if current >= latest {
        tracing::debug!(version = current, "Graph schema up to date");
        return Ok(0);
    }

    tracing::info!(from = current, to = latest, "Migrating graph schema");
    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        apply(conn, migration)?;
        applied += 1;
    }
    Ok(applied)
}

fn apply(conn: &mut Connection, migration: &Migration) -> Result<()> {
    let failed = |e: rusqlite::Error| Error::OperationFailed {
        operation: format!("migration_v{}", migration.version),
        cause: e.to_string(),
    };

    let tx = conn.transaction().map_err(failed)?;
    tx.execute_batch(migration.sql).map_err(failed)?;
    tx.pragma_update(None, "user_version", migration.version)
        .map_err(failed)?;
    tx.commit().map_err(failed)?;

    tracing::debug!(
        version = migration.version,
        description = migration.description,
        "Applied graph migration"
    );
    Ok(())
}
