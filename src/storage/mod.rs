//! Storage layer.
//!
//! - **Graph**: [`GraphStore`], the embedded `SQLite` node/edge store
//! - **Schema**: versioned migrations for the `Entity` and `Relates` tables
//! - **`SQLite`**: connection setup, lock handling, and SQL helpers

// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]
// Allow match_same_arms for explicit enum handling.
#![allow(clippy::match_same_arms)]

mod graph;
pub mod schema;
pub mod sqlite;

pub use graph::{CachedEntity, EntityCache, GraphStats, GraphStore};
