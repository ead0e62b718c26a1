//! Shared `SQLite` infrastructure for the graph store.
//!
//! - [`connection`]: opening, pragmas, and poison-tolerant locking
//! - [`sql`]: LIKE escaping and dynamic WHERE building
//! - [`metrics`]: per-operation counters and latency histograms

mod connection;
mod metrics;
mod sql;

pub use connection::{acquire_lock, configure_connection, open_file, open_in_memory};
pub use metrics::record_operation_metrics;
pub use sql::{WhereBuilder, escape_like_wildcards, numbered_placeholders};
