//! Watchstate-DB: SQLite-backed canonical state storage.
//!
//! # Modules
//!
//! - `migrations` - embedded schema migrations
//! - `pool` - connection pool management
//! - `retry` - lock-retry discipline for write contention
//! - `storage` - the `watchstate_core::Storage` implementation

pub mod migrations;
pub mod pool;
pub mod retry;
pub mod storage;

pub use pool::{get_conn, init_memory_pool, init_pool, DbPool, PooledConnection};
pub use storage::StorageAdapter;

use watchstate_common::Result;

/// Apply pending migrations against an already-open connection. Exposed at
/// the crate root for callers (CLI `validate-config`/migration commands)
/// that need to run migrations without going through `pool::init_pool`.
pub fn run_migrations(conn: &rusqlite::Connection) -> Result<usize> {
    migrations::run_migrations(conn)
}
