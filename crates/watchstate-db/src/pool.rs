//! Connection pool management.
//!
//! SQLite connections are pooled with r2d2. `busy_timeout` is pinned to 0 so
//! a "database is locked" error surfaces immediately as `SQLITE_BUSY`
//! instead of blocking inside the driver; retrying is handled explicitly by
//! [`crate::retry::execute_with_retry`] so the backoff schedule stays under
//! our control.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use watchstate_common::{Error, Result};

use crate::migrations;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

fn build_pool(manager: SqliteConnectionManager) -> Result<DbPool> {
    Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|e| Error::database(format!("failed to create connection pool: {e}")))
}

fn init_conn(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 0;")
}

/// Open (creating if absent) a file-backed pool at `db_path` and run
/// pending migrations.
pub fn init_pool(db_path: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path).with_init(init_conn);
    let pool = build_pool(manager)?;
    run_migrations_on(&pool)?;
    Ok(pool)
}

/// An in-memory pool for tests. Each connection in an r2d2 pool of
/// in-memory SQLite databases is a *distinct* database unless given a
/// shared-cache URI, so this pins `max_size` to 1.
pub fn init_memory_pool() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory().with_init(init_conn);
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| Error::database(format!("failed to create in-memory pool: {e}")))?;
    run_migrations_on(&pool)?;
    Ok(pool)
}

fn run_migrations_on(pool: &DbPool) -> Result<()> {
    let conn = pool
        .get()
        .map_err(|e| Error::database(format!("failed to get connection for migrations: {e}")))?;
    migrations::run_migrations(&conn)?;
    Ok(())
}

/// Get a connection from the pool.
pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get()
        .map_err(|e| Error::database(format!("failed to get connection from pool: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_memory_pool_runs_migrations() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='state'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_busy_timeout_is_zero() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let timeout: i64 = conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0)).unwrap();
        assert_eq!(timeout, 0);
    }
}
