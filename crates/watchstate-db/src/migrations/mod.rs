//! Database schema migrations.
//!
//! Migrations are embedded in the binary and applied in order, tracked in
//! a `schema_migrations` table so repeated startups are no-ops.

use rusqlite::Connection;
use watchstate_common::{Error, Result};

struct Migration {
    version: usize,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial",
    sql: include_str!("001_initial.sql"),
}];

fn init_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;
    Ok(())
}

fn get_current_version(conn: &Connection) -> rusqlite::Result<usize> {
    match conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
        row.get::<_, Option<usize>>(0)
    })? {
        Some(version) => Ok(version),
        None => Ok(0),
    }
}

fn apply_migration(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    conn.execute_batch(migration.sql)?;
    conn.execute(
        "INSERT INTO schema_migrations (version, name) VALUES (?, ?)",
        rusqlite::params![migration.version, migration.name],
    )?;
    Ok(())
}

/// Apply all pending migrations, within one transaction per migration.
/// Returns the number of migrations applied.
pub fn run_migrations(conn: &Connection) -> Result<usize> {
    conn.execute("PRAGMA foreign_keys = ON", [])
        .map_err(|e| Error::database(format!("enabling foreign keys: {e}")))?;

    init_migrations_table(conn).map_err(|e| Error::database(format!("migrations table: {e}")))?;

    let current_version =
        get_current_version(conn).map_err(|e| Error::database(format!("schema version: {e}")))?;

    let pending: Vec<_> = MIGRATIONS.iter().filter(|m| m.version > current_version).collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let mut applied = 0;
    for migration in pending {
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(format!("begin migration {}: {e}", migration.version)))?;

        apply_migration(&tx, migration)
            .map_err(|e| Error::database(format!("migration {} failed: {e}", migration.version)))?;

        tx.commit()
            .map_err(|e| Error::database(format!("commit migration {}: {e}", migration.version)))?;

        applied += 1;
        tracing::info!(version = migration.version, name = migration.name, "applied migration");
    }

    Ok(applied)
}

/// Current applied schema version, without applying anything.
pub fn current_version(conn: &Connection) -> Result<usize> {
    init_migrations_table(conn).map_err(|e| Error::database(format!("migrations table: {e}")))?;
    get_current_version(conn).map_err(|e| Error::database(format!("schema version: {e}")))
}

/// Latest migration version known to the binary.
pub fn latest_version() -> usize {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}
