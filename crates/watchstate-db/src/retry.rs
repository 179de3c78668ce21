//! Lock-retry discipline for SQLite write contention.
//!
//! `busy_timeout` is pinned to 0 (see [`crate::pool`]), so any writer racing
//! another connection sees `SQLITE_BUSY`/`SQLITE_LOCKED` immediately rather
//! than blocking in the driver. This module retries such failures with a
//! fixed, non-multiplicative backoff: up to 4 retries, sleeping
//! `4 + rand(1..=3)` seconds between attempts.

use rand::Rng;
use rusqlite::Connection;
use std::time::Duration;
use watchstate_common::{Error, Result};

const MAX_RETRIES: u32 = 4;

fn is_locked(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked,
                ..
            },
            _
        )
    )
}

fn backoff_delay() -> Duration {
    let jitter = rand::thread_rng().gen_range(1..=3);
    Duration::from_secs(4 + jitter)
}

/// Run `op` against `conn`, retrying up to [`MAX_RETRIES`] times on a
/// locked/busy failure. Each retry first flushes the connection's prepared
/// statement cache: a cached statement can itself be holding a stale lock
/// reference across a contention window.
pub fn execute_with_retry<T>(
    conn: &Connection,
    mut op: impl FnMut(&Connection) -> rusqlite::Result<T>,
) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op(conn) {
            Ok(value) => return Ok(value),
            Err(e) if is_locked(&e) && attempt < MAX_RETRIES => {
                attempt += 1;
                tracing::warn!(attempt, error = %e, "database locked, retrying");
                conn.flush_prepared_statement_cache();
                std::thread::sleep(backoff_delay());
            }
            Err(e) if is_locked(&e) => {
                return Err(Error::transient(format!(
                    "database locked after {MAX_RETRIES} retries: {e}"
                )));
            }
            Err(e) => return Err(Error::database(e.to_string())),
        }
    }
}

/// Open a transaction, retrying the `BEGIN` itself on lock contention.
///
/// This can't reuse [`execute_with_retry`]: that helper is generic over a
/// `for<'r> FnMut(&'r Connection) -> Result<T>` closure, which requires `T`
/// to work for any borrowed lifetime `'r` — but a `Transaction<'c>` is tied
/// to one specific `'c`, so it can never satisfy a higher-ranked bound like
/// that. A plain retry loop sidesteps the issue entirely.
pub fn begin_retrying(conn: &Connection) -> Result<rusqlite::Transaction<'_>> {
    let mut attempt = 0;
    loop {
        match conn.unchecked_transaction() {
            Ok(tx) => return Ok(tx),
            Err(e) if is_locked(&e) && attempt < MAX_RETRIES => {
                attempt += 1;
                tracing::warn!(attempt, error = %e, "database locked opening transaction, retrying");
                conn.flush_prepared_statement_cache();
                std::thread::sleep(backoff_delay());
            }
            Err(e) if is_locked(&e) => {
                return Err(Error::transient(format!(
                    "database locked after {MAX_RETRIES} retries: {e}"
                )));
            }
            Err(e) => return Err(Error::database(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_succeeds_without_retry() {
        let conn = Connection::open_in_memory().unwrap();
        let result = execute_with_retry(&conn, |c| c.execute("SELECT 1", []));
        assert!(result.is_ok());
    }

    #[test]
    fn test_non_locked_error_is_not_retried() {
        let conn = Connection::open_in_memory().unwrap();
        let calls = Cell::new(0);
        let result: Result<()> = execute_with_retry(&conn, |c| {
            calls.set(calls.get() + 1);
            c.execute("SELECT * FROM nonexistent_table", [])?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
