//! `StorageAdapter`: the SQLite-backed implementation of
//! `watchstate_core::Storage`.

use rusqlite::{params, Connection, OptionalExtension, Row};
use watchstate_common::json::{from_canonical_json, to_canonical_json, validate_json_path_key};
use watchstate_common::{Error, Result};
use watchstate_core::{BatchWriter, ItemType, State, Storage};

use crate::get_conn;
use crate::pool::DbPool;
use crate::retry::{begin_retrying, execute_with_retry};

pub struct StorageAdapter {
    pool: DbPool,
}

impl StorageAdapter {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn item_type_from_str(s: &str) -> Result<ItemType> {
    match s {
        "movie" => Ok(ItemType::Movie),
        "episode" => Ok(ItemType::Episode),
        other => Err(Error::internal(format!("unknown state type in row: {other}"))),
    }
}

fn row_to_state(row: &Row<'_>) -> rusqlite::Result<State> {
    let kind_str: String = row.get("type")?;
    let guids_json: String = row.get("guids")?;
    let parent_json: String = row.get("parent")?;
    let metadata_json: String = row.get("metadata")?;
    let extra_json: String = row.get("extra")?;

    Ok(State {
        id: row.get("id")?,
        kind: item_type_from_str(&kind_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        watched: row.get::<_, i64>("watched")? != 0,
        updated: row.get("updated")?,
        via: row.get("via")?,
        title: row.get("title")?,
        year: row.get("year")?,
        season: row.get("season")?,
        episode: row.get("episode")?,
        guids: from_canonical_json(&guids_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        parent: from_canonical_json(&parent_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        metadata: from_canonical_json(&metadata_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        extra: from_canonical_json(&extra_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
    })
}

fn get_by_id(conn: &Connection, id: i64) -> Result<Option<State>> {
    conn.query_row("SELECT * FROM state WHERE id = ?1", params![id], row_to_state)
        .optional()
        .map_err(|e| Error::database(e.to_string()))
}

/// Resolve `probe`'s identity against the `state` table: direct id, then
/// each non-empty guid namespace, then (for episodes) each non-empty parent
/// namespace combined with season/episode. Namespace strings come from
/// backend-controlled data, so each is validated before being spliced into
/// a `JSON_EXTRACT` path.
fn resolve(conn: &Connection, probe: &State) -> Result<Option<State>> {
    if let Some(id) = probe.id {
        return get_by_id(conn, id);
    }

    for (ns, id) in &probe.guids {
        if id.is_empty() {
            continue;
        }
        validate_json_path_key(ns)?;
        let sql = format!(
            "SELECT * FROM state WHERE type = ?1 AND JSON_EXTRACT(guids, '$.{ns}') = ?2 LIMIT 1"
        );
        let found = conn
            .query_row(&sql, params![probe.kind.to_string(), id], row_to_state)
            .optional()
            .map_err(|e| Error::database(e.to_string()))?;
        if found.is_some() {
            return Ok(found);
        }
    }

    if probe.kind == ItemType::Episode {
        if let (Some(season), Some(episode)) = (probe.season, probe.episode) {
            for (ns, id) in &probe.parent {
                if id.is_empty() {
                    continue;
                }
                validate_json_path_key(ns)?;
                let sql = format!(
                    "SELECT * FROM state WHERE type = 'episode' AND season = ?1 AND episode = ?2 \
                     AND JSON_EXTRACT(parent, '$.{ns}') = ?3 LIMIT 1"
                );
                let found = conn
                    .query_row(&sql, params![season, episode, id], row_to_state)
                    .optional()
                    .map_err(|e| Error::database(e.to_string()))?;
                if found.is_some() {
                    return Ok(found);
                }
            }
        }
    }

    Ok(None)
}

const INSERT_SQL: &str = "INSERT INTO state (type, watched, updated, via, title, year, season, episode, guids, parent, metadata, extra)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

const UPDATE_SQL: &str = "UPDATE state SET type=?1, watched=?2, updated=?3, via=?4, title=?5, year=?6, season=?7, \
     episode=?8, guids=?9, parent=?10, metadata=?11, extra=?12 WHERE id=?13";

/// A record that is not watched must not carry a watched/played-at claim
/// for any backend: normalize every `metadata[*]` entry before it is
/// serialized, rather than trusting the caller to have already done so.
fn normalized_metadata_json(state: &State) -> Result<String> {
    if state.watched {
        return to_canonical_json(&state.metadata);
    }
    let mut metadata = state.metadata.clone();
    for meta in metadata.values_mut() {
        meta.watched = "0".to_string();
        meta.played_at = None;
    }
    to_canonical_json(&metadata)
}

fn insert_row(conn: &Connection, state: &mut State) -> Result<()> {
    if state.id.is_some() {
        return Err(Error::invalid_input("cannot insert a state that already has an id"));
    }

    let guids = to_canonical_json(&state.guids)?;
    let parent = to_canonical_json(&state.parent)?;
    let metadata = normalized_metadata_json(state)?;
    let extra = to_canonical_json(&state.extra)?;

    execute_with_retry(conn, |c| {
        let mut stmt = c.prepare_cached(INSERT_SQL)?;
        let result = stmt.execute(params![
            state.kind.to_string(),
            state.watched as i64,
            state.updated,
            state.via,
            state.title,
            state.year,
            state.season,
            state.episode,
            guids,
            parent,
            metadata,
            extra,
        ]);
        if result.is_err() {
            stmt.discard();
        }
        result
    })?;

    let conn_id = {
        let mut stmt = conn
            .prepare_cached("SELECT last_insert_rowid()")
            .map_err(|e| Error::database(e.to_string()))?;
        stmt.query_row([], |row| row.get::<_, i64>(0))
            .map_err(|e| Error::database(e.to_string()))?
    };
    state.id = Some(conn_id);
    Ok(())
}

fn update_row(conn: &Connection, state: &State) -> Result<()> {
    let id = state
        .id
        .ok_or_else(|| Error::invalid_input("cannot update a state with no id"))?;
    let guids = to_canonical_json(&state.guids)?;
    let parent = to_canonical_json(&state.parent)?;
    let metadata = normalized_metadata_json(state)?;
    let extra = to_canonical_json(&state.extra)?;

    let rows = execute_with_retry(conn, |c| {
        let mut stmt = c.prepare_cached(UPDATE_SQL)?;
        let result = stmt.execute(params![
            state.kind.to_string(),
            state.watched as i64,
            state.updated,
            state.via,
            state.title,
            state.year,
            state.season,
            state.episode,
            guids,
            parent,
            metadata,
            extra,
            id,
        ]);
        if result.is_err() {
            stmt.discard();
        }
        result
    })?;

    if rows == 0 {
        return Err(Error::not_found(format!("state row {id}")));
    }
    Ok(())
}

impl Storage for StorageAdapter {
    fn get(&self, probe: &State) -> Result<Option<State>> {
        let conn = get_conn(&self.pool)?;
        resolve(&conn, probe)
    }

    fn get_all(&self, since: Option<i64>) -> Result<Vec<State>> {
        let conn = get_conn(&self.pool)?;
        let mut stmt = match since {
            Some(_) => conn
                .prepare("SELECT * FROM state WHERE updated >= ?1 ORDER BY id")
                .map_err(|e| Error::database(e.to_string()))?,
            None => conn
                .prepare("SELECT * FROM state ORDER BY id")
                .map_err(|e| Error::database(e.to_string()))?,
        };

        let rows = match since {
            Some(ts) => stmt.query_map(params![ts], row_to_state),
            None => stmt.query_map([], row_to_state),
        }
        .map_err(|e| Error::database(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::database(e.to_string()))
    }

    fn remove(&self, probe: &State) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        let Some(found) = resolve(&conn, probe)? else {
            return Ok(false);
        };
        let id = found.id.expect("resolved row must carry an id");
        let rows = execute_with_retry(&conn, |c| c.execute("DELETE FROM state WHERE id = ?1", params![id]))?;
        Ok(rows > 0)
    }

    fn transactional<T>(&self, f: impl FnOnce(&dyn BatchWriter) -> Result<T>) -> Result<T> {
        let conn = get_conn(&self.pool)?;
        let tx = begin_retrying(&conn)?;
        let writer = SqliteBatchWriter { conn: &tx };

        match f(&writer) {
            Ok(value) => {
                tx.commit().map_err(|e| Error::database(e.to_string()))?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.rollback();
                Err(e)
            }
        }
    }
}

struct SqliteBatchWriter<'a> {
    conn: &'a rusqlite::Transaction<'a>,
}

impl BatchWriter for SqliteBatchWriter<'_> {
    fn insert(&self, state: &mut State) -> Result<()> {
        insert_row(self.conn, state)
    }

    fn update(&self, state: &State) -> Result<()> {
        update_row(self.conn, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;
    use std::collections::BTreeMap;

    fn movie(via: &str) -> State {
        let mut guids = BTreeMap::new();
        guids.insert("imdb".to_string(), "tt1".to_string());
        State {
            id: None,
            kind: ItemType::Movie,
            watched: false,
            updated: 100,
            via: via.to_string(),
            title: "Arrival".to_string(),
            year: Some(2016),
            season: None,
            episode: None,
            guids,
            parent: BTreeMap::new(),
            metadata: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_insert_then_get_by_guid() {
        let storage = StorageAdapter::new(init_memory_pool().unwrap());
        let mut state = movie("A");
        storage
            .transactional(|w| {
                w.insert(&mut state)?;
                Ok(())
            })
            .unwrap();
        assert!(state.id.is_some());

        let found = storage.get(&movie("anything")).unwrap().unwrap();
        assert_eq!(found.id, state.id);
        assert_eq!(found.title, "Arrival");
    }

    #[test]
    fn test_update_roundtrips_watched_flag() {
        let storage = StorageAdapter::new(init_memory_pool().unwrap());
        let mut state = movie("A");
        storage
            .transactional(|w| {
                w.insert(&mut state)?;
                Ok(())
            })
            .unwrap();

        state.watched = true;
        storage
            .transactional(|w| {
                w.update(&state)?;
                Ok(())
            })
            .unwrap();

        let found = storage.get(&state).unwrap().unwrap();
        assert!(found.watched);
    }

    #[test]
    fn test_remove_by_identity() {
        let storage = StorageAdapter::new(init_memory_pool().unwrap());
        let mut state = movie("A");
        storage
            .transactional(|w| {
                w.insert(&mut state)?;
                Ok(())
            })
            .unwrap();

        assert!(storage.remove(&movie("anything")).unwrap());
        assert!(storage.get(&movie("anything")).unwrap().is_none());
    }

    #[test]
    fn test_transactional_rolls_back_on_error() {
        let storage = StorageAdapter::new(init_memory_pool().unwrap());
        let mut state = movie("A");
        let result: Result<()> = storage.transactional(|w| {
            w.insert(&mut state)?;
            Err(Error::internal("simulated failure"))
        });
        assert!(result.is_err());
        assert!(storage.get(&movie("anything")).unwrap().is_none());
    }

    #[test]
    fn test_get_all_filters_by_since() {
        let storage = StorageAdapter::new(init_memory_pool().unwrap());
        let mut old = movie("A");
        old.updated = 10;
        let mut new = movie("A");
        new.guids.insert("imdb".to_string(), "tt2".to_string());
        new.updated = 200;

        storage
            .transactional(|w| {
                w.insert(&mut old)?;
                w.insert(&mut new)?;
                Ok(())
            })
            .unwrap();

        let recent = storage.get_all(Some(100)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].updated, 200);
    }

    #[test]
    fn test_insert_rejects_state_with_existing_id() {
        let storage = StorageAdapter::new(init_memory_pool().unwrap());
        let mut state = movie("A");
        state.id = Some(99);

        let result: Result<()> = storage.transactional(|w| w.insert(&mut state));
        assert!(result.is_err());
    }

    #[test]
    fn test_unwatched_insert_normalizes_backend_metadata() {
        use watchstate_core::BackendMeta;

        let storage = StorageAdapter::new(init_memory_pool().unwrap());
        let mut state = movie("A");
        state.watched = false;
        state.metadata.insert(
            "plex".to_string(),
            BackendMeta {
                id: Some("1".to_string()),
                watched: "1".to_string(),
                played_at: Some(500),
                guids: BTreeMap::new(),
                parent: BTreeMap::new(),
            },
        );

        storage
            .transactional(|w| {
                w.insert(&mut state)?;
                Ok(())
            })
            .unwrap();

        let found = storage.get(&state).unwrap().unwrap();
        let meta = &found.metadata["plex"];
        assert_eq!(meta.watched, "0");
        assert_eq!(meta.played_at, None);
    }

    #[test]
    fn test_unwatched_update_normalizes_backend_metadata() {
        use watchstate_core::BackendMeta;

        let storage = StorageAdapter::new(init_memory_pool().unwrap());
        let mut state = movie("A");
        storage
            .transactional(|w| {
                w.insert(&mut state)?;
                Ok(())
            })
            .unwrap();

        state.watched = false;
        state.metadata.insert(
            "plex".to_string(),
            BackendMeta {
                id: Some("1".to_string()),
                watched: "1".to_string(),
                played_at: Some(500),
                guids: BTreeMap::new(),
                parent: BTreeMap::new(),
            },
        );
        storage
            .transactional(|w| {
                w.update(&state)?;
                Ok(())
            })
            .unwrap();

        let found = storage.get(&state).unwrap().unwrap();
        let meta = &found.metadata["plex"];
        assert_eq!(meta.watched, "0");
        assert_eq!(meta.played_at, None);
    }
}
