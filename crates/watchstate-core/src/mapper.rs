//! The reconciliation engine: folds incoming `State` observations into an
//! in-memory working set against a `Storage` backend, deciding for each one
//! whether it is new, a genuine update, a metadata-only refresh, a
//! watched/unwatched conflict, or a no-op.

use crate::counters::{CommitCounters, Counters, Decision, Outcome};
use crate::index::{PointerIndex, WorkingKey};
use crate::model::{self, ItemType, State, ENTITY_KEYS};
use crate::storage::Storage;
use std::collections::{HashMap, HashSet};
use watchstate_common::Result;

/// Options governing a single `Mapper::add` call.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Only fold `incoming.metadata`/`extra` into the matched record; never
    /// create a new record for an unmatched one.
    pub import_metadata_only: bool,
    /// Reconciliation watermark: observations older than this are only
    /// considered for the mark-unplayed and (optionally) metadata-refresh
    /// paths, never a general merge.
    pub after: Option<i64>,
    /// Override the default [`ENTITY_KEYS`] diff set for the general merge
    /// step.
    pub diff_keys: Option<Vec<&'static str>>,
}

/// Mapper-wide behavior flags, set once for its lifetime.
#[derive(Debug, Clone, Default)]
pub struct MapperOptions {
    /// When an `after`-gated observation doesn't qualify for mark-unplayed,
    /// still refresh metadata instead of ignoring it outright.
    pub mapper_always_update_meta: bool,
    /// Skip the autocommit-on-close behavior; callers must call `commit()`
    /// explicitly.
    pub mapper_disable_autocommit: bool,
    /// Compute and report commit counters without writing to storage.
    pub dry_run: bool,
}

/// The reconciliation engine. Generic over the concrete `Storage`
/// implementation so the root crate can wire it directly to
/// `watchstate_db::StorageAdapter` without a vtable indirection.
pub struct Mapper<S: Storage> {
    storage: S,
    objects: HashMap<WorkingKey, State>,
    changed: HashSet<WorkingKey>,
    index: PointerIndex,
    /// Set once `load_data(None)` has run: an unmatched lookup is then
    /// known-absent rather than "not yet loaded", so the lazy-load fallback
    /// to storage is skipped.
    fully_loaded: bool,
    options: MapperOptions,
    counters: Counters,
    next_key: u64,
    closed: bool,
}

impl<S: Storage> Mapper<S> {
    pub fn new(storage: S, options: MapperOptions) -> Self {
        Self {
            storage,
            objects: HashMap::new(),
            changed: HashSet::new(),
            index: PointerIndex::new(),
            fully_loaded: false,
            options,
            counters: Counters::new(),
            next_key: 0,
            closed: true,
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Load the working set from storage. `since = None` performs a full
    /// load and marks the working set as authoritative for identity misses;
    /// `since = Some(ts)` loads an incremental window and leaves lazy-load
    /// fallback active.
    pub fn load_data(&mut self, since: Option<i64>) -> Result<()> {
        let mut seen_ids = HashSet::new();
        for state in self.storage.get_all(since)? {
            if let Some(id) = state.id {
                if !seen_ids.insert(id) {
                    continue;
                }
            }
            let key = self.alloc_key();
            self.index.add_pointers(&state, key);
            self.objects.insert(key, state);
        }
        if since.is_none() {
            self.fully_loaded = true;
        }
        Ok(())
    }

    fn alloc_key(&mut self) -> WorkingKey {
        let key = WorkingKey(self.next_key);
        self.next_key += 1;
        key
    }

    fn lookup_or_lazy_load(&mut self, entity: &State) -> Result<Option<WorkingKey>> {
        if let Some(key) = self.index.lookup(entity) {
            return Ok(Some(key));
        }
        if self.fully_loaded {
            return Ok(None);
        }
        match self.storage.get(entity)? {
            Some(found) => {
                let key = self.alloc_key();
                self.index.add_pointers(&found, key);
                self.objects.insert(key, found);
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }

    fn bump(&mut self, via: &str, kind: ItemType, outcome: Outcome) {
        tracing::debug!(counter = %format!("{via}.{kind}.{}", outcome.as_str()), "reconciliation decision");
        self.counters.bump(via, kind, outcome);
    }

    /// Fold one observation into the working set. See module docs for the
    /// outcome taxonomy.
    pub fn add(&mut self, entity: State, opts: &AddOptions) -> Result<Decision> {
        self.closed = false;
        self.add_inner(entity, opts, false)
    }

    fn add_inner(&mut self, entity: State, opts: &AddOptions, tainted: bool) -> Result<Decision> {
        if !(entity.has_guids() || entity.has_relative_guid()) {
            self.bump(&entity.via, entity.kind, Outcome::FailedNoGuid);
            return Ok(Decision::Ignored);
        }

        let metadata_only = opts.import_metadata_only;
        let found_key = self.lookup_or_lazy_load(&entity)?;

        let Some(key) = found_key else {
            if metadata_only {
                self.bump(&entity.via, entity.kind, Outcome::Failed);
                return Ok(Decision::Ignored);
            }
            let key = self.alloc_key();
            self.index.add_pointers(&entity, key);
            let via = entity.via.clone();
            let kind = entity.kind;
            self.objects.insert(key, entity);
            self.changed.insert(key);
            self.bump(&via, kind, Outcome::Added);
            return Ok(Decision::Added);
        };

        if metadata_only || tainted {
            let cur = self.objects.get_mut(&key).expect("indexed key must be present");
            if model::apply_metadata(cur, &entity) {
                self.changed.insert(key);
                self.bump(&entity.via, entity.kind, Outcome::Updated);
                return Ok(if tainted {
                    Decision::ConflictRetainted
                } else {
                    Decision::MetadataUpdated
                });
            }
            self.bump(&entity.via, entity.kind, Outcome::IgnoredNoChange);
            return Ok(Decision::Ignored);
        }

        if let Some(after) = opts.after {
            if after >= entity.updated {
                return self.handle_after_gated(key, entity, after);
            }
        }

        if self.is_watched_conflict(key, &entity) {
            let cur = self.objects.get_mut(&key).expect("indexed key must be present");
            let meta = cur.metadata.entry(entity.via.clone()).or_default();
            meta.played_at = Some(entity.updated);
            self.changed.insert(key);
            return self.add_inner(entity, opts, true);
        }

        self.general_merge(key, entity, opts)
    }

    fn is_watched_conflict(&self, key: WorkingKey, entity: &State) -> bool {
        let cur = &self.objects[&key];
        if !(cur.watched && !entity.watched) {
            return false;
        }
        let meta = cur.metadata.get(&entity.via);
        let has_meta = meta.is_some_and(|m| !m.is_empty());
        let has_same_play_date = meta.and_then(|m| m.played_at) == Some(entity.updated);
        !has_meta || has_same_play_date
    }

    fn handle_after_gated(&mut self, key: WorkingKey, entity: State, after: i64) -> Result<Decision> {
        let cur = &self.objects[&key];
        if !entity.watched && model::should_mark_unplayed(cur, &entity, after) {
            let via = entity.via.clone();
            let kind = entity.kind;
            let cur = self.objects.get_mut(&key).expect("indexed key must be present");
            model::apply_metadata(cur, &entity);
            cur.watched = false;
            cur.updated = entity.updated;
            cur.via = entity.via.clone();
            self.changed.insert(key);
            self.bump(&via, kind, Outcome::Updated);
            return Ok(Decision::MarkedUnplayed);
        }

        if self.options.mapper_always_update_meta {
            let cur = self.objects.get_mut(&key).expect("indexed key must be present");
            if model::apply_metadata(cur, &entity) {
                self.changed.insert(key);
                self.bump(&entity.via, entity.kind, Outcome::Updated);
                return Ok(Decision::MetadataUpdated);
            }
        }

        self.bump(&entity.via, entity.kind, Outcome::IgnoredNotPlayedSinceLastSync);
        Ok(Decision::Ignored)
    }

    fn general_merge(&mut self, key: WorkingKey, entity: State, opts: &AddOptions) -> Result<Decision> {
        let keys: &[&str] = opts.diff_keys.as_deref().unwrap_or(ENTITY_KEYS);
        let cur = self.objects[&key].clone();
        let (next, changed_fields) = model::merge_fields(&cur, &entity, keys);

        if changed_fields.is_empty() {
            self.bump(&entity.via, entity.kind, Outcome::IgnoredNoChange);
            return Ok(Decision::Ignored);
        }

        let identity_changed = changed_fields
            .iter()
            .any(|f| matches!(*f, "guids" | "parent" | "season" | "episode"));
        if identity_changed {
            self.index.remove_pointers(&cur);
        }
        let via = next.via.clone();
        let kind = next.kind;
        if identity_changed {
            self.index.add_pointers(&next, key);
        }
        self.objects.insert(key, next);
        self.changed.insert(key);
        self.bump(&via, kind, Outcome::Updated);
        Ok(Decision::Updated)
    }

    /// Remove a record matching `entity`'s identity, if one exists.
    pub fn remove(&mut self, entity: &State) -> Result<bool> {
        self.closed = false;
        let Some(key) = self.lookup_or_lazy_load(entity)? else {
            return Ok(false);
        };
        let state = self.objects.get(&key).expect("indexed key must be present").clone();
        self.index.remove_pointers(&state);
        self.storage.remove(&state)?;
        self.objects.remove(&key);
        self.changed.remove(&key);
        Ok(true)
    }

    /// Persist every changed record in a single transaction, returning
    /// per-type counters. Row-level failures (anything not
    /// `Error::is_batch_fatal`) are counted as failed and do not abort the
    /// rest of the batch; a batch-fatal error aborts and rolls back the
    /// whole transaction.
    pub fn commit(&mut self) -> Result<CommitCounters> {
        let dry_run = self.options.dry_run;
        let keys: Vec<WorkingKey> = self.changed.iter().copied().collect();
        let objects = &mut self.objects;

        let result = self.storage.transactional(|writer| {
            let mut counters = CommitCounters::default();
            for key in &keys {
                let state = objects.get_mut(key).expect("changed key must be present");
                let is_new = state.id.is_none();

                if dry_run {
                    if is_new {
                        counters.record_added(state.kind);
                    } else {
                        counters.record_updated(state.kind);
                    }
                    continue;
                }

                let outcome = if is_new {
                    writer.insert(state)
                } else {
                    writer.update(state)
                };

                match outcome {
                    Ok(()) => {
                        if is_new {
                            counters.record_added(state.kind);
                        } else {
                            counters.record_updated(state.kind);
                        }
                    }
                    Err(e) if !e.is_batch_fatal() => {
                        counters.record_failed(state.kind);
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(counters)
        });

        self.changed.clear();
        self.closed = true;
        result
    }

    /// Discard the working set without persisting anything.
    pub fn reset(&mut self) {
        self.objects.clear();
        self.changed.clear();
        self.index = PointerIndex::new();
        self.fully_loaded = false;
        self.next_key = 0;
        self.closed = true;
    }

    /// Explicit teardown: commits a pending change set unless autocommit is
    /// disabled, otherwise just marks the mapper closed. This is the
    /// teardown path callers should invoke instead of relying on `Drop`.
    pub fn close(&mut self) -> Result<Option<CommitCounters>> {
        if !self.changed.is_empty() && !self.options.mapper_disable_autocommit {
            return Ok(Some(self.commit()?));
        }
        self.closed = true;
        Ok(None)
    }
}

impl<S: Storage> Drop for Mapper<S> {
    fn drop(&mut self) {
        if !self.closed && !self.changed.is_empty() {
            tracing::warn!(
                pending = self.changed.len(),
                "mapper dropped with uncommitted changes; call close() or commit() explicitly"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BatchWriter;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use watchstate_common::Error;

    #[derive(Default)]
    struct FakeStorage {
        rows: RefCell<Vec<State>>,
        next_id: RefCell<i64>,
    }

    impl FakeStorage {
        fn seeded(rows: Vec<State>) -> Self {
            let next_id = rows.iter().filter_map(|s| s.id).max().unwrap_or(0) + 1;
            Self {
                rows: RefCell::new(rows),
                next_id: RefCell::new(next_id),
            }
        }
    }

    impl BatchWriter for &FakeStorage {
        fn insert(&self, state: &mut State) -> Result<()> {
            let mut id = self.next_id.borrow_mut();
            state.id = Some(*id);
            *id += 1;
            self.rows.borrow_mut().push(state.clone());
            Ok(())
        }

        fn update(&self, state: &State) -> Result<()> {
            let mut rows = self.rows.borrow_mut();
            if let Some(row) = rows.iter_mut().find(|r| r.id == state.id) {
                *row = state.clone();
                Ok(())
            } else {
                Err(Error::not_found("no such row"))
            }
        }
    }

    impl Storage for FakeStorage {
        fn get(&self, probe: &State) -> Result<Option<State>> {
            Ok(self
                .rows
                .borrow()
                .iter()
                .find(|r| r.guids == probe.guids && r.kind == probe.kind)
                .cloned())
        }

        fn get_all(&self, _since: Option<i64>) -> Result<Vec<State>> {
            Ok(self.rows.borrow().clone())
        }

        fn remove(&self, probe: &State) -> Result<bool> {
            let mut rows = self.rows.borrow_mut();
            let before = rows.len();
            rows.retain(|r| r.id != probe.id);
            Ok(rows.len() != before)
        }

        fn transactional<T>(&self, f: impl FnOnce(&dyn BatchWriter) -> Result<T>) -> Result<T> {
            f(&self)
        }
    }

    fn movie(via: &str, watched: bool, updated: i64) -> State {
        let mut guids = BTreeMap::new();
        guids.insert("imdb".to_string(), "tt1".to_string());
        State {
            id: None,
            kind: ItemType::Movie,
            watched,
            updated,
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
    fn test_add_new_record() {
        let mut mapper = Mapper::new(FakeStorage::default(), MapperOptions::default());
        let decision = mapper.add(movie("A", false, 1), &AddOptions::default()).unwrap();
        assert_eq!(decision, Decision::Added);
        assert_eq!(mapper.counters.get("A", ItemType::Movie, Outcome::Added), 1);
    }

    #[test]
    fn test_no_guid_is_rejected() {
        let mut mapper = Mapper::new(FakeStorage::default(), MapperOptions::default());
        let mut m = movie("A", false, 1);
        m.guids.clear();
        let decision = mapper.add(m, &AddOptions::default()).unwrap();
        assert_eq!(decision, Decision::Ignored);
        assert_eq!(mapper.counters.get("A", ItemType::Movie, Outcome::FailedNoGuid), 1);
    }

    #[test]
    fn test_second_observation_merges() {
        let mut mapper = Mapper::new(FakeStorage::default(), MapperOptions::default());
        mapper.add(movie("A", false, 1), &AddOptions::default()).unwrap();
        let decision = mapper.add(movie("B", true, 2), &AddOptions::default()).unwrap();
        assert_eq!(decision, Decision::Updated);
    }

    #[test]
    fn test_identical_observation_is_ignored() {
        let mut mapper = Mapper::new(FakeStorage::default(), MapperOptions::default());
        mapper.add(movie("A", false, 1), &AddOptions::default()).unwrap();
        let decision = mapper.add(movie("A", false, 1), &AddOptions::default()).unwrap();
        assert_eq!(decision, Decision::Ignored);
    }

    #[test]
    fn test_conflict_taints_and_reprocesses() {
        let mut mapper = Mapper::new(FakeStorage::default(), MapperOptions::default());
        mapper.add(movie("A", true, 1), &AddOptions::default()).unwrap();
        let decision = mapper.add(movie("B", false, 2), &AddOptions::default()).unwrap();
        assert_eq!(decision, Decision::ConflictRetainted);
    }

    #[test]
    fn test_commit_persists_and_resets_change_set() {
        let storage = FakeStorage::default();
        let mut mapper = Mapper::new(storage, MapperOptions::default());
        mapper.add(movie("A", false, 1), &AddOptions::default()).unwrap();
        let counters = mapper.commit().unwrap();
        assert_eq!(counters.movie.added, 1);
        assert!(mapper.changed.is_empty());
    }

    #[test]
    fn test_metadata_only_ignores_unmatched_once_fully_loaded() {
        let mut mapper = Mapper::new(FakeStorage::default(), MapperOptions::default());
        mapper.load_data(None).unwrap();
        let opts = AddOptions {
            import_metadata_only: true,
            ..Default::default()
        };
        let decision = mapper.add(movie("A", false, 1), &opts).unwrap();
        assert_eq!(decision, Decision::Ignored);
        assert_eq!(mapper.counters.get("A", ItemType::Movie, Outcome::Failed), 1);
    }
}
