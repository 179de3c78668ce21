//! The pointer index: an in-memory inverted index from identity pointers to
//! working-set keys, giving O(1) cross-backend identity resolution without
//! a full scan of the loaded records.

use crate::model::State;
use std::collections::HashMap;

/// Opaque handle into the mapper's working set. Not meaningful outside the
/// process; unrelated to `State::id`, which only exists once a record has
/// been persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkingKey(pub(crate) u64);

#[derive(Debug, Default)]
pub struct PointerIndex {
    /// Absolute guid pointers (`{ns}://{id}/{type}`) and direct
    /// `local_db://{id}` pointers share this map; both are unambiguous
    /// single-string keys.
    ptr: HashMap<String, WorkingKey>,
    /// Relative pointers (`rel://{ns}:{parent_id}/{season}/{episode}`) for
    /// episodes identified only through their parent show.
    rptr: HashMap<String, WorkingKey>,
}

impl PointerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every pointer `state` currently occupies under `key`.
    pub fn add_pointers(&mut self, state: &State, key: WorkingKey) {
        for p in state.pointers() {
            self.ptr.insert(p, key);
        }
        for rp in state.relative_pointers() {
            self.rptr.insert(rp, key);
        }
        if let Some(lp) = state.local_pointer() {
            self.ptr.insert(lp, key);
        }
    }

    /// Remove every pointer `state` currently occupies. Must be called
    /// before a record's identity fields change and before it leaves the
    /// working set, so the index never points at a stale key.
    pub fn remove_pointers(&mut self, state: &State) {
        for p in state.pointers() {
            self.ptr.remove(&p);
        }
        for rp in state.relative_pointers() {
            self.rptr.remove(&rp);
        }
        if let Some(lp) = state.local_pointer() {
            self.ptr.remove(&lp);
        }
    }

    /// Resolve `entity`'s working-set key using only what's already in
    /// memory: direct `local_db://` pointer first, then relative pointers,
    /// then absolute guid pointers. Callers needing the lazy-load fallback
    /// to storage (step 4 of identity resolution) do so themselves, since
    /// that requires registering the loaded record back into both this
    /// index and the mapper's object table.
    pub fn lookup(&self, entity: &State) -> Option<WorkingKey> {
        if let Some(lp) = entity.local_pointer() {
            if let Some(&key) = self.ptr.get(&lp) {
                return Some(key);
            }
        }
        for rp in entity.relative_pointers() {
            if let Some(&key) = self.rptr.get(&rp) {
                return Some(key);
            }
        }
        for p in entity.pointers() {
            if let Some(&key) = self.ptr.get(&p) {
                return Some(key);
            }
        }
        None
    }
}
