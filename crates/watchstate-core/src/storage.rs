//! The storage seam between the mapper and whatever durable backend holds
//! canonical `State` rows (see `watchstate-db` for the SQLite implementation).

use crate::model::State;
use watchstate_common::Result;

/// Write access scoped to an open transaction. Obtained from
/// [`Storage::transactional`]; never constructed directly.
pub trait BatchWriter {
    /// Insert a new record, assigning it a row id (`state.id` is set on
    /// success).
    fn insert(&self, state: &mut State) -> Result<()>;

    /// Update an existing record in place, keyed by `state.id`.
    fn update(&self, state: &State) -> Result<()>;

    /// Run `f` against this same writer. Re-entrant: a commit already in
    /// progress does not open a nested transaction, it just reuses the one
    /// it already holds.
    fn transactional<T>(&self, f: impl FnOnce(&dyn BatchWriter) -> Result<T>) -> Result<T>
    where
        Self: Sized,
    {
        f(self)
    }
}

/// The durable store of canonical `State` records.
pub trait Storage {
    /// Look up the canonical record matching `probe`'s identity (absolute
    /// guids, relative parent+season+episode, or `probe.id` if set).
    fn get(&self, probe: &State) -> Result<Option<State>>;

    /// Load every record updated at or after `since` (or every record, if
    /// `since` is `None`).
    fn get_all(&self, since: Option<i64>) -> Result<Vec<State>>;

    /// Remove the record matching `probe`'s identity. Returns whether a row
    /// was actually removed.
    fn remove(&self, probe: &State) -> Result<bool>;

    /// Run `f` inside a single transaction, committing on `Ok` and rolling
    /// back on `Err`.
    fn transactional<T>(&self, f: impl FnOnce(&dyn BatchWriter) -> Result<T>) -> Result<T>;
}
