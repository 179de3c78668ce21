//! The seam between the export planner and an actual backend HTTP client.
//!
//! Concrete backend clients (Plex/Jellyfin/Emby) and the outbound request
//! queue are out of scope here; this crate only defines the traits the
//! planner depends on, plus an in-memory test double pair for unit tests.

use async_trait::async_trait;
use watchstate_core::ItemType;

/// One backend's current view of a single item's play state, as returned
/// by a live lookup (not the canonical, persisted `metadata[backend]`
/// snapshot).
#[derive(Debug, Clone, PartialEq)]
pub struct BackendPlayState {
    pub watched: bool,
    /// The backend's own "last played" timestamp, when it tracks one.
    pub last_played_date: Option<i64>,
    /// Fallback timestamp (e.g. library-add date) used when the backend
    /// has no play-date of its own to compare drift against.
    pub date_created: Option<i64>,
}

/// A read/write handle to one backend's play-state API.
#[async_trait]
pub trait BackendClient: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the backend's current play state for `backend_id`. `Ok(None)`
    /// means the backend doesn't know about this item (e.g. a 404) and the
    /// planner should simply skip it, not treat it as an error.
    async fn fetch_play_state(
        &self,
        backend_id: &str,
        kind: ItemType,
    ) -> watchstate_common::Result<Option<BackendPlayState>>;
}

/// An action the planner wants applied to a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    MarkPlayed {
        backend: String,
        backend_id: String,
        kind: ItemType,
        date_played: i64,
    },
    MarkUnplayed {
        backend: String,
        backend_id: String,
        kind: ItemType,
    },
}

impl Action {
    pub fn backend(&self) -> &str {
        match self {
            Self::MarkPlayed { backend, .. } | Self::MarkUnplayed { backend, .. } => backend,
        }
    }
}

/// The outbound dispatch queue actions are handed to. Kept separate from
/// `BackendClient` so the planner can be tested (and operated, in
/// `dry_run`) without ever touching a real transport.
pub trait ActionQueue: Send + Sync {
    fn enqueue(&self, action: Action) -> watchstate_common::Result<()>;
}

/// An in-memory `BackendClient` fixture for planner tests: returns
/// whatever play state was registered for a given `(backend_id, kind)`.
#[derive(Default)]
pub struct FakeBackendClient {
    name: String,
    states: std::sync::Mutex<std::collections::HashMap<(String, ItemType), BackendPlayState>>,
}

impl FakeBackendClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn set(&self, backend_id: &str, kind: ItemType, state: BackendPlayState) {
        self.states
            .lock()
            .unwrap()
            .insert((backend_id.to_string(), kind), state);
    }
}

#[async_trait]
impl BackendClient for FakeBackendClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_play_state(
        &self,
        backend_id: &str,
        kind: ItemType,
    ) -> watchstate_common::Result<Option<BackendPlayState>> {
        Ok(self
            .states
            .lock()
            .unwrap()
            .get(&(backend_id.to_string(), kind))
            .cloned())
    }
}

/// An in-memory `ActionQueue` fixture that just records enqueued actions.
#[derive(Default)]
pub struct FakeActionQueue {
    pub actions: std::sync::Mutex<Vec<Action>>,
}

impl ActionQueue for FakeActionQueue {
    fn enqueue(&self, action: Action) -> watchstate_common::Result<()> {
        self.actions.lock().unwrap().push(action);
        Ok(())
    }
}
