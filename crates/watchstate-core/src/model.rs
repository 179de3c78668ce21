//! The `State` entity: a single movie or episode's canonical play-state
//! record, plus the pure merge logic used by the mapper to fold an
//! incoming observation into the working set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The kind of media item a `State` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Movie,
    Episode,
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Movie => write!(f, "movie"),
            Self::Episode => write!(f, "episode"),
        }
    }
}

/// One backend's view of an item's play state, stored under
/// `State.metadata[backend_name]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// "0" or "1", matching the upstream backends' own string encoding.
    pub watched: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub played_at: Option<i64>,
    #[serde(default)]
    pub guids: BTreeMap<String, String>,
    #[serde(default)]
    pub parent: BTreeMap<String, String>,
}

impl BackendMeta {
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.played_at.is_none() && self.guids.is_empty() && self.parent.is_empty()
    }
}

/// A canonical play-state record for one movie or episode.
///
/// `guids`/`parent`/`metadata`/`extra` are kept in `BTreeMap`s rather than
/// `HashMap`s: besides the obvious deterministic-iteration benefit, this is
/// what makes `watchstate_common::json::to_canonical_json` produce
/// sorted-key output for free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// `None` until the record has been persisted and assigned a row id.
    pub id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: ItemType,
    pub watched: bool,
    /// Unix timestamp of the last state-affecting update.
    pub updated: i64,
    /// Name of the backend that produced the currently-applied fields.
    pub via: String,
    pub title: String,
    pub year: Option<i32>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    #[serde(default)]
    pub guids: BTreeMap<String, String>,
    /// For episodes: GUIDs identifying the parent show, keyed by namespace.
    #[serde(default)]
    pub parent: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, BackendMeta>,
    /// Opaque per-backend attributes. Never consulted for identity or merge
    /// decisions; carried across verbatim whenever the record is touched.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Fields eligible for the mapper's general field-by-field merge. `id`,
/// `metadata` and `extra` are deliberately excluded: `id` is storage-assigned,
/// `metadata` is merged through [`apply_metadata`], and `extra` is opaque.
pub const ENTITY_KEYS: &[&str] = &[
    "watched", "updated", "via", "title", "year", "season", "episode", "guids", "parent",
];

/// Field names that, by themselves, never constitute a meaningful change
/// when folded into the default [`ENTITY_KEYS`] diff set. Empty by default;
/// callers may still narrow the diffed key set via `AddOptions::diff_keys`.
pub const ENTITY_IGNORE_DIFF_CHANGES: &[&str] = &[];

impl State {
    /// Whether this record carries at least one non-empty external GUID.
    pub fn has_guids(&self) -> bool {
        self.guids.values().any(|v| !v.is_empty())
    }

    /// Whether this record can be identified relative to its parent show
    /// (episodes lacking their own GUIDs but carrying season/episode numbers
    /// plus a parent GUID).
    pub fn has_relative_guid(&self) -> bool {
        self.kind == ItemType::Episode
            && self.season.is_some()
            && self.episode.is_some()
            && self.parent.values().any(|v| !v.is_empty())
    }

    /// Validate the basic shape invariants every `State` must satisfy before
    /// entering the working set.
    pub fn validate(&self) -> watchstate_common::Result<()> {
        use watchstate_common::Error;

        if self.via.is_empty() {
            return Err(Error::invalid_input("state.via must not be empty"));
        }
        if self.title.is_empty() {
            return Err(Error::invalid_input("state.title must not be empty"));
        }
        if !self.has_guids() && !self.has_relative_guid() {
            return Err(Error::invalid_input(
                "state must carry at least one guid or a relative (parent+season+episode) identity",
            ));
        }
        if self.kind == ItemType::Episode && (self.season.is_none() || self.episode.is_none()) {
            return Err(Error::invalid_input(
                "episode state must carry season and episode numbers",
            ));
        }
        Ok(())
    }

    /// Absolute pointers this record occupies, of the form
    /// `{namespace}://{id}/{type}`.
    pub fn pointers(&self) -> Vec<String> {
        self.guids
            .iter()
            .filter(|(_, id)| !id.is_empty())
            .map(|(ns, id)| format!("{ns}://{id}/{}", self.kind))
            .collect()
    }

    /// Relative pointers for episodes identified only through their parent
    /// show, of the form `rel://{namespace}:{parent_id}/{season}/{episode}`.
    pub fn relative_pointers(&self) -> Vec<String> {
        if self.kind != ItemType::Episode {
            return Vec::new();
        }
        let (Some(season), Some(episode)) = (self.season, self.episode) else {
            return Vec::new();
        };
        self.parent
            .iter()
            .filter(|(_, id)| !id.is_empty())
            .map(|(ns, id)| format!("rel://{ns}:{id}/{season}/{episode}"))
            .collect()
    }

    /// The direct `local_db://{id}` pointer, once the record has a row id.
    pub fn local_pointer(&self) -> Option<String> {
        self.id.map(|id| format!("local_db://{id}"))
    }

    /// All pointers (absolute, relative, and direct) this record currently
    /// occupies in the pointer index.
    pub fn all_pointers(&self) -> Vec<String> {
        let mut out = self.pointers();
        out.extend(self.relative_pointers());
        out.extend(self.local_pointer());
        out
    }
}

/// Apply a field-by-field merge of `incoming` onto `cur` over the given
/// `keys`, returning the merged record and the list of fields that actually
/// changed. `extra` is always carried over from `incoming` regardless of
/// `keys`, matching its role as opaque, non-diffed data.
pub fn merge_fields(cur: &State, incoming: &State, keys: &[&str]) -> (State, Vec<&'static str>) {
    let mut next = cur.clone();
    let mut changed = Vec::new();

    for key in keys {
        match *key {
            "watched" if next.watched != incoming.watched => {
                next.watched = incoming.watched;
                changed.push("watched");
            }
            "updated" if next.updated != incoming.updated => {
                next.updated = incoming.updated;
                changed.push("updated");
            }
            "via" if next.via != incoming.via => {
                next.via = incoming.via.clone();
                changed.push("via");
            }
            "title" if next.title != incoming.title => {
                next.title = incoming.title.clone();
                changed.push("title");
            }
            "year" if next.year != incoming.year => {
                next.year = incoming.year;
                changed.push("year");
            }
            "season" if next.season != incoming.season => {
                next.season = incoming.season;
                changed.push("season");
            }
            "episode" if next.episode != incoming.episode => {
                next.episode = incoming.episode;
                changed.push("episode");
            }
            "guids" if next.guids != incoming.guids => {
                next.guids = incoming.guids.clone();
                changed.push("guids");
            }
            "parent" if next.parent != incoming.parent => {
                next.parent = incoming.parent.clone();
                changed.push("parent");
            }
            _ => {}
        }
    }

    next.extra = incoming.extra.clone();
    (next, changed)
}

/// Fold `incoming`'s per-backend metadata (and `extra`) into `cur`, without
/// touching any identity or descriptive field. Returns whether anything
/// actually changed.
pub fn apply_metadata(cur: &mut State, incoming: &State) -> bool {
    let mut changed = false;

    for (backend, meta) in &incoming.metadata {
        if cur.metadata.get(backend) != Some(meta) {
            cur.metadata.insert(backend.clone(), meta.clone());
            changed = true;
        }
    }

    if cur.extra != incoming.extra {
        cur.extra = incoming.extra.clone();
        changed = true;
    }

    changed
}

/// Whether an already-watched `cur` should be flipped back to unplayed in
/// response to `incoming` reporting unplayed, given the reconciliation
/// watermark `after`: true only if `incoming`'s own backend had previously
/// recorded a watched play-date strictly before `after`.
pub fn should_mark_unplayed(cur: &State, incoming: &State, after: i64) -> bool {
    if !cur.watched {
        return false;
    }
    match cur.metadata.get(&incoming.via) {
        Some(meta) => meta.watched == "1" && meta.played_at.is_some_and(|p| p < after),
        None => false,
    }
}
