//! Bookkeeping types returned by the mapper: per-call decisions and the
//! aggregate per-type commit counters.

use crate::model::ItemType;
use std::collections::HashMap;
use std::fmt;

/// The outcome of a single `Mapper::add` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No record was found and none was created (metadata-only import of
    /// an unknown item), or a known record was reprocessed and found to
    /// already match incoming.
    Ignored,
    /// A brand-new record entered the working set.
    Added,
    /// An existing record's descriptive/identity fields were merged.
    Updated,
    /// Only an existing record's per-backend metadata changed.
    MetadataUpdated,
    /// A previously-watched record was flipped back to unplayed.
    MarkedUnplayed,
    /// A watched/unwatched conflict was detected, tainted with the
    /// incoming backend's play-date, and the observation was reprocessed.
    ConflictRetainted,
}

/// The low-level counter bucket name, following the `{via}.{type}.{outcome}`
/// naming convention described by the reconciliation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Added,
    Updated,
    Failed,
    FailedNoGuid,
    IgnoredNotPlayedSinceLastSync,
    IgnoredNoChange,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Updated => "updated",
            Self::Failed => "failed",
            Self::FailedNoGuid => "failed_no_guid",
            Self::IgnoredNotPlayedSinceLastSync => "ignored_not_played_since_last_sync",
            Self::IgnoredNoChange => "ignored_no_change",
        }
    }
}

/// Added/updated/failed tallies for one item type within a single commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeCounters {
    pub added: u64,
    pub updated: u64,
    pub failed: u64,
}

/// Per-type commit outcome, returned by `Mapper::commit`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitCounters {
    pub movie: TypeCounters,
    pub episode: TypeCounters,
}

impl CommitCounters {
    pub fn of(&self, kind: ItemType) -> &TypeCounters {
        match kind {
            ItemType::Movie => &self.movie,
            ItemType::Episode => &self.episode,
        }
    }

    pub fn record_added(&mut self, kind: ItemType) {
        self.of_mut(kind).added += 1;
    }

    pub fn record_updated(&mut self, kind: ItemType) {
        self.of_mut(kind).updated += 1;
    }

    pub fn record_failed(&mut self, kind: ItemType) {
        self.of_mut(kind).failed += 1;
    }

    fn of_mut(&mut self, kind: ItemType) -> &mut TypeCounters {
        match kind {
            ItemType::Movie => &mut self.movie,
            ItemType::Episode => &mut self.episode,
        }
    }
}

impl fmt::Display for CommitCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "movie(added={}, updated={}, failed={}) episode(added={}, updated={}, failed={})",
            self.movie.added,
            self.movie.updated,
            self.movie.failed,
            self.episode.added,
            self.episode.updated,
            self.episode.failed
        )
    }
}

/// Free-running `{via}.{type}.{outcome}` counters, retained for the life of
/// a `Mapper` instance and surfaced for diagnostics/metrics export.
#[derive(Debug, Clone, Default)]
pub struct Counters(HashMap<String, u64>);

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&mut self, via: &str, kind: ItemType, outcome: Outcome) {
        let key = format!("{via}.{kind}.{}", outcome.as_str());
        *self.0.entry(key).or_insert(0) += 1;
    }

    pub fn get(&self, via: &str, kind: ItemType, outcome: Outcome) -> u64 {
        let key = format!("{via}.{kind}.{}", outcome.as_str());
        self.0.get(&key).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.0.iter()
    }
}
