//! The Export Planner: walks canonical `State` records and decides which
//! backends need a `MarkPlayed`/`MarkUnplayed` action to catch up.

use crate::client::{Action, ActionQueue, BackendClient};
use std::collections::HashMap;
use watchstate_core::State;

/// Drift tolerance (seconds) below which a backend's own play-date is
/// considered already in sync with the canonical `updated` timestamp, even
/// if the watched flags happen to differ transiently.
pub const DEFAULT_EXPORT_ALLOWED_TIME_DIFF: i64 = 10;

#[derive(Debug, Clone)]
pub struct PlannerOptions {
    /// Export every eligible record regardless of the `after` watermark.
    pub ignore_date: bool,
    /// Log what would be exported instead of enqueuing anything.
    pub dry_run: bool,
    pub export_allowed_time_diff: i64,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            ignore_date: false,
            dry_run: false,
            export_allowed_time_diff: DEFAULT_EXPORT_ALLOWED_TIME_DIFF,
        }
    }
}

/// Tally of what a planning pass did, for logging/metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub exported: u64,
    pub would_export: u64,
    pub skipped_stale: u64,
    pub skipped_no_metadata: u64,
    pub skipped_not_found: u64,
    pub skipped_in_sync: u64,
    pub skipped_error: u64,
    pub skipped_no_date: u64,
}

pub struct ExportPlanner<'a> {
    clients: HashMap<String, &'a (dyn BackendClient + 'a)>,
    queue: &'a dyn ActionQueue,
    options: PlannerOptions,
}

impl<'a> ExportPlanner<'a> {
    pub fn new(
        clients: Vec<&'a (dyn BackendClient + 'a)>,
        queue: &'a dyn ActionQueue,
        options: PlannerOptions,
    ) -> Self {
        let clients = clients.into_iter().map(|c| (c.name().to_string(), c)).collect();
        Self { clients, queue, options }
    }

    /// Plan exports for every record in `states`, against the watermark
    /// `after` (records older than it are skipped unless `ignore_date`).
    pub async fn plan(&self, states: &[State], after: Option<i64>) -> watchstate_common::Result<PlanStats> {
        let mut stats = PlanStats::default();

        for state in states {
            if !self.options.ignore_date {
                if let Some(after) = after {
                    if state.updated < after {
                        stats.skipped_stale += 1;
                        continue;
                    }
                }
            }

            for (backend, client) in &self.clients {
                self.plan_one(state, backend, *client, &mut stats).await?;
            }
        }

        Ok(stats)
    }

    async fn plan_one(
        &self,
        state: &State,
        backend: &str,
        client: &dyn BackendClient,
        stats: &mut PlanStats,
    ) -> watchstate_common::Result<()> {
        let Some(meta) = state.metadata.get(backend) else {
            stats.skipped_no_metadata += 1;
            return Ok(());
        };
        let Some(backend_id) = meta.id.as_ref().filter(|id| !id.is_empty()) else {
            stats.skipped_no_metadata += 1;
            return Ok(());
        };

        let current = match client.fetch_play_state(backend_id, state.kind).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                stats.skipped_not_found += 1;
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(backend, backend_id, error = %e, "failed to fetch backend play state");
                stats.skipped_error += 1;
                return Ok(());
            }
        };

        if current.watched == state.watched {
            stats.skipped_in_sync += 1;
            return Ok(());
        }

        let backend_date = if current.watched { current.last_played_date } else { current.date_created };
        let Some(backend_date) = backend_date else {
            stats.skipped_no_date += 1;
            return Ok(());
        };
        if backend_date >= state.updated + self.options.export_allowed_time_diff {
            stats.skipped_in_sync += 1;
            return Ok(());
        }

        let action = if state.watched {
            Action::MarkPlayed {
                backend: backend.to_string(),
                backend_id: backend_id.to_string(),
                kind: state.kind,
                date_played: state.updated,
            }
        } else {
            Action::MarkUnplayed {
                backend: backend.to_string(),
                backend_id: backend_id.to_string(),
                kind: state.kind,
            }
        };

        if self.options.dry_run {
            tracing::info!(backend, backend_id, action = ?action, "dry run: would export");
            stats.would_export += 1;
            return Ok(());
        }

        self.queue.enqueue(action)?;
        stats.exported += 1;
        Ok(())
    }
}
