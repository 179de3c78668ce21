//! Wires the storage adapter, mapper, and export planner together into the
//! two top-level operations the CLI exposes: import and export.

use crate::backend::{HttpBackendClient, LoggingActionQueue};
use crate::config::Config;
use anyhow::Result;
use watchstate_core::{AddOptions, CommitCounters, Mapper, MapperOptions, State, Storage};
use watchstate_db::{init_pool, StorageAdapter};
use watchstate_export::{ExportPlanner, PlanStats, PlannerOptions};

fn open_storage(config: &Config) -> Result<StorageAdapter> {
    let path = config.database.path.to_string_lossy();
    let pool = init_pool(&path)?;
    Ok(StorageAdapter::new(pool))
}

fn mapper_options(config: &Config) -> MapperOptions {
    MapperOptions {
        mapper_always_update_meta: config.mapper_always_update_meta,
        mapper_disable_autocommit: config.mapper_disable_autocommit,
        dry_run: config.dry_run,
    }
}

/// Fold `observations` into the canonical working set and commit. Invalid
/// observations (failing `State::validate`) are logged and skipped rather
/// than aborting the whole batch.
pub fn run_import(config: &Config, observations: Vec<State>, after: Option<i64>) -> Result<CommitCounters> {
    let storage = open_storage(config)?;
    let mut mapper = Mapper::new(storage, mapper_options(config));
    mapper.load_data(None)?;

    let opts = AddOptions {
        import_metadata_only: config.import_metadata_only,
        after: if config.ignore_date { None } else { after },
        diff_keys: None,
    };

    for observation in observations {
        if let Err(e) = observation.validate() {
            tracing::warn!(error = %e, "skipping invalid observation");
            continue;
        }
        match mapper.add(observation, &opts) {
            Ok(decision) => {
                if config.debug_trace {
                    tracing::debug!(?decision, "reconciled observation");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to reconcile observation"),
        }
    }

    Ok(mapper.close()?.unwrap_or_default())
}

/// Compare the canonical working set against every enabled backend and
/// dispatch (or, in `dry_run`, just log) the actions needed to catch them
/// up.
pub async fn run_export(config: &Config, after: Option<i64>) -> Result<PlanStats> {
    let storage = open_storage(config)?;
    let states = storage.get_all(if config.ignore_date { None } else { after })?;

    let clients: Vec<HttpBackendClient> = config
        .backends
        .iter()
        .filter(|b| b.enabled)
        .map(|b| HttpBackendClient::new(&b.name, &b.url, &b.api_key))
        .collect();
    let client_refs: Vec<&(dyn watchstate_export::BackendClient)> =
        clients.iter().map(|c| c as &dyn watchstate_export::BackendClient).collect();

    let queue = LoggingActionQueue;
    let options = PlannerOptions {
        ignore_date: config.ignore_date,
        dry_run: config.dry_run,
        export_allowed_time_diff: config.export_allowed_time_diff,
    };
    let planner = ExportPlanner::new(client_refs, &queue, options);
    let stats = planner.plan(&states, after).await?;
    Ok(stats)
}
