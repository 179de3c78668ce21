//! Config file shape. Every field has a default so an empty (or absent)
//! config file is a valid, fully-functional configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// Only fold metadata/extra into matched records; never create a
    /// record for an unmatched import-only observation.
    #[serde(default)]
    pub import_metadata_only: bool,

    /// Export/import every eligible record regardless of the `after`
    /// watermark derived from the last successful run.
    #[serde(default)]
    pub ignore_date: bool,

    /// Compute what would change without writing anything.
    #[serde(default)]
    pub dry_run: bool,

    /// Emit per-decision tracing at debug level (reconciliation branch
    /// taken, counters bumped) beyond the mapper's normal logging.
    #[serde(default)]
    pub debug_trace: bool,

    #[serde(default)]
    pub mapper_always_update_meta: bool,

    #[serde(default)]
    pub mapper_disable_autocommit: bool,

    #[serde(default = "default_export_allowed_time_diff")]
    pub export_allowed_time_diff: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            backends: Vec::new(),
            import_metadata_only: false,
            ignore_date: false,
            dry_run: false,
            debug_trace: false,
            mapper_always_update_meta: false,
            mapper_disable_autocommit: false,
            export_allowed_time_diff: default_export_allowed_time_diff(),
        }
    }
}

fn default_export_allowed_time_diff() -> i64 {
    watchstate_export::DEFAULT_EXPORT_ALLOWED_TIME_DIFF
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("watchstate.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Plex,
    Jellyfin,
    Emby,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: BackendKind,

    pub url: String,

    pub api_key: String,

    #[serde(default)]
    pub enabled: bool,
}
