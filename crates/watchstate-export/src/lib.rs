//! Watchstate-Export: the export planner that reconciles canonical play
//! state back out to media-server backends.

pub mod client;
pub mod planner;

pub use client::{Action, ActionQueue, BackendClient, BackendPlayState, FakeActionQueue, FakeBackendClient};
pub use planner::{ExportPlanner, PlanStats, PlannerOptions, DEFAULT_EXPORT_ALLOWED_TIME_DIFF};
