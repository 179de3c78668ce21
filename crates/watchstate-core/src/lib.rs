//! Watchstate-Core: the `State` entity model, the in-memory pointer index,
//! and the mapper (reconciliation engine) that folds incoming observations
//! from any backend into the canonical working set.

pub mod counters;
pub mod index;
pub mod mapper;
pub mod model;
pub mod storage;

pub use counters::{CommitCounters, Counters, Decision, Outcome, TypeCounters};
pub use index::{PointerIndex, WorkingKey};
pub use mapper::{AddOptions, Mapper, MapperOptions};
pub use model::{BackendMeta, ItemType, State};
pub use storage::{BatchWriter, Storage};
