//! Mesh State - per-peer liveness and gossiped counters
//!
//! `WorkerRegistry` tracks every peer this node has heard of, whether it is
//! alive, and how large a slice of work it can chew through per task.
//! `StatsReconciler` runs the flooding protocol that aggregates cluster-wide
//! counters without double-counting a contribution across rounds.

pub mod reconciler;
pub mod registry;
pub mod snapshot;
pub mod stats;
pub mod worker;

pub use reconciler::{Finalize, StatsReconciler};
pub use registry::WorkerRegistry;
pub use snapshot::{NetworkSnapshot, NodeValidations, StatsSnapshot};
pub use stats::{Absorbed, StatsRound};
pub use worker::{Worker, WorkerConfig};
