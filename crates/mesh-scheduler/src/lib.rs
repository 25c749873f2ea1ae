//! Mesh Scheduler - divides a job's index space among workers
//!
//! A job is cut into contiguous ranges sized to each worker's observed
//! throughput. Ranges lost to timeouts or dead workers go back to a pending
//! pool and are handed out again; the first solution retires every other
//! range of the job.

pub mod error;
pub mod local;
pub mod scheduler;
pub mod search;
pub mod splitter;
pub mod task;

pub use error::JobError;
pub use local::LocalSlot;
pub use scheduler::{Expired, Finished, JobOutcome, Scheduler, Submitted};
pub use search::{search_range, valid_group, SearchOutcome, SudokuRules, Validator};
pub use splitter::JobSplitter;
pub use task::Task;
