//! Service layer for cube assembly and job orchestration.
//!
//! The numeric stages (regrid, assemble, normalize, gap fill, reduce) are
//! plain functions over in-memory values. [`pipeline`] chains them and
//! [`job_runner`] runs the chain in the background against the
//! [`job_tracker`] store.

pub mod assembler;
pub mod cache;
pub mod gap_fill;
pub mod job_runner;
pub mod job_tracker;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod reducer;
pub mod regrid;
pub mod visits;

pub use job_runner::{FetchOutcome, JobRunner, RunnerConfig};
pub use job_tracker::{JobStatus, JobTracker, LogEntry, LogLevel};
pub use pipeline::{run_archive, run_path, Assembly, JobContext};
