//! Application state for the HTTP server.

use std::sync::Arc;

use crate::config::StampConfig;
use crate::services::job_runner::JobRunner;
use crate::services::job_tracker::JobTracker;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Background runner owning the job store and result cache
    pub runner: JobRunner,
    pub config: Arc<StampConfig>,
}

impl AppState {
    /// Create a new application state with the given runner.
    pub fn new(runner: JobRunner, config: StampConfig) -> Self {
        Self {
            runner,
            config: Arc::new(config),
        }
    }

    /// Build the runner, tracker and cache described by `config`.
    pub fn from_config(config: StampConfig) -> Self {
        let runner = JobRunner::new(JobTracker::new(), config.build_cache(), config.runner_config());
        Self::new(runner, config)
    }
}
