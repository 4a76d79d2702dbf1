//! Background job runner.
//!
//! A submission gets a job id immediately; the pipeline then runs on the
//! blocking pool and publishes progress and logs to the [`JobTracker`]. Each
//! job owns a cancellation token, and a watchdog fails jobs that stop
//! reporting progress.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{CubePayload, JobOptions, JobSnapshot};
use crate::error::{ErrorKind, PipelineResult};
use crate::services::cache::ResultCache;
use crate::services::job_tracker::{JobStatus, JobTracker, LogLevel};
use crate::services::pipeline::{self, Assembly, JobContext};
use crate::services::progress::{ProgressReporter, DEFAULT_ETA_WINDOW};

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Running jobs silent for longer than this are failed as timed out.
    pub stall_timeout: Option<Duration>,
    /// Finished jobs are dropped this long after completion.
    pub retention: Duration,
    pub watchdog_interval: Duration,
    pub eta_window: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            stall_timeout: Some(Duration::from_secs(600)),
            retention: Duration::from_secs(3600),
            watchdog_interval: Duration::from_secs(15),
            eta_window: DEFAULT_ETA_WINDOW,
        }
    }
}

/// Outcome of asking for a job's result.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    NotFound,
    Pending(JobSnapshot),
    Failed(JobSnapshot),
    Ready(Arc<CubePayload>),
}

#[derive(Clone)]
pub struct JobRunner {
    tracker: JobTracker,
    cache: Option<ResultCache<Assembly>>,
    tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
    config: RunnerConfig,
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

impl JobRunner {
    pub fn new(tracker: JobTracker, cache: Option<ResultCache<Assembly>>, config: RunnerConfig) -> Self {
        Self {
            tracker,
            cache,
            tokens: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn cache(&self) -> Option<&ResultCache<Assembly>> {
        self.cache.as_ref()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Validate options, register a queued job and start it in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, archive: Vec<u8>, options: JobOptions) -> PipelineResult<String> {
        options.validate()?;
        let job_id = self.tracker.create_job();
        let token = CancellationToken::new();
        self.tokens.write().insert(job_id.clone(), token.clone());
        info!(job_id = %job_id, bytes = archive.len(), "job submitted");

        let runner = self.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            runner.process(id, archive, options, token).await;
        });
        Ok(job_id)
    }

    async fn process(&self, job_id: String, archive: Vec<u8>, options: JobOptions, token: CancellationToken) {
        if !self.tracker.start_job(&job_id) {
            self.tokens.write().remove(&job_id);
            return;
        }
        self.tracker.log(&job_id, LogLevel::Info, "Starting cube assembly...");

        let tracker = self.tracker.clone();
        let cache = self.cache.clone();
        let eta_window = self.config.eta_window;
        let id = job_id.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let progress_tracker = tracker.clone();
            let progress_id = id.clone();
            let reporter = ProgressReporter::new(eta_window)
                .with_sink(move |update| progress_tracker.update_progress(&progress_id, update));
            let log_tracker = tracker.clone();
            let log_id = id.clone();
            let mut ctx = JobContext::new(id)
                .with_progress(reporter)
                .with_cancellation(token)
                .with_log_sink(move |level, message| log_tracker.log(&log_id, level, message));
            pipeline::run_archive(&archive, &options, &mut ctx, cache.as_ref())
        })
        .await;

        match outcome {
            Ok(Ok(payload)) => {
                let summary = format!(
                    "✓ Assembled {} wavelengths x {} integrations from {} files",
                    payload.wavelength.len(),
                    payload.time.len(),
                    payload.metadata.files_processed
                );
                self.tracker.log(&job_id, LogLevel::Success, summary);
                if self.tracker.complete_job(&job_id, payload) {
                    info!(job_id = %job_id, "job complete");
                }
            }
            Ok(Err(e)) => {
                warn!(job_id = %job_id, kind = %e.kind(), error = %e, "job failed");
                self.tracker.fail_job(&job_id, e.kind(), e.to_string());
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "job task panicked");
                self.tracker
                    .fail_job(&job_id, ErrorKind::Internal, format!("Processing task panic: {}", e));
            }
        }
        self.tokens.write().remove(&job_id);
    }

    pub fn poll(&self, job_id: &str) -> Option<JobSnapshot> {
        self.tracker.get_job(job_id).map(|job| JobSnapshot::from(&job))
    }

    /// Result of a finished job. Finished jobs are marked retrieved so the
    /// next sweep can evict them.
    pub fn fetch(&self, job_id: &str) -> FetchOutcome {
        let Some(job) = self.tracker.get_job(job_id) else {
            return FetchOutcome::NotFound;
        };
        match (job.status, job.result.clone()) {
            (JobStatus::Done, Some(result)) => {
                self.tracker.mark_retrieved(job_id);
                FetchOutcome::Ready(result)
            }
            (JobStatus::Error, _) | (JobStatus::Done, None) => {
                self.tracker.mark_retrieved(job_id);
                FetchOutcome::Failed(JobSnapshot::from(&job))
            }
            _ => FetchOutcome::Pending(JobSnapshot::from(&job)),
        }
    }

    /// Request cancellation. The record turns to `error` (kind `cancelled`)
    /// right away; the worker stops at its next checkpoint.
    pub fn cancel(&self, job_id: &str) -> bool {
        if let Some(token) = self.tokens.read().get(job_id) {
            token.cancel();
        }
        let cancelled = self
            .tracker
            .fail_job(job_id, ErrorKind::Cancelled, "Job cancelled by request");
        if cancelled {
            info!(job_id = %job_id, "job cancelled");
        }
        cancelled
    }

    /// Fail and cancel running jobs with no progress for `stall_timeout`.
    pub fn check_stalled(&self, now: DateTime<Utc>) -> Vec<String> {
        let Some(timeout) = self.config.stall_timeout else {
            return Vec::new();
        };
        let stalled = self.tracker.stalled_jobs(now, chrono_duration(timeout));
        for job_id in &stalled {
            let message = format!("No progress for {} s; job presumed stalled", timeout.as_secs());
            if self.tracker.fail_job(job_id, ErrorKind::Timeout, message) {
                warn!(job_id = %job_id, "job timed out");
            }
            if let Some(token) = self.tokens.read().get(job_id) {
                token.cancel();
            }
        }
        stalled
    }

    /// Evict finished records past retention or already fetched.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let removed = self.tracker.sweep(now, chrono_duration(self.config.retention));
        if removed > 0 {
            info!(removed, "expired jobs swept");
        }
        removed
    }

    /// Periodically run [`Self::check_stalled`] and [`Self::sweep`].
    pub fn spawn_watchdog(&self) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(runner.config.watchdog_interval);
            loop {
                ticker.tick().await;
                let now = Utc::now();
                runner.check_stalled(now);
                runner.sweep(now);
            }
        })
    }
}
