//! Job tracking for background cube assembly.
//!
//! This module provides an in-memory job store. Each record has an explicit
//! lifecycle: inserted on submit, updated only by the worker that owns it,
//! frozen once it reaches `done` or `error`, and evicted by a retention sweep
//! after it has been fetched or has aged out.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::CubePayload;
use crate::error::ErrorKind;
use crate::services::progress::{ProgressUpdate, Stage};

/// A single log entry with timestamp and message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Job status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

/// Job metadata, progress and logs.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub stage: Stage,
    pub percent: f64,
    pub processed: usize,
    pub total: usize,
    pub throughput: Option<f64>,
    pub eta_secs: Option<f64>,
    pub message: String,
    pub error_kind: Option<ErrorKind>,
    pub logs: Vec<LogEntry>,
    pub created_at: DateTime<Utc>,
    /// Last status or progress change; the stall watchdog keys off this.
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set once the result has been fetched.
    pub retrieved: bool,
    /// Present only for `done` jobs, and then always a complete cube.
    #[serde(skip)]
    pub result: Option<Arc<CubePayload>>,
}

/// In-memory job tracker.
#[derive(Clone)]
pub struct JobTracker {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl JobTracker {
    /// Create a new job tracker.
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a new queued job and return its ID.
    pub fn create_job(&self) -> String {
        let job_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let job = Job {
            job_id: job_id.clone(),
            status: JobStatus::Queued,
            stage: Stage::Scan,
            percent: 0.0,
            processed: 0,
            total: 0,
            throughput: None,
            eta_secs: None,
            message: "Queued".to_string(),
            error_kind: None,
            logs: vec![],
            created_at: now,
            updated_at: now,
            completed_at: None,
            retrieved: false,
            result: None,
        };
        self.jobs.write().insert(job_id.clone(), job);
        job_id
    }

    /// Move a queued job to `running`. Returns false if it was not queued.
    pub fn start_job(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Running;
                job.message = "Starting".to_string();
                job.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Copy a progress sample onto a running job. Percent never goes down.
    pub fn update_progress(&self, job_id: &str, update: &ProgressUpdate) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            if job.status != JobStatus::Running {
                return;
            }
            job.stage = job.stage.max(update.stage);
            job.percent = job.percent.max(update.percent);
            job.processed = update.processed;
            job.total = update.total;
            job.throughput = update.throughput;
            job.eta_secs = update.eta_secs;
            job.message = update.message.clone();
            job.updated_at = Utc::now();
        }
    }

    /// Add a log entry to a job. Terminal jobs accept no further entries.
    pub fn log(&self, job_id: &str, level: LogLevel, message: impl Into<String>) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            if job.status.is_terminal() {
                return;
            }
            job.logs.push(LogEntry {
                timestamp: Utc::now(),
                level,
                message: message.into(),
            });
        }
    }

    /// Mark a job as done with its result. Returns false if already terminal.
    pub fn complete_job(&self, job_id: &str, result: CubePayload) -> bool {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(job_id) {
            Some(job) if !job.status.is_terminal() => {
                let now = Utc::now();
                job.status = JobStatus::Done;
                job.stage = Stage::Done;
                job.percent = 100.0;
                job.processed = job.total;
                job.eta_secs = Some(0.0);
                job.message = "Complete".to_string();
                job.updated_at = now;
                job.completed_at = Some(now);
                job.result = Some(Arc::new(result));
                job.logs.push(LogEntry {
                    timestamp: now,
                    level: LogLevel::Success,
                    message: "Cube assembled".to_string(),
                });
                true
            }
            _ => false,
        }
    }

    /// Mark a job as failed. Returns false if already terminal.
    pub fn fail_job(&self, job_id: &str, kind: ErrorKind, error_message: impl Into<String>) -> bool {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(job_id) {
            Some(job) if !job.status.is_terminal() => {
                let now = Utc::now();
                let message = error_message.into();
                job.status = JobStatus::Error;
                job.error_kind = Some(kind);
                job.message = message.clone();
                job.updated_at = now;
                job.completed_at = Some(now);
                job.result = None;
                job.logs.push(LogEntry {
                    timestamp: now,
                    level: LogLevel::Error,
                    message,
                });
                true
            }
            _ => false,
        }
    }

    /// Get a job by ID.
    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().get(job_id).cloned()
    }

    /// Get all logs for a job.
    pub fn get_logs(&self, job_id: &str) -> Vec<LogEntry> {
        self.jobs
            .read()
            .get(job_id)
            .map(|job| job.logs.clone())
            .unwrap_or_default()
    }

    /// Flag a finished job's result as delivered so the next sweep drops it.
    pub fn mark_retrieved(&self, job_id: &str) {
        if let Some(job) = self.jobs.write().get_mut(job_id) {
            if job.status.is_terminal() {
                job.retrieved = true;
            }
        }
    }

    /// Running jobs whose last update is older than `timeout`.
    pub fn stalled_jobs(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> Vec<String> {
        self.jobs
            .read()
            .values()
            .filter(|job| job.status == JobStatus::Running && now - job.updated_at > timeout)
            .map(|job| job.job_id.clone())
            .collect()
    }

    /// Drop finished jobs that were retrieved or completed more than
    /// `retention` ago. Returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>, retention: chrono::Duration) -> usize {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, job| {
            let expired = job
                .completed_at
                .is_some_and(|done| job.retrieved || now - done > retention);
            !(job.status.is_terminal() && expired)
        });
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}
