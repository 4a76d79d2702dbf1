//! Stage-weighted job progress.
//!
//! Each stage owns a fixed slice of the 0-100 scale; within a stage the
//! percent moves with `processed / total`. Published percent never decreases
//! and stays at or below 99 until [`Stage::Done`].

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

pub const DEFAULT_ETA_WINDOW: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Scan,
    Read,
    Regrid,
    Interpolate,
    Finalize,
    Done,
}

impl Stage {
    /// `(start, end)` percent bounds of this stage.
    pub fn share(self) -> (f64, f64) {
        match self {
            Stage::Scan => (0.0, 10.0),
            Stage::Read => (10.0, 60.0),
            Stage::Regrid => (60.0, 88.0),
            Stage::Interpolate => (88.0, 92.0),
            Stage::Finalize => (92.0, 99.0),
            Stage::Done => (100.0, 100.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Scan => "scan",
            Stage::Read => "read",
            Stage::Regrid => "regrid",
            Stage::Interpolate => "interpolate",
            Stage::Finalize => "finalize",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published progress sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: Stage,
    pub percent: f64,
    pub processed: usize,
    pub total: usize,
    /// Items per second since the stage started.
    pub throughput: Option<f64>,
    pub eta_secs: Option<f64>,
    pub message: String,
}

pub type ProgressSink = Box<dyn Fn(&ProgressUpdate) + Send + Sync>;

pub struct ProgressReporter {
    stage: Stage,
    processed: usize,
    total: usize,
    message: String,
    percent: f64,
    stage_started: Instant,
    last_tick: Instant,
    durations: VecDeque<f64>,
    eta_window: usize,
    sink: Option<ProgressSink>,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("stage", &self.stage)
            .field("processed", &self.processed)
            .field("total", &self.total)
            .field("percent", &self.percent)
            .finish()
    }
}

impl ProgressReporter {
    pub fn new(eta_window: usize) -> Self {
        let now = Instant::now();
        Self {
            stage: Stage::Scan,
            processed: 0,
            total: 0,
            message: String::new(),
            percent: 0.0,
            stage_started: now,
            last_tick: now,
            durations: VecDeque::new(),
            eta_window: eta_window.max(1),
            sink: None,
        }
    }

    /// Set the callback that receives every published update.
    pub fn with_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to `stage` with `total` items. Earlier stages are never re-entered.
    pub fn enter(&mut self, stage: Stage, total: usize, message: impl Into<String>) {
        self.enter_at(stage, total, message, Instant::now());
    }

    pub fn enter_at(&mut self, stage: Stage, total: usize, message: impl Into<String>, now: Instant) {
        if stage < self.stage {
            return;
        }
        self.stage = stage;
        self.total = total;
        self.processed = 0;
        self.message = message.into();
        self.stage_started = now;
        self.last_tick = now;
        self.durations.clear();
        self.publish(now);
    }

    /// Record that `processed` of the stage's items are complete.
    pub fn update(&mut self, processed: usize, total: usize) {
        self.update_at(processed, total, Instant::now());
    }

    pub fn update_at(&mut self, processed: usize, total: usize, now: Instant) {
        self.total = total;
        let processed = processed.min(total);
        if processed > self.processed {
            let step = (processed - self.processed) as f64;
            let per_item = now.saturating_duration_since(self.last_tick).as_secs_f64() / step;
            for _ in 0..(processed - self.processed).min(self.eta_window) {
                if self.durations.len() == self.eta_window {
                    self.durations.pop_front();
                }
                self.durations.push_back(per_item);
            }
            self.processed = processed;
            self.last_tick = now;
        }
        self.publish(now);
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
        self.publish(Instant::now());
    }

    pub fn finish(&mut self, message: impl Into<String>) {
        let now = Instant::now();
        self.stage = Stage::Done;
        self.processed = self.total;
        self.message = message.into();
        self.publish(now);
    }

    fn raw_percent(&self) -> f64 {
        let (start, end) = self.stage.share();
        if self.stage == Stage::Done {
            return 100.0;
        }
        let fraction = if self.total == 0 {
            0.0
        } else {
            (self.processed as f64 / self.total as f64).min(1.0)
        };
        (start + (end - start) * fraction).min(99.0)
    }

    pub fn snapshot_at(&self, now: Instant) -> ProgressUpdate {
        let elapsed = now.saturating_duration_since(self.stage_started).as_secs_f64();
        let throughput = (elapsed > 0.0 && self.processed > 0).then(|| self.processed as f64 / elapsed);
        let eta_secs = (!self.durations.is_empty()).then(|| {
            let mean = self.durations.iter().sum::<f64>() / self.durations.len() as f64;
            mean * self.total.saturating_sub(self.processed) as f64
        });
        ProgressUpdate {
            stage: self.stage,
            percent: self.percent,
            processed: self.processed,
            total: self.total,
            throughput,
            eta_secs,
            message: self.message.clone(),
        }
    }

    fn publish(&mut self, now: Instant) {
        self.percent = self.percent.max(self.raw_percent());
        if let Some(sink) = &self.sink {
            sink(&self.snapshot_at(now));
        }
    }
}
