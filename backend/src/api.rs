//! Public API surface for the backend.
//!
//! This file consolidates the serializable types exchanged with callers:
//! job options on the way in, job snapshots and the cube payload on the way
//! out. Payload matrices are row-major `[wavelength][time]`; NaN cells
//! serialize as `null`.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::io::{ReadOptions, DEFAULT_MIN_VALID_POINTS};
use crate::models::{Band, DisplayMode, TimeSeriesCube, Visit};
use crate::services::gap_fill::{GapFillOptions, DEFAULT_MAX_GAP_COLUMNS};
use crate::services::job_tracker::{Job, JobStatus};
use crate::services::progress::Stage;
use crate::services::reducer::{BandCurve, CapStrategy, Range, ReduceOptions};
use crate::services::regrid::GridPolicy;
use crate::services::visits::{self, DEFAULT_GAP_THRESHOLD_HOURS};

fn default_gap_threshold() -> f64 {
    DEFAULT_GAP_THRESHOLD_HOURS
}

fn default_min_valid_points() -> usize {
    DEFAULT_MIN_VALID_POINTS
}

fn default_max_gap_columns() -> usize {
    DEFAULT_MAX_GAP_COLUMNS
}

/// Everything a caller can tune for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default)]
    pub grid_policy: GridPolicy,
    /// Fill inter-visit gaps with synthetic columns.
    #[serde(default)]
    pub interpolate: bool,
    #[serde(default = "default_gap_threshold")]
    pub gap_threshold_hours: f64,
    #[serde(default)]
    pub max_integrations: Option<usize>,
    #[serde(default)]
    pub cap_strategy: CapStrategy,
    /// Gaussian sigma along time, in columns. 0 disables smoothing.
    #[serde(default)]
    pub smooth_sigma: f64,
    #[serde(default)]
    pub wavelength_range: Option<Range>,
    #[serde(default)]
    pub time_range: Option<Range>,
    #[serde(default)]
    pub value_range: Option<Range>,
    #[serde(default)]
    pub display_mode: DisplayMode,
    #[serde(default)]
    pub bands: Vec<Band>,
    #[serde(default = "default_min_valid_points")]
    pub min_valid_points: usize,
    #[serde(default = "default_max_gap_columns")]
    pub max_gap_columns: usize,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            grid_policy: GridPolicy::default(),
            interpolate: false,
            gap_threshold_hours: DEFAULT_GAP_THRESHOLD_HOURS,
            max_integrations: None,
            cap_strategy: CapStrategy::default(),
            smooth_sigma: 0.0,
            wavelength_range: None,
            time_range: None,
            value_range: None,
            display_mode: DisplayMode::default(),
            bands: Vec::new(),
            min_valid_points: DEFAULT_MIN_VALID_POINTS,
            max_gap_columns: DEFAULT_MAX_GAP_COLUMNS,
        }
    }
}

impl JobOptions {
    /// Reject options no job could run with, before a job id is handed out.
    pub fn validate(&self) -> PipelineResult<()> {
        self.grid_policy.validate()?;
        visits::validate_threshold(self.gap_threshold_hours)?;
        if self.max_integrations == Some(0) {
            return Err(PipelineError::invalid_options("max_integrations must be at least 1"));
        }
        if !self.smooth_sigma.is_finite() || self.smooth_sigma < 0.0 {
            return Err(PipelineError::invalid_options(format!(
                "smooth_sigma must be a non-negative number (got {})",
                self.smooth_sigma
            )));
        }
        for (name, range) in [
            ("wavelength_range", &self.wavelength_range),
            ("time_range", &self.time_range),
            ("value_range", &self.value_range),
        ] {
            if let Some(r) = range {
                if r.min.is_some_and(|v| !v.is_finite()) || r.max.is_some_and(|v| !v.is_finite()) {
                    return Err(PipelineError::invalid_options(format!("{} bounds must be finite", name)));
                }
            }
        }
        for band in &self.bands {
            band.validate()?;
        }
        if self.min_valid_points == 0 {
            return Err(PipelineError::invalid_options("min_valid_points must be at least 1"));
        }
        Ok(())
    }

    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            min_valid_points: self.min_valid_points,
        }
    }

    pub fn gap_fill_options(&self) -> GapFillOptions {
        GapFillOptions {
            threshold_hours: self.gap_threshold_hours,
            max_columns: self.max_gap_columns,
        }
    }

    pub fn reduce_options(&self) -> ReduceOptions {
        ReduceOptions {
            max_integrations: self.max_integrations,
            cap_strategy: self.cap_strategy,
            smooth_sigma: self.smooth_sigma,
            wavelength_range: self.wavelength_range,
            time_range: self.time_range,
            value_range: self.value_range,
            display_mode: self.display_mode,
            gap_threshold_hours: self.gap_threshold_hours,
        }
    }

    /// Canonical JSON of the options that shape the assembled (pre-reduction)
    /// cube; part of the result-cache key.
    pub fn assembly_key(&self) -> String {
        serde_json::json!({
            "grid_policy": self.grid_policy,
            "interpolate": self.interpolate,
            "gap_threshold_hours": self.gap_threshold_hours,
            "min_valid_points": self.min_valid_points,
            "max_gap_columns": self.max_gap_columns,
        })
        .to_string()
    }
}

/// A file left out of the cube, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedFile {
    pub path: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Descriptive metadata emitted next to the cube.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CubeMetadata {
    pub files_processed: usize,
    pub files_excluded: Vec<ExcludedFile>,
    pub total_integrations: usize,
    pub plotted_integrations: usize,
    pub subsampled: bool,
    /// `"a-b um"`
    pub wavelength_range: String,
    /// `"a-b hours"`
    pub time_range: String,
    /// MJD of time-axis zero.
    pub start_mjd: f64,
    pub targets: Vec<String>,
    pub instruments: Vec<String>,
    pub filters: Vec<String>,
    pub gratings: Vec<String>,
    pub flux_unit: String,
    pub user_ranges: Vec<String>,
    pub visits: Vec<Visit>,
    pub interpolated_columns: usize,
    pub grid_policy: String,
    pub display_mode: DisplayMode,
}

/// Final job result: the reduced cube plus metadata and band curves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CubePayload {
    pub wavelength: Vec<f64>,
    /// Hours since `metadata.start_mjd`.
    pub time: Vec<f64>,
    pub flux: Vec<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Vec<Vec<f64>>>,
    pub reference_spectrum: Vec<f64>,
    pub interpolated: Vec<bool>,
    pub band_curves: Vec<BandCurve>,
    pub metadata: CubeMetadata,
}

impl CubePayload {
    pub fn from_cube(cube: &TimeSeriesCube, band_curves: Vec<BandCurve>, metadata: CubeMetadata) -> Self {
        let rows = |m: &ndarray::Array2<f64>| m.outer_iter().map(|r| r.to_vec()).collect::<Vec<_>>();
        Self {
            wavelength: cube.wavelength_axis.clone(),
            time: cube.time_axis.clone(),
            flux: rows(&cube.flux),
            error: cube.error.as_ref().map(rows),
            reference_spectrum: cube.reference_spectrum.clone(),
            interpolated: cube.interpolated.clone(),
            band_curves,
            metadata,
        }
    }
}

/// Poll response: a job record without its result or log history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub stage: Stage,
    pub percent: f64,
    pub processed: usize,
    pub total: usize,
    pub throughput: Option<f64>,
    pub eta_secs: Option<f64>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub has_result: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            stage: job.stage,
            percent: job.percent,
            processed: job.processed,
            total: job.total,
            throughput: job.throughput,
            eta_secs: job.eta_secs,
            message: job.message.clone(),
            error_kind: job.error_kind,
            has_result: job.result.is_some(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}
