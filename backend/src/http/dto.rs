//! Data Transfer Objects for the HTTP API.
//!
//! These DTOs are used for request/response serialization in the REST API.
//! Job options arrive as a flat query string next to the raw archive body
//! and are folded into [`JobOptions`].

use serde::{Deserialize, Serialize};

pub use crate::api::{CubeMetadata, CubePayload, JobOptions, JobSnapshot};
use crate::models::{Band, DisplayMode};
use crate::services::cache::CacheStats;
use crate::services::job_tracker::LogEntry;
use crate::services::reducer::{CapStrategy, Range};
use crate::services::regrid::{GridPolicy, DEFAULT_OVERLAP_POINTS};

/// Query parameters for `POST /v1/jobs`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubmitQuery {
    /// `majority` (default), `first`, `overlap` or `canonical`
    #[serde(default)]
    pub grid_policy: Option<String>,
    /// Sample count for the `overlap` policy
    #[serde(default)]
    pub overlap_points: Option<usize>,
    /// Comma-separated wavelengths for the `canonical` policy
    #[serde(default)]
    pub grid: Option<String>,
    #[serde(default)]
    pub interpolate: Option<bool>,
    #[serde(default)]
    pub gap_threshold_hours: Option<f64>,
    #[serde(default)]
    pub max_integrations: Option<usize>,
    #[serde(default)]
    pub cap_strategy: Option<CapStrategy>,
    #[serde(default)]
    pub smooth_sigma: Option<f64>,
    #[serde(default)]
    pub wavelength_min: Option<f64>,
    #[serde(default)]
    pub wavelength_max: Option<f64>,
    #[serde(default)]
    pub time_min: Option<f64>,
    #[serde(default)]
    pub time_max: Option<f64>,
    #[serde(default)]
    pub value_min: Option<f64>,
    #[serde(default)]
    pub value_max: Option<f64>,
    #[serde(default)]
    pub display_mode: Option<DisplayMode>,
    /// Comma-separated `name:start:end` triples
    #[serde(default)]
    pub bands: Option<String>,
    #[serde(default)]
    pub min_valid_points: Option<usize>,
}

fn range(min: Option<f64>, max: Option<f64>) -> Option<Range> {
    (min.is_some() || max.is_some()).then_some(Range::new(min, max))
}

fn parse_bands(spec: &str) -> Result<Vec<Band>, String> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').collect();
            let [name, start, end] = parts.as_slice() else {
                return Err(format!("band '{}' must look like name:start:end", entry));
            };
            let number = |s: &str| {
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| format!("band '{}' has a non-numeric bound '{}'", entry, s))
            };
            Ok(Band {
                name: name.trim().to_string(),
                start: number(start)?,
                end: number(end)?,
            })
        })
        .collect()
}

fn parse_grid(spec: &str) -> Result<Vec<f64>, String> {
    let grid = spec
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().map_err(|_| format!("grid value '{}' is not a number", s)))
        .collect::<Result<Vec<_>, _>>()?;
    if grid.is_empty() {
        return Err("grid_policy=canonical needs a non-empty grid".to_string());
    }
    Ok(grid)
}

impl SubmitQuery {
    /// Overlay the query on `defaults`.
    pub fn into_options(self, defaults: JobOptions) -> Result<JobOptions, String> {
        let grid_policy = match self.grid_policy.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None => defaults.grid_policy.clone(),
            Some("majority") => GridPolicy::Majority,
            Some("first") => GridPolicy::First,
            Some("overlap") => GridPolicy::Overlap {
                points: self.overlap_points.unwrap_or(DEFAULT_OVERLAP_POINTS),
            },
            Some("canonical") => GridPolicy::Canonical {
                grid: parse_grid(self.grid.as_deref().unwrap_or_default())?,
            },
            Some(other) => {
                return Err(format!(
                    "unknown grid_policy '{}' (expected majority, first, overlap or canonical)",
                    other
                ))
            }
        };
        let bands = match self.bands.as_deref() {
            Some(spec) => parse_bands(spec)?,
            None => defaults.bands.clone(),
        };
        Ok(JobOptions {
            grid_policy,
            interpolate: self.interpolate.unwrap_or(defaults.interpolate),
            gap_threshold_hours: self.gap_threshold_hours.unwrap_or(defaults.gap_threshold_hours),
            max_integrations: self.max_integrations.or(defaults.max_integrations),
            cap_strategy: self.cap_strategy.unwrap_or(defaults.cap_strategy),
            smooth_sigma: self.smooth_sigma.unwrap_or(defaults.smooth_sigma),
            wavelength_range: range(self.wavelength_min, self.wavelength_max).or(defaults.wavelength_range),
            time_range: range(self.time_min, self.time_max).or(defaults.time_range),
            value_range: range(self.value_min, self.value_max).or(defaults.value_range),
            display_mode: self.display_mode.unwrap_or(defaults.display_mode),
            bands,
            min_valid_points: self.min_valid_points.unwrap_or(defaults.min_valid_points),
            max_gap_columns: defaults.max_gap_columns,
        })
    }
}

/// Response for job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Job ID for tracking the async processing
    pub job_id: String,
    /// Message about the operation
    pub message: String,
}

/// Job status response: snapshot plus log history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    #[serde(flatten)]
    pub snapshot: JobSnapshot,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub enabled: bool,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStatsResponse {
    pub fn from_stats(stats: Option<CacheStats>) -> Self {
        let enabled = stats.is_some();
        let stats = stats.unwrap_or_default();
        Self {
            enabled,
            entries: stats.entries,
            hits: stats.hits,
            misses: stats.misses,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheClearResponse {
    pub removed: usize,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status of the service
    pub status: String,
    /// Version of the API
    pub version: String,
    /// Jobs currently held in the store
    pub jobs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_overlays_defaults() {
        let q: SubmitQuery = serde_json::from_value(serde_json::json!({
            "grid_policy": "overlap",
            "overlap_points": 50,
            "interpolate": true,
            "wavelength_max": 3.0,
            "display_mode": "flux",
            "cap_strategy": "median_bin",
            "bands": "blue:1.0:2.0, red:3:4",
        }))
        .unwrap();
        let opts = q.into_options(JobOptions::default()).unwrap();
        assert_eq!(opts.grid_policy, GridPolicy::Overlap { points: 50 });
        assert!(opts.interpolate);
        assert_eq!(opts.wavelength_range, Some(Range::new(None, Some(3.0))));
        assert_eq!(opts.time_range, None);
        assert_eq!(opts.display_mode, DisplayMode::Flux);
        assert_eq!(opts.cap_strategy, CapStrategy::MedianBin);
        assert_eq!(opts.bands.len(), 2);
        assert_eq!(opts.bands[1].name, "red");
        assert_eq!(opts.gap_threshold_hours, 0.5);
    }

    #[test]
    fn test_bad_query_values() {
        let q = SubmitQuery {
            grid_policy: Some("nearest".into()),
            ..Default::default()
        };
        assert!(q.into_options(JobOptions::default()).is_err());
        let q = SubmitQuery {
            bands: Some("blue:1".into()),
            ..Default::default()
        };
        assert!(q.into_options(JobOptions::default()).is_err());
        let q = SubmitQuery {
            grid_policy: Some("canonical".into()),
            ..Default::default()
        };
        assert!(q.into_options(JobOptions::default()).is_err());
    }

    #[test]
    fn test_canonical_grid() {
        let q = SubmitQuery {
            grid_policy: Some("Canonical".into()),
            grid: Some("1.0, 1.5,2.0".into()),
            ..Default::default()
        };
        let opts = q.into_options(JobOptions::default()).unwrap();
        assert_eq!(opts.grid_policy, GridPolicy::Canonical { grid: vec![1.0, 1.5, 2.0] });
    }
}
