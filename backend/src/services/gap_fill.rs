//! Gap Interpolator.
//!
//! Opens each inter-visit gap with synthetic columns and fills them by linear
//! interpolation in time between the two observed columns bounding the gap.
//! Observed columns are never modified and nothing is added before the first
//! or after the last observed column.

use ndarray::{s, Array2};
use tracing::info;

use super::normalize::nan_median;
use crate::error::{PipelineError, PipelineResult};
use crate::models::TimeSeriesCube;

pub const DEFAULT_MAX_GAP_COLUMNS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapFillOptions {
    pub threshold_hours: f64,
    /// Upper bound on synthetic columns across all gaps.
    pub max_columns: usize,
}

impl Default for GapFillOptions {
    fn default() -> Self {
        Self {
            threshold_hours: super::visits::DEFAULT_GAP_THRESHOLD_HOURS,
            max_columns: DEFAULT_MAX_GAP_COLUMNS,
        }
    }
}

/// A gap between observed columns `left` and `left + 1`.
#[derive(Debug, Clone, Copy)]
struct Gap {
    left: usize,
    count: usize,
}

/// Median spacing between consecutive observed columns inside visits.
fn intra_visit_cadence(cube: &TimeSeriesCube, threshold: f64) -> Option<f64> {
    let t = &cube.time_axis;
    let steps: Vec<f64> = (1..t.len())
        .filter(|&j| !cube.interpolated[j] && !cube.interpolated[j - 1])
        .map(|j| t[j] - t[j - 1])
        .filter(|&d| d > 0.0 && d <= threshold)
        .collect();
    let cadence = nan_median(steps);
    cadence.is_finite().then_some(cadence)
}

/// Insert and fill synthetic columns; returns how many were added.
///
/// Running this on an already-filled cube adds nothing.
pub fn fill_gaps(cube: &mut TimeSeriesCube, options: &GapFillOptions) -> PipelineResult<usize> {
    super::visits::validate_threshold(options.threshold_hours)?;
    let threshold = options.threshold_hours;
    let spacing = intra_visit_cadence(cube, threshold)
        .map_or(threshold, |c| c.min(threshold));

    let t = &cube.time_axis;
    let mut gaps: Vec<Gap> = (0..t.len().saturating_sub(1))
        .filter(|&j| !cube.interpolated[j] && !cube.interpolated[j + 1])
        .filter(|&j| t[j + 1] - t[j] > threshold)
        .map(|j| Gap {
            left: j,
            count: (((t[j + 1] - t[j]) / spacing).ceil() as usize)
                .min(options.max_columns.saturating_add(1))
                .saturating_sub(1),
        })
        .filter(|g| g.count > 0)
        .collect();

    let wanted = gaps.iter().fold(0usize, |acc, g| acc.saturating_add(g.count));
    if wanted > options.max_columns {
        for g in &mut gaps {
            g.count = (g.count as u128 * options.max_columns as u128 / wanted as u128) as usize;
        }
        gaps.retain(|g| g.count > 0);
    }
    let added: usize = gaps.iter().map(|g| g.count).sum();
    if added == 0 {
        return Ok(0);
    }

    let (n_wave, n_time) = cube.flux.dim();
    let total = n_time + added;
    let mut time_axis = Vec::with_capacity(total);
    let mut interpolated = Vec::with_capacity(total);
    let mut flux = Array2::from_elem((n_wave, total), f64::NAN);
    let mut error = cube.error.as_ref().map(|_| Array2::from_elem((n_wave, total), f64::NAN));

    let mut gaps_iter = gaps.iter().peekable();
    let mut out = 0;
    for j in 0..n_time {
        time_axis.push(cube.time_axis[j]);
        interpolated.push(cube.interpolated[j]);
        flux.column_mut(out).assign(&cube.flux.column(j));
        if let (Some(dst), Some(src)) = (error.as_mut(), cube.error.as_ref()) {
            dst.column_mut(out).assign(&src.column(j));
        }
        out += 1;

        if let Some(gap) = gaps_iter.next_if(|g| g.left == j) {
            let (ta, tb) = (cube.time_axis[j], cube.time_axis[j + 1]);
            let left = cube.flux.column(j);
            let right = cube.flux.column(j + 1);
            for k in 1..=gap.count {
                let frac = k as f64 / (gap.count + 1) as f64;
                time_axis.push(ta + (tb - ta) * frac);
                interpolated.push(true);
                for (i, cell) in flux.slice_mut(s![.., out]).iter_mut().enumerate() {
                    let (a, b) = (left[i], right[i]);
                    if a.is_finite() && b.is_finite() {
                        *cell = a + (b - a) * frac;
                    }
                }
                out += 1;
            }
        }
    }
    if out != total {
        return Err(PipelineError::internal(
            format!("gap fill produced {} columns, expected {}", out, total),
            crate::error::ErrorContext::new("fill_gaps"),
        ));
    }

    cube.time_axis = time_axis;
    cube.interpolated = interpolated;
    cube.flux = flux;
    cube.error = error;
    cube.validate("fill_gaps")?;

    info!(gaps = gaps.len(), columns = added, spacing_hours = spacing, "gaps interpolated");
    Ok(added)
}
