//! Visit Segmenter.

use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::models::Visit;

pub const DEFAULT_GAP_THRESHOLD_HOURS: f64 = 0.5;

pub fn validate_threshold(threshold_hours: f64) -> PipelineResult<()> {
    if !threshold_hours.is_finite() || threshold_hours <= 0.0 {
        return Err(PipelineError::invalid_options(format!(
            "gap threshold must be a positive number of hours (got {})",
            threshold_hours
        )));
    }
    Ok(())
}

/// Split `time_axis` into visits wherever consecutive timestamps differ by
/// more than `threshold_hours`.
///
/// The visits cover every index exactly once, in order.
pub fn segment(time_axis: &[f64], threshold_hours: f64) -> Vec<Visit> {
    split(time_axis.len(), |j| time_axis[j] - time_axis[j - 1] > threshold_hours)
}

/// Like [`segment`], but also splits wherever observed and synthetic
/// (gap-filled) columns meet, so runs of each kind stay separate.
pub fn segment_with_mask(time_axis: &[f64], interpolated: &[bool], threshold_hours: f64) -> Vec<Visit> {
    split(time_axis.len(), |j| {
        time_axis[j] - time_axis[j - 1] > threshold_hours || interpolated[j] != interpolated[j - 1]
    })
}

/// Index ranges of observed runs only, ignoring synthetic columns.
///
/// Without synthetic columns this equals [`segment`].
pub fn observed_visits(time_axis: &[f64], interpolated: &[bool], threshold_hours: f64) -> Vec<Visit> {
    let mut visits = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for j in (0..time_axis.len()).filter(|&j| !interpolated.get(j).copied().unwrap_or(false)) {
        current = match current {
            Some((start, last)) if time_axis[j] - time_axis[last] > threshold_hours => {
                visits.push(Visit::new(start, last));
                Some((j, j))
            }
            Some((start, _)) => Some((start, j)),
            None => Some((j, j)),
        };
    }
    if let Some((start, last)) = current {
        visits.push(Visit::new(start, last));
    }
    visits
}

fn split(n: usize, is_break: impl Fn(usize) -> bool) -> Vec<Visit> {
    if n == 0 {
        return Vec::new();
    }
    let mut visits = Vec::new();
    let mut start = 0;
    for j in 1..n {
        if is_break(j) {
            visits.push(Visit::new(start, j - 1));
            start = j;
        }
    }
    visits.push(Visit::new(start, n - 1));
    debug!(visits = visits.len(), columns = n, "time axis segmented");
    visits
}
