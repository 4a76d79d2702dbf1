//! Reducer: integration capping, temporal smoothing and range filtering.
//!
//! Steps run in a fixed order (cap, smooth, filter). Filters subset the cube
//! rather than masking it, and every step leaves the cube's shape invariants
//! intact.

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::normalize::{nan_mean, nan_median, normalize};
use super::visits;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{Band, DisplayMode, TimeSeriesCube, Visit};

/// How `max_integrations` is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapStrategy {
    /// Keep evenly spaced columns `floor(i * N / cap)`.
    #[default]
    Subsample,
    /// Median-combine runs of `ceil(N / cap)` consecutive columns.
    MedianBin,
}

/// Closed interval; a missing bound means the data extreme.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Range {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Range {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    pub fn is_set(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    /// Clamp to `[lo, hi]`. `None` when the result is degenerate.
    pub fn resolve(&self, lo: f64, hi: f64) -> Option<(f64, f64)> {
        let min = self.min.unwrap_or(lo).max(lo);
        let max = self.max.unwrap_or(hi).min(hi);
        (min < max).then_some((min, max))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReduceOptions {
    pub max_integrations: Option<usize>,
    pub cap_strategy: CapStrategy,
    /// Gaussian sigma in columns; 0 disables smoothing.
    pub smooth_sigma: f64,
    pub wavelength_range: Option<Range>,
    pub time_range: Option<Range>,
    pub value_range: Option<Range>,
    pub display_mode: DisplayMode,
    pub gap_threshold_hours: f64,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            max_integrations: None,
            cap_strategy: CapStrategy::default(),
            smooth_sigma: 0.0,
            wavelength_range: None,
            time_range: None,
            value_range: None,
            display_mode: DisplayMode::default(),
            gap_threshold_hours: visits::DEFAULT_GAP_THRESHOLD_HOURS,
        }
    }
}

/// What the reducer did, for the result metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReduceReport {
    pub total_integrations: usize,
    pub plotted_integrations: usize,
    pub subsampled: bool,
    pub user_ranges: Vec<String>,
    /// Hours removed from the time axis so it starts at zero again.
    pub time_offset_hours: f64,
}

fn observed_count(cube: &TimeSeriesCube) -> usize {
    cube.interpolated.iter().filter(|m| !**m).count()
}

/// Evenly spaced column indices `floor(i * n / cap)` for `i < cap`.
pub fn subsample_indices(n: usize, cap: usize) -> Vec<usize> {
    if cap == 0 || cap >= n {
        return (0..n).collect();
    }
    (0..cap).map(|i| i * n / cap).collect()
}

fn median_bin(cube: &mut TimeSeriesCube, cap: usize) {
    let n = cube.n_times();
    let bin = n.div_ceil(cap);
    let groups: Vec<(usize, usize)> = (0..n).step_by(bin).map(|s| (s, (s + bin).min(n))).collect();
    let bin_matrix = |m: &Array2<f64>| {
        let mut out = Array2::from_elem((m.nrows(), groups.len()), f64::NAN);
        for (g, &(s, e)) in groups.iter().enumerate() {
            for (i, row) in m.axis_iter(Axis(0)).enumerate() {
                out[[i, g]] = nan_median((s..e).map(|j| row[j]));
            }
        }
        out
    };
    cube.flux = bin_matrix(&cube.flux);
    cube.error = cube.error.as_ref().map(bin_matrix);
    cube.time_axis = groups.iter().map(|&(s, _)| cube.time_axis[s]).collect();
    cube.interpolated = groups
        .iter()
        .map(|&(s, e)| cube.interpolated[s..e].iter().all(|m| *m))
        .collect();
}

/// Normalized Gaussian weights for offsets `-r..=r`, `r = ceil(4 sigma)`.
pub fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (4.0 * sigma).ceil() as i64;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// NaN-aware Gaussian smoothing along each row, never crossing segment
/// boundaries. NaN cells stay NaN.
pub fn smooth_rows(values: &mut Array2<f64>, segments: &[Visit], sigma: f64) {
    if sigma <= 0.0 {
        return;
    }
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as i64;
    for mut row in values.axis_iter_mut(Axis(0)) {
        let original = row.to_vec();
        for seg in segments {
            let (lo, hi) = (seg.start_index as i64, seg.end_index as i64);
            for j in lo..=hi {
                if !original[j as usize].is_finite() {
                    continue;
                }
                let mut acc = 0.0;
                let mut weight = 0.0;
                for k in -radius..=radius {
                    let idx = j + k;
                    if idx < lo || idx > hi {
                        continue;
                    }
                    let v = original[idx as usize];
                    if v.is_finite() {
                        let w = kernel[(k + radius) as usize];
                        acc += w * v;
                        weight += w;
                    }
                }
                row[j as usize] = acc / weight;
            }
        }
    }
}

fn finite_extent(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.filter(|v| v.is_finite()).fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Run the cap, smooth and filter steps on `cube` in place.
pub fn reduce(cube: &mut TimeSeriesCube, options: &ReduceOptions) -> PipelineResult<ReduceReport> {
    let mut report = ReduceReport {
        total_integrations: observed_count(cube),
        ..Default::default()
    };

    // (a) cap
    if let Some(cap) = options.max_integrations {
        if cap == 0 {
            return Err(PipelineError::invalid_options("max_integrations must be at least 1"));
        }
        let n = cube.n_times();
        if cap < n {
            match options.cap_strategy {
                CapStrategy::Subsample => cube.select_columns(&subsample_indices(n, cap)),
                CapStrategy::MedianBin => median_bin(cube, cap),
            }
            report.subsampled = true;
            info!(from = n, to = cube.n_times(), strategy = ?options.cap_strategy, "integrations capped");
        }
        cube.validate("cap")?;
    }

    // (b) smooth
    if !options.smooth_sigma.is_finite() || options.smooth_sigma < 0.0 {
        return Err(PipelineError::invalid_options("smooth_sigma must be a non-negative number"));
    }
    if options.smooth_sigma > 0.0 {
        let segments =
            visits::segment_with_mask(&cube.time_axis, &cube.interpolated, options.gap_threshold_hours);
        smooth_rows(&mut cube.flux, &segments, options.smooth_sigma);
        if let Some(err) = cube.error.as_mut() {
            smooth_rows(err, &segments, options.smooth_sigma);
        }
        debug!(sigma = options.smooth_sigma, segments = segments.len(), "smoothed along time");
        cube.validate("smooth")?;
    }

    // (c) range filters
    if let Some(range) = options.wavelength_range.filter(Range::is_set) {
        if let Some((lo, hi)) = cube.wavelength_range().and_then(|(a, b)| range.resolve(a, b)) {
            let keep: Vec<usize> = (0..cube.n_wavelengths())
                .filter(|&i| (lo..=hi).contains(&cube.wavelength_axis[i]))
                .collect();
            cube.select_rows(&keep);
            report.user_ranges.push(format!("Wavelength: {:.3} - {:.3} um", lo, hi));
        } else {
            warn!(?range, "wavelength range is degenerate; using full range");
        }
        cube.validate("wavelength_filter")?;
    }

    if let Some(range) = options.time_range.filter(Range::is_set) {
        if let Some((lo, hi)) = cube.time_range().and_then(|(a, b)| range.resolve(a, b)) {
            let keep: Vec<usize> = (0..cube.n_times())
                .filter(|&j| (lo..=hi).contains(&cube.time_axis[j]))
                .collect();
            cube.select_columns(&keep);
            report.user_ranges.push(format!("Time: {:.2} - {:.2} hours", lo, hi));
        } else {
            warn!(?range, "time range is degenerate; using full range");
        }
        cube.validate("time_filter")?;
    }

    if let Some(range) = options.value_range.filter(Range::is_set) {
        let display = cube.display_values(options.display_mode);
        match finite_extent(display.iter().copied()).and_then(|(a, b)| range.resolve(a, b)) {
            Some((lo, hi)) => {
                let inside = display.mapv(|v| v.is_finite() && v >= lo && v <= hi);
                let rows: Vec<usize> = (0..cube.n_wavelengths())
                    .filter(|&i| inside.row(i).iter().any(|m| *m))
                    .collect();
                let cols: Vec<usize> = (0..cube.n_times())
                    .filter(|&j| inside.column(j).iter().any(|m| *m))
                    .collect();
                cube.select_rows(&rows);
                cube.select_columns(&cols);
                let unit = match options.display_mode {
                    DisplayMode::Variability => " %",
                    DisplayMode::Flux => "",
                };
                report.user_ranges.push(format!("Value: {:.2} - {:.2}{}", lo, hi, unit));
            }
            None => warn!(?range, "value range is degenerate; using full range"),
        }
        cube.validate("value_filter")?;
    }

    if cube.n_times() == 0 || cube.n_wavelengths() == 0 {
        return Err(PipelineError::empty_result(format!(
            "range filters left {} wavelengths x {} integrations",
            cube.n_wavelengths(),
            cube.n_times()
        )));
    }

    // (d) first kept integration becomes time zero
    let offset = cube.time_axis.first().copied().unwrap_or(0.0);
    if offset != 0.0 {
        cube.time_axis.iter_mut().for_each(|t| *t -= offset);
        debug!(offset_hours = offset, "time axis re-based");
    }
    report.time_offset_hours = offset;

    normalize(cube)?;
    report.plotted_integrations = observed_count(cube);
    Ok(report)
}

/// Light curve of one band: the NaN-ignoring mean over the band's rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandCurve {
    pub name: String,
    pub start: f64,
    pub end: f64,
    pub rows: usize,
    pub values: Vec<f64>,
}

pub fn band_light_curves(
    cube: &TimeSeriesCube,
    bands: &[Band],
    mode: DisplayMode,
) -> PipelineResult<Vec<BandCurve>> {
    let display = cube.display_values(mode);
    bands
        .iter()
        .map(|band| {
            band.validate()?;
            let rows: Vec<usize> = (0..cube.n_wavelengths())
                .filter(|&i| band.contains(cube.wavelength_axis[i]))
                .collect();
            let values = (0..cube.n_times())
                .map(|j| nan_mean(rows.iter().map(|&i| display[[i, j]])))
                .collect();
            Ok(BandCurve {
                name: band.name.clone(),
                start: band.start,
                end: band.end,
                rows: rows.len(),
                values,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use proptest::prelude::*;

    fn cube_5x4() -> TimeSeriesCube {
        let flux = Array2::from_shape_fn((5, 4), |(i, j)| 10.0 * (i + 1) as f64 + j as f64);
        let mut cube =
            TimeSeriesCube::new(vec![1.0, 2.0, 3.0, 4.0, 5.0], vec![0.0, 0.5, 1.0, 1.5], flux, None)
                .unwrap();
        normalize(&mut cube).unwrap();
        cube
    }

    #[test]
    fn test_wavelength_filter_is_exact_subset() {
        let mut cube = cube_5x4();
        let before = cube.flux.clone();
        let opts = ReduceOptions {
            wavelength_range: Some(Range::new(Some(2.0), Some(4.0))),
            ..Default::default()
        };
        let report = reduce(&mut cube, &opts).unwrap();
        assert_eq!(cube.wavelength_axis, vec![2.0, 3.0, 4.0]);
        assert_eq!(cube.flux.row(0), before.row(1));
        assert_eq!(cube.flux.row(2), before.row(3));
        assert_eq!(report.user_ranges, vec!["Wavelength: 2.000 - 4.000 um"]);
    }

    #[test]
    fn test_open_and_clamped_ranges() {
        let mut cube = cube_5x4();
        let opts = ReduceOptions {
            time_range: Some(Range::new(None, Some(0.75))),
            wavelength_range: Some(Range::new(Some(-10.0), None)),
            ..Default::default()
        };
        let report = reduce(&mut cube, &opts).unwrap();
        assert_eq!(cube.time_axis, vec![0.0, 0.5]);
        assert_eq!(cube.n_wavelengths(), 5);
        assert_eq!(
            report.user_ranges,
            vec!["Wavelength: 1.000 - 5.000 um", "Time: 0.00 - 0.75 hours"]
        );
    }

    #[test]
    fn test_time_filter_rebases_axis() {
        let mut cube =
            TimeSeriesCube::new(vec![1.0], vec![0.0, 1.0, 2.0, 3.0], array![[1.0, 2.0, 3.0, 4.0]], None)
                .unwrap();
        normalize(&mut cube).unwrap();
        let opts = ReduceOptions {
            time_range: Some(Range::new(Some(1.5), None)),
            ..Default::default()
        };
        let report = reduce(&mut cube, &opts).unwrap();
        assert_eq!(cube.time_axis, vec![0.0, 1.0]);
        assert_eq!(report.time_offset_hours, 2.0);
        assert_eq!(cube.flux, array![[3.0, 4.0]]);
    }

    #[test]
    fn test_unfiltered_axis_has_no_offset() {
        let mut cube = cube_5x4();
        let report = reduce(&mut cube, &ReduceOptions::default()).unwrap();
        assert_eq!(report.time_offset_hours, 0.0);
        assert_eq!(cube.time_axis, vec![0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn test_degenerate_range_ignored() {
        let mut cube = cube_5x4();
        let opts = ReduceOptions {
            wavelength_range: Some(Range::new(Some(4.0), Some(2.0))),
            ..Default::default()
        };
        let report = reduce(&mut cube, &opts).unwrap();
        assert_eq!(cube.n_wavelengths(), 5);
        assert!(report.user_ranges.is_empty());
    }

    #[test]
    fn test_value_range_keeps_rows_with_inside_cells() {
        let mut cube = TimeSeriesCube::new(
            vec![1.0, 2.0],
            vec![0.0, 1.0, 2.0],
            array![[1.0, 2.0, 3.0], [50.0, 60.0, 70.0]],
            None,
        )
        .unwrap();
        normalize(&mut cube).unwrap();
        let opts = ReduceOptions {
            value_range: Some(Range::new(Some(0.0), Some(10.0))),
            display_mode: DisplayMode::Flux,
            ..Default::default()
        };
        let report = reduce(&mut cube, &opts).unwrap();
        assert_eq!(cube.wavelength_axis, vec![1.0]);
        assert_eq!(cube.flux, array![[1.0, 2.0, 3.0]]);
        assert_eq!(report.user_ranges, vec!["Value: 1.00 - 10.00"]);
    }

    #[test]
    fn test_subsample_indices() {
        assert_eq!(subsample_indices(10, 4), vec![0, 2, 5, 7]);
        assert_eq!(subsample_indices(3, 5), vec![0, 1, 2]);
    }

    #[test]
    fn test_cap_records_subsampling() {
        let mut cube = cube_5x4();
        let opts = ReduceOptions {
            max_integrations: Some(2),
            ..Default::default()
        };
        let report = reduce(&mut cube, &opts).unwrap();
        assert!(report.subsampled);
        assert_eq!(report.total_integrations, 4);
        assert_eq!(report.plotted_integrations, 2);
        assert_eq!(cube.time_axis, vec![0.0, 1.0]);
    }

    #[test]
    fn test_median_bin() {
        let mut cube = cube_5x4();
        let opts = ReduceOptions {
            max_integrations: Some(2),
            cap_strategy: CapStrategy::MedianBin,
            ..Default::default()
        };
        reduce(&mut cube, &opts).unwrap();
        assert_eq!(cube.time_axis, vec![0.0, 1.0]);
        assert_relative_eq!(cube.flux[[0, 0]], 10.5);
        assert_relative_eq!(cube.flux[[0, 1]], 12.5);
    }

    #[test]
    fn test_smoothing_respects_segments_and_nan() {
        let mut values = array![[0.0, 0.0, 9.0, f64::NAN, 100.0, 100.0]];
        let segments = [Visit::new(0, 3), Visit::new(4, 5)];
        smooth_rows(&mut values, &segments, 1.0);
        assert!(values[[0, 3]].is_nan());
        assert_relative_eq!(values[[0, 4]], 100.0);
        assert_relative_eq!(values[[0, 5]], 100.0);
        assert!(values[[0, 1]] > 0.0 && values[[0, 1]] < 9.0);
    }

    #[test]
    fn test_zero_sigma_is_noop() {
        let mut values = array![[1.0, 5.0, 2.0]];
        smooth_rows(&mut values, &[Visit::new(0, 2)], 0.0);
        assert_eq!(values, array![[1.0, 5.0, 2.0]]);
    }

    #[test]
    fn test_band_light_curves() {
        let cube = cube_5x4();
        let bands = vec![Band {
            name: "blue".into(),
            start: 1.0,
            end: 2.0,
        }];
        let curves = band_light_curves(&cube, &bands, DisplayMode::Flux).unwrap();
        assert_eq!(curves[0].rows, 2);
        assert_eq!(curves[0].values, vec![15.0, 16.0, 17.0, 18.0]);

        let bad = vec![Band {
            name: "bad".into(),
            start: 3.0,
            end: 1.0,
        }];
        assert!(band_light_curves(&cube, &bad, DisplayMode::Flux).is_err());
    }

    proptest! {
        #[test]
        fn prop_subsample_is_increasing_and_capped(n in 1usize..500, cap in 1usize..600) {
            let idx = subsample_indices(n, cap);
            prop_assert_eq!(idx.len(), n.min(cap));
            prop_assert!(idx.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(idx.iter().all(|&i| i < n));
            prop_assert_eq!(idx[0], 0);
        }
    }
}
