//! The assembled wavelength × time data cube.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorContext, PipelineError, PipelineResult};

/// Canonical assembled result.
///
/// `flux` and `error` are `[wavelength × time]`. Cells may be NaN (missing);
/// axes never are. `interpolated[j]` marks time columns manufactured by the
/// gap interpolator rather than observed.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesCube {
    pub wavelength_axis: Vec<f64>,
    pub time_axis: Vec<f64>,
    pub flux: Array2<f64>,
    pub error: Option<Array2<f64>>,
    pub reference_spectrum: Vec<f64>,
    pub interpolated: Vec<bool>,
}

/// Which quantity the emitted surface shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Percentage deviation from the reference spectrum.
    #[default]
    Variability,
    /// Raw flux in the file's flux unit.
    Flux,
}

impl TimeSeriesCube {
    /// Build a cube, checking every shape invariant. The reference spectrum
    /// starts empty; the normalizer fills it.
    pub fn new(
        wavelength_axis: Vec<f64>,
        time_axis: Vec<f64>,
        flux: Array2<f64>,
        error: Option<Array2<f64>>,
    ) -> PipelineResult<Self> {
        let n_time = time_axis.len();
        let cube = Self {
            wavelength_axis,
            time_axis,
            flux,
            error,
            reference_spectrum: Vec::new(),
            interpolated: vec![false; n_time],
        };
        cube.validate("build_cube")?;
        Ok(cube)
    }

    pub fn n_wavelengths(&self) -> usize {
        self.wavelength_axis.len()
    }

    pub fn n_times(&self) -> usize {
        self.time_axis.len()
    }

    /// Check the cross-stage shape invariants.
    ///
    /// A violation is an internal defect and is reported as
    /// [`PipelineError::Internal`] naming the stage.
    pub fn validate(&self, stage: &str) -> PipelineResult<()> {
        let ctx = || ErrorContext::new(stage.to_string());
        let (rows, cols) = self.flux.dim();
        if rows != self.wavelength_axis.len() || cols != self.time_axis.len() {
            return Err(PipelineError::internal(
                format!(
                    "flux is {}x{} but axes are {}x{}",
                    rows,
                    cols,
                    self.wavelength_axis.len(),
                    self.time_axis.len()
                ),
                ctx(),
            ));
        }
        if let Some(err) = &self.error {
            if err.dim() != (rows, cols) {
                return Err(PipelineError::internal(
                    format!("error is {:?} but flux is {:?}", err.dim(), (rows, cols)),
                    ctx(),
                ));
            }
        }
        if !self.reference_spectrum.is_empty() && self.reference_spectrum.len() != rows {
            return Err(PipelineError::internal(
                format!(
                    "reference spectrum has {} values for {} wavelengths",
                    self.reference_spectrum.len(),
                    rows
                ),
                ctx(),
            ));
        }
        if self.interpolated.len() != cols {
            return Err(PipelineError::internal(
                format!("interpolation mask has {} entries for {} columns", self.interpolated.len(), cols),
                ctx(),
            ));
        }
        if self.wavelength_axis.iter().chain(&self.time_axis).any(|v| !v.is_finite()) {
            return Err(PipelineError::internal("axis contains a non-finite value", ctx()));
        }
        if self.wavelength_axis.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PipelineError::internal("wavelength axis is not strictly increasing", ctx()));
        }
        if self.time_axis.windows(2).any(|w| w[0] > w[1]) {
            return Err(PipelineError::internal("time axis is decreasing", ctx()));
        }
        Ok(())
    }

    /// Variability surface: `100 × (flux / reference − 1)`.
    ///
    /// Reference values that are zero or NaN yield NaN cells.
    pub fn variability(&self) -> Array2<f64> {
        self.relative_to_reference(&self.flux, |f, r| 100.0 * (f / r - 1.0))
    }

    /// Uncertainty in variability units: `100 × error / reference`.
    pub fn variability_error(&self) -> Option<Array2<f64>> {
        self.error
            .as_ref()
            .map(|err| self.relative_to_reference(err, |e, r| 100.0 * e / r))
    }

    /// Surface in the requested display mode.
    pub fn display_values(&self, mode: DisplayMode) -> Array2<f64> {
        match mode {
            DisplayMode::Flux => self.flux.clone(),
            DisplayMode::Variability => self.variability(),
        }
    }

    fn relative_to_reference(&self, values: &Array2<f64>, op: impl Fn(f64, f64) -> f64) -> Array2<f64> {
        let mut out = values.clone();
        for (i, mut row) in out.axis_iter_mut(Axis(0)).enumerate() {
            let r = self.reference_spectrum.get(i).copied().unwrap_or(f64::NAN);
            if r == 0.0 || !r.is_finite() {
                row.fill(f64::NAN);
            } else {
                row.mapv_inplace(|v| op(v, r));
            }
        }
        out
    }

    /// Keep only the given time columns, in order.
    pub fn select_columns(&mut self, indices: &[usize]) {
        self.flux = self.flux.select(Axis(1), indices);
        if let Some(err) = &self.error {
            self.error = Some(err.select(Axis(1), indices));
        }
        self.time_axis = indices.iter().map(|&j| self.time_axis[j]).collect();
        self.interpolated = indices.iter().map(|&j| self.interpolated[j]).collect();
    }

    /// Keep only the given wavelength rows, in order.
    pub fn select_rows(&mut self, indices: &[usize]) {
        self.flux = self.flux.select(Axis(0), indices);
        if let Some(err) = &self.error {
            self.error = Some(err.select(Axis(0), indices));
        }
        self.wavelength_axis = indices.iter().map(|&i| self.wavelength_axis[i]).collect();
        if !self.reference_spectrum.is_empty() {
            self.reference_spectrum = indices.iter().map(|&i| self.reference_spectrum[i]).collect();
        }
    }

    /// One time column of flux as an owned vector.
    pub fn spectrum_at(&self, column: usize) -> Option<Array1<f64>> {
        (column < self.n_times()).then(|| self.flux.column(column).to_owned())
    }

    /// `(min, max)` of the wavelength axis.
    pub fn wavelength_range(&self) -> Option<(f64, f64)> {
        Some((*self.wavelength_axis.first()?, *self.wavelength_axis.last()?))
    }

    /// `(min, max)` of the time axis.
    pub fn time_range(&self) -> Option<(f64, f64)> {
        Some((*self.time_axis.first()?, *self.time_axis.last()?))
    }
}

/// A contiguous run of time-axis indices, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub start_index: usize,
    pub end_index: usize,
}

impl Visit {
    pub fn new(start_index: usize, end_index: usize) -> Self {
        Self {
            start_index,
            end_index,
        }
    }

    pub fn len(&self) -> usize {
        self.end_index - self.start_index + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start_index..=self.end_index).contains(&index)
    }
}

/// A user-declared wavelength interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub start: f64,
    pub end: f64,
}

impl Band {
    pub fn contains(&self, wavelength: f64) -> bool {
        wavelength >= self.start && wavelength <= self.end
    }

    /// Bands need finite bounds with `start < end`.
    pub fn validate(&self) -> PipelineResult<()> {
        if !(self.start.is_finite() && self.end.is_finite()) || self.start >= self.end {
            return Err(PipelineError::invalid_options(format!(
                "band '{}' must have finite start < end (got {} - {})",
                self.name, self.start, self.end
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample_cube() -> TimeSeriesCube {
        let mut cube = TimeSeriesCube::new(
            vec![1.0, 2.0],
            vec![0.0, 1.0, 2.0],
            array![[1.0, 2.0, 3.0], [0.0, 0.0, 0.0]],
            Some(array![[0.1, 0.2, 0.3], [0.1, 0.1, 0.1]]),
        )
        .unwrap();
        cube.reference_spectrum = vec![2.0, 0.0];
        cube
    }

    #[test]
    fn test_new_rejects_shape_mismatch() {
        let err = TimeSeriesCube::new(vec![1.0], vec![0.0, 1.0], Array2::zeros((2, 2)), None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }

    #[test]
    fn test_new_rejects_unsorted_wavelengths() {
        let err = TimeSeriesCube::new(vec![2.0, 1.0], vec![0.0], Array2::zeros((2, 1)), None).unwrap_err();
        assert!(err.to_string().contains("strictly increasing"));
    }

    #[test]
    fn test_variability_zero_reference_is_nan() {
        let cube = sample_cube();
        let v = cube.variability();
        assert_eq!(v[[0, 0]], -50.0);
        assert_eq!(v[[0, 1]], 0.0);
        assert_eq!(v[[0, 2]], 50.0);
        assert!(v.row(1).iter().all(|x| x.is_nan()));
    }

    #[test]
    fn test_variability_error_scales_by_reference() {
        let cube = sample_cube();
        let e = cube.variability_error().unwrap();
        assert!((e[[0, 1]] - 10.0).abs() < 1e-12);
        assert!(e[[1, 0]].is_nan());
    }

    #[test]
    fn test_select_columns_keeps_shapes_aligned() {
        let mut cube = sample_cube();
        cube.select_columns(&[0, 2]);
        assert_eq!(cube.time_axis, vec![0.0, 2.0]);
        assert_eq!(cube.flux, array![[1.0, 3.0], [0.0, 0.0]]);
        assert_eq!(cube.error.as_ref().unwrap().dim(), (2, 2));
        cube.validate("test").unwrap();
    }

    #[test]
    fn test_select_rows_trims_reference() {
        let mut cube = sample_cube();
        cube.select_rows(&[1]);
        assert_eq!(cube.wavelength_axis, vec![2.0]);
        assert_eq!(cube.reference_spectrum, vec![0.0]);
        cube.validate("test").unwrap();
    }

    #[test]
    fn test_visit_len_and_contains() {
        let v = Visit::new(5, 9);
        assert_eq!(v.len(), 5);
        assert!(v.contains(5) && v.contains(9));
        assert!(!v.contains(4) && !v.contains(10));
    }

    #[test]
    fn test_band_validation() {
        let good = Band { name: "H2O".into(), start: 1.3, end: 1.5 };
        assert!(good.validate().is_ok());
        assert!(good.contains(1.3) && good.contains(1.5) && !good.contains(1.6));
        let bad = Band { name: "bad".into(), start: 2.0, end: 2.0 };
        assert!(bad.validate().is_err());
    }
}
