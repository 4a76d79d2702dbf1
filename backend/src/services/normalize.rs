//! Normalizer: per-wavelength reference (median) spectrum.

use ndarray::Axis;
use tracing::debug;

use crate::error::PipelineResult;
use crate::models::TimeSeriesCube;

/// Median of the finite values, or NaN when there are none.
pub fn nan_median(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.sort_by(f64::total_cmp);
    let mid = finite.len() / 2;
    if finite.len() % 2 == 1 {
        finite[mid]
    } else {
        (finite[mid - 1] + finite[mid]) / 2.0
    }
}

/// Mean of the finite values, or NaN when there are none.
pub fn nan_mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Recompute `reference_spectrum` from the observed (non-synthetic) columns.
///
/// Flux is left untouched; variability stays derivable through
/// [`TimeSeriesCube::variability`].
pub fn normalize(cube: &mut TimeSeriesCube) -> PipelineResult<()> {
    let observed: Vec<usize> = (0..cube.n_times()).filter(|&j| !cube.interpolated[j]).collect();
    cube.reference_spectrum = cube
        .flux
        .axis_iter(Axis(0))
        .map(|row| nan_median(observed.iter().map(|&j| row[j])))
        .collect();

    let undefined = cube.reference_spectrum.iter().filter(|r| !r.is_finite() || **r == 0.0).count();
    debug!(
        wavelengths = cube.n_wavelengths(),
        undefined_reference = undefined,
        "reference spectrum computed"
    );
    cube.validate("normalize")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_nan_median() {
        assert_eq!(nan_median([3.0, 1.0, 2.0]), 2.0);
        assert_eq!(nan_median([4.0, 1.0, f64::NAN, 2.0, 3.0]), 2.5);
        assert!(nan_median([f64::NAN]).is_nan());
        assert!(nan_median(Vec::<f64>::new()).is_nan());
    }

    #[test]
    fn test_nan_mean() {
        assert_eq!(nan_mean([1.0, f64::NAN, 3.0]), 2.0);
        assert!(nan_mean([f64::NAN]).is_nan());
    }

    #[test]
    fn test_variability_zero_at_median_column() {
        let mut cube = TimeSeriesCube::new(
            vec![1.0, 2.0],
            vec![0.0, 1.0, 2.0],
            array![[10.0, 12.0, 11.0], [5.0, f64::NAN, 4.0]],
            None,
        )
        .unwrap();
        normalize(&mut cube).unwrap();
        assert_eq!(cube.reference_spectrum, vec![11.0, 4.5]);
        let v = cube.variability();
        assert_eq!(v[[0, 2]], 0.0);
        assert!(v[[1, 1]].is_nan());
    }

    #[test]
    fn test_synthetic_columns_excluded_from_reference() {
        let mut cube =
            TimeSeriesCube::new(vec![1.0], vec![0.0, 1.0, 2.0], array![[1.0, 100.0, 3.0]], None).unwrap();
        cube.interpolated = vec![false, true, false];
        normalize(&mut cube).unwrap();
        assert_eq!(cube.reference_spectrum, vec![2.0]);
    }

    #[test]
    fn test_all_nan_row_reference_is_nan() {
        let mut cube =
            TimeSeriesCube::new(vec![1.0], vec![0.0, 1.0], array![[f64::NAN, f64::NAN]], None).unwrap();
        normalize(&mut cube).unwrap();
        assert!(cube.reference_spectrum[0].is_nan());
        assert!(cube.variability().iter().all(|v| v.is_nan()));
    }
}
