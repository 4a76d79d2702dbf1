//! Time-Series Assembler: concatenates regridded integrations into the cube.

use ndarray::{Array2, ArrayView1};
use tracing::info;

use super::regrid::GridColumn;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{ModifiedJulianDate, TimeSeriesCube};

/// Assembled cube plus the absolute time of its first column.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub cube: TimeSeriesCube,
    pub start_time: ModifiedJulianDate,
}

/// Build the cube from columns given in file-then-intra-file order.
///
/// Columns are stably sorted by time, so equal timestamps keep their input
/// order. The time axis is hours since the earliest column. The error matrix
/// is present iff at least one column carried errors; columns without errors
/// contribute NaN.
pub fn assemble(mut columns: Vec<GridColumn>, wavelength: Vec<f64>) -> PipelineResult<Assembled> {
    if columns.is_empty() {
        return Err(PipelineError::empty_result("no integrations survived reading and regridding"));
    }
    columns.sort_by(|a, b| a.time.value().total_cmp(&b.time.value()));

    let start_time = columns[0].time;
    let n_wave = wavelength.len();
    let n_time = columns.len();
    let time_axis: Vec<f64> = columns.iter().map(|c| c.time.hours_since(start_time)).collect();

    let mut flux = Array2::from_elem((n_wave, n_time), f64::NAN);
    let has_error = columns.iter().any(|c| c.error.is_some());
    let mut error = has_error.then(|| Array2::from_elem((n_wave, n_time), f64::NAN));

    for (j, col) in columns.iter().enumerate() {
        if col.flux.len() != n_wave {
            return Err(PipelineError::internal(
                format!("column {} has {} samples for a {}-point grid", j, col.flux.len(), n_wave),
                crate::error::ErrorContext::new("assemble"),
            ));
        }
        flux.column_mut(j).assign(&ArrayView1::from(col.flux.as_slice()));
        if let (Some(err), Some(values)) = (error.as_mut(), col.error.as_ref()) {
            err.column_mut(j).assign(&ArrayView1::from(values.as_slice()));
        }
    }

    if !flux.iter().any(|v| v.is_finite()) {
        return Err(PipelineError::empty_result("every integration produced only missing data"));
    }

    let cube = TimeSeriesCube::new(wavelength, time_axis, flux, error)?;
    info!(
        wavelengths = cube.n_wavelengths(),
        integrations = cube.n_times(),
        has_error,
        "cube assembled"
    );
    Ok(Assembled { cube, start_time })
}
