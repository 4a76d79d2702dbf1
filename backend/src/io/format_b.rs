//! Format B reader: hierarchical array products (HDF5).
//!
//! Field names vary by producing pipeline, so every dataset is located through
//! the candidate tables in [`keys::format_b`]. The reader works against the
//! [`ArrayGroup`] trait; the HDF5 backend sits behind the default `hdf5`
//! feature.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use ndarray::{ArrayD, Axis, Ix1, Ix2, IxDyn};
use tracing::{info, warn};

use super::keys::{self, Candidate};
use super::{ProgressCallback, ReadOptions};
use crate::error::{ErrorContext, PipelineError, PipelineResult};
use crate::models::{meta_keys, FormatFamily, Integration, ModifiedJulianDate, SourceFile, UNKNOWN};

const OPERATION: &str = "read_format_b";

/// Read-only access to named numeric arrays.
pub trait ArrayGroup {
    fn contains(&self, key: &str) -> bool;

    /// Whole array converted to `f64`, in its stored shape.
    fn read(&self, key: &str) -> PipelineResult<ArrayD<f64>>;
}

/// Arrays held in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MemoryGroup {
    arrays: HashMap<String, ArrayD<f64>>,
}

impl MemoryGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, array: ArrayD<f64>) -> &mut Self {
        self.arrays.insert(key.into(), array);
        self
    }
}

impl ArrayGroup for MemoryGroup {
    fn contains(&self, key: &str) -> bool {
        self.arrays.contains_key(key)
    }

    fn read(&self, key: &str) -> PipelineResult<ArrayD<f64>> {
        self.arrays.get(key).cloned().ok_or_else(|| {
            PipelineError::corrupt(
                format!("dataset '{}' vanished", key),
                ErrorContext::new(OPERATION),
            )
        })
    }
}

#[cfg(feature = "hdf5")]
mod h5 {
    use super::*;

    pub struct H5Group {
        file: hdf5::File,
    }

    impl H5Group {
        pub fn open(path: &Path) -> PipelineResult<Self> {
            let file = hdf5::File::open(path).map_err(|e| {
                PipelineError::corrupt(e.to_string(), ErrorContext::new(OPERATION).with_file(path))
            })?;
            Ok(Self { file })
        }
    }

    impl ArrayGroup for H5Group {
        fn contains(&self, key: &str) -> bool {
            self.file.link_exists(key)
        }

        fn read(&self, key: &str) -> PipelineResult<ArrayD<f64>> {
            let ctx = || ErrorContext::new(OPERATION).with_details(format!("dataset {}", key));
            let dataset = self
                .file
                .dataset(key)
                .map_err(|e| PipelineError::corrupt(e.to_string(), ctx()))?;
            let shape = dataset.shape();
            let data = dataset
                .read_raw::<f64>()
                .map_err(|e| PipelineError::corrupt(e.to_string(), ctx()))?;
            ArrayD::from_shape_vec(IxDyn(&shape), data)
                .map_err(|e| PipelineError::corrupt(e.to_string(), ctx()))
        }
    }
}

/// Open `path` with the HDF5 backend and read it.
#[cfg(feature = "hdf5")]
pub fn read(
    path: &Path,
    options: &ReadOptions,
    on_integration: &mut ProgressCallback<'_>,
) -> PipelineResult<SourceFile> {
    let group = h5::H5Group::open(path)?;
    read_group(path, &group, options, on_integration)
}

/// Builds without the `hdf5` feature report every Format B file as unsupported.
#[cfg(not(feature = "hdf5"))]
pub fn read(
    path: &Path,
    _options: &ReadOptions,
    _on_integration: &mut ProgressCallback<'_>,
) -> PipelineResult<SourceFile> {
    Err(PipelineError::unsupported(
        "HDF5 support not compiled in",
        ErrorContext::new(OPERATION).with_file(path),
    ))
}

/// Extract integrations from an already-open group.
pub fn read_group(
    path: &Path,
    group: &dyn ArrayGroup,
    options: &ReadOptions,
    on_integration: &mut ProgressCallback<'_>,
) -> PipelineResult<SourceFile> {
    let ctx = || ErrorContext::new(OPERATION).with_file(path);
    let present = |k: &str| group.contains(k);

    let flux_key = keys::format_b::FLUX.require(present, ctx())?;
    let wave_key = keys::format_b::WAVELENGTH.require(present, ctx())?;
    let time_key = keys::format_b::TIME.require(present, ctx())?;
    let err_key = keys::format_b::ERROR.resolve(present);

    let flux = read_key(group, flux_key, path)?
        .into_dimensionality::<Ix2>()
        .map_err(|_| PipelineError::unsupported(format!("'{}' is not 2-D", flux_key.key), ctx()))?;
    let (n_int, n_wave) = flux.dim();

    let wave = read_key(group, wave_key, path)?;
    let wave = match wave.ndim() {
        1 if wave.len() == n_wave => wave
            .into_dimensionality::<Ix1>()
            .map_err(|e| PipelineError::internal(e.to_string(), ctx()))?
            .insert_axis(Axis(0))
            .broadcast((n_int, n_wave))
            .map(|v| v.to_owned())
            .ok_or_else(|| PipelineError::internal("wavelength broadcast failed", ctx()))?,
        2 if wave.shape() == [n_int, n_wave] => wave
            .into_dimensionality::<Ix2>()
            .map_err(|e| PipelineError::internal(e.to_string(), ctx()))?,
        _ => {
            return Err(PipelineError::unsupported(
                format!(
                    "'{}' has shape {:?}, expected [{}] or [{}, {}]",
                    wave_key.key,
                    wave.shape(),
                    n_wave,
                    n_int,
                    n_wave
                ),
                ctx(),
            ))
        }
    };

    let time = read_key(group, time_key, path)?;
    if time.len() != n_int {
        return Err(PipelineError::unsupported(
            format!("'{}' has {} entries for {} integrations", time_key.key, time.len(), n_int),
            ctx(),
        ));
    }
    let time: Vec<f64> = time.iter().copied().collect();

    let error = match err_key {
        Some(c) => {
            let err = read_key(group, c, path)?;
            if err.shape() != [n_int, n_wave] {
                return Err(PipelineError::unsupported(
                    format!("'{}' has shape {:?}, flux is [{}, {}]", c.key, err.shape(), n_int, n_wave),
                    ctx(),
                ));
            }
            err.into_dimensionality::<Ix2>().ok()
        }
        None => None,
    };

    let mut integrations = Vec::with_capacity(n_int);
    for i in 0..n_int {
        let w = wave.row(i).to_vec();
        let f = flux.row(i).to_vec();
        let e = error.as_ref().map(|e| e.row(i).to_vec());
        if !time[i].is_finite() {
            warn!(file = %path.display(), integration = i + 1, "skipping integration with non-finite time");
        } else {
            match Integration::from_raw(
                &w,
                &f,
                e.as_deref(),
                ModifiedJulianDate::new(time[i]),
                options.min_valid_points,
            ) {
                Some(integration) => integrations.push(integration),
                None => warn!(
                    file = %path.display(),
                    integration = i + 1,
                    "skipping integration with too few valid points"
                ),
            }
        }
        on_integration(i + 1, n_int)?;
    }

    if integrations.is_empty() {
        return Err(PipelineError::unsupported("no usable integrations", ctx()));
    }
    info!(
        file = %path.display(),
        integrations = integrations.len(),
        flux = flux_key.key,
        wavelength = wave_key.key,
        "loaded integrations"
    );

    let metadata: BTreeMap<String, String> = [
        meta_keys::TARGET,
        meta_keys::INSTRUMENT,
        meta_keys::FILTER,
        meta_keys::GRATING,
        meta_keys::OBS_DATE,
        meta_keys::EXPOSURE_TIME,
        meta_keys::FLUX_UNIT,
    ]
    .into_iter()
    .map(|k| (k.to_string(), UNKNOWN.to_string()))
    .collect();

    Ok(SourceFile {
        path: path.to_path_buf(),
        format: FormatFamily::FormatB,
        integrations,
        metadata,
    })
}

/// Read a resolved dataset and bring it to canonical units.
fn read_key(group: &dyn ArrayGroup, candidate: &Candidate, path: &Path) -> PipelineResult<ArrayD<f64>> {
    let mut array = group
        .read(candidate.key)
        .map_err(|e| e.in_file(path))?
        .as_standard_layout()
        .into_owned();
    if let Some(values) = array.as_slice_mut() {
        candidate.normalize(values);
    }
    Ok(array)
}

/// Build an array of the given shape for [`MemoryGroup`] fixtures.
pub fn array(shape: &[usize], values: Vec<f64>) -> PipelineResult<ArrayD<f64>> {
    ArrayD::from_shape_vec(IxDyn(shape), values)
        .map_err(|e| PipelineError::internal(e.to_string(), ErrorContext::new(OPERATION)))
}
