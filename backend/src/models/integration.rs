//! Per-exposure spectra and the files they come from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use super::time::ModifiedJulianDate;

/// Supported observation file families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatFamily {
    /// Tabular binary science format (FITS `x1dints` products).
    FormatA,
    /// Hierarchical array format (HDF5 light-curve fitting products).
    FormatB,
}

impl fmt::Display for FormatFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatFamily::FormatA => f.write_str("FITS"),
            FormatFamily::FormatB => f.write_str("HDF5"),
        }
    }
}

/// One exposure's measured spectrum.
///
/// `wavelength` is strictly increasing and finite once the format readers have
/// cleaned it. `error`, when present, has the same length as `flux`.
#[derive(Debug, Clone, PartialEq)]
pub struct Integration {
    pub wavelength: Vec<f64>,
    pub flux: Vec<f64>,
    pub error: Option<Vec<f64>>,
    pub time: ModifiedJulianDate,
}

impl Integration {
    /// Native wavelength domain as `(min, max)`.
    pub fn domain(&self) -> Option<(f64, f64)> {
        match (self.wavelength.first(), self.wavelength.last()) {
            (Some(lo), Some(hi)) => Some((*lo, *hi)),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.wavelength.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelength.is_empty()
    }

    /// Build an integration from raw columns, masking non-finite samples and
    /// sorting by wavelength. Duplicate wavelengths keep their first sample.
    ///
    /// Returns `None` when fewer than `min_valid` samples survive.
    pub fn from_raw(
        wavelength: &[f64],
        flux: &[f64],
        error: Option<&[f64]>,
        time: ModifiedJulianDate,
        min_valid: usize,
    ) -> Option<Self> {
        let n = wavelength.len().min(flux.len());
        let mut samples: Vec<(f64, f64, f64)> = (0..n)
            .filter(|&i| wavelength[i].is_finite() && flux[i].is_finite())
            .map(|i| {
                let e = error.and_then(|e| e.get(i).copied()).unwrap_or(f64::NAN);
                (wavelength[i], flux[i], e)
            })
            .collect();

        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        samples.dedup_by(|later, earlier| later.0 == earlier.0);

        if samples.len() < min_valid.max(1) {
            return None;
        }

        let wavelength = samples.iter().map(|s| s.0).collect();
        let flux = samples.iter().map(|s| s.1).collect();
        let error = error.map(|_| samples.iter().map(|s| s.2).collect());

        Some(Self {
            wavelength,
            flux,
            error,
            time,
        })
    }
}

/// One archive member after parsing.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub format: FormatFamily,
    pub integrations: Vec<Integration>,
    /// Best-effort header values (instrument, filter, grating, target, ...).
    pub metadata: BTreeMap<String, String>,
}

impl SourceFile {
    /// Timestamp of the first integration, the file ordering key.
    pub fn first_time(&self) -> Option<ModifiedJulianDate> {
        self.integrations.first().map(|i| i.time)
    }

    pub fn display_name(&self) -> String {
        crate::error::display_name(&self.path)
    }

    /// Look up a metadata value, treating `Unknown` as absent.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty() && *v != UNKNOWN)
    }
}

/// Placeholder used for metadata a file does not carry.
pub const UNKNOWN: &str = "Unknown";

/// Metadata keys populated by the format readers.
pub mod meta_keys {
    pub const TARGET: &str = "target";
    pub const INSTRUMENT: &str = "instrument";
    pub const FILTER: &str = "filter";
    pub const GRATING: &str = "grating";
    pub const OBS_DATE: &str = "obs_date";
    pub const EXPOSURE_TIME: &str = "exposure_time";
    pub const FLUX_UNIT: &str = "flux_unit";
}
