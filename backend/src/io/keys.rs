//! Key Resolver: maps producer-specific field names onto canonical fields.
//!
//! Each logical field has an ordered candidate list per format family; the
//! first candidate present in a file wins. Candidates also declare the unit
//! their values arrive in, so variance products are converted to standard
//! deviations exactly once, at resolution time.

use crate::error::{ErrorContext, PipelineError, PipelineResult};

/// Quantity carried by an error-like field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueUnit {
    /// Values are used as-is.
    Direct,
    /// Values are variances; expose `sqrt(v)`.
    Variance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub key: &'static str,
    pub unit: ValueUnit,
}

const fn direct(key: &'static str) -> Candidate {
    Candidate {
        key,
        unit: ValueUnit::Direct,
    }
}

const fn variance(key: &'static str) -> Candidate {
    Candidate {
        key,
        unit: ValueUnit::Variance,
    }
}

/// Ordered candidates for one canonical field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub field: &'static str,
    pub candidates: &'static [Candidate],
}

impl FieldSpec {
    /// First candidate for which `present` returns true.
    pub fn resolve(&self, present: impl Fn(&str) -> bool) -> Option<&'static Candidate> {
        self.candidates.iter().find(|c| present(c.key))
    }

    /// Like [`resolve`](Self::resolve) but a total miss is a
    /// [`PipelineError::FieldResolution`].
    pub fn require(
        &self,
        present: impl Fn(&str) -> bool,
        context: ErrorContext,
    ) -> PipelineResult<&'static Candidate> {
        self.resolve(present)
            .ok_or_else(|| PipelineError::field_missing(self.field, &self.tried(), context))
    }

    pub fn tried(&self) -> Vec<&'static str> {
        self.candidates.iter().map(|c| c.key).collect()
    }
}

impl Candidate {
    /// Convert raw values to the canonical unit in place.
    pub fn normalize(&self, values: &mut [f64]) {
        if self.unit == ValueUnit::Variance {
            for v in values.iter_mut() {
                *v = v.sqrt();
            }
        }
    }
}

/// Format A (FITS `x1dints`) fields.
pub mod format_a {
    use super::*;

    pub const WAVELENGTH: FieldSpec = FieldSpec {
        field: "wavelength",
        candidates: &[direct("WAVELENGTH")],
    };

    pub const FLUX: FieldSpec = FieldSpec {
        field: "flux",
        candidates: &[direct("FLUX")],
    };

    pub const ERROR: FieldSpec = FieldSpec {
        field: "error",
        candidates: &[direct("FLUX_ERROR"), variance("FLUX_VAR_POISSON")],
    };

    /// Per-row time stored inside the EXTRACT1D table.
    pub const TABLE_TIME: FieldSpec = FieldSpec {
        field: "time",
        candidates: &[direct("MJD-AVG"), direct("MJD-BEG"), direct("MJD-END")],
    };

    /// Integration mid-times in the INT_TIMES extension.
    pub const INT_MID_TIME: FieldSpec = FieldSpec {
        field: "integration time",
        candidates: &[direct("int_mid_MJD_UTC"), direct("int_mid_BJD_TDB")],
    };
}

/// Format B (hierarchical arrays) fields.
pub mod format_b {
    use super::*;

    pub const FLUX: FieldSpec = FieldSpec {
        field: "flux",
        candidates: &[direct("calibrated_optspec"), direct("stdspec"), direct("optspec")],
    };

    pub const WAVELENGTH: FieldSpec = FieldSpec {
        field: "wavelength",
        candidates: &[
            direct("eureka_wave_1d"),
            direct("wave_1d"),
            direct("wavelength"),
            direct("wave"),
        ],
    };

    pub const TIME: FieldSpec = FieldSpec {
        field: "time",
        candidates: &[
            direct("time"),
            direct("bmjd"),
            direct("mjd"),
            direct("bjd"),
            direct("time_bjd"),
            direct("time_mjd"),
        ],
    };

    pub const ERROR: FieldSpec = FieldSpec {
        field: "error",
        candidates: &[
            direct("calibrated_opterr"),
            variance("stdvar"),
            direct("error"),
            direct("flux_error"),
            direct("sigma"),
        ],
    };
}
