//! Grid Reconciler.
//!
//! Picks one reference wavelength grid for the whole archive and linearly
//! interpolates every integration onto it. Values outside an integration's
//! native domain are NaN; nothing is extrapolated.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::{ErrorContext, PipelineError, PipelineResult};
use crate::io::ProgressCallback;
use crate::models::{Integration, ModifiedJulianDate, SourceFile};

/// Relative tolerance under which two native grids count as identical.
const GRID_TOLERANCE: f64 = 1e-9;

pub const DEFAULT_OVERLAP_POINTS: usize = 1000;

/// How the reference wavelength grid is chosen.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum GridPolicy {
    /// The grid shared by the most integrations; ties go to the one seen first.
    #[default]
    Majority,
    /// The first integration's grid.
    First,
    /// A caller-supplied strictly increasing grid.
    Canonical { grid: Vec<f64> },
    /// Evenly spaced samples over the intersection of all native domains.
    Overlap { points: usize },
}

impl fmt::Display for GridPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridPolicy::Majority => f.write_str("majority"),
            GridPolicy::First => f.write_str("first"),
            GridPolicy::Canonical { grid } => write!(f, "canonical({} points)", grid.len()),
            GridPolicy::Overlap { points } => write!(f, "overlap({} points)", points),
        }
    }
}

impl GridPolicy {
    pub fn validate(&self) -> PipelineResult<()> {
        match self {
            GridPolicy::Canonical { grid } => {
                if grid.is_empty() {
                    return Err(PipelineError::invalid_options("canonical grid is empty"));
                }
                if grid.iter().any(|v| !v.is_finite()) || grid.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(PipelineError::invalid_options(
                        "canonical grid must be finite and strictly increasing",
                    ));
                }
            }
            GridPolicy::Overlap { points } if *points < 2 => {
                return Err(PipelineError::invalid_options("overlap grid needs at least 2 points"));
            }
            _ => {}
        }
        Ok(())
    }
}

/// One integration resampled onto the reference grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridColumn {
    pub time: ModifiedJulianDate,
    pub flux: Vec<f64>,
    pub error: Option<Vec<f64>>,
}

fn same_grid(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| (x - y).abs() <= GRID_TOLERANCE * x.abs().max(y.abs()))
}

/// Choose the reference grid across all files' integrations.
pub fn select_reference_grid(files: &[SourceFile], policy: &GridPolicy) -> PipelineResult<Vec<f64>> {
    policy.validate()?;
    let mut integrations = files.iter().flat_map(|f| f.integrations.iter());

    let grid = match policy {
        GridPolicy::Canonical { grid } => grid.clone(),
        GridPolicy::First => integrations
            .next()
            .map(|i| i.wavelength.clone())
            .ok_or_else(|| PipelineError::empty_result("no integrations to take a grid from"))?,
        GridPolicy::Majority => {
            let mut groups: Vec<(&[f64], usize)> = Vec::new();
            for integ in integrations {
                match groups.iter_mut().find(|(g, _)| same_grid(g, &integ.wavelength)) {
                    Some((_, count)) => *count += 1,
                    None => groups.push((integ.wavelength.as_slice(), 1)),
                }
            }
            if groups.len() > 1 {
                warn!(
                    grids = groups.len(),
                    counts = ?groups.iter().map(|(_, c)| *c).collect::<Vec<_>>(),
                    "integrations disagree on wavelength grid; using the most common"
                );
            }
            let mut best: Option<(&[f64], usize)> = None;
            for (grid, count) in groups {
                if best.map_or(true, |(_, c)| count > c) {
                    best = Some((grid, count));
                }
            }
            best.map(|(g, _)| g.to_vec())
                .ok_or_else(|| PipelineError::empty_result("no integrations to take a grid from"))?
        }
        GridPolicy::Overlap { points } => {
            let mut lo = f64::NEG_INFINITY;
            let mut hi = f64::INFINITY;
            let mut seen = false;
            for (a, b) in integrations.filter_map(Integration::domain) {
                lo = lo.max(a);
                hi = hi.min(b);
                seen = true;
            }
            if !seen {
                return Err(PipelineError::empty_result("no integrations to take a grid from"));
            }
            if lo >= hi {
                return Err(PipelineError::domain_empty(
                    format!("native wavelength domains share no overlap ({} >= {})", lo, hi),
                    ErrorContext::new("select_reference_grid"),
                ));
            }
            let step = (hi - lo) / (*points - 1) as f64;
            (0..*points).map(|i| lo + step * i as f64).collect()
        }
    };

    info!(policy = %policy, points = grid.len(), "reference grid selected");
    Ok(grid)
}

/// Linear interpolation of `(x, y)` at each `grid` point.
///
/// `x` must be strictly increasing. Grid points outside `[x0, xn]` are NaN;
/// a NaN neighbour poisons the interpolated value.
pub fn interpolate(x: &[f64], y: &[f64], grid: &[f64]) -> Vec<f64> {
    let (Some(&lo), Some(&hi)) = (x.first(), x.last()) else {
        return vec![f64::NAN; grid.len()];
    };
    grid.iter()
        .map(|&g| {
            if !(lo..=hi).contains(&g) {
                return f64::NAN;
            }
            let k = x.partition_point(|&v| v < g);
            if k < x.len() && x[k] == g {
                return y[k];
            }
            // lo < g < hi, so 1 <= k < len
            let (x0, x1, y0, y1) = (x[k - 1], x[k], y[k - 1], y[k]);
            y0 + (y1 - y0) * (g - x0) / (x1 - x0)
        })
        .collect()
}

/// Resample one integration, or `None` when its domain misses the grid.
pub fn regrid_integration(integ: &Integration, grid: &[f64]) -> Option<GridColumn> {
    let (lo, hi) = integ.domain()?;
    if !grid.iter().any(|g| (lo..=hi).contains(g)) {
        return None;
    }
    Some(GridColumn {
        time: integ.time,
        flux: interpolate(&integ.wavelength, &integ.flux, grid),
        error: integ
            .error
            .as_ref()
            .map(|e| interpolate(&integ.wavelength, e, grid)),
    })
}

/// Resample every integration of `file`, in file order.
///
/// Integrations outside the grid are dropped; if none remain the file fails
/// with [`PipelineError::InterpolationDomainEmpty`].
pub fn regrid_file(
    file: &SourceFile,
    grid: &[f64],
    on_integration: &mut ProgressCallback<'_>,
) -> PipelineResult<Vec<GridColumn>> {
    let total = file.integrations.len();
    let mut columns = Vec::with_capacity(total);
    for (i, integ) in file.integrations.iter().enumerate() {
        match regrid_integration(integ, grid) {
            Some(col) => columns.push(col),
            None => debug!(file = %file.display_name(), integration = i + 1, "no overlap with reference grid"),
        }
        on_integration(i + 1, total)?;
    }

    if columns.is_empty() {
        return Err(PipelineError::domain_empty(
            format!("none of {} integrations overlaps the reference grid", total),
            ErrorContext::new("regrid").with_file(&file.path),
        ));
    }
    if columns.len() < total {
        warn!(
            file = %file.display_name(),
            dropped = total - columns.len(),
            "integrations outside the reference grid dropped"
        );
    }
    Ok(columns)
}
