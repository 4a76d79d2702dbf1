//! End-to-end cube assembly.
//!
//! ```text
//! archive ─► scan ─► read ─► order ─► grid ─► regrid ─► assemble ─► normalize
//!                                                         │
//!                        payload ◄─ reduce ◄─ gap fill ◄──┘
//! ```
//!
//! Per-file failures exclude the file and are reported in the metadata;
//! everything else fails the run. Cancellation is checked at every stage
//! boundary and at every file and integration.

use std::collections::BTreeSet;
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{CubeMetadata, CubePayload, ExcludedFile, JobOptions};
use crate::error::{PipelineError, PipelineResult};
use crate::io::{self, archive, archive::Workspace};
use crate::models::{meta_keys, ModifiedJulianDate, SourceFile, TimeSeriesCube, UNKNOWN};
use crate::services::cache::{cache_key, ResultCache};
use crate::services::job_tracker::LogLevel;
use crate::services::progress::{ProgressReporter, Stage, DEFAULT_ETA_WINDOW};
use crate::services::{assembler, gap_fill, normalize, reducer, regrid, visits};

pub type LogSink = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Per-run state threaded through the pipeline: progress, cancellation and a
/// sink for human-readable log lines.
pub struct JobContext {
    pub job_id: String,
    progress: ProgressReporter,
    cancel: CancellationToken,
    log_sink: Option<LogSink>,
}

impl JobContext {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            progress: ProgressReporter::new(DEFAULT_ETA_WINDOW),
            cancel: CancellationToken::new(),
            log_sink: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_log_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        self.log_sink = Some(Box::new(sink));
        self
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Fail with `Cancelled` once cancellation was requested.
    pub fn checkpoint(&self) -> PipelineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::cancelled(format!("job {} was cancelled", self.job_id)));
        }
        Ok(())
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if let Some(sink) = &self.log_sink {
            sink(level, message);
        }
    }
}

/// The assembled cube before reduction, plus what the metadata needs from the
/// input side. This is what the result cache stores.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub cube: TimeSeriesCube,
    pub start_time: ModifiedJulianDate,
    pub files_processed: usize,
    pub files_excluded: Vec<ExcludedFile>,
    pub targets: Vec<String>,
    pub instruments: Vec<String>,
    pub filters: Vec<String>,
    pub gratings: Vec<String>,
    pub flux_unit: String,
    pub grid_policy: String,
}

fn exclude(excluded: &mut Vec<ExcludedFile>, ctx: &JobContext, path: &Path, err: &PipelineError) {
    let name = crate::error::display_name(path);
    warn!(job_id = %ctx.job_id, file = %name, kind = %err.kind(), error = %err, "file excluded");
    ctx.log(LogLevel::Warning, &format!("Skipping {}: {}", name, err));
    excluded.push(ExcludedFile {
        path: name,
        kind: err.kind(),
        message: err.to_string(),
    });
}

fn excluded_summary(excluded: &[ExcludedFile]) -> String {
    excluded
        .iter()
        .map(|f| format!("{} ({})", f.path, f.kind))
        .collect::<Vec<_>>()
        .join(", ")
}

fn collect_meta(files: &[SourceFile], key: &str) -> Vec<String> {
    files
        .iter()
        .filter_map(|f| f.meta(key))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Scan, read, regrid, assemble, normalize and (optionally) gap-fill.
pub fn assemble_workspace(
    workspace: &Workspace,
    options: &JobOptions,
    ctx: &mut JobContext,
) -> PipelineResult<Assembly> {
    ctx.checkpoint()?;
    ctx.progress.enter(Stage::Scan, 0, "Scanning archive...");
    let candidates = archive::scan(workspace, &mut |done, total| {
        ctx.progress.update(done, total);
        ctx.checkpoint()
    })?;
    ctx.log(LogLevel::Info, &format!("Found {} supported files", candidates.len()));

    ctx.checkpoint()?;
    let n_candidates = candidates.len();
    ctx.progress.enter(Stage::Read, n_candidates, "Reading files...");
    let read_options = options.read_options();
    let mut excluded = Vec::new();
    let mut files = Vec::with_capacity(n_candidates);
    for (i, candidate) in candidates.iter().enumerate() {
        ctx.checkpoint()?;
        let result = io::read_source_file(&candidate.path, candidate.format, &read_options, &mut |_, _| {
            ctx.checkpoint()
        });
        match result {
            Ok(file) => {
                info!(
                    job_id = %ctx.job_id,
                    file = %file.display_name(),
                    integrations = file.integrations.len(),
                    "file read"
                );
                files.push(file);
            }
            Err(e) if e.is_per_file() || e.kind() == crate::error::ErrorKind::Io => {
                exclude(&mut excluded, ctx, &candidate.path, &e.in_file(&candidate.path));
            }
            Err(e) => return Err(e),
        }
        ctx.progress.update(i + 1, n_candidates);
    }
    if files.is_empty() {
        return Err(PipelineError::empty_result(format!(
            "no usable files in the archive; excluded: {}",
            excluded_summary(&excluded)
        )));
    }

    archive::order_by_start_time(&mut files);
    ctx.checkpoint()?;
    let grid = regrid::select_reference_grid(&files, &options.grid_policy)?;

    let total_integrations: usize = files.iter().map(|f| f.integrations.len()).sum();
    ctx.progress.enter(
        Stage::Regrid,
        total_integrations,
        format!("Regridding {} integrations...", total_integrations),
    );
    let mut columns = Vec::with_capacity(total_integrations);
    let mut contributing = Vec::with_capacity(files.len());
    let mut base = 0;
    for file in files {
        ctx.checkpoint()?;
        let n = file.integrations.len();
        let result = regrid::regrid_file(&file, &grid, &mut |done, _| {
            ctx.progress.update(base + done, total_integrations);
            ctx.checkpoint()
        });
        match result {
            Ok(cols) => {
                columns.extend(cols);
                contributing.push(file);
            }
            Err(e) if e.is_per_file() => exclude(&mut excluded, ctx, &file.path, &e),
            Err(e) => return Err(e),
        }
        base += n;
    }
    if contributing.is_empty() {
        return Err(PipelineError::empty_result(format!(
            "no file overlaps the reference grid; excluded: {}",
            excluded_summary(&excluded)
        )));
    }

    ctx.checkpoint()?;
    let assembled = assembler::assemble(columns, grid)?;
    let mut cube = assembled.cube;
    normalize::normalize(&mut cube)?;

    if options.interpolate {
        ctx.checkpoint()?;
        ctx.progress.enter(Stage::Interpolate, 1, "Interpolating across time...");
        let added = gap_fill::fill_gaps(&mut cube, &options.gap_fill_options())?;
        ctx.progress.update(1, 1);
        ctx.log(LogLevel::Info, &format!("Interpolated {} columns across gaps", added));
    }

    let flux_unit = contributing
        .iter()
        .find_map(|f| f.meta(meta_keys::FLUX_UNIT))
        .unwrap_or(UNKNOWN)
        .to_string();
    Ok(Assembly {
        start_time: assembled.start_time,
        files_processed: contributing.len(),
        files_excluded: excluded,
        targets: collect_meta(&contributing, meta_keys::TARGET),
        instruments: collect_meta(&contributing, meta_keys::INSTRUMENT),
        filters: collect_meta(&contributing, meta_keys::FILTER),
        gratings: collect_meta(&contributing, meta_keys::GRATING),
        flux_unit,
        grid_policy: options.grid_policy.to_string(),
        cube,
    })
}

fn format_range(range: Option<(f64, f64)>, precision: usize, unit: &str) -> String {
    match range {
        Some((lo, hi)) => format!("{:.*}-{:.*} {}", precision, lo, precision, hi, unit),
        None => UNKNOWN.to_string(),
    }
}

/// Reduce an assembly and package the payload.
pub fn finalize(assembly: Assembly, options: &JobOptions, ctx: &mut JobContext) -> PipelineResult<CubePayload> {
    ctx.checkpoint()?;
    ctx.progress.enter(Stage::Finalize, 3, "Computing variability & metadata...");
    let Assembly {
        mut cube,
        start_time,
        files_processed,
        files_excluded,
        targets,
        instruments,
        filters,
        gratings,
        flux_unit,
        grid_policy,
    } = assembly;

    let report = reducer::reduce(&mut cube, &options.reduce_options())?;
    ctx.progress.update(1, 3);
    ctx.checkpoint()?;

    let band_curves = reducer::band_light_curves(&cube, &options.bands, options.display_mode)?;
    let visits = visits::observed_visits(&cube.time_axis, &cube.interpolated, options.gap_threshold_hours);
    ctx.progress.update(2, 3);

    let metadata = CubeMetadata {
        files_processed,
        files_excluded,
        total_integrations: report.total_integrations,
        plotted_integrations: report.plotted_integrations,
        subsampled: report.subsampled,
        wavelength_range: format_range(cube.wavelength_range(), 3, "um"),
        time_range: format_range(cube.time_range(), 2, "hours"),
        start_mjd: start_time.value() + report.time_offset_hours / 24.0,
        targets,
        instruments,
        filters,
        gratings,
        flux_unit,
        user_ranges: report.user_ranges,
        visits,
        interpolated_columns: cube.interpolated.iter().filter(|m| **m).count(),
        grid_policy,
        display_mode: options.display_mode,
    };
    let payload = CubePayload::from_cube(&cube, band_curves, metadata);
    ctx.progress.update(3, 3);
    Ok(payload)
}

/// Run the whole pipeline over archive bytes, consulting `cache` for the
/// assembled cube when one is given.
pub fn run_archive(
    archive_bytes: &[u8],
    options: &JobOptions,
    ctx: &mut JobContext,
    cache: Option<&ResultCache<Assembly>>,
) -> PipelineResult<CubePayload> {
    options.validate()?;
    let key = cache.map(|_| cache_key(archive_bytes, &options.assembly_key()));
    let cached = match (cache, key.as_deref()) {
        (Some(cache), Some(key)) => cache.get(key),
        _ => None,
    };

    let assembly = match cached {
        Some(assembly) => {
            info!(job_id = %ctx.job_id, "reusing cached assembly");
            ctx.log(LogLevel::Info, "Reusing cached cube for identical archive and options");
            assembly
        }
        None => {
            let workspace = Workspace::extract(archive_bytes)?;
            let assembly = assemble_workspace(&workspace, options, ctx)?;
            if let (Some(cache), Some(key)) = (cache, key) {
                cache.insert(key, assembly.clone());
            }
            assembly
        }
    };

    let payload = finalize(assembly, options, ctx)?;
    ctx.progress.finish("Complete");
    Ok(payload)
}

/// Run the whole pipeline over a directory or an archive file on disk.
pub fn run_path(path: &Path, options: &JobOptions, ctx: &mut JobContext) -> PipelineResult<CubePayload> {
    options.validate()?;
    let workspace = Workspace::open(path)?;
    let assembly = assemble_workspace(&workspace, options, ctx)?;
    let payload = finalize(assembly, options, ctx)?;
    ctx.progress.finish("Complete");
    Ok(payload)
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod pipeline_tests;
