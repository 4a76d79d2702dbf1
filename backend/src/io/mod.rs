//! Input side of the pipeline: archive scanning and per-format readers.

pub mod archive;
pub mod fits;
pub mod format_a;
pub mod format_b;
pub mod keys;

#[cfg(test)]
pub(crate) mod test_fixtures;

use std::path::Path;

use crate::error::PipelineResult;
use crate::models::{FormatFamily, SourceFile};

/// Integrations with fewer finite samples than this are skipped.
pub const DEFAULT_MIN_VALID_POINTS: usize = 10;

/// Knobs shared by the format readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    pub min_valid_points: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            min_valid_points: DEFAULT_MIN_VALID_POINTS,
        }
    }
}

/// Receives `(done, total)` as a reader or scanner advances. Returning an
/// error aborts the operation.
pub type ProgressCallback<'a> = dyn FnMut(usize, usize) -> PipelineResult<()> + 'a;

/// Parse one file in the given format family.
pub fn read_source_file(
    path: &Path,
    format: FormatFamily,
    options: &ReadOptions,
    on_integration: &mut ProgressCallback<'_>,
) -> PipelineResult<SourceFile> {
    match format {
        FormatFamily::FormatA => format_a::read(path, options, on_integration),
        FormatFamily::FormatB => format_b::read(path, options, on_integration),
    }
}
