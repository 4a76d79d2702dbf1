//! Archive Scanner: unpacks an upload, finds observation files and classifies
//! them by format family.

use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tempfile::TempDir;
use tracing::{debug, info};

use super::ProgressCallback;
use crate::error::{ErrorContext, PipelineError, PipelineResult};
use crate::models::{FormatFamily, SourceFile};

const FITS_MAGIC: &[u8] = b"SIMPLE  =";
const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const GZIP_MAGIC: &[u8] = b"\x1f\x8b";

/// Container format of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    /// Identify a container from its leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(ZIP_MAGIC) {
            Some(Self::Zip)
        } else if bytes.starts_with(GZIP_MAGIC) {
            Some(Self::TarGz)
        } else if bytes.len() > 262 && &bytes[257..262] == b"ustar" {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// A directory of candidate files, removed on drop when it was extracted.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    _temp: Option<TempDir>,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Use an existing directory in place.
    pub fn directory(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            _temp: None,
        }
    }

    /// Extract archive bytes into a private temporary directory.
    pub fn extract(bytes: &[u8]) -> PipelineResult<Self> {
        let ctx = || ErrorContext::new("extract_archive");
        let kind = ArchiveKind::sniff(bytes)
            .ok_or_else(|| PipelineError::archive("unrecognized archive format (expected zip, tar or tar.gz)", ctx()))?;
        let temp = tempfile::Builder::new()
            .prefix("stamp-")
            .tempdir()
            .map_err(|e| PipelineError::io(e, ctx()))?;

        match kind {
            ArchiveKind::Zip => {
                let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
                    .map_err(|e| PipelineError::archive(e.to_string(), ctx()))?;
                archive
                    .extract(temp.path())
                    .map_err(|e| PipelineError::archive(e.to_string(), ctx()))?;
            }
            ArchiveKind::Tar => {
                tar::Archive::new(bytes)
                    .unpack(temp.path())
                    .map_err(|e| PipelineError::archive(e.to_string(), ctx()))?;
            }
            ArchiveKind::TarGz => {
                tar::Archive::new(GzDecoder::new(bytes))
                    .unpack(temp.path())
                    .map_err(|e| PipelineError::archive(e.to_string(), ctx()))?;
            }
        }
        debug!(?kind, dir = %temp.path().display(), "extracted archive");

        Ok(Self {
            root: temp.path().to_path_buf(),
            _temp: Some(temp),
        })
    }

    /// Open a path: directories are used in place, files are extracted.
    pub fn open(path: &Path) -> PipelineResult<Self> {
        if path.is_dir() {
            return Ok(Self::directory(path));
        }
        let bytes = fs::read(path)
            .map_err(|e| PipelineError::io(e, ErrorContext::new("open_archive").with_file(path)))?;
        Self::extract(&bytes)
    }
}

/// A discovered file and the format it was classified as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub format: FormatFamily,
}

/// Classify by extension, falling back to content sniffing.
pub fn classify(path: &Path) -> Option<FormatFamily> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match ext.as_deref() {
        Some("fits" | "fit" | "fts") => return Some(FormatFamily::FormatA),
        Some("h5" | "hdf5" | "he5") => return Some(FormatFamily::FormatB),
        _ => {}
    }

    let mut head = [0u8; 9];
    let n = fs::File::open(path).and_then(|mut f| f.read(&mut head)).ok()?;
    let head = &head[..n];
    if head.starts_with(FITS_MAGIC) {
        Some(FormatFamily::FormatA)
    } else if head.starts_with(HDF5_MAGIC) {
        Some(FormatFamily::FormatB)
    } else {
        None
    }
}

fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || name == "__MACOSX"
}

/// All regular files under `root`, in lexical path order.
fn walk(root: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(root)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        if is_ignored(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&path, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// List and classify every file in the workspace.
///
/// `on_file` receives `(scanned, total)` after each file. Fails with
/// [`PipelineError::NoSupportedFiles`] when nothing classifies.
pub fn scan(workspace: &Workspace, on_file: &mut ProgressCallback<'_>) -> PipelineResult<Vec<Candidate>> {
    let mut paths = Vec::new();
    walk(workspace.root(), &mut paths)
        .map_err(|e| PipelineError::io(e, ErrorContext::new("scan_archive")))?;

    let total = paths.len();
    let mut found = Vec::new();
    for (i, path) in paths.into_iter().enumerate() {
        match classify(&path) {
            Some(format) => {
                debug!(file = %path.display(), %format, "classified");
                found.push(Candidate { path, format });
            }
            None => debug!(file = %path.display(), "skipping unrecognized file"),
        }
        on_file(i + 1, total)?;
    }

    if found.is_empty() {
        return Err(PipelineError::no_supported_files(format!(
            "none of the {} files in the archive is a FITS or HDF5 product",
            total
        )));
    }
    info!(files = found.len(), scanned = total, "archive scanned");
    Ok(found)
}

/// Order files by their first integration's timestamp.
///
/// The sort is stable, so files with equal start times keep discovery order.
pub fn order_by_start_time(files: &mut [SourceFile]) {
    files.sort_by(|a, b| {
        let ta = a.first_time().map_or(f64::INFINITY, |t| t.value());
        let tb = b.first_time().map_or(f64::INFINITY, |t| t.value());
        ta.total_cmp(&tb)
    });
}
