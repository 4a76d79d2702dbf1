//! Error types for the assembly pipeline.
//!
//! Every failure carries an [`ErrorContext`] naming the operation and, where
//! relevant, the offending file, so that messages surfaced on job records are
//! actionable without a stack trace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Structured context for pipeline errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorContext {
    /// The operation being performed (e.g., "read_format_a", "regrid")
    pub operation: Option<String>,
    /// File the error relates to, as a display name
    pub file: Option<String>,
    /// Additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with an operation name.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            ..Default::default()
        }
    }

    /// Attach the file this error relates to.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(display_name(path.as_ref()));
        self
    }

    /// Set additional details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.operation.is_none() && self.file.is_none() && self.details.is_none()
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        let mut parts = Vec::new();
        if let Some(ref op) = self.operation {
            parts.push(format!("operation={}", op));
        }
        if let Some(ref file) = self.file {
            parts.push(format!("file={}", file));
        }
        if let Some(ref details) = self.details {
            parts.push(format!("details={}", details));
        }
        write!(f, " [{}]", parts.join(", "))
    }
}

/// File name without its directory, falling back to the full path.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Stable classification of a pipeline failure, stored on job records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoSupportedFiles,
    UnsupportedStructure,
    CorruptFile,
    EmptyResult,
    InterpolationDomainEmpty,
    FieldResolution,
    Cancelled,
    Timeout,
    InvalidOptions,
    Io,
    Archive,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoSupportedFiles => "no_supported_files",
            ErrorKind::UnsupportedStructure => "unsupported_structure",
            ErrorKind::CorruptFile => "corrupt_file",
            ErrorKind::EmptyResult => "empty_result",
            ErrorKind::InterpolationDomainEmpty => "interpolation_domain_empty",
            ErrorKind::FieldResolution => "field_resolution",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidOptions => "invalid_options",
            ErrorKind::Io => "io",
            ErrorKind::Archive => "archive",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for pipeline operations
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The archive contains nothing the format readers recognize.
    #[error("No supported files: {message}{context}")]
    NoSupportedFiles {
        message: String,
        context: ErrorContext,
    },

    /// A recognized file lacks required sections or columns.
    #[error("Unsupported structure: {message}{context}")]
    UnsupportedStructure {
        message: String,
        context: ErrorContext,
    },

    /// A file could not be parsed.
    #[error("Corrupt file: {message}{context}")]
    CorruptFile {
        message: String,
        context: ErrorContext,
    },

    /// Every file was skipped or produced only missing data.
    #[error("Empty result: {message}{context}")]
    EmptyResult {
        message: String,
        context: ErrorContext,
    },

    /// No wavelength overlap between a contribution and the reference grid.
    #[error("Interpolation domain empty: {message}{context}")]
    InterpolationDomainEmpty {
        message: String,
        context: ErrorContext,
    },

    /// None of the candidate keys for a required field were present.
    #[error("Field '{field}' not found (tried: {}){context}", .tried.join(", "))]
    FieldResolution {
        field: String,
        tried: Vec<String>,
        context: ErrorContext,
    },

    /// The job was cancelled at a stage boundary.
    #[error("Cancelled: {message}")]
    Cancelled { message: String },

    /// The job stopped reporting progress.
    #[error("Timeout: {message}")]
    Timeout { message: String },

    /// Job options failed validation.
    #[error("Invalid options: {message}")]
    InvalidOptions { message: String },

    /// Filesystem errors.
    #[error("I/O error: {source}{context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: ErrorContext,
    },

    /// Archive extraction errors.
    #[error("Archive error: {message}{context}")]
    Archive {
        message: String,
        context: ErrorContext,
    },

    /// Cross-stage invariant violation; a defect rather than a user error.
    #[error("Internal error: {message}{context}")]
    Internal {
        message: String,
        context: ErrorContext,
    },
}

impl PipelineError {
    pub fn no_supported_files(message: impl Into<String>) -> Self {
        Self::NoSupportedFiles {
            message: message.into(),
            context: ErrorContext::new("scan_archive"),
        }
    }

    pub fn unsupported(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::UnsupportedStructure {
            message: message.into(),
            context,
        }
    }

    pub fn corrupt(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::CorruptFile {
            message: message.into(),
            context,
        }
    }

    pub fn empty_result(message: impl Into<String>) -> Self {
        Self::EmptyResult {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn domain_empty(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::InterpolationDomainEmpty {
            message: message.into(),
            context,
        }
    }

    pub fn field_missing(field: impl Into<String>, tried: &[&str], context: ErrorContext) -> Self {
        Self::FieldResolution {
            field: field.into(),
            tried: tried.iter().map(|s| s.to_string()).collect(),
            context,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }

    pub fn io(source: std::io::Error, context: ErrorContext) -> Self {
        Self::Io { source, context }
    }

    pub fn archive(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Archive {
            message: message.into(),
            context,
        }
    }

    pub fn internal(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Internal {
            message: message.into(),
            context,
        }
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoSupportedFiles { .. } => ErrorKind::NoSupportedFiles,
            Self::UnsupportedStructure { .. } => ErrorKind::UnsupportedStructure,
            Self::CorruptFile { .. } => ErrorKind::CorruptFile,
            Self::EmptyResult { .. } => ErrorKind::EmptyResult,
            Self::InterpolationDomainEmpty { .. } => ErrorKind::InterpolationDomainEmpty,
            Self::FieldResolution { .. } => ErrorKind::FieldResolution,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidOptions { .. } => ErrorKind::InvalidOptions,
            Self::Io { .. } => ErrorKind::Io,
            Self::Archive { .. } => ErrorKind::Archive,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether this error excludes a single file instead of failing the job.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UnsupportedStructure
                | ErrorKind::CorruptFile
                | ErrorKind::FieldResolution
                | ErrorKind::InterpolationDomainEmpty
        )
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::NoSupportedFiles { context, .. }
            | Self::UnsupportedStructure { context, .. }
            | Self::CorruptFile { context, .. }
            | Self::EmptyResult { context, .. }
            | Self::InterpolationDomainEmpty { context, .. }
            | Self::FieldResolution { context, .. }
            | Self::Io { context, .. }
            | Self::Archive { context, .. }
            | Self::Internal { context, .. } => Some(context),
            Self::Cancelled { .. } | Self::Timeout { .. } | Self::InvalidOptions { .. } => None,
        }
    }

    /// Attach a file to the error context, keeping any file already set.
    pub fn in_file(mut self, path: impl AsRef<Path>) -> Self {
        let name = display_name(path.as_ref());
        match &mut self {
            Self::NoSupportedFiles { context, .. }
            | Self::UnsupportedStructure { context, .. }
            | Self::CorruptFile { context, .. }
            | Self::EmptyResult { context, .. }
            | Self::InterpolationDomainEmpty { context, .. }
            | Self::FieldResolution { context, .. }
            | Self::Io { context, .. }
            | Self::Archive { context, .. }
            | Self::Internal { context, .. } => {
                if context.file.is_none() {
                    context.file = Some(name);
                }
            }
            Self::Cancelled { .. } | Self::Timeout { .. } | Self::InvalidOptions { .. } => {}
        }
        self
    }
}
