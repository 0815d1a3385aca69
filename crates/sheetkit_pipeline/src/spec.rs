//! Pipeline specs: jobs, outcomes, row batches and errors.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sheetkit_io_fs::{FsError, derive_base_name};
use sheetkit_io_xlsx::XlsxIoError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::conf::SpecPipelineConfig;
use crate::recovery::is_lock_message;

////////////////////////////////////////////////////////////////////////////////
// #region ErrorSpecification

/// What went wrong, decided where the error is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumFailureKind {
    /// The OS refused access.
    AccessDenied,
    /// Another process holds the file.
    FileLocked,
    /// Memory or handles ran out.
    ResourceExhausted,
    /// Content is corrupt or not in the expected format.
    InvalidData,
    /// The job was cancelled.
    Cancelled,
    /// Anything else.
    Other,
}

/// Classify an OS-level error.
pub fn classify_io_error(err: &io::Error) -> EnumFailureKind {
    if matches!(err.raw_os_error(), Some(32 | 33)) {
        return EnumFailureKind::FileLocked;
    }
    match err.kind() {
        io::ErrorKind::PermissionDenied => EnumFailureKind::AccessDenied,
        io::ErrorKind::ResourceBusy => EnumFailureKind::FileLocked,
        io::ErrorKind::OutOfMemory => EnumFailureKind::ResourceExhausted,
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => EnumFailureKind::InvalidData,
        _ if is_lock_message(&err.to_string()) => EnumFailureKind::FileLocked,
        _ => EnumFailureKind::Other,
    }
}

/// Configuration load/validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file unreadable.
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        /// Config path.
        path: PathBuf,
        /// OS error.
        #[source]
        source: io::Error,
    },
    /// TOML syntax or type error.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// TOML rendering error.
    #[error("Failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    /// Persisting failed.
    #[error(transparent)]
    Persist(#[from] FsError),
    /// Semantically invalid value.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Error type at the orchestrator boundary.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// OS error on a specific path.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Affected path.
        path: PathBuf,
        /// OS error.
        #[source]
        source: io::Error,
    },
    /// CSV read/write error.
    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        /// Affected path.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: csv::Error,
    },
    /// Workbook read/write error.
    #[error(transparent)]
    Xlsx(#[from] XlsxIoError),
    /// File system capability error.
    #[error(transparent)]
    Fs(#[from] FsError),
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Invalid job input.
    #[error("{0}")]
    Validation(String),
    /// No reader exists for the detected format.
    #[error("Unsupported input format: {}", path.display())]
    UnsupportedFormat {
        /// Affected path.
        path: PathBuf,
    },
    /// A batch-mode slot received more rows than reserved.
    #[error("{} exceeds the {n_rows_reserved} rows reserved per file", path.display())]
    ReservationExceeded {
        /// Affected path.
        path: PathBuf,
        /// Reserved capacity.
        n_rows_reserved: usize,
    },
    /// Background task failed to complete.
    #[error("Worker task failed: {0}")]
    Task(String),
    /// Cancellation observed.
    #[error("Operation cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Wrap an OS error with its path.
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Wrap a CSV error with its path.
    pub fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Failure kind used by the recovery policy.
    pub fn kind(&self) -> EnumFailureKind {
        match self {
            Self::Io { source, .. } => classify_io_error(source),
            Self::Csv { source, .. } => match source.kind() {
                csv::ErrorKind::Io(e) => classify_io_error(e),
                _ => EnumFailureKind::InvalidData,
            },
            Self::Xlsx(e) => match e.io_source() {
                Some(source) => classify_io_error(source),
                None if e.is_invalid_data() => EnumFailureKind::InvalidData,
                None if is_lock_message(&e.to_string()) => EnumFailureKind::FileLocked,
                None => EnumFailureKind::Other,
            },
            Self::Fs(e) => match e.io_source() {
                Some(source) => classify_io_error(source),
                None => EnumFailureKind::Other,
            },
            Self::UnsupportedFormat { .. } => EnumFailureKind::InvalidData,
            Self::Cancelled => EnumFailureKind::Cancelled,
            Self::Config(_)
            | Self::Validation(_)
            | Self::ReservationExceeded { .. }
            | Self::Task(_) => EnumFailureKind::Other,
        }
    }

    /// Whether this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Task(err.to_string())
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RowBatch

/// Bounded row buffer reused across batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowBatch {
    rows: Vec<Vec<String>>,
    n_capacity: usize,
}

impl RowBatch {
    /// Empty batch holding at most `n_capacity` (at least 1) rows.
    pub fn new(n_capacity: usize) -> Self {
        let n_capacity = n_capacity.max(1);
        Self {
            rows: Vec::with_capacity(n_capacity.min(1024)),
            n_capacity,
        }
    }

    /// Maximum row count.
    pub fn capacity(&self) -> usize {
        self.n_capacity
    }

    /// Current row count.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the batch has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether another push would exceed capacity.
    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.n_capacity
    }

    /// Append `row`; hands it back when full.
    pub fn push(&mut self, row: Vec<String>) -> Result<(), Vec<String>> {
        if self.is_full() {
            return Err(row);
        }
        self.rows.push(row);
        Ok(())
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Drop rows, keeping the allocation.
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Drop rows and give the allocation back.
    pub fn release(&mut self) {
        self.rows = Vec::new();
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region JobSpecification

/// Destination artifact format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumOutputFormat {
    /// Excel workbook.
    #[default]
    Xlsx,
    /// UTF-8 CSV.
    Csv,
}

impl EnumOutputFormat {
    /// File extension without dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
        }
    }
}

/// How a split job windows its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumSplitMode {
    /// One output per worksheet.
    BySheet,
    /// Header plus `n_rows_per_file` data rows per output.
    ByRows {
        /// Data rows per output file.
        n_rows_per_file: usize,
    },
}

/// One merge operation.
#[derive(Debug, Clone)]
pub struct SpecMergeJob {
    /// Input files in merge order.
    pub files: Vec<PathBuf>,
    /// Output directory.
    pub dir_out: PathBuf,
    /// Write the first file's header row.
    pub if_include_headers: bool,
    /// Drop later rows equal to the first file's header.
    pub if_dedupe_headers: bool,
    /// Output format.
    pub format_out: EnumOutputFormat,
    /// Configuration snapshot; `None` takes the service's current one.
    pub config: Option<Arc<SpecPipelineConfig>>,
    /// Job cancellation.
    pub cancel: CancellationToken,
}

impl SpecMergeJob {
    /// Job with headers included, no dedupe, XLSX output.
    pub fn new(files: Vec<PathBuf>, dir_out: impl Into<PathBuf>) -> Self {
        Self {
            files,
            dir_out: dir_out.into(),
            if_include_headers: true,
            if_dedupe_headers: false,
            format_out: EnumOutputFormat::Xlsx,
            config: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Deterministic output file name (`{first_base}_Merged.{ext}`).
    pub fn derive_output_name(&self) -> String {
        let c_base = self
            .files
            .first()
            .map(|path| derive_base_name(path))
            .unwrap_or_else(|| "output".to_string());
        format!(
            "{c_base}{}.{}",
            crate::conf::C_SUFFIX_MERGED,
            self.format_out.extension()
        )
    }
}

/// One split operation.
#[derive(Debug, Clone)]
pub struct SpecSplitJob {
    /// Source file.
    pub file: PathBuf,
    /// Output directory.
    pub dir_out: PathBuf,
    /// Windowing mode.
    pub mode: EnumSplitMode,
    /// Output format.
    pub format_out: EnumOutputFormat,
    /// Configuration snapshot; `None` takes the service's current one.
    pub config: Option<Arc<SpecPipelineConfig>>,
    /// Job cancellation.
    pub cancel: CancellationToken,
}

impl SpecSplitJob {
    /// Job writing XLSX outputs.
    pub fn new(file: impl Into<PathBuf>, dir_out: impl Into<PathBuf>, mode: EnumSplitMode) -> Self {
        Self {
            file: file.into(),
            dir_out: dir_out.into(),
            mode,
            format_out: EnumOutputFormat::Xlsx,
            config: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Output name of the 1-based `n_idx_part` (`{base}_Split_{:03}.{ext}`).
    pub fn derive_output_name(&self, n_idx_part: usize) -> String {
        format!(
            "{}{}_{n_idx_part:03}.{}",
            derive_base_name(&self.file),
            crate::conf::C_SUFFIX_SPLIT,
            self.format_out.extension()
        )
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region OutcomeSpecification

/// Final state of one input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumFileStatus {
    /// Processed on the first attempt.
    Succeeded,
    /// Processed after a recovery retry.
    Recovered,
    /// Treated as handled without contributing rows.
    Skipped,
    /// Not processed.
    Failed,
}

impl EnumFileStatus {
    /// Lowercase label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Recovered => "recovered",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// Per-file processing result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecFileOutcome {
    /// Input path.
    pub path: PathBuf,
    /// Input file name.
    pub file_name: String,
    /// Final state.
    pub status: EnumFileStatus,
    /// Rows written to the destination.
    pub cnt_rows: u64,
    /// Error text for failed files.
    pub message: Option<String>,
}

impl SpecFileOutcome {
    pub(crate) fn new(path: &Path, status: EnumFileStatus, cnt_rows: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            file_name: derive_file_name(path),
            status,
            cnt_rows,
            message: None,
        }
    }

    pub(crate) fn failed(path: &Path, message: String) -> Self {
        Self {
            message: Some(message),
            ..Self::new(path, EnumFileStatus::Failed, 0)
        }
    }

    /// Whether the file counts as handled.
    pub fn if_success(&self) -> bool {
        !matches!(self.status, EnumFileStatus::Failed)
    }
}

pub(crate) fn derive_file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
