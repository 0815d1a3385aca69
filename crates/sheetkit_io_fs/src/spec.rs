//! File descriptor models, probe/discovery options and error types.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

////////////////////////////////////////////////////////////////////////////////
// #region EnumsInit

/// Tabular format detected for one input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumFileFormat {
    /// Office Open XML workbook (ZIP container).
    Xlsx,
    /// Legacy BIFF workbook (OLE container).
    Xls,
    /// Comma separated text.
    Csv,
    /// HTML table content, usually saved with an `.xls` extension.
    HtmlDisguised,
    /// Anything else; processing such a file fails with invalid data.
    Unknown,
}

impl EnumFileFormat {
    /// Whether rows are read through the workbook reader.
    pub fn is_workbook(self) -> bool {
        matches!(self, Self::Xlsx | Self::Xls)
    }

    /// Short lowercase label for logs and reports.
    pub fn label(self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Xls => "xls",
            Self::Csv => "csv",
            Self::HtmlDisguised => "html",
            Self::Unknown => "unknown",
        }
    }
}

/// Pattern matching mode for input discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumPatternMode {
    /// Shell-like wildcards (`*`, `?`, character classes).
    Glob,
    /// Regular expression pattern.
    Regex,
    /// Substring match.
    Literal,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region StructsAndErrors

/// Immutable description of one probed input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecFileDescriptor {
    /// Input path as given by the caller.
    pub path: PathBuf,
    /// File size in bytes; `None` when metadata could not be read.
    pub size: Option<u64>,
    /// Detected format (content sniffing first, extension second).
    pub format: EnumFileFormat,
}

impl SpecFileDescriptor {
    /// File name without directories, lossy.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }

    /// File stem (base name without extension), lossy.
    pub fn base_name(&self) -> String {
        derive_base_name(&self.path)
    }

    /// Lowercased extension without the dot, empty when missing.
    pub fn extension(&self) -> String {
        derive_extension(&self.path)
    }
}

/// Base name of `path` without extension; falls back to `"output"`.
pub fn derive_base_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .filter(|stem| !stem.trim().is_empty())
        .unwrap_or_else(|| "output".to_string())
}

/// Lowercased extension of `path` without the dot.
pub fn derive_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Options for [`crate::probe_files`].
#[derive(Debug, Clone)]
pub struct SpecProbeOptions {
    /// Number of leading bytes inspected for format sniffing.
    pub n_bytes_sniff: usize,
    /// Maximum worker threads for the probe stage.
    pub num_workers_max: Option<usize>,
}

impl Default for SpecProbeOptions {
    fn default() -> Self {
        Self {
            n_bytes_sniff: crate::util::N_BYTES_SNIFF_DEFAULT,
            num_workers_max: None,
        }
    }
}

/// File system capability errors.
#[derive(Debug, Error)]
pub enum FsError {
    /// Invalid include/exclude pattern.
    #[error("Invalid pattern in include/exclude: {0}")]
    InvalidPattern(String),
    /// Input directory does not exist or is not a directory.
    #[error("Input is not a directory: {}", .0.display())]
    NotDirectory(PathBuf),
    /// Output directory could not be created or is not writable.
    #[error("Output directory unavailable {}: {message}", path.display())]
    OutputDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying error text.
        message: String,
    },
    /// Path-scoped I/O failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl FsError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Underlying I/O error, when this is a path-scoped I/O failure.
    pub fn io_source(&self) -> Option<&io::Error> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
