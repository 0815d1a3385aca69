//! XLSX I/O option/spec/error types.

use std::io;
use std::path::PathBuf;

use rust_xlsxwriter::XlsxError;
use thiserror::Error;

////////////////////////////////////////////////////////////////////////////////
// #region CellValueSpecification

/// Normalized cell value written to a worksheet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumCellValue {
    /// Missing value (left blank).
    None,
    /// Text value.
    String(String),
    /// Numeric value.
    Number(f64),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WriterSpecification

/// Writer-wide options controlling value conversion and header styling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecXlsxWriteOptions {
    /// Write numeric-looking text (`"12"`, `"-3.5"`) as numbers.
    ///
    /// Leading-zero text such as `"007"` always stays text.
    pub if_infer_numbers: bool,
    /// Render rows written through `write_header_row` in bold.
    pub if_bold_header: bool,
}

impl Default for SpecXlsxWriteOptions {
    fn default() -> Self {
        Self {
            if_infer_numbers: true,
            if_bold_header: false,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReaderSpecification

/// Which worksheet a reader should open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnumSheetSelector {
    /// First worksheet in workbook order, even when empty.
    #[default]
    First,
    /// First worksheet whose used range is non-empty.
    FirstNonEmpty,
    /// Worksheet by exact name.
    Name(String),
    /// Worksheet by zero-based position.
    Index(usize),
}

impl std::fmt::Display for EnumSheetSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::First => write!(f, "first sheet"),
            Self::FirstNonEmpty => write!(f, "first non-empty sheet"),
            Self::Name(name) => write!(f, "sheet {name:?}"),
            Self::Index(n_idx) => write!(f, "sheet #{n_idx}"),
        }
    }
}

/// Shape summary of one worksheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSheetInfo {
    /// Worksheet name.
    pub name: String,
    /// Used-range row count.
    pub n_rows: usize,
    /// Used-range column count.
    pub n_cols: usize,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ErrorSpecification

/// Errors raised by workbook reading and writing.
#[derive(Debug, Error)]
pub enum XlsxIoError {
    /// Workbook container could not be opened.
    #[error("Failed to open workbook {}: {source}", path.display())]
    Open {
        /// Workbook path.
        path: PathBuf,
        /// Underlying reader error.
        #[source]
        source: calamine::Error,
    },
    /// Selector matched no worksheet.
    #[error("Workbook {} has no {selector}", path.display())]
    SheetNotFound {
        /// Workbook path.
        path: PathBuf,
        /// Human-readable selector.
        selector: String,
    },
    /// Worksheet range could not be decoded.
    #[error("Failed to read {sheet:?} of {}: {source}", path.display())]
    Sheet {
        /// Workbook path.
        path: PathBuf,
        /// Worksheet name.
        sheet: String,
        /// Underlying reader error.
        #[source]
        source: calamine::Error,
    },
    /// Workbook serialization failed.
    #[error("xlsx write error: {0}")]
    Write(#[from] XlsxError),
    /// Excel hard limit (rows/columns) exceeded.
    #[error("Excel limit exceeded: {0}")]
    Limit(String),
    /// Write attempted after the sink was closed.
    #[error("Cannot write after close().")]
    Closed,
}

impl XlsxIoError {
    /// Underlying OS error, when the failure came from the file system.
    pub fn io_source(&self) -> Option<&io::Error> {
        match self {
            Self::Open {
                source: calamine::Error::Io(e),
                ..
            }
            | Self::Sheet {
                source: calamine::Error::Io(e),
                ..
            } => Some(e),
            Self::Write(XlsxError::IoError(e)) => Some(e),
            _ => None,
        }
    }

    /// Whether the failure means the container itself is malformed.
    pub fn is_invalid_data(&self) -> bool {
        match self {
            Self::Open { source, .. } | Self::Sheet { source, .. } => {
                !matches!(source, calamine::Error::Io(_))
            }
            _ => false,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
