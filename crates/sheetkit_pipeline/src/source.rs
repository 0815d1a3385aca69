//! Format dispatch: one row source per input file.

use std::path::Path;

use sheetkit_io_fs::{EnumFileFormat, SpecFileDescriptor};
use sheetkit_io_xlsx::{EnumSheetSelector, XlsxRowSource, XlsxWorkbookReader};
use sheetkit_log::sheet_debug;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::conf::SpecPipelineConfig;
use crate::delimited::{CsvRowSource, SpecCsvReadOptions, decode_bytes, resolve_encoding};
use crate::html::{SpecHtmlParseConfig, parse_table};
use crate::spec::PipelineError;

/// Rows of one input, in source order.
pub enum EnumRowSource {
    /// Streamed CSV records.
    Csv(CsvRowSource),
    /// Loaded worksheet range.
    Workbook(XlsxRowSource),
    /// Rows extracted from HTML content.
    Html(std::vec::IntoIter<Vec<String>>, usize),
}

impl EnumRowSource {
    /// Total rows, for progress.
    pub fn n_rows_total(&self) -> usize {
        match self {
            Self::Csv(source) => source.n_rows_total(),
            Self::Workbook(source) => source.n_rows_total(),
            Self::Html(_, n_rows_total) => *n_rows_total,
        }
    }

    /// Next row, or `None` when exhausted.
    pub fn next_row(&mut self) -> Result<Option<Vec<String>>, PipelineError> {
        match self {
            Self::Csv(source) => source.next_row(),
            Self::Workbook(source) => Ok(source.next_row()),
            Self::Html(iter_rows, _) => Ok(iter_rows.next()),
        }
    }

    /// Up to `n_rows_max` next rows; empty when exhausted.
    pub fn next_batch(&mut self, n_rows_max: usize) -> Result<Vec<Vec<String>>, PipelineError> {
        let n_rows_max = n_rows_max.max(1);
        match self {
            Self::Workbook(source) => Ok(source.next_batch(n_rows_max)),
            Self::Html(iter_rows, _) => Ok(iter_rows.by_ref().take(n_rows_max).collect()),
            Self::Csv(source) => {
                let mut l_rows = Vec::with_capacity(n_rows_max.min(1024));
                while l_rows.len() < n_rows_max {
                    let Some(row) = source.next_row()? else {
                        break;
                    };
                    l_rows.push(row);
                }
                Ok(l_rows)
            }
        }
    }

    /// [`Self::next_batch`] on the blocking pool.
    ///
    /// In-memory HTML rows are taken inline; file-backed sources are moved
    /// to a worker for the read and moved back afterwards.
    pub async fn pull_batch(&mut self, n_rows_max: usize) -> Result<Vec<Vec<String>>, PipelineError> {
        if let Self::Html(..) = self {
            return self.next_batch(n_rows_max);
        }
        let mut source = std::mem::replace(self, Self::from_rows(Vec::new()));
        let (source, result) = tokio::task::spawn_blocking(move || {
            let result = source.next_batch(n_rows_max);
            (source, result)
        })
        .await?;
        *self = source;
        result
    }

    /// Worksheet name for workbook sources.
    pub fn sheet_name(&self) -> Option<&str> {
        match self {
            Self::Workbook(source) => Some(source.sheet_name()),
            Self::Csv(_) | Self::Html(..) => None,
        }
    }

    /// Source built from already materialized rows.
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        let n_rows_total = rows.len();
        Self::Html(rows.into_iter(), n_rows_total)
    }
}

/// Open `file_desc` according to its detected format.
///
/// Workbook and CSV opening and the HTML parse run on the blocking pool;
/// `cancel` aborts an HTML parse in flight.
pub async fn open_row_source(
    file_desc: &SpecFileDescriptor,
    selector: &EnumSheetSelector,
    config: &SpecPipelineConfig,
    cancel: &CancellationToken,
) -> Result<EnumRowSource, PipelineError> {
    let path = file_desc.path.clone();
    match file_desc.format {
        EnumFileFormat::Csv => {
            let options = SpecCsvReadOptions::from_config(config);
            let source =
                tokio::task::spawn_blocking(move || CsvRowSource::open(&path, &options)).await??;
            Ok(EnumRowSource::Csv(source))
        }
        EnumFileFormat::Xlsx | EnumFileFormat::Xls => {
            let selector = selector.clone();
            let source = tokio::task::spawn_blocking(move || {
                XlsxWorkbookReader::open(&path)?.select_sheet(&selector)
            })
            .await??;
            sheet_debug!(
                "Opened sheet {:?} of {} ({} rows)",
                source.sheet_name(),
                file_desc.path.display(),
                source.n_rows_total()
            );
            Ok(EnumRowSource::Workbook(source))
        }
        EnumFileFormat::HtmlDisguised => {
            let l_rows = read_html_rows(&file_desc.path, config, cancel).await?;
            Ok(EnumRowSource::from_rows(l_rows))
        }
        EnumFileFormat::Unknown => Err(PipelineError::UnsupportedFormat { path }),
    }
}

/// Read, decode and parse an HTML table file.
///
/// At most the content cap (plus one partial char) is read from disk.
pub async fn read_html_rows(
    path: &Path,
    config: &SpecPipelineConfig,
    cancel: &CancellationToken,
) -> Result<Vec<Vec<String>>, PipelineError> {
    let n_bytes_read_max = config.n_bytes_html_content_max().saturating_add(4);
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    let mut v_bytes = Vec::with_capacity(n_bytes_read_max.min(1024 * 1024));
    file.take(n_bytes_read_max as u64)
        .read_to_end(&mut v_bytes)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    let html = decode_bytes(&v_bytes, resolve_encoding(&config.csv_encoding), config.if_csv_bom);
    drop(v_bytes);
    parse_table(html, &SpecHtmlParseConfig::from_config(config), cancel).await
}
