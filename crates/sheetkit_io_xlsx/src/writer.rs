//! Single-sheet XLSX row sink with segment rollback.

use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Format, Workbook, Worksheet};

use crate::spec::{EnumCellValue, SpecXlsxWriteOptions, XlsxIoError};
use crate::util::{
    cast_col_num, cast_row_num, convert_cell_text, sanitize_sheet_name, truncate_cell_text,
    validate_row_bounds,
};

/// Row-addressed worksheet writer.
///
/// Cells are buffered in one worksheet until [`Self::close`] builds the
/// workbook and saves it. Rows written since [`Self::begin_segment`] can be
/// dropped with [`Self::discard_segment`], so a failed input leaves nothing
/// behind.
pub struct XlsxRowSink {
    path_file_out: PathBuf,
    worksheet: Worksheet,
    fmt_header: Format,
    write_options: SpecXlsxWriteOptions,
    n_rows_extent: usize,
    n_cols_extent: usize,
    n_row_segment_start: Option<usize>,
    if_closed: bool,
}

impl XlsxRowSink {
    /// Create a sink writing one sheet named `sheet_name` (sanitized) to `path_file_out`.
    pub fn new(
        path_file_out: PathBuf,
        sheet_name: &str,
        write_options: SpecXlsxWriteOptions,
    ) -> Result<Self, XlsxIoError> {
        let mut worksheet = Worksheet::new();
        worksheet.set_name(sanitize_sheet_name(sheet_name, "_"))?;
        Ok(Self {
            path_file_out,
            worksheet,
            fmt_header: Format::new().set_bold(),
            write_options,
            n_rows_extent: 0,
            n_cols_extent: 0,
            n_row_segment_start: None,
            if_closed: false,
        })
    }

    /// Output file path.
    pub fn file_out(&self) -> &Path {
        &self.path_file_out
    }

    /// One past the highest row written so far.
    pub fn n_rows_extent(&self) -> usize {
        self.n_rows_extent
    }

    /// Write `row` at zero-based `n_row`.
    pub fn write_row(&mut self, n_row: usize, row: &[String]) -> Result<(), XlsxIoError> {
        self.write_row_impl(n_row, row, false)
    }

    /// Write `row` at `n_row`, bold when `if_bold_header` is enabled.
    pub fn write_header_row(&mut self, n_row: usize, row: &[String]) -> Result<(), XlsxIoError> {
        let if_bold = self.write_options.if_bold_header;
        self.write_row_impl(n_row, row, if_bold)
    }

    fn write_row_impl(
        &mut self,
        n_row: usize,
        row: &[String],
        if_bold: bool,
    ) -> Result<(), XlsxIoError> {
        if self.if_closed {
            return Err(XlsxIoError::Closed);
        }
        validate_row_bounds(n_row, row.len()).map_err(XlsxIoError::Limit)?;
        let n_row_xlsx = cast_row_num(n_row).map_err(XlsxIoError::Limit)?;

        for (n_idx_col, value) in row.iter().enumerate() {
            let n_col_xlsx = cast_col_num(n_idx_col).map_err(XlsxIoError::Limit)?;
            let cell_value = if if_bold && !value.is_empty() {
                EnumCellValue::String(truncate_cell_text(value))
            } else {
                convert_cell_text(value, self.write_options.if_infer_numbers)
            };
            match cell_value {
                EnumCellValue::None => {}
                EnumCellValue::String(val) if if_bold => {
                    self.worksheet.write_string_with_format(
                        n_row_xlsx,
                        n_col_xlsx,
                        &val,
                        &self.fmt_header,
                    )?;
                }
                EnumCellValue::String(val) => {
                    self.worksheet.write_string(n_row_xlsx, n_col_xlsx, &val)?;
                }
                EnumCellValue::Number(val) => {
                    self.worksheet.write_number(n_row_xlsx, n_col_xlsx, val)?;
                }
            }
        }

        self.n_rows_extent = self.n_rows_extent.max(n_row + 1);
        self.n_cols_extent = self.n_cols_extent.max(row.len());
        Ok(())
    }

    /// Mark `n_row_start` as the first row of a rollback-able segment.
    pub fn begin_segment(&mut self, n_row_start: usize) {
        self.n_row_segment_start = Some(n_row_start);
    }

    /// Keep the rows written since [`Self::begin_segment`].
    pub fn commit_segment(&mut self) {
        self.n_row_segment_start = None;
    }

    /// Clear every cell written since [`Self::begin_segment`].
    ///
    /// Returns the number of rows cleared. No-op without an open segment.
    pub fn discard_segment(&mut self) -> usize {
        let Some(n_row_start) = self.n_row_segment_start.take() else {
            return 0;
        };
        if n_row_start >= self.n_rows_extent {
            return 0;
        }
        let n_rows_cleared = self.n_rows_extent - n_row_start;
        for n_row in n_row_start..self.n_rows_extent {
            let Ok(n_row_xlsx) = cast_row_num(n_row) else {
                break;
            };
            for n_idx_col in 0..self.n_cols_extent {
                let Ok(n_col_xlsx) = cast_col_num(n_idx_col) else {
                    break;
                };
                self.worksheet.clear_cell(n_row_xlsx, n_col_xlsx);
            }
        }
        self.n_rows_extent = n_row_start;
        n_rows_cleared
    }

    /// Build the workbook and save it. Idempotent.
    pub fn close(&mut self) -> Result<PathBuf, XlsxIoError> {
        if self.if_closed {
            return Ok(self.path_file_out.clone());
        }
        let mut workbook = Workbook::new();
        workbook.push_worksheet(std::mem::replace(&mut self.worksheet, Worksheet::new()));
        workbook.save(&self.path_file_out)?;
        self.if_closed = true;
        Ok(self.path_file_out.clone())
    }
}
