//! Row-addressed destination artifacts.

use std::path::{Path, PathBuf};

use sheetkit_io_xlsx::{SpecXlsxWriteOptions, XlsxRowSink};

use crate::conf::SpecPipelineConfig;
use crate::delimited::{CsvRowSink, SpecCsvWriteOptions};
use crate::spec::{EnumOutputFormat, PipelineError};

/// Destination written row by row at explicit offsets.
///
/// Rows written after [`RowSink::begin_segment`] can be rolled back with
/// [`RowSink::discard_segment`] until [`RowSink::commit_segment`].
pub trait RowSink: Send {
    /// Output path.
    fn file_out(&self) -> &Path;

    /// Write `row` at zero-based `n_row`.
    fn write_row(&mut self, n_row: usize, row: &[String]) -> Result<(), PipelineError>;

    /// Write a header row; plain rows unless the sink styles headers.
    fn write_header_row(&mut self, n_row: usize, row: &[String]) -> Result<(), PipelineError> {
        self.write_row(n_row, row)
    }

    /// Open a rollback segment starting at `n_row_start`.
    fn begin_segment(&mut self, n_row_start: usize) -> Result<(), PipelineError>;

    /// Keep the rows of the open segment.
    fn commit_segment(&mut self);

    /// Drop the rows of the open segment; returns how many were dropped.
    fn discard_segment(&mut self) -> Result<usize, PipelineError>;

    /// Flush and save. Idempotent.
    fn close(&mut self) -> Result<PathBuf, PipelineError>;
}

impl RowSink for XlsxRowSink {
    fn file_out(&self) -> &Path {
        XlsxRowSink::file_out(self)
    }

    fn write_row(&mut self, n_row: usize, row: &[String]) -> Result<(), PipelineError> {
        Ok(XlsxRowSink::write_row(self, n_row, row)?)
    }

    fn write_header_row(&mut self, n_row: usize, row: &[String]) -> Result<(), PipelineError> {
        Ok(XlsxRowSink::write_header_row(self, n_row, row)?)
    }

    fn begin_segment(&mut self, n_row_start: usize) -> Result<(), PipelineError> {
        XlsxRowSink::begin_segment(self, n_row_start);
        Ok(())
    }

    fn commit_segment(&mut self) {
        XlsxRowSink::commit_segment(self);
    }

    fn discard_segment(&mut self) -> Result<usize, PipelineError> {
        Ok(XlsxRowSink::discard_segment(self))
    }

    fn close(&mut self) -> Result<PathBuf, PipelineError> {
        Ok(XlsxRowSink::close(self)?)
    }
}

/// Open a sink of `format_out` at `path_file_out`.
pub fn create_sink(
    format_out: EnumOutputFormat,
    path_file_out: PathBuf,
    sheet_name: &str,
    config: &SpecPipelineConfig,
) -> Result<Box<dyn RowSink>, PipelineError> {
    match format_out {
        EnumOutputFormat::Xlsx => Ok(Box::new(XlsxRowSink::new(
            path_file_out,
            sheet_name,
            SpecXlsxWriteOptions::default(),
        )?)),
        EnumOutputFormat::Csv => Ok(Box::new(CsvRowSink::create(
            path_file_out,
            &SpecCsvWriteOptions::from_config(config),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn create_sink_discards_segments_for_both_formats() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = SpecPipelineConfig {
            if_csv_bom: false,
            ..SpecPipelineConfig::default()
        };

        for format_out in [EnumOutputFormat::Csv, EnumOutputFormat::Xlsx] {
            let path_out = tmp.path().join(format!("out.{}", format_out.extension()));
            let mut sink =
                create_sink(format_out, path_out.clone(), "Sheet1", &config).expect("sink");
            sink.write_header_row(0, &row(&["h"])).expect("header");
            sink.begin_segment(1).expect("segment");
            sink.write_row(1, &row(&["partial"])).expect("row");
            assert_eq!(sink.discard_segment().expect("discard"), 1);
            sink.begin_segment(1).expect("segment");
            sink.write_row(1, &row(&["final"])).expect("row");
            sink.commit_segment();
            assert_eq!(sink.close().expect("close"), path_out);
            assert_eq!(sink.file_out(), path_out.as_path());
        }

        let text = std::fs::read_to_string(tmp.path().join("out.csv")).expect("read");
        assert_eq!(text, "h\nfinal\n");
    }
}
