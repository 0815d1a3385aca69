//! Streaming batch transcoder: one source file into a row sink.

use std::path::Path;

use sheetkit_io_fs::SpecFileDescriptor;
use sheetkit_io_xlsx::EnumSheetSelector;
use sheetkit_log::sheet_trace;
use tokio_util::sync::CancellationToken;

use crate::conf::SpecPipelineConfig;
use crate::cursor::OutputCursor;
use crate::sink::RowSink;
use crate::source::{EnumRowSource, open_row_source};
use crate::spec::{EnumFileStatus, PipelineError, RowBatch, SpecFileOutcome};

/// Progress callback receiving per-file percentages.
pub type TypeProgressFn<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// Progress and cancellation handles for one transcoded file.
#[derive(Clone, Copy)]
pub struct SpecTranscodeControl<'a> {
    /// Per-file progress in `[0, 100]`.
    pub progress: TypeProgressFn<'a>,
    /// Job cancellation, checked on every row.
    pub cancel: &'a CancellationToken,
}

/// Header handling and limits for one transcoded file.
#[derive(Debug, Clone)]
pub struct SpecTranscodeOptions {
    /// Drop the first source row.
    pub if_skip_header: bool,
    /// Write a kept first row with header styling.
    pub if_header_styled: bool,
    /// Drop rows equal to this header (first row excluded).
    pub header_to_dedupe: Option<Vec<String>>,
    /// Maximum rows written; exceeding it fails with `ReservationExceeded`.
    pub n_rows_cap: Option<usize>,
    /// Worksheet to read from workbook sources.
    pub selector: EnumSheetSelector,
}

impl Default for SpecTranscodeOptions {
    fn default() -> Self {
        Self {
            if_skip_header: false,
            if_header_styled: false,
            header_to_dedupe: None,
            n_rows_cap: None,
            selector: EnumSheetSelector::First,
        }
    }
}

/// Result of one transcoded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecTranscodeResult {
    /// Per-file outcome (status `Succeeded`).
    pub outcome: SpecFileOutcome,
    /// First source row, written or not.
    pub row_header: Option<Vec<String>>,
}

/// Whether `row` repeats `header`, ignoring surrounding blanks and trailing empty cells.
pub fn is_same_row(header: &[String], row: &[String]) -> bool {
    let trim_tail = |cells: &[String]| -> usize {
        cells
            .iter()
            .rposition(|cell| !cell.trim().is_empty())
            .map_or(0, |n_idx| n_idx + 1)
    };
    let n_len = trim_tail(header);
    n_len > 0
        && n_len == trim_tail(row)
        && header[..n_len]
            .iter()
            .zip(&row[..n_len])
            .all(|(a, b)| a.trim() == b.trim())
}

/// Open `file_desc` and stream its rows into `sink` at the cursor.
pub async fn transcode_to_sink<S: RowSink + ?Sized>(
    file_desc: &SpecFileDescriptor,
    sink: &mut S,
    cursor: &mut OutputCursor,
    batch: &mut RowBatch,
    options: &SpecTranscodeOptions,
    config: &SpecPipelineConfig,
    control: SpecTranscodeControl<'_>,
) -> Result<SpecTranscodeResult, PipelineError> {
    if control.cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    let mut source =
        open_row_source(file_desc, &options.selector, config, control.cancel).await?;
    stream_rows(
        &file_desc.path,
        &mut source,
        sink,
        cursor,
        batch,
        options,
        control,
    )
    .await
}

/// Copy rows from `source` to `sink` through the reusable `batch` buffer.
///
/// Each batch is pulled on the blocking pool; cancellation is checked on
/// every row and the task yields after every batch.
pub async fn stream_rows<S: RowSink + ?Sized>(
    path: &Path,
    source: &mut EnumRowSource,
    sink: &mut S,
    cursor: &mut OutputCursor,
    batch: &mut RowBatch,
    options: &SpecTranscodeOptions,
    control: SpecTranscodeControl<'_>,
) -> Result<SpecTranscodeResult, PipelineError> {
    let SpecTranscodeControl { progress, cancel } = control;
    let n_rows_total = source.n_rows_total();
    let mut row_header: Option<Vec<String>> = None;
    let mut n_rows_read = 0usize;
    let mut cnt_rows_written = 0usize;

    let check_cap = |cnt_rows_written: usize| -> Result<(), PipelineError> {
        match options.n_rows_cap {
            Some(n_rows_cap) if cnt_rows_written >= n_rows_cap => {
                Err(PipelineError::ReservationExceeded {
                    path: path.to_path_buf(),
                    n_rows_reserved: n_rows_cap,
                })
            }
            _ => Ok(()),
        }
    };

    loop {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let l_rows_pulled = source.pull_batch(batch.capacity()).await?;
        if l_rows_pulled.is_empty() {
            break;
        }
        batch.clear();
        for row in l_rows_pulled {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            n_rows_read += 1;

            if n_rows_read == 1 {
                row_header = Some(row.clone());
                if options.if_skip_header {
                    continue;
                }
                if options.if_header_styled {
                    check_cap(cnt_rows_written)?;
                    sink.write_header_row(cursor.take_row(), &row)?;
                    cnt_rows_written += 1;
                    continue;
                }
            } else if options
                .header_to_dedupe
                .as_deref()
                .is_some_and(|header| is_same_row(header, &row))
            {
                continue;
            }
            batch
                .push(row)
                .map_err(|_| PipelineError::Task("row batch overflow".to_string()))?;
        }

        for row in batch.rows() {
            check_cap(cnt_rows_written)?;
            sink.write_row(cursor.take_row(), row)?;
            cnt_rows_written += 1;
        }
        if n_rows_total > 0 {
            progress((n_rows_read as f64 / n_rows_total as f64 * 100.0).min(100.0));
        }
        tokio::task::yield_now().await;
    }
    progress(100.0);
    batch.clear();

    sheet_trace!(
        "Transcoded {} ({n_rows_read} rows read, {cnt_rows_written} written)",
        path.display()
    );
    Ok(SpecTranscodeResult {
        outcome: SpecFileOutcome::new(path, EnumFileStatus::Succeeded, cnt_rows_written as u64),
        row_header,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use sheetkit_io_fs::probe_file;

    use super::*;
    use crate::delimited::{CsvRowSink, SpecCsvWriteOptions};

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn rows_source(l_rows: &[&[&str]]) -> EnumRowSource {
        EnumRowSource::from_rows(l_rows.iter().map(|r| row(r)).collect())
    }

    fn control<'a>(
        progress: TypeProgressFn<'a>,
        cancel: &'a CancellationToken,
    ) -> SpecTranscodeControl<'a> {
        SpecTranscodeControl { progress, cancel }
    }

    fn read_csv(path: &Path) -> Vec<Vec<String>> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .expect("open")
            .records()
            .map(|r| r.expect("record").iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn is_same_row_ignores_blanks_and_trailing_empties() {
        assert!(is_same_row(&row(&["id", "name"]), &row(&[" id", "name ", ""])));
        assert!(!is_same_row(&row(&["id", "name"]), &row(&["id"])));
        assert!(!is_same_row(&row(&["", ""]), &row(&[""])));
    }

    #[tokio::test]
    async fn stream_rows_skips_header_and_drops_repeated_headers() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_out = tmp.path().join("out.csv");
        let mut sink =
            CsvRowSink::create(path_out.clone(), &SpecCsvWriteOptions::default()).expect("sink");
        let mut cursor = OutputCursor::new(0);
        let mut source = rows_source(&[&["id", "v"], &["1", "a"], &["id", "v"], &["2", "b"]]);
        let l_progress = Mutex::new(Vec::new());
        let progress = |value: f64| l_progress.lock().expect("lock").push(value);

        let result = stream_rows(
            Path::new("in.csv"),
            &mut source,
            &mut sink,
            &mut cursor,
            &mut RowBatch::new(2),
            &SpecTranscodeOptions {
                if_skip_header: true,
                header_to_dedupe: Some(row(&["id", "v"])),
                ..SpecTranscodeOptions::default()
            },
            control(&progress, &CancellationToken::new()),
        )
        .await
        .expect("stream");
        sink.close().expect("close");

        assert_eq!(result.outcome.cnt_rows, 2);
        assert_eq!(result.row_header, Some(row(&["id", "v"])));
        assert_eq!(cursor.position(), 2);
        assert_eq!(read_csv(&path_out), vec![row(&["1", "a"]), row(&["2", "b"])]);
        let l_progress = l_progress.into_inner().expect("lock");
        assert_eq!(l_progress.last().copied(), Some(100.0));
        assert!(l_progress.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn stream_rows_enforces_cap_and_cancellation() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut sink = CsvRowSink::create(tmp.path().join("out.csv"), &SpecCsvWriteOptions::default())
            .expect("sink");

        let mut source = rows_source(&[&["a"], &["b"], &["c"]]);
        let err = stream_rows(
            Path::new("big.csv"),
            &mut source,
            &mut sink,
            &mut OutputCursor::new(0),
            &mut RowBatch::new(10),
            &SpecTranscodeOptions {
                n_rows_cap: Some(2),
                ..SpecTranscodeOptions::default()
            },
            control(&|_: f64| {}, &CancellationToken::new()),
        )
        .await
        .expect_err("cap must trip");
        assert!(matches!(
            err,
            PipelineError::ReservationExceeded { n_rows_reserved: 2, .. }
        ));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut source = rows_source(&[&["a"]]);
        let err = stream_rows(
            Path::new("x.csv"),
            &mut source,
            &mut sink,
            &mut OutputCursor::new(10),
            &mut RowBatch::new(10),
            &SpecTranscodeOptions::default(),
            control(&|_: f64| {}, &cancel),
        )
        .await
        .expect_err("cancelled");
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn transcode_to_sink_reads_csv_from_disk() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_in = tmp.path().join("in.csv");
        std::fs::write(&path_in, "h1,h2\n\"a,1\",x\n").expect("write");
        let path_out = tmp.path().join("out.csv");
        let mut sink =
            CsvRowSink::create(path_out.clone(), &SpecCsvWriteOptions::default()).expect("sink");
        let mut cursor = OutputCursor::new(0);

        let result = transcode_to_sink(
            &probe_file(&path_in, 1024),
            &mut sink,
            &mut cursor,
            &mut RowBatch::new(100),
            &SpecTranscodeOptions::default(),
            &SpecPipelineConfig::default(),
            control(&|_: f64| {}, &CancellationToken::new()),
        )
        .await
        .expect("transcode");
        sink.close().expect("close");

        assert_eq!(result.outcome.cnt_rows, 2);
        assert_eq!(
            read_csv(&path_out),
            vec![row(&["h1", "h2"]), row(&["a,1", "x"])]
        );
    }
}
