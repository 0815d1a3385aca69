//! Split orchestrator: one input, many destination artifacts.

use std::path::PathBuf;
use std::sync::Arc;

use sheetkit_io_fs::{
    N_BYTES_SNIFF_DEFAULT, SpecFileDescriptor, derive_output_path, ensure_output_dir, probe_file,
};
use sheetkit_io_xlsx::{C_SHEET_NAME_DEFAULT, EnumSheetSelector, XlsxIoError, XlsxWorkbookReader};
use sheetkit_log::{sheet_debug, sheet_info, sheet_warn};

use crate::conf::SpecPipelineConfig;
use crate::cursor::OutputCursor;
use crate::progress::ProgressThrottler;
use crate::recovery::{EnumRecoveryDecision, classify_failure, sleep_cancellable};
use crate::report::{EnumJobStatus, ReportJob, ReportJobBuilder};
use crate::sink::create_sink;
use crate::source::{EnumRowSource, open_row_source};
use crate::spec::{
    EnumFileStatus, EnumSplitMode, PipelineError, RowBatch, SpecFileOutcome, SpecSplitJob,
    derive_file_name,
};
use crate::transcode::{SpecTranscodeControl, SpecTranscodeOptions, stream_rows};

/// One written split artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSplitPart {
    /// Artifact path.
    pub path_file_out: PathBuf,
    /// Rows written, header included.
    pub cnt_rows: u64,
}

/// Reject jobs that cannot run before any output is touched.
pub fn validate_split_job(job: &SpecSplitJob) -> Result<(), PipelineError> {
    if !job.file.is_file() {
        return Err(PipelineError::Validation(format!(
            "Input file not found: {}",
            job.file.display()
        )));
    }
    if job.dir_out.as_os_str().is_empty() {
        return Err(PipelineError::Validation(
            "Output directory must not be empty".to_string(),
        ));
    }
    if let EnumSplitMode::ByRows { n_rows_per_file: 0 } = job.mode {
        return Err(PipelineError::Validation(
            "Rows per file must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Run one split job to completion; every failure ends up in the report.
pub async fn split_file(
    job: &SpecSplitJob,
    config: Arc<SpecPipelineConfig>,
    throttler: Arc<ProgressThrottler>,
) -> ReportJob {
    let mut builder_report = ReportJobBuilder::default();
    let result_ready = validate_split_job(job)
        .and_then(|_| config.validate().map_err(PipelineError::from))
        .and_then(|_| ensure_output_dir(&job.dir_out).map_err(PipelineError::from));
    if let Err(e) = result_ready {
        sheet_warn!("Split rejected: {e}");
        return builder_report.build_from_error(&e);
    }
    if job.cancel.is_cancelled() {
        return builder_report.build_from_error(&PipelineError::Cancelled);
    }

    let path_file = job.file.clone();
    let file_desc =
        match tokio::task::spawn_blocking(move || probe_file(&path_file, N_BYTES_SNIFF_DEFAULT)).await {
            Ok(file_desc) => file_desc,
            Err(e) => return builder_report.build_from_error(&PipelineError::from(e)),
        };

    let result = run_split_with_retry(job, &file_desc, &config, &throttler).await;
    let (l_parts, status_file) = match result {
        Ok(done) => done,
        Err(e) => {
            sheet_warn!("Split of {} stopped: {e}", job.file.display());
            if !e.is_cancelled() {
                builder_report.add_outcome(SpecFileOutcome::failed(&job.file, e.to_string()));
            }
            return builder_report.build_from_error(&e);
        }
    };

    let cnt_rows = l_parts.iter().map(|part| part.cnt_rows).sum::<u64>();
    let cnt_parts = l_parts.len();
    for part in l_parts {
        builder_report.add_output(part.path_file_out, 0);
    }
    builder_report.add_outcome(SpecFileOutcome::new(&job.file, status_file, cnt_rows));
    throttler.finish();

    let report = builder_report.build(
        EnumJobStatus::Succeeded,
        format!(
            "Split {} into {cnt_parts} files ({cnt_rows} rows)",
            derive_file_name(&job.file)
        ),
    );
    sheet_info!("{report}");
    report
}

/// Run the split; retry once after a delay on transient failures.
async fn run_split_with_retry(
    job: &SpecSplitJob,
    file_desc: &SpecFileDescriptor,
    config: &SpecPipelineConfig,
    throttler: &ProgressThrottler,
) -> Result<(Vec<SpecSplitPart>, EnumFileStatus), PipelineError> {
    let err = match run_split(job, file_desc, config, throttler).await {
        Ok(l_parts) => return Ok((l_parts, EnumFileStatus::Succeeded)),
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => e,
    };

    let decision = classify_failure(&err, &config.policy_recovery);
    let duration = match decision {
        EnumRecoveryDecision::RetryAfterDelay(duration)
        | EnumRecoveryDecision::RetryAfterReclaimAndDelay(duration) => duration,
        EnumRecoveryDecision::TryAlternativeRead | EnumRecoveryDecision::Unrecoverable => {
            return Err(err);
        }
    };
    sheet_warn!(
        "Split of {} failed ({err}); retrying after {duration:?}",
        file_desc.path.display()
    );
    sleep_cancellable(duration, &job.cancel).await?;
    let l_parts = run_split(job, file_desc, config, throttler).await?;
    Ok((l_parts, EnumFileStatus::Recovered))
}

async fn run_split(
    job: &SpecSplitJob,
    file_desc: &SpecFileDescriptor,
    config: &SpecPipelineConfig,
    throttler: &ProgressThrottler,
) -> Result<Vec<SpecSplitPart>, PipelineError> {
    match job.mode {
        EnumSplitMode::BySheet => split_by_sheet(job, file_desc, config, throttler).await,
        EnumSplitMode::ByRows { n_rows_per_file } => {
            split_by_rows(job, file_desc, n_rows_per_file, config, throttler).await
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// #region BySheet

async fn split_by_sheet(
    job: &SpecSplitJob,
    file_desc: &SpecFileDescriptor,
    config: &SpecPipelineConfig,
    throttler: &ProgressThrottler,
) -> Result<Vec<SpecSplitPart>, PipelineError> {
    if !file_desc.format.is_workbook() {
        let source =
            open_row_source(file_desc, &EnumSheetSelector::First, config, &job.cancel).await?;
        let progress = |sub: f64| throttler.report(sub);
        let part = write_part(job, 1, C_SHEET_NAME_DEFAULT, source, config, &progress).await?;
        return Ok(vec![part]);
    }

    let path = file_desc.path.clone();
    let (mut reader, l_names) = tokio::task::spawn_blocking(move || {
        let reader = XlsxWorkbookReader::open(&path)?;
        let l_names = reader.sheet_names();
        Ok::<_, XlsxIoError>((reader, l_names))
    })
    .await??;
    let n_sheets = l_names.len();
    sheet_debug!("Splitting {} sheets of {}", n_sheets, file_desc.path.display());

    let mut l_parts = Vec::with_capacity(n_sheets);
    for (n_idx, name) in l_names.into_iter().enumerate() {
        if job.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let (reader_back, result) = tokio::task::spawn_blocking(move || {
            let result = reader.read_sheet(&name);
            (reader, result)
        })
        .await?;
        reader = reader_back;
        let source = result?;
        let sheet_name = source.sheet_name().to_string();

        let part = write_part(
            job,
            n_idx + 1,
            &sheet_name,
            EnumRowSource::Workbook(source),
            config,
            &|sub: f64| throttler.report_step(n_idx, n_sheets, sub),
        )
        .await?;
        l_parts.push(part);
    }
    Ok(l_parts)
}

/// Copy every row of `source` into the `n_part`-th output artifact.
async fn write_part(
    job: &SpecSplitJob,
    n_part: usize,
    sheet_name: &str,
    mut source: EnumRowSource,
    config: &SpecPipelineConfig,
    progress: &(dyn Fn(f64) + Send + Sync),
) -> Result<SpecSplitPart, PipelineError> {
    let path_file_out = derive_output_path(&job.dir_out, &job.derive_output_name(n_part))?;
    let mut sink = create_sink(job.format_out, path_file_out, sheet_name, config)?;
    let result = stream_rows(
        &job.file,
        &mut source,
        sink.as_mut(),
        &mut OutputCursor::new(0),
        &mut RowBatch::new(config.n_rows_batch()),
        &SpecTranscodeOptions::default(),
        SpecTranscodeControl {
            progress,
            cancel: &job.cancel,
        },
    )
    .await?;
    let path_file_out = sink.close()?;
    Ok(SpecSplitPart {
        path_file_out,
        cnt_rows: result.outcome.cnt_rows,
    })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ByRows

async fn split_by_rows(
    job: &SpecSplitJob,
    file_desc: &SpecFileDescriptor,
    n_rows_per_file: usize,
    config: &SpecPipelineConfig,
    throttler: &ProgressThrottler,
) -> Result<Vec<SpecSplitPart>, PipelineError> {
    let mut source =
        open_row_source(file_desc, &EnumSheetSelector::First, config, &job.cancel).await?;
    let n_rows_total = source.n_rows_total().max(1);
    let sheet_name = source
        .sheet_name()
        .unwrap_or(C_SHEET_NAME_DEFAULT)
        .to_string();
    let n_rows_pull = config.n_rows_batch();
    let mut iter_pulled = Vec::new().into_iter();
    let Some(row_header) = next_pulled_row(&mut source, &mut iter_pulled, n_rows_pull).await?
    else {
        return Err(PipelineError::Validation(format!(
            "Nothing to split: {} has no rows",
            derive_file_name(&file_desc.path)
        )));
    };

    let mut n_rows_read = 1usize;
    let mut row_pending = next_pulled_row(&mut source, &mut iter_pulled, n_rows_pull).await?;
    let mut l_parts: Vec<SpecSplitPart> = Vec::new();

    // A header-only source still yields one part.
    while l_parts.is_empty() || row_pending.is_some() {
        let n_part = l_parts.len() + 1;
        let path_file_out = derive_output_path(&job.dir_out, &job.derive_output_name(n_part))?;
        let mut sink = create_sink(job.format_out, path_file_out, &sheet_name, config)?;
        sink.write_header_row(0, &row_header)?;

        let mut cnt_rows_data = 0usize;
        while cnt_rows_data < n_rows_per_file {
            if job.cancel.is_cancelled() {
                sink.close()?;
                return Err(PipelineError::Cancelled);
            }
            let Some(row) = row_pending.take() else {
                break;
            };
            cnt_rows_data += 1;
            sink.write_row(cnt_rows_data, &row)?;
            n_rows_read += 1;
            row_pending = next_pulled_row(&mut source, &mut iter_pulled, n_rows_pull).await?;

            if n_rows_read % n_rows_pull == 0 {
                throttler.report(n_rows_read as f64 / n_rows_total as f64 * 100.0);
                tokio::task::yield_now().await;
            }
        }

        let path_file_out = sink.close()?;
        sheet_debug!(
            "Wrote {} ({cnt_rows_data} data rows)",
            path_file_out.display()
        );
        l_parts.push(SpecSplitPart {
            path_file_out,
            cnt_rows: cnt_rows_data as u64 + 1,
        });
    }
    Ok(l_parts)
}

/// Next row from the pulled batch, pulling a new batch when it runs dry.
async fn next_pulled_row(
    source: &mut EnumRowSource,
    iter_pulled: &mut std::vec::IntoIter<Vec<String>>,
    n_rows_pull: usize,
) -> Result<Option<Vec<String>>, PipelineError> {
    if let Some(row) = iter_pulled.next() {
        return Ok(Some(row));
    }
    *iter_pulled = source.pull_batch(n_rows_pull).await?.into_iter();
    Ok(iter_pulled.next())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
