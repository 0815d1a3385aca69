//! Merge orchestrator: many inputs, one destination artifact.

use std::path::Path;
use std::sync::Arc;

use sheetkit_io_fs::{
    SpecFileDescriptor, SpecProbeOptions, derive_output_path, ensure_output_dir, probe_files,
};
use sheetkit_io_xlsx::{C_SHEET_NAME_DEFAULT, EnumSheetSelector};
use sheetkit_log::{sheet_debug, sheet_info, sheet_warn};

use crate::batch::{
    SpecBatchContext, SpecBatchItem, SpecSpillSlot, derive_batch_size, open_spill_rows,
    remove_spill, spill_batch,
};
use crate::conf::{SpecPipelineConfig, SpecRecoveryPolicy};
use crate::cursor::OutputCursor;
use crate::mode::{SpecModeThresholds, derive_mode_decision};
use crate::progress::ProgressThrottler;
use crate::recovery::{
    EnumAlternativeRead, EnumRecoveryDecision, classify_failure, sleep_cancellable,
    try_alternative_read,
};
use crate::report::{EnumJobStatus, ReportJob, ReportJobBuilder};
use crate::sink::{RowSink, create_sink};
use crate::spec::{EnumFileStatus, PipelineError, RowBatch, SpecFileOutcome, SpecMergeJob};
use crate::transcode::{
    SpecTranscodeControl, SpecTranscodeOptions, SpecTranscodeResult, stream_rows,
    transcode_to_sink,
};

/// Reject jobs that cannot run before any output is touched.
pub fn validate_merge_job(job: &SpecMergeJob) -> Result<(), PipelineError> {
    if job.files.is_empty() {
        return Err(PipelineError::Validation("No input files to merge".to_string()));
    }
    if job.dir_out.as_os_str().is_empty() {
        return Err(PipelineError::Validation(
            "Output directory must not be empty".to_string(),
        ));
    }
    let l_missing = job
        .files
        .iter()
        .filter(|path| !path.is_file())
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>();
    if !l_missing.is_empty() {
        return Err(PipelineError::Validation(format!(
            "Input file(s) not found: {}",
            l_missing.join(", ")
        )));
    }
    Ok(())
}

/// Header rule shared by every file of one merge.
///
/// The first file that produces rows defines the header; all later files
/// drop their first row.
#[derive(Debug, Default)]
struct StateMergeHeader {
    row_header: Option<Vec<String>>,
}

impl StateMergeHeader {
    fn derive_options(&self, job: &SpecMergeJob, selector: EnumSheetSelector) -> SpecTranscodeOptions {
        match &self.row_header {
            None => SpecTranscodeOptions {
                if_skip_header: !job.if_include_headers,
                if_header_styled: true,
                selector,
                ..SpecTranscodeOptions::default()
            },
            Some(row_header) => SpecTranscodeOptions {
                if_skip_header: true,
                header_to_dedupe: job.if_dedupe_headers.then(|| row_header.clone()),
                selector,
                ..SpecTranscodeOptions::default()
            },
        }
    }

    fn accept(&mut self, row_header: Option<Vec<String>>) {
        if self.row_header.is_none() {
            self.row_header = row_header;
        }
    }
}

/// Run one merge job to completion. Never panics on bad input; every failure
/// ends up in the returned report.
pub async fn merge_files(
    job: &SpecMergeJob,
    config: Arc<SpecPipelineConfig>,
    throttler: Arc<ProgressThrottler>,
) -> ReportJob {
    let mut builder_report = ReportJobBuilder::default();
    let result_valid =
        validate_merge_job(job).and_then(|_| config.validate().map_err(PipelineError::from));
    if let Err(e) = result_valid {
        sheet_warn!("Merge rejected: {e}");
        return builder_report.build_from_error(&e);
    }
    if job.cancel.is_cancelled() {
        return builder_report.build_from_error(&PipelineError::Cancelled);
    }

    let (l_file_descs, report_probe) = {
        let paths = job.files.clone();
        let options = SpecProbeOptions::default();
        match tokio::task::spawn_blocking(move || probe_files(&paths, &options)).await {
            Ok(probed) => probed,
            Err(e) => return builder_report.build_from_error(&PipelineError::from(e)),
        }
    };
    sheet_debug!("{report_probe}");
    for warning in report_probe.warnings {
        builder_report.add_warning(warning);
    }

    let decision = derive_mode_decision(&l_file_descs, &SpecModeThresholds::from_config(&config));
    sheet_info!("{decision}");
    builder_report.set_streaming(decision.if_streaming);

    let c_name_out = job.derive_output_name();
    let sink = match ensure_output_dir(&job.dir_out)
        .and_then(|_| derive_output_path(&job.dir_out, &c_name_out))
        .map_err(PipelineError::from)
        .and_then(|path| create_sink(job.format_out, path, C_SHEET_NAME_DEFAULT, &config))
    {
        Ok(sink) => sink,
        Err(e) => {
            sheet_warn!("Failed to create merge output: {e}");
            return builder_report.build_from_error(&e);
        }
    };

    let mut run = MergeRun {
        job,
        policy: config.policy_recovery,
        config,
        throttler,
        sink,
        cursor: OutputCursor::new(0),
        batch: None,
        header: StateMergeHeader::default(),
        outcomes: vec![None; l_file_descs.len()],
        n_files_total: l_file_descs.len(),
    };
    let result = if decision.if_streaming {
        run.run_batches(&l_file_descs).await
    } else {
        run.run_sequential(&l_file_descs).await
    };
    run.finalize(result, &c_name_out, builder_report)
}

struct MergeRun<'a> {
    job: &'a SpecMergeJob,
    config: Arc<SpecPipelineConfig>,
    policy: SpecRecoveryPolicy,
    throttler: Arc<ProgressThrottler>,
    sink: Box<dyn RowSink>,
    cursor: OutputCursor,
    /// Pooled row buffer; dropped by the reclaim step of recovery.
    batch: Option<RowBatch>,
    header: StateMergeHeader,
    outcomes: Vec<Option<SpecFileOutcome>>,
    n_files_total: usize,
}

impl MergeRun<'_> {
    ////////////////////////////////////////////////////////////////////////////
    // #region Sequential

    async fn run_sequential(&mut self, l_file_descs: &[SpecFileDescriptor]) -> Result<(), PipelineError> {
        for (n_idx, file_desc) in l_file_descs.iter().enumerate() {
            if self.job.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let outcome = self.process_file(n_idx, file_desc, None).await?;
            self.record(n_idx, outcome);
        }
        Ok(())
    }

    /// Process one file with recovery. Only cancellation is returned as `Err`.
    async fn process_file(
        &mut self,
        n_idx: usize,
        file_desc: &SpecFileDescriptor,
        err_prior: Option<PipelineError>,
    ) -> Result<SpecFileOutcome, PipelineError> {
        let path = file_desc.path.as_path();
        let err = match err_prior {
            Some(err) => err,
            None => match self.attempt(n_idx, file_desc, EnumSheetSelector::First).await {
                Ok(result) => return Ok(self.accept(result, EnumFileStatus::Succeeded)),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => e,
            },
        };

        let decision = classify_failure(&err, &self.policy);
        sheet_warn!(
            "Failed to process {} ({err}); recovery: {decision:?}",
            path.display()
        );
        let selector = match decision {
            EnumRecoveryDecision::RetryAfterDelay(duration) => {
                sleep_cancellable(duration, &self.job.cancel).await?;
                EnumSheetSelector::First
            }
            EnumRecoveryDecision::RetryAfterReclaimAndDelay(duration) => {
                self.reclaim();
                sleep_cancellable(duration, &self.job.cancel).await?;
                EnumSheetSelector::First
            }
            EnumRecoveryDecision::TryAlternativeRead => {
                let path_owned = path.to_path_buf();
                let alternative =
                    match tokio::task::spawn_blocking(move || try_alternative_read(&path_owned)).await {
                        Ok(alternative) => alternative,
                        Err(e) => return Ok(SpecFileOutcome::failed(path, e.to_string())),
                    };
                match alternative {
                    EnumAlternativeRead::SkipAsHtml => {
                        return Ok(SpecFileOutcome::new(path, EnumFileStatus::Skipped, 0));
                    }
                    EnumAlternativeRead::RetryFirstNonEmptySheet => EnumSheetSelector::FirstNonEmpty,
                    EnumAlternativeRead::Unrecoverable(msg) => {
                        return Ok(SpecFileOutcome::failed(path, format!("{err} ({msg})")));
                    }
                }
            }
            EnumRecoveryDecision::Unrecoverable => {
                return Ok(SpecFileOutcome::failed(path, err.to_string()));
            }
        };

        match self.attempt(n_idx, file_desc, selector).await {
            Ok(result) => {
                sheet_info!("Recovered {}", path.display());
                Ok(self.accept(result, EnumFileStatus::Recovered))
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                sheet_warn!("Retry of {} failed ({e})", path.display());
                Ok(SpecFileOutcome::failed(path, e.to_string()))
            }
        }
    }

    /// One attempt, wrapped in a sink segment so a failure leaves no rows.
    async fn attempt(
        &mut self,
        n_idx: usize,
        file_desc: &SpecFileDescriptor,
        selector: EnumSheetSelector,
    ) -> Result<SpecTranscodeResult, PipelineError> {
        let options = self.header.derive_options(self.job, selector);
        let n_row_start = self.cursor.position();
        self.sink.begin_segment(n_row_start)?;

        let throttler = self.throttler.clone();
        let n_files_total = self.n_files_total;
        let progress = move |sub: f64| throttler.report_step(n_idx, n_files_total, sub);
        let n_rows_batch = self.config.n_rows_batch();
        let batch = self.batch.get_or_insert_with(|| RowBatch::new(n_rows_batch));

        let result = transcode_to_sink(
            file_desc,
            self.sink.as_mut(),
            &mut self.cursor,
            batch,
            &options,
            &self.config,
            SpecTranscodeControl {
                progress: &progress,
                cancel: &self.job.cancel,
            },
        )
        .await;
        self.settle_segment(n_row_start, result)
    }

    fn settle_segment(
        &mut self,
        n_row_start: usize,
        result: Result<SpecTranscodeResult, PipelineError>,
    ) -> Result<SpecTranscodeResult, PipelineError> {
        match result {
            Ok(result) => {
                self.sink.commit_segment();
                Ok(result)
            }
            Err(e) => {
                let n_rows_dropped = self.sink.discard_segment()?;
                self.cursor.rewind_to(n_row_start);
                if n_rows_dropped > 0 {
                    sheet_debug!("Discarded {n_rows_dropped} partial rows");
                }
                Err(e)
            }
        }
    }

    fn accept(&mut self, result: SpecTranscodeResult, status: EnumFileStatus) -> SpecFileOutcome {
        self.header.accept(result.row_header);
        SpecFileOutcome {
            status,
            ..result.outcome
        }
    }

    fn reclaim(&mut self) {
        if let Some(batch) = self.batch.as_mut() {
            batch.release();
        }
        sheet_debug!("Released pooled row buffers");
    }

    fn record(&mut self, n_idx: usize, outcome: SpecFileOutcome) {
        self.throttler.report_step(n_idx + 1, self.n_files_total, 0.0);
        self.outcomes[n_idx] = Some(outcome);
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Batch

    async fn run_batches(&mut self, l_file_descs: &[SpecFileDescriptor]) -> Result<(), PipelineError> {
        let dir_spill = tempfile::Builder::new()
            .prefix("sheetkit_spill_")
            .tempdir()
            .map_err(|e| PipelineError::io(&std::env::temp_dir(), e))?;
        let context = SpecBatchContext {
            config: self.config.clone(),
            throttler: self.throttler.clone(),
            n_files_total: self.n_files_total,
            cancel: self.job.cancel.clone(),
        };
        let n_batch_size = derive_batch_size(self.config.n_parallelism());
        let l_items = l_file_descs
            .iter()
            .enumerate()
            .map(|(n_idx, file_desc)| SpecBatchItem {
                n_idx,
                file_desc: file_desc.clone(),
            })
            .collect::<Vec<_>>();

        for l_chunk in l_items.chunks(n_batch_size) {
            if self.job.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let l_reservations = self
                .cursor
                .reserve(l_chunk.len(), self.config.n_rows_reserved_per_file);
            let l_slots = spill_batch(l_chunk.to_vec(), l_reservations, dir_spill.path(), &context).await;
            self.compact_slots(l_slots).await?;
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    /// Replay finished slots in file order, then re-run deferred files sequentially.
    async fn compact_slots(&mut self, l_slots: Vec<SpecSpillSlot>) -> Result<(), PipelineError> {
        let mut l_deferred = Vec::new();
        for slot in l_slots {
            let SpecSpillSlot {
                n_idx,
                file_desc,
                path_spill,
                result,
                ..
            } = slot;
            let result = match result {
                Ok(_) => self.replay_slot(&file_desc.path, &path_spill).await,
                Err(e) => Err(e),
            };
            remove_spill(&path_spill);
            match result {
                Ok(result) => {
                    let outcome = self.accept(result, EnumFileStatus::Succeeded);
                    self.record(n_idx, outcome);
                }
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(PipelineError::ReservationExceeded { .. }) => {
                    sheet_info!(
                        "{} overflowed its reserved slot; processing it sequentially",
                        file_desc.path.display()
                    );
                    l_deferred.push((n_idx, file_desc, None));
                }
                Err(e) => l_deferred.push((n_idx, file_desc, Some(e))),
            }
        }

        for (n_idx, file_desc, err_prior) in l_deferred {
            if self.job.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let outcome = self.process_file(n_idx, &file_desc, err_prior).await?;
            self.record(n_idx, outcome);
        }
        Ok(())
    }

    async fn replay_slot(
        &mut self,
        path_input: &Path,
        path_spill: &Path,
    ) -> Result<SpecTranscodeResult, PipelineError> {
        let mut source = open_spill_rows(path_spill, &self.config).await?;
        let options = self.header.derive_options(self.job, EnumSheetSelector::First);
        let n_row_start = self.cursor.position();
        self.sink.begin_segment(n_row_start)?;

        let n_rows_batch = self.config.n_rows_batch();
        let batch = self.batch.get_or_insert_with(|| RowBatch::new(n_rows_batch));
        let result = stream_rows(
            path_input,
            &mut source,
            self.sink.as_mut(),
            &mut self.cursor,
            batch,
            &options,
            SpecTranscodeControl {
                progress: &|_: f64| {},
                cancel: &self.job.cancel,
            },
        )
        .await;
        self.settle_segment(n_row_start, result)
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Finalize

    fn finalize(
        mut self,
        result: Result<(), PipelineError>,
        c_name_out: &str,
        mut builder_report: ReportJobBuilder,
    ) -> ReportJob {
        for outcome in self.outcomes.iter_mut().filter_map(Option::take) {
            builder_report.add_outcome(outcome);
        }

        if let Err(e) = result {
            match self.sink.close() {
                Ok(path_file_out) => builder_report.add_output(path_file_out, 0),
                Err(e_save) => sheet_warn!("Failed to save partial merge output ({e_save})"),
            }
            sheet_warn!("Merge stopped: {e}");
            return builder_report.build_from_error(&e);
        }
        let path_file_out = match self.sink.close() {
            Ok(path_file_out) => path_file_out,
            Err(e) => {
                sheet_warn!("Failed to save merge output ({e})");
                return builder_report.build(
                    EnumJobStatus::Failed,
                    format!("Failed to save {c_name_out}: {e}"),
                );
            }
        };
        builder_report.add_output(path_file_out, 0);
        self.throttler.finish();

        let l_failed = builder_report
            .outcomes()
            .iter()
            .filter(|o| !o.if_success())
            .map(|o| o.file_name.clone())
            .collect::<Vec<_>>();
        let cnt_rows = builder_report
            .outcomes()
            .iter()
            .map(|o| o.cnt_rows)
            .sum::<u64>();
        let report = if l_failed.is_empty() {
            builder_report.build(
                EnumJobStatus::Succeeded,
                format!(
                    "Merged {} files into {c_name_out} ({cnt_rows} rows)",
                    self.n_files_total
                ),
            )
        } else {
            builder_report.build(
                EnumJobStatus::PartiallySucceeded,
                format!(
                    "Merge completed, but {} file(s) failed: {}",
                    l_failed.len(),
                    l_failed.join(", ")
                ),
            )
        };
        sheet_info!("{report}");
        report
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use calamine::{Reader, open_workbook_auto};
    use rust_xlsxwriter::Workbook;

    use super::*;
    use crate::progress::{FnProgressSink, NoProgress, ProgressSink};
    use crate::spec::EnumOutputFormat;

    fn write_csv(path: &Path, n_rows: usize, tag: &str) {
        let mut text = String::from("id,tag\n");
        for n_idx in 0..n_rows {
            text.push_str(&format!("{n_idx},{tag}\n"));
        }
        std::fs::write(path, text).expect("write csv");
    }

    fn read_xlsx_rows(path: &Path) -> Vec<Vec<String>> {
        let mut workbook = open_workbook_auto(path).expect("open output");
        let name = workbook.sheet_names()[0].clone();
        workbook
            .worksheet_range(&name)
            .expect("range")
            .rows()
            .map(|row| row.iter().map(sheetkit_io_xlsx::cell_to_string).collect())
            .collect()
    }

    fn config_streaming(n_rows_reserved_per_file: usize) -> SpecPipelineConfig {
        SpecPipelineConfig {
            if_force_streaming: true,
            n_rows_reserved_per_file,
            n_max_parallelism: 4,
            policy_recovery: SpecRecoveryPolicy::immediate(),
            ..SpecPipelineConfig::default()
        }
    }

    async fn run_merge(
        job: &SpecMergeJob,
        config: SpecPipelineConfig,
        progress: Arc<dyn ProgressSink>,
    ) -> ReportJob {
        let throttler = Arc::new(ProgressThrottler::from_config(progress, &config));
        merge_files(job, Arc::new(config), throttler).await
    }

    #[tokio::test]
    async fn merge_partial_failure_keeps_other_files() {
        sheetkit_log::initialize_for_tests();
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut l_files = Vec::new();
        for n_idx in 0..5 {
            let path = if n_idx == 2 {
                let path = tmp.path().join("c_broken.xlsx");
                std::fs::write(&path, b"this is not a zip archive").expect("write");
                path
            } else {
                let path = tmp.path().join(format!("f{n_idx}.csv"));
                write_csv(&path, 3, &format!("t{n_idx}"));
                path
            };
            l_files.push(path);
        }

        let job = SpecMergeJob::new(l_files, tmp.path().join("out"));
        let config = SpecPipelineConfig {
            policy_recovery: SpecRecoveryPolicy::immediate(),
            ..SpecPipelineConfig::default()
        };
        let report = run_merge(&job, config, Arc::new(NoProgress)).await;

        assert_eq!(report.status, EnumJobStatus::PartiallySucceeded, "{report}");
        assert!(report.if_success());
        assert_eq!(
            report.message,
            "Merge completed, but 1 file(s) failed: c_broken.xlsx"
        );
        assert_eq!(report.failed_files, vec!["c_broken.xlsx".to_string()]);
        assert_eq!(report.count_status(EnumFileStatus::Failed), 1);
        assert!(!report.if_streaming);

        let path_out = report.path_file_out().expect("output");
        assert!(path_out.ends_with("f0_Merged.xlsx"));
        let l_rows = read_xlsx_rows(path_out);
        assert_eq!(l_rows.len(), 1 + 4 * 3);
        assert_eq!(l_rows[0], vec!["id".to_string(), "tag".to_string()]);
        assert_eq!(l_rows[12][1], "t4");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn merge_batch_mode_sums_rows_in_file_order() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let l_counts = [5usize, 1, 7, 3, 4];
        let mut l_files = Vec::new();
        for (n_idx, n_rows) in l_counts.iter().enumerate() {
            let path = tmp.path().join(format!("p{n_idx}.csv"));
            write_csv(&path, *n_rows, &format!("t{n_idx}"));
            l_files.push(path);
        }

        let mut job = SpecMergeJob::new(l_files, tmp.path().join("out"));
        job.format_out = EnumOutputFormat::Csv;
        job.if_dedupe_headers = true;
        let report = run_merge(&job, config_streaming(100), Arc::new(NoProgress)).await;

        assert_eq!(report.status, EnumJobStatus::Succeeded, "{report}");
        assert!(report.if_streaming);
        let n_rows_expected = 1 + l_counts.iter().sum::<usize>();
        assert_eq!(report.cnt_rows_written, n_rows_expected as u64);

        let text = std::fs::read_to_string(report.path_file_out().expect("output"))
            .expect("read output");
        let l_tags = text
            .trim_start_matches('\u{feff}')
            .lines()
            .skip(1)
            .map(|line| line.split(',').nth(1).unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        let mut l_expected = Vec::new();
        for (n_idx, n_rows) in l_counts.iter().enumerate() {
            l_expected.extend(std::iter::repeat_n(format!("t{n_idx}"), *n_rows));
        }
        assert_eq!(l_tags, l_expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn merge_batch_mode_partial_failure_keeps_order_of_other_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut l_files = Vec::new();
        for n_idx in 0..5 {
            let path = if n_idx == 2 {
                let path = tmp.path().join("c_broken.xlsx");
                std::fs::write(&path, b"this is not a zip archive").expect("write");
                path
            } else {
                let path = tmp.path().join(format!("f{n_idx}.csv"));
                write_csv(&path, 3, &format!("t{n_idx}"));
                path
            };
            l_files.push(path);
        }

        let mut job = SpecMergeJob::new(l_files, tmp.path().join("out"));
        job.format_out = EnumOutputFormat::Csv;
        let report = run_merge(&job, config_streaming(100), Arc::new(NoProgress)).await;

        assert_eq!(report.status, EnumJobStatus::PartiallySucceeded, "{report}");
        assert!(report.if_streaming);
        assert_eq!(report.failed_files, vec!["c_broken.xlsx".to_string()]);
        assert_eq!(report.outcomes[2].status, EnumFileStatus::Failed);
        assert_eq!(report.count_status(EnumFileStatus::Succeeded), 4);

        let text = std::fs::read_to_string(report.path_file_out().expect("output"))
            .expect("read output");
        let l_lines = text.trim_start_matches('\u{feff}').lines().collect::<Vec<_>>();
        assert_eq!(l_lines[0], "id,tag");
        let l_tags = l_lines
            .iter()
            .skip(1)
            .map(|line| line.split(',').nth(1).unwrap_or_default())
            .collect::<Vec<_>>();
        let mut l_expected = Vec::new();
        for tag in ["t0", "t1", "t3", "t4"] {
            l_expected.extend([tag; 3]);
        }
        assert_eq!(l_tags, l_expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn merge_batch_overflow_falls_back_to_sequential() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_small = tmp.path().join("a_small.csv");
        let path_big = tmp.path().join("b_big.csv");
        write_csv(&path_small, 2, "small");
        write_csv(&path_big, 50, "big");

        let job = SpecMergeJob::new(vec![path_small, path_big], tmp.path().join("out"));
        let report = run_merge(&job, config_streaming(10), Arc::new(NoProgress)).await;

        assert_eq!(report.status, EnumJobStatus::Succeeded, "{report}");
        assert_eq!(report.outcomes[1].status, EnumFileStatus::Succeeded);
        assert_eq!(report.outcomes[1].cnt_rows, 50);
        let l_rows = read_xlsx_rows(report.path_file_out().expect("output"));
        assert_eq!(l_rows.len(), 1 + 2 + 50);
        assert_eq!(l_rows[2][1], "small");
        assert_eq!(l_rows[3][1], "big");
    }

    #[tokio::test]
    async fn merge_workbook_and_html_inputs_with_progress() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_xlsx = tmp.path().join("a.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "name").expect("write");
        sheet.write_string(0, 1, "qty").expect("write");
        sheet.write_string(1, 0, "apple").expect("write");
        sheet.write_number(1, 1, 3.0).expect("write");
        workbook.save(&path_xlsx).expect("save");

        let path_html = tmp.path().join("b.xls");
        std::fs::write(
            &path_html,
            "<html><body><table><tr><th>name</th><th>qty</th></tr>\
             <tr><td>pear &amp; co</td><td>5</td></tr></table></body></html>",
        )
        .expect("write html");

        let l_progress = Arc::new(Mutex::new(Vec::new()));
        let l_progress_sink = l_progress.clone();
        let sink = FnProgressSink(move |value: f64| {
            l_progress_sink.lock().expect("lock").push(value);
        });
        let job = SpecMergeJob::new(vec![path_xlsx, path_html], tmp.path());
        let report = run_merge(&job, SpecPipelineConfig::default(), Arc::new(sink)).await;

        assert_eq!(report.status, EnumJobStatus::Succeeded, "{report}");
        assert_eq!(report.message, "Merged 2 files into a_Merged.xlsx (3 rows)");
        let l_rows = read_xlsx_rows(report.path_file_out().expect("output"));
        assert_eq!(l_rows[1], vec!["apple".to_string(), "3".to_string()]);
        assert_eq!(l_rows[2], vec!["pear & co".to_string(), "5".to_string()]);

        let l_progress = l_progress.lock().expect("lock").clone();
        assert_eq!(l_progress.last().copied(), Some(100.0));
        assert!(l_progress.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn merge_without_headers_skips_every_first_row() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_a = tmp.path().join("a.csv");
        let path_b = tmp.path().join("b.csv");
        write_csv(&path_a, 2, "a");
        std::fs::write(&path_b, "id,tag\n0,b\nid,tag\n1,b\n").expect("write");

        let mut job = SpecMergeJob::new(vec![path_a, path_b], tmp.path());
        job.format_out = EnumOutputFormat::Csv;
        job.if_include_headers = false;
        job.if_dedupe_headers = true;
        let config = SpecPipelineConfig {
            if_csv_bom: false,
            ..SpecPipelineConfig::default()
        };
        let report = run_merge(&job, config, Arc::new(NoProgress)).await;

        assert_eq!(report.status, EnumJobStatus::Succeeded, "{report}");
        let text = std::fs::read_to_string(report.path_file_out().expect("output"))
            .expect("read output");
        assert_eq!(text, "0,a\n1,a\n0,b\n1,b\n");
    }

    #[tokio::test]
    async fn merge_rejects_invalid_jobs_and_honors_cancellation() {
        let tmp = tempfile::tempdir().expect("tempdir");

        let report = run_merge(
            &SpecMergeJob::new(Vec::new(), tmp.path()),
            SpecPipelineConfig::default(),
            Arc::new(NoProgress),
        )
        .await;
        assert_eq!(report.status, EnumJobStatus::Failed);
        assert_eq!(report.message, "No input files to merge");

        let report = run_merge(
            &SpecMergeJob::new(vec![tmp.path().join("missing.csv")], tmp.path()),
            SpecPipelineConfig::default(),
            Arc::new(NoProgress),
        )
        .await;
        assert_eq!(report.status, EnumJobStatus::Failed);
        assert!(report.message.contains("missing.csv"), "{}", report.message);

        let path_csv = tmp.path().join("a.csv");
        write_csv(&path_csv, 2, "x");
        let job = SpecMergeJob::new(vec![path_csv], tmp.path().join("out"));
        job.cancel.cancel();
        let report = run_merge(&job, SpecPipelineConfig::default(), Arc::new(NoProgress)).await;
        assert_eq!(report.status, EnumJobStatus::Cancelled);
        assert!(report.failed_files.is_empty());
        assert!(!tmp.path().join("out").exists());
    }
}
