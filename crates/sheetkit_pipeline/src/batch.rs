//! Batch mode: parallel per-file spill into reserved slots.
//!
//! Every file of a batch streams into its own temporary CSV artifact, bounded
//! by a pre-reserved row range. The orchestrator later replays the slots into
//! the shared sink in file order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sheetkit_io_fs::SpecFileDescriptor;
use sheetkit_log::{sheet_debug, sheet_trace};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::conf::SpecPipelineConfig;
use crate::cursor::{OutputCursor, SpecRowReservation};
use crate::delimited::{CsvRowSink, CsvRowSource, SpecCsvReadOptions, SpecCsvWriteOptions};
use crate::progress::ProgressThrottler;
use crate::sink::RowSink;
use crate::source::EnumRowSource;
use crate::spec::{PipelineError, RowBatch};
use crate::transcode::{
    SpecTranscodeControl, SpecTranscodeOptions, SpecTranscodeResult, transcode_to_sink,
};

/// Files per batch: `max(1, parallelism / 2)`.
pub fn derive_batch_size(n_parallelism: usize) -> usize {
    (n_parallelism / 2).max(1)
}

/// Concurrent tasks within a batch: `min(parallelism, 2)`.
pub fn derive_task_permits(n_parallelism: usize) -> usize {
    n_parallelism.clamp(1, 2)
}

/// One batch member with its position in the job.
#[derive(Debug, Clone)]
pub struct SpecBatchItem {
    /// Index of the file in the job's input order.
    pub n_idx: usize,
    /// Probed input.
    pub file_desc: SpecFileDescriptor,
}

/// A spilled file waiting for compaction.
#[derive(Debug)]
pub struct SpecSpillSlot {
    /// Index of the file in the job's input order.
    pub n_idx: usize,
    /// Probed input.
    pub file_desc: SpecFileDescriptor,
    /// Reserved output range.
    pub reservation: SpecRowReservation,
    /// Temporary artifact holding the rows.
    pub path_spill: PathBuf,
    /// Spill result; `ReservationExceeded` when the slot overflowed.
    pub result: Result<SpecTranscodeResult, PipelineError>,
}

/// Reopen a spilled artifact for replay.
pub async fn open_spill_rows(
    path_spill: &Path,
    config: &SpecPipelineConfig,
) -> Result<EnumRowSource, PipelineError> {
    let path_spill = path_spill.to_path_buf();
    let options = SpecCsvReadOptions {
        n_bytes_buffer: config.n_bytes_buffer_read(),
        ..SpecCsvReadOptions::default()
    };
    let source =
        tokio::task::spawn_blocking(move || CsvRowSource::open(&path_spill, &options)).await??;
    Ok(EnumRowSource::Csv(source))
}

/// Delete a spilled artifact; failures are only logged.
pub fn remove_spill(path_spill: &Path) {
    if let Err(e) = std::fs::remove_file(path_spill) {
        sheet_debug!("Failed to remove spill {} ({e})", path_spill.display());
    }
}

/// Shared state handed to every spill task.
#[derive(Clone)]
pub struct SpecBatchContext {
    /// Job configuration snapshot.
    pub config: Arc<SpecPipelineConfig>,
    /// Job progress throttler.
    pub throttler: Arc<ProgressThrottler>,
    /// Number of files in the whole job.
    pub n_files_total: usize,
    /// Job cancellation.
    pub cancel: CancellationToken,
}

/// Spill every item of one batch concurrently; slots come back in input order.
///
/// A failing file never aborts the batch; its error is kept in the slot.
pub async fn spill_batch(
    l_items: Vec<SpecBatchItem>,
    l_reservations: Vec<SpecRowReservation>,
    dir_spill: &Path,
    context: &SpecBatchContext,
) -> Vec<SpecSpillSlot> {
    let sem_tasks = Arc::new(Semaphore::new(derive_task_permits(
        context.config.n_parallelism(),
    )));

    let mut l_handles = Vec::with_capacity(l_items.len());
    for (item, reservation) in l_items.into_iter().zip(l_reservations) {
        let path_spill = dir_spill.join(format!("slot_{:05}.csv", item.n_idx));
        let handle = tokio::spawn(spill_one(
            item.clone(),
            reservation,
            path_spill.clone(),
            sem_tasks.clone(),
            context.clone(),
        ));
        l_handles.push((item, reservation, path_spill, handle));
    }

    let mut l_slots = Vec::with_capacity(l_handles.len());
    for (item, reservation, path_spill, handle) in l_handles {
        let result = handle.await.map_err(PipelineError::from).and_then(|r| r);
        sheet_trace!(
            "Slot {} ({}..{}) of {} done: ok={}",
            item.n_idx,
            reservation.n_row_start,
            reservation.n_row_end(),
            item.file_desc.path.display(),
            result.is_ok()
        );
        l_slots.push(SpecSpillSlot {
            n_idx: item.n_idx,
            file_desc: item.file_desc,
            reservation,
            path_spill,
            result,
        });
    }
    l_slots
}

async fn spill_one(
    item: SpecBatchItem,
    reservation: SpecRowReservation,
    path_spill: PathBuf,
    sem_tasks: Arc<Semaphore>,
    context: SpecBatchContext,
) -> Result<SpecTranscodeResult, PipelineError> {
    let _permit = tokio::select! {
        _ = context.cancel.cancelled() => return Err(PipelineError::Cancelled),
        permit = sem_tasks.acquire_owned() => permit.map_err(|e| PipelineError::Task(e.to_string()))?,
    };

    let mut sink = CsvRowSink::create(
        path_spill,
        &SpecCsvWriteOptions {
            if_bom: false,
            n_bytes_buffer: context.config.n_bytes_buffer_write(),
        },
    )?;
    let mut cursor = OutputCursor::new(0);
    let mut batch = RowBatch::new(context.config.n_rows_batch());
    let options = SpecTranscodeOptions {
        n_rows_cap: Some(reservation.n_rows_capacity),
        ..SpecTranscodeOptions::default()
    };
    let throttler = context.throttler.clone();
    let (n_idx, n_files_total) = (item.n_idx, context.n_files_total);
    let progress = move |sub: f64| throttler.report_step(n_idx, n_files_total, sub);

    let result = transcode_to_sink(
        &item.file_desc,
        &mut sink,
        &mut cursor,
        &mut batch,
        &options,
        &context.config,
        SpecTranscodeControl {
            progress: &progress,
            cancel: &context.cancel,
        },
    )
    .await;
    sink.close()?;
    result
}
