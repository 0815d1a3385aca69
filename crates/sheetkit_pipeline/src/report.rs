//! Job report models and mutable report builder.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::spec::{EnumFileStatus, PipelineError, SpecFileOutcome};

/// Final state of one merge/split job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumJobStatus {
    /// Every input handled.
    Succeeded,
    /// Output saved, some inputs failed.
    PartiallySucceeded,
    /// Validation or sink-level failure.
    Failed,
    /// Cancellation observed.
    Cancelled,
}

impl EnumJobStatus {
    /// Lowercase label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::PartiallySucceeded => "partially_succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Result surface of one job.
#[derive(Debug, Clone)]
pub struct ReportJob {
    /// Final state.
    pub status: EnumJobStatus,
    /// User-facing summary.
    pub message: String,
    /// Written artifacts (one for merge, one per part for split).
    pub paths_file_out: Vec<PathBuf>,
    /// Names of inputs that failed.
    pub failed_files: Vec<String>,
    /// Per-input outcomes in input order.
    pub outcomes: Vec<SpecFileOutcome>,
    /// Rows written across all artifacts.
    pub cnt_rows_written: u64,
    /// Whether streaming (batch) mode was used.
    pub if_streaming: bool,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl ReportJob {
    /// `Succeeded` and `PartiallySucceeded` count as success.
    pub fn if_success(&self) -> bool {
        matches!(
            self.status,
            EnumJobStatus::Succeeded | EnumJobStatus::PartiallySucceeded
        )
    }

    /// First written artifact (the merge output).
    pub fn path_file_out(&self) -> Option<&Path> {
        self.paths_file_out.first().map(PathBuf::as_path)
    }

    /// Number of outcomes with `status`.
    pub fn count_status(&self, status: EnumFileStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Machine-readable counters.
    pub fn to_dict(&self) -> BTreeMap<String, u64> {
        let mut dict_counts = BTreeMap::new();
        dict_counts.insert("cnt_files".to_string(), self.outcomes.len() as u64);
        for status in [
            EnumFileStatus::Succeeded,
            EnumFileStatus::Recovered,
            EnumFileStatus::Skipped,
            EnumFileStatus::Failed,
        ] {
            dict_counts.insert(
                format!("cnt_{}", status.label()),
                self.count_status(status) as u64,
            );
        }
        dict_counts.insert("cnt_outputs".to_string(), self.paths_file_out.len() as u64);
        dict_counts.insert("cnt_rows_written".to_string(), self.cnt_rows_written);
        dict_counts.insert("cnt_warnings".to_string(), self.warnings.len() as u64);
        dict_counts.insert("if_streaming".to_string(), u64::from(self.if_streaming));
        dict_counts
    }

    /// Human-readable one-line summary.
    pub fn format(&self, prefix: &str) -> String {
        format!(
            "{prefix} status={} files={} failed={} outputs={} rows={} streaming={} message={:?}",
            self.status.label(),
            self.outcomes.len(),
            self.failed_files.len(),
            self.paths_file_out.len(),
            self.cnt_rows_written,
            self.if_streaming,
            self.message,
        )
    }
}

impl fmt::Display for ReportJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format("[JOB]"))
    }
}

/// Mutable accumulator for job results.
#[derive(Debug, Default, Clone)]
pub struct ReportJobBuilder {
    paths_file_out: Vec<PathBuf>,
    outcomes: Vec<SpecFileOutcome>,
    cnt_rows_written: u64,
    if_streaming: bool,
    warnings: Vec<String>,
}

impl ReportJobBuilder {
    /// Record one input outcome; its rows count toward the total.
    pub fn add_outcome(&mut self, outcome: SpecFileOutcome) {
        self.cnt_rows_written += outcome.cnt_rows;
        self.outcomes.push(outcome);
    }

    /// Record one written artifact with its row count.
    pub fn add_output(&mut self, path: PathBuf, cnt_rows: u64) {
        self.paths_file_out.push(path);
        self.cnt_rows_written += cnt_rows;
    }

    /// Mark the job as run in streaming mode.
    pub fn set_streaming(&mut self, if_streaming: bool) {
        self.if_streaming = if_streaming;
    }

    /// Add warning message.
    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    /// Outcomes recorded so far.
    pub fn outcomes(&self) -> &[SpecFileOutcome] {
        &self.outcomes
    }

    /// Finalize builder into immutable report.
    pub fn build(self, status: EnumJobStatus, message: String) -> ReportJob {
        let failed_files = self
            .outcomes
            .iter()
            .filter(|o| !o.if_success())
            .map(|o| o.file_name.clone())
            .collect();
        ReportJob {
            status,
            message,
            paths_file_out: self.paths_file_out,
            failed_files,
            outcomes: self.outcomes,
            cnt_rows_written: self.cnt_rows_written,
            if_streaming: self.if_streaming,
            warnings: self.warnings,
        }
    }

    /// Finalize as `Failed`, or `Cancelled` when `err` is a cancellation.
    pub fn build_from_error(self, err: &PipelineError) -> ReportJob {
        if err.is_cancelled() {
            return self.build(EnumJobStatus::Cancelled, "Operation cancelled".to_string());
        }
        self.build(EnumJobStatus::Failed, err.to_string())
    }
}
