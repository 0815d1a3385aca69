//! `sheetkit_pipeline` v1:
//! Low-memory merge/split pipeline for spreadsheet-like files.
//!
//! Modules:
//! - `service`   : job entry points, config snapshot, cross-job semaphore
//! - `merge`     : many inputs -> one artifact (sequential or batch mode)
//! - `split`     : one input -> many artifacts (by rows or by sheet)
//! - `batch`     : parallel spill of one batch into reserved slots
//! - `transcode` : row streaming from a source into a sink
//! - `source`    : CSV / workbook / HTML row sources
//! - `sink`      : row-addressed XLSX/CSV destinations with rollback segments
//! - `delimited` : CSV reading and writing with encoding control
//! - `html`      : tolerant HTML table parser
//! - `cursor`    : output row cursor and reservations
//! - `mode`      : streaming mode decision
//! - `recovery`  : failure classification and retry decisions
//! - `progress`  : throttled progress reporting
//! - `conf`      : configuration and reloadable store
//! - `report`    : job report models
//! - `spec`      : jobs/outcomes/errors

pub mod batch;
pub mod conf;
pub mod cursor;
pub mod delimited;
pub mod html;
pub mod merge;
pub mod mode;
pub mod progress;
pub mod recovery;
pub mod report;
pub mod service;
pub mod sink;
pub mod source;
pub mod spec;
pub mod split;
pub mod transcode;

pub use conf::{ConfigStore, SpecPipelineConfig, SpecRecoveryPolicy};
pub use cursor::{OutputCursor, SpecRowReservation};
pub use delimited::{CsvRowSink, CsvRowSource, SpecCsvReadOptions, SpecCsvWriteOptions};
pub use html::{SpecHtmlParseConfig, parse_table};
pub use merge::{merge_files, validate_merge_job};
pub use mode::{EnumModeReason, SpecModeDecision, SpecModeThresholds, derive_mode_decision};
pub use progress::{FnProgressSink, NoProgress, ProgressSink, ProgressThrottler};
pub use recovery::{EnumAlternativeRead, EnumRecoveryDecision, classify_failure};
pub use report::{EnumJobStatus, ReportJob, ReportJobBuilder};
pub use service::SheetService;
pub use sink::{RowSink, create_sink};
pub use source::{EnumRowSource, open_row_source};
pub use spec::{
    ConfigError, EnumFailureKind, EnumFileStatus, EnumOutputFormat, EnumSplitMode,
    PipelineError, RowBatch, SpecFileOutcome, SpecMergeJob, SpecSplitJob,
};
pub use split::{SpecSplitPart, split_file, validate_split_job};
