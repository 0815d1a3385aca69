//! `sheetkit_io_fs` v1:
//! File system capability consumed by the tabular pipeline.
//!
//! Modules:
//! - `probe`    : size resolution and format sniffing (parallel)
//! - `discover` : directory expansion by include/exclude patterns
//! - `spec`     : descriptors/options/errors
//! - `report`   : probe report model
//! - `util`     : sniffing and output path helpers

pub mod discover;
pub mod probe;
pub mod report;
pub mod spec;
pub mod util;

pub use discover::{SpecDiscoverOptions, TUP_PATTERNS_TABULAR, collect_input_files};
pub use probe::{probe_file, probe_files};
pub use report::{ReportProbe, ReportProbeBuilder, SpecProbeIssue};
pub use spec::{
    EnumFileFormat, EnumPatternMode, FsError, SpecFileDescriptor, SpecProbeOptions,
    derive_base_name, derive_extension,
};
pub use util::{
    N_BYTES_SNIFF_DEFAULT, TUP_HTML_MARKERS, contains_html_markers, derive_output_path,
    detect_format, ensure_output_dir, find_ascii_ci, replace_file_atomic, rfind_ascii_ci,
    sniff_html_markers,
};
