//! Low-memory mode selection.

use std::fmt;

use sheetkit_io_fs::SpecFileDescriptor;
use sheetkit_log::{sheet_debug, sheet_warn};

use crate::conf::SpecPipelineConfig;

/// Size thresholds for [`should_use_streaming_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecModeThresholds {
    /// A file strictly larger than this is "large".
    pub n_bytes_large_file: u64,
    /// Skip size checks and always stream.
    pub if_force_streaming: bool,
}

impl SpecModeThresholds {
    /// Thresholds from configuration.
    pub fn from_config(config: &SpecPipelineConfig) -> Self {
        Self {
            n_bytes_large_file: config.n_bytes_large_file(),
            if_force_streaming: config.if_force_streaming,
        }
    }
}

/// Why the mode was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumModeReason {
    /// Streaming forced by configuration.
    Forced,
    /// At least one file exceeds the per-file threshold.
    LargeFile,
    /// Combined size exceeds twice the per-file threshold.
    LargeTotal,
    /// Everything fits in memory.
    Small,
}

/// Mode decision with the figures behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecModeDecision {
    /// Whether to stream.
    pub if_streaming: bool,
    /// Reason for the decision.
    pub reason: EnumModeReason,
    /// Sum of resolved sizes.
    pub n_bytes_total: u64,
    /// Files above the per-file threshold.
    pub cnt_large: usize,
    /// Files whose size was unresolved (counted as 0).
    pub cnt_unresolved: usize,
}

impl fmt::Display for SpecModeDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[MODE] streaming={} reason={:?} bytes_total={} large={} unresolved={}",
            self.if_streaming, self.reason, self.n_bytes_total, self.cnt_large, self.cnt_unresolved
        )
    }
}

/// Decide between whole-file and streaming processing, with figures.
pub fn derive_mode_decision(
    files: &[SpecFileDescriptor],
    thresholds: &SpecModeThresholds,
) -> SpecModeDecision {
    let mut n_bytes_total = 0u64;
    let mut cnt_large = 0usize;
    let mut cnt_unresolved = 0usize;
    for file_desc in files {
        match file_desc.size {
            Some(n_bytes) => {
                n_bytes_total = n_bytes_total.saturating_add(n_bytes);
                if n_bytes > thresholds.n_bytes_large_file {
                    cnt_large += 1;
                }
            }
            None => {
                cnt_unresolved += 1;
                sheet_warn!(
                    "Size of {} unknown; counted as 0 bytes",
                    file_desc.path.display()
                );
            }
        }
    }

    let reason = if thresholds.if_force_streaming {
        EnumModeReason::Forced
    } else if cnt_large > 0 {
        EnumModeReason::LargeFile
    } else if n_bytes_total > thresholds.n_bytes_large_file.saturating_mul(2) {
        EnumModeReason::LargeTotal
    } else {
        EnumModeReason::Small
    };

    let decision = SpecModeDecision {
        if_streaming: reason != EnumModeReason::Small,
        reason,
        n_bytes_total,
        cnt_large,
        cnt_unresolved,
    };
    sheet_debug!("{decision}");
    decision
}

/// Whether the file set must be processed in streaming mode.
pub fn should_use_streaming_mode(
    files: &[SpecFileDescriptor],
    thresholds: &SpecModeThresholds,
) -> bool {
    derive_mode_decision(files, thresholds).if_streaming
}
