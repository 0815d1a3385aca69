//! File-error recovery policy: failure kind -> recovery decision.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use sheetkit_io_fs::{derive_extension, sniff_html_markers};
use sheetkit_io_xlsx::has_any_sheet_data;
use sheetkit_log::{sheet_debug, sheet_info};
use tokio_util::sync::CancellationToken;

use crate::conf::SpecRecoveryPolicy;
use crate::spec::{EnumFailureKind, PipelineError};

const TUP_LOCK_PATTERNS: [&str; 4] = [
    r"being used by another process",
    r"in use by another process",
    r"sharing violation",
    r"resource busy",
];

static RE_LOCK_MESSAGE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    RegexBuilder::new(&TUP_LOCK_PATTERNS.join("|"))
        .case_insensitive(true)
        .build()
        .ok()
});

/// Whether an error text describes a file held by another process.
pub fn is_lock_message(message: &str) -> bool {
    RE_LOCK_MESSAGE
        .as_ref()
        .is_some_and(|re| re.is_match(message))
}

/// Action taken for a failed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumRecoveryDecision {
    /// Wait, then retry once.
    RetryAfterDelay(Duration),
    /// Release pooled buffers, wait, then retry once.
    RetryAfterReclaimAndDelay(Duration),
    /// Re-probe the file with a more lenient reader.
    TryAlternativeRead,
    /// Give up on the file.
    Unrecoverable,
}

/// Map a failure to a recovery decision. Pure.
pub fn classify_failure(err: &PipelineError, policy: &SpecRecoveryPolicy) -> EnumRecoveryDecision {
    match err.kind() {
        EnumFailureKind::AccessDenied => {
            EnumRecoveryDecision::RetryAfterDelay(policy.delay_access_denied())
        }
        EnumFailureKind::FileLocked => {
            EnumRecoveryDecision::RetryAfterDelay(policy.delay_file_locked())
        }
        EnumFailureKind::ResourceExhausted => {
            EnumRecoveryDecision::RetryAfterReclaimAndDelay(policy.delay_reclaim())
        }
        EnumFailureKind::InvalidData => EnumRecoveryDecision::TryAlternativeRead,
        EnumFailureKind::Cancelled | EnumFailureKind::Other => EnumRecoveryDecision::Unrecoverable,
    }
}

/// Result of the lenient re-probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumAlternativeRead {
    /// `.xls` holding HTML: counted as handled, no rows.
    SkipAsHtml,
    /// Workbook re-opened and some sheet has data: retry on that sheet.
    RetryFirstNonEmptySheet,
    /// Nothing readable.
    Unrecoverable(String),
}

/// Lenient re-probe of a file whose content failed to parse.
pub fn try_alternative_read(path: &Path) -> EnumAlternativeRead {
    if derive_extension(path) == "xls" && sniff_html_markers(path) {
        sheet_info!(
            "{} is an HTML export with .xls extension; skipping",
            path.display()
        );
        return EnumAlternativeRead::SkipAsHtml;
    }
    match has_any_sheet_data(path) {
        Ok(true) => EnumAlternativeRead::RetryFirstNonEmptySheet,
        Ok(false) => EnumAlternativeRead::Unrecoverable("workbook has no data".to_string()),
        Err(e) => {
            sheet_debug!("Alternative read of {} failed: {e}", path.display());
            EnumAlternativeRead::Unrecoverable(e.to_string())
        }
    }
}

/// Sleep for `duration`, returning early with `Cancelled`.
pub async fn sleep_cancellable(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
