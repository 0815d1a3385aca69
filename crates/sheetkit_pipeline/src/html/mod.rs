//! Tolerant HTML table parser for "fake XLS" exports.
//!
//! Three tiers:
//! - optimized: tokenizer over the first `<table` .. last `</table>` slice, row cap
//! - core: tokenizer over the whole content, no cap
//! - fast: naive split of the leading window, used when the time budget runs out
//!
//! The tokenizer tiers run on the blocking pool and poll the deadline and the
//! job's cancellation token as they go.

pub mod parser;
pub mod tokenizer;

use std::sync::Arc;
use std::time::{Duration, Instant};

use sheetkit_io_fs::{find_ascii_ci, rfind_ascii_ci};
use sheetkit_log::{sheet_debug, sheet_warn};
use tokio_util::sync::CancellationToken;

use crate::conf::{N_ROWS_HTML_OPTIMIZED_MAX, SpecPipelineConfig};
use crate::html::parser::{EnumParseAbort, SpecParseGuard};
use crate::spec::PipelineError;

pub use parser::{clean_cell_text, normalize_rows, parse_table_fast};
pub use tokenizer::{EnumHtmlToken, HtmlTokenizer};

/// Limits for [`parse_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecHtmlParseConfig {
    /// Content beyond this many bytes is ignored.
    pub n_bytes_content_max: usize,
    /// Time budget before falling back to the fast path.
    pub n_ms_timeout: u64,
    /// Use the bounded optimized path.
    pub if_optimized: bool,
}

impl Default for SpecHtmlParseConfig {
    fn default() -> Self {
        Self::from_config(&SpecPipelineConfig::default())
    }
}

impl SpecHtmlParseConfig {
    /// Limits from configuration.
    pub fn from_config(config: &SpecPipelineConfig) -> Self {
        Self {
            n_bytes_content_max: config.n_bytes_html_content_max(),
            n_ms_timeout: config.n_ms_html_parse_timeout,
            if_optimized: config.if_html_optimized,
        }
    }
}

/// Longest prefix of `text` within `n_bytes_max` bytes ending on a char boundary.
pub fn truncate_at_char_boundary(text: &str, n_bytes_max: usize) -> &str {
    if text.len() <= n_bytes_max {
        return text;
    }
    let mut n_end = n_bytes_max;
    while !text.is_char_boundary(n_end) {
        n_end -= 1;
    }
    &text[..n_end]
}

/// Slice from the first `<table` to the end of the last `</table>`.
///
/// `None` when there is no `<table`; runs to the end when no closing tag follows.
pub fn locate_table_bounds(html: &str) -> Option<&str> {
    let v_bytes = html.as_bytes();
    let n_start = find_ascii_ci(v_bytes, b"<table")?;
    let n_end = rfind_ascii_ci(v_bytes, b"</table>")
        .filter(|&n_idx| n_idx > n_start)
        .map_or(v_bytes.len(), |n_idx| n_idx + b"</table>".len());
    Some(&html[n_start..n_end])
}

/// Extract table rows from `html`.
///
/// Malformed markup yields partial rows; no table yields an empty result.
/// Running out of time falls back to [`parse_table_fast`]; the only error is
/// `Cancelled`.
pub async fn parse_table(
    html: String,
    config: &SpecHtmlParseConfig,
    cancel: &CancellationToken,
) -> Result<Vec<Vec<String>>, PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    let mut html = html;
    let n_len_content = truncate_at_char_boundary(&html, config.n_bytes_content_max).len();
    if n_len_content < html.len() {
        sheet_warn!(
            "HTML content truncated from {} to {} bytes",
            html.len(),
            n_len_content
        );
        html.truncate(n_len_content);
    }
    let html: Arc<str> = Arc::from(html);

    let instant_start = Instant::now();
    let duration_budget = Duration::from_millis(config.n_ms_timeout);
    let guard = SpecParseGuard {
        instant_deadline: instant_start.checked_add(duration_budget),
        cancel: cancel.clone(),
    };
    let if_optimized = config.if_optimized;
    let html_parse = Arc::clone(&html);
    let handle = tokio::task::spawn_blocking(move || {
        if if_optimized {
            parse_table_optimized(&html_parse, &guard)
        } else {
            parse_table_core(&html_parse, &guard)
        }
    });

    // The worker polls the same deadline and token, so it winds down on its own
    // when either branch below gives up on it.
    let result_parse = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        result = tokio::time::timeout(duration_budget, handle) => result,
    };
    match result_parse {
        Ok(result_join) => match result_join? {
            Ok(l_rows) => {
                sheet_debug!(
                    "Parsed {} HTML rows in {:?}",
                    l_rows.len(),
                    instant_start.elapsed()
                );
                Ok(l_rows)
            }
            Err(EnumParseAbort::Cancelled) => Err(PipelineError::Cancelled),
            Err(EnumParseAbort::DeadlineExceeded) => Ok(parse_table_fallback(&html, config)),
        },
        Err(_) => Ok(parse_table_fallback(&html, config)),
    }
}

fn parse_table_fallback(html: &str, config: &SpecHtmlParseConfig) -> Vec<Vec<String>> {
    sheet_warn!(
        "HTML parse exceeded {} ms; using fast fallback",
        config.n_ms_timeout
    );
    parse_table_fast(html)
}

fn parse_table_optimized(
    html: &str,
    guard: &SpecParseGuard,
) -> Result<Vec<Vec<String>>, EnumParseAbort> {
    let Some(c_table) = locate_table_bounds(html) else {
        return Ok(Vec::new());
    };
    let (l_rows, if_capped) =
        parser::extract_rows(c_table, Some(N_ROWS_HTML_OPTIMIZED_MAX), guard)?;
    if if_capped {
        sheet_warn!("HTML table exceeds {N_ROWS_HTML_OPTIMIZED_MAX} rows; extra rows dropped");
    }
    Ok(l_rows)
}

fn parse_table_core(html: &str, guard: &SpecParseGuard) -> Result<Vec<Vec<String>>, EnumParseAbort> {
    Ok(parser::extract_rows(html, None, guard)?.0)
}
