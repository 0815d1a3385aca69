//! Row extraction on top of the tokenizer, plus the naive fast path.

use std::time::Instant;

use sheetkit_io_fs::find_ascii_ci;
use tokio_util::sync::CancellationToken;

use crate::conf::{
    N_CHARS_HTML_FAST_WINDOW, N_ROWS_HTML_CHECK_INTERVAL, N_ROWS_HTML_FAST_MAX,
    N_TOKENS_HTML_CHECK_INTERVAL,
};
use crate::html::tokenizer::{EnumHtmlToken, HtmlTokenizer};

/// Strip leftover tags, decode entities and collapse whitespace (NBSP included).
pub fn clean_cell_text(raw: &str) -> String {
    let mut c_stripped = String::with_capacity(raw.len());
    let mut if_in_tag = false;
    for ch in raw.chars() {
        match ch {
            '<' => if_in_tag = true,
            '>' if if_in_tag => if_in_tag = false,
            _ if !if_in_tag => c_stripped.push(ch),
            _ => {}
        }
    }
    let c_decoded = html_escape::decode_html_entities(&c_stripped);
    c_decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pad or truncate every row to the first row's width and drop empty rows.
pub fn normalize_rows(rows: Vec<Vec<String>>) -> Vec<Vec<String>> {
    let mut l_rows = rows
        .into_iter()
        .filter(|row| !row.is_empty())
        .collect::<Vec<_>>();
    let Some(n_width) = l_rows.first().map(Vec::len) else {
        return l_rows;
    };
    for row in &mut l_rows {
        row.resize(n_width, String::new());
    }
    l_rows
}

/// Streaming row builder fed by tokens.
#[derive(Debug, Default)]
pub(crate) struct TableRowBuilder {
    rows: Vec<Vec<String>>,
    row_current: Option<Vec<String>>,
    cell_current: Option<String>,
    n_rows_max: Option<usize>,
    cnt_rows_dropped: usize,
}

impl TableRowBuilder {
    pub(crate) fn new(n_rows_max: Option<usize>) -> Self {
        Self {
            n_rows_max,
            ..Self::default()
        }
    }

    pub(crate) fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.n_rows_max.is_some_and(|n_max| self.rows.len() >= n_max)
    }

    pub(crate) fn cnt_rows_dropped(&self) -> usize {
        self.cnt_rows_dropped
    }

    pub(crate) fn on_token(&mut self, token: EnumHtmlToken<'_>) {
        match token {
            EnumHtmlToken::StartTag { name, .. } => match name.as_str() {
                "tr" => {
                    self.close_row();
                    self.row_current = Some(Vec::new());
                }
                "td" | "th" => {
                    self.close_cell();
                    if self.row_current.is_none() {
                        self.row_current = Some(Vec::new());
                    }
                    self.cell_current = Some(String::new());
                }
                "br" | "p" | "div" | "li" => self.push_cell_text(" "),
                _ => {}
            },
            EnumHtmlToken::EndTag { name } => match name.as_str() {
                "td" | "th" => self.close_cell(),
                "tr" | "table" | "tbody" | "thead" | "tfoot" => self.close_row(),
                "p" | "div" | "li" => self.push_cell_text(" "),
                _ => {}
            },
            EnumHtmlToken::Text(text) => self.push_cell_text(text),
        }
    }

    fn push_cell_text(&mut self, text: &str) {
        if let Some(cell) = self.cell_current.as_mut() {
            cell.push_str(text);
        }
    }

    fn close_cell(&mut self) {
        let Some(cell) = self.cell_current.take() else {
            return;
        };
        if let Some(row) = self.row_current.as_mut() {
            row.push(clean_cell_text(&cell));
        }
    }

    fn close_row(&mut self) {
        self.close_cell();
        let Some(row) = self.row_current.take() else {
            return;
        };
        if row.is_empty() {
            return;
        }
        if self.is_full() {
            self.cnt_rows_dropped += 1;
            return;
        }
        self.rows.push(row);
    }

    pub(crate) fn finish(mut self) -> (Vec<Vec<String>>, usize) {
        self.close_row();
        (normalize_rows(self.rows), self.cnt_rows_dropped)
    }
}

/// Why a tokenizer pass stopped before the end of its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnumParseAbort {
    DeadlineExceeded,
    Cancelled,
}

/// Deadline and cancellation polled during a tokenizer pass.
#[derive(Debug, Clone)]
pub(crate) struct SpecParseGuard {
    /// `None` means no time budget.
    pub(crate) instant_deadline: Option<Instant>,
    pub(crate) cancel: CancellationToken,
}

impl SpecParseGuard {
    pub(crate) fn check(&self) -> Result<(), EnumParseAbort> {
        if self.cancel.is_cancelled() {
            return Err(EnumParseAbort::Cancelled);
        }
        if self
            .instant_deadline
            .is_some_and(|instant_deadline| Instant::now() >= instant_deadline)
        {
            return Err(EnumParseAbort::DeadlineExceeded);
        }
        Ok(())
    }
}

/// Tokenize `html` into rows.
///
/// `guard` is polled every [`N_TOKENS_HTML_CHECK_INTERVAL`] tokens and every
/// [`N_ROWS_HTML_CHECK_INTERVAL`] rows, so row-less input is bounded too.
/// Stops at the first row past `n_rows_max`; returns the rows and whether
/// any were dropped.
pub(crate) fn extract_rows(
    html: &str,
    n_rows_max: Option<usize>,
    guard: &SpecParseGuard,
) -> Result<(Vec<Vec<String>>, bool), EnumParseAbort> {
    let mut builder = TableRowBuilder::new(n_rows_max);
    let mut n_rows_next_check = N_ROWS_HTML_CHECK_INTERVAL;

    for (n_token, token) in HtmlTokenizer::new(html).enumerate() {
        if n_token % N_TOKENS_HTML_CHECK_INTERVAL == 0 {
            guard.check()?;
        }
        builder.on_token(token);
        if builder.cnt_rows_dropped() > 0 {
            break;
        }
        if builder.n_rows() >= n_rows_next_check {
            n_rows_next_check += N_ROWS_HTML_CHECK_INTERVAL;
            guard.check()?;
        }
    }

    let (rows, cnt_rows_dropped) = builder.finish();
    Ok((rows, cnt_rows_dropped > 0))
}

/// Naive positional split over the leading window of `html`.
///
/// Used when the tokenizer path ran out of time; never fails, at most
/// [`N_ROWS_HTML_FAST_MAX`] rows.
pub fn parse_table_fast(html: &str) -> Vec<Vec<String>> {
    let n_end_window = html
        .char_indices()
        .nth(N_CHARS_HTML_FAST_WINDOW)
        .map_or(html.len(), |(n_idx, _)| n_idx);
    let c_window = &html[..n_end_window];
    let v_bytes = c_window.as_bytes();

    let mut l_rows = Vec::new();
    let mut n_pos = 0usize;
    while l_rows.len() < N_ROWS_HTML_FAST_MAX {
        let Some(n_off_row) = find_ascii_ci(&v_bytes[n_pos..], b"<tr") else {
            break;
        };
        let n_row_start = n_pos + n_off_row + 3;
        let n_row_end = find_ascii_ci(&v_bytes[n_row_start..], b"</tr")
            .map_or(v_bytes.len(), |n_off| n_row_start + n_off);

        let row = split_fast_cells(&c_window[n_row_start..n_row_end]);
        if !row.is_empty() {
            l_rows.push(row);
        }
        n_pos = n_row_end;
    }
    normalize_rows(l_rows)
}

fn split_fast_cells(c_row: &str) -> Vec<String> {
    let v_bytes = c_row.as_bytes();
    let mut l_cells = Vec::new();
    let mut n_pos = 0usize;
    while let Some(n_cell_tag) = find_cell_open(&v_bytes[n_pos..]).map(|n_off| n_pos + n_off) {
        let n_content_start = v_bytes[n_cell_tag..]
            .iter()
            .position(|&b| b == b'>')
            .map_or(v_bytes.len(), |n_off| n_cell_tag + n_off + 1);
        let n_content_end = find_ascii_ci(&v_bytes[n_content_start..], b"</t")
            .map_or(v_bytes.len(), |n_off| n_content_start + n_off);
        l_cells.push(clean_cell_text(&c_row[n_content_start..n_content_end]));
        n_pos = n_content_end;
    }
    l_cells
}

/// Offset of the next `<td` or `<th` tag opener, one pass over `v_bytes`.
fn find_cell_open(v_bytes: &[u8]) -> Option<usize> {
    let mut n_pos = 0usize;
    while let Some(n_off) = find_ascii_ci(&v_bytes[n_pos..], b"<t") {
        let n_idx = n_pos + n_off;
        let if_cell = v_bytes
            .get(n_idx + 2)
            .is_some_and(|b| matches!(b.to_ascii_lowercase(), b'd' | b'h'));
        let if_boundary = v_bytes
            .get(n_idx + 3)
            .is_none_or(|&b| b == b'>' || b == b'/' || b.is_ascii_whitespace());
        if if_cell && if_boundary {
            return Some(n_idx);
        }
        n_pos = n_idx + 2;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_cell_text_strips_decodes_and_collapses() {
        assert_eq!(
            clean_cell_text("  <b>Tom</b>&nbsp;&amp;\n\t<i>Jerry</i>&#x41; "),
            "Tom & JerryA"
        );
        assert_eq!(clean_cell_text("&lt;b&gt;"), "<b>");
        assert_eq!(clean_cell_text("\u{a0}\u{a0}"), "");
    }

    #[test]
    fn normalize_rows_uses_first_row_width() {
        let l_rows = normalize_rows(vec![
            vec!["a".to_string(), "b".to_string()],
            vec![],
            vec!["1".to_string()],
            vec!["1".to_string(), "2".to_string(), "3".to_string()],
        ]);
        assert_eq!(l_rows.len(), 3);
        assert!(l_rows.iter().all(|row| row.len() == 2));
        assert_eq!(l_rows[1], vec!["1".to_string(), String::new()]);
    }

    #[test]
    fn parse_table_fast_splits_naively_and_caps_rows() {
        let html = "<table><thead><tr><th>h1</th><th>h2</th></tr></thead>\
                    <tr><td class=x>1</td><td>2<br>b</td></tr>\
                    <tr><td>only</td></tr></table>";
        let l_rows = parse_table_fast(html);
        assert_eq!(
            l_rows,
            vec![
                vec!["h1".to_string(), "h2".to_string()],
                vec!["1".to_string(), "2b".to_string()],
                vec!["only".to_string(), String::new()],
            ]
        );

        let html_many = "<tr><td>x</td></tr>".repeat(500);
        assert_eq!(parse_table_fast(&html_many).len(), N_ROWS_HTML_FAST_MAX);
        assert!(parse_table_fast("no table here").is_empty());
    }

    fn guard_unbounded() -> SpecParseGuard {
        SpecParseGuard {
            instant_deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn extract_rows_handles_implicit_rows_and_cap() {
        let (l_rows, if_capped) = extract_rows(
            "<td>a<td>b</table><tr><td>c</td><td>d</td>",
            None,
            &guard_unbounded(),
        )
        .expect("rows");
        assert!(!if_capped);
        assert_eq!(
            l_rows,
            vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["c".to_string(), "d".to_string()],
            ]
        );

        let html = "<tr><td>r</td></tr>".repeat(30);
        let (l_rows, if_capped) =
            extract_rows(&html, Some(25), &guard_unbounded()).expect("rows");
        assert!(if_capped);
        assert_eq!(l_rows.len(), 25);
    }

    #[test]
    fn extract_rows_stops_on_deadline_or_cancel_without_rows() {
        // One open cell: no row is ever completed.
        let html = format!("<table><td>{}", "<b>x</b>".repeat(5_000));

        let guard = SpecParseGuard {
            instant_deadline: Some(Instant::now()),
            ..guard_unbounded()
        };
        assert_eq!(
            extract_rows(&html, None, &guard),
            Err(EnumParseAbort::DeadlineExceeded)
        );

        let guard = guard_unbounded();
        guard.cancel.cancel();
        assert_eq!(
            extract_rows(&html, None, &guard),
            Err(EnumParseAbort::Cancelled)
        );

        let (l_rows, _) = extract_rows(&html, None, &guard_unbounded()).expect("rows");
        assert_eq!(l_rows[0][0].len(), 5_000);
    }

    #[test]
    fn find_cell_open_skips_other_t_tags() {
        assert_eq!(find_cell_open(b"<table><tbody><TD>x"), Some(14));
        assert_eq!(find_cell_open(b"<thead><th class=a>"), Some(7));
        assert_eq!(find_cell_open(b"<tr><td"), Some(4));
        assert_eq!(find_cell_open(b"<title><tt>"), None);

        // Only `<th` cells in a long row: the single scan must find each one.
        let c_row = "<th>h</th>".repeat(2_000);
        assert_eq!(split_fast_cells(&c_row).len(), 2_000);
    }
}
