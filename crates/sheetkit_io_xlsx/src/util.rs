//! Stateless helper utilities used by the XLSX reader and writer.

use crate::conf::{
    N_LEN_EXCEL_CELL_MAX, N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX,
    TUP_EXCEL_ILLEGAL,
};
use crate::spec::EnumCellValue;

////////////////////////////////////////////////////////////////////////////////
// #region CellValueConversion

/// Normalize one text cell for writing.
///
/// Empty text becomes [`EnumCellValue::None`]. With `if_infer_numbers`, text
/// that reads back identically as a finite number is written as a number;
/// leading zeros, leading `+`, surrounding spaces and exponents keep it text.
pub fn convert_cell_text(value: &str, if_infer_numbers: bool) -> EnumCellValue {
    if value.is_empty() {
        return EnumCellValue::None;
    }
    if if_infer_numbers && is_plain_number_text(value) {
        if let Ok(v) = value.parse::<f64>() {
            if v.is_finite() {
                return EnumCellValue::Number(v);
            }
        }
    }
    EnumCellValue::String(truncate_cell_text(value))
}

fn is_plain_number_text(value: &str) -> bool {
    let c_body = value.strip_prefix('-').unwrap_or(value);
    let (c_int, c_frac) = match c_body.split_once('.') {
        Some((c_int, c_frac)) => (c_int, Some(c_frac)),
        None => (c_body, None),
    };
    if c_int.is_empty() || !c_int.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if c_int.len() > 1 && c_int.starts_with('0') {
        return false;
    }
    // 15 significant digits is the f64 round-trip limit Excel also uses.
    if c_int.len() > 15 {
        return false;
    }
    match c_frac {
        Some(c_frac) => !c_frac.is_empty() && c_frac.bytes().all(|b| b.is_ascii_digit()),
        None => true,
    }
}

/// Clip text to the Excel cell length limit.
pub fn truncate_cell_text(value: &str) -> String {
    if value.len() <= N_LEN_EXCEL_CELL_MAX {
        return value.to_string();
    }
    value.chars().take(N_LEN_EXCEL_CELL_MAX).collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RowBounds

/// Reject coordinates outside the worksheet grid.
pub fn validate_row_bounds(n_row: usize, n_cols: usize) -> Result<(), String> {
    if n_row >= N_NROWS_EXCEL_MAX {
        return Err(format!(
            "row {n_row} exceeds Excel limit of {N_NROWS_EXCEL_MAX} rows"
        ));
    }
    if n_cols > N_NCOLS_EXCEL_MAX {
        return Err(format!(
            "{n_cols} columns exceed Excel limit of {N_NCOLS_EXCEL_MAX} columns"
        ));
    }
    Ok(())
}

pub(crate) fn cast_row_num(value: usize) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("row index overflow: {value}"))
}

pub(crate) fn cast_col_num(value: usize) -> Result<u16, String> {
    u16::try_from(value).map_err(|_| format!("column index overflow: {value}"))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetNormalization

/// Replace invalid chars and trim to valid Excel sheet name.
pub fn sanitize_sheet_name(name: &str, replace_to: &str) -> String {
    let mut c_name = name.to_string();
    for c_illegal in TUP_EXCEL_ILLEGAL {
        c_name = c_name.replace(c_illegal, replace_to);
    }
    c_name = c_name.trim().trim_matches('\'').to_string();
    if c_name.is_empty() {
        c_name = "Sheet".to_string();
    }

    c_name.chars().take(N_LEN_EXCEL_SHEET_NAME_MAX).collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_cell_text_keeps_identifiers_as_text() {
        assert_eq!(convert_cell_text("", true), EnumCellValue::None);
        assert_eq!(convert_cell_text("42", true), EnumCellValue::Number(42.0));
        assert_eq!(convert_cell_text("-3.25", true), EnumCellValue::Number(-3.25));
        assert_eq!(convert_cell_text("0.5", true), EnumCellValue::Number(0.5));
        assert_eq!(
            convert_cell_text("007", true),
            EnumCellValue::String("007".to_string())
        );
        assert_eq!(
            convert_cell_text("1e5", true),
            EnumCellValue::String("1e5".to_string())
        );
        assert_eq!(
            convert_cell_text(" 1", true),
            EnumCellValue::String(" 1".to_string())
        );
        assert_eq!(
            convert_cell_text("1234567890123456", true),
            EnumCellValue::String("1234567890123456".to_string())
        );
        assert_eq!(
            convert_cell_text("42", false),
            EnumCellValue::String("42".to_string())
        );
    }

    #[test]
    fn truncate_cell_text_respects_char_boundaries() {
        let c_long = "é".repeat(N_LEN_EXCEL_CELL_MAX + 5);
        let c_clipped = truncate_cell_text(&c_long);
        assert_eq!(c_clipped.chars().count(), N_LEN_EXCEL_CELL_MAX);
    }

    #[test]
    fn sanitize_sheet_name_replaces_illegal_and_caps_length() {
        assert_eq!(sanitize_sheet_name("Q1/Q2 [draft]", "_"), "Q1_Q2 _draft_");
        assert_eq!(sanitize_sheet_name("  ", "_"), "Sheet");
        assert_eq!(sanitize_sheet_name(&"x".repeat(40), "_").len(), 31);
    }

    #[test]
    fn validate_row_bounds_rejects_overflow() {
        assert!(validate_row_bounds(0, 3).is_ok());
        assert!(validate_row_bounds(N_NROWS_EXCEL_MAX, 1).is_err());
        assert!(validate_row_bounds(0, N_NCOLS_EXCEL_MAX + 1).is_err());
    }
}
