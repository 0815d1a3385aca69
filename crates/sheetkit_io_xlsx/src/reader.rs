//! Workbook reading via `calamine` (XLSX, XLSM, XLS, XLSB, ODS).

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use calamine::{Data, Range, Reader, Sheets, open_workbook_auto};
use sheetkit_log::sheet_debug;

use crate::spec::{EnumSheetSelector, SpecSheetInfo, XlsxIoError};

/// Render one cell as text. Formatting is not carried over.
pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.to_string(),
        _ => cell.to_string(),
    }
}

/// Open workbook handle.
pub struct XlsxWorkbookReader {
    path: PathBuf,
    sheets: Sheets<BufReader<File>>,
}

impl XlsxWorkbookReader {
    /// Open `path`; the container type is picked from the extension.
    pub fn open(path: &Path) -> Result<Self, XlsxIoError> {
        let sheets = open_workbook_auto(path).map_err(|source| XlsxIoError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            sheets,
        })
    }

    /// Worksheet names in workbook order.
    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.sheet_names()
    }

    /// Load the used range of worksheet `name`.
    pub fn read_sheet(&mut self, name: &str) -> Result<XlsxRowSource, XlsxIoError> {
        let range = self
            .sheets
            .worksheet_range(name)
            .map_err(|source| XlsxIoError::Sheet {
                path: self.path.clone(),
                sheet: name.to_string(),
                source,
            })?;
        Ok(XlsxRowSource::new(name.to_string(), range))
    }

    /// Load the worksheet chosen by `selector`.
    pub fn select_sheet(
        &mut self,
        selector: &EnumSheetSelector,
    ) -> Result<XlsxRowSource, XlsxIoError> {
        let l_names = self.sheet_names();
        let path = self.path.clone();
        let err_not_found = || XlsxIoError::SheetNotFound {
            path: path.clone(),
            selector: selector.to_string(),
        };

        match selector {
            EnumSheetSelector::First => {
                let name = l_names.first().cloned().ok_or_else(err_not_found)?;
                self.read_sheet(&name)
            }
            EnumSheetSelector::Index(n_idx) => {
                let name = l_names.get(*n_idx).cloned().ok_or_else(err_not_found)?;
                self.read_sheet(&name)
            }
            EnumSheetSelector::Name(name) => {
                if !l_names.iter().any(|n| n == name) {
                    return Err(err_not_found());
                }
                self.read_sheet(name)
            }
            EnumSheetSelector::FirstNonEmpty => {
                for name in &l_names {
                    match self.read_sheet(name) {
                        Ok(source) if !source.is_empty() => return Ok(source),
                        Ok(_) => {}
                        Err(e) => sheet_debug!("Skipping unreadable sheet: {e}"),
                    }
                }
                Err(err_not_found())
            }
        }
    }

    /// Shape of every readable worksheet.
    pub fn list_sheets(&mut self) -> Vec<SpecSheetInfo> {
        let mut l_infos = Vec::new();
        for name in self.sheet_names() {
            match self.sheets.worksheet_range(&name) {
                Ok(range) => {
                    let (n_rows, n_cols) = range.get_size();
                    l_infos.push(SpecSheetInfo {
                        name,
                        n_rows,
                        n_cols,
                    });
                }
                Err(e) => sheet_debug!("Skipping unreadable sheet {name:?}: {e}"),
            }
        }
        l_infos
    }
}

/// Whether any worksheet of the workbook at `path` holds data.
pub fn has_any_sheet_data(path: &Path) -> Result<bool, XlsxIoError> {
    let mut reader = XlsxWorkbookReader::open(path)?;
    Ok(reader.list_sheets().iter().any(|info| info.n_rows > 0))
}

/// Cursor over the rows of one loaded worksheet.
pub struct XlsxRowSource {
    sheet_name: String,
    range: Range<Data>,
    n_row_next: usize,
}

impl XlsxRowSource {
    fn new(sheet_name: String, range: Range<Data>) -> Self {
        Self {
            sheet_name,
            range,
            n_row_next: 0,
        }
    }

    /// Worksheet name.
    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    /// Used-range row count.
    pub fn n_rows_total(&self) -> usize {
        self.range.height()
    }

    /// Used-range column count.
    pub fn n_cols(&self) -> usize {
        self.range.width()
    }

    /// Whether the used range is empty.
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Next row as text, or `None` when exhausted.
    pub fn next_row(&mut self) -> Option<Vec<String>> {
        if self.n_row_next >= self.range.height() {
            return None;
        }
        let row = self.row_at(self.n_row_next);
        self.n_row_next += 1;
        Some(row)
    }

    /// Up to `n_rows_max` next rows; empty when exhausted.
    pub fn next_batch(&mut self, n_rows_max: usize) -> Vec<Vec<String>> {
        let n_row_end = self
            .range
            .height()
            .min(self.n_row_next.saturating_add(n_rows_max.max(1)));
        let l_rows = (self.n_row_next..n_row_end)
            .map(|n_row| self.row_at(n_row))
            .collect::<Vec<_>>();
        self.n_row_next = n_row_end.max(self.n_row_next);
        l_rows
    }

    /// Cells of relative row `n_row`; direct indexing keeps a full read linear.
    fn row_at(&self, n_row: usize) -> Vec<String> {
        (0..self.range.width())
            .map(|n_col| {
                self.range
                    .get((n_row, n_col))
                    .map(cell_to_string)
                    .unwrap_or_default()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    fn write_fixture(path: &Path) {
        let mut workbook = Workbook::new();
        workbook.add_worksheet().set_name("Empty").expect("name");
        let worksheet = workbook.add_worksheet();
        worksheet.set_name("Filled").expect("name");
        worksheet.write_string(0, 0, "h1").expect("write");
        worksheet.write_string(0, 1, "h2").expect("write");
        worksheet.write_number(1, 0, 1.5).expect("write");
        worksheet.write_boolean(1, 1, true).expect("write");
        worksheet.write_number(2, 0, 3).expect("write");
        workbook.save(path).expect("save");
    }

    #[test]
    fn select_sheet_first_non_empty_skips_blank_sheets() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_xlsx = tmp.path().join("fixture.xlsx");
        write_fixture(&path_xlsx);

        let mut reader = XlsxWorkbookReader::open(&path_xlsx).expect("open");
        let source_first = reader
            .select_sheet(&EnumSheetSelector::First)
            .expect("first");
        assert_eq!(source_first.sheet_name(), "Empty");
        assert!(source_first.is_empty());

        let mut source = reader
            .select_sheet(&EnumSheetSelector::FirstNonEmpty)
            .expect("non-empty");
        assert_eq!(source.sheet_name(), "Filled");
        assert_eq!(source.n_rows_total(), 3);
        assert_eq!(source.n_cols(), 2);
        assert_eq!(source.next_row(), Some(vec!["h1".to_string(), "h2".to_string()]));
        let l_rows = source.next_batch(10);
        assert_eq!(l_rows.len(), 2);
        assert_eq!(l_rows[0], vec!["1.5".to_string(), "true".to_string()]);
        assert_eq!(l_rows[1], vec!["3".to_string(), String::new()]);
        assert!(source.next_batch(10).is_empty());
        assert_eq!(source.next_row(), None);

        assert!(has_any_sheet_data(&path_xlsx).expect("sheet data check"));
        let l_infos = reader.list_sheets();
        assert_eq!(l_infos.len(), 2);
        assert_eq!(l_infos[1].n_rows, 3);
    }

    #[test]
    fn select_sheet_reports_missing_sheet_and_bad_container() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_xlsx = tmp.path().join("fixture.xlsx");
        write_fixture(&path_xlsx);

        let mut reader = XlsxWorkbookReader::open(&path_xlsx).expect("open");
        let err = reader
            .select_sheet(&EnumSheetSelector::Name("Nope".to_string()))
            .err()
            .expect("missing sheet");
        assert!(matches!(err, XlsxIoError::SheetNotFound { .. }));
        assert!(reader.select_sheet(&EnumSheetSelector::Index(9)).is_err());

        let path_bad = tmp.path().join("broken.xlsx");
        std::fs::write(&path_bad, b"not a zip archive").expect("write");
        let err = XlsxWorkbookReader::open(&path_bad).err().expect("bad container");
        assert!(err.is_invalid_data());
    }

    #[test]
    fn row_source_reads_large_sheet_in_order() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_xlsx = tmp.path().join("large.xlsx");
        let n_rows = 50_000usize;
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        for n_row in 0..n_rows {
            worksheet
                .write_number(n_row as u32, 0, n_row as f64)
                .expect("write");
        }
        worksheet.write_string(0, 2, "wide").expect("write");
        workbook.save(&path_xlsx).expect("save");

        let mut source = XlsxWorkbookReader::open(&path_xlsx)
            .expect("open")
            .select_sheet(&EnumSheetSelector::First)
            .expect("sheet");
        assert_eq!(source.n_rows_total(), n_rows);

        let instant_start = std::time::Instant::now();
        let row_first = source.next_row().expect("first row");
        assert_eq!(row_first, vec!["0".to_string(), String::new(), "wide".to_string()]);
        let mut cnt_rows = 1usize;
        let mut row_last = row_first;
        loop {
            let l_rows = source.next_batch(1_000);
            if l_rows.is_empty() {
                break;
            }
            cnt_rows += l_rows.len();
            row_last = l_rows.last().cloned().expect("row");
        }
        assert_eq!(cnt_rows, n_rows);
        assert_eq!(row_last[0], (n_rows - 1).to_string());
        assert_eq!(source.next_row(), None);
        assert!(
            instant_start.elapsed() < std::time::Duration::from_secs(10),
            "reading {n_rows} rows took {:?}",
            instant_start.elapsed()
        );
    }
}
