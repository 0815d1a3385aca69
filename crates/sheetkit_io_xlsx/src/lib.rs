//! `sheetkit_io_xlsx` v1:
//! Spreadsheet I/O kernel.
//!
//! Modules:
//! - `conf`   : Excel limits and defaults
//! - `spec`   : options/selectors/errors
//! - `util`   : pure helper functions
//! - `reader` : `calamine` workbook reader
//! - `writer` : `rust_xlsxwriter` row sink
pub mod conf;
pub mod reader;
pub mod spec;
pub mod util;
pub mod writer;

pub use conf::{
    C_SHEET_NAME_DEFAULT, N_LEN_EXCEL_CELL_MAX, N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX,
    N_NROWS_EXCEL_MAX, TUP_EXCEL_ILLEGAL,
};
pub use reader::{XlsxRowSource, XlsxWorkbookReader, cell_to_string, has_any_sheet_data};
pub use spec::{
    EnumCellValue, EnumSheetSelector, SpecSheetInfo, SpecXlsxWriteOptions, XlsxIoError,
};
pub use util::{convert_cell_text, sanitize_sheet_name, truncate_cell_text, validate_row_bounds};
pub use writer::XlsxRowSink;
