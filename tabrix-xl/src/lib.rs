//! Tabrix xl
//!
//! A bounded-memory streaming reader for xlsx worksheets.
//!
//! Rows are parsed straight from the worksheet xml in batches of `row_cache_size`. Every
//! finished batch (a "window") is spilled to a temporary backing file, so a row that has
//! already been streamed past can still be requested by number: its window is reloaded from
//! disk. At most one window is resident in memory at a time.
//!
//! ```no_run
//! use tabrix_xl::{ReaderConfig, Workbook};
//!
//! let mut wb = Workbook::open("tests/data/Book1.xlsx")?
//!     .with_config(ReaderConfig::default().with_row_cache_size(100));
//! let mut sheet = wb.sheet("Sheet1")?;
//! for row in sheet.rows() {
//!     let row = row?;
//!     for cell in row.cells() {
//!         println!("{} = {}", cell.reference(), cell.string_value());
//!     }
//! }
//! let tenth = sheet.get_row(9)?;
//! sheet.close();
//! # Ok::<(), tabrix_xl::XlError>(())
//! ```

mod builder;
pub mod cell;
pub mod config;
pub mod decode;
pub mod error;
#[cfg(feature = "eval")]
pub mod eval;
pub mod format;
pub mod reader;
pub mod store;
pub mod styles;
pub mod tag;
mod util;
pub mod window;
#[cfg(feature = "workbook")]
pub mod workbook;

pub use cell::{Cell, CellKind, CellType, Row};
pub use config::ReaderConfig;
pub use decode::{decode, SharedStringTable, SharedStrings};
pub use error::*;
#[cfg(feature = "eval")]
pub use eval::{EvaluationCell, EvaluationSheet};
pub use format::{DataFormatter, NumberFormatter};
pub use reader::{RowIter, SheetContext, StreamingSheet};
pub use store::{WindowId, WindowStore};
pub use styles::{builtin_format, CellStyle, StyleSource, StylesTable};
pub use tag::is_spreadsheet_tag;
pub use window::RowWindow;
#[cfg(feature = "workbook")]
pub use workbook::{SheetInfo, SheetState, Workbook};

/// Date system, used to determine the date format from an Excel file.
///
/// Excel spreadsheets support two different date systems:
///
/// - the 1900 date system
/// - the 1904 date system
///
/// Under the 1900 system, the first date supported is January 1, 1900. Under the 1904 system, the
/// first date supported is January 1, 1904. Under either system, a date is represented as the
/// number of days that have elapsed since the first date. So you can't actually tell what date a
/// number represents unless you also know the date system the spreadsheet uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateSystem {
    #[default]
    V1900,
    V1904,
}
