//! Streaming sheet reader
//!
//! `StreamingSheet` answers row queries over a worksheet xml stream while holding at most one
//! window of rows in memory. Rows are parsed forward in windows of `row_cache_size`; each
//! window is spilled to a backing file as soon as it is filled, and reloaded when a row it
//! holds is asked for again.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use log::{debug, warn};

use crate::builder::SheetParser;
use crate::{
    NumberFormatter, ReaderConfig, Row, RowWindow, SharedStrings, StyleSource, WindowId,
    WindowStore, XlError, XlResult,
};

/// Workbook level lookups shared by every sheet
#[derive(Clone, Copy)]
pub struct SheetContext<'a> {
    pub strings: &'a dyn SharedStrings,
    pub styles: &'a dyn StyleSource,
    pub formatter: &'a dyn NumberFormatter,
}

impl<'a> SheetContext<'a> {
    pub fn new(
        strings: &'a dyn SharedStrings,
        styles: &'a dyn StyleSource,
        formatter: &'a dyn NumberFormatter,
    ) -> Self {
        Self {
            strings,
            styles,
            formatter,
        }
    }
}

/// The window currently resident in memory
#[derive(Debug)]
struct LiveWindow {
    id: WindowId,
    window: RowWindow,
    rows: Vec<Row>,
}

impl LiveWindow {
    fn row(&self, n: u32) -> Option<&Row> {
        self.window.slot_of(n).and_then(|slot| self.rows.get(slot))
    }
}

/// Bounded-memory reader of one worksheet
pub struct StreamingSheet<'a, R: BufRead> {
    name: String,
    ctx: SheetContext<'a>,
    config: ReaderConfig,
    parser: Option<SheetParser<R>>,
    store: WindowStore,
    /// row number -> window holding it
    locations: HashMap<u32, WindowId>,
    live: Option<LiveWindow>,
    max_seen: Option<u32>,
    primed: bool,
    windows_filled: usize,
    /// first fill error; the stream position is lost after it
    failure: Option<XlError>,
    closed: bool,
}

impl<'a, R: BufRead> StreamingSheet<'a, R> {
    pub fn new<S: Into<String>>(
        name: S,
        source: R,
        ctx: SheetContext<'a>,
        config: ReaderConfig,
    ) -> Self {
        let parser = SheetParser::new(source, config.buffer_size());
        let store = WindowStore::new(config.spill_dir().map(Path::to_path_buf));

        Self {
            name: name.into(),
            ctx,
            config,
            parser: Some(parser),
            store,
            locations: HashMap::new(),
            live: None,
            max_seen: None,
            primed: false,
            windows_filled: 0,
            failure: None,
            closed: false,
        }
    }

    fn ensure_open(&self) -> XlResult<()> {
        if self.closed {
            return Err(XlError::Closed);
        }
        match &self.failure {
            Some(e) => Err(e.replay()),
            None => Ok(()),
        }
    }

    fn is_exhausted(&self) -> bool {
        self.parser.as_ref().map_or(true, |p| p.is_exhausted())
    }

    fn dimension_last_row(&self) -> Option<u32> {
        self.parser
            .as_ref()
            .and_then(|p| p.meta().dimension_last_row)
    }

    /// Parse the next window: up to `row_cache_size` rows, spilled then indexed.
    ///
    /// Returns false when the stream had no more rows. An error leaves the sheet failed:
    /// every later operation returns it again.
    fn fill(&mut self) -> XlResult<bool> {
        self.ensure_open()?;
        self.fill_window().map_err(|e| {
            warn!("sheet {}: reader failed: {e}", self.name);
            self.failure = Some(e.replay());
            e
        })
    }

    /// The previous live window stays resident until a non-empty batch replaces it; it is
    /// already on disk.
    fn fill_window(&mut self) -> XlResult<bool> {
        let parser = self.parser.as_mut().ok_or(XlError::Closed)?;
        self.primed = true;

        let capacity = self.config.row_cache_size();
        let mut rows = Vec::with_capacity(capacity);
        while rows.len() < capacity {
            match parser.next_row(&self.ctx)? {
                Some(row) => rows.push(row),
                None => break,
            }
        }

        let Some(window) = RowWindow::from_rows(&rows) else {
            debug!("sheet {}: end of rows", self.name);
            return Ok(false);
        };
        self.live = None;

        let id = self.store.persist(&window, &rows)?;
        // a row number repeated in a later window keeps its first location
        for n in window.row_numbers() {
            self.locations.entry(n).or_insert(id);
        }
        self.max_seen = Some(self.max_seen.map_or(window.max_row(), |m| m.max(window.max_row())));
        self.windows_filled += 1;
        debug!(
            "sheet {}: window {id} filled with rows {}..={}",
            self.name,
            window.min_row(),
            window.max_row()
        );
        self.live = Some(LiveWindow { id, window, rows });

        Ok(true)
    }

    /// Make `id` the live window, reloading it from disk when needed.
    fn load(&mut self, id: WindowId) -> XlResult<&LiveWindow> {
        if self.live.as_ref().map(|l| l.id) != Some(id) {
            let (window, rows) = self.store.reload(id)?;
            self.live = Some(LiveWindow { id, window, rows });
        }
        self.live
            .as_ref()
            .ok_or_else(|| XlError::new_common_error("no live window"))
    }

    /// Row number `n` (0-based).
    ///
    /// Parses forward as far as needed. A row streamed past earlier is reloaded from its
    /// backing file. `None` when the row has no xml representation (a blank row, or beyond
    /// the end of the data).
    pub fn get_row(&mut self, n: u32) -> XlResult<Option<Row>> {
        self.ensure_open()?;
        if !self.primed {
            self.fill()?;
        }
        while self.max_seen.map_or(true, |m| n > m) && !self.is_exhausted() {
            if !self.fill()? {
                break;
            }
        }

        let Some(&id) = self.locations.get(&n) else {
            return Ok(None);
        };
        Ok(self.load(id)?.row(n).cloned())
    }

    /// Forward iterator over every row, from the first one.
    ///
    /// Each call starts over; windows already parsed are reloaded from disk and the stream
    /// is advanced once they run out.
    pub fn rows(&mut self) -> RowIter<'_, 'a, R> {
        RowIter {
            sheet: self,
            window: 0,
            position: 0,
            done: false,
        }
    }

    /// Last row number (0-based): the used range when declared, else the highest row parsed
    /// so far, else 0.
    pub fn last_row_num(&mut self) -> XlResult<u32> {
        self.ensure_open()?;
        if let Some(last) = self.dimension_last_row() {
            return Ok(last);
        }
        if !self.primed {
            self.fill()?;
        }
        Ok(self.dimension_last_row().or(self.max_seen).unwrap_or(0))
    }

    /// Whether column `column` (0-based) is hidden. Column definitions precede the rows, so
    /// the first window is enough to know.
    pub fn is_column_hidden(&mut self, column: u32) -> XlResult<bool> {
        self.ensure_open()?;
        if !self.primed {
            self.fill()?;
        }
        Ok(self
            .parser
            .as_ref()
            .map_or(false, |p| p.meta().hidden_columns.contains(&column)))
    }

    /// Release the stream and delete every backing file. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.parser = None;
        self.live = None;
        self.locations.clear();
        self.store.clear();
        debug!(
            "sheet {}: closed after {} windows",
            self.name, self.windows_filled
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Windows parsed from the stream so far
    pub fn windows_filled(&self) -> usize {
        self.windows_filled
    }

    /// Rows currently held in memory
    pub fn resident_rows(&self) -> &[Row] {
        match &self.live {
            Some(live) => &live.rows,
            None => &[],
        }
    }

    /// Backing files currently on disk
    pub fn spill_files(&self) -> Vec<&Path> {
        self.store.paths().collect()
    }
}

/// Forward iterator over the rows of a `StreamingSheet`
pub struct RowIter<'s, 'a, R: BufRead> {
    sheet: &'s mut StreamingSheet<'a, R>,
    window: usize,
    position: usize,
    done: bool,
}

impl<'s, 'a, R: BufRead> RowIter<'s, 'a, R> {
    fn advance(&mut self) -> XlResult<Option<Row>> {
        self.sheet.ensure_open()?;
        loop {
            if self.window < self.sheet.store.len() {
                let id = self.sheet.store.id_at(self.window).ok_or_else(|| {
                    XlError::new_common_error(format!("unknown window #{}", self.window))
                })?;
                let Some((n, slot)) = self.sheet.load(id)?.window.entry(self.position) else {
                    self.window += 1;
                    self.position = 0;
                    continue;
                };
                self.position += 1;
                // yielded once, from the window `get_row` answers with
                if self.sheet.locations.get(&n) != Some(&id) {
                    continue;
                }
                if let Some(row) = self.sheet.load(id)?.rows.get(slot) {
                    return Ok(Some(row.clone()));
                }
            } else if !self.sheet.fill()? {
                return Ok(None);
            }
        }
    }
}

impl<'s, 'a, R: BufRead> Iterator for RowIter<'s, 'a, R> {
    type Item = XlResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod test_reader {
    use super::*;
    use crate::{DataFormatter, StylesTable};

    fn sheet_xml(dimension: Option<&str>, cols: &str, rows: &[u32]) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
        );
        if let Some(d) = dimension {
            xml.push_str(&format!(r#"<dimension ref="{d}"/>"#));
        }
        xml.push_str(cols);
        xml.push_str("<sheetData>");
        for r in rows {
            let n = r + 1;
            xml.push_str(&format!(
                r#"<row r="{n}"><c r="A{n}"><v>{n}</v></c><c r="B{n}" t="inlineStr"><is><t>row {n}</t></is></c></row>"#
            ));
        }
        xml.push_str("</sheetData></worksheet>");
        xml
    }

    struct Fixture {
        strings: Vec<String>,
        styles: StylesTable,
        formatter: DataFormatter,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                strings: vec![],
                styles: StylesTable::default(),
                formatter: DataFormatter::default(),
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn open<'a>(&'a self, xml: &'a str, cache: usize) -> StreamingSheet<'a, &'a [u8]> {
            let ctx = SheetContext::new(&self.strings, &self.styles, &self.formatter);
            let config = ReaderConfig::default()
                .with_row_cache_size(cache)
                .with_spill_dir(self.dir.path());
            StreamingSheet::new("Sheet1", xml.as_bytes(), ctx, config)
        }
    }

    fn label(row: &Row) -> String {
        row.cell(1).unwrap().string_value().to_string()
    }

    #[test]
    fn dimension_gives_last_row() {
        let fx = Fixture::new();
        let xml = sheet_xml(Some("A1:F25"), "", &[0, 1, 2]);
        let mut sheet = fx.open(&xml, 10);
        assert_eq!(sheet.last_row_num().unwrap(), 24);
        // beyond the data but inside the used range
        assert_eq!(sheet.get_row(20).unwrap(), None);
    }

    #[test]
    fn last_row_without_dimension() {
        let fx = Fixture::new();
        let xml = sheet_xml(None, "", &[0, 4, 9]);
        let mut sheet = fx.open(&xml, 2);
        // one fill only: the highest row parsed so far
        assert_eq!(sheet.last_row_num().unwrap(), 4);
        assert_eq!(sheet.windows_filled(), 1);
    }

    #[test]
    fn empty_sheet() {
        let fx = Fixture::new();
        let xml = sheet_xml(None, "", &[]);
        let mut sheet = fx.open(&xml, 3);
        assert_eq!(sheet.last_row_num().unwrap(), 0);
        assert_eq!(sheet.rows().count(), 0);
        assert_eq!(sheet.get_row(0).unwrap(), None);
        assert!(sheet.spill_files().is_empty());
    }

    #[test]
    fn hidden_columns() {
        let fx = Fixture::new();
        let cols = r#"<cols><col min="3" max="5" hidden="1"/></cols>"#;
        let xml = sheet_xml(None, cols, &[0]);
        let mut sheet = fx.open(&xml, 3);
        assert!(sheet.is_column_hidden(3).unwrap());
        assert!(sheet.is_column_hidden(2).unwrap());
        assert!(!sheet.is_column_hidden(5).unwrap());
        assert!(!sheet.is_column_hidden(1).unwrap());
    }

    #[test]
    fn windows_spill_and_reload() {
        let fx = Fixture::new();
        let k = 3;
        let rows: Vec<u32> = (0..(2 * k + 1)).collect();
        let xml = sheet_xml(None, "", &rows);
        let mut sheet = fx.open(&xml, k as usize);

        let last = sheet.get_row(2 * k).unwrap().unwrap();
        assert_eq!(label(&last), "row 7");
        assert!(sheet.windows_filled() >= 3);
        // only the last batch is resident
        assert_eq!(
            sheet.resident_rows().iter().map(Row::index).collect::<Vec<_>>(),
            vec![2 * k]
        );
        assert_eq!(sheet.spill_files().len(), 3);

        // back to the first window, then forward again
        let first = sheet.get_row(0).unwrap().unwrap();
        assert_eq!(label(&first), "row 1");
        assert_eq!(sheet.resident_rows().len(), k as usize);
        assert_eq!(sheet.get_row(4).unwrap().map(|r| label(&r)), Some("row 5".to_string()));
        assert_eq!(sheet.windows_filled(), 3);
    }

    #[test]
    fn reloaded_rows_are_identical() {
        let fx = Fixture::new();
        let xml = sheet_xml(None, "", &[0, 1, 3, 4, 5, 8, 9]);
        let mut sheet = fx.open(&xml, 2);

        let sequential: Vec<Row> = sheet.rows().collect::<XlResult<_>>().unwrap();
        assert_eq!(
            sequential.iter().map(Row::index).collect::<Vec<_>>(),
            vec![0, 1, 3, 4, 5, 8, 9]
        );

        let mut interleaved = vec![];
        for n in 0..10 {
            if let Some(row) = sheet.get_row(n).unwrap() {
                interleaved.push(row);
            }
            // bounce back to the first window between reads
            sheet.get_row(0).unwrap();
        }
        assert_eq!(sequential, interleaved);

        // blank row inside the parsed range
        assert_eq!(sheet.get_row(2).unwrap(), None);
        assert_eq!(sheet.get_row(7).unwrap(), None);
        // a new iterator starts over
        assert_eq!(sheet.rows().next().unwrap().unwrap().index(), 0);
    }

    #[test]
    fn close_deletes_backing_files() {
        let fx = Fixture::new();
        let rows: Vec<u32> = (0..5).collect();
        let xml = sheet_xml(None, "", &rows);
        let mut sheet = fx.open(&xml, 2);
        assert_eq!(sheet.rows().count(), 5);

        let files: Vec<_> = sheet.spill_files().iter().map(|p| p.to_path_buf()).collect();
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|p| p.exists()));

        sheet.close();
        assert!(sheet.is_closed());
        assert!(files.iter().all(|p| !p.exists()));
        assert!(sheet.spill_files().is_empty());
        sheet.close();

        assert!(matches!(sheet.get_row(0), Err(XlError::Closed)));
        assert!(matches!(sheet.last_row_num(), Err(XlError::Closed)));
        assert!(matches!(sheet.rows().next(), Some(Err(XlError::Closed))));
    }

    fn resident(sheet: &StreamingSheet<'_, &[u8]>) -> Vec<u32> {
        sheet.resident_rows().iter().map(Row::index).collect()
    }

    #[test]
    fn last_batch_stays_resident_at_end_of_rows() {
        let fx = Fixture::new();
        let xml = sheet_xml(Some("A1:B20"), "", &[0, 1, 2, 3]);
        let mut sheet = fx.open(&xml, 2);

        assert!(sheet.get_row(3).unwrap().is_some());
        assert_eq!(resident(&sheet), vec![2, 3]);
        // inside the used range, past the data: the stream runs dry
        assert_eq!(sheet.get_row(10).unwrap(), None);
        assert_eq!(resident(&sheet), vec![2, 3]);
        assert_eq!(sheet.rows().count(), 4);
        assert_eq!(resident(&sheet), vec![2, 3]);
        assert_eq!(sheet.windows_filled(), 2);
    }

    #[test]
    fn first_error_is_returned_again() {
        let fx = Fixture::new();
        let xml = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
            <row r="1"><c r="A1"><v>1</v></c></row>
            <row r="2"><c r="A2"><v>2</v></c></row>
            <row r="3"><c r="A3" t="s"><v>99</v></c></row>
            <row r="4"><c r="A4"><v>4</v></c></row>
        </sheetData></worksheet>"#;
        let mut sheet = fx.open(xml, 10);

        let first = match sheet.get_row(0) {
            Err(XlError::CorruptDocument(msg)) => msg,
            other => panic!("expected a corrupt document, got {other:?}"),
        };
        assert!(first.contains("99"));
        for _ in 0..3 {
            assert!(matches!(sheet.get_row(0), Err(XlError::CorruptDocument(ref m)) if *m == first));
        }
        assert!(matches!(sheet.get_row(3), Err(XlError::CorruptDocument(ref m)) if *m == first));
        assert!(matches!(sheet.rows().next(), Some(Err(XlError::CorruptDocument(ref m))) if *m == first));
        assert!(sheet.last_row_num().is_err());
        assert!(sheet.is_column_hidden(0).is_err());

        sheet.close();
        assert!(matches!(sheet.get_row(0), Err(XlError::Closed)));
    }

    #[test]
    fn repeated_row_number_keeps_first_copy() {
        let xml = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
            <row r="1"><c r="A1"><v>1</v></c><c r="B1" t="inlineStr"><is><t>a</t></is></c></row>
            <row r="2"><c r="A2"><v>2</v></c><c r="B2" t="inlineStr"><is><t>first</t></is></c></row>
            <row r="2"><c r="A2"><v>2</v></c><c r="B2" t="inlineStr"><is><t>second</t></is></c></row>
            <row r="3"><c r="A3"><v>3</v></c><c r="B3" t="inlineStr"><is><t>c</t></is></c></row>
        </sheetData></worksheet>"#;

        // the duplicate straddles two windows, then sits inside one
        for cache in [2, 3] {
            let fx = Fixture::new();
            let mut sheet = fx.open(xml, cache);
            let rows: Vec<Row> = sheet.rows().collect::<XlResult<_>>().unwrap();
            assert_eq!(rows.iter().map(Row::index).collect::<Vec<_>>(), vec![0, 1, 2]);
            assert_eq!(label(&rows[1]), "first");
            assert_eq!(sheet.get_row(1).unwrap().map(|r| label(&r)), Some("first".to_string()));
            // a second pass agrees with the first
            assert_eq!(sheet.rows().count(), 3);
        }
    }

    #[test]
    fn corrupt_rows_surface_from_the_iterator() {
        let fx = Fixture::new();
        let xml = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><c r="A1"/></sheetData></worksheet>"#;
        let mut sheet = fx.open(xml, 2);
        let mut rows = sheet.rows();
        assert!(matches!(rows.next(), Some(Err(XlError::CorruptDocument(_)))));
        assert!(rows.next().is_none());
    }
}
