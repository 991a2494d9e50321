//! Row builder
//!
//! A state machine driven by worksheet xml events. It assembles one `Row` at a time out of
//! `row`, `c`, `v`, `t` and `f` elements, and collects the sheet level metadata met along the
//! way (hidden columns, used range).

use std::borrow::Cow;
use std::collections::HashSet;
use std::io::BufRead;

use log::warn;
use quick_xml::events::{BytesStart, Event};
use quick_xml::NsReader;

use crate::reader::SheetContext;
use crate::tag::is_spreadsheet_tag;
use crate::{decode, util, Cell, CellType, Row, XlError, XlResult};

/// Element whose character data is being accumulated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueTag {
    V,
    T,
    F,
}

#[derive(Debug, Default)]
enum BuildState {
    #[default]
    Idle,
    InRow(Row),
    InCell(Row, Cell),
    InValue(Row, Cell, ValueTag),
}

/// One relevant parser event, already filtered by the tag classifier
#[derive(Debug)]
pub(crate) enum Step<'e> {
    Start(&'e BytesStart<'e>),
    End(&'e [u8]),
    Text(Cow<'e, str>),
}

/// Metadata met while streaming rows
#[derive(Debug, Default)]
pub(crate) struct SheetMeta {
    pub(crate) hidden_columns: HashSet<u32>,
    pub(crate) dimension_last_row: Option<u32>,
}

#[derive(Debug, Default)]
pub(crate) struct RowBuilder {
    state: BuildState,
    text: String,
    /// inline string runs (`<is><r><t>..</t></r>..</is>`) of the open cell
    runs: String,
    /// inside `<rPh>`: phonetic runs are not part of the value
    in_phonetic: bool,
    had_marker: bool,
    last_row: Option<u32>,
    last_column: Option<u32>,
    meta: SheetMeta,
}

impl RowBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn meta(&self) -> &SheetMeta {
        &self.meta
    }

    pub(crate) fn is_idle(&self) -> bool {
        matches!(self.state, BuildState::Idle)
    }

    /// Feed one event. Returns the row completed by this event, if any.
    pub(crate) fn step(&mut self, step: Step<'_>, ctx: &SheetContext<'_>) -> XlResult<Option<Row>> {
        let state = std::mem::take(&mut self.state);

        let (next, done) = match (state, step) {
            (state, Step::Text(s)) => {
                if let BuildState::InValue(..) = state {
                    self.text.push_str(&s);
                }
                (state, None)
            }

            (state, Step::Start(e)) => {
                self.text.clear();
                match (state, e.local_name().as_ref()) {
                    (BuildState::Idle, b"row") => (self.open_row(e)?, None),
                    (_, b"row") => {
                        return Err(XlError::new_corrupt_error("row opened inside another row"))
                    }
                    (BuildState::InRow(row), b"c") => (self.open_cell(row, e, ctx)?, None),
                    (_, b"c") => {
                        return Err(XlError::new_corrupt_error("cell opened outside of a row"))
                    }
                    (BuildState::InCell(row, mut cell), b"f") => {
                        cell.mark_formula();
                        (BuildState::InValue(row, cell, ValueTag::F), None)
                    }
                    (BuildState::InCell(row, cell), b"v") => {
                        (BuildState::InValue(row, cell, ValueTag::V), None)
                    }
                    (state @ BuildState::InCell(..), b"rPh") => {
                        self.in_phonetic = true;
                        (state, None)
                    }
                    (state @ BuildState::InCell(..), b"t") if self.in_phonetic => (state, None),
                    (BuildState::InCell(row, cell), b"t") => {
                        (BuildState::InValue(row, cell, ValueTag::T), None)
                    }
                    (state, b"col") => {
                        self.hide_columns(e)?;
                        (state, None)
                    }
                    (state, b"dimension") => {
                        if let Some(range) = util::get(e, b"ref")? {
                            self.meta.dimension_last_row = util::last_row_of_range(&range);
                        }
                        (state, None)
                    }
                    // `v`/`t`/`f` outside of a cell and every other element
                    (state, _) => (state, None),
                }
            }

            (state, Step::End(name)) => match (state, name) {
                (BuildState::InValue(row, mut cell, tag), b"v" | b"t" | b"f") => {
                    let text = std::mem::take(&mut self.text);
                    match tag {
                        ValueTag::F => cell.set_formula(text),
                        ValueTag::T => {
                            self.runs.push_str(&text);
                            store_value(&mut cell, &self.runs, ctx)?;
                        }
                        ValueTag::V => store_value(&mut cell, &text, ctx)?,
                    }
                    (BuildState::InCell(row, cell), None)
                }
                (state @ BuildState::InCell(..), b"v" | b"t" | b"f") => (state, None),
                (_, b"v" | b"t" | b"f") => {
                    return Err(XlError::new_corrupt_error(format!(
                        "</{}> closed with no open cell",
                        String::from_utf8_lossy(name)
                    )))
                }
                (BuildState::InCell(mut row, mut cell), b"c") => {
                    cell.finish(self.had_marker);
                    self.last_column = Some(cell.column_index());
                    row.insert(cell);
                    (BuildState::InRow(row), None)
                }
                (_, b"c") => {
                    return Err(XlError::new_corrupt_error("cell closed with no open cell"))
                }
                (BuildState::InRow(row), b"row") => {
                    self.last_row = Some(row.index());
                    (BuildState::Idle, Some(row))
                }
                (_, b"row") => {
                    return Err(XlError::new_corrupt_error("row closed with no open row"))
                }
                (state, b"rPh") => {
                    self.in_phonetic = false;
                    (state, None)
                }
                (state, _) => (state, None),
            },
        };

        self.state = next;
        Ok(done)
    }

    fn open_row(&mut self, e: &BytesStart) -> XlResult<BuildState> {
        let index = match util::get(e, b"r")? {
            Some(r) => r
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|r| *r > 0)
                .map(|r| r - 1)
                .ok_or_else(|| XlError::new_corrupt_error(format!("invalid row number {r:?}")))?,
            None => self.last_row.map_or(0, |r| r + 1),
        };
        let hidden = util::is_truthy(util::get(e, b"hidden")?.as_deref());
        self.last_column = None;

        Ok(BuildState::InRow(Row::new(index, hidden)))
    }

    fn open_cell(&mut self, row: Row, e: &BytesStart, ctx: &SheetContext<'_>) -> XlResult<BuildState> {
        let (column, row_index) = match util::get(e, b"r")? {
            Some(r) => util::split_reference(r.trim())?,
            None => (self.last_column.map_or(0, |c| c + 1), row.index()),
        };
        let mut cell = Cell::new(column, row_index);

        let marker = util::get(e, b"t")?;
        self.had_marker = marker.is_some();
        if let Some(marker) = marker {
            cell.set_type(CellType::from_marker(&marker));
        }

        let style = match util::get(e, b"s")? {
            Some(s) => match s.trim().parse::<u32>() {
                Ok(i) => {
                    cell.set_style_index(i);
                    Some(i as usize)
                }
                Err(_) => {
                    warn!("cell {}: ignoring non-numeric style index {s:?}", cell.reference());
                    None
                }
            },
            None if ctx.styles.style_count() > 0 => Some(0),
            None => None,
        };
        if let Some(style) = style.and_then(|i| ctx.styles.style_at(i)) {
            let pattern = style.format_code.or_else(|| {
                ctx.styles
                    .builtin_format(style.num_fmt_id)
                    .map(str::to_string)
            });
            cell.set_number_format(Some(style.num_fmt_id), pattern);
        }

        self.runs.clear();
        self.in_phonetic = false;
        Ok(BuildState::InCell(row, cell))
    }

    fn hide_columns(&mut self, e: &BytesStart) -> XlResult<()> {
        if !util::is_truthy(util::get(e, b"hidden")?.as_deref()) {
            return Ok(());
        }
        let bound = |which: &[u8]| -> XlResult<u32> {
            util::get(e, which)?
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|v| *v > 0)
                .ok_or_else(|| XlError::new_corrupt_error("hidden column range without valid bounds"))
        };
        let (min, max) = (bound(b"min")?, bound(b"max")?);
        self.meta
            .hidden_columns
            .extend(min - 1..max.min(util::XL_MAX_COL));
        Ok(())
    }
}

fn store_value(cell: &mut Cell, text: &str, ctx: &SheetContext<'_>) -> XlResult<()> {
    let (raw, display) = decode(
        cell.cell_type(),
        text,
        cell.number_format(),
        cell.number_format_index(),
        ctx.strings,
        ctx.formatter,
    )?;
    cell.set_values(raw, display);
    Ok(())
}

/// Pulls rows out of one worksheet xml stream.
pub(crate) struct SheetParser<R: BufRead> {
    reader: NsReader<R>,
    buf: Vec<u8>,
    builder: RowBuilder,
    exhausted: bool,
}

impl<R: BufRead> SheetParser<R> {
    pub(crate) fn new(source: R, buffer_size: usize) -> Self {
        let mut reader = NsReader::from_reader(source);
        reader.config_mut().expand_empty_elements = true;

        Self {
            reader,
            buf: Vec::with_capacity(buffer_size),
            builder: RowBuilder::new(),
            exhausted: false,
        }
    }

    pub(crate) fn meta(&self) -> &SheetMeta {
        self.builder.meta()
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Advance until the next complete row; `None` at the end of the sheet.
    pub(crate) fn next_row(&mut self, ctx: &SheetContext<'_>) -> XlResult<Option<Row>> {
        if self.exhausted {
            return Ok(None);
        }

        loop {
            self.buf.clear();
            let (ns, event) = self.reader.read_resolved_event_into(&mut self.buf)?;
            let step = match event {
                Event::Start(ref e) if is_spreadsheet_tag(&ns) => {
                    self.builder.step(Step::Start(e), ctx)?
                }
                Event::End(ref e) if is_spreadsheet_tag(&ns) => {
                    self.builder.step(Step::End(e.local_name().as_ref()), ctx)?
                }
                Event::Text(ref e) => self.builder.step(Step::Text(e.unescape()?), ctx)?,
                Event::CData(ref e) => {
                    self.builder.step(Step::Text(String::from_utf8_lossy(e)), ctx)?
                }
                Event::Eof => {
                    self.exhausted = true;
                    if !self.builder.is_idle() {
                        return Err(XlError::new_corrupt_error("sheet ended inside a row"));
                    }
                    return Ok(None);
                }
                _ => None,
            };
            if let Some(row) = step {
                return Ok(Some(row));
            }
        }
    }
}

#[cfg(test)]
mod test_builder {
    use super::*;
    use crate::{CellKind, CellStyle, DataFormatter, StylesTable};

    const NS: &str = r#"xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main""#;

    fn sheet(body: &str) -> String {
        format!(r#"<?xml version="1.0" encoding="UTF-8"?><worksheet {NS}>{body}</worksheet>"#)
    }

    struct Fixture {
        strings: Vec<String>,
        styles: StylesTable,
        formatter: DataFormatter,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                strings: vec!["hello".to_string(), "world".to_string()],
                styles: StylesTable::new(vec![
                    CellStyle::new(0, None),
                    CellStyle::new(2, None),
                    CellStyle::new(164, Some("0.0%".to_string())),
                ]),
                formatter: DataFormatter::default(),
            }
        }

        fn ctx(&self) -> SheetContext<'_> {
            SheetContext {
                strings: &self.strings,
                styles: &self.styles,
                formatter: &self.formatter,
            }
        }

        fn parse(&self, xml: &str) -> XlResult<(Vec<Row>, SheetMeta)> {
            let mut parser = SheetParser::new(xml.as_bytes(), 64);
            let ctx = self.ctx();
            let mut rows = vec![];
            while let Some(row) = parser.next_row(&ctx)? {
                rows.push(row);
            }
            Ok((rows, std::mem::take(&mut parser.builder.meta)))
        }
    }

    #[test]
    fn typed_cells() {
        let fx = Fixture::new();
        let xml = sheet(
            r#"<dimension ref="A1:F25"/>
            <sheetData>
              <row r="1">
                <c r="A1" t="s"><v>1</v></c>
                <c r="B1" s="1"><v>3.14159</v></c>
                <c r="C1" t="b"><v>1</v></c>
                <c r="D1" t="e"><v>#N/A</v></c>
                <c r="E1" t="inlineStr"><is><r><t>in</t></r><r><t xml:space="preserve">line </t></r></is></c>
                <c r="F1" s="2"/>
                <c r="G1" s="2"><v>0.256</v></c>
              </row>
            </sheetData>"#,
        );
        let (rows, meta) = fx.parse(&xml).unwrap();
        assert_eq!(meta.dimension_last_row, Some(24));
        assert_eq!(rows.len(), 1);

        let row = &rows[0];
        assert_eq!(row.index(), 0);
        assert_eq!(row.cell(0).unwrap().string_value(), "world");
        assert_eq!(row.cell(1).unwrap().raw_value(), Some("3.14159"));
        assert_eq!(row.cell(1).unwrap().string_value(), "3.14");
        assert_eq!(row.cell(1).unwrap().number_format(), Some("0.00"));
        assert!(row.cell(2).unwrap().bool_value().unwrap());
        assert_eq!(row.cell(3).unwrap().string_value(), "ERROR:  #N/A");
        assert_eq!(row.cell(4).unwrap().string_value(), "inline ");
        assert_eq!(row.cell(5).unwrap().cell_type(), &CellType::Blank);
        assert_eq!(row.cell(5).unwrap().kind().unwrap(), CellKind::Blank);
        assert_eq!(row.cell(6).unwrap().string_value(), "25.6%");
    }

    #[test]
    fn formulas_keep_cached_type() {
        let fx = Fixture::new();
        let xml = sheet(
            r#"<sheetData><row r="2">
                <c r="A2" t="b"><f>TRUE()</f><v>1</v></c>
                <c r="B2" t="str"><f>"a"&amp;"b"</f><v>ab</v></c>
              </row></sheetData>"#,
        );
        let (rows, _) = fx.parse(&xml).unwrap();
        let a = rows[0].cell(0).unwrap();
        assert_eq!(a.formula().unwrap(), "TRUE()");
        assert_eq!(a.cached_formula_result_kind().unwrap(), CellKind::Boolean);
        assert!(a.bool_value().unwrap());

        let b = rows[0].cell(1).unwrap();
        assert_eq!(b.formula().unwrap(), r#""a"&"b""#);
        assert_eq!(b.raw_value(), Some("ab"));
        assert_eq!(b.string_value(), "\"ab\"");
        assert_eq!(b.cached_formula_result_kind().unwrap(), CellKind::String);
    }

    #[test]
    fn missing_references_follow_previous() {
        let fx = Fixture::new();
        let xml = sheet(
            r#"<sheetData>
              <row r="3"><c r="C3"><v>1</v></c><c><v>2</v></c></row>
              <row hidden="1"><c><v>3</v></c></row>
              <row r="7"/>
            </sheetData>"#,
        );
        let (rows, _) = fx.parse(&xml).unwrap();
        assert_eq!(rows.iter().map(|r| r.index()).collect::<Vec<_>>(), vec![2, 3, 6]);
        assert_eq!(rows[0].first_column(), Some(2));
        assert_eq!(rows[0].cell(3).unwrap().raw_value(), Some("2"));
        assert!(rows[1].is_hidden());
        assert_eq!(rows[1].cell(0).unwrap().reference(), "A4");
        // present but empty
        assert!(rows[2].is_empty());
    }

    #[test]
    fn hidden_columns() {
        let fx = Fixture::new();
        let xml = sheet(
            r#"<cols>
                <col min="1" max="1" width="9"/>
                <col min="3" max="5" hidden="1"/>
                <col min="8" max="8" hidden="true"/>
              </cols><sheetData/>"#,
        );
        let (_, meta) = fx.parse(&xml).unwrap();
        let mut hidden = meta.hidden_columns.into_iter().collect::<Vec<_>>();
        hidden.sort();
        assert_eq!(hidden, vec![2, 3, 4, 7]);
    }

    #[test]
    fn hidden_column_range_is_bounded() {
        let fx = Fixture::new();
        let xml = sheet(
            r#"<cols><col min="16380" max="4294967295" hidden="1"/></cols><sheetData/>"#,
        );
        let (_, meta) = fx.parse(&xml).unwrap();
        assert_eq!(meta.hidden_columns.len(), 5);
        assert!(meta.hidden_columns.contains(&16383));
        assert!(!meta.hidden_columns.contains(&16384));
    }

    #[test]
    fn phonetic_runs_are_not_inline_text() {
        let fx = Fixture::new();
        let si = r#"<r><t>東京</t></r><rPh sb="0" eb="2"><t>トウキョウ</t></rPh><r><t>都</t></r>"#;
        let xml = sheet(&format!(
            r#"<sheetData><row r="1"><c r="A1" t="inlineStr"><is>{si}</is></c></row></sheetData>"#
        ));
        let (rows, _) = fx.parse(&xml).unwrap();
        let inline = rows[0].cell(0).unwrap().string_value().to_string();
        assert_eq!(inline, "東京都");

        let sst = format!(
            r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><si>{si}</si></sst>"#
        );
        let table = crate::SharedStringTable::from_reader(sst.as_bytes()).unwrap();
        assert_eq!(crate::SharedStrings::get(&table, 0), Some(inline.as_str()));
    }

    #[test]
    fn foreign_namespaces_are_skipped() {
        let fx = Fixture::new();
        let xml = sheet(
            r#"<sheetData><row r="1">
                <c r="A1"><v>1</v></c>
                <x:c xmlns:x="urn:other" r="B1"><x:v>9</x:v></x:c>
              </row></sheetData>"#,
        );
        let (rows, _) = fx.parse(&xml).unwrap();
        assert_eq!(rows[0].len(), 1);
    }

    #[test]
    fn malformed_transitions() {
        let fx = Fixture::new();
        for body in [
            r#"<sheetData><c r="A1"><v>1</v></c></sheetData>"#,
            r#"<sheetData><row r="1"><row r="2"></row></row></sheetData>"#,
            r#"<sheetData><row r="x"></row></sheetData>"#,
            r#"<sheetData><row r="1"><c r="1A"/></row></sheetData>"#,
            r#"<sheetData><row r="1"><c r="A1" t="s"><v>9</v></c></row></sheetData>"#,
        ] {
            assert!(
                matches!(fx.parse(&sheet(body)), Err(XlError::CorruptDocument(_))),
                "{body}"
            );
        }
    }

    #[test]
    fn bad_style_index_is_tolerated() {
        let fx = Fixture::new();
        let xml = sheet(r#"<sheetData><row r="1"><c r="A1" s="x"><v>2.5</v></c></row></sheetData>"#);
        let (rows, _) = fx.parse(&xml).unwrap();
        let cell = rows[0].cell(0).unwrap();
        assert_eq!(cell.number_format(), None);
        assert_eq!(cell.string_value(), "2.5");
    }
}
