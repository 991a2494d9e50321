//! Evaluation bridge
//!
//! Read-only view of a streaming sheet for an external formula engine: cells addressed by
//! (sheet, row, column), exposing their kind, raw values, formula text and the kind of their
//! cached result.

use std::io::BufRead;

use crate::{Cell, CellKind, StreamingSheet, XlResult};

/// A sheet as seen by a formula engine
pub struct EvaluationSheet<'s, 'a, R: BufRead> {
    sheet: &'s mut StreamingSheet<'a, R>,
    sheet_index: usize,
}

impl<'s, 'a, R: BufRead> EvaluationSheet<'s, 'a, R> {
    pub fn new(sheet: &'s mut StreamingSheet<'a, R>, sheet_index: usize) -> Self {
        Self { sheet, sheet_index }
    }

    pub fn sheet_index(&self) -> usize {
        self.sheet_index
    }

    pub fn sheet_name(&self) -> &str {
        self.sheet.name()
    }

    pub fn last_row_num(&mut self) -> XlResult<u32> {
        self.sheet.last_row_num()
    }

    /// Cell at (`row`, `column`), both 0-based. `None` for a missing row or cell.
    pub fn get_cell(&mut self, row: u32, column: u32) -> XlResult<Option<EvaluationCell>> {
        let sheet_index = self.sheet_index;
        Ok(self.sheet.get_row(row)?.and_then(|r| {
            r.cell(column).cloned().map(|cell| EvaluationCell { cell, sheet_index })
        }))
    }
}

/// A cell as seen by a formula engine
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationCell {
    cell: Cell,
    sheet_index: usize,
}

impl EvaluationCell {
    /// `(sheet, row, column)`, unique within a workbook
    pub fn identity_key(&self) -> (usize, u32, u32) {
        (self.sheet_index, self.cell.row_index(), self.cell.column_index())
    }

    pub fn sheet_index(&self) -> usize {
        self.sheet_index
    }

    pub fn row_index(&self) -> u32 {
        self.cell.row_index()
    }

    pub fn column_index(&self) -> u32 {
        self.cell.column_index()
    }

    pub fn kind(&self) -> XlResult<CellKind> {
        self.cell.kind()
    }

    pub fn numeric_value(&self) -> XlResult<f64> {
        self.cell.numeric_value()
    }

    pub fn bool_value(&self) -> XlResult<bool> {
        self.cell.bool_value()
    }

    pub fn string_value(&self) -> &str {
        self.cell.string_value()
    }

    pub fn error_value(&self) -> Option<&str> {
        self.cell.error_value()
    }

    pub fn formula(&self) -> XlResult<&str> {
        self.cell.formula()
    }

    pub fn cached_formula_result_kind(&self) -> XlResult<CellKind> {
        self.cell.cached_formula_result_kind()
    }

    pub fn cell(&self) -> &Cell {
        &self.cell
    }
}

#[cfg(test)]
mod test_eval {
    use super::*;
    use crate::{DataFormatter, ReaderConfig, SheetContext, StylesTable};

    #[test]
    fn addressing_and_values() {
        let strings: Vec<String> = vec![];
        let styles = StylesTable::default();
        let formatter = DataFormatter::default();
        let dir = tempfile::tempdir().unwrap();
        let xml = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
            <row r="1"><c r="A1"><v>2</v></c><c r="B1"><f>A1*3</f><v>6</v></c></row>
            <row r="3"><c r="C3" t="e"><v>#REF!</v></c></row>
        </sheetData></worksheet>"#;

        let ctx = SheetContext::new(&strings, &styles, &formatter);
        let config = ReaderConfig::default()
            .with_row_cache_size(1)
            .with_spill_dir(dir.path());
        let mut sheet = StreamingSheet::new("Calc", xml.as_bytes(), ctx, config);
        let mut eval = EvaluationSheet::new(&mut sheet, 2);
        assert_eq!(eval.sheet_name(), "Calc");

        let b1 = eval.get_cell(0, 1).unwrap().unwrap();
        assert_eq!(b1.identity_key(), (2, 0, 1));
        assert_eq!(b1.kind().unwrap(), CellKind::Formula);
        assert_eq!(b1.formula().unwrap(), "A1*3");
        assert_eq!(b1.numeric_value().unwrap(), 6.0);
        assert_eq!(b1.cached_formula_result_kind().unwrap(), CellKind::Numeric);

        let c3 = eval.get_cell(2, 2).unwrap().unwrap();
        assert_eq!(c3.kind().unwrap(), CellKind::Error);
        assert_eq!(c3.error_value(), Some("#REF!"));

        // back to an earlier window
        assert_eq!(eval.get_cell(0, 0).unwrap().unwrap().numeric_value().unwrap(), 2.0);
        assert!(eval.get_cell(1, 0).unwrap().is_none());
        assert!(eval.get_cell(0, 5).unwrap().is_none());
        assert_eq!(eval.last_row_num().unwrap(), 2);
    }
}
