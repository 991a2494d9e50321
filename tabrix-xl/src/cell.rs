//! Cell & Row
//!
//! The minimum Excel units produced by the row builder. Both are plain data: once a row has
//! been emitted it is never mutated, and it can be spilled to (and reloaded from) a backing
//! file as is.

use std::collections::BTreeMap;
use std::fmt::Display;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{util, DateSystem, XlError, XlResult};

const TRUE_AS_STRING: &str = "1";

/// Decoded type tag of a cell, derived from its `t` marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellType {
    /// `n`, also the default when `t` is absent
    Numeric,
    /// `s`, index into the shared string table
    SharedString,
    /// `inlineStr`
    InlineString,
    /// `str`, or any cell carrying an `f` element
    FormulaString,
    /// `b`
    Boolean,
    /// `e`
    Error,
    /// no marker and no value
    Blank,
    /// a marker outside of the supported set
    Unsupported(String),
}

impl CellType {
    pub fn from_marker(marker: &str) -> Self {
        match marker {
            "n" => CellType::Numeric,
            "s" => CellType::SharedString,
            "inlineStr" => CellType::InlineString,
            "str" => CellType::FormulaString,
            "b" => CellType::Boolean,
            "e" => CellType::Error,
            other => CellType::Unsupported(other.to_string()),
        }
    }

    fn kind(&self) -> XlResult<CellKind> {
        match self {
            CellType::Numeric => Ok(CellKind::Numeric),
            CellType::SharedString | CellType::InlineString => Ok(CellKind::String),
            CellType::FormulaString => Ok(CellKind::Formula),
            CellType::Boolean => Ok(CellKind::Boolean),
            CellType::Error => Ok(CellKind::Error),
            CellType::Blank => Ok(CellKind::Blank),
            CellType::Unsupported(t) => Err(XlError::UnsupportedCellType(t.clone())),
        }
    }
}

/// Category of a cell as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Blank,
    Numeric,
    String,
    Formula,
    Boolean,
    Error,
}

impl CellKind {
    pub fn name(&self) -> &'static str {
        match self {
            CellKind::Blank => "blank",
            CellKind::Numeric => "numeric",
            CellKind::String => "text",
            CellKind::Formula => "formula",
            CellKind::Boolean => "boolean",
            CellKind::Error => "error",
        }
    }
}

impl Display for CellKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// minimum Excel unit: cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    column: u32,
    row: u32,
    cell_type: CellType,
    /// Type declared by the marker before an `f` element turned this into a formula cell
    cached_result_type: Option<CellType>,
    raw_value: Option<String>,
    display_value: Option<String>,
    formula: Option<String>,
    number_format: Option<String>,
    number_format_index: Option<u16>,
    style_index: Option<u32>,
}

impl Cell {
    pub(crate) fn new(column: u32, row: u32) -> Self {
        Self {
            column,
            row,
            cell_type: CellType::Numeric,
            cached_result_type: None,
            raw_value: None,
            display_value: None,
            formula: None,
            number_format: None,
            number_format_index: None,
            style_index: None,
        }
    }

    // ============================================================================================
    // construction, builder only
    // ============================================================================================

    pub(crate) fn set_type(&mut self, cell_type: CellType) {
        self.cell_type = cell_type;
    }

    /// An `f` element was seen: remember the declared type as the cached result type.
    pub(crate) fn mark_formula(&mut self) {
        if self.cell_type != CellType::FormulaString || self.cached_result_type.is_none() {
            let declared = std::mem::replace(&mut self.cell_type, CellType::FormulaString);
            self.cached_result_type = Some(declared);
        }
    }

    pub(crate) fn set_values(&mut self, raw: String, display: String) {
        self.raw_value = Some(raw);
        self.display_value = Some(display);
    }

    pub(crate) fn set_formula(&mut self, formula: String) {
        self.formula = Some(formula);
    }

    pub(crate) fn set_number_format(&mut self, index: Option<u16>, pattern: Option<String>) {
        self.number_format_index = index;
        self.number_format = pattern;
    }

    pub(crate) fn set_style_index(&mut self, index: u32) {
        self.style_index = Some(index);
    }

    /// A cell that declared no marker and never received a value is blank.
    pub(crate) fn finish(&mut self, had_marker: bool) {
        if !had_marker && self.cell_type == CellType::Numeric && self.raw_value.is_none() {
            self.cell_type = CellType::Blank;
        }
    }

    // ============================================================================================
    // accessors
    // ============================================================================================

    pub fn column_index(&self) -> u32 {
        self.column
    }

    pub fn row_index(&self) -> u32 {
        self.row
    }

    /// A1-style reference, e.g. `B7`
    pub fn reference(&self) -> String {
        let col = util::num2col(self.column + 1).unwrap_or_default();
        format!("{}{}", col, self.row + 1)
    }

    pub fn cell_type(&self) -> &CellType {
        &self.cell_type
    }

    pub fn raw_value(&self) -> Option<&str> {
        self.raw_value.as_deref()
    }

    pub fn display_value(&self) -> Option<&str> {
        self.display_value.as_deref()
    }

    pub fn number_format(&self) -> Option<&str> {
        self.number_format.as_deref()
    }

    pub fn number_format_index(&self) -> Option<u16> {
        self.number_format_index
    }

    pub fn style_index(&self) -> Option<u32> {
        self.style_index
    }

    /// Category of this cell. A cell without any value is blank, whatever its marker said.
    pub fn kind(&self) -> XlResult<CellKind> {
        if self.display_value.is_none() {
            return Ok(CellKind::Blank);
        }
        self.cell_type.kind()
    }

    /// The display value, or an empty string.
    pub fn string_value(&self) -> &str {
        self.display_value.as_deref().unwrap_or("")
    }

    /// The raw value as a number, 0 for cells without a value.
    pub fn numeric_value(&self) -> XlResult<f64> {
        match self.raw_value.as_deref() {
            None => Ok(0.0),
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .map_err(|_| XlError::MalformedNumber(raw.to_string())),
        }
    }

    pub fn bool_value(&self) -> XlResult<bool> {
        match self.kind()? {
            CellKind::Blank => Ok(false),
            CellKind::Boolean => Ok(self.raw_value.as_deref() == Some(TRUE_AS_STRING)),
            CellKind::Formula if self.cached_result_type == Some(CellType::Boolean) => {
                Ok(self.raw_value.as_deref() == Some(TRUE_AS_STRING))
            }
            other => Err(XlError::TypeMismatch {
                expected: CellKind::Boolean.name(),
                actual: other.name(),
            }),
        }
    }

    /// The raw value interpreted as a serial date under `date_system`.
    pub fn date_value(&self, date_system: &DateSystem) -> XlResult<Option<NaiveDateTime>> {
        if self.kind()? == CellKind::String {
            return Err(XlError::TypeMismatch {
                expected: "date",
                actual: CellKind::String.name(),
            });
        }
        if self.raw_value.is_none() {
            return Ok(None);
        }
        let serial = self.numeric_value()?;
        Ok(util::excel_number_to_date(serial, date_system)?.into_datetime(date_system))
    }

    /// The error code of an error cell, e.g. `#DIV/0!`
    pub fn error_value(&self) -> Option<&str> {
        match self.cell_type {
            CellType::Error => self.raw_value.as_deref(),
            _ => None,
        }
    }

    pub fn is_formula(&self) -> bool {
        self.cell_type == CellType::FormulaString
    }

    /// Formula source text of a formula cell.
    pub fn formula(&self) -> XlResult<&str> {
        if !self.is_formula() {
            return Err(XlError::new_common_error("This cell does not have a formula"));
        }
        Ok(self.formula.as_deref().unwrap_or(""))
    }

    /// Category of the value cached by a formula cell.
    pub fn cached_formula_result_kind(&self) -> XlResult<CellKind> {
        if !self.is_formula() {
            return Err(XlError::new_common_error(
                "Only formula cells have cached results",
            ));
        }
        match (&self.display_value, &self.cached_result_type) {
            (None, _) | (_, None) => Ok(CellKind::Blank),
            // `t="str"`: the cached result is a plain string
            (_, Some(CellType::FormulaString)) => Ok(CellKind::String),
            (_, Some(t)) => t.kind(),
        }
    }
}

impl Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.string_value())
    }
}

/// a row of cells, keyed by 0-based column index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    index: u32,
    hidden: bool,
    cells: BTreeMap<u32, Cell>,
}

impl Row {
    pub(crate) fn new(index: u32, hidden: bool) -> Self {
        Self {
            index,
            hidden,
            cells: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, cell: Cell) {
        self.cells.insert(cell.column_index(), cell);
    }

    /// 0-based row number
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn cell(&self, column: u32) -> Option<&Cell> {
        self.cells.get(&column)
    }

    /// cells in ascending column order
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn first_column(&self) -> Option<u32> {
        self.cells.keys().next().copied()
    }

    pub fn last_column(&self) -> Option<u32> {
        self.cells.keys().next_back().copied()
    }
}
