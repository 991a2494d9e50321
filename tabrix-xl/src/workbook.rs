//! File Xl Workbook
//!
//! This module opens the xlsx container and hands out one `StreamingSheet` per worksheet. The
//! workbook level parts (shared strings, styles, date system, sheet list) are loaded once when
//! the workbook is opened; worksheet parts are only ever streamed.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use log::info;
use quick_xml::events::Event;
use quick_xml::Reader;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::{
    util, DataFormatter, DateSystem, ReaderConfig, SharedStringTable, SheetContext,
    StreamingSheet, StylesTable, XlError, XlResult,
};

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
const STYLES_PART: &str = "xl/styles.xml";

/// Visibility of a sheet tab
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SheetState {
    #[default]
    Visible,
    Hidden,
    /// only reachable through VBA
    VeryHidden,
}

impl SheetState {
    fn from_attr(state: Option<&str>) -> Self {
        match state {
            Some("hidden") => SheetState::Hidden,
            Some("veryHidden") => SheetState::VeryHidden,
            _ => SheetState::Visible,
        }
    }
}

/// A `sheet` entry of the workbook part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetInfo {
    pub name: String,
    pub sheet_id: u32,
    pub relationship_id: String,
    /// path of the worksheet part inside the container
    pub target: String,
    pub state: SheetState,
}

/// The main struct of this module.
///
/// # Example usage:
///
/// ```no_run
/// use tabrix_xl::Workbook;
///
/// let mut wb = Workbook::open("tests/data/Book1.xlsx")?;
/// let mut sheet = wb.sheet_at(0)?;
/// let first = sheet.get_row(0)?;
/// # Ok::<(), tabrix_xl::XlError>(())
/// ```
#[derive(Debug)]
pub struct Workbook<READER: Read + Seek> {
    xls: ZipArchive<READER>,
    date_system: DateSystem,
    strings: SharedStringTable,
    styles: StylesTable,
    formatter: DataFormatter,
    sheets: Vec<SheetInfo>,
    config: ReaderConfig,
}

impl Workbook<File> {
    /// Open an existing workbook (xlsx file).
    pub fn open<P: AsRef<Path>>(path: P) -> XlResult<Self> {
        let file = File::open(path.as_ref())?;
        info!("opening workbook {}", path.as_ref().display());
        Self::new(file)
    }
}

impl<READER> Workbook<READER>
where
    READER: Read + Seek,
{
    pub fn new(reader: READER) -> XlResult<Self> {
        let mut xls = ZipArchive::new(reader)?;

        let strings = match xls.by_name(SHARED_STRINGS_PART) {
            Ok(f) => SharedStringTable::from_reader(BufReader::new(f))?,
            Err(ZipError::FileNotFound) => SharedStringTable::default(),
            Err(e) => return Err(e.into()),
        };
        let styles = match xls.by_name(STYLES_PART) {
            Ok(f) => StylesTable::from_reader(BufReader::new(f))?,
            Err(ZipError::FileNotFound) => StylesTable::default(),
            Err(e) => return Err(e.into()),
        };
        let rels = rels(&mut xls)?;
        let (date_system, sheets) = workbook_part(&mut xls, &rels)?;

        Ok(Self {
            xls,
            date_system,
            strings,
            styles,
            formatter: DataFormatter::new(date_system),
            sheets,
            config: ReaderConfig::default(),
        })
    }

    /// Reader options applied to every sheet handed out afterwards
    pub fn with_config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn date_system(&self) -> DateSystem {
        self.date_system
    }

    pub fn shared_strings(&self) -> &SharedStringTable {
        &self.strings
    }

    pub fn styles(&self) -> &StylesTable {
        &self.styles
    }

    pub fn sheets(&self) -> &[SheetInfo] {
        &self.sheets
    }

    /// Sheet names, in tab order
    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    /// 0-based position of the sheet called `name`
    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets.iter().position(|s| s.name == name)
    }

    fn sheet_info(&self, index: usize) -> XlResult<&SheetInfo> {
        self.sheets
            .get(index)
            .ok_or_else(|| XlError::SourceNotFound(format!("sheet #{index}")))
    }

    pub fn is_sheet_hidden(&self, index: usize) -> XlResult<bool> {
        Ok(self.sheet_info(index)?.state == SheetState::Hidden)
    }

    pub fn is_sheet_very_hidden(&self, index: usize) -> XlResult<bool> {
        Ok(self.sheet_info(index)?.state == SheetState::VeryHidden)
    }

    /// Stream the sheet at `index` (0-based, tab order).
    pub fn sheet_at(
        &mut self,
        index: usize,
    ) -> XlResult<StreamingSheet<'_, BufReader<impl Read + '_>>> {
        let info = self.sheet_info(index)?;
        let name = info.name.clone();
        let target = info.target.clone();

        let part = match self.xls.by_name(&target) {
            Ok(part) => part,
            Err(ZipError::FileNotFound) => return Err(XlError::SourceNotFound(target)),
            Err(e) => return Err(e.into()),
        };
        info!("streaming sheet {name} from {target}");
        let ctx = SheetContext::new(&self.strings, &self.styles, &self.formatter);

        Ok(StreamingSheet::new(
            name,
            BufReader::new(part),
            ctx,
            self.config.clone(),
        ))
    }

    /// Stream the sheet called `name`.
    pub fn sheet(&mut self, name: &str) -> XlResult<StreamingSheet<'_, BufReader<impl Read + '_>>> {
        let index = self
            .sheet_index(name)
            .ok_or_else(|| XlError::SourceNotFound(format!("sheet {name:?}")))?;
        self.sheet_at(index)
    }
}

/// Relationship id -> target of the workbook part. Targets are resolved against `xl/`
/// unless absolute.
fn rels<READER: Read + Seek>(xls: &mut ZipArchive<READER>) -> XlResult<HashMap<String, String>> {
    let mut map = HashMap::new();

    let part = match xls.by_name(WORKBOOK_RELS_PART) {
        Ok(part) => part,
        Err(ZipError::FileNotFound) => return Ok(map),
        Err(e) => return Err(e.into()),
    };

    // Looking for tree structure like:
    //   Relationships
    //     Relationship(Id = "rId1", Target = "worksheets/sheet1.xml")
    let mut reader = Reader::from_reader(BufReader::new(part));
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e)
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (util::get(e, b"Id")?, util::get(e, b"Target")?) {
                    let target = match target.strip_prefix('/') {
                        Some(stripped) => stripped.to_string(),
                        None => format!("xl/{target}"),
                    };
                    map.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }

    Ok(map)
}

/// Date system and sheet list of the workbook part.
fn workbook_part<READER: Read + Seek>(
    xls: &mut ZipArchive<READER>,
    rels: &HashMap<String, String>,
) -> XlResult<(DateSystem, Vec<SheetInfo>)> {
    let part = match xls.by_name(WORKBOOK_PART) {
        Ok(part) => part,
        Err(ZipError::FileNotFound) => {
            return Err(XlError::SourceNotFound(WORKBOOK_PART.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let mut reader = Reader::from_reader(BufReader::new(part));
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut date_system = DateSystem::V1900;
    let mut sheets = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e)
                if e.local_name().as_ref() == b"workbookPr" =>
            {
                if util::is_truthy(util::get(e, b"date1904")?.as_deref()) {
                    date_system = DateSystem::V1904;
                }
            }
            Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"sheet" => {
                let name = util::get(e, b"name")?
                    .ok_or_else(|| XlError::new_corrupt_error("sheet without a name"))?;
                let relationship_id = util::get(e, b"r:id")?.ok_or_else(|| {
                    XlError::new_corrupt_error(format!("sheet {name:?} without a relationship"))
                })?;
                let target = rels.get(&relationship_id).cloned().ok_or_else(|| {
                    XlError::new_corrupt_error(format!(
                        "sheet {name:?} refers to unknown relationship {relationship_id:?}"
                    ))
                })?;
                let sheet_id = util::get(e, b"sheetId")?
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let state = SheetState::from_attr(util::get(e, b"state")?.as_deref());

                sheets.push(SheetInfo {
                    name,
                    sheet_id,
                    relationship_id,
                    target,
                    state,
                });
            }
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }

    Ok((date_system, sheets))
}
