//! Cell value decoder
//!
//! Turns the text accumulated inside a `<v>`/`<t>` element into the raw and the display value
//! of a cell, according to its type tag.

use std::io::BufRead;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::{util, CellType, NumberFormatter, XlError, XlResult};

/// Shared string lookup consumed by the decoder.
pub trait SharedStrings {
    /// Entry at `index`, `None` when out of range
    fn get(&self, index: usize) -> Option<&str>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SharedStrings for [String] {
    fn get(&self, index: usize) -> Option<&str> {
        <[String]>::get(self, index).map(String::as_str)
    }

    fn len(&self) -> usize {
        <[String]>::len(self)
    }
}

impl SharedStrings for Vec<String> {
    fn get(&self, index: usize) -> Option<&str> {
        self.as_slice().get(index).map(String::as_str)
    }

    fn len(&self) -> usize {
        self.as_slice().len()
    }
}

/// Strings parsed from `xl/sharedStrings.xml`
#[derive(Debug, Default, Clone)]
pub struct SharedStringTable {
    strings: Vec<String>,
}

impl SharedStringTable {
    pub fn new(strings: Vec<String>) -> Self {
        Self { strings }
    }

    /// One entry per `<si>`: the concatenation of its `<t>` runs. Phonetic runs (`<rPh>`) are
    /// not part of the text.
    pub fn from_reader<R: BufRead>(source: R) -> XlResult<Self> {
        let mut reader = Reader::from_reader(source);
        let mut buf = Vec::new();
        let mut strings = Vec::new();
        let mut this_string = String::new();
        let mut in_text = false;
        let mut in_phonetic = false;

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(ref e) => match e.local_name().as_ref() {
                    b"si" => this_string.clear(),
                    b"rPh" => in_phonetic = true,
                    b"t" if !in_phonetic => in_text = true,
                    _ => (),
                },
                Event::Empty(ref e) if e.local_name().as_ref() == b"si" => {
                    strings.push(String::new());
                }
                Event::Text(ref e) if in_text => this_string.push_str(&e.unescape()?),
                Event::CData(ref e) if in_text => {
                    this_string.push_str(&String::from_utf8_lossy(e))
                }
                Event::End(ref e) => match e.local_name().as_ref() {
                    b"t" => in_text = false,
                    b"rPh" => in_phonetic = false,
                    b"si" => strings.push(std::mem::take(&mut this_string)),
                    _ => (),
                },
                Event::Eof => break,
                _ => (),
            }
            buf.clear();
        }

        Ok(Self { strings })
    }
}

impl SharedStrings for SharedStringTable {
    fn get(&self, index: usize) -> Option<&str> {
        self.strings.as_slice().get(index).map(String::as_str)
    }

    fn len(&self) -> usize {
        self.strings.as_slice().len()
    }
}

/// Decode `text` of a cell tagged `cell_type` into `(raw, display)`.
///
/// | type          | raw                      | display                      |
/// |---------------|--------------------------|------------------------------|
/// | SharedString  | shared entry, unescaped  | same                         |
/// | InlineString  | text, unescaped          | same                         |
/// | FormulaString | text                     | text in double quotes        |
/// | Error         | text                     | `ERROR:  ` + text            |
/// | Numeric       | text                     | formatted when a format is known |
/// | Boolean       | `0`/`1`                  | same                         |
/// | Blank         | empty                    | empty                        |
///
/// A shared string index that is not an integer or is out of range is a corrupt document.
/// Unparsable numeric text is not an error here: the raw text is kept and the failure
/// surfaces from `Cell::numeric_value`.
pub fn decode(
    cell_type: &CellType,
    text: &str,
    number_format: Option<&str>,
    number_format_index: Option<u16>,
    strings: &dyn SharedStrings,
    formatter: &dyn NumberFormatter,
) -> XlResult<(String, String)> {
    let decoded = match cell_type {
        CellType::SharedString => {
            let idx = text.trim().parse::<usize>().map_err(|_| {
                XlError::new_corrupt_error(format!("invalid shared string index {text:?}"))
            })?;
            let s = strings.get(idx).ok_or_else(|| {
                XlError::new_corrupt_error(format!(
                    "shared string index {idx} out of range ({} entries)",
                    strings.len()
                ))
            })?;
            let s = util::unescape_ooxml(s).into_owned();
            (s.clone(), s)
        }
        CellType::InlineString => {
            let s = util::unescape_ooxml(text).into_owned();
            (s.clone(), s)
        }
        CellType::FormulaString => (text.to_string(), format!("\"{text}\"")),
        CellType::Error => (text.to_string(), format!("ERROR:  {text}")),
        CellType::Numeric => {
            let display = match number_format {
                Some(pattern) if !text.is_empty() => match text.trim().parse::<f64>() {
                    Ok(v) => formatter.format_raw(v, number_format_index.unwrap_or(0), pattern),
                    Err(_) => text.to_string(),
                },
                _ => text.to_string(),
            };
            (text.to_string(), display)
        }
        CellType::Blank => (String::new(), String::new()),
        CellType::Boolean | CellType::Unsupported(_) => (text.to_string(), text.to_string()),
    };
    Ok(decoded)
}
