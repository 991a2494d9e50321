//! Style table
//!
//! Cells reference a style by index (`<c s="3">`). The reader only needs the number format
//! of that style, either as an explicit pattern declared in `styles.xml` or as one of the
//! built-in formats defined by ISO/IEC 29500 (Part 1, section 18.8.30).

use std::collections::HashMap;
use std::io::BufRead;

use lazy_static::lazy_static;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::{util, XlResult};

/// The number format part of a cell style (an `xf` record of `cellXfs`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellStyle {
    pub num_fmt_id: u16,
    /// Explicit pattern, `None` when the id refers to a built-in format
    pub format_code: Option<String>,
}

impl CellStyle {
    pub fn new(num_fmt_id: u16, format_code: Option<String>) -> Self {
        Self {
            num_fmt_id,
            format_code,
        }
    }
}

/// Style lookup consumed by the row builder.
pub trait StyleSource {
    /// Style at `index`, `None` when out of range
    fn style_at(&self, index: usize) -> Option<CellStyle>;

    fn style_count(&self) -> usize;

    fn builtin_format(&self, index: u16) -> Option<&str> {
        builtin_format(index)
    }
}

lazy_static! {
    static ref BUILTIN_FORMATS: HashMap<u16, &'static str> = vec![
        (0, "General"),
        (1, "0"),
        (2, "0.00"),
        (3, "#,##0"),
        (4, "#,##0.00"),
        (9, "0%"),
        (10, "0.00%"),
        (11, "0.00E+00"),
        (12, "# ?/?"),
        (13, "# ??/??"),
        (14, "mm-dd-yy"),
        (15, "d-mmm-yy"),
        (16, "d-mmm"),
        (17, "mmm-yy"),
        (18, "h:mm AM/PM"),
        (19, "h:mm:ss AM/PM"),
        (20, "h:mm"),
        (21, "h:mm:ss"),
        (22, "m/d/yy h:mm"),
        (37, "#,##0 ;(#,##0)"),
        (38, "#,##0 ;[Red](#,##0)"),
        (39, "#,##0.00;(#,##0.00)"),
        (40, "#,##0.00;[Red](#,##0.00)"),
        (45, "mm:ss"),
        (46, "[h]:mm:ss"),
        (47, "mmss.0"),
        (48, "##0.0E+0"),
        (49, "@"),
    ]
    .into_iter()
    .collect();
}

/// Built-in number format pattern for `index`
pub fn builtin_format(index: u16) -> Option<&'static str> {
    BUILTIN_FORMATS.get(&index).copied()
}

/// Styles parsed from `xl/styles.xml`
#[derive(Debug, Default, Clone)]
pub struct StylesTable {
    styles: Vec<CellStyle>,
}

impl StylesTable {
    pub fn new(styles: Vec<CellStyle>) -> Self {
        Self { styles }
    }

    /// Parse the `numFmts` and `cellXfs` sections of a styles part.
    ///
    /// Section 2.1.589 Part 1 Section 18.3.1.4, c (Cell) Item g. states that Office specifies
    /// that @s indexes into the cellXfs collection in the style part.
    pub fn from_reader<R: BufRead>(source: R) -> XlResult<Self> {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(true);

        let mut number_formats: HashMap<u16, String> = HashMap::new();
        let mut xfs: Vec<u16> = Vec::new();
        let mut in_cell_xfs = false;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(ref e) | Event::Empty(ref e)
                    if e.local_name().as_ref() == b"numFmt" =>
                {
                    let id = util::get(e, b"numFmtId")?.and_then(|v| v.parse::<u16>().ok());
                    let code = util::get(e, b"formatCode")?;
                    if let (Some(id), Some(code)) = (id, code) {
                        number_formats.insert(id, code);
                    }
                }
                Event::Start(ref e) if e.local_name().as_ref() == b"cellXfs" => {
                    in_cell_xfs = true;
                }
                Event::End(ref e) if e.local_name().as_ref() == b"cellXfs" => {
                    in_cell_xfs = false;
                }
                Event::Start(ref e) | Event::Empty(ref e)
                    if in_cell_xfs && e.local_name().as_ref() == b"xf" =>
                {
                    let id = util::get(e, b"numFmtId")?
                        .and_then(|v| v.parse::<u16>().ok())
                        .unwrap_or(0);
                    xfs.push(id);
                }
                Event::Eof => break,
                _ => (),
            }
            buf.clear();
        }

        let styles = xfs
            .into_iter()
            .map(|id| CellStyle::new(id, number_formats.get(&id).cloned()))
            .collect();

        Ok(Self { styles })
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }
}

impl StyleSource for StylesTable {
    fn style_at(&self, index: usize) -> Option<CellStyle> {
        self.styles.get(index).cloned()
    }

    fn style_count(&self) -> usize {
        self.styles.len()
    }
}

#[cfg(test)]
mod test_styles {
    use super::*;

    const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <numFmts count="1"><numFmt numFmtId="164" formatCode="0.000"/></numFmts>
  <cellStyleXfs count="1"><xf numFmtId="0"/></cellStyleXfs>
  <cellXfs count="3">
    <xf numFmtId="0" fontId="0"/>
    <xf numFmtId="164" fontId="0" applyNumberFormat="1"/>
    <xf numFmtId="14" fontId="0" applyNumberFormat="1"><alignment/></xf>
  </cellXfs>
</styleSheet>"#;

    #[test]
    fn parse_cell_xfs() {
        let styles = StylesTable::from_reader(STYLES_XML.as_bytes()).unwrap();

        assert_eq!(styles.style_count(), 3);
        assert_eq!(styles.style_at(0), Some(CellStyle::new(0, None)));
        assert_eq!(
            styles.style_at(1),
            Some(CellStyle::new(164, Some("0.000".to_string())))
        );
        assert_eq!(styles.style_at(2), Some(CellStyle::new(14, None)));
        assert_eq!(styles.style_at(3), None);
    }

    #[test]
    fn builtin_lookup() {
        let styles = StylesTable::default();
        assert_eq!(styles.builtin_format(0), Some("General"));
        assert_eq!(styles.builtin_format(14), Some("mm-dd-yy"));
        assert_eq!(styles.builtin_format(200), None);
    }
}
