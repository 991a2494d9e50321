//! Tag classifier
//!
//! Worksheet parts mix SpreadsheetML with auxiliary vocabularies (drawing anchors, markup
//! compatibility, extension lists). Only elements of the primary SpreadsheetML namespace drive
//! the row builder:
//!
//! - `http://schemas.openxmlformats.org/spreadsheetml/2006/main` (transitional)
//! - `http://purl.oclc.org/ooxml/spreadsheetml/main` (strict)
//!
//! As opposed to `http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing`, etc.

use quick_xml::name::ResolveResult;

/// Namespace suffix shared by both SpreadsheetML flavours
pub const SPREADSHEET_NS_SUFFIX: &[u8] = b"/main";

/// Returns true if an element resolved into the main SpreadsheetML namespace.
///
/// Unbound (no namespace) and unknown prefixes are never relevant.
pub fn is_spreadsheet_tag(ns: &ResolveResult) -> bool {
    match ns {
        ResolveResult::Bound(ns) => ns.as_ref().ends_with(SPREADSHEET_NS_SUFFIX),
        _ => false,
    }
}
