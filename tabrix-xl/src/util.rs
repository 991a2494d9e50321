//! Xl util
//!
//! This module contains utility functions for working with Xl markup: attribute access, cell
//! references, OOXML string escapes and serial date conversion.

use std::borrow::Cow;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use quick_xml::events::BytesStart;

use crate::{DateSystem, XlError, XlResult};

/// Try Xml attribute -> Option<String>
pub(crate) fn get(e: &BytesStart, which: &[u8]) -> XlResult<Option<String>> {
    match e.try_get_attribute(which)? {
        Some(a) => Ok(Some(a.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

/// `"1"` and `"true"` are the only truthy values of an xsd:boolean attribute we accept
pub(crate) fn is_truthy(v: Option<&str>) -> bool {
    matches!(v, Some("1") | Some("true"))
}

pub(crate) const XL_MAX_COL: u32 = 16384;
const XL_MIN_COL: u32 = 1;

/// Return column letter for column number `n` (1-based)
pub(crate) fn num2col(n: u32) -> Option<String> {
    if !(XL_MIN_COL..=XL_MAX_COL).contains(&n) {
        return None;
    }
    let mut s = String::new();
    let mut n = n;
    while n > 0 {
        let r = ((n - 1) % 26) as u8;
        n = (n - 1) / 26;
        s.push((b'A' + r) as char)
    }
    Some(s.chars().rev().collect::<String>())
}

/// Return column number (1-based) for column letter `letter`
pub(crate) fn col2num(letter: &str) -> Option<u32> {
    if letter.is_empty() {
        return None;
    }
    let mut num: u32 = 0;
    for c in letter.chars() {
        let c = c.to_ascii_uppercase();
        if !c.is_ascii_uppercase() {
            return None;
        }
        num = num * 26 + (c as u32 - 'A' as u32) + 1;
        if num > XL_MAX_COL {
            return None;
        }
    }
    Some(num)
}

/// Split a cell reference such as `"B7"` into 0-based `(column, row)`.
pub(crate) fn split_reference(reference: &str) -> XlResult<(u32, u32)> {
    let end = reference
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(reference.len());
    let (letters, digits) = reference.split_at(end);

    let col = col2num(letters)
        .ok_or_else(|| XlError::new_corrupt_error(format!("invalid cell reference {reference:?}")))?;
    let row = digits
        .parse::<u32>()
        .ok()
        .filter(|r| *r > 0)
        .ok_or_else(|| XlError::new_corrupt_error(format!("invalid cell reference {reference:?}")))?;

    Ok((col - 1, row - 1))
}

/// Last row (0-based) declared by a used-range reference: `"A1:F25"` -> 24, `"A1"` -> 0.
///
/// Only the trailing digits are inspected; `None` when there are none.
pub(crate) fn last_row_of_range(range: &str) -> Option<u32> {
    let start = range
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    range[start..]
        .parse::<u32>()
        .ok()
        .map(|r| r.saturating_sub(1))
}

/// Decode OOXML `_xHHHH_` escapes (ECMA-376 22.4.2.4). A literal `_x` is itself written as
/// `_x005F_x`.
pub(crate) fn unescape_ooxml(s: &str) -> Cow<'_, str> {
    if !s.contains("_x") {
        return Cow::Borrowed(s);
    }

    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < s.len() {
        if bytes[i] == b'_' && i + 7 <= s.len() && bytes[i + 1] == b'x' && bytes[i + 6] == b'_' {
            let decoded = std::str::from_utf8(&bytes[i + 2..i + 6])
                .ok()
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .and_then(char::from_u32);
            if let Some(c) = decoded {
                out.push(c);
                i += 7;
                continue;
            }
        }
        let c = s[i..].chars().next().unwrap_or_default();
        out.push(c);
        i += c.len_utf8().max(1);
    }
    Cow::Owned(out)
}

/// date/time conversion
#[derive(Debug, PartialEq)]
pub(crate) enum DateConversion {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Number(i64),
}

impl DateConversion {
    /// Collapse into a single timestamp; plain times land on the epoch day of the system.
    pub(crate) fn into_datetime(self, date_system: &DateSystem) -> Option<NaiveDateTime> {
        match self {
            DateConversion::Date(d) => d.and_hms_opt(0, 0, 0),
            DateConversion::DateTime(dt) => Some(dt),
            DateConversion::Time(t) => epoch(date_system).map(|e| e.date().and_time(t)),
            DateConversion::Number(_) => None,
        }
    }
}

fn epoch(date_system: &DateSystem) -> Option<NaiveDateTime> {
    match date_system {
        DateSystem::V1900 => NaiveDate::from_ymd_opt(1899, 12, 31)?.and_hms_opt(0, 0, 0),
        DateSystem::V1904 => NaiveDate::from_ymd_opt(1904, 1, 1)?.and_hms_opt(0, 0, 0),
    }
}

// 9999-12-31 in the 1900 system
const MAX_SERIAL_DAYS: i64 = 2_958_465;
const MIN_SERIAL_DAYS: i64 = -693_594;

/// Excel number -> date/time
pub(crate) fn excel_number_to_date(
    number: f64,
    date_system: &DateSystem,
) -> XlResult<DateConversion> {
    if !number.is_finite() {
        return Err(XlError::MalformedNumber(number.to_string()));
    }
    let mut base = epoch(date_system)
        .ok_or_else(|| XlError::new_common_error("invalid date system epoch"))?;
    if let DateSystem::V1900 = date_system {
        if (number - 60.0).abs() < 0.0001 {
            return Err(XlError::new_common_error(
                "Bad date in Excel file - 2/29/1900 not valid",
            ));
        } else if number > 60.0 {
            base -= Duration::days(1)
        }
    }
    let days = number.trunc() as i64;
    if !(MIN_SERIAL_DAYS..=MAX_SERIAL_DAYS).contains(&days) {
        return Ok(DateConversion::Number(days));
    }
    let partial_days = number - (days as f64);
    let millis = (partial_days * 86_400_000.0).round() as i64;
    let date = base + Duration::days(days) + Duration::milliseconds(millis);
    let midnight = NaiveTime::from_hms_opt(0, 0, 0).unwrap_or_default();
    if days == 0 {
        Ok(DateConversion::Time(date.time()))
    } else if date.time() == midnight {
        Ok(DateConversion::Date(date.date()))
    } else {
        Ok(DateConversion::DateTime(date))
    }
}

#[cfg(test)]
mod test_util {
    use super::*;

    #[test]
    fn column_letters() {
        assert_eq!(col2num("A"), Some(1));
        assert_eq!(col2num("z"), Some(26));
        assert_eq!(col2num("AA"), Some(27));
        assert_eq!(col2num("XFD"), Some(16384));
        assert_eq!(col2num("XFE"), None);
        assert_eq!(col2num(""), None);

        assert_eq!(num2col(1).as_deref(), Some("A"));
        assert_eq!(num2col(28).as_deref(), Some("AB"));
        assert_eq!(num2col(0), None);
    }

    #[test]
    fn cell_reference_split() {
        assert_eq!(split_reference("B7").unwrap(), (1, 6));
        assert_eq!(split_reference("AA10").unwrap(), (26, 9));
        assert!(matches!(
            split_reference("7B"),
            Err(XlError::CorruptDocument(_))
        ));
        assert!(split_reference("B0").is_err());
        assert!(split_reference("B").is_err());
    }

    #[test]
    fn used_range_last_row() {
        assert_eq!(last_row_of_range("A1:F25"), Some(24));
        assert_eq!(last_row_of_range("A1"), Some(0));
        assert_eq!(last_row_of_range("A1:XFD1048576"), Some(1_048_575));
        assert_eq!(last_row_of_range("A:F"), None);
    }

    #[test]
    fn ooxml_escapes() {
        assert_eq!(unescape_ooxml("plain"), "plain");
        assert_eq!(unescape_ooxml("a_x000D_b"), "a\rb");
        assert_eq!(unescape_ooxml("_x0041__x0042_"), "AB");
        assert_eq!(unescape_ooxml("_xZZZZ_"), "_xZZZZ_");
        assert_eq!(unescape_ooxml("né_x"), "né_x");
    }

    #[test]
    fn serial_dates() {
        let d = excel_number_to_date(44197.0, &DateSystem::V1900).unwrap();
        assert_eq!(
            d,
            DateConversion::Date(NaiveDate::from_ymd_opt(2021, 1, 1).unwrap())
        );

        let t = excel_number_to_date(0.5, &DateSystem::V1900).unwrap();
        assert_eq!(
            t,
            DateConversion::Time(NaiveTime::from_hms_opt(12, 0, 0).unwrap())
        );

        let d = excel_number_to_date(0.0 + 1.0, &DateSystem::V1904).unwrap();
        assert_eq!(
            d,
            DateConversion::Date(NaiveDate::from_ymd_opt(1904, 1, 2).unwrap())
        );

        assert!(excel_number_to_date(60.0, &DateSystem::V1900).is_err());
    }
}
