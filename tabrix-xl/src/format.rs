//! Number format rendering
//!
//! `DataFormatter` renders a raw numeric cell value through an Excel number format pattern.
//! It covers what shows up in real workbooks: `General`, fixed/percent/grouped/scientific
//! patterns, up to four `;` sections and date/time patterns. Fractions fall back to `General`.

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::{util, DateSystem};

/// Renders a raw double through a number format, consumed by the decoder.
pub trait NumberFormatter {
    fn format_raw(&self, value: f64, format_index: u16, pattern: &str) -> String;
}

/// Default `NumberFormatter`
#[derive(Debug, Default, Clone)]
pub struct DataFormatter {
    date_system: DateSystem,
}

impl DataFormatter {
    pub fn new(date_system: DateSystem) -> Self {
        Self { date_system }
    }

    pub fn date_system(&self) -> DateSystem {
        self.date_system
    }
}

impl NumberFormatter for DataFormatter {
    fn format_raw(&self, value: f64, _format_index: u16, pattern: &str) -> String {
        if !value.is_finite() {
            return value.to_string();
        }

        let sections = split_sections(pattern);
        let (section, value, auto_sign) = match sections.as_slice() {
            [_, neg, ..] if value < 0.0 => (*neg, value.abs(), false),
            [_, _, zero, ..] if value == 0.0 => (*zero, value, false),
            [first, ..] => (*first, value, true),
            [] => ("", value, true),
        };
        let section = strip_brackets(section);

        if section.trim().is_empty() || section.trim().eq_ignore_ascii_case("general") {
            return if auto_sign {
                format_general(value)
            } else {
                format_general(value.abs())
            };
        }
        if has_outside_quotes(&section, |c| c == '@') {
            return render_literal(&section).replace('@', &format_general(value));
        }
        if is_date_pattern(&section) {
            if let Some(s) = self.format_date(value, &section) {
                return s;
            }
            return format_general(value);
        }
        format_number(value, &section, auto_sign)
    }
}

// ================================================================================================
// sections & literals
// ================================================================================================

/// Walk `s` calling `f(idx, ch)` for every char outside of quotes and backslash escapes.
fn scan_outside_quotes(s: &str, mut f: impl FnMut(usize, char)) {
    let mut in_quotes = false;
    let mut escape = false;
    for (idx, ch) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if in_quotes {
            if ch == '"' {
                in_quotes = false;
            }
            continue;
        }
        match ch {
            '"' => in_quotes = true,
            '\\' => escape = true,
            _ => f(idx, ch),
        }
    }
}

fn has_outside_quotes(s: &str, pred: impl Fn(char) -> bool) -> bool {
    let mut found = false;
    scan_outside_quotes(s, |_, c| found |= pred(c));
    found
}

fn split_sections(pattern: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut start = 0;
    scan_outside_quotes(pattern, |idx, c| {
        if c == ';' {
            sections.push(&pattern[start..idx]);
            start = idx + 1;
        }
    });
    sections.push(&pattern[start..]);
    sections
}

/// Drop colour and condition brackets (`[Red]`, `[>=100]`, `[$-409]`); keep elapsed time
/// markers (`[h]`, `[mm]`, `[ss]`).
fn strip_brackets(section: &str) -> String {
    let mut out = String::with_capacity(section.len());
    let mut chars = section.chars();
    let mut in_quotes = false;
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                out.push(c);
            }
            '\\' if !in_quotes => {
                out.push(c);
                if let Some(n) = chars.next() {
                    out.push(n);
                }
            }
            '[' if !in_quotes => {
                let inner: String = chars.by_ref().take_while(|c| *c != ']').collect();
                let lower = inner.to_ascii_lowercase();
                if !lower.is_empty() && lower.chars().all(|c| matches!(c, 'h' | 'm' | 's')) {
                    out.push('[');
                    out.push_str(&inner);
                    out.push(']');
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn render_literal(segment: &str) -> String {
    let mut out = String::new();
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.extend(chars.by_ref().take_while(|c| *c != '"')),
            '\\' => out.extend(chars.next()),
            // padding to the width of the next char
            '_' => {
                chars.next();
                out.push(' ');
            }
            // fill
            '*' => {
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

fn format_general(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let abs = value.abs();
    if !(1e-9..1e11).contains(&abs) {
        let s = format!("{:.5E}", value);
        let (mantissa, exp) = s.split_once('E').unwrap_or((s.as_str(), "0"));
        let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
        let exp: i32 = exp.parse().unwrap_or(0);
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{mantissa}E{sign}{:02}", exp.abs());
    }
    let int_digits = abs.log10().floor() as i32 + 1;
    let decimals = (10 - int_digits).clamp(0, 15) as usize;
    let s = format!("{:.*}", decimals, value);
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

// ================================================================================================
// numbers
// ================================================================================================

#[derive(Debug)]
struct FixedSpec {
    min_int: usize,
    int_placeholders: usize,
    min_frac: usize,
    max_frac: usize,
    grouping: bool,
    scale_commas: usize,
    has_decimal_point: bool,
}

impl FixedSpec {
    fn parse(raw: &str) -> Self {
        let trimmed = raw.trim_end_matches(',');
        let scale_commas = raw.len() - trimmed.len();
        let (int_pat, frac_pat) = match trimmed.find('.') {
            Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
            None => (trimmed, ""),
        };
        let is_placeholder = |c: &char| matches!(c, '0' | '#' | '?');
        Self {
            min_int: int_pat.chars().filter(|c| *c == '0').count(),
            int_placeholders: int_pat.chars().filter(is_placeholder).count(),
            min_frac: frac_pat.chars().filter(|c| *c == '0').count(),
            max_frac: frac_pat.chars().filter(is_placeholder).count(),
            grouping: int_pat.contains(','),
            scale_commas,
            has_decimal_point: trimmed.contains('.'),
        }
    }

    fn render(&self, value: f64) -> String {
        let mut value = value;
        for _ in 0..self.scale_commas {
            value /= 1000.0;
        }
        let rounded = round_to(value, self.max_frac);
        let s = format!("{:.*}", self.max_frac, rounded);
        let (int_part, frac_part) = s.split_once('.').unwrap_or((s.as_str(), ""));

        let mut int_part = int_part.trim_start_matches('-').to_string();
        if self.int_placeholders == 0 || (self.min_int == 0 && int_part == "0") {
            int_part.clear();
        }
        while int_part.len() < self.min_int {
            int_part.insert(0, '0');
        }
        if self.grouping {
            int_part = group_thousands(&int_part);
        }

        let mut frac_part = frac_part.to_string();
        while frac_part.len() > self.min_frac && frac_part.ends_with('0') {
            frac_part.pop();
        }

        let mut out = int_part;
        if self.has_decimal_point && (self.max_frac == 0 || !frac_part.is_empty()) {
            out.push('.');
        }
        out.push_str(&frac_part);
        out
    }
}

fn round_to(value: f64, decimals: usize) -> f64 {
    let factor = 10_f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn group_thousands(int_part: &str) -> String {
    let len = int_part.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in int_part.chars().enumerate() {
        out.push(ch);
        let left = len - i - 1;
        if left > 0 && left % 3 == 0 {
            out.push(',');
        }
    }
    out
}

fn format_number(value: f64, section: &str, auto_sign: bool) -> String {
    let mut first = None;
    let mut last = None;
    let mut percent = 0;
    scan_outside_quotes(section, |idx, c| match c {
        '0' | '#' | '?' => {
            first.get_or_insert(idx);
            last = Some(idx + 1);
        }
        '%' => percent += 1,
        _ => (),
    });

    let (Some(start), Some(mut end)) = (first, last) else {
        return render_literal(section);
    };
    while section[end..].starts_with(',') {
        end += 1;
    }

    let number_raw = &section[start..end];
    if number_raw.contains('/') {
        return format_general(value);
    }

    let mut v = value.abs();
    for _ in 0..percent {
        v *= 100.0;
    }

    let body = match number_raw.find(['E', 'e']) {
        Some(e_idx) => format_scientific(v, &number_raw[..e_idx], &number_raw[e_idx + 1..]),
        None => FixedSpec::parse(number_raw).render(v),
    };

    let negative = auto_sign && value < 0.0 && body.chars().any(|c| c.is_ascii_digit() && c != '0');
    format!(
        "{}{}{}{}",
        if negative { "-" } else { "" },
        render_literal(&section[..start]),
        body,
        render_literal(&section[end..])
    )
}

fn format_scientific(value: f64, mantissa_raw: &str, exponent_raw: &str) -> String {
    let spec = FixedSpec::parse(mantissa_raw);
    let (always_sign, digits) = match exponent_raw.chars().next() {
        Some('+') => (true, &exponent_raw[1..]),
        Some('-') => (false, &exponent_raw[1..]),
        _ => (false, exponent_raw),
    };
    let width = digits.chars().filter(|c| matches!(c, '0' | '#' | '?')).count();

    let (mut mantissa, mut exp) = if value == 0.0 {
        (0.0, 0)
    } else {
        let exp = value.log10().floor() as i32;
        (value / 10_f64.powi(exp), exp)
    };
    mantissa = round_to(mantissa, spec.max_frac);
    if mantissa >= 10.0 {
        mantissa /= 10.0;
        exp += 1;
    }

    let sign = if exp < 0 {
        "-"
    } else if always_sign {
        "+"
    } else {
        ""
    };
    format!("{}E{}{:0width$}", spec.render(mantissa), sign, exp.abs(), width = width)
}

// ================================================================================================
// dates
// ================================================================================================

fn is_date_pattern(section: &str) -> bool {
    has_outside_quotes(section, |c| {
        matches!(c.to_ascii_lowercase(), 'y' | 'm' | 'd' | 'h' | 's')
    })
}

#[derive(Debug, Clone, PartialEq)]
enum DateToken {
    Literal(String),
    Year(usize),
    Month(usize),
    Day(usize),
    Hour(usize),
    Minute(usize),
    Second(usize),
    /// `m`/`mm` before the context decides between month and minute
    MonthOrMinute(usize),
    ElapsedHours(usize),
    ElapsedMinutes(usize),
    ElapsedSeconds(usize),
    FracSecond(usize),
    AmPm,
    AP,
}

fn tokenize_date(section: &str) -> Vec<DateToken> {
    let chars: Vec<char> = section.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let run = |i: usize, target: char| {
        chars[i..]
            .iter()
            .take_while(|c| c.to_ascii_lowercase() == target)
            .count()
    };

    while i < chars.len() {
        let c = chars[i];
        match c.to_ascii_lowercase() {
            '"' => {
                let lit: String = chars[i + 1..].iter().take_while(|c| **c != '"').collect();
                i += lit.chars().count() + 2;
                tokens.push(DateToken::Literal(lit));
            }
            '\\' => {
                if let Some(n) = chars.get(i + 1) {
                    tokens.push(DateToken::Literal(n.to_string()));
                }
                i += 2;
            }
            '_' => {
                tokens.push(DateToken::Literal(" ".to_string()));
                i += 2;
            }
            '*' => i += 2,
            '[' => {
                let inner: String = chars[i + 1..].iter().take_while(|c| **c != ']').collect();
                let n = inner.chars().count();
                match inner.chars().next().map(|c| c.to_ascii_lowercase()) {
                    Some('h') => tokens.push(DateToken::ElapsedHours(n)),
                    Some('m') => tokens.push(DateToken::ElapsedMinutes(n)),
                    Some('s') => tokens.push(DateToken::ElapsedSeconds(n)),
                    _ => (),
                }
                i += n + 2;
            }
            'y' => {
                let n = run(i, 'y');
                tokens.push(DateToken::Year(n));
                i += n;
            }
            'm' => {
                let n = run(i, 'm');
                tokens.push(DateToken::MonthOrMinute(n));
                i += n;
            }
            'd' => {
                let n = run(i, 'd');
                tokens.push(DateToken::Day(n));
                i += n;
            }
            'h' => {
                let n = run(i, 'h');
                tokens.push(DateToken::Hour(n));
                i += n;
            }
            's' => {
                let n = run(i, 's');
                tokens.push(DateToken::Second(n));
                i += n;
            }
            '.' if matches!(
                tokens.last(),
                Some(DateToken::Second(_)) | Some(DateToken::ElapsedSeconds(_))
            ) && chars.get(i + 1) == Some(&'0') =>
            {
                let n = run(i + 1, '0');
                tokens.push(DateToken::FracSecond(n));
                i += n + 1;
            }
            'a' => {
                let rest: String = chars[i..].iter().take(5).collect::<String>().to_ascii_lowercase();
                if rest == "am/pm" {
                    tokens.push(DateToken::AmPm);
                    i += 5;
                } else if rest.starts_with("a/p") {
                    tokens.push(DateToken::AP);
                    i += 3;
                } else {
                    tokens.push(DateToken::Literal(c.to_string()));
                    i += 1;
                }
            }
            _ => {
                tokens.push(DateToken::Literal(c.to_string()));
                i += 1;
            }
        }
    }

    resolve_minutes(tokens)
}

/// `m` means minutes right after an hour or right before a second, months otherwise.
fn resolve_minutes(mut tokens: Vec<DateToken>) -> Vec<DateToken> {
    let is_field = |t: &DateToken| !matches!(t, DateToken::Literal(_));
    for i in 0..tokens.len() {
        if let DateToken::MonthOrMinute(n) = tokens[i] {
            let prev = tokens[..i].iter().rev().find(|t| is_field(t));
            let next = tokens[i + 1..].iter().find(|t| is_field(t));
            let after_hour = matches!(
                prev,
                Some(DateToken::Hour(_)) | Some(DateToken::ElapsedHours(_))
            );
            let before_second = matches!(
                next,
                Some(DateToken::Second(_)) | Some(DateToken::ElapsedSeconds(_))
            );
            tokens[i] = if n <= 2 && (after_hour || before_second) {
                DateToken::Minute(n)
            } else {
                DateToken::Month(n)
            };
        }
    }
    tokens
}

impl DataFormatter {
    fn format_date(&self, value: f64, section: &str) -> Option<String> {
        if value < 0.0 {
            return None;
        }
        let tokens = tokenize_date(section);
        let frac_digits = tokens.iter().find_map(|t| match t {
            DateToken::FracSecond(n) => Some(*n),
            _ => None,
        });
        // without fractional seconds, round to the nearest second
        let value = match frac_digits {
            None => (value * 86_400.0).round() / 86_400.0,
            Some(_) => value,
        };
        let dt: NaiveDateTime = util::excel_number_to_date(value, &self.date_system)
            .ok()?
            .into_datetime(&self.date_system)?;
        let twelve_hour = tokens
            .iter()
            .any(|t| matches!(t, DateToken::AmPm | DateToken::AP));

        let mut out = String::new();
        for token in &tokens {
            match token {
                DateToken::Literal(s) => out.push_str(s),
                DateToken::Year(n) if *n <= 2 => out.push_str(&format!("{:02}", dt.year() % 100)),
                DateToken::Year(_) => out.push_str(&format!("{:04}", dt.year())),
                DateToken::Month(1) => out.push_str(&dt.month().to_string()),
                DateToken::Month(2) => out.push_str(&format!("{:02}", dt.month())),
                DateToken::Month(3) => out.push_str(&dt.format("%b").to_string()),
                DateToken::Month(5) => out.push_str(&dt.format("%b").to_string()[..1]),
                DateToken::Month(_) => out.push_str(&dt.format("%B").to_string()),
                DateToken::Day(1) => out.push_str(&dt.day().to_string()),
                DateToken::Day(2) => out.push_str(&format!("{:02}", dt.day())),
                DateToken::Day(3) => out.push_str(&dt.format("%a").to_string()),
                DateToken::Day(_) => out.push_str(&dt.format("%A").to_string()),
                DateToken::Hour(n) => {
                    let h = if twelve_hour {
                        match dt.hour() % 12 {
                            0 => 12,
                            h => h,
                        }
                    } else {
                        dt.hour()
                    };
                    out.push_str(&pad(h as u64, *n));
                }
                DateToken::Minute(n) => out.push_str(&pad(dt.minute() as u64, *n)),
                DateToken::Second(n) => out.push_str(&pad(dt.second() as u64, *n)),
                DateToken::ElapsedHours(n) => out.push_str(&pad((value * 24.0).floor() as u64, *n)),
                DateToken::ElapsedMinutes(n) => {
                    out.push_str(&pad((value * 1_440.0).floor() as u64, *n))
                }
                DateToken::ElapsedSeconds(n) => {
                    out.push_str(&pad((value * 86_400.0).round() as u64, *n))
                }
                DateToken::FracSecond(n) => {
                    let millis = dt.nanosecond() / 1_000_000;
                    let frac = format!("{:03}", millis);
                    out.push('.');
                    out.push_str(&frac[..(*n).min(3)]);
                }
                DateToken::AmPm => out.push_str(if dt.hour() < 12 { "AM" } else { "PM" }),
                DateToken::AP => out.push(if dt.hour() < 12 { 'A' } else { 'P' }),
                DateToken::MonthOrMinute(_) => (),
            }
        }
        Some(out)
    }
}

fn pad(v: u64, width: usize) -> String {
    format!("{:0width$}", v, width = width.min(2))
}
