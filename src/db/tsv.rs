//! TabSeparated encoding used on the ClickHouse HTTP interface.

use std::borrow::Cow;

use crate::dataset::TSV_NULL;

/// Escape a field for TabSeparated input
pub fn escape(field: &str) -> Cow<'_, str> {
    if !field
        .bytes()
        .any(|b| matches!(b, b'\\' | b'\t' | b'\n' | b'\r' | b'\0'))
    {
        return Cow::Borrowed(field);
    }

    let mut out = String::with_capacity(field.len() + 8);
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Decode a TabSeparated field. The null marker decodes to `None`.
pub fn unescape(field: &str) -> Option<String> {
    if field == TSV_NULL {
        return None;
    }
    if !field.contains('\\') {
        return Some(field.to_string());
    }

    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Some(out)
}

/// Append one row of already stringified values. Values equal to the null
/// marker are written raw so the server reads them as NULL.
pub fn write_row(out: &mut String, fields: &[String]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push('\t');
        }
        if field == TSV_NULL {
            out.push_str(TSV_NULL);
        } else {
            out.push_str(&escape(field));
        }
    }
    out.push('\n');
}

/// Encode rows into a TabSeparated body
pub fn encode_rows(rows: &[Vec<String>]) -> String {
    let mut body = String::new();
    for row in rows {
        write_row(&mut body, row);
    }
    body
}

/// Split one line of TabSeparated output into decoded fields
pub fn split_line(line: &str) -> Vec<Option<String>> {
    line.split('\t').map(unescape).collect()
}
