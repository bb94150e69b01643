//! Delimited-text parsing.
//!
//! A small, general-purpose parser for the comma-separated files found in
//! export archives. It knows nothing about entities; every file goes through
//! the same [`parse_table`] routine and the normalizer maps headers later.
//!
//! # Rules
//!
//! - A leading byte-order mark is stripped.
//! - Double-quoted fields may contain the separator, line breaks, and
//!   escaped quotes (`""` is a literal `"`).
//! - A quote only opens a quoted field at the start of the field. A stray
//!   quote inside an unquoted field is kept literally.
//! - The header is the first non-empty record (or, with an anchor, the first
//!   non-empty record containing the anchor column).
//! - A data row is kept only if its field count equals the header's.
//!   Mismatched rows are dropped and counted, never fatal.

use std::collections::HashMap;

/// One data row, keyed by header name.
pub type Row = HashMap<String, String>;

const BOM: char = '\u{feff}';

/// Parser settings.
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions<'a> {
    pub delimiter: char,
    /// Column name that identifies the header line when a file carries a
    /// free-text preamble before it.
    pub anchor: Option<&'a str>,
}

impl Default for ParseOptions<'_> {
    fn default() -> Self {
        Self {
            delimiter: ',',
            anchor: None,
        }
    }
}

/// A parsed file: header, accepted rows, and how many rows were dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    pub dropped: usize,
}

/// Parse comma-separated text into row maps. Empty input yields `[]`.
pub fn parse(text: &str) -> Vec<Row> {
    parse_table(text, ParseOptions::default()).rows
}

/// Parse text whose header line contains `anchor`, skipping any preamble.
pub fn parse_anchored(text: &str, anchor: &str) -> Vec<Row> {
    parse_table(
        text,
        ParseOptions {
            anchor: Some(anchor),
            ..ParseOptions::default()
        },
    )
    .rows
}

/// Parse text into a [`Table`].
pub fn parse_table(text: &str, options: ParseOptions<'_>) -> Table {
    let text = text.strip_prefix(BOM).unwrap_or(text);
    let records: Vec<Vec<String>> = split_records(text, options.delimiter)
        .into_iter()
        .filter(|r| !is_blank(r))
        .collect();

    let header_at = match options.anchor {
        Some(anchor) => records
            .iter()
            .position(|r| r.iter().any(|f| f.trim() == anchor))
            .unwrap_or(0),
        None => 0,
    };

    let Some(header) = records.get(header_at) else {
        return Table::default();
    };
    let headers: Vec<String> = header.iter().map(|h| h.trim().to_string()).collect();

    let mut rows = Vec::new();
    let mut dropped = 0;
    for record in records.into_iter().skip(header_at + 1) {
        if record.len() != headers.len() {
            dropped += 1;
            continue;
        }
        rows.push(headers.iter().cloned().zip(record).collect());
    }

    Table {
        headers,
        rows,
        dropped,
    }
}

fn is_blank(record: &[String]) -> bool {
    record.iter().all(|f| f.trim().is_empty())
}

/// Split text into records of raw fields, honoring quotes across lines.
fn split_records(text: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    // True once the current field has consumed any character.
    let mut started = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }

        match c {
            '"' if !started => {
                in_quotes = true;
                started = true;
            }
            '\r' | '\n' => {
                if c == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                fields.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut fields));
                started = false;
            }
            d if d == delimiter => {
                fields.push(std::mem::take(&mut field));
                started = false;
            }
            _ => {
                field.push(c);
                started = true;
            }
        }
    }

    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        records.push(fields);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(field: &str) -> String {
        format!("\"{}\"", field.replace('"', "\"\""))
    }

    #[test]
    fn test_empty_input() {
        assert!(parse("").is_empty());
        assert!(parse("\u{feff}").is_empty());
        assert!(parse("\n\n  \n").is_empty());
    }

    #[test]
    fn test_header_only() {
        let table = parse_table("Name,Company\n", ParseOptions::default());
        assert_eq!(table.headers, vec!["Name", "Company"]);
        assert!(table.rows.is_empty());
    }

    #[test]
    fn test_strips_bom_from_first_header() {
        let rows = parse("\u{feff}Name\nRust\n");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Name"], "Rust");
    }

    #[test]
    fn test_header_is_first_non_empty_line() {
        let rows = parse("\n\r\nName,Company\nAda,Acme\n");
        assert_eq!(rows[0]["Company"], "Acme");
    }

    #[test]
    fn test_quoted_fields_roundtrip() {
        let values = [
            ["plain", "has,comma", "say \"hi\""],
            ["", "\"\"", "multi\nline"],
            ["trailing,", ",leading", "a\"\"b"],
        ];
        let mut text = String::from("A,B,C\n");
        for row in &values {
            let line: Vec<String> = row.iter().map(|v| quote(v)).collect();
            text.push_str(&line.join(","));
            text.push_str("\r\n");
        }

        let rows = parse(&text);
        assert_eq!(rows.len(), values.len());
        for (row, expected) in rows.iter().zip(values.iter()) {
            assert_eq!(row["A"], expected[0]);
            assert_eq!(row["B"], expected[1]);
            assert_eq!(row["C"], expected[2]);
        }
    }

    #[test]
    fn test_mismatched_arity_rows_dropped() {
        let text = "A,B\n1,2\n1,2,3\n4\n5,6\n";
        let table = parse_table(text, ParseOptions::default());
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.dropped, 2);
        assert_eq!(table.rows[1]["A"], "5");
    }

    #[test]
    fn test_stray_quote_inside_unquoted_field_is_literal() {
        let text = "Name,Title\nAda,Manager \"Ops\nBob,Engineer\nCy,Analyst\nDee,Lead\n";
        let table = parse_table(text, ParseOptions::default());
        assert_eq!(table.dropped, 0);
        assert_eq!(table.rows.len(), 4);
        assert_eq!(table.rows[0]["Title"], "Manager \"Ops");
        assert_eq!(table.rows[1]["Name"], "Bob");
        assert_eq!(table.rows[3]["Title"], "Lead");
    }

    #[test]
    fn test_text_after_closing_quote_is_kept() {
        let rows = parse("A,B\n\"x\"y,2\n");
        assert_eq!(rows[0]["A"], "xy");
        assert_eq!(rows[0]["B"], "2");
    }

    #[test]
    fn test_last_line_without_newline() {
        let rows = parse("A,B\n1,2");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["B"], "2");
    }

    #[test]
    fn test_empty_trailing_field_kept() {
        let rows = parse("A,B\n1,\n");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["B"], "");
    }

    #[test]
    fn test_anchor_skips_preamble() {
        let text = "Notes:\n\"When exporting, some emails may be missing, see help.\"\n\nFirst Name,Last Name,Company\nAda,Lovelace,Acme\n";
        let rows = parse_anchored(text, "First Name");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Company"], "Acme");
    }

    #[test]
    fn test_missing_anchor_falls_back_to_first_line() {
        let rows = parse_anchored("A,B\n1,2\n", "First Name");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["A"], "1");
    }

    #[test]
    fn test_custom_delimiter() {
        let table = parse_table(
            "A;B\n\"x;y\";z\n",
            ParseOptions {
                delimiter: ';',
                anchor: None,
            },
        );
        assert_eq!(table.rows[0]["A"], "x;y");
        assert_eq!(table.rows[0]["B"], "z");
    }
}
