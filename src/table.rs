//! Minimal CSV table codec for batch uploads and exports.
//!
//! Comma-delimited with RFC 4180 quoting. The first record is the header.
//! A leading UTF-8 BOM is ignored and both LF and CRLF line endings are
//! accepted. Cells are kept as text; numeric conversion happens during
//! alignment so that exports echo the operator's input verbatim.

use std::collections::HashSet;

use crate::error::{PipelineError, Result};

/// A header plus rectangular rows of text cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Parse CSV text. The header must be present and its names unique.
    pub fn parse_csv(text: &str) -> Result<Self> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut records = parse_records(text)?;

        // Blank lines (typically a trailing newline run) carry no data.
        records.retain(|(_, r)| !(r.len() == 1 && r[0].is_empty()));

        let mut iter = records.into_iter();
        let (header_line, header) = iter.next().ok_or(PipelineError::MalformedTable {
            line: 1,
            reason: "missing header row".to_string(),
        })?;
        let columns: Vec<String> = header.into_iter().map(|c| c.trim().to_string()).collect();

        let mut seen = HashSet::with_capacity(columns.len());
        if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(PipelineError::MalformedTable {
                line: header_line,
                reason: format!("duplicate column name '{dup}'"),
            });
        }

        let mut rows = Vec::new();
        for (line, record) in iter {
            if record.len() != columns.len() {
                return Err(PipelineError::MalformedTable {
                    line,
                    reason: format!("expected {} cells, found {}", columns.len(), record.len()),
                });
            }
            rows.push(record);
        }

        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the first column with this name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Split CSV text into records, each tagged with the 1-based line it starts on.
fn parse_records(text: &str) -> Result<Vec<(usize, Vec<String>)>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push((record_line, std::mem::take(&mut record)));
                line += 1;
                record_line = line;
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(PipelineError::MalformedTable {
            line: record_line,
            reason: "unterminated quoted field".to_string(),
        });
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push((record_line, record));
    }
    Ok(records)
}

/// Quote a cell when it contains a delimiter, quote, or line break.
pub fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Join cells into one CSV line terminated by `\n`.
pub fn write_record<S: AsRef<str>>(out: &mut String, cells: &[S]) {
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape_csv(cell.as_ref()));
    }
    out.push('\n');
}
