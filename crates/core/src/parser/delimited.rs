//! Delimited text (CSV / TSV). The header row names the fields; each data
//! row becomes one object element.

use serde_json::{Map, Number, Value};
use storage::models::{ElementMetadata, PositionLocator};

use super::{flag, FormatParser, ParsedElement};
use crate::error::ParseError;
use crate::relevance::COLUMN_HEADER_FLAG;

pub struct DelimitedParser;

impl FormatParser for DelimitedParser {
    fn name(&self) -> &'static str {
        "delimited"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["csv", "tsv"]
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<ParsedElement>, ParseError> {
        let text = std::str::from_utf8(bytes)?;
        let Some(first_line) = text.lines().find(|l| !l.trim().is_empty()) else {
            return Ok(Vec::new());
        };
        let delimiter = detect_delimiter(first_line);
        let mut records = split_records(text, delimiter)?.into_iter();
        let Some(header) = records.next() else {
            return Ok(Vec::new());
        };
        let header: Vec<String> = header.into_iter().map(|h| h.trim().to_string()).collect();

        let column_header = flag(COLUMN_HEADER_FLAG);
        let mut elements = Vec::new();
        for (idx, fields) in records.enumerate() {
            let row = idx + 1;
            if fields.len() != header.len() {
                return Err(ParseError::malformed(
                    "delimited",
                    format!(
                        "row {row} has {} fields, header has {}",
                        fields.len(),
                        header.len()
                    ),
                ));
            }
            let record: Map<String, Value> = header
                .iter()
                .cloned()
                .zip(fields.into_iter().map(|f| typed_cell(&f)))
                .collect();
            elements.push(
                ParsedElement::new(
                    Value::Object(record),
                    PositionLocator::SheetRow {
                        sheet: "sheet1".to_string(),
                        row,
                    },
                )
                .with_metadata(ElementMetadata {
                    first_section: row == 1,
                    extra: column_header.clone(),
                    ..Default::default()
                }),
            );
        }
        Ok(elements)
    }
}

fn detect_delimiter(header: &str) -> char {
    [',', '\t', ';', '|']
        .into_iter()
        .max_by_key(|d| header.matches(*d).count())
        .filter(|d| header.contains(*d))
        .unwrap_or(',')
}

/// Split the whole input into records, honouring double-quoted fields with
/// `""` escapes. Line breaks inside quotes belong to the field; blank lines
/// outside quotes are skipped.
fn split_records(text: &str, delimiter: char) -> Result<Vec<Vec<String>>, ParseError> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    let mut end_record = |fields: &mut Vec<String>, current: &mut String| {
        let field = std::mem::take(current);
        if fields.is_empty() && field.trim().is_empty() {
            return;
        }
        fields.push(field);
        records.push(std::mem::take(fields));
    };

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => fields.push(std::mem::take(&mut current)),
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => end_record(&mut fields, &mut current),
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err(ParseError::malformed("delimited", "unterminated quote"));
    }
    end_record(&mut fields, &mut current);
    Ok(records)
}

fn typed_cell(raw: &str) -> Value {
    let cell = raw.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Some(n) = cell.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    match cell.to_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(cell.to_string()),
    }
}
