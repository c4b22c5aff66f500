//! Plain text and markdown: one element per paragraph. Form feeds mark
//! page breaks; when a document has any, every element records its page.

use serde_json::Value;
use storage::models::{ElementMetadata, PositionLocator, TextSubtype};

use super::{FormatParser, ParsedElement};
use crate::error::ParseError;

pub struct PlainTextParser;

struct Block {
    start: usize,
    end: usize,
    lines: Vec<String>,
    heading: Option<usize>,
    page: u32,
}

impl FormatParser for PlainTextParser {
    fn name(&self) -> &'static str {
        "text"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["txt", "text", "md", "markdown", "log"]
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<ParsedElement>, ParseError> {
        let text = std::str::from_utf8(bytes)?;
        let blocks = split_blocks(text);
        let paged = text.contains(PAGE_BREAK);

        let mut elements = Vec::with_capacity(blocks.len());
        let mut seen_body = false;
        for block in blocks {
            let content = block.lines.join("\n");
            let subtype = match block.heading {
                Some(1) => TextSubtype::Title,
                Some(_) => TextSubtype::Header,
                None => leading_label(&content).unwrap_or(TextSubtype::Body),
            };
            let first_section = block.heading.is_none() && !seen_body;
            if block.heading.is_none() {
                seen_body = true;
            }
            elements.push(
                ParsedElement::new(
                    Value::String(content),
                    PositionLocator::LineRange {
                        start: block.start,
                        end: block.end,
                    },
                )
                .with_metadata(ElementMetadata {
                    subtype: Some(subtype),
                    first_section,
                    page: paged.then_some(block.page),
                    ..Default::default()
                }),
            );
        }
        Ok(elements)
    }
}

const PAGE_BREAK: char = '\u{c}';

fn split_blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;
    let mut page = 1;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let breaks = raw.matches(PAGE_BREAK).count() as u32;
        if breaks > 0 {
            blocks.extend(current.take());
            page += breaks;
        }
        let stripped = raw.replace(PAGE_BREAK, "");
        let line = stripped.trim_end();
        if line.trim().is_empty() {
            blocks.extend(current.take());
            continue;
        }
        if let Some((level, title)) = markdown_heading(line) {
            blocks.extend(current.take());
            blocks.push(Block {
                start: line_no,
                end: line_no,
                lines: vec![title.to_string()],
                heading: Some(level),
                page,
            });
            continue;
        }
        let block = current.get_or_insert_with(|| Block {
            start: line_no,
            end: line_no,
            lines: Vec::new(),
            heading: None,
            page,
        });
        block.end = line_no;
        block.lines.push(line.to_string());
    }
    blocks.extend(current);
    blocks
}

fn markdown_heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.starts_with(' ') {
        return None;
    }
    Some((level, rest.trim()))
}

/// "Abstract: ..." and "Summary: ..." paragraphs.
fn leading_label(content: &str) -> Option<TextSubtype> {
    let (head, _) = content.split_once(':')?;
    match head.trim().to_lowercase().as_str() {
        "abstract" => Some(TextSubtype::Abstract),
        "summary" | "impression" | "conclusion" => Some(TextSubtype::Summary),
        _ => None,
    }
}
