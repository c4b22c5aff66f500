//! Hierarchical markup via `quick-xml`: one element per text-bearing node,
//! located by its slash-separated element path.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde_json::{Map, Value};
use storage::models::{ElementMetadata, PositionLocator, TextSubtype};

use super::{FormatParser, ParsedElement};
use crate::error::ParseError;

pub struct XmlParser;

impl FormatParser for XmlParser {
    fn name(&self) -> &'static str {
        "xml"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xml"]
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<ParsedElement>, ParseError> {
        let text = std::str::from_utf8(bytes)?;
        let mut reader = Reader::from_str(text);
        reader.trim_text(true);

        let mut stack: Vec<(String, Map<String, Value>)> = Vec::new();
        let mut elements = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                    let mut attrs = Map::new();
                    for attr in start.attributes() {
                        let attr = attr.map_err(|e| ParseError::malformed("xml", e))?;
                        let key = String::from_utf8_lossy(attr.key.local_name().as_ref())
                            .into_owned();
                        let value = attr
                            .unescape_value()
                            .map_err(|e| ParseError::malformed("xml", e))?;
                        attrs.insert(key, Value::String(value.into_owned()));
                    }
                    stack.push((name, attrs));
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(t)) => {
                    let content = t.unescape().map_err(|e| ParseError::malformed("xml", e))?;
                    push_text(&mut elements, &stack, content.into_owned());
                }
                Ok(Event::CData(c)) => {
                    let content = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    push_text(&mut elements, &stack, content);
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(ParseError::malformed("xml", e)),
                _ => {}
            }
        }
        if let Some((open, _)) = stack.last() {
            return Err(ParseError::malformed("xml", format!("unclosed element <{open}>")));
        }
        Ok(elements)
    }
}

fn push_text(
    elements: &mut Vec<ParsedElement>,
    stack: &[(String, Map<String, Value>)],
    text: String,
) {
    if text.trim().is_empty() {
        return;
    }
    let path = format!(
        "/{}",
        stack
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join("/")
    );
    let (tag, attrs) = stack
        .last()
        .map(|(name, attrs)| (name.as_str(), attrs.clone()))
        .unwrap_or(("", Map::new()));

    let mut extra = attrs;
    extra.insert("tag".to_string(), Value::String(tag.to_string()));
    let metadata = ElementMetadata {
        subtype: subtype_hint(tag),
        first_section: elements.is_empty(),
        page: None,
        extra,
    };
    elements.push(
        ParsedElement::new(Value::String(text), PositionLocator::Path { path })
            .with_metadata(metadata),
    );
}

/// Structural role implied by an element or key name.
pub(crate) fn subtype_hint(name: &str) -> Option<TextSubtype> {
    let name = name.to_lowercase();
    if name.contains("title") {
        Some(TextSubtype::Title)
    } else if name.contains("header") || name.contains("heading") {
        Some(TextSubtype::Header)
    } else if name.contains("abstract") {
        Some(TextSubtype::Abstract)
    } else if name.contains("summary") || name.contains("impression") {
        Some(TextSubtype::Summary)
    } else if name.contains("caption") {
        Some(TextSubtype::Caption)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_nodes_become_path_located_elements() {
        let input = r#"<?xml version="1.0"?>
            <study id="LIDC-0001">
                <title>Lung nodule study</title>
                <reading reader="r1">
                    <finding>Spiculated margin &amp; lobulation.</finding>
                    <malignancy>4</malignancy>
                </reading>
            </study>"#;
        let elements = XmlParser.parse(input.as_bytes()).unwrap();
        assert_eq!(elements.len(), 3);

        assert_eq!(elements[0].metadata.subtype, Some(TextSubtype::Title));
        assert!(elements[0].metadata.first_section);
        assert_eq!(
            elements[1].locator,
            PositionLocator::Path {
                path: "/study/reading/finding".into()
            }
        );
        assert_eq!(
            elements[1].content,
            Value::String("Spiculated margin & lobulation.".into())
        );
        assert_eq!(elements[2].metadata.extra["tag"], Value::String("malignancy".into()));
    }

    #[test]
    fn mismatched_tags_are_malformed() {
        let err = XmlParser.parse(b"<a><b>text</a>").unwrap_err();
        assert!(matches!(err, ParseError::Malformed { format: "xml", .. }));
    }

    #[test]
    fn unclosed_root_is_malformed() {
        assert!(XmlParser.parse(b"<a><b>text</b>").is_err());
    }
}
