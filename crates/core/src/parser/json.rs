//! JSON documents.
//!
//! A top-level array yields one element per item. An object of scalars is
//! a single row; an object with nested values yields one element per
//! top-level key.

use serde_json::{Map, Value};
use storage::models::{ElementMetadata, PositionLocator};

use super::{flag, FormatParser, ParsedElement};
use crate::error::ParseError;
use crate::relevance::{COLUMN_HEADER_FLAG, STRUCTURAL_KEY_FLAG};

pub struct JsonParser;

impl FormatParser for JsonParser {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["json"]
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<ParsedElement>, ParseError> {
        let root: Value =
            serde_json::from_slice(bytes).map_err(|e| ParseError::malformed("json", e))?;

        let elements = match root {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    // objects in an array are records sharing column names
                    let extra = if item.is_object() {
                        flag(COLUMN_HEADER_FLAG)
                    } else {
                        Map::new()
                    };
                    ParsedElement::new(item, path(format!("$[{i}]"))).with_metadata(
                        ElementMetadata {
                            first_section: i == 0,
                            extra,
                            ..Default::default()
                        },
                    )
                })
                .collect(),
            Value::Object(map) if map.values().any(|v| v.is_object() || v.is_array()) => map
                .into_iter()
                .enumerate()
                .map(|(i, (key, value))| keyed_element(i, key, value))
                .collect(),
            Value::Null => Vec::new(),
            other => {
                let extra = if other.is_object() {
                    flag(STRUCTURAL_KEY_FLAG)
                } else {
                    Map::new()
                };
                vec![ParsedElement::new(other, path("$".to_string())).with_metadata(
                    ElementMetadata {
                        first_section: true,
                        extra,
                        ..Default::default()
                    },
                )]
            }
        };
        Ok(elements)
    }
}

fn path(path: String) -> PositionLocator {
    PositionLocator::Path { path }
}

fn keyed_element(index: usize, key: String, value: Value) -> ParsedElement {
    let mut extra = flag(STRUCTURAL_KEY_FLAG);
    extra.insert("key".to_string(), Value::String(key.clone()));
    let metadata = ElementMetadata {
        subtype: super::xml::subtype_hint(&key),
        first_section: index == 0,
        page: None,
        extra,
    };
    ParsedElement::new(value, path(format!("$.{key}"))).with_metadata(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use storage::models::TextSubtype;

    #[test]
    fn array_items_become_rows() {
        let elements = JsonParser
            .parse(br#"[{"age": 45, "diagnosis": "benign"}, {"age": 61, "diagnosis": "malignant"}]"#)
            .unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[1].content, json!({"age": 61, "diagnosis": "malignant"}));
        assert_eq!(
            elements[1].locator,
            PositionLocator::Path {
                path: "$[1]".into()
            }
        );
        assert!(elements[0].metadata.first_section);
        assert_eq!(elements[0].metadata.extra[COLUMN_HEADER_FLAG], json!(true));
    }

    #[test]
    fn flat_object_is_one_row_nested_object_splits() {
        let flat = JsonParser.parse(br#"{"a": 1, "b": "x"}"#).unwrap();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].metadata.extra[STRUCTURAL_KEY_FLAG], json!(true));

        let nested = JsonParser
            .parse(br#"{"title": "Study", "findings": {"size_mm": 5}}"#)
            .unwrap();
        assert_eq!(nested.len(), 2);
        let title = nested
            .iter()
            .find(|e| e.content == json!("Study"))
            .unwrap();
        assert_eq!(title.metadata.subtype, Some(TextSubtype::Title));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            JsonParser.parse(b"{not json"),
            Err(ParseError::Malformed { format: "json", .. })
        ));
    }
}
