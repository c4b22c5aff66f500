//! Format parser abstraction and the extension-keyed registry.
//!
//! Parsers turn raw bytes into an ordered sequence of [`ParsedElement`]s.
//! The pipeline never looks inside a format; it only picks a parser by
//! file extension.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use storage::models::{ElementMetadata, PositionLocator};

use crate::error::ParseError;

pub mod delimited;
pub mod json;
pub mod text;
pub mod xml;

/// One unit of parsed content: a scalar string, a key/value structure or
/// a tabular row.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedElement {
    pub content: Value,
    pub locator: PositionLocator,
    pub metadata: ElementMetadata,
}

impl ParsedElement {
    pub fn new(content: Value, locator: PositionLocator) -> Self {
        Self {
            content,
            locator,
            metadata: ElementMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: ElementMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Metadata `extra` map holding a single boolean flag.
pub(crate) fn flag(name: &str) -> Map<String, Value> {
    let mut extra = Map::new();
    extra.insert(name.to_string(), Value::Bool(true));
    extra
}

pub trait FormatParser: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower-case extensions this parser claims, without the dot.
    fn extensions(&self) -> &'static [&'static str];

    fn parse(&self, bytes: &[u8]) -> Result<Vec<ParsedElement>, ParseError>;
}

#[derive(Default, Clone)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn FormatParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the text, JSON, delimited and XML parsers.
    pub fn with_builtin() -> Self {
        Self::new()
            .with_parser(Arc::new(text::PlainTextParser))
            .with_parser(Arc::new(json::JsonParser))
            .with_parser(Arc::new(delimited::DelimitedParser))
            .with_parser(Arc::new(xml::XmlParser))
    }

    /// Register a parser for every extension it claims. Later
    /// registrations win.
    pub fn with_parser(mut self, parser: Arc<dyn FormatParser>) -> Self {
        for ext in parser.extensions() {
            self.parsers.insert(ext.to_string(), parser.clone());
        }
        self
    }

    pub fn parser(&self, extension: &str) -> Result<Arc<dyn FormatParser>, ParseError> {
        let key = extension.trim_start_matches('.').to_lowercase();
        self.parsers
            .get(&key)
            .cloned()
            .ok_or(ParseError::UnsupportedFormat(key))
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.parsers
            .contains_key(&extension.trim_start_matches('.').to_lowercase())
    }

    pub fn parse(&self, extension: &str, bytes: &[u8]) -> Result<Vec<ParsedElement>, ParseError> {
        self.parser(extension)?.parse(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl FormatParser for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn extensions(&self) -> &'static [&'static str] {
            &["txt"]
        }

        fn parse(&self, _bytes: &[u8]) -> Result<Vec<ParsedElement>, ParseError> {
            Ok(vec![ParsedElement::new(
                Value::String("fixed".into()),
                PositionLocator::Page { page: 1 },
            )])
        }
    }

    #[test]
    fn lookup_is_case_insensitive_and_dot_tolerant() {
        let registry = ParserRegistry::with_builtin();
        assert_eq!(registry.parser(".CSV").unwrap().name(), "delimited");
        assert!(registry.supports("json"));
        assert!(matches!(
            registry.parser("docx"),
            Err(ParseError::UnsupportedFormat(ext)) if ext == "docx"
        ));
    }

    #[test]
    fn later_registration_overrides_builtin() {
        let registry = ParserRegistry::with_builtin().with_parser(Arc::new(Fixed));
        let elements = registry.parse("txt", b"anything").unwrap();
        assert_eq!(elements[0].content, Value::String("fixed".into()));
    }
}
