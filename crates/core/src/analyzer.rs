//! Density and structure metrics for one parsed element.
//!
//! Strings are tokenized on whitespace; structured content is flattened
//! to its leaf values. The numeric share of tokens/leaves drives the
//! quantitative / qualitative / mixed decision.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use storage::models::{FieldSchema, FieldType, SegmentKind};
use tracing::warn;

use crate::config::ClassificationConfig;
use crate::error::ClassificationError;

static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)^(?:
            [-+]?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?(?:[eE][-+]?\d+)?   # plain number
          | [-+]?\.\d+
          | [-+]?[$€£¥₹]\s?\d[\d,]*(?:\.\d+)?                          # currency prefix
          | \d[\d,]*(?:\.\d+)?[$€£¥₹]                                    # currency suffix
          | [-+]?\d+(?:\.\d+)?%                                          # percentage
          | [-+]?\d+(?:\.\d+)?\s?[a-zA-Zµ°]{1,3}                         # measurement
        )$",
    )
    .expect("numeric pattern compiles")
});

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\d{1,4}[-/.]\d{1,2}[-/.]\d{1,4}|\d{4}-\d{2}-\d{2}T[\d:.]+Z?)$")
        .expect("date pattern compiles")
});

static LEADING_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([-+]?)[$€£¥₹]?\s?([-+]?\d[\d,]*(?:\.\d+)?|\.\d+)").expect("number prefix compiles")
});

static SENTENCE_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+(?:\s|$)").expect("sentence pattern compiles"));

static KEY_VALUE_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[A-Za-z_][\w .-]{0,40}:\s*\S").expect("key/value pattern compiles")
});

const BOOLEAN_WORDS: &[&str] = &["true", "false", "yes", "no"];

pub(crate) const FUNCTION_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "to", "in", "is", "was", "are", "were", "for", "with",
    "on", "at", "by", "this", "that", "it", "as", "be", "from", "has", "have", "not", "but",
];

static FUNCTION_WORD_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| FUNCTION_WORDS.iter().copied().collect());

const STRUCTURE_DELIMITERS: &[char] = &[',', '\t', '|', ';'];

#[derive(Debug, Clone, PartialEq)]
pub struct ContentAnalysis {
    pub numeric_density: f64,
    pub text_density: f64,
    pub has_prose: bool,
    pub has_structure: bool,
    pub detected_language: Option<String>,
    pub schema: FieldSchema,
    pub classification: SegmentKind,
}

#[derive(Debug, Clone, Default)]
pub struct ContentAnalyzer {
    thresholds: ClassificationConfig,
}

impl ContentAnalyzer {
    pub fn new(thresholds: ClassificationConfig) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ClassificationConfig {
        &self.thresholds
    }

    /// Analyze one element. Content the analyzer cannot characterize is
    /// logged and falls back to zero densities.
    pub fn analyze(&self, content: &Value) -> ContentAnalysis {
        match self.try_analyze(content) {
            Ok(analysis) => analysis,
            Err(err) => {
                warn!(error = %err, "content not characterizable, using defaults");
                self.default_analysis()
            }
        }
    }

    pub fn try_analyze(&self, content: &Value) -> Result<ContentAnalysis, ClassificationError> {
        match content {
            Value::String(text) => Ok(self.analyze_text(text)),
            Value::Object(_) | Value::Array(_) => Ok(self.analyze_structured(content)),
            Value::Number(_) | Value::Bool(_) => {
                let numeric_density = 1.0;
                Ok(ContentAnalysis {
                    numeric_density,
                    text_density: 0.0,
                    has_prose: false,
                    has_structure: false,
                    detected_language: None,
                    schema: FieldSchema::new(),
                    classification: classify_density(numeric_density, &self.thresholds),
                })
            }
            Value::Null => Err(ClassificationError::UnsupportedShape("null")),
        }
    }

    fn default_analysis(&self) -> ContentAnalysis {
        ContentAnalysis {
            numeric_density: 0.0,
            text_density: 0.0,
            has_prose: false,
            has_structure: false,
            detected_language: None,
            schema: FieldSchema::new(),
            classification: classify_density(0.0, &self.thresholds),
        }
    }

    fn analyze_text(&self, text: &str) -> ContentAnalysis {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let numeric = tokens.iter().filter(|t| is_numeric_token(t)).count();
        let numeric_density = ratio(numeric, tokens.len());

        let terminators = SENTENCE_END_RE.find_iter(text).count();
        let avg_len = average_word_length(&tokens);
        let text_density = if terminators >= 2 && (3.0..=7.0).contains(&avg_len) {
            0.9
        } else {
            1.0 - numeric_density
        };

        ContentAnalysis {
            numeric_density,
            text_density,
            has_prose: has_prose(text),
            has_structure: looks_structured(text),
            detected_language: detect_language(&tokens),
            schema: FieldSchema::new(),
            classification: classify_density(numeric_density, &self.thresholds),
        }
    }

    fn analyze_structured(&self, content: &Value) -> ContentAnalysis {
        let leaves = flatten_leaves(content);
        let numeric = leaves.iter().filter(|(_, v)| is_numeric_leaf(v)).count();
        let numeric_density = ratio(numeric, leaves.len());

        let strings: Vec<&str> = leaves.iter().filter_map(|(_, v)| v.as_str()).collect();
        let sentence_like = strings
            .iter()
            .filter(|s| s.chars().count() > 20 && s.contains(['.', '!', '?']))
            .count();
        let text_density = ratio(sentence_like, strings.len());

        let joined = strings.join(" ");
        let tokens: Vec<&str> = joined.split_whitespace().collect();

        ContentAnalysis {
            numeric_density,
            text_density,
            has_prose: strings.iter().any(|s| has_prose(s)),
            has_structure: true,
            detected_language: detect_language(&tokens),
            schema: infer_schema(content),
            classification: classify_density(numeric_density, &self.thresholds),
        }
    }
}

/// `≥ quantitative` → quantitative, `≤ qualitative` → qualitative, else mixed.
pub fn classify_density(density: f64, thresholds: &ClassificationConfig) -> SegmentKind {
    if density >= thresholds.quantitative_threshold {
        SegmentKind::Quantitative
    } else if density <= thresholds.qualitative_threshold {
        SegmentKind::Qualitative
    } else {
        SegmentKind::Mixed
    }
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn strip_token(token: &str) -> &str {
    token
        .trim_matches(|c: char| matches!(c, ',' | ';' | ':' | '(' | ')' | '[' | ']' | '"' | '\''))
        .trim_end_matches(['.', '!', '?'])
}

/// Number, currency amount, percentage, date, measurement or boolean-like
/// literal.
pub fn is_numeric_token(token: &str) -> bool {
    let t = strip_token(token.trim());
    if t.is_empty() {
        return false;
    }
    if BOOLEAN_WORDS.iter().any(|b| t.eq_ignore_ascii_case(b)) {
        return true;
    }
    NUMERIC_RE.is_match(t) || DATE_RE.is_match(t)
}

pub(crate) fn is_numeric_leaf(value: &Value) -> bool {
    match value {
        Value::Number(_) | Value::Bool(_) => true,
        Value::String(s) => is_numeric_token(s),
        _ => false,
    }
}

/// Numeric magnitude of a leaf, if it carries one. Dates and boolean
/// words do not.
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let t = strip_token(s.trim());
            if !is_numeric_token(t) || DATE_RE.is_match(t) {
                return None;
            }
            let caps = LEADING_NUMBER_RE.captures(t)?;
            let sign = caps.get(1).map_or("", |m| m.as_str());
            let digits = caps.get(2)?.as_str().replace(',', "");
            format!("{sign}{digits}").parse().ok()
        }
        _ => None,
    }
}

/// Leaf values of a structure with their dotted paths. Nulls are skipped.
pub fn flatten_leaves(value: &Value) -> Vec<(String, &Value)> {
    fn walk<'a>(prefix: String, value: &'a Value, out: &mut Vec<(String, &'a Value)>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    walk(path, child, out);
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    walk(format!("{prefix}[{i}]"), child, out);
                }
            }
            Value::Null => {}
            leaf => out.push((prefix, leaf)),
        }
    }

    let mut out = Vec::new();
    walk(String::new(), value, &mut out);
    out
}

fn average_word_length(tokens: &[&str]) -> f64 {
    let lengths: Vec<usize> = tokens
        .iter()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).chars().count())
        .filter(|len| *len > 0)
        .collect();
    if lengths.is_empty() {
        return 0.0;
    }
    lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|s| s.split_whitespace().count() >= 2)
        .count()
}

fn has_prose(text: &str) -> bool {
    if sentence_count(text) < 2 {
        return false;
    }
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .collect();
    let function_hit = words.iter().any(|w| FUNCTION_WORD_SET.contains(w.as_str()));
    let punctuation = text.contains([',', ';', ':']);
    let long_words = words.iter().filter(|w| w.chars().count() >= 4).count() >= 2;
    function_hit || punctuation || long_words
}

fn looks_structured(text: &str) -> bool {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).take(5).collect();
    if lines.iter().filter(|l| KEY_VALUE_LINE_RE.is_match(l)).count() >= 2 {
        return true;
    }
    if lines.len() < 2 {
        return false;
    }
    STRUCTURE_DELIMITERS.iter().any(|d| {
        let first = lines[0].matches(*d).count();
        first > 0 && lines.iter().all(|l| l.matches(*d).count() == first)
    })
}

/// English when common function words exceed 2% of tokens.
fn detect_language(tokens: &[&str]) -> Option<String> {
    if tokens.is_empty() {
        return None;
    }
    let hits = tokens
        .iter()
        .filter(|t| {
            let w = t
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            FUNCTION_WORD_SET.contains(w.as_str())
        })
        .count();
    (hits as f64 / tokens.len() as f64 > 0.02).then(|| "en".to_string())
}

pub fn field_type(value: &Value) -> FieldType {
    match value {
        Value::Number(_) => FieldType::Number,
        Value::Bool(_) => FieldType::Boolean,
        Value::String(s) if is_numeric_token(s) => FieldType::NumericString,
        Value::String(s) if s.chars().count() > 50 => FieldType::Text,
        Value::String(_) => FieldType::String,
        Value::Array(_) => FieldType::Array,
        Value::Object(_) => FieldType::Object,
        Value::Null => FieldType::Unknown,
    }
}

/// Field types of a flat record, or of the rows of a table. The first
/// non-null value of a field decides its type.
pub fn infer_schema(content: &Value) -> FieldSchema {
    let mut schema = FieldSchema::new();
    let rows: Vec<&serde_json::Map<String, Value>> = match content {
        Value::Object(map) => vec![map],
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    };
    for row in rows {
        for (key, value) in row {
            let inferred = field_type(value);
            schema
                .entry(key.clone())
                .and_modify(|t| {
                    if *t == FieldType::Unknown {
                        *t = inferred;
                    }
                })
                .or_insert(inferred);
        }
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn analyzer() -> ContentAnalyzer {
        ContentAnalyzer::default()
    }

    #[test]
    fn numeric_density_counts_tokens_exactly() {
        let a = analyzer().analyze(&json!("The patient has a 5mm nodule with 85% confidence."));
        assert_eq!(a.numeric_density, 2.0 / 9.0);
        assert_eq!(a.classification, SegmentKind::Qualitative);
    }

    #[test]
    fn structured_leaves_drive_density() {
        let a = analyzer().analyze(&json!({"age": 45, "weight_kg": 70.5, "diagnosis": "benign"}));
        assert_eq!(a.numeric_density, 2.0 / 3.0);
        assert_eq!(a.classification, SegmentKind::Mixed);
        assert!(a.has_structure);
        assert_eq!(a.schema["age"], FieldType::Number);
        assert_eq!(a.schema["diagnosis"], FieldType::String);
    }

    #[test]
    fn empty_content_has_zero_density() {
        assert_eq!(analyzer().analyze(&json!("")).numeric_density, 0.0);
        assert_eq!(analyzer().analyze(&json!({})).numeric_density, 0.0);
    }

    #[test]
    fn null_content_falls_back_to_defaults() {
        let a = analyzer().analyze(&Value::Null);
        assert_eq!(a.numeric_density, 0.0);
        assert_eq!(a.classification, SegmentKind::Qualitative);
        assert!(analyzer().try_analyze(&Value::Null).is_err());
    }

    #[test]
    fn classification_boundaries() {
        let t = ClassificationConfig::default();
        assert_eq!(classify_density(0.70, &t), SegmentKind::Quantitative);
        assert_eq!(classify_density(0.6999, &t), SegmentKind::Mixed);
        assert_eq!(classify_density(0.30, &t), SegmentKind::Qualitative);
        assert_eq!(classify_density(0.3001, &t), SegmentKind::Mixed);
    }

    #[test]
    fn thresholds_are_configurable() {
        let strict = ContentAnalyzer::new(ClassificationConfig {
            quantitative_threshold: 0.9,
            qualitative_threshold: 0.1,
        });
        let a = strict.analyze(&json!("45 70 12% benign"));
        assert_eq!(a.numeric_density, 0.75);
        assert_eq!(a.classification, SegmentKind::Mixed);
        assert_eq!(
            analyzer().analyze(&json!("45 70 12% benign")).classification,
            SegmentKind::Quantitative
        );
    }

    #[test]
    fn numeric_token_kinds() {
        for t in [
            "42",
            "-3.5",
            "1,200",
            "$19.99",
            "€5",
            "85%",
            "2024-01-15",
            "12/03/2023",
            "5mm",
            "2.5 kg",
            "yes",
            "FALSE",
            "0",
            "(7),",
        ] {
            assert!(is_numeric_token(t), "{t} should be numeric");
        }
        for t in ["nodule", "P-001", "a", "mm5", "lobulated."] {
            assert!(!is_numeric_token(t), "{t} should not be numeric");
        }
    }

    #[test]
    fn numeric_values_are_extracted_from_strings() {
        assert_eq!(numeric_value(&json!("$1,200.50")), Some(1200.5));
        assert_eq!(numeric_value(&json!("85%")), Some(85.0));
        assert_eq!(numeric_value(&json!("-2.5mm")), Some(-2.5));
        assert_eq!(numeric_value(&json!(7)), Some(7.0));
        assert_eq!(numeric_value(&json!("2024-01-15")), None);
        assert_eq!(numeric_value(&json!("yes")), None);
        assert_eq!(numeric_value(&json!("benign")), None);
    }

    #[test]
    fn prose_and_language_detection() {
        let text = "The nodule is well circumscribed. It shows no change from the prior study.";
        let a = analyzer().analyze(&json!(text));
        assert!(a.has_prose);
        assert_eq!(a.text_density, 0.9);
        assert_eq!(a.detected_language.as_deref(), Some("en"));
        assert!(!a.has_structure);

        let b = analyzer().analyze(&json!("45 70 12"));
        assert!(!b.has_prose);
        assert_eq!(b.detected_language, None);
    }

    #[test]
    fn key_value_and_delimited_text_are_structured() {
        assert!(analyzer().analyze(&json!("Age: 45\nSex: F\nSite: RUL")).has_structure);
        assert!(analyzer().analyze(&json!("a,b,c\n1,2,3\n4,5,6")).has_structure);
        assert!(!analyzer().analyze(&json!("a,b\n1,2,3")).has_structure);
    }

    #[test]
    fn structured_text_density_counts_sentence_strings() {
        let a = analyzer().analyze(&json!({
            "note": "Findings are stable. No new lesions seen.",
            "code": "R91.1"
        }));
        assert_eq!(a.text_density, 0.5);
        assert!(a.has_prose);
    }

    #[test]
    fn schema_tags() {
        let long = "x".repeat(51);
        let schema = infer_schema(&json!({
            "n": 1, "b": true, "ns": "12%", "t": long, "s": "short",
            "arr": [1], "obj": {"k": 1}, "nil": null
        }));
        assert_eq!(schema["n"], FieldType::Number);
        assert_eq!(schema["b"], FieldType::Boolean);
        assert_eq!(schema["ns"], FieldType::NumericString);
        assert_eq!(schema["t"], FieldType::Text);
        assert_eq!(schema["s"], FieldType::String);
        assert_eq!(schema["arr"], FieldType::Array);
        assert_eq!(schema["obj"], FieldType::Object);
        assert_eq!(schema["nil"], FieldType::Unknown);
    }

    #[test]
    fn table_schema_takes_first_non_null() {
        let schema = infer_schema(&json!([{"size": null}, {"size": 4.5}]));
        assert_eq!(schema["size"], FieldType::Number);
    }
}
