//! Segment classification: analyzer output turned into a segment kind, a
//! confidence, and the matching [`SegmentBody`] variant.

use serde_json::{Map, Value};
use storage::models::{FileId, NewSegment, SegmentBody, SegmentKind, TextSubtype};

use crate::analyzer::{
    classify_density, flatten_leaves, is_numeric_leaf, is_numeric_token, numeric_value,
    sentence_count, word_count, ContentAnalysis, ContentAnalyzer,
};
use crate::config::ClassificationConfig;
use crate::parser::ParsedElement;

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: SegmentKind,
    pub confidence: f64,
    pub analysis: ContentAnalysis,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentClassifier {
    analyzer: ContentAnalyzer,
}

impl SegmentClassifier {
    pub fn new(thresholds: ClassificationConfig) -> Self {
        Self {
            analyzer: ContentAnalyzer::new(thresholds),
        }
    }

    pub fn analyzer(&self) -> &ContentAnalyzer {
        &self.analyzer
    }

    pub fn classify(&self, content: &Value) -> Classification {
        let analysis = self.analyzer.analyze(content);
        Classification {
            kind: analysis.classification,
            confidence: confidence_for(analysis.numeric_density),
            analysis,
        }
    }

    /// Re-decide an existing analysis against other thresholds.
    pub fn reclassify(
        analysis: &ContentAnalysis,
        thresholds: &ClassificationConfig,
    ) -> (SegmentKind, f64) {
        (
            classify_density(analysis.numeric_density, thresholds),
            confidence_for(analysis.numeric_density),
        )
    }

    /// Classify one parsed element into the segment row that persists it.
    pub fn build_segment(
        &self,
        file_id: FileId,
        position_index: usize,
        element: ParsedElement,
    ) -> NewSegment {
        let classification = self.classify(&element.content);
        let body = build_body(&element, &classification);
        NewSegment {
            file_id,
            position_index,
            locator: element.locator,
            metadata: element.metadata,
            confidence: classification.confidence,
            body,
        }
    }
}

/// Distance from the mixed band: the further the density sits from the
/// cut-offs, the surer the call.
pub fn confidence_for(density: f64) -> f64 {
    if density <= 0.10 || density >= 0.90 {
        0.95
    } else if density <= 0.20 || density >= 0.80 {
        0.85
    } else if density <= 0.30 || density >= 0.70 {
        0.75
    } else {
        0.60
    }
}

fn build_body(element: &ParsedElement, classification: &Classification) -> SegmentBody {
    let analysis = &classification.analysis;
    match classification.kind {
        SegmentKind::Quantitative => SegmentBody::Quantitative {
            payload: element.content.clone(),
            schema: analysis.schema.clone(),
            numeric_density: analysis.numeric_density,
        },
        SegmentKind::Qualitative => {
            let text = render_text(&element.content);
            SegmentBody::Qualitative {
                word_count: word_count(&text),
                sentence_count: sentence_count(&text),
                subtype: element.metadata.subtype.unwrap_or(TextSubtype::Body),
                language: analysis.detected_language.clone(),
                text,
            }
        }
        SegmentKind::Mixed => {
            let (text_fields, numeric_fields) = split_fields(&element.content);
            SegmentBody::Mixed {
                text_fields,
                numeric_fields,
                numeric_ratio: analysis.numeric_density,
            }
        }
    }
}

/// Text of a string element, or the non-null leaves of a structure one per
/// line.
fn render_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        other => flatten_leaves(other)
            .into_iter()
            .map(|(_, v)| match v {
                Value::String(s) => s.clone(),
                v => v.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Separate text-bearing from numeric-bearing leaves.
///
/// Structures split by leaf. Free text keeps the whole string as the
/// `text` field and files each numeric token under the word before it
/// ("nodule 5mm" files 5 under `nodule`).
fn split_fields(content: &Value) -> (Map<String, Value>, Map<String, Value>) {
    let mut text_fields = Map::new();
    let mut numeric_fields = Map::new();

    match content {
        Value::String(text) => {
            text_fields.insert("text".to_string(), Value::String(text.clone()));
            let mut label = "value".to_string();
            for token in text.split_whitespace() {
                if !is_numeric_token(token) {
                    let word = token
                        .trim_matches(|c: char| !c.is_alphanumeric())
                        .to_lowercase();
                    if !word.is_empty() {
                        label = word;
                    }
                    continue;
                }
                let value = numeric_value(&Value::String(token.to_string()))
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(token.to_string()));
                push_field(&mut numeric_fields, &label, value);
            }
        }
        other => {
            for (path, leaf) in flatten_leaves(other) {
                let target = if is_numeric_leaf(leaf) {
                    &mut numeric_fields
                } else {
                    &mut text_fields
                };
                target.insert(path, leaf.clone());
            }
        }
    }
    (text_fields, numeric_fields)
}

fn push_field(fields: &mut Map<String, Value>, key: &str, value: Value) {
    match fields.get_mut(key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(key.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use storage::models::{ElementMetadata, PositionLocator};

    fn element(content: Value) -> ParsedElement {
        ParsedElement::new(content, PositionLocator::Path { path: "$".into() })
    }

    #[test]
    fn confidence_bands() {
        assert_eq!(confidence_for(0.0), 0.95);
        assert_eq!(confidence_for(0.10), 0.95);
        assert_eq!(confidence_for(0.95), 0.95);
        assert_eq!(confidence_for(0.15), 0.85);
        assert_eq!(confidence_for(0.80), 0.85);
        assert_eq!(confidence_for(0.30), 0.75);
        assert_eq!(confidence_for(0.70), 0.75);
        assert_eq!(confidence_for(0.5), 0.60);
    }

    #[test]
    fn reclassify_uses_caller_thresholds() {
        let c = SegmentClassifier::default().classify(&json!({"a": 1, "b": 2, "c": "x"}));
        assert_eq!(c.kind, SegmentKind::Mixed);
        let lenient = ClassificationConfig {
            quantitative_threshold: 0.6,
            qualitative_threshold: 0.2,
        };
        let (kind, _) = SegmentClassifier::reclassify(&c.analysis, &lenient);
        assert_eq!(kind, SegmentKind::Quantitative);
    }

    #[test]
    fn numeric_row_becomes_quantitative_body() {
        let row = element(json!({"age": 45, "size_mm": 5.2, "id": "7"}));
        let seg = SegmentClassifier::default().build_segment(1, 0, row);
        match seg.body {
            SegmentBody::Quantitative { schema, numeric_density, .. } => {
                assert_eq!(numeric_density, 1.0);
                assert_eq!(schema.len(), 3);
            }
            other => panic!("expected quantitative body, got {other:?}"),
        }
        assert_eq!(seg.confidence, 0.95);
    }

    #[test]
    fn prose_becomes_qualitative_body_with_subtype() {
        let text = json!("The margin is spiculated. Follow-up is advised.");
        let el = element(text).with_metadata(ElementMetadata {
            subtype: Some(TextSubtype::Abstract),
            ..Default::default()
        });
        let seg = SegmentClassifier::default().build_segment(1, 3, el);
        assert_eq!(seg.position_index, 3);
        match seg.body {
            SegmentBody::Qualitative { subtype, word_count, sentence_count, language, .. } => {
                assert_eq!(subtype, TextSubtype::Abstract);
                assert_eq!(word_count, 7);
                assert_eq!(sentence_count, 2);
                assert_eq!(language.as_deref(), Some("en"));
            }
            other => panic!("expected qualitative body, got {other:?}"),
        }
    }

    #[test]
    fn mixed_row_splits_text_and_numbers() {
        let seg = SegmentClassifier::default().build_segment(
            1,
            0,
            element(json!({"age": 45, "weight_kg": 70.5, "diagnosis": "benign"})),
        );
        match seg.body {
            SegmentBody::Mixed { text_fields, numeric_fields, numeric_ratio } => {
                assert_eq!(text_fields["diagnosis"], json!("benign"));
                assert_eq!(numeric_fields["weight_kg"], json!(70.5));
                assert!((numeric_ratio - 2.0 / 3.0).abs() < 1e-12);
            }
            other => panic!("expected mixed body, got {other:?}"),
        }
    }

    #[test]
    fn mixed_text_files_numbers_under_preceding_word() {
        let (text, numbers) = split_fields(&json!("nodule 5mm density 40 HU 50%"));
        assert!(text.contains_key("text"));
        assert_eq!(numbers["nodule"], json!(5.0));
        assert_eq!(numbers["hu"], json!(50.0));
        assert_eq!(numbers["density"], json!(40.0));
    }
}
