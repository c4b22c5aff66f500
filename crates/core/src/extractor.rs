//! Keyword candidates with context, per segment kind, and their persistence.
//!
//! Extraction is pure: [`KeywordExtractor::extract`] turns a segment into
//! accepted candidates. [`KeywordExtractor::persist`] writes them; a
//! candidate that fails to persist is logged and skipped.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use storage::models::{
    ContentSegment, ElementMetadata, KeywordId, NewOccurrence, OccurrencePosition, SegmentBody,
};
use storage::Repository;
use tracing::{debug, warn};

use crate::analyzer::{flatten_leaves, is_numeric_token, numeric_value};
use crate::config::{ExtractionConfig, NgramRange};
use crate::error::ExtractionError;
use crate::normalizer::{normalize_term, KeywordNormalizer};
use crate::relevance::{self, PositionFactors};
use crate::stopwords::StopWordFilter;

const ENTITY_WEIGHT: f64 = 1.3;
const ENUM_WEIGHT: f64 = 1.2;
const TEXT_KEY_WEIGHT: f64 = 1.5;
const NUMERIC_KEY_WEIGHT: f64 = 1.6;
const MAX_REPEATED_VALUE_LEN: usize = 50;
const MAX_ENUM_LEN: usize = 20;

static CAPITALIZED_PHRASE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+)+\b").expect("entity pattern compiles")
});
static QUOTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"\n]{2,80})""#).expect("quote pattern compiles"));

/// One observed instance of a candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateInstance {
    pub context: String,
    pub numeric_values: Vec<f64>,
    pub position: OccurrencePosition,
    pub position_weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub term: String,
    pub normalized: String,
    pub instances: Vec<CandidateInstance>,
}

impl Candidate {
    pub fn is_phrase(&self) -> bool {
        self.normalized.contains(' ')
    }
}

/// Candidates keyed by folded term, in first-seen order.
struct CandidateSet<'a> {
    normalizer: &'a KeywordNormalizer,
    order: Vec<String>,
    by_term: HashMap<String, Candidate>,
}

impl<'a> CandidateSet<'a> {
    fn new(normalizer: &'a KeywordNormalizer) -> Self {
        Self {
            normalizer,
            order: Vec::new(),
            by_term: HashMap::new(),
        }
    }

    fn key(&self, term: &str) -> String {
        self.normalizer.canonical(term)
    }

    fn contains(&self, key: &str) -> bool {
        self.by_term.contains_key(key)
    }

    fn push(&mut self, term: &str, instance: CandidateInstance) {
        let plain = normalize_term(term);
        if plain.is_empty() {
            return;
        }
        let normalized = self.key(term);
        match self.by_term.get_mut(&normalized) {
            Some(candidate) => candidate.instances.push(instance),
            None => {
                // folded terms display in their canonical form
                let display = if normalized == plain {
                    term.trim_matches(|c: char| !c.is_alphanumeric()).to_string()
                } else {
                    normalized.clone()
                };
                self.order.push(normalized.clone());
                self.by_term.insert(
                    normalized.clone(),
                    Candidate {
                        term: display,
                        normalized,
                        instances: vec![instance],
                    },
                );
            }
        }
    }

    fn into_vec(mut self) -> Vec<Candidate> {
        self.order
            .iter()
            .filter_map(|t| self.by_term.remove(t))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub accepted: usize,
    pub rejected: usize,
    pub occurrences: usize,
    pub failed: usize,
}

pub struct KeywordExtractor {
    config: ExtractionConfig,
    filter: StopWordFilter,
    normalizer: Arc<KeywordNormalizer>,
}

impl KeywordExtractor {
    pub fn new(config: ExtractionConfig, filter: StopWordFilter) -> Self {
        Self {
            config,
            filter,
            normalizer: Arc::new(KeywordNormalizer::default()),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Arc<KeywordNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn filter(&self) -> &StopWordFilter {
        &self.filter
    }

    /// Stop-word acceptance of the whole term. A phrase made only of
    /// filtered words is rejected unless the phrase itself is preserved.
    fn accepts(&self, candidate: &Candidate) -> bool {
        if !self.filter.accepts(&candidate.term) {
            return false;
        }
        !candidate.is_phrase()
            || self.filter.should_preserve(&candidate.term)
            || candidate
                .normalized
                .split(' ')
                .any(|word| !self.filter.should_filter(word))
    }

    /// Accepted candidates of one segment, plus the number rejected by the
    /// stop-word filter.
    pub fn extract(&self, segment: &ContentSegment) -> (Vec<Candidate>, usize) {
        let mut set = CandidateSet::new(&self.normalizer);
        match &segment.body {
            SegmentBody::Quantitative { payload, schema, .. } => {
                let columns: Vec<String> = if schema.is_empty() {
                    payload
                        .as_object()
                        .map(|m| m.keys().cloned().collect())
                        .unwrap_or_default()
                } else {
                    schema.keys().cloned().collect()
                };
                let weight = PositionFactors::for_field_names(&segment.metadata).weight();
                self.quantitative(&mut set, payload, &columns, weight);
            }
            SegmentBody::Qualitative { text, .. } => {
                let weight = PositionFactors::from_metadata(&segment.metadata).weight();
                self.ngrams(&mut set, text, self.config.text_ngram, weight, None);
                self.entities(&mut set, text, weight);
            }
            SegmentBody::Mixed {
                text_fields,
                numeric_fields,
                ..
            } => self.mixed(&mut set, &segment.metadata, text_fields, numeric_fields),
        }

        let (accepted, rejected): (Vec<_>, Vec<_>) = set
            .into_vec()
            .into_iter()
            .partition(|c| self.accepts(c));
        (accepted, rejected.len())
    }

    /// Column names carry `column_weight`; repeated short string values
    /// become enum-like candidates.
    fn quantitative(
        &self,
        set: &mut CandidateSet,
        payload: &Value,
        columns: &[String],
        column_weight: f64,
    ) {
        let rows: Vec<&Map<String, Value>> = match payload {
            Value::Object(map) => vec![map],
            Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
            _ => Vec::new(),
        };

        for column in columns {
            let samples: Vec<f64> = rows
                .iter()
                .filter_map(|row| row.get(column))
                .filter_map(numeric_value)
                .take(self.config.max_sampled_values)
                .collect();
            set.push(
                column,
                CandidateInstance {
                    context: format!("column: {column}"),
                    numeric_values: samples,
                    position: field_position(column),
                    position_weight: column_weight,
                },
            );
        }

        let mut counts: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for row in &rows {
            for (column, value) in row.iter() {
                if let Some(s) = value.as_str() {
                    let s = s.trim();
                    let short = s.chars().count() < MAX_REPEATED_VALUE_LEN;
                    if !s.is_empty() && short && !is_numeric_token(s) {
                        counts.entry(s).or_default().push(column.as_str());
                    }
                }
            }
        }
        for (value, columns) in counts {
            if columns.len() < 2 {
                continue;
            }
            let weight = if value.chars().count() <= MAX_ENUM_LEN {
                ENUM_WEIGHT
            } else {
                1.0
            };
            for column in columns {
                set.push(
                    value,
                    CandidateInstance {
                        context: format!("{column}: {value}"),
                        numeric_values: Vec::new(),
                        position: field_position(column),
                        position_weight: weight,
                    },
                );
            }
        }
    }

    fn ngrams(
        &self,
        set: &mut CandidateSet,
        text: &str,
        range: NgramRange,
        weight: f64,
        field: Option<&str>,
    ) {
        let chars: Vec<char> = text.chars().collect();
        let tokens = tokenize(text);
        let instance = |start_char: usize, term: &str| CandidateInstance {
            context: context_window(
                &chars,
                start_char,
                term.chars().count(),
                self.config.context_window,
            ),
            numeric_values: Vec::new(),
            position: OccurrencePosition {
                char_offset: Some(start_char),
                field: field.map(str::to_string),
            },
            position_weight: weight,
        };

        for n in range.min.max(1)..=range.max {
            for window in tokens.windows(n) {
                let (start_char, start_byte, _) = window[0];
                let (_, _, end_byte) = window[n - 1];
                let term = &text[start_byte..end_byte];
                set.push(term, instance(start_char, term));
            }
        }

        // dictionary terms longer than the n-gram range
        let words: Vec<&str> = tokens.iter().map(|&(_, s, e)| &text[s..e]).collect();
        for (start, len) in self.normalizer.multi_word_matches(&words) {
            if len <= range.max {
                continue;
            }
            let (start_char, start_byte, _) = tokens[start];
            let (_, _, end_byte) = tokens[start + len - 1];
            let term = &text[start_byte..end_byte];
            set.push(term, instance(start_char, term));
        }
    }

    /// Capitalized multi-word phrases and quoted strings not already
    /// produced as n-grams.
    fn entities(&self, set: &mut CandidateSet, text: &str, weight: f64) {
        let chars: Vec<char> = text.chars().collect();
        let mut found: Vec<(usize, &str)> = CAPITALIZED_PHRASE_RE
            .find_iter(text)
            .map(|m| (m.start(), m.as_str()))
            .collect();
        found.extend(
            QUOTED_RE
                .captures_iter(text)
                .filter_map(|c| c.get(1))
                .map(|m| (m.start(), m.as_str())),
        );

        let existing: Vec<String> = found
            .iter()
            .map(|(_, t)| set.key(t))
            .filter(|n| set.contains(n))
            .collect();
        for (byte_offset, entity) in found {
            let normalized = set.key(entity);
            if existing.contains(&normalized) {
                continue;
            }
            let start_char = text[..byte_offset].chars().count();
            set.push(
                entity,
                CandidateInstance {
                    context: context_window(
                        &chars,
                        start_char,
                        entity.chars().count(),
                        self.config.context_window,
                    ),
                    numeric_values: Vec::new(),
                    position: OccurrencePosition {
                        char_offset: Some(start_char),
                        field: None,
                    },
                    position_weight: (ENTITY_WEIGHT * weight).min(relevance::MAX_POSITION_WEIGHT),
                },
            );
        }
    }

    fn mixed(
        &self,
        set: &mut CandidateSet,
        metadata: &ElementMetadata,
        text_fields: &Map<String, Value>,
        numeric_fields: &Map<String, Value>,
    ) {
        let weight = PositionFactors::from_metadata(metadata).weight();

        for (path, value) in text_fields {
            let Some(text) = value.as_str() else { continue };
            self.ngrams(set, text, self.config.mixed_ngram, weight, Some(path.as_str()));

            let key = field_label(path);
            if key == "text" {
                continue;
            }
            let numbers: Vec<f64> = numeric_fields
                .iter()
                .filter(|(other, _)| same_field(key, field_label(other)))
                .flat_map(|(_, v)| numbers_of(v))
                .take(self.config.max_sampled_values)
                .collect();
            set.push(
                key,
                CandidateInstance {
                    context: truncate(&format!("{key}: {text}"), 2 * self.config.context_window),
                    numeric_values: numbers,
                    position: field_position(path),
                    position_weight: TEXT_KEY_WEIGHT,
                },
            );
        }

        for (path, value) in numeric_fields {
            let key = field_label(path);
            set.push(
                key,
                CandidateInstance {
                    context: format!("{key}: {value}"),
                    numeric_values: numbers_of(value),
                    position: field_position(path),
                    position_weight: NUMERIC_KEY_WEIGHT,
                },
            );
        }
    }

    /// Upsert, record occurrences, then recompute aggregates of every
    /// accepted candidate. Failures are isolated per candidate.
    pub async fn persist(
        &self,
        repo: &dyn Repository,
        segment: &ContentSegment,
        candidates: &[Candidate],
        total_documents: i64,
    ) -> ExtractionReport {
        let mut report = ExtractionReport {
            accepted: candidates.len(),
            ..Default::default()
        };
        for candidate in candidates {
            match persist_candidate(repo, segment, candidate, total_documents).await {
                Ok(_) => report.occurrences += candidate.instances.len(),
                Err(err) => {
                    warn!(
                        segment_id = segment.id,
                        keyword = %err.term,
                        error = %err.source,
                        "keyword skipped"
                    );
                    report.failed += 1;
                }
            }
        }
        debug!(
            segment_id = segment.id,
            accepted = report.accepted,
            occurrences = report.occurrences,
            "segment keywords persisted"
        );
        report
    }

    pub async fn extract_and_persist(
        &self,
        repo: &dyn Repository,
        segment: &ContentSegment,
        total_documents: i64,
    ) -> ExtractionReport {
        let (candidates, rejected) = self.extract(segment);
        let mut report = self.persist(repo, segment, &candidates, total_documents).await;
        report.rejected = rejected;
        report
    }
}

async fn persist_candidate(
    repo: &dyn Repository,
    segment: &ContentSegment,
    candidate: &Candidate,
    total_documents: i64,
) -> Result<KeywordId, ExtractionError> {
    let wrap = |source| ExtractionError {
        term: candidate.normalized.clone(),
        source,
    };
    let keyword = repo
        .upsert_keyword(&candidate.normalized, &candidate.term, candidate.is_phrase())
        .await
        .map_err(wrap)?;
    for instance in &candidate.instances {
        repo.insert_occurrence(&NewOccurrence {
            keyword_id: keyword.id,
            segment: segment.reference(),
            file_id: segment.file_id,
            context: instance.context.clone(),
            numeric_values: instance.numeric_values.clone(),
            position: instance.position.clone(),
            position_weight: instance.position_weight,
        })
        .await
        .map_err(wrap)?;
    }
    relevance::recompute_keyword(repo, keyword.id, total_documents)
        .await
        .map_err(wrap)?;
    Ok(keyword.id)
}

/// Whitespace tokens as (char offset, byte start, byte end).
fn tokenize(text: &str) -> Vec<(usize, usize, usize)> {
    let mut tokens = Vec::new();
    let mut start: Option<(usize, usize)> = None;
    for (char_idx, (byte_idx, c)) in text.char_indices().enumerate() {
        match (c.is_whitespace(), start) {
            (true, Some((sc, sb))) => {
                tokens.push((sc, sb, byte_idx));
                start = None;
            }
            (false, None) => start = Some((char_idx, byte_idx)),
            _ => {}
        }
    }
    if let Some((sc, sb)) = start {
        tokens.push((sc, sb, text.len()));
    }
    tokens
}

fn context_window(chars: &[char], start: usize, len: usize, window: usize) -> String {
    let from = start.saturating_sub(window);
    let to = (start + len + window).min(chars.len());
    chars[from..to].iter().collect::<String>().trim().to_string()
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Last path component without array indices: `findings.size_mm` and
/// `rows[2].size_mm` both give `size_mm`.
fn field_label(path: &str) -> &str {
    let last = path.rsplit('.').next().unwrap_or(path);
    match last.find('[') {
        Some(0) | None => last,
        Some(i) => &last[..i],
    }
}

fn same_field(text_key: &str, numeric_key: &str) -> bool {
    let t = normalize_term(text_key);
    let n = normalize_term(numeric_key);
    !t.is_empty() && (n == t || n.starts_with(&format!("{t}_")))
}

fn field_position(path: &str) -> OccurrencePosition {
    OccurrencePosition {
        char_offset: None,
        field: Some(path.to_string()),
    }
}

fn numbers_of(value: &Value) -> Vec<f64> {
    match value {
        Value::Array(items) => items.iter().filter_map(numeric_value).collect(),
        other => flatten_leaves(other)
            .into_iter()
            .filter_map(|(_, v)| numeric_value(v))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use storage::models::{FieldType, PositionLocator, TextSubtype};

    fn segment(body: SegmentBody, metadata: ElementMetadata) -> ContentSegment {
        ContentSegment {
            id: 7,
            file_id: 1,
            position_index: 0,
            locator: PositionLocator::Path { path: "$".into() },
            metadata,
            confidence: 0.9,
            body,
            created_at: Utc::now(),
        }
    }

    fn extractor() -> KeywordExtractor {
        KeywordExtractor::new(ExtractionConfig::default(), StopWordFilter::with_defaults())
    }

    fn find<'a>(candidates: &'a [Candidate], term: &str) -> Option<&'a Candidate> {
        candidates.iter().find(|c| c.normalized == term)
    }

    #[test]
    fn qualitative_ngrams_carry_offsets_and_context() {
        let text = "The nodule shows spiculated margins. Spiculated margins suggest malignancy.";
        let seg = segment(
            SegmentBody::Qualitative {
                text: text.into(),
                subtype: TextSubtype::Body,
                language: Some("en".into()),
                word_count: 10,
                sentence_count: 2,
            },
            ElementMetadata {
                subtype: Some(TextSubtype::Body),
                first_section: true,
                ..Default::default()
            },
        );
        let (candidates, rejected) = extractor().extract(&seg);
        assert!(rejected > 0, "'the' should be filtered");
        assert!(find(&candidates, "the").is_none());

        let margins = find(&candidates, "spiculated margins").unwrap();
        assert_eq!(margins.instances.len(), 2);
        assert_eq!(margins.instances[0].position.char_offset, Some(17));
        assert_eq!(margins.instances[1].position.char_offset, Some(37));
        assert_eq!(margins.instances[0].position_weight, 1.5);
        assert!(margins.instances[0].context.contains("nodule shows spiculated"));
        assert!(margins.is_phrase());

        assert!(find(&candidates, "nodule shows spiculated").is_some());
        assert!(find(&candidates, "nodule shows spiculated margins").is_none());
    }

    #[test]
    fn context_window_is_bounded() {
        let text = format!("{} target {}", "a".repeat(100), "b".repeat(100));
        let chars: Vec<char> = text.chars().collect();
        let ctx = context_window(&chars, 101, 6, 50);
        assert_eq!(ctx.chars().count(), 6 + 2 * 50);
        assert!(ctx.contains("target"));
    }

    #[test]
    fn entities_are_added_once() {
        let text = "Seen at Massachusetts General Hospital with \"ground glass\" pattern.";
        let seg = segment(
            SegmentBody::Qualitative {
                text: text.into(),
                subtype: TextSubtype::Body,
                language: None,
                word_count: 9,
                sentence_count: 1,
            },
            ElementMetadata::default(),
        );
        let (candidates, _) = extractor().extract(&seg);
        let entity = find(&candidates, "massachusetts general hospital").unwrap();
        // already an n-gram of the same text: no extra entity-weighted instance
        assert!(entity.instances.iter().all(|i| i.position_weight == 1.0));
        let quoted = find(&candidates, "ground glass").unwrap();
        assert!(quoted.instances.iter().all(|i| i.position_weight == 1.0));
    }

    #[test]
    fn long_entities_get_entity_weight() {
        let text = "Referred by Saint Mary Regional Medical Center today.";
        let seg = segment(
            SegmentBody::Qualitative {
                text: text.into(),
                subtype: TextSubtype::Body,
                language: None,
                word_count: 8,
                sentence_count: 1,
            },
            ElementMetadata::default(),
        );
        let (candidates, _) = extractor().extract(&seg);
        let entity = find(&candidates, "saint mary regional medical center").unwrap();
        assert_eq!(entity.instances[0].position_weight, ENTITY_WEIGHT);
        assert_eq!(entity.instances[0].position.char_offset, Some(12));
    }

    #[test]
    fn quantitative_columns_sample_values() {
        let mut schema = storage::models::FieldSchema::new();
        schema.insert("size_mm".into(), FieldType::Number);
        schema.insert("margin".into(), FieldType::String);
        schema.insert("shape".into(), FieldType::String);
        let payload = json!([
            {"size_mm": 4, "margin": "smooth", "shape": "smooth"},
            {"size_mm": "6.5mm", "margin": "spiculated", "shape": "round"},
        ]);
        let seg = segment(
            SegmentBody::Quantitative {
                payload,
                schema,
                numeric_density: 0.8,
            },
            ElementMetadata::default(),
        );
        let (candidates, _) = extractor().extract(&seg);

        let size = find(&candidates, "size_mm").unwrap();
        assert_eq!(size.instances[0].numeric_values, vec![4.0, 6.5]);
        assert_eq!(size.instances[0].context, "column: size_mm");
        assert_eq!(size.instances[0].position_weight, 1.0);

        let smooth = find(&candidates, "smooth").unwrap();
        assert_eq!(smooth.instances.len(), 2);
        assert!(smooth.instances.iter().all(|i| i.position_weight == ENUM_WEIGHT));
        assert!(find(&candidates, "round").is_none());
    }

    #[test]
    fn flagged_column_names_carry_header_weight() {
        let mut metadata = ElementMetadata::default();
        metadata
            .extra
            .insert(relevance::COLUMN_HEADER_FLAG.into(), true.into());
        let seg = segment(
            SegmentBody::Quantitative {
                payload: json!({"nodule_size": 5, "density": 40, "volume": 65}),
                schema: storage::models::FieldSchema::new(),
                numeric_density: 1.0,
            },
            metadata,
        );
        let (candidates, _) = extractor().extract(&seg);
        let density = find(&candidates, "density").unwrap();
        assert_eq!(density.instances[0].position_weight, 1.7);
        assert_eq!(density.instances[0].numeric_values, vec![40.0]);
    }

    #[test]
    fn phrases_of_only_stop_words_are_rejected() {
        let text = "Growth of the nodule in the upper lobe.";
        let seg = segment(
            SegmentBody::Qualitative {
                text: text.into(),
                subtype: TextSubtype::Body,
                language: Some("en".into()),
                word_count: 8,
                sentence_count: 1,
            },
            ElementMetadata::default(),
        );
        let (candidates, rejected) = extractor().extract(&seg);
        assert!(find(&candidates, "of the").is_none());
        assert!(find(&candidates, "in the").is_none());
        assert!(find(&candidates, "the nodule").is_some());
        assert!(find(&candidates, "upper lobe").is_some());
        assert!(rejected >= 4);
    }

    #[test]
    fn normalizer_folds_terms_and_adds_long_dictionary_terms() {
        let mut config = crate::config::NormalizerConfig::default();
        config
            .synonyms
            .insert("pulmonary".into(), vec!["lung".into()]);
        config.abbreviations.insert("GGO".into(), "ground glass opacity".into());
        config.multi_word_terms = vec!["right upper lobe apical segment".into()];
        let normalizer = Arc::new(KeywordNormalizer::from_config(&config));
        let extractor = extractor().with_normalizer(normalizer);

        let text = "Lung GGO seen in the right upper lobe apical segment.";
        let seg = segment(
            SegmentBody::Qualitative {
                text: text.into(),
                subtype: TextSubtype::Body,
                language: Some("en".into()),
                word_count: 10,
                sentence_count: 1,
            },
            ElementMetadata::default(),
        );
        let (candidates, _) = extractor.extract(&seg);

        assert!(find(&candidates, "lung").is_none());
        let pulmonary = find(&candidates, "pulmonary").unwrap();
        assert_eq!(pulmonary.term, "pulmonary");
        assert_eq!(pulmonary.instances[0].position.char_offset, Some(0));
        assert!(find(&candidates, "ground glass opacity").is_some());
        assert!(find(&candidates, "pulmonary ground glass opacity").is_some());

        let long = find(&candidates, "right upper lobe apical segment").unwrap();
        assert_eq!(long.instances.len(), 1);
        assert_eq!(long.instances[0].position.char_offset, Some(21));
    }

    #[test]
    fn sampled_values_are_capped() {
        let rows: Vec<Value> = (0..25).map(|i| json!({"v": i})).collect();
        let seg = segment(
            SegmentBody::Quantitative {
                payload: Value::Array(rows),
                schema: [("v".to_string(), FieldType::Number)].into_iter().collect(),
                numeric_density: 1.0,
            },
            ElementMetadata::default(),
        );
        let config = ExtractionConfig::default();
        let filter = StopWordFilter::default();
        let (candidates, _) = KeywordExtractor::new(config, filter).extract(&seg);
        // "v" is a single letter and filtered; sample cap shows on a longer name
        assert!(candidates.is_empty());

        let rows: Vec<Value> = (0..25).map(|i| json!({"value": i})).collect();
        let seg = segment(
            SegmentBody::Quantitative {
                payload: Value::Array(rows),
                schema: [("value".to_string(), FieldType::Number)].into_iter().collect(),
                numeric_density: 1.0,
            },
            ElementMetadata::default(),
        );
        let (candidates, _) = extractor().extract(&seg);
        assert_eq!(find(&candidates, "value").unwrap().instances[0].numeric_values.len(), 10);
    }

    #[test]
    fn mixed_keys_and_values() {
        let mut text_fields = Map::new();
        text_fields.insert("diagnosis".into(), json!("benign granuloma"));
        let mut numeric_fields = Map::new();
        numeric_fields.insert("age".into(), json!(45));
        numeric_fields.insert("diagnosis_code".into(), json!(3));
        let seg = segment(
            SegmentBody::Mixed {
                text_fields,
                numeric_fields,
                numeric_ratio: 0.5,
            },
            ElementMetadata::default(),
        );
        let (candidates, _) = extractor().extract(&seg);

        let diagnosis = find(&candidates, "diagnosis").unwrap();
        assert_eq!(diagnosis.instances[0].position_weight, TEXT_KEY_WEIGHT);
        assert_eq!(diagnosis.instances[0].numeric_values, vec![3.0]);

        let age = find(&candidates, "age").unwrap();
        assert_eq!(age.instances[0].position_weight, NUMERIC_KEY_WEIGHT);
        assert_eq!(age.instances[0].numeric_values, vec![45.0]);

        assert!(find(&candidates, "benign granuloma").is_some());
        assert_eq!(
            find(&candidates, "granuloma").unwrap().instances[0].position.field.as_deref(),
            Some("diagnosis")
        );
    }

    #[test]
    fn field_labels() {
        assert_eq!(field_label("findings.size_mm"), "size_mm");
        assert_eq!(field_label("rows[2].size_mm"), "size_mm");
        assert_eq!(field_label("tags[0]"), "tags");
        assert!(same_field("diagnosis", "diagnosis_code"));
        assert!(!same_field("age", "agency"));
    }
}
