//! Position weights and keyword relevance.
//!
//! `score = tf × idf × avg_position_weight × cross_type_bonus × numeric_weight`,
//! capped at [`MAX_RELEVANCE`]. The corpus size is always passed in by the
//! caller.

use std::collections::{BTreeSet, HashSet};
use storage::models::{
    ElementMetadata, KeywordAggregates, KeywordId, KeywordOccurrence, ProcessingStatus,
    SegmentKind,
};
use storage::{Repository, StorageError};
use tracing::{debug, info};

pub const MAX_RELEVANCE: f64 = 1000.0;
pub const MAX_POSITION_WEIGHT: f64 = 3.0;

/// Structural prominence of one occurrence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionFactors {
    pub heading: bool,
    pub first_section: bool,
    pub first_page: bool,
    pub abstract_like: bool,
    pub column_header: bool,
    pub structural_key: bool,
}

/// Metadata flag set by parsers whose element keys are table column names.
pub const COLUMN_HEADER_FLAG: &str = "column_header";
/// Metadata flag set by parsers whose element keys are structural keys.
pub const STRUCTURAL_KEY_FLAG: &str = "structural_key";

impl PositionFactors {
    /// Factors for text content of the element a segment was built from.
    pub fn from_metadata(metadata: &ElementMetadata) -> Self {
        Self {
            heading: metadata.subtype.is_some_and(|s| s.is_heading()),
            first_section: metadata.first_section,
            first_page: metadata.page == Some(1),
            abstract_like: metadata.subtype.is_some_and(|s| s.is_abstract()),
            ..Default::default()
        }
    }

    /// Factors for the field names of a structured element: column
    /// headers or structural keys, as flagged by the parser.
    pub fn for_field_names(metadata: &ElementMetadata) -> Self {
        let flag = |key: &str| metadata.extra.get(key).and_then(|v| v.as_bool()).unwrap_or(false);
        Self {
            first_page: metadata.page == Some(1),
            column_header: flag(COLUMN_HEADER_FLAG),
            structural_key: flag(STRUCTURAL_KEY_FLAG),
            ..Default::default()
        }
    }

    pub fn weight(&self) -> f64 {
        let mut weight: f64 = 1.0;
        if self.heading {
            weight *= 2.0;
        }
        if self.first_section {
            weight *= 1.5;
        }
        if self.first_page {
            weight *= 1.3;
        }
        if self.abstract_like {
            weight *= 1.8;
        }
        if self.column_header {
            weight *= 1.7;
        }
        if self.structural_key {
            weight *= 1.6;
        }
        weight.min(MAX_POSITION_WEIGHT)
    }
}

pub fn cross_type_bonus(kinds: &BTreeSet<SegmentKind>) -> f64 {
    use SegmentKind::*;
    match kinds.len() {
        3 => 2.0,
        2 if kinds.contains(&Quantitative) && kinds.contains(&Qualitative) => 1.8,
        2 => 1.5,
        _ => 1.0,
    }
}

/// `ln(N / df)`, zero when either side is zero and never negative.
pub fn idf(total_documents: i64, document_frequency: i64) -> f64 {
    if total_documents <= 0 || document_frequency <= 0 {
        return 0.0;
    }
    (total_documents as f64 / document_frequency as f64).ln().max(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelevanceInputs {
    pub term_frequency: i64,
    pub document_frequency: i64,
    pub total_documents: i64,
    pub avg_position_weight: f64,
    pub cross_type_bonus: f64,
    pub numeric_weight: f64,
}

impl RelevanceInputs {
    pub fn from_occurrences(occurrences: &[KeywordOccurrence], total_documents: i64) -> Self {
        let tf = occurrences.len();
        let files: HashSet<_> = occurrences.iter().map(|o| o.file_id).collect();
        let kinds: BTreeSet<_> = occurrences.iter().map(|o| o.segment.kind).collect();
        let with_numbers = occurrences.iter().filter(|o| !o.numeric_values.is_empty()).count();

        let (avg_position_weight, numeric_share) = if tf == 0 {
            (0.0, 0.0)
        } else {
            let total: f64 = occurrences.iter().map(|o| o.position_weight).sum();
            (total / tf as f64, with_numbers as f64 / tf as f64)
        };

        Self {
            term_frequency: tf as i64,
            document_frequency: files.len() as i64,
            total_documents,
            avg_position_weight,
            cross_type_bonus: cross_type_bonus(&kinds),
            numeric_weight: 1.0 + 0.5 * numeric_share,
        }
    }

    pub fn score(&self) -> f64 {
        let raw = self.term_frequency as f64
            * idf(self.total_documents, self.document_frequency)
            * self.avg_position_weight
            * self.cross_type_bonus
            * self.numeric_weight;
        raw.min(MAX_RELEVANCE)
    }

    pub fn aggregates(&self) -> KeywordAggregates {
        KeywordAggregates {
            total_frequency: self.term_frequency,
            document_frequency: self.document_frequency,
            relevance_score: self.score(),
        }
    }
}

/// Re-derive one keyword's aggregates from its stored occurrences and
/// persist them.
pub async fn recompute_keyword(
    repo: &dyn Repository,
    id: KeywordId,
    total_documents: i64,
) -> Result<KeywordAggregates, StorageError> {
    let occurrences = repo.occurrences_for_keyword(id).await?;
    let aggregates = RelevanceInputs::from_occurrences(&occurrences, total_documents).aggregates();
    repo.update_keyword_aggregates(id, aggregates).await?;
    Ok(aggregates)
}

/// Corpus-wide pass over every stored keyword. `N` is the number of files
/// in `complete` state at the start of the pass.
pub async fn recompute_all(repo: &dyn Repository) -> Result<usize, StorageError> {
    let total_documents = repo.count_files_with_status(ProcessingStatus::Complete).await?;
    let keywords = repo.list_keywords().await?;
    for keyword in &keywords {
        let aggregates = recompute_keyword(repo, keyword.id, total_documents).await?;
        debug!(keyword = %keyword.normalized_term, score = aggregates.relevance_score, "rescored");
    }
    info!(keywords = keywords.len(), total_documents, "relevance recompute finished");
    Ok(keywords.len())
}
