//! Entity types persisted by a [`Repository`](crate::Repository).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::StorageError;

pub type FileId = i64;
pub type SegmentId = i64;
pub type KeywordId = i64;
pub type PatternId = i64;

/// Lifecycle of a source file through the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Parsing,
    Analyzing,
    Extracting,
    Complete,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Parsing => "parsing",
            ProcessingStatus::Analyzing => "analyzing",
            ProcessingStatus::Extracting => "extracting",
            ProcessingStatus::Complete => "complete",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Complete | ProcessingStatus::Failed)
    }

    /// Forward edges of the pipeline state machine. Any non-terminal state
    /// may fail; re-import resets a record to `Pending` through registration,
    /// not through this table.
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        match (self, next) {
            (Pending, Parsing) | (Parsing, Analyzing) | (Analyzing, Extracting) => true,
            (Extracting, Complete) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => ProcessingStatus::Pending,
            "parsing" => ProcessingStatus::Parsing,
            "analyzing" => ProcessingStatus::Analyzing,
            "extracting" => ProcessingStatus::Extracting,
            "complete" => ProcessingStatus::Complete,
            "failed" => ProcessingStatus::Failed,
            other => return Err(StorageError::InvalidValue(format!("status '{other}'"))),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: FileId,
    pub filename: String,
    pub extension: Option<String>,
    pub byte_size: i64,
    pub content_hash: String,
    pub status: ProcessingStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSourceFile {
    pub filename: String,
    pub extension: Option<String>,
    pub byte_size: i64,
    pub content_hash: String,
}

/// Result of registering a file by content hash.
#[derive(Debug, Clone)]
pub struct Registration {
    pub file: SourceFile,
    /// False when an existing record with the same hash was refreshed.
    pub created: bool,
}

/// The three segment classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Quantitative,
    Qualitative,
    Mixed,
}

impl SegmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::Quantitative => "quantitative",
            SegmentKind::Qualitative => "qualitative",
            SegmentKind::Mixed => "mixed",
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quantitative" => Ok(SegmentKind::Quantitative),
            "qualitative" => Ok(SegmentKind::Qualitative),
            "mixed" => Ok(SegmentKind::Mixed),
            other => Err(StorageError::InvalidValue(format!("segment kind '{other}'"))),
        }
    }
}

/// Polymorphic reference to a segment: the id alone does not say which
/// variant it points at, so the discriminator travels with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentRef {
    pub id: SegmentId,
    pub kind: SegmentKind,
}

/// Where a parsed element sat in its source file. Format specific.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PositionLocator {
    LineRange { start: usize, end: usize },
    Page { page: u32 },
    SheetRow { sheet: String, row: usize },
    Path { path: String },
}

/// Structural role of a text-bearing element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSubtype {
    Title,
    Header,
    Abstract,
    Summary,
    Body,
    Caption,
    Other,
}

impl TextSubtype {
    pub fn is_heading(&self) -> bool {
        matches!(self, TextSubtype::Title | TextSubtype::Header)
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self, TextSubtype::Abstract | TextSubtype::Summary)
    }
}

/// Format-specific hints attached by a parser and carried onto the segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<TextSubtype>,
    /// First paragraph or section of its document.
    #[serde(default)]
    pub first_section: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Inferred type tag of a structured field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Number,
    Boolean,
    NumericString,
    Text,
    String,
    Array,
    Object,
    Unknown,
}

pub type FieldSchema = BTreeMap<String, FieldType>;

/// Variant payload of a segment. Fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentBody {
    Quantitative {
        payload: Value,
        schema: FieldSchema,
        numeric_density: f64,
    },
    Qualitative {
        text: String,
        subtype: TextSubtype,
        language: Option<String>,
        word_count: usize,
        sentence_count: usize,
    },
    Mixed {
        text_fields: Map<String, Value>,
        numeric_fields: Map<String, Value>,
        numeric_ratio: f64,
    },
}

impl SegmentBody {
    pub fn kind(&self) -> SegmentKind {
        match self {
            SegmentBody::Quantitative { .. } => SegmentKind::Quantitative,
            SegmentBody::Qualitative { .. } => SegmentKind::Qualitative,
            SegmentBody::Mixed { .. } => SegmentKind::Mixed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSegment {
    pub id: SegmentId,
    pub file_id: FileId,
    pub position_index: usize,
    pub locator: PositionLocator,
    pub metadata: ElementMetadata,
    pub confidence: f64,
    pub body: SegmentBody,
    pub created_at: DateTime<Utc>,
}

impl ContentSegment {
    pub fn kind(&self) -> SegmentKind {
        self.body.kind()
    }

    pub fn reference(&self) -> SegmentRef {
        SegmentRef {
            id: self.id,
            kind: self.kind(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSegment {
    pub file_id: FileId,
    pub position_index: usize,
    pub locator: PositionLocator,
    pub metadata: ElementMetadata,
    pub confidence: f64,
    pub body: SegmentBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedKeyword {
    pub id: KeywordId,
    pub normalized_term: String,
    pub term: String,
    pub is_phrase: bool,
    pub total_frequency: i64,
    pub document_frequency: i64,
    pub relevance_score: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Aggregates recomputed from a keyword's occurrences.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeywordAggregates {
    pub total_frequency: i64,
    pub document_frequency: i64,
    pub relevance_score: f64,
}

/// Location of one occurrence inside its segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OccurrencePosition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordOccurrence {
    pub id: i64,
    pub keyword_id: KeywordId,
    pub segment: SegmentRef,
    pub file_id: FileId,
    pub context: String,
    pub numeric_values: Vec<f64>,
    pub position: OccurrencePosition,
    pub position_weight: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOccurrence {
    pub keyword_id: KeywordId,
    pub segment: SegmentRef,
    pub file_id: FileId,
    pub context: String,
    pub numeric_values: Vec<f64>,
    pub position: OccurrencePosition,
    pub position_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternKeyword {
    pub keyword_id: KeywordId,
    pub term: String,
    pub frequency: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternVersion {
    pub version: u32,
    pub detected_at: DateTime<Utc>,
    pub confidence_score: f64,
    pub keyword_count: usize,
    pub segment_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasePattern {
    /// Zero until the repository assigns one.
    pub id: PatternId,
    pub signature: String,
    pub keywords: Vec<PatternKeyword>,
    pub segments: Vec<SegmentRef>,
    pub confidence_score: f64,
    pub cross_type_validated: bool,
    pub keyword_count: usize,
    pub segment_count: usize,
    pub file_count: usize,
    pub versions: Vec<PatternVersion>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CasePattern {
    pub fn keyword_ids(&self) -> impl Iterator<Item = KeywordId> + '_ {
        self.keywords.iter().map(|k| k.keyword_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopWord {
    pub term: String,
    pub category: String,
    pub active: bool,
}

impl StopWord {
    pub fn new(term: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            category: category.into(),
            active: true,
        }
    }
}
