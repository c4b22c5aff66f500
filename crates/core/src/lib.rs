//! Core library: parsing, segment classification, keyword extraction,
//! relevance scoring and case-pattern detection.

pub mod analyzer;
pub mod classifier;
pub mod config;
pub mod error;
pub mod extractor;
pub mod normalizer;
pub mod parser;
pub mod patterns;
pub mod pipeline;
pub mod relevance;
pub mod scanner;
pub mod search;
pub mod stopwords;

pub use analyzer::{ContentAnalysis, ContentAnalyzer};
pub use classifier::{Classification, SegmentClassifier};
pub use error::{ClassificationError, ExtractionError, ParseError, PipelineError};
pub use extractor::KeywordExtractor;
pub use normalizer::KeywordNormalizer;
pub use patterns::CasePatternDetector;
pub use pipeline::{ProcessOutcome, UnifiedFileProcessor};
pub use stopwords::StopWordFilter;
