use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scan: ScanPaths,
    pub ingest: IngestConfig,
    pub classification: ClassificationConfig,
    pub extraction: ExtractionConfig,
    pub clustering: ClusteringConfig,
    pub stop_words: StopWordConfig,
    pub normalizer: NormalizerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "casefinder.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPaths {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Files processed in parallel by a batch.
    pub concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Density cut-offs separating the three segment kinds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub quantitative_threshold: f64,
    pub qualitative_threshold: f64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            quantitative_threshold: 0.70,
            qualitative_threshold: 0.30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NgramRange {
    pub min: usize,
    pub max: usize,
}

impl NgramRange {
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Characters of context kept on each side of an occurrence.
    pub context_window: usize,
    pub text_ngram: NgramRange,
    pub mixed_ngram: NgramRange,
    pub max_sampled_values: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            context_window: 50,
            text_ngram: NgramRange::new(1, 3),
            mixed_ngram: NgramRange::new(1, 2),
            max_sampled_values: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub min_co_occurrence: u32,
    pub min_keyword_count: usize,
    pub min_confidence_score: f64,
    pub require_cross_type_validation: bool,
    /// When set, only the most relevant keywords of each segment take part
    /// in pair counting.
    pub max_keywords_per_segment: Option<usize>,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_co_occurrence: 2,
            min_keyword_count: 3,
            min_confidence_score: 0.5,
            require_cross_type_validation: false,
            max_keywords_per_segment: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomStopWord {
    pub term: String,
    #[serde(default = "default_custom_category")]
    pub category: String,
}

fn default_custom_category() -> String {
    "custom".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StopWordConfig {
    pub custom: Vec<CustomStopWord>,
}

/// Term folding applied before keywords are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub expand_abbreviations: bool,
    /// JSON dictionary with `synonyms`, `abbreviations` and
    /// `multi_word_terms`; entries below take precedence.
    pub terms_file: Option<String>,
    /// Canonical term to its variants.
    pub synonyms: BTreeMap<String, Vec<String>>,
    pub abbreviations: BTreeMap<String, String>,
    pub multi_word_terms: Vec<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            expand_abbreviations: true,
            terms_file: None,
            synonyms: BTreeMap::new(),
            abbreviations: BTreeMap::new(),
            multi_word_terms: Vec::new(),
        }
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
