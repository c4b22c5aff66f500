//! Term folding applied before keywords are stored. Synonyms collapse to a
//! canonical term, known abbreviations expand, and configured multi-word
//! terms are located in running text.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, warn};

use crate::config::NormalizerConfig;

/// Lower-case, strip punctuation from the edges of every word, collapse
/// whitespace. Inner punctuation ("icd-10", "3/4") is kept.
pub fn normalize_term(term: &str) -> String {
    term.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Term dictionary file. Sections other than these are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TermDictionary {
    /// Canonical term to its variants.
    pub synonyms: BTreeMap<String, Vec<String>>,
    pub abbreviations: BTreeMap<String, String>,
    pub multi_word_terms: Vec<String>,
}

impl TermDictionary {
    /// Read a JSON dictionary. A missing or malformed file is logged and
    /// yields an empty dictionary.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "term dictionary not readable");
                return Self::default();
            }
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "term dictionary is malformed");
            Self::default()
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeywordNormalizer {
    /// Normalized variant to normalized canonical term.
    synonyms: HashMap<String, String>,
    abbreviations: HashMap<String, String>,
    multi_word_terms: Vec<Vec<String>>,
    expand_abbreviations: bool,
}

impl KeywordNormalizer {
    /// Dictionary file first, then inline entries, which win on conflict.
    pub fn from_config(config: &NormalizerConfig) -> Self {
        let mut normalizer = Self {
            expand_abbreviations: config.expand_abbreviations,
            ..Default::default()
        };
        if let Some(path) = &config.terms_file {
            normalizer.merge(TermDictionary::load(Path::new(path)));
        }
        normalizer.merge(TermDictionary {
            synonyms: config.synonyms.clone(),
            abbreviations: config.abbreviations.clone(),
            multi_word_terms: config.multi_word_terms.clone(),
        });
        debug!(
            synonyms = normalizer.synonyms.len(),
            abbreviations = normalizer.abbreviations.len(),
            multi_word_terms = normalizer.multi_word_terms.len(),
            "keyword normalizer ready"
        );
        normalizer
    }

    pub fn merge(&mut self, dictionary: TermDictionary) {
        for (canonical, variants) in dictionary.synonyms {
            let canonical = normalize_term(&canonical);
            if canonical.is_empty() {
                continue;
            }
            for variant in variants {
                let variant = normalize_term(&variant);
                if !variant.is_empty() && variant != canonical {
                    self.synonyms.insert(variant, canonical.clone());
                }
            }
        }
        for (abbreviation, expansion) in dictionary.abbreviations {
            let abbreviation = normalize_term(&abbreviation);
            let expansion = normalize_term(&expansion);
            if !abbreviation.is_empty() && !expansion.is_empty() {
                self.abbreviations.insert(abbreviation, expansion);
            }
        }
        for term in dictionary.multi_word_terms {
            let words: Vec<String> = normalize_term(&term)
                .split(' ')
                .map(str::to_string)
                .collect();
            if words.len() > 1 && !self.multi_word_terms.contains(&words) {
                self.multi_word_terms.push(words);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.synonyms.is_empty()
            && self.abbreviations.is_empty()
            && self.multi_word_terms.is_empty()
    }

    pub fn expand_abbreviation(&self, term: &str) -> Option<&str> {
        self.abbreviations
            .get(&normalize_term(term))
            .map(String::as_str)
    }

    /// Normalized, folded form of `term`. The whole term is looked up
    /// first, then each word on its own.
    pub fn canonical(&self, term: &str) -> String {
        let normalized = normalize_term(term);
        if let Some(whole) = self.fold(&normalized) {
            return whole.to_string();
        }
        normalized
            .split(' ')
            .map(|word| self.fold(word).unwrap_or(word))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn fold<'a>(&'a self, term: &'a str) -> Option<&'a str> {
        let expanded = self
            .expand_abbreviations
            .then(|| self.abbreviations.get(term))
            .flatten()
            .map(String::as_str);
        match self.synonyms.get(expanded.unwrap_or(term)) {
            Some(canonical) => Some(canonical.as_str()),
            None => expanded,
        }
    }

    /// The canonical term and every form that folds into it, sorted.
    pub fn all_forms(&self, term: &str) -> Vec<String> {
        let canonical = self.canonical(term);
        let mut forms = BTreeSet::from([canonical.clone(), normalize_term(term)]);
        forms.extend(
            self.synonyms
                .iter()
                .filter(|(_, c)| **c == canonical)
                .map(|(variant, _)| variant.clone()),
        );
        forms.extend(
            self.abbreviations
                .iter()
                .filter(|(_, e)| **e == canonical)
                .map(|(abbreviation, _)| abbreviation.clone()),
        );
        forms.remove("");
        forms.into_iter().collect()
    }

    pub fn is_multi_word_term(&self, term: &str) -> bool {
        let normalized = normalize_term(term);
        self.multi_word_terms.iter().any(|t| t.join(" ") == normalized)
    }

    /// Configured multi-word terms in a word sequence, as
    /// `(first word index, word count)` in order of appearance.
    pub fn multi_word_matches(&self, words: &[&str]) -> Vec<(usize, usize)> {
        let normalized: Vec<String> = words.iter().map(|w| normalize_term(w)).collect();
        let mut matches = Vec::new();
        for start in 0..normalized.len() {
            for term in &self.multi_word_terms {
                let end = start + term.len();
                if end <= normalized.len() && normalized[start..end] == term[..] {
                    matches.push((start, term.len()));
                }
            }
        }
        matches
    }

    pub fn detect_multi_word_terms(&self, text: &str) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        self.multi_word_matches(&words)
            .into_iter()
            .map(|(start, len)| normalize_term(&words[start..start + len].join(" ")))
            .collect()
    }
}
