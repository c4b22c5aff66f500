//! Stop-word filtering and the acceptance rule applied to every keyword
//! candidate before it is persisted.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use storage::models::StopWord;
use storage::{Repository, StorageError};
use tracing::{debug, info};

use crate::config::CustomStopWord;
use crate::normalizer::normalize_term;

const ENGLISH: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself",
    "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just",
    "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "theirs", "them",
    "themselves", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours", "yourself",
];

const NULL_LIKE: &[&str] = &[
    "null", "nil", "none", "n/a", "na", "nan", "undefined", "unknown", "missing", "empty", "-",
    "--", "?",
];

static ACRONYM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{2,6}$").expect("acronym pattern"));
static TECH_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]+\d+[A-Za-z]?$").expect("code pattern"));
static PROPER_NOUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][a-z]{3,}$").expect("proper noun pattern"));
static FRACTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+/\d+$").expect("fraction pattern"));
static DASH_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]+-\d+$").expect("dash code pattern"));
static SHORT_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,2}$").expect("number pattern"));

/// Built-in stop words: English function words and null-like literals.
pub fn default_stop_words() -> Vec<StopWord> {
    ENGLISH
        .iter()
        .map(|t| StopWord::new(*t, "english"))
        .chain(NULL_LIKE.iter().map(|t| StopWord::new(*t, "null_like")))
        .collect()
}

/// Seed the repository with the built-in set plus configured custom words
/// when it holds no active stop words yet. Returns the number written.
pub async fn seed_default_stop_words(
    repo: &dyn Repository,
    custom: &[CustomStopWord],
) -> Result<usize, StorageError> {
    if !repo.active_stop_words().await?.is_empty() {
        debug!("stop words already present, skipping seed");
        return Ok(0);
    }
    let words: Vec<StopWord> = default_stop_words()
        .into_iter()
        .chain(custom.iter().map(|c| StopWord::new(c.term.clone(), c.category.clone())))
        .collect();
    for word in &words {
        repo.upsert_stop_word(word).await?;
    }
    info!(count = words.len(), "seeded stop words");
    Ok(words.len())
}

#[derive(Debug, Clone, Default)]
pub struct StopWordFilter {
    words: HashSet<String>,
}

impl StopWordFilter {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            words: terms.into_iter().map(|t| normalize_term(t.as_ref())).collect(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(default_stop_words().iter().map(|w| w.term.as_str()))
    }

    /// Current active set from the repository.
    pub async fn load(repo: &dyn Repository) -> Result<Self, StorageError> {
        let words = repo.active_stop_words().await?;
        debug!(count = words.len(), "loaded stop words");
        Ok(Self::new(words.iter().map(|w| w.term.as_str())))
    }

    pub async fn reload(&mut self, repo: &dyn Repository) -> Result<(), StorageError> {
        *self = Self::load(repo).await?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn should_filter(&self, term: &str) -> bool {
        let normalized = normalize_term(term);
        let lowered = term.trim().to_lowercase();
        let mut chars = normalized.chars();
        let single_non_letter =
            matches!((chars.next(), chars.next()), (Some(c), None) if !c.is_alphabetic());

        self.words.contains(&normalized)
            || single_non_letter
            || SHORT_NUMBER_RE.is_match(&normalized)
            || normalized.chars().count() < 2
            || NULL_LIKE.contains(&normalized.as_str())
            || NULL_LIKE.contains(&lowered.as_str())
    }

    pub fn should_preserve(&self, term: &str) -> bool {
        let t = term.trim();
        ACRONYM_RE.is_match(t)
            || TECH_CODE_RE.is_match(t)
            || PROPER_NOUN_RE.is_match(t)
            || FRACTION_RE.is_match(t)
            || DASH_CODE_RE.is_match(t)
    }

    /// Preserve rules win over the stop list.
    pub fn accepts(&self, term: &str) -> bool {
        self.should_preserve(term) || !self.should_filter(term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::InMemoryRepository;

    #[test]
    fn filter_rules() {
        let f = StopWordFilter::with_defaults();
        assert!(f.should_filter("the"));
        assert!(f.should_filter("The."));
        assert!(f.should_filter("%"));
        assert!(f.should_filter("42"));
        assert!(f.should_filter("x"));
        assert!(f.should_filter("N/A"));
        assert!(f.should_filter("NaN"));
        assert!(!f.should_filter("nodule"));
        assert!(!f.should_filter("120"));
    }

    #[test]
    fn preserve_rules() {
        let f = StopWordFilter::default();
        for t in ["CT", "LIDC", "T2", "covid19", "Boston", "3/4", "ICD-10"] {
            assert!(f.should_preserve(t), "{t} should be preserved");
        }
        for t in ["ct", "Lung cancer", "The", "TOOLONGACRONYM", "5mm"] {
            assert!(!f.should_preserve(t), "{t} should not be preserved");
        }
    }

    #[test]
    fn preserve_wins_over_stop_list() {
        let f = StopWordFilter::new(["ct", "lidc"]);
        assert!(f.should_filter("CT"));
        assert!(f.accepts("CT"));
        assert!(!f.accepts("ct"));
        assert!(f.accepts("nodule"));
    }

    #[test]
    fn decisions_are_idempotent() {
        let f = StopWordFilter::with_defaults();
        for t in ["the", "CT", "nodule", "n/a"] {
            assert_eq!(f.accepts(t), f.accepts(t));
            assert_eq!(f.should_filter(&normalize_term(t)), f.should_filter(t));
        }
    }

    #[tokio::test]
    async fn seed_then_reload_picks_up_custom_words() {
        let repo = InMemoryRepository::new();
        let custom = vec![CustomStopWord {
            term: "patient".into(),
            category: "domain".into(),
        }];
        let written = seed_default_stop_words(&repo, &custom).await.unwrap();
        assert_eq!(written, ENGLISH.len() + NULL_LIKE.len() + 1);
        assert_eq!(seed_default_stop_words(&repo, &custom).await.unwrap(), 0);

        let mut f = StopWordFilter::default();
        assert!(!f.should_filter("patient"));
        f.reload(&repo).await.unwrap();
        assert!(f.should_filter("patient"));

        let mut off = StopWord::new("patient", "domain");
        off.active = false;
        repo.upsert_stop_word(&off).await.unwrap();
        f.reload(&repo).await.unwrap();
        assert!(!f.should_filter("patient"));
    }
}
