//! Read paths over the keyword index.

use storage::models::{ContentSegment, ExtractedKeyword, FileId, KeywordOccurrence};
use storage::{Repository, StorageError};

use crate::normalizer::normalize_term;

/// Keywords whose normalized term contains `query`, most relevant first.
pub async fn search_keywords(
    repo: &dyn Repository,
    query: &str,
    limit: usize,
) -> Result<Vec<ExtractedKeyword>, StorageError> {
    let needle = normalize_term(query);
    if needle.is_empty() {
        return Ok(Vec::new());
    }
    repo.search_keywords(&needle, limit).await
}

pub async fn top_keywords(
    repo: &dyn Repository,
    limit: usize,
) -> Result<Vec<ExtractedKeyword>, StorageError> {
    let mut keywords = repo.list_keywords().await?;
    keywords.sort_by(|a, b| {
        b.relevance_score
            .total_cmp(&a.relevance_score)
            .then_with(|| a.normalized_term.cmp(&b.normalized_term))
    });
    keywords.truncate(limit);
    Ok(keywords)
}

/// Exact lookup by term, after normalization.
pub async fn find_keyword(
    repo: &dyn Repository,
    term: &str,
) -> Result<Option<ExtractedKeyword>, StorageError> {
    let normalized = normalize_term(term);
    if normalized.is_empty() {
        return Ok(None);
    }
    repo.get_keyword_by_term(&normalized).await
}

/// Every recorded occurrence of a term, with its context.
pub async fn keyword_occurrences(
    repo: &dyn Repository,
    term: &str,
) -> Result<Vec<KeywordOccurrence>, StorageError> {
    match find_keyword(repo, term).await? {
        Some(keyword) => repo.occurrences_for_keyword(keyword.id).await,
        None => Ok(Vec::new()),
    }
}

pub async fn search_segments(
    repo: &dyn Repository,
    query: &str,
    limit: usize,
) -> Result<Vec<ContentSegment>, StorageError> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    repo.search_segment_text(query.trim(), limit).await
}

pub async fn file_segments(
    repo: &dyn Repository,
    file_id: FileId,
) -> Result<Vec<ContentSegment>, StorageError> {
    repo.segments_for_file(file_id).await
}
