//! In-memory [`Repository`] implementation for tests and embedding.
//!
//! All tables live in one `State` behind a `std::sync::RwLock`, so every
//! call observes a consistent snapshot. Text search is a brute-force
//! lower-cased substring scan.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::models::{
    CasePattern, ContentSegment, ExtractedKeyword, FileId, KeywordAggregates, KeywordId,
    KeywordOccurrence, NewOccurrence, NewSegment, NewSourceFile, PatternId, ProcessingStatus,
    Registration, SegmentBody, SourceFile, StopWord,
};
use crate::{Repository, Result, StorageError};

#[derive(Default)]
struct State {
    next_id: i64,
    files: BTreeMap<FileId, SourceFile>,
    segments: BTreeMap<i64, ContentSegment>,
    keywords: BTreeMap<KeywordId, ExtractedKeyword>,
    keyword_by_term: HashMap<String, KeywordId>,
    occurrences: Vec<KeywordOccurrence>,
    patterns: BTreeMap<PatternId, CasePattern>,
    stop_words: BTreeMap<String, StopWord>,
}

impl State {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Repository backed by process memory.
#[derive(Default)]
pub struct InMemoryRepository {
    state: RwLock<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| StorageError::LockPoisoned)
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn register_source_file(&self, file: &NewSourceFile) -> Result<Registration> {
        let mut state = self.write()?;
        let now = Utc::now();
        if let Some(existing) = state
            .files
            .values_mut()
            .find(|f| f.content_hash == file.content_hash)
        {
            existing.status = ProcessingStatus::Pending;
            existing.error_message = None;
            existing.updated_at = now;
            return Ok(Registration {
                file: existing.clone(),
                created: false,
            });
        }
        let id = state.allocate_id();
        let record = SourceFile {
            id,
            filename: file.filename.clone(),
            extension: file.extension.clone(),
            byte_size: file.byte_size,
            content_hash: file.content_hash.clone(),
            status: ProcessingStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        state.files.insert(id, record.clone());
        Ok(Registration {
            file: record,
            created: true,
        })
    }

    async fn get_source_file(&self, id: FileId) -> Result<Option<SourceFile>> {
        Ok(self.read()?.files.get(&id).cloned())
    }

    async fn set_file_status(
        &self,
        id: FileId,
        status: ProcessingStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut state = self.write()?;
        let file = state.files.get_mut(&id).ok_or(StorageError::NotFound {
            entity: "source file",
            id,
        })?;
        file.status = status;
        file.error_message = error_message.map(str::to_string);
        file.updated_at = Utc::now();
        Ok(())
    }

    async fn count_files_with_status(&self, status: ProcessingStatus) -> Result<i64> {
        Ok(self
            .read()?
            .files
            .values()
            .filter(|f| f.status == status)
            .count() as i64)
    }

    async fn clear_file_content(&self, id: FileId) -> Result<Vec<KeywordId>> {
        let mut state = self.write()?;
        state.segments.retain(|_, s| s.file_id != id);
        let mut touched = BTreeSet::new();
        state.occurrences.retain(|o| {
            if o.file_id == id {
                touched.insert(o.keyword_id);
                false
            } else {
                true
            }
        });
        Ok(touched.into_iter().collect())
    }

    async fn insert_segment(&self, segment: &NewSegment) -> Result<ContentSegment> {
        let mut state = self.write()?;
        let id = state.allocate_id();
        let stored = ContentSegment {
            id,
            file_id: segment.file_id,
            position_index: segment.position_index,
            locator: segment.locator.clone(),
            metadata: segment.metadata.clone(),
            confidence: segment.confidence,
            body: segment.body.clone(),
            created_at: Utc::now(),
        };
        state.segments.insert(id, stored.clone());
        Ok(stored)
    }

    async fn segments_for_file(&self, file_id: FileId) -> Result<Vec<ContentSegment>> {
        let mut segments: Vec<ContentSegment> = self
            .read()?
            .segments
            .values()
            .filter(|s| s.file_id == file_id)
            .cloned()
            .collect();
        segments.sort_by_key(|s| s.position_index);
        Ok(segments)
    }

    async fn search_segment_text(&self, query: &str, limit: usize) -> Result<Vec<ContentSegment>> {
        let needle = query.to_lowercase();
        if needle.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .read()?
            .segments
            .values()
            .filter(|s| match &s.body {
                SegmentBody::Qualitative { text, .. } => text.to_lowercase().contains(&needle),
                _ => false,
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn upsert_keyword(
        &self,
        normalized_term: &str,
        term: &str,
        is_phrase: bool,
    ) -> Result<ExtractedKeyword> {
        let mut state = self.write()?;
        let now = Utc::now();
        if let Some(id) = state.keyword_by_term.get(normalized_term).copied() {
            if let Some(keyword) = state.keywords.get_mut(&id) {
                keyword.last_seen = now;
                return Ok(keyword.clone());
            }
        }
        let id = state.allocate_id();
        let keyword = ExtractedKeyword {
            id,
            normalized_term: normalized_term.to_string(),
            term: term.to_string(),
            is_phrase,
            total_frequency: 0,
            document_frequency: 0,
            relevance_score: 0.0,
            first_seen: now,
            last_seen: now,
        };
        state.keyword_by_term.insert(normalized_term.to_string(), id);
        state.keywords.insert(id, keyword.clone());
        Ok(keyword)
    }

    async fn get_keyword(&self, id: KeywordId) -> Result<Option<ExtractedKeyword>> {
        Ok(self.read()?.keywords.get(&id).cloned())
    }

    async fn get_keyword_by_term(
        &self,
        normalized_term: &str,
    ) -> Result<Option<ExtractedKeyword>> {
        let state = self.read()?;
        Ok(state
            .keyword_by_term
            .get(normalized_term)
            .and_then(|id| state.keywords.get(id))
            .cloned())
    }

    async fn list_keywords(&self) -> Result<Vec<ExtractedKeyword>> {
        Ok(self.read()?.keywords.values().cloned().collect())
    }

    async fn search_keywords(&self, query: &str, limit: usize) -> Result<Vec<ExtractedKeyword>> {
        let needle = query.to_lowercase();
        let mut hits: Vec<ExtractedKeyword> = self
            .read()?
            .keywords
            .values()
            .filter(|k| k.normalized_term.contains(&needle))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn update_keyword_aggregates(
        &self,
        id: KeywordId,
        aggregates: KeywordAggregates,
    ) -> Result<()> {
        let mut state = self.write()?;
        let keyword = state.keywords.get_mut(&id).ok_or(StorageError::NotFound {
            entity: "keyword",
            id,
        })?;
        keyword.total_frequency = aggregates.total_frequency;
        keyword.document_frequency = aggregates.document_frequency;
        keyword.relevance_score = aggregates.relevance_score;
        Ok(())
    }

    async fn insert_occurrence(&self, occurrence: &NewOccurrence) -> Result<KeywordOccurrence> {
        let mut state = self.write()?;
        if !state.keywords.contains_key(&occurrence.keyword_id) {
            return Err(StorageError::NotFound {
                entity: "keyword",
                id: occurrence.keyword_id,
            });
        }
        let id = state.allocate_id();
        let stored = KeywordOccurrence {
            id,
            keyword_id: occurrence.keyword_id,
            segment: occurrence.segment,
            file_id: occurrence.file_id,
            context: occurrence.context.clone(),
            numeric_values: occurrence.numeric_values.clone(),
            position: occurrence.position.clone(),
            position_weight: occurrence.position_weight,
            created_at: Utc::now(),
        };
        state.occurrences.push(stored.clone());
        Ok(stored)
    }

    async fn occurrences_for_keyword(&self, id: KeywordId) -> Result<Vec<KeywordOccurrence>> {
        Ok(self
            .read()?
            .occurrences
            .iter()
            .filter(|o| o.keyword_id == id)
            .cloned()
            .collect())
    }

    async fn all_occurrences(&self) -> Result<Vec<KeywordOccurrence>> {
        Ok(self.read()?.occurrences.clone())
    }

    async fn get_case_pattern(&self, id: PatternId) -> Result<Option<CasePattern>> {
        Ok(self.read()?.patterns.get(&id).cloned())
    }

    async fn find_case_pattern_by_signature(
        &self,
        signature: &str,
    ) -> Result<Option<CasePattern>> {
        Ok(self
            .read()?
            .patterns
            .values()
            .find(|p| p.signature == signature)
            .cloned())
    }

    async fn save_case_pattern(&self, pattern: &CasePattern) -> Result<CasePattern> {
        let mut state = self.write()?;
        let existing = state
            .patterns
            .values()
            .find(|p| p.signature == pattern.signature)
            .map(|p| (p.id, p.created_at));
        let mut stored = pattern.clone();
        match existing {
            Some((id, created_at)) => {
                stored.id = id;
                stored.created_at = created_at;
            }
            None => stored.id = state.allocate_id(),
        }
        state.patterns.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_case_patterns(&self) -> Result<Vec<CasePattern>> {
        Ok(self.read()?.patterns.values().cloned().collect())
    }

    async fn active_stop_words(&self) -> Result<Vec<StopWord>> {
        Ok(self
            .read()?
            .stop_words
            .values()
            .filter(|w| w.active)
            .cloned()
            .collect())
    }

    async fn upsert_stop_word(&self, word: &StopWord) -> Result<()> {
        let mut state = self.write()?;
        state
            .stop_words
            .insert(word.term.to_lowercase(), word.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ElementMetadata, PositionLocator, SegmentKind, SegmentRef};

    fn new_file(name: &str, hash: &str) -> NewSourceFile {
        NewSourceFile {
            filename: name.to_string(),
            extension: Some("txt".to_string()),
            byte_size: 10,
            content_hash: hash.to_string(),
        }
    }

    #[tokio::test]
    async fn same_hash_reuses_record() {
        let repo = InMemoryRepository::new();
        let first = repo.register_source_file(&new_file("a.txt", "h1")).await.unwrap();
        repo.set_file_status(first.file.id, ProcessingStatus::Failed, Some("boom"))
            .await
            .unwrap();
        let second = repo.register_source_file(&new_file("a.txt", "h1")).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.file.id, second.file.id);
        assert_eq!(second.file.status, ProcessingStatus::Pending);
        assert!(second.file.error_message.is_none());
    }

    #[tokio::test]
    async fn different_hash_same_name_is_independent() {
        let repo = InMemoryRepository::new();
        let a = repo.register_source_file(&new_file("a.txt", "h1")).await.unwrap();
        let b = repo.register_source_file(&new_file("a.txt", "h2")).await.unwrap();
        assert_ne!(a.file.id, b.file.id);
    }

    #[tokio::test]
    async fn clearing_a_file_reports_touched_keywords() {
        let repo = InMemoryRepository::new();
        let file = repo.register_source_file(&new_file("a.txt", "h1")).await.unwrap().file;
        let segment = repo
            .insert_segment(&NewSegment {
                file_id: file.id,
                position_index: 0,
                locator: PositionLocator::LineRange { start: 1, end: 1 },
                metadata: ElementMetadata::default(),
                confidence: 0.95,
                body: SegmentBody::Qualitative {
                    text: "nodule".into(),
                    subtype: crate::models::TextSubtype::Body,
                    language: None,
                    word_count: 1,
                    sentence_count: 0,
                },
            })
            .await
            .unwrap();
        let keyword = repo.upsert_keyword("nodule", "nodule", false).await.unwrap();
        repo.insert_occurrence(&NewOccurrence {
            keyword_id: keyword.id,
            segment: SegmentRef {
                id: segment.id,
                kind: SegmentKind::Qualitative,
            },
            file_id: file.id,
            context: "nodule".into(),
            numeric_values: vec![],
            position: Default::default(),
            position_weight: 1.0,
        })
        .await
        .unwrap();

        let touched = repo.clear_file_content(file.id).await.unwrap();
        assert_eq!(touched, vec![keyword.id]);
        assert!(repo.segments_for_file(file.id).await.unwrap().is_empty());
        assert!(repo.all_occurrences().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keyword_lookup_by_term_is_exact() {
        let repo = InMemoryRepository::new();
        let nodule = repo.upsert_keyword("nodule", "Nodule", false).await.unwrap();
        repo.upsert_keyword("nodule size", "nodule size", true).await.unwrap();

        let found = repo.get_keyword_by_term("nodule").await.unwrap().unwrap();
        assert_eq!(found.id, nodule.id);
        assert!(repo.get_keyword_by_term("nod").await.unwrap().is_none());
    }
}
