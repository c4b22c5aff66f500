//! Persistence contract consumed by the ingestion core.
//!
//! | Entity | Write semantics |
//! |--------|-----------------|
//! | [`SourceFile`] | upsert by content hash |
//! | [`ContentSegment`] | append-only insert |
//! | [`ExtractedKeyword`] | upsert by normalized term, aggregates overwritten |
//! | [`KeywordOccurrence`] | append-only insert |
//! | [`CasePattern`] | upsert by signature |
//! | [`StopWord`] | upsert by term |
//!
//! Implementations must be `Send + Sync`; files are ingested concurrently
//! against one shared repository.

use async_trait::async_trait;

use crate::models::{
    CasePattern, ContentSegment, ExtractedKeyword, FileId, KeywordAggregates, KeywordId,
    KeywordOccurrence, NewOccurrence, NewSegment, NewSourceFile, PatternId, ProcessingStatus,
    Registration, SourceFile, StopWord,
};
use crate::Result;

#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert a `pending` file, or reset the existing record with the same
    /// content hash back to `pending`.
    async fn register_source_file(&self, file: &NewSourceFile) -> Result<Registration>;

    async fn get_source_file(&self, id: FileId) -> Result<Option<SourceFile>>;

    async fn set_file_status(
        &self,
        id: FileId,
        status: ProcessingStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    async fn count_files_with_status(&self, status: ProcessingStatus) -> Result<i64>;

    /// Drop the segments and occurrences a previous import of this file
    /// produced. Returns the keywords whose occurrences were removed.
    async fn clear_file_content(&self, id: FileId) -> Result<Vec<KeywordId>>;

    async fn insert_segment(&self, segment: &NewSegment) -> Result<ContentSegment>;

    /// Segments of one file in position order.
    async fn segments_for_file(&self, file_id: FileId) -> Result<Vec<ContentSegment>>;

    /// Case-insensitive substring search over qualitative segment text.
    async fn search_segment_text(&self, query: &str, limit: usize) -> Result<Vec<ContentSegment>>;

    /// Insert the keyword if its normalized term is new, otherwise bump
    /// `last_seen`. Aggregates are left to [`update_keyword_aggregates`].
    ///
    /// [`update_keyword_aggregates`]: Repository::update_keyword_aggregates
    async fn upsert_keyword(
        &self,
        normalized_term: &str,
        term: &str,
        is_phrase: bool,
    ) -> Result<ExtractedKeyword>;

    async fn get_keyword(&self, id: KeywordId) -> Result<Option<ExtractedKeyword>>;

    /// Exact lookup by normalized term.
    async fn get_keyword_by_term(&self, normalized_term: &str)
        -> Result<Option<ExtractedKeyword>>;

    async fn list_keywords(&self) -> Result<Vec<ExtractedKeyword>>;

    /// Case-insensitive substring search over normalized terms, best
    /// relevance first.
    async fn search_keywords(&self, query: &str, limit: usize) -> Result<Vec<ExtractedKeyword>>;

    async fn update_keyword_aggregates(
        &self,
        id: KeywordId,
        aggregates: KeywordAggregates,
    ) -> Result<()>;

    async fn insert_occurrence(&self, occurrence: &NewOccurrence) -> Result<KeywordOccurrence>;

    async fn occurrences_for_keyword(&self, id: KeywordId) -> Result<Vec<KeywordOccurrence>>;

    async fn all_occurrences(&self) -> Result<Vec<KeywordOccurrence>>;

    async fn get_case_pattern(&self, id: PatternId) -> Result<Option<CasePattern>>;

    async fn find_case_pattern_by_signature(&self, signature: &str)
        -> Result<Option<CasePattern>>;

    /// Upsert by signature. The returned pattern carries its assigned id.
    async fn save_case_pattern(&self, pattern: &CasePattern) -> Result<CasePattern>;

    async fn list_case_patterns(&self) -> Result<Vec<CasePattern>>;

    async fn active_stop_words(&self) -> Result<Vec<StopWord>>;

    async fn upsert_stop_word(&self, word: &StopWord) -> Result<()>;
}
