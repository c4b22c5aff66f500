//! SQLite [`Repository`] backed by an sqlx pool.
//!
//! Structured columns (segment bodies, locators, pattern members) are
//! stored as JSON text. Timestamps are epoch milliseconds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{
    CasePattern, ContentSegment, ExtractedKeyword, FileId, KeywordAggregates, KeywordId,
    KeywordOccurrence, NewOccurrence, NewSegment, NewSourceFile, PatternId, ProcessingStatus,
    Registration, SegmentBody, SegmentRef, SourceFile, StopWord,
};
use crate::{Repository, Result, StorageError};

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect, run migrations and wrap the pool.
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = crate::connect(database_url).await?;
        crate::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(value: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| StorageError::InvalidValue(format!("timestamp {value}")))
}

fn file_from_row(row: &SqliteRow) -> Result<SourceFile> {
    Ok(SourceFile {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        extension: row.try_get("extension")?,
        byte_size: row.try_get("byte_size")?,
        content_hash: row.try_get("content_hash")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        error_message: row.try_get("error_message")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

fn segment_from_row(row: &SqliteRow) -> Result<ContentSegment> {
    let body: SegmentBody = serde_json::from_str(&row.try_get::<String, _>("body_json")?)?;
    Ok(ContentSegment {
        id: row.try_get("id")?,
        file_id: row.try_get("file_id")?,
        position_index: row.try_get::<i64, _>("position_index")? as usize,
        locator: serde_json::from_str(&row.try_get::<String, _>("locator_json")?)?,
        metadata: serde_json::from_str(&row.try_get::<String, _>("metadata_json")?)?,
        confidence: row.try_get("confidence")?,
        body,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

/// `LIMIT` bind value; sizes beyond `i64` mean no limit.
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn keyword_from_row(row: &SqliteRow) -> Result<ExtractedKeyword> {
    Ok(ExtractedKeyword {
        id: row.try_get("id")?,
        normalized_term: row.try_get("normalized_term")?,
        term: row.try_get("term")?,
        is_phrase: row.try_get("is_phrase")?,
        total_frequency: row.try_get("total_frequency")?,
        document_frequency: row.try_get("document_frequency")?,
        relevance_score: row.try_get("relevance_score")?,
        first_seen: from_millis(row.try_get("first_seen")?)?,
        last_seen: from_millis(row.try_get("last_seen")?)?,
    })
}

fn occurrence_from_row(row: &SqliteRow) -> Result<KeywordOccurrence> {
    Ok(KeywordOccurrence {
        id: row.try_get("id")?,
        keyword_id: row.try_get("keyword_id")?,
        segment: SegmentRef {
            id: row.try_get("segment_id")?,
            kind: row.try_get::<String, _>("segment_kind")?.parse()?,
        },
        file_id: row.try_get("file_id")?,
        context: row.try_get("context")?,
        numeric_values: serde_json::from_str(&row.try_get::<String, _>("numeric_values_json")?)?,
        position: serde_json::from_str(&row.try_get::<String, _>("position_json")?)?,
        position_weight: row.try_get("position_weight")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn pattern_from_row(row: &SqliteRow) -> Result<CasePattern> {
    Ok(CasePattern {
        id: row.try_get("id")?,
        signature: row.try_get("signature")?,
        keywords: serde_json::from_str(&row.try_get::<String, _>("keywords_json")?)?,
        segments: serde_json::from_str(&row.try_get::<String, _>("segments_json")?)?,
        confidence_score: row.try_get("confidence_score")?,
        cross_type_validated: row.try_get("cross_type_validated")?,
        keyword_count: row.try_get::<i64, _>("keyword_count")? as usize,
        segment_count: row.try_get::<i64, _>("segment_count")? as usize,
        file_count: row.try_get::<i64, _>("file_count")? as usize,
        versions: serde_json::from_str(&row.try_get::<String, _>("versions_json")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn register_source_file(&self, file: &NewSourceFile) -> Result<Registration> {
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM source_files WHERE content_hash = ?1")
                .bind(&file.content_hash)
                .fetch_optional(&self.pool)
                .await?;

        sqlx::query(
            r#"
            INSERT INTO source_files (filename, extension, byte_size, content_hash, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)
            ON CONFLICT(content_hash) DO UPDATE SET
                status = 'pending',
                error_message = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&file.filename)
        .bind(&file.extension)
        .bind(file.byte_size)
        .bind(&file.content_hash)
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM source_files WHERE content_hash = ?1")
            .bind(&file.content_hash)
            .fetch_one(&self.pool)
            .await?;
        Ok(Registration {
            file: file_from_row(&row)?,
            created: existing.is_none(),
        })
    }

    async fn get_source_file(&self, id: FileId) -> Result<Option<SourceFile>> {
        let row = sqlx::query("SELECT * FROM source_files WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(file_from_row).transpose()
    }

    async fn set_file_status(
        &self,
        id: FileId,
        status: ProcessingStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let res = sqlx::query(
            "UPDATE source_files SET status = ?2, error_message = ?3, updated_at = ?4 WHERE id = ?1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                entity: "source file",
                id,
            });
        }
        Ok(())
    }

    async fn count_files_with_status(&self, status: ProcessingStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM source_files WHERE status = ?1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn clear_file_content(&self, id: FileId) -> Result<Vec<KeywordId>> {
        let mut tx = self.pool.begin().await?;
        let touched: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT keyword_id FROM keyword_occurrences WHERE file_id = ?1 ORDER BY keyword_id",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM keyword_occurrences WHERE file_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM content_segments WHERE file_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(touched)
    }

    async fn insert_segment(&self, segment: &NewSegment) -> Result<ContentSegment> {
        let search_text = match &segment.body {
            SegmentBody::Qualitative { text, .. } => Some(text.as_str()),
            _ => None,
        };
        let now = Utc::now();
        let res = sqlx::query(
            r#"
            INSERT INTO content_segments
                (file_id, kind, position_index, locator_json, metadata_json, confidence, body_json, search_text, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(segment.file_id)
        .bind(segment.body.kind().as_str())
        .bind(segment.position_index as i64)
        .bind(serde_json::to_string(&segment.locator)?)
        .bind(serde_json::to_string(&segment.metadata)?)
        .bind(segment.confidence)
        .bind(serde_json::to_string(&segment.body)?)
        .bind(search_text)
        .bind(millis(now))
        .execute(&self.pool)
        .await?;

        Ok(ContentSegment {
            id: res.last_insert_rowid(),
            file_id: segment.file_id,
            position_index: segment.position_index,
            locator: segment.locator.clone(),
            metadata: segment.metadata.clone(),
            confidence: segment.confidence,
            body: segment.body.clone(),
            created_at: from_millis(millis(now))?,
        })
    }

    async fn segments_for_file(&self, file_id: FileId) -> Result<Vec<ContentSegment>> {
        let rows = sqlx::query(
            "SELECT * FROM content_segments WHERE file_id = ?1 ORDER BY position_index, id",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(segment_from_row).collect()
    }

    async fn search_segment_text(&self, query: &str, limit: usize) -> Result<Vec<ContentSegment>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT * FROM content_segments
            WHERE search_text IS NOT NULL AND instr(lower(search_text), lower(?1)) > 0
            ORDER BY id
            LIMIT ?2
            "#,
        )
        .bind(query)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(segment_from_row).collect()
    }

    async fn upsert_keyword(
        &self,
        normalized_term: &str,
        term: &str,
        is_phrase: bool,
    ) -> Result<ExtractedKeyword> {
        sqlx::query(
            r#"
            INSERT INTO keywords (normalized_term, term, is_phrase, first_seen, last_seen)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(normalized_term) DO UPDATE SET last_seen = excluded.last_seen
            "#,
        )
        .bind(normalized_term)
        .bind(term)
        .bind(is_phrase)
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM keywords WHERE normalized_term = ?1")
            .bind(normalized_term)
            .fetch_one(&self.pool)
            .await?;
        keyword_from_row(&row)
    }

    async fn get_keyword(&self, id: KeywordId) -> Result<Option<ExtractedKeyword>> {
        let row = sqlx::query("SELECT * FROM keywords WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(keyword_from_row).transpose()
    }

    async fn get_keyword_by_term(
        &self,
        normalized_term: &str,
    ) -> Result<Option<ExtractedKeyword>> {
        let row = sqlx::query("SELECT * FROM keywords WHERE normalized_term = ?1")
            .bind(normalized_term)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(keyword_from_row).transpose()
    }

    async fn list_keywords(&self) -> Result<Vec<ExtractedKeyword>> {
        let rows = sqlx::query("SELECT * FROM keywords ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(keyword_from_row).collect()
    }

    async fn search_keywords(&self, query: &str, limit: usize) -> Result<Vec<ExtractedKeyword>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM keywords
            WHERE instr(normalized_term, lower(?1)) > 0
            ORDER BY relevance_score DESC, id
            LIMIT ?2
            "#,
        )
        .bind(query)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(keyword_from_row).collect()
    }

    async fn update_keyword_aggregates(
        &self,
        id: KeywordId,
        aggregates: KeywordAggregates,
    ) -> Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE keywords
            SET total_frequency = ?2, document_frequency = ?3, relevance_score = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(aggregates.total_frequency)
        .bind(aggregates.document_frequency)
        .bind(aggregates.relevance_score)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                entity: "keyword",
                id,
            });
        }
        Ok(())
    }

    async fn insert_occurrence(&self, occurrence: &NewOccurrence) -> Result<KeywordOccurrence> {
        let now = Utc::now();
        let res = sqlx::query(
            r#"
            INSERT INTO keyword_occurrences
                (keyword_id, segment_id, segment_kind, file_id, context, numeric_values_json, position_json, position_weight, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(occurrence.keyword_id)
        .bind(occurrence.segment.id)
        .bind(occurrence.segment.kind.as_str())
        .bind(occurrence.file_id)
        .bind(&occurrence.context)
        .bind(serde_json::to_string(&occurrence.numeric_values)?)
        .bind(serde_json::to_string(&occurrence.position)?)
        .bind(occurrence.position_weight)
        .bind(millis(now))
        .execute(&self.pool)
        .await?;

        Ok(KeywordOccurrence {
            id: res.last_insert_rowid(),
            keyword_id: occurrence.keyword_id,
            segment: occurrence.segment,
            file_id: occurrence.file_id,
            context: occurrence.context.clone(),
            numeric_values: occurrence.numeric_values.clone(),
            position: occurrence.position.clone(),
            position_weight: occurrence.position_weight,
            created_at: from_millis(millis(now))?,
        })
    }

    async fn occurrences_for_keyword(&self, id: KeywordId) -> Result<Vec<KeywordOccurrence>> {
        let rows =
            sqlx::query("SELECT * FROM keyword_occurrences WHERE keyword_id = ?1 ORDER BY id")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(occurrence_from_row).collect()
    }

    async fn all_occurrences(&self) -> Result<Vec<KeywordOccurrence>> {
        let rows = sqlx::query("SELECT * FROM keyword_occurrences ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(occurrence_from_row).collect()
    }

    async fn get_case_pattern(&self, id: PatternId) -> Result<Option<CasePattern>> {
        let row = sqlx::query("SELECT * FROM case_patterns WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(pattern_from_row).transpose()
    }

    async fn find_case_pattern_by_signature(
        &self,
        signature: &str,
    ) -> Result<Option<CasePattern>> {
        let row = sqlx::query("SELECT * FROM case_patterns WHERE signature = ?1")
            .bind(signature)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(pattern_from_row).transpose()
    }

    async fn save_case_pattern(&self, pattern: &CasePattern) -> Result<CasePattern> {
        sqlx::query(
            r#"
            INSERT INTO case_patterns
                (signature, keywords_json, segments_json, confidence_score, cross_type_validated,
                 keyword_count, segment_count, file_count, versions_json, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(signature) DO UPDATE SET
                keywords_json = excluded.keywords_json,
                segments_json = excluded.segments_json,
                confidence_score = excluded.confidence_score,
                cross_type_validated = excluded.cross_type_validated,
                keyword_count = excluded.keyword_count,
                segment_count = excluded.segment_count,
                file_count = excluded.file_count,
                versions_json = excluded.versions_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&pattern.signature)
        .bind(serde_json::to_string(&pattern.keywords)?)
        .bind(serde_json::to_string(&pattern.segments)?)
        .bind(pattern.confidence_score)
        .bind(pattern.cross_type_validated)
        .bind(pattern.keyword_count as i64)
        .bind(pattern.segment_count as i64)
        .bind(pattern.file_count as i64)
        .bind(serde_json::to_string(&pattern.versions)?)
        .bind(millis(pattern.created_at))
        .bind(millis(pattern.updated_at))
        .execute(&self.pool)
        .await?;

        self.find_case_pattern_by_signature(&pattern.signature)
            .await?
            .ok_or_else(|| {
                StorageError::InvalidValue(format!("pattern {} vanished", pattern.signature))
            })
    }

    async fn list_case_patterns(&self) -> Result<Vec<CasePattern>> {
        let rows = sqlx::query("SELECT * FROM case_patterns ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(pattern_from_row).collect()
    }

    async fn active_stop_words(&self) -> Result<Vec<StopWord>> {
        let rows = sqlx::query("SELECT term, category, active FROM stop_words WHERE active = 1")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<StopWord> {
                Ok(StopWord {
                    term: row.try_get("term")?,
                    category: row.try_get("category")?,
                    active: row.try_get("active")?,
                })
            })
            .collect()
    }

    async fn upsert_stop_word(&self, word: &StopWord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stop_words (term, category, active) VALUES (?1, ?2, ?3)
            ON CONFLICT(term) DO UPDATE SET category = excluded.category, active = excluded.active
            "#,
        )
        .bind(word.term.to_lowercase())
        .bind(&word.category)
        .bind(word.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
