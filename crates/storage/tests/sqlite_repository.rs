use storage::models::{
    CasePattern, ElementMetadata, KeywordAggregates, NewOccurrence, NewSegment, NewSourceFile,
    PatternKeyword, PositionLocator, ProcessingStatus, SegmentBody, SegmentKind, SegmentRef,
    StopWord, TextSubtype,
};
use storage::{Repository, SqliteRepository};
use tempfile::tempdir;

async fn open_repo(dir: &tempfile::TempDir) -> SqliteRepository {
    let db_path = dir.path().join("casefinder.db");
    SqliteRepository::open(&db_path.to_string_lossy())
        .await
        .unwrap()
}

fn new_file(hash: &str) -> NewSourceFile {
    NewSourceFile {
        filename: "report.txt".to_string(),
        extension: Some("txt".to_string()),
        byte_size: 42,
        content_hash: hash.to_string(),
    }
}

fn text_segment(file_id: i64, index: usize, text: &str) -> NewSegment {
    NewSegment {
        file_id,
        position_index: index,
        locator: PositionLocator::LineRange {
            start: index + 1,
            end: index + 1,
        },
        metadata: ElementMetadata::default(),
        confidence: 0.95,
        body: SegmentBody::Qualitative {
            text: text.to_string(),
            subtype: TextSubtype::Body,
            language: Some("en".to_string()),
            word_count: text.split_whitespace().count(),
            sentence_count: 1,
        },
    }
}

#[tokio::test]
async fn registration_is_idempotent_per_content_hash() {
    let dir = tempdir().unwrap();
    let repo = open_repo(&dir).await;

    let first = repo.register_source_file(&new_file("abc")).await.unwrap();
    repo.set_file_status(first.file.id, ProcessingStatus::Parsing, None)
        .await
        .unwrap();
    repo.set_file_status(first.file.id, ProcessingStatus::Failed, Some("bad bytes"))
        .await
        .unwrap();
    let again = repo.register_source_file(&new_file("abc")).await.unwrap();
    let changed = repo.register_source_file(&new_file("abd")).await.unwrap();

    assert!(first.created);
    assert!(!again.created);
    assert_eq!(first.file.id, again.file.id);
    assert_eq!(again.file.status, ProcessingStatus::Pending);
    assert_eq!(again.file.error_message, None);
    assert_ne!(changed.file.id, first.file.id);
    assert_eq!(
        repo.count_files_with_status(ProcessingStatus::Pending)
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn segments_keep_order_and_support_text_search() {
    let dir = tempdir().unwrap();
    let repo = open_repo(&dir).await;
    let file = repo.register_source_file(&new_file("s1")).await.unwrap().file;

    repo.insert_segment(&text_segment(file.id, 1, "Second paragraph about margins."))
        .await
        .unwrap();
    repo.insert_segment(&text_segment(file.id, 0, "A Spiculated Nodule was observed."))
        .await
        .unwrap();

    let segments = repo.segments_for_file(file.id).await.unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].position_index, 0);
    assert_eq!(segments[0].kind(), SegmentKind::Qualitative);

    let hits = repo.search_segment_text("spiculated", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].position_index, 0);
}

#[tokio::test]
async fn keyword_upsert_and_aggregates() {
    let dir = tempdir().unwrap();
    let repo = open_repo(&dir).await;
    let file = repo.register_source_file(&new_file("k1")).await.unwrap().file;
    let segment = repo
        .insert_segment(&text_segment(file.id, 0, "nodule nodule"))
        .await
        .unwrap();

    let a = repo.upsert_keyword("nodule", "Nodule", false).await.unwrap();
    let b = repo.upsert_keyword("nodule", "nodule", false).await.unwrap();
    assert_eq!(a.id, b.id);
    assert_eq!(b.term, "Nodule");

    for offset in [0usize, 7] {
        repo.insert_occurrence(&NewOccurrence {
            keyword_id: a.id,
            segment: segment.reference(),
            file_id: file.id,
            context: "nodule nodule".to_string(),
            numeric_values: vec![5.0],
            position: storage::models::OccurrencePosition {
                char_offset: Some(offset),
                field: None,
            },
            position_weight: 1.5,
        })
        .await
        .unwrap();
    }
    let occurrences = repo.occurrences_for_keyword(a.id).await.unwrap();
    assert_eq!(occurrences.len(), 2);
    assert_eq!(occurrences[0].numeric_values, vec![5.0]);
    assert_eq!(occurrences[1].position.char_offset, Some(7));

    repo.update_keyword_aggregates(
        a.id,
        KeywordAggregates {
            total_frequency: 2,
            document_frequency: 1,
            relevance_score: 3.5,
        },
    )
    .await
    .unwrap();
    let found = repo.search_keywords("NOD", 5).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].total_frequency, 2);
    assert_eq!(found[0].relevance_score, 3.5);
    let unlimited = repo.search_keywords("nod", usize::MAX).await.unwrap();
    assert_eq!(unlimited.len(), 1);

    let exact = repo.get_keyword_by_term(&a.normalized_term).await.unwrap().unwrap();
    assert_eq!(exact.id, a.id);
    assert!(repo.get_keyword_by_term("nod").await.unwrap().is_none());

    let touched = repo.clear_file_content(file.id).await.unwrap();
    assert_eq!(touched, vec![a.id]);
    assert!(repo.all_occurrences().await.unwrap().is_empty());
}

#[tokio::test]
async fn case_patterns_upsert_by_signature() {
    let dir = tempdir().unwrap();
    let repo = open_repo(&dir).await;
    let now = chrono::Utc::now();
    let mut pattern = CasePattern {
        id: 0,
        signature: "sig-1".to_string(),
        keywords: vec![PatternKeyword {
            keyword_id: 1,
            term: "nodule".to_string(),
            frequency: 3,
        }],
        segments: vec![SegmentRef {
            id: 9,
            kind: SegmentKind::Mixed,
        }],
        confidence_score: 0.6,
        cross_type_validated: false,
        keyword_count: 1,
        segment_count: 1,
        file_count: 1,
        versions: vec![],
        created_at: now,
        updated_at: now,
    };

    let saved = repo.save_case_pattern(&pattern).await.unwrap();
    assert!(saved.id > 0);

    pattern.confidence_score = 0.8;
    let updated = repo.save_case_pattern(&pattern).await.unwrap();
    assert_eq!(updated.id, saved.id);
    assert_eq!(updated.confidence_score, 0.8);
    assert_eq!(repo.list_case_patterns().await.unwrap().len(), 1);
    assert_eq!(updated.segments[0].kind, SegmentKind::Mixed);
}

#[tokio::test]
async fn stop_words_respect_active_flag() {
    let dir = tempdir().unwrap();
    let repo = open_repo(&dir).await;
    repo.upsert_stop_word(&StopWord::new("The", "english")).await.unwrap();
    repo.upsert_stop_word(&StopWord {
        term: "patient".to_string(),
        category: "domain".to_string(),
        active: false,
    })
    .await
    .unwrap();

    let active = repo.active_stop_words().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].term, "the");
}
