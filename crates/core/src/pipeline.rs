//! Per-file ingestion: register → parse → analyze → extract → complete.
//!
//! One file runs strictly in sequence; different files run in parallel
//! against the shared repository, except that files with identical bytes
//! take turns. A failure after registration leaves the file `failed` with
//! its message and keeps whatever was persisted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use storage::models::{
    ContentSegment, FileId, NewSourceFile, ProcessingStatus, SegmentKind,
};
use storage::{Repository, StorageError};
use tokio::sync::{Mutex, OnceCell, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::classifier::SegmentClassifier;
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::extractor::KeywordExtractor;
use crate::normalizer::KeywordNormalizer;
use crate::parser::ParserRegistry;
use crate::patterns::{CasePatternDetector, DetectionReport};
use crate::relevance;
use crate::scanner;
use crate::stopwords::{seed_default_stop_words, StopWordFilter};

/// blake3 digest of the raw bytes, hex encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub file_id: FileId,
    pub filename: String,
    pub status: ProcessingStatus,
    /// True when the content hash was already known.
    pub reimport: bool,
    pub segments: usize,
    pub quantitative: usize,
    pub qualitative: usize,
    pub mixed: usize,
    pub keywords: usize,
    pub occurrences: usize,
    pub error: Option<String>,
}

impl ProcessOutcome {
    fn new(file_id: FileId, filename: &str, reimport: bool) -> Self {
        Self {
            file_id,
            filename: filename.to_string(),
            status: ProcessingStatus::Pending,
            reimport,
            segments: 0,
            quantitative: 0,
            qualitative: 0,
            mixed: 0,
            keywords: 0,
            occurrences: 0,
            error: None,
        }
    }

    fn count_segments(&mut self, segments: &[ContentSegment]) {
        self.segments = segments.len();
        for segment in segments {
            match segment.kind() {
                SegmentKind::Quantitative => self.quantitative += 1,
                SegmentKind::Qualitative => self.qualitative += 1,
                SegmentKind::Mixed => self.mixed += 1,
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub keywords_rescored: usize,
    pub detection: DetectionReport,
}

/// Tracks the status of one file and validates each move.
struct FileRun<'a> {
    repo: &'a dyn Repository,
    file_id: FileId,
    status: ProcessingStatus,
}

impl FileRun<'_> {
    async fn advance(&mut self, next: ProcessingStatus) -> Result<(), PipelineError> {
        if !self.status.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.repo.set_file_status(self.file_id, next, None).await?;
        debug!(file_id = self.file_id, from = %self.status, to = %next, "status advanced");
        self.status = next;
        Ok(())
    }

    async fn fail(&mut self, message: &str) -> Result<(), StorageError> {
        if !self.status.can_transition_to(ProcessingStatus::Failed) {
            return Ok(());
        }
        self.repo
            .set_file_status(self.file_id, ProcessingStatus::Failed, Some(message))
            .await?;
        self.status = ProcessingStatus::Failed;
        Ok(())
    }
}

/// One async lock per content hash in flight. Identical bytes share a
/// file record, so their runs must not interleave.
#[derive(Default)]
struct HashLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl HashLocks {
    fn lock_for(&self, hash: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(hash.to_string()).or_default().clone()
    }

    /// Drop the entry once no run holds or awaits it.
    fn release(&self, hash: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(hash).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(hash);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub struct UnifiedFileProcessor {
    repo: Arc<dyn Repository>,
    parsers: ParserRegistry,
    config: AppConfig,
    classifier: SegmentClassifier,
    detector: CasePatternDetector,
    normalizer: Arc<KeywordNormalizer>,
    stop_words_seeded: OnceCell<()>,
    in_flight: HashLocks,
    maintenance: Mutex<()>,
}

impl UnifiedFileProcessor {
    pub fn new(repo: Arc<dyn Repository>, config: AppConfig) -> Self {
        Self {
            classifier: SegmentClassifier::new(config.classification),
            detector: CasePatternDetector::new(config.clustering.clone()),
            normalizer: Arc::new(KeywordNormalizer::from_config(&config.normalizer)),
            parsers: ParserRegistry::with_builtin(),
            repo,
            config,
            stop_words_seeded: OnceCell::new(),
            in_flight: HashLocks::default(),
            maintenance: Mutex::new(()),
        }
    }

    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn parsers(&self) -> &ParserRegistry {
        &self.parsers
    }

    pub fn detector(&self) -> &CasePatternDetector {
        &self.detector
    }

    pub fn normalizer(&self) -> &KeywordNormalizer {
        &self.normalizer
    }

    pub async fn process_path(&self, path: &Path) -> Result<ProcessOutcome, PipelineError> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        self.process_bytes(&filename, &bytes).await
    }

    /// Run the full pipeline for one file. Errors before registration are
    /// returned; errors after it mark the file `failed` and come back as
    /// a failed outcome.
    pub async fn process_bytes(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<ProcessOutcome, PipelineError> {
        let hash = content_hash(bytes);
        let lock = self.in_flight.lock_for(&hash);
        let result = {
            let _turn = lock.lock().await;
            self.process_registered(filename, bytes, &hash).await
        };
        drop(lock);
        self.in_flight.release(&hash);
        result
    }

    async fn process_registered(
        &self,
        filename: &str,
        bytes: &[u8],
        hash: &str,
    ) -> Result<ProcessOutcome, PipelineError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        let registration = self
            .repo
            .register_source_file(&NewSourceFile {
                filename: filename.to_string(),
                extension: extension.clone(),
                byte_size: bytes.len() as i64,
                content_hash: hash.to_string(),
            })
            .await?;

        let file_id = registration.file.id;
        let mut outcome = ProcessOutcome::new(file_id, filename, !registration.created);
        let mut run = FileRun {
            repo: self.repo.as_ref(),
            file_id,
            status: ProcessingStatus::Pending,
        };
        info!(file_id, filename, reimport = outcome.reimport, "processing file");

        match self
            .run_stages(&mut run, &mut outcome, extension.as_deref().unwrap_or(""), bytes)
            .await
        {
            Ok(()) => {
                info!(
                    file_id,
                    segments = outcome.segments,
                    keywords = outcome.keywords,
                    "file complete"
                );
            }
            Err(err) => {
                let message = err.to_string();
                error!(file_id, filename, error = %message, "file failed");
                run.fail(&message).await?;
                outcome.error = Some(message);
            }
        }
        outcome.status = run.status;
        Ok(outcome)
    }

    async fn run_stages(
        &self,
        run: &mut FileRun<'_>,
        outcome: &mut ProcessOutcome,
        extension: &str,
        bytes: &[u8],
    ) -> Result<(), PipelineError> {
        let repo = self.repo.as_ref();
        if outcome.reimport {
            let touched = repo.clear_file_content(run.file_id).await?;
            let total = repo.count_files_with_status(ProcessingStatus::Complete).await?;
            for id in &touched {
                relevance::recompute_keyword(repo, *id, total).await?;
            }
            debug!(file_id = run.file_id, keywords = touched.len(), "previous import superseded");
        }

        run.advance(ProcessingStatus::Parsing).await?;
        let elements = self.parsers.parse(extension, bytes)?;
        debug!(file_id = run.file_id, elements = elements.len(), "parsed");

        run.advance(ProcessingStatus::Analyzing).await?;
        for (position, element) in elements.into_iter().enumerate() {
            let segment = self.classifier.build_segment(run.file_id, position, element);
            repo.insert_segment(&segment).await?;
        }
        let segments = repo.segments_for_file(run.file_id).await?;
        outcome.count_segments(&segments);

        run.advance(ProcessingStatus::Extracting).await?;
        let extractor =
            KeywordExtractor::new(self.config.extraction.clone(), self.stop_word_filter().await?)
                .with_normalizer(self.normalizer.clone());
        let total = repo.count_files_with_status(ProcessingStatus::Complete).await?;
        for segment in &segments {
            let report = extractor.extract_and_persist(repo, segment, total).await;
            if report.failed > 0 {
                warn!(
                    segment_id = segment.id,
                    failed = report.failed,
                    "some keywords were not stored"
                );
            }
            outcome.keywords += report.accepted;
            outcome.occurrences += report.occurrences;
        }

        run.advance(ProcessingStatus::Complete).await
    }

    /// Fresh stop-word set, seeding the defaults on first use.
    async fn stop_word_filter(&self) -> Result<StopWordFilter, StorageError> {
        self.stop_words_seeded
            .get_or_try_init(|| async {
                seed_default_stop_words(self.repo.as_ref(), &self.config.stop_words.custom)
                    .await
                    .map(|_| ())
            })
            .await?;
        StopWordFilter::load(self.repo.as_ref()).await
    }

    /// Process files concurrently, at most `ingest.concurrency` at a time.
    /// Results come back in completion order.
    pub async fn process_batch(
        self: &Arc<Self>,
        paths: Vec<PathBuf>,
    ) -> Vec<Result<ProcessOutcome, PipelineError>> {
        let semaphore = Arc::new(Semaphore::new(self.config.ingest.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for path in paths {
            let semaphore = semaphore.clone();
            let processor = Arc::clone(self);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                processor.process_path(&path).await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            results.push(joined.map_err(PipelineError::from).and_then(|r| r));
        }
        results
    }

    /// Collect files under the configured scan roots and process them.
    pub async fn process_roots(
        self: &Arc<Self>,
    ) -> Result<Vec<Result<ProcessOutcome, PipelineError>>, PipelineError> {
        let roots: Vec<PathBuf> = self.config.scan.include.iter().map(PathBuf::from).collect();
        let files = scanner::collect_files(&roots, &self.config.scan.exclude, &self.parsers).await?;
        info!(files = files.len(), "starting batch");
        Ok(self.process_batch(files).await)
    }

    /// Corpus-wide relevance recompute followed by case-pattern detection.
    /// Concurrent calls queue behind one another.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport, StorageError> {
        let _guard = self.maintenance.lock().await;
        info!("maintenance pass started");
        let keywords_rescored = relevance::recompute_all(self.repo.as_ref()).await?;
        let detection = self.detector.detect(self.repo.as_ref()).await?;
        Ok(MaintenanceReport {
            keywords_rescored,
            detection,
        })
    }
}
