//! Error taxonomy of the ingestion core.
//!
//! Only [`ParseError`] and storage failures abort a file. Classification
//! and extraction errors are logged and skipped where they occur.

use storage::models::ProcessingStatus;
use storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no parser registered for extension '{0}'")]
    UnsupportedFormat(String),
    #[error("malformed {format} input: {message}")]
    Malformed { format: &'static str, message: String },
    #[error("input is not valid UTF-8")]
    InvalidEncoding(#[from] std::str::Utf8Error),
}

impl ParseError {
    pub fn malformed(format: &'static str, message: impl ToString) -> Self {
        ParseError::Malformed {
            format,
            message: message.to_string(),
        }
    }
}

/// Content the analyzer cannot characterize. The element is still
/// classified with default metrics.
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("unsupported content shape: {0}")]
    UnsupportedShape(&'static str),
}

/// One candidate keyword failed to persist.
#[derive(Debug, Error)]
#[error("failed to persist keyword '{term}': {source}")]
pub struct ExtractionError {
    pub term: String,
    #[source]
    pub source: StorageError,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: ProcessingStatus,
        to: ProcessingStatus,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid exclude pattern: {0}")]
    Glob(#[from] globset::Error),
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
