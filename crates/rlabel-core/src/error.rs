use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors from the record-input pipeline.
///
/// Per-record problems (blank lines, malformed JSON) are never errors; they
/// are skipped inside the pipeline. Only setup-level failures surface here.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to open input {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
}

/// Errors at the model collaborator boundary.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    #[error("malformed assignment: {0}")]
    MalformedAssignment(String),

    #[error("model file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("model file {path} is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },
}
