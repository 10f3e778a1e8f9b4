//! Error taxonomy for the processing engine
//!
//! Two classes of failure exist:
//!
//! - **Fatal setup errors** ([`EngineError::Discovery`], [`EngineError::Config`])
//!   are returned from the engine before any chunk starts.
//! - **Per-file errors** (read, write, backup, transform, streaming) are caught at
//!   the task boundary, wrapped into a [`FileError`] record and folded into the run
//!   result. They never abort sibling files or the run.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Errors produced by the engine and its components
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to back up {} to {}: {source}", path.display(), backup.display())]
    Backup {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("streaming pipeline failed for {}: {message}", path.display())]
    StreamPipeline { path: PathBuf, message: String },

    #[error("task for {} aborted: {message}", path.display())]
    TaskAborted { path: PathBuf, message: String },
}

impl EngineError {
    /// Whether this error aborts the whole run rather than a single file
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Discovery(_) | EngineError::Config(_))
    }

    /// Short classification used in reports
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Discovery(_) => ErrorKind::Discovery,
            EngineError::Config(_) => ErrorKind::Config,
            EngineError::Read { .. } => ErrorKind::Read,
            EngineError::Write { .. } => ErrorKind::Write,
            EngineError::Backup { .. } => ErrorKind::Backup,
            EngineError::Transform(_) => ErrorKind::Transform,
            EngineError::StreamPipeline { .. } => ErrorKind::StreamPipeline,
            EngineError::TaskAborted { .. } => ErrorKind::TaskAborted,
        }
    }

    pub(crate) fn read(path: &Path, source: std::io::Error) -> Self {
        EngineError::Read { path: path.to_path_buf(), source }
    }

    pub(crate) fn write(path: &Path, source: std::io::Error) -> Self {
        EngineError::Write { path: path.to_path_buf(), source }
    }

    pub(crate) fn backup(path: &Path, backup: &Path, source: std::io::Error) -> Self {
        EngineError::Backup {
            path: path.to_path_buf(),
            backup: backup.to_path_buf(),
            source,
        }
    }

    pub(crate) fn stream(path: &Path, message: impl Into<String>) -> Self {
        EngineError::StreamPipeline {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// Errors raised by a content transform
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransformError {
    /// The external provider could not be reached; callers fall back to literal rules
    #[error("transform provider '{provider}' unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("transform '{provider}' failed: {reason}")]
    Failed { provider: String, reason: String },

    #[error("worker pool is shut down")]
    PoolClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Discovery,
    Config,
    Read,
    Write,
    Backup,
    Transform,
    StreamPipeline,
    TaskAborted,
}

/// A per-file failure captured at the task boundary
#[derive(Debug, Clone, Serialize)]
pub struct FileError {
    /// Operation that was running when the failure happened
    pub operation: &'static str,
    pub path: PathBuf,
    pub kind: ErrorKind,
    pub message: String,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

impl FileError {
    pub fn new(operation: &'static str, path: &Path, error: &EngineError) -> Self {
        Self {
            operation,
            path: path.to_path_buf(),
            kind: error.kind(),
            message: error.to_string(),
            timestamp_ms: unix_millis(SystemTime::now()),
        }
    }
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.operation, self.path.display(), self.message)
    }
}

pub(crate) fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
