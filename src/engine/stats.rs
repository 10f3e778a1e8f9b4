//! Run statistics, per-file outcomes and the caller-facing contracts

use crate::error::FileError;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

/// How a single file ended
#[derive(Debug)]
pub enum TaskStatus {
    Processed,
    /// Not attempted; the reason becomes a run warning
    Skipped(String),
    Failed(FileError),
}

/// Result of one per-file task, folded by the scheduler
#[derive(Debug)]
pub struct TaskOutcome {
    pub path: PathBuf,
    pub status: TaskStatus,
    pub backup_path: Option<PathBuf>,
    /// Whether the cache was consulted at all
    pub cache_checked: bool,
    pub cache_hit: bool,
    pub size_bytes: u64,
    pub changed: bool,
    pub streamed: bool,
    /// Content read from storage on a cache miss, for insertion by the coordinator
    pub fresh_content: Option<(String, SystemTime)>,
    pub warnings: Vec<String>,
}

impl TaskOutcome {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            status: TaskStatus::Processed,
            backup_path: None,
            cache_checked: false,
            cache_hit: false,
            size_bytes: 0,
            changed: false,
            streamed: false,
            fresh_content: None,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn skipped(path: PathBuf, reason: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Skipped(reason.into()),
            ..Self::new(path)
        }
    }
}

/// Aggregate statistics owned by the scheduler for one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingStats {
    pub total_files: usize,
    pub processed_files: usize,
    pub error_files: usize,
    pub skipped_files: usize,
    pub changed_files: usize,
    pub streamed_files: usize,
    pub cache_hits: usize,
    /// Running mean over processed files
    pub average_file_size: f64,
    pub total_bytes: u64,
    pub errors: Vec<FileError>,
    pub backup_paths: Vec<PathBuf>,
    pub peak_memory: u64,
    pub chunks_completed: usize,
    pub final_chunk_size: usize,
    /// Concurrency cap each chunk actually ran with, in chunk order
    pub chunk_parallelism: Vec<usize>,
    pub cache_evictions: u64,
}

impl ProcessingStats {
    pub fn new(total_files: usize) -> Self {
        Self {
            total_files,
            ..Self::default()
        }
    }

    /// Fold one outcome; order-independent apart from the ordering of lists
    pub fn record(&mut self, outcome: &TaskOutcome) {
        if let Some(backup) = &outcome.backup_path {
            self.backup_paths.push(backup.clone());
        }
        if outcome.cache_hit {
            self.cache_hits += 1;
        }

        match &outcome.status {
            TaskStatus::Processed => {
                self.processed_files += 1;
                self.total_bytes += outcome.size_bytes;
                let n = self.processed_files as f64;
                self.average_file_size += (outcome.size_bytes as f64 - self.average_file_size) / n;
                if outcome.changed {
                    self.changed_files += 1;
                }
                if outcome.streamed {
                    self.streamed_files += 1;
                }
            }
            TaskStatus::Skipped(_) => self.skipped_files += 1,
            TaskStatus::Failed(error) => {
                self.error_files += 1;
                self.errors.push(error.clone());
            }
        }
    }

    /// Files that reached a final state
    pub fn settled(&self) -> usize {
        self.processed_files + self.error_files + self.skipped_files
    }

    pub fn percent_complete(&self) -> f64 {
        if self.total_files == 0 {
            return 100.0;
        }
        self.settled() as f64 / self.total_files as f64 * 100.0
    }
}

/// Final classification of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Failure,
}

/// What a run hands back to its caller
#[derive(Debug, Clone, Serialize)]
pub struct EngineResult {
    pub run_id: String,
    pub success: bool,
    pub partial_success: bool,
    pub files_processed: usize,
    pub errors: Vec<FileError>,
    pub warnings: Vec<String>,
    pub backup_paths: Vec<PathBuf>,
    pub duration_ms: u64,
    pub cache_hits: usize,
    pub memory_peak: u64,
    pub cancelled: bool,
    pub stats: ProcessingStats,
}

impl EngineResult {
    pub(crate) fn from_stats(
        run_id: String,
        stats: ProcessingStats,
        warnings: Vec<String>,
        duration_ms: u64,
        cancelled: bool,
    ) -> Self {
        Self {
            run_id,
            success: stats.errors.is_empty(),
            partial_success: stats.processed_files > 0 && !stats.errors.is_empty(),
            files_processed: stats.processed_files,
            errors: stats.errors.clone(),
            warnings,
            backup_paths: stats.backup_paths.clone(),
            duration_ms,
            cache_hits: stats.cache_hits,
            memory_peak: stats.peak_memory,
            cancelled,
            stats,
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.success {
            RunStatus::Success
        } else if self.partial_success {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Failure
        }
    }
}

/// Receives `(percent, message)` after every chunk
pub trait ProgressReporter {
    fn report(&mut self, percent: f64, message: &str);
}

impl<F> ProgressReporter for F
where
    F: FnMut(f64, &str),
{
    fn report(&mut self, percent: f64, message: &str) {
        self(percent, message)
    }
}

/// Progress sink that discards every report
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&mut self, _percent: f64, _message: &str) {}
}

/// Cooperative cancellation flag, checked at chunk boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
