//! Chunk scheduler
//!
//! The coordinator walks the work list in input order, taking one chunk at a
//! time from a cursor:
//!
//! ```text
//! loop {
//!     cancelled?                          -> stop, remaining files skipped
//!     sample memory, parallelism = recommended(P)
//!     run every file of the chunk, at most `parallelism` at once
//!     fold outcomes, insert fresh content into the cache
//!     report progress
//!     sample memory (peak), honour reclaim requests
//!     should_reduce_parallelism()         -> chunk size *= 0.8 (floor 1)
//! }
//! ```
//!
//! Tasks only read the cache. Every mutation of the cache and of the run
//! statistics happens here, after a task has resolved.

use super::discovery::FileDescriptor;
use super::stats::{CancelToken, ProcessingStats, ProgressReporter, TaskOutcome, TaskStatus};
use super::task::{self, OPERATION, TaskContext};
use crate::cache::ContentCache;
use crate::error::{EngineError, FileError};
use crate::memory::{MemoryMonitor, PressureAlert};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Factor applied to the chunk size while memory stays at cleanup level or above
const CHUNK_SHRINK_FACTOR: f64 = 0.8;

pub(crate) struct ChunkScheduler<'a> {
    pub monitor: &'a MemoryMonitor,
    pub ctx: Arc<TaskContext>,
    pub base_chunk_size: usize,
    pub base_parallelism: usize,
    /// Receives the cache size after every chunk, reported as external memory
    pub cache_gauge: Option<Arc<AtomicU64>>,
}

/// What the coordinator hands back to the engine
pub(crate) struct ScheduleReport {
    pub stats: ProcessingStats,
    pub warnings: Vec<String>,
    pub cancelled: bool,
}

impl ChunkScheduler<'_> {
    pub async fn run(
        &self,
        files: &[FileDescriptor],
        progress: &mut dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> ScheduleReport {
        let total = files.len();
        let mut stats = ProcessingStats::new(total);
        let mut warnings = Vec::new();
        let mut chunk_size = self.base_chunk_size.max(1);
        let mut cursor = 0;
        let mut cancelled = false;

        while cursor < total {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            self.monitor.sample_now();
            let parallelism = self.monitor.recommended_parallelism(self.base_parallelism);
            let end = (cursor + chunk_size).min(total);
            let chunk = &files[cursor..end];
            stats.chunk_parallelism.push(parallelism);

            tracing::info!(
                "chunk {}: {} files (#{}..#{}), parallelism {} [{}]",
                stats.chunks_completed + 1,
                chunk.len(),
                cursor + 1,
                end,
                parallelism,
                self.monitor.pressure_level()
            );

            for outcome in self.run_chunk(chunk, parallelism).await {
                self.merge(&mut stats, &mut warnings, outcome);
            }
            cursor = end;
            stats.chunks_completed += 1;

            progress.report(
                stats.percent_complete(),
                &format!(
                    "Processed {}/{} files ({} chunks)",
                    stats.settled(),
                    total,
                    stats.chunks_completed
                ),
            );

            let sample = self.monitor.sample_now();
            stats.peak_memory = stats.peak_memory.max(sample.usage()).max(self.monitor.peak());
            self.reclaim(&mut stats);
            warnings.extend(self.monitor.drain_alerts().iter().map(PressureAlert::message));

            if self.monitor.should_reduce_parallelism() {
                let reduced = ((chunk_size as f64 * CHUNK_SHRINK_FACTOR).floor() as usize).max(1);
                if reduced < chunk_size {
                    tracing::info!("memory pressure: chunk size {} -> {}", chunk_size, reduced);
                    chunk_size = reduced;
                }
            }
        }

        if cancelled {
            let remaining = total - cursor;
            tracing::warn!("run cancelled with {} files remaining", remaining);
            warnings.push(format!("run cancelled, {remaining} files skipped"));
            let reached = stats.percent_complete();
            for file in &files[cursor..] {
                stats.record(&TaskOutcome::skipped(file.path.clone(), "cancelled"));
            }
            progress.report(reached, "Cancelled");
        }

        stats.final_chunk_size = chunk_size;
        ScheduleReport {
            stats,
            warnings,
            cancelled,
        }
    }

    /// Run every file of `chunk` with at most `parallelism` in flight
    async fn run_chunk(&self, chunk: &[FileDescriptor], parallelism: usize) -> Vec<TaskOutcome> {
        let gate = Arc::new(Semaphore::new(parallelism.max(1)));
        let mut handles: Vec<(PathBuf, JoinHandle<TaskOutcome>)> = Vec::with_capacity(chunk.len());

        for file in chunk {
            let gate = gate.clone();
            let ctx = self.ctx.clone();
            let path = file.path.clone();
            let file = file.clone();

            let handle = tokio::spawn(async move {
                // The gate is never closed, so acquisition cannot fail
                let _permit = gate.acquire_owned().await.ok();
                task::transform_file(ctx, file).await
            });
            handles.push((path, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (path, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_error) => {
                    let error = EngineError::TaskAborted {
                        path: path.clone(),
                        message: join_error.to_string(),
                    };
                    tracing::error!("{}", error);
                    outcomes.push(TaskOutcome {
                        status: TaskStatus::Failed(FileError::new(OPERATION, &path, &error)),
                        ..TaskOutcome::new(path)
                    });
                }
            }
        }
        outcomes
    }

    fn merge(
        &self,
        stats: &mut ProcessingStats,
        warnings: &mut Vec<String>,
        mut outcome: TaskOutcome,
    ) {
        if let Some(cache) = &self.ctx.cache {
            let mut cache = write(cache);
            if outcome.cache_checked {
                cache.record_lookup(outcome.cache_hit);
            }
            if let Some((content, mtime)) = outcome.fresh_content.take() {
                cache.set(&outcome.path, content, mtime);
            }
            if let Some(gauge) = &self.cache_gauge {
                gauge.store(cache.size_bytes() as u64, Ordering::Relaxed);
            }
        }

        warnings.append(&mut outcome.warnings);
        if let TaskStatus::Skipped(reason) = &outcome.status {
            warnings.push(format!("{}: skipped, {reason}", outcome.path.display()));
        }
        stats.record(&outcome);
    }

    /// Each pending reclaim request halves the cache
    fn reclaim(&self, stats: &mut ProcessingStats) {
        let requests = self.monitor.take_reclaim_requests();
        if requests == 0 {
            return;
        }
        let Some(cache) = &self.ctx.cache else {
            return;
        };

        let mut cache = write(cache);
        let target = cache.size_bytes().checked_shr(requests).unwrap_or(0);
        let evicted = cache.shrink_to(target);
        stats.cache_evictions += evicted as u64;
        if let Some(gauge) = &self.cache_gauge {
            gauge.store(cache.size_bytes() as u64, Ordering::Relaxed);
        }
        tracing::info!(
            "reclaimed cache memory: {} entries evicted, {} bytes retained",
            evicted,
            cache.size_bytes()
        );
    }
}

fn write(cache: &RwLock<ContentCache>) -> RwLockWriteGuard<'_, ContentCache> {
    cache.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
