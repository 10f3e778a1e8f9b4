//! Adaptive, memory-aware processing engine
//!
//! An [`Engine`] owns one content cache and one memory monitor for its whole
//! lifetime, so repeated runs share cached content while independent engines
//! (in tests, or side by side in one process) share nothing.
//!
//! # Example
//!
//! ```rust,no_run
//! use chunkshift::config::EngineConfig;
//! use chunkshift::engine::{CancelToken, Engine, ListDiscovery, NoProgress};
//! use chunkshift::transform::Rule;
//!
//! # async fn demo() -> Result<(), chunkshift::error::EngineError> {
//! let config = EngineConfig {
//!     rules: vec![Rule::new("require(", "import(")],
//!     ..EngineConfig::default()
//! };
//! let mut engine = Engine::new(config)?;
//! let discovery = ListDiscovery::new(".", vec!["src/index.js".into()]);
//! let result = engine
//!     .run_discovered(&discovery, &mut NoProgress, &CancelToken::new())
//!     .await?;
//! println!("{} files processed", result.files_processed);
//! # Ok(())
//! # }
//! ```

pub mod discovery;
pub mod scheduler;
pub mod stats;
pub mod task;

pub use discovery::{Discovery, FileDescriptor, ListDiscovery};
pub use stats::{
    CancelToken, EngineResult, NoProgress, ProcessingStats, ProgressReporter, RunStatus,
    TaskOutcome, TaskStatus,
};

use crate::cache::{CacheStats, ContentCache};
use crate::config::EngineConfig;
use crate::error::{EngineError, unix_millis};
use crate::memory::{MemoryMonitor, MemorySampler, ProcessSampler};
use crate::parallel::WorkerPool;
use crate::transform::{ContentTransform, StreamingPipeline, Transformer};
use scheduler::ChunkScheduler;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock};
use std::time::{Instant, SystemTime};
use system_profile::SYSTEM;
use task::TaskContext;

pub struct Engine {
    config: EngineConfig,
    transformer: Transformer,
    cache: Option<Arc<RwLock<ContentCache>>>,
    monitor: MemoryMonitor,
    cache_gauge: Option<Arc<AtomicU64>>,
}

impl Engine {
    /// Engine sampling this process's memory
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let sampler = ProcessSampler::new();
        let gauge = sampler.external_gauge();
        let mut engine = Self::with_sampler(config, Arc::new(sampler))?;
        engine.cache_gauge = Some(gauge);
        Ok(engine)
    }

    /// Engine reading memory from `sampler`
    pub fn with_sampler(
        config: EngineConfig,
        sampler: Arc<dyn MemorySampler>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let transformer = Transformer::rules_only(config.rule_set()?);
        let monitor = MemoryMonitor::new(config.thresholds()?, config.monitor_settings(), sampler);
        let cache = config
            .enable_caching
            .then(|| Arc::new(RwLock::new(ContentCache::new(config.cache_max_bytes))));

        Ok(Self {
            config,
            transformer,
            cache,
            monitor,
            cache_gauge: None,
        })
    }

    /// Route transforms through `provider`, keeping the configured rules as fallback
    pub fn with_provider(mut self, provider: Arc<dyn ContentTransform>) -> Self {
        tracing::debug!("transform provider: {}", provider.name());
        self.transformer = Transformer::new(Some(provider), self.transformer.rules().clone());
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn monitor(&self) -> &MemoryMonitor {
        &self.monitor
    }

    /// `None` when caching is disabled
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache
            .as_ref()
            .map(|cache| cache.read().unwrap_or_else(|poisoned| poisoned.into_inner()).stats())
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.write().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
        }
    }

    /// Discover the work list, then [`run`](Self::run) it
    pub async fn run_discovered(
        &mut self,
        discovery: &dyn Discovery,
        progress: &mut dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<EngineResult, EngineError> {
        let files = discovery.discover()?;
        self.run(files, progress, cancel).await
    }

    /// Process `files` in order. Only setup problems return `Err`; per-file
    /// failures are reported in the result.
    pub async fn run(
        &mut self,
        files: Vec<FileDescriptor>,
        progress: &mut dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<EngineResult, EngineError> {
        let started = Instant::now();
        reject_duplicates(&files)?;

        let run_id = new_run_id();
        let backup_root = self.backup_root(&run_id);
        let evictions_before = self.cache_stats().map(|s| s.evictions).unwrap_or(0);
        tracing::info!(
            "run {}: {} files, chunk size {}, jobs {}",
            run_id,
            files.len(),
            self.config.chunk_size,
            self.config.max_parallel_jobs
        );

        self.monitor.start();
        let mut warnings = Vec::new();
        let mut pool = self.start_pool(files.len(), &mut warnings);

        let ctx = Arc::new(TaskContext {
            cache: self.cache.clone(),
            transformer: self.transformer.clone(),
            pool: pool.as_ref().and_then(WorkerPool::handle),
            pipeline: StreamingPipeline::new(self.config.stream_chunk_bytes),
            root: self.config.root.clone(),
            backup_root,
            dry_run: self.config.dry_run,
            use_streaming: self.config.use_streaming,
            streaming_threshold: self.config.streaming_threshold,
            max_file_size: self.config.max_file_size,
        });

        let scheduler = ChunkScheduler {
            monitor: &self.monitor,
            ctx,
            base_chunk_size: self.config.chunk_size,
            base_parallelism: self.config.max_parallel_jobs,
            cache_gauge: self.cache_gauge.clone(),
        };
        let report = scheduler.run(&files, progress, cancel).await;

        if let Some(pool) = pool.as_mut() {
            pool.shutdown();
        }
        self.monitor.stop();

        let mut stats = report.stats;
        if let Some(cache) = self.cache_stats() {
            let evicted = cache.evictions.saturating_sub(evictions_before);
            stats.cache_evictions = evicted.max(stats.cache_evictions);
        }
        warnings.extend(report.warnings);

        let result = EngineResult::from_stats(
            run_id,
            stats,
            warnings,
            started.elapsed().as_millis() as u64,
            report.cancelled,
        );
        tracing::info!(
            "run {} finished: {} processed, {} failed, {} skipped in {}ms",
            result.run_id,
            result.stats.processed_files,
            result.stats.error_files,
            result.stats.skipped_files,
            result.duration_ms
        );
        Ok(result)
    }

    fn backup_root(&self, run_id: &str) -> PathBuf {
        let base = if self.config.backup_dir.is_absolute() {
            self.config.backup_dir.clone()
        } else {
            self.config.root.join(&self.config.backup_dir)
        };
        base.join(run_id)
    }

    /// Worker pool sized from the current parallelism recommendation, capped
    /// at the host's CPU-bound worker count
    fn start_pool(&self, file_count: usize, warnings: &mut Vec<String>) -> Option<WorkerPool> {
        if !self.config.enable_worker_pool || file_count < self.config.worker_pool_threshold {
            return None;
        }

        self.monitor.sample_now();
        let size = pool_size(
            self.monitor.recommended_parallelism(self.config.max_parallel_jobs),
            SYSTEM.recommended_cpu_workers,
        );
        match WorkerPool::start(size, self.transformer.clone()) {
            Ok(pool) => Some(pool),
            Err(e) => {
                let warning = format!("worker pool unavailable ({e}), transforming inline");
                tracing::warn!("{}", warning);
                warnings.push(warning);
                None
            }
        }
    }
}

fn pool_size(recommended: usize, cpu_workers: usize) -> usize {
    recommended.min(cpu_workers).max(1)
}

fn reject_duplicates(files: &[FileDescriptor]) -> Result<(), EngineError> {
    let mut seen = HashSet::with_capacity(files.len());
    for file in files {
        if !seen.insert(file.path.as_path()) {
            return Err(EngineError::Discovery(format!(
                "{} appears more than once in the work list",
                file.path.display()
            )));
        }
    }
    Ok(())
}

/// Time-ordered, collision-free run identifier
fn new_run_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", unix_millis(SystemTime::now()), &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ManualSampler;

    fn config(dir: &std::path::Path) -> EngineConfig {
        EngineConfig {
            root: dir.to_path_buf(),
            memory_limit: 1000,
            rules: vec![crate::transform::Rule::new("a", "b")],
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_invalid_config_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let bad = EngineConfig {
            chunk_size: 0,
            ..config(dir.path())
        };
        assert!(matches!(
            Engine::with_sampler(bad, Arc::new(ManualSampler::new(0))),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_pool_size_capped_by_cpu_workers() {
        assert_eq!(pool_size(8, 4), 4);
        assert_eq!(pool_size(2, 4), 2);
        assert_eq!(pool_size(0, 4), 1);
    }

    #[test]
    fn test_backup_root_under_root_and_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let engine =
            Engine::with_sampler(config(dir.path()), Arc::new(ManualSampler::new(0))).unwrap();
        let root = engine.backup_root("r1");
        assert_eq!(root, dir.path().join(".chunkshift/backups/r1"));
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(new_run_id(), new_run_id());
    }

    #[tokio::test]
    async fn test_duplicate_descriptors_rejected_before_work() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.txt");
        std::fs::write(&path, "aaa").unwrap();
        let file = FileDescriptor::from_path(&path).unwrap();

        let mut engine =
            Engine::with_sampler(config(dir.path()), Arc::new(ManualSampler::new(0))).unwrap();
        let result = engine
            .run(vec![file.clone(), file], &mut NoProgress, &CancelToken::new())
            .await;

        assert!(matches!(result, Err(EngineError::Discovery(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "aaa");
    }

    #[tokio::test]
    async fn test_worker_pool_path_produces_same_output() {
        let dir = tempfile::tempdir().unwrap();
        let files: Vec<FileDescriptor> = (0..6)
            .map(|i| {
                let path = dir.path().join(format!("p{i}.txt"));
                std::fs::write(&path, "banana").unwrap();
                FileDescriptor::from_path(path).unwrap()
            })
            .collect();

        let pooled = EngineConfig {
            enable_worker_pool: true,
            worker_pool_threshold: 1,
            chunk_size: 2,
            ..config(dir.path())
        };
        let mut engine = Engine::with_sampler(pooled, Arc::new(ManualSampler::new(0))).unwrap();
        let result = engine
            .run(files.clone(), &mut NoProgress, &CancelToken::new())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.stats.changed_files, 6);
        for file in &files {
            assert_eq!(std::fs::read_to_string(&file.path).unwrap(), "bbnbnb");
        }
    }
}
