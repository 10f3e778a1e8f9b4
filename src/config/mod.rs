//! Engine configuration
//!
//! [`ChunkshiftConfig`] merges every configuration layer with figment;
//! [`EngineConfig`] is the typed view the engine runs from.

pub mod core;

pub use core::ChunkshiftConfig;

use crate::error::EngineError;
use crate::memory::{MIN_MEMORY_LIMIT, MemoryThresholds, MonitorSettings};
use crate::transform::{Rule, RuleSet};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use system_profile::SYSTEM;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub enable_caching: bool,
    pub cache_max_bytes: usize,
    pub max_parallel_jobs: usize,
    pub chunk_size: usize,
    /// Bytes; 0 derives a budget from available system memory
    pub memory_limit: u64,
    pub use_streaming: bool,
    pub streaming_threshold: u64,
    pub stream_chunk_bytes: usize,
    /// Skip ceiling for files that do not take the streaming path
    pub max_file_size: u64,
    pub enable_worker_pool: bool,
    pub worker_pool_threshold: usize,
    pub root: PathBuf,
    pub backup_dir: PathBuf,
    pub dry_run: bool,
    pub monitor: MonitorConfig,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_ms: u64,
    pub max_samples: usize,
    pub cleanup_cooldown_ms: u64,
    pub warning: Option<u64>,
    pub cleanup: Option<u64>,
    pub critical: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            cache_max_bytes: 64 * 1024 * 1024,
            max_parallel_jobs: 8,
            chunk_size: 50,
            memory_limit: 0,
            use_streaming: false,
            streaming_threshold: 10 * 1024 * 1024,
            stream_chunk_bytes: 64 * 1024,
            max_file_size: 50 * 1024 * 1024,
            enable_worker_pool: false,
            worker_pool_threshold: 200,
            root: PathBuf::from("."),
            backup_dir: PathBuf::from(".chunkshift/backups"),
            dry_run: false,
            monitor: MonitorConfig::default(),
            rules: Vec::new(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_samples: 100,
            cleanup_cooldown_ms: 5000,
            warning: None,
            cleanup: None,
            critical: None,
        }
    }
}

impl EngineConfig {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_parallel_jobs == 0 {
            return Err(EngineError::Config("max_parallel_jobs must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(EngineError::Config("chunk_size must be at least 1".into()));
        }
        if self.stream_chunk_bytes == 0 {
            return Err(EngineError::Config("stream_chunk_bytes must be at least 1".into()));
        }
        if self.monitor.interval_ms == 0 {
            return Err(EngineError::Config("monitor.interval_ms must be at least 1".into()));
        }
        if self.monitor.max_samples == 0 {
            return Err(EngineError::Config("monitor.max_samples must be at least 1".into()));
        }
        if self.memory_limit != 0 && self.memory_limit < MIN_MEMORY_LIMIT {
            return Err(EngineError::Config(format!(
                "memory_limit must be 0 (automatic) or at least {MIN_MEMORY_LIMIT} bytes, got {}",
                self.memory_limit
            )));
        }
        self.thresholds()?;
        self.rule_set()?;
        Ok(())
    }

    /// Memory budget in bytes with the automatic default resolved
    pub fn effective_memory_limit(&self) -> u64 {
        if self.memory_limit == 0 {
            SYSTEM.default_memory_budget()
        } else {
            self.memory_limit
        }
    }

    /// Thresholds derived from the memory limit, with explicit values taking precedence
    pub fn thresholds(&self) -> Result<MemoryThresholds, EngineError> {
        let derived = MemoryThresholds::from_limit(self.effective_memory_limit())?;
        MemoryThresholds::new(
            self.monitor.warning.unwrap_or(derived.warning),
            self.monitor.cleanup.unwrap_or(derived.cleanup),
            self.monitor.critical.unwrap_or(derived.critical),
        )
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            interval: Duration::from_millis(self.monitor.interval_ms),
            max_samples: self.monitor.max_samples,
            cleanup_cooldown: Duration::from_millis(self.monitor.cleanup_cooldown_ms),
            ..MonitorSettings::default()
        }
    }

    pub fn rule_set(&self) -> Result<RuleSet, EngineError> {
        RuleSet::new(self.rules.clone())
    }
}
