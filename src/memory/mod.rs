//! Memory pressure classification and scaling
//!
//! The [`MemoryMonitor`] samples process memory on a timer and keeps a bounded
//! history. Everything the scheduler asks it (pressure level, recommended chunk
//! size and parallelism, trend) is a pure function of the latest sample, the
//! configured [`MemoryThresholds`] and the sample history.

pub mod monitor;
pub mod sampler;

pub use monitor::{MemoryMonitor, MonitorSettings, PressureAlert};
pub use sampler::{ManualSampler, MemorySampler, ProcessSampler};

use crate::error::EngineError;
use serde::Serialize;

/// Smallest explicit memory budget whose derived thresholds stay distinct
pub const MIN_MEMORY_LIMIT: u64 = 100;

fn percent_of(limit: u64, percent: u64) -> u64 {
    (u128::from(limit) * u128::from(percent) / 100) as u64
}

/// Memory ceilings in bytes; strictly increasing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryThresholds {
    pub warning: u64,
    pub cleanup: u64,
    pub critical: u64,
}

impl MemoryThresholds {
    pub fn new(warning: u64, cleanup: u64, critical: u64) -> Result<Self, EngineError> {
        if !(warning < cleanup && cleanup < critical) {
            return Err(EngineError::Config(format!(
                "memory thresholds must be strictly increasing \
                 (warning {warning} < cleanup {cleanup} < critical {critical})"
            )));
        }
        Ok(Self { warning, cleanup, critical })
    }

    /// Derive thresholds from a single memory budget: 60% / 75% / 90%
    pub fn from_limit(limit: u64) -> Result<Self, EngineError> {
        Self::new(percent_of(limit, 60), percent_of(limit, 75), percent_of(limit, 90))
    }

    /// Classify a usage figure against the single highest threshold it exceeds
    pub fn classify(&self, usage: u64) -> PressureLevel {
        if usage >= self.critical {
            PressureLevel::Critical
        } else if usage >= self.cleanup {
            PressureLevel::Cleanup
        } else if usage >= self.warning {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }
}

/// One memory reading, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemorySample {
    pub heap_used: u64,
    pub resident_set: u64,
    pub external: u64,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

impl MemorySample {
    /// The figure classified against thresholds
    pub fn usage(&self) -> u64 {
        self.heap_used.max(self.resident_set)
    }
}

/// Memory pressure classification, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    Normal,
    Warning,
    Cleanup,
    Critical,
}

impl PressureLevel {
    /// Fraction of a base value the scheduler may use at this level
    pub fn scale_factor(self) -> f64 {
        match self {
            PressureLevel::Normal => 1.0,
            PressureLevel::Warning => 0.75,
            PressureLevel::Cleanup => 0.5,
            PressureLevel::Critical => 0.25,
        }
    }

    /// Scale `base` for this level, never returning less than 1
    pub fn scale(self, base: usize) -> usize {
        ((base as f64 * self.scale_factor()).floor() as usize).max(1)
    }
}

impl std::fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PressureLevel::Normal => "normal",
            PressureLevel::Warning => "warning",
            PressureLevel::Cleanup => "cleanup",
            PressureLevel::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Direction of memory usage over recent samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// Compare first and last sample with a 10% deadband
pub fn trend_of(samples: &[MemorySample]) -> MemoryTrend {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return MemoryTrend::Stable;
    };
    let first = first.usage() as f64;
    let last = last.usage() as f64;

    if last > first * 1.1 {
        MemoryTrend::Increasing
    } else if last < first * 0.9 {
        MemoryTrend::Decreasing
    } else {
        MemoryTrend::Stable
    }
}
