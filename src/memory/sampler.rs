use super::MemorySample;
use crate::error::unix_millis;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use system_profile::ProcessMemory;

/// Source of memory readings for the monitor
pub trait MemorySampler: Send + Sync {
    fn sample(&self) -> MemorySample;
}

/// Samples the current process through `system_profile::ProcessMemory`
///
/// There is no portable allocator statistic, so the resident set also stands
/// in for heap usage. `external` reports whatever the owner publishes through
/// [`ProcessSampler::external_gauge`] (the engine publishes cached bytes).
pub struct ProcessSampler {
    probe: ProcessMemory,
    external: Arc<AtomicU64>,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            probe: ProcessMemory::new(),
            external: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn external_gauge(&self) -> Arc<AtomicU64> {
        self.external.clone()
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ProcessSampler {
    fn sample(&self) -> MemorySample {
        let resident = self.probe.sample().map(|usage| usage.resident).unwrap_or(0);
        MemorySample {
            heap_used: resident,
            resident_set: resident,
            external: self.external.load(Ordering::Relaxed),
            timestamp_ms: unix_millis(SystemTime::now()),
        }
    }
}

/// Sampler reporting a value set by its owner
///
/// Clones share the same reading, so a test (or an embedding application with
/// its own accounting) can keep a handle and move the reading while the engine
/// owns the monitor.
#[derive(Clone, Default)]
pub struct ManualSampler {
    usage: Arc<AtomicU64>,
}

impl ManualSampler {
    pub fn new(usage: u64) -> Self {
        Self {
            usage: Arc::new(AtomicU64::new(usage)),
        }
    }

    pub fn set(&self, usage: u64) {
        self.usage.store(usage, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.usage.load(Ordering::Relaxed)
    }
}

impl MemorySampler for ManualSampler {
    fn sample(&self) -> MemorySample {
        let usage = self.get();
        MemorySample {
            heap_used: usage,
            resident_set: usage,
            external: 0,
            timestamp_ms: unix_millis(SystemTime::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_sampler_shares_reading() {
        let sampler = ManualSampler::new(10);
        let handle = sampler.clone();
        handle.set(42);
        assert_eq!(sampler.sample().usage(), 42);
    }

    #[test]
    fn test_process_sampler_reports_external_gauge() {
        let sampler = ProcessSampler::new();
        sampler.external_gauge().store(1234, Ordering::Relaxed);
        let sample = sampler.sample();
        assert_eq!(sample.external, 1234);
        assert_eq!(sample.heap_used, sample.resident_set);
    }
}
