use super::{MemorySample, MemorySampler, MemoryThresholds, MemoryTrend, PressureLevel, trend_of};
use crate::error::unix_millis;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;

/// Samples kept after an aggressive (critical) trim
const CRITICAL_TRIM_KEEP: usize = 10;

/// Timing and history settings for the monitor
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub max_samples: usize,
    pub cleanup_cooldown: Duration,
    /// Delay between the two reclaim requests of a critical cleanup
    pub critical_retry_delay: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_samples: 100,
            cleanup_cooldown: Duration::from_secs(5),
            critical_retry_delay: Duration::from_millis(100),
        }
    }
}

/// Alert raised when a sample crosses a threshold
#[derive(Debug, Clone, Serialize)]
pub struct PressureAlert {
    pub level: PressureLevel,
    pub usage: u64,
    pub threshold: u64,
    pub timestamp_ms: u64,
}

impl PressureAlert {
    pub fn message(&self) -> String {
        format!(
            "memory {} pressure: {:.1} MB used (threshold {:.1} MB)",
            self.level,
            self.usage as f64 / (1024.0 * 1024.0),
            self.threshold as f64 / (1024.0 * 1024.0),
        )
    }
}

#[derive(Default)]
struct MonitorState {
    samples: VecDeque<MemorySample>,
    last_cleanup: Option<Instant>,
    alerts: Vec<PressureAlert>,
    reclaim_requests: u32,
    cleanups: u64,
}

/// Periodic process-memory sampler with pressure classification
///
/// Lifecycle is explicit: `Idle` after construction, `Monitoring` between
/// [`start`](Self::start) and [`stop`](Self::stop). Both transitions are
/// no-ops when already in the target state. Queries work in either state and
/// read the sample history, which [`sample_now`](Self::sample_now) can also
/// extend on demand.
///
/// The monitor never acts on other components. Cleanups are surfaced as
/// reclaim requests that the owner collects with
/// [`take_reclaim_requests`](Self::take_reclaim_requests) at a point of its
/// choosing.
pub struct MemoryMonitor {
    thresholds: MemoryThresholds,
    settings: MonitorSettings,
    sampler: Arc<dyn MemorySampler>,
    state: Arc<Mutex<MonitorState>>,
    ticker: Option<JoinHandle<()>>,
}

impl MemoryMonitor {
    pub fn new(
        thresholds: MemoryThresholds,
        settings: MonitorSettings,
        sampler: Arc<dyn MemorySampler>,
    ) -> Self {
        Self {
            thresholds,
            settings,
            sampler,
            state: Arc::new(Mutex::new(MonitorState::default())),
            ticker: None,
        }
    }

    /// Begin periodic sampling. Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if self.ticker.is_some() {
            return;
        }

        let thresholds = self.thresholds;
        let settings = self.settings.clone();
        let sampler = self.sampler.clone();
        let state = self.state.clone();

        tracing::debug!(
            "memory monitor started (interval {:?}, warning {} / cleanup {} / critical {} bytes)",
            settings.interval,
            thresholds.warning,
            thresholds.cleanup,
            thresholds.critical
        );

        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(settings.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let sample = sampler.sample();
                let level = record(&state, &thresholds, &settings, sample);
                if level == PressureLevel::Critical {
                    // Second reclaim attempt after a short pause
                    tokio::time::sleep(settings.critical_retry_delay).await;
                    lock(&state).reclaim_requests += 1;
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
            tracing::debug!("memory monitor stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.ticker.is_some()
    }

    /// Take a sample immediately and run the same classification as a tick
    pub fn sample_now(&self) -> MemorySample {
        let sample = self.sampler.sample();
        let level = record(&self.state, &self.thresholds, &self.settings, sample);
        if level == PressureLevel::Critical {
            lock(&self.state).reclaim_requests += 1;
        }
        sample
    }

    pub fn thresholds(&self) -> MemoryThresholds {
        self.thresholds
    }

    pub fn latest(&self) -> Option<MemorySample> {
        lock(&self.state).samples.back().copied()
    }

    /// Pressure level of the most recent sample (normal without samples)
    pub fn pressure_level(&self) -> PressureLevel {
        self.latest()
            .map(|sample| self.thresholds.classify(sample.usage()))
            .unwrap_or(PressureLevel::Normal)
    }

    pub fn is_pressure_high(&self) -> bool {
        self.pressure_level() >= PressureLevel::Warning
    }

    pub fn should_reduce_parallelism(&self) -> bool {
        self.pressure_level() >= PressureLevel::Cleanup
    }

    pub fn recommended_chunk_size(&self, base: usize) -> usize {
        self.pressure_level().scale(base)
    }

    pub fn recommended_parallelism(&self, base: usize) -> usize {
        self.pressure_level().scale(base)
    }

    /// Trend across the last `k` samples
    pub fn trend(&self, k: usize) -> MemoryTrend {
        let state = lock(&self.state);
        let skip = state.samples.len().saturating_sub(k);
        let recent: Vec<MemorySample> = state.samples.iter().skip(skip).copied().collect();
        trend_of(&recent)
    }

    /// Highest usage in the retained history
    pub fn peak(&self) -> u64 {
        lock(&self.state).samples.iter().map(MemorySample::usage).max().unwrap_or(0)
    }

    /// Mean usage in the retained history
    pub fn average(&self) -> u64 {
        let state = lock(&self.state);
        if state.samples.is_empty() {
            return 0;
        }
        let total: u128 = state.samples.iter().map(|s| s.usage() as u128).sum();
        (total / state.samples.len() as u128) as u64
    }

    pub fn sample_count(&self) -> usize {
        lock(&self.state).samples.len()
    }

    /// Number of cleanup actions performed so far
    pub fn cleanup_count(&self) -> u64 {
        lock(&self.state).cleanups
    }

    /// Hand accumulated alerts to the caller
    pub fn drain_alerts(&self) -> Vec<PressureAlert> {
        std::mem::take(&mut lock(&self.state).alerts)
    }

    /// Number of reclaim requests issued since the last call
    pub fn take_reclaim_requests(&self) -> u32 {
        std::mem::take(&mut lock(&self.state).reclaim_requests)
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(state: &Mutex<MonitorState>) -> MutexGuard<'_, MonitorState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Append a sample, classify it and apply the matching action
fn record(
    state: &Mutex<MonitorState>,
    thresholds: &MemoryThresholds,
    settings: &MonitorSettings,
    sample: MemorySample,
) -> PressureLevel {
    let mut state = lock(state);

    state.samples.push_back(sample);
    while state.samples.len() > settings.max_samples.max(1) {
        state.samples.pop_front();
    }

    let usage = sample.usage();
    let level = thresholds.classify(usage);
    let alert = |threshold| PressureAlert {
        level,
        usage,
        threshold,
        timestamp_ms: unix_millis(SystemTime::now()),
    };

    match level {
        PressureLevel::Critical => {
            let alert = alert(thresholds.critical);
            tracing::error!("{}; forcing aggressive cleanup", alert.message());
            state.alerts.push(alert);
            state.reclaim_requests += 1;
            trim(&mut state.samples, CRITICAL_TRIM_KEEP);
            state.last_cleanup = Some(Instant::now());
            state.cleanups += 1;
        }
        PressureLevel::Cleanup => {
            let cooling_down = state
                .last_cleanup
                .is_some_and(|at| at.elapsed() < settings.cleanup_cooldown);
            if cooling_down {
                tracing::debug!("memory cleanup skipped: within cooldown window");
            } else {
                let alert = alert(thresholds.cleanup);
                tracing::warn!("{}; requesting cleanup", alert.message());
                state.alerts.push(alert);
                state.reclaim_requests += 1;
                trim(&mut state.samples, (settings.max_samples / 2).max(CRITICAL_TRIM_KEEP));
                state.last_cleanup = Some(Instant::now());
                state.cleanups += 1;
            }
        }
        PressureLevel::Warning => {
            let alert = alert(thresholds.warning);
            tracing::warn!("{}", alert.message());
            state.alerts.push(alert);
        }
        PressureLevel::Normal => {}
    }

    level
}

fn trim(samples: &mut VecDeque<MemorySample>, keep: usize) {
    let excess = samples.len().saturating_sub(keep);
    samples.drain(..excess);
}
