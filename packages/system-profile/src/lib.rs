//! System Profile Crate
//!
//! Provides cached host information plus a live probe of the current
//! process's memory footprint.
//!
//! Host values are computed once on first access and cached for the program
//! lifetime (std::sync::LazyLock). Process memory is never cached: every call
//! to [`ProcessMemory::sample`] refreshes it from the OS.

use std::sync::{Arc, LazyLock, Mutex};

use sysinfo::{MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

/// Global system profile instance - computed once, cached forever
pub static SYSTEM: LazyLock<Arc<SystemProfile>> =
    LazyLock::new(|| Arc::new(SystemProfile::detect()));

/// Host profile containing hardware and resource information
#[derive(Debug, Clone)]
pub struct SystemProfile {
    /// Total CPU cores (including hyperthreading)
    pub cpu_count: usize,

    /// Physical CPU cores (excluding hyperthreading)
    pub physical_cpu_count: usize,

    /// Total system memory in bytes
    pub total_memory: u64,

    /// Available system memory in bytes at startup
    pub available_memory: u64,

    /// Operating system name
    pub os_name: String,

    /// Operating system version
    pub os_version: String,

    /// Recommended worker count for I/O-bound tasks
    pub recommended_io_workers: usize,

    /// Recommended worker count for CPU-bound tasks
    pub recommended_cpu_workers: usize,
}

impl SystemProfile {
    /// Detect system profile (called once via LazyLock)
    fn detect() -> Self {
        let cpu_count = num_cpus::get();
        let physical_cpu_count = num_cpus::get_physical();

        let mut sys = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        sys.refresh_memory();

        let os_name = System::name().unwrap_or_else(|| "Unknown".to_string());
        let os_version = System::os_version().unwrap_or_else(|| "Unknown".to_string());

        Self {
            cpu_count,
            physical_cpu_count,
            total_memory: sys.total_memory(),
            available_memory: sys.available_memory(),
            os_name,
            os_version,
            // File I/O tolerates more in-flight work than there are cores
            recommended_io_workers: cpu_count * 2,
            recommended_cpu_workers: physical_cpu_count.max(1),
        }
    }

    /// Default memory budget for a processing run: half of what was free at startup
    pub fn default_memory_budget(&self) -> u64 {
        (self.available_memory / 2).max(256 * 1024 * 1024)
    }

    /// Get a human-readable summary of system resources
    pub fn summary(&self) -> String {
        format!(
            "System: {} {}\n\
             CPUs: {} ({} physical)\n\
             Memory: {:.2} GB ({:.2} GB available)",
            self.os_name,
            self.os_version,
            self.cpu_count,
            self.physical_cpu_count,
            self.total_memory_gb(),
            self.available_memory_gb(),
        )
    }

    /// Get memory in GB
    pub fn total_memory_gb(&self) -> f64 {
        self.total_memory as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    /// Get available memory in GB
    pub fn available_memory_gb(&self) -> f64 {
        self.available_memory as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Point-in-time memory usage of the current process, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Resident set size
    pub resident: u64,
    /// Virtual address space size
    pub virtual_size: u64,
}

/// Live probe of the current process's memory
///
/// Holds its own `sysinfo::System` so repeated samples only refresh the one
/// process entry instead of the whole process table.
pub struct ProcessMemory {
    pid: Option<Pid>,
    sys: Mutex<System>,
}

impl ProcessMemory {
    pub fn new() -> Self {
        Self {
            pid: sysinfo::get_current_pid().ok(),
            sys: Mutex::new(System::new()),
        }
    }

    /// Refresh and read the current process's memory usage.
    ///
    /// Returns `None` when the platform does not expose per-process memory.
    pub fn sample(&self) -> Option<MemoryUsage> {
        let pid = self.pid?;
        let mut sys = self.sys.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        sys.process(pid).map(|process| MemoryUsage {
            resident: process.memory(),
            virtual_size: process.virtual_memory(),
        })
    }
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self::new()
    }
}
