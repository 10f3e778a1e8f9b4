//! Memory-bounded content cache keyed by path and modification time
//!
//! An entry is only served while the file's current modification time exactly
//! matches the one recorded at insertion. Once the aggregate size exceeds the
//! configured cap, entries are evicted oldest-modification-time first.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Cached content for one file
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub content: String,
    pub last_modified: SystemTime,
    pub size_bytes: usize,
    pub integrity_hash: u32,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size_bytes: usize,
    pub entries: usize,
    pub evictions: u64,
    pub capacity_bytes: usize,
}

pub struct ContentCache {
    entries: HashMap<PathBuf, CacheEntry>,
    /// Eviction order: (mtime, path), oldest first
    by_age: BTreeSet<(SystemTime, PathBuf)>,
    total_size: usize,
    max_size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl ContentCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_age: BTreeSet::new(),
            total_size: 0,
            max_size,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up content for `path`, valid only if it was cached at `current_mtime`
    pub fn get(&mut self, path: &Path, current_mtime: SystemTime) -> Option<&str> {
        match self.entries.get(path) {
            Some(entry) if entry.last_modified == current_mtime => {
                self.hits += 1;
                Some(entry.content.as_str())
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    /// Lookup without touching the counters, for readers holding a shared lock
    pub fn peek(&self, path: &Path, current_mtime: SystemTime) -> Option<&str> {
        self.entries
            .get(path)
            .filter(|entry| entry.last_modified == current_mtime)
            .map(|entry| entry.content.as_str())
    }

    /// Count a lookup performed through [`peek`](Self::peek)
    pub fn record_lookup(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }

    /// Insert or replace the entry for `path`, then evict down to the cap
    pub fn set(&mut self, path: &Path, content: String, mtime: SystemTime) {
        self.remove(path);

        let size_bytes = content.len();
        let entry = CacheEntry {
            integrity_hash: rolling_hash(content.as_bytes()),
            content,
            last_modified: mtime,
            size_bytes,
        };

        self.total_size += size_bytes;
        self.by_age.insert((mtime, path.to_path_buf()));
        self.entries.insert(path.to_path_buf(), entry);

        self.evict_until(self.max_size);
    }

    /// Evict oldest entries until the cache holds at most `target` bytes
    pub fn shrink_to(&mut self, target: usize) -> usize {
        let before = self.entries.len();
        self.evict_until(target);
        before - self.entries.len()
    }

    /// Recompute the stored hash of an entry; `None` when `path` is not cached
    pub fn verify(&self, path: &Path) -> Option<bool> {
        self.entries
            .get(path)
            .map(|entry| rolling_hash(entry.content.as_bytes()) == entry.integrity_hash)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_age.clear();
        self.total_size = 0;
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let accesses = self.hits + self.misses;
        let hit_rate = if accesses == 0 {
            0.0
        } else {
            self.hits as f64 / accesses as f64
        };

        CacheStats {
            hits: self.hits,
            misses: self.misses,
            hit_rate,
            size_bytes: self.total_size,
            entries: self.entries.len(),
            evictions: self.evictions,
            capacity_bytes: self.max_size,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.total_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove(&mut self, path: &Path) -> Option<CacheEntry> {
        let entry = self.entries.remove(path)?;
        self.by_age.remove(&(entry.last_modified, path.to_path_buf()));
        self.total_size -= entry.size_bytes;
        Some(entry)
    }

    fn evict_until(&mut self, target: usize) {
        while self.total_size > target {
            let Some((_, oldest)) = self.by_age.pop_first() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&oldest) {
                self.total_size -= entry.size_bytes;
                self.evictions += 1;
                tracing::trace!("cache evicted {} ({} bytes)", oldest.display(), entry.size_bytes);
            }
        }
    }
}

/// Cheap non-cryptographic rolling hash (`h = h * 31 + b`, wrapping)
pub fn rolling_hash(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |hash, &b| hash.wrapping_mul(31).wrapping_add(b as u32))
}
