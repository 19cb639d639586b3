//! One LRU cache tier
//!
//! A tier is bounded by entry count and by total bytes; violating either
//! bound evicts least-recently-used entries until both hold again. Each
//! entry tracks creation time, last access and access count, and the tier
//! keeps hit/miss/eviction counters for the metrics surface.

use chrono::{DateTime, Utc};
use lru::LruCache;

/// Bounds for one tier
#[derive(Debug, Clone, Copy)]
pub struct TierConfig {
    /// Maximum number of entries
    pub max_entries: usize,

    /// Maximum total size of cached values in bytes
    pub max_bytes: usize,
}

impl TierConfig {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            max_bytes,
        }
    }
}

/// Counters exposed to the metrics surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub bytes: usize,
}

/// A cached value with its accounting
#[derive(Debug, Clone)]
pub struct Entry<V> {
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub size_bytes: usize,
}

/// An LRU tier over string keys
pub struct CacheTier<V> {
    name: &'static str,
    config: TierConfig,
    entries: LruCache<String, Entry<V>>,
    bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V> CacheTier<V> {
    /// Create an empty tier
    pub fn new(name: &'static str, config: TierConfig) -> Self {
        Self {
            name,
            config,
            entries: LruCache::unbounded(),
            bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up a key, promoting it to most-recently-used on hit
    pub fn get(&mut self, key: &str) -> Option<&V> {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_accessed = Utc::now();
                entry.access_count += 1;
                self.hits += 1;
                Some(&entry.value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Look up a key without touching recency or counters
    pub fn peek(&self, key: &str) -> Option<&V> {
        self.entries.peek(key).map(|e| &e.value)
    }

    /// Insert a value, evicting LRU entries until both bounds hold
    pub fn put(&mut self, key: String, value: V, size_bytes: usize) {
        if let Some(old) = self.entries.pop(&key) {
            self.bytes -= old.size_bytes;
        }

        let now = Utc::now();
        self.entries.put(
            key,
            Entry {
                value,
                created_at: now,
                last_accessed: now,
                access_count: 0,
                size_bytes,
            },
        );
        self.bytes += size_bytes;
        self.enforce_bounds();
    }

    fn enforce_bounds(&mut self) {
        while self.entries.len() > self.config.max_entries
            || (self.bytes > self.config.max_bytes && self.entries.len() > 1)
        {
            match self.entries.pop_lru() {
                Some((_, entry)) => {
                    self.bytes -= entry.size_bytes;
                    self.evictions += 1;
                }
                None => break,
            }
        }
        if self.entries.len() <= 1 && self.bytes > self.config.max_bytes {
            // A single oversized value still violates the byte bound
            if let Some((_, entry)) = self.entries.pop_lru() {
                self.bytes -= entry.size_bytes;
                self.evictions += 1;
            }
        }
    }

    /// Evict a fraction of entries in LRU order (memory-pressure response)
    pub fn evict_fraction(&mut self, fraction: f64) -> usize {
        let target = ((self.entries.len() as f64) * fraction).ceil() as usize;
        let mut evicted = 0;
        for _ in 0..target {
            match self.entries.pop_lru() {
                Some((_, entry)) => {
                    self.bytes -= entry.size_bytes;
                    self.evictions += 1;
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            tracing::debug!("Evicted {} entries from {} tier", evicted, self.name);
        }
        evicted
    }

    /// Remove everything
    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tier is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes of cached values
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Configured bounds
    pub fn config(&self) -> TierConfig {
        self.config
    }

    /// Counter snapshot
    pub fn stats(&self) -> TierStats {
        TierStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            entries: self.entries.len(),
            bytes: self.bytes,
        }
    }
}
