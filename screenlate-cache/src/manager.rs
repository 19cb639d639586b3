//! Multi-tier cache manager
//!
//! Owns the frame, OCR and translation tiers plus the learned dictionary.
//! The translation tier reads through to the dictionary: a memory miss that
//! hits the dictionary re-primes the tier and counts as a dictionary hit.
//! When aggregate memory use crosses the pressure threshold, every tier
//! sheds a fraction of its entries in LRU order.

use crate::dictionary::LearnedDictionary;
use crate::tier::{CacheTier, TierConfig, TierStats};
use crate::{text_hash, Result};
use screenlate_plugins::TextBlock;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// Bounds and thresholds for the cache manager
#[derive(Debug, Clone)]
pub struct CacheManagerConfig {
    /// Frame tier bounds
    pub frame: TierConfig,

    /// OCR tier bounds
    pub ocr: TierConfig,

    /// Translation tier bounds
    pub translation: TierConfig,

    /// Aggregate-bytes ratio that triggers the pressure eviction
    pub pressure_ratio: f64,

    /// Fraction of each tier evicted under pressure
    pub pressure_evict_fraction: f64,

    /// Directory for the learned dictionary files
    pub dictionary_dir: PathBuf,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            frame: TierConfig::new(100, 50 * 1024 * 1024),
            ocr: TierConfig::new(500, 20 * 1024 * 1024),
            translation: TierConfig::new(1000, 10 * 1024 * 1024),
            pressure_ratio: 0.8,
            pressure_evict_fraction: 0.2,
            dictionary_dir: PathBuf::from("dictionary"),
        }
    }
}

/// Stats snapshot across all tiers, for the control API
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub frame: TierStats,
    pub ocr: TierStats,
    pub translation: TierStats,
    pub dictionary_hits: u64,
    pub dictionary_saves: u64,
}

/// Size estimate for a cached block list: texts plus fixed per-block overhead
fn blocks_size(blocks: &[TextBlock]) -> usize {
    const BLOCK_OVERHEAD: usize = 64;
    blocks
        .iter()
        .map(|b| b.text.len() + BLOCK_OVERHEAD)
        .sum()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The three-tier cache plus the persistent dictionary
pub struct CacheManager {
    config: CacheManagerConfig,
    // Frame tier stores the byte size of the frame that produced each hash;
    // its purpose is recency bookkeeping for the similarity gate, not pixels.
    frames: Mutex<CacheTier<usize>>,
    ocr: Mutex<CacheTier<Vec<TextBlock>>>,
    translations: Mutex<CacheTier<String>>,
    dictionary: LearnedDictionary,
    dictionary_hits: std::sync::atomic::AtomicU64,
    dictionary_saves: std::sync::atomic::AtomicU64,
}

impl CacheManager {
    /// Create a manager with the given bounds
    pub fn new(config: CacheManagerConfig) -> Self {
        let dictionary = LearnedDictionary::new(&config.dictionary_dir);
        Self {
            frames: Mutex::new(CacheTier::new("frame", config.frame)),
            ocr: Mutex::new(CacheTier::new("ocr", config.ocr)),
            translations: Mutex::new(CacheTier::new("translation", config.translation)),
            dictionary,
            dictionary_hits: std::sync::atomic::AtomicU64::new(0),
            dictionary_saves: std::sync::atomic::AtomicU64::new(0),
            config,
        }
    }

    /// Manager with default bounds rooted at `dictionary_dir`
    pub fn with_dictionary_dir(dictionary_dir: impl Into<PathBuf>) -> Self {
        Self::new(CacheManagerConfig {
            dictionary_dir: dictionary_dir.into(),
            ..Default::default()
        })
    }

    /// The learned dictionary
    pub fn dictionary(&self) -> &LearnedDictionary {
        &self.dictionary
    }

    /// Translation tier key: `source:target:<hash of normalized text>`
    pub fn translation_key(source_lang: &str, target_lang: &str, text: &str) -> String {
        format!("{source_lang}:{target_lang}:{}", text_hash(text))
    }

    /// Record a frame hash in the frame tier
    pub fn remember_frame(&self, frame_hash: &str, frame_bytes: usize) {
        lock(&self.frames).put(frame_hash.to_string(), frame_bytes, frame_bytes.min(1024));
        self.maybe_relieve_pressure();
    }

    /// Whether a frame hash is still cached (promotes on hit)
    pub fn has_frame(&self, frame_hash: &str) -> bool {
        lock(&self.frames).get(frame_hash).is_some()
    }

    /// Cached OCR result for an image hash
    pub fn get_ocr(&self, image_hash: &str) -> Option<Vec<TextBlock>> {
        lock(&self.ocr).get(image_hash).cloned()
    }

    /// Cache an OCR result
    pub fn put_ocr(&self, image_hash: &str, blocks: &[TextBlock]) {
        let size = blocks_size(blocks);
        lock(&self.ocr).put(image_hash.to_string(), blocks.to_vec(), size);
        self.maybe_relieve_pressure();
    }

    /// Cached translation, reading through to the learned dictionary
    ///
    /// A dictionary hit is promoted into the memory tier so the next lookup
    /// stays in memory.
    pub fn get_translation(
        &self,
        source_lang: &str,
        target_lang: &str,
        text: &str,
    ) -> Option<String> {
        let key = Self::translation_key(source_lang, target_lang, text);
        if let Some(hit) = lock(&self.translations).get(&key).cloned() {
            return Some(hit);
        }
        let entry = self.dictionary.lookup(source_lang, target_lang, text)?;
        self.dictionary_hits
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let translated = entry.translation;
        lock(&self.translations).put(key, translated.clone(), translated.len());
        Some(translated)
    }

    /// Cache a translation in memory only
    pub fn put_translation(
        &self,
        source_lang: &str,
        target_lang: &str,
        text: &str,
        translated: &str,
    ) {
        let key = Self::translation_key(source_lang, target_lang, text);
        lock(&self.translations).put(key, translated.to_string(), translated.len());
        self.maybe_relieve_pressure();
    }

    /// Learn a translation persistently (and prime the memory tier)
    ///
    /// Callers gate on sentence validity and confidence before calling.
    pub fn learn_translation(
        &self,
        source_lang: &str,
        target_lang: &str,
        text: &str,
        translated: &str,
        confidence: f32,
        engine: &str,
    ) -> Result<()> {
        self.dictionary
            .save(source_lang, target_lang, text, translated, confidence, engine)?;
        self.dictionary_saves
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.put_translation(source_lang, target_lang, text, translated);
        Ok(())
    }

    /// Flush all dictionary pairs; called on shutdown
    pub fn flush(&self) -> Result<()> {
        self.dictionary.flush_all()
    }

    /// Evict a fraction of every tier when aggregate bytes cross the threshold
    fn maybe_relieve_pressure(&self) {
        let total_bytes;
        let budget;
        {
            let frames = lock(&self.frames);
            let ocr = lock(&self.ocr);
            let translations = lock(&self.translations);
            total_bytes = frames.bytes() + ocr.bytes() + translations.bytes();
            budget = frames.config().max_bytes
                + ocr.config().max_bytes
                + translations.config().max_bytes;
        }
        if (total_bytes as f64) <= (budget as f64) * self.config.pressure_ratio {
            return;
        }
        let fraction = self.config.pressure_evict_fraction;
        let evicted = lock(&self.frames).evict_fraction(fraction)
            + lock(&self.ocr).evict_fraction(fraction)
            + lock(&self.translations).evict_fraction(fraction);
        tracing::info!(
            "Memory pressure: evicted {} cache entries ({} of {} bytes in use)",
            evicted,
            total_bytes,
            budget
        );
    }

    /// Counter snapshot across tiers
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            frame: lock(&self.frames).stats(),
            ocr: lock(&self.ocr).stats(),
            translation: lock(&self.translations).stats(),
            dictionary_hits: self
                .dictionary_hits
                .load(std::sync::atomic::Ordering::Relaxed),
            dictionary_saves: self
                .dictionary_saves
                .load(std::sync::atomic::Ordering::Relaxed),
        }
    }

    /// Drop every in-memory entry (dictionary files are untouched)
    pub fn clear_memory(&self) {
        lock(&self.frames).clear();
        lock(&self.ocr).clear();
        lock(&self.translations).clear();
    }
}
