//! Persistent learned dictionary
//!
//! Every validated translation the pipeline produces is remembered here, so
//! repeated text becomes a lookup instead of an engine call. Storage is one
//! gzip-compressed JSON file per language pair under the `dictionary/`
//! directory. Pairs load lazily on first access and are guarded by one mutex
//! each; writes are buffered in memory and flushed explicitly or on
//! shutdown. An unreadable file is quarantined with a `.corrupt.<timestamp>`
//! suffix and the pair starts fresh.

use crate::{normalize_text, CacheError, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// One learned translation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    /// Translated text
    pub translation: String,

    /// Confidence at save time, in [0, 1]
    pub confidence: f32,

    /// Engine that produced the translation
    pub source_engine: String,

    /// When the entry was first learned
    pub created_at: DateTime<Utc>,

    /// How many times the entry was looked up
    pub usage_count: u64,
}

#[derive(Debug, Default)]
struct PairStore {
    entries: HashMap<String, DictionaryEntry>,
    dirty: bool,
}

type PairKey = (String, String);

/// The on-disk learned dictionary, partitioned by language pair
pub struct LearnedDictionary {
    dir: PathBuf,
    pairs: Mutex<HashMap<PairKey, Arc<Mutex<PairStore>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LearnedDictionary {
    /// Open a dictionary rooted at `dir` (created on first flush)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pairs: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding the pair files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn pair_path(&self, source_lang: &str, target_lang: &str) -> PathBuf {
        self.dir
            .join(format!("learned_dictionary_{source_lang}_{target_lang}.json.gz"))
    }

    fn pair_store(&self, source_lang: &str, target_lang: &str) -> Arc<Mutex<PairStore>> {
        let key = (source_lang.to_string(), target_lang.to_string());
        let mut pairs = lock(&self.pairs);
        if let Some(store) = pairs.get(&key) {
            return Arc::clone(store);
        }
        let store = Arc::new(Mutex::new(self.load_pair(source_lang, target_lang)));
        pairs.insert(key, Arc::clone(&store));
        store
    }

    fn load_pair(&self, source_lang: &str, target_lang: &str) -> PairStore {
        let path = self.pair_path(source_lang, target_lang);
        if !path.is_file() {
            return PairStore::default();
        }
        match Self::read_pair_file(&path) {
            Ok(entries) => {
                tracing::info!(
                    "Loaded {} learned translations for {}->{}",
                    entries.len(),
                    source_lang,
                    target_lang
                );
                PairStore {
                    entries,
                    dirty: false,
                }
            }
            Err(e) => {
                let quarantine = path.with_extension(format!(
                    "corrupt.{}",
                    Utc::now().format("%Y%m%d%H%M%S")
                ));
                tracing::error!(
                    "Dictionary file {} unreadable ({}); moving to {}",
                    path.display(),
                    e,
                    quarantine.display()
                );
                if let Err(rename_err) = std::fs::rename(&path, &quarantine) {
                    tracing::warn!("Could not quarantine corrupt dictionary: {}", rename_err);
                }
                PairStore::default()
            }
        }
    }

    fn read_pair_file(path: &Path) -> Result<HashMap<String, DictionaryEntry>> {
        let file = std::fs::File::open(path)?;
        let mut decoder = GzDecoder::new(file);
        let mut json = String::new();
        decoder.read_to_string(&mut json)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Look up a learned translation
    ///
    /// Hits bump the entry's usage count; the bump is flushed with the next
    /// save.
    pub fn lookup(
        &self,
        source_lang: &str,
        target_lang: &str,
        source_text: &str,
    ) -> Option<DictionaryEntry> {
        let normalized = normalize_text(source_text);
        if normalized.is_empty() {
            return None;
        }
        let store = self.pair_store(source_lang, target_lang);
        let mut guard = lock(&store);
        let entry = guard.entries.get_mut(&normalized)?;
        entry.usage_count += 1;
        let found = entry.clone();
        guard.dirty = true;
        Some(found)
    }

    /// All source texts learned for a pair (used by near-match probes)
    pub fn source_texts(&self, source_lang: &str, target_lang: &str) -> Vec<String> {
        let store = self.pair_store(source_lang, target_lang);
        let guard = lock(&store);
        guard.entries.keys().cloned().collect()
    }

    /// Learn a translation
    ///
    /// The entry must have distinct, non-empty source and translation after
    /// normalization; callers are responsible for sentence validation and
    /// confidence gating before saving. Existing entries are updated in
    /// place, keeping their creation time.
    pub fn save(
        &self,
        source_lang: &str,
        target_lang: &str,
        source_text: &str,
        translation: &str,
        confidence: f32,
        source_engine: &str,
    ) -> Result<()> {
        let source = normalize_text(source_text);
        let translated = normalize_text(translation);
        if source.is_empty() || translated.is_empty() {
            return Err(CacheError::InvalidEntry(
                "empty source or translation".into(),
            ));
        }
        if source == translated {
            return Err(CacheError::InvalidEntry(
                "translation identical to source".into(),
            ));
        }

        let store = self.pair_store(source_lang, target_lang);
        let mut guard = lock(&store);
        match guard.entries.entry(source) {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                let existing = occupied.get_mut();
                existing.translation = translated;
                existing.confidence = confidence.clamp(0.0, 1.0);
                existing.source_engine = source_engine.to_string();
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(DictionaryEntry {
                    translation: translated,
                    confidence: confidence.clamp(0.0, 1.0),
                    source_engine: source_engine.to_string(),
                    created_at: Utc::now(),
                    usage_count: 0,
                });
            }
        }
        guard.dirty = true;
        Ok(())
    }

    /// Number of entries for a pair
    pub fn pair_len(&self, source_lang: &str, target_lang: &str) -> usize {
        let store = self.pair_store(source_lang, target_lang);
        let guard = lock(&store);
        guard.entries.len()
    }

    /// Flush one pair to disk if it has unsaved changes
    pub fn flush_pair(&self, source_lang: &str, target_lang: &str) -> Result<()> {
        let store = self.pair_store(source_lang, target_lang);
        let mut guard = lock(&store);
        if !guard.dirty {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)?;

        let path = self.pair_path(source_lang, target_lang);
        let tmp = path.with_extension("tmp");
        let json = serde_json::to_string(&guard.entries)?;
        {
            let file = std::fs::File::create(&tmp)?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(json.as_bytes())?;
            encoder.finish()?;
        }
        std::fs::rename(&tmp, &path)?;
        guard.dirty = false;
        tracing::debug!(
            "Flushed {} entries for {}->{}",
            guard.entries.len(),
            source_lang,
            target_lang
        );
        Ok(())
    }

    /// Flush every loaded pair; called on graceful shutdown
    pub fn flush_all(&self) -> Result<()> {
        let keys: Vec<PairKey> = lock(&self.pairs).keys().cloned().collect();
        for (src, tgt) in keys {
            self.flush_pair(&src, &tgt)?;
        }
        Ok(())
    }
}

impl Drop for LearnedDictionary {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            tracing::warn!("Dictionary flush on drop failed: {}", e);
        }
    }
}
