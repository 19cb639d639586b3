//! Cache Manager Module
//!
//! Three independent LRU tiers sit between the pipeline stages:
//!
//! - **Frame** tier keyed by downsampled content hash
//! - **OCR** tier keyed by image hash, holding recognized text blocks
//! - **Translation** tier keyed by `source:target:text-hash`
//!
//! Behind the translation tier is the persistent learned dictionary: one
//! gzip-compressed JSON file per language pair, loaded lazily and flushed on
//! save or shutdown. Translation-cache misses read through to the dictionary.

use thiserror::Error;

pub mod dictionary;
pub mod manager;
pub mod tier;

pub use dictionary::{DictionaryEntry, LearnedDictionary};
pub use manager::{CacheManager, CacheManagerConfig, CacheStatsSnapshot};
pub use tier::{CacheTier, TierConfig, TierStats};

/// Errors from cache and dictionary operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Dictionary file for {source_lang}->{target} is corrupt: {reason}")]
    CorruptDictionary {
        source_lang: String,
        target: String,
        reason: String,
    },

    #[error("Rejected dictionary entry: {0}")]
    InvalidEntry(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Normalize text for cache keys: trim and collapse internal whitespace
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stable content hash of normalized text
pub fn text_hash(text: &str) -> String {
    blake3::hash(normalize_text(text).as_bytes())
        .to_hex()
        .to_string()
}
