//! Frame-similarity gate
//!
//! Decides whether a freshly captured frame is worth re-processing. The
//! frame is downsampled, converted to luminance and content-hashed; a hash
//! equal to the previous frame's means "similar" and the pipeline skips OCR
//! and translation for that tick. Motion tracking may still re-position
//! existing overlays for a skipped frame.

use crate::frame::Frame;

/// Downsample factor applied before hashing
pub const HASH_DOWNSAMPLE: u32 = 4;

/// Content hash of a frame's downsampled luminance
///
/// Stable across identical captures of the same pixels; any pixel change
/// that survives downsampling produces a different hash.
pub fn frame_hash(frame: &Frame, factor: u32) -> String {
    let (gray, w, h) = frame.downsampled_gray(factor);
    let mut hasher = blake3::Hasher::new();
    hasher.update(&w.to_le_bytes());
    hasher.update(&h.to_le_bytes());
    hasher.update(&gray);
    hasher.finalize().to_hex().to_string()
}

/// Per-region similarity state
#[derive(Debug)]
pub struct SimilarityGate {
    downsample: u32,
    last_hash: Option<String>,
}

impl SimilarityGate {
    /// Create a gate with the default downsample factor
    pub fn new() -> Self {
        Self::with_downsample(HASH_DOWNSAMPLE)
    }

    /// Create a gate with a specific downsample factor
    pub fn with_downsample(downsample: u32) -> Self {
        Self {
            downsample: downsample.max(1),
            last_hash: None,
        }
    }

    /// Observe a frame, returning its hash and whether it matches the last one
    ///
    /// The first frame ever observed is never similar. The gate always
    /// records the new hash, so two alternating frames never both skip.
    pub fn observe(&mut self, frame: &Frame) -> (String, bool) {
        let hash = frame_hash(frame, self.downsample);
        let similar = self.last_hash.as_deref() == Some(hash.as_str());
        if !similar {
            self.last_hash = Some(hash.clone());
        }
        (hash, similar)
    }

    /// Hash of the last observed frame, if any
    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    /// Forget the last frame (e.g. after a region change)
    pub fn reset(&mut self) {
        self.last_hash = None;
    }
}

impl Default for SimilarityGate {
    fn default() -> Self {
        Self::new()
    }
}
