//! OCR engine interface
//!
//! OCR turns a captured frame into an ordered list of text blocks. The order
//! the engine emits is the reading order and is preserved all the way to the
//! overlay; nothing downstream may re-sort blocks by geometry.

use crate::{PluginError, Result};
use screenlate_capture::{Frame, Rect};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One unit of recognized text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    /// Recognized text
    pub text: String,

    /// Bounding rectangle on the captured image
    pub rect: Rect,

    /// Engine confidence in [0, 1]
    pub confidence: f32,

    /// Detected language tag, if the engine reports one
    #[serde(default)]
    pub language: Option<String>,

    /// Open metadata bag for optimizers (merge counts, validation scores, ...)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TextBlock {
    /// Create a block with no language tag or metadata
    pub fn new(text: impl Into<String>, rect: Rect, confidence: f32) -> Self {
        Self {
            text: text.into(),
            rect,
            confidence: confidence.clamp(0.0, 1.0),
            language: None,
            metadata: HashMap::new(),
        }
    }

    /// Set a metadata value
    pub fn set_meta(&mut self, key: &str, value: serde_json::Value) {
        self.metadata.insert(key.to_string(), value);
    }

    /// Read a metadata value
    pub fn meta(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }
}

/// Options passed to every OCR call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrOptions {
    /// Language hint (BCP 47-ish tag, e.g. "en", "ja")
    pub language: String,

    /// Blocks below this confidence are dropped by the engine
    pub confidence_threshold: f32,

    /// Whether the engine should run its own image preprocessing
    pub preprocessing: bool,

    /// Whether the engine may use the GPU
    pub gpu: bool,

    /// Batch size for engines that window the image internally
    pub batch_size: usize,

    /// Per-call deadline in milliseconds
    pub timeout_ms: u64,

    /// Engine-specific settings
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            confidence_threshold: 0.3,
            preprocessing: true,
            gpu: false,
            batch_size: 1,
            timeout_ms: 5_000,
            extra: HashMap::new(),
        }
    }
}

/// An OCR implementation
///
/// Engines are singletons initialized on first use and must be callable from
/// successive ticks sequentially. An empty frame yields an empty list, not an
/// error.
pub trait OcrEngine: Send {
    /// Engine name for logs and plugin listings
    fn name(&self) -> &str;

    /// One-time initialization (model loading, device selection)
    fn initialize(&mut self, options: &OcrOptions) -> Result<()>;

    /// Extract text blocks from a frame, in reading order
    fn extract_text(&mut self, frame: &Frame, options: &OcrOptions) -> Result<Vec<TextBlock>>;

    /// Release models and buffers before the engine is dropped or swapped
    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Scripted OCR engine for tests and dry runs
///
/// Replays queued block lists; once drained it keeps returning the final
/// list, mimicking a static screen. Counts calls so tests can assert how
/// often OCR actually ran.
pub struct StubOcr {
    script: std::collections::VecDeque<Vec<TextBlock>>,
    last: Vec<TextBlock>,
    calls: usize,
    initialized: bool,
}

impl StubOcr {
    /// Engine with an empty script (always returns no blocks)
    pub fn new() -> Self {
        Self {
            script: std::collections::VecDeque::new(),
            last: Vec::new(),
            calls: 0,
            initialized: false,
        }
    }

    /// Queue a result list for a later call
    pub fn push_result(&mut self, blocks: Vec<TextBlock>) {
        self.script.push_back(blocks);
    }

    /// Number of `extract_text` calls so far
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl Default for StubOcr {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrEngine for StubOcr {
    fn name(&self) -> &str {
        "stub"
    }

    fn initialize(&mut self, _options: &OcrOptions) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn extract_text(&mut self, frame: &Frame, options: &OcrOptions) -> Result<Vec<TextBlock>> {
        if !self.initialized {
            return Err(PluginError::EngineFailure(
                "stub OCR used before initialize".into(),
            ));
        }
        self.calls += 1;
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        Ok(self
            .last
            .iter()
            .filter(|b| b.confidence >= options.confidence_threshold)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screenlate_capture::{PixelFormat, Region};

    fn frame() -> Frame {
        let region = Region::new("r", 0, Rect::new(0, 0, 4, 4));
        Frame::new(vec![255u8; 48], 4, 4, PixelFormat::Rgb8, region).unwrap()
    }

    fn empty_frame() -> Frame {
        let region = Region::new("r", 0, Rect::new(0, 0, 0, 0));
        Frame::new(Vec::new(), 0, 0, PixelFormat::Rgb8, region).unwrap()
    }

    #[test]
    fn test_confidence_is_clamped() {
        let block = TextBlock::new("hi", Rect::new(0, 0, 10, 10), 1.7);
        assert_eq!(block.confidence, 1.0);
    }

    #[test]
    fn test_stub_replays_script() {
        let mut ocr = StubOcr::new();
        ocr.initialize(&OcrOptions::default()).unwrap();
        ocr.push_result(vec![TextBlock::new("one", Rect::new(0, 0, 10, 10), 0.9)]);
        ocr.push_result(vec![TextBlock::new("two", Rect::new(0, 0, 10, 10), 0.9)]);

        let opts = OcrOptions::default();
        assert_eq!(ocr.extract_text(&frame(), &opts).unwrap()[0].text, "one");
        assert_eq!(ocr.extract_text(&frame(), &opts).unwrap()[0].text, "two");
        // Drained: repeats the last result
        assert_eq!(ocr.extract_text(&frame(), &opts).unwrap()[0].text, "two");
        assert_eq!(ocr.calls(), 3);
    }

    #[test]
    fn test_empty_frame_returns_empty_list() {
        let mut ocr = StubOcr::new();
        ocr.initialize(&OcrOptions::default()).unwrap();
        ocr.push_result(vec![TextBlock::new("x", Rect::new(0, 0, 10, 10), 0.9)]);
        let blocks = ocr.extract_text(&empty_frame(), &OcrOptions::default()).unwrap();
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_threshold_filters_blocks() {
        let mut ocr = StubOcr::new();
        ocr.initialize(&OcrOptions::default()).unwrap();
        ocr.push_result(vec![
            TextBlock::new("keep", Rect::new(0, 0, 10, 10), 0.9),
            TextBlock::new("drop", Rect::new(0, 12, 10, 10), 0.1),
        ]);
        let opts = OcrOptions {
            confidence_threshold: 0.5,
            ..Default::default()
        };
        let blocks = ocr.extract_text(&frame(), &opts).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "keep");
    }

    #[test]
    fn test_uninitialized_stub_errors() {
        let mut ocr = StubOcr::new();
        assert!(ocr.extract_text(&frame(), &OcrOptions::default()).is_err());
    }
}
