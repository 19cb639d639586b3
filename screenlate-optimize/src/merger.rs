//! Text-block merger
//!
//! OCR engines split visually continuous text into fragments. The merger
//! walks the block list in reading order and joins a block into its
//! predecessor when the gap between them is small enough, keeping curved,
//! vertical and manga layouts intact by never sorting geometrically.

use crate::{meta, Optimizer, OptimizerContext, Phase, PipelineData, Result};
use screenlate_plugins::TextBlock;
use serde_json::json;

/// Characters that end a sentence; with `respect_punctuation` a block ending
/// in one of these is never extended
const SENTENCE_ENDINGS: &[char] = &['.', '!', '?', '。', '！', '？'];

/// Gap thresholds for merging
#[derive(Debug, Clone)]
pub struct MergerConfig {
    /// Maximum horizontal gap in pixels between consecutive blocks
    pub horizontal_threshold: i32,

    /// Maximum vertical gap in pixels between consecutive blocks
    pub vertical_threshold: i32,

    /// Do not merge across sentence-ending punctuation
    pub respect_punctuation: bool,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            horizontal_threshold: 50,
            vertical_threshold: 30,
            respect_punctuation: true,
        }
    }
}

fn within(gap: i32, threshold: i32) -> bool {
    gap.abs() <= threshold
}

fn ends_sentence(text: &str) -> bool {
    text.trim_end()
        .chars()
        .last()
        .map(|c| SENTENCE_ENDINGS.contains(&c))
        .unwrap_or(false)
}

fn merge_into(prev: &mut TextBlock, curr: &TextBlock) {
    let prev_count = prev
        .meta(meta::MERGED_FROM)
        .and_then(|v| v.as_u64())
        .unwrap_or(1);
    let curr_count = curr
        .meta(meta::MERGED_FROM)
        .and_then(|v| v.as_u64())
        .unwrap_or(1);

    // Running average keeps the confidence of an n-way merge exact
    prev.confidence = (prev.confidence * prev_count as f32 + curr.confidence * curr_count as f32)
        / (prev_count + curr_count) as f32;
    prev.text = format!("{} {}", prev.text.trim_end(), curr.text.trim_start());
    prev.rect = prev.rect.union(&curr.rect);
    prev.set_meta(meta::MERGED_FROM, json!(prev_count + curr_count));
}

/// The merger optimizer
pub struct BlockMerger {
    config: MergerConfig,
    enabled: bool,
    merges: u64,
}

impl BlockMerger {
    pub fn new(config: MergerConfig) -> Self {
        Self {
            config,
            enabled: true,
            merges: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Total merges performed over the session
    pub fn merges(&self) -> u64 {
        self.merges
    }

    fn should_merge(&self, prev: &TextBlock, curr: &TextBlock) -> bool {
        if self.config.respect_punctuation && ends_sentence(&prev.text) {
            return false;
        }
        let horizontal_gap = curr.rect.x - prev.rect.right();
        let vertical_gap = curr.rect.y - prev.rect.bottom();
        within(horizontal_gap, self.config.horizontal_threshold)
            || within(vertical_gap, self.config.vertical_threshold)
    }
}

impl Default for BlockMerger {
    fn default() -> Self {
        Self::new(MergerConfig::default())
    }
}

impl Optimizer for BlockMerger {
    fn name(&self) -> &str {
        "text_block_merger"
    }

    fn phase(&self) -> Phase {
        Phase::PostOcr
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn process(&mut self, data: &mut PipelineData, _ctx: &OptimizerContext) -> Result<()> {
        if data.blocks.len() < 2 {
            return Ok(());
        }
        let mut merged: Vec<TextBlock> = Vec::with_capacity(data.blocks.len());
        for block in data.blocks.drain(..) {
            match merged.last_mut() {
                Some(prev) if self.should_merge(prev, &block) => {
                    merge_into(prev, &block);
                    self.merges += 1;
                }
                _ => merged.push(block),
            }
        }
        data.blocks = merged;
        Ok(())
    }
}
