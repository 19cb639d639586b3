//! Optimizer Chain Module
//!
//! Optimizers are ordered, named, independently togglable transformers that
//! run between the pipeline stages. They share one mutable carrier per tick
//! and receive their collaborators (cache manager, plugin registry) as
//! parameters on every call, so the object graph stays a DAG rooted at the
//! pipeline runtime.
//!
//! Contracts every optimizer honors:
//!
//! - idempotent on an already-processed carrier
//! - errors never escape the chain; they are counted and the optimizer may
//!   latch itself into fallback mode
//! - OCR reading order is preserved (blocks may be dropped or merged into
//!   their predecessor, never reordered by geometry)

use screenlate_cache::CacheManager;
use screenlate_capture::Frame;
use screenlate_plugins::{PluginRegistry, TextBlock, Translation};
use std::collections::HashMap;
use thiserror::Error;

pub mod chain;
pub mod learning;
pub mod merger;
pub mod motion;
pub mod parallel;
pub mod spell;
pub mod text;
pub mod validator;

pub use chain::{ChainRoutes, TranslationChain};
pub use learning::{DictionaryLookup, DictionarySave};
pub use merger::{BlockMerger, MergerConfig};
pub use motion::{MotionConfig, MotionTracker};
pub use parallel::{ParallelConfig, ParallelTranslation};
pub use spell::{SpellConfig, SpellCorrector};
pub use validator::{TextValidator, Validation, ValidatorConfig};

/// Errors surfaced by optimizers (the chain itself swallows them)
#[derive(Error, Debug)]
pub enum OptimizeError {
    #[error(transparent)]
    Plugin(#[from] screenlate_plugins::PluginError),

    #[error(transparent)]
    Cache(#[from] screenlate_cache::CacheError),

    #[error("Optimizer '{name}' is in fallback mode")]
    FallbackMode { name: String },

    #[error("{0}")]
    Internal(String),
}

/// Result type alias for optimizer operations
pub type Result<T> = std::result::Result<T, OptimizeError>;

/// Well-known metadata keys on [`TextBlock`]s
pub mod meta {
    /// Set when an optimizer already supplied a translation for the block
    pub const SKIP_TRANSLATION: &str = "skip_translation";

    /// Supplied translation text (with [`SKIP_TRANSLATION`])
    pub const TRANSLATED_TEXT: &str = "translated_text";

    /// Confidence of the supplied translation
    pub const TRANSLATION_CONFIDENCE: &str = "translation_confidence";

    /// Identity of whatever produced the supplied translation
    pub const TRANSLATION_ENGINE: &str = "translation_engine";

    /// Number of original OCR blocks merged into this one
    pub const MERGED_FROM: &str = "merged_from";

    /// Composite validation score
    pub const VALIDATION_SCORE: &str = "validation_score";

    /// Set when the spell corrector rewrote the text
    pub const SPELL_CORRECTED: &str = "spell_corrected";
}

/// Where in the tick an optimizer runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before OCR; may set `skip_ocr` / `force_ocr`
    PreOcr,
    /// After OCR, on the block list
    PostOcr,
    /// Before translation; may satisfy blocks from the dictionary
    PreTranslation,
    /// During translation; may batch work onto a pool
    Translation,
    /// After translation; persistence hooks
    PostTranslation,
}

/// The mutable carrier shared by all optimizers within one tick
#[derive(Debug, Default)]
pub struct PipelineData {
    /// The frame being processed (absent once the tick is text-only)
    pub frame: Option<Frame>,

    /// Content hash of the frame's downsampled copy
    pub frame_hash: Option<String>,

    /// Whether the similarity gate matched the previous frame
    pub similar_frame: bool,

    /// Set by pre-OCR optimizers to reuse the previous blocks
    pub skip_ocr: bool,

    /// Set once after motion stops to force a verification OCR pass
    pub force_ocr: bool,

    /// OCR output, in reading order
    pub blocks: Vec<TextBlock>,

    /// Translations produced this tick, same order as `blocks`
    pub translations: Vec<Translation>,

    /// Offset to translate existing overlays by, from the motion tracker
    pub overlay_offset: Option<(i32, i32)>,

    /// Source language for this tick
    pub source_lang: String,

    /// Target language for this tick
    pub target_lang: String,
}

impl PipelineData {
    /// Carrier for one tick
    pub fn new(source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            ..Default::default()
        }
    }

    /// Whether a block was satisfied by an earlier optimizer
    pub fn block_skips_translation(block: &TextBlock) -> bool {
        block
            .meta(meta::SKIP_TRANSLATION)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Collaborators handed to each optimizer call
pub struct OptimizerContext<'a> {
    /// The multi-tier cache and learned dictionary
    pub cache: &'a CacheManager,

    /// Engine registry (translation chain, parallel pool)
    pub registry: &'a PluginRegistry,
}

/// A named transformer in the chain
pub trait Optimizer: Send {
    /// Unique name, used for toggles and failure counters
    fn name(&self) -> &str;

    /// Phase this optimizer runs in
    fn phase(&self) -> Phase;

    /// Whether the optimizer should run at all
    fn enabled(&self) -> bool {
        true
    }

    /// Transform the carrier
    fn process(&mut self, data: &mut PipelineData, ctx: &OptimizerContext) -> Result<()>;

    /// Optional second pass after the phase's main work
    fn post_process(&mut self, _data: &mut PipelineData, _ctx: &OptimizerContext) -> Result<()> {
        Ok(())
    }
}

/// The ordered optimizer chain
///
/// Runs optimizers of a phase in registration order. Errors are swallowed:
/// counted per optimizer, logged, and the chain moves on.
pub struct OptimizerChain {
    optimizers: Vec<Box<dyn Optimizer>>,
    failures: HashMap<String, u64>,
}

impl OptimizerChain {
    /// Empty chain
    pub fn new() -> Self {
        Self {
            optimizers: Vec::new(),
            failures: HashMap::new(),
        }
    }

    /// Append an optimizer; order of registration is order of execution
    pub fn push(&mut self, optimizer: Box<dyn Optimizer>) {
        self.optimizers.push(optimizer);
    }

    /// Names in execution order
    pub fn names(&self) -> Vec<String> {
        self.optimizers.iter().map(|o| o.name().to_string()).collect()
    }

    /// Failure counts per optimizer
    pub fn failure_counts(&self) -> &HashMap<String, u64> {
        &self.failures
    }

    /// Run all enabled optimizers of one phase over the carrier
    pub fn run_phase(&mut self, phase: Phase, data: &mut PipelineData, ctx: &OptimizerContext) {
        for optimizer in self.optimizers.iter_mut() {
            if optimizer.phase() != phase || !optimizer.enabled() {
                continue;
            }
            if let Err(e) = optimizer.process(data, ctx) {
                let count = self.failures.entry(optimizer.name().to_string()).or_insert(0);
                *count += 1;
                tracing::warn!(
                    "Optimizer '{}' failed ({} total): {}",
                    optimizer.name(),
                    count,
                    e
                );
            }
        }
        for optimizer in self.optimizers.iter_mut() {
            if optimizer.phase() != phase || !optimizer.enabled() {
                continue;
            }
            if let Err(e) = optimizer.post_process(data, ctx) {
                let count = self.failures.entry(optimizer.name().to_string()).or_insert(0);
                *count += 1;
                tracing::warn!("Optimizer '{}' post pass failed: {}", optimizer.name(), e);
            }
        }
    }
}

impl Default for OptimizerChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screenlate_cache::CacheManagerConfig;

    struct Failing {
        ran: usize,
    }

    impl Optimizer for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn phase(&self) -> Phase {
            Phase::PostOcr
        }
        fn process(&mut self, _data: &mut PipelineData, _ctx: &OptimizerContext) -> Result<()> {
            self.ran += 1;
            Err(OptimizeError::Internal("boom".into()))
        }
    }

    struct Tagging;

    impl Optimizer for Tagging {
        fn name(&self) -> &str {
            "tagging"
        }
        fn phase(&self) -> Phase {
            Phase::PostOcr
        }
        fn process(&mut self, data: &mut PipelineData, _ctx: &OptimizerContext) -> Result<()> {
            data.skip_ocr = true;
            Ok(())
        }
    }

    fn test_ctx_parts() -> (CacheManager, PluginRegistry) {
        let dir = std::env::temp_dir().join(format!("screenlate-chain-{}", std::process::id()));
        let cache = CacheManager::new(CacheManagerConfig {
            dictionary_dir: dir,
            ..Default::default()
        });
        (cache, PluginRegistry::new())
    }

    #[test]
    fn test_chain_swallows_errors_and_continues() {
        let (cache, registry) = test_ctx_parts();
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut chain = OptimizerChain::new();
        chain.push(Box::new(Failing { ran: 0 }));
        chain.push(Box::new(Tagging));

        let mut data = PipelineData::new("en", "de");
        chain.run_phase(Phase::PostOcr, &mut data, &ctx);

        // The failure was counted and the later optimizer still ran
        assert_eq!(chain.failure_counts().get("failing"), Some(&1));
        assert!(data.skip_ocr);
    }

    #[test]
    fn test_phase_filtering() {
        let (cache, registry) = test_ctx_parts();
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut chain = OptimizerChain::new();
        chain.push(Box::new(Tagging));

        let mut data = PipelineData::new("en", "de");
        chain.run_phase(Phase::PreOcr, &mut data, &ctx);
        assert!(!data.skip_ocr);
        chain.run_phase(Phase::PostOcr, &mut data, &ctx);
        assert!(data.skip_ocr);
    }
}
